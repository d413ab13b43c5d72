pub mod canonical;
pub mod chromium;
pub mod extractor;
pub mod fetcher;
pub mod http;
