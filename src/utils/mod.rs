pub mod cli;
pub mod config;
pub mod delay;
pub mod log;
