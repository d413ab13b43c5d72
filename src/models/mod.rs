pub mod job;
pub mod stats;
