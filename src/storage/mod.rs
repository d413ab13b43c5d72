pub mod dump;
pub mod records;
