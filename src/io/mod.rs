//! File input and output: schedule export, forecast import.

pub mod export;
pub mod import;
