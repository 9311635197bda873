//! Log retrieval for kubefn
//!
//! This crate locates the pods behind a function, reads or follows their
//! logs, and filters the text by count, pattern and start time.

mod fetcher;
mod filter;
mod parser;

pub use fetcher::{LogChunk, LogError, LogFetcher, LogFollower};
pub use filter::LogFilter;
pub use parser::{LogEntry, LogParser};
