//! Job ledger: a JSONL record of finished jobs and its reporter.

pub mod logger;
pub mod reporter;
