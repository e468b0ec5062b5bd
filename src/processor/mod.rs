// src/processor/mod.rs
pub mod job;
pub mod worker;

pub use job::{ScanJob, ScanSummary, TickerOutcome};
pub use worker::{ScanWorker, WorkerConfig};
