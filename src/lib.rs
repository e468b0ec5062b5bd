// src/lib.rs
pub mod blocks;
pub mod cli;
pub mod conditions;
pub mod config;
pub mod database;
pub mod error;
pub mod graph;
pub mod indicators;
pub mod processor;

pub use error::ScanError;
