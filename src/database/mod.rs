// src/database/mod.rs
pub mod models;
pub mod postgres;
pub mod schema;

pub use models::{Candle, CandleSeries};
pub use postgres::{CandleSource, PostgresManager};
