// src/graph/mod.rs
pub mod engine;
pub mod expr;
pub mod schema;

pub use engine::{GraphScanOutcome, GraphScanner, RecordSpots, SpotAction, SpotPolicy};
pub use expr::{BlockSnapshot, Expr, ExprContext, Value};
pub use schema::{BlockGraph, BlockGraphDoc, EdgeDoc, GraphNode, Highlight, NodeDoc, RedetectDoc};
