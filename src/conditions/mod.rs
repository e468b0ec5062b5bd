// src/conditions/mod.rs
pub mod import_export;

pub use import_export::{
    export_condition_set_to_file, import_candles_from_file, import_condition_set_from_file,
    read_block_graph, read_condition_set,
};
