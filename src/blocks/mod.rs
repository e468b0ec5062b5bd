// src/blocks/mod.rs
pub mod checker;
pub mod condition;
pub mod detection;
pub mod pattern;
pub mod scanner;

pub use condition::{
    BlockCondition, ChainCondition, ConditionSet, ExitConditionType, RedetectionCondition,
};
pub use detection::{Detection, DetectionStatus, EntrySnapshot, ExitReason};
pub use pattern::{
    assemble_patterns, Pattern, RedetectionEvent, RedetectionScanner, RedetectionStatus,
    RedetectionWindow,
};
pub use scanner::BlockScanner;
