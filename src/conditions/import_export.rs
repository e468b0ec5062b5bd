// src/conditions/import_export.rs
use crate::blocks::condition::ConditionSet;
use crate::database::models::Candle;
use crate::database::postgres::PostgresManager;
use crate::graph::schema::{BlockGraph, BlockGraphDoc};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Import a condition set from a JSON file
pub async fn import_condition_set_from_file(
    db: &PostgresManager,
    file_path: &Path,
) -> Result<ConditionSet> {
    info!("Importing condition set from file: {}", file_path.display());

    let mut set = read_condition_set(file_path)?;

    // An empty or nil id means a fresh set; otherwise the id must parse.
    if set.id.is_empty() || set.id == "00000000-0000-0000-0000-000000000000" {
        set.id = Uuid::new_v4().to_string();
        info!("Generated new UUID for condition set: {}", set.id);
    } else {
        let _: Uuid = Uuid::parse_str(&set.id)
            .context("Invalid UUID format in condition set")?;
    }

    set.validate()
        .with_context(|| format!("Condition set '{}' failed validation", set.name))?;

    db.save_condition_set(&set).await?;

    info!("Condition set imported successfully: {} ({})", set.name, set.id);
    Ok(set)
}

/// Parse and validate a condition set without touching the database.
pub fn read_condition_set(file_path: &Path) -> Result<ConditionSet> {
    let file = File::open(file_path)
        .context(format!("Failed to open file: {}", file_path.display()))?;

    let mut reader = BufReader::new(file);
    let mut json_str = String::new();
    reader
        .read_to_string(&mut json_str)
        .context(format!("Failed to read file: {}", file_path.display()))?;

    let set: ConditionSet =
        serde_json::from_str(&json_str).context("Failed to parse condition set JSON")?;

    Ok(set)
}

/// Export a condition set to a JSON file
pub async fn export_condition_set_to_file(
    db: &PostgresManager,
    set_id: &str,
    file_path: &Path,
) -> Result<()> {
    info!("Exporting condition set {} to file: {}", set_id, file_path.display());

    let set = db
        .load_condition_set(set_id)
        .await?
        .with_context(|| format!("No condition set with id '{}'", set_id))?;

    let json = serde_json::to_string_pretty(&set)
        .context("Failed to serialize condition set to JSON")?;

    let file = File::create(file_path)
        .context(format!("Failed to create file: {}", file_path.display()))?;

    let mut writer = BufWriter::new(file);
    writer
        .write_all(json.as_bytes())
        .context(format!("Failed to write to file: {}", file_path.display()))?;

    info!("Condition set exported successfully to: {}", file_path.display());
    Ok(())
}

/// Import daily candles from a JSON file (an array of candle rows) into the
/// `daily_candles` table.
pub async fn import_candles_from_file(db: &PostgresManager, file_path: &Path) -> Result<usize> {
    info!("Importing candles from file: {}", file_path.display());

    let json_str = std::fs::read_to_string(file_path)
        .context(format!("Failed to read file: {}", file_path.display()))?;

    let mut candles: Vec<Candle> =
        serde_json::from_str(&json_str).context("Failed to parse candle JSON")?;
    for candle in &mut candles {
        if candle.trading_value == 0.0 {
            candle.trading_value = candle.close * candle.volume as f64;
        }
    }

    db.upsert_candles(&candles).await?;

    info!("Imported {} candles", candles.len());
    Ok(candles.len())
}

/// Read a block-graph document from a JSON file and compile it. Compiling
/// parses every expression, so malformed graphs fail here.
pub fn read_block_graph(file_path: &Path) -> Result<(BlockGraphDoc, BlockGraph)> {
    let json_str = std::fs::read_to_string(file_path)
        .context(format!("Failed to read file: {}", file_path.display()))?;

    let doc: BlockGraphDoc =
        serde_json::from_str(&json_str).context("Failed to parse block graph JSON")?;

    let graph = BlockGraph::load(&doc)
        .with_context(|| format!("Block graph '{}' failed validation", doc.name))?;

    Ok((doc, graph))
}
