// src/cli.rs
use crate::blocks::condition::ConditionSet;
use crate::conditions::{
    export_condition_set_to_file, import_candles_from_file, import_condition_set_from_file,
    read_block_graph, read_condition_set,
};
use crate::config::Settings;
use crate::database::postgres::PostgresManager;
use crate::processor::job::ScanSummary;
use crate::processor::worker::{ScanWorker, WorkerConfig};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "surge-block-scanner")]
#[command(about = "Surge block-chain scanner for daily candle series", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create database tables
    InitDb,

    /// List stored condition sets
    List,

    /// Import a condition set from a JSON file
    Import {
        /// Input file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Import daily candles from a JSON file
    ImportCandles {
        /// Input file (JSON array of candle rows)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Export a condition set to a JSON file
    Export {
        /// Condition set ID
        #[arg(short, long)]
        id: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Scan every ticker with a condition set
    Scan {
        /// Condition set ID in the database
        #[arg(short, long)]
        id: Option<String>,

        /// Condition set JSON file (instead of --id)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Concurrent ticker scans (defaults to CPU count)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Scan without writing results to the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Scan every ticker with an expression block graph
    ScanGraph {
        /// Block graph JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Concurrent ticker scans (defaults to CPU count)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Scan without writing results to the database
        #[arg(long)]
        dry_run: bool,
    },
}

/// Execute a command from the CLI
pub async fn execute_command(command: Commands) -> Result<()> {
    let settings = Settings::load()?;
    let db = Arc::new(
        PostgresManager::new(&settings.database.url, settings.database.max_connections).await?,
    );

    match command {
        Commands::InitDb => {
            db.init_tables().await?;
            println!("Database initialized.");
        }

        Commands::List => {
            let sets = db.list_condition_sets().await?;
            println!("Found {} condition sets:", sets.len());
            println!("{:<36} | {:<30}", "ID", "Name");
            println!("{:-<36}-+-{:-<30}", "", "");
            for (id, name) in sets {
                println!("{:<36} | {:<30}", id, name);
            }
        }

        Commands::Import { file } => {
            let set = import_condition_set_from_file(&db, &file).await?;
            println!("Condition set imported successfully with ID: {}", set.id);
        }

        Commands::ImportCandles { file } => {
            let count = import_candles_from_file(&db, &file).await?;
            println!("Imported {} candles.", count);
        }

        Commands::Export { id, output } => {
            export_condition_set_to_file(&db, &id, &output).await?;
            println!("Condition set exported successfully.");
        }

        Commands::Scan { id, file, concurrency, dry_run } => {
            let set = load_condition_set(&db, id, file).await?;
            println!("Scanning with condition set '{}' ({})", set.name, set.id);
            let worker = make_worker(db, &settings, concurrency, dry_run);
            let summary = worker.run(set).await?;
            print_summary(&summary);
        }

        Commands::ScanGraph { file, concurrency, dry_run } => {
            let (doc, graph) = read_block_graph(&file)?;
            println!("Scanning with block graph '{}' ({} nodes)", doc.name, doc.nodes.len());
            let worker = make_worker(db, &settings, concurrency, dry_run);
            let summary = worker.run_graph(graph).await?;
            print_summary(&summary);
        }
    }

    Ok(())
}

fn make_worker(
    db: Arc<PostgresManager>,
    settings: &Settings,
    concurrency: Option<usize>,
    dry_run: bool,
) -> ScanWorker {
    let config = WorkerConfig {
        concurrency_limit: concurrency.unwrap_or(settings.scan.concurrency),
        monetary_unit: settings.scan.monetary_unit,
    };
    if dry_run {
        ScanWorker::dry_run(db, config)
    } else {
        ScanWorker::new(db, config)
    }
}

async fn load_condition_set(
    db: &PostgresManager,
    id: Option<String>,
    file: Option<PathBuf>,
) -> Result<ConditionSet> {
    match (id, file) {
        (Some(id), None) => db
            .load_condition_set(&id)
            .await?
            .ok_or_else(|| anyhow!("No condition set with id '{}'", id)),
        (None, Some(path)) => {
            let set = read_condition_set(&path)?;
            set.validate()
                .with_context(|| format!("Condition set '{}' failed validation", set.name))?;
            Ok(set)
        }
        _ => Err(anyhow!("Provide exactly one of --id or --file")),
    }
}

fn print_summary(summary: &ScanSummary) {
    println!("\nScan Results:");
    println!("Tickers scanned: {}", summary.tickers);
    println!("Detections: {} ({} completed)", summary.detections, summary.completed);
    println!("Patterns: {}", summary.patterns);
    println!("Redetections: {}", summary.redetections);
    if summary.failures > 0 {
        println!("Failures: {}", summary.failures);
    }
}
