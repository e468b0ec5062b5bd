// src/processor/worker.rs
use crate::blocks::condition::ConditionSet;
use crate::blocks::detection::DetectionStatus;
use crate::blocks::pattern::{assemble_patterns, RedetectionScanner};
use crate::blocks::scanner::BlockScanner;
use crate::database::models::CandleSeries;
use crate::database::postgres::{CandleSource, PostgresManager};
use crate::graph::engine::GraphScanner;
use crate::graph::schema::BlockGraph;
use crate::indicators::{IndicatorCalculator, IndicatorSpec};
use crate::processor::job::{ScanJob, ScanSummary, TickerOutcome};
use anyhow::Result;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument};

// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency_limit: usize,
    /// Monetary unit that trading values are expressed in (e.g. 1e8 for
    /// hundred-million-won thresholds).
    pub monetary_unit: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: num_cpus::get(),
            monetary_unit: 100_000_000.0,
        }
    }
}

/// Fans one scan run out over every ticker, bounded by a semaphore. Candles
/// come through `CandleSource`; results go to the database unless the worker
/// was built as a dry run. A failing ticker is logged and counted, never
/// fatal to the run.
pub struct ScanWorker {
    source: Arc<dyn CandleSource>,
    sink: Option<Arc<PostgresManager>>,
    config: WorkerConfig,
}

impl ScanWorker {
    pub fn new(db: Arc<PostgresManager>, config: WorkerConfig) -> Self {
        Self {
            source: db.clone(),
            sink: Some(db),
            config,
        }
    }

    /// Scan without persisting anything; summary only.
    pub fn dry_run(source: Arc<dyn CandleSource>, config: WorkerConfig) -> Self {
        Self {
            source,
            sink: None,
            config,
        }
    }

    pub async fn run(&self, set: ConditionSet) -> Result<ScanSummary> {
        set.validate()?;
        let set = Arc::new(set);
        let spec = Arc::new(set.indicator_spec());
        let tickers = self.source.tickers().await?;
        info!(
            "Scanning {} tickers with condition set '{}' (concurrency {})",
            tickers.len(),
            set.name,
            self.config.concurrency_limit
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit));
        let mut handles = Vec::with_capacity(tickers.len());
        for ticker in tickers {
            let permit = semaphore.clone().acquire_owned().await?;
            let source = Arc::clone(&self.source);
            let sink = self.sink.clone();
            let set = Arc::clone(&set);
            let spec = Arc::clone(&spec);
            let job = ScanJob::new(ticker, &set.id);
            let monetary_unit = self.config.monetary_unit;
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                scan_ticker(source, sink, set, spec, job, monetary_unit).await
            }));
        }

        let summary = collect(handles).await;
        info!(
            "Scan finished: {} tickers, {} detections ({} completed), {} patterns, {} redetections, {} failures",
            summary.tickers,
            summary.detections,
            summary.completed,
            summary.patterns,
            summary.redetections,
            summary.failures
        );
        Ok(summary)
    }

    /// Graph variant of `run`: same fan-out, expression-driven scanner.
    pub async fn run_graph(&self, graph: BlockGraph) -> Result<ScanSummary> {
        let spec = Arc::new(graph.indicator_spec());
        let graph = Arc::new(graph);
        let tickers = self.source.tickers().await?;
        info!(
            "Scanning {} tickers with block graph '{}' (concurrency {})",
            tickers.len(),
            graph.name,
            self.config.concurrency_limit
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit));
        let mut handles = Vec::with_capacity(tickers.len());
        for ticker in tickers {
            let permit = semaphore.clone().acquire_owned().await?;
            let source = Arc::clone(&self.source);
            let sink = self.sink.clone();
            let graph = Arc::clone(&graph);
            let spec = Arc::clone(&spec);
            let job = ScanJob::new(ticker, &graph.id);
            let monetary_unit = self.config.monetary_unit;
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                scan_ticker_graph(source, sink, graph, spec, job, monetary_unit).await
            }));
        }

        let summary = collect(handles).await;
        info!(
            "Graph scan finished: {} tickers, {} detections ({} completed), {} redetections, {} failures",
            summary.tickers, summary.detections, summary.completed, summary.redetections, summary.failures
        );
        Ok(summary)
    }
}

async fn collect(
    handles: Vec<tokio::task::JoinHandle<Result<TickerOutcome>>>,
) -> ScanSummary {
    let mut summary = ScanSummary::default();
    for result in join_all(handles).await {
        match result {
            Ok(Ok(outcome)) => summary.absorb(outcome),
            Ok(Err(e)) => {
                error!("Ticker scan failed: {e:#}");
                summary.failures += 1;
            }
            Err(e) => {
                error!("Scan task panicked: {e}");
                summary.failures += 1;
            }
        }
    }
    summary
}

#[instrument(skip(source, sink, set, spec), fields(job = %job))]
async fn scan_ticker(
    source: Arc<dyn CandleSource>,
    sink: Option<Arc<PostgresManager>>,
    set: Arc<ConditionSet>,
    spec: Arc<IndicatorSpec>,
    job: ScanJob,
    monetary_unit: f64,
) -> Result<TickerOutcome> {
    let ticker = job.ticker.as_str();
    let rows = source.candles(ticker).await?;
    let series = CandleSeries::from_rows(ticker, rows);
    if series.is_empty() {
        return Ok(TickerOutcome::default());
    }
    series.validate()?;

    let annotated = IndicatorCalculator::annotate(series.candles(), &spec, monetary_unit);
    let scanner = BlockScanner::new(&set)?;
    let mut arena = scanner.scan(ticker, &annotated)?;
    let patterns = assemble_patterns(&mut arena, ticker, &set);

    let redetector = RedetectionScanner::new(&set);
    let mut events = Vec::new();
    for pattern in &patterns {
        events.extend(redetector.scan(pattern, &arena, &annotated)?);
    }

    if let Some(db) = sink {
        db.save_detections(&set.id, &arena).await?;
        db.save_patterns(&patterns).await?;
        db.save_redetections(&events).await?;
    }

    Ok(TickerOutcome {
        detections: arena.len(),
        completed: arena
            .iter()
            .filter(|d| d.status == DetectionStatus::Completed)
            .count(),
        patterns: patterns.len(),
        redetections: events.len(),
    })
}

#[instrument(skip(source, sink, graph, spec), fields(job = %job))]
async fn scan_ticker_graph(
    source: Arc<dyn CandleSource>,
    sink: Option<Arc<PostgresManager>>,
    graph: Arc<BlockGraph>,
    spec: Arc<IndicatorSpec>,
    job: ScanJob,
    monetary_unit: f64,
) -> Result<TickerOutcome> {
    let ticker = job.ticker.as_str();
    let rows = source.candles(ticker).await?;
    let series = CandleSeries::from_rows(ticker, rows);
    if series.is_empty() {
        return Ok(TickerOutcome::default());
    }
    series.validate()?;

    let annotated = IndicatorCalculator::annotate(series.candles(), &spec, monetary_unit);
    let outcome = GraphScanner::new(&graph).scan(ticker, &annotated)?;

    if let Some(db) = sink {
        db.save_detections(&graph.id, &outcome.detections).await?;
        db.save_redetections(&outcome.redetections).await?;
    }

    Ok(TickerOutcome {
        detections: outcome.detections.len(),
        completed: outcome.completed_count(),
        patterns: 0,
        redetections: outcome.redetections.len(),
    })
}
