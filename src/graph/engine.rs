// src/graph/engine.rs
//! Scan engine for the expression-driven block graph. Same chronological
//! walk as the fixed-level scanner, but entry/exit come from each node's
//! parsed expressions and chaining follows the graph's parent edges instead
//! of the implicit level-(L-1) link.

use crate::blocks::detection::{Detection, DetectionStatus, EntrySnapshot, ExitReason};
use crate::blocks::pattern::{RedetectionEvent, RedetectionStatus};
use crate::error::ScanError;
use crate::graph::expr::{BlockSnapshot, ExprContext};
use crate::graph::schema::{BlockGraph, GraphNode};
use crate::indicators::AnnotatedCandle;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// What to do with a day that satisfies a node's entry but cannot be
/// promoted to a new detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotAction {
    Record,
    Discard,
}

/// Pluggable near-miss policy. The upstream behavior for promoting versus
/// discarding coincident qualifiers is not fixed, so it lives behind this
/// seam instead of being hard-coded.
pub trait SpotPolicy: Send + Sync {
    fn on_near_miss(&self, node: &GraphNode, date: NaiveDate) -> SpotAction;
}

/// Default policy: keep every near-miss as evidence on the active block.
pub struct RecordSpots;

impl SpotPolicy for RecordSpots {
    fn on_near_miss(&self, _node: &GraphNode, _date: NaiveDate) -> SpotAction {
        SpotAction::Record
    }
}

#[derive(Debug, Default)]
pub struct GraphScanOutcome {
    pub detections: Vec<Detection>,
    pub redetections: Vec<RedetectionEvent>,
}

impl GraphScanOutcome {
    /// Completed detections, excluding virtual ones.
    pub fn completed_count(&self) -> usize {
        self.detections
            .iter()
            .filter(|d| d.status == DetectionStatus::Completed && !d.is_virtual)
            .count()
    }
}

pub struct GraphScanner<'a> {
    graph: &'a BlockGraph,
    policy: Box<dyn SpotPolicy>,
}

impl<'a> GraphScanner<'a> {
    pub fn new(graph: &'a BlockGraph) -> Self {
        Self {
            graph,
            policy: Box::new(RecordSpots),
        }
    }

    pub fn with_policy(graph: &'a BlockGraph, policy: Box<dyn SpotPolicy>) -> Self {
        Self { graph, policy }
    }

    pub fn scan(
        &self,
        ticker: &str,
        series: &[AnnotatedCandle],
    ) -> Result<GraphScanOutcome, ScanError> {
        let n = self.graph.nodes.len();
        let mut arena: Vec<Detection> = Vec::new();
        // Arena indices per node; at most one active detection per node.
        let mut node_dets: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut active: Vec<Option<usize>> = vec![None; n];

        for idx in 0..series.len() {
            let candle = &series[idx].candle;
            let date = candle.date;

            // 1. Peaks move first so today's exits and snapshots see them.
            for ni in 0..n {
                if let Some(ai) = active[ni] {
                    arena[ai].update_peak(candle);
                }
            }

            let snapshots = self.build_snapshots(&arena, &node_dets);
            let cx = ExprContext {
                idx,
                series,
                blocks: &snapshots,
            };

            // 2. Exits.
            for ni in 0..n {
                let Some(ai) = active[ni] else { continue };
                if self.graph.nodes[ni].exit.eval_bool(&cx) {
                    arena[ai].complete(date, ExitReason::Expression)?;
                    debug!(ticker, node = %self.graph.nodes[ni].id, date = %date, "graph block completed");
                    active[ni] = None;
                }
            }

            // 3. Entries, parents before children.
            let mut started_today: Vec<usize> = Vec::new();
            for ni in 0..n {
                let node = &self.graph.nodes[ni];
                if !node.entry.eval_bool(&cx) {
                    continue;
                }

                if let Some(ai) = active[ni] {
                    // Qualifying day on an already-active node.
                    if self.policy.on_near_miss(node, date) == SpotAction::Record
                        && arena[ai].spots.len() < self.graph.spot_cap
                    {
                        arena[ai].spots.push(date);
                    }
                    continue;
                }

                match self.resolve_parent(ni, date, &arena, &node_dets, &active) {
                    ParentLookup::Satisfied(parent_id) => {
                        let det = Detection::open(ticker, node.level, candle, parent_id);
                        debug!(ticker, node = %node.id, date = %date, id = %det.id, "graph block entered");
                        arena.push(det);
                        let ai = arena.len() - 1;
                        node_dets[ni].push(ai);
                        active[ni] = Some(ai);
                        started_today.push(ai);
                    }
                    ParentLookup::ParentStillActive(parent_arena_idx) => {
                        // Chain constraint unmet; keep the day as evidence on
                        // the running parent block.
                        if self.policy.on_near_miss(node, date) == SpotAction::Record
                            && arena[parent_arena_idx].spots.len() < self.graph.spot_cap
                        {
                            arena[parent_arena_idx].spots.push(date);
                        }
                    }
                    ParentLookup::Unsatisfied => {}
                }
            }

            mark_virtuals(&mut arena, &started_today, self.graph);
        }

        let redetections = self.scan_redetections(ticker, series, &arena, &node_dets)?;
        Ok(GraphScanOutcome {
            detections: arena,
            redetections,
        })
    }

    /// Latest detection per node, viewed immutably for expression access.
    fn build_snapshots(
        &self,
        arena: &[Detection],
        node_dets: &[Vec<usize>],
    ) -> HashMap<String, BlockSnapshot> {
        let mut map = HashMap::new();
        for (ni, dets) in node_dets.iter().enumerate() {
            if let Some(&di) = dets.last() {
                map.insert(self.graph.nodes[ni].id.clone(), snapshot_of(&arena[di]));
            }
        }
        map
    }

    /// All parent nodes must have a detection completed strictly before
    /// `date`; the child's parent_id is the latest-ended of those.
    fn resolve_parent(
        &self,
        ni: usize,
        date: NaiveDate,
        arena: &[Detection],
        node_dets: &[Vec<usize>],
        active: &[Option<usize>],
    ) -> ParentLookup {
        let node = &self.graph.nodes[ni];
        if node.parents.is_empty() {
            return ParentLookup::Satisfied(None);
        }
        let mut best: Option<&Detection> = None;
        for &p in &node.parents {
            let candidate = node_dets[p]
                .iter()
                .map(|&di| &arena[di])
                .filter(|d| d.ended_at.is_some_and(|end| end < date))
                .max_by_key(|d| d.ended_at);
            match candidate {
                Some(d) => {
                    if best.map_or(true, |b| d.ended_at > b.ended_at) {
                        best = Some(d);
                    }
                }
                None => {
                    return match active[p] {
                        Some(ai) => ParentLookup::ParentStillActive(ai),
                        None => ParentLookup::Unsatisfied,
                    };
                }
            }
        }
        ParentLookup::Satisfied(best.map(|d| d.id.clone()))
    }

    /// Second pass for nodes carrying redetection sub-expressions: every
    /// completed, non-virtual block of such a node is a seed whose echo we
    /// look for after its end date. One active event per seed at a time.
    fn scan_redetections(
        &self,
        ticker: &str,
        series: &[AnnotatedCandle],
        arena: &[Detection],
        node_dets: &[Vec<usize>],
    ) -> Result<Vec<RedetectionEvent>, ScanError> {
        let mut events = Vec::new();
        for (ni, node) in self.graph.nodes.iter().enumerate() {
            let Some((entry_expr, exit_expr)) = &node.redetect else {
                continue;
            };
            for &di in &node_dets[ni] {
                let seed = &arena[di];
                if seed.is_virtual || seed.status != DetectionStatus::Completed {
                    continue;
                }
                let Some(end) = seed.ended_at else { continue };
                let mut blocks = HashMap::new();
                blocks.insert(node.id.clone(), snapshot_of(seed));

                let mut active_event: Option<RedetectionEvent> = None;
                let mut seq = 0u32;
                for idx in 0..series.len() {
                    let candle = &series[idx].candle;
                    if candle.date <= end {
                        continue;
                    }
                    let cx = ExprContext {
                        idx,
                        series,
                        blocks: &blocks,
                    };
                    if let Some(mut event) = active_event.take() {
                        if candle.high > event.peak_price {
                            event.peak_price = candle.high;
                        }
                        if candle.volume > event.peak_volume {
                            event.peak_volume = candle.volume;
                        }
                        if exit_expr.eval_bool(&cx) {
                            event.status = RedetectionStatus::Completed;
                            event.ended_at = Some(candle.date);
                            events.push(event);
                        } else {
                            active_event = Some(event);
                        }
                    } else if entry_expr.eval_bool(&cx) {
                        seq += 1;
                        debug!(ticker, node = %node.id, date = %candle.date, seq, "graph redetection started");
                        active_event = Some(RedetectionEvent {
                            id: Uuid::new_v4().to_string(),
                            seq,
                            parent_detection_id: seed.id.clone(),
                            started_at: candle.date,
                            ended_at: None,
                            entry_open: candle.open,
                            entry_close: candle.close,
                            peak_price: candle.high,
                            peak_volume: candle.volume,
                            status: RedetectionStatus::Active,
                        });
                    }
                }
                events.extend(active_event);
            }
        }
        Ok(events)
    }
}

enum ParentLookup {
    /// Entry may proceed; the chosen parent detection id (None for roots).
    Satisfied(Option<String>),
    /// A parent node is still running; arena index of its active detection.
    ParentStillActive(usize),
    Unsatisfied,
}

fn snapshot_of(det: &Detection) -> BlockSnapshot {
    BlockSnapshot {
        started_at: det.started_at,
        entry: EntrySnapshot {
            open: det.entry.open,
            high: det.entry.high,
            low: det.entry.low,
            close: det.entry.close,
            volume: det.entry.volume,
        },
        peak_price: det.peak_price,
        peak_volume: det.peak_volume,
    }
}

/// When several detections start on the same day under the same parent, the
/// deepest level wins and the rest are subsumed: marked virtual, excluded
/// from completion counts, lineage retained.
fn mark_virtuals(arena: &mut [Detection], started_today: &[usize], graph: &BlockGraph) {
    if started_today.len() < 2 {
        return;
    }
    let mut groups: HashMap<Option<String>, Vec<usize>> = HashMap::new();
    for &ai in started_today {
        groups
            .entry(arena[ai].parent_id.clone())
            .or_default()
            .push(ai);
    }
    for (_, members) in groups {
        if members.len() < 2 {
            continue;
        }
        let Some(&keep) = members.iter().max_by_key(|&&ai| arena[ai].level) else {
            continue;
        };
        for ai in members {
            if ai != keep {
                arena[ai].is_virtual = true;
                debug!(id = %arena[ai].id, graph = %graph.name, "detection subsumed as virtual");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Candle;
    use crate::graph::schema::{BlockGraphDoc, EdgeDoc, NodeDoc};
    use crate::indicators::{IndicatorCalculator, IndicatorSpec};
    use chrono::Duration;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn candle(offset: i64, o: f64, h: f64, l: f64, c: f64, v: i64) -> Candle {
        Candle::new("T", d("2024-01-01") + Duration::days(offset), o, h, l, c, v)
    }

    fn node(id: &str, level: u32, entry: &str, exit: &str) -> NodeDoc {
        NodeDoc {
            id: id.into(),
            level,
            entry: entry.into(),
            exit: exit.into(),
            redetect: None,
            highlight: None,
        }
    }

    fn annotate(candles: &[Candle]) -> Vec<AnnotatedCandle> {
        let spec = IndicatorSpec {
            ma_periods: [3].into_iter().collect(),
            ..Default::default()
        };
        IndicatorCalculator::annotate(candles, &spec, 1.0)
    }

    fn surge_then_follow_candles() -> Vec<Candle> {
        let mut candles: Vec<Candle> =
            (0..10).map(|i| candle(i, 100.0, 100.0, 100.0, 100.0, 10)).collect();
        candles[2] = candle(2, 100.0, 112.0, 100.0, 110.0, 40); // b1 entry (rate 10)
        candles[3] = candle(3, 108.0, 109.0, 104.0, 104.0, 10); // below entry close -> b1 exit
        candles[4] = candle(4, 104.0, 110.0, 104.0, 110.0, 10); // rate 5.8, too weak for b1
        candles[5] = candle(5, 110.0, 118.0, 110.0, 117.0, 130); // b2 entry (rate 6.4, 3x peak vol)
        candles[6] = candle(6, 110.0, 111.0, 100.0, 100.0, 10); // b2 exit
        candles
    }

    fn chain_graph() -> BlockGraph {
        let doc = BlockGraphDoc {
            id: "g1".into(),
            name: "chain".into(),
            nodes: vec![
                node("b1", 1, "rate >= 10", "candle.close < b1.entry_close"),
                node(
                    "b2",
                    2,
                    "rate >= 5 && candle.volume >= b1.peak_volume * 3",
                    "candle.close < b2.entry_close",
                ),
            ],
            edges: vec![EdgeDoc {
                parent: "b1".into(),
                child: "b2".into(),
            }],
            spot_cap: 4,
        };
        BlockGraph::load(&doc).unwrap()
    }

    #[test]
    fn chains_through_parent_edges() {
        let graph = chain_graph();
        let series = annotate(&surge_then_follow_candles());
        let outcome = GraphScanner::new(&graph).scan("T", &series).unwrap();
        let b1: Vec<_> = outcome.detections.iter().filter(|d| d.level == 1).collect();
        let b2: Vec<_> = outcome.detections.iter().filter(|d| d.level == 2).collect();
        assert_eq!(b1.len(), 1);
        assert_eq!(b2.len(), 1);
        assert_eq!(b2[0].parent_id.as_deref(), Some(b1[0].id.as_str()));
        assert_eq!(outcome.completed_count(), 2);
    }

    #[test]
    fn qualifying_day_on_active_node_becomes_spot() {
        let graph = chain_graph();
        let mut candles = surge_then_follow_candles();
        // A second qualifying surge day while b1 is still active.
        candles[3] = candle(3, 110.0, 124.0, 110.0, 122.0, 45);
        candles[4] = candle(4, 110.0, 111.0, 100.0, 100.0, 10); // b1 exit
        candles[5] = candle(5, 100.0, 100.0, 100.0, 100.0, 10);
        let series = annotate(&candles);
        let outcome = GraphScanner::new(&graph).scan("T", &series).unwrap();
        let b1 = outcome.detections.iter().find(|det| det.level == 1).unwrap();
        assert_eq!(b1.spots, vec![d("2024-01-04")]);
    }

    #[test]
    fn discard_policy_keeps_no_spots() {
        struct DiscardAll;
        impl SpotPolicy for DiscardAll {
            fn on_near_miss(&self, _node: &GraphNode, _date: NaiveDate) -> SpotAction {
                SpotAction::Discard
            }
        }
        let graph = chain_graph();
        let mut candles = surge_then_follow_candles();
        candles[3] = candle(3, 110.0, 118.0, 110.0, 116.0, 45);
        candles[4] = candle(4, 110.0, 111.0, 100.0, 100.0, 10);
        let series = annotate(&candles);
        let outcome = GraphScanner::with_policy(&graph, Box::new(DiscardAll))
            .scan("T", &series)
            .unwrap();
        let b1 = outcome.detections.iter().find(|det| det.level == 1).unwrap();
        assert!(b1.spots.is_empty());
    }

    #[test]
    fn coincident_same_parent_entries_mark_virtual() {
        // Two sibling root nodes whose entries fire on the same candle.
        let doc = BlockGraphDoc {
            id: "g2".into(),
            name: "siblings".into(),
            nodes: vec![
                node("weak", 1, "rate >= 5", "candle.close < weak.entry_close"),
                node("strong", 2, "rate >= 10", "candle.close < strong.entry_close"),
            ],
            edges: vec![],
            spot_cap: 4,
        };
        let graph = BlockGraph::load(&doc).unwrap();
        let mut candles: Vec<Candle> =
            (0..4).map(|i| candle(i, 100.0, 100.0, 100.0, 100.0, 10)).collect();
        candles[2] = candle(2, 100.0, 115.0, 100.0, 112.0, 40); // fires both
        let series = annotate(&candles);
        let outcome = GraphScanner::new(&graph).scan("T", &series).unwrap();
        let weak = outcome.detections.iter().find(|det| det.level == 1).unwrap();
        let strong = outcome.detections.iter().find(|det| det.level == 2).unwrap();
        assert!(weak.is_virtual);
        assert!(!strong.is_virtual);
    }

    #[test]
    fn redetection_expressions_drive_events() {
        let doc = BlockGraphDoc {
            id: "g3".into(),
            name: "redetect".into(),
            nodes: vec![NodeDoc {
                id: "b1".into(),
                level: 1,
                entry: "rate >= 5".into(),
                exit: "candle.close < b1.entry_close".into(),
                redetect: Some(crate::graph::schema::RedetectDoc {
                    entry: "candle.close >= b1.peak_price * 0.95 && candle.close <= b1.peak_price * 1.05"
                        .into(),
                    exit: "candle.close < b1.peak_price * 0.9".into(),
                }),
                highlight: None,
            }],
            edges: vec![],
            spot_cap: 4,
        };
        let graph = BlockGraph::load(&doc).unwrap();
        let mut candles: Vec<Candle> =
            (0..10).map(|i| candle(i, 100.0, 100.0, 100.0, 100.0, 10)).collect();
        candles[2] = candle(2, 100.0, 112.0, 100.0, 110.0, 40); // entry, peak 112
        candles[3] = candle(3, 108.0, 109.0, 104.0, 104.0, 10); // exit
        candles[6] = candle(6, 106.0, 110.0, 106.0, 109.0, 20); // echo in band
        candles[7] = candle(7, 100.0, 100.0, 95.0, 95.0, 10); // echo ends
        let series = annotate(&candles);
        let outcome = GraphScanner::new(&graph).scan("T", &series).unwrap();
        assert_eq!(outcome.redetections.len(), 1);
        let event = &outcome.redetections[0];
        assert_eq!(event.started_at, d("2024-01-07"));
        assert_eq!(event.ended_at, Some(d("2024-01-08")));
        assert_eq!(event.status, RedetectionStatus::Completed);
    }
}
