// src/graph/schema.rs
//! Declarative block-graph documents and their compiled form. The document
//! is what gets persisted/imported (expression strings, edges, highlight
//! metadata); `BlockGraph::load` parses every expression once, validates all
//! block/field references, and topologically orders the nodes. Anything
//! malformed fails here, before a single candle is scanned.

use crate::error::ScanError;
use crate::graph::expr::Expr;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Default cap on the per-detection spot list for graph scans.
fn default_spot_cap() -> usize {
    crate::blocks::detection::SPOT_CAP
}

/// Marks which node's block is the notable one in an exported pattern.
/// Annotation only: it has no effect on detection logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub kind: String,
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

/// Redetection sub-expressions for one node. Band and window constraints are
/// expressed in the expressions themselves (via block field access and
/// `candles_between`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedetectDoc {
    pub entry: String,
    pub exit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDoc {
    pub id: String,
    pub level: u32,
    pub entry: String,
    pub exit: String,
    #[serde(default)]
    pub redetect: Option<RedetectDoc>,
    #[serde(default)]
    pub highlight: Option<Highlight>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDoc {
    pub parent: String,
    pub child: String,
}

/// The persistable node/edge document for the graph variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockGraphDoc {
    pub id: String,
    pub name: String,
    pub nodes: Vec<NodeDoc>,
    #[serde(default)]
    pub edges: Vec<EdgeDoc>,
    #[serde(default = "default_spot_cap")]
    pub spot_cap: usize,
}

/// A compiled node: expressions parsed, parents resolved to indices.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub level: u32,
    pub entry: Expr,
    pub exit: Expr,
    pub redetect: Option<(Expr, Expr)>,
    pub highlight: Option<Highlight>,
    /// Indices into `BlockGraph::nodes`.
    pub parents: Vec<usize>,
}

/// A validated, evaluation-ready block graph. `nodes` is in topological
/// order (parents before children).
#[derive(Debug, Clone)]
pub struct BlockGraph {
    pub id: String,
    pub name: String,
    pub nodes: Vec<GraphNode>,
    pub spot_cap: usize,
}

impl BlockGraph {
    pub fn load(doc: &BlockGraphDoc) -> Result<Self, ScanError> {
        if doc.nodes.is_empty() {
            return Err(ScanError::configuration(&doc.name, "graph has no nodes"));
        }
        let ids: HashSet<String> = doc.nodes.iter().map(|n| n.id.clone()).collect();
        if ids.len() != doc.nodes.len() {
            return Err(ScanError::configuration(&doc.name, "duplicate node ids"));
        }

        let index_of: HashMap<&str, usize> = doc
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); doc.nodes.len()];
        for edge in &doc.edges {
            let (Some(&p), Some(&c)) = (
                index_of.get(edge.parent.as_str()),
                index_of.get(edge.child.as_str()),
            ) else {
                return Err(ScanError::configuration(
                    &doc.name,
                    format!("edge references unknown node '{}' -> '{}'", edge.parent, edge.child),
                ));
            };
            parents[c].push(p);
        }

        let order = topo_order(&parents).ok_or_else(|| {
            ScanError::configuration(&doc.name, "parent edges must form a DAG")
        })?;

        let mut nodes = Vec::with_capacity(doc.nodes.len());
        let mut new_index: HashMap<usize, usize> = HashMap::new();
        for &old in &order {
            let nd = &doc.nodes[old];
            let entry =
                Expr::parse_predicate(&format!("{}.entry", nd.id), &nd.entry, &ids)?;
            let exit = Expr::parse_predicate(&format!("{}.exit", nd.id), &nd.exit, &ids)?;
            let redetect = match &nd.redetect {
                Some(r) => Some((
                    Expr::parse_predicate(&format!("{}.redetect.entry", nd.id), &r.entry, &ids)?,
                    Expr::parse_predicate(&format!("{}.redetect.exit", nd.id), &r.exit, &ids)?,
                )),
                None => None,
            };
            new_index.insert(old, nodes.len());
            nodes.push(GraphNode {
                id: nd.id.clone(),
                level: nd.level,
                entry,
                exit,
                redetect,
                highlight: nd.highlight.clone(),
                parents: parents[old].iter().map(|p| new_index[p]).collect(),
            });
        }

        Ok(Self {
            id: doc.id.clone(),
            name: doc.name.clone(),
            nodes,
            spot_cap: doc.spot_cap,
        })
    }

    /// Every MA period and high-flag window the graph's expressions read.
    pub fn indicator_spec(&self) -> crate::indicators::IndicatorSpec {
        let mut spec = crate::indicators::IndicatorSpec::default();
        for node in &self.nodes {
            node.entry.collect_spec(&mut spec);
            node.exit.collect_spec(&mut spec);
            if let Some((entry, exit)) = &node.redetect {
                entry.collect_spec(&mut spec);
                exit.collect_spec(&mut spec);
            }
        }
        spec
    }

    /// Id of the enabled highlight node with the highest priority, if any.
    pub fn highlighted_node(&self) -> Option<&GraphNode> {
        self.nodes
            .iter()
            .filter(|n| n.highlight.as_ref().is_some_and(|h| h.enabled))
            .max_by_key(|n| n.highlight.as_ref().map(|h| h.priority))
    }
}

/// Kahn's algorithm over the parent lists. None on a cycle.
fn topo_order(parents: &[Vec<usize>]) -> Option<Vec<usize>> {
    let n = parents.len();
    let mut remaining: Vec<usize> = parents.iter().map(|p| p.len()).collect();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (child, ps) in parents.iter().enumerate() {
        for &p in ps {
            children[p].push(child);
        }
    }
    let mut queue: Vec<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = queue.pop() {
        order.push(i);
        for &c in &children[i] {
            remaining[c] -= 1;
            if remaining[c] == 0 {
                queue.push(c);
            }
        }
    }
    (order.len() == n).then_some(order)
}
