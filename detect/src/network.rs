//! Network-centrality detector.
//!
//! Relationship records (department → vendor, payer → payee, ...) form a
//! multigraph. Shell-company schemes concentrate flows on a few counterparties,
//! which shows up as nodes with outsized centrality. Any node whose
//! centrality exceeds the configured threshold is a hub and the batch FAILs.
//!
//! The edge-weight entropy is reported alongside: a low normalized entropy
//! means a few relationships carry most of the value.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use evidentia_kernel::finding::{
    DetectorKind, Finding, FindingDetail, HubNode, NetworkPayload, Verdict,
};
use evidentia_kernel::proof::dual_hash::{DualHash, Record, RecordBatch};

use crate::stats::shannon_entropy_bits;
use crate::suite::Detector;

/// Centrality measure used for hub detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CentralityMeasure {
    /// Share of all edge endpoints incident to the node: `degree / (2·|E|)`.
    #[default]
    DegreeShare,
    /// Distinct neighbours over `n − 1`.
    Degree,
    /// Brandes betweenness on the undirected simple graph, normalized by
    /// `(n − 1)(n − 2)`.
    Betweenness,
}

impl CentralityMeasure {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DegreeShare => "degree_share",
            Self::Degree => "degree",
            Self::Betweenness => "betweenness",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// A node whose centrality exceeds this is a hub.
    pub centrality_threshold: f64,
    /// Graphs with fewer edges yield `InsufficientData`.
    pub min_edges: u64,
    pub source_field: String,
    pub target_field: String,
    /// Edge weight field; unweighted edges count 1.0.
    pub weight_field: Option<String>,
    pub measure: CentralityMeasure,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            centrality_threshold: 0.3,
            min_edges: 20,
            source_field: "department".to_string(),
            target_field: "vendor".to_string(),
            weight_field: Some("amount".to_string()),
            measure: CentralityMeasure::DegreeShare,
        }
    }
}

/// Aggregate of every parallel edge between one ordered node pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeStats {
    pub count: u64,
    pub weight: f64,
}

/// Directed multigraph, aggregated per ordered node pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    edges: BTreeMap<(String, String), EdgeStats>,
    nodes: BTreeSet<String>,
    total_edges: u64,
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from relationship records. Records missing either endpoint are
    /// skipped. Non-positive or non-numeric weights count as 1.0.
    #[must_use]
    pub fn from_records(records: &[Record], config: &NetworkConfig) -> Self {
        let mut graph = Self::new();
        for record in records {
            let source = record.get(&config.source_field).and_then(|v| v.as_text());
            let target = record.get(&config.target_field).and_then(|v| v.as_text());
            let (Some(source), Some(target)) = (source, target) else {
                continue;
            };
            let weight = config
                .weight_field
                .as_ref()
                .and_then(|f| record.get(f))
                .and_then(|v| v.as_f64())
                .map(f64::abs)
                .filter(|w| *w > 0.0)
                .unwrap_or(1.0);
            graph.add_edge(&source, &target, weight);
        }
        graph
    }

    pub fn add_edge(&mut self, source: &str, target: &str, weight: f64) {
        self.nodes.insert(source.to_string());
        self.nodes.insert(target.to_string());
        let stats = self
            .edges
            .entry((source.to_string(), target.to_string()))
            .or_insert(EdgeStats {
                count: 0,
                weight: 0.0,
            });
        stats.count += 1;
        stats.weight += weight;
        self.total_edges += 1;
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total edges including parallel ones.
    #[must_use]
    pub fn edge_count(&self) -> u64 {
        self.total_edges
    }

    /// Distinct ordered node pairs.
    #[must_use]
    pub fn distinct_edge_count(&self) -> usize {
        self.edges.len()
    }

    fn undirected_neighbours(&self) -> BTreeMap<&str, BTreeSet<&str>> {
        let mut adj: BTreeMap<&str, BTreeSet<&str>> =
            self.nodes.iter().map(|n| (n.as_str(), BTreeSet::new())).collect();
        for (s, t) in self.edges.keys() {
            if s == t {
                continue;
            }
            adj.entry(s.as_str()).or_default().insert(t.as_str());
            adj.entry(t.as_str()).or_default().insert(s.as_str());
        }
        adj
    }

    /// Centrality of every node under `measure`.
    #[must_use]
    pub fn centrality(&self, measure: CentralityMeasure) -> BTreeMap<String, f64> {
        match measure {
            CentralityMeasure::DegreeShare => self.degree_share(),
            CentralityMeasure::Degree => self.degree_centrality(),
            CentralityMeasure::Betweenness => self.betweenness(),
        }
    }

    fn degree_share(&self) -> BTreeMap<String, f64> {
        let mut degree: BTreeMap<&str, u64> =
            self.nodes.iter().map(|n| (n.as_str(), 0)).collect();
        for ((s, t), stats) in &self.edges {
            *degree.entry(s.as_str()).or_default() += stats.count;
            *degree.entry(t.as_str()).or_default() += stats.count;
        }
        #[allow(clippy::cast_precision_loss)]
        let endpoints = (2 * self.total_edges) as f64;
        degree
            .into_iter()
            .map(|(n, d)| {
                #[allow(clippy::cast_precision_loss)]
                let share = if endpoints > 0.0 { d as f64 / endpoints } else { 0.0 };
                (n.to_string(), share)
            })
            .collect()
    }

    fn degree_centrality(&self) -> BTreeMap<String, f64> {
        let n = self.nodes.len();
        self.undirected_neighbours()
            .into_iter()
            .map(|(node, neighbours)| {
                #[allow(clippy::cast_precision_loss)]
                let c = if n > 1 {
                    neighbours.len() as f64 / (n - 1) as f64
                } else {
                    0.0
                };
                (node.to_string(), c)
            })
            .collect()
    }

    /// Brandes' algorithm over unweighted undirected shortest paths.
    fn betweenness(&self) -> BTreeMap<String, f64> {
        let adj = self.undirected_neighbours();
        let names: Vec<&str> = adj.keys().copied().collect();
        let index: BTreeMap<&str, usize> =
            names.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        let neighbours: Vec<Vec<usize>> = names
            .iter()
            .map(|n| adj[n].iter().map(|m| index[m]).collect())
            .collect();
        let n = names.len();
        let mut score = vec![0.0_f64; n];

        for s in 0..n {
            let mut stack = Vec::with_capacity(n);
            let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
            let mut sigma = vec![0.0_f64; n];
            let mut dist: Vec<Option<usize>> = vec![None; n];
            sigma[s] = 1.0;
            dist[s] = Some(0);
            let mut queue = VecDeque::from([s]);
            while let Some(v) = queue.pop_front() {
                stack.push(v);
                let dv = dist[v].unwrap_or(0);
                for &w in &neighbours[v] {
                    if dist[w].is_none() {
                        dist[w] = Some(dv + 1);
                        queue.push_back(w);
                    }
                    if dist[w] == Some(dv + 1) {
                        sigma[w] += sigma[v];
                        preds[w].push(v);
                    }
                }
            }
            let mut delta = vec![0.0_f64; n];
            while let Some(w) = stack.pop() {
                for &v in &preds[w] {
                    delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
                }
                if w != s {
                    score[w] += delta[w];
                }
            }
        }

        // Each unordered pair was counted from both ends.
        #[allow(clippy::cast_precision_loss)]
        let scale = if n > 2 {
            1.0 / ((n - 1) as f64 * (n - 2) as f64)
        } else {
            0.0
        };
        names
            .iter()
            .zip(score)
            .map(|(name, raw)| ((*name).to_string(), raw * scale))
            .collect()
    }

    /// Shannon entropy (bits) of the aggregated edge weights, and that entropy
    /// normalized by `log2(distinct edges)`.
    #[must_use]
    pub fn edge_weight_entropy(&self) -> (Option<f64>, Option<f64>) {
        let weights: Vec<f64> = self.edges.values().map(|e| e.weight).collect();
        let entropy = shannon_entropy_bits(weights.iter().copied());
        #[allow(clippy::cast_precision_loss)]
        let max = (weights.len() as f64).log2();
        let normalized = entropy
            .filter(|_| weights.len() > 1)
            .map(|h| (h / max).clamp(0.0, 1.0));
        (entropy, normalized)
    }

    /// Every simple directed path from `from` to `to` of at most `max_depth`
    /// edges, in lexicographic order. Empty when `from == to`.
    #[must_use]
    pub fn trace_money_flow(&self, from: &str, to: &str, max_depth: usize) -> Vec<Vec<String>> {
        let mut out: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (s, t) in self.edges.keys() {
            out.entry(s.as_str()).or_default().insert(t.as_str());
        }
        let mut paths = Vec::new();
        if from == to || !self.nodes.contains(from) || !self.nodes.contains(to) {
            return paths;
        }
        let mut path = vec![from];
        walk(&out, to, max_depth, &mut path, &mut paths);
        paths
    }
}

fn walk<'a>(
    out: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    target: &str,
    max_depth: usize,
    path: &mut Vec<&'a str>,
    found: &mut Vec<Vec<String>>,
) {
    let Some(current) = path.last().copied() else {
        return;
    };
    if current == target && path.len() > 1 {
        found.push(path.iter().map(|s| (*s).to_string()).collect());
        return;
    }
    if path.len() > max_depth {
        return;
    }
    let Some(next) = out.get(current) else {
        return;
    };
    for n in next {
        if path.contains(n) {
            continue;
        }
        path.push(n);
        walk(out, target, max_depth, path, found);
        path.pop();
    }
}

/// Nodes whose centrality exceeds `threshold`, most central first.
#[must_use]
pub fn hubs(centrality: &BTreeMap<String, f64>, threshold: f64) -> Vec<HubNode> {
    let mut hubs: Vec<HubNode> = centrality
        .iter()
        .filter(|(_, c)| **c > threshold)
        .map(|(node, c)| HubNode {
            node: node.clone(),
            centrality: *c,
        })
        .collect();
    hubs.sort_by(|a, b| {
        b.centrality
            .total_cmp(&a.centrality)
            .then_with(|| a.node.cmp(&b.node))
    });
    hubs
}

// --- Detector ---

#[derive(Debug, Clone, Default)]
pub struct NetworkDetector {
    config: NetworkConfig,
}

impl NetworkDetector {
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    #[must_use]
    pub fn score(&self, batch_id: &str, evidence: &DualHash, graph: &Graph) -> NetworkPayload {
        let (graph_entropy, normalized_entropy) = graph.edge_weight_entropy();
        let mut payload = NetworkPayload {
            batch_id: batch_id.to_string(),
            evidence: evidence.clone(),
            measure: self.config.measure.as_str().to_string(),
            node_count: graph.node_count() as u64,
            edge_count: graph.edge_count(),
            graph_entropy,
            normalized_entropy,
            max_centrality: None,
            hubs: Vec::new(),
            threshold: self.config.centrality_threshold,
            pass_fail: Verdict::InsufficientData,
        };
        if graph.edge_count() < self.config.min_edges {
            return payload;
        }
        let centrality = graph.centrality(self.config.measure);
        payload.max_centrality = centrality.values().copied().reduce(f64::max);
        payload.hubs = hubs(&centrality, self.config.centrality_threshold);
        payload.pass_fail = if payload.hubs.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Fail
        };
        payload
    }
}

impl Detector for NetworkDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Network
    }

    fn analyze(&self, batch: &RecordBatch, evidence: &DualHash) -> Finding {
        let graph = Graph::from_records(&batch.records, &self.config);
        let payload = self.score(&batch.batch_id, evidence, &graph);
        tracing::debug!(
            batch_id = %batch.batch_id,
            edges = payload.edge_count,
            hubs = payload.hubs.len(),
            verdict = ?payload.pass_fail,
            "network scored"
        );
        Finding::new(FindingDetail::Network(payload))
    }
}
