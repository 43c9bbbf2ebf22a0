//! The per-timestamp following graph and leader detection.
//!
//! At every timestamp the detected relations form a directed graph with
//! one vertex per device: an edge `a -> b` weighted with `|lag|` means
//! `a` is following `b`, and a co-leading pair inserts both directions.
//! Groups are the connected components of the undirected projection;
//! the leader of a group is its vertex of maximum PageRank.

use std::collections::HashMap;
use std::io::Write;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::following::{FollowingData, FollowingType};

/// A graph of devices and following relations. Node weights are device
/// names, edge weights are absolute lags.
pub type FollowingGraph = DiGraph<String, f64>;

/// Builds the following graph for `fd` at `timestamp`.
///
/// Every device in `fd.devices` becomes a vertex (vertex index ==
/// device index), whether or not it participates in a relation.
pub fn following_graph_at(fd: &FollowingData, timestamp: i64) -> Result<FollowingGraph> {
    if timestamp < fd.begin_timestamp || timestamp > fd.end_timestamp {
        return Err(Error::Range(format!(
            "timestamp is not in range: {timestamp}"
        )));
    }

    let mut graph = FollowingGraph::new();
    let vertices: Vec<NodeIndex> = fd
        .devices
        .iter()
        .map(|name| graph.add_node(name.clone()))
        .collect();

    let vertex = |device: usize| -> Result<NodeIndex> {
        vertices
            .get(device)
            .copied()
            .ok_or_else(|| Error::Range(format!("vertex for device {device} does not exist")))
    };

    // The records at `timestamp` are the edge list of the graph.
    for pair in &fd.data_at(timestamp).co_moving {
        let left = vertex(pair.left)?;
        let right = vertex(pair.right)?;
        let weight = pair.lag.abs();

        match pair.kind {
            FollowingType::Following => {
                graph.add_edge(left, right, weight);
            }
            FollowingType::Leading => {
                graph.add_edge(right, left, weight);
            }
            FollowingType::CoLeading => {
                graph.add_edge(left, right, weight);
                graph.add_edge(right, left, weight);
            }
        }
    }

    Ok(graph)
}

// ============================================================================
// CONNECTED COMPONENTS
// ============================================================================

/// Connected components of the undirected projection of a graph.
struct GraphComponents {
    count: usize,
    /// Component id per vertex index. Components are numbered by the
    /// first vertex (in index order) that belongs to them.
    membership: Vec<usize>,
}

impl GraphComponents {
    fn new(graph: &FollowingGraph) -> Self {
        let n = graph.node_count();
        let mut sets = UnionFind::<usize>::new(n);
        for edge in graph.edge_references() {
            sets.union(edge.source().index(), edge.target().index());
        }

        let mut ids: HashMap<usize, usize> = HashMap::new();
        let mut membership = Vec::with_capacity(n);
        for vertex in 0..n {
            let root = sets.find(vertex);
            let next_id = ids.len();
            membership.push(*ids.entry(root).or_insert(next_id));
        }

        Self {
            count: ids.len(),
            membership,
        }
    }
}

/// Groups of the graph: one name list per connected component, members
/// in vertex-index order.
pub fn detect_groups(graph: &FollowingGraph) -> Vec<Vec<String>> {
    let components = GraphComponents::new(graph);
    let mut result = vec![Vec::new(); components.count];
    for vertex in graph.node_indices() {
        result[components.membership[vertex.index()]].push(graph[vertex].clone());
    }
    result
}

// ============================================================================
// PAGE RANK
// ============================================================================

const DAMPING_FACTOR: f64 = 0.85;
const CONVERGENCE_ERROR: f64 = 1e-6;
const MAX_ITERATIONS: usize = 500;

/// Computes the PageRank vector of the graph, indexed by vertex index.
///
/// Vertices without outgoing edges ("sinks") distribute their rank
/// evenly over the whole graph. With `use_weights` every edge transfers
/// rank proportionally to its weight; otherwise all edges count equally.
/// Iteration stops once the Euclidean distance between consecutive rank
/// vectors drops to `1e-6`, or after 500 rounds.
pub fn page_rank(graph: &FollowingGraph, use_weights: bool) -> Vec<f64> {
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }
    let size = n as f64;

    let edge_weight = |edge: petgraph::graph::EdgeReference<'_, f64>| {
        if use_weights {
            *edge.weight()
        } else {
            1.0
        }
    };

    let total_out_weight: Vec<f64> = (0..n)
        .map(|v| {
            graph
                .edges_directed(NodeIndex::new(v), Direction::Outgoing)
                .map(edge_weight)
                .sum()
        })
        .collect();
    let sinks: Vec<usize> = (0..n)
        .filter(|&v| {
            graph
                .edges_directed(NodeIndex::new(v), Direction::Outgoing)
                .next()
                .is_none()
        })
        .collect();

    let mut rank = vec![1.0 / size; n];
    let mut next = vec![0.0; n];

    for iteration in 0..MAX_ITERATIONS {
        // Sinks spread their rank evenly; the share is the same for
        // every target vertex.
        let sink_share: f64 = sinks.iter().map(|&s| rank[s]).sum::<f64>() / size;

        for v in 0..n {
            let mut incoming = 0.0;
            for edge in graph.edges_directed(NodeIndex::new(v), Direction::Incoming) {
                let source = edge.source().index();
                if total_out_weight[source] > 0.0 {
                    incoming += rank[source] * edge_weight(edge) / total_out_weight[source];
                }
            }
            next[v] = (1.0 - DAMPING_FACTOR) / size + DAMPING_FACTOR * (incoming + sink_share);
        }

        let error: f64 = rank
            .iter()
            .zip(&next)
            .map(|(a, b)| {
                let diff = a - b;
                diff * diff
            })
            .sum::<f64>()
            .sqrt();
        std::mem::swap(&mut rank, &mut next);

        if error <= CONVERGENCE_ERROR {
            debug!(iteration, "page rank converged");
            break;
        }
    }

    rank
}

// ============================================================================
// LEADER DETECTION
// ============================================================================

/// Detects the leaders of the graph: runs PageRank over the whole graph
/// and picks, per connected component, the vertex with the maximum rank.
/// On equal ranks the later vertex (in index order) wins.
pub fn detect_leaders(graph: &FollowingGraph, use_weights: bool) -> Vec<String> {
    let ranks = page_rank(graph, use_weights);
    let components = GraphComponents::new(graph);

    let mut leaders = Vec::with_capacity(components.count);
    for component in 0..components.count {
        let mut max_rank = 0.0;
        let mut max_vertex = 0;
        for vertex in 0..graph.node_count() {
            if components.membership[vertex] == component && ranks[vertex] >= max_rank {
                max_rank = ranks[vertex];
                max_vertex = vertex;
            }
        }
        // Every component has at least one vertex.
        leaders.push(graph[NodeIndex::new(max_vertex)].clone());
    }
    leaders
}

/// The detected leaders of a single timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaderTimestamp {
    pub timestamp: i64,
    pub leaders: Vec<String>,
}

/// The list of leaders for every timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaderData {
    pub begin_timestamp: i64,
    /// Inclusive.
    pub end_timestamp: i64,
    pub duration: i64,
    pub devices: Vec<String>,
    pub timestamps: Vec<LeaderTimestamp>,
}

impl LeaderData {
    pub fn data_at(&self, timestamp: i64) -> &LeaderTimestamp {
        assert!(
            timestamp >= self.begin_timestamp && timestamp <= self.end_timestamp,
            "timestamp in range"
        );
        &self.timestamps[(timestamp - self.begin_timestamp) as usize]
    }

    pub fn validate(&self) -> Result<()> {
        if self.duration != self.end_timestamp - self.begin_timestamp + 1
            || self.timestamps.len() != self.duration as usize
        {
            return Err(Error::Range(format!(
                "leader data duration {} does not match range [{}, {}]",
                self.duration, self.begin_timestamp, self.end_timestamp
            )));
        }
        Ok(())
    }
}

/// Detects leaders for every timestamp of the following data.
pub fn detect_leaders_over_time(fd: &FollowingData, use_weights: bool) -> Result<LeaderData> {
    let mut result = LeaderData {
        begin_timestamp: fd.begin_timestamp,
        end_timestamp: fd.end_timestamp,
        duration: fd.duration,
        devices: fd.devices.clone(),
        timestamps: Vec::with_capacity(fd.duration as usize),
    };

    for ts in fd.begin_timestamp..=fd.end_timestamp {
        let graph = following_graph_at(fd, ts)?;
        result.timestamps.push(LeaderTimestamp {
            timestamp: ts,
            leaders: detect_leaders(&graph, use_weights),
        });
    }
    Ok(result)
}

// ============================================================================
// GRAPH SERIALIZATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedVertex {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEdge {
    pub source: String,
    pub target: String,
    pub weight: f64,
}

/// A name-based representation of a following graph, independent of
/// vertex indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SerializedGraph {
    pub vertices: Vec<SerializedVertex>,
    pub edges: Vec<SerializedEdge>,
}

pub fn serialize_graph(graph: &FollowingGraph) -> SerializedGraph {
    SerializedGraph {
        vertices: graph
            .node_indices()
            .map(|v| SerializedVertex {
                id: graph[v].clone(),
            })
            .collect(),
        edges: graph
            .edge_references()
            .map(|edge| SerializedEdge {
                source: graph[edge.source()].clone(),
                target: graph[edge.target()].clone(),
                weight: *edge.weight(),
            })
            .collect(),
    }
}

/// Rebuilds a graph from its serialized form.
///
/// Every edge endpoint must appear in the vertex list, otherwise the
/// graph invariant is violated.
pub fn deserialize_graph(serialized: &SerializedGraph) -> Result<FollowingGraph> {
    let mut graph = FollowingGraph::new();
    let mut by_name: HashMap<&str, NodeIndex> = HashMap::new();
    for vertex in &serialized.vertices {
        let index = graph.add_node(vertex.id.clone());
        by_name.insert(vertex.id.as_str(), index);
    }

    for edge in &serialized.edges {
        let lookup = |name: &str| {
            by_name.get(name).copied().ok_or_else(|| {
                Error::GraphInvariant(format!("serialized graph misses vertex: {name}"))
            })
        };
        let source = lookup(&edge.source)?;
        let target = lookup(&edge.target)?;
        graph.add_edge(source, target, edge.weight);
    }
    Ok(graph)
}

// ============================================================================
// GRAPHML
// ============================================================================

/// Writes the graph in GraphML format with a `weight` edge attribute.
pub fn to_graphml(graph: &FollowingGraph, out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(
        out,
        r#"<graphml xmlns="http://graphml.graphdrawing.org/xmlns">"#
    )?;
    writeln!(
        out,
        r#"  <key id="weight" for="edge" attr.name="weight" attr.type="double"/>"#
    )?;
    writeln!(out, r#"  <graph id="G" edgedefault="directed">"#)?;

    for vertex in graph.node_indices() {
        writeln!(out, r#"    <node id="{}"/>"#, escape_xml(&graph[vertex]))?;
    }
    for edge in graph.edge_references() {
        writeln!(
            out,
            r#"    <edge source="{}" target="{}">"#,
            escape_xml(&graph[edge.source()]),
            escape_xml(&graph[edge.target()]),
        )?;
        writeln!(out, r#"      <data key="weight">{}</data>"#, edge.weight())?;
        writeln!(out, r#"    </edge>"#)?;
    }

    writeln!(out, r#"  </graph>"#)?;
    writeln!(out, r#"</graphml>"#)
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
