//! Call graph: a name-keyed node arena plus validated call edges

use crate::cluster::{ClusterConfig, ClusterResult, cluster_graph};
use crate::error::GraphError;
use crate::model::{Edge, Node};
use petgraph::graph::DiGraph;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

/// The call graph of one analysed codebase.
///
/// Nodes live in an arena keyed by fully-qualified name and edges refer to
/// nodes by that name. Both endpoints of an edge must exist when it is added,
/// so an edge never dangles. The first clustering computed on an instance is
/// cached for its lifetime.
#[derive(Clone, Default)]
pub struct CallGraph {
    nodes: BTreeMap<String, Node>,
    edges: Vec<Edge>,
    edge_set: HashSet<(String, String)>,
    clusters: OnceLock<ClusterResult>,
}

impl std::fmt::Debug for CallGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallGraph")
            .field("node_count", &self.nodes.len())
            .field("edge_count", &self.edges.len())
            .field("clustered", &self.clusters.get().is_some())
            .finish()
    }
}

impl CallGraph {
    pub fn new() -> Self {
        CallGraph::default()
    }

    /// Build a graph from a node list and an edge list, rejecting the first
    /// edge with an unknown endpoint.
    pub fn from_parts(
        nodes: impl IntoIterator<Item = Node>,
        edges: impl IntoIterator<Item = Edge>,
    ) -> Result<Self, GraphError> {
        let mut graph = CallGraph::new();
        for node in nodes {
            graph.add_node(node);
        }
        for edge in edges {
            graph.add_edge(&edge.source, &edge.target)?;
        }
        Ok(graph)
    }

    /// Add a node. Returns `false` (and keeps the existing attributes) when a
    /// node with the same name is already present.
    pub fn add_node(&mut self, mut node: Node) -> bool {
        if self.nodes.contains_key(&node.name) {
            return false;
        }
        node.callees.clear();
        self.nodes.insert(node.name.clone(), node);
        true
    }

    /// Add a call edge between two existing nodes.
    ///
    /// Returns `Ok(false)` when the ordered pair is already present.
    pub fn add_edge(&mut self, source: &str, target: &str) -> Result<bool, GraphError> {
        for endpoint in [source, target] {
            if !self.nodes.contains_key(endpoint) {
                return Err(GraphError::UnknownEndpoint {
                    caller: source.to_string(),
                    callee: target.to_string(),
                    missing: endpoint.to_string(),
                });
            }
        }

        let key = (source.to_string(), target.to_string());
        if self.edge_set.contains(&key) {
            return Ok(false);
        }

        if let Some(caller) = self.nodes.get_mut(source) {
            caller.callees.insert(target.to_string());
        }
        self.edges.push(Edge::new(source, target));
        self.edge_set.insert(key);
        Ok(true)
    }

    /// Add every call whose endpoints both exist, skipping the rest.
    /// Returns how many were skipped.
    pub fn extend_edges<'a>(&mut self, calls: impl IntoIterator<Item = &'a Edge>) -> usize {
        let mut skipped = 0;
        for call in calls {
            if self.add_edge(&call.source, &call.target).is_err() {
                skipped += 1;
            }
        }
        skipped
    }

    /// Get a node by name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.edge_set
            .contains(&(source.to_string(), target.to_string()))
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over all nodes in name order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Node names in name order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// All nodes defined in a file.
    pub fn nodes_in_file<'a>(&'a self, file: &'a Path) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.values().filter(move |n| n.file_path == file)
    }

    /// A new graph holding only the nodes accepted by `keep`, plus every edge
    /// whose endpoints both survive.
    pub fn filtered(&self, keep: impl Fn(&Node) -> bool) -> CallGraph {
        let mut graph = CallGraph::new();
        for node in self.nodes.values().filter(|n| keep(n)) {
            graph.add_node(node.clone());
        }
        for edge in &self.edges {
            if graph.contains(&edge.source) && graph.contains(&edge.target) {
                // Both endpoints were just checked.
                let _ = graph.add_edge(&edge.source, &edge.target);
            }
        }
        graph
    }

    /// Drop every node rejected by `keep` together with its edges. Any
    /// cached clustering is discarded.
    pub fn retain_nodes(&mut self, keep: impl Fn(&Node) -> bool) {
        *self = self.filtered(keep);
    }

    /// Directed petgraph view. Node index `i` is the `i`-th name in name
    /// order, so the view is identical for equal graphs.
    pub fn to_digraph(&self) -> DiGraph<&str, ()> {
        let mut digraph = DiGraph::with_capacity(self.nodes.len(), self.edges.len());
        let mut index = BTreeMap::new();
        for name in self.nodes.keys() {
            index.insert(name.as_str(), digraph.add_node(name.as_str()));
        }
        for edge in &self.edges {
            if let (Some(&a), Some(&b)) = (
                index.get(edge.source.as_str()),
                index.get(edge.target.as_str()),
            ) {
                digraph.add_edge(a, b, ());
            }
        }
        digraph
    }

    /// Cluster the graph into roughly `target` components of at least
    /// `min_size` nodes, with the default seed.
    ///
    /// The first result is cached: later calls on the same instance return
    /// it unchanged, whatever their arguments. Build a new graph to recompute.
    pub fn cluster(&self, target: usize, min_size: usize) -> &ClusterResult {
        self.cluster_with(&ClusterConfig {
            target_clusters: target,
            min_cluster_size: min_size,
            ..ClusterConfig::default()
        })
    }

    /// Same as [`CallGraph::cluster`] with full control over the settings.
    pub fn cluster_with(&self, config: &ClusterConfig) -> &ClusterResult {
        self.clusters.get_or_init(|| cluster_graph(self, config))
    }

    /// The cached clustering, if one was computed.
    pub fn cached_clusters(&self) -> Option<&ClusterResult> {
        self.clusters.get()
    }
}
