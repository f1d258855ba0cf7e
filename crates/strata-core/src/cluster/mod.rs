//! Call-graph clustering.
//!
//! Clustering runs an ordered list of strategies and keeps the first result
//! that passes the [`QualityRubric`]:
//!
//! 1. community detection, picked by graph size (greedy modularity and
//!    Louvain on small graphs, label propagation only on very large ones)
//! 2. structural fallback on class-level, then module-level name prefixes
//! 3. balanced fallback that forces size compliance
//! 4. connected components, accepted unconditionally
//!
//! Cluster ids are assigned by descending cluster size starting at 1, so two
//! runs over the same graph produce the same ids.

mod abstraction;
mod community;
mod fallback;
mod quality;
mod weighted;

pub use abstraction::qualified_prefix;
pub use quality::{QualityRejection, QualityRubric};

use crate::graph::CallGraph;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use weighted::WeightedGraph;

/// Graphs up to this size try the slow, high-quality algorithms first.
const SMALL_GRAPH_NODES: usize = 500;
/// Graphs above this size only use label propagation.
const LARGE_GRAPH_NODES: usize = 5_000;

/// Settings for one clustering run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub target_clusters: usize,
    pub min_cluster_size: usize,
    pub seed: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            target_clusters: 20,
            min_cluster_size: 2,
            seed: 42,
        }
    }
}

/// The strategy that produced a [`ClusterResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStrategy {
    GreedyModularity,
    Louvain,
    LabelPropagation,
    ClassPrefix,
    ModulePrefix,
    Balanced,
    ConnectedComponents,
    /// Every strategy came up empty.
    Exhausted,
}

impl ClusterStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStrategy::GreedyModularity => "greedy_modularity",
            ClusterStrategy::Louvain => "louvain",
            ClusterStrategy::LabelPropagation => "label_propagation",
            ClusterStrategy::ClassPrefix => "class_prefix",
            ClusterStrategy::ModulePrefix => "module_prefix",
            ClusterStrategy::Balanced => "balanced",
            ClusterStrategy::ConnectedComponents => "connected_components",
            ClusterStrategy::Exhausted => "exhausted",
        }
    }

    /// Whether a non-empty result of this strategy is taken without
    /// consulting the rubric.
    pub fn is_last_resort(&self) -> bool {
        matches!(self, ClusterStrategy::ConnectedComponents)
    }

    /// Strategies to try, in order, for a graph of `node_count` nodes.
    pub fn plan(node_count: usize) -> Vec<ClusterStrategy> {
        let mut plan = if node_count <= SMALL_GRAPH_NODES {
            vec![
                ClusterStrategy::GreedyModularity,
                ClusterStrategy::Louvain,
                ClusterStrategy::LabelPropagation,
            ]
        } else if node_count <= LARGE_GRAPH_NODES {
            vec![ClusterStrategy::Louvain, ClusterStrategy::LabelPropagation]
        } else {
            vec![ClusterStrategy::LabelPropagation]
        };
        plan.extend([
            ClusterStrategy::ClassPrefix,
            ClusterStrategy::ModulePrefix,
            ClusterStrategy::Balanced,
            ClusterStrategy::ConnectedComponents,
        ]);
        plan
    }
}

impl std::fmt::Display for ClusterStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of one clustering computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterResult {
    clusters: BTreeMap<usize, BTreeSet<String>>,
    file_to_clusters: BTreeMap<PathBuf, BTreeSet<usize>>,
    cluster_to_files: BTreeMap<usize, BTreeSet<PathBuf>>,
    strategy: ClusterStrategy,
}

impl ClusterResult {
    /// The result of a run in which no strategy produced a cluster.
    pub fn exhausted() -> Self {
        ClusterResult {
            clusters: BTreeMap::new(),
            file_to_clusters: BTreeMap::new(),
            cluster_to_files: BTreeMap::new(),
            strategy: ClusterStrategy::Exhausted,
        }
    }

    /// Number communities of at least `min_size` members from 1, largest
    /// first (ties: smallest member name first), and derive the file maps
    /// from the nodes of `graph`.
    pub fn from_communities(
        communities: Vec<BTreeSet<String>>,
        min_size: usize,
        strategy: ClusterStrategy,
        graph: &CallGraph,
    ) -> Self {
        let mut qualifying: Vec<BTreeSet<String>> = communities
            .into_iter()
            .filter(|c| c.len() >= min_size.max(1))
            .collect();
        qualifying.sort_by(|a, b| {
            b.len()
                .cmp(&a.len())
                .then_with(|| a.first().cmp(&b.first()))
        });

        let clusters = qualifying
            .into_iter()
            .enumerate()
            .map(|(i, members)| (i + 1, members))
            .collect();
        Self::with_ids(clusters, strategy, |name| {
            graph.node(name).map(|n| n.file_path.clone())
        })
    }

    /// Build a result from already-numbered clusters. `file_of` resolves a
    /// member name to its file; members it cannot resolve are left out of the
    /// file maps.
    pub fn with_ids(
        clusters: BTreeMap<usize, BTreeSet<String>>,
        strategy: ClusterStrategy,
        file_of: impl Fn(&str) -> Option<PathBuf>,
    ) -> Self {
        let mut file_to_clusters: BTreeMap<PathBuf, BTreeSet<usize>> = BTreeMap::new();
        let mut cluster_to_files: BTreeMap<usize, BTreeSet<PathBuf>> = BTreeMap::new();
        for (&id, members) in &clusters {
            let files = cluster_to_files.entry(id).or_default();
            for file in members.iter().filter_map(|m| file_of(m.as_str())) {
                file_to_clusters.entry(file.clone()).or_default().insert(id);
                files.insert(file);
            }
        }
        ClusterResult {
            clusters,
            file_to_clusters,
            cluster_to_files,
            strategy,
        }
    }

    pub fn clusters(&self) -> &BTreeMap<usize, BTreeSet<String>> {
        &self.clusters
    }

    pub fn members(&self, id: usize) -> Option<&BTreeSet<String>> {
        self.clusters.get(&id)
    }

    pub fn cluster_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.clusters.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn strategy(&self) -> ClusterStrategy {
        self.strategy
    }

    /// Files touched by a cluster.
    pub fn files_of(&self, id: usize) -> Option<&BTreeSet<PathBuf>> {
        self.cluster_to_files.get(&id)
    }

    /// Clusters with at least one member in `file`.
    pub fn clusters_of_file(&self, file: &Path) -> Option<&BTreeSet<usize>> {
        self.file_to_clusters.get(file)
    }

    pub fn file_to_clusters(&self) -> &BTreeMap<PathBuf, BTreeSet<usize>> {
        &self.file_to_clusters
    }

    pub fn cluster_to_files(&self) -> &BTreeMap<usize, BTreeSet<PathBuf>> {
        &self.cluster_to_files
    }

    /// Cluster id of every clustered node.
    pub fn assignments(&self) -> BTreeMap<&str, usize> {
        self.clusters
            .iter()
            .flat_map(|(&id, members)| members.iter().map(move |m| (m.as_str(), id)))
            .collect()
    }

    /// Number of nodes that belong to some cluster.
    pub fn clustered_node_count(&self) -> usize {
        self.clusters.values().map(BTreeSet::len).sum()
    }
}

/// Everything the strategies need, computed once per run.
struct ClusterContext<'a> {
    graph: &'a CallGraph,
    names: Vec<String>,
    weighted: WeightedGraph,
    config: &'a ClusterConfig,
}

impl<'a> ClusterContext<'a> {
    fn new(graph: &'a CallGraph, config: &'a ClusterConfig) -> Self {
        ClusterContext {
            graph,
            names: graph.node_names().map(str::to_string).collect(),
            weighted: WeightedGraph::from_digraph(&graph.to_digraph()),
            config,
        }
    }

    fn run(&self, strategy: ClusterStrategy) -> Vec<Vec<usize>> {
        let seed = self.config.seed;
        let target = self.config.target_clusters;
        let min_size = self.config.min_cluster_size;
        match strategy {
            ClusterStrategy::GreedyModularity => community::greedy_modularity(&self.weighted),
            ClusterStrategy::Louvain => community::louvain(&self.weighted, seed),
            ClusterStrategy::LabelPropagation => {
                community::label_propagation(&self.weighted, seed)
            }
            ClusterStrategy::ClassPrefix => {
                fallback::structural(&self.names, &self.weighted, 1, seed)
            }
            ClusterStrategy::ModulePrefix => {
                fallback::structural(&self.names, &self.weighted, 2, seed)
            }
            ClusterStrategy::Balanced => {
                fallback::balanced(&self.weighted, target, min_size, seed)
            }
            ClusterStrategy::ConnectedComponents => {
                fallback::components(&self.weighted, target, min_size)
            }
            ClusterStrategy::Exhausted => Vec::new(),
        }
    }

    fn to_names(&self, communities: Vec<Vec<usize>>) -> Vec<BTreeSet<String>> {
        communities
            .into_iter()
            .map(|c| c.into_iter().map(|i| self.names[i].clone()).collect())
            .collect()
    }
}

/// Run the strategy pipeline over `graph`.
pub fn cluster_graph(graph: &CallGraph, config: &ClusterConfig) -> ClusterResult {
    if graph.is_empty() {
        tracing::warn!("call graph is empty, no clusters produced");
        return ClusterResult::exhausted();
    }

    let context = ClusterContext::new(graph, config);
    let rubric = QualityRubric::new(config.target_clusters, config.min_cluster_size);
    let total = graph.node_count();

    for strategy in ClusterStrategy::plan(total) {
        let communities = context.run(strategy);
        if communities.is_empty() {
            tracing::debug!(%strategy, "strategy produced no communities");
            continue;
        }

        if !strategy.is_last_resort() {
            let sizes: Vec<usize> = communities.iter().map(Vec::len).collect();
            if let Err(rejection) = rubric.evaluate(&sizes, total) {
                tracing::debug!(%strategy, %rejection, "strategy rejected");
                continue;
            }
        }

        let result = ClusterResult::from_communities(
            context.to_names(communities),
            config.min_cluster_size,
            strategy,
            context.graph,
        );
        if result.is_empty() {
            continue;
        }
        tracing::info!(
            %strategy,
            clusters = result.len(),
            nodes = total,
            "clustered call graph"
        );
        return result;
    }

    tracing::warn!(nodes = total, "every clustering strategy failed, no clusters produced");
    ClusterResult::exhausted()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{chain_graph, modular_graph};

    #[test]
    fn test_plan_depends_on_size() {
        assert_eq!(ClusterStrategy::plan(10)[0], ClusterStrategy::GreedyModularity);
        assert_eq!(ClusterStrategy::plan(1_000)[0], ClusterStrategy::Louvain);
        assert_eq!(ClusterStrategy::plan(10_000)[0], ClusterStrategy::LabelPropagation);
        assert_eq!(
            ClusterStrategy::plan(10).last(),
            Some(&ClusterStrategy::ConnectedComponents)
        );
    }

    #[test]
    fn test_modular_graph_uses_community_detection() {
        let graph = modular_graph(4, 6);
        let result = graph.cluster(8, 2);
        assert_eq!(result.strategy(), ClusterStrategy::GreedyModularity);
        assert_eq!(result.len(), 4);
        assert!(result.clusters().values().all(|c| c.len() == 6));
    }

    #[test]
    fn test_ids_follow_descending_size() {
        let graph = modular_graph(3, 4);
        let set = |names: &[&str]| -> BTreeSet<String> {
            names.iter().map(|s| s.to_string()).collect()
        };
        let communities = vec![
            set(&["m0.C.f0", "m0.C.f1"]),
            set(&["m1.C.f0", "m1.C.f1", "m1.C.f2"]),
            set(&["m2.C.f0"]),
            set(&["m2.C.f1", "m2.C.f2"]),
        ];

        let result = ClusterResult::from_communities(
            communities,
            2,
            ClusterStrategy::Louvain,
            &graph,
        );
        assert_eq!(result.len(), 3);
        assert_eq!(result.members(1).map(BTreeSet::len), Some(3));
        assert!(result.members(2).is_some_and(|m| m.contains("m0.C.f0")));
        assert!(result.members(3).is_some_and(|m| m.contains("m2.C.f1")));
    }

    #[test]
    fn test_file_maps_are_bidirectional() {
        let graph = modular_graph(3, 5);
        let result = graph.cluster(6, 2);
        for (id, files) in result.cluster_to_files() {
            for file in files {
                assert!(result.clusters_of_file(file).is_some_and(|ids| ids.contains(id)));
            }
        }
    }

    #[test]
    fn test_clustering_is_deterministic() {
        let a = modular_graph(5, 8);
        let b = modular_graph(5, 8);
        assert_eq!(a.cluster(10, 2), b.cluster(10, 2));
    }

    #[test]
    fn test_result_is_cached_per_instance() {
        let graph = modular_graph(4, 6);
        let first = graph.cluster(8, 2).clone();
        let second = graph.cluster(2, 10);
        assert_eq!(&first, second);
    }

    #[test]
    fn test_chain_falls_back_but_still_clusters() {
        let graph = chain_graph(3);
        let result = graph.cluster(20, 2);
        assert_eq!(result.strategy(), ClusterStrategy::ConnectedComponents);
        assert_eq!(result.len(), 1);
    }

    fn graph_of(names: &[String], edges: &[(usize, usize)]) -> CallGraph {
        let mut graph = CallGraph::new();
        for name in names {
            let file = format!("{}.py", qualified_prefix(name, 2));
            graph.add_node(crate::Node::new(name.as_str(), file, 1, 2, crate::NodeType::Method));
        }
        for &(a, b) in edges {
            graph.add_edge(&names[a], &names[b]).unwrap();
        }
        graph
    }

    fn config(target_clusters: usize) -> ClusterConfig {
        ClusterConfig {
            target_clusters,
            ..ClusterConfig::default()
        }
    }

    fn members(classes: &[&str], per_class: usize) -> Vec<String> {
        classes
            .iter()
            .flat_map(|class| (0..per_class).map(move |f| format!("{class}.f{f}")))
            .collect()
    }

    #[test]
    fn test_uncalled_methods_group_by_class() {
        let graph = graph_of(&members(&["a.A", "b.B"], 4), &[]);
        let result = cluster_graph(&graph, &config(6));
        assert_eq!(result.strategy(), ClusterStrategy::ClassPrefix);
        assert_eq!(result.len(), 2);
        assert!(result.members(1).is_some_and(|m| m.iter().all(|n| n.starts_with("a.A."))));
    }

    #[test]
    fn test_too_many_classes_group_by_module() {
        let graph = graph_of(&members(&["a.A", "a.B", "b.C", "b.D"], 2), &[]);
        let result = cluster_graph(&graph, &config(1));
        assert_eq!(result.strategy(), ClusterStrategy::ModulePrefix);
        assert_eq!(result.len(), 2);
        assert!(result.members(1).is_some_and(|m| m.iter().all(|n| n.starts_with("a."))));
        assert!(result.members(2).is_some_and(|m| m.iter().all(|n| n.starts_with("b."))));
    }

    #[test]
    fn test_oversized_community_is_balanced() {
        let names = [members(&["x.C"], 10), members(&["y.D"], 2)].concat();
        let mut edges: Vec<(usize, usize)> = (0..10)
            .flat_map(|a| (a + 1..10).map(move |b| (a, b)))
            .collect();
        edges.push((10, 11));

        let result = cluster_graph(&graph_of(&names, &edges), &config(6));
        assert_eq!(result.strategy(), ClusterStrategy::Balanced);
        let mut sizes: Vec<usize> = result.clusters().values().map(BTreeSet::len).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![2, 5, 5]);
    }

    #[test]
    fn test_empty_and_edgeless_graphs_are_exhausted() {
        let empty = CallGraph::new();
        assert_eq!(empty.cluster(20, 2).strategy(), ClusterStrategy::Exhausted);

        let mut edgeless = CallGraph::new();
        for i in 0..5 {
            edgeless.add_node(crate::Node::new(
                format!("f{i}"),
                "a.py",
                1,
                2,
                crate::NodeType::Function,
            ));
        }
        let result = edgeless.cluster(20, 2);
        assert!(result.is_empty());
        assert_eq!(result.strategy(), ClusterStrategy::Exhausted);
    }
}
