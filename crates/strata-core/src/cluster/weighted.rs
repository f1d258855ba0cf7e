//! Undirected weighted view of a call graph used by the clustering algorithms

use petgraph::graph::DiGraph;
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};

/// Symmetric weighted adjacency over dense indices `0..len`.
///
/// Self loops are kept apart from the adjacency lists; a self loop of weight
/// `w` contributes `2w` to its node's degree.
///
/// Every node carries a key that orders it in [`seeded_order`]. Keys of a
/// call graph's nodes are hashes of their names, so inserting a node does not
/// move the others.
#[derive(Debug, Clone, Default)]
pub(crate) struct WeightedGraph {
    adjacency: Vec<BTreeMap<usize, f64>>,
    self_loops: Vec<f64>,
    keys: Vec<u64>,
}

impl WeightedGraph {
    /// Graph without edges whose node keys are the indices themselves.
    pub fn with_nodes(len: usize) -> Self {
        WeightedGraph {
            adjacency: vec![BTreeMap::new(); len],
            self_loops: vec![0.0; len],
            keys: (0..len as u64).collect(),
        }
    }

    /// Undirected view of a directed call graph. Every call adds weight 1 to
    /// the pair, so mutual calls weigh 2. Recursive calls are ignored. Node
    /// keys hash the node weights.
    pub fn from_digraph<N: Hash>(digraph: &DiGraph<N, ()>) -> Self {
        let mut graph = WeightedGraph::with_nodes(digraph.node_count());
        for index in digraph.node_indices() {
            let mut hasher = DefaultHasher::new();
            digraph[index].hash(&mut hasher);
            graph.keys[index.index()] = hasher.finish();
        }
        for edge in digraph.edge_references() {
            let (a, b) = (edge.source().index(), edge.target().index());
            if a != b {
                graph.add_weight(a, b, 1.0);
            }
        }
        graph
    }

    pub fn add_weight(&mut self, a: usize, b: usize, weight: f64) {
        if a == b {
            self.self_loops[a] += weight;
        } else {
            *self.adjacency[a].entry(b).or_insert(0.0) += weight;
            *self.adjacency[b].entry(a).or_insert(0.0) += weight;
        }
    }

    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn neighbors(&self, node: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.adjacency[node].iter().map(|(&j, &w)| (j, w))
    }

    pub fn key(&self, node: usize) -> u64 {
        self.keys[node]
    }

    pub fn has_neighbors(&self, node: usize) -> bool {
        !self.adjacency[node].is_empty()
    }

    pub fn degree(&self, node: usize) -> f64 {
        self.adjacency[node].values().sum::<f64>() + 2.0 * self.self_loops[node]
    }

    /// Sum of all edge weights, each undirected edge counted once.
    pub fn total_weight(&self) -> f64 {
        (0..self.len()).map(|i| self.degree(i)).sum::<f64>() / 2.0
    }

    /// Collapse nodes into `count` groups. Edges inside a group become self
    /// loops of the group, edges across groups are summed. A group takes the
    /// key of its lowest-indexed member.
    pub fn aggregate(&self, group_of: &[usize], count: usize) -> WeightedGraph {
        let mut graph = WeightedGraph::with_nodes(count);
        let mut keyed = vec![false; count];
        for (i, &group) in group_of.iter().enumerate() {
            if !keyed[group] {
                keyed[group] = true;
                graph.keys[group] = self.keys[i];
            }
        }
        for i in 0..self.len() {
            graph.self_loops[group_of[i]] += self.self_loops[i];
            for (j, w) in self.neighbors(i) {
                if j > i {
                    graph.add_weight(group_of[i], group_of[j], w);
                }
            }
        }
        graph
    }

    /// Subgraph induced by `members`. Local index `k` is `members[k]`.
    pub fn induced(&self, members: &[usize]) -> WeightedGraph {
        let local: HashMap<usize, usize> = members
            .iter()
            .enumerate()
            .map(|(k, &global)| (global, k))
            .collect();
        let mut graph = WeightedGraph::with_nodes(members.len());
        for (a, &global) in members.iter().enumerate() {
            graph.keys[a] = self.keys[global];
            graph.self_loops[a] = self.self_loops[global];
            for (neighbor, w) in self.neighbors(global) {
                if let Some(&b) = local.get(&neighbor) {
                    if b > a {
                        graph.add_weight(a, b, w);
                    }
                }
            }
        }
        graph
    }

    /// Connected components, each sorted ascending, ordered by smallest member.
    pub fn connected_components(&self) -> Vec<Vec<usize>> {
        let mut components = UnionFind::<usize>::new(self.len());
        for i in 0..self.len() {
            for (j, _) in self.neighbors(i) {
                components.union(i, j);
            }
        }
        group_by_label(&components.into_labeling())
    }
}

/// Deterministic pseudo-random visiting order of the nodes of `graph`,
/// derived from `seed` and the node keys.
pub(crate) fn seeded_order(graph: &WeightedGraph, seed: u64) -> Vec<usize> {
    let mut keyed: Vec<(u64, usize)> = (0..graph.len())
        .map(|i| {
            let mut hasher = DefaultHasher::new();
            seed.hash(&mut hasher);
            graph.key(i).hash(&mut hasher);
            (hasher.finish(), i)
        })
        .collect();
    keyed.sort_unstable();
    keyed.into_iter().map(|(_, i)| i).collect()
}

/// Group node indices by label. Groups come out ordered by their smallest
/// member, members ascending.
pub(crate) fn group_by_label(labels: &[usize]) -> Vec<Vec<usize>> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut first_seen: HashMap<usize, usize> = HashMap::new();
    for (node, &label) in labels.iter().enumerate() {
        let key = *first_seen.entry(label).or_insert(node);
        groups.entry(key).or_default().push(node);
    }
    groups.into_values().collect()
}

/// Relabel communities densely as `0..count` in order of first appearance.
pub(crate) fn renumber(labels: &[usize]) -> (Vec<usize>, usize) {
    let mut mapping: HashMap<usize, usize> = HashMap::new();
    let dense: Vec<usize> = labels
        .iter()
        .map(|label| {
            let next = mapping.len();
            *mapping.entry(*label).or_insert(next)
        })
        .collect();
    (dense, mapping.len())
}
