//! Edge aggregation for nodes collapsed by qualified-name prefix

use super::weighted::WeightedGraph;
use std::collections::HashMap;

/// Strip `depth` trailing segments from a qualified name. Segments are
/// separated by `.` or `::`. Names with too few segments keep whatever is
/// left; a name that would become empty is returned whole.
pub fn qualified_prefix(name: &str, depth: usize) -> &str {
    let mut end = name.len();
    for _ in 0..depth {
        let head = &name[..end];
        let cut = match (head.rfind("::"), head.rfind('.')) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => break,
        };
        end = cut;
    }
    if end == 0 { name } else { &name[..end] }
}

/// Nodes grouped by shared prefix, with the edges between groups summed.
#[derive(Debug, Clone)]
pub(crate) struct PrefixAbstraction {
    /// Prefix of each group, in order of first appearance.
    pub prefixes: Vec<String>,
    /// Group index -> member node indices. Built once, used to expand
    /// communities of groups back into communities of nodes.
    pub members: Vec<Vec<usize>>,
    pub graph: WeightedGraph,
}

impl PrefixAbstraction {
    /// Collapse `names` (indexed like `graph`) by their prefix at `depth`.
    pub fn build(names: &[String], graph: &WeightedGraph, depth: usize) -> Self {
        let mut group_index: HashMap<&str, usize> = HashMap::with_capacity(names.len());
        let mut prefixes = Vec::new();
        let mut members: Vec<Vec<usize>> = Vec::new();
        let mut group_of = Vec::with_capacity(names.len());

        for (node, name) in names.iter().enumerate() {
            let prefix = qualified_prefix(name, depth);
            let group = *group_index.entry(prefix).or_insert_with(|| {
                prefixes.push(prefix.to_string());
                members.push(Vec::new());
                prefixes.len() - 1
            });
            members[group].push(node);
            group_of.push(group);
        }

        let graph = graph.aggregate(&group_of, prefixes.len());
        PrefixAbstraction {
            prefixes,
            members,
            graph,
        }
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    /// Replace every group in each community by the nodes it stands for.
    pub fn expand(&self, communities: Vec<Vec<usize>>) -> Vec<Vec<usize>> {
        communities
            .into_iter()
            .map(|groups| {
                let mut nodes: Vec<usize> = groups
                    .into_iter()
                    .flat_map(|g| self.members[g].iter().copied())
                    .collect();
                nodes.sort_unstable();
                nodes
            })
            .collect()
    }
}
