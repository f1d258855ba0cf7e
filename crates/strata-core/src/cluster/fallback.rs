//! Fallback strategies used when plain community detection fails the rubric

use super::abstraction::PrefixAbstraction;
use super::community::louvain;
use super::quality::QualityRubric;
use super::weighted::WeightedGraph;
use std::collections::BTreeMap;

/// Cluster the prefix-collapsed graph and expand back to nodes.
///
/// Returns nothing when collapsing does not shrink the graph or leaves a
/// single group, since clustering that would only repeat an earlier attempt.
pub(crate) fn structural(
    names: &[String],
    graph: &WeightedGraph,
    depth: usize,
    seed: u64,
) -> Vec<Vec<usize>> {
    let abstraction = PrefixAbstraction::build(names, graph, depth);
    if abstraction.len() < 2 || abstraction.len() == names.len() {
        tracing::debug!(
            depth,
            groups = abstraction.len(),
            "prefix abstraction does not reduce the graph"
        );
        return Vec::new();
    }
    tracing::debug!(
        depth,
        groups = abstraction.len(),
        nodes = names.len(),
        "clustering prefix abstraction"
    );
    let communities = louvain(&abstraction.graph, seed);
    abstraction.expand(communities)
}

/// Louvain followed by forced compliance with the size constraints.
pub(crate) fn balanced(
    graph: &WeightedGraph,
    target: usize,
    min_size: usize,
    seed: u64,
) -> Vec<Vec<usize>> {
    let n = graph.len();
    let min_size = min_size.max(1);
    let cap = (QualityRubric::largest_limit(n).floor() as usize).max(min_size);

    let communities = louvain(graph, seed);
    let communities = merge_undersized(communities, graph, min_size, cap);
    let mut communities = split_oversized(communities, graph, cap, seed);

    communities.retain(|c| c.len() >= min_size);
    sort_largest_first(&mut communities);
    communities.truncate(target);
    communities
}

/// Connected components of the undirected view with at least `min_size`
/// members, largest first, at most `target` of them.
pub(crate) fn components(graph: &WeightedGraph, target: usize, min_size: usize) -> Vec<Vec<usize>> {
    let mut components = graph.connected_components();
    components.retain(|c| c.len() >= min_size.max(1));
    sort_largest_first(&mut components);
    components.truncate(target);
    components
}

fn sort_largest_first(communities: &mut [Vec<usize>]) {
    communities.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.first().cmp(&b.first())));
}

/// Fold every community smaller than `min_size` into the community it shares
/// the most edge weight with, as long as the result stays within `cap`.
/// Communities without such a neighbour are left as they are.
fn merge_undersized(
    mut communities: Vec<Vec<usize>>,
    graph: &WeightedGraph,
    min_size: usize,
    cap: usize,
) -> Vec<Vec<usize>> {
    let mut owner = vec![0usize; graph.len()];
    for (c, members) in communities.iter().enumerate() {
        for &node in members {
            owner[node] = c;
        }
    }

    let mut small: Vec<usize> = (0..communities.len())
        .filter(|&c| communities[c].len() < min_size)
        .collect();
    small.sort_by_key(|&c| (communities[c].len(), c));

    for c in small {
        let size = communities[c].len();
        if size == 0 || size >= min_size {
            continue;
        }

        let mut links: BTreeMap<usize, f64> = BTreeMap::new();
        for &node in &communities[c] {
            if !graph.has_neighbors(node) {
                continue;
            }
            for (neighbor, w) in graph.neighbors(node) {
                let other = owner[neighbor];
                if other != c {
                    *links.entry(other).or_insert(0.0) += w;
                }
            }
        }

        let mut best: Option<(usize, f64)> = None;
        for (&other, &w) in &links {
            if communities[other].len() + size > cap {
                continue;
            }
            if best.is_none_or(|(_, top)| w > top) {
                best = Some((other, w));
            }
        }

        if let Some((target, _)) = best {
            let moved = std::mem::take(&mut communities[c]);
            for &node in &moved {
                owner[node] = target;
            }
            communities[target].extend(moved);
        }
    }

    communities.retain(|c| !c.is_empty());
    for c in communities.iter_mut() {
        c.sort_unstable();
    }
    communities
}

/// Break up every community larger than `cap`.
fn split_oversized(
    communities: Vec<Vec<usize>>,
    graph: &WeightedGraph,
    cap: usize,
    seed: u64,
) -> Vec<Vec<usize>> {
    let mut result = Vec::with_capacity(communities.len());
    for community in communities {
        if community.len() <= cap {
            result.push(community);
        } else {
            result.extend(split_community(&community, graph, cap, seed));
        }
    }
    result
}

/// Nested community detection, then connected components, then an even split.
fn split_community(
    members: &[usize],
    graph: &WeightedGraph,
    cap: usize,
    seed: u64,
) -> Vec<Vec<usize>> {
    let sub = graph.induced(members);

    let mut parts = louvain(&sub, seed);
    if parts.len() < 2 {
        parts = sub.connected_components();
    }
    if parts.len() < 2 {
        return even_split(members, cap);
    }

    let mut result = Vec::new();
    for part in parts {
        let global: Vec<usize> = part.into_iter().map(|local| members[local]).collect();
        if global.len() > cap {
            result.extend(even_split(&global, cap));
        } else {
            result.push(global);
        }
    }
    result
}

/// Cut `members` into the fewest near-equal chunks of at most `cap`.
fn even_split(members: &[usize], cap: usize) -> Vec<Vec<usize>> {
    let cap = cap.max(1);
    let chunks = members.len().div_ceil(cap);
    let size = members.len().div_ceil(chunks.max(1)).max(1);
    members.chunks(size).map(<[usize]>::to_vec).collect()
}
