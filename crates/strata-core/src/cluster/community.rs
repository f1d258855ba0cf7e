//! Community detection on the weighted undirected view.
//!
//! Three algorithms with different cost/quality trade-offs:
//!
//! - greedy modularity agglomeration: best partitions, quadratic-ish, small graphs only
//! - Louvain: local moving plus aggregation, good quality at moderate cost
//! - label propagation: near-linear, noisier
//!
//! All of them return a partition of `0..graph.len()` as index lists. Every
//! tie is broken towards the lowest index and visiting orders come from
//! [`seeded_order`], so results depend only on the graph and the seed.

use super::weighted::{WeightedGraph, group_by_label, renumber, seeded_order};
use std::collections::BTreeMap;

const EPSILON: f64 = 1e-12;
const MAX_LOUVAIN_LEVELS: usize = 16;
const MAX_LOUVAIN_PASSES: usize = 64;
const MAX_PROPAGATION_ROUNDS: usize = 100;

fn singletons(len: usize) -> Vec<Vec<usize>> {
    (0..len).map(|i| vec![i]).collect()
}

/// Multi-level Louvain modularity optimisation.
pub(crate) fn louvain(graph: &WeightedGraph, seed: u64) -> Vec<Vec<usize>> {
    let n = graph.len();
    if graph.total_weight() <= 0.0 {
        return singletons(n);
    }

    // membership[original node] = node of the current level
    let mut membership: Vec<usize> = (0..n).collect();
    let mut level = graph.clone();

    for _ in 0..MAX_LOUVAIN_LEVELS {
        let (assignment, count) = louvain_level(&level, seed);
        if count == level.len() {
            break;
        }
        for m in membership.iter_mut() {
            *m = assignment[*m];
        }
        level = level.aggregate(&assignment, count);
    }

    group_by_label(&membership)
}

/// One local-moving phase. Returns the dense community of every node and the
/// number of communities.
fn louvain_level(graph: &WeightedGraph, seed: u64) -> (Vec<usize>, usize) {
    let n = graph.len();
    let two_m = 2.0 * graph.total_weight();
    let degrees: Vec<f64> = (0..n).map(|i| graph.degree(i)).collect();
    let mut community: Vec<usize> = (0..n).collect();
    let mut totals = degrees.clone();
    let order = seeded_order(graph, seed);

    for _ in 0..MAX_LOUVAIN_PASSES {
        let mut moved = false;
        for &node in &order {
            let current = community[node];
            let k = degrees[node];

            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            for (neighbor, w) in graph.neighbors(node) {
                *links.entry(community[neighbor]).or_insert(0.0) += w;
            }

            totals[current] -= k;
            let mut best = current;
            let mut best_gain =
                links.get(&current).copied().unwrap_or(0.0) - totals[current] * k / two_m;
            for (&candidate, &w) in &links {
                let gain = w - totals[candidate] * k / two_m;
                if gain > best_gain + EPSILON {
                    best = candidate;
                    best_gain = gain;
                }
            }
            totals[best] += k;

            if best != current {
                community[node] = best;
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }

    renumber(&community)
}

/// Clauset–Newman–Moore style agglomeration: repeatedly merge the pair of
/// adjacent communities with the largest modularity gain until no merge
/// improves modularity.
pub(crate) fn greedy_modularity(graph: &WeightedGraph) -> Vec<Vec<usize>> {
    let n = graph.len();
    let two_m = 2.0 * graph.total_weight();
    if two_m <= 0.0 {
        return singletons(n);
    }

    let mut members = singletons(n);
    let mut alive = vec![true; n];
    let mut share: Vec<f64> = (0..n).map(|i| graph.degree(i) / two_m).collect();
    let mut links: Vec<BTreeMap<usize, f64>> = (0..n)
        .map(|i| graph.neighbors(i).collect())
        .collect();

    loop {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in (0..n).filter(|&i| alive[i]) {
            for (&j, &w) in links[i].range(i + 1..) {
                let gain = 2.0 * (w / two_m - share[i] * share[j]);
                if best.is_none_or(|(_, _, top)| gain > top + EPSILON) {
                    best = Some((i, j, gain));
                }
            }
        }

        let (keep, absorb) = match best {
            Some((i, j, gain)) if gain > EPSILON => (i, j),
            _ => break,
        };

        let absorbed_links = std::mem::take(&mut links[absorb]);
        for (other, w) in absorbed_links {
            if other == keep {
                continue;
            }
            links[other].remove(&absorb);
            *links[other].entry(keep).or_insert(0.0) += w;
            *links[keep].entry(other).or_insert(0.0) += w;
        }
        links[keep].remove(&absorb);

        share[keep] += share[absorb];
        alive[absorb] = false;
        let moved = std::mem::take(&mut members[absorb]);
        members[keep].extend(moved);
    }

    let mut communities: Vec<Vec<usize>> = members
        .into_iter()
        .zip(alive)
        .filter_map(|(mut m, live)| {
            live.then(|| {
                m.sort_unstable();
                m
            })
        })
        .collect();
    communities.sort_by_key(|c| c[0]);
    communities
}

/// Asynchronous label propagation. A node adopts the label carrying the most
/// edge weight among its neighbours, keeping its own label on ties.
pub(crate) fn label_propagation(graph: &WeightedGraph, seed: u64) -> Vec<Vec<usize>> {
    let n = graph.len();
    let mut labels: Vec<usize> = (0..n).collect();
    let order = seeded_order(graph, seed);

    for _ in 0..MAX_PROPAGATION_ROUNDS {
        let mut changed = false;
        for &node in &order {
            let mut weights: BTreeMap<usize, f64> = BTreeMap::new();
            for (neighbor, w) in graph.neighbors(node) {
                *weights.entry(labels[neighbor]).or_insert(0.0) += w;
            }
            let Some(max) = weights.values().copied().reduce(f64::max) else {
                continue;
            };

            let is_best = |w: f64| (max - w).abs() < EPSILON;
            if weights.get(&labels[node]).is_some_and(|&w| is_best(w)) {
                continue;
            }
            if let Some((&label, _)) = weights.iter().find(|(_, w)| is_best(**w)) {
                labels[node] = label;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    group_by_label(&labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two 4-cliques joined by a single bridge edge 3-4.
    fn barbell() -> WeightedGraph {
        let mut graph = WeightedGraph::with_nodes(8);
        for block in [0usize, 4] {
            for a in block..block + 4 {
                for b in a + 1..block + 4 {
                    graph.add_weight(a, b, 1.0);
                }
            }
        }
        graph.add_weight(3, 4, 1.0);
        graph
    }

    fn sorted(mut communities: Vec<Vec<usize>>) -> Vec<Vec<usize>> {
        for c in communities.iter_mut() {
            c.sort_unstable();
        }
        communities.sort();
        communities
    }

    #[test]
    fn test_louvain_splits_barbell() {
        let communities = sorted(louvain(&barbell(), 42));
        assert_eq!(communities, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7]]);
    }

    #[test]
    fn test_greedy_modularity_splits_barbell() {
        let communities = sorted(greedy_modularity(&barbell()));
        assert_eq!(communities, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7]]);
    }

    #[test]
    fn test_label_propagation_covers_every_node() {
        let communities = label_propagation(&barbell(), 42);
        let mut all: Vec<usize> = communities.into_iter().flatten().collect();
        all.sort_unstable();
        assert_eq!(all, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_edgeless_graph_yields_singletons() {
        let graph = WeightedGraph::with_nodes(3);
        assert_eq!(louvain(&graph, 42).len(), 3);
        assert_eq!(greedy_modularity(&graph).len(), 3);
        assert_eq!(label_propagation(&graph, 42).len(), 3);
    }

    #[test]
    fn test_same_seed_same_partition() {
        let graph = barbell();
        assert_eq!(louvain(&graph, 42), louvain(&graph, 42));
        assert_eq!(label_propagation(&graph, 42), label_propagation(&graph, 42));
    }
}
