//! Structural drift between two clusterings of the same codebase

use crate::cluster::ClusterResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// `|a ∩ b| / |a ∪ b|`, or 0 when both sets are empty.
pub fn jaccard_similarity<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// How much the module structure moved between two runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeMagnitude {
    /// Every cluster found a partner.
    Small,
    Medium,
    /// Many clusters appeared and many disappeared.
    Big,
}

impl std::fmt::Display for ChangeMagnitude {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeMagnitude::Small => "small",
            ChangeMagnitude::Medium => "medium",
            ChangeMagnitude::Big => "big",
        };
        f.write_str(s)
    }
}

/// An old cluster paired with the new cluster that replaced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMatch {
    pub old_id: usize,
    pub new_id: usize,
    pub similarity: f64,
}

/// Per-node churn. Reported for diagnostics; classification ignores it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMovement {
    /// Nodes whose old cluster was matched to their new cluster.
    pub stable: usize,
    /// Nodes clustered in both runs but not in matched clusters.
    pub moved: usize,
    pub added: usize,
    pub removed: usize,
}

impl NodeMovement {
    /// Share of nodes clustered in both runs that stayed put.
    pub fn stability(&self) -> f64 {
        let tracked = self.stable + self.moved;
        if tracked == 0 {
            1.0
        } else {
            self.stable as f64 / tracked as f64
        }
    }
}

/// Result of comparing two clusterings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterChangeReport {
    pub matches: Vec<ClusterMatch>,
    pub removed_clusters: Vec<usize>,
    pub new_clusters: Vec<usize>,
    pub magnitude: ChangeMagnitude,
    pub movement: NodeMovement,
}

impl ClusterChangeReport {
    /// New id of an old cluster, if it was matched.
    pub fn successor(&self, old_id: usize) -> Option<usize> {
        self.matches
            .iter()
            .find(|m| m.old_id == old_id)
            .map(|m| m.new_id)
    }
}

/// Matches clusters across runs and classifies the drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterChangeAnalyzer {
    /// Minimum Jaccard similarity for two clusters to match.
    pub similarity_threshold: f64,
    /// New and removed counts at or above this make a big change.
    pub big_change_threshold: usize,
}

impl Default for ClusterChangeAnalyzer {
    fn default() -> Self {
        ClusterChangeAnalyzer {
            similarity_threshold: 0.5,
            big_change_threshold: 3,
        }
    }
}

impl ClusterChangeAnalyzer {
    pub fn new(similarity_threshold: f64, big_change_threshold: usize) -> Self {
        ClusterChangeAnalyzer {
            similarity_threshold,
            big_change_threshold,
        }
    }

    pub fn analyze(&self, old: &ClusterResult, new: &ClusterResult) -> ClusterChangeReport {
        let matches = self.match_clusters(old, new);

        let matched_old: BTreeSet<usize> = matches.iter().map(|m| m.old_id).collect();
        let matched_new: BTreeSet<usize> = matches.iter().map(|m| m.new_id).collect();
        let removed_clusters: Vec<usize> = old
            .cluster_ids()
            .filter(|id| !matched_old.contains(id))
            .collect();
        let new_clusters: Vec<usize> = new
            .cluster_ids()
            .filter(|id| !matched_new.contains(id))
            .collect();

        let magnitude = self.classify(new_clusters.len(), removed_clusters.len());
        let movement = node_movement(old, new, &matches);

        tracing::debug!(
            matched = matches.len(),
            removed = removed_clusters.len(),
            new = new_clusters.len(),
            stability = movement.stability(),
            %magnitude,
            "compared clusterings"
        );

        ClusterChangeReport {
            matches,
            removed_clusters,
            new_clusters,
            magnitude,
            movement,
        }
    }

    /// Greedy best-first matching. Not globally optimal; each cluster is
    /// matched at most once.
    pub fn match_clusters(&self, old: &ClusterResult, new: &ClusterResult) -> Vec<ClusterMatch> {
        let mut candidates = Vec::new();
        for (&old_id, old_members) in old.clusters() {
            for (&new_id, new_members) in new.clusters() {
                let similarity = jaccard_similarity(old_members, new_members);
                if similarity >= self.similarity_threshold && similarity > 0.0 {
                    candidates.push(ClusterMatch {
                        old_id,
                        new_id,
                        similarity,
                    });
                }
            }
        }
        candidates.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.old_id.cmp(&b.old_id))
                .then(a.new_id.cmp(&b.new_id))
        });

        let mut claimed_old = BTreeSet::new();
        let mut claimed_new = BTreeSet::new();
        candidates
            .into_iter()
            .filter(|c| {
                if claimed_old.contains(&c.old_id) || claimed_new.contains(&c.new_id) {
                    return false;
                }
                claimed_old.insert(c.old_id);
                claimed_new.insert(c.new_id);
                true
            })
            .collect()
    }

    pub fn classify(&self, new_count: usize, removed_count: usize) -> ChangeMagnitude {
        if new_count == 0 && removed_count == 0 {
            ChangeMagnitude::Small
        } else if new_count >= self.big_change_threshold
            && removed_count >= self.big_change_threshold
        {
            ChangeMagnitude::Big
        } else {
            ChangeMagnitude::Medium
        }
    }
}

fn node_movement(old: &ClusterResult, new: &ClusterResult, matches: &[ClusterMatch]) -> NodeMovement {
    let successor: BTreeMap<usize, usize> = matches.iter().map(|m| (m.old_id, m.new_id)).collect();
    let old_assignments = old.assignments();
    let new_assignments = new.assignments();

    let mut movement = NodeMovement::default();
    for (name, old_id) in &old_assignments {
        match new_assignments.get(name) {
            Some(new_id) if successor.get(old_id) == Some(new_id) => movement.stable += 1,
            Some(_) => movement.moved += 1,
            None => movement.removed += 1,
        }
    }
    movement.added = new_assignments
        .keys()
        .filter(|name| !old_assignments.contains_key(*name))
        .count();
    movement
}
