//! Acceptance predicate for a candidate partition

const MIN_COVERAGE: f64 = 0.75;
const MAX_SINGLETON_SHARE: f64 = 0.60;
const SMALL_GRAPH_NODES: usize = 50;
const MAX_LARGEST_SHARE_SMALL: f64 = 0.60;
const MAX_LARGEST_SHARE: f64 = 0.40;
const MAX_LARGEST_TO_AVERAGE: f64 = 8.0;

/// Why a partition was rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QualityRejection {
    Empty,
    TooFewClusters { found: usize, required: usize },
    TooManyClusters { found: usize, limit: usize },
    LowCoverage { coverage: f64 },
    TooManySingletons { singletons: usize, total: usize },
    OversizedCluster { largest: usize, limit: f64 },
    Imbalanced { largest: usize, average: f64 },
}

impl std::fmt::Display for QualityRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityRejection::Empty => write!(f, "no nodes to cluster"),
            QualityRejection::TooFewClusters { found, required } => {
                write!(f, "{found} qualifying clusters, need at least {required}")
            }
            QualityRejection::TooManyClusters { found, limit } => {
                write!(f, "{found} qualifying clusters, limit is {limit}")
            }
            QualityRejection::LowCoverage { coverage } => {
                write!(f, "qualifying clusters cover {:.0}% of nodes", coverage * 100.0)
            }
            QualityRejection::TooManySingletons { singletons, total } => {
                write!(f, "{singletons} of {total} nodes are singletons")
            }
            QualityRejection::OversizedCluster { largest, limit } => {
                write!(f, "largest cluster has {largest} nodes, limit is {limit:.1}")
            }
            QualityRejection::Imbalanced { largest, average } => {
                write!(f, "largest cluster has {largest} nodes, average is {average:.1}")
            }
        }
    }
}

/// Quality rubric for one clustering request.
#[derive(Debug, Clone, Copy)]
pub struct QualityRubric {
    pub target_clusters: usize,
    pub min_cluster_size: usize,
}

impl QualityRubric {
    pub fn new(target_clusters: usize, min_cluster_size: usize) -> Self {
        QualityRubric {
            target_clusters,
            min_cluster_size,
        }
    }

    /// Fewest qualifying clusters an acceptable partition may have.
    pub fn min_clusters(&self) -> usize {
        (self.target_clusters / 6).max(2)
    }

    /// Most qualifying clusters an acceptable partition may have.
    pub fn max_clusters(&self) -> usize {
        self.target_clusters * 2
    }

    /// Largest cluster size allowed for a graph of `total_nodes`.
    pub fn largest_limit(total_nodes: usize) -> f64 {
        let share = if total_nodes < SMALL_GRAPH_NODES {
            MAX_LARGEST_SHARE_SMALL
        } else {
            MAX_LARGEST_SHARE
        };
        share * total_nodes as f64
    }

    /// Check a partition given the size of every community (qualifying or
    /// not) and the node count of the whole graph.
    pub fn evaluate(&self, sizes: &[usize], total_nodes: usize) -> Result<(), QualityRejection> {
        if total_nodes == 0 {
            return Err(QualityRejection::Empty);
        }

        let qualifying: Vec<usize> = sizes
            .iter()
            .copied()
            .filter(|&s| s >= self.min_cluster_size.max(1))
            .collect();

        let required = self.min_clusters();
        if qualifying.len() < required {
            return Err(QualityRejection::TooFewClusters {
                found: qualifying.len(),
                required,
            });
        }

        let limit = self.max_clusters();
        if qualifying.len() > limit {
            return Err(QualityRejection::TooManyClusters {
                found: qualifying.len(),
                limit,
            });
        }

        let covered: usize = qualifying.iter().sum();
        let coverage = covered as f64 / total_nodes as f64;
        if coverage < MIN_COVERAGE {
            return Err(QualityRejection::LowCoverage { coverage });
        }

        let singletons = sizes.iter().filter(|&&s| s == 1).count();
        if singletons as f64 > MAX_SINGLETON_SHARE * total_nodes as f64 {
            return Err(QualityRejection::TooManySingletons {
                singletons,
                total: total_nodes,
            });
        }

        let largest = qualifying.iter().copied().max().unwrap_or(0);
        let largest_limit = Self::largest_limit(total_nodes);
        if largest as f64 > largest_limit {
            return Err(QualityRejection::OversizedCluster {
                largest,
                limit: largest_limit,
            });
        }

        let average = covered as f64 / qualifying.len() as f64;
        if largest as f64 > MAX_LARGEST_TO_AVERAGE * average {
            return Err(QualityRejection::Imbalanced { largest, average });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rubric() -> QualityRubric {
        QualityRubric::new(12, 2)
    }

    #[test]
    fn test_accepts_balanced_partition() {
        assert_eq!(rubric().evaluate(&[5, 5, 4, 4, 2], 20), Ok(()));
    }

    #[test]
    fn test_rejects_too_few_clusters() {
        assert_eq!(
            rubric().evaluate(&[10, 1, 1], 12),
            Err(QualityRejection::TooFewClusters {
                found: 1,
                required: 2
            })
        );
    }

    #[test]
    fn test_rejects_too_many_clusters() {
        let sizes = vec![2; 25];
        assert_eq!(
            rubric().evaluate(&sizes, 50),
            Err(QualityRejection::TooManyClusters {
                found: 25,
                limit: 24
            })
        );
    }

    #[test]
    fn test_rejects_low_coverage() {
        let result = rubric().evaluate(&[3, 3, 1, 1, 1], 9);
        assert!(matches!(result, Err(QualityRejection::LowCoverage { .. })));
    }

    #[test]
    fn test_rejects_singleton_heavy_partition() {
        // Coverage passes only because min size is 1.
        let rubric = QualityRubric::new(12, 1);
        let result = rubric.evaluate(&[1, 1, 1, 1, 1, 1, 1, 3], 10);
        assert_eq!(
            result,
            Err(QualityRejection::TooManySingletons {
                singletons: 7,
                total: 10
            })
        );
    }

    #[test]
    fn test_rejects_oversized_cluster() {
        // 60 nodes: limit is 40% = 24.
        let result = rubric().evaluate(&[30, 10, 10, 10], 60);
        assert!(matches!(
            result,
            Err(QualityRejection::OversizedCluster { largest: 30, .. })
        ));
    }

    #[test]
    fn test_small_graph_allows_larger_share() {
        // 10 nodes: limit is 60% = 6.
        assert_eq!(rubric().evaluate(&[6, 4], 10), Ok(()));
    }

    #[test]
    fn test_rejects_imbalanced_partition() {
        // 100 nodes: largest 38 is under 40%, but the average of the 24
        // qualifying clusters is 3.5.
        let mut sizes = vec![38];
        sizes.extend(vec![2; 23]);
        sizes.extend(vec![1; 16]);
        let result = rubric().evaluate(&sizes, 100);
        assert!(matches!(result, Err(QualityRejection::Imbalanced { .. })));
    }
}
