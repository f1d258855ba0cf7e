//! Strata Core: call graph model, clustering, analysis cache and change analysis

pub mod bundle;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod diff;
pub mod error;
pub mod graph;
pub mod model;


#[cfg(test)]
mod test_utils;

pub use bundle::{AnalysisBundle, CrossFileLinks, IntegrityCheck};
pub use cache::{
    CACHE_DIR, CACHE_FORMAT_VERSION, CacheConfig, CacheMetadata, CachedAnalysis,
    analysis_cache_path, cache_dir, clear_cache, ensure_cache_dir, load_analysis, load_metadata,
    read_analysis, save_analysis, save_analysis_with_clusters,
};
pub use cluster::{
    ClusterConfig, ClusterResult, ClusterStrategy, QualityRejection, QualityRubric, cluster_graph,
    qualified_prefix,
};
pub use config::{AnalysisConfig, CONFIG_FILE, StrataConfig};
pub use diff::{
    ChangeMagnitude, ClusterChangeAnalyzer, ClusterChangeReport, ClusterMatch, NodeMovement,
    jaccard_similarity,
};
pub use error::{CacheError, GraphError, IntegrityError};
pub use graph::CallGraph;
pub use model::{ClassHierarchy, Edge, Language, Node, NodeType, PackageRelation};
