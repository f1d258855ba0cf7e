//! Strata Incremental: change detection, per-file analysis and the
//! incremental update of cached analyses

pub mod analyzer;
pub mod git;
pub mod orchestrator;


pub use analyzer::{
    BundleFileAnalyzer, FileAnalysis, FileAnalyzer, FreshAnalysis, ParallelAnalyzer,
    StaticAnalyzer, assemble, scope,
};
pub use git::{ChangeDetector, GitCli, parse_name_list};
pub use orchestrator::{CacheState, IncrementalOrchestrator, IncrementalRun, RunKind};
