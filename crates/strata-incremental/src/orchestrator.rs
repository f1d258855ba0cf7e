//! Incremental orchestrator: reuse the cached analysis when possible, update
//! it file by file when the repository moved, start over otherwise

use crate::analyzer::StaticAnalyzer;
use crate::git::ChangeDetector;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use strata_core::{
    AnalysisBundle, CacheMetadata, CachedAnalysis, ClusterChangeAnalyzer, ClusterChangeReport,
    ClusterConfig, ClusterResult, IntegrityCheck, Language, StrataConfig, analysis_cache_path,
    load_analysis, save_analysis_with_clusters,
};

/// What the cache says about the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    NoCache,
    /// Cached at the current commit and the tree is clean.
    Fresh,
    Stale { changed_files: BTreeSet<PathBuf> },
}

/// How a run produced its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Full,
    Cached,
    Incremental { changed_files: usize },
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunKind::Full => write!(f, "full analysis"),
            RunKind::Cached => write!(f, "served from cache"),
            RunKind::Incremental { changed_files } => {
                write!(f, "incremental update of {changed_files} files")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct IncrementalRun {
    pub kind: RunKind,
    pub bundle: AnalysisBundle,
    pub clusters: ClusterResult,
    /// Drift against the clustering of the previous cache, when there was one.
    pub change: Option<ClusterChangeReport>,
    /// Metadata of the cache as left by this run. `None` if the write failed.
    pub metadata: Option<CacheMetadata>,
}

/// Keeps one language's cached analysis of a repository up to date.
///
/// Runs against the same cache path must not overlap.
pub struct IncrementalOrchestrator<A, G> {
    root: PathBuf,
    cache_path: PathBuf,
    analyzer: A,
    git: G,
    clustering: ClusterConfig,
    change: ClusterChangeAnalyzer,
    integrity: IntegrityCheck,
}

impl<A: StaticAnalyzer, G: ChangeDetector> IncrementalOrchestrator<A, G> {
    pub fn new(
        root: impl Into<PathBuf>,
        language: Language,
        analyzer: A,
        git: G,
        config: &StrataConfig,
    ) -> Self {
        let root = root.into();
        let cache_path = analysis_cache_path(&config.cache_dir(&root), language);
        IncrementalOrchestrator {
            root,
            cache_path,
            analyzer,
            git,
            clustering: config.clustering.clone(),
            change: config.change.clone(),
            integrity: config.integrity_check(),
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn analyzer(&self) -> &A {
        &self.analyzer
    }

    pub fn git(&self) -> &G {
        &self.git
    }

    /// Classify a loaded cache against the current commit.
    pub fn assess(&self, cached: Option<&CachedAnalysis>, commit: &str) -> Result<CacheState> {
        let Some(cached) = cached else {
            return Ok(CacheState::NoCache);
        };
        let cached_commit = &cached.metadata.commit_hash;
        if cached_commit == commit && !self.git.has_uncommitted_changes()? {
            return Ok(CacheState::Fresh);
        }
        let changed_files = self
            .git
            .changed_files(cached_commit)
            .with_context(|| format!("Failed to list files changed since {cached_commit}"))?;
        Ok(CacheState::Stale { changed_files })
    }

    pub fn run(&self) -> Result<IncrementalRun> {
        let commit = self
            .git
            .current_commit()
            .context("Failed to determine current commit")?;
        let cached = load_analysis(&self.cache_path);

        let state = match self.assess(cached.as_ref(), &commit) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("cannot use cached analysis, running full analysis: {:#}", e);
                CacheState::NoCache
            }
        };
        tracing::info!(
            cache = %self.cache_path.display(),
            commit = %commit,
            state = state_name(&state),
            "assessed analysis cache"
        );

        let previous = cached.as_ref().and_then(|c| c.clusters.as_ref());
        match (state, cached.as_ref()) {
            (CacheState::Fresh, Some(cached)) => Ok(self.serve_cached(cached)),
            (CacheState::Stale { changed_files }, Some(cached)) => {
                match self.update(cached, &changed_files, &commit) {
                    Ok(run) => Ok(run),
                    Err(e) => {
                        tracing::warn!("incremental update failed, running full analysis: {:#}", e);
                        self.full(&commit, previous)
                    }
                }
            }
            _ => self.full(&commit, previous),
        }
    }

    fn serve_cached(&self, cached: &CachedAnalysis) -> IncrementalRun {
        let clusters = match &cached.clusters {
            Some(clusters) => clusters.clone(),
            None => cached
                .bundle
                .call_graph
                .cluster_with(&self.clustering)
                .clone(),
        };
        tracing::info!(
            iteration = cached.metadata.iteration,
            nodes = cached.bundle.call_graph.node_count(),
            "serving cached analysis"
        );
        IncrementalRun {
            kind: RunKind::Cached,
            bundle: cached.bundle.clone(),
            clusters,
            change: None,
            metadata: Some(cached.metadata.clone()),
        }
    }

    /// Invalidate, re-analyse the changed files, merge and persist.
    fn update(
        &self,
        cached: &CachedAnalysis,
        changed_files: &BTreeSet<PathBuf>,
        commit: &str,
    ) -> Result<IncrementalRun> {
        let links = cached.bundle.cross_file_links(changed_files);
        let invalidated = cached
            .bundle
            .invalidate(changed_files, self.integrity)
            .context("Invalidation left dangling entries")?;
        let fresh = self
            .analyzer
            .analyze(&self.root, Some(changed_files))
            .context("Failed to analyse changed files")?;

        let mut bundle = AnalysisBundle::merge(&invalidated, &fresh.bundle);
        let unresolved =
            bundle.call_graph.extend_edges(&fresh.pending_calls) + bundle.restore_links(&links);
        if unresolved > 0 {
            tracing::debug!(unresolved, "dropped calls to unknown symbols");
        }
        bundle
            .validate()
            .context("Merged analysis is inconsistent")?;

        tracing::info!(
            changed = changed_files.len(),
            nodes = bundle.call_graph.node_count(),
            edges = bundle.call_graph.edge_count(),
            "merged incremental analysis"
        );

        let iteration = cached.metadata.iteration + 1;
        Ok(self.finish(
            RunKind::Incremental {
                changed_files: changed_files.len(),
            },
            bundle,
            cached.clusters.as_ref(),
            commit,
            iteration,
        ))
    }

    fn full(&self, commit: &str, previous: Option<&ClusterResult>) -> Result<IncrementalRun> {
        let fresh = self
            .analyzer
            .analyze(&self.root, None)
            .context("Full analysis failed")?;
        if !fresh.pending_calls.is_empty() {
            tracing::debug!(
                unresolved = fresh.pending_calls.len(),
                "dropped calls to unknown symbols"
            );
        }
        tracing::info!(
            files = fresh.bundle.source_files.len(),
            nodes = fresh.bundle.call_graph.node_count(),
            edges = fresh.bundle.call_graph.edge_count(),
            "completed full analysis"
        );
        Ok(self.finish(RunKind::Full, fresh.bundle, previous, commit, 0))
    }

    /// Cluster, compare with the previous clustering and persist. The cache
    /// is only written once the result is complete; a failed write is logged
    /// and otherwise ignored.
    fn finish(
        &self,
        kind: RunKind,
        bundle: AnalysisBundle,
        previous: Option<&ClusterResult>,
        commit: &str,
        iteration: u64,
    ) -> IncrementalRun {
        let clusters = bundle.call_graph.cluster_with(&self.clustering).clone();
        let change = previous.map(|old| self.change.analyze(old, &clusters));
        if let Some(report) = &change {
            tracing::info!(
                magnitude = %report.magnitude,
                new = report.new_clusters.len(),
                removed = report.removed_clusters.len(),
                "module structure drift"
            );
        }

        let metadata = match save_analysis_with_clusters(
            &self.cache_path,
            &bundle,
            Some(&clusters),
            commit,
            iteration,
        ) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                tracing::warn!(cache = %self.cache_path.display(), "failed to write analysis cache: {}", e);
                None
            }
        };

        IncrementalRun {
            kind,
            bundle,
            clusters,
            change,
            metadata,
        }
    }
}

fn state_name(state: &CacheState) -> &'static str {
    match state {
        CacheState::NoCache => "no_cache",
        CacheState::Fresh => "fresh",
        CacheState::Stale { .. } => "stale",
    }
}
