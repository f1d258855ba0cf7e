//! Producers of analysis bundles: per-file analysis on a worker pool, or a
//! bundle exported by an external analysis client

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use strata_core::{
    AnalysisBundle, AnalysisConfig, ClassHierarchy, Edge, Language, Node, PackageRelation,
};

/// Output of one analysis run.
#[derive(Debug, Clone, Default)]
pub struct FreshAnalysis {
    pub bundle: AnalysisBundle,
    /// Calls out of the analysed files whose callee is not in `bundle`.
    /// After a partial analysis they may resolve against the merged graph.
    pub pending_calls: Vec<Edge>,
}

/// Analyses a repository, either completely or only the given files.
pub trait StaticAnalyzer {
    /// `files` are relative to `root`. Files that no longer exist are left
    /// out of the result.
    fn analyze(&self, root: &Path, files: Option<&BTreeSet<PathBuf>>) -> Result<FreshAnalysis>;
}

/// Everything extracted from a single source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub nodes: Vec<Node>,
    /// Raw `(caller, callee)` pairs; callees may live in other files.
    pub calls: Vec<Edge>,
    pub class_hierarchies: BTreeMap<String, ClassHierarchy>,
    pub packages: BTreeMap<String, PackageRelation>,
    pub references: Vec<Node>,
}

/// Extracts a [`FileAnalysis`] from one file. Called concurrently.
pub trait FileAnalyzer: Sync {
    fn language(&self) -> Language;

    fn analyze_file(&self, root: &Path, file: &Path) -> Result<FileAnalysis>;
}

/// Runs a [`FileAnalyzer`] over a repository on a bounded thread pool.
pub struct ParallelAnalyzer<A> {
    analyzer: A,
    workers: usize,
    exclude: GlobSet,
}

impl<A: FileAnalyzer> ParallelAnalyzer<A> {
    pub fn new(analyzer: A, config: &AnalysisConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.exclude {
            builder.add(
                Glob::new(pattern).with_context(|| format!("Invalid exclude pattern {pattern}"))?,
            );
        }
        Ok(ParallelAnalyzer {
            analyzer,
            workers: config.workers.max(1),
            exclude: builder.build().context("Failed to build exclude patterns")?,
        })
    }

    fn wants(&self, file: &Path) -> bool {
        Language::from_path(file) == Some(self.analyzer.language()) && !self.exclude.is_match(file)
    }

    /// Source files of the analyzer's language under `root`, relative to it.
    /// Honours `.gitignore` and skips hidden directories.
    pub fn discover(&self, root: &Path) -> Result<BTreeSet<PathBuf>> {
        let mut files = BTreeSet::new();
        for entry in WalkBuilder::new(root).hidden(true).git_ignore(true).build() {
            let entry = entry.context("Failed to walk repository")?;
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            if self.wants(relative) {
                files.insert(relative.to_path_buf());
            }
        }
        tracing::debug!(root = %root.display(), files = files.len(), "discovered source files");
        Ok(files)
    }
}

impl<A: FileAnalyzer> StaticAnalyzer for ParallelAnalyzer<A> {
    fn analyze(&self, root: &Path, files: Option<&BTreeSet<PathBuf>>) -> Result<FreshAnalysis> {
        let files: Vec<PathBuf> = match files {
            Some(files) => files
                .iter()
                .filter(|f| self.wants(f) && root.join(f).is_file())
                .cloned()
                .collect(),
            None => self.discover(root)?.into_iter().collect(),
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .context("Failed to build analysis thread pool")?;

        let results: Vec<(PathBuf, Result<FileAnalysis>)> = pool.install(|| {
            files
                .par_iter()
                .map(|file| (file.clone(), self.analyzer.analyze_file(root, file)))
                .collect()
        });

        let mut analyses = Vec::with_capacity(results.len());
        for (file, result) in results {
            match result {
                Ok(analysis) => analyses.push((file, analysis)),
                Err(e) => {
                    tracing::warn!(file = %file.display(), "skipping file that failed analysis: {:#}", e);
                }
            }
        }

        tracing::info!(
            language = %self.analyzer.language(),
            files = analyses.len(),
            workers = self.workers,
            "analysed source files"
        );
        Ok(assemble(analyses))
    }
}

/// Build a bundle from per-file results in path order. The first definition
/// of a name wins; calls with an unknown endpoint become pending.
pub fn assemble(mut analyses: Vec<(PathBuf, FileAnalysis)>) -> FreshAnalysis {
    analyses.sort_by(|a, b| a.0.cmp(&b.0));

    let mut bundle = AnalysisBundle::new();
    for (file, analysis) in &analyses {
        bundle.source_files.insert(file.clone());
        for node in &analysis.nodes {
            bundle.call_graph.add_node(node.clone());
        }
    }

    let mut pending_calls = Vec::new();
    for (_, analysis) in &analyses {
        for call in &analysis.calls {
            if bundle.call_graph.add_edge(&call.source, &call.target).is_err() {
                pending_calls.push(call.clone());
            }
        }
    }

    for (_, analysis) in analyses {
        for (name, entry) in analysis.class_hierarchies {
            bundle.class_hierarchies.entry(name).or_insert(entry);
        }
        for (name, relation) in analysis.packages {
            let merged = bundle.package_relations.entry(name).or_default();
            merged.files.extend(relation.files);
            merged.imports.extend(relation.imports);
            merged.imported_by.extend(relation.imported_by);
        }
        bundle.references.extend(analysis.references);
    }

    if !pending_calls.is_empty() {
        tracing::debug!(pending = pending_calls.len(), "calls to symbols outside the analysed files");
    }
    FreshAnalysis {
        bundle,
        pending_calls,
    }
}

/// Serves a bundle exported by an external analysis client.
#[derive(Debug, Clone)]
pub struct BundleFileAnalyzer {
    path: PathBuf,
}

impl BundleFileAnalyzer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        BundleFileAnalyzer { path: path.into() }
    }

    pub fn load(&self) -> Result<AnalysisBundle> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let bundle: AnalysisBundle = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse bundle {}", self.path.display()))?;
        bundle
            .validate()
            .with_context(|| format!("Bundle {} is inconsistent", self.path.display()))?;
        Ok(bundle)
    }
}

impl StaticAnalyzer for BundleFileAnalyzer {
    fn analyze(&self, _root: &Path, files: Option<&BTreeSet<PathBuf>>) -> Result<FreshAnalysis> {
        let bundle = self.load()?;
        Ok(match files {
            Some(files) => scope(&bundle, files),
            None => FreshAnalysis {
                bundle,
                pending_calls: Vec::new(),
            },
        })
    }
}

/// The part of `bundle` that belongs to `files`, as if only those files had
/// been analysed.
pub fn scope(bundle: &AnalysisBundle, files: &BTreeSet<PathBuf>) -> FreshAnalysis {
    let inside = |file: &Path| files.contains(file);
    let mut scoped = AnalysisBundle::new();

    scoped.call_graph = bundle.call_graph.filtered(|n| inside(&n.file_path));
    let pending_calls = bundle
        .call_graph
        .edges()
        .iter()
        .filter(|e| {
            scoped.call_graph.contains(&e.source) && !scoped.call_graph.contains(&e.target)
        })
        .cloned()
        .collect();

    scoped.class_hierarchies = bundle
        .class_hierarchies
        .iter()
        .filter(|(_, h)| inside(&h.file_path))
        .map(|(name, h)| (name.clone(), h.clone()))
        .collect();
    for (name, relation) in &bundle.package_relations {
        let owned: BTreeSet<PathBuf> = relation.files.iter().filter(|f| inside(f)).cloned().collect();
        if !owned.is_empty() {
            scoped.package_relations.insert(
                name.clone(),
                PackageRelation {
                    files: owned,
                    ..relation.clone()
                },
            );
        }
    }
    scoped.references = bundle
        .references
        .iter()
        .filter(|r| inside(&r.file_path))
        .cloned()
        .collect();
    scoped.source_files = bundle
        .source_files
        .iter()
        .filter(|f| inside(f))
        .cloned()
        .collect();

    FreshAnalysis {
        bundle: scoped,
        pending_calls,
    }
}
