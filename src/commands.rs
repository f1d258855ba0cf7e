//! CLI command implementations

use anyhow::Context;
use serde_json::json;
use std::path::{Path, PathBuf};
use strata_core::{
    ClusterConfig, ClusterResult, Language, StrataConfig, analysis_cache_path, cluster_graph,
    load_metadata,
};
use strata_incremental::{BundleFileAnalyzer, GitCli, IncrementalOrchestrator};

pub fn analyze(
    root: PathBuf,
    bundle: PathBuf,
    language: Option<Language>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let git = GitCli::new(&root)?;
    let root = git.root().to_path_buf();
    let config = StrataConfig::load(&root)?;
    let language = language
        .or_else(|| config.analysis.languages.first().copied())
        .context("No language given and none configured")?;
    tracing::info!("Analysing {} sources in {}", language, root.display());

    let orchestrator = IncrementalOrchestrator::new(
        root,
        language,
        BundleFileAnalyzer::new(bundle),
        git,
        &config,
    );
    let run = orchestrator.run()?;

    if let Some(output) = output {
        write_json(&output, &run.clusters)?;
        tracing::info!("Cluster result written to {}", output.display());
    }

    let summary = json!({
        "language": language,
        "run": run.kind.to_string(),
        "commit": run.metadata.as_ref().map(|m| m.commit_hash.clone()),
        "iteration": run.metadata.as_ref().map(|m| m.iteration),
        "nodes": run.bundle.call_graph.node_count(),
        "edges": run.bundle.call_graph.edge_count(),
        "files": run.bundle.source_files.len(),
        "clusters": run.clusters.len(),
        "strategy": run.clusters.strategy(),
        "change": run.change.as_ref().map(|c| json!({
            "magnitude": c.magnitude,
            "matched": c.matches.len(),
            "new": c.new_clusters.len(),
            "removed": c.removed_clusters.len(),
            "stability": c.movement.stability(),
        })),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

pub fn cluster(
    root: PathBuf,
    bundle: PathBuf,
    target: Option<usize>,
    min_size: Option<usize>,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    let config = StrataConfig::load(&resolve_root(&root))?;
    let settings = ClusterConfig {
        target_clusters: target.unwrap_or(config.clustering.target_clusters),
        min_cluster_size: min_size.unwrap_or(config.clustering.min_cluster_size),
        seed: seed.unwrap_or(config.clustering.seed),
    };

    let bundle = BundleFileAnalyzer::new(bundle).load()?;
    tracing::info!(
        "Clustering {} nodes, {} edges",
        bundle.call_graph.node_count(),
        bundle.call_graph.edge_count()
    );
    let result = cluster_graph(&bundle.call_graph, &settings);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

pub fn compare(root: PathBuf, old: PathBuf, new: PathBuf) -> anyhow::Result<()> {
    let config = StrataConfig::load(&resolve_root(&root))?;
    let old = read_clusters(&old)?;
    let new = read_clusters(&new)?;

    let report = config.change.analyze(&old, &new);
    tracing::info!("Change magnitude: {}", report.magnitude);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub fn status(root: PathBuf) -> anyhow::Result<()> {
    let root = resolve_root(&root);
    let config = StrataConfig::load(&root)?;
    let cache_dir = config.cache_dir(&root);

    let mut entries = Vec::new();
    for &language in &config.analysis.languages {
        let path = analysis_cache_path(&cache_dir, language);
        let metadata = load_metadata(&path);
        if metadata.is_none() {
            tracing::debug!("No cache for {} at {}", language, path.display());
        }
        entries.push(json!({
            "language": language,
            "path": path,
            "metadata": metadata,
        }));
    }
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

pub fn clear(root: PathBuf) -> anyhow::Result<()> {
    let root = resolve_root(&root);
    let config = StrataConfig::load(&root)?;
    let cache_dir = config.cache_dir(&root);
    tracing::info!("Clearing cache: {}", cache_dir.display());

    strata_core::clear_cache(&cache_dir)
        .with_context(|| format!("Failed to remove {}", cache_dir.display()))?;

    tracing::info!("Cache cleared");
    Ok(())
}

/// The enclosing repository's top level, where `analyze` keeps its cache, or
/// `root` itself outside a git checkout.
fn resolve_root(root: &Path) -> PathBuf {
    match GitCli::new(root) {
        Ok(git) => git.root().to_path_buf(),
        Err(e) => {
            tracing::debug!("Using {} as given: {:#}", root.display(), e);
            root.to_path_buf()
        }
    }
}

fn read_clusters(path: &Path) -> anyhow::Result<ClusterResult> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse cluster result {}", path.display()))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
