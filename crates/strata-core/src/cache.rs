//! On-disk cache of analysis bundles, one JSON file per language

use crate::bundle::AnalysisBundle;
use crate::cluster::ClusterResult;
use crate::error::CacheError;
use crate::model::Language;
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Default cache directory, relative to the repository root.
pub const CACHE_DIR: &str = ".strata";

/// Version stamped into every cache file. Files with any other version are
/// treated as absent.
pub const CACHE_FORMAT_VERSION: &str = "1";

/// `[cache]` section of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    /// Re-check referential integrity after every invalidation.
    pub verify_integrity: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            dir: PathBuf::from(CACHE_DIR),
            verify_integrity: true,
        }
    }
}

impl CacheConfig {
    /// Cache directory for a repository root. Absolute dirs are used as is.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        if self.dir.is_absolute() {
            self.dir.clone()
        } else {
            root.join(&self.dir)
        }
    }
}

/// Get the default cache directory of a repository
pub fn cache_dir(root: &Path) -> PathBuf {
    root.join(CACHE_DIR)
}

/// Cache file for one language inside a cache directory
pub fn analysis_cache_path(cache_dir: &Path, language: Language) -> PathBuf {
    cache_dir.join(format!("{language}_analysis.json"))
}

/// Ensure cache directory exists
pub fn ensure_cache_dir(cache_dir: &Path) -> std::io::Result<()> {
    if !cache_dir.exists() {
        std::fs::create_dir_all(cache_dir)?;
    }
    Ok(())
}

/// Remove the cache directory and everything in it
pub fn clear_cache(cache_dir: &Path) -> std::io::Result<()> {
    if cache_dir.exists() {
        std::fs::remove_dir_all(cache_dir)?;
    }
    Ok(())
}

/// Provenance stored next to a cached bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub commit_hash: String,
    /// 0 after a full analysis, incremented by every incremental update.
    pub iteration: u64,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    #[serde(rename = "version")]
    pub format_version: String,
}

impl CacheMetadata {
    pub fn new(commit_hash: impl Into<String>, iteration: u64) -> Self {
        CacheMetadata {
            commit_hash: commit_hash.into(),
            iteration,
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            format_version: CACHE_FORMAT_VERSION.to_string(),
        }
    }
}

/// A decoded cache file.
#[derive(Debug, Clone)]
pub struct CachedAnalysis {
    pub metadata: CacheMetadata,
    pub bundle: AnalysisBundle,
    pub clusters: Option<ClusterResult>,
}

#[derive(Serialize)]
struct CacheFileRef<'a> {
    metadata: &'a CacheMetadata,
    analysis: &'a AnalysisBundle,
    #[serde(skip_serializing_if = "Option::is_none")]
    clusters: Option<&'a ClusterResult>,
}

#[derive(Deserialize)]
struct CacheFile {
    metadata: CacheMetadata,
    analysis: AnalysisBundle,
    #[serde(default)]
    clusters: Option<ClusterResult>,
}

#[derive(Deserialize)]
struct CacheHeader {
    metadata: CacheMetadata,
}

/// Persist a bundle. See [`save_analysis_with_clusters`].
pub fn save_analysis(
    path: &Path,
    bundle: &AnalysisBundle,
    commit_hash: &str,
    iteration: u64,
) -> Result<CacheMetadata, CacheError> {
    save_analysis_with_clusters(path, bundle, None, commit_hash, iteration)
}

/// Persist a bundle, and optionally its clustering, together with fresh
/// metadata.
///
/// The bundle is validated first; an invalid bundle is never written. The
/// file is written to a temporary sibling and renamed into place, so readers
/// see either the old cache or the new one.
pub fn save_analysis_with_clusters(
    path: &Path,
    bundle: &AnalysisBundle,
    clusters: Option<&ClusterResult>,
    commit_hash: &str,
    iteration: u64,
) -> Result<CacheMetadata, CacheError> {
    bundle.validate()?;

    let metadata = CacheMetadata::new(commit_hash, iteration);
    let file = CacheFileRef {
        metadata: &metadata,
        analysis: bundle,
        clusters,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    ensure_cache_dir(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, &file)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    tracing::debug!(
        path = %path.display(),
        nodes = bundle.call_graph.node_count(),
        edges = bundle.call_graph.edge_count(),
        iteration,
        "analysis cache saved"
    );
    Ok(metadata)
}

/// Read a cache file.
///
/// Returns `Ok(None)` when there is no file. Unreadable, undecodable,
/// structurally invalid or version-mismatched files are errors.
pub fn read_analysis(path: &Path) -> Result<Option<CachedAnalysis>, CacheError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;

    let header: CacheHeader = serde_json::from_str(&content)?;
    if header.metadata.format_version != CACHE_FORMAT_VERSION {
        return Err(CacheError::VersionMismatch {
            expected: CACHE_FORMAT_VERSION.to_string(),
            found: header.metadata.format_version,
        });
    }

    let file: CacheFile = serde_json::from_str(&content)?;
    file.analysis.validate()?;

    if let Some(clusters) = &file.clusters {
        if let Some(name) = clusters
            .assignments()
            .into_keys()
            .find(|name| !file.analysis.call_graph.contains(name))
        {
            return Err(CacheError::Corrupted(format!(
                "cached clustering names unknown node {name}"
            )));
        }
    }

    Ok(Some(CachedAnalysis {
        metadata: file.metadata,
        bundle: file.analysis,
        clusters: file.clusters,
    }))
}

/// Load a cache file, treating every failure as "no cache".
pub fn load_analysis(path: &Path) -> Option<CachedAnalysis> {
    match read_analysis(path) {
        Ok(cached) => cached,
        Err(e) => {
            tracing::warn!(path = %path.display(), "ignoring unusable analysis cache: {}", e);
            None
        }
    }
}

/// Read only the metadata of a cache file.
pub fn load_metadata(path: &Path) -> Option<CacheMetadata> {
    let content = std::fs::read_to_string(path).ok()?;
    let header: CacheHeader = serde_json::from_str(&content).ok()?;
    Some(header.metadata)
}
