//! `strata.toml` configuration

use crate::bundle::IntegrityCheck;
use crate::cache::CacheConfig;
use crate::cluster::ClusterConfig;
use crate::diff::ClusterChangeAnalyzer;
use crate::model::Language;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file name, looked up at the repository root.
pub const CONFIG_FILE: &str = "strata.toml";

/// `[analysis]` section: which files the per-file analyzer looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub languages: Vec<Language>,
    /// Size of the per-file analysis pool.
    pub workers: usize,
    /// Glob patterns, relative to the root, of files never analysed.
    pub exclude: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            languages: vec![Language::Python],
            workers: 4,
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub clustering: ClusterConfig,
    pub cache: CacheConfig,
    pub change: ClusterChangeAnalyzer,
    pub analysis: AnalysisConfig,
}

impl StrataConfig {
    /// Load `strata.toml` from `root`. A missing file yields the defaults;
    /// a malformed one is an error.
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(StrataConfig::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: StrataConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.clustering.target_clusters == 0 {
            anyhow::bail!("clustering.target_clusters must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.change.similarity_threshold) {
            anyhow::bail!(
                "change.similarity_threshold must be within 0..=1, got {}",
                self.change.similarity_threshold
            );
        }
        if self.analysis.workers == 0 {
            anyhow::bail!("analysis.workers must be at least 1");
        }
        Ok(())
    }

    /// Cache directory for `root`.
    pub fn cache_dir(&self, root: &Path) -> PathBuf {
        self.cache.resolve(root)
    }

    pub fn integrity_check(&self) -> IntegrityCheck {
        IntegrityCheck::from_flag(self.cache.verify_integrity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = StrataConfig::load(dir.path()).unwrap();
        assert_eq!(config, StrataConfig::default());
        assert_eq!(config.clustering.target_clusters, 20);
        assert_eq!(config.clustering.min_cluster_size, 2);
        assert_eq!(config.clustering.seed, 42);
        assert_eq!(config.change.similarity_threshold, 0.5);
        assert_eq!(config.change.big_change_threshold, 3);
        assert_eq!(config.cache_dir(dir.path()), dir.path().join(".strata"));
        assert_eq!(config.integrity_check(), IntegrityCheck::Verify);
    }

    #[test]
    fn test_partial_file() {
        let config = StrataConfig::from_toml_str(
            r#"
[clustering]
target_clusters = 8

[cache]
verify_integrity = false

[analysis]
languages = ["python", "typescript"]
exclude = ["tests/**"]
"#,
        )
        .unwrap();
        assert_eq!(config.clustering.target_clusters, 8);
        assert_eq!(config.clustering.seed, 42);
        assert_eq!(config.cache.dir, PathBuf::from(".strata"));
        assert_eq!(config.integrity_check(), IntegrityCheck::Skip);
        assert_eq!(
            config.analysis.languages,
            vec![Language::Python, Language::TypeScript]
        );
        assert_eq!(config.analysis.workers, 4);
        assert_eq!(config.analysis.exclude, vec!["tests/**".to_string()]);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[clustering\ntarget = ").unwrap();
        assert!(StrataConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        assert!(StrataConfig::from_toml_str("[change]\nsimilarity_threshold = 1.5").is_err());
        assert!(StrataConfig::from_toml_str("[clustering]\ntarget_clusters = 0").is_err());
        assert!(StrataConfig::from_toml_str("[analysis]\nworkers = 0").is_err());
    }
}
