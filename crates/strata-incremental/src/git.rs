//! Change detection through the `git` command line

use anyhow::{Context, Result, anyhow};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Source of the current revision and of the files changed since an older one.
pub trait ChangeDetector {
    /// Hash of the checked-out commit.
    fn current_commit(&self) -> Result<String>;

    /// Files changed since `commit`, relative to the repository root.
    /// Includes staged, unstaged, deleted and untracked files.
    fn changed_files(&self, commit: &str) -> Result<BTreeSet<PathBuf>>;

    /// Whether the working tree differs from the checked-out commit.
    fn has_uncommitted_changes(&self) -> Result<bool>;
}

/// [`ChangeDetector`] backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    /// Open the repository containing `path`.
    pub fn new(path: &Path) -> Result<Self> {
        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(path)
            .output()
            .context("Failed to run git")?;

        if !output.status.success() {
            return Err(anyhow!("Not a git repository: {}", path.display()));
        }

        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!(root = %root, "opened git repository");
        Ok(GitCli {
            root: PathBuf::from(root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject revisions that git would parse as options.
    fn validate_revision(revision: &str) -> Result<()> {
        if revision.is_empty() {
            return Err(anyhow!("Invalid revision: empty"));
        }
        if revision.starts_with('-') {
            return Err(anyhow!("Invalid revision: cannot start with '-'"));
        }
        if revision.contains('\0') || revision.chars().any(char::is_whitespace) {
            return Err(anyhow!("Invalid revision: {revision:?}"));
        }
        Ok(())
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .with_context(|| format!("Failed to run git {}", args.join(" ")))?;

        if !output.status.success() {
            let err = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), err.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ChangeDetector for GitCli {
    fn current_commit(&self) -> Result<String> {
        Ok(self.git(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    fn changed_files(&self, commit: &str) -> Result<BTreeSet<PathBuf>> {
        Self::validate_revision(commit)?;
        // Without rename detection a move lists both the old and the new path.
        let mut files = parse_name_list(&self.git(&[
            "diff",
            "--name-only",
            "--no-renames",
            "-z",
            commit,
            "--",
        ])?);
        files.extend(parse_name_list(&self.git(&[
            "ls-files",
            "--others",
            "--exclude-standard",
            "-z",
        ])?));
        tracing::debug!(since = commit, changed = files.len(), "collected changed files");
        Ok(files)
    }

    fn has_uncommitted_changes(&self) -> Result<bool> {
        Ok(!self.git(&["status", "--porcelain"])?.trim().is_empty())
    }
}

/// Paths of a NUL-separated (`-z`) git file list, taken verbatim.
pub fn parse_name_list(output: &str) -> BTreeSet<PathBuf> {
    output
        .split('\0')
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .collect()
}
