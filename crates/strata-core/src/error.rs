//! Error types for graph construction, bundle integrity and the cache

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building a call graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// `add_edge` referenced a node that is not in the graph.
    #[error("cannot add edge {caller} -> {callee}: unknown endpoint {missing}")]
    UnknownEndpoint {
        caller: String,
        callee: String,
        missing: String,
    },
}

/// A bundle entry points at a node or file that no longer exists.
///
/// Seeing one of these means a bug in invalidation or in the producer of the
/// bundle, not a user error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("edge {caller} -> {callee} references missing node {missing}")]
    DanglingEdge {
        caller: String,
        callee: String,
        missing: String,
    },

    #[error("reference {name} points at untracked file {}", file.display())]
    DanglingReference { name: String, file: PathBuf },

    #[error("class hierarchy entry {class} points at untracked file {}", file.display())]
    DanglingHierarchy { class: String, file: PathBuf },

    #[error("class hierarchy entry {class} lists unknown class {related}")]
    DanglingHierarchyLink { class: String, related: String },

    #[error("package {package} lists untracked file {}", file.display())]
    DanglingPackageFile { package: String, file: PathBuf },

    #[error("package {package} links to removed package {related}")]
    DanglingPackageLink { package: String, related: String },

    #[error("entity {name} belongs to invalidated file {}", file.display())]
    InvalidatedEntity { name: String, file: PathBuf },
}

/// Errors from reading or writing the analysis cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("cache corrupted: {0}")]
    Corrupted(String),

    #[error("bundle failed integrity check: {0}")]
    Integrity(#[from] IntegrityError),
}
