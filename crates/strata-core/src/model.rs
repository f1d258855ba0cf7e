//! Core data structures for the call graph and analysis bundle

use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Discriminates what kind of code entity a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Function,
    Method,
    Class,
    Property,
    Field,
    Variable,
    Constant,
}

/// A uniquely named code entity.
///
/// Identity is the fully-qualified `name`; two nodes with the same name are
/// equal regardless of any other attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(rename = "file")]
    pub file_path: PathBuf,
    pub line_start: u32,
    pub line_end: u32,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Names this node calls. Rebuilt from the edge list, never persisted.
    #[serde(skip)]
    pub callees: BTreeSet<String>,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        file_path: impl Into<PathBuf>,
        line_start: u32,
        line_end: u32,
        node_type: NodeType,
    ) -> Self {
        Node {
            name: name.into(),
            file_path: file_path.into(),
            line_start,
            line_end,
            node_type,
            callees: BTreeSet::new(),
        }
    }

    /// Whether this entity can take part in the call graph.
    pub fn is_callable(&self) -> bool {
        matches!(self.node_type, NodeType::Function | NodeType::Method)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// A directed "calls" relationship. Serialized as a `[caller, callee]` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct Edge {
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Edge {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl From<(String, String)> for Edge {
    fn from((source, target): (String, String)) -> Self {
        Edge { source, target }
    }
}

impl From<Edge> for (String, String) {
    fn from(edge: Edge) -> Self {
        (edge.source, edge.target)
    }
}

/// Inheritance facts for one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassHierarchy {
    #[serde(default)]
    pub superclasses: Vec<String>,
    #[serde(default)]
    pub subclasses: Vec<String>,
    #[serde(rename = "file")]
    pub file_path: PathBuf,
    pub line_start: u32,
    pub line_end: u32,
}

/// Import relationships of one package and the files that make it up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRelation {
    #[serde(default)]
    pub imports: BTreeSet<String>,
    #[serde(default)]
    pub imported_by: BTreeSet<String>,
    #[serde(default)]
    pub files: BTreeSet<PathBuf>,
}

/// Languages tracked by the analysis. Each gets its own cache file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    TypeScript,
    JavaScript,
    Java,
    Go,
    Rust,
    Php,
    CSharp,
}

impl Language {
    /// Detect language from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("py") | Some("pyi") => Some(Language::Python),
            Some("ts") | Some("tsx") => Some(Language::TypeScript),
            Some("js") | Some("jsx") | Some("mjs") | Some("cjs") => Some(Language::JavaScript),
            Some("java") => Some(Language::Java),
            Some("go") => Some(Language::Go),
            Some("rs") => Some(Language::Rust),
            Some("php") => Some(Language::Php),
            Some("cs") => Some(Language::CSharp),
            _ => None,
        }
    }

    /// Lower-case identifier used in cache file names and config.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Php => "php",
            Language::CSharp => "csharp",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "typescript" | "ts" => Ok(Language::TypeScript),
            "javascript" | "js" => Ok(Language::JavaScript),
            "java" => Ok(Language::Java),
            "go" => Ok(Language::Go),
            "rust" | "rs" => Ok(Language::Rust),
            "php" => Ok(Language::Php),
            "csharp" | "cs" => Ok(Language::CSharp),
            other => Err(format!("unsupported language: {other}")),
        }
    }
}
