//! Integration tests for Strata
//!
//! These tests drive the analyzer, cache, orchestrator and CLI together.

use anyhow::Result;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use strata_core::{
    AnalysisBundle, AnalysisConfig, ChangeMagnitude, ClusterResult, Edge, Language, Node,
    NodeType, PackageRelation, StrataConfig,
};
use strata_incremental::{
    BundleFileAnalyzer, ChangeDetector, FileAnalysis, FileAnalyzer, IncrementalOrchestrator,
    ParallelAnalyzer, RunKind, StaticAnalyzer,
};
use tempfile::TempDir;

/// Reads a tiny Python subset: top-level `def name():` lines, calls written
/// as `name()` or `module.name()` on their own line, and `import module`.
struct MiniPython;

impl FileAnalyzer for MiniPython {
    fn language(&self) -> Language {
        Language::Python
    }

    fn analyze_file(&self, root: &Path, file: &Path) -> Result<FileAnalysis> {
        let content = fs::read_to_string(root.join(file))?;
        let module = file
            .with_extension("")
            .to_string_lossy()
            .replace(['/', '\\'], ".");

        let mut analysis = FileAnalysis::default();
        let mut package = PackageRelation::default();
        package.files.insert(file.to_path_buf());
        let mut current: Option<String> = None;

        for (index, line) in content.lines().enumerate() {
            let number = index as u32 + 1;
            let trimmed = line.trim();
            if let Some(rest) = line.strip_prefix("def ") {
                let name = rest.split('(').next().unwrap_or(rest).trim();
                let qualified = format!("{module}.{name}");
                analysis.nodes.push(Node::new(
                    &qualified,
                    file,
                    number,
                    number,
                    NodeType::Function,
                ));
                current = Some(qualified);
            } else if let Some(imported) = trimmed.strip_prefix("import ") {
                package.imports.insert(imported.trim().to_string());
            } else if let (Some(caller), Some(callee)) = (&current, trimmed.strip_suffix("()")) {
                let callee = if callee.contains('.') {
                    callee.to_string()
                } else {
                    format!("{module}.{callee}")
                };
                analysis.calls.push(Edge::new(caller.clone(), callee));
                if let Some(node) = analysis.nodes.last_mut() {
                    node.line_end = number;
                }
            }
        }

        analysis.packages.insert(module, package);
        Ok(analysis)
    }
}

/// Change detector answering from a mutable script.
struct ScriptedGit {
    commit: RefCell<String>,
    changed: RefCell<BTreeSet<PathBuf>>,
}

impl ScriptedGit {
    fn new(commit: &str) -> Self {
        ScriptedGit {
            commit: RefCell::new(commit.to_string()),
            changed: RefCell::new(BTreeSet::new()),
        }
    }

    fn advance(&self, commit: &str, changed: &[&str]) {
        self.commit.replace(commit.to_string());
        self.changed
            .replace(changed.iter().map(PathBuf::from).collect());
    }
}

impl ChangeDetector for ScriptedGit {
    fn current_commit(&self) -> Result<String> {
        Ok(self.commit.borrow().clone())
    }

    fn changed_files(&self, _commit: &str) -> Result<BTreeSet<PathBuf>> {
        Ok(self.changed.borrow().clone())
    }

    fn has_uncommitted_changes(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Three packages of mutually calling functions, plus test files and a
/// README that must never be analysed.
fn create_test_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("shop")).unwrap();
    fs::create_dir_all(root.join("tests")).unwrap();

    for (package, next) in [("orders", Some("billing")), ("billing", Some("users")), ("users", None)] {
        let mut source = String::new();
        if let Some(next) = next {
            source.push_str(&format!("import shop.{next}\n"));
        }
        for f in 0..4 {
            source.push_str(&format!("def {package}_{f}():\n"));
            for g in 0..4 {
                if g != f {
                    source.push_str(&format!("    {package}_{g}()\n"));
                }
            }
            if f == 0 {
                if let Some(next) = next {
                    source.push_str(&format!("    shop.{next}.{next}_0()\n"));
                }
            }
        }
        fs::write(root.join(format!("shop/{package}.py")), source).unwrap();
    }
    fs::write(root.join("tests/test_orders.py"), "def test_orders():\n    shop.orders.orders_0()\n").unwrap();
    fs::write(root.join("README.md"), "# shop\n").unwrap();
    dir
}

fn config() -> StrataConfig {
    let mut config = StrataConfig::default();
    config.clustering.target_clusters = 6;
    config.analysis = AnalysisConfig {
        languages: vec![Language::Python],
        workers: 2,
        exclude: vec!["tests/**".to_string()],
    };
    config
}

fn analyzer(config: &StrataConfig) -> ParallelAnalyzer<MiniPython> {
    ParallelAnalyzer::new(MiniPython, &config.analysis).unwrap()
}

fn sorted_edges(bundle: &AnalysisBundle) -> Vec<Edge> {
    let mut edges = bundle.call_graph.edges().to_vec();
    edges.sort();
    edges
}

#[test]
fn test_parallel_analyzer_discovers_and_assembles() {
    let repo = create_test_repo();
    let config = config();
    let analyzer = analyzer(&config);

    let files = analyzer.discover(repo.path()).unwrap();
    assert_eq!(
        files.into_iter().collect::<Vec<_>>(),
        vec![
            PathBuf::from("shop/billing.py"),
            PathBuf::from("shop/orders.py"),
            PathBuf::from("shop/users.py"),
        ]
    );

    let fresh = analyzer.analyze(repo.path(), None).unwrap();
    assert!(fresh.pending_calls.is_empty());
    let bundle = fresh.bundle;
    assert_eq!(bundle.call_graph.node_count(), 12);
    assert_eq!(bundle.call_graph.edge_count(), 3 * 12 + 2);
    assert!(bundle.call_graph.has_edge("shop.orders.orders_0", "shop.billing.billing_0"));
    assert!(bundle.package_relations["shop.orders"].imports.contains("shop.billing"));
    assert_eq!(bundle.validate(), Ok(()));

    let clusters = bundle.call_graph.cluster_with(&config.clustering);
    assert_eq!(clusters.len(), 3);
    assert_eq!(
        clusters.clusters_of_file(Path::new("shop/users.py")).map(BTreeSet::len),
        Some(1)
    );
}

#[test]
fn test_partial_analysis_reports_pending_calls() {
    let repo = create_test_repo();
    let analyzer = analyzer(&config());
    let changed: BTreeSet<PathBuf> = [PathBuf::from("shop/orders.py"), PathBuf::from("gone.py")]
        .into_iter()
        .collect();

    let fresh = analyzer.analyze(repo.path(), Some(&changed)).unwrap();
    assert_eq!(
        fresh.bundle.source_files,
        [PathBuf::from("shop/orders.py")].into_iter().collect()
    );
    assert_eq!(
        fresh.pending_calls,
        vec![Edge::new("shop.orders.orders_0", "shop.billing.billing_0")]
    );
}

#[test]
fn test_incremental_run_matches_full_analysis() {
    let repo = create_test_repo();
    let config = config();
    let orchestrator = IncrementalOrchestrator::new(
        repo.path(),
        Language::Python,
        analyzer(&config),
        ScriptedGit::new("c0"),
        &config,
    );

    let first = orchestrator.run().unwrap();
    assert_eq!(first.kind, RunKind::Full);
    assert_eq!(first.clusters.len(), 3);

    // billing gains a helper that users now calls.
    let billing = repo.path().join("shop/billing.py");
    let mut source = fs::read_to_string(&billing).unwrap();
    source.push_str("def billing_audit():\n    billing_1()\n");
    fs::write(&billing, source).unwrap();
    let users = repo.path().join("shop/users.py");
    let mut source = fs::read_to_string(&users).unwrap();
    source.push_str("def users_report():\n    users_0()\n    shop.billing.billing_audit()\n");
    fs::write(&users, source).unwrap();
    orchestrator
        .git()
        .advance("c1", &["shop/billing.py", "shop/users.py"]);

    let second = orchestrator.run().unwrap();
    assert_eq!(second.kind, RunKind::Incremental { changed_files: 2 });
    assert_eq!(second.metadata.as_ref().map(|m| m.iteration), Some(1));

    let full = analyzer(&config).analyze(repo.path(), None).unwrap().bundle;
    assert_eq!(
        second.bundle.call_graph.node_names().collect::<Vec<_>>(),
        full.call_graph.node_names().collect::<Vec<_>>()
    );
    assert_eq!(sorted_edges(&second.bundle), sorted_edges(&full));
    assert_eq!(second.bundle.source_files, full.source_files);
    assert_eq!(second.bundle.package_relations, full.package_relations);
    assert!(second.bundle.package_relations["shop.orders"].imports.contains("shop.billing"));

    let change = second.change.unwrap();
    assert!(change.removed_clusters.is_empty());
    assert!(change.new_clusters.is_empty());
    assert_eq!(change.magnitude, ChangeMagnitude::Small);

    let third = orchestrator.run().unwrap();
    assert_eq!(third.kind, RunKind::Cached);
    assert_eq!(third.clusters, second.clusters);
}

#[test]
fn test_bundle_file_analyzer_drives_orchestrator() {
    let repo = create_test_repo();
    let config = config();
    let bundle = analyzer(&config).analyze(repo.path(), None).unwrap().bundle;
    let exported = repo.path().join("export.json");
    fs::write(&exported, serde_json::to_string(&bundle).unwrap()).unwrap();

    let orchestrator = IncrementalOrchestrator::new(
        repo.path(),
        Language::Python,
        BundleFileAnalyzer::new(&exported),
        ScriptedGit::new("c0"),
        &config,
    );
    let first = orchestrator.run().unwrap();
    assert_eq!(first.kind, RunKind::Full);
    assert_eq!(first.bundle.call_graph.edge_count(), bundle.call_graph.edge_count());

    orchestrator.git().advance("c1", &["shop/orders.py"]);
    let second = orchestrator.run().unwrap();
    assert_eq!(second.kind, RunKind::Incremental { changed_files: 1 });
    assert_eq!(sorted_edges(&second.bundle), sorted_edges(&bundle));
}

fn strata(root: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_strata"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn test_cli_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_strata"))
        .arg("--help")
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("Incremental call-graph analysis"));
}

#[test]
fn test_cli_cluster_and_compare() {
    let repo = create_test_repo();
    let bundle = analyzer(&config()).analyze(repo.path(), None).unwrap().bundle;
    let exported = repo.path().join("export.json");
    fs::write(&exported, serde_json::to_string(&bundle).unwrap()).unwrap();

    let output = strata(repo.path(), &["cluster", exported.to_str().unwrap(), "--target", "6"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let result: ClusterResult = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result.len(), 3);

    let clusters = repo.path().join("clusters.json");
    fs::write(&clusters, &output.stdout).unwrap();
    let clusters = clusters.to_str().unwrap();
    let output = strata(repo.path(), &["compare", clusters, clusters]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["magnitude"], "small");
    assert_eq!(report["matches"].as_array().map(Vec::len), Some(3));
}

#[test]
fn test_cli_status_and_clear() {
    let repo = create_test_repo();
    fs::write(
        repo.path().join("strata.toml"),
        "[analysis]\nlanguages = [\"python\", \"go\"]\n",
    )
    .unwrap();
    fs::create_dir_all(repo.path().join(".strata")).unwrap();

    let output = strata(repo.path(), &["status"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status.as_array().map(Vec::len), Some(2));
    assert_eq!(status[1]["language"], "go");
    assert!(status[0]["metadata"].is_null());

    let output = strata(repo.path(), &["clear"]);
    assert!(output.status.success());
    assert!(!repo.path().join(".strata").exists());
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(["-c", "user.name=Strata", "-c", "user.email=strata@example.com"])
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
}

#[test]
fn test_cli_commands_share_repository_root() {
    let repo = create_test_repo();
    let bundle = analyzer(&config()).analyze(repo.path(), None).unwrap().bundle;
    let exported = repo.path().join("export.json");
    fs::write(&exported, serde_json::to_string(&bundle).unwrap()).unwrap();
    git(repo.path(), &["init", "-q"]);
    git(repo.path(), &["add", "-A"]);
    git(repo.path(), &["commit", "-q", "-m", "initial"]);

    let subdir = repo.path().join("shop");
    let output = strata(&subdir, &["analyze", "--bundle", exported.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(repo.path().join(".strata").join("python_analysis.json").is_file());
    assert!(!subdir.join(".strata").exists());

    let output = strata(&subdir, &["status"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status[0]["language"], "python");
    assert_eq!(status[0]["metadata"]["iteration"], 0);
    assert!(status[0]["metadata"]["commit_hash"].is_string());

    let output = strata(&subdir, &["clear"]);
    assert!(output.status.success());
    assert!(!repo.path().join(".strata").exists());
}

#[test]
fn test_cli_rejects_malformed_config() {
    let repo = create_test_repo();
    fs::write(repo.path().join("strata.toml"), "[clustering\n").unwrap();
    let output = strata(repo.path(), &["status"]);
    assert!(!output.status.success());
}
