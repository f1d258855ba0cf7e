//! Test utilities for strata-core

use crate::bundle::AnalysisBundle;
use crate::graph::CallGraph;
use crate::model::{ClassHierarchy, Node, NodeType, PackageRelation};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// `modules` densely connected groups of `size` methods, each group in its
/// own file, joined in a chain by one edge between consecutive groups.
pub fn modular_graph(modules: usize, size: usize) -> CallGraph {
    let mut graph = CallGraph::new();
    for m in 0..modules {
        for f in 0..size {
            graph.add_node(Node::new(
                format!("m{m}.C.f{f}"),
                format!("m{m}.py"),
                (f * 10 + 1) as u32,
                (f * 10 + 8) as u32,
                NodeType::Method,
            ));
        }
    }
    for m in 0..modules {
        for a in 0..size {
            for b in 0..size {
                if a != b {
                    graph
                        .add_edge(&format!("m{m}.C.f{a}"), &format!("m{m}.C.f{b}"))
                        .unwrap();
                }
            }
        }
        if m + 1 < modules {
            graph
                .add_edge(&format!("m{m}.C.f0"), &format!("m{}.C.f0", m + 1))
                .unwrap();
        }
    }
    graph
}

/// `len` functions in one file, each calling the next.
pub fn chain_graph(len: usize) -> CallGraph {
    let mut graph = CallGraph::new();
    for i in 0..len {
        graph.add_node(Node::new(
            format!("chain.f{i}"),
            "chain.py",
            (i * 5 + 1) as u32,
            (i * 5 + 4) as u32,
            NodeType::Function,
        ));
    }
    for i in 1..len {
        graph
            .add_edge(&format!("chain.f{}", i - 1), &format!("chain.f{i}"))
            .unwrap();
    }
    graph
}

/// Path set from string literals.
pub fn set(paths: &[&str]) -> BTreeSet<PathBuf> {
    paths.iter().map(PathBuf::from).collect()
}

fn hierarchy(file: &str, supers: &[&str], subs: &[&str], start: u32, end: u32) -> ClassHierarchy {
    ClassHierarchy {
        superclasses: supers.iter().map(|s| s.to_string()).collect(),
        subclasses: subs.iter().map(|s| s.to_string()).collect(),
        file_path: PathBuf::from(file),
        line_start: start,
        line_end: end,
    }
}

fn package(files: &[&str], imports: &[&str], imported_by: &[&str]) -> PackageRelation {
    PackageRelation {
        imports: imports.iter().map(|s| s.to_string()).collect(),
        imported_by: imported_by.iter().map(|s| s.to_string()).collect(),
        files: set(files),
    }
}

/// A small three-file web app: an API module calling into a database class
/// and its cached subclass.
pub fn sample_bundle() -> AnalysisBundle {
    let mut graph = CallGraph::new();
    let nodes = [
        ("app.api.handle", "app/api.py", 1, 12, NodeType::Function),
        ("app.api.validate", "app/api.py", 14, 20, NodeType::Function),
        ("app.db.Database", "app/db.py", 1, 40, NodeType::Class),
        ("app.db.Database.query", "app/db.py", 5, 15, NodeType::Method),
        ("app.db.Database.connect", "app/db.py", 17, 30, NodeType::Method),
        ("app.db_ext.CachedDatabase", "app/db_ext.py", 1, 25, NodeType::Class),
        ("app.db_ext.CachedDatabase.query", "app/db_ext.py", 4, 20, NodeType::Method),
    ];
    for (name, file, start, end, kind) in nodes {
        graph.add_node(Node::new(name, file, start, end, kind));
    }
    for (caller, callee) in [
        ("app.api.handle", "app.api.validate"),
        ("app.api.handle", "app.db.Database.query"),
        ("app.db.Database.query", "app.db.Database.connect"),
        ("app.db_ext.CachedDatabase.query", "app.db.Database.query"),
    ] {
        graph.add_edge(caller, callee).unwrap();
    }

    let mut bundle = AnalysisBundle::new();
    bundle.call_graph = graph;
    bundle.class_hierarchies.insert(
        "app.db.Database".into(),
        hierarchy("app/db.py", &[], &["app.db_ext.CachedDatabase"], 1, 40),
    );
    bundle.class_hierarchies.insert(
        "app.db_ext.CachedDatabase".into(),
        hierarchy("app/db_ext.py", &["app.db.Database"], &[], 1, 25),
    );
    bundle
        .package_relations
        .insert("app.api".into(), package(&["app/api.py"], &["app.db"], &[]));
    bundle.package_relations.insert(
        "app.db".into(),
        package(&["app/db.py"], &[], &["app.api", "app.db_ext"]),
    );
    bundle
        .package_relations
        .insert("app.db_ext".into(), package(&["app/db_ext.py"], &["app.db"], &[]));
    bundle.references = vec![
        Node::new("app.db.Database", "app/api.py", 3, 3, NodeType::Class),
        Node::new("app.db.Database", "app/db_ext.py", 1, 1, NodeType::Class),
        Node::new("app.db.Database.connect", "app/db.py", 8, 8, NodeType::Method),
    ];
    bundle.source_files = set(&["app/api.py", "app/db.py", "app/db_ext.py"]);
    bundle
}
