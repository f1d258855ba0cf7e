//! The analysis bundle: call graph plus the per-file facts persisted with it

use crate::error::IntegrityError;
use crate::graph::CallGraph;
use crate::model::{ClassHierarchy, Edge, Node, PackageRelation};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

/// Whether invalidation re-verifies referential integrity afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrityCheck {
    #[default]
    Verify,
    Skip,
}

impl IntegrityCheck {
    pub fn from_flag(verify: bool) -> Self {
        if verify {
            IntegrityCheck::Verify
        } else {
            IntegrityCheck::Skip
        }
    }
}

/// Everything one analysis run knows about a codebase.
///
/// Invariant: every edge endpoint is a node of `call_graph`, and every
/// reference, hierarchy entry and package file lives in `source_files`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "BundleRecord")]
pub struct AnalysisBundle {
    pub call_graph: CallGraph,
    pub class_hierarchies: BTreeMap<String, ClassHierarchy>,
    pub package_relations: BTreeMap<String, PackageRelation>,
    pub references: Vec<Node>,
    pub source_files: BTreeSet<PathBuf>,
}

/// Links from unchanged files into a set of changed files. Invalidation
/// prunes them; [`AnalysisBundle::restore_links`] puts back the ones whose
/// target exists again after the changed files were merged back in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrossFileLinks {
    pub calls: Vec<Edge>,
    hierarchies: BTreeMap<String, PrunedHierarchy>,
    /// `(package, imported package)` pairs.
    imports: Vec<(String, String)>,
    /// `(package, importing package)` pairs.
    imported_by: Vec<(String, String)>,
}

/// Hierarchy lists of a surviving class as they were before invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PrunedHierarchy {
    file: PathBuf,
    superclasses: Vec<String>,
    subclasses: Vec<String>,
    pruned: BTreeSet<String>,
}

impl CrossFileLinks {
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
            && self.hierarchies.is_empty()
            && self.imports.is_empty()
            && self.imported_by.is_empty()
    }
}

/// Names removed by an invalidation, kept for the post-check.
#[derive(Debug, Default)]
struct Removed {
    nodes: BTreeSet<String>,
    classes: BTreeSet<String>,
    packages: BTreeSet<String>,
}

impl AnalysisBundle {
    pub fn new() -> Self {
        AnalysisBundle::default()
    }

    pub fn tracks_file(&self, file: &Path) -> bool {
        self.source_files.contains(file)
    }

    /// Check the bundle invariant.
    pub fn validate(&self) -> Result<(), IntegrityError> {
        for edge in self.call_graph.edges() {
            for endpoint in [&edge.source, &edge.target] {
                if !self.call_graph.contains(endpoint) {
                    return Err(IntegrityError::DanglingEdge {
                        caller: edge.source.clone(),
                        callee: edge.target.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
        }

        if let Some(reference) = self
            .references
            .iter()
            .find(|r| !self.tracks_file(&r.file_path))
        {
            return Err(IntegrityError::DanglingReference {
                name: reference.name.clone(),
                file: reference.file_path.clone(),
            });
        }

        if let Some((class, entry)) = self
            .class_hierarchies
            .iter()
            .find(|(_, h)| !self.tracks_file(&h.file_path))
        {
            return Err(IntegrityError::DanglingHierarchy {
                class: class.clone(),
                file: entry.file_path.clone(),
            });
        }

        for (package, relation) in &self.package_relations {
            if let Some(file) = relation.files.iter().find(|f| !self.tracks_file(f)) {
                return Err(IntegrityError::DanglingPackageFile {
                    package: package.clone(),
                    file: file.clone(),
                });
            }
        }

        Ok(())
    }

    /// Remove every node, edge, hierarchy entry, package file, reference and
    /// source file that belongs to one of `changed_files`.
    ///
    /// With [`IntegrityCheck::Verify`] the result is checked for anything
    /// still pointing at removed data; a failure there is a bug.
    pub fn invalidate(
        &self,
        changed_files: &BTreeSet<PathBuf>,
        check: IntegrityCheck,
    ) -> Result<AnalysisBundle, IntegrityError> {
        let changed = |file: &Path| changed_files.contains(file);
        let mut removed = Removed::default();

        removed.nodes = self
            .call_graph
            .nodes()
            .filter(|n| changed(&n.file_path))
            .map(|n| n.name.clone())
            .collect();
        let call_graph = self.call_graph.filtered(|n| !changed(&n.file_path));

        removed.classes = self
            .class_hierarchies
            .iter()
            .filter(|(_, h)| changed(&h.file_path))
            .map(|(name, _)| name.clone())
            .collect();
        let class_hierarchies = self
            .class_hierarchies
            .iter()
            .filter(|(name, _)| !removed.classes.contains(*name))
            .map(|(name, entry)| {
                let mut entry = entry.clone();
                entry.superclasses.retain(|c| !removed.classes.contains(c));
                entry.subclasses.retain(|c| !removed.classes.contains(c));
                (name.clone(), entry)
            })
            .collect();

        let mut package_relations = BTreeMap::new();
        for (name, relation) in &self.package_relations {
            let mut relation = relation.clone();
            relation.files.retain(|f| !changed(f));
            if relation.files.is_empty() {
                removed.packages.insert(name.clone());
            } else {
                package_relations.insert(name.clone(), relation);
            }
        }
        for relation in package_relations.values_mut() {
            relation.imports.retain(|p| !removed.packages.contains(p));
            relation.imported_by.retain(|p| !removed.packages.contains(p));
        }

        let references = self
            .references
            .iter()
            .filter(|r| !changed(&r.file_path))
            .cloned()
            .collect();
        let source_files = self
            .source_files
            .iter()
            .filter(|f| !changed(f))
            .cloned()
            .collect();

        let bundle = AnalysisBundle {
            call_graph,
            class_hierarchies,
            package_relations,
            references,
            source_files,
        };

        tracing::debug!(
            changed_files = changed_files.len(),
            removed_nodes = removed.nodes.len(),
            removed_classes = removed.classes.len(),
            removed_packages = removed.packages.len(),
            "invalidated bundle"
        );

        if check == IntegrityCheck::Verify {
            bundle.verify_invalidation(changed_files, &removed)?;
        }
        Ok(bundle)
    }

    /// Calls from files outside `changed_files` into files inside it. These
    /// are lost by [`AnalysisBundle::invalidate`] and can be re-added once
    /// the changed files have been analysed again.
    pub fn inbound_calls(&self, changed_files: &BTreeSet<PathBuf>) -> Vec<Edge> {
        let in_changed = |name: &str| {
            self.call_graph
                .node(name)
                .map(|n| changed_files.contains(&n.file_path))
        };
        self.call_graph
            .edges()
            .iter()
            .filter(|e| in_changed(&e.source) == Some(false) && in_changed(&e.target) == Some(true))
            .cloned()
            .collect()
    }

    /// Every link [`AnalysisBundle::invalidate`] would prune from data that
    /// survives it: inbound calls, hierarchy links to classes defined in
    /// `changed_files`, and import links to packages left without files.
    pub fn cross_file_links(&self, changed_files: &BTreeSet<PathBuf>) -> CrossFileLinks {
        let changed = |file: &Path| changed_files.contains(file);

        let removed_classes: BTreeSet<&String> = self
            .class_hierarchies
            .iter()
            .filter(|(_, h)| changed(&h.file_path))
            .map(|(name, _)| name)
            .collect();
        let mut hierarchies = BTreeMap::new();
        for (name, entry) in &self.class_hierarchies {
            if changed(&entry.file_path) {
                continue;
            }
            let pruned: BTreeSet<String> = entry
                .superclasses
                .iter()
                .chain(&entry.subclasses)
                .filter(|c| removed_classes.contains(c))
                .cloned()
                .collect();
            if !pruned.is_empty() {
                hierarchies.insert(
                    name.clone(),
                    PrunedHierarchy {
                        file: entry.file_path.clone(),
                        superclasses: entry.superclasses.clone(),
                        subclasses: entry.subclasses.clone(),
                        pruned,
                    },
                );
            }
        }

        let removed_packages: BTreeSet<&String> = self
            .package_relations
            .iter()
            .filter(|(_, r)| r.files.iter().all(|f| changed(f)))
            .map(|(name, _)| name)
            .collect();
        let mut imports = Vec::new();
        let mut imported_by = Vec::new();
        for (name, relation) in &self.package_relations {
            if removed_packages.contains(name) {
                continue;
            }
            for target in relation.imports.iter().filter(|p| removed_packages.contains(p)) {
                imports.push((name.clone(), target.clone()));
            }
            for source in relation.imported_by.iter().filter(|p| removed_packages.contains(p)) {
                imported_by.push((name.clone(), source.clone()));
            }
        }

        CrossFileLinks {
            calls: self.inbound_calls(changed_files),
            hierarchies,
            imports,
            imported_by,
        }
    }

    /// Re-add links captured by [`AnalysisBundle::cross_file_links`] whose
    /// target is known again. Returns how many calls could not be restored.
    pub fn restore_links(&mut self, links: &CrossFileLinks) -> usize {
        let unresolved = self.call_graph.extend_edges(&links.calls);

        let classes: BTreeSet<String> = self.class_hierarchies.keys().cloned().collect();
        let keep = |c: &String, pruned: &BTreeSet<String>| !pruned.contains(c) || classes.contains(c);
        for (name, before) in &links.hierarchies {
            let Some(entry) = self.class_hierarchies.get_mut(name) else {
                continue;
            };
            if entry.file_path != before.file {
                continue;
            }
            entry.superclasses = before
                .superclasses
                .iter()
                .filter(|c| keep(*c, &before.pruned))
                .cloned()
                .collect();
            entry.subclasses = before
                .subclasses
                .iter()
                .filter(|c| keep(*c, &before.pruned))
                .cloned()
                .collect();
        }

        let packages: BTreeSet<String> = self.package_relations.keys().cloned().collect();
        for (name, target) in &links.imports {
            if let (Some(relation), true) =
                (self.package_relations.get_mut(name), packages.contains(target))
            {
                relation.imports.insert(target.clone());
            }
        }
        for (name, source) in &links.imported_by {
            if let (Some(relation), true) =
                (self.package_relations.get_mut(name), packages.contains(source))
            {
                relation.imported_by.insert(source.clone());
            }
        }

        unresolved
    }

    fn verify_invalidation(
        &self,
        changed_files: &BTreeSet<PathBuf>,
        removed: &Removed,
    ) -> Result<(), IntegrityError> {
        self.validate()?;

        if let Some(node) = self
            .call_graph
            .nodes()
            .chain(self.references.iter())
            .find(|n| changed_files.contains(&n.file_path))
        {
            return Err(IntegrityError::InvalidatedEntity {
                name: node.name.clone(),
                file: node.file_path.clone(),
            });
        }

        if let Some(edge) = self
            .call_graph
            .edges()
            .iter()
            .find(|e| removed.nodes.contains(&e.source) || removed.nodes.contains(&e.target))
        {
            let missing = if removed.nodes.contains(&edge.source) {
                &edge.source
            } else {
                &edge.target
            };
            return Err(IntegrityError::DanglingEdge {
                caller: edge.source.clone(),
                callee: edge.target.clone(),
                missing: missing.clone(),
            });
        }

        for (class, entry) in &self.class_hierarchies {
            if let Some(related) = entry
                .superclasses
                .iter()
                .chain(entry.subclasses.iter())
                .find(|c| removed.classes.contains(*c))
            {
                return Err(IntegrityError::DanglingHierarchyLink {
                    class: class.clone(),
                    related: related.clone(),
                });
            }
        }

        for (package, relation) in &self.package_relations {
            if let Some(file) = relation.files.iter().find(|f| changed_files.contains(*f)) {
                return Err(IntegrityError::DanglingPackageFile {
                    package: package.clone(),
                    file: file.clone(),
                });
            }
            if let Some(gone) = relation
                .imports
                .iter()
                .chain(relation.imported_by.iter())
                .find(|p| removed.packages.contains(*p))
            {
                return Err(IntegrityError::DanglingPackageLink {
                    package: package.clone(),
                    related: gone.clone(),
                });
            }
        }

        Ok(())
    }

    /// Combine a cached bundle with a fresh analysis of some files.
    ///
    /// For every file in `fresh.source_files` only `fresh`'s data survives.
    /// Everything `cached` knows about other files is kept. Fresh nodes win
    /// name collisions, duplicate edges collapse, and edges left without an
    /// endpoint are dropped.
    pub fn merge(cached: &AnalysisBundle, fresh: &AnalysisBundle) -> AnalysisBundle {
        let owned = |file: &Path| fresh.source_files.contains(file);

        let mut call_graph = CallGraph::new();
        for node in fresh.call_graph.nodes() {
            call_graph.add_node(node.clone());
        }
        for node in cached.call_graph.nodes().filter(|n| !owned(&n.file_path)) {
            call_graph.add_node(node.clone());
        }

        let cached_edges = cached.call_graph.edges().iter().filter(|e| {
            cached
                .call_graph
                .node(&e.source)
                .is_some_and(|caller| !owned(&caller.file_path))
        });
        let dropped = call_graph.extend_edges(fresh.call_graph.edges().iter().chain(cached_edges));
        if dropped > 0 {
            tracing::debug!(dropped, "dropped edges with missing endpoints while merging");
        }

        let mut class_hierarchies: BTreeMap<String, ClassHierarchy> = cached
            .class_hierarchies
            .iter()
            .filter(|(_, h)| !owned(&h.file_path))
            .map(|(name, h)| (name.clone(), h.clone()))
            .collect();
        for (name, entry) in &fresh.class_hierarchies {
            class_hierarchies.insert(name.clone(), entry.clone());
        }

        let mut package_relations: BTreeMap<String, PackageRelation> = BTreeMap::new();
        for (name, relation) in &cached.package_relations {
            let mut relation = relation.clone();
            relation.files.retain(|f| !owned(f));
            if !relation.files.is_empty() {
                package_relations.insert(name.clone(), relation);
            }
        }
        for (name, relation) in &fresh.package_relations {
            match package_relations.get_mut(name) {
                Some(existing) => {
                    existing.files.extend(relation.files.iter().cloned());
                    existing.imports.extend(relation.imports.iter().cloned());
                    existing.imported_by.extend(relation.imported_by.iter().cloned());
                }
                None => {
                    package_relations.insert(name.clone(), relation.clone());
                }
            }
        }

        let mut seen: HashSet<(String, PathBuf, u32)> = HashSet::new();
        let references = fresh
            .references
            .iter()
            .chain(cached.references.iter().filter(|r| !owned(&r.file_path)))
            .filter(|r| seen.insert((r.name.clone(), r.file_path.clone(), r.line_start)))
            .cloned()
            .collect();

        let source_files = cached
            .source_files
            .union(&fresh.source_files)
            .cloned()
            .collect();

        AnalysisBundle {
            call_graph,
            class_hierarchies,
            package_relations,
            references,
            source_files,
        }
    }
}

/// On-disk shape of a bundle.
#[derive(Deserialize)]
struct BundleRecord {
    nodes: BTreeMap<String, Node>,
    edges: Vec<Edge>,
    #[serde(default)]
    class_hierarchies: BTreeMap<String, ClassHierarchy>,
    #[serde(default)]
    package_relations: BTreeMap<String, PackageRelation>,
    #[serde(default)]
    references: Vec<Node>,
    source_files: BTreeSet<PathBuf>,
}

impl TryFrom<BundleRecord> for AnalysisBundle {
    type Error = String;

    fn try_from(record: BundleRecord) -> Result<Self, Self::Error> {
        if let Some((key, node)) = record.nodes.iter().find(|(key, node)| **key != node.name) {
            return Err(format!("node stored under {key} is named {}", node.name));
        }
        let call_graph = CallGraph::from_parts(record.nodes.into_values(), record.edges)
            .map_err(|e| e.to_string())?;
        Ok(AnalysisBundle {
            call_graph,
            class_hierarchies: record.class_hierarchies,
            package_relations: record.package_relations,
            references: record.references,
            source_files: record.source_files,
        })
    }
}

impl Serialize for AnalysisBundle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let nodes: BTreeMap<&str, &Node> = self
            .call_graph
            .nodes()
            .map(|n| (n.name.as_str(), n))
            .collect();

        let mut state = serializer.serialize_struct("AnalysisBundle", 6)?;
        state.serialize_field("nodes", &nodes)?;
        state.serialize_field("edges", self.call_graph.edges())?;
        state.serialize_field("class_hierarchies", &self.class_hierarchies)?;
        state.serialize_field("package_relations", &self.package_relations)?;
        state.serialize_field("references", &self.references)?;
        state.serialize_field("source_files", &self.source_files)?;
        state.end()
    }
}
