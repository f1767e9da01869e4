//! Symbol-level dependency graph for one (repository, revision).
//!
//! Symbols live in an arena keyed by file; every mutation replaces a whole
//! file. Bound edges are kept in one ordered map so iteration order, and
//! therefore everything derived from the graph, is deterministic.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::CacheError;
use crate::indexer::filesystem::to_module_name;
use crate::models::{
    EdgeKey, EdgeKind, EdgeOrigin, ParseResult, Reference, Symbol, SymbolId, SymbolKind,
    SNAPSHOT_SCHEMA_VERSION,
};
use crate::store::cycles::elementary_cycles;

const UNIQUE_BINDING_CONFIDENCE: f64 = 1.0;
const IMPORT_SCOPED_BINDING_CONFIDENCE: f64 = 0.7;
const GLOBAL_BINDING_CONFIDENCE: f64 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgeMeta {
    pub confidence: f64,
    pub origin: EdgeOrigin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeDirection {
    Outgoing,
    Incoming,
    Both,
}

/// A directly connected symbol as seen from the queried one.
#[derive(Clone, Debug, PartialEq)]
pub struct Neighbor {
    pub symbol: SymbolId,
    pub kind: EdgeKind,
    pub direction: EdgeDirection,
    pub confidence: f64,
}

/// Persisted form of a graph. Bindings are recomputed on load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub schema_version: u32,
    pub repository: String,
    pub revision: String,
    pub files: Vec<ParseResult>,
}

#[derive(Clone, Debug)]
pub struct DependencyGraph {
    repository: String,
    revision: String,
    version: u64,
    files: BTreeMap<String, ParseResult>,
    edges: BTreeMap<EdgeKey, EdgeMeta>,
    by_name: BTreeMap<String, BTreeSet<SymbolId>>,
}

fn is_self_receiver(receiver: Option<&str>) -> bool {
    matches!(receiver, None | Some("self") | Some("cls") | Some("this"))
}

fn owner_segment(id: &SymbolId) -> Option<&str> {
    let (owner, _) = id.qualified_name.rsplit_once('.')?;
    owner.rsplit('.').next()
}

fn min_symbol_id() -> SymbolId {
    SymbolId::new("", "")
}

impl DependencyGraph {
    pub fn new(repository: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            revision: revision.into(),
            version: 0,
            files: BTreeMap::new(),
            edges: BTreeMap::new(),
            by_name: BTreeMap::new(),
        }
    }

    /// Bulk-build a graph from parse results, binding once at the end.
    pub fn from_results(
        repository: impl Into<String>,
        revision: impl Into<String>,
        results: impl IntoIterator<Item = ParseResult>,
    ) -> Self {
        let mut graph = Self::new(repository, revision);
        for result in results {
            graph.index_symbols(&result);
            graph.files.insert(result.path.clone(), result);
        }
        graph.rebind_all();
        graph.version = 1;
        graph
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Bumped by every file transaction.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Re-label a cloned ancestor graph for the revision it is rebuilt into.
    pub fn rebase(&mut self, revision: impl Into<String>) {
        self.revision = revision.into();
        self.version += 1;
    }

    pub fn file_paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn contains_file(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn file(&self, path: &str) -> Option<&ParseResult> {
        self.files.get(path)
    }

    pub fn symbols_in_file(&self, path: &str) -> &[Symbol] {
        self.files
            .get(path)
            .map(|f| f.symbols.as_slice())
            .unwrap_or(&[])
    }

    pub fn symbol(&self, id: &SymbolId) -> Option<&Symbol> {
        self.files
            .get(&id.file)?
            .symbols
            .iter()
            .find(|s| s.id.qualified_name == id.qualified_name)
    }

    pub fn symbol_count(&self) -> usize {
        self.files.values().map(|f| f.symbols.len()).sum()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> impl Iterator<Item = (&EdgeKey, &EdgeMeta)> {
        self.edges.iter()
    }

    pub fn edge(&self, key: &EdgeKey) -> Option<&EdgeMeta> {
        self.edges.get(key)
    }

    /// References of a file that no symbol in the graph satisfies.
    pub fn unresolved_references(&self, path: &str) -> Vec<&Reference> {
        let Some(file) = self.files.get(path) else {
            return Vec::new();
        };
        file.references
            .iter()
            .filter(|r| {
                !self.outgoing(&r.from).any(|(key, meta)| {
                    meta.origin == EdgeOrigin::Resolved
                        && key.kind == r.kind
                        && match r.kind {
                            EdgeKind::Imports => r.candidates.contains(&key.target.file),
                            EdgeKind::Calls | EdgeKind::Inherits => self
                                .symbol(&key.target)
                                .is_some_and(|s| s.name == r.name),
                        }
                })
            })
            .collect()
    }

    /// Files this file's imports resolved to.
    pub fn imported_files(&self, path: &str) -> BTreeSet<String> {
        let Some(file) = self.files.get(path) else {
            return BTreeSet::new();
        };
        file.references
            .iter()
            .filter(|r| r.kind == EdgeKind::Imports)
            .filter_map(|r| r.candidates.iter().find(|c| self.files.contains_key(*c)))
            .filter(|c| c.as_str() != path)
            .cloned()
            .collect()
    }

    fn outgoing<'a>(
        &'a self,
        source: &SymbolId,
    ) -> impl Iterator<Item = (&'a EdgeKey, &'a EdgeMeta)> {
        let start = EdgeKey {
            source: source.clone(),
            kind: EdgeKind::Calls,
            target: min_symbol_id(),
        };
        let source = source.clone();
        self.edges
            .range(start..)
            .take_while(move |(key, _)| key.source == source)
    }

    /// Directly connected symbols over the given edge kinds. An empty
    /// `kinds` slice means every kind.
    pub fn neighbors(
        &self,
        symbol: &SymbolId,
        kinds: &[EdgeKind],
        direction: EdgeDirection,
    ) -> Vec<Neighbor> {
        let wanted = |kind: EdgeKind| kinds.is_empty() || kinds.contains(&kind);
        let mut out = Vec::new();
        if matches!(direction, EdgeDirection::Outgoing | EdgeDirection::Both) {
            for (key, meta) in self.outgoing(symbol) {
                if wanted(key.kind) {
                    out.push(Neighbor {
                        symbol: key.target.clone(),
                        kind: key.kind,
                        direction: EdgeDirection::Outgoing,
                        confidence: meta.confidence,
                    });
                }
            }
        }
        if matches!(direction, EdgeDirection::Incoming | EdgeDirection::Both) {
            for (key, meta) in &self.edges {
                if &key.target == symbol && wanted(key.kind) {
                    out.push(Neighbor {
                        symbol: key.source.clone(),
                        kind: key.kind,
                        direction: EdgeDirection::Incoming,
                        confidence: meta.confidence,
                    });
                }
            }
        }
        out
    }

    /// Elementary cycles among `subset`, over edges of every kind whose
    /// endpoints are both in the subset.
    pub fn find_cycles(&self, subset: &[SymbolId], max_cycles: usize) -> Vec<Vec<SymbolId>> {
        let nodes: Vec<SymbolId> = subset
            .iter()
            .filter(|id| self.symbol(id).is_some())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index: BTreeMap<&SymbolId, usize> =
            nodes.iter().enumerate().map(|(i, id)| (id, i)).collect();
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for key in self.edges.keys() {
            if let (Some(&s), Some(&t)) = (index.get(&key.source), index.get(&key.target)) {
                edges.push((s, t));
            }
        }
        let node_indices: Vec<usize> = (0..nodes.len()).collect();
        elementary_cycles(&node_indices, &edges, max_cycles)
            .into_iter()
            .map(|cycle| cycle.into_iter().map(|i| nodes[i].clone()).collect())
            .collect()
    }

    /// A graph holding exactly `paths` (those present here), bound from
    /// scratch. Extra files in this graph cannot influence the result.
    pub fn subgraph<'a>(&self, paths: impl IntoIterator<Item = &'a str>) -> DependencyGraph {
        let results: Vec<ParseResult> = paths
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|p| self.files.get(p).cloned())
            .collect();
        DependencyGraph::from_results(self.repository.clone(), self.revision.clone(), results)
    }

    /// Atomically replace everything `result.path` contributed. Returns the
    /// symbols whose incoming or outgoing edge sets changed.
    pub fn apply_file(&mut self, result: ParseResult) -> Vec<SymbolId> {
        let path = result.path.clone();
        self.replace_file(&path, Some(result))
    }

    /// Remove a file and every edge touching it.
    pub fn remove_file(&mut self, path: &str) -> Vec<SymbolId> {
        if !self.files.contains_key(path) {
            return Vec::new();
        }
        self.replace_file(path, None)
    }

    fn replace_file(&mut self, path: &str, result: Option<ParseResult>) -> Vec<SymbolId> {
        let mut names: BTreeSet<String> = BTreeSet::new();
        if let Some(old) = self.files.get(path) {
            names.extend(Self::binding_names(old));
        }
        if let Some(new) = &result {
            names.extend(Self::binding_names(new));
        }

        let dependents: BTreeSet<String> = self
            .files
            .iter()
            .filter(|(other, _)| other.as_str() != path)
            .filter(|(_, file)| {
                file.references.iter().any(|r| match r.kind {
                    EdgeKind::Imports => r.candidates.iter().any(|c| c == path),
                    EdgeKind::Calls | EdgeKind::Inherits => names.contains(&r.name),
                })
            })
            .map(|(other, _)| other.clone())
            .collect();

        let mut scope: BTreeSet<&str> = dependents.iter().map(String::as_str).collect();
        scope.insert(path);
        let before = self.edges_touching(&scope);

        // Drop the old contents and every edge touching them.
        if let Some(old) = self.files.remove(path) {
            self.unindex_symbols(&old);
        }
        self.edges
            .retain(|key, _| key.source.file != path && key.target.file != path);

        if let Some(new) = result {
            self.index_symbols(&new);
            for edge in &new.edges {
                self.edges.insert(
                    edge.key(),
                    EdgeMeta {
                        confidence: edge.confidence,
                        origin: EdgeOrigin::Local,
                    },
                );
            }
            self.files.insert(path.to_string(), new);
            self.bind_file(path);
        }

        for dependent in &dependents {
            self.edges.retain(|key, meta| {
                !(meta.origin == EdgeOrigin::Resolved && key.source.file == *dependent)
            });
            self.bind_file(dependent);
        }
        self.version += 1;

        let after = self.edges_touching(&scope);
        let mut changed: BTreeSet<SymbolId> = BTreeSet::new();
        for (key, meta) in before.iter() {
            if after.get(key) != Some(meta) {
                changed.insert(key.source.clone());
                changed.insert(key.target.clone());
            }
        }
        for (key, meta) in after.iter() {
            if before.get(key) != Some(meta) {
                changed.insert(key.source.clone());
                changed.insert(key.target.clone());
            }
        }
        debug!(
            path,
            version = self.version,
            dependents = dependents.len(),
            changed = changed.len(),
            "applied file transaction"
        );
        changed.into_iter().collect()
    }

    fn binding_names(file: &ParseResult) -> impl Iterator<Item = String> + '_ {
        file.symbols
            .iter()
            .filter(|s| s.kind != SymbolKind::Module)
            .map(|s| s.name.clone())
    }

    fn edges_touching(&self, files: &BTreeSet<&str>) -> BTreeMap<EdgeKey, EdgeMeta> {
        self.edges
            .iter()
            .filter(|(key, _)| {
                files.contains(key.source.file.as_str()) || files.contains(key.target.file.as_str())
            })
            .map(|(key, meta)| (key.clone(), *meta))
            .collect()
    }

    fn index_symbols(&mut self, file: &ParseResult) {
        for symbol in file.symbols.iter().filter(|s| s.kind != SymbolKind::Module) {
            self.by_name
                .entry(symbol.name.clone())
                .or_default()
                .insert(symbol.id.clone());
        }
    }

    fn unindex_symbols(&mut self, file: &ParseResult) {
        for symbol in file.symbols.iter().filter(|s| s.kind != SymbolKind::Module) {
            if let Some(ids) = self.by_name.get_mut(&symbol.name) {
                ids.remove(&symbol.id);
                if ids.is_empty() {
                    self.by_name.remove(&symbol.name);
                }
            }
        }
    }

    fn rebind_all(&mut self) {
        self.edges.clear();
        let paths: Vec<String> = self.files.keys().cloned().collect();
        for path in &paths {
            if let Some(file) = self.files.get(path) {
                let local: Vec<(EdgeKey, EdgeMeta)> = file
                    .edges
                    .iter()
                    .map(|e| {
                        (
                            e.key(),
                            EdgeMeta {
                                confidence: e.confidence,
                                origin: EdgeOrigin::Local,
                            },
                        )
                    })
                    .collect();
                self.edges.extend(local);
            }
        }
        for path in &paths {
            self.bind_file(path);
        }
    }

    fn bind_file(&mut self, path: &str) {
        let bindings = self.resolve_references(path);
        for (key, meta) in bindings {
            // A local edge always wins over a cross-file binding.
            self.edges.entry(key).or_insert(meta);
        }
    }

    /// Bind a file's references against the rest of the graph.
    fn resolve_references(&self, path: &str) -> Vec<(EdgeKey, EdgeMeta)> {
        let Some(file) = self.files.get(path) else {
            return Vec::new();
        };
        let imported = self.imported_files(path);
        let mut out = Vec::new();

        for reference in &file.references {
            match reference.kind {
                EdgeKind::Imports => {
                    let target_file = reference
                        .candidates
                        .iter()
                        .find(|c| c.as_str() != path && self.files.contains_key(*c));
                    let Some(target_file) = target_file else {
                        continue;
                    };
                    let target = SymbolId::new(target_file.as_str(), to_module_name(target_file));
                    if self.symbol(&target).is_none() {
                        continue;
                    }
                    out.push((
                        EdgeKey {
                            source: reference.from.clone(),
                            kind: EdgeKind::Imports,
                            target,
                        },
                        EdgeMeta {
                            confidence: UNIQUE_BINDING_CONFIDENCE,
                            origin: EdgeOrigin::Resolved,
                        },
                    ));
                }
                EdgeKind::Calls | EdgeKind::Inherits => {
                    for (target, confidence) in self.bind_by_name(path, reference, &imported) {
                        out.push((
                            EdgeKey {
                                source: reference.from.clone(),
                                kind: reference.kind,
                                target,
                            },
                            EdgeMeta {
                                confidence,
                                origin: EdgeOrigin::Resolved,
                            },
                        ));
                    }
                }
            }
        }
        out
    }

    fn bind_by_name(
        &self,
        path: &str,
        reference: &Reference,
        imported: &BTreeSet<String>,
    ) -> Vec<(SymbolId, f64)> {
        let Some(ids) = self.by_name.get(&reference.name) else {
            return Vec::new();
        };
        let mut candidates: Vec<&Symbol> = ids
            .iter()
            .filter(|id| id.file != path)
            .filter_map(|id| self.symbol(id))
            .filter(|s| match reference.kind {
                EdgeKind::Inherits => matches!(s.kind, SymbolKind::Class | SymbolKind::Interface),
                _ => s.kind != SymbolKind::Module,
            })
            .collect();

        // `recv.name(` narrows to methods of a matching type or functions of
        // a matching module when any exist.
        let receiver = reference.receiver.as_deref();
        if !is_self_receiver(receiver) {
            let receiver = receiver.unwrap_or("");
            let narrowed: Vec<&Symbol> = candidates
                .iter()
                .copied()
                .filter(|s| {
                    owner_segment(&s.id)
                        .map(|owner| owner.eq_ignore_ascii_case(receiver))
                        .unwrap_or(false)
                })
                .collect();
            if !narrowed.is_empty() {
                candidates = narrowed;
            }
        }

        if candidates.is_empty() {
            return Vec::new();
        }
        let scoped: Vec<&Symbol> = candidates
            .iter()
            .copied()
            .filter(|s| imported.contains(s.file()))
            .collect();
        let (chosen, multi_confidence) = if scoped.is_empty() {
            (candidates, GLOBAL_BINDING_CONFIDENCE)
        } else {
            (scoped, IMPORT_SCOPED_BINDING_CONFIDENCE)
        };
        let confidence = if chosen.len() == 1 {
            UNIQUE_BINDING_CONFIDENCE
        } else {
            multi_confidence
        };
        chosen
            .into_iter()
            .map(|s| (s.id.clone(), confidence))
            .collect()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            repository: self.repository.clone(),
            revision: self.revision.clone(),
            files: self.files.values().cloned().collect(),
        }
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self, CacheError> {
        if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(CacheError::Corrupt {
                repository: snapshot.repository,
                revision: snapshot.revision,
                message: format!(
                    "snapshot schema {} does not match {}",
                    snapshot.schema_version, SNAPSHOT_SCHEMA_VERSION
                ),
            });
        }
        Ok(Self::from_results(
            snapshot.repository,
            snapshot.revision,
            snapshot.files,
        ))
    }
}
