//! Boundaries to the source repository and the retrieval service, with the
//! implementations shipped alongside the engine.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::errors::{RepositoryError, RetrievalError};
use crate::indexer::filesystem::normalize_path;
use crate::models::{Language, SymbolKind};

/// Read access to repository content by revision.
pub trait SourceRepository: Send + Sync {
    /// `Ok(None)` when the path does not exist at `revision`.
    fn read_file(&self, path: &str, revision: &str) -> Result<Option<String>, RepositoryError>;

    /// Paths whose content differs between two revisions, including paths
    /// present in only one of them. Sorted.
    fn list_changed_files(
        &self,
        from_revision: &str,
        to_revision: &str,
    ) -> Result<Vec<String>, RepositoryError>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub languages: Vec<Language>,
    #[serde(default)]
    pub kinds: Vec<SymbolKind>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub path: String,
    pub score: f64,
    pub symbol_name: Option<String>,
}

/// Ranked symbol/text search. Slow or failing backends are tolerated by the
/// caller.
pub trait Retrieval: Send + Sync {
    fn search(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchMatch>, RetrievalError>;
}

fn diff_trees(from: &BTreeMap<String, String>, to: &BTreeMap<String, String>) -> Vec<String> {
    let paths: BTreeSet<&String> = from.keys().chain(to.keys()).collect();
    paths
        .into_iter()
        .filter(|p| from.get(*p) != to.get(*p))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// In-memory repository
// ---------------------------------------------------------------------------

/// Revision → path → content maps.
#[derive(Clone, Debug, Default)]
pub struct MemoryRepository {
    revisions: BTreeMap<String, BTreeMap<String, String>>,
    failing_reads: BTreeSet<String>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_revision<I, P, C>(mut self, revision: &str, files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<String>,
    {
        let tree = self.revisions.entry(revision.to_string()).or_default();
        for (path, content) in files {
            tree.insert(normalize_path(path.as_ref()), content.into());
        }
        self
    }

    /// Make every read of `path` fail, for exercising error propagation.
    pub fn with_read_failure(mut self, path: &str) -> Self {
        self.failing_reads.insert(normalize_path(path));
        self
    }

    pub fn insert_file(&mut self, revision: &str, path: &str, content: impl Into<String>) {
        self.revisions
            .entry(revision.to_string())
            .or_default()
            .insert(normalize_path(path), content.into());
    }

    pub fn files(&self, revision: &str) -> Option<&BTreeMap<String, String>> {
        self.revisions.get(revision)
    }

    fn tree(&self, revision: &str) -> Result<&BTreeMap<String, String>, RepositoryError> {
        self.revisions
            .get(revision)
            .ok_or_else(|| RepositoryError::UnknownRevision(revision.to_string()))
    }
}

impl SourceRepository for MemoryRepository {
    fn read_file(&self, path: &str, revision: &str) -> Result<Option<String>, RepositoryError> {
        let path = normalize_path(path);
        if self.failing_reads.contains(&path) {
            return Err(RepositoryError::Read {
                path,
                revision: revision.to_string(),
                message: "injected read failure".to_string(),
            });
        }
        Ok(self.tree(revision)?.get(&path).cloned())
    }

    fn list_changed_files(
        &self,
        from_revision: &str,
        to_revision: &str,
    ) -> Result<Vec<String>, RepositoryError> {
        Ok(diff_trees(self.tree(from_revision)?, self.tree(to_revision)?))
    }
}

// ---------------------------------------------------------------------------
// Directory-per-revision repository
// ---------------------------------------------------------------------------

const IMPLICIT_IGNORED_DIRS: &[&str] = &[".git", ".planweave"];

/// One checked-out tree per revision: `<root>/<revision>/<path>`.
#[derive(Clone, Debug)]
pub struct SnapshotRepository {
    root: PathBuf,
}

impl SnapshotRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn revision_dir(&self, revision: &str) -> Result<PathBuf, RepositoryError> {
        let normalized = normalize_path(revision);
        if normalized.is_empty() || normalized.contains('/') {
            return Err(RepositoryError::UnknownRevision(revision.to_string()));
        }
        let dir = self.root.join(normalized);
        if !dir.is_dir() {
            return Err(RepositoryError::UnknownRevision(revision.to_string()));
        }
        Ok(dir)
    }

    /// Relative path → SHA-256 of the bytes, for every file in the tree.
    fn hash_tree(dir: &Path) -> Result<BTreeMap<String, String>, RepositoryError> {
        let mut hashes = BTreeMap::new();
        let walker = WalkDir::new(dir).sort_by_file_name().into_iter().filter_entry(|entry| {
            entry.depth() == 0
                || !IMPLICIT_IGNORED_DIRS
                    .iter()
                    .any(|ignored| entry.file_name() == *ignored)
        });
        for entry in walker {
            let entry = entry.map_err(|e| RepositoryError::Io(std::io::Error::other(e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let bytes = std::fs::read(entry.path())?;
            hashes.insert(relative, format!("{:x}", Sha256::digest(&bytes)));
        }
        Ok(hashes)
    }
}

impl SourceRepository for SnapshotRepository {
    fn read_file(&self, path: &str, revision: &str) -> Result<Option<String>, RepositoryError> {
        let dir = self.revision_dir(revision)?;
        let relative = normalize_path(path);
        let full = dir.join(&relative);
        if !full.is_file() {
            return Ok(None);
        }
        std::fs::read_to_string(&full)
            .map(Some)
            .map_err(|e| RepositoryError::Read {
                path: relative,
                revision: revision.to_string(),
                message: e.to_string(),
            })
    }

    fn list_changed_files(
        &self,
        from_revision: &str,
        to_revision: &str,
    ) -> Result<Vec<String>, RepositoryError> {
        let from = Self::hash_tree(&self.revision_dir(from_revision)?)?;
        let to = Self::hash_tree(&self.revision_dir(to_revision)?)?;
        Ok(diff_trees(&from, &to))
    }
}
