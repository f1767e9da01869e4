//! Graph caches keyed by exact (repository, revision).
//!
//! A cache is only a shortcut: every failure maps to [`CacheError`] and the
//! engine falls back to parsing.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use indexmap::IndexMap;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::errors::CacheError;
use crate::store::graph::{DependencyGraph, GraphSnapshot};
use crate::store::schema;
use crate::store::GraphKey;

pub trait GraphCache: Send + Sync {
    /// The graph built for exactly `key`, if present.
    fn get(&self, key: &GraphKey) -> Result<Option<DependencyGraph>, CacheError>;

    fn put(&self, key: &GraphKey, graph: &DependencyGraph) -> Result<(), CacheError>;

    fn len(&self) -> Result<usize, CacheError>;
}

struct MemoryEntry {
    graph: DependencyGraph,
    last_access: SystemTime,
}

/// In-process LRU cache. Least recently used entries sit at the front.
pub struct MemoryGraphCache {
    max_entries: usize,
    entries: Mutex<IndexMap<GraphKey, MemoryEntry>>,
}

impl MemoryGraphCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: Mutex::new(IndexMap::new()),
        }
    }

    pub fn last_access(&self, key: &GraphKey) -> Option<SystemTime> {
        self.entries.lock().get(key).map(|e| e.last_access)
    }

    pub fn keys(&self) -> Vec<GraphKey> {
        self.entries.lock().keys().cloned().collect()
    }
}

impl GraphCache for MemoryGraphCache {
    fn get(&self, key: &GraphKey) -> Result<Option<DependencyGraph>, CacheError> {
        let mut entries = self.entries.lock();
        // Move to end for LRU
        let Some(mut entry) = entries.shift_remove(key) else {
            return Ok(None);
        };
        entry.last_access = SystemTime::now();
        let graph = entry.graph.clone();
        entries.insert(key.clone(), entry);
        Ok(Some(graph))
    }

    fn put(&self, key: &GraphKey, graph: &DependencyGraph) -> Result<(), CacheError> {
        let mut entries = self.entries.lock();
        entries.shift_remove(key);
        entries.insert(
            key.clone(),
            MemoryEntry {
                graph: graph.clone(),
                last_access: SystemTime::now(),
            },
        );
        while entries.len() > self.max_entries {
            if let Some((evicted, _)) = entries.shift_remove_index(0) {
                debug!(key = %evicted, "evicted graph from memory cache");
            }
        }
        Ok(())
    }

    fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries.lock().len())
    }
}

/// Persistent cache in a SQLite file. Every call opens its own connection.
pub struct SqliteGraphCache {
    db_path: PathBuf,
    max_entries: usize,
}

impl SqliteGraphCache {
    /// Open (creating if needed) the cache database and its schema.
    pub fn open(db_path: impl Into<PathBuf>, max_entries: usize) -> Result<Self, CacheError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CacheError::Unavailable(e.to_string()))?;
            }
        }
        let cache = Self {
            db_path,
            max_entries: max_entries.max(1),
        };
        let conn = cache.connect()?;
        schema::init_schema(&conn)?;
        Ok(cache)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, CacheError> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(std::time::Duration::from_millis(250))?;
        Ok(conn)
    }

    /// Copy the cache database to `destination` with the SQLite backup API.
    pub fn backup_to(&self, destination: &Path) -> Result<(), CacheError> {
        let src_conn = self.connect()?;
        let mut dst_conn = Connection::open(destination)?;
        let backup = rusqlite::backup::Backup::new(&src_conn, &mut dst_conn)?;
        backup.run_to_completion(100, std::time::Duration::from_millis(10), None)?;
        Ok(())
    }

    fn delete(conn: &Connection, key: &GraphKey) -> Result<(), CacheError> {
        conn.execute(
            "DELETE FROM graph_cache WHERE repository = ?1 AND revision = ?2;",
            params![key.repository, key.revision],
        )?;
        Ok(())
    }
}

impl GraphCache for SqliteGraphCache {
    fn get(&self, key: &GraphKey) -> Result<Option<DependencyGraph>, CacheError> {
        let conn = self.connect()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM graph_cache WHERE repository = ?1 AND revision = ?2;",
                params![key.repository, key.revision],
                |row| row.get(0),
            )
            .optional()?;
        let Some(payload) = payload else {
            return Ok(None);
        };

        let decoded = serde_json::from_str::<GraphSnapshot>(&payload)
            .map_err(|e| CacheError::Corrupt {
                repository: key.repository.clone(),
                revision: key.revision.clone(),
                message: e.to_string(),
            })
            .and_then(DependencyGraph::from_snapshot);
        let graph = match decoded {
            Ok(graph)
                if graph.repository() == key.repository && graph.revision() == key.revision =>
            {
                graph
            }
            Ok(graph) => {
                Self::delete(&conn, key)?;
                return Err(CacheError::Corrupt {
                    repository: key.repository.clone(),
                    revision: key.revision.clone(),
                    message: format!(
                        "payload belongs to {}@{}",
                        graph.repository(),
                        graph.revision()
                    ),
                });
            }
            Err(e) => {
                Self::delete(&conn, key)?;
                return Err(e);
            }
        };

        conn.execute(
            "UPDATE graph_cache \
             SET last_access_seq = (SELECT COALESCE(MAX(last_access_seq), 0) + 1 FROM graph_cache), \
                 last_access_at = CURRENT_TIMESTAMP \
             WHERE repository = ?1 AND revision = ?2;",
            params![key.repository, key.revision],
        )?;
        Ok(Some(graph))
    }

    fn put(&self, key: &GraphKey, graph: &DependencyGraph) -> Result<(), CacheError> {
        let payload = serde_json::to_string(&graph.snapshot())
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO graph_cache(repository, revision, payload, file_count, last_access_seq, last_access_at) \
             VALUES(?1, ?2, ?3, ?4, (SELECT COALESCE(MAX(last_access_seq), 0) + 1 FROM graph_cache), CURRENT_TIMESTAMP) \
             ON CONFLICT(repository, revision) DO UPDATE SET \
                 payload = excluded.payload, \
                 file_count = excluded.file_count, \
                 last_access_seq = excluded.last_access_seq, \
                 last_access_at = excluded.last_access_at;",
            params![
                key.repository,
                key.revision,
                payload,
                graph.file_count() as i64
            ],
        )?;
        let evicted = conn.execute(
            "DELETE FROM graph_cache WHERE rowid NOT IN \
             (SELECT rowid FROM graph_cache ORDER BY last_access_seq DESC LIMIT ?1);",
            params![self.max_entries as i64],
        )?;
        if evicted > 0 {
            debug!(evicted, "evicted graphs from sqlite cache");
        }
        Ok(())
    }

    fn len(&self) -> Result<usize, CacheError> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM graph_cache;", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
