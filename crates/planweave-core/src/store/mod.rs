pub mod cache;
pub mod cycles;
pub mod graph;
pub mod schema;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::store::graph::DependencyGraph;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GraphKey {
    pub repository: String,
    pub revision: String,
}

impl GraphKey {
    pub fn new(repository: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            revision: revision.into(),
        }
    }
}

impl fmt::Display for GraphKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository, self.revision)
    }
}

/// Live graphs keyed by (repository, revision). Each graph sits behind its
/// own mutex, so there is exactly one writer per key at a time while
/// different keys proceed independently.
#[derive(Default)]
pub struct GraphStore {
    graphs: Mutex<BTreeMap<GraphKey, Arc<Mutex<DependencyGraph>>>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `key`, created from `init` if the store has none yet.
    pub fn handle_or_insert_with(
        &self,
        key: &GraphKey,
        init: impl FnOnce() -> DependencyGraph,
    ) -> Arc<Mutex<DependencyGraph>> {
        let mut graphs = self.graphs.lock();
        graphs
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(init())))
            .clone()
    }

    pub fn handle(&self, key: &GraphKey) -> Option<Arc<Mutex<DependencyGraph>>> {
        self.graphs.lock().get(key).cloned()
    }

    /// Drop the live graph for `key`; the caches are unaffected.
    pub fn release(&self, key: &GraphKey) -> Option<Arc<Mutex<DependencyGraph>>> {
        self.graphs.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.graphs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.lock().is_empty()
    }
}
