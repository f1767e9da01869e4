//! Planweave core library: turns a plan of natural-language steps into an
//! ordered, parallelizable bundle of coding tasks.
//!
//! This crate provides the source indexer (tree-sitter parsers per
//! language), the per-revision symbol dependency graph and its caches, the
//! step-to-path planner and the task ordering that sits on top of them.
//! [`Engine::decompose`] is the entry point.

pub mod collaborators;
pub mod config;
pub mod engine;
pub mod errors;
pub mod indexer;
pub mod models;
pub mod planner;
pub mod query;
pub mod store;

pub use collaborators::{
    MemoryRepository, Retrieval, SearchFilter, SearchMatch, SnapshotRepository, SourceRepository,
};
pub use config::{ComplexityPolicy, EngineConfig};
pub use engine::Engine;
pub use errors::{CacheError, EngineError, EngineResult, RepositoryError, RetrievalError};
pub use models::{
    CodingTask, Complexity, ContextRef, DroppedEdge, Plan, Step, StepKind, TaskBundle, Warning,
};
pub use query::search::GraphRetrieval;
pub use store::cache::{GraphCache, MemoryGraphCache, SqliteGraphCache};
pub use store::graph::DependencyGraph;
pub use store::GraphKey;
