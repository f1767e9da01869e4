//! `decompose`: plan in, ordered task bundle out.
//!
//! One run resolves every step to paths, brings the revision's graph up to
//! date for those paths plus one hop of imports, builds tasks against a
//! subgraph of exactly those files, and orders them. Only a timeout or a
//! failed read of an explicit path aborts; everything else is a warning.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::collaborators::{Retrieval, SourceRepository};
use crate::config::EngineConfig;
use crate::errors::EngineResult;
use crate::indexer::parser::{ParserCapability, ParserRegistry};
use crate::indexer::pipeline::{parallel_parse, Deadline, ParseJob};
use crate::models::{
    content_hash, normalize_warnings, BundleDiagnostics, EdgeKind, Plan, TaskBundle, Warning,
};
use crate::planner::ordering::OrderingResolver;
use crate::planner::paths::{ContentMap, PathResolver, ResolvedStep};
use crate::planner::tasks::TaskBuilder;
use crate::query::guards::MAX_IMPORT_EXPANSION;
use crate::store::cache::{GraphCache, MemoryGraphCache, SqliteGraphCache};
use crate::store::graph::DependencyGraph;
use crate::store::{GraphKey, GraphStore};

#[derive(Clone, Copy, Debug, Default)]
struct SyncStats {
    reused: usize,
    parsed: usize,
}

impl SyncStats {
    fn add(&mut self, other: SyncStats) {
        self.reused += other.reused;
        self.parsed += other.parsed;
    }
}

pub struct Engine {
    config: EngineConfig,
    repository: Arc<dyn SourceRepository>,
    retrieval: Arc<dyn Retrieval>,
    cache: Option<Arc<dyn GraphCache>>,
    /// Why the configured cache could not be opened; reported on every run.
    cache_open_error: Option<String>,
    registry: ParserRegistry,
    store: GraphStore,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        repository: Arc<dyn SourceRepository>,
        retrieval: Arc<dyn Retrieval>,
    ) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            repository,
            retrieval,
            cache: None,
            cache_open_error: None,
            registry: ParserRegistry::default(),
            store: GraphStore::new(),
        })
    }

    pub fn with_cache(mut self, cache: Arc<dyn GraphCache>) -> Self {
        self.cache = Some(cache);
        self.cache_open_error = None;
        self
    }

    /// In-process LRU cache sized by `cache_max_entries`.
    pub fn with_memory_cache(self) -> Self {
        let cache = MemoryGraphCache::new(self.config.cache_max_entries);
        self.with_cache(Arc::new(cache))
    }

    /// SQLite-backed cache at `db_path`. An unusable database leaves the
    /// engine uncached, and every bundle it emits carries a
    /// `CACHE_UNAVAILABLE` warning.
    pub fn with_sqlite_cache(mut self, db_path: &Path) -> Self {
        match SqliteGraphCache::open(db_path, self.config.cache_max_entries) {
            Ok(cache) => self.with_cache(Arc::new(cache)),
            Err(e) => {
                warn!(path = %db_path.display(), error = %e, "graph cache disabled");
                self.cache = None;
                self.cache_open_error = Some(format!("{}: {e}", db_path.display()));
                self
            }
        }
    }

    pub fn with_parsers(mut self, registry: ParserRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn parser_capabilities(&self) -> Vec<ParserCapability> {
        self.registry.capabilities()
    }

    /// Decompose `plan` into an ordered, acyclic task bundle.
    pub fn decompose(&self, plan: &Plan) -> EngineResult<TaskBundle> {
        let deadline = Deadline::start(self.config.timeout());
        let key = GraphKey::new(plan.repository.as_str(), plan.revision.as_str());
        let outcome = self.run(plan, &key, &deadline);
        self.store.release(&key);
        match &outcome {
            Ok(bundle) => info!(
                key = %key,
                steps = plan.steps.len(),
                tasks = bundle.tasks.len(),
                warnings = bundle.warnings.len(),
                force_sequential = bundle.force_sequential,
                cache_hit_ratio = bundle.diagnostics.cache_hit_ratio,
                elapsed_ms = bundle.diagnostics.elapsed_ms,
                "decomposed plan"
            ),
            Err(e) => warn!(
                key = %key,
                elapsed_ms = deadline.elapsed_ms(),
                error = %e,
                "decomposition failed"
            ),
        }
        outcome
    }

    fn run(&self, plan: &Plan, key: &GraphKey, deadline: &Deadline) -> EngineResult<TaskBundle> {
        deadline.check()?;
        let mut warnings: Vec<Warning> = Vec::new();
        if let Some(detail) = &self.cache_open_error {
            warnings.push(Warning::CacheUnavailable {
                detail: detail.clone(),
            });
        }
        let mut contents = ContentMap::new();

        let resolver = PathResolver::new(
            self.repository.as_ref(),
            self.retrieval.as_ref(),
            &plan.revision,
            self.config.retrieval_top_k,
        );
        let mut resolved: Vec<ResolvedStep> = Vec::with_capacity(plan.steps.len());
        for (index, step) in plan.steps.iter().enumerate() {
            deadline.check()?;
            resolved.push(resolver.resolve(index + 1, step, &mut contents, &mut warnings)?);
        }
        deadline.check()?;

        // Path → steps that need it; each file is parsed once.
        let mut needed: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for r in &resolved {
            for path in &r.paths {
                needed.entry(path.clone()).or_default().push(r.step);
            }
        }

        let handle = self.acquire_graph(plan, key, &mut warnings);
        let mut stats = self.sync_files(&handle, &needed, &contents, deadline)?;

        let hop = self.import_hop(&handle, &needed, &plan.revision, &mut contents);
        let hop_jobs: BTreeMap<String, Vec<usize>> = hop
            .iter()
            .map(|path| (path.clone(), Vec::new()))
            .collect();
        stats.add(self.sync_files(&handle, &hop_jobs, &contents, deadline)?);
        deadline.check()?;

        let view = {
            let graph = handle.lock();
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.put(key, &graph) {
                    warn!(key = %key, error = %e, "graph cache write failed");
                    warnings.push(Warning::CacheUnavailable {
                        detail: e.to_string(),
                    });
                }
            }
            graph.subgraph(needed.keys().chain(hop.iter()).map(String::as_str))
        };

        for path in view.file_paths() {
            if let Some(reason) = view.file(path).and_then(|f| f.degraded.as_ref()) {
                warnings.push(Warning::ParseDegraded {
                    path: path.to_string(),
                    reason: reason.to_string(),
                });
            }
        }

        let builder = TaskBuilder::new(&view, &self.config.complexity);
        let drafts = plan
            .steps
            .iter()
            .zip(&resolved)
            .flat_map(|(step, r)| builder.build(step, r))
            .collect();
        let ordered = OrderingResolver::new(&view, self.config.max_cycles).resolve(drafts);
        warnings.extend(ordered.warnings);
        normalize_warnings(&mut warnings);
        deadline.check()?;

        let touched_files = stats.reused + stats.parsed;
        let cache_hit_ratio = if touched_files == 0 {
            0.0
        } else {
            stats.reused as f64 / touched_files as f64
        };
        Ok(TaskBundle {
            repository: plan.repository.clone(),
            revision: plan.revision.clone(),
            tasks: ordered.tasks,
            parallel_groups: ordered.parallel_groups,
            force_sequential: ordered.force_sequential,
            warnings,
            diagnostics: BundleDiagnostics {
                cache_hit_ratio,
                files_reused: stats.reused,
                files_parsed: stats.parsed,
                elapsed_ms: deadline.elapsed_ms(),
            },
        })
    }

    /// The live graph for `key`: already held, cached, rebuilt from a cached
    /// ancestor, or empty.
    fn acquire_graph(
        &self,
        plan: &Plan,
        key: &GraphKey,
        warnings: &mut Vec<Warning>,
    ) -> Arc<Mutex<DependencyGraph>> {
        if let Some(handle) = self.store.handle(key) {
            return handle;
        }
        let graph = self
            .load_cached(plan, key, warnings)
            .unwrap_or_else(|| {
                DependencyGraph::new(key.repository.as_str(), key.revision.as_str())
            });
        self.store.handle_or_insert_with(key, || graph)
    }

    fn load_cached(
        &self,
        plan: &Plan,
        key: &GraphKey,
        warnings: &mut Vec<Warning>,
    ) -> Option<DependencyGraph> {
        let cache = self.cache.as_ref()?;
        match cache.get(key) {
            Ok(Some(graph)) => {
                info!(key = %key, files = graph.file_count(), "graph cache hit");
                return Some(graph);
            }
            Ok(None) => debug!(key = %key, "graph cache miss"),
            Err(e) => {
                warn!(key = %key, error = %e, "graph cache unavailable");
                warnings.push(Warning::CacheUnavailable {
                    detail: e.to_string(),
                });
                return None;
            }
        }

        let base = plan.base_revision.as_deref().filter(|b| *b != plan.revision)?;
        let base_key = GraphKey::new(plan.repository.as_str(), base);
        let mut graph = match cache.get(&base_key) {
            Ok(Some(graph)) => graph,
            Ok(None) => {
                debug!(key = %base_key, "no cached ancestor");
                return None;
            }
            Err(e) => {
                warn!(key = %base_key, error = %e, "graph cache unavailable");
                warnings.push(Warning::CacheUnavailable {
                    detail: e.to_string(),
                });
                return None;
            }
        };
        let changed = match self.repository.list_changed_files(base, &plan.revision) {
            Ok(changed) => changed,
            Err(e) => {
                warn!(
                    base,
                    revision = %plan.revision,
                    error = %e,
                    "cannot diff revisions, parsing fresh"
                );
                return None;
            }
        };
        graph.rebase(plan.revision.as_str());
        for path in &changed {
            graph.remove_file(path);
        }
        info!(
            base,
            revision = %plan.revision,
            changed = changed.len(),
            kept = graph.file_count(),
            "rebuilding graph from cached ancestor"
        );
        Some(graph)
    }

    /// Make the graph hold the current content of every path in `files`,
    /// reusing entries whose content hash already matches.
    fn sync_files(
        &self,
        handle: &Arc<Mutex<DependencyGraph>>,
        files: &BTreeMap<String, Vec<usize>>,
        contents: &ContentMap,
        deadline: &Deadline,
    ) -> EngineResult<SyncStats> {
        let mut stats = SyncStats::default();
        let mut jobs = Vec::new();
        {
            let graph = handle.lock();
            for (path, steps) in files {
                let Some(content) = contents.get(path) else {
                    // Not read this run: only already-held files qualify.
                    if graph.contains_file(path) {
                        stats.reused += 1;
                    }
                    continue;
                };
                let current = graph.file(path).map(|f| f.content_hash.as_str());
                if current == Some(content_hash(content).as_str()) {
                    stats.reused += 1;
                } else {
                    jobs.push(ParseJob {
                        path: path.clone(),
                        content: content.clone(),
                        steps: steps.clone(),
                    });
                }
            }
        }

        let results = parallel_parse(&self.registry, &jobs, self.config.workers, deadline)?;
        stats.parsed = results.len();

        let mut graph = handle.lock();
        for result in results {
            deadline.check()?;
            if let Some(reason) = &result.degraded {
                warn!(path = %result.path, reason = %reason, "parse degraded");
            }
            graph.apply_file(result);
        }
        Ok(stats)
    }

    /// Files the needed files import, one hop out. Each import takes its
    /// first candidate that exists at the revision.
    fn import_hop(
        &self,
        handle: &Arc<Mutex<DependencyGraph>>,
        needed: &BTreeMap<String, Vec<usize>>,
        revision: &str,
        contents: &mut ContentMap,
    ) -> BTreeSet<String> {
        let candidate_lists: Vec<Vec<String>> = {
            let graph = handle.lock();
            needed
                .keys()
                .filter_map(|path| graph.file(path))
                .flat_map(|file| file.references.iter())
                .filter(|r| r.kind == EdgeKind::Imports && !r.candidates.is_empty())
                .map(|r| r.candidates.clone())
                .collect()
        };

        let mut hop = BTreeSet::new();
        for candidates in candidate_lists {
            if hop.len() >= MAX_IMPORT_EXPANSION {
                debug!(limit = MAX_IMPORT_EXPANSION, "import expansion capped");
                break;
            }
            for candidate in candidates {
                if contents.contains_key(&candidate) || handle.lock().contains_file(&candidate) {
                    if !needed.contains_key(&candidate) {
                        hop.insert(candidate);
                    }
                    break;
                }
                match self.repository.read_file(&candidate, revision) {
                    Ok(Some(content)) => {
                        contents.insert(candidate.clone(), content);
                        if !needed.contains_key(&candidate) {
                            hop.insert(candidate);
                        }
                        break;
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        debug!(path = %candidate, error = %e, "import candidate unreadable");
                        continue;
                    }
                }
            }
        }
        hop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryRepository;
    use crate::errors::EngineError;
    use crate::models::{Step, StepKind};
    use crate::query::search::GraphRetrieval;

    fn engine(repo: MemoryRepository) -> Engine {
        let retrieval = GraphRetrieval::from_sources("repo", "r1", repo.files("r1").unwrap());
        Engine::new(EngineConfig::default(), Arc::new(repo), Arc::new(retrieval)).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = EngineConfig {
            workers: 0,
            ..EngineConfig::default()
        };
        let repo = MemoryRepository::new();
        let retrieval = GraphRetrieval::new(DependencyGraph::new("repo", "r1"));
        assert!(matches!(
            Engine::new(config, Arc::new(repo), Arc::new(retrieval)),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_import_hop_pulls_in_imported_file() {
        let repo = MemoryRepository::new().with_revision(
            "r1",
            [
                ("app/main.py", "from app.util import helper\n\ndef run():\n    helper()\n"),
                ("app/util.py", "def helper():\n    pass\n"),
                ("app/other.py", "def other():\n    pass\n"),
            ],
        );
        let engine = engine(repo).with_memory_cache();
        let plan = Plan {
            repository: "repo".to_string(),
            revision: "r1".to_string(),
            base_revision: None,
            steps: vec![Step::new(StepKind::Edit, "speed up `run`").with_paths(["app/main.py"])],
        };
        let bundle = engine.decompose(&plan).unwrap();
        assert_eq!(bundle.tasks.len(), 1);
        assert_eq!(bundle.diagnostics.files_parsed, 2);
        assert_eq!(bundle.diagnostics.files_reused, 0);
        assert!(engine.store.is_empty());

        let warm = engine.decompose(&plan).unwrap();
        assert_eq!(warm.diagnostics.files_reused, 2);
        assert_eq!(warm.diagnostics.cache_hit_ratio, 1.0);
        assert_eq!(bundle.fingerprint(), warm.fingerprint());
    }

    #[test]
    fn test_degraded_parse_is_reported() {
        let repo = MemoryRepository::new().with_revision(
            "r1",
            [("notes/readme.md", "# notes\n"), ("a.py", "def a(:\n    pass\n")],
        );
        let plan = Plan {
            repository: "repo".to_string(),
            revision: "r1".to_string(),
            base_revision: None,
            steps: vec![Step::new(StepKind::Edit, "tidy").with_paths(["notes/readme.md", "a.py"])],
        };
        let bundle = engine(repo).decompose(&plan).unwrap();
        let degraded: Vec<&str> = bundle
            .warnings
            .iter()
            .filter_map(|w| match w {
                Warning::ParseDegraded { path, .. } => Some(path.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(degraded, vec!["a.py", "notes/readme.md"]);
    }
}
