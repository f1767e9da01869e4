//! End-to-end decomposition scenarios.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use planweave_core::errors::CacheError;
use planweave_core::{
    DependencyGraph, Engine, EngineConfig, EngineError, GraphCache, GraphKey, GraphRetrieval,
    MemoryRepository, Plan, RepositoryError, Retrieval, RetrievalError, SearchFilter, SearchMatch,
    Step, StepKind, TaskBundle, Warning,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const REPO: &str = "acme/app";

fn sample_repo() -> MemoryRepository {
    MemoryRepository::new()
        .with_revision(
            "r1",
            [
                ("a.py", "def helper():\n    return 1\n"),
                ("b.py", "def main():\n    return 0\n"),
                (
                    "report.py",
                    "def render_header():\n    return 'h'\n\ndef render_footer():\n    return 'f'\n",
                ),
                (
                    "billing/invoice.py",
                    "from billing.tax import rate\n\ndef total_due(amount):\n    if amount > 0:\n        return amount * rate()\n    return 0\n",
                ),
                ("billing/tax.py", "def rate():\n    return 1.2\n"),
            ],
        )
        .with_revision(
            "r2",
            [
                ("a.py", "def helper():\n    return 1\n"),
                ("b.py", "def main():\n    return helper_two()\n\ndef helper_two():\n    return 2\n"),
                (
                    "report.py",
                    "def render_header():\n    return 'h'\n\ndef render_footer():\n    return 'f'\n",
                ),
                (
                    "billing/invoice.py",
                    "from billing.tax import rate\n\ndef total_due(amount):\n    if amount > 0:\n        return amount * rate()\n    return 0\n",
                ),
                ("billing/tax.py", "def rate():\n    return 1.2\n"),
            ],
        )
}

fn engine_with(repo: MemoryRepository, config: EngineConfig) -> Engine {
    let retrieval = GraphRetrieval::from_sources(REPO, "r1", repo.files("r1").unwrap());
    Engine::new(config, Arc::new(repo), Arc::new(retrieval)).unwrap()
}

fn engine(repo: MemoryRepository) -> Engine {
    engine_with(repo, EngineConfig::default())
}

fn plan(revision: &str, steps: Vec<Step>) -> Plan {
    Plan {
        repository: REPO.to_string(),
        revision: revision.to_string(),
        base_revision: None,
        steps,
    }
}

fn ids(bundle: &TaskBundle) -> Vec<&str> {
    bundle.tasks.iter().map(|t| t.id.as_str()).collect()
}

/// Every dependency sits in a strictly earlier parallel group, which makes
/// the group order a topological order of `depends_on`.
fn assert_acyclic(bundle: &TaskBundle) {
    assert!(!bundle.force_sequential);
    let group_of: BTreeMap<&str, usize> = bundle
        .parallel_groups
        .iter()
        .enumerate()
        .flat_map(|(g, members)| members.iter().map(move |id| (id.as_str(), g)))
        .collect();
    assert_eq!(group_of.len(), bundle.tasks.len());
    for task in &bundle.tasks {
        assert_eq!(group_of[task.id.as_str()], task.parallel_group);
        for dep in &task.depends_on {
            assert!(
                group_of[dep.as_str()] < task.parallel_group,
                "{} depends on {dep} in a later group",
                task.id
            );
        }
    }
}

fn mixed_plan() -> Plan {
    plan(
        "r1",
        vec![
            Step::new(StepKind::Add, "add function `validate()` in `a.py`"),
            Step::new(StepKind::Edit, "call `validate()` from `b.py`"),
            Step::new(StepKind::Edit, "restyle `render_header` and `render_footer` in `report.py`"),
            Step::new(StepKind::Edit, "round `total_due` to cents"),
        ],
    )
}

struct SlowRetrieval;

impl Retrieval for SlowRetrieval {
    fn search(
        &self,
        _: &str,
        _: usize,
        _: &SearchFilter,
    ) -> Result<Vec<SearchMatch>, RetrievalError> {
        std::thread::sleep(Duration::from_millis(40));
        Ok(Vec::new())
    }
}

struct BrokenCache;

impl GraphCache for BrokenCache {
    fn get(&self, _: &GraphKey) -> Result<Option<DependencyGraph>, CacheError> {
        Err(CacheError::Unavailable("disk offline".to_string()))
    }

    fn put(&self, _: &GraphKey, _: &DependencyGraph) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("disk offline".to_string()))
    }

    fn len(&self) -> Result<usize, CacheError> {
        Err(CacheError::Unavailable("disk offline".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Ordering scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_consumer_step_depends_on_producer_step() {
    let bundle = engine(sample_repo())
        .decompose(&plan(
            "r1",
            vec![
                Step::new(StepKind::Add, "add function `validate()` in `a.py`"),
                Step::new(StepKind::Edit, "call `validate()` from `b.py`"),
            ],
        ))
        .unwrap();

    assert_eq!(ids(&bundle), vec!["task-1", "task-2"]);
    let consumer = bundle.task("task-2").unwrap();
    assert!(consumer.depends_on.contains("task-1"));
    assert_eq!(consumer.paths, vec!["b.py".to_string()]);
    assert!(bundle.task("task-1").unwrap().depends_on.is_empty());
    assert_eq!(bundle.parallel_groups.len(), 2);
    assert!(bundle.warnings.is_empty());
    assert_acyclic(&bundle);
}

#[test]
fn test_independent_later_step_keeps_step_order() {
    let bundle = engine(sample_repo())
        .decompose(&plan(
            "r1",
            vec![
                Step::new(StepKind::Add, "add function `validate()` in `a.py`"),
                Step::new(StepKind::Edit, "call `validate()` from `b.py`"),
                Step::new(StepKind::Edit, "restyle `render_header` in `report.py`"),
            ],
        ))
        .unwrap();

    assert_eq!(ids(&bundle), vec!["task-1", "task-2", "task-3"]);
    assert_eq!(
        bundle.parallel_groups,
        vec![
            vec!["task-1".to_string(), "task-3".to_string()],
            vec!["task-2".to_string()],
        ]
    );
    assert_eq!(bundle.task("task-3").unwrap().parallel_group, 0);
    assert_acyclic(&bundle);
}

#[test]
fn test_mutually_dependent_steps_force_sequential() {
    let bundle = engine(sample_repo())
        .decompose(&plan(
            "r1",
            vec![
                Step::new(StepKind::Add, "add `ping()` in `a.py` that calls `pong()`"),
                Step::new(StepKind::Add, "add `pong()` in `b.py` that calls `ping()`"),
            ],
        ))
        .unwrap();

    assert!(bundle.force_sequential);
    assert_eq!(ids(&bundle), vec!["task-1", "task-2"]);
    assert!(bundle.tasks.iter().all(|t| t.depends_on.is_empty()));
    assert_eq!(
        bundle.parallel_groups,
        vec![vec!["task-1".to_string()], vec!["task-2".to_string()]]
    );
    assert!(bundle
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::CycleDetected { cycles: 1, .. })));
    assert!(bundle
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::ForceSequential { remaining_cycles: 1 })));
}

#[test]
fn test_unknown_symbol_is_marked_unresolved() {
    let bundle = engine(sample_repo())
        .decompose(&plan(
            "r1",
            vec![
                Step::new(StepKind::Edit, "retry inside `ghostHandler` on failure"),
                Step::new(StepKind::Edit, "round `total_due` to cents"),
            ],
        ))
        .unwrap();

    assert_eq!(bundle.tasks.len(), 2);
    let ghost = bundle.task("task-1").unwrap();
    assert!(ghost.unresolved_path);
    assert!(ghost.paths.is_empty());
    assert_eq!(
        bundle.warnings,
        vec![Warning::UnresolvedPath {
            step: 1,
            candidates: vec!["ghostHandler".to_string()],
        }]
    );
    assert_eq!(
        bundle.task("task-2").unwrap().paths,
        vec!["billing/invoice.py".to_string()]
    );
}

#[test]
fn test_step_over_independent_symbols_splits() {
    let bundle = engine(sample_repo())
        .decompose(&plan(
            "r1",
            vec![Step::new(
                StepKind::Edit,
                "restyle `render_header` and `render_footer` in `report.py`",
            )],
        ))
        .unwrap();

    assert_eq!(ids(&bundle), vec!["task-1-1", "task-1-2"]);
    assert!(bundle.tasks.iter().all(|t| t.depends_on.is_empty()));
    assert_eq!(bundle.parallel_groups.len(), 1);
    assert_acyclic(&bundle);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn test_repeated_runs_are_identical() {
    let first = engine(sample_repo()).decompose(&mixed_plan()).unwrap();
    let second = engine(sample_repo()).decompose(&mixed_plan()).unwrap();
    assert_eq!(first.tasks, second.tasks);
    assert_eq!(first.parallel_groups, second.parallel_groups);
    assert_eq!(first.warnings, second.warnings);
    assert_eq!(first.fingerprint(), second.fingerprint());
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_acyclic(&first);
}

#[test]
fn test_memory_cache_is_transparent() {
    let uncached = engine(sample_repo()).decompose(&mixed_plan()).unwrap();

    let cached = engine(sample_repo()).with_memory_cache();
    let cold = cached.decompose(&mixed_plan()).unwrap();
    let warm = cached.decompose(&mixed_plan()).unwrap();

    assert_eq!(cold.diagnostics.files_reused, 0);
    assert_eq!(warm.diagnostics.files_parsed, 0);
    assert_eq!(warm.diagnostics.files_reused, cold.diagnostics.files_parsed);
    assert_eq!(warm.diagnostics.cache_hit_ratio, 1.0);
    assert_eq!(cold.fingerprint(), warm.fingerprint());
    assert_eq!(uncached.fingerprint(), warm.fingerprint());
}

#[test]
fn test_cache_populated_by_other_plan_is_transparent() {
    let alone = engine(sample_repo())
        .decompose(&plan("r1", vec![Step::new(StepKind::Edit, "round `total_due` to cents")]))
        .unwrap();

    let cached = engine(sample_repo()).with_memory_cache();
    cached.decompose(&mixed_plan()).unwrap();
    let after_other = cached
        .decompose(&plan("r1", vec![Step::new(StepKind::Edit, "round `total_due` to cents")]))
        .unwrap();

    assert_eq!(alone.fingerprint(), after_other.fingerprint());
    assert!(after_other.diagnostics.files_reused > 0);
}

#[test]
fn test_sqlite_cache_is_transparent_across_engines() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cache").join("graphs.db");

    let cold = engine(sample_repo())
        .with_sqlite_cache(&db)
        .decompose(&mixed_plan())
        .unwrap();
    let warm = engine(sample_repo())
        .with_sqlite_cache(&db)
        .decompose(&mixed_plan())
        .unwrap();

    assert!(cold.diagnostics.files_parsed > 0);
    assert_eq!(warm.diagnostics.files_parsed, 0);
    assert_eq!(cold.fingerprint(), warm.fingerprint());
}

#[test]
fn test_broken_cache_degrades_to_parsing() {
    let uncached = engine(sample_repo()).decompose(&mixed_plan()).unwrap();
    let bundle = engine(sample_repo())
        .with_cache(Arc::new(BrokenCache))
        .decompose(&mixed_plan())
        .unwrap();

    assert!(bundle
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::CacheUnavailable { .. })));
    assert_eq!(bundle.tasks, uncached.tasks);
    assert_eq!(bundle.fingerprint(), uncached.fingerprint());
}

#[test]
fn test_unopenable_sqlite_cache_is_reported_on_every_run() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();

    let uncached = engine(sample_repo()).decompose(&mixed_plan()).unwrap();
    let degraded = engine(sample_repo()).with_sqlite_cache(&blocker.join("graphs.db"));
    for _ in 0..2 {
        let bundle = degraded.decompose(&mixed_plan()).unwrap();
        assert_eq!(
            bundle
                .warnings
                .iter()
                .filter(|w| matches!(w, Warning::CacheUnavailable { .. }))
                .count(),
            1
        );
        assert_eq!(bundle.diagnostics.files_reused, 0);
        assert_eq!(bundle.tasks, uncached.tasks);
        assert_eq!(bundle.fingerprint(), uncached.fingerprint());
    }
}

#[test]
fn test_concurrent_runs_on_one_revision_agree() {
    let expected = engine(sample_repo()).decompose(&mixed_plan()).unwrap();
    let shared = engine(sample_repo()).with_memory_cache();

    let bundles: Vec<TaskBundle> = std::thread::scope(|scope| {
        let runs: Vec<_> = (0..2)
            .map(|_| scope.spawn(|| shared.decompose(&mixed_plan()).unwrap()))
            .collect();
        runs.into_iter().map(|run| run.join().unwrap()).collect()
    });

    assert_eq!(bundles.len(), 2);
    for bundle in &bundles {
        assert_eq!(bundle.fingerprint(), expected.fingerprint());
        assert_acyclic(bundle);
    }
    // The graph both runs wrote back serves the next run whole.
    let after = shared.decompose(&mixed_plan()).unwrap();
    assert_eq!(after.diagnostics.files_parsed, 0);
    assert_eq!(after.fingerprint(), expected.fingerprint());
}

#[test]
fn test_more_files_never_lower_complexity() {
    let new_files = ["tools/one.py", "tools/two.py", "tools/three.py", "tools/four.py"];
    let mut previous = 0.0;
    for count in 1..=new_files.len() {
        let step =
            Step::new(StepKind::Add, "add `audit()`").with_paths(new_files[..count].to_vec());
        let bundle = engine(sample_repo()).decompose(&plan("r1", vec![step])).unwrap();
        let task = &bundle.tasks[0];
        assert_eq!(task.paths.len(), count);
        assert!(task.complexity_score >= previous);
        previous = task.complexity_score;
    }
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn test_timeout_returns_no_bundle() {
    let repo = sample_repo();
    let config = EngineConfig {
        timeout_ms: 5,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config, Arc::new(repo), Arc::new(SlowRetrieval)).unwrap();
    let err = engine
        .decompose(&plan("r1", vec![Step::new(StepKind::Edit, "tune `total_due`")]))
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout { budget_ms: 5, .. }));
}

#[test]
fn test_missing_explicit_path_is_fatal() {
    let err = engine(sample_repo())
        .decompose(&plan(
            "r1",
            vec![
                Step::new(StepKind::Edit, "tweak").with_paths(["a.py"]),
                Step::new(StepKind::Edit, "tweak").with_paths(["gone.py"]),
            ],
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::RequiredPathMissing { step: 2, ref path, .. } if path == "gone.py"
    ));
}

#[test]
fn test_explicit_path_read_failure_is_fatal() {
    let repo = sample_repo().with_read_failure("a.py");
    let err = engine(repo)
        .decompose(&plan(
            "r1",
            vec![Step::new(StepKind::Edit, "tweak").with_paths(["a.py"])],
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Repository(RepositoryError::Read { .. })
    ));
}

// ---------------------------------------------------------------------------
// Incremental rebuild
// ---------------------------------------------------------------------------

#[test]
fn test_rebuild_from_cached_ancestor_reparses_only_changed_files() {
    let steps = || {
        vec![
            Step::new(StepKind::Edit, "tidy").with_paths(["a.py"]),
            Step::new(StepKind::Edit, "tidy").with_paths(["b.py"]),
            Step::new(StepKind::Edit, "tidy").with_paths(["report.py"]),
        ]
    };
    let cached = engine(sample_repo()).with_memory_cache();
    cached.decompose(&plan("r1", steps())).unwrap();

    let mut next = plan("r2", steps());
    next.base_revision = Some("r1".to_string());
    let rebuilt = cached.decompose(&next).unwrap();
    assert_eq!(rebuilt.diagnostics.files_parsed, 1);
    assert_eq!(rebuilt.diagnostics.files_reused, 2);

    let fresh = engine(sample_repo()).decompose(&plan("r2", steps())).unwrap();
    assert_eq!(rebuilt.fingerprint(), fresh.fingerprint());
}
