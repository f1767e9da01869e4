//! Step → file paths: explicit paths, path tokens, then retrieval.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::collaborators::{Retrieval, SearchFilter, SearchMatch, SourceRepository};
use crate::errors::{EngineError, EngineResult, RepositoryError};
use crate::indexer::filesystem::normalize_path;
use crate::models::{Step, StepKind, Warning};
use crate::planner::intent::{analyze_step, StepIntent};
use crate::query::guards::MAX_STEP_PATHS;

/// Paths a step resolved to.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedStep {
    /// 1-based step number.
    pub step: usize,
    /// Paths that exist at the plan revision.
    pub paths: Vec<String>,
    /// Paths an `add` step will create.
    pub new_paths: Vec<String>,
    pub unresolved: bool,
    pub intent: StepIntent,
}

impl ResolvedStep {
    pub fn all_paths(&self) -> impl Iterator<Item = &String> {
        self.paths.iter().chain(self.new_paths.iter())
    }
}

/// File contents read so far in a run, shared across steps.
pub type ContentMap = BTreeMap<String, String>;

pub struct PathResolver<'a> {
    repository: &'a dyn SourceRepository,
    retrieval: &'a dyn Retrieval,
    revision: &'a str,
    top_k: usize,
}

fn push_unique(paths: &mut Vec<String>, path: String) {
    if !paths.contains(&path) {
        paths.push(path);
    }
}

fn by_score_then_path(a: &SearchMatch, b: &SearchMatch) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.path.cmp(&b.path))
}

impl<'a> PathResolver<'a> {
    pub fn new(
        repository: &'a dyn SourceRepository,
        retrieval: &'a dyn Retrieval,
        revision: &'a str,
        top_k: usize,
    ) -> Self {
        Self {
            repository,
            retrieval,
            revision,
            top_k,
        }
    }

    /// Whether `path` exists, caching its content.
    fn load(&self, path: &str, contents: &mut ContentMap) -> Result<bool, RepositoryError> {
        if contents.contains_key(path) {
            return Ok(true);
        }
        match self.repository.read_file(path, self.revision)? {
            Some(content) => {
                contents.insert(path.to_string(), content);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Resolve step `number` (1-based). Only a failed read of an explicit
    /// path, or an explicit path missing from a non-`add` step, is fatal.
    pub fn resolve(
        &self,
        number: usize,
        step: &Step,
        contents: &mut ContentMap,
        warnings: &mut Vec<Warning>,
    ) -> EngineResult<ResolvedStep> {
        let intent = analyze_step(step);
        let mut paths = Vec::new();
        let mut new_paths = Vec::new();

        if !step.paths.is_empty() {
            for raw in &step.paths {
                let path = normalize_path(raw);
                if path.is_empty() {
                    continue;
                }
                if self.load(&path, contents)? {
                    push_unique(&mut paths, path);
                } else if step.kind == StepKind::Add {
                    push_unique(&mut new_paths, path);
                } else {
                    return Err(EngineError::RequiredPathMissing {
                        step: number,
                        path,
                        revision: self.revision.to_string(),
                    });
                }
            }
        } else {
            for token in &intent.path_tokens {
                match self.load(token, contents) {
                    Ok(true) => push_unique(&mut paths, token.clone()),
                    Ok(false) if step.kind == StepKind::Add => {
                        push_unique(&mut new_paths, token.clone())
                    }
                    Ok(false) => debug!(step = number, path = %token, "path token not in revision"),
                    Err(e) => {
                        debug!(step = number, path = %token, error = %e, "path token unreadable")
                    }
                }
            }
            if paths.is_empty() && new_paths.is_empty() {
                self.retrieve(number, &intent, contents, &mut paths, warnings);
            }
        }

        paths.truncate(MAX_STEP_PATHS);
        new_paths.truncate(MAX_STEP_PATHS.saturating_sub(paths.len()));

        let unresolved = paths.is_empty() && new_paths.is_empty();
        if unresolved {
            let candidates: Vec<String> = intent.all_names().cloned().collect();
            warn!(step = number, candidates = ?candidates, "step resolved to no path");
            warnings.push(Warning::UnresolvedPath {
                step: number,
                candidates,
            });
        }

        Ok(ResolvedStep {
            step: number,
            paths,
            new_paths,
            unresolved,
            intent,
        })
    }

    /// Top-scored existing match per candidate name. A failing backend
    /// stops retrieval for this step and is reported once.
    fn retrieve(
        &self,
        number: usize,
        intent: &StepIntent,
        contents: &mut ContentMap,
        paths: &mut Vec<String>,
        warnings: &mut Vec<Warning>,
    ) {
        let names: Vec<&String> = if intent.subject_names.is_empty() {
            intent.consumed_names.iter().collect()
        } else {
            intent.subject_names.iter().collect()
        };
        let filter = SearchFilter::default();

        for name in names {
            if paths.len() >= MAX_STEP_PATHS {
                break;
            }
            let mut matches = match self.retrieval.search(name, self.top_k, &filter) {
                Ok(matches) => matches,
                Err(e) => {
                    warn!(step = number, error = %e, "retrieval degraded");
                    warnings.push(Warning::RetrievalDegraded {
                        step: number,
                        detail: e.to_string(),
                    });
                    return;
                }
            };
            matches.retain(|m| m.score > 0.0);
            matches.sort_by(by_score_then_path);

            for candidate in matches {
                let path = normalize_path(&candidate.path);
                match self.load(&path, contents) {
                    Ok(true) => {
                        debug!(
                            step = number,
                            name = %name,
                            path = %path,
                            score = candidate.score,
                            "retrieved path"
                        );
                        push_unique(paths, path);
                        break;
                    }
                    Ok(false) => continue,
                    Err(e) => {
                        debug!(
                            step = number,
                            path = %path,
                            error = %e,
                            "retrieved path unreadable"
                        );
                        continue;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryRepository;
    use crate::errors::RetrievalError;
    use crate::query::search::GraphRetrieval;

    struct DownRetrieval;

    impl Retrieval for DownRetrieval {
        fn search(
            &self,
            _: &str,
            _: usize,
            _: &SearchFilter,
        ) -> Result<Vec<SearchMatch>, RetrievalError> {
            Err(RetrievalError::Unavailable("index offline".to_string()))
        }
    }

    fn repo() -> MemoryRepository {
        MemoryRepository::new().with_revision(
            "r1",
            [
                ("forms/check.py", "def validate(x):\n    return x\n"),
                ("web/app.py", "def serve():\n    pass\n"),
            ],
        )
    }

    fn retrieval(repo: &MemoryRepository) -> GraphRetrieval {
        GraphRetrieval::from_sources("repo", "r1", repo.files("r1").unwrap())
    }

    #[test]
    fn test_explicit_paths_and_missing_path() {
        let repo = repo();
        let search = retrieval(&repo);
        let resolver = PathResolver::new(&repo, &search, "r1", 5);
        let mut contents = ContentMap::new();
        let mut warnings = Vec::new();

        let step = Step::new(StepKind::Edit, "tweak").with_paths(["./web/app.py"]);
        let resolved = resolver.resolve(1, &step, &mut contents, &mut warnings).unwrap();
        assert_eq!(resolved.paths, vec!["web/app.py".to_string()]);
        assert!(contents.contains_key("web/app.py"));

        let step = Step::new(StepKind::Edit, "tweak").with_paths(["web/gone.py"]);
        let err = resolver.resolve(2, &step, &mut contents, &mut warnings).unwrap_err();
        assert!(matches!(err, EngineError::RequiredPathMissing { step: 2, .. }));

        let step = Step::new(StepKind::Add, "create").with_paths(["web/new.py"]);
        let resolved = resolver.resolve(3, &step, &mut contents, &mut warnings).unwrap();
        assert!(resolved.paths.is_empty());
        assert_eq!(resolved.new_paths, vec!["web/new.py".to_string()]);
        assert!(!resolved.unresolved);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_explicit_path_read_failure_is_fatal() {
        let repo = repo().with_read_failure("web/app.py");
        let search = retrieval(&repo);
        let resolver = PathResolver::new(&repo, &search, "r1", 5);
        let step = Step::new(StepKind::Edit, "tweak").with_paths(["web/app.py"]);
        let err = resolver
            .resolve(1, &step, &mut ContentMap::new(), &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Repository(RepositoryError::Read { .. })));
    }

    #[test]
    fn test_retrieval_resolves_subject_names() {
        let repo = repo();
        let search = retrieval(&repo);
        let resolver = PathResolver::new(&repo, &search, "r1", 5);
        let mut warnings = Vec::new();
        let step = Step::new(StepKind::Edit, "harden `validate()` against empty input");
        let resolved = resolver
            .resolve(1, &step, &mut ContentMap::new(), &mut warnings)
            .unwrap();
        assert_eq!(resolved.paths, vec!["forms/check.py".to_string()]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_unknown_name_is_unresolved_not_fatal() {
        let repo = repo();
        let search = retrieval(&repo);
        let resolver = PathResolver::new(&repo, &search, "r1", 5);
        let mut warnings = Vec::new();
        let step = Step::new(StepKind::Edit, "fix `ghostHandler` timeouts");
        let resolved = resolver
            .resolve(4, &step, &mut ContentMap::new(), &mut warnings)
            .unwrap();
        assert!(resolved.unresolved);
        assert_eq!(
            warnings,
            vec![Warning::UnresolvedPath {
                step: 4,
                candidates: vec!["ghostHandler".to_string()],
            }]
        );
    }

    #[test]
    fn test_retrieval_failure_degrades() {
        let repo = repo();
        let resolver = PathResolver::new(&repo, &DownRetrieval, "r1", 5);
        let mut warnings = Vec::new();
        let step = Step::new(StepKind::Edit, "harden `validate()`");
        let resolved = resolver
            .resolve(2, &step, &mut ContentMap::new(), &mut warnings)
            .unwrap();
        assert!(resolved.unresolved);
        assert!(matches!(warnings[0], Warning::RetrievalDegraded { step: 2, .. }));
        assert!(matches!(warnings[1], Warning::UnresolvedPath { step: 2, .. }));
    }

    #[test]
    fn test_add_step_path_token_may_be_new() {
        let repo = repo();
        let search = retrieval(&repo);
        let resolver = PathResolver::new(&repo, &search, "r1", 5);
        let step = Step::new(StepKind::Add, "add function `audit()` in `forms/audit.py`");
        let resolved = resolver
            .resolve(1, &step, &mut ContentMap::new(), &mut Vec::new())
            .unwrap();
        assert_eq!(resolved.new_paths, vec!["forms/audit.py".to_string()]);
    }
}
