//! Turn resolved steps into coding tasks, splitting steps whose touched
//! symbols fall into independent clusters.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::ComplexityPolicy;
use crate::models::{CodingTask, ContextRef, EdgeKind, Step, Symbol, SymbolId, SymbolKind};
use crate::planner::complexity::{self, ComplexityInputs};
use crate::planner::paths::ResolvedStep;
use crate::store::graph::{DependencyGraph, EdgeDirection};

/// Confidence of a dependency known only from the step's wording.
pub const TEXT_CONSUMPTION_CONFIDENCE: f64 = 0.6;

/// A task plus the symbol-level facts ordering needs.
#[derive(Clone, Debug)]
pub struct TaskDraft {
    pub task: CodingTask,
    pub touched: Vec<SymbolId>,
    /// Names this task brings into existence or renames.
    pub produces: BTreeSet<String>,
    /// Names this task relies on, with the best confidence seen.
    pub consumes: BTreeMap<String, f64>,
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Smaller index wins so roots are stable.
            let (keep, merge) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[merge] = keep;
        }
    }
}

pub struct TaskBuilder<'a> {
    graph: &'a DependencyGraph,
    policy: &'a ComplexityPolicy,
}

impl<'a> TaskBuilder<'a> {
    pub fn new(graph: &'a DependencyGraph, policy: &'a ComplexityPolicy) -> Self {
        Self { graph, policy }
    }

    /// Symbols in the step's files named by the step; a file with none
    /// contributes its module symbol.
    fn touched_symbols(&self, resolved: &ResolvedStep) -> Vec<&'a Symbol> {
        let subjects: BTreeSet<&str> = resolved
            .intent
            .subject_names
            .iter()
            .map(String::as_str)
            .collect();
        let mut touched = Vec::new();
        for path in &resolved.paths {
            let symbols = self.graph.symbols_in_file(path);
            let named: Vec<&Symbol> = symbols
                .iter()
                .filter(|s| s.kind != SymbolKind::Module && subjects.contains(s.name.as_str()))
                .collect();
            if named.is_empty() {
                touched.extend(symbols.iter().find(|s| s.kind == SymbolKind::Module));
            } else {
                touched.extend(named);
            }
        }
        touched.sort_by(|a, b| a.id.cmp(&b.id));
        touched.dedup_by(|a, b| a.id == b.id);
        touched
    }

    /// Connected components over graph edges and span nesting, each
    /// ordered by identity, components ordered by their first member.
    fn components(&self, touched: &[&'a Symbol]) -> Vec<Vec<&'a Symbol>> {
        let index: BTreeMap<&SymbolId, usize> =
            touched.iter().enumerate().map(|(i, s)| (&s.id, i)).collect();
        let mut sets = DisjointSet::new(touched.len());

        for (key, _) in self.graph.edges() {
            if let (Some(&a), Some(&b)) = (index.get(&key.source), index.get(&key.target)) {
                sets.union(a, b);
            }
        }
        for (i, a) in touched.iter().enumerate() {
            for (j, b) in touched.iter().enumerate().skip(i + 1) {
                if a.file() == b.file() && (a.span.encloses(&b.span) || b.span.encloses(&a.span)) {
                    sets.union(i, j);
                }
            }
        }

        let mut groups: BTreeMap<usize, Vec<&'a Symbol>> = BTreeMap::new();
        for (i, symbol) in touched.iter().enumerate() {
            groups.entry(sets.find(i)).or_default().push(*symbol);
        }
        groups.into_values().collect()
    }

    /// The touched symbols plus everything nested inside them.
    fn scope(&self, component: &[&'a Symbol]) -> Vec<&'a Symbol> {
        let mut scope: Vec<&Symbol> = Vec::new();
        for touched in component {
            for symbol in self.graph.symbols_in_file(touched.file()) {
                if touched.span.encloses(&symbol.span) && !scope.iter().any(|s| s.id == symbol.id) {
                    scope.push(symbol);
                }
            }
        }
        scope
    }

    fn edge_consumption(&self, component: &[&'a Symbol]) -> BTreeMap<String, f64> {
        let mut consumes: BTreeMap<String, f64> = BTreeMap::new();
        for symbol in self.scope(component) {
            let outgoing = self.graph.neighbors(
                &symbol.id,
                &[EdgeKind::Calls, EdgeKind::Inherits],
                EdgeDirection::Outgoing,
            );
            for neighbor in outgoing {
                let Some(target) = self.graph.symbol(&neighbor.symbol) else {
                    continue;
                };
                let entry = consumes.entry(target.name.clone()).or_insert(0.0);
                *entry = entry.max(neighbor.confidence);
            }
        }
        consumes
    }

    fn fan_out(&self, component: &[&'a Symbol]) -> usize {
        let own: BTreeSet<&SymbolId> = component.iter().map(|s| &s.id).collect();
        let mut neighbors: BTreeSet<SymbolId> = BTreeSet::new();
        for symbol in component {
            for neighbor in self.graph.neighbors(&symbol.id, &[], EdgeDirection::Both) {
                if !own.contains(&neighbor.symbol) {
                    neighbors.insert(neighbor.symbol);
                }
            }
        }
        neighbors.len()
    }

    /// Build the drafts for one step, in split order.
    pub fn build(&self, step: &Step, resolved: &ResolvedStep) -> Vec<TaskDraft> {
        let revision = self.graph.revision();
        let touched = self.touched_symbols(resolved);
        let mut components = self.components(&touched);
        if components.is_empty() {
            components.push(Vec::new());
        }
        let split = components.len() > 1;

        let known_names: BTreeSet<&str> = touched
            .iter()
            .filter(|s| s.kind != SymbolKind::Module)
            .map(|s| s.name.as_str())
            .collect();
        let new_names: Vec<&String> = if step.kind.produces_symbols() {
            resolved
                .intent
                .subject_names
                .iter()
                .filter(|n| !known_names.contains(n.as_str()))
                .collect()
        } else {
            Vec::new()
        };
        let component_files: BTreeSet<&str> = touched.iter().map(|s| s.file()).collect();

        let mut drafts = Vec::with_capacity(components.len());
        for (k, component) in components.iter().enumerate() {
            let first = k == 0;
            let id = if split {
                format!("task-{}-{}", resolved.step, k + 1)
            } else {
                format!("task-{}", resolved.step)
            };

            let mut paths: BTreeSet<String> =
                component.iter().map(|s| s.file().to_string()).collect();
            if first {
                paths.extend(
                    resolved
                        .all_paths()
                        .filter(|p| !component_files.contains(p.as_str()))
                        .cloned(),
                );
            }

            let mut produces: BTreeSet<String> = BTreeSet::new();
            if step.kind.produces_symbols() {
                produces.extend(
                    component
                        .iter()
                        .filter(|s| s.kind != SymbolKind::Module)
                        .map(|s| s.name.clone()),
                );
                if first {
                    produces.extend(new_names.iter().map(|n| (*n).clone()));
                }
            }

            let mut consumes = self.edge_consumption(component);
            for name in &resolved.intent.consumed_names {
                let entry = consumes.entry(name.clone()).or_insert(0.0);
                *entry = entry.max(TEXT_CONSUMPTION_CONFIDENCE);
            }

            let touched_lines: u32 = component.iter().map(|s| s.span.line_count()).sum();
            let touched_complexity: u32 = component.iter().map(|s| s.complexity).sum();
            let inputs = ComplexityInputs::estimate(
                step.kind,
                paths.len(),
                component.len(),
                touched_complexity,
                touched_lines,
                if first { new_names.len() } else { 0 },
                self.fan_out(component),
            );
            let score = complexity::score(self.policy, &inputs);

            let mut context_refs: BTreeSet<ContextRef> = component
                .iter()
                .map(|s| ContextRef(format!("sym:{}@{revision}", s.id)))
                .collect();
            context_refs.extend(paths.iter().map(|p| ContextRef(format!("file:{p}@{revision}"))));

            debug!(
                task = %id,
                touched = component.len(),
                produces = produces.len(),
                consumes = consumes.len(),
                score,
                "built task"
            );

            drafts.push(TaskDraft {
                task: CodingTask {
                    id,
                    step: resolved.step,
                    kind: step.kind,
                    goal: step.goal.clone(),
                    paths: paths.into_iter().collect(),
                    depends_on: BTreeSet::new(),
                    complexity: complexity::label(self.policy, score),
                    complexity_score: score,
                    context_refs: context_refs.into_iter().collect(),
                    unresolved_path: resolved.unresolved,
                    parallel_group: 0,
                },
                touched: component.iter().map(|s| s.id.clone()).collect(),
                produces,
                consumes,
            });
        }
        drafts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::parser::ParserRegistry;
    use crate::models::{Complexity, StepKind};
    use crate::planner::intent::analyze_step;

    fn graph(files: &[(&str, &str)]) -> DependencyGraph {
        let registry = ParserRegistry::default();
        DependencyGraph::from_results(
            "repo",
            "r1",
            files.iter().map(|(p, c)| registry.parse(p, c)),
        )
    }

    fn resolved(step: &Step, number: usize, paths: &[&str], new_paths: &[&str]) -> ResolvedStep {
        ResolvedStep {
            step: number,
            paths: paths.iter().map(|p| p.to_string()).collect(),
            new_paths: new_paths.iter().map(|p| p.to_string()).collect(),
            unresolved: paths.is_empty() && new_paths.is_empty(),
            intent: analyze_step(step),
        }
    }

    #[test]
    fn test_independent_symbols_split_into_two_tasks() {
        let g = graph(&[(
            "report.py",
            "def render_header():\n    return 1\n\ndef render_footer():\n    return 2\n",
        )]);
        let policy = ComplexityPolicy::default();
        let step = Step::new(StepKind::Edit, "restyle `render_header` and `render_footer`");
        let target = resolved(&step, 1, &["report.py"], &[]);
        let drafts = TaskBuilder::new(&g, &policy).build(&step, &target);
        let ids: Vec<&str> = drafts.iter().map(|d| d.task.id.as_str()).collect();
        assert_eq!(ids, vec!["task-1-1", "task-1-2"]);
        assert!(drafts.iter().all(|d| d.task.paths == vec!["report.py".to_string()]));
        assert_eq!(drafts[0].touched, vec![SymbolId::new("report.py", "report.render_footer")]);
    }

    #[test]
    fn test_connected_symbols_stay_together() {
        let g = graph(&[(
            "report.py",
            "def render_header():\n    return 1\n\ndef render_page():\n    render_header()\n",
        )]);
        let policy = ComplexityPolicy::default();
        let step = Step::new(StepKind::Edit, "restyle `render_header` and `render_page`");
        let target = resolved(&step, 2, &["report.py"], &[]);
        let drafts = TaskBuilder::new(&g, &policy).build(&step, &target);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].task.id, "task-2");
        assert_eq!(drafts[0].touched.len(), 2);
        assert_eq!(drafts[0].consumes.get("render_header"), Some(&1.0));
    }

    #[test]
    fn test_add_step_produces_new_names_and_consumes_text_names() {
        let g = graph(&[("a.py", "def helper():\n    pass\n")]);
        let policy = ComplexityPolicy::default();
        let step = Step::new(StepKind::Add, "add `validate()` in `a.py` that calls `normalize()`");
        let target = resolved(&step, 1, &["a.py"], &[]);
        let drafts = TaskBuilder::new(&g, &policy).build(&step, &target);
        assert_eq!(drafts.len(), 1);
        let draft = &drafts[0];
        assert!(draft.produces.contains("validate"));
        assert_eq!(draft.consumes.get("normalize"), Some(&TEXT_CONSUMPTION_CONFIDENCE));
        // No symbol matched, so the module stands in.
        assert_eq!(draft.touched, vec![SymbolId::new("a.py", "a")]);
        assert!(draft
            .task
            .context_refs
            .contains(&ContextRef("file:a.py@r1".to_string())));
    }

    #[test]
    fn test_new_file_task_without_symbols() {
        let g = graph(&[]);
        let policy = ComplexityPolicy::default();
        let step = Step::new(StepKind::Add, "add `audit()`").with_paths(["audit.py"]);
        let target = resolved(&step, 3, &[], &["audit.py"]);
        let drafts = TaskBuilder::new(&g, &policy).build(&step, &target);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].task.id, "task-3");
        assert_eq!(drafts[0].task.paths, vec!["audit.py".to_string()]);
        assert_eq!(drafts[0].task.complexity, Complexity::Trivial);
        assert!(drafts[0].produces.contains("audit"));
    }

    #[test]
    fn test_unresolved_step_still_yields_a_task() {
        let g = graph(&[]);
        let policy = ComplexityPolicy::default();
        let step = Step::new(StepKind::Edit, "fix `ghostHandler`");
        let drafts = TaskBuilder::new(&g, &policy).build(&step, &resolved(&step, 1, &[], &[]));
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].task.unresolved_path);
        assert!(drafts[0].task.paths.is_empty());
    }
}
