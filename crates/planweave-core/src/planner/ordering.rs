//! Task-level DAG, Kahn ordering and cycle breaking.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::models::{CodingTask, DroppedEdge, SymbolId, Warning};
use crate::planner::tasks::TaskDraft;
use crate::store::cycles::elementary_cycles;
use crate::store::graph::DependencyGraph;

/// Consumer index → producer index → confidence.
type TaskEdges = BTreeMap<(usize, usize), f64>;

/// Ordered tasks ready to go into a bundle.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderedTasks {
    pub tasks: Vec<CodingTask>,
    pub parallel_groups: Vec<Vec<String>>,
    pub force_sequential: bool,
    pub warnings: Vec<Warning>,
}

pub struct OrderingResolver<'a> {
    graph: &'a DependencyGraph,
    max_cycles: usize,
}

/// Draw consumer → producer edges between tasks of different steps.
fn task_edges(drafts: &[TaskDraft]) -> TaskEdges {
    let mut edges = TaskEdges::new();
    for (c, consumer) in drafts.iter().enumerate() {
        for (p, producer) in drafts.iter().enumerate() {
            if consumer.task.step == producer.task.step {
                continue;
            }
            let confidence = consumer
                .consumes
                .iter()
                .filter(|(name, _)| producer.produces.contains(*name))
                .map(|(_, confidence)| *confidence)
                .fold(None, |best: Option<f64>, value| {
                    Some(best.map_or(value, |b| b.max(value)))
                });
            if let Some(confidence) = confidence {
                edges.insert((c, p), confidence);
            }
        }
    }
    edges
}

/// Kahn order plus the parallel level of every task.
struct KahnOrder {
    order: Vec<usize>,
    levels: Vec<usize>,
}

/// Kahn's algorithm that always takes the ready task with the lowest draft
/// index (ascending step, then split index). A task's level is one past the
/// deepest task it depends on. `None` when a cycle remains.
fn kahn_order(count: usize, edges: &TaskEdges) -> Option<KahnOrder> {
    let mut pending = vec![0usize; count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
    for &(consumer, producer) in edges.keys() {
        pending[consumer] += 1;
        dependents[producer].push(consumer);
    }

    let mut ready: BTreeSet<usize> = (0..count).filter(|&i| pending[i] == 0).collect();
    let mut levels = vec![0usize; count];
    let mut order = Vec::with_capacity(count);
    while let Some(task) = ready.pop_first() {
        order.push(task);
        for &dependent in &dependents[task] {
            levels[dependent] = levels[dependent].max(levels[task] + 1);
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }
    (order.len() == count).then_some(KahnOrder { order, levels })
}

fn task_cycles(count: usize, edges: &TaskEdges, max_cycles: usize) -> Vec<Vec<usize>> {
    let nodes: Vec<usize> = (0..count).collect();
    let pairs: Vec<(usize, usize)> = edges.keys().copied().collect();
    elementary_cycles(&nodes, &pairs, max_cycles)
}

fn cycle_edges(cycle: &[usize]) -> Vec<(usize, usize)> {
    (0..cycle.len())
        .map(|i| (cycle[i], cycle[(i + 1) % cycle.len()]))
        .collect()
}

impl<'a> OrderingResolver<'a> {
    pub fn new(graph: &'a DependencyGraph, max_cycles: usize) -> Self {
        Self { graph, max_cycles }
    }

    /// Drop the strictly lowest-confidence edge of each cycle. A cycle
    /// whose minimum is shared keeps all its edges.
    fn break_cycles(
        &self,
        drafts: &[TaskDraft],
        edges: &mut TaskEdges,
        cycles: &[Vec<usize>],
    ) -> Vec<DroppedEdge> {
        let mut dropped = Vec::new();
        for cycle in cycles {
            let members = cycle_edges(cycle);
            if members.iter().any(|e| !edges.contains_key(e)) {
                // Already broken by an earlier drop.
                continue;
            }
            let min = members
                .iter()
                .map(|e| edges[e])
                .fold(f64::INFINITY, f64::min);
            let lowest: Vec<&(usize, usize)> =
                members.iter().filter(|e| edges[*e] == min).collect();
            if lowest.len() != 1 {
                let members: Vec<&str> =
                    cycle.iter().map(|&i| drafts[i].task.id.as_str()).collect();
                warn!(
                    cycle = ?members,
                    confidence = min,
                    "cycle has no unique weakest edge"
                );
                continue;
            }
            let victim = *lowest[0];
            edges.remove(&victim);
            let edge = DroppedEdge {
                consumer: drafts[victim.0].task.id.clone(),
                producer: drafts[victim.1].task.id.clone(),
                confidence: min,
            };
            warn!(
                consumer = %edge.consumer,
                producer = %edge.producer,
                confidence = edge.confidence,
                "dropped task dependency to break cycle"
            );
            dropped.push(edge);
        }
        dropped
    }

    fn symbol_cycles(&self, drafts: &[TaskDraft], cycles: &[Vec<usize>]) -> Vec<Vec<String>> {
        let involved: BTreeSet<usize> = cycles.iter().flatten().copied().collect();
        let subset: Vec<SymbolId> = involved
            .iter()
            .flat_map(|&i| drafts[i].touched.iter().cloned())
            .collect();
        self.graph
            .find_cycles(&subset, self.max_cycles)
            .into_iter()
            .map(|cycle| cycle.iter().map(ToString::to_string).collect())
            .collect()
    }

    /// Order drafts (given in step order) into the final task list.
    pub fn resolve(&self, drafts: Vec<TaskDraft>) -> OrderedTasks {
        let mut edges = task_edges(&drafts);
        let mut warnings = Vec::new();

        let sorted = match kahn_order(drafts.len(), &edges) {
            Some(sorted) => Some(sorted),
            None => {
                let cycles = task_cycles(drafts.len(), &edges, self.max_cycles);
                let dropped = self.break_cycles(&drafts, &mut edges, &cycles);
                warnings.push(Warning::CycleDetected {
                    cycles: cycles.len(),
                    dropped,
                    symbol_cycles: self.symbol_cycles(&drafts, &cycles),
                });
                kahn_order(drafts.len(), &edges)
            }
        };

        match sorted {
            Some(sorted) => Self::emit(drafts, &edges, sorted, warnings),
            None => {
                let remaining = task_cycles(drafts.len(), &edges, self.max_cycles).len();
                warn!(
                    remaining_cycles = remaining,
                    tasks = drafts.len(),
                    "falling back to sequential execution"
                );
                warnings.push(Warning::ForceSequential {
                    remaining_cycles: remaining,
                });
                Self::emit_sequential(drafts, warnings)
            }
        }
    }

    fn emit(
        drafts: Vec<TaskDraft>,
        edges: &TaskEdges,
        sorted: KahnOrder,
        warnings: Vec<Warning>,
    ) -> OrderedTasks {
        let ids: Vec<String> = drafts.iter().map(|d| d.task.id.clone()).collect();
        let mut slots: Vec<Option<CodingTask>> =
            drafts.into_iter().map(|d| Some(d.task)).collect();
        for &(consumer, producer) in edges.keys() {
            if let Some(task) = slots[consumer].as_mut() {
                task.depends_on.insert(ids[producer].clone());
            }
        }

        let group_count = sorted.levels.iter().max().map_or(0, |deepest| deepest + 1);
        let mut parallel_groups: Vec<Vec<String>> = vec![Vec::new(); group_count];
        for (index, &level) in sorted.levels.iter().enumerate() {
            parallel_groups[level].push(ids[index].clone());
        }

        let mut tasks = Vec::with_capacity(slots.len());
        for index in sorted.order {
            if let Some(mut task) = slots[index].take() {
                task.parallel_group = sorted.levels[index];
                tasks.push(task);
            }
        }
        info!(
            tasks = tasks.len(),
            groups = parallel_groups.len(),
            dependencies = edges.len(),
            "ordered tasks"
        );
        OrderedTasks {
            tasks,
            parallel_groups,
            force_sequential: false,
            warnings,
        }
    }

    /// Every task alone in its own group, in step order, with no
    /// dependencies recorded.
    fn emit_sequential(drafts: Vec<TaskDraft>, warnings: Vec<Warning>) -> OrderedTasks {
        let mut tasks = Vec::with_capacity(drafts.len());
        let mut parallel_groups = Vec::with_capacity(drafts.len());
        for (group, draft) in drafts.into_iter().enumerate() {
            let mut task = draft.task;
            task.depends_on.clear();
            task.parallel_group = group;
            parallel_groups.push(vec![task.id.clone()]);
            tasks.push(task);
        }
        OrderedTasks {
            tasks,
            parallel_groups,
            force_sequential: true,
            warnings,
        }
    }
}
