//! Elementary cycle enumeration over small directed graphs.
//!
//! Strongly connected components are found first with Tarjan's algorithm;
//! cycles are then enumerated per component by a rooted DFS that only
//! visits nodes ordered after the root, so every cycle is reported once,
//! starting at its smallest node.

use std::collections::BTreeSet;

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::{DiGraphMap, NodeTrait};

use crate::query::guards::MAX_CYCLE_SEARCH_STEPS;

struct CycleSearch<'g, N: NodeTrait> {
    graph: &'g DiGraphMap<N, ()>,
    component: BTreeSet<N>,
    max_cycles: usize,
    steps: usize,
    found: Vec<Vec<N>>,
}

impl<N: NodeTrait> CycleSearch<'_, N> {
    fn exhausted(&self) -> bool {
        self.found.len() >= self.max_cycles || self.steps >= MAX_CYCLE_SEARCH_STEPS
    }

    fn walk(&mut self, root: N, node: N, path: &mut Vec<N>, on_path: &mut BTreeSet<N>) {
        let mut successors: Vec<N> = self
            .graph
            .neighbors(node)
            .filter(|n| self.component.contains(n) && *n >= root)
            .collect();
        successors.sort();
        for next in successors {
            if self.exhausted() {
                return;
            }
            self.steps += 1;
            if next == root {
                self.found.push(path.clone());
            } else if !on_path.contains(&next) {
                path.push(next);
                on_path.insert(next);
                self.walk(root, next, path, on_path);
                on_path.remove(&next);
                path.pop();
            }
        }
    }
}

/// All elementary cycles of the graph given by `nodes` and `edges`, at most
/// `max_cycles` of them, each rotated to start at its smallest node and the
/// whole list sorted.
pub fn elementary_cycles<N: NodeTrait>(
    nodes: &[N],
    edges: &[(N, N)],
    max_cycles: usize,
) -> Vec<Vec<N>> {
    let mut graph: DiGraphMap<N, ()> = DiGraphMap::new();
    for node in nodes {
        graph.add_node(*node);
    }
    for (source, target) in edges {
        graph.add_edge(*source, *target, ());
    }

    let mut components = tarjan_scc(&graph);
    for component in components.iter_mut() {
        component.sort();
    }
    components.sort();

    let mut found: Vec<Vec<N>> = Vec::new();
    for component in components {
        if found.len() >= max_cycles {
            break;
        }
        if component.len() == 1 {
            let node = component[0];
            if graph.contains_edge(node, node) {
                found.push(vec![node]);
            }
            continue;
        }
        let mut search = CycleSearch {
            graph: &graph,
            component: component.iter().copied().collect(),
            max_cycles: max_cycles - found.len(),
            steps: 0,
            found: Vec::new(),
        };
        for root in &component {
            if search.exhausted() {
                break;
            }
            let mut path = vec![*root];
            let mut on_path = BTreeSet::from([*root]);
            search.walk(*root, *root, &mut path, &mut on_path);
        }
        found.extend(search.found);
    }
    found.sort();
    found.truncate(max_cycles);
    found
}
