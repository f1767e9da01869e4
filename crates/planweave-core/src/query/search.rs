//! Symbol search over a dependency graph, usable as the retrieval backend.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::collaborators::{Retrieval, SearchFilter, SearchMatch};
use crate::errors::RetrievalError;
use crate::indexer::parser::ParserRegistry;
use crate::models::{Symbol, SymbolKind};
use crate::query::guards::{clamp_limit, truncate_query, MAX_SEARCH_LIMIT};
use crate::query::hybrid::rank_symbol;
use crate::store::graph::{DependencyGraph, EdgeDirection};

/// Ranks the symbols of one graph by lexical relevance to the query.
pub struct GraphRetrieval {
    graph: DependencyGraph,
}

impl GraphRetrieval {
    pub fn new(graph: DependencyGraph) -> Self {
        Self { graph }
    }

    /// Parse a set of files and index them.
    pub fn from_sources<'a>(
        repository: &str,
        revision: &str,
        files: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Self {
        let registry = ParserRegistry::default();
        let results = files
            .into_iter()
            .map(|(path, content)| registry.parse(path, content));
        Self::new(DependencyGraph::from_results(repository, revision, results))
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    fn accepts(filter: &SearchFilter, symbol: &Symbol) -> bool {
        if let Some(prefix) = &filter.path_prefix {
            if !symbol.file().starts_with(prefix.as_str()) {
                return false;
            }
        }
        if !filter.languages.is_empty() && !filter.languages.contains(&symbol.language) {
            return false;
        }
        // Module symbols only match when asked for explicitly.
        if filter.kinds.is_empty() {
            symbol.kind != SymbolKind::Module
        } else {
            filter.kinds.contains(&symbol.kind)
        }
    }

    fn traffic(&self, symbol: &Symbol) -> (usize, usize) {
        let neighbors = self.graph.neighbors(&symbol.id, &[], EdgeDirection::Both);
        let callers = neighbors
            .iter()
            .filter(|n| n.direction == EdgeDirection::Incoming)
            .count();
        (callers, neighbors.len() - callers)
    }
}

impl Retrieval for GraphRetrieval {
    fn search(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchMatch>, RetrievalError> {
        let query = truncate_query(query);
        if query.is_empty() {
            return Ok(vec![]);
        }
        let limit = clamp_limit(k, MAX_SEARCH_LIMIT);

        let mut scored: Vec<(f64, &Symbol)> = Vec::new();
        for path in self.graph.file_paths() {
            for symbol in self.graph.symbols_in_file(path) {
                if !Self::accepts(filter, symbol) {
                    continue;
                }
                let (callers, callees) = self.traffic(symbol);
                let score = rank_symbol(
                    &query,
                    &symbol.name,
                    &symbol.id.qualified_name,
                    callers,
                    callees,
                );
                if score > 0.0 {
                    scored.push((score, symbol));
                }
            }
        }
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.id.cmp(&b.1.id))
        });

        // One match per path: its best symbol.
        let mut seen_paths: BTreeSet<&str> = BTreeSet::new();
        let mut matches = Vec::new();
        for (score, symbol) in scored {
            if !seen_paths.insert(symbol.file()) {
                continue;
            }
            matches.push(SearchMatch {
                path: symbol.file().to_string(),
                score: (score * 1000.0).round() / 1000.0,
                symbol_name: (symbol.kind != SymbolKind::Module).then(|| symbol.name.clone()),
            });
            if matches.len() >= limit {
                break;
            }
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryRepository;

    fn retrieval() -> GraphRetrieval {
        let repo = MemoryRepository::new().with_revision(
            "r1",
            [
                ("forms/validate.py", "def validate():\n    pass\n\ndef validate_all():\n    validate()\n"),
                ("forms/render.py", "def render():\n    pass\n"),
                ("web/app.ts", "export function validateForm() {}\n"),
            ],
        );
        let files = repo.files("r1").unwrap();
        GraphRetrieval::from_sources("repo", "r1", files)
    }

    #[test]
    fn test_search_ranks_exact_match_first() {
        let matches = retrieval()
            .search("validate", 5, &SearchFilter::default())
            .unwrap();
        assert_eq!(matches[0].path, "forms/validate.py");
        assert_eq!(matches[0].symbol_name.as_deref(), Some("validate"));
        assert!(matches.iter().any(|m| m.path == "web/app.ts"));
        assert!(!matches.iter().any(|m| m.path == "forms/render.py"));
    }

    #[test]
    fn test_search_filter_and_limit() {
        let filter = SearchFilter {
            path_prefix: Some("web/".to_string()),
            ..SearchFilter::default()
        };
        let matches = retrieval().search("validate", 5, &filter).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "web/app.ts");

        let limited = retrieval()
            .search("validate", 1, &SearchFilter::default())
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_blank_query_returns_nothing() {
        assert!(retrieval()
            .search("   ", 5, &SearchFilter::default())
            .unwrap()
            .is_empty());
    }
}
