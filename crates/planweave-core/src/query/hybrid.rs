//! Scoring helpers for symbol retrieval.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]+").unwrap());

pub fn tokens(value: &str) -> HashSet<String> {
    TOKEN_RE
        .find_iter(value)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

pub fn lexical_score(query: &str, name: &str, qualified_name: &str) -> f64 {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return 0.0;
    }
    let n = name.to_lowercase();
    let qn = qualified_name.to_lowercase();
    if q == n || q == qn {
        return 1.0;
    }
    if n.contains(&q) {
        return 0.9;
    }
    if qn.contains(&q) {
        return 0.8;
    }
    let query_tokens = tokens(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let target_tokens = tokens(&format!("{name} {qualified_name}"));
    if target_tokens.is_empty() {
        return 0.0;
    }
    let overlap = query_tokens.intersection(&target_tokens).count();
    overlap as f64 / query_tokens.len().max(1) as f64
}

/// Log-scaled call traffic through a symbol.
pub fn structural_score(callers: usize, callees: usize) -> f64 {
    ((callers + callees) as f64 + 1.0).ln() * 0.1
}

/// Lexical relevance dominates; traffic only separates close matches.
/// Symbols with no lexical relevance score zero.
pub fn rank_symbol(
    query: &str,
    name: &str,
    qualified_name: &str,
    callers: usize,
    callees: usize,
) -> f64 {
    let lex = lexical_score(query, name, qualified_name);
    if lex <= 0.0 {
        return 0.0;
    }
    (lex * 0.9) + (structural_score(callers, callees).min(1.0) * 0.1)
}
