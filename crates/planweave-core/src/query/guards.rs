//! Shared guardrails for query payload bounds and traversal limits.

pub const MAX_QUERY_LENGTH: usize = 512;
pub const MAX_SEARCH_LIMIT: usize = 100;

/// Candidate identifiers taken from one step's goal and hints.
pub const MAX_CANDIDATE_NAMES: usize = 32;
/// Paths a single step may resolve to through retrieval.
pub const MAX_STEP_PATHS: usize = 16;
/// Files pulled in by following imports one hop out of the touched files.
pub const MAX_IMPORT_EXPANSION: usize = 64;
/// DFS steps spent enumerating cycles inside one strongly connected component.
pub const MAX_CYCLE_SEARCH_STEPS: usize = 100_000;

pub fn clamp_int(value: usize, minimum: usize, maximum: usize) -> usize {
    value.max(minimum).min(maximum)
}

pub fn clamp_limit(value: usize, maximum: usize) -> usize {
    clamp_int(value, 1, maximum)
}

/// Trim and cut to [`MAX_QUERY_LENGTH`] bytes on a character boundary.
pub fn truncate_query(query: &str) -> String {
    let stripped = query.trim();
    if stripped.len() <= MAX_QUERY_LENGTH {
        return stripped.to_string();
    }
    let mut end = MAX_QUERY_LENGTH;
    while !stripped.is_char_boundary(end) {
        end -= 1;
    }
    stripped[..end].to_string()
}
