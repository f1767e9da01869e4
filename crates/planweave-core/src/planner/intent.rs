//! Candidate names and paths from a step's goal and hints.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::indexer::filesystem::{normalize_path, SOURCE_EXTENSIONS};
use crate::models::Step;
use crate::query::guards::MAX_CANDIDATE_NAMES;

/// What a step talks about: names it works on, names it relies on, and
/// any file paths it mentions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StepIntent {
    /// Names before the first consumption marker, plus hint names.
    pub subject_names: Vec<String>,
    /// Names after the first consumption marker.
    pub consumed_names: Vec<String>,
    pub path_tokens: Vec<String>,
}

impl StepIntent {
    pub fn all_names(&self) -> impl Iterator<Item = &String> {
        self.subject_names.iter().chain(self.consumed_names.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.subject_names.is_empty()
            && self.consumed_names.is_empty()
            && self.path_tokens.is_empty()
    }
}

static BACKTICK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").unwrap());

static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    let extensions = SOURCE_EXTENSIONS.join("|");
    Regex::new(&format!(r"(?:\./)?[A-Za-z0-9_\-]+(?:/[A-Za-z0-9_\-.]+)*\.(?:{extensions})\b")).unwrap()
});

static CALL_SYNTAX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_][A-Za-z0-9_.]*)\(").unwrap());

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*").unwrap());

static CAMEL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z0-9][A-Z]").unwrap());

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

static CONSUMPTION_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:calls?|calling|uses?|using|invokes?|invoking|extends?|extending|inherits?|inheriting|implements?|implementing|depends\s+on)\b",
    )
    .unwrap()
});

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "class", "code", "def", "do", "e.g", "for",
    "from", "func", "function", "if", "in", "into", "is", "it", "its", "method", "new", "not",
    "of", "on", "or", "so", "that", "the", "then", "this", "to", "use", "when", "with",
];

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word.to_lowercase().as_str())
}

fn is_source_path(token: &str) -> bool {
    token
        .rsplit_once('.')
        .map(|(stem, ext)| {
            !stem.is_empty() && SOURCE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
        })
        .unwrap_or(false)
}

/// snake_case, camelCase and PascalCase-with-humps words look like code.
fn is_code_shaped(word: &str) -> bool {
    (word.contains('_') && word.chars().any(|c| c.is_ascii_alphabetic()))
        || CAMEL_RE.is_match(word)
}

/// Reduce `pkg.mod.name()` to `name`.
fn simple_name(token: &str) -> Option<String> {
    let trimmed = token.trim().trim_end_matches("()").trim_end_matches('(');
    let last = trimmed.rsplit('.').next()?.trim();
    if IDENT_RE.is_match(last) && !is_stopword(last) {
        Some(last.to_string())
    } else {
        None
    }
}

struct Collector {
    names: Vec<(usize, String)>,
    paths: Vec<String>,
}

impl Collector {
    fn name(&mut self, position: usize, token: &str) {
        if let Some(name) = simple_name(token) {
            self.names.push((position, name));
        }
    }

    fn path(&mut self, token: &str) {
        let normalized = normalize_path(token);
        if !normalized.is_empty() && !self.paths.contains(&normalized) {
            self.paths.push(normalized);
        }
    }
}

/// Positions covered by backtick spans, blanked so markers inside code are
/// not mistaken for prose.
fn prose_only(text: &str) -> String {
    BACKTICK_RE
        .replace_all(text, |caps: &regex::Captures<'_>| " ".repeat(caps[0].len()))
        .into_owned()
}

fn is_outside(covered: &[(usize, usize)], start: usize) -> bool {
    !covered.iter().any(|(s, e)| *s <= start && start < *e)
}

fn scan_text(text: &str, collector: &mut Collector) {
    let mut covered: Vec<(usize, usize)> = Vec::new();

    for caps in BACKTICK_RE.captures_iter(text) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        covered.push((whole.start(), whole.end()));
        let content = inner.as_str().trim();
        if is_source_path(content) && !content.contains('(') {
            collector.path(content);
        } else {
            collector.name(whole.start(), content);
        }
    }

    for m in PATH_RE.find_iter(text) {
        if is_outside(&covered, m.start()) {
            covered.push((m.start(), m.end()));
            collector.path(m.as_str());
        }
    }

    for caps in CALL_SYNTAX_RE.captures_iter(text) {
        if let Some(m) = caps.get(1) {
            if is_outside(&covered, m.start()) {
                collector.name(m.start(), m.as_str());
            }
        }
    }

    for m in WORD_RE.find_iter(text) {
        if !is_outside(&covered, m.start()) {
            continue;
        }
        let word = m.as_str();
        if word.contains('.') || is_code_shaped(word) {
            collector.name(m.start(), word);
        }
    }
}

fn dedup_preserving_order(
    names: impl IntoIterator<Item = String>,
    seen: &mut BTreeSet<String>,
) -> Vec<String> {
    names.into_iter().filter(|n| seen.insert(n.clone())).collect()
}

/// Split a step's goal and hints into subject names, consumed names and
/// path tokens. Deterministic for a given step.
pub fn analyze_step(step: &Step) -> StepIntent {
    let mut goal = Collector {
        names: Vec::new(),
        paths: Vec::new(),
    };
    scan_text(&step.goal, &mut goal);

    let marker = CONSUMPTION_MARKER_RE
        .find(&prose_only(&step.goal))
        .map(|m| m.start());

    goal.names.sort_by_key(|(position, _)| *position);
    let (before, after): (Vec<_>, Vec<_>) = goal
        .names
        .into_iter()
        .partition(|(position, _)| marker.map_or(true, |m| *position < m));

    let mut hints = Collector {
        names: Vec::new(),
        paths: goal.paths,
    };
    for hint in &step.hints {
        let trimmed = hint.trim();
        if is_source_path(trimmed) && !trimmed.contains(char::is_whitespace) {
            hints.path(trimmed);
        } else if IDENT_RE.is_match(trimmed) || (trimmed.contains('.') && !trimmed.contains(' ')) {
            hints.name(0, trimmed);
        } else {
            scan_text(trimmed, &mut hints);
        }
    }

    let mut seen = BTreeSet::new();
    let mut subject_names = dedup_preserving_order(
        before
            .into_iter()
            .map(|(_, n)| n)
            .chain(hints.names.into_iter().map(|(_, n)| n)),
        &mut seen,
    );
    let mut consumed_names = dedup_preserving_order(after.into_iter().map(|(_, n)| n), &mut seen);

    subject_names.truncate(MAX_CANDIDATE_NAMES);
    consumed_names.truncate(MAX_CANDIDATE_NAMES.saturating_sub(subject_names.len()));

    StepIntent {
        subject_names,
        consumed_names,
        path_tokens: hints.paths,
    }
}
