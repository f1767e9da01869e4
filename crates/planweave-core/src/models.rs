//! Shared typed models used across parsing, graph storage, and planning.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Schema constants
// ---------------------------------------------------------------------------

/// Version of the persisted graph snapshot format. Bumped whenever
/// `FileEntry` or `ParseResult` change shape so stale cache rows are ignored.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Compute the SHA-256 hex digest of file content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Symbols and edges
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    TypeScript,
    Go,
    Unknown,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Java => "java",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Module,
    Function,
    Method,
    Class,
    Interface,
    Enum,
}

/// Identity of a symbol: the defining file plus its qualified name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolId {
    pub file: String,
    pub qualified_name: String,
}

impl SymbolId {
    pub fn new(file: impl Into<String>, qualified_name: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            qualified_name: qualified_name.into(),
        }
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.file, self.qualified_name)
    }
}

/// 1-based inclusive line range plus the byte range it covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub end_line: u32,
    pub start_byte: usize,
    pub end_byte: usize,
}

impl Span {
    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }

    pub fn encloses(&self, other: &Span) -> bool {
        self.start_byte <= other.start_byte && other.end_byte <= self.end_byte
    }

    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

/// A named, located unit of code. Immutable once parsed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    /// Simple (last-segment) name used for cross-file binding.
    pub name: String,
    pub kind: SymbolKind,
    pub span: Span,
    pub language: Language,
    /// 1 + number of branch points inside the span.
    pub complexity: u32,
}

impl Symbol {
    pub fn file(&self) -> &str {
        &self.id.file
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Calls,
    Imports,
    Inherits,
}

/// Whether an edge was found inside one file or bound across files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeOrigin {
    Local,
    Resolved,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: SymbolId,
    pub kind: EdgeKind,
    pub target: SymbolId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: SymbolId,
    pub target: SymbolId,
    pub kind: EdgeKind,
    pub confidence: f64,
    pub origin: EdgeOrigin,
}

impl Edge {
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source: self.source.clone(),
            kind: self.kind,
            target: self.target.clone(),
        }
    }
}

/// A reference out of a file that could not be bound locally. Bound later
/// against the whole graph by name (calls/inherits) or by path (imports).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub from: SymbolId,
    pub name: String,
    pub kind: EdgeKind,
    pub line: u32,
    pub receiver: Option<String>,
    /// Repository paths an import may point at, most specific first.
    #[serde(default)]
    pub candidates: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DegradedReason {
    SyntaxErrors { count: usize },
    UnsupportedLanguage,
    GrammarUnavailable,
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradedReason::SyntaxErrors { count } => write!(f, "{count} syntax error(s)"),
            DegradedReason::UnsupportedLanguage => write!(f, "unsupported language"),
            DegradedReason::GrammarUnavailable => write!(f, "grammar unavailable"),
        }
    }
}

/// Output of parsing one file. `degraded` is set when the result is
/// valid but imprecise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub path: String,
    pub language: Language,
    pub content_hash: String,
    pub symbols: Vec<Symbol>,
    pub edges: Vec<Edge>,
    pub references: Vec<Reference>,
    pub degraded: Option<DegradedReason>,
}

impl ParseResult {
    pub fn module_symbol(&self) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.kind == SymbolKind::Module)
    }
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Add,
    Edit,
    Remove,
    Refactor,
}

impl StepKind {
    /// Steps that bring symbols into existence or rename them.
    pub fn produces_symbols(self) -> bool {
        matches!(self, StepKind::Add | StepKind::Refactor)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub goal: String,
    pub kind: StepKind,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub hints: Vec<String>,
}

impl Step {
    pub fn new(kind: StepKind, goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            kind,
            paths: Vec::new(),
            hints: Vec::new(),
        }
    }

    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_hints<I, S>(mut self, hints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hints = hints.into_iter().map(Into::into).collect();
        self
    }
}

/// Ordered steps against one repository revision. Step numbers are the
/// 1-based positions in `steps`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub repository: String,
    pub revision: String,
    /// A cached ancestor revision the graph may be rebuilt from.
    #[serde(default)]
    pub base_revision: Option<String>,
    pub steps: Vec<Step>,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Trivial,
    Moderate,
    Complex,
}

/// Opaque handle resolved by the retrieval collaborator, never here.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextRef(pub String);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CodingTask {
    pub id: String,
    pub step: usize,
    pub kind: StepKind,
    pub goal: String,
    pub paths: Vec<String>,
    pub depends_on: BTreeSet<String>,
    pub complexity: Complexity,
    pub complexity_score: f64,
    pub context_refs: Vec<ContextRef>,
    pub unresolved_path: bool,
    pub parallel_group: usize,
}

/// A task-level dependency removed while breaking a cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DroppedEdge {
    pub consumer: String,
    pub producer: String,
    pub confidence: f64,
}

/// Non-fatal faults surfaced in the bundle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Warning {
    UnresolvedPath {
        step: usize,
        candidates: Vec<String>,
    },
    ParseDegraded {
        path: String,
        reason: String,
    },
    CacheUnavailable {
        detail: String,
    },
    RetrievalDegraded {
        step: usize,
        detail: String,
    },
    CycleDetected {
        cycles: usize,
        dropped: Vec<DroppedEdge>,
        symbol_cycles: Vec<Vec<String>>,
    },
    ForceSequential {
        remaining_cycles: usize,
    },
}

impl Warning {
    fn rank(&self) -> u8 {
        match self {
            Warning::UnresolvedPath { .. } => 0,
            Warning::RetrievalDegraded { .. } => 1,
            Warning::ParseDegraded { .. } => 2,
            Warning::CacheUnavailable { .. } => 3,
            Warning::CycleDetected { .. } => 4,
            Warning::ForceSequential { .. } => 5,
        }
    }

    fn sort_key(&self) -> (u8, String) {
        let detail = match self {
            Warning::UnresolvedPath { step, .. } | Warning::RetrievalDegraded { step, .. } => {
                format!("{step:08}")
            }
            Warning::ParseDegraded { path, .. } => path.clone(),
            Warning::CacheUnavailable { detail } => detail.clone(),
            Warning::CycleDetected { .. } | Warning::ForceSequential { .. } => String::new(),
        };
        (self.rank(), detail)
    }
}

/// Sort warnings into their canonical order and drop exact duplicates.
pub fn normalize_warnings(warnings: &mut Vec<Warning>) {
    warnings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    warnings.dedup();
}

/// Per-run measurements. They describe how a bundle was produced, not what
/// it says, so they vary with cache state; `elapsed_ms` is never
/// serialized, which keeps repeated runs over the same cache state
/// byte-identical.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleDiagnostics {
    pub cache_hit_ratio: f64,
    pub files_reused: usize,
    pub files_parsed: usize,
    #[serde(skip)]
    pub elapsed_ms: u64,
}

/// The engine's output: an acyclic, ordered set of tasks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskBundle {
    pub repository: String,
    pub revision: String,
    /// Tasks in execution order.
    pub tasks: Vec<CodingTask>,
    /// Tasks grouped by parallel level; every group only depends on
    /// earlier groups.
    pub parallel_groups: Vec<Vec<String>>,
    pub force_sequential: bool,
    pub warnings: Vec<Warning>,
    pub diagnostics: BundleDiagnostics,
}

#[derive(Serialize)]
struct FingerprintView<'a> {
    repository: &'a str,
    revision: &'a str,
    tasks: &'a [CodingTask],
    parallel_groups: &'a [Vec<String>],
    force_sequential: bool,
    warnings: Vec<&'a Warning>,
}

impl TaskBundle {
    pub fn task(&self, id: &str) -> Option<&CodingTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn tasks_for_step(&self, step: usize) -> Vec<&CodingTask> {
        self.tasks.iter().filter(|t| t.step == step).collect()
    }

    /// SHA-256 over everything except run diagnostics and cache
    /// availability notices. Two runs over the same plan and revision
    /// content must agree on it.
    pub fn fingerprint(&self) -> String {
        let view = FingerprintView {
            repository: &self.repository,
            revision: &self.revision,
            tasks: &self.tasks,
            parallel_groups: &self.parallel_groups,
            force_sequential: self.force_sequential,
            warnings: self
                .warnings
                .iter()
                .filter(|w| !matches!(w, Warning::CacheUnavailable { .. }))
                .collect(),
        };
        let encoded = serde_json::to_vec(&view).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        format!("{:x}", hasher.finalize())
    }
}
