//! Call and inheritance extraction for a single file.
//!
//! Call sites are found by regex scanning, attributed to the smallest
//! enclosing symbol, and bound locally when the callee is defined in the
//! same file. Everything else becomes a [`Reference`] for the graph store
//! to bind against other files.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::models::{Edge, EdgeKind, EdgeOrigin, Language, Reference, Symbol, SymbolKind};

/// A single call-site extracted from source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub callee_name: String,
    pub line_number: u32,
    pub receiver_name: Option<String>,
}

static CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:([A-Za-z_][A-Za-z0-9_]*)\s*\.\s*)?([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap()
});

static PY_BASES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*class\s+[A-Za-z_][A-Za-z0-9_]*\s*\(([^)]*)\)").unwrap());

static HERITAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:extends|implements)\b").unwrap());

static GENERIC_ARGS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^<>]*>").unwrap());

static QUALIFIED_IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").unwrap());

/// Language keywords that look like function calls but are not.
fn is_call_keyword(name: &str) -> bool {
    matches!(
        name,
        "if" | "elif"
            | "for"
            | "while"
            | "switch"
            | "return"
            | "new"
            | "function"
            | "class"
            | "catch"
            | "def"
            | "func"
            | "super"
            | "print"
            | "typeof"
            | "sizeof"
            | "await"
            | "yield"
            | "not"
            | "and"
            | "or"
            | "in"
            | "assert"
            | "with"
            | "except"
    )
}

fn is_comment_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('#')
        || trimmed.starts_with("//")
        || trimmed.starts_with("/*")
        || trimmed.starts_with('*')
}

/// Extract call-sites from source text.
///
/// Skips keywords, comment lines, and the defining occurrence of a name on
/// the line where that definition starts.
pub fn extract_call_sites(
    source: &str,
    definitions_by_line: &BTreeMap<u32, BTreeSet<String>>,
) -> Vec<CallSite> {
    let mut callsites = Vec::new();
    for (index, line) in source.lines().enumerate() {
        if is_comment_line(line) {
            continue;
        }
        let line_number = index as u32 + 1;
        let defined_here = definitions_by_line.get(&line_number);
        for caps in CALL_RE.captures_iter(line) {
            let Some(name) = caps.get(2).map(|m| m.as_str()) else {
                continue;
            };
            if is_call_keyword(name) {
                continue;
            }
            let receiver = caps.get(1).map(|m| m.as_str().to_string());
            if receiver.is_none() && defined_here.is_some_and(|names| names.contains(name)) {
                continue;
            }
            callsites.push(CallSite {
                callee_name: name.to_string(),
                line_number,
                receiver_name: receiver,
            });
        }
    }
    callsites
}

fn last_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Base type names named in a class header.
pub fn inheritance_bases(header: &str, language: Language) -> Vec<String> {
    let mut bases = Vec::new();
    match language {
        Language::Python => {
            if let Some(caps) = PY_BASES_RE.captures(header) {
                for item in caps[1].split(',') {
                    let item = item.trim();
                    if item.is_empty() || item.contains('=') {
                        continue;
                    }
                    if QUALIFIED_IDENT_RE.is_match(item) {
                        bases.push(last_segment(item).to_string());
                    }
                }
            }
        }
        Language::Java | Language::TypeScript => {
            let stripped = GENERIC_ARGS_RE.replace_all(header, "");
            let head = stripped.split('{').next().unwrap_or("");
            for clause in HERITAGE_RE.split(head).skip(1) {
                for item in clause.split(',') {
                    let item = item.trim();
                    if QUALIFIED_IDENT_RE.is_match(item) {
                        bases.push(last_segment(item).to_string());
                    }
                }
            }
        }
        Language::Go | Language::Unknown => {}
    }
    bases.dedup();
    bases
}

/// Find the smallest symbol whose span contains `line`.
pub fn caller_for_line(line: u32, symbols: &[Symbol]) -> Option<&Symbol> {
    symbols
        .iter()
        .filter(|s| s.span.contains_line(line))
        .min_by_key(|s| (s.span.end_byte - s.span.start_byte, s.span.start_byte))
}

fn owner_scope(symbol: &Symbol) -> Option<&str> {
    symbol
        .id
        .qualified_name
        .rsplit_once('.')
        .map(|(prefix, _)| prefix)
}

fn is_self_receiver(receiver: Option<&str>) -> bool {
    matches!(receiver, None | Some("self") | Some("cls") | Some("this"))
}

/// Local edges and unresolved references for one file.
pub struct FileLinks {
    pub edges: Vec<Edge>,
    pub references: Vec<Reference>,
}

/// Bind call sites and inheritance headers for one file.
///
/// `headers` maps a class symbol's qualified name to its header line.
pub fn link_file(
    source: &str,
    language: Language,
    symbols: &[Symbol],
    headers: &BTreeMap<String, String>,
) -> FileLinks {
    let mut definitions_by_line: BTreeMap<u32, BTreeSet<String>> = BTreeMap::new();
    let mut by_name: BTreeMap<&str, Vec<&Symbol>> = BTreeMap::new();
    for symbol in symbols.iter().filter(|s| s.kind != SymbolKind::Module) {
        definitions_by_line
            .entry(symbol.span.start_line)
            .or_default()
            .insert(symbol.name.clone());
        by_name.entry(symbol.name.as_str()).or_default().push(symbol);
    }

    let mut edges: BTreeMap<(String, EdgeKind, String), Edge> = BTreeMap::new();
    let mut references: Vec<Reference> = Vec::new();
    let mut seen_refs: BTreeSet<(String, EdgeKind, String)> = BTreeSet::new();

    for callsite in extract_call_sites(source, &definitions_by_line) {
        let Some(caller) = caller_for_line(callsite.line_number, symbols) else {
            continue;
        };
        let receiver = callsite.receiver_name.as_deref();
        let local: Vec<&Symbol> = by_name
            .get(callsite.callee_name.as_str())
            .map(|candidates| {
                candidates
                    .iter()
                    .copied()
                    .filter(|c| c.id != caller.id)
                    .collect()
            })
            .unwrap_or_default();

        let local = if !local.is_empty() && is_self_receiver(receiver) {
            let scoped: Vec<&Symbol> = local
                .iter()
                .copied()
                .filter(|c| c.kind == SymbolKind::Method && owner_scope(c) == owner_scope(caller))
                .collect();
            if caller.kind == SymbolKind::Method && !scoped.is_empty() {
                scoped
            } else {
                local
            }
        } else if !local.is_empty() && receiver.is_some() {
            // `obj.name(` only binds locally to methods of a type called like
            // the receiver; anything else is left for cross-file binding.
            local
                .into_iter()
                .filter(|c| {
                    owner_scope(c)
                        .map(|scope| {
                            last_segment(scope).eq_ignore_ascii_case(receiver.unwrap_or(""))
                        })
                        .unwrap_or(false)
                })
                .collect()
        } else {
            local
        };

        if local.is_empty() {
            let key = (
                caller.id.qualified_name.clone(),
                EdgeKind::Calls,
                callsite.callee_name.clone(),
            );
            if seen_refs.insert(key) {
                references.push(Reference {
                    from: caller.id.clone(),
                    name: callsite.callee_name.clone(),
                    kind: EdgeKind::Calls,
                    line: callsite.line_number,
                    receiver: callsite.receiver_name.clone(),
                    candidates: Vec::new(),
                });
            }
            continue;
        }

        let confidence = if local.len() == 1 { 1.0 } else { 0.8 };
        for target in local {
            let key = (
                caller.id.qualified_name.clone(),
                EdgeKind::Calls,
                target.id.qualified_name.clone(),
            );
            edges.entry(key).or_insert_with(|| Edge {
                source: caller.id.clone(),
                target: target.id.clone(),
                kind: EdgeKind::Calls,
                confidence,
                origin: EdgeOrigin::Local,
            });
        }
    }

    for symbol in symbols
        .iter()
        .filter(|s| matches!(s.kind, SymbolKind::Class | SymbolKind::Interface))
    {
        let Some(header) = headers.get(&symbol.id.qualified_name) else {
            continue;
        };
        for base in inheritance_bases(header, language) {
            let local: Vec<&Symbol> = by_name
                .get(base.as_str())
                .map(|c| {
                    c.iter()
                        .copied()
                        .filter(|t| t.id != symbol.id)
                        .filter(|t| matches!(t.kind, SymbolKind::Class | SymbolKind::Interface))
                        .collect()
                })
                .unwrap_or_default();
            if local.is_empty() {
                let key = (symbol.id.qualified_name.clone(), EdgeKind::Inherits, base.clone());
                if seen_refs.insert(key) {
                    references.push(Reference {
                        from: symbol.id.clone(),
                        name: base,
                        kind: EdgeKind::Inherits,
                        line: symbol.span.start_line,
                        receiver: None,
                        candidates: Vec::new(),
                    });
                }
                continue;
            }
            let confidence = if local.len() == 1 { 1.0 } else { 0.8 };
            for target in local {
                let key = (
                    symbol.id.qualified_name.clone(),
                    EdgeKind::Inherits,
                    target.id.qualified_name.clone(),
                );
                edges.entry(key).or_insert_with(|| Edge {
                    source: symbol.id.clone(),
                    target: target.id.clone(),
                    kind: EdgeKind::Inherits,
                    confidence,
                    origin: EdgeOrigin::Local,
                });
            }
        }
    }

    FileLinks {
        edges: edges.into_values().collect(),
        references,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Span, SymbolId};

    fn make_symbol(qualified_name: &str, kind: SymbolKind, start: u32, end: u32) -> Symbol {
        let name = qualified_name.rsplit('.').next().unwrap().to_string();
        Symbol {
            id: SymbolId::new("mod.py", qualified_name),
            name,
            kind,
            span: Span {
                start_line: start,
                end_line: end,
                start_byte: start as usize * 100,
                end_byte: end as usize * 100 + 99,
            },
            language: Language::Python,
            complexity: 1,
        }
    }

    #[test]
    fn test_extract_call_sites_basic() {
        let calls = extract_call_sites("x = foo()\ny = bar.baz()\n", &BTreeMap::new());
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].callee_name, "foo");
        assert_eq!(calls[0].line_number, 1);
        assert!(calls[0].receiver_name.is_none());
        assert_eq!(calls[1].callee_name, "baz");
        assert_eq!(calls[1].receiver_name.as_deref(), Some("bar"));
    }

    #[test]
    fn test_extract_call_sites_skips_keywords_comments_and_definitions() {
        let mut defs = BTreeMap::new();
        defs.insert(1, BTreeSet::from(["run".to_string()]));
        let src = "public void run() {\n  // helper()\n  if (x) { go(); }\n";
        let calls = extract_call_sites(src, &defs);
        let names: Vec<&str> = calls.iter().map(|c| c.callee_name.as_str()).collect();
        assert_eq!(names, vec!["go"]);
    }

    #[test]
    fn test_inheritance_bases_python() {
        let bases = inheritance_bases(
            "class Repo(base.Store, Mixin, metaclass=Meta):",
            Language::Python,
        );
        assert_eq!(bases, vec!["Store".to_string(), "Mixin".to_string()]);
    }

    #[test]
    fn test_inheritance_bases_java_and_typescript() {
        let bases = inheritance_bases(
            "public class Cache<K> extends Base<K> implements Store, java.io.Closeable {",
            Language::Java,
        );
        assert_eq!(
            bases,
            vec!["Base".to_string(), "Store".to_string(), "Closeable".to_string()]
        );
        let ts = inheritance_bases("export class View extends Component {", Language::TypeScript);
        assert_eq!(ts, vec!["Component".to_string()]);
    }

    #[test]
    fn test_caller_for_line_picks_smallest() {
        let outer = make_symbol("mod.Outer", SymbolKind::Class, 1, 20);
        let inner = make_symbol("mod.Outer.inner", SymbolKind::Method, 5, 10);
        let symbols = vec![outer, inner];
        assert_eq!(caller_for_line(7, &symbols).unwrap().name, "inner");
        assert_eq!(caller_for_line(15, &symbols).unwrap().name, "Outer");
        assert!(caller_for_line(30, &symbols).is_none());
    }

    #[test]
    fn test_link_file_local_edge_and_reference() {
        let src = "def main():\n    helper()\n    external()\n\ndef helper():\n    return 1\n";
        let symbols = vec![
            make_symbol("mod", SymbolKind::Module, 1, 6),
            make_symbol("mod.main", SymbolKind::Function, 1, 3),
            make_symbol("mod.helper", SymbolKind::Function, 5, 6),
        ];
        let links = link_file(src, Language::Python, &symbols, &BTreeMap::new());
        assert_eq!(links.edges.len(), 1);
        assert_eq!(links.edges[0].source.qualified_name, "mod.main");
        assert_eq!(links.edges[0].target.qualified_name, "mod.helper");
        assert_eq!(links.edges[0].confidence, 1.0);
        assert_eq!(links.references.len(), 1);
        assert_eq!(links.references[0].name, "external");
        assert_eq!(links.references[0].from.qualified_name, "mod.main");
    }

    #[test]
    fn test_link_file_class_scoped_self_call() {
        let src = "class A:\n    def run(self):\n        self.step()\n    def step(self):\n        pass\nclass B:\n    def step(self):\n        pass\n";
        let symbols = vec![
            make_symbol("mod.A", SymbolKind::Class, 1, 5),
            make_symbol("mod.A.run", SymbolKind::Method, 2, 3),
            make_symbol("mod.A.step", SymbolKind::Method, 4, 5),
            make_symbol("mod.B", SymbolKind::Class, 6, 8),
            make_symbol("mod.B.step", SymbolKind::Method, 7, 8),
        ];
        let links = link_file(src, Language::Python, &symbols, &BTreeMap::new());
        assert_eq!(links.edges.len(), 1);
        assert_eq!(links.edges[0].target.qualified_name, "mod.A.step");
    }

    #[test]
    fn test_link_file_inheritance_reference() {
        let symbols = vec![make_symbol("mod.Repo", SymbolKind::Class, 1, 2)];
        let mut headers = BTreeMap::new();
        headers.insert("mod.Repo".to_string(), "class Repo(Store):".to_string());
        let links = link_file(
            "class Repo(Store):\n    pass\n",
            Language::Python,
            &symbols,
            &headers,
        );
        assert!(links.edges.is_empty());
        assert_eq!(links.references.len(), 1);
        assert_eq!(links.references[0].kind, EdgeKind::Inherits);
        assert_eq!(links.references[0].name, "Store");
    }
}
