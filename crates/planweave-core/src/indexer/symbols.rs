//! Definition extraction by walking tree-sitter syntax trees.
//!
//! Each grammar contributes a table of node kinds that introduce a named
//! definition. The walk keeps going through ERROR nodes, so a file with
//! syntax errors still yields every definition the parser could recover.

use std::sync::LazyLock;

use regex::Regex;
use tree_sitter::{Node, Parser, Tree};

use crate::models::{Span, SymbolKind};

/// Node kinds that introduce definitions for one grammar.
pub struct GrammarSpec {
    pub definitions: &'static [(&'static str, SymbolKind)],
    /// Methods are declared outside their type and scoped by receiver.
    pub receiver_scoped_methods: bool,
}

pub static PYTHON_GRAMMAR: GrammarSpec = GrammarSpec {
    definitions: &[
        ("function_definition", SymbolKind::Function),
        ("class_definition", SymbolKind::Class),
    ],
    receiver_scoped_methods: false,
};

pub static JAVA_GRAMMAR: GrammarSpec = GrammarSpec {
    definitions: &[
        ("class_declaration", SymbolKind::Class),
        ("record_declaration", SymbolKind::Class),
        ("interface_declaration", SymbolKind::Interface),
        ("enum_declaration", SymbolKind::Enum),
        ("method_declaration", SymbolKind::Method),
        ("constructor_declaration", SymbolKind::Method),
    ],
    receiver_scoped_methods: false,
};

pub static TYPESCRIPT_GRAMMAR: GrammarSpec = GrammarSpec {
    definitions: &[
        ("function_declaration", SymbolKind::Function),
        ("generator_function_declaration", SymbolKind::Function),
        ("class_declaration", SymbolKind::Class),
        ("abstract_class_declaration", SymbolKind::Class),
        ("interface_declaration", SymbolKind::Interface),
        ("type_alias_declaration", SymbolKind::Interface),
        ("enum_declaration", SymbolKind::Enum),
        ("method_definition", SymbolKind::Method),
        // Only when the initialiser is a function; see `definition_kind`.
        ("variable_declarator", SymbolKind::Function),
    ],
    receiver_scoped_methods: false,
};

pub static GO_GRAMMAR: GrammarSpec = GrammarSpec {
    definitions: &[
        ("function_declaration", SymbolKind::Function),
        ("method_declaration", SymbolKind::Method),
        // Refined to interface/class from the `type` field.
        ("type_spec", SymbolKind::Class),
    ],
    receiver_scoped_methods: true,
};

static GO_RECEIVER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)(?:\[[^\]]*\])?\s*\)\s*$").unwrap());

static BRANCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:if|elif|for|while|case|catch|except)\b|&&|\|\||\?[^?.:]").unwrap()
});

/// A definition found in the tree, before it becomes a [`crate::models::Symbol`].
#[derive(Clone, Debug)]
pub struct Definition {
    pub name: String,
    pub kind: SymbolKind,
    /// Enclosing definition names (outermost first), or the receiver type
    /// for Go methods.
    pub scope: Vec<String>,
    pub span: Span,
    /// First line of the definition, used for inheritance headers.
    pub header: String,
    pub complexity: u32,
}

/// Parse `content` with the given grammar. `None` only when the grammar
/// cannot be loaded or the parser gives up entirely.
pub fn parse_tree(content: &str, language: &tree_sitter::Language) -> Option<Tree> {
    let mut parser = Parser::new();
    parser.set_language(language).ok()?;
    parser.parse(content.as_bytes(), None)
}

/// Count ERROR and MISSING nodes under `node`.
pub fn count_syntax_errors(node: Node<'_>) -> usize {
    if !node.has_error() {
        return 0;
    }
    let own = usize::from(node.is_error() || node.is_missing());
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    own + children
        .into_iter()
        .map(count_syntax_errors)
        .sum::<usize>()
}

/// Count branch points in a slice of source text.
pub fn branch_complexity(text: &str) -> u32 {
    1 + BRANCH_RE.find_iter(text).count() as u32
}

fn node_span(node: Node<'_>) -> Span {
    Span {
        start_line: node.start_position().row as u32 + 1,
        end_line: node.end_position().row as u32 + 1,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
    }
}

fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    source.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

/// Decide whether `node` is a definition, refining the table kind where
/// the grammar needs a second look.
fn definition_kind(
    node: Node<'_>,
    spec: &GrammarSpec,
    enclosing: Option<SymbolKind>,
) -> Option<SymbolKind> {
    let kind = node.kind();
    let (_, base) = spec.definitions.iter().find(|(k, _)| *k == kind)?;
    match kind {
        "variable_declarator" => {
            let value = node.child_by_field_name("value")?;
            match value.kind() {
                "arrow_function" | "function_expression" | "function" => Some(SymbolKind::Function),
                _ => None,
            }
        }
        "type_spec" => match node.child_by_field_name("type").map(|t| t.kind()) {
            Some("interface_type") => Some(SymbolKind::Interface),
            _ => Some(SymbolKind::Class),
        },
        "function_definition" if matches!(enclosing, Some(SymbolKind::Class)) => {
            Some(SymbolKind::Method)
        }
        _ => Some(*base),
    }
}

fn go_receiver_type(node: Node<'_>, source: &str) -> Option<String> {
    let receiver = node.child_by_field_name("receiver")?;
    let text = node_text(receiver, source);
    GO_RECEIVER_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

struct Walker<'s> {
    source: &'s str,
    spec: &'s GrammarSpec,
    out: Vec<Definition>,
}

impl<'s> Walker<'s> {
    fn visit(&mut self, node: Node<'_>, scope: &[String], enclosing: Option<SymbolKind>) {
        let mut child_scope: Option<(Vec<String>, SymbolKind)> = None;

        if let Some(kind) = definition_kind(node, self.spec, enclosing) {
            let name = node
                .child_by_field_name("name")
                .map(|n| node_text(n, self.source).trim().to_string())
                .filter(|n| !n.is_empty());
            if let Some(name) = name {
                let definition_scope = if self.spec.receiver_scoped_methods
                    && node.kind() == "method_declaration"
                {
                    go_receiver_type(node, self.source)
                        .map(|recv| vec![recv])
                        .unwrap_or_default()
                } else {
                    scope.to_vec()
                };
                let text = node_text(node, self.source);
                let header = text.lines().next().unwrap_or("").trim().to_string();
                self.out.push(Definition {
                    name: name.clone(),
                    kind,
                    scope: definition_scope.clone(),
                    span: node_span(node),
                    header,
                    complexity: branch_complexity(text),
                });
                let mut nested = definition_scope;
                nested.push(name);
                child_scope = Some((nested, kind));
            }
        }

        let (next_scope, next_enclosing) = match &child_scope {
            Some((s, k)) => (s.as_slice(), Some(*k)),
            None => (scope, enclosing),
        };
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child, next_scope, next_enclosing);
        }
    }
}

/// Collect definitions from a parsed tree in source order.
pub fn collect_definitions(tree: &Tree, source: &str, spec: &GrammarSpec) -> Vec<Definition> {
    let mut walker = Walker {
        source,
        spec,
        out: Vec::new(),
    };
    walker.visit(tree.root_node(), &[], None);
    walker
        .out
        .sort_by(|a, b| a.span.start_byte.cmp(&b.span.start_byte));
    walker.out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python() -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    #[test]
    fn test_python_definitions_and_methods() {
        let src = "\
class Service(Base):
    def run(self):
        if self.ready:
            helper()

def helper():
    return 1
";
        let tree = parse_tree(src, &python()).unwrap();
        let defs = collect_definitions(&tree, src, &PYTHON_GRAMMAR);
        assert_eq!(defs.len(), 3);
        assert_eq!(defs[0].name, "Service");
        assert_eq!(defs[0].kind, SymbolKind::Class);
        assert_eq!(defs[0].header, "class Service(Base):");
        assert_eq!(defs[1].name, "run");
        assert_eq!(defs[1].kind, SymbolKind::Method);
        assert_eq!(defs[1].scope, vec!["Service".to_string()]);
        assert_eq!(defs[1].span.start_line, 2);
        assert_eq!(defs[1].span.end_line, 4);
        assert_eq!(defs[1].complexity, 2);
        assert_eq!(defs[2].name, "helper");
        assert_eq!(defs[2].kind, SymbolKind::Function);
        assert!(defs[2].scope.is_empty());
    }

    #[test]
    fn test_syntax_errors_are_counted_and_definitions_survive() {
        let src = "def ok():\n    return 1\n\ndef broken(:\n    pass\n";
        let tree = parse_tree(src, &python()).unwrap();
        assert!(count_syntax_errors(tree.root_node()) > 0);
        let defs = collect_definitions(&tree, src, &PYTHON_GRAMMAR);
        assert!(defs.iter().any(|d| d.name == "ok"));
    }

    #[test]
    fn test_clean_source_has_no_errors() {
        let src = "def ok():\n    return 1\n";
        let tree = parse_tree(src, &python()).unwrap();
        assert_eq!(count_syntax_errors(tree.root_node()), 0);
    }

    #[test]
    fn test_go_method_scoped_by_receiver() {
        let src = "\
package http

type Server struct {
}

type Handler interface {
}

func (s *Server) Listen() error {
    return nil
}
";
        let language: tree_sitter::Language = tree_sitter_go::LANGUAGE.into();
        let tree = parse_tree(src, &language).unwrap();
        let defs = collect_definitions(&tree, src, &GO_GRAMMAR);
        let names: Vec<(&str, SymbolKind)> =
            defs.iter().map(|d| (d.name.as_str(), d.kind)).collect();
        assert_eq!(
            names,
            vec![
                ("Server", SymbolKind::Class),
                ("Handler", SymbolKind::Interface),
                ("Listen", SymbolKind::Method),
            ]
        );
        assert_eq!(defs[2].scope, vec!["Server".to_string()]);
    }

    #[test]
    fn test_typescript_arrow_function_is_a_definition() {
        let src = "\
export const add = (a: number, b: number): number => a + b;
export const LIMIT = 3;
export class Box {
  open(): void {}
}
";
        let language: tree_sitter::Language =
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into();
        let tree = parse_tree(src, &language).unwrap();
        let defs = collect_definitions(&tree, src, &TYPESCRIPT_GRAMMAR);
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["add", "Box", "open"]);
        assert_eq!(defs[2].kind, SymbolKind::Method);
    }

    #[test]
    fn test_branch_complexity() {
        assert_eq!(branch_complexity("return 1"), 1);
        assert_eq!(branch_complexity("if a && b:\n  for x in y:\n    pass"), 4);
    }
}
