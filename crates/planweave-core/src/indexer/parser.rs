//! Language parsers selected by file extension.
//!
//! Every parser goes through the same tree-sitter pipeline; only the grammar
//! and its definition table differ. Parsing is pure: the same path and
//! content always produce the same [`ParseResult`].

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::indexer::callgraph::link_file;
use crate::indexer::filesystem::{detect_language, to_module_name};
use crate::indexer::imports::extract_imports;
use crate::indexer::symbols::{
    branch_complexity, collect_definitions, count_syntax_errors, parse_tree, GrammarSpec,
    GO_GRAMMAR, JAVA_GRAMMAR, PYTHON_GRAMMAR, TYPESCRIPT_GRAMMAR,
};
use crate::models::{
    content_hash, DegradedReason, EdgeKind, Language, ParseResult, Reference, Span, Symbol,
    SymbolId, SymbolKind,
};

/// One implementation per language.
pub trait LanguageParser: Send + Sync {
    fn language(&self) -> Language;

    fn extensions(&self) -> &'static [&'static str];

    fn grammar_spec(&self) -> &'static GrammarSpec;

    /// Grammar for `path`. Most languages have one; TypeScript has two.
    fn grammar(&self, path: &str) -> tree_sitter::Language;

    fn parse(&self, path: &str, content: &str) -> ParseResult {
        parse_with_grammar(
            path,
            content,
            self.language(),
            &self.grammar(path),
            self.grammar_spec(),
        )
    }
}

pub struct PythonParser;
pub struct JavaParser;
pub struct TypeScriptParser;
pub struct GoParser;

impl LanguageParser for PythonParser {
    fn language(&self) -> Language {
        Language::Python
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py"]
    }

    fn grammar_spec(&self) -> &'static GrammarSpec {
        &PYTHON_GRAMMAR
    }

    fn grammar(&self, _path: &str) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }
}

impl LanguageParser for JavaParser {
    fn language(&self) -> Language {
        Language::Java
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["java"]
    }

    fn grammar_spec(&self) -> &'static GrammarSpec {
        &JAVA_GRAMMAR
    }

    fn grammar(&self, _path: &str) -> tree_sitter::Language {
        tree_sitter_java::LANGUAGE.into()
    }
}

impl LanguageParser for TypeScriptParser {
    fn language(&self) -> Language {
        Language::TypeScript
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ts", "tsx"]
    }

    fn grammar_spec(&self) -> &'static GrammarSpec {
        &TYPESCRIPT_GRAMMAR
    }

    fn grammar(&self, path: &str) -> tree_sitter::Language {
        if path.to_lowercase().ends_with(".tsx") {
            tree_sitter_typescript::LANGUAGE_TSX.into()
        } else {
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
        }
    }
}

impl LanguageParser for GoParser {
    fn language(&self) -> Language {
        Language::Go
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["go"]
    }

    fn grammar_spec(&self) -> &'static GrammarSpec {
        &GO_GRAMMAR
    }

    fn grammar(&self, _path: &str) -> tree_sitter::Language {
        tree_sitter_go::LANGUAGE.into()
    }
}

fn module_symbol(path: &str, content: &str, language: Language) -> Symbol {
    let qualified_name = to_module_name(path);
    let name = qualified_name
        .rsplit('.')
        .next()
        .unwrap_or(qualified_name.as_str())
        .to_string();
    let line_count = content.lines().count().max(1) as u32;
    Symbol {
        id: SymbolId::new(path, qualified_name.clone()),
        name,
        kind: SymbolKind::Module,
        span: Span {
            start_line: 1,
            end_line: line_count,
            start_byte: 0,
            end_byte: content.len(),
        },
        language,
        complexity: branch_complexity(content),
    }
}

fn import_references(
    path: &str,
    content: &str,
    language: Language,
    module: &Symbol,
) -> Vec<Reference> {
    extract_imports(content, path, language)
        .into_iter()
        .map(|import| Reference {
            from: module.id.clone(),
            name: import.module,
            kind: EdgeKind::Imports,
            line: import.line,
            receiver: None,
            candidates: import.candidates,
        })
        .collect()
}

/// Module-only result for files no parser claims.
pub fn unsupported_result(path: &str, content: &str) -> ParseResult {
    let module = module_symbol(path, content, Language::Unknown);
    ParseResult {
        path: path.to_string(),
        language: Language::Unknown,
        content_hash: content_hash(content),
        symbols: vec![module],
        edges: Vec::new(),
        references: Vec::new(),
        degraded: Some(DegradedReason::UnsupportedLanguage),
    }
}

fn parse_with_grammar(
    path: &str,
    content: &str,
    language: Language,
    grammar: &tree_sitter::Language,
    spec: &GrammarSpec,
) -> ParseResult {
    let module = module_symbol(path, content, language);
    let mut references = import_references(path, content, language, &module);

    let Some(tree) = parse_tree(content, grammar) else {
        return ParseResult {
            path: path.to_string(),
            language,
            content_hash: content_hash(content),
            symbols: vec![module],
            edges: Vec::new(),
            references,
            degraded: Some(DegradedReason::GrammarUnavailable),
        };
    };

    let error_count = count_syntax_errors(tree.root_node());
    let module_name = module.id.qualified_name.clone();

    let mut symbols = vec![module];
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for definition in collect_definitions(&tree, content, spec) {
        let mut segments = Vec::with_capacity(definition.scope.len() + 2);
        segments.push(module_name.as_str());
        segments.extend(definition.scope.iter().map(String::as_str));
        segments.push(definition.name.as_str());
        let qualified_name = segments.join(".");
        // Overloads share an identity; the first definition wins.
        if !seen.insert(qualified_name.clone()) {
            continue;
        }
        if matches!(definition.kind, SymbolKind::Class | SymbolKind::Interface) {
            headers.insert(qualified_name.clone(), definition.header.clone());
        }
        symbols.push(Symbol {
            id: SymbolId::new(path, qualified_name),
            name: definition.name,
            kind: definition.kind,
            span: definition.span,
            language,
            complexity: definition.complexity,
        });
    }

    let links = link_file(content, language, &symbols, &headers);
    references.extend(links.references);

    ParseResult {
        path: path.to_string(),
        language,
        content_hash: content_hash(content),
        symbols,
        edges: links.edges,
        references,
        degraded: (error_count > 0).then_some(DegradedReason::SyntaxErrors { count: error_count }),
    }
}

/// Availability of one language backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParserCapability {
    pub language: Language,
    pub extensions: Vec<String>,
    pub available: bool,
    pub reason: String,
}

/// Parsers keyed by file extension.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn LanguageParser>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self {
            parsers: vec![
                Box::new(PythonParser),
                Box::new(JavaParser),
                Box::new(TypeScriptParser),
                Box::new(GoParser),
            ],
        }
    }
}

impl ParserRegistry {
    pub fn new(parsers: Vec<Box<dyn LanguageParser>>) -> Self {
        Self { parsers }
    }

    pub fn for_path(&self, path: &str) -> Option<&dyn LanguageParser> {
        let language = detect_language(path);
        if language == Language::Unknown {
            return None;
        }
        let lowered = path.to_lowercase();
        self.parsers
            .iter()
            .find(|p| {
                p.language() == language
                    && p.extensions()
                        .iter()
                        .any(|ext| lowered.ends_with(&format!(".{ext}")))
            })
            .map(|p| p.as_ref())
    }

    /// Parse with the matching parser, or a degraded module-only result.
    pub fn parse(&self, path: &str, content: &str) -> ParseResult {
        match self.for_path(path) {
            Some(parser) => parser.parse(path, content),
            None => unsupported_result(path, content),
        }
    }

    pub fn capabilities(&self) -> Vec<ParserCapability> {
        self.parsers
            .iter()
            .map(|parser| {
                let extension = parser.extensions().first().copied().unwrap_or("");
                let grammar = parser.grammar(&format!("probe.{extension}"));
                let available = tree_sitter::Parser::new().set_language(&grammar).is_ok();
                ParserCapability {
                    language: parser.language(),
                    extensions: parser.extensions().iter().map(|e| e.to_string()).collect(),
                    available,
                    reason: if available { "ok" } else { "parser_unavailable" }.to_string(),
                }
            })
            .collect()
    }
}
