//! Import extraction and mapping of module names to candidate repository paths.

use std::sync::LazyLock;

use regex::Regex;

use crate::indexer::filesystem::{join_path, parent_dir};
use crate::models::Language;

/// An import statement plus the repository paths it may refer to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportSpec {
    pub module: String,
    pub names: Vec<String>,
    pub line: u32,
    pub candidates: Vec<String>,
}

static PY_FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*from\s+([A-Za-z0-9_.]+)\s+import\s+(.+)$").unwrap());

static PY_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*import\s+([A-Za-z0-9_.]+)(?:\s+as\s+[A-Za-z_][A-Za-z0-9_]*)?\s*$").unwrap()
});

static JAVA_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s+(?:static\s+)?([A-Za-z0-9_.*]+)\s*;").unwrap());

static TS_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*import(?:\s+type)?\s+(.*?)\s+from\s+['"]([^'"]+)['"];?"#).unwrap()
});

static TS_SIDE_EFFECT_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*import\s+['"]([^'"]+)['"];?"#).unwrap());

static GO_IMPORT_SINGLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*import\s+(?:[A-Za-z_.]+\s+)?"([^"]+)""#).unwrap());

static GO_IMPORT_BLOCK_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s*\(").unwrap());

static GO_IMPORT_BLOCK_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*(?:[A-Za-z_.]+\s+)?"([^"]+)""#).unwrap());

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap());

/// Split `a, b as c, (d)` into the imported (not aliased) names.
fn imported_names(items: &str) -> Vec<String> {
    items
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .filter_map(|chunk| {
            let token = chunk.split(" as ").next()?.trim();
            let token = token.strip_prefix("type ").unwrap_or(token);
            IDENT_RE.find(token).map(|m| m.as_str().to_string())
        })
        .collect()
}

fn python_candidates(source_path: &str, module: &str, names: &[String]) -> Vec<String> {
    let levels = module.chars().take_while(|&c| c == '.').count();
    let suffix = &module[levels..];
    let base = if levels > 0 {
        let mut dir = parent_dir(source_path);
        for _ in 1..levels {
            dir = parent_dir(&dir);
        }
        if suffix.is_empty() {
            dir
        } else {
            join_path(&dir, &suffix.replace('.', "/"))
        }
    } else {
        suffix.replace('.', "/")
    };

    let mut candidates = Vec::new();
    if !base.is_empty() {
        candidates.push(format!("{base}.py"));
        candidates.push(format!("{base}/__init__.py"));
    }
    // `from pkg import mod` may name a submodule rather than a symbol.
    for name in names {
        candidates.push(join_path(&base, &format!("{name}.py")));
    }
    candidates
}

fn java_candidates(source_path: &str, module: &str) -> Vec<String> {
    if module.ends_with(".*") {
        return Vec::new();
    }
    let relative = format!("{}.java", module.replace('.', "/"));
    let root = match source_path.find("src/main/java/") {
        Some(idx) => &source_path[..idx + "src/main/java/".len()],
        None => "",
    };
    if root.is_empty() {
        vec![relative]
    } else {
        vec![format!("{root}{relative}"), relative]
    }
}

fn typescript_candidates(source_path: &str, module: &str) -> Vec<String> {
    if !module.starts_with('.') {
        return Vec::new();
    }
    let base = join_path(&parent_dir(source_path), module);
    if base.ends_with(".ts") || base.ends_with(".tsx") {
        return vec![base];
    }
    vec![
        format!("{base}.ts"),
        format!("{base}.tsx"),
        format!("{base}/index.ts"),
        format!("{base}/index.tsx"),
    ]
}

fn python_imports(source: &str, path: &str) -> Vec<ImportSpec> {
    let mut imports = Vec::new();
    for (idx, line) in source.lines().enumerate() {
        let line_no = idx as u32 + 1;
        if let Some(caps) = PY_FROM_RE.captures(line) {
            let module = caps[1].to_string();
            let names = imported_names(&caps[2]);
            let candidates = python_candidates(path, &module, &names);
            imports.push(ImportSpec {
                module,
                names,
                line: line_no,
                candidates,
            });
        } else if let Some(caps) = PY_IMPORT_RE.captures(line) {
            let module = caps[1].to_string();
            let candidates = python_candidates(path, &module, &[]);
            imports.push(ImportSpec {
                module,
                names: Vec::new(),
                line: line_no,
                candidates,
            });
        }
    }
    imports
}

fn java_imports(source: &str, path: &str) -> Vec<ImportSpec> {
    source
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let caps = JAVA_IMPORT_RE.captures(line)?;
            let module = caps[1].to_string();
            let last = module.rsplit('.').next().unwrap_or("").to_string();
            let names = if last == "*" { Vec::new() } else { vec![last] };
            Some(ImportSpec {
                candidates: java_candidates(path, &module),
                module,
                names,
                line: idx as u32 + 1,
            })
        })
        .collect()
}

fn typescript_imports(source: &str, path: &str) -> Vec<ImportSpec> {
    let mut imports = Vec::new();
    for (idx, line) in source.lines().enumerate() {
        let line_no = idx as u32 + 1;
        if let Some(caps) = TS_IMPORT_RE.captures(line) {
            let clause = caps[1].trim();
            let module = caps[2].to_string();
            let braces = clause
                .find('{')
                .zip(clause.rfind('}'))
                .filter(|(open, close)| open < close);
            let names = if let Some((open, close)) = braces {
                let mut names = imported_names(&clause[open + 1..close]);
                let default = clause[..open].trim().trim_end_matches(',').trim();
                if !default.is_empty() {
                    names.insert(0, default.to_string());
                }
                names
            } else if clause.starts_with('*') {
                Vec::new()
            } else {
                imported_names(clause)
            };
            imports.push(ImportSpec {
                candidates: typescript_candidates(path, &module),
                module,
                names,
                line: line_no,
            });
        } else if let Some(caps) = TS_SIDE_EFFECT_IMPORT_RE.captures(line) {
            let module = caps[1].to_string();
            imports.push(ImportSpec {
                candidates: typescript_candidates(path, &module),
                module,
                names: Vec::new(),
                line: line_no,
            });
        }
    }
    imports
}

fn go_imports(source: &str) -> Vec<ImportSpec> {
    let mut imports = Vec::new();
    let mut in_block = false;
    for (idx, line) in source.lines().enumerate() {
        let line_no = idx as u32 + 1;
        if GO_IMPORT_BLOCK_START_RE.is_match(line) {
            in_block = true;
            continue;
        }
        let captured = if in_block {
            if line.trim() == ")" {
                in_block = false;
                None
            } else {
                GO_IMPORT_BLOCK_LINE_RE.captures(line)
            }
        } else {
            GO_IMPORT_SINGLE_RE.captures(line)
        };
        if let Some(caps) = captured {
            let module = caps[1].to_string();
            let package = module.rsplit('/').next().unwrap_or("").to_string();
            imports.push(ImportSpec {
                module,
                names: vec![package],
                line: line_no,
                // Go imports name packages (directories), never single files.
                candidates: Vec::new(),
            });
        }
    }
    imports
}

/// Extract imports from a file.
pub fn extract_imports(source: &str, path: &str, language: Language) -> Vec<ImportSpec> {
    match language {
        Language::Python => python_imports(source, path),
        Language::Java => java_imports(source, path),
        Language::TypeScript => typescript_imports(source, path),
        Language::Go => go_imports(source),
        Language::Unknown => Vec::new(),
    }
}
