//! Path helpers shared by the parsers and the repository adapters.

use std::path::{Component, Path};

use crate::models::Language;

const LANGUAGE_BY_EXTENSION: &[(&str, Language)] = &[
    (".py", Language::Python),
    (".java", Language::Java),
    (".ts", Language::TypeScript),
    (".tsx", Language::TypeScript),
    (".go", Language::Go),
];

/// Source extensions recognised when scanning goal text for file paths.
pub const SOURCE_EXTENSIONS: &[&str] = &["py", "java", "ts", "tsx", "go"];

pub fn detect_language(path: &str) -> Language {
    let lowered = path.to_lowercase();
    LANGUAGE_BY_EXTENSION
        .iter()
        .find(|(ext, _)| lowered.ends_with(ext))
        .map(|(_, language)| *language)
        .unwrap_or(Language::Unknown)
}

/// Normalise a repository-relative path to POSIX form without `./` or
/// leading slashes, collapsing `..` where possible.
pub fn normalize_path(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(os) => {
                if let Some(s) = os.to_str() {
                    parts.push(s);
                }
            }
            Component::ParentDir => {
                parts.pop();
            }
            _ => {}
        }
    }
    parts.join("/")
}

/// Convert a file path to a dotted module name: `pkg/util/io.py` becomes
/// `pkg.util.io`.
pub fn to_module_name(path: &str) -> String {
    let normalized = normalize_path(path);
    let without_ext = match normalized.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.contains('/') => stem.to_string(),
        _ => normalized,
    };
    without_ext
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

/// Parent directory of a normalised path, `""` for top-level files.
pub fn parent_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

pub fn join_path(dir: &str, rest: &str) -> String {
    if dir.is_empty() {
        normalize_path(rest)
    } else {
        normalize_path(&format!("{dir}/{rest}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("src/app.py"), Language::Python);
        assert_eq!(detect_language("Main.JAVA"), Language::Java);
        assert_eq!(detect_language("web/view.tsx"), Language::TypeScript);
        assert_eq!(detect_language("cmd/main.go"), Language::Go);
        assert_eq!(detect_language("README.md"), Language::Unknown);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./src/../lib/a.py"), "lib/a.py");
        assert_eq!(normalize_path("\\pkg\\mod.py"), "pkg/mod.py");
        assert_eq!(normalize_path("/abs/x.go"), "abs/x.go");
    }

    #[test]
    fn test_to_module_name() {
        assert_eq!(to_module_name("src/pkg/util.py"), "src.pkg.util");
        assert_eq!(to_module_name("a.py"), "a");
        assert_eq!(to_module_name("foo/bar/baz"), "foo.bar.baz");
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("web/src", "../lib/util"), "web/lib/util");
        assert_eq!(join_path("", "a.ts"), "a.ts");
        assert_eq!(parent_dir("web/src/a.ts"), "web/src");
        assert_eq!(parent_dir("a.ts"), "");
    }
}
