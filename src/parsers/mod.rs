pub mod python;
pub mod typescript;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Class,
    Interface,
    Type,
    Enum,
    Variable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolEntry {
    pub name: String,
    pub kind: SymbolKind,
    pub path: String,
    pub line: usize,
    pub language: String,
    pub exported: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportEntry {
    pub path: String,
    pub line: usize,
    pub language: String,
    pub source: String,
    pub imported: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UseEntry {
    pub name: String,
    pub path: String,
    pub line: usize,
    pub language: String,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub symbols: Vec<SymbolEntry>,
    pub imports: Vec<ImportEntry>,
    pub uses: Vec<UseEntry>,
}

/// Map a path to a language label by extension.
pub fn detect_language(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "py" => "python",
        "rs" => "rust",
        "go" => "go",
        "json" => "json",
        "yml" | "yaml" => "yaml",
        "toml" => "toml",
        "md" => "markdown",
        "html" => "html",
        "css" => "css",
        "sh" | "bash" => "shell",
        _ => "unknown",
    }
}

pub fn has_parser(language: &str) -> bool {
    matches!(language, "typescript" | "javascript" | "python")
}

/// Parse a source file into symbols, imports and uses. Languages without a
/// parser produce an empty result.
pub fn parse_source(path: &str, language: &str, content: &str) -> ParsedFile {
    match language {
        "typescript" | "javascript" => typescript::parse(path, language, content),
        "python" => python::parse(path, content),
        _ => ParsedFile::default(),
    }
}

/// Strip string literal bodies and trailing line comments so the generous
/// identifier pass does not index quoted prose.
pub(crate) fn strip_strings_and_comment(line: &str, comment_marker: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    let mut quote: Option<char> = None;
    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    quote = None;
                    out.push(' ');
                }
            }
            None => {
                if c == '"' || c == '\'' || c == '`' {
                    quote = Some(c);
                    out.push(' ');
                } else {
                    out.push(c);
                }
            }
        }
    }
    match out.find(comment_marker) {
        Some(idx) => out[..idx].to_string(),
        None => out,
    }
}

#[cfg(test)]
mod tests {
    use super::{detect_language, has_parser, strip_strings_and_comment};

    #[test]
    fn detects_languages_by_extension() {
        assert_eq!(detect_language("src/app.tsx"), "typescript");
        assert_eq!(detect_language("lib/run.mjs"), "javascript");
        assert_eq!(detect_language("tool.py"), "python");
        assert_eq!(detect_language("data.blob"), "unknown");
    }

    #[test]
    fn parser_coverage() {
        assert!(has_parser("typescript"));
        assert!(has_parser("python"));
        assert!(!has_parser("rust"));
        assert!(!has_parser("unknown"));
    }

    #[test]
    fn strips_strings_and_comments() {
        let out = strip_strings_and_comment("const a = \"hidden\"; // note", "//");
        assert!(out.contains("const a"));
        assert!(!out.contains("hidden"));
        assert!(!out.contains("note"));
    }
}
