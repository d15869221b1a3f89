use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use super::{
    strip_strings_and_comment, ImportEntry, ParsedFile, SymbolEntry, SymbolKind, UseEntry,
};

const KEYWORDS: [&str; 53] = [
    "abstract", "any", "as", "async", "await", "boolean", "break", "case", "catch", "class",
    "const", "continue", "declare", "default", "delete", "do", "else", "enum", "export",
    "extends", "false", "finally", "for", "from", "function", "if", "implements", "import", "in",
    "instanceof", "interface", "let", "new", "null", "number", "of", "private", "protected",
    "public", "readonly", "return", "static", "string", "super", "switch", "this", "throw",
    "true", "try", "type", "typeof", "var", "void",
];

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

fn function_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(
        &RE,
        r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][A-Za-z0-9_$]*)",
    )
}

fn class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(
        &RE,
        r"^(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][A-Za-z0-9_$]*)",
    )
}

fn interface_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"^(?:export\s+)?interface\s+([A-Za-z_$][A-Za-z0-9_$]*)")
}

fn type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"^(?:export\s+)?type\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*[<=]")
}

fn enum_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(
        &RE,
        r"^(?:export\s+)?(?:declare\s+)?(?:const\s+)?enum\s+([A-Za-z_$][A-Za-z0-9_$]*)",
    )
}

fn variable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(
        &RE,
        r"^(?:export\s+)?(?:declare\s+)?(?:const|let|var)\s+(.+)$",
    )
}

fn side_effect_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r#"^import\s*['"]([^'"]+)['"]"#)
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(
        &RE,
        r#"^import\s+(?:type\s+)?(.+?)\s+from\s+['"]([^'"]+)['"]"#,
    )
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"[A-Za-z_$][A-Za-z0-9_$]*")
}

/// Line-oriented TypeScript/JavaScript extraction. Top-level declarations
/// become symbols; import statements become import entries; every remaining
/// identifier that is not a declared name becomes a use entry. The use list
/// is intentionally generous to keep reference lookup cheap.
pub fn parse(path: &str, language: &str, content: &str) -> ParsedFile {
    let mut parsed = ParsedFile::default();
    let mut declared: HashSet<String> = HashSet::new();

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let exported = raw.starts_with("export ") || raw.starts_with("export default ");

        if let Some(caps) = side_effect_import_re().captures(raw) {
            parsed.imports.push(ImportEntry {
                path: path.to_string(),
                line: line_no,
                language: language.to_string(),
                source: caps[1].to_string(),
                imported: Vec::new(),
            });
            continue;
        }
        if let Some(caps) = import_re().captures(raw) {
            let names = parse_import_clause(&caps[1]);
            for name in &names {
                declared.insert(name.clone());
            }
            parsed.imports.push(ImportEntry {
                path: path.to_string(),
                line: line_no,
                language: language.to_string(),
                source: caps[2].to_string(),
                imported: names,
            });
            continue;
        }

        let symbol = if let Some(caps) = function_re().captures(raw) {
            Some((caps[1].to_string(), SymbolKind::Function))
        } else if let Some(caps) = class_re().captures(raw) {
            Some((caps[1].to_string(), SymbolKind::Class))
        } else if let Some(caps) = interface_re().captures(raw) {
            Some((caps[1].to_string(), SymbolKind::Interface))
        } else if let Some(caps) = enum_re().captures(raw) {
            Some((caps[1].to_string(), SymbolKind::Enum))
        } else if let Some(caps) = type_re().captures(raw) {
            Some((caps[1].to_string(), SymbolKind::Type))
        } else {
            None
        };
        if let Some((name, kind)) = symbol {
            declared.insert(name.clone());
            parsed.symbols.push(SymbolEntry {
                name,
                kind,
                path: path.to_string(),
                line: line_no,
                language: language.to_string(),
                exported,
            });
            continue;
        }
        if let Some(caps) = variable_re().captures(raw) {
            for name in declarator_names(&caps[1]) {
                declared.insert(name.clone());
                parsed.symbols.push(SymbolEntry {
                    name,
                    kind: SymbolKind::Variable,
                    path: path.to_string(),
                    line: line_no,
                    language: language.to_string(),
                    exported,
                });
            }
        }
    }

    for (idx, raw) in content.lines().enumerate() {
        if raw.trim_start().starts_with("import") {
            continue;
        }
        let clean = strip_strings_and_comment(raw, "//");
        let mut seen_on_line: HashSet<&str> = HashSet::new();
        for m in identifier_re().find_iter(&clean) {
            let name = m.as_str();
            if KEYWORDS.contains(&name) || declared.contains(name) {
                continue;
            }
            if !seen_on_line.insert(name) {
                continue;
            }
            parsed.uses.push(UseEntry {
                name: name.to_string(),
                path: path.to_string(),
                line: idx + 1,
                language: language.to_string(),
            });
        }
    }

    parsed
}

/// Break an import clause into bound identifiers: default names, `* as ns`
/// bindings, and named-import locals (the `as` alias when present).
fn parse_import_clause(clause: &str) -> Vec<String> {
    let mut names = Vec::new();
    let clause = clause.trim();
    let (head, braced) = match clause.find('{') {
        Some(open) => {
            let close = clause.rfind('}').unwrap_or(clause.len());
            (
                clause[..open].trim_end_matches(',').trim(),
                Some(&clause[open + 1..close.min(clause.len())]),
            )
        }
        None => (clause, None),
    };
    for part in head.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some(ns) = part.strip_prefix("* as ") {
            push_identifier(&mut names, ns);
        } else {
            push_identifier(&mut names, part);
        }
    }
    if let Some(inner) = braced {
        for part in inner.split(',') {
            let part = part.trim().trim_start_matches("type ").trim();
            if part.is_empty() {
                continue;
            }
            let local = match part.split_once(" as ") {
                Some((_, alias)) => alias.trim(),
                None => part,
            };
            push_identifier(&mut names, local);
        }
    }
    names
}

fn push_identifier(names: &mut Vec<String>, raw: &str) {
    if let Some(m) = identifier_re().find(raw) {
        if m.start() == 0 {
            names.push(m.as_str().to_string());
        }
    }
}

/// Extract the identifier of each declarator in a variable statement,
/// splitting on commas that sit outside brackets. Destructuring patterns are
/// skipped.
fn declarator_names(rest: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    let bytes = rest.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' | b'[' | b'{' | b'<' => depth += 1,
            b')' | b']' | b'}' | b'>' => depth -= 1,
            b',' if depth == 0 => {
                if let Some(n) = declarator_name(&rest[start..i]) {
                    names.push(n);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    if let Some(n) = declarator_name(&rest[start..]) {
        names.push(n);
    }
    names
}

fn declarator_name(chunk: &str) -> Option<String> {
    let chunk = chunk.trim();
    if chunk.starts_with('{') || chunk.starts_with('[') {
        return None;
    }
    identifier_re()
        .find(chunk)
        .filter(|m| m.start() == 0)
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::super::SymbolKind;
    use super::parse;

    const SAMPLE: &str = r#"import fs from "fs";
import { join, resolve as rp } from "path";
import * as os from "os";
import "./side-effect";

export function greet(name) {
  return fmt(name);
}

export default class Runner {}

interface Options {
  depth: number;
}

export type Pair = [number, number];

enum Color { Red, Green }

export const limit = 10, label = "x";
let current = limit + offset;
"#;

    #[test]
    fn extracts_top_level_symbols() {
        let parsed = parse("src/a.ts", "typescript", SAMPLE);
        let find = |name: &str| {
            parsed
                .symbols
                .iter()
                .find(|s| s.name == name)
                .unwrap_or_else(|| panic!("missing symbol {name}"))
        };
        assert_eq!(find("greet").kind, SymbolKind::Function);
        assert!(find("greet").exported);
        assert_eq!(find("Runner").kind, SymbolKind::Class);
        assert_eq!(find("Options").kind, SymbolKind::Interface);
        assert!(!find("Options").exported);
        assert_eq!(find("Pair").kind, SymbolKind::Type);
        assert_eq!(find("Color").kind, SymbolKind::Enum);
        assert_eq!(find("limit").kind, SymbolKind::Variable);
        assert!(parsed.symbols.iter().any(|s| s.name == "label"));
        assert!(parsed.symbols.iter().any(|s| s.name == "current"));
    }

    #[test]
    fn extracts_import_bindings() {
        let parsed = parse("src/a.ts", "typescript", SAMPLE);
        assert_eq!(parsed.imports.len(), 4);
        let path_import = parsed
            .imports
            .iter()
            .find(|i| i.source == "path")
            .expect("path import");
        assert_eq!(path_import.imported, vec!["join", "rp"]);
        let ns = parsed
            .imports
            .iter()
            .find(|i| i.source == "os")
            .expect("os import");
        assert_eq!(ns.imported, vec!["os"]);
        let side = parsed
            .imports
            .iter()
            .find(|i| i.source == "./side-effect")
            .expect("side-effect import");
        assert!(side.imported.is_empty());
    }

    #[test]
    fn uses_exclude_declared_names_and_keywords() {
        let parsed = parse("src/a.ts", "typescript", SAMPLE);
        assert!(parsed.uses.iter().any(|u| u.name == "fmt"));
        assert!(parsed.uses.iter().any(|u| u.name == "offset"));
        assert!(!parsed.uses.iter().any(|u| u.name == "greet"));
        assert!(!parsed.uses.iter().any(|u| u.name == "const"));
        assert!(!parsed.uses.iter().any(|u| u.name == "join"));
    }

    #[test]
    fn string_contents_are_not_indexed_as_uses() {
        let parsed = parse(
            "src/b.ts",
            "typescript",
            "const msg = \"callHome now\";\n",
        );
        assert!(!parsed.uses.iter().any(|u| u.name == "callHome"));
    }
}
