use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use super::{
    strip_strings_and_comment, ImportEntry, ParsedFile, SymbolEntry, SymbolKind, UseEntry,
};

const KEYWORDS: [&str; 35] = [
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

fn def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("static regex")
    })
}

fn class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*class\s+([A-Za-z_][A-Za-z0-9_]*)\s*[:(]").expect("static regex")
    })
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*import\s+(.+)$").expect("static regex"))
}

fn from_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*from\s+([.A-Za-z0-9_]+)\s+import\s+(.+)$").expect("static regex")
    })
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("static regex"))
}

/// Line-oriented Python extraction: `def`/`class` symbols, `import` and
/// `from ... import` entries, and a generous identifier use list. A name is
/// exported unless it starts with an underscore.
pub fn parse(path: &str, content: &str) -> ParsedFile {
    let mut parsed = ParsedFile::default();
    let mut declared: HashSet<String> = HashSet::new();

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;

        if let Some(caps) = def_re().captures(raw) {
            let name = caps[1].to_string();
            declared.insert(name.clone());
            parsed.symbols.push(SymbolEntry {
                exported: !name.starts_with('_'),
                name,
                kind: SymbolKind::Function,
                path: path.to_string(),
                line: line_no,
                language: "python".to_string(),
            });
            continue;
        }
        if let Some(caps) = class_re().captures(raw) {
            let name = caps[1].to_string();
            declared.insert(name.clone());
            parsed.symbols.push(SymbolEntry {
                exported: !name.starts_with('_'),
                name,
                kind: SymbolKind::Class,
                path: path.to_string(),
                line: line_no,
                language: "python".to_string(),
            });
            continue;
        }
        if let Some(caps) = from_import_re().captures(raw) {
            let source = caps[1].to_string();
            let names = binding_names(&caps[2]);
            for name in &names {
                declared.insert(name.clone());
            }
            parsed.imports.push(ImportEntry {
                path: path.to_string(),
                line: line_no,
                language: "python".to_string(),
                source,
                imported: names,
            });
            continue;
        }
        if let Some(caps) = import_re().captures(raw) {
            for module in caps[1].split(',') {
                let module = strip_strings_and_comment(module, "#");
                let module = module.trim();
                if module.is_empty() {
                    continue;
                }
                let (source, binding) = match module.split_once(" as ") {
                    Some((m, alias)) => (m.trim().to_string(), alias.trim().to_string()),
                    None => {
                        let m = module.to_string();
                        let binding = m.split('.').next().unwrap_or(&m).to_string();
                        (m, binding)
                    }
                };
                declared.insert(binding.clone());
                parsed.imports.push(ImportEntry {
                    path: path.to_string(),
                    line: line_no,
                    language: "python".to_string(),
                    source,
                    imported: vec![binding],
                });
            }
            continue;
        }

        // Uses accumulate against names declared on earlier lines.
        let clean = strip_strings_and_comment(raw, "#");
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
                line: line_no,
                language: "python".to_string(),
            });
        }
    }

    parsed
}

fn binding_names(clause: &str) -> Vec<String> {
    let clause = strip_strings_and_comment(clause, "#");
    let clause = clause.trim().trim_start_matches('(').trim_end_matches(')');
    let mut names = Vec::new();
    for part in clause.split(',') {
        let part = part.trim();
        if part.is_empty() || part == "*" {
            continue;
        }
        let local = match part.split_once(" as ") {
            Some((_, alias)) => alias.trim(),
            None => part,
        };
        if identifier_re()
            .find(local)
            .map(|m| m.start() == 0 && m.end() == local.len())
            .unwrap_or(false)
        {
            names.push(local.to_string());
        }
    }
    names
}
