use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use regex::RegexBuilder;
use serde::Serialize;
use tokio::process::Command;

use crate::fs_tools;
use crate::sandbox;

#[derive(Debug, Clone, Serialize)]
pub struct GrepMatch {
    pub path: String,
    pub line: u64,
    pub text: String,
}

const BINARY_EXTENSIONS: [&str; 30] = [
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "zip", "tar", "gz", "bz2", "xz",
    "7z", "rar", "exe", "dll", "so", "dylib", "bin", "class", "jar", "mp3", "mp4", "avi", "mov",
    "mkv", "wav", "woff", "woff2",
];

static RIPGREP_AVAILABLE: OnceLock<bool> = OnceLock::new();

fn ripgrep_available() -> bool {
    *RIPGREP_AVAILABLE.get_or_init(|| {
        std::process::Command::new("rg")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    })
}

/// Search the workspace for `pattern`, preferring an external ripgrep and
/// falling back to an internal walker when ripgrep is absent or errors.
pub async fn search(
    root: &Path,
    pattern: &str,
    rel_path: Option<&str>,
    max_matches: usize,
) -> Result<Vec<GrepMatch>> {
    let start_rel = rel_path.unwrap_or(".");
    if ripgrep_available() {
        match ripgrep_search(root, pattern, start_rel, max_matches).await {
            Ok(matches) => return Ok(matches),
            Err(e) => eprintln!("WARN: ripgrep search failed, using fallback: {e}"),
        }
    }
    fallback_search(root, pattern, start_rel, max_matches)
}

async fn ripgrep_search(
    root: &Path,
    pattern: &str,
    start_rel: &str,
    max_matches: usize,
) -> Result<Vec<GrepMatch>> {
    let start = sandbox::resolve(root, start_rel)?;
    let output = Command::new("rg")
        .arg("--json")
        .arg("-n")
        .arg("--")
        .arg(pattern)
        .arg(&start)
        .current_dir(root)
        .stdin(Stdio::null())
        .output()
        .await
        .context("failed to run ripgrep")?;
    // rg exits 1 when nothing matched; only >1 signals a real error.
    let code = output.status.code().unwrap_or(-1);
    if code != 0 && code != 1 {
        bail!(
            "ripgrep exited {code}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    let mut matches = Vec::new();
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        if matches.len() >= max_matches {
            break;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if value.get("type").and_then(|v| v.as_str()) != Some("match") {
            continue;
        }
        let Some(data) = value.get("data") else {
            continue;
        };
        let Some(path_text) = data
            .get("path")
            .and_then(|p| p.get("text"))
            .and_then(|t| t.as_str())
        else {
            continue;
        };
        let line_number = data
            .get("line_number")
            .and_then(|n| n.as_u64())
            .unwrap_or(0);
        let text = data
            .get("lines")
            .and_then(|l| l.get("text"))
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim_end_matches('\n')
            .to_string();
        matches.push(GrepMatch {
            path: sandbox::to_relative(root, Path::new(path_text)),
            line: line_number,
            text,
        });
    }
    Ok(matches)
}

enum LineMatcher {
    Regex(regex::Regex),
    Substring(String),
}

impl LineMatcher {
    fn new(pattern: &str) -> Self {
        match RegexBuilder::new(pattern).build() {
            Ok(re) => LineMatcher::Regex(re),
            Err(_) => LineMatcher::Substring(pattern.to_lowercase()),
        }
    }

    fn is_match(&self, line: &str) -> bool {
        match self {
            LineMatcher::Regex(re) => re.is_match(line),
            LineMatcher::Substring(needle) => line.to_lowercase().contains(needle),
        }
    }
}

pub(crate) fn fallback_search(
    root: &Path,
    pattern: &str,
    start_rel: &str,
    max_matches: usize,
) -> Result<Vec<GrepMatch>> {
    let matcher = LineMatcher::new(pattern);
    let entries = fs_tools::list_entries(root, start_rel, 16, 50_000)?;
    let mut matches = Vec::new();
    for entry in entries {
        if matches.len() >= max_matches {
            break;
        }
        if entry.ends_with('/') || is_binary_like(&entry) {
            continue;
        }
        let abs = match sandbox::resolve(root, &entry) {
            Ok(p) => p,
            Err(_) => continue,
        };
        let Ok(content) = std::fs::read_to_string(&abs) else {
            continue;
        };
        for (idx, line) in content.lines().enumerate() {
            if matches.len() >= max_matches {
                break;
            }
            if matcher.is_match(line) {
                matches.push(GrepMatch {
                    path: entry.clone(),
                    line: (idx + 1) as u64,
                    text: line.to_string(),
                });
            }
        }
    }
    Ok(matches)
}

fn is_binary_like(path: &str) -> bool {
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
    BINARY_EXTENSIONS.contains(&ext.as_str())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{fallback_search, search};

    fn fixture() -> (tempfile::TempDir, std::path::PathBuf) {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().canonicalize().expect("canonicalize");
        std::fs::create_dir_all(root.join("src")).expect("mkdir");
        std::fs::write(
            root.join("src/main.ts"),
            "function greet() {}\nconst answer = 42;\n",
        )
        .expect("write");
        std::fs::write(root.join("logo.png"), [0u8, 1, 2, 3]).expect("write png");
        (tmp, root)
    }

    #[tokio::test]
    async fn finds_matches_with_relative_paths() {
        let (_tmp, root) = fixture();
        let matches = search(&root, "answer", None, 50).await.expect("search");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "src/main.ts");
        assert_eq!(matches[0].line, 2);
        assert!(matches[0].text.contains("42"));
    }

    #[test]
    fn fallback_degrades_to_substring_on_bad_regex() {
        let (_tmp, root) = fixture();
        let matches = fallback_search(&root, "greet(", ".", 50).expect("search");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "src/main.ts");
    }

    #[test]
    fn fallback_skips_binary_extensions() {
        let (_tmp, root) = fixture();
        let matches = fallback_search(&root, ".", ".", 500).expect("search");
        assert!(matches.iter().all(|m| !m.path.ends_with(".png")));
    }

    #[test]
    fn fallback_stops_at_max_matches() {
        let (_tmp, root) = fixture();
        std::fs::write(
            root.join("src/lots.ts"),
            "hit\n".repeat(50),
        )
        .expect("write");
        let matches = fallback_search(&root, "hit", ".", 7).expect("search");
        assert_eq!(matches.len(), 7);
    }
}
