use std::path::Path;

use anyhow::{Context, Result};

use crate::sandbox;
use crate::util::clip_chars;

/// Directories pruned from every traversal.
pub const IGNORED_DIRS: [&str; 9] = [
    ".git",
    "node_modules",
    "dist",
    "build",
    "coverage",
    ".next",
    ".turbo",
    ".idea",
    ".vscode",
];

pub fn is_ignored_dir(name: &str) -> bool {
    IGNORED_DIRS.contains(&name)
}

/// Pre-order listing rooted at `start_rel`, sorted per directory, pruning the
/// ignore set. Directories carry a trailing `/`. Descends at most `depth`
/// levels and returns at most `max_entries` relative paths.
pub fn list_entries(
    root: &Path,
    start_rel: &str,
    depth: usize,
    max_entries: usize,
) -> Result<Vec<String>> {
    let start = sandbox::resolve(root, start_rel)?;
    let mut entries = Vec::new();
    walk(root, &start, 1, depth, max_entries, &mut entries)?;
    Ok(entries)
}

fn walk(
    root: &Path,
    dir: &Path,
    level: usize,
    depth: usize,
    max_entries: usize,
    out: &mut Vec<String>,
) -> Result<()> {
    if out.len() >= max_entries {
        return Ok(());
    }
    let mut names: Vec<(String, bool)> = Vec::new();
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(_) => return Ok(()),
    };
    for entry in read.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir && is_ignored_dir(&name) {
            continue;
        }
        names.push((name, is_dir));
    }
    names.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, is_dir) in names {
        if out.len() >= max_entries {
            return Ok(());
        }
        let child = dir.join(&name);
        let rel = sandbox::to_relative(root, &child);
        if is_dir {
            out.push(format!("{rel}/"));
            if level < depth {
                walk(root, &child, level + 1, depth, max_entries, out)?;
            }
        } else {
            out.push(rel);
        }
    }
    Ok(())
}

/// Read an inclusive 1-based line range of a UTF-8 file, clipped to
/// `max_chars` with a visible truncation marker.
pub async fn read_segment(
    root: &Path,
    rel: &str,
    start_line: Option<usize>,
    end_line: Option<usize>,
    max_chars: usize,
) -> Result<String> {
    let path = sandbox::resolve(root, rel)?;
    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read '{rel}'"))?;
    let lines: Vec<&str> = content.lines().collect();
    let start = start_line.unwrap_or(1).max(1);
    let end = end_line.unwrap_or(lines.len()).min(lines.len());
    if start > end {
        return Ok(String::new());
    }
    let slice = lines[start - 1..end].join("\n");
    Ok(clip_chars(&slice, max_chars))
}

/// Write UTF-8 content, creating parent directories as needed. Callers are
/// responsible for gating the write.
pub async fn write_file(root: &Path, rel: &str, content: &str) -> Result<()> {
    let path = sandbox::resolve(root, rel)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create parent dirs for '{rel}'"))?;
    }
    tokio::fs::write(&path, content)
        .await
        .with_context(|| format!("failed to write '{rel}'"))
}

pub async fn exists(root: &Path, rel: &str) -> Result<bool> {
    let path = sandbox::resolve(root, rel)?;
    Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
}

pub async fn read_if_exists(root: &Path, rel: &str) -> Result<String> {
    let path = sandbox::resolve(root, rel)?;
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("failed to read '{rel}'")),
    }
}

pub async fn delete_if_exists(root: &Path, rel: &str) -> Result<()> {
    let path = sandbox::resolve(root, rel)?;
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to delete '{rel}'")),
    }
}
