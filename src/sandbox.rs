use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Result};

/// Resolve a user-supplied path against the workspace root and refuse any
/// result that is not the root itself or a proper descendant of it.
///
/// Normalization is lexical: `.` and `..` components are folded without
/// touching the filesystem, so a symlink can never be followed past the root
/// during resolution.
pub fn resolve(root: &Path, user_path: &str) -> Result<PathBuf> {
    let candidate = Path::new(user_path);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let normalized = normalize_lexically(&joined);
    if !is_within(root, &normalized) {
        bail!("path '{user_path}' is outside workspace root");
    }
    Ok(normalized)
}

/// Render an absolute path inside the workspace as a forward-slash relative
/// path. Paths outside the root are returned as-is (display form).
pub fn to_relative(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let s = rel.display().to_string();
    if std::path::MAIN_SEPARATOR == '/' {
        s
    } else {
        s.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    // Walking above the filesystem root; keep the component
                    // so the containment check below rejects it.
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn is_within(root: &Path, path: &Path) -> bool {
    if cfg!(windows) {
        let root_lower = root.to_string_lossy().to_lowercase();
        let path_lower = path.to_string_lossy().to_lowercase();
        Path::new(&path_lower).starts_with(Path::new(&root_lower))
    } else {
        path.starts_with(root)
    }
}
