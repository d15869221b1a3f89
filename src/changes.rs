use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub path: PathBuf,
    pub rel: String,
    pub existed_before: bool,
    pub before: Vec<u8>,
    pub after: Vec<u8>,
}

/// Per-task record of pre-change file state. The first observation of a path
/// wins, so rollback always restores the pre-task state rather than some
/// mid-task intermediate.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    snapshots: Vec<FileSnapshot>,
    by_path: HashMap<PathBuf, usize>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_before(&mut self, path: PathBuf, rel: String, existed: bool, before: Vec<u8>) {
        if self.by_path.contains_key(&path) {
            return;
        }
        self.by_path.insert(path.clone(), self.snapshots.len());
        self.snapshots.push(FileSnapshot {
            path,
            rel,
            existed_before: existed,
            after: before.clone(),
            before,
        });
    }

    pub fn record_after(&mut self, path: &PathBuf, after: Vec<u8>) {
        if let Some(&idx) = self.by_path.get(path) {
            self.snapshots[idx].after = after;
        }
    }

    pub fn has_changes(&self) -> bool {
        self.snapshots.iter().any(|s| s.before != s.after)
    }

    pub fn changed(&self) -> Vec<&FileSnapshot> {
        self.snapshots.iter().filter(|s| s.before != s.after).collect()
    }

    /// Restore every snapshot, newest first, and report the restored paths in
    /// chronological order.
    pub fn rollback(&self) -> Result<Vec<String>> {
        let mut restored = Vec::new();
        for snapshot in self.snapshots.iter().rev() {
            if snapshot.existed_before {
                if let Some(parent) = snapshot.path.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("failed to recreate parent for '{}'", snapshot.rel)
                    })?;
                }
                std::fs::write(&snapshot.path, &snapshot.before)
                    .with_context(|| format!("failed to restore '{}'", snapshot.rel))?;
            } else {
                match std::fs::remove_file(&snapshot.path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(e)
                            .with_context(|| format!("failed to remove '{}'", snapshot.rel))
                    }
                }
            }
            restored.push(snapshot.rel.clone());
        }
        restored.reverse();
        Ok(restored)
    }
}
