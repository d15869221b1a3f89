use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::util::now_rfc3339;

const MAX_LIST_ENTRIES: usize = 200;
pub const MAX_KV_BATCH: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectMemory {
    pub project_rules: Vec<String>,
    pub architecture_notes: Vec<String>,
    pub common_commands: Vec<String>,
    pub kv: BTreeMap<String, String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryUpdates {
    pub project_rules: Vec<String>,
    pub architecture_notes: Vec<String>,
    pub common_commands: Vec<String>,
    pub kv: BTreeMap<String, String>,
}

impl MemoryUpdates {
    pub fn is_empty(&self) -> bool {
        self.project_rules.is_empty()
            && self.architecture_notes.is_empty()
            && self.common_commands.is_empty()
            && self.kv.is_empty()
    }
}

/// Persisted project memory behind a single-writer lock: every mutation
/// completes its disk write before the lock releases.
pub struct MemoryStore {
    path: PathBuf,
    cache: Mutex<Option<ProjectMemory>>,
}

impl MemoryStore {
    pub fn new(state_dir: &std::path::Path) -> Self {
        Self {
            path: state_dir.join("memory.json"),
            cache: Mutex::new(None),
        }
    }

    pub async fn load(&self) -> Result<ProjectMemory> {
        let mut cache = self.cache.lock().await;
        Ok(self.loaded(&mut cache)?.clone())
    }

    /// Merge updates in, returning one tag per change surface
    /// (`projectRules(+2)`, `kv.style.imports`). No tags means nothing
    /// changed and nothing was written.
    pub async fn apply_updates(&self, updates: &MemoryUpdates) -> Result<Vec<String>> {
        let mut cache = self.cache.lock().await;
        let memory = self.loaded(&mut cache)?;
        let mut tags = Vec::new();

        let added = merge_list(&mut memory.project_rules, &updates.project_rules);
        if added > 0 {
            tags.push(format!("projectRules(+{added})"));
        }
        let added = merge_list(&mut memory.architecture_notes, &updates.architecture_notes);
        if added > 0 {
            tags.push(format!("architectureNotes(+{added})"));
        }
        let added = merge_list(&mut memory.common_commands, &updates.common_commands);
        if added > 0 {
            tags.push(format!("commonCommands(+{added})"));
        }
        for (key, value) in updates.kv.iter().take(MAX_KV_BATCH) {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            if memory.kv.get(key).map(String::as_str) != Some(value.as_str()) {
                memory.kv.insert(key.to_string(), value.clone());
                tags.push(format!("kv.{key}"));
            }
        }

        if !tags.is_empty() {
            memory.updated_at = now_rfc3339();
            self.persist(memory)?;
        }
        Ok(tags)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut cache = self.cache.lock().await;
        Ok(self.loaded(&mut cache)?.kv.get(key).cloned())
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<Vec<String>> {
        let updates = MemoryUpdates {
            kv: BTreeMap::from([(key.to_string(), value.to_string())]),
            ..Default::default()
        };
        self.apply_updates(&updates).await
    }

    fn loaded<'a>(
        &self,
        cache: &'a mut Option<ProjectMemory>,
    ) -> Result<&'a mut ProjectMemory> {
        if cache.is_none() {
            let memory = match std::fs::read_to_string(&self.path) {
                Ok(raw) => {
                    let mut memory: ProjectMemory = serde_json::from_str(&raw)
                        .with_context(|| format!("failed to parse {}", self.path.display()))?;
                    sanitize(&mut memory);
                    memory
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => ProjectMemory::default(),
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("failed to read {}", self.path.display()))
                }
            };
            *cache = Some(memory);
        }
        Ok(cache.get_or_insert_with(ProjectMemory::default))
    }

    fn persist(&self, memory: &ProjectMemory) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(memory)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

fn merge_list(target: &mut Vec<String>, additions: &[String]) -> usize {
    let mut added = 0;
    for entry in additions {
        let entry = entry.trim();
        if entry.is_empty() || target.iter().any(|e| e == entry) {
            continue;
        }
        if target.len() >= MAX_LIST_ENTRIES {
            break;
        }
        target.push(entry.to_string());
        added += 1;
    }
    added
}

fn sanitize(memory: &mut ProjectMemory) {
    for list in [
        &mut memory.project_rules,
        &mut memory.architecture_notes,
        &mut memory.common_commands,
    ] {
        let mut seen = Vec::new();
        list.retain(|entry| {
            let trimmed = entry.trim().to_string();
            if trimmed.is_empty() || seen.contains(&trimmed) {
                false
            } else {
                seen.push(trimmed);
                true
            }
        });
        list.iter_mut().for_each(|e| *e = e.trim().to_string());
        list.truncate(MAX_LIST_ENTRIES);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::tempdir;

    use super::{MemoryStore, MemoryUpdates};

    #[tokio::test]
    async fn absent_file_loads_empty_memory() {
        let tmp = tempdir().expect("tempdir");
        let store = MemoryStore::new(tmp.path());
        let memory = store.load().await.expect("load");
        assert!(memory.project_rules.is_empty());
        assert!(memory.kv.is_empty());
    }

    #[tokio::test]
    async fn updates_merge_dedupe_and_tag() {
        let tmp = tempdir().expect("tempdir");
        let store = MemoryStore::new(tmp.path());
        let updates = MemoryUpdates {
            project_rules: vec![
                "  use strict mode ".to_string(),
                "use strict mode".to_string(),
                "".to_string(),
            ],
            kv: BTreeMap::from([("style.imports".to_string(), "sorted".to_string())]),
            ..Default::default()
        };
        let tags = store.apply_updates(&updates).await.expect("apply");
        assert_eq!(tags, vec!["projectRules(+1)", "kv.style.imports"]);

        let memory = store.load().await.expect("load");
        assert_eq!(memory.project_rules, vec!["use strict mode"]);
        assert!(!memory.updated_at.is_empty());

        // Re-applying the same updates is a no-op and produces no tags.
        let tags = store.apply_updates(&updates).await.expect("apply again");
        assert!(tags.is_empty());
    }

    #[tokio::test]
    async fn memory_round_trips_through_disk() {
        let tmp = tempdir().expect("tempdir");
        {
            let store = MemoryStore::new(tmp.path());
            store.set("build", "cargo build").await.expect("set");
        }
        let fresh = MemoryStore::new(tmp.path());
        assert_eq!(
            fresh.get("build").await.expect("get"),
            Some("cargo build".to_string())
        );
        let raw = std::fs::read_to_string(tmp.path().join("memory.json")).expect("read");
        assert!(raw.contains("updatedAt"));
        assert!(raw.contains("projectRules"));
    }

    #[tokio::test]
    async fn lists_cap_at_two_hundred() {
        let tmp = tempdir().expect("tempdir");
        let store = MemoryStore::new(tmp.path());
        let updates = MemoryUpdates {
            common_commands: (0..300).map(|i| format!("cmd {i}")).collect(),
            ..Default::default()
        };
        store.apply_updates(&updates).await.expect("apply");
        let memory = store.load().await.expect("load");
        assert_eq!(memory.common_commands.len(), 200);
    }
}
