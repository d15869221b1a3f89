use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::deps::{collect_dependency_map, DependencyMap};
use crate::fs_tools;
use crate::parsers::{self, ImportEntry, SymbolEntry, UseEntry};
use crate::sandbox;
use crate::util::now_rfc3339;

const SCAN_DEPTH: usize = 16;
const PARSE_SIZE_LIMIT: u64 = 1024 * 1024;
const DEFAULT_SYMBOL_LIMIT: usize = 80;
const MAX_SYMBOL_LIMIT: usize = 2000;
const DEFAULT_REFERENCE_LIMIT: usize = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub path: String,
    pub language: String,
    pub size_bytes: u64,
    pub line_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectIndex {
    pub generated_at: String,
    pub workspace_root: String,
    pub total_files_scanned: usize,
    pub languages: BTreeMap<String, usize>,
    pub files: Vec<FileEntry>,
    pub symbols: Vec<SymbolEntry>,
    pub imports: Vec<ImportEntry>,
    pub uses: Vec<UseEntry>,
    pub dependencies: DependencyMap,
}

/// Cached project index with a single in-flight build: the cache lock is held
/// across the build, so concurrent callers block on one scan and then all
/// observe its result.
pub struct ProjectScanner {
    workspace_root: PathBuf,
    state_dir: PathBuf,
    max_files: usize,
    cache: Mutex<Option<Arc<ProjectIndex>>>,
}

impl ProjectScanner {
    pub fn new(workspace_root: PathBuf, state_dir: PathBuf, max_files: usize) -> Self {
        Self {
            workspace_root,
            state_dir,
            max_files,
            cache: Mutex::new(None),
        }
    }

    pub async fn scan(&self, refresh: bool, max_files: Option<usize>) -> Result<Arc<ProjectIndex>> {
        let mut cache = self.cache.lock().await;
        if !refresh {
            if let Some(index) = cache.as_ref() {
                return Ok(index.clone());
            }
        }
        let index = Arc::new(self.build(max_files.unwrap_or(self.max_files))?);
        self.persist(&index);
        *cache = Some(index.clone());
        Ok(index)
    }

    pub async fn summary(&self) -> Result<String> {
        let index = self.scan(false, None).await?;
        let mut languages: Vec<String> = index
            .languages
            .iter()
            .map(|(lang, count)| format!("{lang}: {count}"))
            .collect();
        languages.sort();
        Ok(format!(
            "Indexed {} files ({}). {} symbols, {} imports, {} node deps, {} python deps.",
            index.total_files_scanned,
            languages.join(", "),
            index.symbols.len(),
            index.imports.len(),
            index.dependencies.node.len() + index.dependencies.node_dev.len(),
            index.dependencies.python.len() + index.dependencies.python_dev.len(),
        ))
    }

    /// Case-folded substring lookup over symbol names; exact matches rank
    /// before substring matches, both preserving index order.
    pub async fn lookup_symbols(
        &self,
        query: &str,
        language: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<SymbolEntry>> {
        let index = self.scan(false, None).await?;
        let needle = query.to_lowercase();
        let limit = limit.unwrap_or(DEFAULT_SYMBOL_LIMIT).min(MAX_SYMBOL_LIMIT);
        let mut exact = Vec::new();
        let mut partial = Vec::new();
        for symbol in &index.symbols {
            if let Some(lang) = language {
                if symbol.language != lang {
                    continue;
                }
            }
            let name = symbol.name.to_lowercase();
            if name == needle {
                exact.push(symbol.clone());
            } else if name.contains(&needle) {
                partial.push(symbol.clone());
            }
        }
        exact.extend(partial);
        exact.truncate(limit);
        Ok(exact)
    }

    /// Exact-name lookup over the generous use index.
    pub async fn find_references(
        &self,
        name: &str,
        language: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<UseEntry>> {
        let index = self.scan(false, None).await?;
        let limit = limit.unwrap_or(DEFAULT_REFERENCE_LIMIT);
        Ok(index
            .uses
            .iter()
            .filter(|entry| entry.name == name)
            .filter(|entry| language.map(|l| entry.language == l).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect())
    }

    pub async fn dependency_map(&self) -> Result<DependencyMap> {
        let index = self.scan(false, None).await?;
        Ok(index.dependencies.clone())
    }

    fn build(&self, max_files: usize) -> Result<ProjectIndex> {
        let root = &self.workspace_root;
        // The scanner's own state directory would otherwise show up in the
        // index and make back-to-back scans unequal.
        let state_rel = format!("{}/", sandbox::to_relative(root, &self.state_dir));
        let mut paths: Vec<String> =
            fs_tools::list_entries(root, ".", SCAN_DEPTH, max_files.saturating_mul(2))?
                .into_iter()
                .filter(|entry| !entry.ends_with('/'))
                .filter(|entry| !entry.starts_with(&state_rel))
                .collect();
        paths.sort();
        paths.truncate(max_files);

        let mut languages: BTreeMap<String, usize> = BTreeMap::new();
        let mut files = Vec::new();
        let mut symbols = Vec::new();
        let mut imports = Vec::new();
        let mut uses = Vec::new();

        for rel in paths {
            let abs = match sandbox::resolve(root, &rel) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let Ok(meta) = std::fs::metadata(&abs) else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let language = parsers::detect_language(&rel);
            *languages.entry(language.to_string()).or_insert(0) += 1;
            // Oversized or unrecognized files get a summary entry only.
            let mut line_count = 0;
            if meta.len() <= PARSE_SIZE_LIMIT && language != "unknown" {
                if let Ok(content) = std::fs::read_to_string(&abs) {
                    line_count = content.lines().count();
                    if parsers::has_parser(language) {
                        let parsed = parsers::parse_source(&rel, language, &content);
                        symbols.extend(parsed.symbols);
                        imports.extend(parsed.imports);
                        uses.extend(parsed.uses);
                    }
                }
            }
            files.push(FileEntry {
                path: rel,
                language: language.to_string(),
                size_bytes: meta.len(),
                line_count,
            });
        }

        Ok(ProjectIndex {
            generated_at: now_rfc3339(),
            workspace_root: root.display().to_string(),
            total_files_scanned: files.len(),
            languages,
            files,
            symbols,
            imports,
            uses,
            dependencies: collect_dependency_map(root),
        })
    }

    fn persist(&self, index: &ProjectIndex) {
        let path = self.index_path();
        let write = || -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(index)?;
            std::fs::write(&path, json).context("failed to write project index")
        };
        if let Err(e) = write() {
            eprintln!("WARN: failed to persist project index: {e}");
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.state_dir.join("index").join("project-index.json")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::ProjectScanner;

    fn fixture() -> (tempfile::TempDir, ProjectScanner) {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().canonicalize().expect("canonicalize");
        std::fs::create_dir_all(root.join("src")).expect("mkdir");
        std::fs::write(
            root.join("src/app.ts"),
            "export function startApp() {}\nconst port = 3000;\n",
        )
        .expect("write ts");
        std::fs::write(
            root.join("tool.py"),
            "def start_tool():\n    return startApp\n",
        )
        .expect("write py");
        std::fs::write(
            root.join("package.json"),
            r#"{"dependencies":{"express":"^4.19.0"}}"#,
        )
        .expect("write pkg");
        let state_dir = root.join(".vibe-agent");
        let scanner = ProjectScanner::new(root, state_dir, 6000);
        (tmp, scanner)
    }

    #[tokio::test]
    async fn scan_indexes_files_languages_and_symbols() {
        let (_tmp, scanner) = fixture();
        let index = scanner.scan(false, None).await.expect("scan");
        assert_eq!(
            index.languages.values().sum::<usize>(),
            index.total_files_scanned
        );
        assert!(index.symbols.iter().any(|s| s.name == "startApp"));
        assert!(index.symbols.iter().any(|s| s.name == "start_tool"));
        assert_eq!(
            index.dependencies.node.get("express").map(String::as_str),
            Some("^4.19.0")
        );
        let index_paths: Vec<&str> = index.files.iter().map(|f| f.path.as_str()).collect();
        for symbol in &index.symbols {
            assert!(index_paths.contains(&symbol.path.as_str()));
        }
    }

    #[tokio::test]
    async fn unparsed_known_language_still_gets_line_count() {
        let (_tmp, scanner) = fixture();
        let root = scanner.workspace_root.clone();
        std::fs::write(root.join("notes.md"), "# heading\n\nbody line\n").expect("write md");
        std::fs::write(root.join("data.blob"), "opaque\nbytes\n").expect("write blob");
        let index = scanner.scan(false, None).await.expect("scan");
        let md = index
            .files
            .iter()
            .find(|f| f.path == "notes.md")
            .expect("md entry");
        assert_eq!(md.language, "markdown");
        assert_eq!(md.line_count, 3);
        assert!(!index.symbols.iter().any(|s| s.path == "notes.md"));
        let blob = index
            .files
            .iter()
            .find(|f| f.path == "data.blob")
            .expect("blob entry");
        assert_eq!(blob.language, "unknown");
        assert_eq!(blob.line_count, 0);
    }

    #[tokio::test]
    async fn rescan_without_changes_is_structurally_equal() {
        let (_tmp, scanner) = fixture();
        let first = scanner.scan(false, None).await.expect("scan");
        let second = scanner.scan(false, None).await.expect("scan");
        assert!(Arc::ptr_eq(&first, &second));
        let third = scanner.scan(true, None).await.expect("rescan");
        assert_eq!(first.files, third.files);
        assert_eq!(first.symbols, third.symbols);
        assert_eq!(first.languages, third.languages);
    }

    #[tokio::test]
    async fn symbol_lookup_ranks_exact_before_substring() {
        let (_tmp, scanner) = fixture();
        let root = scanner.workspace_root.clone();
        std::fs::write(
            root.join("src/extra.ts"),
            "export function start() {}\nexport function startAppServer() {}\n",
        )
        .expect("write");
        let hits = scanner
            .lookup_symbols("start", None, None)
            .await
            .expect("lookup");
        assert_eq!(hits[0].name, "start");
        assert!(hits.iter().any(|s| s.name == "startAppServer"));
    }

    #[tokio::test]
    async fn symbol_lookup_filters_language() {
        let (_tmp, scanner) = fixture();
        let hits = scanner
            .lookup_symbols("start", Some("python"), None)
            .await
            .expect("lookup");
        assert!(hits.iter().all(|s| s.language == "python"));
        assert!(hits.iter().any(|s| s.name == "start_tool"));
    }

    #[tokio::test]
    async fn reference_lookup_is_exact() {
        let (_tmp, scanner) = fixture();
        let refs = scanner
            .find_references("startApp", None, None)
            .await
            .expect("refs");
        assert!(!refs.is_empty());
        assert!(refs.iter().all(|r| r.name == "startApp"));
    }

    #[tokio::test]
    async fn index_is_persisted_to_state_dir() {
        let (_tmp, scanner) = fixture();
        scanner.scan(false, None).await.expect("scan");
        assert!(scanner.index_path().exists());
    }
}
