use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DependencyMap {
    pub node: BTreeMap<String, String>,
    pub node_dev: BTreeMap<String, String>,
    pub python: BTreeMap<String, String>,
    pub python_dev: BTreeMap<String, String>,
}

/// Collect declared dependencies from `package.json`, requirements files and
/// `pyproject.toml`. A parse error in any single source is swallowed; the
/// remaining sources still contribute.
pub fn collect_dependency_map(root: &Path) -> DependencyMap {
    let mut map = DependencyMap::default();
    collect_package_json(root, &mut map);
    collect_requirements(root, "requirements.txt", false, &mut map);
    collect_requirements(root, "requirements-dev.txt", true, &mut map);
    collect_pyproject(root, &mut map);
    map
}

fn collect_package_json(root: &Path, map: &mut DependencyMap) {
    let Ok(raw) = std::fs::read_to_string(root.join("package.json")) else {
        return;
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
        return;
    };
    for (key, target) in [
        ("dependencies", &mut map.node),
        ("devDependencies", &mut map.node_dev),
    ] {
        if let Some(obj) = value.get(key).and_then(|v| v.as_object()) {
            for (name, spec) in obj {
                let spec = spec.as_str().unwrap_or("unspecified").to_string();
                target.insert(name.clone(), spec);
            }
        }
    }
}

fn collect_requirements(root: &Path, file: &str, dev: bool, map: &mut DependencyMap) {
    let Ok(raw) = std::fs::read_to_string(root.join(file)) else {
        return;
    };
    let target = if dev {
        &mut map.python_dev
    } else {
        &mut map.python
    };
    for line in raw.lines() {
        let line = match line.find('#') {
            Some(idx) => &line[..idx],
            None => line,
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('-') {
            continue;
        }
        insert_requirement_line(line, target);
    }
}

/// PEP 621 `[project] dependencies` plus the `[tool.poetry.dependencies]`
/// table (minus the `python` interpreter pin), parsed line-wise.
fn collect_pyproject(root: &Path, map: &mut DependencyMap) {
    let Ok(raw) = std::fs::read_to_string(root.join("pyproject.toml")) else {
        return;
    };
    let mut section = String::new();
    let mut in_project_deps_array = false;
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            section = trimmed.trim_matches(['[', ']']).to_string();
            in_project_deps_array = false;
            continue;
        }
        match section.as_str() {
            "project" => {
                if trimmed.starts_with("dependencies") && trimmed.contains('=') {
                    in_project_deps_array = true;
                }
                if in_project_deps_array {
                    for quoted in extract_quoted(trimmed) {
                        insert_requirement_line(&quoted, &mut map.python);
                    }
                    if trimmed.contains(']') {
                        in_project_deps_array = false;
                    }
                }
            }
            "tool.poetry.dependencies" => {
                if let Some((name, spec)) = trimmed.split_once('=') {
                    let name = name.trim();
                    if name.is_empty() || name == "python" {
                        continue;
                    }
                    let spec = spec.trim().trim_matches('"').trim_matches('\'');
                    map.python.insert(
                        name.to_string(),
                        if spec.is_empty() {
                            "unspecified".to_string()
                        } else {
                            spec.to_string()
                        },
                    );
                }
            }
            _ => {}
        }
    }
}

fn insert_requirement_line(line: &str, target: &mut BTreeMap<String, String>) {
    let split = line
        .find(|c: char| "<>=!~[; ".contains(c))
        .unwrap_or(line.len());
    let name = line[..split].trim();
    if name.is_empty() {
        return;
    }
    let spec = line[split..].trim();
    target.insert(
        name.to_string(),
        if spec.is_empty() {
            "unspecified".to_string()
        } else {
            spec.to_string()
        },
    );
}

fn extract_quoted(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = line;
    while let Some(open) = rest.find('"') {
        let tail = &rest[open + 1..];
        let Some(close) = tail.find('"') else { break };
        out.push(tail[..close].to_string());
        rest = &tail[close + 1..];
    }
    out
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::collect_dependency_map;

    #[test]
    fn reads_package_json_sections() {
        let tmp = tempdir().expect("tempdir");
        std::fs::write(
            tmp.path().join("package.json"),
            r#"{"dependencies":{"react":"^18.0.0"},"devDependencies":{"vitest":"^1.2.0"}}"#,
        )
        .expect("write");
        let map = collect_dependency_map(tmp.path());
        assert_eq!(map.node.get("react").map(String::as_str), Some("^18.0.0"));
        assert_eq!(
            map.node_dev.get("vitest").map(String::as_str),
            Some("^1.2.0")
        );
    }

    #[test]
    fn reads_requirements_with_comments() {
        let tmp = tempdir().expect("tempdir");
        std::fs::write(
            tmp.path().join("requirements.txt"),
            "requests>=2.31 # http\nflask\n# full comment\n",
        )
        .expect("write");
        std::fs::write(tmp.path().join("requirements-dev.txt"), "pytest==8.0\n").expect("write");
        let map = collect_dependency_map(tmp.path());
        assert_eq!(
            map.python.get("requests").map(String::as_str),
            Some(">=2.31")
        );
        assert_eq!(
            map.python.get("flask").map(String::as_str),
            Some("unspecified")
        );
        assert_eq!(
            map.python_dev.get("pytest").map(String::as_str),
            Some("==8.0")
        );
    }

    #[test]
    fn reads_pyproject_pep621_and_poetry() {
        let tmp = tempdir().expect("tempdir");
        std::fs::write(
            tmp.path().join("pyproject.toml"),
            r#"[project]
name = "demo"
dependencies = [
  "httpx>=0.27",
  "rich",
]

[tool.poetry.dependencies]
python = "^3.11"
typer = "^0.12"
"#,
        )
        .expect("write");
        let map = collect_dependency_map(tmp.path());
        assert_eq!(map.python.get("httpx").map(String::as_str), Some(">=0.27"));
        assert_eq!(
            map.python.get("rich").map(String::as_str),
            Some("unspecified")
        );
        assert_eq!(map.python.get("typer").map(String::as_str), Some("^0.12"));
        assert!(!map.python.contains_key("python"));
    }

    #[test]
    fn malformed_single_source_is_swallowed() {
        let tmp = tempdir().expect("tempdir");
        std::fs::write(tmp.path().join("package.json"), "not json").expect("write");
        std::fs::write(tmp.path().join("requirements.txt"), "requests\n").expect("write");
        let map = collect_dependency_map(tmp.path());
        assert!(map.node.is_empty());
        assert!(map.python.contains_key("requests"));
    }
}
