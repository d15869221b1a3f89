use std::path::Path;

use crate::memory::ProjectMemory;

/// Memory entries carrying this prefix contribute verify commands directly.
pub const MEMORY_VERIFY_PREFIX: &str = "verify:";

const NPM_SCRIPT_ORDER: [&str; 5] = ["test", "lint", "format:check", "typecheck", "check"];
const PYTHON_CONFIG_FILES: [&str; 3] = ["pyproject.toml", "setup.cfg", "tox.ini"];

/// Discover verify commands from memory and repo signals, in priority order:
/// memory `verify:` entries, then `package.json` scripts, then Python tool
/// mentions in config files. Deduped and truncated to `max_commands`.
pub fn discover_verify_commands(
    root: &Path,
    memory: &ProjectMemory,
    max_commands: usize,
) -> Vec<String> {
    let mut commands = Vec::new();

    for entry in &memory.common_commands {
        if let Some(rest) = entry.strip_prefix(MEMORY_VERIFY_PREFIX) {
            let command = rest.trim();
            if !command.is_empty() {
                commands.push(command.to_string());
            }
        }
    }

    commands.extend(npm_script_commands(root));
    commands.extend(python_tool_commands(root));

    let mut deduped = Vec::new();
    for command in commands {
        if !deduped.contains(&command) {
            deduped.push(command);
        }
    }
    deduped.truncate(max_commands);
    deduped
}

fn npm_script_commands(root: &Path) -> Vec<String> {
    let Ok(raw) = std::fs::read_to_string(root.join("package.json")) else {
        return Vec::new();
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
        return Vec::new();
    };
    let Some(scripts) = value.get("scripts").and_then(|v| v.as_object()) else {
        return Vec::new();
    };
    let mut commands = Vec::new();
    for name in NPM_SCRIPT_ORDER {
        let effective = if name == "format:check" {
            if scripts.contains_key("format:check") {
                Some("format:check")
            } else if scripts.contains_key("format") {
                Some("format")
            } else {
                None
            }
        } else if scripts.contains_key(name) {
            Some(name)
        } else {
            None
        };
        if let Some(script) = effective {
            commands.push(format!("npm run -s {script} --if-present"));
        }
    }
    commands
}

fn python_tool_commands(root: &Path) -> Vec<String> {
    let mut combined = String::new();
    for file in PYTHON_CONFIG_FILES {
        if let Ok(raw) = std::fs::read_to_string(root.join(file)) {
            combined.push_str(&raw.to_lowercase());
            combined.push('\n');
        }
    }
    if combined.is_empty() {
        return Vec::new();
    }
    let mut commands = Vec::new();
    if combined.contains("pytest") {
        commands.push("pytest -q".to_string());
    }
    if combined.contains("ruff") {
        commands.push("ruff check .".to_string());
    }
    if combined.contains("black") {
        commands.push("black --check .".to_string());
    }
    if combined.contains("mypy") {
        commands.push("mypy .".to_string());
    }
    commands
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::memory::ProjectMemory;

    use super::discover_verify_commands;

    #[test]
    fn memory_verify_entries_come_first() {
        let tmp = tempdir().expect("tempdir");
        std::fs::write(
            tmp.path().join("package.json"),
            r#"{"scripts":{"test":"vitest","lint":"eslint ."}}"#,
        )
        .expect("write");
        let memory = ProjectMemory {
            common_commands: vec![
                "verify:npm run build".to_string(),
                "npm start".to_string(),
            ],
            ..Default::default()
        };
        let commands = discover_verify_commands(tmp.path(), &memory, 8);
        assert_eq!(
            commands,
            vec![
                "npm run build",
                "npm run -s test --if-present",
                "npm run -s lint --if-present",
            ]
        );
    }

    #[test]
    fn format_check_preferred_over_format() {
        let tmp = tempdir().expect("tempdir");
        std::fs::write(
            tmp.path().join("package.json"),
            r#"{"scripts":{"format":"prettier -w .","format:check":"prettier -c ."}}"#,
        )
        .expect("write");
        let commands = discover_verify_commands(tmp.path(), &ProjectMemory::default(), 8);
        assert_eq!(commands, vec!["npm run -s format:check --if-present"]);
    }

    #[test]
    fn python_tools_detected_case_insensitively() {
        let tmp = tempdir().expect("tempdir");
        std::fs::write(
            tmp.path().join("pyproject.toml"),
            "[tool.PYTEST.ini_options]\naddopts = \"-ra\"\n[tool.mypy]\nstrict = true\n",
        )
        .expect("write");
        let commands = discover_verify_commands(tmp.path(), &ProjectMemory::default(), 8);
        assert_eq!(commands, vec!["pytest -q", "mypy ."]);
    }

    #[test]
    fn dedup_and_truncation_apply() {
        let tmp = tempdir().expect("tempdir");
        std::fs::write(
            tmp.path().join("package.json"),
            r#"{"scripts":{"test":"t","lint":"l","check":"c"}}"#,
        )
        .expect("write");
        let memory = ProjectMemory {
            common_commands: vec![
                "verify:npm run -s test --if-present".to_string(),
                "verify:npm run -s test --if-present".to_string(),
            ],
            ..Default::default()
        };
        let commands = discover_verify_commands(tmp.path(), &memory, 2);
        assert_eq!(
            commands,
            vec!["npm run -s test --if-present", "npm run -s lint --if-present"]
        );
    }
}
