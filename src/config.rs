use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_MAX_ITERATIONS: usize = 6;
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_MAX_TOOL_OUTPUT_CHARS: usize = 18_000;
pub const DEFAULT_MAX_SCAN_FILES: usize = 6_000;
pub const DEFAULT_AUTO_REPAIR_ROUNDS: u32 = 3;

/// Immutable per-session runtime configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub workspace_root: PathBuf,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub max_iterations: usize,
    pub tool_timeout_ms: u64,
    pub max_tool_output_chars: usize,
    pub max_scan_files: usize,
    pub max_auto_repair_rounds: u32,
    pub auto_verify: bool,
    pub state_dir: PathBuf,
}

impl AgentConfig {
    /// Build configuration from the environment. Invalid numeric overrides
    /// fall back to their defaults.
    pub fn from_env(workspace_root: &Path) -> Result<Self> {
        let workspace_root = workspace_root.canonicalize().with_context(|| {
            format!(
                "workspace root '{}' does not exist",
                workspace_root.display()
            )
        })?;
        let state_dir = first_env(&["VIBE_STATE_DIR"])
            .map(PathBuf::from)
            .unwrap_or_else(|| workspace_root.join(".vibe-agent"));
        Ok(Self {
            api_key: first_env(&["VIBE_API_KEY", "GROQ_API_KEY", "OPENAI_API_KEY"]),
            model: first_env(&["VIBE_MODEL", "GROQ_MODEL"])
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: first_env(&["VIBE_BASE_URL", "GROQ_BASE_URL"])
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            max_iterations: env_number("VIBE_MAX_ITERATIONS", DEFAULT_MAX_ITERATIONS),
            tool_timeout_ms: env_number("VIBE_TOOL_TIMEOUT_MS", DEFAULT_TOOL_TIMEOUT_MS),
            max_tool_output_chars: env_number(
                "VIBE_MAX_TOOL_OUTPUT_CHARS",
                DEFAULT_MAX_TOOL_OUTPUT_CHARS,
            ),
            max_scan_files: env_number("VIBE_MAX_SCAN_FILES", DEFAULT_MAX_SCAN_FILES),
            max_auto_repair_rounds: env_number(
                "VIBE_AUTO_REPAIR_ROUNDS",
                DEFAULT_AUTO_REPAIR_ROUNDS,
            ),
            auto_verify: env_flag("VIBE_AUTO_VERIFY", true),
            workspace_root,
            state_dir,
        })
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn env_number<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => !matches!(raw.trim().to_lowercase().as_str(), "0" | "false" | "off" | "no"),
        Err(_) => default,
    }
}
