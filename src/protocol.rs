use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::{MemoryUpdates, MAX_KV_BATCH};

pub const MAX_PLAN_STEPS: usize = 12;
pub const MAX_ACTIONS: usize = 6;
pub const MAX_VERIFY_COMMANDS: usize = 8;
pub const MAX_MEMORY_LIST_UPDATES: usize = 30;

pub const RETRY_QUESTION: &str =
    "The previous reply was not valid JSON. Respond again with a single strict JSON object \
     matching the response schema.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Continue,
    Done,
    NeedUser,
}

/// The closed action alphabet the model may request. Each variant carries
/// only its own parameters; the orchestrator dispatches by exhaustive match.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum AgentAction {
    ListFiles {
        path: Option<String>,
        depth: Option<usize>,
    },
    ReadFile {
        path: String,
        start_line: Option<usize>,
        end_line: Option<usize>,
    },
    Grep {
        pattern: String,
        path: Option<String>,
    },
    RunCommand {
        command: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    ScanProject {
        refresh: bool,
    },
    SymbolLookup {
        query: String,
        language: Option<String>,
        limit: Option<usize>,
    },
    FindReferences {
        name: String,
        language: Option<String>,
        limit: Option<usize>,
    },
    DependencyMap,
    MemorySet {
        key: String,
        value: String,
    },
    MemoryGet {
        key: String,
    },
}

impl AgentAction {
    pub fn tool_name(&self) -> &'static str {
        match self {
            AgentAction::ListFiles { .. } => "list_files",
            AgentAction::ReadFile { .. } => "read_file",
            AgentAction::Grep { .. } => "grep",
            AgentAction::RunCommand { .. } => "run_command",
            AgentAction::WriteFile { .. } => "write_file",
            AgentAction::ScanProject { .. } => "scan_project",
            AgentAction::SymbolLookup { .. } => "symbol_lookup",
            AgentAction::FindReferences { .. } => "find_references",
            AgentAction::DependencyMap => "dependency_map",
            AgentAction::MemorySet { .. } => "memory_set",
            AgentAction::MemoryGet { .. } => "memory_get",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub status: ResponseStatus,
    pub assistant_message: String,
    pub plan: Vec<String>,
    pub actions: Vec<AgentAction>,
    pub verify: Vec<String>,
    pub question: Option<String>,
    pub memory_updates: Option<MemoryUpdates>,
}

/// Result envelope every dispatched action produces.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub tool: String,
    pub ok: bool,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    pub fn ok(tool: &str, summary: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            tool: tool.to_string(),
            ok: true,
            summary: summary.into(),
            data,
        }
    }

    pub fn failed(tool: &str, summary: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            tool: tool.to_string(),
            ok: false,
            summary: summary.into(),
            data,
        }
    }
}

/// Normalize raw model text into a valid response. Total: every input maps
/// to a response within the caps; malformed JSON downgrades to a `need_user`
/// retry request and malformed actions are dropped.
pub fn parse_model_response(text: &str) -> ModelResponse {
    let Some(value) = extract_json_object(text) else {
        return retry_response();
    };

    let status = match value.get("status").and_then(Value::as_str) {
        Some("done") => ResponseStatus::Done,
        Some("need_user") => ResponseStatus::NeedUser,
        _ => ResponseStatus::Continue,
    };
    let assistant_message = value
        .get("assistant_message")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();
    let plan = string_list(value.get("plan"), MAX_PLAN_STEPS);
    let actions = value
        .get("actions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(parse_action)
                .take(MAX_ACTIONS)
                .collect()
        })
        .unwrap_or_default();
    let verify = value
        .get("verify")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Object(obj) => obj
                        .get("command")
                        .and_then(Value::as_str)
                        .map(|s| s.trim().to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .take(MAX_VERIFY_COMMANDS)
                .collect()
        })
        .unwrap_or_default();
    let question = value
        .get("question")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let memory_updates = value.get("memory_updates").and_then(parse_memory_updates);

    let question = if status == ResponseStatus::NeedUser && question.is_none() {
        Some("What should I do next?".to_string())
    } else {
        question
    };

    ModelResponse {
        status,
        assistant_message,
        plan,
        actions,
        verify,
        question,
        memory_updates,
    }
}

fn retry_response() -> ModelResponse {
    ModelResponse {
        status: ResponseStatus::NeedUser,
        assistant_message: String::new(),
        plan: Vec::new(),
        actions: Vec::new(),
        verify: Vec::new(),
        question: Some(RETRY_QUESTION.to_string()),
        memory_updates: None,
    }
}

/// Pull the first JSON object out of free-form model text: fenced blocks
/// first, then the span between the first `{` and the last `}`.
fn extract_json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest))
        .unwrap_or(trimmed)
        .trim();
    if let Ok(value) = serde_json::from_str::<Value>(unfenced) {
        if value.is_object() {
            return Some(value);
        }
    }
    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if start > end {
        return None;
    }
    serde_json::from_str::<Value>(&unfenced[start..=end])
        .ok()
        .filter(Value::is_object)
}

fn string_list(value: Option<&Value>, cap: usize) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .take(cap)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_memory_updates(value: &Value) -> Option<MemoryUpdates> {
    let obj = value.as_object()?;
    let kv: BTreeMap<String, String> = obj
        .get("kv")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .take(MAX_KV_BATCH)
                .collect()
        })
        .unwrap_or_default();
    let updates = MemoryUpdates {
        project_rules: string_list(obj.get("projectRules"), MAX_MEMORY_LIST_UPDATES),
        architecture_notes: string_list(obj.get("architectureNotes"), MAX_MEMORY_LIST_UPDATES),
        common_commands: string_list(obj.get("commonCommands"), MAX_MEMORY_LIST_UPDATES),
        kv,
    };
    if updates.is_empty() {
        None
    } else {
        Some(updates)
    }
}

/// Parse one action object; `None` drops it (unknown tool, missing or
/// mistyped required fields).
fn parse_action(value: &Value) -> Option<AgentAction> {
    let obj = value.as_object()?;
    let tool = obj.get("tool").and_then(Value::as_str)?;
    let string_field = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);
    let usize_field = |key: &str| {
        obj.get(key)
            .and_then(Value::as_u64)
            .map(|n| n as usize)
    };
    match tool {
        "list_files" => Some(AgentAction::ListFiles {
            path: string_field("path"),
            depth: usize_field("depth"),
        }),
        "read_file" => Some(AgentAction::ReadFile {
            path: string_field("path")?,
            start_line: usize_field("start_line"),
            end_line: usize_field("end_line"),
        }),
        "grep" => Some(AgentAction::Grep {
            pattern: string_field("pattern")?,
            path: string_field("path"),
        }),
        "run_command" => Some(AgentAction::RunCommand {
            command: string_field("command")?,
        }),
        "write_file" => Some(AgentAction::WriteFile {
            path: string_field("path")?,
            content: string_field("content")?,
        }),
        "scan_project" => Some(AgentAction::ScanProject {
            refresh: obj.get("refresh").and_then(Value::as_bool).unwrap_or(false),
        }),
        "symbol_lookup" => Some(AgentAction::SymbolLookup {
            query: string_field("query")?,
            language: string_field("language"),
            limit: usize_field("limit"),
        }),
        "find_references" => Some(AgentAction::FindReferences {
            name: string_field("name")?,
            language: string_field("language"),
            limit: usize_field("limit"),
        }),
        "dependency_map" => Some(AgentAction::DependencyMap),
        "memory_set" => Some(AgentAction::MemorySet {
            key: string_field("key")?,
            value: string_field("value")?,
        }),
        "memory_get" => Some(AgentAction::MemoryGet {
            key: string_field("key")?,
        }),
        _ => None,
    }
}
