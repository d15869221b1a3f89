use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use crate::audit::{new_session_id, AuditLog};
use crate::changes::ChangeTracker;
use crate::config::AgentConfig;
use crate::diff::{diff_stats, unified_diff};
use crate::fs_tools;
use crate::grep;
use crate::memory::MemoryStore;
use crate::policy::{detect_secrets, Policy};
use crate::protocol::{
    parse_model_response, AgentAction, ChatMessage, ResponseStatus, ToolResult,
    MAX_VERIFY_COMMANDS,
};
use crate::providers::ChatClient;
use crate::scanner::ProjectScanner;
use crate::shell::run_shell;
use crate::trace::parse_failure;
use crate::ui::AgentUi;
use crate::util::clip_chars;
use crate::verify::discover_verify_commands;

const DIFF_PREVIEW_MAX_CHARS: usize = 30_000;
const DIFF_CONTEXT_LINES: usize = 3;
const DEFAULT_LIST_DEPTH: usize = 4;
const LIST_MAX_ENTRIES: usize = 500;
const GREP_MAX_MATCHES: usize = 200;

const SYSTEM_PROMPT: &str = r#"You are a coding agent that edits the user's workspace through a fixed tool alphabet. Every reply must be a single JSON object with no prose outside it:
{
  "status": "continue" | "done" | "need_user",
  "assistant_message": "short narration for the user",
  "plan": ["up to 12 short steps"],
  "actions": [up to 6 tool calls],
  "verify": ["up to 8 shell commands that attest the work"],
  "question": "required when status is need_user",
  "memory_updates": {"projectRules": [], "architectureNotes": [], "commonCommands": [], "kv": {}}
}
Tool calls are objects tagged by "tool":
  {"tool": "list_files", "path"?, "depth"?}
  {"tool": "read_file", "path", "start_line"?, "end_line"?}
  {"tool": "grep", "pattern", "path"?}
  {"tool": "run_command", "command"}
  {"tool": "write_file", "path", "content"}
  {"tool": "scan_project", "refresh"?}
  {"tool": "symbol_lookup", "query", "language"?, "limit"?}
  {"tool": "find_references", "name", "language"?, "limit"?}
  {"tool": "dependency_map"}
  {"tool": "memory_set", "key", "value"}
  {"tool": "memory_get", "key"}
Paths are relative to the workspace root and must stay inside it. write_file replaces the whole file, so always send complete contents. Only set status to done once the verify commands pass."#;

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

#[derive(Debug)]
pub struct TaskOutcome {
    pub completed: bool,
    pub aborted: bool,
    pub stopped_early: bool,
    pub iterations: usize,
    pub rolled_back: bool,
    pub audit_path: Option<PathBuf>,
}

/// The plan -> act -> verify -> repair loop. The scanner and memory store are
/// process-scoped; conversation, change tracker and audit log live for
/// exactly one `run_task`.
pub struct Orchestrator {
    config: AgentConfig,
    client: Arc<dyn ChatClient>,
    scanner: Arc<ProjectScanner>,
    memory: Arc<MemoryStore>,
}

impl Orchestrator {
    pub fn new(config: AgentConfig, client: Arc<dyn ChatClient>) -> Self {
        let scanner = Arc::new(ProjectScanner::new(
            config.workspace_root.clone(),
            config.state_dir.clone(),
            config.max_scan_files,
        ));
        let memory = Arc::new(MemoryStore::new(&config.state_dir));
        Self {
            config,
            client,
            scanner,
            memory,
        }
    }

    pub async fn run_task(&self, goal: &str, ui: &dyn AgentUi) -> Result<TaskOutcome> {
        if self.config.api_key.is_none() {
            ui.status("No API key configured. Set VIBE_API_KEY (or GROQ_API_KEY / OPENAI_API_KEY) and retry.");
            return Ok(TaskOutcome {
                completed: false,
                aborted: true,
                stopped_early: false,
                iterations: 0,
                rolled_back: false,
                audit_path: None,
            });
        }

        let memory_snapshot = self.memory.load().await?;
        let policy = Policy::load_or_init(&self.config.state_dir)?;
        let mut tracker = ChangeTracker::new();
        let session_id = new_session_id();
        let audit = AuditLog::new(&self.config.state_dir, &session_id);
        audit.log("task_start", json!({ "goal": goal }));

        let mut messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(self.context_message(&memory_snapshot, &policy).await),
            ChatMessage::user(format!("User task: {goal}")),
        ];

        let mut completed = false;
        let mut aborted = false;
        let mut stopped_early = false;
        let mut iterations = 0;
        let mut consecutive_verify_failures: u32 = 0;
        let mut any_verify_failure = false;

        for iteration in 1..=self.config.max_iterations {
            iterations = iteration;

            let raw = match self
                .client
                .complete(&messages, self.config.tool_timeout())
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    ui.status(&format!("Model call failed: {e}"));
                    audit.log("model_error", json!({ "iteration": iteration, "error": e.to_string() }));
                    aborted = true;
                    break;
                }
            };

            let response = parse_model_response(&raw);
            if !response.assistant_message.is_empty() {
                ui.status(&response.assistant_message);
            }
            for (idx, step) in response.plan.iter().enumerate() {
                ui.status(&format!("  {}. {step}", idx + 1));
            }
            audit.log(
                "model_response",
                json!({
                    "iteration": iteration,
                    "status": response.status,
                    "plan": response.plan,
                    "actionCount": response.actions.len(),
                    "verifyCount": response.verify.len(),
                }),
            );

            if let Some(updates) = &response.memory_updates {
                match self.memory.apply_updates(updates).await {
                    Ok(tags) if !tags.is_empty() => {
                        ui.status(&format!("Memory updated: {}", tags.join(", ")));
                        audit.log("memory_updated", json!({ "tags": tags }));
                    }
                    Ok(_) => {}
                    Err(e) => ui.status(&format!("WARN: memory update failed: {e}")),
                }
            }

            let mut results: Vec<ToolResult> = Vec::new();
            let mut wrote_file = false;
            for action in &response.actions {
                let result = self
                    .execute_action(action, &policy, &mut tracker, &audit, ui)
                    .await;
                ui.status(&format!(
                    "[{}] {} {}",
                    result.tool,
                    if result.ok { "ok:" } else { "FAILED:" },
                    result.summary
                ));
                audit.log(
                    "action_result",
                    json!({
                        "iteration": iteration,
                        "tool": result.tool,
                        "ok": result.ok,
                        "summary": result.summary,
                    }),
                );
                if result.ok
                    && matches!(action, AgentAction::WriteFile { .. })
                    && result
                        .data
                        .as_ref()
                        .and_then(|d| d.get("changed"))
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false)
                {
                    wrote_file = true;
                }
                results.push(result);
            }

            let mut verify_commands = response.verify.clone();
            if self.config.auto_verify && wrote_file {
                let memory_now = self.memory.load().await.unwrap_or_default();
                for command in discover_verify_commands(
                    &self.config.workspace_root,
                    &memory_now,
                    MAX_VERIFY_COMMANDS,
                ) {
                    if !verify_commands.contains(&command) {
                        verify_commands.push(command);
                    }
                }
            }

            let mut iteration_verify_failed = false;
            let mut any_verify_ran = false;
            for command in &verify_commands {
                let result = self.run_verify_command(command, &policy).await;
                ui.status(&format!(
                    "[verify] {} {}",
                    if result.ok { "ok:" } else { "FAILED:" },
                    result.summary
                ));
                audit.log(
                    "verify_result",
                    json!({
                        "iteration": iteration,
                        "command": command,
                        "ok": result.ok,
                        "summary": result.summary,
                    }),
                );
                any_verify_ran = true;
                if !result.ok {
                    iteration_verify_failed = true;
                }
                results.push(result);
            }
            if iteration_verify_failed {
                consecutive_verify_failures += 1;
                any_verify_failure = true;
            } else if any_verify_ran {
                consecutive_verify_failures = 0;
            }

            if consecutive_verify_failures >= self.config.max_auto_repair_rounds
                && tracker.has_changes()
            {
                let keep_going = ui
                    .confirm(&format!(
                        "Verification has failed {consecutive_verify_failures} times in a row. Keep trying?"
                    ))
                    .await
                    .unwrap_or(false);
                if !keep_going {
                    stopped_early = true;
                    audit.log("stop_requested", json!({ "iteration": iteration }));
                    break;
                }
                consecutive_verify_failures = 0;
            }

            messages.push(ChatMessage::assistant(raw));
            let mut results_text = String::from("Tool results:\n");
            for result in &results {
                let serialized =
                    serde_json::to_string(result).unwrap_or_else(|_| "{}".to_string());
                results_text.push_str(&clip_chars(
                    &serialized,
                    self.config.max_tool_output_chars,
                ));
                results_text.push('\n');
            }
            messages.push(ChatMessage::user(results_text));

            match response.status {
                ResponseStatus::NeedUser => {
                    let question = response
                        .question
                        .unwrap_or_else(|| "What should I do next?".to_string());
                    match ui.ask(&question).await {
                        Ok(answer) => messages.push(ChatMessage::user(answer)),
                        Err(e) => {
                            ui.status(&format!("Cannot ask the user: {e}"));
                            audit.log("need_user_unanswered", json!({ "iteration": iteration }));
                            break;
                        }
                    }
                }
                ResponseStatus::Done => {
                    if iteration_verify_failed {
                        audit.log("done_overridden", json!({ "iteration": iteration }));
                        messages.push(ChatMessage::user(
                            "Verification failed. Continue and fix errors before marking done."
                                .to_string(),
                        ));
                    } else {
                        completed = true;
                        audit.log("task_complete", json!({ "iteration": iteration }));
                        break;
                    }
                }
                ResponseStatus::Continue => {}
            }
        }

        let mut rolled_back = false;
        if !completed && !aborted && tracker.has_changes() && any_verify_failure {
            let wants_rollback = ui
                .confirm(&format!(
                    "Verification did not pass. Roll back {} changed file(s) to their pre-task state?",
                    tracker.changed().len()
                ))
                .await
                .unwrap_or(false);
            if wants_rollback {
                match tracker.rollback() {
                    Ok(restored) => {
                        rolled_back = true;
                        for path in &restored {
                            ui.status(&format!("Restored {path}"));
                        }
                        audit.log("rollback", json!({ "restoredFiles": restored }));
                    }
                    Err(e) => ui.status(&format!("Rollback failed: {e}")),
                }
            }
        }

        self.print_change_summary(&tracker, rolled_back, ui);
        audit.log(
            "task_end",
            json!({
                "completed": completed,
                "aborted": aborted,
                "stoppedEarly": stopped_early,
                "rolledBack": rolled_back,
                "iterations": iterations,
            }),
        );
        ui.status(&format!("Audit log: {}", audit.path().display()));

        Ok(TaskOutcome {
            completed,
            aborted,
            stopped_early,
            iterations,
            rolled_back,
            audit_path: Some(audit.path().to_path_buf()),
        })
    }

    async fn context_message(&self, memory: &crate::memory::ProjectMemory, policy: &Policy) -> String {
        let scanner_summary = self
            .scanner
            .summary()
            .await
            .unwrap_or_else(|e| format!("project scan unavailable: {e}"));
        format!(
            "Workspace root: {}\nProject: {}\nProject memory: {}\nPolicy: {}",
            self.config.workspace_root.display(),
            scanner_summary,
            serde_json::to_string(memory).unwrap_or_else(|_| "{}".to_string()),
            serde_json::to_string(policy).unwrap_or_else(|_| "{}".to_string()),
        )
    }

    /// Dispatch one action. The boundary converts every error into an
    /// `ok:false` result so a failing action can never kill the loop.
    async fn execute_action(
        &self,
        action: &AgentAction,
        policy: &Policy,
        tracker: &mut ChangeTracker,
        audit: &AuditLog,
        ui: &dyn AgentUi,
    ) -> ToolResult {
        let tool = action.tool_name();
        match self.dispatch(action, policy, tracker, audit, ui).await {
            Ok(result) => result,
            Err(e) => ToolResult::failed(tool, format!("Tool failed: {e}"), None),
        }
    }

    async fn dispatch(
        &self,
        action: &AgentAction,
        policy: &Policy,
        tracker: &mut ChangeTracker,
        audit: &AuditLog,
        ui: &dyn AgentUi,
    ) -> Result<ToolResult> {
        let root = &self.config.workspace_root;
        match action {
            AgentAction::ListFiles { path, depth } => {
                let start = path.as_deref().unwrap_or(".");
                let entries = fs_tools::list_entries(
                    root,
                    start,
                    depth.unwrap_or(DEFAULT_LIST_DEPTH),
                    LIST_MAX_ENTRIES,
                )?;
                Ok(ToolResult::ok(
                    "list_files",
                    format!("Listed {} entries under '{start}'", entries.len()),
                    Some(json!({ "entries": entries })),
                ))
            }
            AgentAction::ReadFile {
                path,
                start_line,
                end_line,
            } => {
                let content = fs_tools::read_segment(
                    root,
                    path,
                    *start_line,
                    *end_line,
                    self.config.max_tool_output_chars,
                )
                .await?;
                Ok(ToolResult::ok(
                    "read_file",
                    format!("Read {path} ({} chars)", content.chars().count()),
                    Some(json!({ "path": path, "content": content })),
                ))
            }
            AgentAction::Grep { pattern, path } => {
                let matches =
                    grep::search(root, pattern, path.as_deref(), GREP_MAX_MATCHES).await?;
                Ok(ToolResult::ok(
                    "grep",
                    format!("Found {} match(es) for '{pattern}'", matches.len()),
                    Some(serde_json::to_value(&matches)?),
                ))
            }
            AgentAction::RunCommand { command } => {
                if let Err(reason) = policy.check_command(command) {
                    return Ok(ToolResult::failed(
                        "run_command",
                        format!("Blocked by policy: {reason}"),
                        None,
                    ));
                }
                let outcome = run_shell(
                    root,
                    command,
                    self.config.tool_timeout(),
                    self.config.max_tool_output_chars,
                )
                .await?;
                let mut data = serde_json::to_value(&outcome)?;
                let summary = if outcome.success() {
                    format!("Command exited 0 in {}ms", outcome.duration_ms)
                } else if outcome.timed_out {
                    format!("Command timed out after {}ms", outcome.duration_ms)
                } else {
                    format!("Command failed (exit {})", exit_label(outcome.exit_code))
                };
                if !outcome.success() {
                    let combined = format!("{}\n{}", outcome.stderr, outcome.stdout);
                    data["failureReport"] = serde_json::to_value(parse_failure(&combined))?;
                }
                Ok(ToolResult {
                    tool: "run_command".to_string(),
                    ok: outcome.success(),
                    summary,
                    data: Some(data),
                })
            }
            AgentAction::WriteFile { path, content } => {
                self.write_file_action(path, content, policy, tracker, audit, ui)
                    .await
            }
            AgentAction::ScanProject { refresh } => {
                let index = self.scanner.scan(*refresh, None).await?;
                Ok(ToolResult::ok(
                    "scan_project",
                    format!(
                        "Indexed {} files, {} symbols",
                        index.total_files_scanned,
                        index.symbols.len()
                    ),
                    Some(json!({
                        "totalFilesScanned": index.total_files_scanned,
                        "languages": index.languages,
                        "symbolCount": index.symbols.len(),
                    })),
                ))
            }
            AgentAction::SymbolLookup {
                query,
                language,
                limit,
            } => {
                let symbols = self
                    .scanner
                    .lookup_symbols(query, language.as_deref(), *limit)
                    .await?;
                Ok(ToolResult::ok(
                    "symbol_lookup",
                    format!("Found {} symbol(s) for '{query}'", symbols.len()),
                    Some(serde_json::to_value(&symbols)?),
                ))
            }
            AgentAction::FindReferences {
                name,
                language,
                limit,
            } => {
                let references = self
                    .scanner
                    .find_references(name, language.as_deref(), *limit)
                    .await?;
                Ok(ToolResult::ok(
                    "find_references",
                    format!("Found {} reference(s) to '{name}'", references.len()),
                    Some(serde_json::to_value(&references)?),
                ))
            }
            AgentAction::DependencyMap => {
                let map = self.scanner.dependency_map().await?;
                Ok(ToolResult::ok(
                    "dependency_map",
                    format!(
                        "{} node and {} python dependencies",
                        map.node.len() + map.node_dev.len(),
                        map.python.len() + map.python_dev.len()
                    ),
                    Some(serde_json::to_value(&map)?),
                ))
            }
            AgentAction::MemorySet { key, value } => {
                self.memory.set(key, value).await?;
                Ok(ToolResult::ok(
                    "memory_set",
                    format!("Stored memory key '{key}'"),
                    None,
                ))
            }
            AgentAction::MemoryGet { key } => {
                let value = self.memory.get(key).await?;
                let summary = match &value {
                    Some(_) => format!("Found memory key '{key}'"),
                    None => format!("Memory key '{key}' is not set"),
                };
                Ok(ToolResult::ok(
                    "memory_get",
                    summary,
                    Some(json!({ "key": key, "value": value })),
                ))
            }
        }
    }

    async fn write_file_action(
        &self,
        path: &str,
        content: &str,
        policy: &Policy,
        tracker: &mut ChangeTracker,
        audit: &AuditLog,
        ui: &dyn AgentUi,
    ) -> Result<ToolResult> {
        let root = &self.config.workspace_root;
        let abs = crate::sandbox::resolve(root, path)?;
        let rel = crate::sandbox::to_relative(root, &abs);

        if let Err(reason) = policy.check_write_path(&rel) {
            return Ok(ToolResult::failed(
                "write_file",
                format!("Blocked by policy: {reason}"),
                None,
            ));
        }
        if !policy.allow_potential_secrets {
            let findings = detect_secrets(content);
            if !findings.is_empty() {
                return Ok(ToolResult::failed(
                    "write_file",
                    format!(
                        "Write blocked: {} potential secret(s) detected",
                        findings.len()
                    ),
                    Some(json!({ "findings": findings })),
                ));
            }
        }

        let existed = fs_tools::exists(root, &rel).await?;
        let before = fs_tools::read_if_exists(root, &rel).await?;
        if before == content {
            return Ok(ToolResult::ok(
                "write_file",
                format!("No changes for {rel}"),
                Some(json!({ "changed": false })),
            ));
        }

        let diff = unified_diff(&before, content, &rel, DIFF_CONTEXT_LINES);
        ui.status(&clip_chars(&diff, DIFF_PREVIEW_MAX_CHARS));
        let approved = ui
            .confirm(&format!("Apply changes to {rel}?"))
            .await
            .unwrap_or(false);
        if !approved {
            return Ok(ToolResult::failed(
                "write_file",
                format!("Write to {rel} was not approved"),
                Some(json!({ "changed": false })),
            ));
        }

        tracker.record_before(abs.clone(), rel.clone(), existed, before.into_bytes());
        fs_tools::write_file(root, &rel, content).await?;
        tracker.record_after(&abs, content.as_bytes().to_vec());
        let (added, removed) = diff_stats(&diff);
        audit.log(
            "write_applied",
            json!({ "path": rel, "added": added, "removed": removed }),
        );
        Ok(ToolResult::ok(
            "write_file",
            format!("Wrote {rel} (+{added}/-{removed})"),
            Some(json!({ "changed": true, "added": added, "removed": removed })),
        ))
    }

    async fn run_verify_command(&self, command: &str, policy: &Policy) -> ToolResult {
        if let Err(reason) = policy.check_command(command) {
            return ToolResult::failed(
                "verify",
                format!("Blocked by policy: {reason}"),
                Some(json!({ "command": command })),
            );
        }
        match run_shell(
            &self.config.workspace_root,
            command,
            self.config.tool_timeout(),
            self.config.max_tool_output_chars,
        )
        .await
        {
            Ok(outcome) => {
                let ok = outcome.success();
                let summary = if ok {
                    format!("'{command}' passed in {}ms", outcome.duration_ms)
                } else if outcome.timed_out {
                    format!("'{command}' timed out")
                } else {
                    format!("'{command}' failed (exit {})", exit_label(outcome.exit_code))
                };
                let mut data = serde_json::to_value(&outcome)
                    .unwrap_or_else(|_| json!({ "command": command }));
                if !ok {
                    let combined = format!("{}\n{}", outcome.stderr, outcome.stdout);
                    data["failureReport"] = serde_json::to_value(parse_failure(&combined))
                        .unwrap_or(serde_json::Value::Null);
                }
                ToolResult {
                    tool: "verify".to_string(),
                    ok,
                    summary,
                    data: Some(data),
                }
            }
            Err(e) => ToolResult::failed("verify", format!("Tool failed: {e}"), None),
        }
    }

    fn print_change_summary(&self, tracker: &ChangeTracker, rolled_back: bool, ui: &dyn AgentUi) {
        let changed = tracker.changed();
        if changed.is_empty() {
            ui.status("No files changed.");
            return;
        }
        ui.status("Changed files:");
        for snapshot in changed {
            let before = String::from_utf8_lossy(&snapshot.before);
            let after = String::from_utf8_lossy(&snapshot.after);
            let diff = unified_diff(&before, &after, &snapshot.rel, DIFF_CONTEXT_LINES);
            let (added, removed) = diff_stats(&diff);
            ui.status(&format!("  {} +{added}/-{removed}", snapshot.rel));
        }
        if rolled_back {
            ui.status("All changes were rolled back.");
        }
    }
}
