use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::util::now_rfc3339;

/// Session ids are the RFC3339 start time made filename-safe.
pub fn new_session_id() -> String {
    now_rfc3339().replace([':', '.'], "-")
}

/// Append-only JSONL event log for one task. Logging is best effort: IO
/// failures are reported to stderr and swallowed so audit can never take the
/// task down.
#[derive(Debug, Clone)]
pub struct AuditLog {
    session_id: String,
    path: PathBuf,
}

impl AuditLog {
    pub fn new(state_dir: &Path, session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            path: state_dir.join("audit").join(format!("{session_id}.jsonl")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn log(&self, event_type: &str, data: Value) {
        if let Err(e) = self.append(event_type, data) {
            eprintln!("WARN: failed to append audit event: {e}");
        }
    }

    fn append(&self, event_type: &str, data: Value) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let event = json!({
            "ts": now_rfc3339(),
            "sessionId": self.session_id,
            "type": event_type,
            "data": data,
        });
        writeln!(file, "{}", serde_json::to_string(&event)?)?;
        Ok(())
    }
}
