use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

pub const MAX_FRAMES: usize = 20;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub path: String,
    pub line: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    pub language: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    pub summary: String,
    pub frames: Vec<StackFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_line: Option<String>,
}

fn node_frame_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:at\s+(?P<func>[\w$.<>\[\] ]+?)\s+\()?(?P<path>[^\s():]+\.(?:ts|tsx|js|jsx|mjs|cjs)):(?P<line>\d+):(?P<col>\d+)\)?",
        )
        .expect("static regex")
    })
}

fn python_frame_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*File "(?P<path>[^"]+)", line (?P<line>\d+)(?:, in (?P<func>\S+))?"#)
            .expect("static regex")
    })
}

/// Extract failure frames from combined runner output (stderr then stdout).
/// Always produces a summary, even when no frame matched.
pub fn parse_failure(output: &str) -> FailureReport {
    let mut frames = Vec::new();
    let mut exception_line = None;

    for line in output.lines() {
        if exception_line.is_none()
            && (line.starts_with("Error:")
                || line.starts_with("Traceback")
                || line.contains("Exception"))
        {
            exception_line = Some(line.trim().to_string());
        }
        if frames.len() >= MAX_FRAMES {
            continue;
        }
        if let Some(caps) = python_frame_re().captures(line) {
            frames.push(StackFrame {
                path: caps["path"].to_string(),
                line: caps["line"].parse().unwrap_or(0),
                column: None,
                function: caps.name("func").map(|m| m.as_str().to_string()),
                language: "python".to_string(),
            });
            continue;
        }
        if let Some(caps) = node_frame_re().captures(line) {
            let path = caps["path"].to_string();
            frames.push(StackFrame {
                language: language_for(&path),
                path,
                line: caps["line"].parse().unwrap_or(0),
                column: caps["col"].parse().ok(),
                function: caps.name("func").map(|m| m.as_str().to_string()),
            });
        }
    }

    let summary = exception_line.clone().unwrap_or_else(|| {
        frames
            .first()
            .map(|f| format!("failure at {}:{}", f.path, f.line))
            .unwrap_or_else(|| {
                output
                    .lines()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or("no failure details captured")
                    .trim()
                    .to_string()
            })
    });

    FailureReport {
        summary,
        frames,
        exception_line,
    }
}

fn language_for(path: &str) -> String {
    match path.rsplit('.').next().unwrap_or("") {
        "ts" | "tsx" => "typescript".to_string(),
        "py" => "python".to_string(),
        _ => "javascript".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_failure, MAX_FRAMES};

    #[test]
    fn parses_node_stack() {
        let output = r#"Error: boom
    at doWork (src/worker.ts:12:5)
    at src/index.js:3:1
"#;
        let report = parse_failure(output);
        assert_eq!(report.summary, "Error: boom");
        assert_eq!(report.frames.len(), 2);
        assert_eq!(report.frames[0].path, "src/worker.ts");
        assert_eq!(report.frames[0].line, 12);
        assert_eq!(report.frames[0].column, Some(5));
        assert_eq!(report.frames[0].function.as_deref(), Some("doWork"));
        assert_eq!(report.frames[0].language, "typescript");
        assert_eq!(report.frames[1].language, "javascript");
    }

    #[test]
    fn parses_python_traceback() {
        let output = r#"Traceback (most recent call last):
  File "app/main.py", line 44, in run
    raise ValueError("nope")
ValueError: nope
"#;
        let report = parse_failure(output);
        assert!(report.summary.starts_with("Traceback"));
        assert_eq!(report.frames.len(), 1);
        assert_eq!(report.frames[0].path, "app/main.py");
        assert_eq!(report.frames[0].line, 44);
        assert_eq!(report.frames[0].function.as_deref(), Some("run"));
        assert_eq!(report.frames[0].language, "python");
    }

    #[test]
    fn caps_frames_and_keeps_summary() {
        let mut output = String::from("Error: too many\n");
        for i in 0..40 {
            output.push_str(&format!("    at fn{i} (src/f{i}.ts:{}:1)\n", i + 1));
        }
        let report = parse_failure(&output);
        assert_eq!(report.frames.len(), MAX_FRAMES);
        assert_eq!(report.summary, "Error: too many");
    }

    #[test]
    fn no_frames_still_summarizes() {
        let report = parse_failure("the build simply failed\n");
        assert!(report.frames.is_empty());
        assert_eq!(report.summary, "the build simply failed");
        assert!(report.exception_line.is_none());
    }

    #[test]
    fn empty_output_has_placeholder_summary() {
        let report = parse_failure("");
        assert_eq!(report.summary, "no failure details captured");
    }
}
