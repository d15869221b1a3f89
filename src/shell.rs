use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

#[derive(Debug, Clone, Serialize)]
pub struct ShellOutcome {
    pub command: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Run `command` through the OS shell with the workspace as cwd.
///
/// Stdout and stderr are drained concurrently and independently capped at
/// `max_output_chars`; a capped stream keeps draining so the child never
/// blocks on a full pipe, and the process is not killed for output volume.
/// On timeout the child is killed and `timed_out` is set.
pub async fn run_shell(
    workdir: &Path,
    command: &str,
    timeout: Duration,
    max_output_chars: usize,
) -> Result<ShellOutcome> {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd.exe");
        c.arg("/d").arg("/s").arg("/c").arg(command);
        c
    } else {
        let mut c = Command::new("/bin/sh");
        c.arg("-lc").arg(command);
        c
    };
    cmd.current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn shell for '{command}'"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_task = tokio::spawn(read_capped(stdout, max_output_chars));
    let stderr_task = tokio::spawn(read_capped(stderr, max_output_chars));

    let mut timed_out = false;
    let exit_code = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status.context("failed waiting for shell child")?.code(),
        Err(_) => {
            timed_out = true;
            child.kill().await.ok();
            child.wait().await.ok();
            None
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(ShellOutcome {
        command: command.to_string(),
        exit_code,
        timed_out,
        duration_ms: started.elapsed().as_millis() as u64,
        stdout,
        stderr,
    })
}

async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, max_chars: usize) -> String {
    let mut kept: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let remaining = max_chars.saturating_sub(kept.len());
                if remaining > 0 {
                    kept.extend_from_slice(&chunk[..n.min(remaining)]);
                }
                // Past the cap the stream is still drained so the child is
                // never back-pressured into a stall.
            }
        }
    }
    let text = String::from_utf8_lossy(&kept).into_owned();
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect()
    } else {
        text
    }
}
