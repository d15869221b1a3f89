use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

/// The user-facing collaborator: narration lines, yes/no confirmations and
/// free-form questions. Prompts may suspend indefinitely.
#[async_trait]
pub trait AgentUi: Send + Sync {
    fn status(&self, line: &str);

    async fn confirm(&self, prompt: &str) -> Result<bool>;

    async fn ask(&self, question: &str) -> Result<String>;
}

/// Console implementation over stdout/stdin.
pub struct ConsoleUi;

impl ConsoleUi {
    pub fn new() -> Self {
        Self
    }

    async fn read_line(&self) -> Result<String> {
        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        reader.read_line(&mut line).await?;
        Ok(line.trim().to_string())
    }
}

impl Default for ConsoleUi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentUi for ConsoleUi {
    fn status(&self, line: &str) {
        println!("{line}");
    }

    async fn confirm(&self, prompt: &str) -> Result<bool> {
        println!("{prompt} [y/N]");
        let answer = self.read_line().await?.to_lowercase();
        Ok(answer == "y" || answer == "yes")
    }

    async fn ask(&self, question: &str) -> Result<String> {
        println!("{question}");
        self.read_line().await
    }
}

/// Headless stand-in: narration goes to stdout, but anything interactive
/// fails, which ends the session for `need_user` and declines approvals.
pub struct NoUi;

#[async_trait]
impl AgentUi for NoUi {
    fn status(&self, line: &str) {
        println!("{line}");
    }

    async fn confirm(&self, _prompt: &str) -> Result<bool> {
        Err(anyhow!("no interactive UI available"))
    }

    async fn ask(&self, _question: &str) -> Result<String> {
        Err(anyhow!("no interactive UI available"))
    }
}
