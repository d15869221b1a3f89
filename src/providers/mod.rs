pub mod openai_compat;

use std::time::Duration;

use async_trait::async_trait;

use crate::protocol::ChatMessage;

/// The pluggable chat transport: one buffered text completion per call.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], timeout: Duration)
        -> anyhow::Result<String>;
}
