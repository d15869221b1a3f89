use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::protocol::ChatMessage;
use crate::providers::ChatClient;

/// Chat client for OpenAI-compatible `/chat/completions` endpoints. A JSON
/// response format is requested when building the payload; providers that
/// reject the hint get one retry without it.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: CompletionMessage,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    async fn request(
        &self,
        messages: &[ChatMessage],
        timeout: Duration,
        with_response_format: bool,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = CompletionRequest {
            model: &self.model,
            messages,
            temperature: 0.2,
            response_format: with_response_format.then(|| json!({"type": "json_object"})),
        };
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
            .context("failed to call chat completions endpoint")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("chat endpoint returned {status}: {body}"));
        }
        let parsed: CompletionResponse = response
            .json()
            .await
            .context("failed to parse chat completions response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(anyhow!("chat endpoint returned empty content"));
        }
        Ok(content)
    }
}

#[async_trait]
impl ChatClient for OpenAiCompatClient {
    async fn complete(&self, messages: &[ChatMessage], timeout: Duration) -> Result<String> {
        match self.request(messages, timeout, true).await {
            Ok(content) => Ok(content),
            Err(e) if e.to_string().contains("response_format") => {
                self.request(messages, timeout, false).await
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::OpenAiCompatClient;

    #[test]
    fn trailing_slash_is_trimmed_from_base_url() {
        let client = OpenAiCompatClient::new(
            "https://api.groq.com/openai/v1/".to_string(),
            "key".to_string(),
            "model".to_string(),
        );
        assert_eq!(client.base_url, "https://api.groq.com/openai/v1");
    }
}
