//! Native Ollama provider (`/api/chat`).
//!
//! Uses Ollama's own chat endpoint rather than its OpenAI shim so that
//! structured calls can pass `"format": "json"`, which constrains the
//! local model's decoder to valid JSON.

use std::any::Any;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{ChatMessage, ModelProvider};

/// Default base URL of a local Ollama daemon.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Provider for a (usually local) Ollama server.
pub struct OllamaProvider {
    endpoint: String,
    api_key: String,
    model: String,
    client: Client,
}

impl OllamaProvider {
    /// `endpoint` is the server base URL; `/api/chat` is appended.
    pub fn new(
        endpoint: String,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            // Tasks run on short-lived runtimes; pooled connections
            // would outlive the runtime that drives them.
            .pool_max_idle_per_host(0)
            .build()
            .context("failed to build Ollama HTTP client")?;
        Ok(Self {
            endpoint,
            api_key,
            model,
            client,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.endpoint.trim_end_matches('/'))
    }

    async fn chat(&self, messages: &[ChatMessage], json_mode: bool) -> Result<String, anyhow::Error> {
        let mut body = json!({
            "model": self.model,
            "messages": super::serialize_messages(messages),
            "stream": false,
        });
        if json_mode {
            body["format"] = json!("json");
        }

        let mut req = self.client.post(self.chat_url()).json(&body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API returned {status}: {text}");
        }

        let json: serde_json::Value = resp.json().await?;
        if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
            anyhow::bail!("Ollama API error: {err}");
        }
        Ok(json["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string())
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    async fn send_chat(&self, messages: &[ChatMessage]) -> Result<String, anyhow::Error> {
        self.chat(messages, false).await
    }

    async fn send_chat_structured(
        &self,
        messages: &[ChatMessage],
    ) -> Result<String, anyhow::Error> {
        self.chat(messages, true).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_url_tolerates_trailing_slash() {
        let p = OllamaProvider::new(
            "http://localhost:11434/".into(),
            String::new(),
            "llama3".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(p.chat_url(), "http://localhost:11434/api/chat");
    }

    #[tokio::test]
    async fn send_chat_fails_without_server() {
        let p = OllamaProvider::new(
            "http://127.0.0.1:1".into(),
            String::new(),
            "llama3".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        let result = p.send_chat_structured(&[ChatMessage::user("hi")]).await;
        assert!(result.is_err());
    }
}
