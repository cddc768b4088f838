//! Generic OpenAI-compatible provider.
//!
//! Works with any API that implements the OpenAI chat completions
//! interface: OpenAI itself, OpenRouter, Groq, Together, LM Studio, vLLM, etc.
//!
//! Config example:
//! ```yaml
//! model:
//!   provider: openai-compat
//!   model: llama3
//!   endpoint: http://localhost:1234/v1/chat/completions
//!   api_key: $LMSTUDIO_KEY   # optional, some local servers need none
//! ```

use std::any::Any;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{ChatMessage, ModelProvider};

/// Chat completions endpoint used for `provider: openai`.
pub const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Provider that talks to any OpenAI-compatible chat completions API.
pub struct OpenAICompatProvider {
    api_key: String,
    endpoint: String,
    model: String,
    client: Client,
}

impl OpenAICompatProvider {
    /// Create a provider with explicit configuration.
    ///
    /// `api_key` may be empty for local servers that don't require auth.
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
            .context("failed to build OpenAI-compat HTTP client")?;
        Ok(Self {
            api_key,
            endpoint,
            model,
            client,
        })
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        json_mode: bool,
    ) -> Result<String, anyhow::Error> {
        let mut body = json!({
            "model": self.model,
            "messages": super::serialize_messages(messages),
        });
        if json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let mut req = self.client.post(&self.endpoint).json(&body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI-compat API returned {status}: {text}");
        }

        let json: serde_json::Value = resp.json().await?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(content)
    }
}

#[async_trait]
impl ModelProvider for OpenAICompatProvider {
    async fn send_chat(&self, messages: &[ChatMessage]) -> Result<String, anyhow::Error> {
        self.complete(messages, false).await
    }

    async fn send_chat_structured(
        &self,
        messages: &[ChatMessage],
    ) -> Result<String, anyhow::Error> {
        self.complete(messages, true).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_with_empty_key() {
        let p = OpenAICompatProvider::new(
            "http://localhost:1234/v1/chat/completions".into(),
            String::new(),
            "llama3".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(p.model, "llama3");
        assert!(p.api_key.is_empty());
    }

    #[tokio::test]
    async fn send_chat_fails_without_server() {
        let p = OpenAICompatProvider::new(
            "http://127.0.0.1:1/v1/chat/completions".into(),
            String::new(),
            "test".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        let msgs = vec![ChatMessage::user("hi")];
        assert!(p.send_chat(&msgs).await.is_err());
        assert!(p.send_chat_structured(&msgs).await.is_err());
    }
}
