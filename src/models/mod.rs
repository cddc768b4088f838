//! Model provider abstractions.
//!
//! Defines the [`ModelProvider`] trait, the [`ChatMessage`] type and the
//! concrete backends ([`OllamaProvider`], [`OpenAICompatProvider`]).
//! The intent engines only ever see `dyn ModelProvider`, so backends are
//! chosen once at construction time via [`build_provider`].

pub mod ollama;
pub mod openai_compat;

use std::any::Any;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ModelConfig;

// ---------------------------------------------------------------------------
// ChatMessage – shared message representation
// ---------------------------------------------------------------------------

/// A single chat message with a role and content.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    /// Shorthand for a `user` message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// Serialise a slice of [`ChatMessage`]s into the `{role, content}` JSON
/// array both backends accept.
pub fn serialize_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
        .collect()
}

// ---------------------------------------------------------------------------
// ModelProvider trait
// ---------------------------------------------------------------------------

/// Trait implemented by every LLM backend.
///
/// Each provider turns a list of chat messages into a single assistant
/// reply string. One request, one reply: no streaming, no retries.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Send a sequence of chat messages and return the assistant's reply.
    async fn send_chat(&self, messages: &[ChatMessage]) -> Result<String, anyhow::Error>;

    /// Like [`send_chat`](Self::send_chat), but asks the backend to
    /// constrain its output to JSON.
    ///
    /// The default implementation ignores the constraint and calls
    /// `send_chat`; the reply still goes through the sanitizer either way.
    async fn send_chat_structured(
        &self,
        messages: &[ChatMessage],
    ) -> Result<String, anyhow::Error> {
        self.send_chat(messages).await
    }

    /// Downcast helper for tests and diagnostics.
    fn as_any(&self) -> &dyn Any;
}

pub use ollama::OllamaProvider;
pub use openai_compat::OpenAICompatProvider;

/// Provider ids served by [`OpenAICompatProvider`].
const COMPAT_ALIASES: &[&str] = &[
    "openai-compat",
    "openai_compat",
    "compat",
    "openrouter",
    "groq",
    "together",
    "fireworks",
    "mistral",
    "lmstudio",
    "vllm",
    "deepseek",
    "xai",
];

// ---------------------------------------------------------------------------
// Provider factory
// ---------------------------------------------------------------------------

/// Build a concrete provider from the model section of the config.
///
/// * `"ollama"` → [`OllamaProvider`] (default endpoint `http://localhost:11434`).
/// * `"openai"` → [`OpenAICompatProvider`] against the OpenAI endpoint,
///   key from config or `OPENAI_API_KEY`.
/// * any compat alias → [`OpenAICompatProvider`]; requires `endpoint`.
pub fn build_provider(cfg: &ModelConfig) -> anyhow::Result<Box<dyn ModelProvider>> {
    let timeout = Duration::from_secs(cfg.timeout_secs);
    let provider_id = cfg.provider.as_str();

    if provider_id == "ollama" {
        let endpoint = cfg
            .endpoint
            .clone()
            .unwrap_or_else(|| ollama::DEFAULT_ENDPOINT.to_string());
        let key = resolve_config_key(cfg.api_key.as_deref(), provider_id);
        Ok(Box::new(OllamaProvider::new(
            endpoint,
            key,
            cfg.model.clone(),
            timeout,
        )?))
    } else if provider_id == "openai" {
        let endpoint = cfg
            .endpoint
            .clone()
            .unwrap_or_else(|| openai_compat::OPENAI_ENDPOINT.to_string());
        let key = resolve_config_key(cfg.api_key.as_deref(), provider_id);
        if key.is_empty() {
            anyhow::bail!("provider \"openai\" requires api_key or OPENAI_API_KEY");
        }
        Ok(Box::new(OpenAICompatProvider::new(
            endpoint,
            key,
            cfg.model.clone(),
            timeout,
        )?))
    } else if COMPAT_ALIASES.contains(&provider_id) {
        let endpoint = cfg.endpoint.clone().unwrap_or_default();
        if endpoint.is_empty() {
            anyhow::bail!("provider \"{provider_id}\" requires an endpoint");
        }
        let key = resolve_config_key(cfg.api_key.as_deref(), provider_id);
        Ok(Box::new(OpenAICompatProvider::new(
            endpoint,
            key,
            cfg.model.clone(),
            timeout,
        )?))
    } else {
        anyhow::bail!("unknown model provider \"{provider_id}\"")
    }
}

/// Resolve an API key: config value → env var → empty string.
///
/// If the config value starts with `$`, it's treated as an env-var reference.
fn resolve_config_key(config_key: Option<&str>, provider_id: &str) -> String {
    if let Some(k) = config_key {
        if let Some(var) = k.strip_prefix('$') {
            return std::env::var(var).unwrap_or_default();
        }
        if !k.is_empty() {
            return k.to_string();
        }
    }
    // Fallback: try PROVIDER_API_KEY env var.
    let env_name = format!("{}_API_KEY", provider_id.to_uppercase().replace('-', "_"));
    std::env::var(env_name).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_cfg(provider: &str, endpoint: Option<&str>) -> ModelConfig {
        ModelConfig {
            provider: provider.to_string(),
            model: "llama3".to_string(),
            endpoint: endpoint.map(String::from),
            api_key: None,
            timeout_secs: 5,
        }
    }

    #[test]
    fn resolve_config_key_plain_value() {
        assert_eq!(resolve_config_key(Some("my-secret"), "test"), "my-secret");
    }

    #[test]
    fn resolve_config_key_env_var_syntax() {
        std::env::set_var("SPECTER_TEST_RESOLVE_KEY_1", "from_env");
        assert_eq!(
            resolve_config_key(Some("$SPECTER_TEST_RESOLVE_KEY_1"), "test"),
            "from_env"
        );
        std::env::remove_var("SPECTER_TEST_RESOLVE_KEY_1");
    }

    #[test]
    fn resolve_config_key_missing_returns_empty() {
        assert_eq!(resolve_config_key(None, "nonexistent_provider_xyz"), "");
    }

    #[test]
    fn ollama_is_the_default_backend() {
        let p = build_provider(&ModelConfig::default()).unwrap();
        assert!(p.as_any().downcast_ref::<OllamaProvider>().is_some());
    }

    #[test]
    fn compat_provider_requires_endpoint() {
        assert!(build_provider(&model_cfg("openai-compat", None)).is_err());
    }

    #[test]
    fn compat_aliases_all_resolve() {
        for alias in COMPAT_ALIASES {
            let p = build_provider(&model_cfg(
                alias,
                Some("http://localhost:8080/v1/chat/completions"),
            ))
            .unwrap();
            assert!(
                p.as_any().downcast_ref::<OpenAICompatProvider>().is_some(),
                "alias '{alias}' should create OpenAICompatProvider",
            );
        }
    }

    #[test]
    fn unknown_provider_rejected() {
        let err = build_provider(&model_cfg("carrier-pigeon", None))
            .err()
            .unwrap();
        assert!(err.to_string().contains("carrier-pigeon"));
    }
}
