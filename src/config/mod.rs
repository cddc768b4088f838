use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from `config.yaml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Language-model backend used by the intent engines.
    #[serde(default)]
    pub model: ModelConfig,
    /// Locale tag for weekday names in the grounding block (`en`, `tr`).
    #[serde(default = "default_locale")]
    pub locale: String,
    /// How to launch the tool process.
    #[serde(default)]
    pub tool_server: ToolServerConfig,
    /// File-backed stores used by the tool process.
    #[serde(default)]
    pub store: StoreConfig,
    /// Optional deadline for one task, in seconds. `None` waits indefinitely.
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
}

fn default_locale() -> String {
    "tr".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            locale: default_locale(),
            tool_server: ToolServerConfig::default(),
            store: StoreConfig::default(),
            task_timeout_secs: None,
        }
    }
}

/// A configured LLM backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Provider kind: "ollama", "openai-compat" (and its aliases) or "openai".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name to request (e.g. "llama3").
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL (ollama) or full chat-completions URL (openai-compat).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// API key (plain text or env-var reference like `$OPENAI_API_KEY`).
    #[serde(default)]
    pub api_key: Option<String>,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_model() -> String {
    "llama3".to_string()
}

fn default_model_timeout() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            endpoint: None,
            api_key: None,
            timeout_secs: default_model_timeout(),
        }
    }
}

/// Launch parameters for the tool process.
///
/// With no `command` the gateway re-executes the current binary with
/// `serve`, handing over the config path through `SPECTER_CONFIG`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ToolServerConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Locations of the file-backed mailbox, calendar and contact table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Data directory. Relative paths resolve against `specter_home()`.
    #[serde(default = "default_store_root")]
    pub root: String,
    #[serde(default = "default_contacts_table")]
    pub contacts_table: String,
    #[serde(default = "default_inbox")]
    pub inbox: String,
    #[serde(default = "default_outbox")]
    pub outbox: String,
    #[serde(default = "default_calendar")]
    pub calendar: String,
    /// IANA timezone attached to calendar events.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_store_root() -> String {
    "data".to_string()
}

fn default_contacts_table() -> String {
    "Specter_Contact_List.json".to_string()
}

fn default_inbox() -> String {
    "inbox.jsonl".to_string()
}

fn default_outbox() -> String {
    "outbox.jsonl".to_string()
}

fn default_calendar() -> String {
    "calendar.jsonl".to_string()
}

fn default_timezone() -> String {
    "Europe/Istanbul".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
            contacts_table: default_contacts_table(),
            inbox: default_inbox(),
            outbox: default_outbox(),
            calendar: default_calendar(),
            timezone: default_timezone(),
        }
    }
}

impl StoreConfig {
    /// Absolute data directory.
    pub fn root_dir(&self) -> PathBuf {
        crate::utils::resolve_against(&crate::specter_home(), &self.root)
    }

    pub fn contacts_path(&self) -> PathBuf {
        crate::utils::resolve_against(&self.root_dir(), &self.contacts_table)
    }

    pub fn inbox_path(&self) -> PathBuf {
        crate::utils::resolve_against(&self.root_dir(), &self.inbox)
    }

    pub fn outbox_path(&self) -> PathBuf {
        crate::utils::resolve_against(&self.root_dir(), &self.outbox)
    }

    pub fn calendar_path(&self) -> PathBuf {
        crate::utils::resolve_against(&self.root_dir(), &self.calendar)
    }
}

impl Config {
    /// Read and parse a YAML configuration file.
    pub async fn load(path: &Path) -> anyhow::Result<Config> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // config.yaml -> config.yaml.bak
                let mut bak_name = path.as_os_str().to_os_string();
                bak_name.push(".bak");
                let bak_path = PathBuf::from(bak_name);
                match tokio::fs::read_to_string(&bak_path).await {
                    Ok(c) => {
                        tracing::warn!(
                            path = %path.display(),
                            bak = %bak_path.display(),
                            "config file not found, falling back to .bak"
                        );
                        c
                    }
                    Err(_) => {
                        return Err(e).with_context(|| {
                            format!("failed to read config file: {}", path.display())
                        });
                    }
                }
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read config file: {}", path.display()));
            }
        };

        let config = Config::from_yaml(&contents)?;

        tracing::debug!(
            provider = %config.model.provider,
            model = %config.model.model,
            "configuration loaded"
        );

        Ok(config)
    }

    /// Like [`Config::load`], but returns the defaults when neither the
    /// file nor its `.bak` exists.
    pub async fn load_or_default(path: &Path) -> anyhow::Result<Config> {
        let mut bak_name = path.as_os_str().to_os_string();
        bak_name.push(".bak");
        let exists = tokio::fs::try_exists(path).await.unwrap_or(false)
            || tokio::fs::try_exists(PathBuf::from(bak_name))
                .await
                .unwrap_or(false);
        if !exists {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
        Config::load(path).await
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(contents: &str) -> anyhow::Result<Config> {
        let config: Config =
            serde_yaml_ng::from_str(contents).context("failed to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate semantic constraints that serde cannot enforce.
    fn validate(&self) -> anyhow::Result<()> {
        if self.model.model.trim().is_empty() {
            anyhow::bail!("config: model.model must not be empty");
        }
        if self.model.timeout_secs == 0 {
            anyhow::bail!("config: model.timeout_secs must be greater than zero");
        }
        if self.task_timeout_secs == Some(0) {
            anyhow::bail!("config: task_timeout_secs=0 would fail every task");
        }
        if self.store.timezone.parse::<chrono_tz::Tz>().is_err() {
            anyhow::bail!("config: unknown timezone '{}'", self.store.timezone);
        }
        if let Some(cmd) = &self.tool_server.command {
            if cmd.trim().is_empty() {
                anyhow::bail!("config: tool_server.command must not be empty when set");
            }
        }
        Ok(())
    }

    /// Serialize and write the configuration back to a YAML file.
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_yaml_ng::to_string(self).context("serialize config YAML")?;
        tokio::fs::write(path, &contents)
            .await
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}
