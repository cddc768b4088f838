//! Client side of the tool channel.
//!
//! A [`SessionFactory`] opens one [`ToolSession`] per task; the task router
//! wraps it in a [`ToolGateway`] for typed access to the four tools and
//! closes it when the task ends, on every path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use rmcp::service::RunningService;
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::{RoleClient, ServiceExt};
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{info, warn};

use super::{
    GatewayError, TOOL_FETCH_LATEST_EMAIL, TOOL_RESOLVE_CONTACT, TOOL_SCHEDULE_MEETING,
    TOOL_SEND_EMAIL,
};
use crate::config::Config;

/// How long `close()` waits for the session to wind down.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Log filter handed to a spawned tool process whose environment sets none;
/// its stderr is shared with ours.
const CHILD_LOG_FILTER: &str = "warn";

// ---------------------------------------------------------------------------
// Session traits
// ---------------------------------------------------------------------------

/// An open channel to the tool process.
#[async_trait]
pub trait ToolSession: Send {
    /// Invoke a tool and return its text output.
    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<String, GatewayError>;

    /// Release the channel. Called exactly once per session.
    async fn close(&mut self) -> Result<(), GatewayError>;
}

/// Opens a fresh session for each task.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn ToolSession>, GatewayError>;
}

// ---------------------------------------------------------------------------
// McpSession – an initialised rmcp client over any transport
// ---------------------------------------------------------------------------

/// A running MCP client session.
///
/// Built from an already-initialised `rmcp` service, so the same type backs
/// both the child-process transport and in-memory pipes.
pub struct McpSession {
    service: Option<RunningService<RoleClient, ()>>,
}

impl McpSession {
    pub fn new(service: RunningService<RoleClient, ()>) -> Self {
        Self {
            service: Some(service),
        }
    }

    fn service(&self) -> Result<&RunningService<RoleClient, ()>, GatewayError> {
        self.service
            .as_ref()
            .ok_or_else(|| GatewayError::Closed("session already closed".into()))
    }

    /// Names of the tools the server exposes.
    pub async fn tool_names(&self) -> Result<Vec<String>, GatewayError> {
        let listed = self
            .service()?
            .list_tools(Default::default())
            .await
            .map_err(|e| GatewayError::Call {
                tool: "tools/list".into(),
                message: e.to_string(),
            })?;
        Ok(listed.tools.into_iter().map(|t| t.name.to_string()).collect())
    }

    /// Invoke `name` and return its concatenated text output.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<String, GatewayError> {
        let result = self
            .service()?
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: arguments.as_object().cloned(),
            })
            .await
            .map_err(|e| GatewayError::Call {
                tool: name.to_string(),
                message: e.to_string(),
            })?;

        let text = result
            .content
            .iter()
            .filter_map(|c| c.as_text().map(|t| t.text.as_str()))
            .collect::<Vec<_>>()
            .join("\n");
        if result.is_error == Some(true) {
            return Err(GatewayError::ToolFailed {
                tool: name.to_string(),
                message: text,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl ToolSession for McpSession {
    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<String, GatewayError> {
        self.invoke(name, arguments).await
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        let Some(service) = self.service.take() else {
            return Ok(());
        };
        // Cancelling drops the transport; a child process is killed with it.
        match tokio::time::timeout(EXIT_GRACE, service.cancel()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(GatewayError::Closed(format!("session task failed: {e}"))),
            Err(_) => {
                warn!("tool session did not shut down in time");
                Err(GatewayError::Closed("tool session shutdown timed out".into()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stdio transport – one child process per session
// ---------------------------------------------------------------------------

/// Spawns `specter serve` (or a configured command) per session.
#[derive(Debug, Clone)]
pub struct StdioSessionFactory {
    program: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl StdioSessionFactory {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, env: HashMap<String, String>) -> Self {
        Self {
            program: program.into(),
            args,
            env,
        }
    }

    /// Build from config. Without an explicit command the current
    /// executable is re-run with `serve`, and `config_path` is handed to
    /// it through `SPECTER_CONFIG`.
    pub fn from_config(cfg: &Config, config_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut env = cfg.tool_server.env.clone();
        if let Some(p) = config_path {
            env.entry("SPECTER_CONFIG".to_string())
                .or_insert_with(|| p.to_string_lossy().to_string());
        }
        match &cfg.tool_server.command {
            Some(cmd) => Ok(Self::new(cmd, cfg.tool_server.args.clone(), env)),
            None => {
                let exe = std::env::current_exe()?;
                let mut args = vec!["serve".to_string()];
                args.extend(cfg.tool_server.args.iter().cloned());
                Ok(Self::new(exe, args, env))
            }
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).envs(&self.env).kill_on_drop(true);
        if !self.env.contains_key("RUST_LOG") && std::env::var_os("RUST_LOG").is_none() {
            cmd.env("RUST_LOG", CHILD_LOG_FILTER);
        }
        cmd
    }
}

#[async_trait]
impl SessionFactory for StdioSessionFactory {
    async fn open(&self) -> Result<Box<dyn ToolSession>, GatewayError> {
        let mut cmd = self.command();
        let transport = TokioChildProcess::new(&mut cmd).map_err(GatewayError::Spawn)?;
        let service = ()
            .serve(transport)
            .await
            .map_err(|e| GatewayError::Handshake(e.to_string()))?;
        info!(program = %self.program.display(), "tool session opened");
        Ok(Box::new(McpSession::new(service)))
    }
}

// ---------------------------------------------------------------------------
// ToolGateway – typed access to the four tools
// ---------------------------------------------------------------------------

/// Typed wrapper around one open session.
pub struct ToolGateway {
    session: Box<dyn ToolSession>,
}

impl ToolGateway {
    pub async fn open(factory: &dyn SessionFactory) -> Result<Self, GatewayError> {
        Ok(Self {
            session: factory.open().await?,
        })
    }

    pub fn from_session(session: Box<dyn ToolSession>) -> Self {
        Self { session }
    }

    /// Raw text of the newest inbox message, or the "inbox empty" sentinel.
    pub async fn fetch_latest_email(&mut self) -> Result<String, GatewayError> {
        self.session.call_tool(TOOL_FETCH_LATEST_EMAIL, json!({})).await
    }

    /// Email address for `name`, or a sentinel such as "not found".
    pub async fn resolve_contact_by_name(&mut self, name: &str) -> Result<String, GatewayError> {
        self.session
            .call_tool(TOOL_RESOLVE_CONTACT, json!({ "name": name }))
            .await
    }

    pub async fn send_email(
        &mut self,
        to: &str,
        subject: &str,
        content: &str,
    ) -> Result<String, GatewayError> {
        self.session
            .call_tool(
                TOOL_SEND_EMAIL,
                json!({ "to": to, "subject": subject, "content": content }),
            )
            .await
    }

    pub async fn schedule_meeting(
        &mut self,
        summary: &str,
        iso_datetime: &str,
    ) -> Result<String, GatewayError> {
        self.session
            .call_tool(
                TOOL_SCHEDULE_MEETING,
                json!({ "summary": summary, "iso_datetime": iso_datetime }),
            )
            .await
    }

    pub async fn close(mut self) -> Result<(), GatewayError> {
        self.session.close().await
    }
}
