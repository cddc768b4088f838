//! Domain services behind the tool process: mailbox, calendar and the
//! contact table, exposed as tools through [`ToolServer`].

pub mod calendar;
pub mod contacts;
pub mod mailbox;
pub mod similarity;

use std::sync::Arc;

use chrono_tz::Tz;
use rmcp::model::{
    CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::schemars::JsonSchema;
use rmcp::{tool, Error as McpError, ServerHandler, ServiceExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::mcp::{
    TOOL_FETCH_LATEST_EMAIL, TOOL_RESOLVE_CONTACT, TOOL_SCHEDULE_MEETING, TOOL_SEND_EMAIL,
};

use calendar::Calendar;
use contacts::{ContactResolver, FileContactStore};
use mailbox::Mailbox;

/// The four tools served by `specter serve`.
#[derive(Clone)]
pub struct ToolServer {
    contacts: Arc<ContactResolver>,
    mailbox: Arc<Mailbox>,
    calendar: Arc<Calendar>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ResolveContactParams {
    #[schemars(description = "Full or partial contact name")]
    pub name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SendEmailParams {
    #[schemars(description = "Recipient email address")]
    pub to: String,
    pub subject: String,
    #[schemars(description = "Plain-text body")]
    pub content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ScheduleMeetingParams {
    #[schemars(description = "Event title")]
    pub summary: String,
    #[schemars(description = "Local start time, e.g. 2026-01-05T10:00:00")]
    pub iso_datetime: String,
}

impl ToolServer {
    pub fn new(contacts: ContactResolver, mailbox: Mailbox, calendar: Calendar) -> Self {
        Self {
            contacts: Arc::new(contacts),
            mailbox: Arc::new(mailbox),
            calendar: Arc::new(calendar),
        }
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let tz: Tz = cfg
            .store
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid timezone '{}': {e}", cfg.store.timezone))?;
        let store = FileContactStore::new(cfg.store.contacts_path());
        Ok(Self::new(
            ContactResolver::new(Arc::new(store)),
            Mailbox::new(cfg.store.inbox_path(), cfg.store.outbox_path()),
            Calendar::new(cfg.store.calendar_path(), tz),
        ))
    }

    /// Resolve the contact table up front so the first lookup is fast.
    /// Failure is logged, not fatal.
    pub async fn warm_up(&self) {
        match self.contacts.sheet().await {
            Ok(sheet) => info!(sheet = %sheet.0, "contact table ready"),
            Err(e) => warn!(error = %e, "contact table not available yet"),
        }
    }

    /// Serve MCP on stdin/stdout until the client disconnects.
    pub async fn serve_stdio(self) -> anyhow::Result<()> {
        info!("tool server listening on stdio");
        let service = self.serve(rmcp::transport::io::stdio()).await?;
        service.waiting().await?;
        debug!("tool server stopped");
        Ok(())
    }
}

/// Domain errors are tool results with `isError`, not protocol errors.
fn outcome(tool: &str, result: anyhow::Result<String>) -> CallToolResult {
    match result {
        Ok(text) => CallToolResult::success(vec![Content::text(text)]),
        Err(e) => {
            warn!(tool, error = %e, "tool failed");
            CallToolResult::error(vec![Content::text(format!("{e:#}"))])
        }
    }
}

#[tool(tool_box)]
impl ToolServer {
    #[tool(description = "Return the newest inbox message.")]
    async fn fetch_latest_email(&self) -> Result<CallToolResult, McpError> {
        Ok(outcome(TOOL_FETCH_LATEST_EMAIL, self.mailbox.latest().await))
    }

    #[tool(description = "Find a contact's email address by (partial) name.")]
    async fn resolve_contact_by_name(
        &self,
        #[tool(aggr)] params: ResolveContactParams,
    ) -> Result<CallToolResult, McpError> {
        let found = self.contacts.find(&params.name).await.to_string();
        Ok(outcome(TOOL_RESOLVE_CONTACT, Ok(found)))
    }

    #[tool(description = "Send a plain-text email.")]
    async fn send_email(
        &self,
        #[tool(aggr)] params: SendEmailParams,
    ) -> Result<CallToolResult, McpError> {
        let sent = self
            .mailbox
            .send(&params.to, &params.subject, &params.content)
            .await;
        Ok(outcome(TOOL_SEND_EMAIL, sent))
    }

    #[tool(description = "Add a one-hour meeting at an ISO-8601 local time.")]
    async fn schedule_meeting(
        &self,
        #[tool(aggr)] params: ScheduleMeetingParams,
    ) -> Result<CallToolResult, McpError> {
        let added = self
            .calendar
            .schedule(&params.summary, &params.iso_datetime)
            .await;
        Ok(outcome(TOOL_SCHEDULE_MEETING, added))
    }
}

#[tool(tool_box)]
impl ServerHandler for ToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
            instructions: Some(
                "Mailbox, calendar and contact tools. Dates are local to the configured timezone."
                    .into(),
            ),
        }
    }
}
