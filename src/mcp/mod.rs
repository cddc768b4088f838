//! Remote tool gateway.
//!
//! The orchestration core never touches mail, calendar or contacts
//! directly. It talks to a separate tool process over the Model Context
//! Protocol (stdio transport, via `rmcp`). [`client`] holds the session
//! side used by the task router; the serving side is
//! [`crate::services::ToolServer`].

pub mod client;

pub use client::{McpSession, SessionFactory, StdioSessionFactory, ToolGateway, ToolSession};

// Tool names exposed by the tool process.
pub const TOOL_FETCH_LATEST_EMAIL: &str = "fetch_latest_email";
pub const TOOL_RESOLVE_CONTACT: &str = "resolve_contact_by_name";
pub const TOOL_SEND_EMAIL: &str = "send_email";
pub const TOOL_SCHEDULE_MEETING: &str = "schedule_meeting";

/// Failures of the tool channel itself.
///
/// Sentinel answers such as "not found" are *not* errors; they arrive as
/// ordinary text results.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The tool process could not be started.
    #[error("failed to start tool process: {0}")]
    Spawn(#[source] std::io::Error),
    /// The MCP `initialize` exchange failed, usually because the tool
    /// process exited before answering.
    #[error("tool session handshake failed: {0}")]
    Handshake(String),
    /// The request never produced a tool result: transport closed, unknown
    /// tool or invalid arguments.
    #[error("call to '{tool}' failed: {message}")]
    Call { tool: String, message: String },
    /// The tool ran but reported failure (`isError: true`).
    #[error("tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },
    /// The session could not be shut down cleanly.
    #[error("tool channel closed: {0}")]
    Closed(String),
}
