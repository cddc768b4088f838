//! File-backed mailbox: newest message from `inbox.jsonl`, outgoing mail
//! appended to `outbox.jsonl`.

use std::path::PathBuf;

use anyhow::Context;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::info;

pub const INBOX_EMPTY: &str = "inbox empty";
pub const SENT: &str = "Mail sent!";

/// One line of `inbox.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

impl InboxMessage {
    /// Render in the `From / SenderEmail / Subject / Content` layout the
    /// router parses.
    pub fn render(&self) -> String {
        let from = self
            .from
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("(unknown)");
        let subject = self
            .subject
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("(none)");
        format!(
            "From: {from}\nSenderEmail: {}\nSubject: {subject}\nContent: {}",
            bare_address(from),
            self.snippet
        )
    }
}

/// One line of `outbox.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: String,
    pub to: String,
    pub subject: String,
    /// base64url of the RFC 822 message.
    pub raw: String,
    pub sent_at: DateTime<Utc>,
}

/// `"Name <addr>"` → `addr`; anything else is returned trimmed.
pub fn bare_address(s: &str) -> &str {
    match s.split_once('<') {
        Some((_, rest)) => rest.split('>').next().unwrap_or(rest).trim(),
        None => s.trim(),
    }
}

pub struct Mailbox {
    inbox: PathBuf,
    outbox: PathBuf,
}

impl Mailbox {
    pub fn new(inbox: impl Into<PathBuf>, outbox: impl Into<PathBuf>) -> Self {
        Self {
            inbox: inbox.into(),
            outbox: outbox.into(),
        }
    }

    /// Newest inbox message, rendered, or [`INBOX_EMPTY`].
    pub async fn latest(&self) -> anyhow::Result<String> {
        let content = match tokio::fs::read_to_string(&self.inbox).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(INBOX_EMPTY.to_string())
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", self.inbox.display())),
        };
        let Some(line) = content.lines().rev().find(|l| !l.trim().is_empty()) else {
            return Ok(INBOX_EMPTY.to_string());
        };
        let msg: InboxMessage = serde_json::from_str(line)
            .with_context(|| format!("parsing last record of {}", self.inbox.display()))?;
        Ok(msg.render())
    }

    /// Queue a plain-text message in the outbox.
    pub async fn send(&self, to: &str, subject: &str, content: &str) -> anyhow::Result<String> {
        let to = bare_address(to);
        if !to.contains('@') {
            anyhow::bail!("invalid recipient: '{to}'");
        }
        let rfc822 = format!(
            "Content-Type: text/plain; charset=\"utf-8\"\r\n\
             MIME-Version: 1.0\r\n\
             Content-Transfer-Encoding: 8bit\r\n\
             to: {to}\r\n\
             subject: {subject}\r\n\
             \r\n\
             {content}"
        );
        let record = SentMessage {
            id: uuid::Uuid::new_v4().to_string(),
            to: to.to_string(),
            subject: subject.to_string(),
            raw: base64::engine::general_purpose::URL_SAFE.encode(rfc822.as_bytes()),
            sent_at: Utc::now(),
        };
        append_jsonl(&self.outbox, &record).await?;
        info!(id = %record.id, to, "mail queued");
        Ok(SENT.to_string())
    }
}

/// Append one JSON line, creating the file and its directory if needed.
pub(crate) async fn append_jsonl<T: Serialize>(
    path: &std::path::Path,
    record: &T,
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
