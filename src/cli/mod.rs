//! CLI subcommand handlers extracted from `main.rs`.
//!
//! Keeps `main.rs` slim: clap parsing stays there, wiring and rendering
//! live here.

pub mod shell;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::debug;

use crate::config::Config;
use crate::grounding::Locale;
use crate::intent::{self, IntentEngine, LlmIntentEngine};
use crate::mcp::{SessionFactory, StdioSessionFactory};
use crate::models;
use crate::router::{self, TaskRequest, TaskResult};
use crate::services::contacts::{ContactResolver, FileContactStore};
use crate::services::ToolServer;

// ── Wiring ───────────────────────────────────────────────────────────────────

/// Intent engine for the configured backend and locale.
pub fn build_engine(cfg: &Config) -> anyhow::Result<Arc<dyn IntentEngine>> {
    let provider = models::build_provider(&cfg.model)
        .with_context(|| format!("model provider '{}'", cfg.model.provider))?;
    let locale = Locale::from_tag(&cfg.locale);
    Ok(Arc::new(LlmIntentEngine::new(Arc::from(provider), locale)))
}

/// Session factory that spawns the tool process.
pub fn build_sessions(cfg: &Config, config_path: &Path) -> anyhow::Result<Arc<dyn SessionFactory>> {
    // Only hand the path over when it exists; otherwise the child uses
    // defaults too.
    let path = config_path.exists().then_some(config_path);
    Ok(Arc::new(StdioSessionFactory::from_config(cfg, path)?))
}

pub fn task_timeout(cfg: &Config) -> Option<Duration> {
    cfg.task_timeout_secs.map(Duration::from_secs)
}

// ── One-shot tasks ───────────────────────────────────────────────────────────

/// Run a single task in the foreground and print its result.
pub async fn run_once(cfg: &Config, config_path: &Path, request: TaskRequest) -> anyhow::Result<()> {
    let engine = build_engine(cfg)?;
    let sessions = build_sessions(cfg, config_path)?;
    debug!(task = request.kind().as_str(), "running task");
    let result = router::run_task(
        &*engine,
        &*sessions,
        request,
        task_timeout(cfg),
    )
    .await;
    println!("{}", render_result(&result));
    if let TaskResult::Error { msg } = result {
        anyhow::bail!(msg);
    }
    Ok(())
}

/// Human-readable form of a task result.
pub fn render_result(result: &TaskResult) -> String {
    let date = |d: &Option<chrono::NaiveDateTime>| {
        d.as_ref()
            .map(intent::format_iso_datetime)
            .unwrap_or_else(|| "-".to_string())
    };
    match result {
        TaskResult::Success {
            raw_mail,
            sender,
            reply,
        } => format!(
            "── Latest mail ──\n{raw_mail}\n\n\
             Sender:  {}\n\
             Summary: {}\n\
             Date:    {}\n\
             Title:   {}\n\n\
             ── Draft reply ──\n{}",
            sender.as_deref().unwrap_or("-"),
            reply.summary,
            date(&reply.detected_date),
            reply.meeting_title,
            reply.draft_reply,
        ),
        TaskResult::CommandProcessed {
            found_email,
            decision,
        } => {
            let contact = match (&decision.target_name, found_email) {
                (Some(name), Some(email)) => format!("{name} ({email})"),
                (Some(name), None) => format!("{name} (not found)"),
                (None, _) => "-".to_string(),
            };
            format!(
                "Contact: {contact}\n\
                 Date:    {}\n\
                 Title:   {}\n\n\
                 ── Draft ──\n{}",
                date(&decision.extracted_date),
                decision.meeting_title,
                decision.draft_text,
            )
        }
        TaskResult::Sent { msg } | TaskResult::CalendarAdded { msg } => msg.clone(),
        TaskResult::Error { msg } => format!("error: {msg}"),
    }
}

// ── Init ─────────────────────────────────────────────────────────────────────

/// Default configuration, with comments.
pub const CONFIG_TEMPLATE: &str = include_str!("../../templates/config.yaml");

/// `specter init`: write the config template and create the data directory.
pub async fn init(config_path: &Path) -> anyhow::Result<()> {
    if tokio::fs::try_exists(config_path).await.unwrap_or(false) {
        println!("Found existing config: {}", config_path.display());
    } else {
        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(config_path, CONFIG_TEMPLATE)
            .await
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        println!("Wrote {}", config_path.display());
    }

    let cfg = Config::load(config_path).await?;
    let root = cfg.store.root_dir();
    tokio::fs::create_dir_all(&root).await?;
    contact_resolver(&cfg).sheet().await?;
    println!("Data directory: {}", root.display());
    println!("Contacts:       {}", cfg.store.contacts_path().display());
    println!("Inbox:          {}", cfg.store.inbox_path().display());
    Ok(())
}

// ── Tool server ──────────────────────────────────────────────────────────────

/// `specter serve`: run the tool server on stdio.
pub async fn serve(cfg: &Config) -> anyhow::Result<()> {
    let server = ToolServer::from_config(cfg)?;
    server.warm_up().await;
    server.serve_stdio().await
}

// ── Contacts ─────────────────────────────────────────────────────────────────

fn contact_resolver(cfg: &Config) -> ContactResolver {
    ContactResolver::new(Arc::new(FileContactStore::new(cfg.store.contacts_path())))
}

pub async fn list_contacts(cfg: &Config) -> anyhow::Result<()> {
    let contacts = contact_resolver(cfg).list().await?;
    if contacts.is_empty() {
        println!("No contacts yet. Add one with `specter contacts add <name> <email>`.");
        return Ok(());
    }
    let width = contacts
        .iter()
        .map(|c| c.display_name.chars().count())
        .max()
        .unwrap_or(0);
    for c in contacts {
        let pad = width - c.display_name.chars().count();
        println!("{}{}  {}", c.display_name, " ".repeat(pad), c.email);
    }
    Ok(())
}

pub async fn add_contact(cfg: &Config, name: &str, email: &str) -> anyhow::Result<()> {
    contact_resolver(cfg).add_contact(name, email).await?;
    println!("added {name} <{email}>");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{parse_iso_datetime, ActionDecision};

    #[test]
    fn renders_unresolved_contact() {
        let r = TaskResult::CommandProcessed {
            found_email: None,
            decision: ActionDecision {
                target_name: Some("Ayşe".into()),
                draft_text: "Merhaba".into(),
                extracted_date: parse_iso_datetime("2026-01-05T10:00:00"),
                meeting_title: "Toplantı: Ayşe".into(),
            },
        };
        let out = render_result(&r);
        assert!(out.contains("Contact: Ayşe (not found)"));
        assert!(out.contains("Date:    2026-01-05T10:00:00"));
        assert!(out.ends_with("Merhaba"));
    }

    #[test]
    fn template_is_a_valid_config() {
        let cfg = Config::from_yaml(CONFIG_TEMPLATE).unwrap();
        assert_eq!(cfg.model.provider, "ollama");
    }

    #[test]
    fn renders_error() {
        assert_eq!(render_result(&TaskResult::error("boom")), "error: boom");
    }
}
