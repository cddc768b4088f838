//! Intent engines.
//!
//! An intent engine turns free text into exactly one structured record:
//! an email body into a [`SummaryReply`], a user command into an
//! [`ActionDecision`]. Every call grounds the prompt in the current time,
//! invokes the backend once and sanitizes the reply. Failures never escape:
//! the caller always gets a well-shaped record, at worst a fallback one.

pub mod prompts;
pub mod sanitize;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, warn};

use crate::grounding::{self, Clock, Locale, SystemClock};
use crate::models::{ChatMessage, ModelProvider};

/// Title put into fallback records.
pub const ERROR_TITLE: &str = "Error";

// ---------------------------------------------------------------------------
// Result shapes
// ---------------------------------------------------------------------------

/// Result of the summarize-and-reply intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryReply {
    #[serde(default, deserialize_with = "de_null_as_empty")]
    pub summary: String,
    #[serde(default, deserialize_with = "de_null_as_empty")]
    pub draft_reply: String,
    #[serde(
        default,
        deserialize_with = "de_iso_datetime",
        serialize_with = "ser_iso_datetime"
    )]
    pub detected_date: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "de_null_as_empty")]
    pub meeting_title: String,
}

impl SummaryReply {
    fn fallback(cause: &str) -> Self {
        Self {
            summary: ERROR_TITLE.to_string(),
            draft_reply: format!("Error: {cause}"),
            detected_date: None,
            meeting_title: ERROR_TITLE.to_string(),
        }
    }
}

/// Result of the decide-action intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDecision {
    #[serde(default, deserialize_with = "de_non_blank")]
    pub target_name: Option<String>,
    #[serde(default, deserialize_with = "de_null_as_empty")]
    pub draft_text: String,
    #[serde(
        default,
        deserialize_with = "de_iso_datetime",
        serialize_with = "ser_iso_datetime"
    )]
    pub extracted_date: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "de_null_as_empty")]
    pub meeting_title: String,
}

impl ActionDecision {
    fn fallback(draft_text: &str) -> Self {
        Self {
            target_name: None,
            draft_text: draft_text.to_string(),
            extracted_date: None,
            meeting_title: ERROR_TITLE.to_string(),
        }
    }
}

/// One intent result, tagged by the intent that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum IntentResult {
    SummaryReply(SummaryReply),
    ActionDecision(ActionDecision),
}

impl IntentResult {
    /// True when the record is an engine fallback rather than model output.
    pub fn is_fallback(&self) -> bool {
        match self {
            IntentResult::SummaryReply(r) => r.meeting_title == ERROR_TITLE && r.summary == ERROR_TITLE,
            IntentResult::ActionDecision(d) => {
                d.meeting_title == ERROR_TITLE && d.target_name.is_none() && d.extracted_date.is_none()
            }
        }
    }
}

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Lenient ISO-8601 parse: optional trailing `Z`, optional fractional
/// seconds, optional seconds, `T` or space separator.
pub fn parse_iso_datetime(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    let s = s.strip_suffix('Z').unwrap_or(s);
    if s.is_empty() || s.eq_ignore_ascii_case("null") {
        return None;
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Render a datetime the way the output schema expects it.
pub fn format_iso_datetime(dt: &NaiveDateTime) -> String {
    dt.format(ISO_FORMAT).to_string()
}

fn de_iso_datetime<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) => {
            let parsed = parse_iso_datetime(&s);
            if parsed.is_none() && !s.trim().is_empty() {
                debug!(value = %s, "model returned an unparseable date, treating as null");
            }
            parsed
        }
        _ => None,
    })
}

fn ser_iso_datetime<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(dt) => serializer.serialize_some(&format_iso_datetime(dt)),
        None => serializer.serialize_none(),
    }
}

fn de_null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn de_non_blank<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// IntentEngine trait
// ---------------------------------------------------------------------------

/// The capability set every intent engine offers.
///
/// Implementations must not fail: a broken backend or unreadable reply
/// produces a fallback record with null dates.
#[async_trait]
pub trait IntentEngine: Send + Sync {
    /// Summarize an email and draft a reply.
    async fn summarize_and_reply(&self, email: &str) -> SummaryReply;

    /// Turn a free-text command into a target person, draft and date.
    async fn decide_action(&self, command: &str) -> ActionDecision;
}

/// Intent engine backed by any [`ModelProvider`].
pub struct LlmIntentEngine {
    provider: Arc<dyn ModelProvider>,
    clock: Arc<dyn Clock>,
    locale: Locale,
}

impl LlmIntentEngine {
    /// Engine using the local wall clock.
    pub fn new(provider: Arc<dyn ModelProvider>, locale: Locale) -> Self {
        Self::with_clock(provider, Arc::new(SystemClock), locale)
    }

    pub fn with_clock(provider: Arc<dyn ModelProvider>, clock: Arc<dyn Clock>, locale: Locale) -> Self {
        Self {
            provider,
            clock,
            locale,
        }
    }

    /// Ground, prompt, call once, sanitize.
    async fn ask<T: serde::de::DeserializeOwned>(
        &self,
        intent: &'static str,
        build_prompt: impl FnOnce(&grounding::TemporalContext) -> String,
    ) -> Result<T, IntentFailure> {
        let ctx = grounding::build_context(self.clock.as_ref(), self.locale);
        let prompt = build_prompt(&ctx);
        let messages = [ChatMessage::user(prompt)];

        let raw = self
            .provider
            .send_chat_structured(&messages)
            .await
            .map_err(|e| {
                warn!(intent, error = %e, "model backend unavailable");
                IntentFailure::BackendUnavailable(e.to_string())
            })?;

        debug!(
            intent,
            reply = %crate::utils::truncate_str(&raw, 200),
            "model replied"
        );

        sanitize::parse_as::<T>(&raw).ok_or_else(|| {
            warn!(intent, "model reply could not be parsed as JSON");
            IntentFailure::MalformedOutput
        })
    }
}

/// Why an engine call fell back.
#[derive(Debug)]
enum IntentFailure {
    BackendUnavailable(String),
    MalformedOutput,
}

#[async_trait]
impl IntentEngine for LlmIntentEngine {
    async fn summarize_and_reply(&self, email: &str) -> SummaryReply {
        match self
            .ask::<SummaryReply>("summary_reply", |ctx| prompts::summary_reply(ctx, email))
            .await
        {
            Ok(reply) => reply,
            Err(IntentFailure::BackendUnavailable(cause)) => SummaryReply::fallback(&cause),
            Err(IntentFailure::MalformedOutput) => SummaryReply::fallback("empty or unreadable model response"),
        }
    }

    async fn decide_action(&self, command: &str) -> ActionDecision {
        match self
            .ask::<ActionDecision>("action_decision", |ctx| prompts::action_decision(ctx, command))
            .await
        {
            Ok(decision) => decision,
            Err(IntentFailure::BackendUnavailable(_)) => ActionDecision::fallback("System error."),
            Err(IntentFailure::MalformedOutput) => {
                ActionDecision::fallback("AI response could not be understood.")
            }
        }
    }
}
