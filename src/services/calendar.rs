//! File-backed calendar: events appended to `calendar.jsonl`.

use std::path::PathBuf;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::mailbox::append_jsonl;
use crate::intent::parse_iso_datetime;

/// Length of every scheduled meeting.
pub const EVENT_LENGTH_MINUTES: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub time_zone: String,
    pub created_at: DateTime<Utc>,
}

pub struct Calendar {
    path: PathBuf,
    tz: Tz,
}

impl Calendar {
    pub fn new(path: impl Into<PathBuf>, tz: Tz) -> Self {
        Self {
            path: path.into(),
            tz,
        }
    }

    /// Create a one-hour event starting at the local time `iso_datetime`.
    pub async fn schedule(&self, summary: &str, iso_datetime: &str) -> anyhow::Result<String> {
        if iso_datetime.trim().is_empty() {
            anyhow::bail!("no date given");
        }
        let naive = parse_iso_datetime(iso_datetime)
            .ok_or_else(|| anyhow::anyhow!("unrecognised date '{iso_datetime}'"))?;
        let start = self
            .tz
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| anyhow::anyhow!("{naive} does not exist in {}", self.tz))?;
        let end = start + Duration::minutes(EVENT_LENGTH_MINUTES);

        let event = CalendarEvent {
            id: uuid::Uuid::new_v4().to_string(),
            summary: summary.to_string(),
            start: start.fixed_offset(),
            end: end.fixed_offset(),
            time_zone: self.tz.name().to_string(),
            created_at: Utc::now(),
        };
        append_jsonl(&self.path, &event).await?;
        info!(id = %event.id, summary, start = %start, "event added");
        Ok(format!("Added to calendar: {}", start.format("%H:%M")))
    }
}
