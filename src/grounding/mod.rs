//! Temporal grounding.
//!
//! Language models have no idea what "today" is. Every prompt therefore
//! embeds a block computed from one wall-clock sample: today's date and
//! weekday, the current time, tomorrow, the date a week out and the
//! current year. Relative expressions such as "tomorrow 10am" are
//! resolved by the model against this block.

use chrono::{Datelike, Duration, Local, NaiveDateTime, Weekday};

/// Source of the "now" instant used for grounding.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock frozen at one instant. Used by tests and reproducible runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Language of the weekday names in the rendered block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Tr,
}

impl Locale {
    /// Map a tag like `tr`, `tr_TR.UTF-8` or `en-US` to a locale.
    ///
    /// Unknown tags fall back to English; this is never fatal.
    pub fn from_tag(tag: &str) -> Locale {
        let lang = tag
            .split(['_', '-', '.'])
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        match lang.as_str() {
            "en" => Locale::En,
            "tr" => Locale::Tr,
            _ => {
                tracing::warn!(tag, "no weekday names for locale, using English");
                Locale::En
            }
        }
    }

    /// Label put in front of an outgoing mail's subject.
    pub fn subject_label(self) -> &'static str {
        match self {
            Locale::En => "Subject",
            Locale::Tr => "Konu",
        }
    }

    pub fn weekday_name(self, day: Weekday) -> &'static str {
        match self {
            Locale::En => match day {
                Weekday::Mon => "Monday",
                Weekday::Tue => "Tuesday",
                Weekday::Wed => "Wednesday",
                Weekday::Thu => "Thursday",
                Weekday::Fri => "Friday",
                Weekday::Sat => "Saturday",
                Weekday::Sun => "Sunday",
            },
            Locale::Tr => match day {
                Weekday::Mon => "Pazartesi",
                Weekday::Tue => "Salı",
                Weekday::Wed => "Çarşamba",
                Weekday::Thu => "Perşembe",
                Weekday::Fri => "Cuma",
                Weekday::Sat => "Cumartesi",
                Weekday::Sun => "Pazar",
            },
        }
    }
}

/// Reference-time snapshot injected into every prompt.
///
/// All fields derive from the single `now` sample, so the block is
/// internally consistent even if the call straddles midnight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalContext {
    pub now: NaiveDateTime,
    pub tomorrow: NaiveDateTime,
    pub plus_seven_days: NaiveDateTime,
    pub current_year: i32,
    pub weekday_now: &'static str,
    pub weekday_tomorrow: &'static str,
}

impl TemporalContext {
    /// Build the snapshot for a given instant. Pure.
    pub fn at(now: NaiveDateTime, locale: Locale) -> Self {
        let tomorrow = now + Duration::days(1);
        Self {
            now,
            tomorrow,
            plus_seven_days: now + Duration::days(7),
            current_year: now.year(),
            weekday_now: locale.weekday_name(now.weekday()),
            weekday_tomorrow: locale.weekday_name(tomorrow.weekday()),
        }
    }

    /// Render the block that goes verbatim into a prompt.
    pub fn render(&self) -> String {
        format!(
            "REFERENCE TIME (treat as authoritative):\n\
             - TODAY: {} ({})\n\
             - CURRENT TIME: {}\n\
             - TOMORROW: {} ({})\n\
             - SAME DAY NEXT WEEK: {}\n\
             - CURRENT YEAR: {}",
            self.now.format("%Y-%m-%d"),
            self.weekday_now,
            self.now.format("%H:%M"),
            self.tomorrow.format("%Y-%m-%d"),
            self.weekday_tomorrow,
            self.plus_seven_days.format("%Y-%m-%d"),
            self.current_year,
        )
    }
}

/// Sample `clock` once and build the snapshot.
pub fn build_context(clock: &dyn Clock, locale: Locale) -> TemporalContext {
    TemporalContext::at(clock.now(), locale)
}
