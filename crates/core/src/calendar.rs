//! Day-granularity clock in a fixed reference timezone.
//!
//! Every date comparison in the orchestrator happens on [`NaiveDate`]s
//! obtained through a [`Clock`], so time-of-day never leaks into phase
//! boundaries.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};

/// Source of "today" for schedule derivation.
pub trait Clock: Send + Sync {
    /// The current calendar day in the reference timezone.
    fn today(&self) -> NaiveDate;
}

/// Wall-clock time shifted into a fixed UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    /// Build a clock for the given offset in minutes east of UTC.
    ///
    /// Offsets outside ±24h fall back to UTC.
    pub fn new(utc_offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    /// Calendar day of an arbitrary instant in this clock's timezone.
    pub fn day_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }
}

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        self.day_of(Utc::now())
    }
}

/// A clock frozen on one day. Used by tests and by the CLI `--today` flag.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
