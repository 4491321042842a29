//! Sending window evaluation.
//!
//! Pure instant-vs-window checks. Conversion into the window's IANA timezone
//! happens here and nowhere else; everything downstream works in UTC.
//! Deterministic for a given tzdata version.

use chrono::{DateTime, Datelike, Utc};

use crate::domain::SendWindow;

/// Evaluates whether an instant falls inside a recurring sending window.
#[derive(Debug, Clone, Copy)]
pub struct SendWindowEvaluator;

impl SendWindowEvaluator {
    /// Whether dispatching is permitted at `instant` under `window`.
    ///
    /// A disabled window permits every instant. An enabled window permits an
    /// instant iff its local weekday is allowed and its local time-of-day
    /// lies in `[start_time, end_time)`. An unresolvable timezone (rejected
    /// at campaign start, so unreachable in a running campaign) permits
    /// nothing.
    #[must_use]
    pub fn is_eligible(window: &SendWindow, instant: DateTime<Utc>) -> bool {
        if !window.enabled {
            return true;
        }

        let Ok(tz) = window.tz() else {
            return false;
        };

        let local = instant.with_timezone(&tz);
        let weekday = u8::try_from(local.weekday().num_days_from_sunday()).unwrap_or(7);
        if !window.days.contains(&weekday) {
            return false;
        }

        let tod = local.time();
        window.start_time <= tod && tod < window.end_time
    }

    /// Whether the window can never admit any instant.
    ///
    /// An enabled window with an empty weekday set is valid configuration but
    /// permanently ineligible; the scheduler surfaces it as a blocked run
    /// instead of idling silently.
    #[must_use]
    pub fn never_eligible(window: &SendWindow) -> bool {
        window.enabled && window.days.is_empty()
    }
}
