//! Software-ticked wall clock.
//!
//! The clock keeps an anchor pairing a UTC reading with the monotonic instant it was taken at,
//! and derives local time by adding elapsed monotonic time. The network worker re-anchors it
//! from the backend periodically.

use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use parking_lot::RwLock;

#[derive(Debug, Clone, Copy)]
struct Anchor {
    utc: DateTime<Utc>,
    at: Instant,
    synced: bool,
}

#[derive(Debug)]
pub struct Clock {
    offset: FixedOffset,
    anchor: RwLock<Anchor>,
}

impl Clock {
    /// Starts from the host clock until the first sync.
    pub fn new(offset: FixedOffset) -> Self {
        Self::anchored(offset, Utc::now(), Instant::now())
    }

    pub fn anchored(offset: FixedOffset, utc: DateTime<Utc>, at: Instant) -> Self {
        Self {
            offset,
            anchor: RwLock::new(Anchor {
                utc,
                at,
                synced: false,
            }),
        }
    }

    /// Re-anchors the clock: `utc` was the true time at `at`.
    pub fn sync(&self, utc: DateTime<Utc>, at: Instant) {
        let mut anchor = self.anchor.write();
        let drift = self.at_locked(&anchor, at).with_timezone(&Utc) - utc;
        log::info!("clock: synced to {} (drift {}ms)", utc, drift.num_milliseconds());
        *anchor = Anchor {
            utc,
            at,
            synced: true,
        };
    }

    pub fn is_synced(&self) -> bool {
        self.anchor.read().synced
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        self.at(Instant::now())
    }

    /// Local time at monotonic instant `instant`.
    pub fn at(&self, instant: Instant) -> DateTime<FixedOffset> {
        let anchor = self.anchor.read();
        self.at_locked(&anchor, instant)
    }

    fn at_locked(&self, anchor: &Anchor, instant: Instant) -> DateTime<FixedOffset> {
        let utc = if instant >= anchor.at {
            anchor.utc + to_chrono(instant - anchor.at)
        } else {
            anchor.utc - to_chrono(anchor.at - instant)
        };
        utc.with_timezone(&self.offset)
    }

    /// `HH:MM` as shown on the display.
    pub fn hhmm(&self) -> String {
        self.now().format("%H:%M").to_string()
    }

    /// Local midnight of the day containing `instant`.
    pub fn day_start(&self, instant: Instant) -> DateTime<FixedOffset> {
        let local = self.at(instant);
        local
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| self.offset.from_local_datetime(&midnight).single())
            .unwrap_or(local)
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}

/// Parses an HTTP `Date` header (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wat() -> FixedOffset {
        FixedOffset::east_opt(3600).unwrap()
    }

    #[test]
    fn local_time_advances_with_monotonic_time() {
        let t0 = Instant::now();
        let utc = Utc.with_ymd_and_hms(2025, 8, 29, 13, 5, 0).unwrap();
        let clock = Clock::anchored(wat(), utc, t0);
        let later = clock.at(t0 + Duration::from_secs(90));
        assert_eq!(later.to_rfc3339(), "2025-08-29T14:06:30+01:00");
        assert!(!clock.is_synced());
    }

    #[test]
    fn day_starts_at_local_midnight() {
        let t0 = Instant::now();
        // 23:30 UTC is already the next day at UTC+1
        let utc = Utc.with_ymd_and_hms(2025, 8, 29, 23, 30, 0).unwrap();
        let clock = Clock::anchored(wat(), utc, t0);
        assert_eq!(clock.day_start(t0).to_rfc3339(), "2025-08-30T00:00:00+01:00");
    }

    #[test]
    fn sync_reanchors() {
        let t0 = Instant::now();
        let clock = Clock::anchored(wat(), Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(), t0);
        let truth = Utc.with_ymd_and_hms(2025, 8, 29, 8, 0, 0).unwrap();
        clock.sync(truth, t0);
        assert!(clock.is_synced());
        assert_eq!(clock.at(t0).format("%H:%M").to_string(), "09:00");
    }

    #[test]
    fn http_dates_parse() {
        let parsed = parse_http_date("Fri, 29 Aug 2025 13:05:33 GMT").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 8, 29, 13, 5, 33).unwrap());
        assert!(parse_http_date("yesterday").is_none());
    }
}
