//! Monotonic-enough UTC timestamps in ISO-8601, shared by every subsystem
//! that stamps an event, sample or spike record.

use chrono::{DateTime, Utc};

pub type Instant = DateTime<Utc>;

/// Current UTC instant.
pub fn now() -> Instant {
    Utc::now()
}

/// Parse an ISO-8601 string, falling back to `None` on any malformed input.
pub fn parse_iso(s: &str) -> Option<Instant> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_iso() {
        let t = now();
        let s = t.to_rfc3339();
        let parsed = parse_iso(&s).unwrap();
        assert_eq!(t.timestamp_millis(), parsed.timestamp_millis());
    }

    #[test]
    fn malformed_iso_is_none() {
        assert!(parse_iso("not-a-timestamp").is_none());
    }
}
