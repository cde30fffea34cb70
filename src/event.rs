//! Normalized tracer event — the shape every stdout line from the tracer
//! subprocess is coerced into before it ever reaches a ring buffer.

use crate::clock::{self, Instant};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One normalized tracer record. Unknown top-level fields on the wire are
/// dropped rather than preserved — they never feed any of the aggregators
/// or the ranker, and carrying them around only bloats the rings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub ts: Instant,
    pub pid: Option<i64>,
    pub tid: Option<i64>,
    #[serde(default = "default_unknown")]
    pub provider: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default = "default_unknown")]
    pub event_name: String,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub net_bytes: Option<f64>,
    pub disk_bytes: Option<f64>,
}

fn default_unknown() -> String {
    "unknown".to_string()
}

/// Raw wire shape, matching whatever fields the tracer actually emits.
/// `ts` arrives as a string because the tracer's clock and serialization
/// are opaque to us; everything else defaults per spec on absence.
#[derive(Debug, Deserialize)]
struct WireEvent {
    ts: Option<String>,
    pid: Option<i64>,
    tid: Option<i64>,
    provider: Option<String>,
    event_type: Option<String>,
    event_name: Option<String>,
    task: Option<String>,
    payload: Option<Value>,
    net_bytes: Option<f64>,
    disk_bytes: Option<f64>,
}

impl Event {
    /// Parse one JSON line from the tracer's stdout. Returns `None` if the
    /// line is not valid JSON at all; every other defect (missing/invalid
    /// timestamp, non-object payload, missing strings) is normalized away
    /// rather than rejected.
    pub fn parse_line(line: &str) -> Option<Event> {
        let wire: WireEvent = serde_json::from_str(line).ok()?;

        let ts = wire
            .ts
            .as_deref()
            .and_then(clock::parse_iso)
            .unwrap_or_else(clock::now);

        let payload = match wire.payload {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        Some(Event {
            ts,
            pid: wire.pid,
            tid: wire.tid,
            provider: wire.provider.unwrap_or_else(default_unknown),
            event_type: wire.event_type.unwrap_or_default(),
            event_name: wire.event_name.unwrap_or_else(default_unknown),
            task: wire.task.unwrap_or_default(),
            payload,
            net_bytes: wire.net_bytes,
            disk_bytes: wire.disk_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_line() {
        let ev = Event::parse_line(r#"{"pid": 42}"#).unwrap();
        assert_eq!(ev.pid, Some(42));
        assert_eq!(ev.provider, "unknown");
        assert_eq!(ev.event_name, "unknown");
        assert_eq!(ev.task, "");
        assert!(ev.payload.is_empty());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(Event::parse_line("not json at all").is_none());
    }

    #[test]
    fn non_object_payload_is_defaulted() {
        let ev = Event::parse_line(r#"{"pid": 1, "payload": 5}"#).unwrap();
        assert!(ev.payload.is_empty());
    }

    #[test]
    fn invalid_timestamp_falls_back_to_ingestion_time() {
        let before = clock::now();
        let ev = Event::parse_line(r#"{"pid": 1, "ts": "garbage"}"#).unwrap();
        let after = clock::now();
        assert!(ev.ts >= before && ev.ts <= after);
    }
}
