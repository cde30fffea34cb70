//! Pure functions over a snapshot of the collector's current window. None of
//! these touch the rings directly — they're handed a `Vec<Event>` snapshot
//! and fold it into a summary. Kept separate from `collector` so the
//! statistics can be unit-tested without spinning up a subprocess.

use crate::event::Event;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct CpuContention {
    pub context_switch_rate: f64,
    pub burst_detected: bool,
}

pub fn detect_cpu_contention(events: &[Event], retention_seconds: i64) -> CpuContention {
    let switch_count = events
        .iter()
        .filter(|e| e.event_type == "context_switch")
        .count();

    CpuContention {
        context_switch_rate: switch_count as f64 / retention_seconds.max(1) as f64,
        burst_detected: switch_count > 1000,
    }
}

pub fn detect_gc_events(events: &[Event]) -> Vec<Event> {
    events
        .iter()
        .filter(|e| e.provider == "Microsoft-Windows-DotNETRuntime" && e.event_name.contains("GC"))
        .cloned()
        .collect()
}

pub fn detect_page_faults(events: &[Event]) -> Vec<Event> {
    events.iter().filter(|e| e.task == "Memory").cloned().collect()
}

fn sum_by_pid(events: &[Event], field: impl Fn(&Event) -> Option<f64>) -> Vec<(i64, f64)> {
    let mut totals: HashMap<i64, f64> = HashMap::new();
    for e in events {
        if let (Some(pid), Some(value)) = (e.pid, field(e)) {
            if value != 0.0 {
                *totals.entry(pid).or_insert(0.0) += value;
            }
        }
    }
    let mut out: Vec<(i64, f64)> = totals.into_iter().collect();
    out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    out
}

pub fn aggregate_network_usage(events: &[Event]) -> Vec<(i64, f64)> {
    sum_by_pid(events, |e| e.net_bytes)
}

pub fn aggregate_disk_usage(events: &[Event]) -> Vec<(i64, f64)> {
    sum_by_pid(events, |e| e.disk_bytes)
}

pub fn detect_thread_spikes(events: &[Event]) -> Vec<(i64, u64)> {
    let mut counts: HashMap<i64, u64> = HashMap::new();
    for e in events {
        if e.event_type == "thread_start" {
            if let Some(pid) = e.pid {
                *counts.entry(pid).or_insert(0) += 1;
            }
        }
    }
    let mut out: Vec<(i64, u64)> = counts.into_iter().collect();
    out.sort_by(|a, b| b.1.cmp(&a.1));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;
    use serde_json::Map;

    fn ev(pid: Option<i64>, event_type: &str, task: &str, event_name: &str) -> Event {
        Event {
            ts: clock::now(),
            pid,
            tid: None,
            provider: "unknown".into(),
            event_type: event_type.into(),
            event_name: event_name.into(),
            task: task.into(),
            payload: Map::new(),
            net_bytes: None,
            disk_bytes: None,
        }
    }

    #[test]
    fn cpu_contention_rate_and_burst() {
        let events: Vec<Event> = (0..1001)
            .map(|_| ev(Some(1), "context_switch", "", "unknown"))
            .collect();
        let c = detect_cpu_contention(&events, 100);
        assert_eq!(c.context_switch_rate, 10.01);
        assert!(c.burst_detected);
    }

    #[test]
    fn gc_events_filtered_by_provider_and_name() {
        let mut e = ev(Some(1), "x", "", "GCStart");
        e.provider = "Microsoft-Windows-DotNETRuntime".into();
        let other = ev(Some(1), "x", "", "GCStart");
        let events = vec![e.clone(), other];
        let gcs = detect_gc_events(&events);
        assert_eq!(gcs.len(), 1);
    }

    #[test]
    fn page_faults_filtered_by_task() {
        let events = vec![ev(Some(1), "x", "Memory", "unknown"), ev(Some(1), "x", "Other", "unknown")];
        assert_eq!(detect_page_faults(&events).len(), 1);
    }

    #[test]
    fn network_usage_sorted_descending() {
        let mut a = ev(Some(1), "x", "", "unknown");
        a.net_bytes = Some(100.0);
        let mut b = ev(Some(2), "x", "", "unknown");
        b.net_bytes = Some(500.0);
        let usage = aggregate_network_usage(&[a, b]);
        assert_eq!(usage[0], (2, 500.0));
        assert_eq!(usage[1], (1, 100.0));
    }

    #[test]
    fn thread_spikes_counted_per_pid() {
        let events = vec![
            ev(Some(1), "thread_start", "", "unknown"),
            ev(Some(1), "thread_start", "", "unknown"),
            ev(Some(2), "thread_start", "", "unknown"),
        ];
        let spikes = detect_thread_spikes(&events);
        assert_eq!(spikes[0], (1, 2));
        assert_eq!(spikes[1], (2, 1));
    }
}
