//! In-memory state store: telemetry history, spike records and the most
//! recent RCA verdict. One coarse mutex, short critical sections, snapshot
//! on read — the same discipline the collector's rings use.

use crate::clock::{self, Instant};
use crate::detector::{SpikeInfo, TelemetrySample};
use crate::event::Event;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

const TELEMETRY_RING_CAPACITY: usize = 300;
const SPIKES_RING_CAPACITY: usize = 2_000;
const SPIKE_EVENTS_CAPACITY: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct Spike {
    pub id: u64,
    pub detected_at: Instant,
    pub start_time: Instant,
    pub confirm_time: Instant,
    pub spike_type: String,
    pub severity_score: f64,
    pub cpu_at_confirm: f64,
    pub ram_at_confirm: f64,
    pub reason: String,
    pub attached_event_count: usize,
    pub etw_events: Vec<Event>,
    pub rca: Option<serde_json::Value>,
}

impl Spike {
    fn from_info(id: u64, info: SpikeInfo) -> Self {
        Self {
            id,
            detected_at: clock::now(),
            start_time: info.start_time,
            confirm_time: info.confirm_time,
            spike_type: info.spike_type,
            severity_score: info.severity_score,
            cpu_at_confirm: info.cpu_at_confirm,
            ram_at_confirm: info.ram_at_confirm,
            reason: "threshold exceeded".to_string(),
            attached_event_count: 0,
            etw_events: Vec::new(),
            rca: None,
        }
    }
}

struct Inner {
    telemetry: VecDeque<TelemetrySample>,
    spikes: VecDeque<Spike>,
    next_id: u64,
}

/// Shared, thread-safe home for everything the orchestrator produces and
/// the read API serves back out. Cheap to clone (`Arc` the whole thing at
/// the call site) — there's no interior cloning here.
pub struct StateStore {
    inner: Mutex<Inner>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                telemetry: VecDeque::with_capacity(TELEMETRY_RING_CAPACITY),
                spikes: VecDeque::with_capacity(SPIKES_RING_CAPACITY),
                next_id: 1,
            }),
        }
    }

    pub fn add_telemetry(&self, sample: TelemetrySample) {
        let mut guard = self.inner.lock().unwrap();
        guard.telemetry.push_back(sample);
        if guard.telemetry.len() > TELEMETRY_RING_CAPACITY {
            guard.telemetry.pop_front();
        }
    }

    pub fn get_latest_telemetry(&self) -> Option<TelemetrySample> {
        let guard = self.inner.lock().unwrap();
        guard.telemetry.back().copied()
    }

    /// Samples within the last `seconds`, oldest first. `None` if `seconds`
    /// is outside `[1, 600]` — the caller is expected to surface that as a
    /// validation error rather than silently clamping it. The ring is
    /// chronological, so a reverse walk can stop at the first sample older
    /// than the cutoff instead of scanning the whole ring.
    pub fn get_telemetry_window(&self, seconds: i64) -> Option<Vec<TelemetrySample>> {
        if !(1..=600).contains(&seconds) {
            return None;
        }
        let cutoff = clock::now() - chrono::Duration::seconds(seconds);
        let guard = self.inner.lock().unwrap();

        let mut out: Vec<TelemetrySample> = Vec::new();
        for sample in guard.telemetry.iter().rev() {
            if sample.ts < cutoff {
                break;
            }
            out.push(*sample);
        }
        out.reverse();
        Some(out)
    }

    /// Allocate the next spike id and record it. Ids form a strictly
    /// increasing sequence starting at 1, independent of ring eviction.
    pub fn add_spike(&self, info: SpikeInfo) -> u64 {
        let mut guard = self.inner.lock().unwrap();
        let id = guard.next_id;
        guard.next_id += 1;

        guard.spikes.push_back(Spike::from_info(id, info));
        if guard.spikes.len() > SPIKES_RING_CAPACITY {
            guard.spikes.pop_front();
        }
        id
    }

    /// No-op if `id` has already aged out of the ring. `attached_event_count`
    /// reflects the full snapshot size even though `etw_events` is capped to
    /// the most recent `SPIKE_EVENTS_CAPACITY`.
    pub fn attach_events(&self, id: u64, events: Vec<Event>) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(spike) = guard.spikes.iter_mut().find(|s| s.id == id) {
            spike.attached_event_count = events.len();
            let start = events.len().saturating_sub(SPIKE_EVENTS_CAPACITY);
            spike.etw_events = events[start..].to_vec();
        }
    }

    /// No-op if `id` has already aged out of the ring or `rca` is not a
    /// mapping.
    pub fn attach_rca(&self, id: u64, rca: serde_json::Value) {
        if !rca.is_object() {
            return;
        }
        let mut guard = self.inner.lock().unwrap();
        if let Some(spike) = guard.spikes.iter_mut().find(|s| s.id == id) {
            spike.rca = Some(rca);
        }
    }

    /// Newest spikes first.
    pub fn get_spikes(&self) -> Vec<Spike> {
        let guard = self.inner.lock().unwrap();
        guard.spikes.iter().rev().cloned().collect()
    }

    pub fn get_spike(&self, id: u64) -> Option<Spike> {
        let guard = self.inner.lock().unwrap();
        guard.spikes.iter().find(|s| s.id == id).cloned()
    }

    /// RCA from the newest spike (by insertion order) that has one attached.
    pub fn get_latest_rca(&self) -> Option<serde_json::Value> {
        let guard = self.inner.lock().unwrap();
        guard
            .spikes
            .iter()
            .rev()
            .find_map(|s| s.rca.clone())
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> SpikeInfo {
        SpikeInfo {
            start_time: clock::now(),
            confirm_time: clock::now(),
            spike_type: "cpu".into(),
            severity_score: 10.0,
            cpu_at_confirm: 90.0,
            ram_at_confirm: 40.0,
        }
    }

    #[test]
    fn spike_ids_increase_strictly_from_one() {
        let store = StateStore::new();
        let a = store.add_spike(info());
        let b = store.add_spike(info());
        let c = store.add_spike(info());
        assert_eq!((a, b, c), (1, 2, 3));
    }

    #[test]
    fn get_spikes_returns_newest_first() {
        let store = StateStore::new();
        store.add_spike(info());
        store.add_spike(info());
        let spikes = store.get_spikes();
        assert_eq!(spikes[0].id, 2);
        assert_eq!(spikes[1].id, 1);
    }

    #[test]
    fn latest_rca_is_newest_spike_with_one_attached() {
        let store = StateStore::new();
        let first = store.add_spike(info());
        let second = store.add_spike(info());
        store.attach_rca(first, serde_json::json!({"tag": "first"}));
        assert_eq!(store.get_latest_rca().unwrap()["tag"], "first");
        store.attach_rca(second, serde_json::json!({"tag": "second"}));
        assert_eq!(store.get_latest_rca().unwrap()["tag"], "second");
    }

    #[test]
    fn attach_events_and_rca_on_missing_id_is_noop() {
        let store = StateStore::new();
        store.attach_events(999, vec![]);
        store.attach_rca(999, serde_json::json!({"ok": true}));
        assert!(store.get_spike(999).is_none());
        assert!(store.get_latest_rca().is_none());
    }

    #[test]
    fn attach_rca_on_non_mapping_is_noop() {
        let store = StateStore::new();
        let id = store.add_spike(info());
        store.attach_rca(id, serde_json::json!([1, 2, 3]));
        store.attach_rca(id, serde_json::json!("not an object"));
        assert!(store.get_spike(id).unwrap().rca.is_none());
    }

    #[test]
    fn attach_events_truncates_to_capacity() {
        let store = StateStore::new();
        let id = store.add_spike(info());
        let events: Vec<Event> = (0..(SPIKE_EVENTS_CAPACITY + 50))
            .map(|i| Event {
                ts: clock::now(),
                pid: Some(i as i64),
                tid: None,
                provider: "unknown".into(),
                event_type: String::new(),
                event_name: "unknown".into(),
                task: String::new(),
                payload: serde_json::Map::new(),
                net_bytes: None,
                disk_bytes: None,
            })
            .collect();
        store.attach_events(id, events);
        let spike = store.get_spike(id).unwrap();
        assert_eq!(spike.attached_event_count, SPIKE_EVENTS_CAPACITY + 50);
        assert_eq!(spike.etw_events.len(), SPIKE_EVENTS_CAPACITY);
        assert_eq!(spike.etw_events[0].pid, Some(50));
    }

    #[test]
    fn telemetry_window_is_chronological() {
        let store = StateStore::new();
        for _ in 0..5 {
            store.add_telemetry(TelemetrySample {
                ts: clock::now(),
                cpu: 1.0,
                ram: 1.0,
            });
        }
        let window = store.get_telemetry_window(60).unwrap();
        assert_eq!(window.len(), 5);
        for pair in window.windows(2) {
            assert!(pair[0].ts <= pair[1].ts);
        }
    }

    #[test]
    fn telemetry_window_rejects_out_of_range_seconds() {
        let store = StateStore::new();
        assert!(store.get_telemetry_window(0).is_none());
        assert!(store.get_telemetry_window(601).is_none());
        assert!(store.get_telemetry_window(-5).is_none());
        assert!(store.get_telemetry_window(1).is_some());
        assert!(store.get_telemetry_window(600).is_some());
    }
}
