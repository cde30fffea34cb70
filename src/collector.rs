//! Event Collector: spawns the tracer subprocess, parses one JSON event per
//! stdout line, and maintains a time-bounded global ring plus per-PID rings.
//! All external reads are snapshot copies — the rings themselves are owned
//! exclusively by the stdout reader task.

use crate::aggregators;
use crate::clock;
use crate::event::Event;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

struct Rings {
    global: VecDeque<Event>,
    by_pid: HashMap<i64, VecDeque<Event>>,
}

impl Rings {
    fn new() -> Self {
        Self {
            global: VecDeque::new(),
            by_pid: HashMap::new(),
        }
    }

    fn insert(&mut self, event: Event, global_cap: usize, per_pid_cap: usize) {
        let pid = event.pid;

        self.global.push_back(event.clone());
        if self.global.len() > global_cap {
            self.global.pop_front();
        }

        if let Some(pid) = pid {
            let ring = self.by_pid.entry(pid).or_default();
            ring.push_back(event);
            if ring.len() > per_pid_cap {
                ring.pop_front();
            }
        }
    }

    /// Evict anything older than `retention_seconds`, keeping the global
    /// ring and per-PID rings consistent: whatever drops out of the global
    /// ring also drops out of its PID's ring.
    fn purge_old(&mut self, retention_seconds: i64) {
        let cutoff = clock::now() - chrono::Duration::seconds(retention_seconds);

        while let Some(front) = self.global.front() {
            if front.ts >= cutoff {
                break;
            }
            let evicted = self.global.pop_front().unwrap();
            if let Some(pid) = evicted.pid {
                if let Some(ring) = self.by_pid.get_mut(&pid) {
                    if matches!(ring.front(), Some(e) if e.ts == evicted.ts && e.pid == evicted.pid)
                    {
                        ring.pop_front();
                    }
                    if ring.is_empty() {
                        self.by_pid.remove(&pid);
                    }
                }
            }
        }
    }
}

pub struct EventCollector {
    rings: Arc<Mutex<Rings>>,
    stop_flag: Arc<AtomicBool>,
    child: Arc<Mutex<Option<Child>>>,
    retention_seconds: i64,
}

impl EventCollector {
    /// Spawn the tracer subprocess and start its stdout/stderr readers.
    /// Fatal if the tracer executable is missing — per spec this is the
    /// one unrecoverable construction failure.
    pub async fn spawn(
        tracer_path: &str,
        global_ring_capacity: usize,
        per_pid_ring_capacity: usize,
        retention_seconds: i64,
    ) -> Result<Self> {
        if !Path::new(tracer_path).exists() {
            anyhow::bail!("tracer executable not found at: {tracer_path}");
        }

        info!("starting tracer subprocess: {tracer_path}");

        let mut child = Command::new(tracer_path)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn tracer at {tracer_path}"))?;

        let stdout = child.stdout.take().context("tracer stdout not piped")?;
        let stderr = child.stderr.take().context("tracer stderr not piped")?;

        let rings = Arc::new(Mutex::new(Rings::new()));
        let stop_flag = Arc::new(AtomicBool::new(false));

        let collector = Self {
            rings: rings.clone(),
            stop_flag: stop_flag.clone(),
            child: Arc::new(Mutex::new(Some(child))),
            retention_seconds,
        };

        tokio::spawn(Self::stdout_reader(
            stdout,
            rings,
            stop_flag.clone(),
            global_ring_capacity,
            per_pid_ring_capacity,
            retention_seconds,
        ));
        tokio::spawn(Self::stderr_reader(stderr, stop_flag));

        Ok(collector)
    }

    async fn stdout_reader(
        stdout: tokio::process::ChildStdout,
        rings: Arc<Mutex<Rings>>,
        stop_flag: Arc<AtomicBool>,
        global_cap: usize,
        per_pid_cap: usize,
        retention_seconds: i64,
    ) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match Event::parse_line(line) {
                        Some(event) => {
                            let mut guard = rings.lock().unwrap();
                            guard.insert(event, global_cap, per_pid_cap);
                            guard.purge_old(retention_seconds);
                        }
                        None => {
                            debug!("dropping malformed tracer line: {line}");
                        }
                    }
                }
                Ok(None) => {
                    info!("tracer stdout closed; reader exiting");
                    break;
                }
                Err(e) => {
                    warn!("error reading tracer stdout: {e}");
                    break;
                }
            }
        }
    }

    async fn stderr_reader(stderr: tokio::process::ChildStderr, stop_flag: Arc<AtomicBool>) {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if !line.trim().is_empty() {
                        warn!("[tracer stderr] {line}");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("error reading tracer stderr: {e}");
                    break;
                }
            }
        }
    }

    /// Last `limit` events from the global ring, newest last.
    pub fn recent_events(&self, limit: usize) -> Vec<Event> {
        let guard = self.rings.lock().unwrap();
        let len = guard.global.len();
        let start = len.saturating_sub(limit);
        guard.global.iter().skip(start).cloned().collect()
    }

    /// Last `limit` events for a specific PID, or empty if unknown.
    pub fn events_by_pid(&self, pid: i64, limit: usize) -> Vec<Event> {
        let guard = self.rings.lock().unwrap();
        match guard.by_pid.get(&pid) {
            Some(ring) => {
                let start = ring.len().saturating_sub(limit);
                ring.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    fn snapshot(&self) -> Vec<Event> {
        let guard = self.rings.lock().unwrap();
        guard.global.iter().cloned().collect()
    }

    pub fn detect_cpu_contention(&self) -> aggregators::CpuContention {
        aggregators::detect_cpu_contention(&self.snapshot(), self.retention_seconds)
    }

    pub fn detect_gc_events(&self) -> Vec<Event> {
        aggregators::detect_gc_events(&self.snapshot())
    }

    pub fn detect_page_faults(&self) -> Vec<Event> {
        aggregators::detect_page_faults(&self.snapshot())
    }

    pub fn aggregate_network_usage(&self) -> Vec<(i64, f64)> {
        aggregators::aggregate_network_usage(&self.snapshot())
    }

    pub fn aggregate_disk_usage(&self) -> Vec<(i64, f64)> {
        aggregators::aggregate_disk_usage(&self.snapshot())
    }

    pub fn detect_thread_spikes(&self) -> Vec<(i64, u64)> {
        aggregators::detect_thread_spikes(&self.snapshot())
    }

    /// Request termination. Idempotent: a second call is a no-op since the
    /// child handle is only `Some` once.
    pub async fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);

        let child = {
            let mut guard = self.child.lock().unwrap();
            guard.take()
        };

        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                warn!("failed to signal tracer termination: {e}");
            }
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn make_event(pid: Option<i64>, ts: clock::Instant) -> Event {
        Event {
            ts,
            pid,
            tid: None,
            provider: "unknown".into(),
            event_type: "context_switch".into(),
            event_name: "unknown".into(),
            task: String::new(),
            payload: Map::new(),
            net_bytes: None,
            disk_bytes: None,
        }
    }

    #[test]
    fn rings_insert_and_cap() {
        let mut rings = Rings::new();
        let now = clock::now();
        for i in 0..5 {
            rings.insert(make_event(Some(1), now), 3, 3);
            let _ = i;
        }
        assert_eq!(rings.global.len(), 3);
        assert_eq!(rings.by_pid.get(&1).unwrap().len(), 3);
    }

    #[test]
    fn purge_keeps_global_and_per_pid_consistent() {
        let mut rings = Rings::new();
        let old = clock::now() - chrono::Duration::seconds(200);
        let fresh = clock::now();
        rings.insert(make_event(Some(1), old), 100, 100);
        rings.insert(make_event(Some(1), fresh), 100, 100);
        rings.purge_old(100);
        assert_eq!(rings.global.len(), 1);
        assert_eq!(rings.by_pid.get(&1).unwrap().len(), 1);
    }

    #[test]
    fn pidless_events_are_not_tracked_per_pid() {
        let mut rings = Rings::new();
        rings.insert(make_event(None, clock::now()), 10, 10);
        assert_eq!(rings.global.len(), 1);
        assert!(rings.by_pid.is_empty());
    }

    #[test]
    fn retention_empties_rings_after_idle_period() {
        let mut rings = Rings::new();
        let last_event_ts = clock::now() - chrono::Duration::seconds(101);
        let base = last_event_ts - chrono::Duration::milliseconds(15_000 * 10);
        for i in 0..15_000u32 {
            let ts = base + chrono::Duration::milliseconds(i as i64 * 10);
            rings.insert(make_event(Some((i % 5) as i64), ts), 20_000, 20_000);
        }
        rings.purge_old(100);
        assert!(rings.global.is_empty());
        assert!(rings.by_pid.is_empty());
        assert!(aggregators::aggregate_network_usage(
            &rings.global.iter().cloned().collect::<Vec<_>>()
        )
        .is_empty());
    }
}
