//! Telemetry sampler: reads host-wide CPU and RAM utilization at the
//! configured interval. Any sampling failure degrades to `0.0` rather than
//! propagating — a single bad read should never stop the detector loop.

use crate::ranker::ProcessInfoSource;
use serde::Serialize;
use sysinfo::System;

pub struct TelemetrySampler {
    sys: System,
}

impl TelemetrySampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self { sys }
    }

    /// `(cpu_pct, ram_pct)` host-wide averages, `0.0` on any failure to read.
    pub fn sample(&mut self) -> (f64, f64) {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        let cpus = self.sys.cpus();
        let cpu_pct = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / cpus.len() as f64
        };

        let total = self.sys.total_memory();
        let ram_pct = if total == 0 {
            0.0
        } else {
            (self.sys.used_memory() as f64 / total as f64) * 100.0
        };

        (cpu_pct, ram_pct)
    }
}

impl Default for TelemetrySampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-PID process lookups for the ranker, backed by a freshly refreshed
/// `sysinfo::System`. Unknown or vanished PIDs fall back to defaults rather
/// than erroring — a process can exit between being observed in an event
/// and being looked up here.
pub struct SysinfoProcessSource {
    sys: System,
}

impl SysinfoProcessSource {
    pub fn refresh() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();
        Self { sys }
    }
}

impl ProcessInfoSource for SysinfoProcessSource {
    fn lookup(&self, pid: i64) -> (String, String, f64, f64) {
        let Ok(raw_pid) = u32::try_from(pid) else {
            return ("Unknown".to_string(), String::new(), 0.0, 0.0);
        };
        match self.sys.process(sysinfo::Pid::from_u32(raw_pid)) {
            Some(proc_) => {
                let name = proc_.name().to_string_lossy().to_string();
                let cmdline = proc_
                    .cmd()
                    .iter()
                    .map(|s| s.to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                let cpu_pct = proc_.cpu_usage() as f64;
                let ram_pct = if self.sys.total_memory() == 0 {
                    0.0
                } else {
                    (proc_.memory() as f64 / self.sys.total_memory() as f64) * 100.0
                };
                (name, cmdline, cpu_pct, ram_pct)
            }
            None => ("Unknown".to_string(), String::new(), 0.0, 0.0),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub pid: i64,
    pub name: String,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub cmdline: String,
}

/// Live OS process snapshot, independent of the tracer's event stream —
/// the manual-inspection view when the ranker hasn't fired on anything.
/// Sorted descending by CPU%, truncated to `top_n`.
pub fn current_top_processes(top_n: usize) -> Vec<ProcessSnapshot> {
    let mut sys = System::new_all();
    sys.refresh_all();
    let total_mem = sys.total_memory();

    let mut snapshots: Vec<ProcessSnapshot> = sys
        .processes()
        .iter()
        .map(|(pid, proc_)| ProcessSnapshot {
            pid: pid.as_u32() as i64,
            name: proc_.name().to_string_lossy().to_string(),
            cpu_percent: proc_.cpu_usage() as f64,
            mem_percent: if total_mem == 0 {
                0.0
            } else {
                (proc_.memory() as f64 / total_mem as f64) * 100.0
            },
            cmdline: proc_
                .cmd()
                .iter()
                .map(|s| s.to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join(" "),
        })
        .collect();

    snapshots.sort_by(|a, b| b.cpu_percent.partial_cmp(&a.cpu_percent).unwrap());
    snapshots.truncate(top_n);
    snapshots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_returns_bounded_percentages() {
        let mut sampler = TelemetrySampler::new();
        let (cpu, ram) = sampler.sample();
        assert!(cpu >= 0.0);
        assert!((0.0..=100.0).contains(&ram) || ram == 0.0);
    }

    #[test]
    fn current_top_processes_is_capped_and_sorted() {
        let snapshots = current_top_processes(5);
        assert!(snapshots.len() <= 5);
        for pair in snapshots.windows(2) {
            assert!(pair[0].cpu_percent >= pair[1].cpu_percent);
        }
    }
}
