//! CPU/RAM spike detector: rolling baseline, z-score and derivative
//! candidates, sustained confirmation buffer, cooldown.

use crate::clock::{self, Instant};
use crate::config::DetectorConfig;
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetrySample {
    pub ts: Instant,
    pub cpu: f64,
    pub ram: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpikeInfo {
    pub start_time: Instant,
    pub confirm_time: Instant,
    pub spike_type: String,
    pub severity_score: f64,
    pub cpu_at_confirm: f64,
    pub ram_at_confirm: f64,
}

pub struct SpikeDetector {
    window: VecDeque<TelemetrySample>,
    window_capacity: usize,
    last_cpu_tail: VecDeque<f64>,
    confirm_buffer: VecDeque<bool>,
    confirm_capacity: usize,
    z_score: f64,
    derivative_threshold: f64,
    derivative_len: usize,
    cpu_threshold: f64,
    ram_threshold: f64,
    cooldown: chrono::Duration,
    last_fire: Option<Instant>,
}

impl SpikeDetector {
    pub fn new(cfg: &DetectorConfig) -> Self {
        let window_capacity =
            (cfg.baseline_window_seconds / cfg.sample_interval_seconds.max(1)) as usize;
        let confirm_capacity =
            (cfg.confirm_seconds / cfg.sample_interval_seconds.max(1)) as usize;

        Self {
            window: VecDeque::with_capacity(window_capacity),
            window_capacity: window_capacity.max(1),
            last_cpu_tail: VecDeque::with_capacity(cfg.derivative_len + 2),
            confirm_buffer: VecDeque::with_capacity(confirm_capacity),
            confirm_capacity: confirm_capacity.max(1),
            z_score: cfg.z_score,
            derivative_threshold: cfg.derivative_threshold,
            derivative_len: cfg.derivative_len,
            cpu_threshold: cfg.cpu_threshold,
            ram_threshold: cfg.ram_threshold,
            cooldown: chrono::Duration::seconds(cfg.cooldown_seconds as i64),
            last_fire: None,
        }
    }

    pub fn add_sample(&mut self, sample: TelemetrySample) {
        self.window.push_back(sample);
        if self.window.len() > self.window_capacity {
            self.window.pop_front();
        }

        self.last_cpu_tail.push_back(sample.cpu);
        if self.last_cpu_tail.len() > self.derivative_len + 2 {
            self.last_cpu_tail.pop_front();
        }

        let over = sample.cpu >= self.cpu_threshold || sample.ram >= self.ram_threshold;
        self.confirm_buffer.push_back(over);
        if self.confirm_buffer.len() > self.confirm_capacity {
            self.confirm_buffer.pop_front();
        }
    }

    fn cooldown_passed(&self) -> bool {
        match self.last_fire {
            None => true,
            Some(t) => clock::now() - t > self.cooldown,
        }
    }

    fn mu_sigma(&self, cpu: bool) -> Option<(f64, f64)> {
        if self.window.len() < 10 {
            return None;
        }
        let vals: Vec<f64> = self
            .window
            .iter()
            .map(|s| if cpu { s.cpu } else { s.ram })
            .collect();
        let n = vals.len() as f64;
        let mu = vals.iter().sum::<f64>() / n;
        let var = vals.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / n;
        Some((mu, var.sqrt()))
    }

    fn candidate_zscore(&self, cpu: bool) -> Option<TelemetrySample> {
        let (mu, sigma) = self.mu_sigma(cpu)?;
        if sigma <= 0.001 {
            return None;
        }
        let threshold = mu + self.z_score * sigma;
        self.window
            .iter()
            .rev()
            .find(|s| (if cpu { s.cpu } else { s.ram }) >= threshold)
            .copied()
    }

    fn candidate_derivative(&self) -> Option<TelemetrySample> {
        let lv: Vec<f64> = self.last_cpu_tail.iter().copied().collect();
        if lv.len() < self.derivative_len + 1 {
            return None;
        }
        let deltas: Vec<f64> = (1..lv.len()).map(|i| lv[i] - lv[i - 1]).collect();
        let tail = &deltas[deltas.len() - self.derivative_len..];
        let avg_slope = tail.iter().sum::<f64>() / tail.len() as f64;

        if avg_slope > self.derivative_threshold {
            let start_value = lv[lv.len() - (self.derivative_len + 1)];
            return self
                .window
                .iter()
                .rev()
                .find(|s| s.cpu >= start_value)
                .copied();
        }
        None
    }

    /// Evaluate the current window. Returns `(true, Some(info))` on a
    /// confirmed, non-cooldown spike; `(false, None)` otherwise.
    pub fn check(&mut self) -> (bool, Option<SpikeInfo>) {
        if self.window.is_empty() || !self.cooldown_passed() {
            return (false, None);
        }

        let cand_cpu = self.candidate_zscore(true);
        let cand_ram = self.candidate_zscore(false);
        let cand_deriv = cand_cpu.or_else(|| self.candidate_derivative());
        let candidate = cand_cpu.or(cand_ram).or(cand_deriv);

        let confirmed = candidate.is_some()
            && self.confirm_buffer.len() == self.confirm_capacity
            && self.confirm_buffer.iter().all(|&v| v);

        if !confirmed {
            return (false, None);
        }

        let latest = *self.window.back().unwrap();
        let spike_type = if latest.cpu >= self.cpu_threshold && latest.ram >= self.ram_threshold {
            "mixed"
        } else if latest.cpu >= self.cpu_threshold {
            "cpu"
        } else {
            "ram"
        };

        let severity = ((latest.cpu - self.cpu_threshold) + (latest.ram - self.ram_threshold))
            .max(0.0);

        let confirm_time = clock::now();
        self.last_fire = Some(confirm_time);
        self.confirm_buffer.clear();

        let info = SpikeInfo {
            start_time: candidate.unwrap().ts,
            confirm_time,
            spike_type: spike_type.to_string(),
            severity_score: severity,
            cpu_at_confirm: latest.cpu,
            ram_at_confirm: latest.ram,
        };

        (true, Some(info))
    }
}
