//! Stateless PID ranker: scores candidate PIDs from a spike's event
//! snapshot plus host metrics, blending robust z-anomaly, Mahalanobis
//! distance, energy contribution and lead/lag correlation into a single
//! `final_score` in `[0, 1]`.

use crate::event::Event;
use nalgebra::DMatrix;
use serde::Serialize;
use std::collections::HashMap;

const TOP_K: usize = 15;
const MAX_LAG: i64 = 5;
const MAHALANOBIS_RIDGE: f64 = 1e-3;

#[derive(Debug, Clone, Serialize)]
pub struct RankedCandidate {
    pub pid: i64,
    pub name: String,
    pub cmdline: String,
    pub cpu_pct: f64,
    pub ram_pct: f64,
    pub event_rate: f64,
    pub thread_rate: f64,
    pub cpu_samples: f64,
    pub page_faults: f64,
    pub gc_events: f64,
    pub net_bytes: f64,
    pub disk_bytes: f64,
    pub z_anomaly: f64,
    pub mahalanobis: f64,
    pub anomaly_score: f64,
    pub energy_score: f64,
    pub correlation_score: f64,
    pub final_score: f64,
}

/// What the ranker needs from the OS process-introspection facility for a
/// given PID. Implementors return defaults (`"Unknown"`, `""`, `0.0`, `0.0`)
/// on lookup failure; the ranker never blocks on this.
pub trait ProcessInfoSource {
    fn lookup(&self, pid: i64) -> (String, String, f64, f64);
}

struct Row {
    pid: i64,
    name: String,
    cmdline: String,
    cpu_pct: f64,
    ram_pct: f64,
    event_rate: f64,
    thread_rate: f64,
    cpu_samples: f64,
    page_faults: f64,
    gc_events: f64,
    net_bytes: f64,
    disk_bytes: f64,
    net_bytes_log: f64,
    disk_bytes_log: f64,
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn robust_z(val: f64, med: f64, mad: f64) -> f64 {
    (val - med).abs() / mad.max(0.01)
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let norm_a = a.iter().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (norm_a * norm_b)
}

/// Robust-ish Mahalanobis distance: median-centered, ridge-regularized
/// pseudo-inverse covariance. Zero for every row when fewer than 2 samples.
fn mahalanobis_scores(rows: &[Vec<f64>]) -> Vec<f64> {
    let n = rows.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let dim = rows[0].len();

    let centers: Vec<f64> = (0..dim)
        .map(|j| median(&rows.iter().map(|r| r[j]).collect::<Vec<_>>()))
        .collect();

    let centered: Vec<Vec<f64>> = rows
        .iter()
        .map(|r| r.iter().zip(&centers).map(|(v, c)| v - c).collect())
        .collect();

    let x = DMatrix::from_fn(n, dim, |i, j| centered[i][j]);

    // Sample covariance (ddof=1, matching numpy.cov default).
    let mean_row = x.row_mean();
    let xc = &x - DMatrix::from_fn(n, dim, |_, j| mean_row[j]);
    let mut cov = (xc.transpose() * &xc) / ((n - 1).max(1) as f64);
    for i in 0..dim {
        cov[(i, i)] += MAHALANOBIS_RIDGE;
    }

    let cov_inv = cov.pseudo_inverse(1e-10).unwrap_or_else(|_| DMatrix::zeros(dim, dim));

    centered
        .iter()
        .map(|row| {
            let v = DMatrix::from_row_slice(1, dim, row);
            let m2 = (&v * &cov_inv * v.transpose())[(0, 0)];
            m2.max(0.0).sqrt()
        })
        .collect()
}

fn lead_lag_score(global_series: Option<&[f64]>, pid_series: Option<&[f64]>) -> f64 {
    let (g, p) = match (global_series, pid_series) {
        (Some(g), Some(p)) => (g, p),
        _ => return 0.0,
    };

    let n = g.len().min(p.len());
    if n < 4 {
        return 0.0;
    }
    let g = &g[..n];
    let p = &p[..n];

    let g_mean = g.iter().sum::<f64>() / n as f64;
    let p_mean = p.iter().sum::<f64>() / n as f64;
    let g: Vec<f64> = g.iter().map(|v| v - g_mean).collect();
    let p: Vec<f64> = p.iter().map(|v| v - p_mean).collect();

    let norm = |v: &[f64]| v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm(&g) == 0.0 || norm(&p) == 0.0 {
        return 0.0;
    }

    let mut best_corr = 0.0f64;
    let mut best_lag = 0i64;

    for lag in -MAX_LAG..=MAX_LAG {
        let (g_seg, p_seg): (&[f64], &[f64]) = if lag < 0 {
            let shift = (-lag) as usize;
            (&g[shift..], &p[..n - shift])
        } else if lag > 0 {
            let shift = lag as usize;
            (&g[..n - shift], &p[shift..])
        } else {
            (&g[..], &p[..])
        };

        if g_seg.len() < 3 {
            continue;
        }

        let num: f64 = g_seg.iter().zip(p_seg).map(|(a, b)| a * b).sum();
        let den = norm(g_seg) * norm(p_seg);
        if den == 0.0 {
            continue;
        }
        let corr = num / den;
        if corr > best_corr {
            best_corr = corr;
            best_lag = lag;
        }
    }

    if best_corr <= 0.0 {
        return 0.0;
    }

    let lag_factor = if best_lag < 0 {
        1.0
    } else if best_lag == 0 {
        0.8
    } else {
        0.5
    };

    (best_corr * lag_factor).clamp(0.0, 1.0)
}

fn normalize(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return vec![0.0];
    }
    let max_v = values.iter().cloned().fold(f64::MIN, f64::max);
    if max_v <= 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| v / max_v).collect()
}

/// Rank candidate PIDs from a spike's event snapshot. `global_cpu_series`
/// and `pid_cpu_series` are optional time series for the lead/lag
/// correlation term; absent series simply score zero correlation there.
pub fn rank_pids(
    events: &[Event],
    spike_cpu: f64,
    spike_ram: f64,
    process_info: &dyn ProcessInfoSource,
    global_cpu_series: Option<&[f64]>,
    pid_cpu_series: Option<&HashMap<i64, Vec<f64>>>,
) -> Vec<RankedCandidate> {
    let mut buckets: HashMap<i64, Vec<&Event>> = HashMap::new();
    for e in events {
        if let Some(pid) = e.pid {
            buckets.entry(pid).or_default().push(e);
        }
    }

    if buckets.is_empty() {
        return Vec::new();
    }

    let mut total_disk_bytes = 0.0;
    let mut total_net_bytes = 0.0;
    let mut rows: Vec<Row> = Vec::new();

    for (pid, bucket) in &buckets {
        let (name, cmdline, cpu_pct, ram_pct) = process_info.lookup(*pid);

        let event_rate = bucket.len() as f64;
        let thread_rate = bucket
            .iter()
            .filter(|e| e.event_type.to_lowercase().contains("thread"))
            .count() as f64;
        let cpu_samples = bucket.iter().filter(|e| e.task.contains("Profile")).count() as f64;
        let page_faults = bucket.iter().filter(|e| e.task == "Memory").count() as f64;
        let gc_events = bucket
            .iter()
            .filter(|e| e.event_name.contains("GC"))
            .count() as f64;
        let net_bytes: f64 = bucket.iter().filter_map(|e| e.net_bytes).sum();
        let disk_bytes: f64 = bucket.iter().filter_map(|e| e.disk_bytes).sum();

        total_disk_bytes += disk_bytes;
        total_net_bytes += net_bytes;

        rows.push(Row {
            pid: *pid,
            name,
            cmdline,
            cpu_pct,
            ram_pct,
            event_rate,
            thread_rate,
            cpu_samples,
            page_faults,
            gc_events,
            net_bytes,
            disk_bytes,
            net_bytes_log: (1.0 + net_bytes).ln(),
            disk_bytes_log: (1.0 + disk_bytes).ln(),
        });
    }

    // Robust z-anomaly over the shared feature set.
    let feature = |r: &Row, idx: usize| -> f64 {
        match idx {
            0 => r.ram_pct,
            1 => r.event_rate,
            2 => r.thread_rate,
            3 => r.cpu_samples,
            4 => r.page_faults,
            5 => r.gc_events,
            6 => r.net_bytes_log,
            _ => r.disk_bytes_log,
        }
    };
    const Z_FEATURES: usize = 8;
    let mut stats = [(0.0, 0.0); Z_FEATURES];
    for (idx, stat) in stats.iter_mut().enumerate() {
        let vals: Vec<f64> = rows.iter().map(|r| feature(r, idx)).collect();
        let med = median(&vals);
        let mad = median(&vals.iter().map(|v| (v - med).abs()).collect::<Vec<_>>());
        *stat = (med, mad);
    }

    let z_anomaly_raws: Vec<f64> = rows
        .iter()
        .map(|r| {
            (0..Z_FEATURES)
                .map(|idx| {
                    let (med, mad) = stats[idx];
                    robust_z(feature(r, idx), med, mad)
                })
                .sum::<f64>()
                / Z_FEATURES as f64
        })
        .collect();

    let mahal_matrix: Vec<Vec<f64>> = rows
        .iter()
        .map(|r| {
            vec![
                r.cpu_pct,
                r.ram_pct,
                r.event_rate,
                r.thread_rate,
                r.cpu_samples,
                r.page_faults,
                r.gc_events,
                r.net_bytes_log,
                r.disk_bytes_log,
            ]
        })
        .collect();
    let mahal_raws = mahalanobis_scores(&mahal_matrix);

    let denom_cpu = spike_cpu.max(1.0);
    let denom_ram = spike_ram.max(1.0);
    let denom_disk = total_disk_bytes.max(1.0);
    let denom_net = total_net_bytes.max(1.0);

    let energy_raws: Vec<f64> = rows
        .iter()
        .map(|r| {
            let cpu_c = (r.cpu_pct / denom_cpu).clamp(0.0, 1.5);
            let ram_c = (r.ram_pct / denom_ram).clamp(0.0, 1.5);
            let disk_c = (r.disk_bytes / denom_disk).clamp(0.0, 1.5);
            let net_c = (r.net_bytes / denom_net).clamp(0.0, 1.5);
            0.40 * cpu_c + 0.30 * ram_c + 0.15 * disk_c + 0.15 * net_c
        })
        .collect();

    let corr_raws: Vec<f64> = rows
        .iter()
        .map(|r| {
            let pid_vec = [
                r.cpu_pct,
                r.ram_pct,
                r.event_rate,
                r.thread_rate,
                r.cpu_samples,
                r.page_faults,
                r.gc_events,
                r.net_bytes_log,
                r.disk_bytes_log,
            ];
            let spike_vec = [spike_cpu, spike_ram, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
            let cosine = cosine_similarity(&pid_vec, &spike_vec);

            let pid_series = pid_cpu_series.and_then(|m| m.get(&r.pid)).map(|v| v.as_slice());
            let lead_lag = lead_lag_score(global_cpu_series, pid_series);

            0.7 * cosine + 0.3 * lead_lag
        })
        .collect();

    let z_norms = normalize(&z_anomaly_raws);
    let mahal_norms = normalize(&mahal_raws);
    let energy_norms = normalize(&energy_raws);
    let corr_norms = normalize(&corr_raws);

    let anomaly_norms: Vec<f64> = z_norms
        .iter()
        .zip(&mahal_norms)
        .map(|(z, m)| 0.5 * z + 0.5 * m)
        .collect();

    let severity_boost = if spike_cpu > 85.0 || spike_ram > 80.0 {
        1.25
    } else {
        1.0
    };

    let final_raws: Vec<f64> = anomaly_norms
        .iter()
        .zip(&energy_norms)
        .zip(&corr_norms)
        .map(|((a, e), c)| severity_boost * (0.4 * a + 0.4 * e + 0.2 * c))
        .collect();

    let max_final = final_raws.iter().cloned().fold(f64::MIN, f64::max);
    let max_final = if max_final <= 0.0 { 1.0 } else { max_final };

    let mut ranked: Vec<RankedCandidate> = rows
        .into_iter()
        .enumerate()
        .map(|(i, r)| RankedCandidate {
            pid: r.pid,
            name: r.name,
            cmdline: r.cmdline,
            cpu_pct: r.cpu_pct,
            ram_pct: r.ram_pct,
            event_rate: r.event_rate,
            thread_rate: r.thread_rate,
            cpu_samples: r.cpu_samples,
            page_faults: r.page_faults,
            gc_events: r.gc_events,
            net_bytes: r.net_bytes,
            disk_bytes: r.disk_bytes,
            z_anomaly: z_anomaly_raws[i],
            mahalanobis: mahal_raws[i],
            anomaly_score: anomaly_norms[i],
            energy_score: energy_norms[i],
            correlation_score: corr_norms[i],
            final_score: (final_raws[i] / max_final).min(1.0),
        })
        .collect();

    ranked.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap());
    ranked.truncate(TOP_K);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;
    use serde_json::Map;

    struct NoOpProcessInfo;
    impl ProcessInfoSource for NoOpProcessInfo {
        fn lookup(&self, _pid: i64) -> (String, String, f64, f64) {
            ("Unknown".into(), "".into(), 0.0, 0.0)
        }
    }

    struct FixedProcessInfo(HashMap<i64, (f64, f64)>);
    impl ProcessInfoSource for FixedProcessInfo {
        fn lookup(&self, pid: i64) -> (String, String, f64, f64) {
            let (cpu, ram) = self.0.get(&pid).copied().unwrap_or((0.0, 0.0));
            (format!("proc-{pid}"), String::new(), cpu, ram)
        }
    }

    fn ev(pid: i64, event_type: &str, net_bytes: Option<f64>) -> Event {
        Event {
            ts: clock::now(),
            pid: Some(pid),
            tid: None,
            provider: "unknown".into(),
            event_type: event_type.into(),
            event_name: "unknown".into(),
            task: String::new(),
            payload: Map::new(),
            net_bytes,
            disk_bytes: None,
        }
    }

    #[test]
    fn empty_snapshot_returns_empty() {
        let ranked = rank_pids(&[], 90.0, 70.0, &NoOpProcessInfo, None, None);
        assert!(ranked.is_empty());
    }

    #[test]
    fn single_pid_has_zero_mahalanobis_and_nonzero_energy() {
        let events = vec![ev(1, "x", Some(1000.0)); 5];
        let mut info = HashMap::new();
        info.insert(1, (50.0, 10.0));
        let ranked = rank_pids(&events, 90.0, 70.0, &FixedProcessInfo(info), None, None);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].mahalanobis, 0.0);
        assert!(ranked[0].final_score > 0.0);
        assert_eq!(ranked[0].final_score, 1.0);
    }

    #[test]
    fn top_candidate_ranks_first_and_all_scores_bounded() {
        let mut events = Vec::new();
        events.extend((0..100).map(|_| ev(1, "x", Some(1e7 / 100.0))));
        events.extend((0..10).map(|_| ev(2, "x", None)));
        events.extend((0..5).map(|_| ev(3, "x", None)));

        let mut info = HashMap::new();
        info.insert(1, (80.0, 20.0));
        info.insert(2, (5.0, 2.0));
        info.insert(3, (2.0, 1.0));

        let ranked = rank_pids(&events, 90.0, 70.0, &FixedProcessInfo(info), None, None);
        assert_eq!(ranked[0].pid, 1);
        assert_eq!(ranked[0].final_score, 1.0);
        for r in &ranked {
            assert!(r.final_score >= 0.0 && r.final_score <= 1.0);
        }
        assert!(ranked[0].final_score >= ranked[1].final_score);
        assert!(ranked[1].final_score >= ranked[2].final_score);
    }

    #[test]
    fn truncates_to_top_k() {
        let mut events = Vec::new();
        for pid in 0..20 {
            events.push(ev(pid, "x", None));
        }
        let ranked = rank_pids(&events, 90.0, 70.0, &NoOpProcessInfo, None, None);
        assert_eq!(ranked.len(), TOP_K);
    }
}
