//! Root-cause-analysis client: builds the evidence payload for a confirmed
//! spike, calls the configured reasoning endpoint with retry/backoff, and
//! normalizes (or falls back on) its response against the fixed function-call
//! schema. The fallback is unconditional — callers never have to handle
//! "no RCA available".

use crate::aggregators::CpuContention;
use crate::config::ReasonerConfig;
use crate::detector::SpikeInfo;
use crate::ranker::RankedCandidate;
use log::warn;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::collections::HashMap;

const TOP_MAP_ENTRIES: usize = 10;
const TOP_RANKED_ROWS: usize = 15;

/// Function-call schema the reasoning endpoint is constrained to, matching
/// spec.md §6's RCA schema field-for-field. Sent alongside the evidence
/// payload as part of the request.
static RCA_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "name": "report_root_cause",
        "description": "Report the root cause of a confirmed CPU/RAM spike.",
        "parameters": {
            "type": "object",
            "properties": {
                "cause_summary": {"type": "string"},
                "confidence": {"type": "number"},
                "spike_type": {"type": "string"},
                "severity_score": {"type": "number"},
                "resource_impact": {
                    "type": "object",
                    "properties": {
                        "cpu_spike_percent": {"type": "number"},
                        "ram_spike_percent": {"type": "number"},
                    },
                },
                "culprit_process": {
                    "type": "object",
                    "properties": {
                        "pid": {"type": "integer"},
                        "name": {"type": "string"},
                        "cmdline": {"type": "string"},
                        "cpu_pct": {"type": "number"},
                        "ram_pct": {"type": "number"},
                    },
                },
                "ranked_suspects": {"type": "array"},
                "timeline": {"type": "array"},
                "recs": {"type": "array", "items": {"type": "string"}},
            },
            "required": ["cause_summary", "confidence", "spike_type", "severity_score", "recs"],
        },
    })
});

pub struct RcaClient {
    cfg: ReasonerConfig,
    http: reqwest::Client,
}

/// Evidence handed to the reasoning endpoint: the spike itself, the ranked
/// candidate table, and the aggregator summaries gathered at confirm time.
pub struct Evidence<'a> {
    pub spike: &'a SpikeInfo,
    pub ranked: &'a [RankedCandidate],
    pub cpu_contention: CpuContention,
    pub gc_event_count: usize,
    pub page_fault_count: usize,
    pub network_usage: &'a [(i64, f64)],
    pub disk_usage: &'a [(i64, f64)],
    pub thread_spikes: &'a [(i64, u64)],
}

fn truncate_map(pairs: &[(i64, f64)]) -> HashMap<String, f64> {
    pairs
        .iter()
        .take(TOP_MAP_ENTRIES)
        .map(|(pid, v)| (pid.to_string(), *v))
        .collect()
}

fn truncate_thread_map(pairs: &[(i64, u64)]) -> HashMap<String, u64> {
    pairs
        .iter()
        .take(TOP_MAP_ENTRIES)
        .map(|(pid, v)| (pid.to_string(), *v))
        .collect()
}

/// A one-line, human-readable row for the ranked-candidate table embedded
/// in the evidence prompt, mirroring the original's numbered-list format.
fn render_ranked_row(rank: usize, c: &RankedCandidate) -> String {
    format!(
        "{}. pid={} name={} score={:.3} cpu={:.1}% ram={:.1}% events={} threads={} net={:.0} disk={:.0}",
        rank + 1,
        c.pid,
        c.name,
        c.final_score,
        c.cpu_pct,
        c.ram_pct,
        c.event_rate,
        c.thread_rate,
        c.net_bytes,
        c.disk_bytes
    )
}

fn build_payload(evidence: &Evidence) -> Value {
    let ranked_table: Vec<Value> = evidence
        .ranked
        .iter()
        .take(TOP_RANKED_ROWS)
        .map(|c| {
            json!({
                "pid": c.pid,
                "name": c.name,
                "cpu_pct": c.cpu_pct,
                "ram_pct": c.ram_pct,
                "final_score": c.final_score,
            })
        })
        .collect();

    let ranked_rows_text: Vec<String> = evidence
        .ranked
        .iter()
        .take(TOP_RANKED_ROWS)
        .enumerate()
        .map(|(i, c)| render_ranked_row(i, c))
        .collect();

    json!({
        "schema": RCA_SCHEMA.clone(),
        "spike": {
            "spike_type": evidence.spike.spike_type,
            "severity_score": evidence.spike.severity_score,
            "cpu_at_confirm": evidence.spike.cpu_at_confirm,
            "ram_at_confirm": evidence.spike.ram_at_confirm,
            "start_time": evidence.spike.start_time.to_rfc3339(),
            "confirm_time": evidence.spike.confirm_time.to_rfc3339(),
        },
        "ranked_candidates": ranked_table,
        "ranked_candidates_text": ranked_rows_text,
        "cpu_contention": {
            "context_switch_rate": evidence.cpu_contention.context_switch_rate,
            "burst_detected": evidence.cpu_contention.burst_detected,
        },
        "gc_event_count": evidence.gc_event_count,
        "page_fault_count": evidence.page_fault_count,
        "network_usage_by_pid": truncate_map(evidence.network_usage),
        "disk_usage_by_pid": truncate_map(evidence.disk_usage),
        "thread_spikes_by_pid": truncate_thread_map(evidence.thread_spikes),
    })
}

fn fallback_rca(spike: &SpikeInfo) -> Value {
    json!({
        "cause_summary": "Root-cause analysis was unavailable; this is a generic fallback assessment.",
        "confidence": 0.40,
        "spike_type": spike.spike_type,
        "severity_score": 0.25,
        "resource_impact": {
            "cpu_spike_percent": spike.cpu_at_confirm,
            "ram_spike_percent": spike.ram_at_confirm,
        },
        "culprit_process": {
            "pid": null,
            "name": "unknown",
            "cmdline": "",
            "cpu_pct": 0.0,
            "ram_pct": 0.0,
        },
        "ranked_suspects": [],
        "timeline": [],
        "recs": [
            "Inspect the top-ranked processes manually for abnormal CPU or memory usage.",
            "Check recent deployments or configuration changes around the spike window.",
            "Re-run analysis once the reasoning service is reachable.",
        ],
        "fallback": true,
    })
}

/// Substituted in full when the model's own `recs` is absent, not a list, or
/// has fewer than three entries — distinct from `fallback_rca`'s own list,
/// which covers the transport/parse-failure case rather than a malformed
/// model response.
fn default_recs() -> Vec<String> {
    vec![
        "Investigate memory usage of top-ranked processes.".to_string(),
        "Apply resource limits or scheduling constraints.".to_string(),
        "Improve alert-response workflows.".to_string(),
    ]
}

fn normalize_response(mut value: Value, spike: &SpikeInfo) -> Value {
    let obj = match value.as_object_mut() {
        Some(o) => o,
        None => return fallback_rca(spike),
    };

    let confidence = obj
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.40)
        .clamp(0.40, 0.95);
    obj.insert("confidence".into(), json!(confidence));

    let ram_spike_percent = obj
        .get("resource_impact")
        .and_then(|r| r.get("ram_spike_percent"))
        .and_then(Value::as_f64)
        .unwrap_or(spike.ram_at_confirm);

    let floor = if ram_spike_percent > 70.0 {
        0.8
    } else if ram_spike_percent > 50.0 {
        0.5
    } else {
        0.25
    };
    let severity_score = obj
        .get("severity_score")
        .and_then(Value::as_f64)
        .unwrap_or(floor)
        .max(floor);
    obj.insert("severity_score".into(), json!(severity_score));

    let recs: Vec<String> = obj
        .get("recs")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect::<Vec<_>>()
        })
        .filter(|recs| recs.len() >= 3)
        .unwrap_or_else(default_recs);
    obj.insert("recs".into(), json!(recs));
    obj.entry("fallback").or_insert(json!(false));

    value
}

impl RcaClient {
    pub fn new(cfg: ReasonerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            cfg,
        }
    }

    /// Analyze a confirmed spike. Always returns a usable RCA value — on
    /// repeated transport/parse failure this is the guaranteed fallback,
    /// never an error the caller has to special-case.
    pub async fn analyze(&self, evidence: Evidence<'_>) -> Value {
        let payload = build_payload(&evidence);
        let url = format!("{}/{}:generateContent", self.cfg.endpoint, self.cfg.model);

        for attempt in 1..=self.cfg.max_retries {
            match self.http.post(&url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                    Ok(body) => return normalize_response(body, evidence.spike),
                    Err(e) => warn!("rca response parse failed (attempt {attempt}): {e}"),
                },
                Ok(resp) => warn!("rca endpoint returned {} (attempt {attempt})", resp.status()),
                Err(e) => warn!("rca request failed (attempt {attempt}): {e}"),
            }

            if attempt < self.cfg.max_retries {
                let delay = self.cfg.base_delay_seconds * 2f64.powi((attempt - 1) as i32);
                tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
            }
        }

        warn!("rca analysis exhausted all retries; returning fallback assessment");
        fallback_rca(evidence.spike)
    }
}
