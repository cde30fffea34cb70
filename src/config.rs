//! Configuration loading. File path can be overridden with `--config` or the
//! `SPIKEWATCH_CONFIG` environment variable; a missing or unparseable file
//! falls back to built-in defaults rather than failing startup.

use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "/etc/spikewatch/spikewatch.toml";
const ENV_CONFIG_PATH: &str = "SPIKEWATCH_CONFIG";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub reasoner: ReasonerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    pub fn load(path_override: Option<PathBuf>) -> Self {
        let path = path_override.unwrap_or_else(|| {
            std::env::var(ENV_CONFIG_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
        });

        match fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => Config::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    #[serde(default = "default_tracer_path")]
    pub tracer_path: String,
    #[serde(default = "default_retention_seconds")]
    pub retention_seconds: i64,
    #[serde(default = "default_global_ring_capacity")]
    pub global_ring_capacity: usize,
    #[serde(default = "default_per_pid_ring_capacity")]
    pub per_pid_ring_capacity: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            tracer_path: default_tracer_path(),
            retention_seconds: default_retention_seconds(),
            global_ring_capacity: default_global_ring_capacity(),
            per_pid_ring_capacity: default_per_pid_ring_capacity(),
        }
    }
}

fn default_tracer_path() -> String {
    "./tracer/bin/kernel-tracer".to_string()
}
fn default_retention_seconds() -> i64 {
    100
}
fn default_global_ring_capacity() -> usize {
    10_000
}
fn default_per_pid_ring_capacity() -> usize {
    2_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_baseline_window")]
    pub baseline_window_seconds: u64,
    #[serde(default = "default_sample_interval")]
    pub sample_interval_seconds: u64,
    #[serde(default = "default_z_score")]
    pub z_score: f64,
    #[serde(default = "default_derivative_threshold")]
    pub derivative_threshold: f64,
    #[serde(default = "default_derivative_len")]
    pub derivative_len: usize,
    #[serde(default = "default_confirm_seconds")]
    pub confirm_seconds: u64,
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,
    #[serde(default = "default_ram_threshold")]
    pub ram_threshold: f64,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            baseline_window_seconds: default_baseline_window(),
            sample_interval_seconds: default_sample_interval(),
            z_score: default_z_score(),
            derivative_threshold: default_derivative_threshold(),
            derivative_len: default_derivative_len(),
            confirm_seconds: default_confirm_seconds(),
            cpu_threshold: default_cpu_threshold(),
            ram_threshold: default_ram_threshold(),
            cooldown_seconds: default_cooldown_seconds(),
        }
    }
}

fn default_baseline_window() -> u64 {
    300
}
fn default_sample_interval() -> u64 {
    1
}
fn default_z_score() -> f64 {
    2.5
}
fn default_derivative_threshold() -> f64 {
    5.0
}
fn default_derivative_len() -> usize {
    3
}
fn default_confirm_seconds() -> u64 {
    20
}
fn default_cpu_threshold() -> f64 {
    75.0
}
fn default_ram_threshold() -> f64 {
    80.0
}
fn default_cooldown_seconds() -> u64 {
    45
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReasonerConfig {
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_seconds")]
    pub base_delay_seconds: f64,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            model: std::env::var("GEMINI_MODEL").unwrap_or_else(|_| default_gemini_model()),
            endpoint: default_endpoint(),
            max_retries: default_max_retries(),
            base_delay_seconds: default_base_delay_seconds(),
        }
    }
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta/models".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_seconds() -> f64 {
    2.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load(Some(PathBuf::from("/nonexistent/path.toml")));
        assert_eq!(cfg.detector.cpu_threshold, 75.0);
        assert_eq!(cfg.collector.retention_seconds, 100);
    }

    #[test]
    fn unparseable_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        write!(file, "not = [valid toml").unwrap();
        let cfg = Config::load(Some(file.path().to_path_buf()));
        assert_eq!(cfg.detector.cpu_threshold, 75.0);
    }

    #[test]
    fn valid_file_overrides_only_the_fields_it_sets() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        write!(
            file,
            r#"
            [detector]
            cpu_threshold = 88.0

            [collector]
            tracer_path = "/opt/tracer/bin/run"
            "#
        )
        .unwrap();
        let cfg = Config::load(Some(file.path().to_path_buf()));
        assert_eq!(cfg.detector.cpu_threshold, 88.0);
        assert_eq!(cfg.collector.tracer_path, "/opt/tracer/bin/run");
        // Fields left unset in the file still fall back to defaults.
        assert_eq!(cfg.detector.ram_threshold, 80.0);
        assert_eq!(cfg.collector.retention_seconds, 100);
    }
}
