//! Top-level detection loop: sample telemetry at 1 Hz, feed the detector,
//! and on a confirmed spike gather evidence, rank candidate PIDs and call
//! the RCA client. Mirrors the tracer's own `finally`-guaranteed cleanup —
//! whatever happens mid-loop, the collector is always stopped on exit.

use crate::collector::EventCollector;
use crate::config::Config;
use crate::detector::{SpikeDetector, TelemetrySample};
use crate::rca::{Evidence, RcaClient};
use crate::sampler::{SysinfoProcessSource, TelemetrySampler};
use crate::state::StateStore;
use crate::{clock, ranker};
use log::info;
use std::sync::Arc;
use std::time::Duration;

const EVENTS_PER_SPIKE: usize = 1_500;

pub struct Orchestrator {
    collector: Arc<EventCollector>,
    state: Arc<StateStore>,
    cfg: Config,
}

impl Orchestrator {
    pub fn new(collector: Arc<EventCollector>, state: Arc<StateStore>, cfg: Config) -> Self {
        Self {
            collector,
            state,
            cfg,
        }
    }

    /// Run until `shutdown` resolves. Always stops the collector before
    /// returning, regardless of how the loop ends.
    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut detector = SpikeDetector::new(&self.cfg.detector);
        let mut sampler = TelemetrySampler::new();
        let rca_client = RcaClient::new(self.cfg.reasoner.clone());
        let interval = Duration::from_secs(self.cfg.detector.sample_interval_seconds.max(1));

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("orchestrator received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let (cpu, ram) = sampler.sample();
            let sample = TelemetrySample {
                ts: clock::now(),
                cpu,
                ram,
            };
            self.state.add_telemetry(sample);
            detector.add_sample(sample);

            let (fired, info_opt) = detector.check();
            if !fired {
                continue;
            }
            let spike_info = match info_opt {
                Some(i) => i,
                None => continue,
            };

            info!(
                "spike confirmed: type={} severity={:.2} cpu={:.1} ram={:.1}",
                spike_info.spike_type, spike_info.severity_score, cpu, ram
            );

            let spike_id = self.state.add_spike(spike_info.clone());
            let recent = self.collector.recent_events(EVENTS_PER_SPIKE);
            self.state.attach_events(spike_id, recent.clone());

            let process_source = SysinfoProcessSource::refresh();
            let ranked = ranker::rank_pids(&recent, cpu, ram, &process_source, None, None);

            let cpu_contention = self.collector.detect_cpu_contention();
            let gc_event_count = self.collector.detect_gc_events().len();
            let page_fault_count = self.collector.detect_page_faults().len();
            let network_usage = self.collector.aggregate_network_usage();
            let disk_usage = self.collector.aggregate_disk_usage();
            let thread_spikes = self.collector.detect_thread_spikes();

            let evidence = Evidence {
                spike: &spike_info,
                ranked: &ranked,
                cpu_contention,
                gc_event_count,
                page_fault_count,
                network_usage: &network_usage,
                disk_usage: &disk_usage,
                thread_spikes: &thread_spikes,
            };

            let rca = rca_client.analyze(evidence).await;
            self.state.attach_rca(spike_id, rca);
        }

        self.collector.stop().await;
        info!("collector stopped; orchestrator exiting");
    }
}
