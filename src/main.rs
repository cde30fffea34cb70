use clap::Parser;
use log::{error, info};
use spikewatch::collector::EventCollector;
use spikewatch::config::Config;
use spikewatch::orchestrator::Orchestrator;
use spikewatch::state::StateStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "spikewatch", about = "Telemetry agent with spike detection and RCA ranking")]
struct Args {
    /// Path to a TOML config file. Defaults to SPIKEWATCH_CONFIG or
    /// /etc/spikewatch/spikewatch.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured tracer executable path.
    #[arg(long)]
    tracer_path: Option<String>,

    /// Override the configured read-API bind address.
    #[arg(long)]
    bind_addr: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();
    let mut cfg = Config::load(args.config);
    if let Some(tracer_path) = args.tracer_path {
        cfg.collector.tracer_path = tracer_path;
    }
    if let Some(bind_addr) = args.bind_addr {
        cfg.server.bind_addr = bind_addr;
    }

    let collector = match EventCollector::spawn(
        &cfg.collector.tracer_path,
        cfg.collector.global_ring_capacity,
        cfg.collector.per_pid_ring_capacity,
        cfg.collector.retention_seconds,
    )
    .await
    {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("failed to start event collector: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let state = Arc::new(StateStore::new());
    let orchestrator = Orchestrator::new(collector.clone(), state.clone(), cfg.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let orchestrator_task = tokio::spawn(async move {
        orchestrator.run(shutdown_rx).await;
    });

    let listener = match tokio::net::TcpListener::bind(&cfg.server.bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind read API on {}: {e}", cfg.server.bind_addr);
            let _ = shutdown_tx.send(());
            let _ = orchestrator_task.await;
            return ExitCode::FAILURE;
        }
    };
    info!("read API listening on {}", cfg.server.bind_addr);

    let app = spikewatch::api::router(state);
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("read API server error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }

    let _ = shutdown_tx.send(());
    let _ = orchestrator_task.await;

    ExitCode::SUCCESS
}
