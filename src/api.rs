//! Read API: thin axum surface over the state store. No subsystem writes
//! through here — it only ever reads `StateStore` snapshots.

use crate::sampler::current_top_processes;
use crate::state::StateStore;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

const TOP_PROCESSES_LIMIT: usize = 20;

pub fn router(state: Arc<StateStore>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            "http://localhost:5173".parse::<HeaderValue>().unwrap(),
            "http://127.0.0.1:5173".parse::<HeaderValue>().unwrap(),
        ])
        .allow_methods([Method::GET])
        .allow_credentials(true);

    Router::new()
        .route("/api/spikes", get(list_spikes))
        .route("/api/spikes/{id}", get(get_spike))
        .route("/api/latest-rca", get(latest_rca))
        .route("/api/telemetry/latest", get(latest_telemetry))
        .route("/api/telemetry/window", get(telemetry_window))
        .route("/api/processes/top", get(top_processes))
        .layer(cors)
        .with_state(state)
}

async fn list_spikes(State(state): State<Arc<StateStore>>) -> impl IntoResponse {
    Json(serde_json::json!({ "spikes": state.get_spikes() }))
}

async fn get_spike(
    State(state): State<Arc<StateStore>>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    match state.get_spike(id) {
        Some(spike) => Json(spike).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            format!("Spike with id={id} not found"),
        )
            .into_response(),
    }
}

async fn latest_rca(State(state): State<Arc<StateStore>>) -> impl IntoResponse {
    Json(serde_json::json!({ "latest_rca": state.get_latest_rca() }))
}

async fn latest_telemetry(State(state): State<Arc<StateStore>>) -> impl IntoResponse {
    Json(serde_json::json!({ "telemetry": state.get_latest_telemetry() }))
}

#[derive(Debug, Deserialize)]
struct WindowParams {
    seconds: Option<i64>,
}

async fn telemetry_window(
    State(state): State<Arc<StateStore>>,
    Query(params): Query<WindowParams>,
) -> impl IntoResponse {
    let requested = params.seconds.unwrap_or(60);
    match state.get_telemetry_window(requested) {
        Some(samples) => {
            Json(serde_json::json!({ "window_seconds": requested, "samples": samples }))
                .into_response()
        }
        None => (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("seconds must be between 1 and 600, got {requested}"),
        )
            .into_response(),
    }
}

/// Supplemental route: a live OS process snapshot independent of the event
/// stream or any confirmed spike, for manual inspection.
async fn top_processes() -> impl IntoResponse {
    let processes = current_top_processes(TOP_PROCESSES_LIMIT);
    Json(serde_json::json!({ "processes": processes }))
}
