use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub uptime: f64,
    pub inference: InferenceUsage,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceUsage {
    pub capacity: usize,
    pub available: usize,
}

static START_TIME: OnceLock<Instant> = OnceLock::new();

pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Liveness probe at `/`.
pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Image Enhancer API is running!"
    }))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let uptime = START_TIME
        .get()
        .map(|s| s.elapsed().as_secs_f64())
        .unwrap_or(0.0);
    let gate = state.enhance.gate();

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime,
        inference: InferenceUsage {
            capacity: gate.capacity(),
            available: gate.available(),
        },
    })
}

pub async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "apiVersion": "v1",
        "buildHash": env!("CARGO_PKG_VERSION")
    }))
}
