//! HTTP surface of the performance monitor.
//!
//! `GET /metrics` returns the current [`MetricsReport`] as JSON and
//! `PUT /metrics/thresholds` replaces alert thresholds for named metrics.

use crate::metrics::{PerformanceMonitor, Threshold};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use log::{info, warn};
use serde_json::json;
use shared::current_timestamp;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

pub type SharedMonitor = Arc<RwLock<PerformanceMonitor>>;

pub fn router(monitor: SharedMonitor) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/metrics/thresholds", put(put_thresholds))
        .with_state(monitor)
}

async fn get_metrics(State(monitor): State<SharedMonitor>) -> Response {
    let report = monitor.read().await.report(current_timestamp());
    Json(report).into_response()
}

async fn put_thresholds(
    State(monitor): State<SharedMonitor>,
    Json(updates): Json<BTreeMap<String, Threshold>>,
) -> Response {
    let result = monitor
        .write()
        .await
        .update_thresholds(&updates, current_timestamp());

    match result {
        Ok(()) => {
            let thresholds = monitor.read().await.thresholds().clone();
            Json(thresholds).into_response()
        }
        Err(e) => {
            warn!("Rejected threshold update: {}", e);
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

/// Serves the metrics routes until the listener fails.
pub async fn serve(addr: SocketAddr, monitor: SharedMonitor) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics endpoint listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(monitor)).await
}
