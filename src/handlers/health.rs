use super::AppState;
use crate::models::HealthStatus;
use axum::{extract::State, Json};
use chrono::Utc;

pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let store = state.payments.store();
    let store_ok = store.ping().await;

    let status = if store_ok { "healthy" } else { "degraded" };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: store.backend().to_string(),
        store_ok,
        chains: state.payments.config().chains.keys().cloned().collect(),
        timestamp: Utc::now(),
    })
}
