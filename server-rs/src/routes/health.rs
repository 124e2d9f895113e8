use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::config::StoreBackend;
use crate::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let store_ok = state.store.ping().await;
    let backend = match state.config.store_backend {
        StoreBackend::Postgres => "postgres",
        StoreBackend::Memory => "memory",
    };

    let status = if store_ok { "healthy" } else { "degraded" };
    Json(json!({
        "status": status,
        "store": backend,
        "storeOk": store_ok,
        "timestamp": chrono::Utc::now(),
    }))
}
