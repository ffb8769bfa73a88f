//! Health check handler

use axum::Json;
use serde_json::json;

pub async fn check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "survey-sentinel",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
