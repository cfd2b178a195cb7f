use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/info", get(info))
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "CityRide API is running",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.environment,
    }))
}

/// GET /api/info
pub async fn info() -> Json<Value> {
    Json(json!({
        "name": "CityRide API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/api/health",
            "rides": "/v1/rides",
            "bookings": "/v1/bookings",
            "admin": "/v1/admin",
        },
    }))
}
