//! `GET /health`, `/health/ready`, `/health/live` (§4.6). Mounted on all
//! three listeners (general, special, admin) via `AppState`'s blanket
//! `FromRef` so the same handlers work whether the router's state type is
//! `EndpointCtx` or bare `AppState`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::sync::atomic::Ordering;

use crate::handlers::pipeline::AppState;

async fn db_ok(app: &AppState) -> bool {
    sqlx::query("SELECT 1").execute(&app.db_pool).await.is_ok()
}

pub async fn health(State(app): State<AppState>) -> impl IntoResponse {
    let db = db_ok(&app).await;
    Json(json!({
        "status": if db { "ok" } else { "degraded" },
        "checks": {
            "db": db,
            "queue_depth": app.usage.queue_depth(),
            "in_flight": app.in_flight.load(Ordering::Relaxed),
            "dropped_usage_records": app.usage.dropped_count(),
        }
    }))
}

pub async fn ready(State(app): State<AppState>) -> impl IntoResponse {
    let db = db_ok(&app).await;
    let has_enabled = !app.config_store.snapshot().is_empty();
    let status = if db && has_enabled {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if db && has_enabled { "ready" } else { "not_ready" },
            "db": db,
            "has_enabled_config": has_enabled,
        })),
    )
}

pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "live"})))
}
