//! Admin API surface (§4.6): `POST /admin/reload` and the read-only
//! dashboard aggregations. Mounted only on the admin listener, never on the
//! two proxy ports.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::dashboard::{self, BucketSize};
use crate::error::AppError;
use crate::handlers::pipeline::AppState;

pub async fn reload(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let report = app.config_store.reload().await?;
    Ok(Json(json!({
        "loaded": report.loaded,
        "failed": report.failed.into_iter().map(|(id, reason)| json!({"id": id, "reason": reason})).collect::<Vec<_>>(),
    })))
}

#[derive(Deserialize)]
pub struct RangeQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

pub async fn client_leaderboard(
    State(app): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Vec<dashboard::LeaderboardRow>>, AppError> {
    Ok(Json(dashboard::client_leaderboard(&app.db_pool, q.start, q.end).await?))
}

pub async fn model_leaderboard(
    State(app): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Vec<dashboard::LeaderboardRow>>, AppError> {
    Ok(Json(dashboard::model_leaderboard(&app.db_pool, q.start, q.end).await?))
}

#[derive(Deserialize)]
pub struct TimeSeriesQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

fn default_bucket() -> String {
    "hour".to_string()
}

pub async fn time_series(
    State(app): State<AppState>,
    Query(q): Query<TimeSeriesQuery>,
) -> Result<Json<Vec<dashboard::TimeBucket>>, AppError> {
    let bucket = BucketSize::parse(&q.bucket)
        .ok_or_else(|| AppError::InvalidRequest(format!("unknown bucket size '{}'", q.bucket)))?;
    Ok(Json(dashboard::time_buckets(&app.db_pool, q.start, q.end, bucket).await?))
}
