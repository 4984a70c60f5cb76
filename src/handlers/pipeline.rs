//! Shared request pipeline (§4.2): resolve a public model name against the
//! live snapshot, dispatch through the matching adapter, and meter the
//! outcome unconditionally. `chat_completions` and `completions` both build
//! on top of this; only the response shaping differs between them.

use axum::extract::FromRef;
use axum::http::HeaderMap;
use reqwest::StatusCode as UpstreamStatusCode;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::adapters::{AdapterRegistry, UpstreamAdapter};
use crate::config::EnvConfig;
use crate::config_store::ConfigStore;
use crate::domain::{EndpointKind, UpstreamConfig, UsageRecord, UsageStatus};
use crate::error::AppError;
use crate::models::openai::ChatCompletionRequest;
use crate::usage::UsageRecorder;

#[derive(Clone)]
pub struct AppState {
    pub config_store: ConfigStore,
    pub adapters: Arc<AdapterRegistry>,
    pub usage: UsageRecorder,
    pub http_client: reqwest::Client,
    pub semaphore: Arc<Semaphore>,
    pub env: Arc<EnvConfig>,
    pub db_pool: sqlx::SqlitePool,
    pub in_flight: Arc<AtomicU64>,
}

/// Binds an `AppState` to the listener it was reached on, so handlers can
/// apply the right endpoint-visibility rule without a second state type per
/// port. Shared handlers (health, models) extract `AppState` directly via
/// `FromRef`; chat handlers extract the full `EndpointCtx`.
#[derive(Clone)]
pub struct EndpointCtx {
    pub app: AppState,
    pub kind: EndpointKind,
}

impl FromRef<EndpointCtx> for AppState {
    fn from_ref(ctx: &EndpointCtx) -> AppState {
        ctx.app.clone()
    }
}

pub fn resolve_client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| addr.ip().to_string())
}

pub struct Resolved {
    pub cfg: UpstreamConfig,
    pub adapter: Arc<dyn UpstreamAdapter>,
}

/// Resolves `model` against the live snapshot and checks it's visible on
/// the endpoint the request arrived on. Does not touch the network.
pub fn resolve(app: &AppState, kind: EndpointKind, model: &str) -> Result<Resolved, AppError> {
    let snapshot = app.config_store.snapshot();
    let cfg = snapshot
        .resolve(model)
        .ok_or_else(|| AppError::ModelNotFound(model.to_string()))?;
    if !cfg.visible_on(kind) {
        return Err(AppError::ModelNotAvailable(model.to_string()));
    }
    let adapter = app.adapters.get(cfg.service_type);
    Ok(Resolved { cfg: cfg.clone(), adapter })
}

/// Builds the upstream request, bounds it with the semaphore, and sends it
/// with a TTFB timeout. The semaphore is only held across the network call,
/// never across adapter translation, so it can't be starved by CPU work.
pub async fn dispatch(
    app: &AppState,
    resolved: &Resolved,
    request: &ChatCompletionRequest,
    stream: bool,
) -> Result<reqwest::Response, AppError> {
    let builder = resolved
        .adapter
        .build_request(&app.http_client, &resolved.cfg, request, stream)?
        .timeout(Duration::from_secs(app.env.upstream_total_timeout_secs));

    let _permit = app
        .semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| AppError::Internal("dispatch semaphore closed".to_string()))?;

    app.in_flight.fetch_add(1, Ordering::Relaxed);
    let ttfb = Duration::from_secs(app.env.upstream_ttfb_timeout_secs);
    let sent = tokio::time::timeout(ttfb, builder.send()).await;
    app.in_flight.fetch_sub(1, Ordering::Relaxed);

    let response = match sent {
        Err(_) => return Err(AppError::Timeout),
        Ok(Err(e)) => return Err(AppError::Upstream(e)),
        Ok(Ok(r)) => r,
    };

    if response.status().is_success() {
        Ok(response)
    } else {
        Err(classify_upstream_status(response.status()))
    }
}

fn classify_upstream_status(status: UpstreamStatusCode) -> AppError {
    match status {
        UpstreamStatusCode::UNAUTHORIZED | UpstreamStatusCode::FORBIDDEN => {
            AppError::UpstreamAuth(format!("upstream returned {status}"))
        }
        UpstreamStatusCode::TOO_MANY_REQUESTS => {
            AppError::RateLimited(format!("upstream returned {status}"))
        }
        s if s.is_server_error() => AppError::UpstreamError(format!("upstream returned {s}")),
        s => AppError::InvalidRequest(format!("upstream rejected request with {s}")),
    }
}

fn usage_status_from(err: &AppError) -> UsageStatus {
    match err.usage_status() {
        "timeout" => UsageStatus::Timeout,
        "upstream_error" => UsageStatus::UpstreamError,
        _ => UsageStatus::ClientError,
    }
}

/// Builds and enqueues a `UsageRecord` for an error path, then converts the
/// error into its HTTP response. Every early-exit branch of the pipeline
/// funnels through here so metering happens regardless of outcome (§4.2
/// step 7).
pub fn finish_error(
    app: &AppState,
    client_ip: &str,
    model: &str,
    config_id: Option<i64>,
    start: Instant,
    err: AppError,
) -> axum::response::Response {
    use axum::response::IntoResponse;
    record_usage(
        app,
        client_ip,
        model,
        config_id,
        0,
        0,
        start,
        usage_status_from(&err),
        Some(err.to_string()),
    );
    err.into_response()
}

#[allow(clippy::too_many_arguments)]
pub fn record_usage(
    app: &AppState,
    client_ip: &str,
    model: &str,
    config_id: Option<i64>,
    input_tokens: u64,
    output_tokens: u64,
    start: Instant,
    status: UsageStatus,
    error_message: Option<String>,
) {
    app.usage.enqueue(UsageRecord {
        id: Uuid::new_v4(),
        timestamp: chrono::Utc::now(),
        client_ip: client_ip.to_string(),
        public_name: model.to_string(),
        config_id,
        input_tokens,
        output_tokens,
        response_time_ms: start.elapsed().as_millis() as u64,
        status,
        error_message,
    });
}

/// Tied to the lifetime of a streaming response body. Records exactly one
/// `UsageRecord` when dropped — whether the stream finished normally or the
/// client disconnected mid-flight — so streaming requests are metered the
/// same as buffered ones without the handler having to poll to completion.
pub struct UsageGuard {
    recorder: UsageRecorder,
    start: Instant,
    client_ip: String,
    public_name: String,
    config_id: Option<i64>,
    input_tokens: u64,
    output_tokens: u64,
    completed: bool,
}

impl UsageGuard {
    pub fn new(
        recorder: UsageRecorder,
        start: Instant,
        client_ip: String,
        public_name: String,
        config_id: Option<i64>,
        input_tokens_estimate: u64,
    ) -> Self {
        Self {
            recorder,
            start,
            client_ip,
            public_name,
            config_id,
            input_tokens: input_tokens_estimate,
            output_tokens: 0,
            completed: false,
        }
    }

    /// Marks the stream as having reached its terminal frame. Only call this
    /// once the `[DONE]` frame (or final upstream event) has actually been
    /// produced into the response body — not merely queued — so a client
    /// disconnect before that point is still recorded as incomplete.
    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    /// Feeds one translated OpenAI-shaped chunk (or completion-shaped
    /// chunk — both carry `usage`/`delta.content` in the same place) into
    /// the running token estimate.
    pub fn observe_chunk(&mut self, translated_json: &[u8]) {
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(translated_json) else {
            return;
        };
        if let Some(usage) = value.get("usage") {
            if let Ok(usage) = serde_json::from_value::<crate::models::openai::Usage>(usage.clone()) {
                self.output_tokens = usage.completion_tokens;
                if usage.prompt_tokens > 0 {
                    self.input_tokens = usage.prompt_tokens;
                }
                return;
            }
        }
        let text = value
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|c| c.get("delta").or_else(|| c.get("text")))
            .and_then(|d| {
                d.as_str()
                    .map(str::to_string)
                    .or_else(|| d.get("content").and_then(|c| c.as_str()).map(str::to_string))
            })
            .unwrap_or_default();
        if !text.is_empty() {
            self.output_tokens += crate::adapters::estimate_tokens(&text);
        }
    }
}

impl Drop for UsageGuard {
    fn drop(&mut self) {
        self.recorder.enqueue(UsageRecord {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            client_ip: std::mem::take(&mut self.client_ip),
            public_name: std::mem::take(&mut self.public_name),
            config_id: self.config_id,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            response_time_ms: self.start.elapsed().as_millis() as u64,
            status: if self.completed { UsageStatus::Success } else { UsageStatus::ClientError },
            error_message: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_chunk_prefers_usage_field() {
        let recorder = UsageRecorder::new(10);
        let mut guard = UsageGuard::new(recorder, Instant::now(), "1.1.1.1".into(), "gpt-4".into(), Some(1), 5);
        let chunk = serde_json::json!({"choices": [], "usage": {"prompt_tokens": 7, "completion_tokens": 3, "total_tokens": 10}});
        guard.observe_chunk(&serde_json::to_vec(&chunk).unwrap());
        assert_eq!(guard.output_tokens, 3);
        assert_eq!(guard.input_tokens, 7);
    }

    #[test]
    fn observe_chunk_falls_back_to_delta_content_length() {
        let recorder = UsageRecorder::new(10);
        let mut guard = UsageGuard::new(recorder, Instant::now(), "1.1.1.1".into(), "gpt-4".into(), Some(1), 0);
        let chunk = serde_json::json!({"choices": [{"delta": {"content": "abcdefgh"}}]});
        guard.observe_chunk(&serde_json::to_vec(&chunk).unwrap());
        assert_eq!(guard.output_tokens, 2);
    }

    #[test]
    fn drop_without_completion_records_client_error() {
        let recorder = UsageRecorder::new(10);
        let guard = UsageGuard::new(recorder.clone(), Instant::now(), "1.1.1.1".into(), "gpt-4".into(), Some(1), 5);
        drop(guard);
        let batch = recorder.drain_batch();
        assert_eq!(batch[0].status, UsageStatus::ClientError);
    }

    #[test]
    fn drop_after_completion_records_success() {
        let recorder = UsageRecorder::new(10);
        let mut guard = UsageGuard::new(recorder.clone(), Instant::now(), "1.1.1.1".into(), "gpt-4".into(), Some(1), 5);
        guard.mark_completed();
        drop(guard);
        let batch = recorder.drain_batch();
        assert_eq!(batch[0].status, UsageStatus::Success);
    }
}
