//! Streaming relay (§4.2 step 6). Drives the upstream byte stream through
//! `eventsource_stream` instead of hand-rolled line-splitting, so an SSE
//! frame split across two TCP reads still gets reassembled correctly, then
//! feeds each translated frame through the adapter before forwarding it.
//! Terminates with exactly one literal `data: [DONE]` frame regardless of
//! how the upstream stream ended (§8).

use axum::body::{Body, Bytes};
use axum::http::{header, Response, StatusCode};
use eventsource_stream::Eventsource;
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::handlers::pipeline::{AppState, Resolved, UsageGuard};

const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Builds the SSE response for a streaming chat/completions request. Usage
/// is metered by a `UsageGuard` tied to the stream's lifetime: it fires
/// exactly once, on drop, whether the stream drained normally or the
/// client disconnected early.
pub fn relay(
    app: &AppState,
    client_ip: String,
    model: String,
    resolved: Resolved,
    upstream: reqwest::Response,
    start: Instant,
    input_tokens_estimate: u64,
) -> Response<Body> {
    let guard = Arc::new(Mutex::new(UsageGuard::new(
        app.usage.clone(),
        start,
        client_ip,
        model,
        Some(resolved.cfg.id),
        input_tokens_estimate,
    )));

    let adapter = resolved.adapter.clone();
    let cfg = resolved.cfg.clone();
    let done_guard = guard.clone();
    let event_stream = upstream.bytes_stream().eventsource();

    let translated = event_stream.filter_map(move |event| {
        let adapter = adapter.clone();
        let cfg = cfg.clone();
        let guard = guard.clone();
        async move {
            let event = event.ok()?;
            let translated = adapter.translate_response_chunk(&event.data, &cfg).ok()??;
            if let Ok(mut g) = guard.lock() {
                g.observe_chunk(&translated);
            }
            let mut frame = Vec::with_capacity(translated.len() + 8);
            frame.extend_from_slice(b"data: ");
            frame.extend_from_slice(&translated);
            frame.extend_from_slice(b"\n\n");
            Some(Ok::<_, std::io::Error>(Bytes::from(frame)))
        }
    });

    // The done frame is only ever yielded once the upstream stream has
    // drained to completion, so marking the guard here (rather than
    // eagerly) means a client that disconnects mid-stream never gets
    // credited with a successful completion.
    let done = stream::once(async move {
        if let Ok(mut g) = done_guard.lock() {
            g.mark_completed();
        }
        Ok::<_, std::io::Error>(Bytes::from_static(DONE_FRAME.as_bytes()))
    });
    let body = Body::from_stream(translated.chain(done));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap()
}
