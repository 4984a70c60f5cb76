//! Legacy `POST /v1/completions` (§4.2, §9 Open Question #2): synthesizes a
//! single-user-message chat request and reuses the chat pipeline end to
//! end, including usage metering. Only the request/response shape differs
//! from `chat_completions` — every upstream, including Anthropic and
//! Gemini, goes through the same synthesis rather than a native completion
//! API (none of the configured service types expose one worth keeping
//! separate).

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::time::Instant;

use crate::error::AppError;
use crate::handlers::chat_completions;
use crate::handlers::pipeline::{self, EndpointCtx};
use crate::models::openai::{ChatCompletionRequest, ChatMessage, CompletionRequest, MessageContent};

pub async fn completions(
    State(ctx): State<EndpointCtx>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let client_ip = pipeline::resolve_client_ip(&headers, addr);

    let legacy: CompletionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return pipeline::finish_error(
                &ctx.app,
                &client_ip,
                "",
                None,
                start,
                AppError::InvalidRequest(format!("invalid request body: {e}")),
            )
        }
    };

    if legacy.prompt.is_empty() {
        return pipeline::finish_error(
            &ctx.app,
            &client_ip,
            &legacy.model,
            None,
            start,
            AppError::InvalidRequest("'prompt' must not be empty".to_string()),
        );
    }

    let chat_request = ChatCompletionRequest {
        model: legacy.model,
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: MessageContent::Text(legacy.prompt),
            name: None,
        }],
        max_tokens: legacy.max_tokens,
        temperature: legacy.temperature,
        top_p: None,
        stream: legacy.stream,
        stop: None,
        extra: Default::default(),
    };

    let chat_response = chat_completions::run(&ctx, client_ip, chat_request, start).await;
    reshape(chat_response).await
}

/// Chat-shaped JSON (`choices[].message.content`) reshaped into the legacy
/// `choices[].text` schema. Streaming chat chunks already drain into their
/// own `UsageGuard` before this function sees the response, so reshaping a
/// streaming body here would double-meter; legacy streaming clients get the
/// chat-shaped SSE frames passed through as-is.
async fn reshape(response: Response) -> Response {
    let content_type = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if !content_type.starts_with("application/json") {
        return response;
    }

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = match axum::body::to_bytes(response.into_body(), usize::MAX).await {
        Ok(b) => b,
        Err(_) => return (status, headers, axum::body::Body::empty()).into_response(),
    };

    let Ok(chat) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        return (status, headers, bytes).into_response();
    };

    let Some(choices) = chat.get("choices").and_then(|c| c.as_array()) else {
        return (status, headers, bytes).into_response();
    };

    let legacy_choices: Vec<serde_json::Value> = choices
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let text = c
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|t| t.as_str())
                .unwrap_or_default();
            serde_json::json!({
                "index": i,
                "text": text,
                "finish_reason": c.get("finish_reason"),
            })
        })
        .collect();

    let legacy_body = serde_json::json!({
        "id": chat.get("id"),
        "object": "text_completion",
        "created": chat.get("created"),
        "model": chat.get("model"),
        "choices": legacy_choices,
        "usage": chat.get("usage"),
    });

    (status, [(axum::http::header::CONTENT_TYPE, "application/json")], axum::Json(legacy_body)).into_response()
}
