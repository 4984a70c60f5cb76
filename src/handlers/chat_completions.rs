//! `POST /v1/chat/completions` (§4.2): the gateway's primary surface.
//! Validates the request body by hand (rather than trusting axum's `Json`
//! extractor's rejection) so malformed bodies map onto the same
//! `invalid_request_error` shape every other failure in this pipeline uses.

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::time::Instant;

use crate::adapters;
use crate::error::AppError;
use crate::handlers::pipeline::{self, AppState, EndpointCtx, Resolved};
use crate::models::openai::ChatCompletionRequest;
use crate::streaming;

pub async fn chat_completions(
    State(ctx): State<EndpointCtx>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let client_ip = pipeline::resolve_client_ip(&headers, addr);

    let request = match parse_and_validate(&body) {
        Ok(r) => r,
        Err((model, err)) => return pipeline::finish_error(&ctx.app, &client_ip, &model, None, start, err),
    };

    run(&ctx, client_ip, request, start).await
}

/// Parses the raw body into a `ChatCompletionRequest`, returning the `model`
/// string (when present) alongside any validation failure so the caller can
/// still tag the usage record with it.
fn parse_and_validate(body: &[u8]) -> Result<ChatCompletionRequest, (String, AppError)> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|_| (String::new(), AppError::InvalidRequest("malformed JSON body".to_string())))?;

    let model = value
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or_default()
        .to_string();
    if model.is_empty() {
        return Err((model, AppError::InvalidRequest("'model' is required".to_string())));
    }

    let has_messages = value
        .get("messages")
        .and_then(|m| m.as_array())
        .map(|a| !a.is_empty())
        .unwrap_or(false);
    if !has_messages {
        return Err((
            model,
            AppError::InvalidRequest("'messages' must be a non-empty array".to_string()),
        ));
    }

    serde_json::from_value(value).map_err(|e| (model, AppError::InvalidRequest(format!("invalid request body: {e}"))))
}

/// Shared by `chat_completions` and (via request translation) `completions`.
pub async fn run(ctx: &EndpointCtx, client_ip: String, request: ChatCompletionRequest, start: Instant) -> Response {
    let model = request.model.clone();
    let resolved = match pipeline::resolve(&ctx.app, ctx.kind, &model) {
        Ok(r) => r,
        Err(e) => return pipeline::finish_error(&ctx.app, &client_ip, &model, None, start, e),
    };

    let stream = request.stream.unwrap_or(false);
    let upstream = match pipeline::dispatch(&ctx.app, &resolved, &request, stream).await {
        Ok(r) => r,
        Err(e) => {
            return pipeline::finish_error(&ctx.app, &client_ip, &model, Some(resolved.cfg.id), start, e)
        }
    };

    if stream {
        let input_estimate = adapters::estimate_tokens(
            &request
                .messages
                .iter()
                .map(|m| m.content.as_text())
                .collect::<Vec<_>>()
                .join(" "),
        );
        streaming::relay(&ctx.app, client_ip, model, resolved, upstream, start, input_estimate)
    } else {
        relay_buffered(&ctx.app, &client_ip, &model, &resolved, upstream, start).await
    }
}

async fn relay_buffered(
    app: &AppState,
    client_ip: &str,
    model: &str,
    resolved: &Resolved,
    upstream: reqwest::Response,
    start: Instant,
) -> Response {
    let bytes = match upstream.bytes().await {
        Ok(b) => b,
        Err(e) => {
            return pipeline::finish_error(app, client_ip, model, Some(resolved.cfg.id), start, AppError::Upstream(e))
        }
    };

    let translated = match resolved.adapter.translate_response(&bytes, &resolved.cfg) {
        Ok(t) => t,
        Err(e) => return pipeline::finish_error(app, client_ip, model, Some(resolved.cfg.id), start, e),
    };

    let (input_tokens, output_tokens) = translated
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or((0, 0));

    pipeline::record_usage(
        app,
        client_ip,
        model,
        Some(resolved.cfg.id),
        input_tokens,
        output_tokens,
        start,
        crate::domain::UsageStatus::Success,
        None,
    );

    (
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        translated.body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_model() {
        let body = br#"{"messages":[{"role":"user","content":"hi"}]}"#;
        let (model, err) = parse_and_validate(body).unwrap_err();
        assert_eq!(model, "");
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[test]
    fn rejects_empty_messages() {
        let body = br#"{"model":"gpt-4","messages":[]}"#;
        let (model, err) = parse_and_validate(body).unwrap_err();
        assert_eq!(model, "gpt-4");
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[test]
    fn accepts_well_formed_request() {
        let body = br#"{"model":"gpt-4","messages":[{"role":"user","content":"hi"}]}"#;
        let request = parse_and_validate(body).unwrap();
        assert_eq!(request.model, "gpt-4");
        assert_eq!(request.messages.len(), 1);
    }
}
