//! OpenAI adapter, also used (with different defaults/auth) for OpenRouter,
//! LM Studio, and generic OpenAI-compatible endpoints. Grounded in the
//! teacher's `provider_trait::OpenAIProvider`.

use async_trait::async_trait;
use reqwest::Client;

use super::{estimate_tokens, TranslatedResponse, UpstreamAdapter};
use crate::domain::{ServiceType, UpstreamConfig};
use crate::error::AppError;
use crate::models::openai::{ChatCompletionRequest, ModelsResponse, Usage};

pub struct OpenAiAdapter;

#[async_trait]
impl UpstreamAdapter for OpenAiAdapter {
    fn service_type(&self) -> ServiceType {
        ServiceType::OpenAi
    }

    async fn list_models(&self, client: &Client, cfg: &UpstreamConfig) -> Result<Vec<String>, AppError> {
        let url = format!("{}/models", cfg.effective_base_url());
        let mut req = client.get(&url);
        if let Some(key) = &cfg.api_key {
            if !key.is_empty() {
                req = req.bearer_auth(key);
            }
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(AppError::UpstreamError(format!(
                "list_models failed with status {}",
                resp.status()
            )));
        }
        let parsed: ModelsResponse = resp.json().await?;
        Ok(parsed.data.into_iter().map(|m| m.id).collect())
    }

    fn build_request(
        &self,
        client: &Client,
        cfg: &UpstreamConfig,
        payload: &ChatCompletionRequest,
        stream: bool,
    ) -> Result<reqwest::RequestBuilder, AppError> {
        let url = format!("{}/chat/completions", cfg.effective_base_url());
        let mut rewritten = payload.clone();
        rewritten.model = cfg.model_name.clone();
        rewritten.stream = Some(stream);

        let mut req = client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&rewritten);

        if let Some(key) = &cfg.api_key {
            if !key.is_empty() {
                req = req.bearer_auth(key);
            }
        }
        if cfg.service_type == ServiceType::OpenRouter {
            req = req
                .header("HTTP-Referer", "http://localhost")
                .header("X-Title", "llm-bridge");
        }
        Ok(req)
    }

    fn translate_response_chunk(
        &self,
        raw_frame: &str,
        cfg: &UpstreamConfig,
    ) -> Result<Option<Vec<u8>>, AppError> {
        rewrite_model_field(raw_frame, &cfg.public_name)
    }

    fn translate_response(
        &self,
        raw_body: &[u8],
        cfg: &UpstreamConfig,
    ) -> Result<TranslatedResponse, AppError> {
        let mut value: serde_json::Value = serde_json::from_slice(raw_body)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("model".to_string(), serde_json::Value::String(cfg.public_name.clone()));
        }
        let usage = extract_or_estimate_usage(&value);
        Ok(TranslatedResponse {
            body: serde_json::to_vec(&value)?,
            usage,
        })
    }
}

/// `vscode_proxy` forwards no API key and pins the model id to a fixed
/// token the local upstream recognises (§4.1 special case).
pub struct VscodeProxyAdapter;

#[async_trait]
impl UpstreamAdapter for VscodeProxyAdapter {
    fn service_type(&self) -> ServiceType {
        ServiceType::VscodeProxy
    }

    async fn list_models(&self, client: &Client, cfg: &UpstreamConfig) -> Result<Vec<String>, AppError> {
        OpenAiAdapter.list_models(client, cfg).await
    }

    fn build_request(
        &self,
        client: &Client,
        cfg: &UpstreamConfig,
        payload: &ChatCompletionRequest,
        stream: bool,
    ) -> Result<reqwest::RequestBuilder, AppError> {
        let url = format!("{}/chat/completions", cfg.effective_base_url());
        let mut rewritten = payload.clone();
        rewritten.model = "vscode-lm-proxy".to_string();
        rewritten.stream = Some(stream);

        let req = client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&rewritten);
        Ok(req)
    }

    fn translate_response_chunk(
        &self,
        raw_frame: &str,
        cfg: &UpstreamConfig,
    ) -> Result<Option<Vec<u8>>, AppError> {
        rewrite_model_field(raw_frame, &cfg.public_name)
    }

    fn translate_response(
        &self,
        raw_body: &[u8],
        cfg: &UpstreamConfig,
    ) -> Result<TranslatedResponse, AppError> {
        OpenAiAdapter.translate_response(raw_body, cfg)
    }
}

fn rewrite_model_field(raw_frame: &str, public_name: &str) -> Result<Option<Vec<u8>>, AppError> {
    let trimmed = raw_frame.trim();
    if trimmed.is_empty() || trimmed == "[DONE]" {
        return Ok(None);
    }
    let mut value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => {
            tracing::warn!("dropped unparseable upstream chunk");
            return Ok(None);
        }
    };
    if let Some(obj) = value.as_object_mut() {
        obj.insert("model".to_string(), serde_json::Value::String(public_name.to_string()));
    }
    Ok(Some(serde_json::to_vec(&value)?))
}

fn extract_or_estimate_usage(value: &serde_json::Value) -> Option<Usage> {
    if let Some(usage) = value.get("usage") {
        if let Ok(parsed) = serde_json::from_value::<Usage>(usage.clone()) {
            return Some(parsed);
        }
    }
    // Fallback: estimate from the first choice's message content.
    let text = value
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("");
    let completion_tokens = estimate_tokens(text);
    Some(Usage {
        prompt_tokens: 0,
        completion_tokens,
        total_tokens: completion_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_model_field_in_chunk() {
        let frame = r#"{"id":"x","model":"gpt-4-0613","choices":[]}"#;
        let out = rewrite_model_field(frame, "gpt-4").unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["model"], "gpt-4");
    }

    #[test]
    fn drops_unparseable_chunk() {
        assert!(rewrite_model_field("not json", "gpt-4").unwrap().is_none());
    }

    #[test]
    fn estimates_usage_when_absent() {
        let value = serde_json::json!({
            "choices": [{"message": {"content": "abcdefgh"}}]
        });
        let usage = extract_or_estimate_usage(&value).unwrap();
        assert_eq!(usage.completion_tokens, 2);
    }
}
