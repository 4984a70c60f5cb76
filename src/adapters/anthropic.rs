//! Anthropic adapter: splits OpenAI `messages` into Anthropic's `system` +
//! `messages[]` shape and re-combines the reply. Grounded in the teacher's
//! `converters::openai_to_anthropic` and `converters::anthropic_response`,
//! simplified to the core text-in/text-out contract this spec requires
//! (full tool-calling/warnings fidelity is not carried over).

use async_trait::async_trait;
use reqwest::Client;

use super::{TranslatedResponse, UpstreamAdapter};
use crate::domain::{ServiceType, UpstreamConfig};
use crate::error::AppError;
use crate::models::anthropic::{Message, MessageContent, MessagesRequest, MessagesResponse, StreamEvent};
use crate::models::openai::{ChatCompletionChunk, ChatCompletionChunkChoice, ChatCompletionDelta, ChatCompletionRequest, Usage};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicAdapter;

impl AnthropicAdapter {
    fn to_messages_request(&self, payload: &ChatCompletionRequest, model: &str, stream: bool) -> MessagesRequest {
        let mut system_parts = Vec::new();
        let mut messages = Vec::new();

        for msg in &payload.messages {
            if msg.role == "system" {
                system_parts.push(msg.content.as_text());
                continue;
            }
            messages.push(Message {
                role: msg.role.clone(),
                content: MessageContent::Text(msg.content.as_text()),
            });
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(MessageContent::Text(system_parts.join("\n\n")))
        };

        // Anthropic clips temperature to [0, 1]; OpenAI's range is [0, 2].
        let temperature = payload.temperature.map(|t| t.clamp(0.0, 1.0));

        MessagesRequest {
            model: model.to_string(),
            system,
            messages,
            max_tokens: payload.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature,
            top_p: payload.top_p,
            top_k: None,
            stream: Some(stream),
            stop_sequences: payload.stop.clone(),
        }
    }
}

#[async_trait]
impl UpstreamAdapter for AnthropicAdapter {
    fn service_type(&self) -> ServiceType {
        ServiceType::Anthropic
    }

    async fn list_models(&self, client: &Client, cfg: &UpstreamConfig) -> Result<Vec<String>, AppError> {
        let url = format!("{}/models", cfg.effective_base_url());
        let mut req = client.get(&url).header("anthropic-version", ANTHROPIC_VERSION);
        if let Some(key) = &cfg.api_key {
            req = req.header("x-api-key", key);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(AppError::UpstreamError(format!(
                "list_models failed with status {}",
                resp.status()
            )));
        }
        let value: serde_json::Value = resp.json().await?;
        let ids = value
            .get("data")
            .and_then(|d| d.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m.get("id").and_then(|i| i.as_str()).map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    fn build_request(
        &self,
        client: &Client,
        cfg: &UpstreamConfig,
        payload: &ChatCompletionRequest,
        stream: bool,
    ) -> Result<reqwest::RequestBuilder, AppError> {
        let url = format!("{}/messages", cfg.effective_base_url());
        let body = self.to_messages_request(payload, &cfg.model_name, stream);

        let mut req = client
            .post(&url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body);

        if let Some(key) = &cfg.api_key {
            req = req.header("x-api-key", key);
        }
        Ok(req)
    }

    fn translate_response_chunk(
        &self,
        raw_frame: &str,
        cfg: &UpstreamConfig,
    ) -> Result<Option<Vec<u8>>, AppError> {
        let trimmed = raw_frame.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let event: StreamEvent = match serde_json::from_str(trimmed) {
            Ok(e) => e,
            Err(_) => {
                tracing::warn!("dropped unparseable anthropic chunk");
                return Ok(None);
            }
        };

        let delta_text = event.delta.as_ref().and_then(|d| d.text.clone());
        let finish_reason = event
            .delta
            .as_ref()
            .and_then(|d| d.stop_reason.clone())
            .map(|r| openai_finish_reason(&r));

        if event.event_type != "content_block_delta" && event.event_type != "message_delta" {
            return Ok(None);
        }

        let chunk = ChatCompletionChunk {
            id: "chatcmpl-anthropic".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: cfg.public_name.clone(),
            choices: vec![ChatCompletionChunkChoice {
                index: 0,
                delta: ChatCompletionDelta {
                    role: None,
                    content: delta_text,
                },
                finish_reason,
            }],
            usage: None,
        };
        Ok(Some(serde_json::to_vec(&chunk)?))
    }

    fn translate_response(
        &self,
        raw_body: &[u8],
        cfg: &UpstreamConfig,
    ) -> Result<TranslatedResponse, AppError> {
        let anthropic_resp: MessagesResponse = serde_json::from_slice(raw_body)?;

        let text = anthropic_resp
            .content
            .iter()
            .filter_map(|b| b.text.clone())
            .collect::<Vec<_>>()
            .join("");

        let usage = Usage {
            prompt_tokens: anthropic_resp.usage.input_tokens,
            completion_tokens: anthropic_resp.usage.output_tokens,
            total_tokens: anthropic_resp.usage.input_tokens + anthropic_resp.usage.output_tokens,
        };

        let body = serde_json::json!({
            "id": anthropic_resp.id,
            "object": "chat.completion",
            "created": 0,
            "model": cfg.public_name,
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": text },
                "finish_reason": anthropic_resp.stop_reason.as_deref().map(openai_finish_reason).unwrap_or_else(|| "stop".to_string()),
            }],
            "usage": usage,
        });

        Ok(TranslatedResponse {
            body: serde_json::to_vec(&body)?,
            usage: Some(usage),
        })
    }
}

fn openai_finish_reason(anthropic_reason: &str) -> String {
    match anthropic_reason {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        other => other,
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::openai::{ChatMessage, MessageContent as OaiContent};

    fn req() -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "gpt-4".to_string(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: OaiContent::Text("be terse".to_string()), name: None },
                ChatMessage { role: "user".to_string(), content: OaiContent::Text("hi".to_string()), name: None },
            ],
            max_tokens: None,
            temperature: Some(1.8),
            top_p: None,
            stream: None,
            stop: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn splits_system_message_out() {
        let out = AnthropicAdapter.to_messages_request(&req(), "claude-3", false);
        assert_eq!(out.messages.len(), 1);
        assert!(matches!(out.system, Some(MessageContent::Text(ref s)) if s == "be terse"));
    }

    #[test]
    fn clamps_temperature_into_range() {
        let out = AnthropicAdapter.to_messages_request(&req(), "claude-3", false);
        assert_eq!(out.temperature, Some(1.0));
    }

    #[test]
    fn defaults_max_tokens_when_absent() {
        let out = AnthropicAdapter.to_messages_request(&req(), "claude-3", false);
        assert_eq!(out.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn finish_reason_maps_stop() {
        assert_eq!(openai_finish_reason("end_turn"), "stop");
        assert_eq!(openai_finish_reason("max_tokens"), "length");
    }
}
