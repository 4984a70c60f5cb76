//! Gemini adapter (Google AI Studio REST surface, not Vertex). Maps OpenAI
//! chat messages to Gemini's `contents` shape, `role: system` to
//! `systemInstruction`, and `role: assistant` to Gemini's `model` role.
//! Grounded in the teacher's `converters::openai_to_gemini` /
//! `converters::gemini_response` and `providers::gemini`.

use async_trait::async_trait;
use reqwest::Client;

use super::{TranslatedResponse, UpstreamAdapter};
use crate::domain::{ServiceType, UpstreamConfig};
use crate::error::AppError;
use crate::models::gemini::{Content, GenerateContentRequest, GenerateContentResponse, Part, SystemInstruction};
use crate::models::openai::{ChatCompletionChunk, ChatCompletionChunkChoice, ChatCompletionDelta, ChatCompletionRequest, Usage};

pub struct GeminiAdapter;

impl GeminiAdapter {
    fn to_generate_content_request(&self, payload: &ChatCompletionRequest) -> GenerateContentRequest {
        let mut system_instruction = None;
        let mut contents = Vec::new();

        for msg in &payload.messages {
            let text = msg.content.as_text();
            if msg.role == "system" {
                system_instruction = Some(SystemInstruction {
                    parts: vec![Part::Text { text }],
                });
                continue;
            }
            let role = if msg.role == "assistant" { "model" } else { "user" };
            contents.push(Content {
                role: role.to_string(),
                parts: vec![Part::Text { text }],
            });
        }

        GenerateContentRequest {
            contents,
            system_instruction,
            generation_config: Some(crate::models::gemini::GenerationConfig {
                temperature: payload.temperature,
                top_p: payload.top_p,
                top_k: None,
                max_output_tokens: payload.max_tokens,
                stop_sequences: payload.stop.clone(),
            }),
        }
    }
}

#[async_trait]
impl UpstreamAdapter for GeminiAdapter {
    fn service_type(&self) -> ServiceType {
        ServiceType::Gemini
    }

    async fn list_models(&self, client: &Client, cfg: &UpstreamConfig) -> Result<Vec<String>, AppError> {
        let url = format!("{}/models", cfg.effective_base_url());
        let mut req = client.get(&url);
        if let Some(key) = &cfg.api_key {
            req = req.query(&[("key", key.as_str())]);
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
            .get("models")
            .and_then(|d| d.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m.get("name").and_then(|i| i.as_str()).map(String::from))
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
        let action = if stream { "streamGenerateContent" } else { "generateContent" };
        let url = format!(
            "{}/models/{}:{}",
            cfg.effective_base_url(),
            cfg.model_name,
            action
        );
        let body = self.to_generate_content_request(payload);

        let mut req = client.post(&url).header("Content-Type", "application/json").json(&body);
        if let Some(key) = &cfg.api_key {
            req = req.query(&[("key", key.as_str())]);
        }
        if stream {
            req = req.query(&[("alt", "sse")]);
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
        let parsed: GenerateContentResponse = match serde_json::from_str(trimmed) {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!("dropped unparseable gemini chunk");
                return Ok(None);
            }
        };

        let candidate = match parsed.candidates.first() {
            Some(c) => c,
            None => return Ok(None),
        };

        let text = candidate
            .content
            .parts
            .iter()
            .map(|p| {
                let Part::Text { text } = p;
                text.as_str()
            })
            .collect::<Vec<_>>()
            .join("");

        let chunk = ChatCompletionChunk {
            id: "chatcmpl-gemini".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: cfg.public_name.clone(),
            choices: vec![ChatCompletionChunkChoice {
                index: 0,
                delta: ChatCompletionDelta {
                    role: None,
                    content: if text.is_empty() { None } else { Some(text) },
                },
                finish_reason: candidate.finish_reason.as_ref().map(|r| r.to_lowercase()),
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
        let parsed: GenerateContentResponse = serde_json::from_slice(raw_body)?;

        let text = parsed
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| {
                        let Part::Text { text } = p;
                        text.as_str()
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let finish_reason = parsed
            .candidates
            .first()
            .and_then(|c| c.finish_reason.clone())
            .map(|r| r.to_lowercase())
            .unwrap_or_else(|| "stop".to_string());

        let usage = parsed
            .usage_metadata
            .as_ref()
            .map(|u| Usage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            })
            .unwrap_or(Usage {
                prompt_tokens: 0,
                completion_tokens: super::estimate_tokens(&text),
                total_tokens: super::estimate_tokens(&text),
            });

        let body = serde_json::json!({
            "id": "chatcmpl-gemini",
            "object": "chat.completion",
            "created": 0,
            "model": cfg.public_name,
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": text },
                "finish_reason": finish_reason,
            }],
            "usage": usage,
        });

        Ok(TranslatedResponse {
            body: serde_json::to_vec(&body)?,
            usage: Some(usage),
        })
    }
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
                ChatMessage { role: "assistant".to_string(), content: OaiContent::Text("ok".to_string()), name: None },
                ChatMessage { role: "user".to_string(), content: OaiContent::Text("hi".to_string()), name: None },
            ],
            max_tokens: None,
            temperature: None,
            top_p: None,
            stream: None,
            stop: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn maps_system_to_system_instruction() {
        let out = GeminiAdapter.to_generate_content_request(&req());
        assert!(out.system_instruction.is_some());
        assert_eq!(out.contents.len(), 2);
    }

    #[test]
    fn maps_assistant_role_to_model() {
        let out = GeminiAdapter.to_generate_content_request(&req());
        assert_eq!(out.contents[0].role, "model");
        assert_eq!(out.contents[1].role, "user");
    }
}
