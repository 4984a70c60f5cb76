//! Core data model: `UpstreamConfig`, `UsageRecord`, `HealthStatus`,
//! `AuthConfig`, and the immutable config snapshot the proxy runtime reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The closed set of upstream kinds this gateway knows how to speak to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    OpenAi,
    Anthropic,
    Gemini,
    OpenRouter,
    VscodeProxy,
    LmStudio,
    OpenAiCompatible,
    /// Placeholder for disabled rows that have not been assigned a real
    /// service yet. Never reached by the proxy runtime — enabled rows
    /// always resolve to one of the other variants.
    None,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::OpenAi => "openai",
            ServiceType::Anthropic => "anthropic",
            ServiceType::Gemini => "gemini",
            ServiceType::OpenRouter => "openrouter",
            ServiceType::VscodeProxy => "vscode_proxy",
            ServiceType::LmStudio => "lmstudio",
            ServiceType::OpenAiCompatible => "openai_compatible",
            ServiceType::None => "none",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ServiceType::OpenAi => "https://api.openai.com/v1",
            ServiceType::Anthropic => "https://api.anthropic.com/v1",
            ServiceType::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            ServiceType::OpenRouter => "https://openrouter.ai/api/v1",
            ServiceType::VscodeProxy => "http://127.0.0.1:4321/v1",
            ServiceType::LmStudio => "http://127.0.0.1:1234/v1",
            ServiceType::OpenAiCompatible => "",
            ServiceType::None => "",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ServiceType::OpenAi),
            "anthropic" => Ok(ServiceType::Anthropic),
            "gemini" => Ok(ServiceType::Gemini),
            "openrouter" => Ok(ServiceType::OpenRouter),
            "vscode_proxy" => Ok(ServiceType::VscodeProxy),
            "lmstudio" => Ok(ServiceType::LmStudio),
            "openai_compatible" => Ok(ServiceType::OpenAiCompatible),
            "none" => Ok(ServiceType::None),
            other => Err(format!("unknown service_type '{other}'")),
        }
    }
}

/// One configured upstream provider, decrypted and in-memory form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub id: i64,
    pub service_type: ServiceType,
    pub public_name: String,
    pub model_name: String,
    /// Plaintext api key — only ever populated by `ConfigStore` after
    /// decryption, never by a row read directly off the wire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
    pub is_enabled: bool,
    pub available_on_general: bool,
    pub available_on_special: bool,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UpstreamConfig {
    /// The base URL to actually dial: the configured override, or the
    /// service type's documented default when left blank.
    pub fn effective_base_url(&self) -> &str {
        if self.base_url.trim().is_empty() {
            self.service_type.default_base_url()
        } else {
            self.base_url.trim_end_matches('/')
        }
    }

    pub fn visible_on(&self, endpoint: EndpointKind) -> bool {
        self.is_enabled
            && match endpoint {
                EndpointKind::General => self.available_on_general,
                EndpointKind::Special => self.available_on_special,
            }
    }
}

/// Which of the two proxy listeners a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    General,
    Special,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::General => "general",
            EndpointKind::Special => "special",
        }
    }
}

/// Outcome of a completed or aborted request, persisted on every
/// `UsageRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    Success,
    ClientError,
    UpstreamError,
    Timeout,
}

impl UsageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageStatus::Success => "success",
            UsageStatus::ClientError => "client_error",
            UsageStatus::UpstreamError => "upstream_error",
            UsageStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for UsageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An append-only per-request telemetry row. Never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    pub client_ip: String,
    pub public_name: String,
    pub config_id: Option<i64>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub response_time_ms: u64,
    pub status: UsageStatus,
    pub error_message: Option<String>,
}

impl UsageRecord {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Ok,
    Ng,
    Unknown,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Ok => "ok",
            HealthState::Ng => "ng",
            HealthState::Unknown => "unknown",
        }
    }
}

/// Latest health probe result for one config, rewritten in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub config_id: i64,
    pub status: HealthState,
    pub checked_at: DateTime<Utc>,
    pub response_time_ms: Option<u64>,
    pub model_count: Option<u32>,
    pub error_message: Option<String>,
}

/// Singleton auth row. The core persistence layer only hosts it for the
/// out-of-scope admin UI; nothing in this crate reads the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub password_hash: String,
    pub salt: String,
    pub session_secret: String,
}

/// An immutable, atomically-published view of the enabled configs, indexed
/// by `public_name` for O(1) resolution on the request hot path.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    by_public_name: HashMap<String, UpstreamConfig>,
}

impl ConfigSnapshot {
    pub fn build(configs: Vec<UpstreamConfig>) -> Self {
        let by_public_name = configs
            .into_iter()
            .filter(|c| c.is_enabled)
            .map(|c| (c.public_name.clone(), c))
            .collect();
        Self { by_public_name }
    }

    pub fn resolve(&self, public_name: &str) -> Option<&UpstreamConfig> {
        self.by_public_name.get(public_name)
    }

    pub fn visible_on(&self, endpoint: EndpointKind) -> Vec<&UpstreamConfig> {
        let mut v: Vec<&UpstreamConfig> = self
            .by_public_name
            .values()
            .filter(|c| c.visible_on(endpoint))
            .collect();
        v.sort_by(|a, b| a.public_name.cmp(&b.public_name));
        v
    }

    pub fn len(&self) -> usize {
        self.by_public_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_public_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(public_name: &str, general: bool, special: bool) -> UpstreamConfig {
        UpstreamConfig {
            id: 1,
            service_type: ServiceType::OpenAi,
            public_name: public_name.to_string(),
            model_name: "gpt-4-0613".to_string(),
            api_key: Some("sk-test".to_string()),
            base_url: String::new(),
            is_enabled: true,
            available_on_general: general,
            available_on_special: special,
            notes: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn snapshot_resolves_by_public_name() {
        let snap = ConfigSnapshot::build(vec![cfg("gpt-4", true, true)]);
        assert!(snap.resolve("gpt-4").is_some());
        assert!(snap.resolve("missing").is_none());
    }

    #[test]
    fn snapshot_excludes_disabled_rows() {
        let mut c = cfg("gpt-4", true, true);
        c.is_enabled = false;
        let snap = ConfigSnapshot::build(vec![c]);
        assert!(snap.resolve("gpt-4").is_none());
    }

    #[test]
    fn visibility_is_per_endpoint() {
        let snap = ConfigSnapshot::build(vec![cfg("secret-4", false, true)]);
        assert!(snap.visible_on(EndpointKind::General).is_empty());
        assert_eq!(snap.visible_on(EndpointKind::Special).len(), 1);
    }

    #[test]
    fn effective_base_url_falls_back_to_default() {
        let c = cfg("gpt-4", true, true);
        assert_eq!(c.effective_base_url(), "https://api.openai.com/v1");
    }

    #[test]
    fn service_type_round_trips_through_str() {
        for s in ["openai", "anthropic", "gemini", "openrouter", "vscode_proxy", "lmstudio", "openai_compatible", "none"] {
            let parsed: ServiceType = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!("bogus".parse::<ServiceType>().is_err());
    }
}
