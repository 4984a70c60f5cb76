//! Placeholder adapter for the `none` service type. Reserved for disabled
//! rows that have not yet been assigned a real provider; unreachable on the
//! proxy hot path because enabled rows never resolve to `none`.

use async_trait::async_trait;
use reqwest::Client;

use super::{TranslatedResponse, UpstreamAdapter};
use crate::domain::{ServiceType, UpstreamConfig};
use crate::error::AppError;
use crate::models::openai::ChatCompletionRequest;

pub struct NoneAdapter;

#[async_trait]
impl UpstreamAdapter for NoneAdapter {
    fn service_type(&self) -> ServiceType {
        ServiceType::None
    }

    async fn list_models(&self, _client: &Client, _cfg: &UpstreamConfig) -> Result<Vec<String>, AppError> {
        Err(AppError::Internal("adapter 'none' invoked on a live request".to_string()))
    }

    fn build_request(
        &self,
        _client: &Client,
        _cfg: &UpstreamConfig,
        _payload: &ChatCompletionRequest,
        _stream: bool,
    ) -> Result<reqwest::RequestBuilder, AppError> {
        Err(AppError::Internal("adapter 'none' invoked on a live request".to_string()))
    }

    fn translate_response_chunk(
        &self,
        _raw_frame: &str,
        _cfg: &UpstreamConfig,
    ) -> Result<Option<Vec<u8>>, AppError> {
        Err(AppError::Internal("adapter 'none' invoked on a live request".to_string()))
    }

    fn translate_response(
        &self,
        _raw_body: &[u8],
        _cfg: &UpstreamConfig,
    ) -> Result<TranslatedResponse, AppError> {
        Err(AppError::Internal("adapter 'none' invoked on a live request".to_string()))
    }
}
