//! `GET /v1/models` (§4.2): lists configs visible on the endpoint the
//! request arrived on, shaped as the OpenAI models list.

use axum::extract::State;
use axum::Json;

use crate::handlers::pipeline::EndpointCtx;
use crate::models::openai::{ModelObject, ModelsResponse};

pub async fn list_models(State(ctx): State<EndpointCtx>) -> Json<ModelsResponse> {
    let snapshot = ctx.app.config_store.snapshot();
    let data = snapshot
        .visible_on(ctx.kind)
        .into_iter()
        .map(|cfg| ModelObject {
            id: cfg.public_name.clone(),
            object: "model".to_string(),
            created: cfg.created_at.timestamp(),
            owned_by: cfg.service_type.as_str().to_string(),
        })
        .collect();

    Json(ModelsResponse {
        object: "list".to_string(),
        data,
    })
}
