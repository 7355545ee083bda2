//! Prompt admin console routes: prompts, their variants and A/B stats.
//! All routes sit behind the admin bearer token.

use crate::error::{ApiError, ApiResult};
use crate::middleware::require_admin;
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use foundations_common::api::{NewPrompt, NewVariant, VariantPatch};
use foundations_common::prompts::{Prompt, PromptDetail, PromptVariant, VariantStats};
use std::sync::Arc;
use tracing::info;

type AppStateArc = Arc<AppState>;

pub fn admin_routes(state: AppStateArc) -> Router<AppStateArc> {
    Router::new()
        .route("/v1/admin/prompts", get(list_prompts).post(create_prompt))
        .route("/v1/admin/prompts/:id", get(get_prompt).delete(delete_prompt))
        .route("/v1/admin/prompts/:id/variants", post(add_variant))
        .route("/v1/admin/prompts/:id/stats", get(prompt_stats))
        .route("/v1/admin/variants/:id", put(update_variant).delete(delete_variant))
        .route_layer(axum::middleware::from_fn_with_state(state, require_admin))
}

fn require_non_empty(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} must not be empty", field)));
    }
    Ok(())
}

// ============================================================================
// Prompts
// ============================================================================

async fn list_prompts(State(state): State<AppStateArc>) -> ApiResult<Json<Vec<Prompt>>> {
    Ok(Json(state.db.list_prompts()?))
}

async fn create_prompt(
    State(state): State<AppStateArc>,
    Json(new): Json<NewPrompt>,
) -> ApiResult<(StatusCode, Json<Prompt>)> {
    require_non_empty("key", &new.key)?;
    let prompt = state.db.create_prompt(&new)?;
    info!("Created prompt {} ({})", prompt.key, prompt.id);
    Ok((StatusCode::CREATED, Json(prompt)))
}

async fn get_prompt(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> ApiResult<Json<PromptDetail>> {
    Ok(Json(state.db.prompt_detail(&id)?))
}

/// Deletes the prompt with its variants and their impressions
async fn delete_prompt(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.db.delete_prompt(&id)?;
    info!("Deleted prompt {}", id);
    Ok(StatusCode::NO_CONTENT)
}

async fn prompt_stats(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<VariantStats>>> {
    state.db.get_prompt(&id)?;
    Ok(Json(state.db.variant_stats(&id)?))
}

// ============================================================================
// Variants
// ============================================================================

async fn add_variant(
    State(state): State<AppStateArc>,
    Path(prompt_id): Path<String>,
    Json(new): Json<NewVariant>,
) -> ApiResult<(StatusCode, Json<PromptVariant>)> {
    require_non_empty("label", &new.label)?;
    require_non_empty("user_template", &new.user_template)?;
    let variant = state.db.add_variant(&prompt_id, &new)?;
    info!("Added variant {} to prompt {}", variant.label, prompt_id);
    Ok((StatusCode::CREATED, Json(variant)))
}

async fn update_variant(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
    Json(patch): Json<VariantPatch>,
) -> ApiResult<Json<PromptVariant>> {
    if patch.is_empty() {
        return Err(ApiError::BadRequest("Nothing to update".to_string()));
    }
    if let Some(label) = &patch.label {
        require_non_empty("label", label)?;
    }
    Ok(Json(state.db.update_variant(&id, &patch)?))
}

async fn delete_variant(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.db.delete_variant(&id)?;
    Ok(StatusCode::NO_CONTENT)
}
