//! LLM proxy routes. Every upstream call made on behalf of a prompt variant
//! is recorded as an impression, failures included. A disabled backend makes
//! no call and records nothing.

use crate::db::ImpressionDraft;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{llm_rate_limit, MaybeUserId, UserId};
use crate::server::AppState;
use axum::{extract::State, routing::post, Json, Router};
use foundations_common::api::{ChatProxyRequest, ChatProxyResponse, InsightsRequest, InsightsResponse};
use foundations_common::llm::{ChatCompletion, ChatRequest, LlmError};
use foundations_common::phases::default_phases;
use foundations_common::prompts::{build_messages, select_variant, PromptVariant};
use foundations_common::records::AnalysisResult;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

type AppStateArc = Arc<AppState>;

pub fn llm_routes(state: AppStateArc) -> Router<AppStateArc> {
    Router::new()
        .route("/v1/insights", post(insights))
        .route("/v1/llm/chat", post(chat))
        .route_layer(axum::middleware::from_fn_with_state(state, llm_rate_limit))
}

/// Upstream call with latency, metrics and the model actually requested
async fn timed_chat(state: &AppState, request: &ChatRequest) -> (Result<ChatCompletion, LlmError>, u64) {
    let model = request
        .model
        .clone()
        .unwrap_or_else(|| state.llm.default_model().to_string());
    let started = Instant::now();
    let result = state.llm.chat(request).await;
    let elapsed = started.elapsed();

    state
        .metrics
        .record_llm(&model, result.is_ok(), elapsed.as_secs_f64());
    if let Err(e) = &result {
        warn!("LLM call with model {} failed: {}", model, e);
    }
    (result, elapsed.as_millis() as u64)
}

/// A disabled backend never reached upstream, so there is nothing to attribute
fn reject_disabled<T>(result: &Result<T, LlmError>) -> ApiResult<()> {
    match result {
        Err(LlmError::Disabled) => Err(ApiError::LlmDisabled),
        _ => Ok(()),
    }
}

fn record_impression(state: &AppState, draft: ImpressionDraft) -> ApiResult<String> {
    let impression = state.db.record_impression(&draft)?;
    state.metrics.record_impression(&impression.variant_id);
    Ok(impression.id)
}

fn pick_variant(state: &AppState, variants: &[PromptVariant]) -> ApiResult<PromptVariant> {
    let mut rng = state
        .rng
        .lock()
        .map_err(|_| ApiError::Internal("Variant RNG lock poisoned".to_string()))?;
    select_variant(variants, &mut *rng)
        .cloned()
        .ok_or_else(|| ApiError::NotFound("Active variant".to_string()))
}

/// Generate insights for an assessment using a weighted draw among the
/// prompt's active variants
async fn insights(
    State(state): State<AppStateArc>,
    user: UserId,
    Json(req): Json<InsightsRequest>,
) -> ApiResult<Json<InsightsResponse>> {
    let prompt = state
        .db
        .get_prompt_by_key(&req.prompt_key)?
        .ok_or_else(|| ApiError::NotFound(format!("Prompt '{}'", req.prompt_key)))?;

    let responses = match (&req.assessment_id, req.responses) {
        (Some(id), _) => state.db.get_assessment(user.as_str(), id)?.responses,
        (None, Some(responses)) => responses,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "Either assessment_id or responses is required".to_string(),
            ))
        }
    };
    if responses.is_empty() {
        return Err(ApiError::BadRequest("No responses to analyze".to_string()));
    }

    let variants = state.db.list_variants(&prompt.id)?;
    let variant = pick_variant(&state, &variants)?;

    let phases = default_phases();
    let request = ChatRequest {
        messages: build_messages(&variant, &responses, &phases),
        model: variant.model.clone(),
        temperature: variant.temperature,
        max_tokens: Some(state.config.llm.max_tokens),
    };

    let (result, latency_ms) = timed_chat(&state, &request).await;
    reject_disabled(&result)?;
    let impression_id = record_impression(
        &state,
        ImpressionDraft {
            prompt_id: prompt.id.clone(),
            variant_id: variant.id.clone(),
            user_id: Some(user.as_str().to_string()),
            assessment_id: req.assessment_id.clone(),
            latency_ms,
            success: result.is_ok(),
        },
    )?;
    let completion = result?;

    let mut analysis = AnalysisResult::from_llm_output(&completion.content);
    analysis.variant_id = Some(variant.id.clone());
    analysis.model = Some(completion.model);

    info!(
        "Insights for {} from variant {} in {}ms",
        user.as_str(),
        variant.label,
        latency_ms
    );
    Ok(Json(InsightsResponse {
        impression_id,
        variant_id: variant.id,
        variant_label: variant.label,
        latency_ms,
        result: analysis,
    }))
}

/// Forward a raw chat request. With `variant_id` the call is attributed to
/// that variant.
async fn chat(
    State(state): State<AppStateArc>,
    user: MaybeUserId,
    Json(req): Json<ChatProxyRequest>,
) -> ApiResult<Json<ChatProxyResponse>> {
    if req.request.messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".to_string()));
    }

    let variant = req
        .variant_id
        .as_deref()
        .map(|id| state.db.get_variant(id))
        .transpose()?;

    let mut request = req.request;
    if request.max_tokens.is_none() {
        request.max_tokens = Some(state.config.llm.max_tokens);
    }

    let (result, latency_ms) = timed_chat(&state, &request).await;
    reject_disabled(&result)?;
    let impression_id = match variant {
        Some(variant) => Some(record_impression(
            &state,
            ImpressionDraft {
                prompt_id: variant.prompt_id,
                variant_id: variant.id,
                user_id: user.0,
                assessment_id: req.assessment_id,
                latency_ms,
                success: result.is_ok(),
            },
        )?),
        None => None,
    };

    Ok(Json(ChatProxyResponse {
        completion: result?,
        impression_id,
    }))
}
