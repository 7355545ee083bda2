//! Record routes: health, metrics, assessments, analyses, progress and
//! impression feedback.

use crate::error::{ApiError, ApiResult};
use crate::middleware::UserId;
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use foundations_common::api::{
    FeedbackRequest, HealthResponse, ProgressUpdate, SaveAnalysisRequest, SaveAssessmentRequest,
    IDEMPOTENCY_HEADER,
};
use foundations_common::navigation::Position;
use foundations_common::records::{AnalysisRecord, AssessmentRecord, ProgressWatermark};
use std::sync::Arc;
use tracing::info;

type AppStateArc = Arc<AppState>;

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/health", get(health))
        .route("/metrics", get(metrics))
}

async fn health(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        llm_enabled: state.config.llm.enabled && !state.llm.default_model().is_empty(),
    })
}

async fn metrics(State(state): State<AppStateArc>) -> ApiResult<impl IntoResponse> {
    let body = state
        .metrics
        .export()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

// ============================================================================
// Assessment Routes
// ============================================================================

pub fn assessment_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/assessments", get(list_assessments).post(save_assessment))
        .route("/v1/assessments/:id", get(get_assessment))
}

async fn list_assessments(
    State(state): State<AppStateArc>,
    user: UserId,
) -> ApiResult<Json<Vec<AssessmentRecord>>> {
    Ok(Json(state.db.list_assessments(user.as_str())?))
}

async fn get_assessment(
    State(state): State<AppStateArc>,
    user: UserId,
    Path(id): Path<String>,
) -> ApiResult<Json<AssessmentRecord>> {
    Ok(Json(state.db.get_assessment(user.as_str(), &id)?))
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

/// Save an assessment. A replayed `Idempotency-Key` answers with the
/// original record and `200`; a new save answers `201`.
async fn save_assessment(
    State(state): State<AppStateArc>,
    user: UserId,
    headers: HeaderMap,
    Json(req): Json<SaveAssessmentRequest>,
) -> ApiResult<(StatusCode, Json<AssessmentRecord>)> {
    let key = idempotency_key(&headers);

    if let Some(key) = key.as_deref() {
        if let Some(record) = state.idempotency.get(user.as_str(), key).await {
            state.metrics.idempotent_replays_total.inc();
            return Ok((StatusCode::OK, Json(record)));
        }
    }

    let (record, replayed) = state
        .db
        .save_assessment(user.as_str(), &req.responses, key.as_deref())?;

    if let Some(key) = key.as_deref() {
        state
            .idempotency
            .insert(user.as_str(), key, record.clone())
            .await;
    }

    if replayed {
        state.metrics.idempotent_replays_total.inc();
        return Ok((StatusCode::OK, Json(record)));
    }

    info!("Saved assessment {} for {}", record.id, user.as_str());
    state.metrics.assessments_saved_total.inc();
    Ok((StatusCode::CREATED, Json(record)))
}

// ============================================================================
// Analysis Routes
// ============================================================================

pub fn analysis_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/analyses", get(list_analyses).post(save_analysis))
        .route("/v1/analyses/:id", get(get_analysis))
}

async fn list_analyses(
    State(state): State<AppStateArc>,
    user: UserId,
) -> ApiResult<Json<Vec<AnalysisRecord>>> {
    Ok(Json(state.db.list_analyses(user.as_str())?))
}

async fn get_analysis(
    State(state): State<AppStateArc>,
    user: UserId,
    Path(id): Path<String>,
) -> ApiResult<Json<AnalysisRecord>> {
    Ok(Json(state.db.get_analysis(user.as_str(), &id)?))
}

async fn save_analysis(
    State(state): State<AppStateArc>,
    user: UserId,
    Json(req): Json<SaveAnalysisRequest>,
) -> ApiResult<(StatusCode, Json<AnalysisRecord>)> {
    let record = state
        .db
        .save_analysis(user.as_str(), &req.result, req.assessment_id.as_deref())?;
    state.metrics.analyses_saved_total.inc();
    Ok((StatusCode::CREATED, Json(record)))
}

// ============================================================================
// Progress Routes
// ============================================================================

pub fn progress_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/progress", get(get_progress).put(put_progress))
}

async fn get_progress(
    State(state): State<AppStateArc>,
    user: UserId,
) -> ApiResult<Json<ProgressWatermark>> {
    state
        .db
        .get_progress(user.as_str())?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Progress".to_string()))
}

/// Returns the watermark in effect, which is the stored one when the
/// update does not move forward
async fn put_progress(
    State(state): State<AppStateArc>,
    user: UserId,
    Json(update): Json<ProgressUpdate>,
) -> ApiResult<Json<ProgressWatermark>> {
    let position = Position::new(update.phase, update.step);
    Ok(Json(state.db.advance_progress(user.as_str(), position)?))
}

// ============================================================================
// Feedback Routes
// ============================================================================

pub fn feedback_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/impressions/:id/feedback", post(submit_feedback))
}

async fn submit_feedback(
    State(state): State<AppStateArc>,
    user: UserId,
    Path(id): Path<String>,
    Json(req): Json<FeedbackRequest>,
) -> ApiResult<StatusCode> {
    if !req.is_valid() {
        return Err(ApiError::BadRequest(format!(
            "Rating must be between {} and {}",
            FeedbackRequest::MIN,
            FeedbackRequest::MAX
        )));
    }
    state.db.rate_impression(user.as_str(), &id, req.rating)?;
    state.metrics.feedback_total.inc();
    Ok(StatusCode::NO_CONTENT)
}
