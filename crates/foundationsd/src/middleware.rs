//! Request middleware: caller identity, admin gate, LLM rate limit and
//! request metrics.

use crate::error::ApiError;
use crate::server::AppState;
use axum::{
    async_trait,
    extract::{FromRequestParts, MatchedPath, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use foundations_common::api::USER_HEADER;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Maximum body size: 256 KiB
pub const MAX_BODY_SIZE: usize = 256 * 1024;

/// LLM routes: 10 requests per minute per user
pub const LLM_RATE_LIMIT_REQUESTS: usize = 10;
pub const LLM_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

// ============================================================================
// Identity
// ============================================================================

/// Caller identity from the `x-user-id` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn header_user(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_user(&parts.headers)
            .map(UserId)
            .ok_or(ApiError::Unauthorized)
    }
}

/// Optional identity for routes that also serve anonymous callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaybeUserId(pub Option<String>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for MaybeUserId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUserId(header_user(&parts.headers)))
    }
}

// ============================================================================
// Admin gate
// ============================================================================

/// Extract bearer token from the Authorization header
fn extract_bearer(request: &Request) -> Option<&str> {
    let auth_str = request.headers().get("authorization")?.to_str().ok()?;
    auth_str.strip_prefix("Bearer ").map(str::trim)
}

/// Admin routes need `Authorization: Bearer <token>` matching the configured
/// token. With no token configured every admin request is refused.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        warn!("Admin request refused: no admin token configured");
        return Err(ApiError::Forbidden);
    };
    let authorized = extract_bearer(&request).is_some_and(|token| token == expected);
    if !authorized {
        warn!("Admin request refused: bad or missing token");
        return Err(ApiError::Forbidden);
    }
    Ok(next.run(request).await)
}

// ============================================================================
// Rate limiting
// ============================================================================

/// Sliding-window request counter per user
pub struct RateLimiter {
    requests: RwLock<HashMap<String, Vec<Instant>>>,
    limit: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            limit,
            window,
        }
    }

    /// Record a request; false when the user is over the limit
    pub async fn check(&self, user: &str) -> bool {
        let mut requests = self.requests.write().await;
        let user_reqs = requests.entry(user.to_string()).or_default();
        let now = Instant::now();

        user_reqs.retain(|&ts| now.duration_since(ts) < self.window);
        if user_reqs.len() >= self.limit {
            return false;
        }
        user_reqs.push(now);
        true
    }

    /// Drop users with no request inside the window (call periodically)
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut requests = self.requests.write().await;
        requests.retain(|_, timestamps| {
            timestamps.retain(|&ts| now.duration_since(ts) < self.window);
            !timestamps.is_empty()
        });
        debug!("Rate limiter cleanup: {} active users", requests.len());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(LLM_RATE_LIMIT_REQUESTS, LLM_RATE_LIMIT_WINDOW)
    }
}

/// Per-user limit on routes that reach the LLM. Anonymous callers share
/// one bucket.
pub async fn llm_rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = header_user(request.headers()).unwrap_or_else(|| "anonymous".to_string());
    if !state.rate_limiter.check(&user).await {
        warn!("LLM rate limit exceeded for {}", user);
        state.metrics.rate_limit_violations_total.inc();
        return Err(ApiError::RateLimited);
    }
    Ok(next.run(request).await)
}

// ============================================================================
// Metrics
// ============================================================================

pub async fn track_metrics(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();
    let started = Instant::now();

    let response = next.run(request).await.into_response();

    state.metrics.record_request(
        &route,
        &method,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}
