//! HTTP client for foundationsd.
//!
//! Implements the core's store traits so the session and insights tracker
//! talk to the daemon without knowing about HTTP.

use crate::auth::CliAuth;
use async_trait::async_trait;
use foundations_common::api::{
    ErrorBody, FeedbackRequest, HealthResponse, InsightsRequest, InsightsResponse, NewPrompt,
    NewVariant, ProgressUpdate, SaveAnalysisRequest, SaveAssessmentRequest, VariantPatch,
    IDEMPOTENCY_HEADER, USER_HEADER,
};
use foundations_common::error::StoreError;
use foundations_common::navigation::Position;
use foundations_common::prompts::{Prompt, PromptDetail, PromptVariant, VariantStats};
use foundations_common::records::{AnalysisRecord, AnalysisResult, AssessmentRecord, ProgressWatermark};
use foundations_common::responses::Responses;
use foundations_common::store::{AnalysisStore, AssessmentStore};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

/// Insights wait on the LLM, so allow more than a plain record call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<CliAuth>,
    admin_token: Option<String>,
    idempotency_scope: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: &str, auth: Arc<CliAuth>, admin_token: Option<String>) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            admin_token: admin_token.filter(|t| !t.trim().is_empty()),
            idempotency_scope: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Scope saves to one attempt (the draft id) so a retake with the same
    /// answers is saved as a new record
    pub fn set_idempotency_scope(&self, scope: Option<String>) {
        if let Ok(mut current) = self.idempotency_scope.write() {
            *current = scope;
        }
    }

    pub fn idempotency_key(&self, responses: &Responses) -> String {
        let fingerprint = responses.fingerprint();
        match self.idempotency_scope.read().ok().and_then(|s| s.clone()) {
            Some(scope) => format!("{}:{}", scope, fingerprint),
            None => fingerprint,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match self.auth.user_id() {
            Some(user) => builder.header(USER_HEADER, user),
            None => builder,
        }
    }

    fn admin_request(&self, method: Method, path: &str) -> Result<RequestBuilder, StoreError> {
        let token = self.admin_token.as_deref().ok_or_else(|| StoreError::Server {
            status: 403,
            message: "No admin token (use --admin-token or FOUNDATIONS_ADMIN_TOKEN)".to_string(),
        })?;
        Ok(self.http.request(method, format!("{}{}", self.base_url, path)).bearer_auth(token))
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Response, StoreError> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        debug!("{} {}", status.as_u16(), response.url());
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, StoreError> {
        let response = self.execute(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn send_empty(&self, builder: RequestBuilder) -> Result<(), StoreError> {
        self.execute(builder).await.map(|_| ())
    }

    // ========================================================================
    // Service
    // ========================================================================

    pub async fn health(&self) -> Result<HealthResponse, StoreError> {
        self.send(self.request(Method::GET, "/v1/health")).await
    }

    pub async fn insights(&self, request: &InsightsRequest) -> Result<InsightsResponse, StoreError> {
        self.send(self.request(Method::POST, "/v1/insights").json(request))
            .await
    }

    pub async fn rate_impression(&self, impression_id: &str, rating: u8) -> Result<(), StoreError> {
        let path = format!("/v1/impressions/{}/feedback", impression_id);
        self.send_empty(self.request(Method::POST, &path).json(&FeedbackRequest { rating }))
            .await
    }

    // ========================================================================
    // Admin console
    // ========================================================================

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>, StoreError> {
        self.send(self.admin_request(Method::GET, "/v1/admin/prompts")?)
            .await
    }

    pub async fn prompt_detail(&self, id: &str) -> Result<PromptDetail, StoreError> {
        let path = format!("/v1/admin/prompts/{}", id);
        self.send(self.admin_request(Method::GET, &path)?).await
    }

    pub async fn create_prompt(&self, new: &NewPrompt) -> Result<Prompt, StoreError> {
        self.send(self.admin_request(Method::POST, "/v1/admin/prompts")?.json(new))
            .await
    }

    pub async fn delete_prompt(&self, id: &str) -> Result<(), StoreError> {
        let path = format!("/v1/admin/prompts/{}", id);
        self.send_empty(self.admin_request(Method::DELETE, &path)?)
            .await
    }

    pub async fn add_variant(&self, prompt_id: &str, new: &NewVariant) -> Result<PromptVariant, StoreError> {
        let path = format!("/v1/admin/prompts/{}/variants", prompt_id);
        self.send(self.admin_request(Method::POST, &path)?.json(new))
            .await
    }

    pub async fn update_variant(&self, id: &str, patch: &VariantPatch) -> Result<PromptVariant, StoreError> {
        let path = format!("/v1/admin/variants/{}", id);
        self.send(self.admin_request(Method::PUT, &path)?.json(patch))
            .await
    }

    pub async fn delete_variant(&self, id: &str) -> Result<(), StoreError> {
        let path = format!("/v1/admin/variants/{}", id);
        self.send_empty(self.admin_request(Method::DELETE, &path)?)
            .await
    }

    pub async fn prompt_stats(&self, prompt_id: &str) -> Result<Vec<VariantStats>, StoreError> {
        let path = format!("/v1/admin/prompts/{}/stats", prompt_id);
        self.send(self.admin_request(Method::GET, &path)?).await
    }
}

fn transport_error(e: reqwest::Error) -> StoreError {
    if e.is_decode() {
        StoreError::Decode(e.to_string())
    } else {
        StoreError::Transport(e.to_string())
    }
}

/// Map a non-success response to a store error, preferring the server's
/// `{ "error": ... }` message
pub fn status_error(status: StatusCode, body: &str) -> StoreError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().to_string());
    match status {
        StatusCode::UNAUTHORIZED => StoreError::Unauthorized,
        StatusCode::NOT_FOUND => StoreError::NotFound(message),
        _ => StoreError::Server {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl AssessmentStore for ApiClient {
    async fn list_assessments(&self) -> Result<Vec<AssessmentRecord>, StoreError> {
        self.send(self.request(Method::GET, "/v1/assessments")).await
    }

    async fn get_assessment(&self, id: &str) -> Result<AssessmentRecord, StoreError> {
        let path = format!("/v1/assessments/{}", id);
        self.send(self.request(Method::GET, &path)).await
    }

    async fn save_assessment(&self, responses: &Responses) -> Result<AssessmentRecord, StoreError> {
        let body = SaveAssessmentRequest {
            responses: responses.clone(),
        };
        let builder = self
            .request(Method::POST, "/v1/assessments")
            .header(IDEMPOTENCY_HEADER, self.idempotency_key(responses))
            .json(&body);
        self.send(builder).await
    }

    async fn get_progress(&self) -> Result<Option<Position>, StoreError> {
        match self
            .send::<ProgressWatermark>(self.request(Method::GET, "/v1/progress"))
            .await
        {
            Ok(watermark) => Ok(Some(watermark.position())),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn save_progress(&self, position: Position) -> Result<(), StoreError> {
        let update = ProgressUpdate {
            phase: position.phase,
            step: position.step,
        };
        self.send_empty(self.request(Method::PUT, "/v1/progress").json(&update))
            .await
    }
}

#[async_trait]
impl AnalysisStore for ApiClient {
    async fn list_analyses(&self) -> Result<Vec<AnalysisRecord>, StoreError> {
        self.send(self.request(Method::GET, "/v1/analyses")).await
    }

    async fn get_analysis(&self, id: &str) -> Result<AnalysisRecord, StoreError> {
        let path = format!("/v1/analyses/{}", id);
        self.send(self.request(Method::GET, &path)).await
    }

    async fn save_analysis(
        &self,
        result: &AnalysisResult,
        assessment_id: Option<&str>,
    ) -> Result<AnalysisRecord, StoreError> {
        let body = SaveAnalysisRequest {
            result: result.clone(),
            assessment_id: assessment_id.map(str::to_string),
        };
        self.send(self.request(Method::POST, "/v1/analyses").json(&body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ApiClient {
        ApiClient::new("http://127.0.0.1:7878/", Arc::new(CliAuth::new(None)), None).unwrap()
    }

    #[test]
    fn test_base_url_is_normalized() {
        assert_eq!(client().base_url(), "http://127.0.0.1:7878");
    }

    #[test]
    fn test_idempotency_key_is_scoped() {
        let client = client();
        let mut responses = Responses::new();
        responses.update("energy_level", 4.0);

        let bare = client.idempotency_key(&responses);
        assert_eq!(bare, responses.fingerprint());

        client.set_idempotency_scope(Some("draft-1".into()));
        let scoped = client.idempotency_key(&responses);
        assert_eq!(scoped, format!("draft-1:{}", bare));

        client.set_idempotency_scope(Some("draft-2".into()));
        assert_ne!(client.idempotency_key(&responses), scoped);
    }

    #[test]
    fn test_status_error_mapping() {
        assert_eq!(status_error(StatusCode::UNAUTHORIZED, ""), StoreError::Unauthorized);
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, r#"{"error":"Assessment a1 not found"}"#),
            StoreError::NotFound("Assessment a1 not found".into())
        );
        assert_eq!(
            status_error(StatusCode::BAD_GATEWAY, "upstream down\n"),
            StoreError::Server {
                status: 502,
                message: "upstream down".into()
            }
        );
    }

    #[tokio::test]
    async fn test_admin_calls_need_token() {
        let err = client().list_prompts().await.unwrap_err();
        assert!(matches!(err, StoreError::Server { status: 403, .. }));
    }
}
