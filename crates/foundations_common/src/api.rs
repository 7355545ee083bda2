//! Wire types shared by `foundationsd` and `foundationsctl`.

use crate::llm::{ChatCompletion, ChatRequest};
use crate::prompts::INSIGHTS_PROMPT_KEY;
use crate::records::AnalysisResult;
use crate::responses::Responses;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller identity, set by the fronting auth provider
pub const USER_HEADER: &str = "x-user-id";

/// Replays of a request with the same key return the original result
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:7878";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub llm_enabled: bool,
}

/// JSON error body of every failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveAssessmentRequest {
    pub responses: Responses,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveAnalysisRequest {
    pub result: AnalysisResult,
    #[serde(default)]
    pub assessment_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub phase: usize,
    pub step: usize,
}

/// Generate insights for a stored assessment or for inline responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsRequest {
    #[serde(default = "default_prompt_key")]
    pub prompt_key: String,
    #[serde(default)]
    pub assessment_id: Option<String>,
    /// Used when `assessment_id` is absent
    #[serde(default)]
    pub responses: Option<Responses>,
}

fn default_prompt_key() -> String {
    INSIGHTS_PROMPT_KEY.to_string()
}

impl InsightsRequest {
    pub fn for_assessment(assessment_id: impl Into<String>) -> Self {
        Self {
            prompt_key: default_prompt_key(),
            assessment_id: Some(assessment_id.into()),
            responses: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsResponse {
    pub impression_id: String,
    pub variant_id: String,
    pub variant_label: String,
    pub latency_ms: u64,
    pub result: AnalysisResult,
}

/// Raw chat proxy; an impression is recorded when `variant_id` is given
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatProxyRequest {
    #[serde(flatten)]
    pub request: ChatRequest,
    #[serde(default)]
    pub variant_id: Option<String>,
    #[serde(default)]
    pub assessment_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatProxyResponse {
    pub completion: ChatCompletion,
    #[serde(default)]
    pub impression_id: Option<String>,
}

/// One recorded use of a variant against the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Impression {
    pub id: String,
    pub prompt_id: String,
    pub variant_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub assessment_id: Option<String>,
    pub latency_ms: u64,
    pub success: bool,
    #[serde(default)]
    pub rating: Option<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub rating: u8,
}

impl FeedbackRequest {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn is_valid(&self) -> bool {
        (Self::MIN..=Self::MAX).contains(&self.rating)
    }
}

// ============================================================================
// Admin
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPrompt {
    pub key: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVariant {
    pub label: String,
    pub system_prompt: String,
    pub user_template: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_weight() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

/// Partial update; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl VariantPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
