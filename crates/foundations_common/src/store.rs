//! Collaborator contracts consumed by the session: remote record stores and
//! the auth provider. Transport is up to the implementor.

use crate::error::StoreError;
use crate::navigation::Position;
use crate::records::{AnalysisRecord, AnalysisResult, AssessmentRecord};
use crate::responses::Responses;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Remote assessment records for the current user
#[async_trait]
pub trait AssessmentStore: Send + Sync {
    async fn list_assessments(&self) -> Result<Vec<AssessmentRecord>, StoreError>;

    async fn get_assessment(&self, id: &str) -> Result<AssessmentRecord, StoreError>;

    /// Save responses; the server assigns `created_at`. Saving the same
    /// payload again must be safe.
    async fn save_assessment(&self, responses: &Responses) -> Result<AssessmentRecord, StoreError>;

    /// Furthest position reached, `None` when never recorded
    async fn get_progress(&self) -> Result<Option<Position>, StoreError>;

    async fn save_progress(&self, position: Position) -> Result<(), StoreError>;
}

/// Remote analysis records for the current user
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn list_analyses(&self) -> Result<Vec<AnalysisRecord>, StoreError>;

    async fn get_analysis(&self, id: &str) -> Result<AnalysisRecord, StoreError>;

    async fn save_analysis(
        &self,
        result: &AnalysisResult,
        assessment_id: Option<&str>,
    ) -> Result<AnalysisRecord, StoreError>;
}

/// Signed-in user as seen by the core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Opaque session gate
pub trait AuthProvider {
    fn current_user(&self) -> Option<UserProfile>;

    fn is_authenticated(&self) -> bool {
        self.current_user().is_some()
    }
}
