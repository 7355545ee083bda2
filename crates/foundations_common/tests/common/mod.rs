//! In-memory collaborators for session tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use foundations_common::error::StoreError;
use foundations_common::navigation::Position;
use foundations_common::phases::{default_phases, find_step, Step, REQUIRED_FIELDS};
use foundations_common::records::{AnalysisRecord, AnalysisResult, AssessmentRecord};
use foundations_common::responses::{ResponseValue, Responses};
use foundations_common::store::{AnalysisStore, AssessmentStore, AuthProvider, UserProfile};
use std::sync::Mutex;

pub const USER: &str = "user-1";

#[derive(Default)]
struct State {
    assessments: Vec<AssessmentRecord>,
    analyses: Vec<AnalysisRecord>,
    progress: Option<Position>,
    saved_payloads: Vec<Responses>,
    analysis_saves: usize,
    fail_saves: bool,
    fail_reads: bool,
    next_id: u64,
}

/// Assessment and analysis store backed by vectors
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<AssessmentRecord>) -> Self {
        let store = Self::new();
        store.state.lock().unwrap().assessments = records;
        store
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.state.lock().unwrap().fail_saves = fail;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    pub fn set_progress(&self, position: Position) {
        self.state.lock().unwrap().progress = Some(position);
    }

    pub fn progress(&self) -> Option<Position> {
        self.state.lock().unwrap().progress
    }

    /// Every payload passed to `save_assessment`, including rejected ones
    pub fn saved_payloads(&self) -> Vec<Responses> {
        self.state.lock().unwrap().saved_payloads.clone()
    }

    pub fn analysis_saves(&self) -> usize {
        self.state.lock().unwrap().analysis_saves
    }
}

#[async_trait]
impl AssessmentStore for MemoryStore {
    async fn list_assessments(&self) -> Result<Vec<AssessmentRecord>, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(StoreError::Transport("connection refused".into()));
        }
        Ok(state.assessments.clone())
    }

    async fn get_assessment(&self, id: &str) -> Result<AssessmentRecord, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(StoreError::Transport("connection refused".into()));
        }
        state
            .assessments
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn save_assessment(&self, responses: &Responses) -> Result<AssessmentRecord, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.saved_payloads.push(responses.clone());
        if state.fail_saves {
            return Err(StoreError::Server {
                status: 503,
                message: "unavailable".into(),
            });
        }
        state.next_id += 1;
        let record = AssessmentRecord {
            id: format!("a{}", state.next_id),
            user_id: USER.to_string(),
            responses: responses.clone(),
            created_at: Some(Utc::now()),
        };
        state.assessments.push(record.clone());
        Ok(record)
    }

    async fn get_progress(&self) -> Result<Option<Position>, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(StoreError::Transport("connection refused".into()));
        }
        Ok(state.progress)
    }

    async fn save_progress(&self, position: Position) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.progress.map_or(true, |p| position > p) {
            state.progress = Some(position);
        }
        Ok(())
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn list_analyses(&self) -> Result<Vec<AnalysisRecord>, StoreError> {
        Ok(self.state.lock().unwrap().analyses.clone())
    }

    async fn get_analysis(&self, id: &str) -> Result<AnalysisRecord, StoreError> {
        self.state
            .lock()
            .unwrap()
            .analyses
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn save_analysis(
        &self,
        result: &AnalysisResult,
        assessment_id: Option<&str>,
    ) -> Result<AnalysisRecord, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.analysis_saves += 1;
        if state.fail_saves {
            return Err(StoreError::Transport("offline".into()));
        }
        state.next_id += 1;
        let record = AnalysisRecord {
            id: format!("r{}", state.next_id),
            user_id: USER.to_string(),
            assessment_id: assessment_id.map(str::to_string),
            result: result.clone(),
            created_at: Utc::now(),
        };
        state.analyses.push(record.clone());
        Ok(record)
    }
}

/// Auth provider with a fixed answer that can flip after "sign-in"
pub struct StaticAuth {
    user: Mutex<Option<UserProfile>>,
}

impl StaticAuth {
    pub fn signed_in() -> Self {
        let auth = Self::anonymous();
        auth.sign_in();
        auth
    }

    pub fn anonymous() -> Self {
        Self {
            user: Mutex::new(None),
        }
    }

    pub fn sign_in(&self) {
        *self.user.lock().unwrap() = Some(UserProfile {
            id: USER.to_string(),
            display_name: Some("Test User".to_string()),
        });
    }
}

impl AuthProvider for StaticAuth {
    fn current_user(&self) -> Option<UserProfile> {
        self.user.lock().unwrap().clone()
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn record(id: &str, created_at: Option<DateTime<Utc>>, responses: Responses) -> AssessmentRecord {
    AssessmentRecord {
        id: id.to_string(),
        user_id: USER.to_string(),
        responses,
        created_at,
    }
}

/// A filled answer of the right shape for one required step
pub fn answer_for(step: &Step) -> ResponseValue {
    match step {
        Step::MultiSelect { options, .. } => ResponseValue::List(vec![options[0].value.clone()]),
        Step::SingleSelect { options, .. } => ResponseValue::Text(options[0].value.clone()),
        Step::Scale { max, .. } => ResponseValue::Number(f64::from(*max)),
        _ => ResponseValue::Text("Something honest".to_string()),
    }
}

/// Responses answering every required field
pub fn complete_responses() -> Responses {
    let phases = default_phases();
    REQUIRED_FIELDS
        .iter()
        .map(|id| {
            let step = find_step(&phases, id).unwrap();
            (id.to_string(), answer_for(step))
        })
        .collect()
}
