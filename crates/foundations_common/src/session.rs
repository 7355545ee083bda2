//! Assessment session: the explicit state container behind the wizard.
//!
//! Owns navigation, responses and the persistence flags the presentation
//! layer reads (read-only, saving, pending save, errors). All mutation goes
//! through the methods here; nothing is global.
//!
//! Submission is split into `begin_submit` / `finish_submit` so a caller can
//! release the session while the save is in flight; the saving flag refuses
//! a second submission until the first settles. `submit` wraps both.

use crate::error::{SessionError, StoreError};
use crate::navigation::{Navigator, Position, StartOptions};
use crate::phases::{Phase, PhaseConfigError, Step, REQUIRED_FIELDS};
use crate::records::{most_recent, AssessmentRecord};
use crate::responses::{ResponseValue, Responses};
use crate::store::{AssessmentStore, AuthProvider};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Message shown when the current step has no usable answer
pub const REQUIRED_MESSAGE: &str = "This question is required";

/// How the session was opened
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Jump straight to the synthesis phase
    pub start_at_synthesis: bool,
    /// Caller-forced view-only mode (historical snapshot, someone else's record)
    pub read_only: bool,
    /// Specific record to open; `None` means "most recent, if any"
    pub assessment_id: Option<String>,
}

/// Things the caller should react to
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A position further than any before was reached; persist it
    Reached(Position),
    /// The assessment was durably saved
    Completed(AssessmentRecord),
}

/// Result of starting a submission
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitStart {
    /// Save this payload, then call `finish_submit`
    Ready(Responses),
    /// Not signed in: the save is deferred until `resume_pending_save`
    AuthRequired,
}

/// Result of a full submission
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Saved(AssessmentRecord),
    AuthRequired,
}

/// Where the session's state came from after `load`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Hydrated from a remote record
    Record { id: String, read_only: bool },
    /// Local responses kept, navigation resumed at the watermark
    Resumed(Position),
    /// Nothing to restore
    Fresh,
}

/// One line of the synthesis summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerSummary {
    pub phase: String,
    pub step_id: String,
    pub question: String,
    pub answer: String,
}

pub struct AssessmentSession {
    options: SessionOptions,
    navigator: Navigator,
    responses: Responses,
    read_only: bool,
    record_id: Option<String>,
    saved_at: Option<DateTime<Utc>>,
    watermark: Option<Position>,
    pending_save: bool,
    saving: bool,
    error: Option<String>,
    validation_error: Option<String>,
}

impl AssessmentSession {
    pub fn new(phases: Vec<Phase>, options: SessionOptions) -> Result<Self, PhaseConfigError> {
        let start = StartOptions {
            start_at_synthesis: options.start_at_synthesis,
            initial_position: None,
        };
        let navigator = Navigator::new(Arc::from(phases), start)?;
        let mut session = Self {
            read_only: options.read_only,
            options,
            navigator,
            responses: Responses::new(),
            record_id: None,
            saved_at: None,
            watermark: None,
            pending_save: false,
            saving: false,
            error: None,
            validation_error: None,
        };
        session.ensure_step_default();
        Ok(session)
    }

    // ------------------------------------------------------------------------
    // Read-only projection for the presentation layer
    // ------------------------------------------------------------------------

    pub fn phases(&self) -> &[Phase] {
        self.navigator.phases()
    }

    pub fn position(&self) -> Position {
        self.navigator.position()
    }

    pub fn current_phase(&self) -> &Phase {
        self.navigator.current_phase_data()
    }

    pub fn current_step(&self) -> &Step {
        self.navigator.current_step_data()
    }

    pub fn total_steps(&self) -> usize {
        self.navigator.total_steps()
    }

    pub fn current_total_step(&self) -> usize {
        self.navigator.current_total_step()
    }

    pub fn is_first_step(&self) -> bool {
        self.navigator.is_first_step()
    }

    pub fn is_last_step(&self) -> bool {
        self.navigator.is_last_step()
    }

    pub fn responses(&self) -> &Responses {
        &self.responses
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    pub fn has_pending_save(&self) -> bool {
        self.pending_save
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn validation_error(&self) -> Option<&str> {
        self.validation_error.as_deref()
    }

    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.saved_at
    }

    pub fn record_id(&self) -> Option<&str> {
        self.record_id.as_deref()
    }

    pub fn watermark(&self) -> Option<Position> {
        self.watermark
    }

    pub fn is_current_step_valid(&self) -> bool {
        self.responses.is_step_valid(self.current_step())
    }

    pub fn is_complete(&self) -> bool {
        self.responses.is_complete()
    }

    pub fn missing_required(&self) -> Vec<&'static str> {
        self.responses.missing(REQUIRED_FIELDS)
    }

    /// Answers in traversal order for the synthesis screen
    pub fn summary(&self) -> Vec<AnswerSummary> {
        let mut lines = Vec::new();
        for phase in self.phases() {
            for step in &phase.steps {
                let (Some(id), Some(question)) = (step.id(), step.question()) else {
                    continue;
                };
                let answer = self
                    .responses
                    .get(id)
                    .map(|v| v.display(Some(step)))
                    .unwrap_or_default();
                lines.push(AnswerSummary {
                    phase: phase.title.clone(),
                    step_id: id.to_string(),
                    question: question.to_string(),
                    answer,
                });
            }
        }
        lines
    }

    // ------------------------------------------------------------------------
    // Hydration and resume
    // ------------------------------------------------------------------------

    /// Replace local state with a remote record. A record with a durable
    /// save marker is completed and therefore read-only.
    pub fn hydrate(&mut self, record: AssessmentRecord) {
        self.read_only = self.options.read_only || record.is_completed();
        self.saved_at = record.created_at;
        self.record_id = Some(record.id);
        self.responses = record.responses;
        self.pending_save = false;
        self.error = None;
        self.validation_error = None;
    }

    /// Restore unsaved answers kept by the host (draft file, local storage)
    pub fn restore_draft(&mut self, responses: Responses, pending_save: bool) {
        if self.read_only {
            return;
        }
        self.responses = responses;
        self.pending_save = pending_save;
        self.ensure_step_default();
    }

    /// Start at the watermark when resuming makes sense: editable, answers
    /// present, and no explicit synthesis request.
    pub fn resume_at(&mut self, watermark: Option<Position>) -> Option<Position> {
        let watermark = watermark?;
        if self.read_only || self.responses.is_empty() || self.options.start_at_synthesis {
            return None;
        }
        let start = StartOptions {
            start_at_synthesis: false,
            initial_position: Some(watermark),
        };
        let pos = self.navigator.resolve_start(start);
        self.navigator.set_phase_and_step(pos.phase, pos.step);
        self.watermark = Some(pos);
        self.ensure_step_default();
        Some(pos)
    }

    /// Reconcile with the remote store at mount.
    ///
    /// Fetch failures never block: the error is kept for display and the
    /// session starts fresh.
    pub async fn load<S>(&mut self, store: &S) -> LoadOutcome
    where
        S: AssessmentStore + ?Sized,
    {
        if let Some(id) = self.options.assessment_id.clone() {
            match store.get_assessment(&id).await {
                Ok(record) => {
                    self.hydrate(record);
                    debug!("Loaded assessment {}", id);
                    return LoadOutcome::Record {
                        id,
                        read_only: self.read_only,
                    };
                }
                Err(e) => {
                    warn!("Could not load assessment {}: {}", id, e);
                    self.error = Some(e.to_string());
                    return LoadOutcome::Fresh;
                }
            }
        }

        if self.responses.is_empty() {
            match store.list_assessments().await {
                Ok(records) => {
                    if let Some(latest) = most_recent(&records).cloned() {
                        let id = latest.id.clone();
                        self.hydrate(latest);
                        info!("Hydrated from most recent assessment {}", id);
                        return LoadOutcome::Record {
                            id,
                            read_only: self.read_only,
                        };
                    }
                }
                Err(e) => {
                    warn!("Could not list assessments, starting fresh: {}", e);
                    self.error = Some(e.to_string());
                    return LoadOutcome::Fresh;
                }
            }
        }

        if self.read_only {
            return LoadOutcome::Fresh;
        }

        match store.get_progress().await {
            Ok(watermark) => match self.resume_at(watermark) {
                Some(pos) => LoadOutcome::Resumed(pos),
                None => LoadOutcome::Fresh,
            },
            Err(e) => {
                warn!("Could not fetch progress watermark: {}", e);
                LoadOutcome::Fresh
            }
        }
    }

    // ------------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------------

    fn ensure_writable(&self) -> Result<(), SessionError> {
        if self.read_only {
            Err(SessionError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Give the current scale step its default value the first time it is
    /// shown. Returns true when a value was written.
    pub fn ensure_step_default(&mut self) -> bool {
        if self.read_only {
            return false;
        }
        let step = self.navigator.current_step_data().clone();
        self.responses.ensure_scale_default(&step)
    }

    /// Advance, refusing to leave an unanswered question
    pub fn next(&mut self) -> Result<Option<SessionEvent>, SessionError> {
        self.ensure_writable()?;

        if !self.is_current_step_valid() {
            self.validation_error = Some(REQUIRED_MESSAGE.to_string());
            return Err(SessionError::Validation {
                step_id: self.current_step().id().map(str::to_string),
                message: REQUIRED_MESSAGE.to_string(),
            });
        }
        self.validation_error = None;

        let Some(moved) = self.navigator.go_next() else {
            return Ok(None);
        };
        self.ensure_step_default();
        Ok(self.reach(moved.to))
    }

    /// Raise the watermark when `pos` lies beyond it
    fn reach(&mut self, pos: Position) -> Option<SessionEvent> {
        if self.read_only || self.watermark.is_some_and(|w| pos <= w) {
            return None;
        }
        self.watermark = Some(pos);
        Some(SessionEvent::Reached(pos))
    }

    pub fn back(&mut self) -> Result<Position, SessionError> {
        self.ensure_writable()?;
        self.validation_error = None;
        self.navigator.go_back();
        Ok(self.position())
    }

    /// Jump to a position (clamped into bounds). Landing beyond the
    /// watermark reports it the same way `next` does.
    pub fn jump(&mut self, phase: usize, step: usize) -> Option<SessionEvent> {
        let pos = self.navigator.set_phase_and_step(phase, step);
        self.validation_error = None;
        self.ensure_step_default();
        self.reach(pos)
    }

    pub fn go_to_synthesis(&mut self) -> Option<SessionEvent> {
        let pos = self.navigator.synthesis_position();
        self.jump(pos.phase, pos.step)
    }

    // ------------------------------------------------------------------------
    // Responses
    // ------------------------------------------------------------------------

    pub fn update_response(
        &mut self,
        step_id: impl Into<String>,
        value: impl Into<ResponseValue>,
    ) -> Result<(), SessionError> {
        self.ensure_writable()?;
        self.responses.update(step_id, value);
        self.validation_error = None;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------------

    pub fn begin_submit(&mut self, auth: &dyn AuthProvider) -> Result<SubmitStart, SessionError> {
        self.ensure_writable()?;
        if self.saving {
            return Err(SessionError::SaveInFlight);
        }

        let missing = self.missing_required();
        if let Some(first) = missing.first() {
            let message = format!(
                "Please answer all questions before submitting ({} missing)",
                missing.len()
            );
            self.validation_error = Some(message.clone());
            return Err(SessionError::Validation {
                step_id: Some(first.to_string()),
                message,
            });
        }
        self.validation_error = None;

        if !auth.is_authenticated() {
            info!("Submission deferred until sign-in");
            self.pending_save = true;
            return Ok(SubmitStart::AuthRequired);
        }

        self.saving = true;
        self.error = None;
        Ok(SubmitStart::Ready(self.responses.clone()))
    }

    /// Settle an in-flight save. On failure nothing but the error changes,
    /// so the same payload can be submitted again.
    pub fn finish_submit(
        &mut self,
        result: Result<AssessmentRecord, StoreError>,
    ) -> Result<SessionEvent, SessionError> {
        self.saving = false;

        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!("Assessment save failed: {}", e);
                self.error = Some(e.to_string());
                return Err(SessionError::SaveFailed(e.to_string()));
            }
        };

        let Some(saved_at) = record.created_at else {
            let message = "Server did not confirm the save".to_string();
            self.error = Some(message.clone());
            return Err(SessionError::SaveFailed(message));
        };

        info!("Assessment {} saved at {}", record.id, saved_at);
        self.saved_at = Some(saved_at);
        self.record_id = Some(record.id.clone());
        self.pending_save = false;
        self.read_only = true;
        self.error = None;
        Ok(SessionEvent::Completed(record))
    }

    pub async fn submit<S>(
        &mut self,
        store: &S,
        auth: &dyn AuthProvider,
    ) -> Result<SubmitOutcome, SessionError>
    where
        S: AssessmentStore + ?Sized,
    {
        let payload = match self.begin_submit(auth)? {
            SubmitStart::Ready(payload) => payload,
            SubmitStart::AuthRequired => return Ok(SubmitOutcome::AuthRequired),
        };
        let result = store.save_assessment(&payload).await;
        match self.finish_submit(result)? {
            SessionEvent::Completed(record) => Ok(SubmitOutcome::Saved(record)),
            SessionEvent::Reached(_) => Err(SessionError::NothingPending),
        }
    }

    /// Run a save deferred by sign-in. `Ok(None)` when nothing was pending.
    pub async fn resume_pending_save<S>(
        &mut self,
        store: &S,
        auth: &dyn AuthProvider,
    ) -> Result<Option<SubmitOutcome>, SessionError>
    where
        S: AssessmentStore + ?Sized,
    {
        if !self.pending_save {
            return Ok(None);
        }
        self.submit(store, auth).await.map(Some)
    }

    /// Discard everything and start over at `(0, 0)`
    pub fn retake(&mut self) {
        info!("Retaking assessment");
        self.responses.clear();
        self.read_only = false;
        self.options.read_only = false;
        self.options.assessment_id = None;
        self.record_id = None;
        self.saved_at = None;
        self.watermark = None;
        self.pending_save = false;
        self.saving = false;
        self.error = None;
        self.validation_error = None;
        self.navigator.set_phase_and_step(0, 0);
        self.ensure_step_default();
    }
}
