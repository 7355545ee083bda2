//! Insights tracker: auto-save bookkeeping for generated analyses.
//!
//! An analysis result is saved once. Re-delivering an equal result (a
//! re-render, a repeated completion callback) does not trigger a second
//! save, and a new analysis cannot start while a save is in flight.

use crate::error::{SessionError, StoreError};
use crate::records::{AnalysisRecord, AnalysisResult};
use crate::store::AnalysisStore;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct InsightsTracker {
    assessment_id: Option<String>,
    analyzing: bool,
    saving: bool,
    /// Last result handed to `on_analysis_complete`
    last_processed: Option<AnalysisResult>,
    /// Result waiting for its first (or retried) save
    unsaved: Option<AnalysisResult>,
    saved: Option<AnalysisRecord>,
    error: Option<String>,
}

impl InsightsTracker {
    pub fn new(assessment_id: Option<String>) -> Self {
        Self {
            assessment_id,
            ..Default::default()
        }
    }

    pub fn assessment_id(&self) -> Option<&str> {
        self.assessment_id.as_deref()
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzing
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn saved(&self) -> Option<&AnalysisRecord> {
        self.saved.as_ref()
    }

    pub fn has_unsaved(&self) -> bool {
        self.unsaved.is_some()
    }

    /// Start a (re-)analysis. Refused while the previous result is being saved.
    pub fn begin_analysis(&mut self) -> Result<(), SessionError> {
        if self.saving {
            return Err(SessionError::SaveInFlight);
        }
        self.analyzing = true;
        self.error = None;
        Ok(())
    }

    /// Record a finished analysis. Returns true when it needs saving.
    pub fn on_analysis_complete(&mut self, result: AnalysisResult) -> bool {
        self.analyzing = false;
        if self.last_processed.as_ref() == Some(&result) {
            debug!("Analysis result unchanged, skipping save");
            return false;
        }
        self.last_processed = Some(result.clone());
        self.unsaved = Some(result);
        true
    }

    /// An analysis attempt failed before producing a result
    pub fn on_analysis_failed(&mut self, message: impl Into<String>) {
        self.analyzing = false;
        self.error = Some(message.into());
    }

    /// Take the payload to save, or `None` when there is nothing to do
    pub fn begin_save(&mut self) -> Option<AnalysisResult> {
        if self.saving {
            return None;
        }
        let result = self.unsaved.clone()?;
        self.saving = true;
        Some(result)
    }

    pub fn finish_save(
        &mut self,
        outcome: Result<AnalysisRecord, StoreError>,
    ) -> Result<AnalysisRecord, SessionError> {
        self.saving = false;
        match outcome {
            Ok(record) => {
                info!("Analysis {} saved", record.id);
                self.unsaved = None;
                self.error = None;
                self.saved = Some(record.clone());
                Ok(record)
            }
            Err(e) => {
                warn!("Analysis save failed: {}", e);
                self.error = Some(e.to_string());
                Err(SessionError::SaveFailed(e.to_string()))
            }
        }
    }

    /// Save the pending result if any. `Ok(None)` when nothing was pending.
    pub async fn auto_save<S>(&mut self, store: &S) -> Result<Option<AnalysisRecord>, SessionError>
    where
        S: AnalysisStore + ?Sized,
    {
        let Some(result) = self.begin_save() else {
            return Ok(None);
        };
        let outcome = store
            .save_analysis(&result, self.assessment_id.as_deref())
            .await;
        self.finish_save(outcome).map(Some)
    }

    /// Explicit retry after a failed save
    pub async fn retry<S>(&mut self, store: &S) -> Result<AnalysisRecord, SessionError>
    where
        S: AnalysisStore + ?Sized,
    {
        match self.auto_save(store).await? {
            Some(record) => Ok(record),
            None => Err(SessionError::NothingPending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(summary: &str) -> AnalysisResult {
        AnalysisResult {
            summary: summary.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_equal_result_is_not_saved_twice() {
        let mut t = InsightsTracker::new(None);
        assert!(t.on_analysis_complete(result("a")));
        assert!(!t.on_analysis_complete(result("a")));
        assert!(t.on_analysis_complete(result("b")));
    }

    #[test]
    fn test_analysis_blocked_while_saving() {
        let mut t = InsightsTracker::new(None);
        t.begin_analysis().unwrap();
        t.on_analysis_complete(result("a"));
        assert!(t.begin_save().is_some());
        assert_eq!(t.begin_analysis(), Err(SessionError::SaveInFlight));
        assert!(t.begin_save().is_none());

        let _ = t.finish_save(Err(StoreError::Transport("down".into())));
        assert!(t.has_unsaved());
        assert!(t.begin_analysis().is_ok());
    }
}
