//! Foundations Common - assessment core shared by the daemon and the CLI
//!
//! The core is UI-agnostic: it owns the phase model, navigation, the
//! response store and completion gate, and the persistence/resume rules.
//! Remote stores and auth are traits implemented by the host.

pub mod api;
pub mod error;
pub mod insights;
pub mod llm;
pub mod navigation;
pub mod phases;
pub mod prompts;
pub mod records;
pub mod responses;
pub mod session;
pub mod store;

pub use error::{SessionError, StoreError};
pub use insights::InsightsTracker;
pub use navigation::{Navigator, Position, StartOptions};
pub use phases::{default_phases, Phase, Step, StepKind, REQUIRED_FIELDS};
pub use records::{AnalysisRecord, AnalysisResult, AssessmentRecord, Insight, ProgressWatermark};
pub use responses::{is_assessment_complete, is_step_valid, ResponseValue, Responses};
pub use session::{AssessmentSession, LoadOutcome, SessionEvent, SessionOptions, SubmitOutcome, SubmitStart};
pub use store::{AnalysisStore, AssessmentStore, AuthProvider, UserProfile};
