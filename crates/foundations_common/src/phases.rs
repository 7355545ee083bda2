//! Assessment phase and step model
//!
//! The assessment is a static tree: an ordered list of phases, each with an
//! ordered list of steps. Order defines traversal. The last phase is always
//! the synthesis phase, and question step ids double as response keys, so
//! they must be unique across the whole tree.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Value assigned to a scale step the first time it is displayed.
pub const DEFAULT_SCALE_VALUE: f64 = 3.0;

/// Question ids that must be answered before the assessment can be submitted.
pub const REQUIRED_FIELDS: &[&str] = &[
    "current_emotions",
    "energy_level",
    "present_moment",
    "core_values",
    "decision_style",
    "self_alignment",
    "defining_story",
    "recurring_patterns",
    "stress_response",
    "belief_flexibility",
    "limiting_belief",
];

/// One choice of a select step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

/// Discriminant of a [`Step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepKind {
    Intro,
    MultiSelect,
    SingleSelect,
    Scale,
    Textarea,
    Synthesis,
}

/// A single screen of the assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Step {
    Intro {
        title: String,
        body: String,
    },
    MultiSelect {
        id: String,
        question: String,
        options: Vec<SelectOption>,
    },
    SingleSelect {
        id: String,
        question: String,
        options: Vec<SelectOption>,
    },
    Scale {
        id: String,
        question: String,
        min: i32,
        max: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_label: Option<String>,
    },
    Textarea {
        id: String,
        question: String,
        placeholder: String,
        rows: u16,
    },
    Synthesis {
        title: String,
        body: String,
    },
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::Intro { .. } => StepKind::Intro,
            Step::MultiSelect { .. } => StepKind::MultiSelect,
            Step::SingleSelect { .. } => StepKind::SingleSelect,
            Step::Scale { .. } => StepKind::Scale,
            Step::Textarea { .. } => StepKind::Textarea,
            Step::Synthesis { .. } => StepKind::Synthesis,
        }
    }

    /// Response key, `None` for intro and synthesis screens
    pub fn id(&self) -> Option<&str> {
        match self {
            Step::MultiSelect { id, .. }
            | Step::SingleSelect { id, .. }
            | Step::Scale { id, .. }
            | Step::Textarea { id, .. } => Some(id),
            Step::Intro { .. } | Step::Synthesis { .. } => None,
        }
    }

    pub fn question(&self) -> Option<&str> {
        match self {
            Step::MultiSelect { question, .. }
            | Step::SingleSelect { question, .. }
            | Step::Scale { question, .. }
            | Step::Textarea { question, .. } => Some(question),
            Step::Intro { .. } | Step::Synthesis { .. } => None,
        }
    }

    pub fn options(&self) -> &[SelectOption] {
        match self {
            Step::MultiSelect { options, .. } | Step::SingleSelect { options, .. } => options,
            _ => &[],
        }
    }

    /// Whether this step needs an answer before advancing
    pub fn requires_answer(&self) -> bool {
        self.id().is_some()
    }

    /// Label for an option value, falling back to the raw value
    pub fn option_label<'a>(&'a self, value: &'a str) -> &'a str {
        self.options()
            .iter()
            .find(|o| o.value == value)
            .map(|o| o.label.as_str())
            .unwrap_or(value)
    }

    /// Default scale value for this step, clamped into its range
    pub fn scale_default(&self) -> Option<f64> {
        match self {
            Step::Scale { min, max, .. } => {
                Some(DEFAULT_SCALE_VALUE.clamp(f64::from(*min), f64::from(*max)))
            }
            _ => None,
        }
    }
}

/// An ordered group of steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub title: String,
    pub subtitle: String,
    pub steps: Vec<Step>,
}

impl Phase {
    pub fn is_synthesis(&self) -> bool {
        self.steps
            .iter()
            .any(|s| s.kind() == StepKind::Synthesis)
    }
}

/// Structural problems in a phase configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhaseConfigError {
    #[error("Assessment has no phases")]
    NoPhases,

    #[error("Phase '{0}' has no steps")]
    EmptyPhase(String),

    #[error("Step id '{0}' is used more than once")]
    DuplicateStepId(String),

    #[error("The last phase must be the synthesis phase")]
    MissingSynthesis,

    #[error("Scale '{0}' needs min < max")]
    InvalidScale(String),

    #[error("Select step '{0}' has no options")]
    NoOptions(String),
}

/// Check the structural invariants the navigation machine relies on
pub fn validate_phases(phases: &[Phase]) -> Result<(), PhaseConfigError> {
    let last = phases.last().ok_or(PhaseConfigError::NoPhases)?;

    let mut seen = HashSet::new();
    for phase in phases {
        if phase.steps.is_empty() {
            return Err(PhaseConfigError::EmptyPhase(phase.id.clone()));
        }
        for step in &phase.steps {
            if let Some(id) = step.id() {
                if !seen.insert(id) {
                    return Err(PhaseConfigError::DuplicateStepId(id.to_string()));
                }
            }
            match step {
                Step::Scale { id, min, max, .. } if min >= max => {
                    return Err(PhaseConfigError::InvalidScale(id.clone()));
                }
                Step::MultiSelect { id, options, .. } | Step::SingleSelect { id, options, .. }
                    if options.is_empty() =>
                {
                    return Err(PhaseConfigError::NoOptions(id.clone()));
                }
                _ => {}
            }
        }
    }

    if !last.is_synthesis() {
        return Err(PhaseConfigError::MissingSynthesis);
    }

    Ok(())
}

/// All question ids in traversal order
pub fn question_ids(phases: &[Phase]) -> Vec<&str> {
    phases
        .iter()
        .flat_map(|p| p.steps.iter())
        .filter_map(Step::id)
        .collect()
}

/// Find a question step by id
pub fn find_step<'a>(phases: &'a [Phase], id: &str) -> Option<&'a Step> {
    phases
        .iter()
        .flat_map(|p| p.steps.iter())
        .find(|s| s.id() == Some(id))
}

// ============================================================================
// Built-in assessment
// ============================================================================

fn options(pairs: &[(&str, &str)]) -> Vec<SelectOption> {
    pairs
        .iter()
        .map(|(value, label)| SelectOption {
            value: value.to_string(),
            label: label.to_string(),
        })
        .collect()
}

fn intro(title: &str, body: &str) -> Step {
    Step::Intro {
        title: title.to_string(),
        body: body.to_string(),
    }
}

fn multi(id: &str, question: &str, pairs: &[(&str, &str)]) -> Step {
    Step::MultiSelect {
        id: id.to_string(),
        question: question.to_string(),
        options: options(pairs),
    }
}

fn single(id: &str, question: &str, pairs: &[(&str, &str)]) -> Step {
    Step::SingleSelect {
        id: id.to_string(),
        question: question.to_string(),
        options: options(pairs),
    }
}

fn scale(id: &str, question: &str, low: &str, high: &str) -> Step {
    Step::Scale {
        id: id.to_string(),
        question: question.to_string(),
        min: 1,
        max: 5,
        min_label: Some(low.to_string()),
        max_label: Some(high.to_string()),
    }
}

fn textarea(id: &str, question: &str) -> Step {
    Step::Textarea {
        id: id.to_string(),
        question: question.to_string(),
        placeholder: "Write freely, there are no wrong answers...".to_string(),
        rows: 4,
    }
}

/// The Identity Foundations assessment
pub fn default_phases() -> Vec<Phase> {
    vec![
        Phase {
            id: "state_awareness".to_string(),
            title: "State Awareness".to_string(),
            subtitle: "Notice where you are right now".to_string(),
            steps: vec![
                intro(
                    "State Awareness",
                    "Before looking at who you are, notice how you are. Answer from today, not from your best day.",
                ),
                multi(
                    "current_emotions",
                    "Which emotions are most present for you lately?",
                    &[
                        ("calm", "Calm"),
                        ("anxious", "Anxious"),
                        ("hopeful", "Hopeful"),
                        ("frustrated", "Frustrated"),
                        ("content", "Content"),
                        ("overwhelmed", "Overwhelmed"),
                        ("curious", "Curious"),
                        ("tired", "Tired"),
                    ],
                ),
                scale(
                    "energy_level",
                    "How would you rate your overall energy this week?",
                    "Depleted",
                    "Energized",
                ),
                textarea(
                    "present_moment",
                    "What is taking up the most space in your mind right now?",
                ),
            ],
        },
        Phase {
            id: "identity_mapping".to_string(),
            title: "Identity Mapping".to_string(),
            subtitle: "The values and stories you live by".to_string(),
            steps: vec![
                intro(
                    "Identity Mapping",
                    "These questions look at what you stand for and where that comes from.",
                ),
                multi(
                    "core_values",
                    "Which values feel most essential to who you are?",
                    &[
                        ("honesty", "Honesty"),
                        ("growth", "Growth"),
                        ("connection", "Connection"),
                        ("freedom", "Freedom"),
                        ("security", "Security"),
                        ("creativity", "Creativity"),
                        ("service", "Service"),
                        ("achievement", "Achievement"),
                    ],
                ),
                single(
                    "decision_style",
                    "When facing an important decision, you usually...",
                    &[
                        ("analyze", "Weigh the options carefully"),
                        ("intuit", "Trust your gut"),
                        ("consult", "Talk it through with others"),
                        ("defer", "Wait until it becomes clear"),
                    ],
                ),
                scale(
                    "self_alignment",
                    "How closely does your daily life reflect your values?",
                    "Not at all",
                    "Completely",
                ),
                textarea(
                    "defining_story",
                    "Describe a moment that shaped who you are today.",
                ),
            ],
        },
        Phase {
            id: "patterns".to_string(),
            title: "Patterns & Beliefs".to_string(),
            subtitle: "What repeats, and what holds you back".to_string(),
            steps: vec![
                intro(
                    "Patterns & Beliefs",
                    "Most of what we do, we have done before. Look for the loops.",
                ),
                multi(
                    "recurring_patterns",
                    "Which patterns show up for you again and again?",
                    &[
                        ("people_pleasing", "People pleasing"),
                        ("perfectionism", "Perfectionism"),
                        ("avoidance", "Avoidance"),
                        ("overcommitting", "Overcommitting"),
                        ("self_criticism", "Self-criticism"),
                        ("withdrawing", "Withdrawing"),
                    ],
                ),
                single(
                    "stress_response",
                    "Under pressure you tend to...",
                    &[
                        ("fight", "Push harder"),
                        ("flight", "Step away"),
                        ("freeze", "Stall"),
                        ("connect", "Reach out to someone"),
                    ],
                ),
                scale(
                    "belief_flexibility",
                    "How open are you to changing long-held beliefs about yourself?",
                    "Not open",
                    "Very open",
                ),
                textarea(
                    "limiting_belief",
                    "What belief about yourself would you most like to let go of?",
                ),
            ],
        },
        Phase {
            id: "synthesis".to_string(),
            title: "Synthesis".to_string(),
            subtitle: "Bring it all together".to_string(),
            steps: vec![Step::Synthesis {
                title: "Your Foundations".to_string(),
                body: "Review your answers below. Submitting saves them and unlocks your insights."
                    .to_string(),
            }],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_phases_are_valid() {
        assert_eq!(validate_phases(&default_phases()), Ok(()));
    }

    #[test]
    fn test_required_fields_match_questions() {
        let phases = default_phases();
        let ids = question_ids(&phases);
        assert_eq!(ids.len(), REQUIRED_FIELDS.len());
        for field in REQUIRED_FIELDS {
            assert!(ids.contains(field), "{} is not a question", field);
        }
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut phases = default_phases();
        phases[1].steps.push(textarea("present_moment", "Again?"));
        assert_eq!(
            validate_phases(&phases),
            Err(PhaseConfigError::DuplicateStepId("present_moment".into()))
        );
    }

    #[test]
    fn test_last_phase_must_be_synthesis() {
        let mut phases = default_phases();
        phases.pop();
        assert_eq!(validate_phases(&phases), Err(PhaseConfigError::MissingSynthesis));
        assert_eq!(validate_phases(&[]), Err(PhaseConfigError::NoPhases));
    }

    #[test]
    fn test_step_serializes_with_kind_tag() {
        let step = single("s", "Pick", &[("a", "A")]);
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["kind"], "singleSelect");

        let back: Step = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), StepKind::SingleSelect);
        assert_eq!(back.option_label("a"), "A");
        assert_eq!(back.option_label("zzz"), "zzz");
    }

    #[test]
    fn test_scale_default_is_clamped() {
        let step = Step::Scale {
            id: "x".into(),
            question: "?".into(),
            min: 5,
            max: 10,
            min_label: None,
            max_label: None,
        };
        assert_eq!(step.scale_default(), Some(5.0));
        assert_eq!(scale("y", "?", "lo", "hi").scale_default(), Some(3.0));
        assert_eq!(intro("t", "b").scale_default(), None);
    }
}
