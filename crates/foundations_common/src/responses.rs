//! Response store and completion gate.
//!
//! Writes are never validated; validity is only evaluated when advancing
//! past a step or when submitting the whole assessment.

use crate::phases::{Phase, Step, REQUIRED_FIELDS};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// One answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl ResponseValue {
    /// Non-empty under the completion rules: list non-empty, text non-blank,
    /// numbers always.
    pub fn is_filled(&self) -> bool {
        match self {
            ResponseValue::List(items) => !items.is_empty(),
            ResponseValue::Text(text) => !text.trim().is_empty(),
            ResponseValue::Number(_) => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ResponseValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Human-readable form, using option labels when the step is known
    pub fn display(&self, step: Option<&Step>) -> String {
        let label = |value: &str| -> String {
            match step {
                Some(step) => step.option_label(value).to_string(),
                None => value.to_string(),
            }
        };
        match self {
            ResponseValue::Number(n) if n.fract() == 0.0 => format!("{}", *n as i64),
            ResponseValue::Number(n) => format!("{:.1}", n),
            ResponseValue::Text(text) => label(text.trim()),
            ResponseValue::List(items) => items
                .iter()
                .map(|item| label(item.as_str()))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

impl From<&str> for ResponseValue {
    fn from(value: &str) -> Self {
        ResponseValue::Text(value.to_string())
    }
}

impl From<String> for ResponseValue {
    fn from(value: String) -> Self {
        ResponseValue::Text(value)
    }
}

impl From<f64> for ResponseValue {
    fn from(value: f64) -> Self {
        ResponseValue::Number(value)
    }
}

impl From<Vec<String>> for ResponseValue {
    fn from(value: Vec<String>) -> Self {
        ResponseValue::List(value)
    }
}

/// Step id → answer
///
/// Keys are ordered so the serialized form is canonical.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Responses(BTreeMap<String, ResponseValue>);

impl Responses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert an answer, replacing any previous value
    pub fn update(&mut self, step_id: impl Into<String>, value: impl Into<ResponseValue>) {
        self.0.insert(step_id.into(), value.into());
    }

    pub fn get(&self, step_id: &str) -> Option<&ResponseValue> {
        self.0.get(step_id)
    }

    pub fn remove(&mut self, step_id: &str) -> Option<ResponseValue> {
        self.0.remove(step_id)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.0.contains_key(step_id)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResponseValue)> {
        self.0.iter()
    }

    fn is_filled(&self, step_id: &str) -> bool {
        self.0.get(step_id).map(ResponseValue::is_filled).unwrap_or(false)
    }

    /// Whether `step` may be left: intro and synthesis always, questions
    /// once they hold a filled answer.
    pub fn is_step_valid(&self, step: &Step) -> bool {
        match step.id() {
            Some(id) => self.is_filled(id),
            None => true,
        }
    }

    /// Required ids that are missing or empty, in the given order
    pub fn missing<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|id| !self.is_filled(id))
            .collect()
    }

    /// Completion gate over the built-in required field list
    pub fn is_complete(&self) -> bool {
        self.missing(REQUIRED_FIELDS).is_empty()
    }

    /// Assign the default value to a scale step that has no answer yet.
    /// Returns true when a value was written.
    pub fn ensure_scale_default(&mut self, step: &Step) -> bool {
        match (step.id(), step.scale_default()) {
            (Some(id), Some(default)) if !self.contains(id) => {
                self.update(id, default);
                true
            }
            _ => false,
        }
    }

    /// SHA-256 of the canonical JSON form, used as an idempotency key.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(&self.0).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }

    /// Answered questions in traversal order as (question, answer) pairs
    pub fn answered<'p>(&self, phases: &'p [Phase]) -> Vec<(&'p Step, String)> {
        phases
            .iter()
            .flat_map(|p| p.steps.iter())
            .filter_map(|step| {
                let value = self.0.get(step.id()?)?;
                Some((step, value.display(Some(step))))
            })
            .collect()
    }
}

impl FromIterator<(String, ResponseValue)> for Responses {
    fn from_iter<T: IntoIterator<Item = (String, ResponseValue)>>(iter: T) -> Self {
        Responses(iter.into_iter().collect())
    }
}

/// Per-step validity, free-function form
pub fn is_step_valid(step: &Step, responses: &Responses) -> bool {
    responses.is_step_valid(step)
}

/// Whole-assessment completeness over [`REQUIRED_FIELDS`]
pub fn is_assessment_complete(responses: &Responses) -> bool {
    responses.is_complete()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::{default_phases, find_step};

    #[test]
    fn test_untagged_wire_form() {
        let mut r = Responses::new();
        r.update("a", "text");
        r.update("b", 4.0);
        r.update("c", vec!["x".to_string(), "y".to_string()]);

        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json, serde_json::json!({"a": "text", "b": 4.0, "c": ["x", "y"]}));

        let back: Responses = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_step_validity_rules() {
        let phases = default_phases();
        let multi = find_step(&phases, "core_values").unwrap();
        let text = find_step(&phases, "defining_story").unwrap();
        let single = find_step(&phases, "decision_style").unwrap();
        let scale = find_step(&phases, "energy_level").unwrap();

        let mut r = Responses::new();
        assert!(!r.is_step_valid(multi));
        assert!(!r.is_step_valid(scale));

        r.update("core_values", Vec::<String>::new());
        r.update("defining_story", "   ");
        r.update("decision_style", "");
        assert!(!r.is_step_valid(multi));
        assert!(!r.is_step_valid(text));
        assert!(!r.is_step_valid(single));

        r.update("core_values", vec!["growth".to_string()]);
        r.update("defining_story", "A long winter");
        r.update("decision_style", "intuit");
        r.update("energy_level", 1.0);
        assert!(r.is_step_valid(multi));
        assert!(r.is_step_valid(text));
        assert!(r.is_step_valid(single));
        assert!(r.is_step_valid(scale));

        let intro = &phases[0].steps[0];
        assert!(Responses::new().is_step_valid(intro));
    }

    #[test]
    fn test_scale_default_only_once() {
        let phases = default_phases();
        let scale = find_step(&phases, "energy_level").unwrap();
        let mut r = Responses::new();

        assert!(r.ensure_scale_default(scale));
        assert_eq!(r.get("energy_level"), Some(&ResponseValue::Number(3.0)));

        r.update("energy_level", 5.0);
        assert!(!r.ensure_scale_default(scale));
        assert_eq!(r.get("energy_level"), Some(&ResponseValue::Number(5.0)));
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let mut a = Responses::new();
        a.update("x", "1");
        a.update("y", "2");
        let mut b = Responses::new();
        b.update("y", "2");
        b.update("x", "1");
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.update("x", "changed");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_display_uses_option_labels() {
        let phases = default_phases();
        let step = find_step(&phases, "recurring_patterns").unwrap();
        let value = ResponseValue::List(vec!["self_criticism".into(), "avoidance".into()]);
        assert_eq!(value.display(Some(step)), "Self-criticism, Avoidance");
        assert_eq!(ResponseValue::Number(4.0).display(None), "4");
    }
}
