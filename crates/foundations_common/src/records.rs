//! Persisted records: assessments, analyses and progress watermarks.

use crate::navigation::Position;
use crate::responses::Responses;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A saved assessment
///
/// `created_at` is the durable save marker: `None` means the record was
/// never saved and stays editable, `Some` means it is completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub id: String,
    pub user_id: String,
    pub responses: Responses,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl AssessmentRecord {
    pub fn is_completed(&self) -> bool {
        self.created_at.is_some()
    }
}

/// One insight card in an analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    pub title: String,
    pub body: String,
}

/// Output of an insights generation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    #[serde(default)]
    pub insights: Vec<Insight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl AnalysisResult {
    /// Parse LLM output. A JSON object with `summary` (and optionally
    /// `insights`) is used as-is; anything else becomes a plain summary.
    /// Markdown code fences around the JSON are tolerated.
    pub fn from_llm_output(text: &str) -> Self {
        let trimmed = strip_code_fence(text.trim());

        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(trimmed) {
            if let Some(summary) = obj.get("summary").and_then(Value::as_str) {
                let insights = obj
                    .get("insights")
                    .and_then(Value::as_array)
                    .map(|items| items.iter().filter_map(parse_insight).collect())
                    .unwrap_or_default();
                return Self {
                    summary: summary.trim().to_string(),
                    insights,
                    ..Default::default()
                };
            }
        }

        Self {
            summary: text.trim().to_string(),
            ..Default::default()
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_insight(value: &Value) -> Option<Insight> {
    match value {
        Value::Object(obj) => Some(Insight {
            title: obj.get("title")?.as_str()?.trim().to_string(),
            body: obj
                .get("body")
                .or_else(|| obj.get("description"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string(),
        }),
        Value::String(s) if !s.trim().is_empty() => Some(Insight {
            title: s.trim().to_string(),
            body: String::new(),
        }),
        _ => None,
    }
}

/// A saved analysis, optionally linked to the assessment it was built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub assessment_id: Option<String>,
    pub result: AnalysisResult,
    pub created_at: DateTime<Utc>,
}

/// Furthest position a user has reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressWatermark {
    pub phase: usize,
    pub step: usize,
    pub updated_at: DateTime<Utc>,
}

impl ProgressWatermark {
    pub fn position(&self) -> Position {
        Position::new(self.phase, self.step)
    }
}

/// Records that can be ordered by recency
pub trait Timestamped {
    fn created_at(&self) -> Option<DateTime<Utc>>;
    fn record_id(&self) -> &str;
}

impl Timestamped for AssessmentRecord {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Timestamped for AnalysisRecord {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }

    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Most recent record: latest `created_at`, ties broken by the greater id.
/// Unsaved records (no timestamp) lose to any saved one.
pub fn most_recent<T: Timestamped>(records: &[T]) -> Option<&T> {
    records
        .iter()
        .max_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.record_id().cmp(b.record_id()))
        })
}

/// Sort newest first with the same tie-break as [`most_recent`]
pub fn sort_newest_first<T: Timestamped>(records: &mut [T]) {
    records.sort_by(|a, b| {
        b.created_at()
            .cmp(&a.created_at())
            .then_with(|| b.record_id().cmp(a.record_id()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str, ts: Option<i64>) -> AssessmentRecord {
        AssessmentRecord {
            id: id.to_string(),
            user_id: "u1".to_string(),
            responses: Responses::new(),
            created_at: ts.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
        }
    }

    #[test]
    fn test_most_recent_prefers_later_timestamp() {
        let records = vec![record("a", Some(100)), record("b", Some(200)), record("c", None)];
        assert_eq!(most_recent(&records).unwrap().id, "b");
    }

    #[test]
    fn test_most_recent_tie_breaks_on_id() {
        let records = vec![record("b", Some(100)), record("a", Some(100)), record("c", Some(100))];
        assert_eq!(most_recent(&records).unwrap().id, "c");

        let reversed: Vec<_> = records.into_iter().rev().collect();
        assert_eq!(most_recent(&reversed).unwrap().id, "c");
    }

    #[test]
    fn test_sort_newest_first_matches_most_recent() {
        let mut records = vec![record("a", Some(100)), record("z", Some(50)), record("b", Some(100))];
        let expected = most_recent(&records).unwrap().id.clone();
        sort_newest_first(&mut records);
        assert_eq!(records[0].id, expected);
        assert_eq!(records[2].id, "z");
    }

    #[test]
    fn test_analysis_parses_json_object() {
        let text = r#"```json
{"summary": "You value growth.", "insights": [{"title": "Growth", "body": "It shows up everywhere."}, "Rest more"]}
```"#;
        let result = AnalysisResult::from_llm_output(text);
        assert_eq!(result.summary, "You value growth.");
        assert_eq!(result.insights.len(), 2);
        assert_eq!(result.insights[1].title, "Rest more");
    }

    #[test]
    fn test_analysis_falls_back_to_plain_text() {
        let result = AnalysisResult::from_llm_output("  Just prose.  ");
        assert_eq!(result.summary, "Just prose.");
        assert!(result.insights.is_empty());
    }
}
