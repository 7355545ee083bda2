//! LLM prompts, A/B variants and template rendering.
//!
//! A prompt is addressed by its unique key (`identity_insights`). Each prompt
//! has variants; one active variant is drawn per request with probability
//! proportional to its weight, and every draw is recorded as an impression
//! so variants can be compared.

use crate::llm::ChatMessage;
use crate::phases::{find_step, Phase};
use crate::responses::Responses;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Key of the built-in insights prompt
pub const INSIGHTS_PROMPT_KEY: &str = "identity_insights";

/// Placeholder replaced by the whole question/answer digest
pub const RESPONSES_PLACEHOLDER: &str = "{{responses}}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// One A/B arm of a prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVariant {
    pub id: String,
    pub prompt_id: String,
    pub label: String,
    pub system_prompt: String,
    pub user_template: String,
    /// Overrides the configured model when set
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    pub weight: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl PromptVariant {
    pub fn is_selectable(&self) -> bool {
        self.active && self.weight > 0
    }
}

/// Prompt together with its variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDetail {
    #[serde(flatten)]
    pub prompt: Prompt,
    pub variants: Vec<PromptVariant>,
}

/// Aggregated impressions of one variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantStats {
    pub variant_id: String,
    pub label: String,
    pub active: bool,
    pub weight: u32,
    pub impressions: u64,
    pub successes: u64,
    pub ratings: u64,
    #[serde(default)]
    pub mean_rating: Option<f64>,
    #[serde(default)]
    pub mean_latency_ms: Option<f64>,
}

impl VariantStats {
    pub fn success_rate(&self) -> Option<f64> {
        if self.impressions == 0 {
            None
        } else {
            Some(self.successes as f64 / self.impressions as f64)
        }
    }
}

/// Weighted draw among active variants with a positive weight
pub fn select_variant<'a, R>(variants: &'a [PromptVariant], rng: &mut R) -> Option<&'a PromptVariant>
where
    R: Rng + ?Sized,
{
    let total: u64 = variants
        .iter()
        .filter(|v| v.is_selectable())
        .map(|v| u64::from(v.weight))
        .sum();
    if total == 0 {
        return None;
    }

    let mut ticket = rng.gen_range(0..total);
    for variant in variants.iter().filter(|v| v.is_selectable()) {
        let weight = u64::from(variant.weight);
        if ticket < weight {
            return Some(variant);
        }
        ticket -= weight;
    }
    None
}

/// Question/answer digest of every answered step, in traversal order
pub fn responses_digest(responses: &Responses, phases: &[Phase]) -> String {
    responses
        .answered(phases)
        .into_iter()
        .filter_map(|(step, answer)| Some(format!("Q: {}\nA: {}", step.question()?, answer)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Substitute `{{responses}}` and `{{<step_id>}}` placeholders.
///
/// Placeholders that name no known step, or a step without an answer, are
/// left in place.
pub fn render_template(template: &str, responses: &Responses, phases: &[Phase]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = after[..end].trim();
        let whole = &rest[start..start + 2 + end + 2];

        if name == "responses" {
            out.push_str(&responses_digest(responses, phases));
        } else {
            let answer = responses
                .get(name)
                .map(|value| value.display(find_step(phases, name)));
            match answer {
                Some(answer) => out.push_str(&answer),
                None => out.push_str(whole),
            }
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// System and user messages for one variant
pub fn build_messages(variant: &PromptVariant, responses: &Responses, phases: &[Phase]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(variant.system_prompt.clone()),
        ChatMessage::user(render_template(&variant.user_template, responses, phases)),
    ]
}

pub fn default_insights_system_prompt() -> String {
    "You are a thoughtful reflective coach helping someone understand the foundations of their identity.\n\n\
     You receive their answers to a self-assessment covering their current state, their values and \
     decision style, and the patterns and beliefs that shape them.\n\n\
     How to respond:\n\
     - Reply with a single JSON object: {\"summary\": string, \"insights\": [{\"title\": string, \"body\": string}]}\n\
     - The summary is 3-5 sentences in the second person\n\
     - Give 3 to 5 insights, each grounded in specific answers\n\
     - Name tensions between stated values and described patterns gently\n\n\
     What NOT to do:\n\
     - Don't diagnose or use clinical language\n\
     - Don't invent details the answers do not contain\n\
     - No text outside the JSON object"
        .to_string()
}

pub fn default_insights_template() -> String {
    format!(
        "Here are my assessment answers.\n\n{}\n\nWhat do they say about the foundations of who I am?",
        RESPONSES_PLACEHOLDER
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::default_phases;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn variant(id: &str, weight: u32, active: bool) -> PromptVariant {
        PromptVariant {
            id: id.to_string(),
            prompt_id: "p".to_string(),
            label: id.to_uppercase(),
            system_prompt: "sys".to_string(),
            user_template: "{{responses}}".to_string(),
            model: None,
            temperature: None,
            weight,
            active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_select_skips_inactive_and_zero_weight() {
        let variants = vec![variant("off", 10, false), variant("zero", 0, true), variant("on", 1, true)];
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            assert_eq!(select_variant(&variants, &mut rng).unwrap().id, "on");
        }
    }

    #[test]
    fn test_select_none_without_candidates() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(select_variant(&[], &mut rng).is_none());
        assert!(select_variant(&[variant("off", 5, false)], &mut rng).is_none());
    }

    #[test]
    fn test_select_splits_by_weight() {
        let variants = vec![variant("a", 3, true), variant("b", 1, true)];
        let mut rng = StdRng::seed_from_u64(42);
        let draws = 4000;
        let a = (0..draws)
            .filter(|_| select_variant(&variants, &mut rng).unwrap().id == "a")
            .count();
        let share = a as f64 / draws as f64;
        assert!((0.70..0.80).contains(&share), "share of a was {}", share);
    }

    #[test]
    fn test_render_known_and_unknown_placeholders() {
        let phases = default_phases();
        let mut r = Responses::new();
        r.update("decision_style", "intuit");
        r.update("energy_level", 4.0);

        let out = render_template(
            "Style: {{decision_style}}, energy {{ energy_level }}, {{limiting_belief}}, {{nope}}",
            &r,
            &phases,
        );
        assert!(out.starts_with("Style: "));
        assert!(!out.contains("{{decision_style}}"));
        assert!(out.contains("energy 4,"));
        assert!(out.contains("{{limiting_belief}}"));
        assert!(out.ends_with("{{nope}}"));
    }

    #[test]
    fn test_render_responses_digest() {
        let phases = default_phases();
        let mut r = Responses::new();
        r.update("limiting_belief", "I am not enough");
        let out = render_template(&default_insights_template(), &r, &phases);
        assert!(out.contains("A: I am not enough"));
        assert!(!out.contains(RESPONSES_PLACEHOLDER));
    }

    #[test]
    fn test_unterminated_placeholder_is_kept() {
        let out = render_template("hello {{name", &Responses::new(), &default_phases());
        assert_eq!(out, "hello {{name");
    }

    #[test]
    fn test_build_messages_roles() {
        let phases = default_phases();
        let messages = build_messages(&variant("a", 1, true), &Responses::new(), &phases);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
    }
}
