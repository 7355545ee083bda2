//! Terminal output for foundationsctl commands

use foundations_common::phases::Phase;
use foundations_common::prompts::{Prompt, PromptDetail, PromptVariant, VariantStats};
use foundations_common::records::{AnalysisRecord, AnalysisResult, AssessmentRecord};
use owo_colors::OwoColorize;

pub const SEPARATOR: &str = "----------------------------------------";

pub fn display_error(message: &str) {
    eprintln!();
    eprintln!("[ERROR] {}", message.red());
    eprintln!();
}

pub fn display_success(message: &str) {
    println!("{}  {}", "+".bright_green(), message);
}

/// Shorten to `max` characters, marking the cut
pub fn truncate(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}

pub fn format_percent(rate: Option<f64>) -> String {
    rate.map(|r| format!("{:.0}%", r * 100.0))
        .unwrap_or_else(|| "-".to_string())
}

pub fn format_mean(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_else(|| "-".to_string())
}

// ============================================================================
// Records
// ============================================================================

/// Read-only projection of a saved assessment
pub fn print_assessment(record: &AssessmentRecord, phases: &[Phase]) {
    println!();
    println!("{}  {}", "Assessment".bright_cyan().bold(), record.id.dimmed());
    match record.created_at {
        Some(at) => println!("Saved {}", at.format("%Y-%m-%d %H:%M UTC")),
        None => println!("{}", "Not saved yet".yellow()),
    }
    println!("{}", SEPARATOR.dimmed());

    let answered = record.responses.answered(phases);
    if answered.is_empty() {
        println!("{}", "No answers".dimmed());
    }
    for (step, answer) in answered {
        println!("{}", step.question().unwrap_or_default().bright_white());
        println!("   {}", answer);
    }
    println!();
}

pub fn print_history(assessments: &[AssessmentRecord], analyses: &[AnalysisRecord]) {
    println!();
    println!("{}", "Assessments".bright_cyan().bold());
    if assessments.is_empty() {
        println!("   {}", "none".dimmed());
    }
    for record in assessments {
        let when = record
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unsaved".to_string());
        println!("   {}  {}  {} answers", when, record.id.dimmed(), record.responses.len());
    }

    println!();
    println!("{}", "Analyses".bright_cyan().bold());
    if analyses.is_empty() {
        println!("   {}", "none".dimmed());
    }
    for record in analyses {
        println!(
            "   {}  {}  {}",
            record.created_at.format("%Y-%m-%d %H:%M"),
            record.id.dimmed(),
            truncate(&record.result.summary, 60)
        );
    }
    println!();
}

pub fn print_analysis(result: &AnalysisResult) {
    println!();
    println!("{}", "Your insights".bright_cyan().bold());
    println!("{}", SEPARATOR.dimmed());
    println!("{}", result.summary);
    for insight in &result.insights {
        println!();
        println!("{}  {}", "*".bright_magenta(), insight.title.bold());
        if !insight.body.is_empty() {
            println!("   {}", insight.body);
        }
    }
    println!();
}

// ============================================================================
// Admin console
// ============================================================================

pub fn print_prompts(prompts: &[Prompt]) {
    if prompts.is_empty() {
        println!("{}", "No prompts".dimmed());
        return;
    }
    for prompt in prompts {
        println!(
            "{}  {}  {}",
            prompt.id.dimmed(),
            prompt.key.bright_white(),
            truncate(&prompt.description, 50)
        );
    }
}

pub fn print_variant(variant: &PromptVariant) {
    let state = if variant.active {
        "[active]".bright_green().to_string()
    } else {
        "[inactive]".yellow().to_string()
    };
    println!(
        "   {} {}  {}  weight {}",
        variant.label.bold(),
        state,
        variant.id.dimmed(),
        variant.weight
    );
    if let Some(model) = &variant.model {
        println!("      model: {}", model);
    }
    if let Some(temperature) = variant.temperature {
        println!("      temperature: {}", temperature);
    }
    println!("      system: {}", truncate(&variant.system_prompt, 70).dimmed());
    println!("      template: {}", truncate(&variant.user_template, 70).dimmed());
}

pub fn print_prompt_detail(detail: &PromptDetail) {
    println!();
    println!("{}  {}", detail.prompt.key.bright_cyan().bold(), detail.prompt.id.dimmed());
    if !detail.prompt.description.is_empty() {
        println!("{}", detail.prompt.description);
    }
    println!("{}", SEPARATOR.dimmed());
    if detail.variants.is_empty() {
        println!("   {}", "No variants".dimmed());
    }
    for variant in &detail.variants {
        print_variant(variant);
    }
    println!();
}

pub fn print_stats(stats: &[VariantStats]) {
    println!();
    println!(
        "{:<16} {:>7} {:>11} {:>8} {:>8} {:>10}",
        "VARIANT", "WEIGHT", "IMPRESSIONS", "SUCCESS", "RATING", "LATENCY"
    );
    for s in stats {
        let label = if s.active {
            truncate(&s.label, 16)
        } else {
            truncate(&format!("{} (off)", s.label), 16)
        };
        println!(
            "{:<16} {:>7} {:>11} {:>8} {:>8} {:>10}",
            label,
            s.weight,
            s.impressions,
            format_percent(s.success_rate()),
            format_mean(s.mean_rating, 2),
            format!("{}ms", format_mean(s.mean_latency_ms, 0))
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a rather long sentence", 10), "a rathe...");
        assert_eq!(truncate("  padded  ", 10), "padded");
    }

    #[test]
    fn test_format_missing_values() {
        assert_eq!(format_percent(None), "-");
        assert_eq!(format_percent(Some(0.5)), "50%");
        assert_eq!(format_mean(Some(4.256), 2), "4.26");
        assert_eq!(format_mean(None, 0), "-");
    }
}
