//! Command implementations for foundationsctl

use crate::auth::CliAuth;
use crate::client::ApiClient;
use crate::display;
use crate::draft::{Draft, DraftStore};
use crate::wizard::{Wizard, WizardExit};
use anyhow::{anyhow, bail, Context as _, Result};
use foundations_common::api::{FeedbackRequest, InsightsRequest, NewPrompt, NewVariant, VariantPatch};
use foundations_common::insights::InsightsTracker;
use foundations_common::phases::default_phases;
use foundations_common::prompts::INSIGHTS_PROMPT_KEY;
use foundations_common::records::{most_recent, sort_newest_first};
use foundations_common::session::{AssessmentSession, LoadOutcome, SessionOptions, SubmitOutcome};
use foundations_common::store::{AnalysisStore, AssessmentStore, AuthProvider};
use owo_colors::OwoColorize;
use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;
use tracing::{debug, info};

/// Everything a command needs
pub struct Context {
    pub client: ApiClient,
    pub auth: Arc<CliAuth>,
    pub drafts: DraftStore,
}

// ============================================================================
// take
// ============================================================================

/// Run the assessment wizard, resuming a local draft or the saved record
pub async fn take(ctx: &Context, assessment_id: Option<String>, synthesis: bool) -> Result<()> {
    let options = SessionOptions {
        start_at_synthesis: synthesis,
        read_only: false,
        assessment_id: assessment_id.clone(),
    };
    let mut session = AssessmentSession::new(default_phases(), options)?;

    let user = ctx.auth.user_id();
    let draft = match ctx.drafts.load()? {
        Some(draft) if assessment_id.is_none() && draft.belongs_to(user.as_deref()) => draft,
        _ => Draft::new(user.clone()),
    };
    if !draft.responses.is_empty() {
        info!("Restoring draft {} ({} answers)", draft.id, draft.responses.len());
        session.restore_draft(draft.responses.clone(), draft.pending_save);
    }
    ctx.client.set_idempotency_scope(Some(draft.id.clone()));

    if ctx.auth.is_authenticated() {
        match session.load(&ctx.client).await {
            LoadOutcome::Record { read_only: true, .. } => {
                println!("{}", "Showing your saved assessment. Use :retake to start over.".dimmed());
            }
            LoadOutcome::Resumed(pos) => {
                println!("{}", format!("Resuming where you left off ({})", pos).dimmed());
            }
            LoadOutcome::Record { .. } | LoadOutcome::Fresh => {}
        }
        if let Some(error) = session.error() {
            display::display_error(&format!("Could not reach the server, starting fresh: {}", error));
        }

        if session.has_pending_save() {
            println!("{}", "Saving the assessment you submitted earlier...".dimmed());
            match session.resume_pending_save(&ctx.client, ctx.auth.as_ref()).await {
                Ok(Some(SubmitOutcome::Saved(record))) => {
                    ctx.drafts.clear()?;
                    display::display_success(&format!("Assessment saved ({})", record.id));
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => display::display_error(&e.to_string()),
            }
        }
    } else {
        println!("{}", "Not signed in: answers are kept locally until you submit.".dimmed());
    }

    let stdin = io::stdin();
    let stdout = io::stdout();
    let rescope = |draft: &Draft| ctx.client.set_idempotency_scope(Some(draft.id.clone()));
    let mut wizard = Wizard::new(stdin.lock(), stdout.lock(), &ctx.client, ctx.auth.as_ref(), &ctx.drafts, draft)
        .on_new_draft(&rescope);

    match wizard.run(&mut session).await? {
        WizardExit::Submitted(_) => {
            println!("Run {} to generate your insights.", "foundationsctl insights".bold());
        }
        WizardExit::Quit => debug!("Wizard closed"),
    }
    Ok(())
}

// ============================================================================
// view / history
// ============================================================================

pub async fn view(ctx: &Context, id: &str) -> Result<()> {
    let record = ctx
        .client
        .get_assessment(id)
        .await
        .with_context(|| format!("Failed to load assessment {}", id))?;
    display::print_assessment(&record, &default_phases());
    Ok(())
}

pub async fn history(ctx: &Context) -> Result<()> {
    let mut assessments = ctx
        .client
        .list_assessments()
        .await
        .context("Failed to list assessments")?;
    let mut analyses = ctx
        .client
        .list_analyses()
        .await
        .context("Failed to list analyses")?;
    sort_newest_first(&mut assessments);
    sort_newest_first(&mut analyses);
    display::print_history(&assessments, &analyses);
    Ok(())
}

// ============================================================================
// insights
// ============================================================================

/// `Ok(None)` for an empty line
pub fn parse_rating(line: &str) -> Result<Option<u8>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    match line.parse::<u8>() {
        Ok(rating) if (FeedbackRequest { rating }).is_valid() => Ok(Some(rating)),
        _ => Err(format!(
            "Please enter a number from {} to {}",
            FeedbackRequest::MIN,
            FeedbackRequest::MAX
        )),
    }
}

fn prompt_line(question: &str) -> Result<String> {
    print!("{} ", question.bright_magenta());
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

/// Generate insights for an assessment and save them as an analysis
pub async fn insights(ctx: &Context, assessment_id: Option<String>, prompt_key: Option<String>) -> Result<()> {
    let assessment_id = match assessment_id {
        Some(id) => id,
        None => {
            let records = ctx
                .client
                .list_assessments()
                .await
                .context("Failed to list assessments")?;
            most_recent(&records)
                .map(|r| r.id.clone())
                .ok_or_else(|| anyhow!("No saved assessment yet. Run `foundationsctl take` first."))?
        }
    };

    let mut tracker = InsightsTracker::new(Some(assessment_id.clone()));
    tracker.begin_analysis()?;
    println!("{}", "Generating insights...".dimmed());

    let request = InsightsRequest {
        prompt_key: prompt_key.unwrap_or_else(|| INSIGHTS_PROMPT_KEY.to_string()),
        assessment_id: Some(assessment_id),
        responses: None,
    };
    let response = match ctx.client.insights(&request).await {
        Ok(response) => response,
        Err(e) => {
            tracker.on_analysis_failed(e.to_string());
            return Err(e).context("Failed to generate insights");
        }
    };
    debug!(
        "Variant {} answered in {}ms",
        response.variant_label, response.latency_ms
    );

    tracker.on_analysis_complete(response.result.clone());
    display::print_analysis(&response.result);

    let interactive = io::stdin().is_terminal();
    let mut saved = tracker.auto_save(&ctx.client).await;
    while let Err(e) = &saved {
        display::display_error(&e.to_string());
        if !interactive || !prompt_line("Retry saving? [y/N]")?.trim().eq_ignore_ascii_case("y") {
            bail!("Insights were not saved");
        }
        saved = tracker.retry(&ctx.client).await.map(Some);
    }
    if let Some(record) = tracker.saved() {
        display::display_success(&format!("Saved as analysis {}", record.id));
    }

    if interactive {
        loop {
            match parse_rating(&prompt_line("Rate these insights 1-5 (Enter to skip):")?) {
                Ok(Some(rating)) => {
                    ctx.client
                        .rate_impression(&response.impression_id, rating)
                        .await
                        .context("Failed to send rating")?;
                    display::display_success("Thanks for the feedback");
                    break;
                }
                Ok(None) => break,
                Err(message) => println!("{}", message.yellow()),
            }
        }
    }
    Ok(())
}

// ============================================================================
// prompts (admin console)
// ============================================================================

/// Inline text, or `@path` to read a file
pub fn read_text_arg(value: &str) -> Result<String> {
    match value.strip_prefix('@') {
        Some(path) => fs::read_to_string(path).with_context(|| format!("Failed to read {}", path)),
        None => Ok(value.to_string()),
    }
}

fn read_optional(value: Option<String>) -> Result<Option<String>> {
    value.as_deref().map(read_text_arg).transpose()
}

pub async fn prompts_list(ctx: &Context) -> Result<()> {
    display::print_prompts(&ctx.client.list_prompts().await?);
    Ok(())
}

pub async fn prompts_show(ctx: &Context, id: &str) -> Result<()> {
    display::print_prompt_detail(&ctx.client.prompt_detail(id).await?);
    Ok(())
}

pub async fn prompts_create(ctx: &Context, key: String, description: String) -> Result<()> {
    let prompt = ctx.client.create_prompt(&NewPrompt { key, description }).await?;
    display::display_success(&format!("Created prompt {} ({})", prompt.key, prompt.id));
    Ok(())
}

pub async fn prompts_delete(ctx: &Context, id: &str) -> Result<()> {
    ctx.client.delete_prompt(id).await?;
    display::display_success(&format!("Deleted prompt {}", id));
    Ok(())
}

pub struct VariantArgs {
    pub label: Option<String>,
    pub system: Option<String>,
    pub template: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub weight: Option<u32>,
    pub active: Option<bool>,
}

impl VariantArgs {
    /// Texts may be `@path` references
    pub fn into_new_variant(self) -> Result<NewVariant> {
        let label = self.label.ok_or_else(|| anyhow!("--label is required"))?;
        let system_prompt = read_optional(self.system)?.ok_or_else(|| anyhow!("--system is required"))?;
        let user_template = read_optional(self.template)?.ok_or_else(|| anyhow!("--template is required"))?;
        Ok(NewVariant {
            label,
            system_prompt,
            user_template,
            model: self.model,
            temperature: self.temperature,
            weight: self.weight.unwrap_or(1),
            active: self.active.unwrap_or(true),
        })
    }

    pub fn into_patch(self) -> Result<VariantPatch> {
        Ok(VariantPatch {
            label: self.label,
            system_prompt: read_optional(self.system)?,
            user_template: read_optional(self.template)?,
            model: self.model,
            temperature: self.temperature,
            weight: self.weight,
            active: self.active,
        })
    }
}

pub async fn prompts_add_variant(ctx: &Context, prompt_id: &str, args: VariantArgs) -> Result<()> {
    let variant = ctx.client.add_variant(prompt_id, &args.into_new_variant()?).await?;
    display::display_success(&format!("Added variant {} ({})", variant.label, variant.id));
    Ok(())
}

pub async fn prompts_update_variant(ctx: &Context, id: &str, args: VariantArgs) -> Result<()> {
    let patch = args.into_patch()?;
    if patch.is_empty() {
        bail!("Nothing to update; pass at least one field");
    }
    let variant = ctx.client.update_variant(id, &patch).await?;
    display::print_variant(&variant);
    Ok(())
}

pub async fn prompts_delete_variant(ctx: &Context, id: &str) -> Result<()> {
    ctx.client.delete_variant(id).await?;
    display::display_success(&format!("Deleted variant {}", id));
    Ok(())
}

pub async fn prompts_stats(ctx: &Context, prompt_id: &str) -> Result<()> {
    display::print_stats(&ctx.client.prompt_stats(prompt_id).await?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn args() -> VariantArgs {
        VariantArgs {
            label: None,
            system: None,
            template: None,
            model: None,
            temperature: None,
            weight: None,
            active: None,
        }
    }

    #[test]
    fn test_parse_rating() {
        assert_eq!(parse_rating("\n"), Ok(None));
        assert_eq!(parse_rating(" 4 "), Ok(Some(4)));
        assert!(parse_rating("0").is_err());
        assert!(parse_rating("6").is_err());
        assert!(parse_rating("great").is_err());
    }

    #[test]
    fn test_text_arg_reads_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("system.txt");
        fs::write(&path, "Be direct.").unwrap();
        assert_eq!(read_text_arg(&format!("@{}", path.display())).unwrap(), "Be direct.");
        assert_eq!(read_text_arg("inline").unwrap(), "inline");
        assert!(read_text_arg("@/nonexistent/file").is_err());
    }

    #[test]
    fn test_new_variant_requires_texts() {
        let mut a = args();
        a.label = Some("B".into());
        a.system = Some("s".into());
        assert!(a.into_new_variant().is_err());

        let mut a = args();
        a.label = Some("B".into());
        a.system = Some("s".into());
        a.template = Some("{{responses}}".into());
        let variant = a.into_new_variant().unwrap();
        assert_eq!(variant.weight, 1);
        assert!(variant.active);
    }

    #[test]
    fn test_empty_patch() {
        assert!(args().into_patch().unwrap().is_empty());
        let mut a = args();
        a.active = Some(false);
        assert_eq!(a.into_patch().unwrap().active, Some(false));
    }
}
