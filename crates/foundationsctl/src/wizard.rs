//! Interactive assessment wizard.
//!
//! Drives an [`AssessmentSession`] from a line-based terminal. Parsing is
//! kept in pure functions; the loop is generic over its reader, writer and
//! store so it runs the same against a terminal and a script.

use crate::auth::CliAuth;
use crate::draft::{Draft, DraftStore};
use chrono::Utc;
use foundations_common::error::SessionError;
use foundations_common::navigation::Position;
use foundations_common::phases::{Phase, Step};
use foundations_common::records::AssessmentRecord;
use foundations_common::responses::ResponseValue;
use foundations_common::session::{AssessmentSession, SessionEvent, SubmitOutcome};
use foundations_common::store::AssessmentStore;
use owo_colors::OwoColorize;
use std::io::{self, BufRead, Write};
use tracing::warn;

// ============================================================================
// Input parsing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Empty line: keep the current answer and move on
    Continue,
    Back,
    Summary,
    Submit,
    Retake,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Command(Command),
    Answer(ResponseValue),
}

pub const HELP: &str = "Enter to continue, :back, :summary, :quit";

fn parse_command(line: &str) -> Option<Result<Command, String>> {
    let word = line.strip_prefix(':')?;
    let command = match word.trim().to_ascii_lowercase().as_str() {
        "b" | "back" => Command::Back,
        "s" | "summary" => Command::Summary,
        "submit" => Command::Submit,
        "r" | "retake" => Command::Retake,
        "q" | "quit" => Command::Quit,
        other => return Some(Err(format!("Unknown command ':{}'", other))),
    };
    Some(Ok(command))
}

/// Option by 1-based number or by its value
fn parse_choice(step: &Step, token: &str) -> Result<String, String> {
    let options = step.options();
    if let Ok(num) = token.parse::<usize>() {
        return match num.checked_sub(1).and_then(|i| options.get(i)) {
            Some(option) => Ok(option.value.clone()),
            None => Err(format!("Please enter a number between 1 and {}", options.len())),
        };
    }
    options
        .iter()
        .find(|o| o.value.eq_ignore_ascii_case(token))
        .map(|o| o.value.clone())
        .ok_or_else(|| format!("'{}' is not one of the options", token))
}

/// Parse one line of input for `step`
pub fn parse_input(step: &Step, line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Command(Command::Continue));
    }
    if let Some(command) = parse_command(line) {
        return command.map(Input::Command);
    }

    let value = match step {
        Step::Intro { .. } | Step::Synthesis { .. } => {
            return Err(format!("Nothing to answer here. {}", HELP));
        }
        Step::SingleSelect { .. } => ResponseValue::Text(parse_choice(step, line)?),
        Step::MultiSelect { .. } => {
            let mut values: Vec<String> = Vec::new();
            for token in line.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                let value = parse_choice(step, token)?;
                if !values.contains(&value) {
                    values.push(value);
                }
            }
            ResponseValue::List(values)
        }
        Step::Scale { min, max, .. } => {
            let n: f64 = line
                .parse()
                .map_err(|_| format!("Please enter a number from {} to {}", min, max))?;
            if n < f64::from(*min) || n > f64::from(*max) {
                return Err(format!("Please enter a number from {} to {}", min, max));
            }
            ResponseValue::Number(n)
        }
        Step::Textarea { .. } => ResponseValue::Text(line.to_string()),
    };
    Ok(Input::Answer(value))
}

/// Position of a question by id
pub fn find_position(phases: &[Phase], step_id: &str) -> Option<Position> {
    phases.iter().enumerate().find_map(|(p, phase)| {
        phase
            .steps
            .iter()
            .position(|s| s.id() == Some(step_id))
            .map(|s| Position::new(p, s))
    })
}

// ============================================================================
// Wizard loop
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum WizardExit {
    Submitted(AssessmentRecord),
    /// Left early; answers stay in the draft
    Quit,
}

pub struct Wizard<'a, R, W, S: ?Sized> {
    input: R,
    output: W,
    store: &'a S,
    auth: &'a CliAuth,
    drafts: &'a DraftStore,
    draft: Draft,
    on_new_draft: Option<&'a (dyn Fn(&Draft) + 'a)>,
}

impl<'a, R, W, S> Wizard<'a, R, W, S>
where
    R: BufRead,
    W: Write,
    S: AssessmentStore + ?Sized,
{
    pub fn new(input: R, output: W, store: &'a S, auth: &'a CliAuth, drafts: &'a DraftStore, draft: Draft) -> Self {
        Self {
            input,
            output,
            store,
            auth,
            drafts,
            draft,
            on_new_draft: None,
        }
    }

    /// Called when a retake starts a new draft
    pub fn on_new_draft(mut self, hook: &'a (dyn Fn(&Draft) + 'a)) -> Self {
        self.on_new_draft = Some(hook);
        self
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub async fn run(&mut self, session: &mut AssessmentSession) -> io::Result<WizardExit> {
        if session.is_read_only() {
            session.go_to_synthesis();
        }

        loop {
            self.render(session)?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                self.persist(session);
                return Ok(WizardExit::Quit);
            }

            let input = match parse_input(session.current_step(), &line) {
                Ok(input) => input,
                Err(message) => {
                    self.notice(&message)?;
                    continue;
                }
            };

            match input {
                Input::Answer(value) => {
                    let Some(id) = session.current_step().id().map(str::to_string) else {
                        continue;
                    };
                    if let Err(e) = session.update_response(id, value) {
                        self.notice(&e.to_string())?;
                        continue;
                    }
                    self.persist(session);
                    self.advance(session).await?;
                }
                Input::Command(Command::Continue) => {
                    if !matches!(session.current_step(), Step::Synthesis { .. }) {
                        self.advance(session).await?;
                    }
                }
                Input::Command(Command::Back) => {
                    if let Err(e) = session.back() {
                        self.notice(&e.to_string())?;
                    }
                }
                Input::Command(Command::Summary) => {
                    let event = session.go_to_synthesis();
                    self.record_progress(event).await;
                }
                Input::Command(Command::Submit) => {
                    if let Some(record) = self.submit(session).await? {
                        return Ok(WizardExit::Submitted(record));
                    }
                }
                Input::Command(Command::Retake) => {
                    session.retake();
                    self.draft = Draft::new(self.auth.user_id());
                    if let Some(hook) = self.on_new_draft {
                        hook(&self.draft);
                    }
                    self.persist(session);
                    writeln!(self.output, "   {}  Starting over", "+".bright_green())?;
                }
                Input::Command(Command::Quit) => {
                    self.persist(session);
                    if !session.is_read_only() && !session.responses().is_empty() {
                        writeln!(
                            self.output,
                            "   {}  Answers kept in {}",
                            "~".yellow(),
                            self.drafts.path().display()
                        )?;
                    }
                    return Ok(WizardExit::Quit);
                }
            }
        }
    }

    /// Validate and move forward; a new watermark is sent to the store
    async fn advance(&mut self, session: &mut AssessmentSession) -> io::Result<()> {
        match session.next() {
            Ok(event) => self.record_progress(event).await,
            Err(SessionError::Validation { .. }) => {}
            Err(e) => self.notice(&e.to_string())?,
        }
        // A scale default may have been written on arrival
        self.persist(session);
        Ok(())
    }

    async fn record_progress(&self, event: Option<SessionEvent>) {
        if let Some(SessionEvent::Reached(position)) = event {
            if let Err(e) = self.store.save_progress(position).await {
                warn!("Could not record progress {}: {}", position, e);
            }
        }
    }

    async fn submit(&mut self, session: &mut AssessmentSession) -> io::Result<Option<AssessmentRecord>> {
        let outcome = match session.submit(self.store, self.auth).await {
            Ok(SubmitOutcome::AuthRequired) => {
                self.persist(session);
                if !self.auth.sign_in_interactive(&mut self.input, &mut self.output)? {
                    return Ok(None);
                }
                self.draft.user_id = self.auth.user_id();
                session.resume_pending_save(self.store, self.auth).await
            }
            other => other.map(Some),
        };

        match outcome {
            Ok(Some(SubmitOutcome::Saved(record))) => {
                if let Err(e) = self.drafts.clear() {
                    warn!("Could not remove draft: {:#}", e);
                }
                writeln!(
                    self.output,
                    "   {}  Assessment saved ({})",
                    "+".bright_green(),
                    record.id.dimmed()
                )?;
                Ok(Some(record))
            }
            Ok(_) => Ok(None),
            Err(SessionError::Validation { step_id, message }) => {
                self.notice(&message)?;
                if let Some(pos) = step_id.and_then(|id| find_position(session.phases(), &id)) {
                    let event = session.jump(pos.phase, pos.step);
                    self.record_progress(event).await;
                }
                Ok(None)
            }
            Err(e @ SessionError::SaveFailed(_)) => {
                self.notice(&format!("{}. Type :submit to try again.", e))?;
                Ok(None)
            }
            Err(e) => {
                self.notice(&e.to_string())?;
                Ok(None)
            }
        }
    }

    /// Write the draft; failures are logged, never fatal
    fn persist(&mut self, session: &AssessmentSession) {
        if session.is_read_only() {
            return;
        }
        self.draft.responses = session.responses().clone();
        self.draft.pending_save = session.has_pending_save();
        if self.draft.user_id.is_none() {
            self.draft.user_id = self.auth.user_id();
        }
        self.draft.updated_at = Utc::now();
        if let Err(e) = self.drafts.save(&self.draft) {
            warn!("Could not save draft: {:#}", e);
        }
    }

    fn notice(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.output, "   {}  {}", "!".yellow(), message.yellow())
    }

    // ------------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------------

    fn render(&mut self, session: &AssessmentSession) -> io::Result<()> {
        let phase = session.current_phase();
        let step = session.current_step().clone();
        writeln!(self.output)?;
        writeln!(
            self.output,
            "{}  {}",
            phase.title.bright_cyan().bold(),
            phase.subtitle.dimmed()
        )?;
        writeln!(
            self.output,
            "{}",
            format!("[{}/{}]", session.current_total_step(), session.total_steps()).dimmed()
        )?;

        match &step {
            Step::Intro { title, body } => {
                writeln!(self.output, "\n{}\n{}", title.bold(), body)?;
            }
            Step::Synthesis { title, body } => {
                writeln!(self.output, "\n{}\n{}", title.bold(), body)?;
                return self.render_summary(session);
            }
            Step::MultiSelect { question, options, .. } | Step::SingleSelect { question, options, .. } => {
                writeln!(self.output, "\n{}", question.bright_white())?;
                if matches!(step, Step::MultiSelect { .. }) {
                    writeln!(self.output, "{}", "(numbers separated by commas, e.g. 1,3)".dimmed())?;
                }
                for (i, option) in options.iter().enumerate() {
                    writeln!(self.output, "   {}  {}", format!("[{}]", i + 1).cyan(), option.label)?;
                }
            }
            Step::Scale { question, min, max, min_label, max_label, .. } => {
                writeln!(self.output, "\n{}", question.bright_white())?;
                writeln!(
                    self.output,
                    "   {} {} .. {} {}",
                    min,
                    min_label.as_deref().unwrap_or_default().dimmed(),
                    max,
                    max_label.as_deref().unwrap_or_default().dimmed()
                )?;
            }
            Step::Textarea { question, placeholder, .. } => {
                writeln!(self.output, "\n{}", question.bright_white())?;
                writeln!(self.output, "   {}", placeholder.dimmed())?;
            }
        }

        if let Some(answer) = step.id().and_then(|id| session.responses().get(id)) {
            writeln!(self.output, "   Current: {}", answer.display(Some(&step)).bright_white())?;
        }
        if let Some(error) = session.validation_error() {
            writeln!(self.output, "   {}  {}", "!".bright_red(), error.bright_red())?;
        }
        write!(self.output, "{}\n> ", HELP.dimmed())?;
        self.output.flush()
    }

    fn render_summary(&mut self, session: &AssessmentSession) -> io::Result<()> {
        let mut current_phase = String::new();
        for line in session.summary() {
            if line.phase != current_phase {
                writeln!(self.output, "\n{}", line.phase.bright_cyan())?;
                current_phase = line.phase.clone();
            }
            let answer = if line.answer.is_empty() {
                "(unanswered)".dimmed().to_string()
            } else {
                line.answer
            };
            writeln!(self.output, "   {}  {}", line.question, answer)?;
        }
        writeln!(self.output)?;

        if let Some(error) = session.error() {
            writeln!(self.output, "   {}  {}", "!".bright_red(), error.bright_red())?;
        }
        if let Some(error) = session.validation_error() {
            writeln!(self.output, "   {}  {}", "!".bright_red(), error.bright_red())?;
        }

        if session.is_read_only() {
            if let Some(saved_at) = session.saved_at() {
                writeln!(self.output, "   Saved {}", saved_at.format("%Y-%m-%d %H:%M UTC"))?;
            }
            write!(self.output, "{}\n> ", ":retake to start over, :quit".dimmed())?;
        } else {
            let missing = session.missing_required().len();
            if missing > 0 {
                writeln!(self.output, "   {} required questions unanswered", missing.yellow())?;
            }
            if session.has_pending_save() {
                writeln!(self.output, "   {}", "Waiting for sign-in to save".yellow())?;
            }
            write!(self.output, "{}\n> ", ":submit to save, :back, :quit".dimmed())?;
        }
        self.output.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use foundations_common::error::StoreError;
    use foundations_common::phases::{default_phases, find_step};
    use foundations_common::responses::Responses;
    use foundations_common::session::SessionOptions;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingStore {
        saves: Mutex<Vec<Responses>>,
        progress: Mutex<Vec<Position>>,
    }

    #[async_trait]
    impl AssessmentStore for RecordingStore {
        async fn list_assessments(&self) -> Result<Vec<AssessmentRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn get_assessment(&self, id: &str) -> Result<AssessmentRecord, StoreError> {
            Err(StoreError::NotFound(id.to_string()))
        }

        async fn save_assessment(&self, responses: &Responses) -> Result<AssessmentRecord, StoreError> {
            let mut saves = self.saves.lock().unwrap();
            saves.push(responses.clone());
            Ok(AssessmentRecord {
                id: format!("a{}", saves.len()),
                user_id: "alice".into(),
                responses: responses.clone(),
                created_at: Some(Utc::now()),
            })
        }

        async fn get_progress(&self) -> Result<Option<Position>, StoreError> {
            Ok(self.progress.lock().unwrap().last().copied())
        }

        async fn save_progress(&self, position: Position) -> Result<(), StoreError> {
            self.progress.lock().unwrap().push(position);
            Ok(())
        }
    }

    /// One line per screen answering every question, then submit
    fn full_script() -> String {
        let mut script = String::new();
        for phase in default_phases() {
            for step in &phase.steps {
                let line = match step {
                    Step::MultiSelect { .. } => "1,2",
                    Step::SingleSelect { .. } => "1",
                    Step::Textarea { .. } => "Something honest",
                    Step::Intro { .. } | Step::Scale { .. } | Step::Synthesis { .. } => "",
                };
                if !matches!(step, Step::Synthesis { .. }) {
                    script.push_str(line);
                    script.push('\n');
                }
            }
        }
        script.push_str(":submit\n");
        script
    }

    fn session() -> AssessmentSession {
        AssessmentSession::new(default_phases(), SessionOptions::default()).unwrap()
    }

    #[test]
    fn test_parse_commands_and_continue() {
        let phases = default_phases();
        let step = &phases[0].steps[0];
        assert_eq!(parse_input(step, "\n"), Ok(Input::Command(Command::Continue)));
        assert_eq!(parse_input(step, ":b"), Ok(Input::Command(Command::Back)));
        assert_eq!(parse_input(step, ":QUIT"), Ok(Input::Command(Command::Quit)));
        assert!(parse_input(step, ":dance").is_err());
    }

    #[test]
    fn test_parse_select_answers() {
        let phases = default_phases();
        let single = find_step(&phases, "decision_style").unwrap();
        assert_eq!(
            parse_input(single, "1"),
            Ok(Input::Answer(ResponseValue::Text("analyze".into())))
        );
        assert_eq!(
            parse_input(single, "consult"),
            Ok(Input::Answer(ResponseValue::Text("consult".into())))
        );
        assert!(parse_input(single, "0").is_err());
        assert!(parse_input(single, "99").is_err());

        let multi = find_step(&phases, "core_values").unwrap();
        let first = multi.options()[0].value.clone();
        let second = multi.options()[1].value.clone();
        assert_eq!(
            parse_input(multi, "2, 1, 2"),
            Ok(Input::Answer(ResponseValue::List(vec![second, first])))
        );
    }

    #[test]
    fn test_parse_scale_bounds() {
        let phases = default_phases();
        let scale = find_step(&phases, "energy_level").unwrap();
        let Step::Scale { min, max, .. } = scale else {
            panic!("energy_level is a scale");
        };
        assert_eq!(
            parse_input(scale, &max.to_string()),
            Ok(Input::Answer(ResponseValue::Number(f64::from(*max))))
        );
        assert!(parse_input(scale, &(min - 1).to_string()).is_err());
        assert!(parse_input(scale, "lots").is_err());
    }

    #[test]
    fn test_find_position() {
        let phases = default_phases();
        let pos = find_position(&phases, "energy_level").unwrap();
        assert_eq!(phases[pos.phase].steps[pos.step].id(), Some("energy_level"));
        assert_eq!(find_position(&phases, "nope"), None);
    }

    #[tokio::test]
    async fn test_scripted_run_submits_once() {
        let dir = tempdir().unwrap();
        let drafts = DraftStore::new(dir.path().join("draft.json"));
        let store = RecordingStore::default();
        let auth = CliAuth::new(Some("alice".into()));
        let mut output = Vec::new();
        let script = full_script();

        let mut session = session();
        let mut wizard = Wizard::new(script.as_bytes(), &mut output, &store, &auth, &drafts, Draft::new(None));
        let exit = wizard.run(&mut session).await.unwrap();

        assert!(matches!(exit, WizardExit::Submitted(_)));
        assert!(session.is_read_only());
        assert_eq!(store.saves.lock().unwrap().len(), 1);
        assert!(store.saves.lock().unwrap()[0].is_complete());
        assert_eq!(drafts.load().unwrap(), None);

        let progress = store.progress.lock().unwrap();
        assert!(!progress.is_empty());
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_progress_label_runs_from_one_to_total() {
        let dir = tempdir().unwrap();
        let drafts = DraftStore::new(dir.path().join("draft.json"));
        let store = RecordingStore::default();
        let auth = CliAuth::new(Some("alice".into()));

        let mut session = session();
        let total = session.total_steps();

        let mut output = Vec::new();
        let mut wizard = Wizard::new(":quit\n".as_bytes(), &mut output, &store, &auth, &drafts, Draft::new(None));
        wizard.run(&mut session).await.unwrap();
        let text = String::from_utf8_lossy(&output).into_owned();
        assert!(text.contains(&format!("[1/{}]", total)), "{}", text);
        assert!(!text.contains(&format!("[2/{}]", total)));

        let mut output = Vec::new();
        let mut wizard = Wizard::new(":summary\n:quit\n".as_bytes(), &mut output, &store, &auth, &drafts, Draft::new(None));
        wizard.run(&mut session).await.unwrap();
        let text = String::from_utf8_lossy(&output).into_owned();
        assert!(text.contains(&format!("[{}/{}]", total, total)), "{}", text);
        assert!(!text.contains(&format!("[{}/{}]", total + 1, total)));

        // Jumping to the summary is the furthest point reached
        let progress = store.progress.lock().unwrap();
        assert_eq!(progress.last().copied(), Some(session.position()));
    }

    #[tokio::test]
    async fn test_anonymous_submit_signs_in_then_saves() {
        let dir = tempdir().unwrap();
        let drafts = DraftStore::new(dir.path().join("draft.json"));
        let store = RecordingStore::default();
        let auth = CliAuth::new(None);
        let mut output = Vec::new();
        let script = format!("{}alice\n", full_script());

        let mut session = session();
        let mut wizard = Wizard::new(script.as_bytes(), &mut output, &store, &auth, &drafts, Draft::new(None));
        let exit = wizard.run(&mut session).await.unwrap();

        assert!(matches!(exit, WizardExit::Submitted(_)));
        assert_eq!(auth.user_id().as_deref(), Some("alice"));
        assert_eq!(store.saves.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_sign_in_keeps_pending_draft() {
        let dir = tempdir().unwrap();
        let drafts = DraftStore::new(dir.path().join("draft.json"));
        let store = RecordingStore::default();
        let auth = CliAuth::new(None);
        let mut output = Vec::new();
        let script = format!("{}\n:quit\n", full_script());

        let mut session = session();
        let mut wizard = Wizard::new(script.as_bytes(), &mut output, &store, &auth, &drafts, Draft::new(None));
        let exit = wizard.run(&mut session).await.unwrap();

        assert_eq!(exit, WizardExit::Quit);
        assert!(store.saves.lock().unwrap().is_empty());
        let draft = drafts.load().unwrap().unwrap();
        assert!(draft.pending_save);
        assert!(draft.responses.is_complete());
    }

    #[tokio::test]
    async fn test_unanswered_question_blocks_and_end_of_input_keeps_draft() {
        let dir = tempdir().unwrap();
        let drafts = DraftStore::new(dir.path().join("draft.json"));
        let store = RecordingStore::default();
        let auth = CliAuth::new(Some("alice".into()));
        let mut output = Vec::new();

        let mut session = session();
        // Past the intro, then try to skip the first question twice
        let mut wizard = Wizard::new("\n\n\n".as_bytes(), &mut output, &store, &auth, &drafts, Draft::new(None));
        let exit = wizard.run(&mut session).await.unwrap();
        assert_eq!(exit, WizardExit::Quit);
        assert!(session.validation_error().is_some());
        assert_eq!(store.progress.lock().unwrap().len(), 1);

        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("This question is required"));
        assert!(drafts.load().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_retake_from_saved_record_starts_new_draft() {
        let dir = tempdir().unwrap();
        let drafts = DraftStore::new(dir.path().join("draft.json"));
        let store = RecordingStore::default();
        let auth = CliAuth::new(Some("alice".into()));
        let mut output = Vec::new();
        let new_drafts = Mutex::new(Vec::new());
        let hook = |draft: &Draft| new_drafts.lock().unwrap().push(draft.id.clone());

        let mut session = session();
        session.hydrate(AssessmentRecord {
            id: "a1".into(),
            user_id: "alice".into(),
            responses: Responses::new(),
            created_at: Some(Utc::now()),
        });
        assert!(session.is_read_only());

        let original = Draft::new(Some("alice".into()));
        let original_id = original.id.clone();
        let mut wizard = Wizard::new(":retake\n:quit\n".as_bytes(), &mut output, &store, &auth, &drafts, original)
            .on_new_draft(&hook);
        let exit = wizard.run(&mut session).await.unwrap();

        assert_eq!(exit, WizardExit::Quit);
        assert!(!session.is_read_only());
        assert_eq!(session.position(), Position::START);
        let ids = new_drafts.lock().unwrap();
        assert_eq!(ids.len(), 1);
        assert_ne!(ids[0], original_id);
        assert_eq!(drafts.load().unwrap().unwrap().id, ids[0]);
    }
}
