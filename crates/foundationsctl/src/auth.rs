//! Terminal sign-in. The daemon trusts the `x-user-id` header set by the
//! fronting auth provider; the CLI plays that role with a typed user id.

use foundations_common::store::{AuthProvider, UserProfile};
use owo_colors::OwoColorize;
use std::io::{self, BufRead, Write};
use std::sync::RwLock;

/// Current user, shared by the HTTP client and the wizard
#[derive(Debug, Default)]
pub struct CliAuth {
    user: RwLock<Option<UserProfile>>,
}

impl CliAuth {
    pub fn new(user_id: Option<String>) -> Self {
        let auth = Self::default();
        if let Some(id) = user_id {
            auth.sign_in(&id);
        }
        auth
    }

    pub fn user_id(&self) -> Option<String> {
        self.current_user().map(|u| u.id)
    }

    /// Ignored when `id` is blank
    pub fn sign_in(&self, id: &str) -> bool {
        let id = id.trim();
        if id.is_empty() {
            return false;
        }
        if let Ok(mut user) = self.user.write() {
            *user = Some(UserProfile {
                id: id.to_string(),
                display_name: None,
            });
            return true;
        }
        false
    }

    /// Ask for a user id; an empty line cancels
    pub fn sign_in_interactive<R: BufRead, W: Write>(&self, input: &mut R, output: &mut W) -> io::Result<bool> {
        writeln!(output)?;
        writeln!(output, "   {}  {}", "?".bright_cyan().bold(), "Sign in to save your assessment".bold())?;
        write!(output, "   {}  ", "User id (empty to cancel):".bright_magenta())?;
        output.flush()?;

        let mut line = String::new();
        input.read_line(&mut line)?;
        let signed_in = self.sign_in(&line);
        if signed_in {
            writeln!(output, "   {}  Signed in as {}", "+".bright_green(), line.trim().bright_white())?;
        } else {
            writeln!(output, "   {}  Sign-in cancelled; your answers stay in the local draft", "~".yellow())?;
        }
        Ok(signed_in)
    }
}

impl AuthProvider for CliAuth {
    fn current_user(&self) -> Option<UserProfile> {
        self.user.read().ok().and_then(|user| user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_user_is_signed_in() {
        let auth = CliAuth::new(Some("alice".into()));
        assert!(auth.is_authenticated());
        assert_eq!(auth.user_id().as_deref(), Some("alice"));
        assert!(!CliAuth::new(None).is_authenticated());
    }

    #[test]
    fn test_interactive_sign_in() {
        let auth = CliAuth::new(None);
        let mut input = io::Cursor::new("  bob \n");
        let mut output = Vec::new();
        assert!(auth.sign_in_interactive(&mut input, &mut output).unwrap());
        assert_eq!(auth.user_id().as_deref(), Some("bob"));
    }

    #[test]
    fn test_empty_line_cancels_sign_in() {
        let auth = CliAuth::new(None);
        let mut input = io::Cursor::new("\n");
        let mut output = Vec::new();
        assert!(!auth.sign_in_interactive(&mut input, &mut output).unwrap());
        assert!(!auth.is_authenticated());
    }
}
