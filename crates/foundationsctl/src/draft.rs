//! Local draft of an assessment in progress.
//!
//! Answers are written after every change so a closed terminal loses
//! nothing. A successful remote save deletes the draft.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use foundations_common::responses::Responses;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    /// Stable for one attempt; scopes the idempotency key of its save
    pub id: String,
    /// Who the answers belong to, when known
    #[serde(default)]
    pub user_id: Option<String>,
    pub responses: Responses,
    /// A submission waits for sign-in
    #[serde(default)]
    pub pending_save: bool,
    pub updated_at: DateTime<Utc>,
}

impl Draft {
    pub fn new(user_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            responses: Responses::new(),
            pending_save: false,
            updated_at: Utc::now(),
        }
    }

    /// An anonymous draft belongs to whoever signs in next
    pub fn belongs_to(&self, user_id: Option<&str>) -> bool {
        match (self.user_id.as_deref(), user_id) {
            (None, _) => true,
            (Some(owner), Some(user)) => owner == user,
            (Some(_), None) => false,
        }
    }
}

pub struct DraftStore {
    path: PathBuf,
}

impl DraftStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `$XDG_STATE_HOME/foundations/draft.json`, falling back to the local
    /// data dir on platforms without a state dir
    pub fn default_path() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("foundations")
            .join("draft.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A corrupt draft is discarded with a warning
    pub fn load(&self) -> Result<Option<Draft>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        match serde_json::from_str(&content) {
            Ok(draft) => Ok(Some(draft)),
            Err(e) => {
                warn!("Discarding unreadable draft {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    pub fn save(&self, draft: &Draft) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(draft)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        debug!("Draft saved to {}", self.path.display());
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}
