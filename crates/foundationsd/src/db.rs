//! SQLite-backed persistence for foundationsd.
//!
//! Location: `[database] path` from config (default
//! /var/lib/foundations/foundations.db or ~/.local/share/foundations/).
//!
//! Every user-scoped query filters on `user_id`; a record belonging to
//! another user is reported as not found. Timestamps are stored as
//! fixed-width RFC 3339 strings (microsecond precision) so lexical order is
//! chronological order.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use foundations_common::api::{Impression, NewPrompt, NewVariant, VariantPatch};
use foundations_common::navigation::Position;
use foundations_common::prompts::{
    default_insights_system_prompt, default_insights_template, Prompt, PromptDetail, PromptVariant,
    VariantStats, INSIGHTS_PROMPT_KEY,
};
use foundations_common::records::{AnalysisRecord, AnalysisResult, AssessmentRecord, ProgressWatermark};
use foundations_common::responses::Responses;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid stored JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database lock poisoned")]
    Poisoned,

    #[error("Failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Current time truncated to the stored precision
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Impression about to be recorded
#[derive(Debug, Clone, PartialEq)]
pub struct ImpressionDraft {
    pub prompt_id: String,
    pub variant_id: String,
    pub user_id: Option<String>,
    pub assessment_id: Option<String>,
    pub latency_ms: u64,
    pub success: bool,
}

pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        };
        db.init_schema()?;
        info!("Opened database at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> DbResult<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            path: None,
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    fn init_schema(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS assessments (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                responses TEXT NOT NULL,
                idempotency_key TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(user_id, idempotency_key)
            );

            CREATE TABLE IF NOT EXISTS analyses (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                assessment_id TEXT,
                result TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS progress (
                user_id TEXT PRIMARY KEY,
                phase INTEGER NOT NULL,
                step INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS prompts (
                id TEXT PRIMARY KEY,
                key TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS prompt_variants (
                id TEXT PRIMARY KEY,
                prompt_id TEXT NOT NULL,
                label TEXT NOT NULL,
                system_prompt TEXT NOT NULL,
                user_template TEXT NOT NULL,
                model TEXT,
                temperature REAL,
                weight INTEGER NOT NULL DEFAULT 1,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                FOREIGN KEY (prompt_id) REFERENCES prompts(id)
            );

            CREATE TABLE IF NOT EXISTS impressions (
                id TEXT PRIMARY KEY,
                prompt_id TEXT NOT NULL,
                variant_id TEXT NOT NULL,
                user_id TEXT,
                assessment_id TEXT,
                latency_ms INTEGER NOT NULL,
                success INTEGER NOT NULL,
                rating INTEGER,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS schema_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_assessments_user ON assessments(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_analyses_user ON analyses(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_variants_prompt ON prompt_variants(prompt_id);
            CREATE INDEX IF NOT EXISTS idx_impressions_variant ON impressions(variant_id);
            "#,
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('version', ?)",
            params![SCHEMA_VERSION.to_string()],
        )?;
        Ok(())
    }

    pub fn schema_version(&self) -> DbResult<Option<u32>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row("SELECT value FROM schema_meta WHERE key = 'version'", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(raw.and_then(|v| v.parse().ok()))
    }

    /// Create the insights prompt with a baseline variant if it is missing.
    /// Returns true when something was created.
    pub fn seed_defaults(&self) -> DbResult<bool> {
        if self.get_prompt_by_key(INSIGHTS_PROMPT_KEY)?.is_some() {
            return Ok(false);
        }
        let prompt = self.create_prompt(&NewPrompt {
            key: INSIGHTS_PROMPT_KEY.to_string(),
            description: "Identity insights generated from a completed assessment".to_string(),
        })?;
        self.add_variant(
            &prompt.id,
            &NewVariant {
                label: "baseline".to_string(),
                system_prompt: default_insights_system_prompt(),
                user_template: default_insights_template(),
                model: None,
                temperature: None,
                weight: 1,
                active: true,
            },
        )?;
        info!("Seeded default prompt {}", INSIGHTS_PROMPT_KEY);
        Ok(true)
    }

    // ========================================================================
    // Assessments
    // ========================================================================

    fn row_to_assessment(row: &Row<'_>) -> rusqlite::Result<AssessmentRecord> {
        Ok(AssessmentRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            responses: parse_json(row, 2)?,
            created_at: Some(parse_ts(row, 3)?),
        })
    }

    /// User's assessments, newest first (ties broken by id, descending)
    pub fn list_assessments(&self, user_id: &str) -> DbResult<Vec<AssessmentRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, responses, created_at FROM assessments
             WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![user_id], Self::row_to_assessment)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_assessment(&self, user_id: &str, id: &str) -> DbResult<AssessmentRecord> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, user_id, responses, created_at FROM assessments WHERE id = ? AND user_id = ?",
            params![id, user_id],
            Self::row_to_assessment,
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound(format!("Assessment {}", id)))
    }

    /// Save responses. With an idempotency key, a repeated save returns the
    /// original record and `true`.
    pub fn save_assessment(
        &self,
        user_id: &str,
        responses: &Responses,
        idempotency_key: Option<&str>,
    ) -> DbResult<(AssessmentRecord, bool)> {
        let conn = self.conn()?;

        if let Some(key) = idempotency_key {
            let existing = conn
                .query_row(
                    "SELECT id, user_id, responses, created_at FROM assessments
                     WHERE user_id = ? AND idempotency_key = ?",
                    params![user_id, key],
                    Self::row_to_assessment,
                )
                .optional()?;
            if let Some(record) = existing {
                debug!("Replaying assessment {} for key {}", record.id, key);
                return Ok((record, true));
            }
        }

        let record = AssessmentRecord {
            id: new_id(),
            user_id: user_id.to_string(),
            responses: responses.clone(),
            created_at: Some(now()),
        };
        let created_at = record.created_at.map(|t| ts(&t)).unwrap_or_default();
        conn.execute(
            "INSERT INTO assessments (id, user_id, responses, idempotency_key, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                &record.id,
                user_id,
                serde_json::to_string(responses)?,
                idempotency_key,
                created_at
            ],
        )?;
        Ok((record, false))
    }

    // ========================================================================
    // Analyses
    // ========================================================================

    fn row_to_analysis(row: &Row<'_>) -> rusqlite::Result<AnalysisRecord> {
        Ok(AnalysisRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            assessment_id: row.get(2)?,
            result: parse_json(row, 3)?,
            created_at: parse_ts(row, 4)?,
        })
    }

    pub fn list_analyses(&self, user_id: &str) -> DbResult<Vec<AnalysisRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, assessment_id, result, created_at FROM analyses
             WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![user_id], Self::row_to_analysis)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_analysis(&self, user_id: &str, id: &str) -> DbResult<AnalysisRecord> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, user_id, assessment_id, result, created_at FROM analyses
             WHERE id = ? AND user_id = ?",
            params![id, user_id],
            Self::row_to_analysis,
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound(format!("Analysis {}", id)))
    }

    /// Save an analysis; a linked assessment must belong to the same user
    pub fn save_analysis(
        &self,
        user_id: &str,
        result: &AnalysisResult,
        assessment_id: Option<&str>,
    ) -> DbResult<AnalysisRecord> {
        if let Some(id) = assessment_id {
            self.get_assessment(user_id, id)?;
        }
        let record = AnalysisRecord {
            id: new_id(),
            user_id: user_id.to_string(),
            assessment_id: assessment_id.map(str::to_string),
            result: result.clone(),
            created_at: now(),
        };
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO analyses (id, user_id, assessment_id, result, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                &record.id,
                user_id,
                &record.assessment_id,
                serde_json::to_string(result)?,
                ts(&record.created_at)
            ],
        )?;
        Ok(record)
    }

    // ========================================================================
    // Progress
    // ========================================================================

    fn query_progress(conn: &Connection, user_id: &str) -> DbResult<Option<ProgressWatermark>> {
        let watermark = conn
            .query_row(
                "SELECT phase, step, updated_at FROM progress WHERE user_id = ?",
                params![user_id],
                |row| {
                    Ok(ProgressWatermark {
                        phase: row.get::<_, i64>(0)?.max(0) as usize,
                        step: row.get::<_, i64>(1)?.max(0) as usize,
                        updated_at: parse_ts(row, 2)?,
                    })
                },
            )
            .optional()?;
        Ok(watermark)
    }

    pub fn get_progress(&self, user_id: &str) -> DbResult<Option<ProgressWatermark>> {
        let conn = self.conn()?;
        Self::query_progress(&conn, user_id)
    }

    /// Store `position` only if it is further than the stored watermark.
    /// Returns the watermark in effect afterwards.
    pub fn advance_progress(&self, user_id: &str, position: Position) -> DbResult<ProgressWatermark> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO progress (user_id, phase, step, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET phase = excluded.phase, step = excluded.step,
                 updated_at = excluded.updated_at
             WHERE excluded.phase > progress.phase
                OR (excluded.phase = progress.phase AND excluded.step > progress.step)",
            params![user_id, position.phase as i64, position.step as i64, ts(&now())],
        )?;
        Self::query_progress(&conn, user_id)?
            .ok_or_else(|| DbError::NotFound(format!("Progress for {}", user_id)))
    }

    // ========================================================================
    // Prompts and variants
    // ========================================================================

    fn row_to_prompt(row: &Row<'_>) -> rusqlite::Result<Prompt> {
        Ok(Prompt {
            id: row.get(0)?,
            key: row.get(1)?,
            description: row.get(2)?,
            created_at: parse_ts(row, 3)?,
        })
    }

    fn row_to_variant(row: &Row<'_>) -> rusqlite::Result<PromptVariant> {
        Ok(PromptVariant {
            id: row.get(0)?,
            prompt_id: row.get(1)?,
            label: row.get(2)?,
            system_prompt: row.get(3)?,
            user_template: row.get(4)?,
            model: row.get(5)?,
            temperature: row.get::<_, Option<f64>>(6)?.map(|t| t as f32),
            weight: row.get::<_, i64>(7)?.clamp(0, i64::from(u32::MAX)) as u32,
            active: row.get(8)?,
            created_at: parse_ts(row, 9)?,
        })
    }

    const VARIANT_COLUMNS: &'static str = "id, prompt_id, label, system_prompt, user_template, model, \
         temperature, weight, active, created_at";

    pub fn list_prompts(&self) -> DbResult<Vec<Prompt>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, key, description, created_at FROM prompts ORDER BY key")?;
        let rows = stmt.query_map([], Self::row_to_prompt)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_prompt(&self, id: &str) -> DbResult<Prompt> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, key, description, created_at FROM prompts WHERE id = ?",
            params![id],
            Self::row_to_prompt,
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound(format!("Prompt {}", id)))
    }

    pub fn get_prompt_by_key(&self, key: &str) -> DbResult<Option<Prompt>> {
        let conn = self.conn()?;
        let prompt = conn
            .query_row(
                "SELECT id, key, description, created_at FROM prompts WHERE key = ?",
                params![key],
                Self::row_to_prompt,
            )
            .optional()?;
        Ok(prompt)
    }

    pub fn prompt_detail(&self, id: &str) -> DbResult<PromptDetail> {
        let prompt = self.get_prompt(id)?;
        let variants = self.list_variants(id)?;
        Ok(PromptDetail { prompt, variants })
    }

    pub fn create_prompt(&self, new: &NewPrompt) -> DbResult<Prompt> {
        if self.get_prompt_by_key(&new.key)?.is_some() {
            return Err(DbError::Duplicate(format!("Prompt {}", new.key)));
        }
        let prompt = Prompt {
            id: new_id(),
            key: new.key.clone(),
            description: new.description.clone(),
            created_at: now(),
        };
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO prompts (id, key, description, created_at) VALUES (?, ?, ?, ?)",
            params![&prompt.id, &prompt.key, &prompt.description, ts(&prompt.created_at)],
        )?;
        Ok(prompt)
    }

    /// Delete a prompt together with its variants and impressions
    pub fn delete_prompt(&self, id: &str) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM impressions WHERE prompt_id = ?", params![id])?;
        tx.execute("DELETE FROM prompt_variants WHERE prompt_id = ?", params![id])?;
        let deleted = tx.execute("DELETE FROM prompts WHERE id = ?", params![id])?;
        if deleted == 0 {
            return Err(DbError::NotFound(format!("Prompt {}", id)));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_variants(&self, prompt_id: &str) -> DbResult<Vec<PromptVariant>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM prompt_variants WHERE prompt_id = ? ORDER BY created_at, id",
            Self::VARIANT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![prompt_id], Self::row_to_variant)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_variant(&self, id: &str) -> DbResult<PromptVariant> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM prompt_variants WHERE id = ?", Self::VARIANT_COLUMNS);
        conn.query_row(&sql, params![id], Self::row_to_variant)
            .optional()?
            .ok_or_else(|| DbError::NotFound(format!("Variant {}", id)))
    }

    pub fn add_variant(&self, prompt_id: &str, new: &NewVariant) -> DbResult<PromptVariant> {
        self.get_prompt(prompt_id)?;
        let variant = PromptVariant {
            id: new_id(),
            prompt_id: prompt_id.to_string(),
            label: new.label.clone(),
            system_prompt: new.system_prompt.clone(),
            user_template: new.user_template.clone(),
            model: new.model.clone(),
            temperature: new.temperature,
            weight: new.weight,
            active: new.active,
            created_at: now(),
        };
        self.write_variant(&variant, true)?;
        Ok(variant)
    }

    pub fn update_variant(&self, id: &str, patch: &VariantPatch) -> DbResult<PromptVariant> {
        let mut variant = self.get_variant(id)?;
        if let Some(label) = &patch.label {
            variant.label = label.clone();
        }
        if let Some(system_prompt) = &patch.system_prompt {
            variant.system_prompt = system_prompt.clone();
        }
        if let Some(user_template) = &patch.user_template {
            variant.user_template = user_template.clone();
        }
        if let Some(model) = &patch.model {
            variant.model = Some(model.clone()).filter(|m| !m.is_empty());
        }
        if let Some(temperature) = patch.temperature {
            variant.temperature = Some(temperature);
        }
        if let Some(weight) = patch.weight {
            variant.weight = weight;
        }
        if let Some(active) = patch.active {
            variant.active = active;
        }
        self.write_variant(&variant, false)?;
        Ok(variant)
    }

    fn write_variant(&self, v: &PromptVariant, insert: bool) -> DbResult<()> {
        let conn = self.conn()?;
        let sql = if insert {
            "INSERT INTO prompt_variants (id, prompt_id, label, system_prompt, user_template, model,
                 temperature, weight, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        } else {
            "UPDATE prompt_variants SET prompt_id = ?2, label = ?3, system_prompt = ?4,
                 user_template = ?5, model = ?6, temperature = ?7, weight = ?8, active = ?9,
                 created_at = ?10
             WHERE id = ?1"
        };
        conn.execute(
            sql,
            params![
                &v.id,
                &v.prompt_id,
                &v.label,
                &v.system_prompt,
                &v.user_template,
                &v.model,
                v.temperature.map(f64::from),
                i64::from(v.weight),
                v.active,
                ts(&v.created_at)
            ],
        )?;
        Ok(())
    }

    pub fn delete_variant(&self, id: &str) -> DbResult<()> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM prompt_variants WHERE id = ?", params![id])?;
        if deleted == 0 {
            return Err(DbError::NotFound(format!("Variant {}", id)));
        }
        Ok(())
    }

    // ========================================================================
    // Impressions
    // ========================================================================

    pub fn record_impression(&self, draft: &ImpressionDraft) -> DbResult<Impression> {
        let impression = Impression {
            id: new_id(),
            prompt_id: draft.prompt_id.clone(),
            variant_id: draft.variant_id.clone(),
            user_id: draft.user_id.clone(),
            assessment_id: draft.assessment_id.clone(),
            latency_ms: draft.latency_ms,
            success: draft.success,
            rating: None,
            created_at: now(),
        };
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO impressions (id, prompt_id, variant_id, user_id, assessment_id,
                 latency_ms, success, rating, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?)",
            params![
                &impression.id,
                &impression.prompt_id,
                &impression.variant_id,
                &impression.user_id,
                &impression.assessment_id,
                impression.latency_ms.min(i64::MAX as u64) as i64,
                impression.success,
                ts(&impression.created_at)
            ],
        )?;
        Ok(impression)
    }

    /// Attach a rating to one of the user's impressions
    pub fn rate_impression(&self, user_id: &str, id: &str, rating: u8) -> DbResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE impressions SET rating = ? WHERE id = ? AND user_id = ?",
            params![i64::from(rating), id, user_id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound(format!("Impression {}", id)));
        }
        Ok(())
    }

    /// Per-variant aggregates for a prompt, in variant creation order
    pub fn variant_stats(&self, prompt_id: &str) -> DbResult<Vec<VariantStats>> {
        self.get_prompt(prompt_id)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT v.id, v.label, v.active, v.weight,
                    COUNT(i.id), COALESCE(SUM(i.success), 0), COUNT(i.rating),
                    AVG(i.rating), AVG(i.latency_ms)
             FROM prompt_variants v
             LEFT JOIN impressions i ON i.variant_id = v.id
             WHERE v.prompt_id = ?
             GROUP BY v.id
             ORDER BY v.created_at, v.id",
        )?;
        let rows = stmt.query_map(params![prompt_id], |row| {
            Ok(VariantStats {
                variant_id: row.get(0)?,
                label: row.get(1)?,
                active: row.get(2)?,
                weight: row.get::<_, i64>(3)?.clamp(0, i64::from(u32::MAX)) as u32,
                impressions: row.get::<_, i64>(4)?.max(0) as u64,
                successes: row.get::<_, i64>(5)?.max(0) as u64,
                ratings: row.get::<_, i64>(6)?.max(0) as u64,
                mean_rating: row.get(7)?,
                mean_latency_ms: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_impressions(&self, variant_id: &str) -> DbResult<Vec<Impression>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, prompt_id, variant_id, user_id, assessment_id, latency_ms, success,
                    rating, created_at
             FROM impressions WHERE variant_id = ? ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![variant_id], |row| {
            Ok(Impression {
                id: row.get(0)?,
                prompt_id: row.get(1)?,
                variant_id: row.get(2)?,
                user_id: row.get(3)?,
                assessment_id: row.get(4)?,
                latency_ms: row.get::<_, i64>(5)?.max(0) as u64,
                success: row.get(6)?,
                rating: row.get::<_, Option<i64>>(7)?.map(|r| r.clamp(0, 255) as u8),
                created_at: parse_ts(row, 8)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn responses(answer: &str) -> Responses {
        let mut r = Responses::new();
        r.update("limiting_belief", answer);
        r
    }

    #[test]
    fn test_schema_version_recorded() {
        assert_eq!(db().schema_version().unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("foundations.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), Some(path.as_path()));
    }

    #[test]
    fn test_assessments_are_user_scoped() {
        let db = db();
        let (record, replayed) = db.save_assessment("alice", &responses("a"), None).unwrap();
        assert!(!replayed);
        assert!(record.created_at.is_some());

        assert_eq!(db.get_assessment("alice", &record.id).unwrap(), record);
        assert!(matches!(db.get_assessment("bob", &record.id), Err(DbError::NotFound(_))));
        assert!(db.list_assessments("bob").unwrap().is_empty());
    }

    #[test]
    fn test_idempotent_save_replays_original() {
        let db = db();
        let (first, _) = db.save_assessment("alice", &responses("a"), Some("k1")).unwrap();
        let (second, replayed) = db.save_assessment("alice", &responses("a"), Some("k1")).unwrap();
        assert!(replayed);
        assert_eq!(first, second);
        assert_eq!(db.list_assessments("alice").unwrap().len(), 1);

        // Same key, different user is a different request
        let (_, replayed) = db.save_assessment("bob", &responses("a"), Some("k1")).unwrap();
        assert!(!replayed);
    }

    #[test]
    fn test_list_newest_first() {
        let db = db();
        let (first, _) = db.save_assessment("alice", &responses("a"), None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let (second, _) = db.save_assessment("alice", &responses("b"), None).unwrap();

        let ids: Vec<_> = db
            .list_assessments("alice")
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn test_progress_only_moves_forward() {
        let db = db();
        assert!(db.get_progress("alice").unwrap().is_none());

        db.advance_progress("alice", Position::new(1, 2)).unwrap();
        let kept = db.advance_progress("alice", Position::new(0, 4)).unwrap();
        assert_eq!(kept.position(), Position::new(1, 2));

        let moved = db.advance_progress("alice", Position::new(2, 0)).unwrap();
        assert_eq!(moved.position(), Position::new(2, 0));
        assert_eq!(db.get_progress("alice").unwrap().unwrap().position(), Position::new(2, 0));
    }

    #[test]
    fn test_analysis_link_must_be_own_assessment() {
        let db = db();
        let (record, _) = db.save_assessment("alice", &responses("a"), None).unwrap();
        let result = AnalysisResult {
            summary: "s".into(),
            ..Default::default()
        };

        assert!(db.save_analysis("bob", &result, Some(&record.id)).is_err());
        let saved = db.save_analysis("alice", &result, Some(&record.id)).unwrap();
        assert_eq!(db.get_analysis("alice", &saved.id).unwrap(), saved);
        assert_eq!(db.list_analyses("alice").unwrap().len(), 1);
    }

    #[test]
    fn test_seed_is_idempotent() {
        let db = db();
        assert!(db.seed_defaults().unwrap());
        assert!(!db.seed_defaults().unwrap());

        let prompt = db.get_prompt_by_key(INSIGHTS_PROMPT_KEY).unwrap().unwrap();
        let variants = db.list_variants(&prompt.id).unwrap();
        assert_eq!(variants.len(), 1);
        assert!(variants[0].is_selectable());
    }

    #[test]
    fn test_duplicate_prompt_key_rejected() {
        let db = db();
        let new = NewPrompt {
            key: "k".into(),
            description: String::new(),
        };
        db.create_prompt(&new).unwrap();
        assert!(matches!(db.create_prompt(&new), Err(DbError::Duplicate(_))));
    }

    #[test]
    fn test_variant_patch_and_stats() {
        let db = db();
        db.seed_defaults().unwrap();
        let prompt = db.get_prompt_by_key(INSIGHTS_PROMPT_KEY).unwrap().unwrap();
        let baseline = db.list_variants(&prompt.id).unwrap().remove(0);

        let patched = db
            .update_variant(
                &baseline.id,
                &VariantPatch {
                    weight: Some(3),
                    temperature: Some(0.2),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(patched.weight, 3);
        assert_eq!(patched.label, baseline.label);

        let draft = |success| ImpressionDraft {
            prompt_id: prompt.id.clone(),
            variant_id: baseline.id.clone(),
            user_id: Some("alice".into()),
            assessment_id: None,
            latency_ms: 100,
            success,
        };
        let first = db.record_impression(&draft(true)).unwrap();
        db.record_impression(&draft(false)).unwrap();
        db.rate_impression("alice", &first.id, 4).unwrap();
        assert!(db.rate_impression("bob", &first.id, 1).is_err());

        let stats = db.variant_stats(&prompt.id).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].impressions, 2);
        assert_eq!(stats[0].successes, 1);
        assert_eq!(stats[0].ratings, 1);
        assert_eq!(stats[0].mean_rating, Some(4.0));
        assert_eq!(stats[0].success_rate(), Some(0.5));
    }

    #[test]
    fn test_delete_prompt_removes_variants() {
        let db = db();
        db.seed_defaults().unwrap();
        let prompt = db.get_prompt_by_key(INSIGHTS_PROMPT_KEY).unwrap().unwrap();
        let variant = db.list_variants(&prompt.id).unwrap().remove(0);

        db.delete_prompt(&prompt.id).unwrap();
        assert!(db.get_prompt_by_key(INSIGHTS_PROMPT_KEY).unwrap().is_none());
        assert!(matches!(db.get_variant(&variant.id), Err(DbError::NotFound(_))));
        assert!(matches!(db.delete_prompt(&prompt.id), Err(DbError::NotFound(_))));
    }
}
