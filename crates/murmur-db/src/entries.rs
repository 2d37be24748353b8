//! Entry repository implementation.
//!
//! Single-writer semantics are sufficient here: the worker and the HTTP
//! handlers both mutate entries, but every mutation is a single statement
//! (or one short transaction) and stamps `updated_at`. Lease acquisition
//! is a compare-and-set so only one worker ever owns an entry (I3), and
//! the raw transcript column is write-once (I1).

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

use murmur_core::{
    Entry, EntryKind, Error, PromptAnswers, Result, Stage,
};

/// Fields required to create an entry. Everything else starts empty.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub id: String,
    pub entry_type: EntryKind,
    pub timezone: String,
    pub entry_date: NaiveDate,
}

/// SQLite implementation of the entry repository.
#[derive(Clone)]
pub struct EntryRepository {
    pool: Pool<Sqlite>,
}

/// Parse an entry row into an Entry struct.
pub(crate) fn parse_entry_row(row: &SqliteRow) -> Result<Entry> {
    let entry_type: String = row.get("entry_type");
    let stage: String = row.get("stage");
    let prompt_answers: String = row.get("prompt_answers");
    let generated_sections: String = row.get("generated_sections");

    Ok(Entry {
        id: row.get("id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        timezone: row.get("timezone"),
        entry_date: row.get("entry_date"),
        entry_type: EntryKind::parse(&entry_type)?,
        stage: Stage::parse(&stage)?,
        stage_message: row.get("stage_message"),
        error_message: row.get("error_message"),
        locked_by: row.get("locked_by"),
        locked_at: row.get("locked_at"),
        heartbeat_at: row.get("heartbeat_at"),
        original_audio_path: row.get("original_audio_path"),
        normalized_audio_path: row.get("normalized_audio_path"),
        audio_duration_secs: row.get("audio_duration_secs"),
        raw_transcript: row.get("raw_transcript"),
        raw_transcript_locked_at: row.get("raw_transcript_locked_at"),
        edited_transcript: row.get("edited_transcript"),
        prompt_answers: serde_json::from_str(&prompt_answers)?,
        generated_sections: serde_json::from_str(&generated_sections)?,
        note_path: row.get("note_path"),
        note_mtime: row.get("note_mtime"),
    })
}

/// Concatenate the searchable text of an entry for the FTS index.
pub(crate) fn searchable_text(
    raw: Option<&str>,
    edited: Option<&str>,
    generated_sections_json: &str,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(t) = raw {
        parts.push(t.to_string());
    }
    if let Some(t) = edited {
        parts.push(t.to_string());
    }
    if let Ok(sections) = serde_json::from_str::<HashMap<String, String>>(generated_sections_json) {
        let mut names: Vec<&String> = sections.keys().collect();
        names.sort();
        for name in names {
            parts.push(sections[name].clone());
        }
    }
    parts.join("\n")
}

impl EntryRepository {
    /// Create a new EntryRepository with the given connection pool.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Insert a fresh entry in the `pending` stage and return it.
    pub async fn create(&self, new: NewEntry) -> Result<Entry> {
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO entry (id, created_at, updated_at, timezone, entry_date, entry_type, stage)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&new.id)
        .bind(now)
        .bind(now)
        .bind(&new.timezone)
        .bind(new.entry_date)
        .bind(new.entry_type.as_str())
        .bind(Stage::Pending.as_str())
        .execute(&self.pool)
        .await?;

        self.get(&new.id).await
    }

    /// Fetch an entry by id, erroring when it does not exist.
    pub async fn get(&self, id: &str) -> Result<Entry> {
        self.try_get(id)
            .await?
            .ok_or_else(|| Error::EntryNotFound(id.to_string()))
    }

    /// Fetch an entry by id.
    pub async fn try_get(&self, id: &str) -> Result<Option<Entry>> {
        let row = sqlx::query("SELECT * FROM entry WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(parse_entry_row).transpose()
    }

    /// Check whether an entry exists.
    pub async fn exists(&self, id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entry WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// List the most recent entries with the total count.
    pub async fn list(&self, limit: i64, offset: i64) -> Result<(Vec<Entry>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entry")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query("SELECT * FROM entry ORDER BY created_at DESC LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let entries = rows
            .iter()
            .map(parse_entry_row)
            .collect::<Result<Vec<_>>>()?;
        Ok((entries, total))
    }

    /// The oldest unleased entry in a runnable stage, or None when the
    /// queue is empty. Runnable covers `queued` plus the stages an HTTP
    /// `continue` resumes into.
    pub async fn next_runnable(&self) -> Result<Option<Entry>> {
        let row = sqlx::query(
            "SELECT * FROM entry
             WHERE stage IN ('queued', 'normalizing', 'transcribing', 'generating', 'writing')
               AND locked_by IS NULL
             ORDER BY created_at ASC
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(parse_entry_row).transpose()
    }

    /// Entries in a running stage whose heartbeat is older than the
    /// threshold. These are stuck: their worker died mid-stage.
    pub async fn stale_running(&self, threshold: Duration) -> Result<Vec<Entry>> {
        let cutoff = Utc::now() - threshold;

        let rows = sqlx::query(
            "SELECT * FROM entry
             WHERE stage IN ('normalizing', 'transcribing', 'generating', 'writing')
               AND heartbeat_at IS NOT NULL
               AND heartbeat_at < ?
             ORDER BY created_at ASC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_entry_row).collect()
    }

    /// All entries with a pending cancel request. The worker finalizes
    /// any it is not actively running.
    pub async fn cancel_requested(&self) -> Result<Vec<Entry>> {
        let rows = sqlx::query("SELECT * FROM entry WHERE stage = 'cancel_requested'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(parse_entry_row).collect()
    }

    /// Reset a stuck entry back to the queue, clearing its lease.
    pub async fn reset_to_queued(&self, id: &str, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE entry
             SET stage = 'queued', stage_message = ?, updated_at = ?,
                 locked_by = NULL, locked_at = NULL, heartbeat_at = NULL
             WHERE id = ?",
        )
        .bind(message)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete an entry row (vault files are not touched).
    pub async fn delete(&self, id: &str) -> Result<()> {
        if !self.exists(id).await? {
            return Err(Error::EntryNotFound(id.to_string()));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM entry WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM entry_fts WHERE entry_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // STAGE TRANSITIONS
    // =========================================================================

    /// Move an entry to a stage with an optional human-readable message.
    ///
    /// Terminal stages and a pending cancel request are never left this
    /// way: a racing transition loses silently and the caller observes
    /// the real stage on its next read. Cancellation resolves only
    /// through [`Self::finalize_cancel`].
    pub async fn set_stage(&self, id: &str, stage: Stage, message: Option<&str>) -> Result<()> {
        if !self.exists(id).await? {
            return Err(Error::EntryNotFound(id.to_string()));
        }
        sqlx::query(
            "UPDATE entry SET stage = ?, stage_message = ?, updated_at = ?
             WHERE id = ?
               AND stage NOT IN ('cancel_requested', 'completed', 'failed', 'cancelled')",
        )
        .bind(stage.as_str())
        .bind(message)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update only the human-readable progress message.
    pub async fn set_stage_message(&self, id: &str, message: &str) -> Result<()> {
        sqlx::query("UPDATE entry SET stage_message = ?, updated_at = ? WHERE id = ?")
            .bind(message)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark an entry failed with a diagnostic and clear its lease. A
    /// pending cancel request wins over a failure (the kill that caused
    /// the failure was the cancellation itself).
    pub async fn fail(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE entry
             SET stage = 'failed', error_message = ?, updated_at = ?,
                 locked_by = NULL, locked_at = NULL, heartbeat_at = NULL
             WHERE id = ? AND stage NOT IN ('cancel_requested', 'completed', 'cancelled')",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Request cancellation. Succeeds only from a cancellable stage;
    /// returns false otherwise (caller reports the precondition failure).
    pub async fn request_cancel(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE entry
             SET stage = 'cancel_requested', stage_message = 'Cancellation requested',
                 updated_at = ?
             WHERE id = ?
               AND stage IN ('queued', 'normalizing', 'transcribing', 'generating', 'writing')",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Finalize a cancellation: terminal stage, lease cleared, normalized
    /// audio reference dropped (the worker removes the file itself).
    pub async fn finalize_cancel(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE entry
             SET stage = 'cancelled', stage_message = 'Cancelled', updated_at = ?,
                 locked_by = NULL, locked_at = NULL, heartbeat_at = NULL,
                 normalized_audio_path = NULL
             WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // LEASE
    // =========================================================================

    /// Compare-and-set lease acquisition. Succeeds only when the entry is
    /// still in the stage the worker observed and is unlocked (or already
    /// self-locked after a resume).
    pub async fn acquire_lease(
        &self,
        id: &str,
        worker_id: &str,
        expected_stage: Stage,
    ) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE entry
             SET locked_by = ?, locked_at = ?, heartbeat_at = ?, updated_at = ?
             WHERE id = ? AND stage = ? AND (locked_by IS NULL OR locked_by = ?)",
        )
        .bind(worker_id)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(expected_stage.as_str())
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Refresh the heartbeat. A no-op when the lease moved to another
    /// worker (the stale-recovery path may have reset the entry).
    pub async fn heartbeat(&self, id: &str, worker_id: &str) -> Result<()> {
        sqlx::query("UPDATE entry SET heartbeat_at = ? WHERE id = ? AND locked_by = ?")
            .bind(Utc::now())
            .bind(id)
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Release the lease (parking at an awaiting stage or finishing).
    pub async fn release_lease(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE entry
             SET locked_by = NULL, locked_at = NULL, heartbeat_at = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // FIELD MUTATIONS
    // =========================================================================

    /// Record the uploaded source audio path.
    pub async fn set_original_audio(&self, id: &str, path: &str) -> Result<()> {
        self.simple_update(id, "original_audio_path", Some(path)).await
    }

    /// Record (or clear) the normalized WAV path.
    pub async fn set_normalized_audio(&self, id: &str, path: Option<&str>) -> Result<()> {
        self.simple_update(id, "normalized_audio_path", path).await
    }

    /// Persist the measured audio duration.
    pub async fn set_duration(&self, id: &str, secs: f64) -> Result<()> {
        sqlx::query("UPDATE entry SET audio_duration_secs = ?, updated_at = ? WHERE id = ?")
            .bind(secs)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist the raw transcript, locking the column (I1).
    ///
    /// Returns false without modifying anything when the transcript was
    /// already locked by an earlier run; the caller proceeds with the
    /// stored value.
    pub async fn set_raw_transcript(&self, id: &str, text: &str) -> Result<bool> {
        if !self.exists(id).await? {
            return Err(Error::EntryNotFound(id.to_string()));
        }

        let result = sqlx::query(
            "UPDATE entry
             SET raw_transcript = ?, raw_transcript_locked_at = ?, updated_at = ?
             WHERE id = ? AND raw_transcript_locked_at IS NULL",
        )
        .bind(text)
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        let wrote = result.rows_affected() == 1;
        if wrote {
            self.refresh_fts(id).await?;
        }
        Ok(wrote)
    }

    /// Persist the user-edited transcript.
    pub async fn set_edited_transcript(&self, id: &str, text: &str) -> Result<()> {
        self.simple_update(id, "edited_transcript", Some(text)).await?;
        self.refresh_fts(id).await
    }

    /// Change the entry's local calendar date.
    pub async fn set_entry_date(&self, id: &str, date: NaiveDate) -> Result<()> {
        if !self.exists(id).await? {
            return Err(Error::EntryNotFound(id.to_string()));
        }
        sqlx::query("UPDATE entry SET entry_date = ?, updated_at = ? WHERE id = ?")
            .bind(date)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replace the prompt-answer map.
    pub async fn set_prompt_answers(&self, id: &str, answers: &PromptAnswers) -> Result<()> {
        let json = serde_json::to_string(answers)?;
        self.simple_update(id, "prompt_answers", Some(&json)).await
    }

    /// Replace the generated-section map.
    pub async fn set_generated_sections(
        &self,
        id: &str,
        sections: &HashMap<String, String>,
    ) -> Result<()> {
        let json = serde_json::to_string(sections)?;
        self.simple_update(id, "generated_sections", Some(&json)).await?;
        self.refresh_fts(id).await
    }

    /// Record the written note and its post-rename mtime (I4).
    pub async fn set_note_output(
        &self,
        id: &str,
        path: &str,
        mtime: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE entry SET note_path = ?, note_mtime = ?, updated_at = ? WHERE id = ?")
            .bind(path)
            .bind(mtime)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Update a single nullable text column, stamping `updated_at`.
    ///
    /// The column name is always a compile-time constant from this module,
    /// never caller input.
    async fn simple_update(&self, id: &str, column: &str, value: Option<&str>) -> Result<()> {
        if !self.exists(id).await? {
            return Err(Error::EntryNotFound(id.to_string()));
        }
        let sql = format!("UPDATE entry SET {column} = ?, updated_at = ? WHERE id = ?");
        sqlx::query(&sql)
            .bind(value)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Rewrite the FTS row from the entry's current transcript and
    /// generated-section columns. Runs in the write path of every mutation
    /// touching those columns, keeping the index in lockstep.
    async fn refresh_fts(&self, id: &str) -> Result<()> {
        let row = sqlx::query(
            "SELECT raw_transcript, edited_transcript, generated_sections FROM entry WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(()) };
        let raw: Option<String> = row.get("raw_transcript");
        let edited: Option<String> = row.get("edited_transcript");
        let sections: String = row.get("generated_sections");
        let text = searchable_text(raw.as_deref(), edited.as_deref(), &sections);

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM entry_fts WHERE entry_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO entry_fts (entry_id, content) VALUES (?, ?)")
            .bind(id)
            .bind(&text)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
