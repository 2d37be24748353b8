//! The pipeline worker.
//!
//! One worker with a stable identity drives every entry through the
//! stage machine. Each tick recovers stuck entries, finalizes pending
//! cancellations, then picks the oldest runnable entry, takes its lease
//! with a compare-and-set, and runs stages until the entry parks at a
//! review gate or reaches a terminal stage. Cancellation is checked
//! before and after every stage body; child processes are killed through
//! the registry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use murmur_audio::process::KillHandle;
use murmur_audio::{delete_audio, probe_duration, spawn_normalize};
use murmur_core::defaults::{AUDIO_DIR, HEARTBEAT_STALE_SECS, WORKER_TICK_MS};
use murmur_core::{Entry, Error, Result, Settings, Stage};
use murmur_db::Database;
use murmur_inference::LlmClient;
use murmur_notes::NoteWriter;
use murmur_transcribe::{TranscribeEvent, TranscribeHooks, Transcriber, WhisperConfig};

use crate::children::ChildRegistry;

/// Configuration for the pipeline worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Stable identity recorded in entry leases.
    pub worker_id: String,
    /// Tick interval in milliseconds.
    pub tick_ms: u64,
    /// Heartbeats older than this many seconds mark an entry as stuck.
    pub heartbeat_stale_secs: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("murmur-worker-{}", std::process::id()),
            tick_ms: WORKER_TICK_MS,
            heartbeat_stale_secs: HEARTBEAT_STALE_SECS,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `MURMUR_TICK_MS` | `1000` | Scheduler tick interval |
    /// | `MURMUR_HEARTBEAT_STALE_SECS` | `300` | Stuck-entry threshold |
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = std::env::var("MURMUR_TICK_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.tick_ms = ms;
        }
        if let Some(secs) = std::env::var("MURMUR_HEARTBEAT_STALE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.heartbeat_stale_secs = secs;
        }
        config
    }
}

/// Result of one stage body, matched by the runner loop.
enum StageResult {
    /// Enter the next stage and keep running.
    Next(Stage),
    /// Park at a review gate; the worker releases the lease and exits
    /// the run.
    Park(Stage, &'static str),
    /// Terminal success.
    Complete,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    children: ChildRegistry,
}

impl WorkerHandle {
    /// Signal the worker to shut down after the current tick.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))
    }

    /// Best-effort kill of an entry's live child process (the HTTP
    /// cancel path calls this; final state is settled by the worker).
    pub async fn kill_child(&self, entry_id: &str) {
        self.children.kill(entry_id).await;
    }
}

/// The pipeline worker.
pub struct JobWorker {
    db: Database,
    config: WorkerConfig,
    children: ChildRegistry,
}

impl JobWorker {
    pub fn new(db: Database, config: WorkerConfig) -> Self {
        Self {
            db,
            config,
            children: ChildRegistry::new(),
        }
    }

    /// The shared child-process registry.
    pub fn children(&self) -> ChildRegistry {
        self.children.clone()
    }

    /// Start the tick loop and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let children = self.children.clone();

        tokio::spawn(async move {
            info!(
                worker_id = %self.config.worker_id,
                tick_ms = self.config.tick_ms,
                "Pipeline worker started"
            );
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Pipeline worker received shutdown signal");
                        break;
                    }
                    _ = sleep(Duration::from_millis(self.config.tick_ms)) => {
                        if let Err(e) = self.tick().await {
                            error!(error = %e, "Worker tick failed");
                        }
                    }
                }
            }
            info!("Pipeline worker stopped");
        });

        WorkerHandle {
            shutdown_tx,
            children,
        }
    }

    /// One scheduler pass: recover stuck entries, finalize pending
    /// cancellations, then run the oldest runnable entry to its next
    /// parking point.
    pub async fn tick(&self) -> Result<()> {
        self.recover_stuck().await?;
        self.finalize_pending_cancels().await?;

        let Some(entry) = self.db.entries.next_runnable().await? else {
            return Ok(());
        };
        if !self
            .db
            .entries
            .acquire_lease(&entry.id, &self.config.worker_id, entry.stage)
            .await?
        {
            // Someone changed the entry between pick and lease; retry
            // next tick.
            debug!(entry_id = %entry.id, "Lease CAS lost, skipping");
            return Ok(());
        }

        self.run_entry(entry.id.clone()).await
    }

    /// Reset every running entry whose heartbeat went stale. Returns the
    /// number of entries reset.
    pub async fn recover_stuck(&self) -> Result<usize> {
        let threshold = chrono::Duration::seconds(self.config.heartbeat_stale_secs);
        let stale = self.db.entries.stale_running(threshold).await?;
        for entry in &stale {
            warn!(
                entry_id = %entry.id,
                stage = %entry.stage,
                "Stale heartbeat, resetting to queue"
            );
            self.db
                .entries
                .reset_to_queued(&entry.id, "Reset to queue after stale heartbeat")
                .await?;
        }
        Ok(stale.len())
    }

    /// Finalize cancel requests nobody is actively working on: entries
    /// cancelled while queued, or whose worker died mid-stage.
    async fn finalize_pending_cancels(&self) -> Result<()> {
        let threshold = chrono::Duration::seconds(self.config.heartbeat_stale_secs);
        let cutoff = chrono::Utc::now() - threshold;
        for entry in self.db.entries.cancel_requested().await? {
            let abandoned = entry.locked_by.is_none()
                || entry.heartbeat_at.map(|hb| hb < cutoff).unwrap_or(true);
            if abandoned {
                self.finalize_cancellation(&entry).await?;
            }
        }
        Ok(())
    }

    /// Drive one leased entry until it parks, completes, fails, or is
    /// cancelled.
    async fn run_entry(&self, id: String) -> Result<()> {
        loop {
            let entry = self.db.entries.get(&id).await?;

            // Cancel check before each stage body.
            if entry.stage == Stage::CancelRequested {
                self.finalize_cancellation(&entry).await?;
                return Ok(());
            }
            if entry.stage.is_terminal() || entry.stage.is_awaiting() || entry.stage == Stage::Pending
            {
                self.db.entries.release_lease(&id).await?;
                return Ok(());
            }

            let outcome = match entry.stage {
                Stage::Queued => Ok(StageResult::Next(Stage::Normalizing)),
                Stage::Normalizing => self.normalize_stage(&entry).await,
                Stage::Transcribing => self.transcribe_stage(&entry).await,
                Stage::Generating => self.generate_stage(&entry).await,
                Stage::Writing => self.write_stage(&entry).await,
                // Covered by the guards above.
                _ => return Ok(()),
            };

            match outcome {
                Ok(StageResult::Next(next)) => {
                    if self.cancel_won(&id).await? {
                        return Ok(());
                    }
                    self.db
                        .entries
                        .set_stage(&id, next, Some(stage_message(next)))
                        .await?;
                }
                Ok(StageResult::Park(stage, message)) => {
                    if self.cancel_won(&id).await? {
                        return Ok(());
                    }
                    self.db.entries.set_stage(&id, stage, Some(message)).await?;
                    self.db.entries.release_lease(&id).await?;
                    info!(entry_id = %id, stage = %stage, "Entry parked");
                    return Ok(());
                }
                Ok(StageResult::Complete) => {
                    if self.cancel_won(&id).await? {
                        return Ok(());
                    }
                    self.db
                        .entries
                        .set_stage(&id, Stage::Completed, Some("Note written"))
                        .await?;
                    self.db.entries.release_lease(&id).await?;
                    info!(entry_id = %id, "Entry completed");
                    return Ok(());
                }
                Err(Error::Cancelled) => {
                    let entry = self.db.entries.get(&id).await?;
                    self.finalize_cancellation(&entry).await?;
                    return Ok(());
                }
                Err(e) => {
                    // A kill caused by a cancel request surfaces as a tool
                    // failure; the request wins over the failure.
                    let latest = self.db.entries.get(&id).await?;
                    if latest.stage == Stage::CancelRequested {
                        self.finalize_cancellation(&latest).await?;
                        return Ok(());
                    }
                    error!(entry_id = %id, stage = %latest.stage, error = %e, "Stage failed");
                    self.children.clear(&id);
                    self.db.entries.fail(&id, &e.to_string()).await?;
                    return Ok(());
                }
            }
        }
    }

    /// Post-stage cancel check; finalizes and reports true when a cancel
    /// arrived while the stage body ran.
    async fn cancel_won(&self, id: &str) -> Result<bool> {
        let latest = self.db.entries.get(id).await?;
        if latest.stage == Stage::CancelRequested {
            self.finalize_cancellation(&latest).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Kill any live child, remove the normalized WAV, mark the entry
    /// cancelled, clear the lease.
    async fn finalize_cancellation(&self, entry: &Entry) -> Result<()> {
        self.children.kill(&entry.id).await;
        self.children.clear(&entry.id);

        if let Ok(settings) = self.db.settings.get().await {
            if !settings.vault_path.is_empty() {
                if let Some(rel) = entry.normalized_audio_path.as_deref() {
                    let _ = delete_audio(&Path::new(&settings.vault_path).join(rel)).await;
                }
            }
        }

        self.db.entries.finalize_cancel(&entry.id).await?;
        info!(entry_id = %entry.id, "Entry cancelled");
        Ok(())
    }

    // =========================================================================
    // STAGE BODIES
    // =========================================================================

    /// Measure the source duration, then convert to the canonical WAV.
    async fn normalize_stage(&self, entry: &Entry) -> Result<StageResult> {
        let settings = self.db.settings.get().await?;
        let vault = vault_root(&settings)?;

        let original_rel = entry.original_audio_path.as_deref().ok_or_else(|| {
            Error::InvalidInput("Entry has no uploaded audio".to_string())
        })?;
        let original = vault.join(original_rel);

        let duration = probe_duration(&original).await?;
        self.db.entries.set_duration(&entry.id, duration).await?;
        debug!(entry_id = %entry.id, duration, "Measured audio duration");

        let normalized_rel = format!("{AUDIO_DIR}/{}-normalized.wav", entry.id);
        let normalized = vault.join(&normalized_rel);
        if let Some(parent) = normalized.parent() {
            std::fs::create_dir_all(parent)?;
        }

        self.heartbeat(&entry.id).await?;
        let process = spawn_normalize(&original, &normalized)?;
        self.children.register(&entry.id, process.kill_handle());
        let waited = process.wait().await;
        self.children.clear(&entry.id);
        waited?;

        self.db
            .entries
            .set_normalized_audio(&entry.id, Some(&normalized_rel))
            .await?;
        Ok(StageResult::Next(Stage::Transcribing))
    }

    /// Run speech-to-text, then park for human review.
    async fn transcribe_stage(&self, entry: &Entry) -> Result<StageResult> {
        let settings = self.db.settings.get().await?;
        let vault = vault_root(&settings)?;

        let wav_rel = entry.normalized_audio_path.as_deref().ok_or_else(|| {
            Error::InvalidInput("Entry has no normalized audio".to_string())
        })?;
        let wav = vault.join(wav_rel);
        let duration = entry.audio_duration_secs.ok_or_else(|| {
            Error::InvalidInput("Entry has no measured duration".to_string())
        })?;

        let config = WhisperConfig::from_settings(&settings)?;
        let transcriber = Transcriber::new(config, settings.chunk_duration());
        let temp_dir = vault.join(AUDIO_DIR);

        self.heartbeat(&entry.id).await?;

        // Progress listener: heartbeat and stage message per chunk.
        let (tx, mut rx) = mpsc::unbounded_channel::<TranscribeEvent>();
        let listener = {
            let db = self.db.clone();
            let id = entry.id.clone();
            let worker_id = self.config.worker_id.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match event {
                        TranscribeEvent::ChunkStarted { index, total } => {
                            let _ = db.entries.heartbeat(&id, &worker_id).await;
                            let message = if total > 1 {
                                format!("Transcribing chunk {}/{}", index + 1, total)
                            } else {
                                "Transcribing audio".to_string()
                            };
                            let _ = db.entries.set_stage_message(&id, &message).await;
                        }
                        TranscribeEvent::ChunkFlagged { index, reason } => {
                            warn!(chunk = index, %reason, "Chunk flagged as hallucination");
                        }
                    }
                }
            })
        };

        let children = self.children.clone();
        let id_for_spawn = entry.id.clone();
        let on_spawn = move |handle: KillHandle| children.register(&id_for_spawn, handle);
        let hooks = TranscribeHooks {
            on_spawn: &on_spawn,
            events: Some(tx),
        };

        let result = transcriber.transcribe(&wav, duration, &temp_dir, &hooks).await;
        drop(hooks);
        self.children.clear(&entry.id);
        let _ = listener.await;

        let text = result?;
        self.db.entries.set_raw_transcript(&entry.id, &text).await?;
        Ok(StageResult::Park(Stage::AwaitingReview, "Ready for review"))
    }

    /// Produce the LLM sections for the entry's kind.
    async fn generate_stage(&self, entry: &Entry) -> Result<StageResult> {
        let settings = self.db.settings.get().await?;
        let client = LlmClient::new(
            settings.llm_base_url.clone(),
            settings.llm_model.clone(),
            settings.user_name.clone(),
        );

        self.heartbeat(&entry.id).await?;
        let generated = client
            .generate(
                entry.effective_transcript(),
                &entry.prompt_answers,
                entry.entry_type,
            )
            .await?;

        let mut sections = entry.generated_sections.clone();
        if let Some(content) = generated.content {
            sections.insert("JOURNAL".to_string(), content);
        }
        if let Some(reflection) = generated.reflection {
            sections.insert("AI_REFLECTION".to_string(), reflection);
        }
        self.db
            .entries
            .set_generated_sections(&entry.id, &sections)
            .await?;

        Ok(StageResult::Next(Stage::Writing))
    }

    /// Write the note atomically and clean up audio when configured.
    async fn write_stage(&self, entry: &Entry) -> Result<StageResult> {
        let settings = self.db.settings.get().await?;
        let vault = vault_root(&settings)?;
        let writer = NoteWriter::new(&vault);

        self.heartbeat(&entry.id).await?;

        let include_audio = settings.keep_audio && entry.original_audio_path.is_some();
        let transcript = entry.effective_transcript().to_string();
        let (rel_path, mtime) =
            writer.write_note(entry, &transcript, &entry.generated_sections, include_audio)?;
        self.db
            .entries
            .set_note_output(&entry.id, &rel_path, mtime)
            .await?;

        if !settings.keep_audio {
            for rel in [
                entry.original_audio_path.as_deref(),
                entry.normalized_audio_path.as_deref(),
            ]
            .into_iter()
            .flatten()
            {
                delete_audio(&vault.join(rel)).await?;
            }
        }

        Ok(StageResult::Complete)
    }

    async fn heartbeat(&self, id: &str) -> Result<()> {
        self.db.entries.heartbeat(id, &self.config.worker_id).await
    }
}

/// Human-readable message for a stage the runner enters.
fn stage_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Queued => "Waiting in queue",
        Stage::Normalizing => "Normalizing audio",
        Stage::Transcribing => "Transcribing audio",
        Stage::Generating => "Generating journal",
        Stage::Writing => "Writing note",
        _ => "",
    }
}

/// The configured vault root, required before any stage can touch disk.
fn vault_root(settings: &Settings) -> Result<PathBuf> {
    if settings.vault_path.trim().is_empty() {
        return Err(Error::Config("Vault path is not configured".to_string()));
    }
    Ok(PathBuf::from(&settings.vault_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.tick_ms, WORKER_TICK_MS);
        assert_eq!(config.heartbeat_stale_secs, HEARTBEAT_STALE_SECS);
        assert!(config.worker_id.starts_with("murmur-worker-"));
    }

    #[test]
    fn test_stage_messages() {
        assert_eq!(stage_message(Stage::Normalizing), "Normalizing audio");
        assert_eq!(stage_message(Stage::Writing), "Writing note");
        assert_eq!(stage_message(Stage::Completed), "");
    }

    #[test]
    fn test_vault_root_requires_configuration() {
        let mut settings = Settings::default();
        assert!(vault_root(&settings).is_err());
        settings.vault_path = "/vault".into();
        assert_eq!(vault_root(&settings).unwrap(), PathBuf::from("/vault"));
    }
}
