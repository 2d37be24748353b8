//! # murmur-transcribe
//!
//! Chunked speech-to-text engine for murmur.
//!
//! Short clips take the single-shot path; anything longer than the chunk
//! window is split into overlapping windows, transcribed sequentially
//! (the tool is heavy, sequential bounds memory), checked per chunk for
//! hallucinations with a conservative retry, and merged overlap-aware.
//! Flagged chunks append an advisory alternative block for the human
//! reviewer; they never fail the pipeline.

pub mod hallucination;
pub mod merge;
pub mod whisper;

use std::path::Path;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use murmur_audio::process::KillHandle;
use murmur_audio::split::split_wav;
use murmur_core::defaults::CHUNK_OVERLAP_SECS;
use murmur_core::Result;

pub use hallucination::{check_hallucination, HallucinationFlag};
pub use merge::merge_chunks;
pub use whisper::{
    list_models, models_dir, resolve_model_path, whisper_bin, Pass, WhisperConfig,
};

/// Progress events emitted while transcribing, consumed by the job
/// runner for heartbeats and stage messages.
#[derive(Debug, Clone)]
pub enum TranscribeEvent {
    ChunkStarted { index: usize, total: usize },
    ChunkFlagged { index: usize, reason: String },
}

/// Hooks wired in by the job runner.
pub struct TranscribeHooks<'a> {
    /// Receives the kill handle of every spawned tool process.
    pub on_spawn: &'a (dyn Fn(KillHandle) + Send + Sync),
    /// Progress event stream; None when nobody is listening.
    pub events: Option<UnboundedSender<TranscribeEvent>>,
}

impl TranscribeHooks<'_> {
    fn emit(&self, event: TranscribeEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// A chunk whose primary output tripped the hallucination detector.
#[derive(Debug, Clone)]
struct FlaggedChunk {
    index: usize,
    flag: HallucinationFlag,
    alternative: String,
    alternative_flag: Option<HallucinationFlag>,
}

/// The transcription engine, configured per entry from settings.
pub struct Transcriber {
    pub config: WhisperConfig,
    /// Chunk window in seconds; audio at or under this takes the
    /// single-shot path.
    pub chunk_duration_secs: f64,
    pub overlap_secs: f64,
}

impl Transcriber {
    pub fn new(config: WhisperConfig, chunk_duration_secs: f64) -> Self {
        Self {
            config,
            chunk_duration_secs,
            overlap_secs: CHUNK_OVERLAP_SECS,
        }
    }

    /// Transcribe a normalized WAV of the given duration.
    ///
    /// Returns the final transcript text; when chunks were flagged, the
    /// advisory alternative block is already appended.
    pub async fn transcribe(
        &self,
        wav: &Path,
        duration_secs: f64,
        temp_dir: &Path,
        hooks: &TranscribeHooks<'_>,
    ) -> Result<String> {
        if duration_secs <= self.chunk_duration_secs {
            debug!(duration_secs, "Single-shot transcription");
            hooks.emit(TranscribeEvent::ChunkStarted { index: 0, total: 1 });
            return whisper::transcribe_file(&self.config, wav, temp_dir, Pass::Primary, hooks.on_spawn)
                .await;
        }

        self.transcribe_chunked(wav, duration_secs, temp_dir, hooks).await
    }

    async fn transcribe_chunked(
        &self,
        wav: &Path,
        duration_secs: f64,
        temp_dir: &Path,
        hooks: &TranscribeHooks<'_>,
    ) -> Result<String> {
        let chunks = split_wav(
            wav,
            temp_dir,
            duration_secs,
            self.chunk_duration_secs,
            self.overlap_secs,
        )
        .await?;
        let total = chunks.len();
        info!(total, duration_secs, "Chunked transcription");

        let mut primary_texts: Vec<String> = Vec::with_capacity(total);
        let mut flagged: Vec<FlaggedChunk> = Vec::new();

        for chunk in &chunks {
            let index = chunk.plan.index;
            hooks.emit(TranscribeEvent::ChunkStarted { index, total });

            let text = whisper::transcribe_file(
                &self.config,
                &chunk.path,
                temp_dir,
                Pass::Primary,
                hooks.on_spawn,
            )
            .await?;

            if let Some(flag) = check_hallucination(&text, chunk.plan.duration_secs) {
                warn!(index, reason = %flag.reason, "Chunk flagged, retrying conservatively");
                hooks.emit(TranscribeEvent::ChunkFlagged {
                    index,
                    reason: flag.reason.clone(),
                });

                let alternative = whisper::transcribe_file(
                    &self.config,
                    &chunk.path,
                    temp_dir,
                    Pass::Conservative,
                    hooks.on_spawn,
                )
                .await?;
                let alternative_flag =
                    check_hallucination(&alternative, chunk.plan.duration_secs);

                flagged.push(FlaggedChunk {
                    index,
                    flag,
                    alternative,
                    alternative_flag,
                });
            }

            primary_texts.push(text);
            let _ = tokio::fs::remove_file(&chunk.path).await;
        }

        let merged = merge_chunks(&primary_texts, self.overlap_secs);
        Ok(append_alternatives(merged, &flagged))
    }
}

/// Append the advisory alternative block for flagged chunks. This is
/// reviewer-facing content, never an error.
fn append_alternatives(merged: String, flagged: &[FlaggedChunk]) -> String {
    if flagged.is_empty() {
        return merged;
    }

    let mut out = merged;
    out.push_str("\n\n---\n\n");
    out.push_str(
        "**Transcription quality warning.** Some chunks looked like speech-tool \
         hallucinations; a conservative re-run of each is shown below for review.\n",
    );
    for chunk in flagged {
        out.push_str(&format!(
            "\nChunk {} ({}, confidence {:.2}):\n{}\n",
            chunk.index + 1,
            chunk.flag.reason,
            chunk.flag.confidence,
            if chunk.alternative.is_empty() {
                "(empty)"
            } else {
                chunk.alternative.as_str()
            }
        ));
        if let Some(alt_flag) = &chunk.alternative_flag {
            out.push_str(&format!("(retry also flagged: {})\n", alt_flag.reason));
        }
    }
    out
}
