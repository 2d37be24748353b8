//! Overlapping chunk splitting for long audio.
//!
//! The plan is computed eagerly as a pure function so the window
//! arithmetic is unit-testable without touching ffmpeg; the cut step then
//! extracts each window into `chunk_NNN.wav` under the transient
//! directory, inheriting the canonical sample format.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

use murmur_core::defaults::{MAX_AUDIO_CHUNKS, NORMALIZED_SAMPLE_RATE};
use murmur_core::{Error, Result};

use crate::ffmpeg_bin;
use crate::process::ToolProcess;

/// One planned audio window.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    pub index: usize,
    /// Offset of the window start in seconds.
    pub start_secs: f64,
    /// Window length; the final chunk is shorter when the audio ends
    /// mid-window.
    pub duration_secs: f64,
}

/// Compute the ordered overlapping windows covering `total_secs`.
///
/// Window i starts at `i * (window - overlap)` and runs for `window`
/// seconds, clamped to the end of the audio. Exceeding the chunk ceiling
/// is fatal: a pathological duration would otherwise fan out into
/// hundreds of transcription runs.
pub fn plan_chunks(total_secs: f64, window_secs: f64, overlap_secs: f64) -> Result<Vec<ChunkPlan>> {
    if total_secs <= 0.0 {
        return Err(Error::Audio(format!(
            "Cannot split non-positive duration: {total_secs}"
        )));
    }
    if overlap_secs >= window_secs {
        return Err(Error::Audio(format!(
            "Chunk overlap ({overlap_secs}s) must be smaller than the window ({window_secs}s)"
        )));
    }

    let step = window_secs - overlap_secs;
    let mut plan = Vec::new();
    let mut start = 0.0_f64;

    loop {
        let duration = (total_secs - start).min(window_secs);
        plan.push(ChunkPlan {
            index: plan.len(),
            start_secs: start,
            duration_secs: duration,
        });

        if plan.len() > MAX_AUDIO_CHUNKS {
            return Err(Error::Audio(format!(
                "Audio splits into more than {MAX_AUDIO_CHUNKS} chunks; refusing"
            )));
        }

        if start + window_secs >= total_secs {
            break;
        }
        start += step;
    }

    Ok(plan)
}

/// Cut one planned window out of the normalized WAV.
async fn cut_chunk(input: &Path, plan: &ChunkPlan, out: &Path) -> Result<()> {
    let mut cmd = Command::new(ffmpeg_bin());
    cmd.arg("-y")
        .args(["-ss", &format!("{:.3}", plan.start_secs)])
        .args(["-t", &format!("{:.3}", plan.duration_secs)])
        .arg("-i")
        .arg(input)
        .args(["-ar", &NORMALIZED_SAMPLE_RATE.to_string()])
        .args(["-ac", "1"])
        .args(["-c:a", "pcm_s16le"])
        .arg(out);

    ToolProcess::spawn(cmd, "ffmpeg")?.wait().await
}

/// A cut chunk file together with its planned window.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub path: PathBuf,
    pub plan: ChunkPlan,
}

/// Split a normalized WAV into overlapping chunk files.
///
/// Returns the chunks in order. Files are written as `chunk_000.wav`,
/// `chunk_001.wav`, ... under `temp_dir`.
pub async fn split_wav(
    input: &Path,
    temp_dir: &Path,
    total_secs: f64,
    window_secs: f64,
    overlap_secs: f64,
) -> Result<Vec<AudioChunk>> {
    let plan = plan_chunks(total_secs, window_secs, overlap_secs)?;
    debug!(
        input = %input.display(),
        chunks = plan.len(),
        window_secs,
        overlap_secs,
        "Splitting audio"
    );

    let mut chunks = Vec::with_capacity(plan.len());
    for chunk in plan {
        let out = temp_dir.join(format!("chunk_{:03}.wav", chunk.index));
        cut_chunk(input, &chunk, &out).await?;
        chunks.push(AudioChunk {
            path: out,
            plan: chunk,
        });
    }
    Ok(chunks)
}
