//! # murmur-audio
//!
//! External audio tooling for murmur. Wraps ffmpeg/ffprobe invocations:
//! duration probing, normalization to the canonical single-channel 16 kHz
//! PCM WAV, and overlapping chunk splitting for long clips. Long-running
//! conversions are spawned through [`process::ToolProcess`] so the job
//! runner can kill them on cancellation.

pub mod normalize;
pub mod probe;
pub mod process;
pub mod split;

pub use normalize::{delete_audio, spawn_normalize};
pub use probe::probe_duration;
pub use process::{KillHandle, ToolProcess};
pub use split::{plan_chunks, split_wav, AudioChunk, ChunkPlan};

/// ffmpeg binary, overridable for non-PATH installs.
pub fn ffmpeg_bin() -> String {
    std::env::var("MURMUR_FFMPEG").unwrap_or_else(|_| "ffmpeg".to_string())
}

/// ffprobe binary, overridable for non-PATH installs.
pub fn ffprobe_bin() -> String {
    std::env::var("MURMUR_FFPROBE").unwrap_or_else(|_| "ffprobe".to_string())
}
