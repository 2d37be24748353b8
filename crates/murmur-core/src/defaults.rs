//! Centralized default constants for the murmur system.
//!
//! **This module is the single source of truth** for all shared default
//! values. All crates reference these constants instead of defining their
//! own magic numbers.

// =============================================================================
// AUDIO / CHUNKING
// =============================================================================

/// Default transcription chunk window in seconds. Audio at or under this
/// duration takes the single-shot path.
pub const CHUNK_DURATION_SECS: f64 = 60.0;

/// Overlap between adjacent audio chunks in seconds.
pub const CHUNK_OVERLAP_SECS: f64 = 5.0;

/// Hard ceiling on the number of chunks a single clip may split into.
pub const MAX_AUDIO_CHUNKS: usize = 100;

/// Canonical sample rate for normalized audio (Hz).
pub const NORMALIZED_SAMPLE_RATE: u32 = 16_000;

// =============================================================================
// TRANSCRIPTION
// =============================================================================

/// Expected speech density used by the hallucination under-production rule
/// (characters per second of audio).
pub const CHARS_PER_SEC_BASELINE: f64 = 5.0;

/// Token-rate estimate used by the overlap-aware merge (tokens per second
/// of overlapped audio).
pub const MERGE_TOKENS_PER_SEC: f64 = 2.5;

/// Beam size for the primary whisper pass.
pub const WHISPER_BEAM_SIZE: u32 = 5;

/// Best-of candidates for the primary whisper pass.
pub const WHISPER_BEST_OF: u32 = 5;

/// Entropy threshold for the primary whisper pass.
pub const WHISPER_ENTROPY_THOLD: f64 = 2.4;

/// Beam size for the conservative retry pass.
pub const WHISPER_RETRY_BEAM_SIZE: u32 = 3;

/// Best-of candidates for the conservative retry pass.
pub const WHISPER_RETRY_BEST_OF: u32 = 3;

/// Thread count for the conservative retry pass.
pub const WHISPER_RETRY_THREADS: u32 = 2;

/// Voice-activity-detection threshold for the primary pass.
pub const VAD_THRESHOLD: f64 = 0.5;

/// Voice-activity-detection threshold for the conservative retry pass.
pub const VAD_RETRY_THRESHOLD: f64 = 0.6;

/// Minimum speech duration for VAD (milliseconds).
pub const VAD_MIN_SPEECH_MS: u32 = 250;

/// Minimum silence duration for VAD (milliseconds).
pub const VAD_MIN_SILENCE_MS: u32 = 100;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default local LLM base URL.
pub const LLM_BASE_URL: &str = "http://127.0.0.1:11434";

/// Default generation model name.
pub const LLM_MODEL: &str = "llama3.1:8b";

/// Sampling temperature for journal generation.
pub const LLM_TEMPERATURE: f64 = 0.7;

/// Token cap for journal generation.
pub const LLM_NUM_PREDICT: u32 = 4096;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Worker tick interval in milliseconds.
pub const WORKER_TICK_MS: u64 = 1000;

/// Heartbeats older than this (seconds) mark a running entry as stuck.
pub const HEARTBEAT_STALE_SECS: i64 = 300;

// =============================================================================
// SERVER / PAGINATION
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 8787;

/// Default page size for the entry list endpoint.
pub const PAGE_LIMIT: i64 = 50;

/// Default page size for search.
pub const SEARCH_LIMIT: i64 = 20;

/// Maximum request body size in bytes (256 MB, bounded by audio uploads).
pub const MAX_BODY_SIZE_BYTES: usize = 256 * 1024 * 1024;

// =============================================================================
// VAULT LAYOUT
// =============================================================================

/// Notes directory under the vault root.
pub const JOURNAL_DIR: &str = "journal";

/// Audio directory under the journal directory.
pub const AUDIO_DIR: &str = "journal/audio";
