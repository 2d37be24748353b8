//! Whisper CLI invocation.
//!
//! The speech tool is the whisper.cpp command line. Each run points at a
//! single WAV, suppresses timestamps, and writes a companion `.txt` next
//! to the requested output prefix; we read it, trim it, and delete it.
//! Two flag sets exist: the primary pass, and a conservative pass used to
//! retry chunks that tripped the hallucination detector.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

use murmur_audio::process::{KillHandle, ToolProcess};
use murmur_core::defaults::{
    VAD_MIN_SILENCE_MS, VAD_MIN_SPEECH_MS, VAD_RETRY_THRESHOLD, VAD_THRESHOLD, WHISPER_BEAM_SIZE,
    WHISPER_BEST_OF, WHISPER_ENTROPY_THOLD, WHISPER_RETRY_BEAM_SIZE, WHISPER_RETRY_BEST_OF,
    WHISPER_RETRY_THREADS,
};
use murmur_core::{Error, Result, Settings};

/// Which flag set to run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Primary,
    /// Retry flags: narrower beam, zero temperature, fewer threads,
    /// stricter VAD, distinct output prefix.
    Conservative,
}

/// Resolved configuration for whisper runs.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    pub model_path: PathBuf,
    /// None means `auto`.
    pub language: Option<String>,
    /// Priming text passed as the initial prompt and carried across the
    /// run.
    pub initial_prompt: Option<String>,
    /// Some enables voice-activity detection with this model.
    pub vad_model_path: Option<PathBuf>,
}

impl WhisperConfig {
    /// Build from settings, resolving the model name to a file path.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            model_path: resolve_model_path(settings)?,
            language: None,
            initial_prompt: settings.transcription_prompt.clone(),
            vad_model_path: if settings.vad_enabled {
                match &settings.vad_model_path {
                    Some(path) => Some(PathBuf::from(path)),
                    None => {
                        return Err(Error::Config(
                            "VAD is enabled but no VAD model path is configured".into(),
                        ))
                    }
                }
            } else {
                None
            },
        })
    }
}

/// whisper.cpp CLI binary, overridable for non-PATH installs.
pub fn whisper_bin() -> String {
    std::env::var("MURMUR_WHISPER_CLI").unwrap_or_else(|_| "whisper-cli".to_string())
}

/// Directory scanned for `ggml-<name>.bin` model files.
pub fn models_dir() -> PathBuf {
    std::env::var("MURMUR_WHISPER_MODELS")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("models"))
}

/// Resolve the configured model to an existing file path.
pub fn resolve_model_path(settings: &Settings) -> Result<PathBuf> {
    let path = match &settings.whisper_model_path {
        Some(explicit) => PathBuf::from(explicit),
        None => models_dir().join(format!("ggml-{}.bin", settings.whisper_model)),
    };
    if !path.is_file() {
        return Err(Error::Transcription(format!(
            "Whisper model file not found: {}",
            path.display()
        )));
    }
    Ok(path)
}

/// List installed model names (`ggml-<name>.bin` files in the models
/// directory). A missing directory is an empty list, not an error.
pub fn list_models() -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(models_dir()) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.strip_prefix("ggml-")?
                .strip_suffix(".bin")
                .map(String::from)
        })
        .collect();
    names.sort();
    names
}

/// Run whisper over one WAV and return its trimmed transcript.
///
/// The spawned process is handed to `on_spawn` before waiting so the
/// runner can kill it on cancellation.
pub async fn transcribe_file(
    config: &WhisperConfig,
    wav: &Path,
    temp_dir: &Path,
    pass: Pass,
    on_spawn: &(dyn Fn(KillHandle) + Send + Sync),
) -> Result<String> {
    let stem = wav
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());
    let prefix = match pass {
        Pass::Primary => temp_dir.join(&stem),
        Pass::Conservative => temp_dir.join(format!("{stem}_retry")),
    };

    let mut cmd = Command::new(whisper_bin());
    cmd.arg("-m")
        .arg(&config.model_path)
        .arg("-f")
        .arg(wav)
        .args(["-l", config.language.as_deref().unwrap_or("auto")])
        // Suppress timestamps; downstream wants plain text.
        .arg("-nt")
        // Fresh decoder context per run, preventing cross-segment
        // contamination inside the tool.
        .arg("--no-context")
        .arg("--no-fallback")
        .args(["--entropy-thold", &WHISPER_ENTROPY_THOLD.to_string()])
        .arg("-otxt")
        .arg("-of")
        .arg(&prefix);

    match pass {
        Pass::Primary => {
            cmd.args(["--beam-size", &WHISPER_BEAM_SIZE.to_string()])
                .args(["--best-of", &WHISPER_BEST_OF.to_string()]);
        }
        Pass::Conservative => {
            cmd.args(["--beam-size", &WHISPER_RETRY_BEAM_SIZE.to_string()])
                .args(["--best-of", &WHISPER_RETRY_BEST_OF.to_string()])
                .args(["--temperature", "0.0"])
                .args(["-t", &WHISPER_RETRY_THREADS.to_string()]);
        }
    }

    if let Some(prompt) = &config.initial_prompt {
        cmd.args(["--prompt", prompt]).arg("--carry-initial-prompt");
    }

    if let Some(vad_model) = &config.vad_model_path {
        let threshold = match pass {
            Pass::Primary => VAD_THRESHOLD,
            Pass::Conservative => VAD_RETRY_THRESHOLD,
        };
        cmd.arg("--vad")
            .args(["--vad-threshold", &threshold.to_string()])
            .args([
                "--vad-min-speech-duration-ms",
                &VAD_MIN_SPEECH_MS.to_string(),
            ])
            .args([
                "--vad-min-silence-duration-ms",
                &VAD_MIN_SILENCE_MS.to_string(),
            ])
            .arg("--vad-model")
            .arg(vad_model);
    }

    debug!(wav = %wav.display(), ?pass, "Running whisper");

    let process = ToolProcess::spawn(cmd, "whisper")
        .map_err(|e| Error::Transcription(e.to_string()))?;
    on_spawn(process.kill_handle());
    process
        .wait()
        .await
        .map_err(|e| Error::Transcription(e.to_string()))?;

    let txt_path = prefix.with_extension("txt");
    let text = tokio::fs::read_to_string(&txt_path).await.map_err(|e| {
        Error::Transcription(format!(
            "Whisper produced no output at {}: {e}",
            txt_path.display()
        ))
    })?;
    let _ = tokio::fs::remove_file(&txt_path).await;

    Ok(text.trim().to_string())
}
