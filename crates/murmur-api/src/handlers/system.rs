//! System handlers: health, prerequisites, path validation, installed
//! whisper models, and opening notes in external apps.

use std::path::Path;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tokio::process::Command;
use tracing::warn;

use murmur_inference::LlmClient;
use murmur_transcribe::{list_models, resolve_model_path, whisper_bin};

use crate::{decode_body, ApiError, AppState};

/// GET /health
pub async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    // One trivial query proves the store is reachable.
    let _ = state.db.entries.list(1, 0).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

async fn binary_works(bin: &str, arg: &str) -> bool {
    Command::new(bin)
        .arg(arg)
        .output()
        .await
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// GET /prerequisites: probe every external collaborator.
pub async fn prerequisites(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let settings = state.db.settings.get().await?;

    let ffmpeg = binary_works(&murmur_audio::ffmpeg_bin(), "-version").await;
    let ffprobe = binary_works(&murmur_audio::ffprobe_bin(), "-version").await;
    let whisper_cli = binary_works(&whisper_bin(), "--help").await;
    let whisper_model = resolve_model_path(&settings).is_ok();

    let llm = LlmClient::new(
        settings.llm_base_url.clone(),
        settings.llm_model.clone(),
        settings.user_name.clone(),
    )
    .reachable()
    .await;

    Ok(Json(serde_json::json!({
        "ffmpeg": ffmpeg,
        "ffprobe": ffprobe,
        "whisperCli": whisper_cli,
        "whisperModel": whisper_model,
        "llm": llm,
        "vaultConfigured": !settings.vault_path.is_empty(),
    })))
}

#[derive(Deserialize)]
pub struct ValidatePathRequest {
    path: String,
}

/// POST /validate-path: exists, is a directory, writable.
pub async fn validate_path(
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req: ValidatePathRequest = decode_body(body)?;
    let path = Path::new(&req.path);
    let exists = path.exists();
    let is_directory = path.is_dir();

    let writable = if is_directory {
        let probe = path.join(".murmur-write-probe");
        match std::fs::write(&probe, b"") {
            Ok(()) => {
                let _ = std::fs::remove_file(&probe);
                true
            }
            Err(_) => false,
        }
    } else {
        false
    };

    Ok(Json(serde_json::json!({
        "valid": exists && is_directory && writable,
        "exists": exists,
        "isDirectory": is_directory,
        "writable": writable,
    })))
}

/// GET /whisper: installed speech models.
pub async fn whisper_models() -> Result<impl IntoResponse, ApiError> {
    Ok(Json(serde_json::json!({ "models": list_models() })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenNoteRequest {
    entry_id: String,
    /// `obsidian` opens the note in Obsidian; `finder` reveals the file.
    action: String,
}

/// POST /open-note: fire the platform open command for a written note.
pub async fn open_note(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req: OpenNoteRequest = decode_body(body)?;
    let entry = state.db.entries.get(&req.entry_id).await?;
    let settings = state.db.settings.get().await?;
    let rel = entry
        .note_path
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("Entry has no written note".into()))?;
    if settings.vault_path.is_empty() {
        return Err(ApiError::BadRequest("Vault path is not configured".into()));
    }
    let abs = Path::new(&settings.vault_path).join(rel);

    let opener = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };

    let spawned = match req.action.as_str() {
        "obsidian" => {
            let url = format!("obsidian://open?path={}", urlencode(&abs.to_string_lossy()));
            Command::new(opener).arg(url).spawn()
        }
        "finder" => {
            let parent = abs.parent().unwrap_or(Path::new("."));
            Command::new(opener).arg(parent).spawn()
        }
        other => {
            return Err(ApiError::BadRequest(format!(
                "Unknown open action: {other}"
            )))
        }
    };

    if let Err(e) = spawned {
        warn!(error = %e, "Open command failed to spawn");
        return Err(ApiError::Internal(format!("Could not launch opener: {e}")));
    }
    Ok(Json(serde_json::json!({ "opened": true })))
}

/// Minimal percent-encoding for the obsidian:// URL path parameter.
fn urlencode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
