//! Audio upload and playback handlers.

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;

use murmur_core::defaults::AUDIO_DIR;
use murmur_core::Stage;

use crate::{ApiError, AppState};

/// POST /entries/:id/audio: store the source clip and queue the entry.
pub async fn upload_audio(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state.db.entries.get(&id).await?;
    if entry.stage != Stage::Pending {
        return Err(ApiError::BadRequest(format!(
            "Audio can only be uploaded while pending (stage is {})",
            entry.stage
        )));
    }

    let settings = state.db.settings.get().await?;
    if settings.vault_path.is_empty() {
        return Err(ApiError::BadRequest("Vault path is not configured".into()));
    }

    let mut audio: Option<(Vec<u8>, String)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {e}")))?
    {
        if field.name() != Some("audio") {
            continue;
        }
        let content_type = field.content_type().unwrap_or("").to_string();
        if !content_type.starts_with("audio/") {
            return Err(ApiError::BadRequest(format!(
                "Expected an audio/* upload, got {content_type:?}"
            )));
        }
        let ext = extension_for(&content_type, field.file_name());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Upload read error: {e}")))?;
        audio = Some((bytes.to_vec(), ext));
    }

    let Some((bytes, ext)) = audio else {
        return Err(ApiError::BadRequest(
            "Missing multipart field 'audio'".into(),
        ));
    };
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Uploaded audio is empty".into()));
    }

    let rel = format!("{AUDIO_DIR}/{id}-original.{ext}");
    let abs = std::path::Path::new(&settings.vault_path).join(&rel);
    if let Some(parent) = abs.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(murmur_core::Error::Io)?;
    }
    tokio::fs::write(&abs, &bytes).await.map_err(murmur_core::Error::Io)?;

    state.db.entries.set_original_audio(&id, &rel).await?;
    state
        .db
        .entries
        .set_stage(&id, Stage::Queued, Some("Waiting in queue"))
        .await?;

    info!(entry_id = %id, bytes = bytes.len(), path = %rel, "Audio uploaded, entry queued");
    let entry = state.db.entries.get(&id).await?;
    Ok(Json(entry))
}

/// File extension for the stored original, from the filename when it has
/// one, else from the MIME type.
fn extension_for(content_type: &str, file_name: Option<&str>) -> String {
    if let Some(name) = file_name {
        if let Some((_, ext)) = name.rsplit_once('.') {
            if !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                return ext.to_lowercase();
            }
        }
    }
    match content_type {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/ogg" => "ogg",
        "audio/flac" => "flac",
        "audio/aac" => "aac",
        "audio/mp4" | "audio/x-m4a" => "m4a",
        _ => "webm",
    }
    .to_string()
}

/// GET /audio/*path: serve a vault audio file read-only.
///
/// Only `journal/audio/…` is reachable; dotted components, absolute
/// paths, and anything resolving outside the vault are rejected.
pub async fn serve_audio(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let rel = path.trim_start_matches('/');

    if std::path::Path::new(rel).is_absolute()
        || rel.split(['/', '\\']).any(|part| part == "..")
        || !rel.starts_with(&format!("{AUDIO_DIR}/"))
    {
        return Err(ApiError::Forbidden("Path is outside the audio area".into()));
    }

    let settings = state.db.settings.get().await?;
    if settings.vault_path.is_empty() {
        return Err(ApiError::BadRequest("Vault path is not configured".into()));
    }

    let vault = std::path::Path::new(&settings.vault_path);
    let abs = vault.join(rel);

    // Symlinks could still escape; resolve both sides and compare.
    let resolved = abs
        .canonicalize()
        .map_err(|_| ApiError::NotFound(format!("No such audio file: {rel}")))?;
    let vault_resolved = vault
        .canonicalize()
        .map_err(|e| ApiError::Internal(format!("Vault path unresolvable: {e}")))?;
    if !resolved.starts_with(&vault_resolved) {
        return Err(ApiError::Forbidden("Path escapes the vault".into()));
    }

    let bytes = tokio::fs::read(&resolved)
        .await
        .map_err(|_| ApiError::NotFound(format!("No such audio file: {rel}")))?;

    let content_type = match resolved.extension().and_then(|e| e.to_str()) {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("webm") => "audio/webm",
        _ => "application/octet-stream",
    };

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        bytes,
    ))
}
