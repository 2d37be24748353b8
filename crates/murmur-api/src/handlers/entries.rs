//! Entry CRUD, search, patch/continue, cancel, and link handlers.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;

use murmur_core::defaults::{PAGE_LIMIT, SEARCH_LIMIT};
use murmur_core::{
    local_date_in, new_entry_id, parse_timezone, CreateEntryRequest, Entry, EntryKind, LinkType,
    PromptAnswers, SearchRequest, Stage, StageClass,
};
use murmur_db::NewEntry;
use murmur_notes::NoteWriter;

use crate::{decode_body, ApiError, AppState};

/// POST /entries
pub async fn create_entry(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req: CreateEntryRequest = decode_body(body)?;
    let settings = state.db.settings.get().await?;
    let timezone = req
        .timezone
        .unwrap_or_else(|| settings.default_timezone.clone());
    let tz = parse_timezone(&timezone)?;
    let entry_date = req
        .entry_date
        .unwrap_or_else(|| local_date_in(&tz, Utc::now()));

    let entry = state
        .db
        .entries
        .create(NewEntry {
            id: new_entry_id(),
            entry_type: req.entry_type,
            timezone,
            entry_date,
        })
        .await?;

    info!(entry_id = %entry.id, kind = %entry.entry_type, "Entry created");
    Ok(Json(entry))
}

#[derive(Deserialize)]
pub struct ListParams {
    limit: Option<i64>,
    offset: Option<i64>,
}

/// GET /entries
pub async fn list_entries(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params.limit.unwrap_or(PAGE_LIMIT).clamp(1, 500);
    let offset = params.offset.unwrap_or(0).max(0);
    let (entries, count) = state.db.entries.list(limit, offset).await?;
    Ok(Json(serde_json::json!({ "entries": entries, "count": count })))
}

#[derive(Deserialize)]
pub struct SearchParams {
    q: Option<String>,
    #[serde(rename = "type")]
    entry_type: Option<String>,
    status: Option<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    limit: Option<i64>,
    offset: Option<i64>,
}

/// GET /entries/search
pub async fn search_entries(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let entry_type = params
        .entry_type
        .as_deref()
        .map(EntryKind::parse)
        .transpose()?;
    let status = params
        .status
        .as_deref()
        .map(StageClass::parse)
        .transpose()?;

    let response = state
        .db
        .search
        .search(&SearchRequest {
            query: params.q,
            entry_type,
            status,
            date_from: params.from,
            date_to: params.to,
            limit: params.limit.unwrap_or(SEARCH_LIMIT).clamp(1, 200),
            offset: params.offset.unwrap_or(0).max(0),
        })
        .await?;

    Ok(Json(response))
}

/// GET /entries/:id: the entry plus computed fields.
pub async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state.db.entries.get(&id).await?;
    let settings = state.db.settings.get().await?;

    let (has_external_edits, note_content) = if settings.vault_path.is_empty() {
        (false, None)
    } else {
        let writer = NoteWriter::new(&settings.vault_path);
        (
            writer.has_external_edits(&entry).unwrap_or(false),
            writer.read_note(&entry).unwrap_or(None),
        )
    };

    let mut body = serde_json::to_value(&entry)?;
    let object = body.as_object_mut().expect("entry serializes to an object");
    object.insert(
        "overallProgress".into(),
        serde_json::json!(entry.stage.overall_progress()),
    );
    object.insert(
        "hasExternalEdits".into(),
        serde_json::json!(has_external_edits),
    );
    if let Some(content) = note_content {
        object.insert("noteContent".into(), serde_json::json!(content));
    }

    Ok(Json(body))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchEntryRequest {
    edited_transcript: Option<String>,
    prompt_answers: Option<PromptAnswers>,
    entry_date: Option<NaiveDate>,
    edited_sections: Option<HashMap<String, String>>,
    action: Option<String>,
}

/// PATCH /entries/:id: apply edits, maybe nudge the pipeline.
pub async fn patch_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req: PatchEntryRequest = decode_body(body)?;
    let entry = state.db.entries.get(&id).await?;

    if let Some(text) = req.edited_transcript {
        state.db.entries.set_edited_transcript(&id, &text).await?;
    }

    if let Some(incoming) = req.prompt_answers {
        // Merge the provided keys into the stored map.
        let mut answers = entry.prompt_answers.clone();
        for (key, answer) in incoming {
            answers.insert(key, answer);
        }
        state.db.entries.set_prompt_answers(&id, &answers).await?;
    }

    if let Some(date) = req.entry_date {
        // The date is adjustable until writing begins.
        if matches!(entry.stage, Stage::Writing | Stage::Completed) {
            return Err(ApiError::BadRequest(
                "Entry date can no longer be changed".into(),
            ));
        }
        state.db.entries.set_entry_date(&id, date).await?;
    }

    if let Some(sections) = req.edited_sections {
        apply_section_edits(&state, &entry, &sections).await?;
    }

    if req.action.as_deref() == Some("continue") {
        apply_continue(&state, &id).await?;
    }

    let updated = state.db.entries.get(&id).await?;
    Ok(Json(updated))
}

/// Write user section edits through the note writer and keep the store's
/// copies (and the text index) in step.
async fn apply_section_edits(
    state: &AppState,
    entry: &Entry,
    sections: &HashMap<String, String>,
) -> Result<(), ApiError> {
    let settings = state.db.settings.get().await?;
    if settings.vault_path.is_empty() {
        return Err(ApiError::BadRequest("Vault path is not configured".into()));
    }
    if entry.note_path.is_none() {
        return Err(ApiError::BadRequest(
            "Entry has no written note to edit".into(),
        ));
    }

    let writer = NoteWriter::new(&settings.vault_path);
    let mtime = writer.update_note_content(entry, sections)?;
    state
        .db
        .entries
        .set_note_output(&entry.id, entry.note_path.as_deref().unwrap(), mtime)
        .await?;

    let mut stored = entry.generated_sections.clone();
    let mut changed = false;
    for (name, body) in sections {
        if stored.contains_key(name) {
            stored.insert(name.clone(), body.clone());
            changed = true;
        }
    }
    if changed {
        state
            .db
            .entries
            .set_generated_sections(&entry.id, &stored)
            .await?;
    }
    Ok(())
}

/// Advance an awaiting entry to its next stage. Anything else is left
/// untouched (the caller still gets a 200 with the current entity).
async fn apply_continue(state: &AppState, id: &str) -> Result<(), ApiError> {
    let entry = state.db.entries.get(id).await?;
    let next = match (entry.stage, entry.entry_type) {
        (Stage::AwaitingReview, EntryKind::QuickNote) => Stage::Writing,
        (Stage::AwaitingReview, EntryKind::BrainDump) => Stage::Generating,
        (Stage::AwaitingReview, EntryKind::DailyReflection) => Stage::AwaitingPrompts,
        (Stage::AwaitingPrompts, _) => Stage::Generating,
        _ => return Ok(()),
    };

    let message = match next {
        Stage::AwaitingPrompts => "Waiting for prompt answers",
        Stage::Generating => "Waiting for generation",
        _ => "Waiting to write",
    };
    state.db.entries.set_stage(id, next, Some(message)).await?;
    info!(entry_id = %id, from = %entry.stage, to = %next, "Entry continued");
    Ok(())
}

/// DELETE /entries/:id: removes the row, never the vault file.
pub async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.entries.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /entries/:id/cancel
pub async fn cancel_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Existence first, so unknown ids are 404 rather than 400.
    let _ = state.db.entries.get(&id).await?;

    if !state.db.entries.request_cancel(&id).await? {
        return Err(ApiError::BadRequest(
            "Entry is not in a cancellable stage".into(),
        ));
    }

    // Best-effort kill of the live tool process; the worker settles the
    // final state.
    state.worker.kill_child(&id).await;

    let entry = state.db.entries.get(&id).await?;
    Ok(Json(entry))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    target_id: String,
    #[serde(rename = "type")]
    link_type: String,
}

/// GET /entries/:id/links
pub async fn list_links(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let _ = state.db.entries.get(&id).await?;
    let links = state.db.links.list_for_entry(&id).await?;
    Ok(Json(serde_json::json!({ "links": links })))
}

/// POST /entries/:id/links
pub async fn add_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req: LinkRequest = decode_body(body)?;
    let link_type = LinkType::parse(&req.link_type)?;
    let link = state.db.links.add(&id, &req.target_id, link_type).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

/// DELETE /entries/:id/links
pub async fn remove_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let req: LinkRequest = decode_body(body)?;
    let link_type = LinkType::parse(&req.link_type)?;
    state.db.links.remove(&id, &req.target_id, link_type).await?;
    Ok(StatusCode::NO_CONTENT)
}
