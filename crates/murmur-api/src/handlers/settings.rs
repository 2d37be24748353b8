//! Settings handlers.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;

use murmur_core::SettingsPatch;

use crate::{decode_body, ApiError, AppState};

/// GET /settings
pub async fn get_settings(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let settings = state.db.settings.get().await?;
    Ok(Json(settings))
}

/// PATCH /settings
pub async fn patch_settings(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let patch: SettingsPatch = decode_body(body)?;
    let current = state.db.settings.get().await?;
    let updated = patch.apply(current)?;
    state.db.settings.update(&updated).await?;
    info!("Settings updated");
    Ok(Json(updated))
}
