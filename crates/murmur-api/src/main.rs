//! murmur-api - HTTP facade and server binary for murmur.
//!
//! Thin RPC over the store, the note writer, and the job runner: the
//! handlers validate input and mutate the store; the worker thread does
//! everything slow. One process owns one store handle, one worker, and
//! one child-process table.

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use murmur_core::defaults::{MAX_BODY_SIZE_BYTES, SERVER_PORT};
use murmur_db::Database;
use murmur_jobs::{JobWorker, WorkerConfig, WorkerHandle};

use handlers::{audio, entries, settings, system};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    db: Database,
    /// Control handle of the pipeline worker (cancel uses its child
    /// table to kill live tool processes).
    worker: Arc<WorkerHandle>,
}

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// HTTP-facing error. Status policy: 400 for precondition violations,
/// 403 for traversal, 404 for unknown ids, 500 for everything else.
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Internal(String),
}

impl From<murmur_core::Error> for ApiError {
    fn from(e: murmur_core::Error) -> Self {
        use murmur_core::Error;
        match &e {
            Error::EntryNotFound(_) | Error::NotFound(_) => ApiError::NotFound(e.to_string()),
            Error::InvalidInput(_) | Error::NoteFormat(_) | Error::Config(_) => {
                ApiError::BadRequest(e.to_string())
            }
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

/// Decode a JSON body into a typed request, mapping failures to 400.
/// Axum's own Json rejection answers 422, but the status policy here is
/// 400 for every constraint violation.
fn decode_body<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::BadRequest(format!("Invalid body: {e}")))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

// =============================================================================
// ROUTER
// =============================================================================

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route(
            "/entries",
            post(entries::create_entry).get(entries::list_entries),
        )
        .route("/entries/search", get(entries::search_entries))
        .route(
            "/entries/:id",
            get(entries::get_entry)
                .patch(entries::patch_entry)
                .delete(entries::delete_entry),
        )
        .route("/entries/:id/audio", post(audio::upload_audio))
        .route("/entries/:id/cancel", post(entries::cancel_entry))
        .route(
            "/entries/:id/links",
            get(entries::list_links)
                .post(entries::add_link)
                .delete(entries::remove_link),
        )
        .route("/audio/*path", get(audio::serve_audio))
        .route("/open-note", post(system::open_note))
        .route(
            "/settings",
            get(settings::get_settings).patch(settings::patch_settings),
        )
        .route("/prerequisites", get(system::prerequisites))
        .route("/validate-path", post(system::validate_path))
        .route("/whisper", get(system::whisper_models))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE_BYTES))
        .with_state(state)
}

// =============================================================================
// STARTUP
// =============================================================================

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors
///   RUST_LOG    - standard env filter (default: "murmur=debug,tower_http=info")
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "murmur=debug,tower_http=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("murmur-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(log_ansi.unwrap_or(false)),
                )
                .init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_logging();

    let db_path = std::env::var("MURMUR_DB").unwrap_or_else(|_| "murmur.db".to_string());
    let db = Database::open(&db_path).await?;

    let worker = JobWorker::new(db.clone(), WorkerConfig::from_env());
    let worker_handle = Arc::new(worker.start());

    let state = AppState {
        db,
        worker: worker_handle.clone(),
    };
    let app = build_router(state);

    let port = std::env::var("MURMUR_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(SERVER_PORT);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "murmur-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker_handle.shutdown().await.ok();
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::Stage;

    /// Spawn the full router on an ephemeral port with an in-memory
    /// store and a (dormant) worker. Returns the base URL, the database
    /// handle for assertions, and the vault guard.
    async fn spawn_server() -> (String, Database, tempfile::TempDir) {
        let vault = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        let mut s = db.settings.get().await.unwrap();
        s.vault_path = vault.path().to_string_lossy().into_owned();
        db.settings.update(&s).await.unwrap();

        // A worker that will not tick during the test.
        let worker = JobWorker::new(
            db.clone(),
            WorkerConfig {
                tick_ms: 3_600_000,
                ..Default::default()
            },
        );
        let state = AppState {
            db: db.clone(),
            worker: Arc::new(worker.start()),
        };
        let app = build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), db, vault)
    }

    async fn create_entry(base: &str, kind: &str) -> serde_json::Value {
        reqwest::Client::new()
            .post(format!("{base}/entries"))
            .json(&serde_json::json!({"entryType": kind, "timezone": "UTC"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_entry_starts_pending() {
        let (base, _db, _vault) = spawn_server().await;
        let body = create_entry(&base, "brain-dump").await;
        assert_eq!(body["stage"], "pending");
        assert_eq!(body["entryType"], "brain-dump");
        assert!(body["id"].as_str().unwrap().len() == 12);
        assert!(body["entryDate"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_create_entry_rejects_bad_timezone() {
        let (base, _db, _vault) = spawn_server().await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/entries"))
            .json(&serde_json::json!({"entryType": "quick-note", "timezone": "Mars/Olympus"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_unknown_entry_is_404() {
        let (base, _db, _vault) = spawn_server().await;
        let resp = reqwest::get(format!("{base}/entries/nosuchid12345"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_upload_rejects_non_audio_mime() {
        let (base, _db, _vault) = spawn_server().await;
        let body = create_entry(&base, "quick-note").await;
        let id = body["id"].as_str().unwrap();

        let part = reqwest::multipart::Part::bytes(b"not audio".to_vec())
            .file_name("clip.txt")
            .mime_str("text/plain")
            .unwrap();
        let form = reqwest::multipart::Form::new().part("audio", part);
        let resp = reqwest::Client::new()
            .post(format!("{base}/entries/{id}/audio"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_upload_queues_entry_and_serves_audio() {
        let (base, db, vault) = spawn_server().await;
        let body = create_entry(&base, "quick-note").await;
        let id = body["id"].as_str().unwrap().to_string();

        let part = reqwest::multipart::Part::bytes(vec![0u8; 64])
            .file_name("clip.wav")
            .mime_str("audio/wav")
            .unwrap();
        let form = reqwest::multipart::Form::new().part("audio", part);
        let resp = reqwest::Client::new()
            .post(format!("{base}/entries/{id}/audio"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let entry = db.entries.get(&id).await.unwrap();
        assert_eq!(entry.stage, Stage::Queued);
        let rel = entry.original_audio_path.as_deref().unwrap();
        assert_eq!(rel, &format!("journal/audio/{id}-original.wav"));
        assert!(vault.path().join(rel).exists());

        // The stored file is served back under /audio/<vault-rel>.
        let served = reqwest::get(format!("{base}/audio/{rel}")).await.unwrap();
        assert_eq!(served.status(), 200);
        assert_eq!(
            served.headers()["content-type"].to_str().unwrap(),
            "audio/wav"
        );

        // A second upload is refused: the entry is no longer pending.
        let part = reqwest::multipart::Part::bytes(vec![0u8; 8])
            .file_name("clip.wav")
            .mime_str("audio/wav")
            .unwrap();
        let resp = reqwest::Client::new()
            .post(format!("{base}/entries/{id}/audio"))
            .multipart(reqwest::multipart::Form::new().part("audio", part))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_audio_path_traversal_is_forbidden() {
        let (base, _db, _vault) = spawn_server().await;
        for path in ["etc/passwd", "journal/notes.md", "audio/x.wav"] {
            let resp = reqwest::get(format!("{base}/audio/{path}")).await.unwrap();
            assert_eq!(resp.status(), 403, "path {path} should be forbidden");
        }
        // Inside the audio area but absent: 404, not 403.
        let resp = reqwest::get(format!("{base}/audio/journal/audio/missing.wav"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_continue_outside_awaiting_is_a_no_op() {
        let (base, db, _vault) = spawn_server().await;
        let body = create_entry(&base, "quick-note").await;
        let id = body["id"].as_str().unwrap().to_string();

        let resp = reqwest::Client::new()
            .patch(format!("{base}/entries/{id}"))
            .json(&serde_json::json!({"action": "continue"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let returned: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(returned["stage"], "pending");
        assert_eq!(db.entries.get(&id).await.unwrap().stage, Stage::Pending);
    }

    #[tokio::test]
    async fn test_continue_routes_by_kind() {
        let (base, db, _vault) = spawn_server().await;
        let client = reqwest::Client::new();

        for (kind, expected) in [
            ("quick-note", Stage::Writing),
            ("brain-dump", Stage::Generating),
            ("daily-reflection", Stage::AwaitingPrompts),
        ] {
            let body = create_entry(&base, kind).await;
            let id = body["id"].as_str().unwrap().to_string();
            db.entries
                .set_stage(&id, Stage::AwaitingReview, None)
                .await
                .unwrap();

            let resp = client
                .patch(format!("{base}/entries/{id}"))
                .json(&serde_json::json!({"action": "continue"}))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200);
            assert_eq!(db.entries.get(&id).await.unwrap().stage, expected, "{kind}");
        }
    }

    #[tokio::test]
    async fn test_patch_edits_transcript_and_answers() {
        let (base, db, _vault) = spawn_server().await;
        let body = create_entry(&base, "daily-reflection").await;
        let id = body["id"].as_str().unwrap().to_string();

        let resp = reqwest::Client::new()
            .patch(format!("{base}/entries/{id}"))
            .json(&serde_json::json!({
                "editedTranscript": "polished words",
                "promptAnswers": {"gratitude": {"text": "I'm grateful for coffee"}}
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let entry = db.entries.get(&id).await.unwrap();
        assert_eq!(entry.edited_transcript.as_deref(), Some("polished words"));
        assert_eq!(
            entry.prompt_answers[&murmur_core::PromptKey::Gratitude].text,
            "I'm grateful for coffee"
        );
    }

    #[tokio::test]
    async fn test_get_entry_reports_progress() {
        let (base, db, _vault) = spawn_server().await;
        let body = create_entry(&base, "quick-note").await;
        let id = body["id"].as_str().unwrap().to_string();
        db.entries
            .set_stage(&id, Stage::AwaitingReview, None)
            .await
            .unwrap();

        let fetched: serde_json::Value = reqwest::get(format!("{base}/entries/{id}"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(fetched["overallProgress"], 60);
        assert_eq!(fetched["hasExternalEdits"], false);
    }

    #[tokio::test]
    async fn test_cancel_requires_cancellable_stage() {
        let (base, db, _vault) = spawn_server().await;
        let body = create_entry(&base, "quick-note").await;
        let id = body["id"].as_str().unwrap().to_string();
        let client = reqwest::Client::new();

        // pending: not cancellable
        let resp = client
            .post(format!("{base}/entries/{id}/cancel"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        db.entries.set_stage(&id, Stage::Queued, None).await.unwrap();
        let resp = client
            .post(format!("{base}/entries/{id}/cancel"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            db.entries.get(&id).await.unwrap().stage,
            Stage::CancelRequested
        );
    }

    #[tokio::test]
    async fn test_links_round_trip_over_http() {
        let (base, _db, _vault) = spawn_server().await;
        let a = create_entry(&base, "quick-note").await["id"]
            .as_str()
            .unwrap()
            .to_string();
        let b = create_entry(&base, "quick-note").await["id"]
            .as_str()
            .unwrap()
            .to_string();
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/entries/{a}/links"))
            .json(&serde_json::json!({"targetId": b, "type": "followup"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);

        let listed: serde_json::Value = client
            .get(format!("{base}/entries/{b}/links"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed["links"].as_array().unwrap().len(), 1);

        let resp = client
            .delete(format!("{base}/entries/{a}/links"))
            .json(&serde_json::json!({"targetId": b, "type": "followup"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);
    }

    #[tokio::test]
    async fn test_settings_patch_over_http() {
        let (base, _db, _vault) = spawn_server().await;
        let client = reqwest::Client::new();

        let before: serde_json::Value = client
            .get(format!("{base}/settings"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(before["chunkDurationSecs"], 60);

        let after: serde_json::Value = client
            .patch(format!("{base}/settings"))
            .json(&serde_json::json!({"chunkDurationSecs": 90, "keepAudio": false}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(after["chunkDurationSecs"], 90);
        assert_eq!(after["keepAudio"], false);

        // Unknown keys are rejected.
        let resp = client
            .patch(format!("{base}/settings"))
            .json(&serde_json::json!({"mystery": true}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_validate_path() {
        let (base, _db, vault) = spawn_server().await;
        let client = reqwest::Client::new();

        let good: serde_json::Value = client
            .post(format!("{base}/validate-path"))
            .json(&serde_json::json!({"path": vault.path().to_string_lossy()}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(good["valid"], true);

        let bad: serde_json::Value = client
            .post(format!("{base}/validate-path"))
            .json(&serde_json::json!({"path": "/definitely/not/here"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(bad["valid"], false);
        assert_eq!(bad["exists"], false);
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let (base, _db, _vault) = spawn_server().await;
        let id = create_entry(&base, "quick-note").await["id"]
            .as_str()
            .unwrap()
            .to_string();
        let client = reqwest::Client::new();

        let resp = client
            .delete(format!("{base}/entries/{id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);

        let resp = reqwest::get(format!("{base}/entries/{id}")).await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_search_endpoint_shapes_response() {
        let (base, db, _vault) = spawn_server().await;
        let id = create_entry(&base, "brain-dump").await["id"]
            .as_str()
            .unwrap()
            .to_string();
        db.entries
            .set_raw_transcript(&id, "grateful for coffee")
            .await
            .unwrap();

        let found: serde_json::Value =
            reqwest::get(format!("{base}/entries/search?q=grat&type=brain-dump"))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        assert_eq!(found["total"], 1);
        assert_eq!(found["hasMore"], false);
        assert_eq!(found["entries"][0]["id"], id.as_str());

        let resp = reqwest::get(format!("{base}/entries/search?status=bogus"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }
}
