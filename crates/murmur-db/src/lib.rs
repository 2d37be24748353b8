//! # murmur-db
//!
//! SQLite persistence layer for murmur.
//!
//! This crate provides:
//! - Connection pool management (WAL mode, foreign keys, busy timeout)
//! - Repository implementations for entries, links, and settings
//! - Full-text search over transcripts and generated sections (FTS5)
//!
//! The schema is created idempotently on open; there is no external
//! migration directory because the store is a single embedded file owned
//! by this process.
//!
//! ## Example
//!
//! ```rust,ignore
//! use murmur_db::Database;
//!
//! let db = Database::open("murmur.db").await?;
//! let entry = db.entries.create(NewEntry { .. }).await?;
//! ```

pub mod entries;
pub mod links;
pub mod search;
pub mod settings;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::info;

use murmur_core::Result;

pub use entries::{EntryRepository, NewEntry};
pub use links::LinkRepository;
pub use search::SearchRepository;
pub use settings::SettingsRepository;

// Re-export core types
pub use murmur_core::*;

/// Escape LIKE wildcard characters (`%`, `_`, `\`) in user input.
pub fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Schema statements, applied in order on every open. All idempotent.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS entry (
        id                        TEXT PRIMARY KEY,
        created_at                TEXT NOT NULL,
        updated_at                TEXT NOT NULL,
        timezone                  TEXT NOT NULL,
        entry_date                TEXT NOT NULL,
        entry_type                TEXT NOT NULL,
        stage                     TEXT NOT NULL,
        stage_message             TEXT,
        error_message             TEXT,
        locked_by                 TEXT,
        locked_at                 TEXT,
        heartbeat_at              TEXT,
        original_audio_path       TEXT,
        normalized_audio_path     TEXT,
        audio_duration_secs       REAL,
        raw_transcript            TEXT,
        raw_transcript_locked_at  TEXT,
        edited_transcript         TEXT,
        prompt_answers            TEXT NOT NULL DEFAULT '{}',
        generated_sections        TEXT NOT NULL DEFAULT '{}',
        note_path                 TEXT,
        note_mtime                TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_entry_stage_created
        ON entry (stage, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_entry_heartbeat
        ON entry (stage, heartbeat_at)",
    "CREATE TABLE IF NOT EXISTS entry_link (
        source_id   TEXT NOT NULL REFERENCES entry(id) ON DELETE CASCADE,
        target_id   TEXT NOT NULL REFERENCES entry(id) ON DELETE CASCADE,
        link_type   TEXT NOT NULL,
        created_at  TEXT NOT NULL,
        PRIMARY KEY (source_id, target_id, link_type)
    )",
    "CREATE INDEX IF NOT EXISTS idx_entry_link_target
        ON entry_link (target_id)",
    "CREATE TABLE IF NOT EXISTS setting (
        key    TEXT PRIMARY KEY,
        value  TEXT NOT NULL
    )",
    // One FTS row per entry, refreshed by the repository inside the same
    // transaction as any write to the indexed columns.
    "CREATE VIRTUAL TABLE IF NOT EXISTS entry_fts USING fts5(
        entry_id UNINDEXED,
        content
    )",
];

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: Pool<Sqlite>,
    /// Entry repository: CRUD, queue queries, lease management.
    pub entries: EntryRepository,
    /// Entry link repository.
    pub links: LinkRepository,
    /// Settings key/value repository.
    pub settings: SettingsRepository,
    /// Full-text search over transcripts and generated sections.
    pub search: SearchRepository,
}

impl Database {
    /// Open (creating if missing) the database file and build the
    /// repository set. Applies WAL mode and the idempotent schema.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(murmur_core::Error::Database)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self::from_pool(pool);
        db.apply_schema().await?;
        db.settings.seed_defaults().await?;
        info!(path, "Database opened");
        Ok(db)
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(murmur_core::Error::Database)?
            .foreign_keys(true);

        // A single connection: every handle must see the same in-memory db.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self::from_pool(pool);
        db.apply_schema().await?;
        db.settings.seed_defaults().await?;
        Ok(db)
    }

    fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self {
            entries: EntryRepository::new(pool.clone()),
            links: LinkRepository::new(pool.clone()),
            settings: SettingsRepository::new(pool.clone()),
            search: SearchRepository::new(pool.clone()),
            pool,
        }
    }

    async fn apply_schema(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}
