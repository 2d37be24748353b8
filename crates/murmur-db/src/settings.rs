//! Settings key/value repository implementation.
//!
//! Values are persisted as strings; decoding to the typed surface happens
//! in `murmur_core::settings` via its fixed key → type map.

use sqlx::{Pool, Row, Sqlite};

use murmur_core::{Result, Settings};

/// SQLite implementation of the settings repository.
#[derive(Clone)]
pub struct SettingsRepository {
    pool: Pool<Sqlite>,
}

impl SettingsRepository {
    /// Create a new SettingsRepository with the given connection pool.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Insert defaults for any key not already present. Existing values
    /// are never overwritten, so this is safe on every open.
    pub async fn seed_defaults(&self) -> Result<()> {
        for (key, value) in Settings::default().to_map() {
            sqlx::query("INSERT OR IGNORE INTO setting (key, value) VALUES (?, ?)")
                .bind(&key)
                .bind(&value)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Read the full typed settings surface.
    pub async fn get(&self) -> Result<Settings> {
        let rows = sqlx::query("SELECT key, value FROM setting")
            .fetch_all(&self.pool)
            .await?;

        let map = rows
            .into_iter()
            .map(|row| (row.get("key"), row.get("value")))
            .collect();

        Settings::from_map(&map)
    }

    /// Persist the full settings surface (upsert per key).
    pub async fn update(&self, settings: &Settings) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in settings.to_map() {
            sqlx::query(
                "INSERT INTO setting (key, value) VALUES (?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )
            .bind(&key)
            .bind(&value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
