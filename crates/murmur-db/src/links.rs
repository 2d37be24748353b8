//! Entry link repository implementation.

use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};

use murmur_core::{EntryLink, Error, LinkType, Result};

/// SQLite implementation of the entry link repository.
///
/// Links are a directed edge set keyed by (source, target, type); the
/// composite primary key makes inserts idempotent.
#[derive(Clone)]
pub struct LinkRepository {
    pool: Pool<Sqlite>,
}

impl LinkRepository {
    /// Create a new LinkRepository with the given connection pool.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Add a directed link. Re-adding an existing edge is a no-op.
    pub async fn add(
        &self,
        source_id: &str,
        target_id: &str,
        link_type: LinkType,
    ) -> Result<EntryLink> {
        if source_id == target_id {
            return Err(Error::InvalidInput(
                "An entry cannot link to itself".to_string(),
            ));
        }
        for id in [source_id, target_id] {
            let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entry WHERE id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
            if exists == 0 {
                return Err(Error::EntryNotFound(id.to_string()));
            }
        }

        let now = Utc::now();
        sqlx::query(
            "INSERT OR IGNORE INTO entry_link (source_id, target_id, link_type, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(source_id)
        .bind(target_id)
        .bind(link_type.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(EntryLink {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            link_type,
            created_at: now,
        })
    }

    /// Remove a directed link. Removing a missing edge is a no-op.
    pub async fn remove(
        &self,
        source_id: &str,
        target_id: &str,
        link_type: LinkType,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM entry_link
             WHERE source_id = ? AND target_id = ? AND link_type = ?",
        )
        .bind(source_id)
        .bind(target_id)
        .bind(link_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// List the links touching an entry from either side, newest first.
    pub async fn list_for_entry(&self, id: &str) -> Result<Vec<EntryLink>> {
        let rows = sqlx::query(
            "SELECT source_id, target_id, link_type, created_at FROM entry_link
             WHERE source_id = ? OR target_id = ?
             ORDER BY created_at DESC",
        )
        .bind(id)
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let link_type: String = row.get("link_type");
                Ok(EntryLink {
                    source_id: row.get("source_id"),
                    target_id: row.get("target_id"),
                    link_type: LinkType::parse(&link_type)?,
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }
}
