//! Full-text search implementation.
//!
//! Bare terms are whitespace-split; each token becomes a quoted prefix
//! query and the tokens are AND'ed, so `gra cof` matches an entry whose
//! indexed text contains both "gratitude" and "coffee". Filters narrow by
//! entry kind, stage class, and entry-date range. Results paginate with a
//! total count and a has-more flag.

use sqlx::{Pool, Row, Sqlite};

use murmur_core::{Result, SearchRequest, SearchResponse, StageClass};

use crate::entries::parse_entry_row;

/// Full-text search provider over the entry FTS index.
#[derive(Clone)]
pub struct SearchRepository {
    pool: Pool<Sqlite>,
}

/// Build the FTS5 MATCH expression for a bare term, or None when the
/// term has no usable tokens.
fn build_match_query(term: &str) -> Option<String> {
    let tokens: Vec<String> = term
        .split_whitespace()
        .map(|t| t.replace('"', ""))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\"*"))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" AND "))
    }
}

/// SQL condition for a stage class. These are fixed stage literals, not
/// caller input.
fn stage_class_condition(class: StageClass) -> &'static str {
    match class {
        StageClass::Active => "e.stage NOT IN ('completed', 'failed', 'cancelled')",
        StageClass::Done => "e.stage = 'completed'",
        StageClass::Failed => "e.stage IN ('failed', 'cancelled')",
    }
}

impl SearchRepository {
    /// Create a new SearchRepository with the given connection pool.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run a filtered, paginated search.
    pub async fn search(&self, req: &SearchRequest) -> Result<SearchResponse> {
        let match_expr = req.query.as_deref().and_then(build_match_query);

        let mut conditions: Vec<String> = Vec::new();
        if match_expr.is_some() {
            conditions.push("entry_fts MATCH ?".to_string());
        }
        if req.entry_type.is_some() {
            conditions.push("e.entry_type = ?".to_string());
        }
        if let Some(class) = req.status {
            conditions.push(stage_class_condition(class).to_string());
        }
        if req.date_from.is_some() {
            conditions.push("e.entry_date >= ?".to_string());
        }
        if req.date_to.is_some() {
            conditions.push("e.entry_date <= ?".to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let from_clause = if match_expr.is_some() {
            "FROM entry_fts JOIN entry e ON e.id = entry_fts.entry_id"
        } else {
            "FROM entry e"
        };

        let count_sql = format!("SELECT COUNT(*) AS n {from_clause} {where_clause}");
        let page_sql = format!(
            "SELECT e.* {from_clause} {where_clause}
             ORDER BY e.created_at DESC LIMIT ? OFFSET ?"
        );

        let mut count_query = sqlx::query(&count_sql);
        if let Some(ref m) = match_expr {
            count_query = count_query.bind(m);
        }
        if let Some(kind) = req.entry_type {
            count_query = count_query.bind(kind.as_str());
        }
        if let Some(from) = req.date_from {
            count_query = count_query.bind(from);
        }
        if let Some(to) = req.date_to {
            count_query = count_query.bind(to);
        }
        let total: i64 = count_query.fetch_one(&self.pool).await?.get("n");

        let mut page_query = sqlx::query(&page_sql);
        if let Some(ref m) = match_expr {
            page_query = page_query.bind(m);
        }
        if let Some(kind) = req.entry_type {
            page_query = page_query.bind(kind.as_str());
        }
        if let Some(from) = req.date_from {
            page_query = page_query.bind(from);
        }
        if let Some(to) = req.date_to {
            page_query = page_query.bind(to);
        }
        let rows = page_query
            .bind(req.limit)
            .bind(req.offset)
            .fetch_all(&self.pool)
            .await?;

        let entries = rows
            .iter()
            .map(parse_entry_row)
            .collect::<Result<Vec<_>>>()?;

        let has_more = (req.offset + entries.len() as i64) < total;

        Ok(SearchResponse {
            entries,
            total,
            has_more,
        })
    }
}
