//! History store: normalised URLs of completed jobs.

use sqlx::Row;

use super::db::{unix_timestamp_ms, StateDb};
use super::types::HistoryEntry;
use crate::error::Result;
use crate::url_model::normalize_url;

/// History key for `url`; unparseable input is kept verbatim (trimmed).
fn history_key(url: &str) -> String {
    normalize_url(url).unwrap_or_else(|_| url.trim().to_string())
}

impl StateDb {
    /// Records `url` as completed. Idempotent; refreshes the timestamp.
    pub async fn record_completed(&self, url: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO history (url, completed_at)
            VALUES (?1, ?2)
            ON CONFLICT(url) DO UPDATE SET completed_at = excluded.completed_at
            "#,
        )
        .bind(history_key(url))
        .bind(unix_timestamp_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn history_contains(&self, url: &str) -> Result<bool> {
        let row = sqlx::query(r#"SELECT 1 FROM history WHERE url = ?1"#)
            .bind(history_key(url))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// All entries, newest first.
    pub async fn history_list(&self) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT url, completed_at
            FROM history
            ORDER BY completed_at DESC, rowid DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(HistoryEntry {
                url: row.get("url"),
                completed_at: row.get("completed_at"),
            });
        }
        Ok(out)
    }

    /// Removes every entry. Returns the number removed.
    pub async fn history_clear(&self) -> Result<u64> {
        let r = sqlx::query(r#"DELETE FROM history"#)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// Removes one URL. Returns whether it was present.
    pub async fn history_remove(&self, url: &str) -> Result<bool> {
        let r = sqlx::query(r#"DELETE FROM history WHERE url = ?1"#)
            .bind(history_key(url))
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() > 0)
    }
}
