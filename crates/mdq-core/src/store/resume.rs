//! Resume store: descriptors of jobs that have not reached a terminal state.

use sqlx::Row;

use super::db::{unix_timestamp_ms, StateDb};
use super::types::ResumeDescriptor;
use crate::error::Result;
use crate::job::{JobConfig, JobId, JobStatus};

impl StateDb {
    /// Inserts or refreshes a descriptor. Status and sequence id change over a
    /// job's life; url, snapshot and submission time do not.
    pub async fn persist_resume(&self, d: &ResumeDescriptor) -> Result<()> {
        let config_json = serde_json::to_string(&d.config)
            .map_err(|e| crate::error::EngineError::validation(format!("config snapshot: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO resume (job_id, url, status, config_json, sequence_id, submitted_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(job_id) DO UPDATE SET
                status = excluded.status,
                sequence_id = excluded.sequence_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(d.job_id.to_string())
        .bind(&d.url)
        .bind(d.status.as_str())
        .bind(config_json)
        .bind(d.sequence_id as i64)
        .bind(d.submitted_at)
        .bind(unix_timestamp_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn forget_resume(&self, id: &JobId) -> Result<()> {
        sqlx::query(r#"DELETE FROM resume WHERE job_id = ?1"#)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Every stored descriptor in submission order. Rows that cannot be decoded
    /// are skipped with a warning, never fatal.
    pub async fn load_pending(&self) -> Result<Vec<ResumeDescriptor>> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, url, status, config_json, sequence_id, submitted_at
            FROM resume
            ORDER BY submitted_at ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_id: String = row.try_get("job_id").unwrap_or_default();
            let Ok(job_id) = raw_id.parse::<JobId>() else {
                tracing::warn!(job_id = %raw_id, "skipping resume row with malformed id");
                continue;
            };
            let config_json: String = row.try_get("config_json").unwrap_or_default();
            let config = match serde_json::from_str::<JobConfig>(&config_json) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(job_id = %job_id, "skipping resume row with malformed config: {e}");
                    continue;
                }
            };
            let url: String = row.try_get("url").unwrap_or_default();
            if url.is_empty() {
                tracing::warn!(job_id = %job_id, "skipping resume row without url");
                continue;
            }
            let status_str: String = row.try_get("status").unwrap_or_default();
            let sequence_id: i64 = row.try_get("sequence_id").unwrap_or(0);
            let submitted_at: i64 = row.try_get("submitted_at").unwrap_or(0);
            out.push(ResumeDescriptor {
                job_id,
                url,
                status: JobStatus::parse(&status_str).unwrap_or(JobStatus::Pending),
                config,
                sequence_id: sequence_id.max(0) as u64,
                submitted_at,
            });
        }
        Ok(out)
    }
}
