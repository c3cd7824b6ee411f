use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// One stored log line for a verification job.
#[derive(Debug, Clone, Serialize)]
pub struct JobLogEntry {
    pub id: Uuid,
    pub verification_job_id: Uuid,
    pub ts: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

/// Insert a single log line
pub async fn insert_entry(
    pool: &PgPool,
    job_id: Uuid,
    level: &str,
    message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO verification_job_logs (verification_job_id, level, message)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(job_id)
    .bind(level)
    .bind(message)
    .execute(pool)
    .await?;

    Ok(())
}

/// List log lines for a job, newest first. `level` filters on an exact
/// level (matched case-insensitively), `search` on a message substring.
pub async fn list_entries(
    pool: &PgPool,
    job_id: Uuid,
    limit: i64,
    level: Option<&str>,
    search: Option<&str>,
) -> Result<Vec<JobLogEntry>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, verification_job_id, ts, level, message
        FROM verification_job_logs
        WHERE verification_job_id = $1
          AND ($2::text IS NULL OR level = $2)
          AND ($3::text IS NULL OR message ILIKE '%' || $3 || '%')
        ORDER BY ts DESC
        LIMIT $4
        "#,
    )
    .bind(job_id)
    .bind(level.map(|l| l.to_uppercase()))
    .bind(search)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            Ok(JobLogEntry {
                id: r.try_get("id")?,
                verification_job_id: r.try_get("verification_job_id")?,
                ts: r.try_get("ts")?,
                level: r.try_get("level")?,
                message: r.try_get("message")?,
            })
        })
        .collect()
}
