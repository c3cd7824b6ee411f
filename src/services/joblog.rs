//! Per-job audit trail.
//!
//! Processing steps record operator-visible log lines against the job they
//! belong to. Logging must never take a job down, so failures to persist a
//! line are traced and swallowed.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::log_queries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Sink for per-job log lines.
#[async_trait]
pub trait JobLog: Send + Sync {
    async fn log(&self, job_id: Uuid, level: LogLevel, message: &str);
}

/// Postgres-backed log sink.
pub struct PgJobLog {
    pool: PgPool,
}

impl PgJobLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobLog for PgJobLog {
    async fn log(&self, job_id: Uuid, level: LogLevel, message: &str) {
        if let Err(e) =
            log_queries::insert_entry(&self.pool, job_id, &level.to_string(), message).await
        {
            tracing::warn!(job_id = %job_id, error = %e, "failed to store job log entry");
        }
    }
}
