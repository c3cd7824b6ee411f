//! Job document persistence.
//!
//! A job is loaded and saved as one document. File check records live in
//! their own table; `load` merges them into the files they belong to and
//! `save` writes them back alongside the job row in one transaction.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::db::job_queries;
use crate::models::file::FileCheck;
use crate::models::job::VerificationJob;

/// Load/save access to verification job documents.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self, job_id: Uuid) -> Result<VerificationJob, StoreError>;
    async fn save(&self, job: &VerificationJob) -> Result<(), StoreError>;
}

/// Postgres-backed job store.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn load(&self, job_id: Uuid) -> Result<VerificationJob, StoreError> {
        let mut job = job_queries::get_job(&self.pool, job_id)
            .await?
            .ok_or(StoreError::NotFound(job_id))?;

        let mut checks_by_file: HashMap<Uuid, Vec<FileCheck>> = HashMap::new();
        for (file_id, check) in job_queries::get_file_checks(&self.pool, job_id).await? {
            checks_by_file.entry(file_id).or_default().push(check);
        }
        for file in &mut job.files {
            file.file_checks = checks_by_file.remove(&file.id).unwrap_or_default();
        }

        Ok(job)
    }

    async fn save(&self, job: &VerificationJob) -> Result<(), StoreError> {
        let checks: Vec<(Uuid, FileCheck)> = job
            .files
            .iter()
            .flat_map(|f| f.file_checks.iter().map(|c| (f.id, c.clone())))
            .collect();

        let mut tx = self.pool.begin().await?;
        job_queries::save_job(&mut *tx, job).await?;
        job_queries::replace_file_checks(&mut *tx, job.id, &checks).await?;
        tx.commit().await?;

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Verification job {0} not found")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
