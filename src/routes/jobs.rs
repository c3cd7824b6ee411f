use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::log_queries::{self, JobLogEntry};
use crate::db::job_queries;
use crate::models::job::VerificationJob;
use crate::services::queue::JobMessage;
use crate::services::store::{JobStore, PgJobStore, StoreError};

/// GET /api/v1/jobs/{job_id}: the full job document, file checks included.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<VerificationJob>, StatusCode> {
    let store = PgJobStore::new(state.db.clone());
    match store.load(job_id).await {
        Ok(job) => Ok(Json(job)),
        Err(StoreError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "failed to load job");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Serialize)]
pub struct RequeueResponse {
    pub job_id: Uuid,
    pub status: String,
    pub message: String,
}

/// POST /api/v1/jobs/{job_id}/requeue: put an existing job back on the
/// queue for another processing run.
pub async fn requeue_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<RequeueResponse>, StatusCode> {
    match job_queries::get_job(&state.db, job_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "failed to look up job");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    let message = JobMessage {
        verification_job_id: job_id,
    };
    if let Err(e) = state.queue.enqueue(&message).await {
        tracing::error!(job_id = %job_id, error = %e, "failed to enqueue job");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    if let Err(e) = job_queries::touch_job(&state.db, job_id).await {
        tracing::error!(job_id = %job_id, error = %e, "failed to touch job after enqueue");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    Ok(Json(RequeueResponse {
        job_id,
        status: "queued".to_string(),
        message: "Verification job queued for processing".to_string(),
    }))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    pub limit: Option<i64>,
    pub level: Option<String>,
    pub search: Option<String>,
}

/// GET /api/v1/jobs/{job_id}/logs: the job's audit trail, newest first.
/// `level` filters on a log level, `search` on a message substring.
pub async fn get_job_logs(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(params): Query<LogsQuery>,
) -> Result<Json<Vec<JobLogEntry>>, StatusCode> {
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    match log_queries::list_entries(
        &state.db,
        job_id,
        limit,
        params.level.as_deref(),
        params.search.as_deref(),
    )
    .await
    {
        Ok(entries) => Ok(Json(entries)),
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "failed to list job logs");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
