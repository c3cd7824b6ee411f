use sqlx::PgPool;
use std::sync::Arc;

use crate::services::queue::JobQueue;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<JobQueue>,
}

impl AppState {
    pub fn new(db: PgPool, queue: JobQueue) -> Self {
        Self {
            db,
            queue: Arc::new(queue),
        }
    }
}
