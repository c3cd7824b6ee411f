use photo_verify::{
    config::AppConfig,
    db,
    services::{
        augment::{AgentAugmenter, Augmenter},
        detector::{DetectorClient, LabelDetector},
        joblog::{JobLog, PgJobLog},
        prefilter::PreFilter,
        processor::JobProcessor,
        queue::{JobQueue, QueueError},
        settings::{PgSettings, Settings},
        storage::{BlobStore, BucketClient},
        store::{JobStore, PgJobStore},
        vision::{CredentialCache, VisionClient, VisionModel},
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second
const BATCH_SIZE: usize = 10;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting verification worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let blobs: Arc<dyn BlobStore> = Arc::new(
        BucketClient::new(
            &config.storage_bucket,
            &config.storage_endpoint,
            &config.storage_region,
            &config.storage_access_key,
            &config.storage_secret_key,
        )
        .expect("Failed to initialize storage client"),
    );

    let detector: Arc<dyn LabelDetector> = Arc::new(DetectorClient::new(
        config.detector_url.clone(),
        config.detector_api_token.clone(),
    ));

    let credentials = CredentialCache::new(
        config.model_api_token.clone(),
        config.model_token_url.clone(),
    );
    let model: Arc<dyn VisionModel> =
        Arc::new(VisionClient::new(config.model_url.clone(), credentials));

    let augmenter: Arc<dyn Augmenter> = Arc::new(AgentAugmenter::new(
        db_pool.clone(),
        config.agent_gateway_url.clone(),
    ));
    let settings: Arc<dyn Settings> = Arc::new(PgSettings::new(db_pool.clone()));
    let log: Arc<dyn JobLog> = Arc::new(PgJobLog::new(db_pool.clone()));
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db_pool.clone()));

    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    let prefilter = PreFilter::new(blobs.clone(), detector, log.clone());
    let processor = JobProcessor::new(store, prefilter, blobs, model, augmenter, settings, log);

    tracing::info!("Worker ready, starting job processing loop");

    // Main processing loop
    loop {
        match process_batch(&queue, &processor).await {
            Ok(0) => {
                if let Ok(depth) = queue.queue_depth().await {
                    metrics::gauge!("verification_queue_depth").set(depth as f64);
                }
                tracing::trace!("No jobs available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Ok(handled) => {
                tracing::debug!(handled, "Batch complete, checking for next batch");
            }
            Err(e) => {
                tracing::error!(error = %e, "Error draining queue, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Drain up to `BATCH_SIZE` messages from the queue.
/// Returns how many messages were handled.
async fn process_batch(queue: &JobQueue, processor: &JobProcessor) -> Result<usize, QueueError> {
    let batch = queue.dequeue_batch(BATCH_SIZE).await?;
    let handled = batch.len();

    for message in batch {
        let job_id = message.verification_job_id;
        tracing::info!(job_id = %job_id, "Processing verification job");

        match processor.process(job_id).await {
            Ok(status) => {
                tracing::info!(job_id = %job_id, status = %status, "Job completed");
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Job ended in error");
            }
        }

        // the job record owns its terminal status; the message is done
        // either way and never redelivers
        queue.complete(&message).await?;
    }

    Ok(handled)
}
