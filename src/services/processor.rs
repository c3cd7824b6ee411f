//! Verification job orchestration.
//!
//! One `process` call takes a job from Pending to a terminal status: mark it
//! Assessing, narrow the files down, tile them, run the model pass (plus the
//! optional confirmation pass), evaluate the verdicts and persist the
//! outcome in a single save. Any failure along the way parks the job in
//! Error with the cause on the record.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::models::item::ItemInstance;
use crate::models::job::{AssessmentStatus, VerificationJob};
use crate::services::augment::Augmenter;
use crate::services::decision::{self, DecisionError, SecondPass};
use crate::services::detector::DetectorError;
use crate::services::joblog::{JobLog, LogLevel};
use crate::services::prefilter::{self, PreFilter};
use crate::services::settings::Settings;
use crate::services::storage::BlobStore;
use crate::services::store::{JobStore, StoreError};
use crate::services::tiling::{self, GridBatch};
use crate::services::vision::{
    self, SecondPassVerifier, VisionModel, VisionRequest, MAX_IMAGES_PER_MESSAGE,
};

pub struct JobProcessor {
    store: Arc<dyn JobStore>,
    prefilter: PreFilter,
    blobs: Arc<dyn BlobStore>,
    model: Arc<dyn VisionModel>,
    augmenter: Arc<dyn Augmenter>,
    settings: Arc<dyn Settings>,
    log: Arc<dyn JobLog>,
}

impl JobProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn JobStore>,
        prefilter: PreFilter,
        blobs: Arc<dyn BlobStore>,
        model: Arc<dyn VisionModel>,
        augmenter: Arc<dyn Augmenter>,
        settings: Arc<dyn Settings>,
        log: Arc<dyn JobLog>,
    ) -> Self {
        Self {
            store,
            prefilter,
            blobs,
            model,
            augmenter,
            settings,
            log,
        }
    }

    /// Process one job end to end. A missing job propagates without
    /// touching the store; any later failure parks the job in Error.
    pub async fn process(&self, job_id: Uuid) -> Result<AssessmentStatus, ProcessError> {
        self.log
            .log(job_id, LogLevel::Info, "Starting verification job processing")
            .await;
        let started = Instant::now();
        let mut job = self.store.load(job_id).await?;

        match self.run(&mut job).await {
            Ok(status) => {
                metrics::counter!("verification_jobs_processed").increment(1);
                match status {
                    AssessmentStatus::Approved => {
                        metrics::counter!("verification_jobs_approved").increment(1)
                    }
                    AssessmentStatus::Rejected => {
                        metrics::counter!("verification_jobs_rejected").increment(1)
                    }
                    _ => {}
                }
                metrics::histogram!("verification_processing_seconds")
                    .record(started.elapsed().as_secs_f64());
                Ok(status)
            }
            Err(e) => {
                self.log
                    .log(
                        job_id,
                        LogLevel::Error,
                        &format!("Error processing job {job_id}: {e}"),
                    )
                    .await;
                job.status = AssessmentStatus::Error;
                job.error_message = Some(e.to_string());
                job.updated_at = Utc::now();
                if let Err(save_err) = self.store.save(&job).await {
                    tracing::error!(job_id = %job_id, error = %save_err, "could not persist error status");
                }
                metrics::counter!("verification_jobs_errored").increment(1);
                Err(e)
            }
        }
    }

    async fn run(&self, job: &mut VerificationJob) -> Result<AssessmentStatus, ProcessError> {
        job.status = AssessmentStatus::Assessing;
        job.updated_at = Utc::now();
        self.store.save(job).await?;

        let settings = self.settings.load().await.map_err(ProcessError::Settings)?;

        self.log
            .log(job.id, LogLevel::Info, "Checking for labelling rules")
            .await;
        let forbidden = prefilter::forbidden_labels(&job.items);
        self.log
            .log(
                job.id,
                LogLevel::Info,
                &format!("{} labels to check", forbidden.len()),
            )
            .await;

        let images = self.prefilter.run(job.id, &job.files, &forbidden).await?;

        let standalone_count = job.items.iter().filter(|i| i.cluster_number.is_none()).count();
        let cluster_count = job
            .items
            .iter()
            .filter_map(|i| i.cluster_number)
            .collect::<HashSet<_>>()
            .len();
        self.log
            .log(
                job.id,
                LogLevel::Info,
                &format!("Verifying {standalone_count} standalone items and {cluster_count} clusters"),
            )
            .await;

        let mut listing_parts = Vec::with_capacity(job.items.len());
        for item in &job.items {
            let mut line = listing_line(item);
            if !item.agent_ids.is_empty() {
                line = self
                    .augmenter
                    .augment(&line, &item.agent_ids, job.search_internet)
                    .await;
            }
            listing_parts.push(line);
        }

        let sources: Vec<(Uuid, Vec<u8>)> =
            images.into_iter().map(|img| (img.file_id, img.bytes)).collect();
        let GridBatch {
            composites,
            positions,
        } = tiling::compose_grids(&sources, MAX_IMAGES_PER_MESSAGE)?;

        self.log
            .log(
                job.id,
                LogLevel::Info,
                &format!(
                    "Calling model with {} files for {} items",
                    sources.len(),
                    job.items.len()
                ),
            )
            .await;

        let request = VisionRequest {
            model_id: settings.model_id.clone(),
            system: settings.system_prompt.clone(),
            user_text: wrap_listing(&listing_parts.join("\n")),
            composites,
        };
        let first_pass = self.model.verify(request).await;
        self.log
            .log(job.id, LogLevel::Info, "Model verification pass complete")
            .await;

        decision::validate_verdicts(job, &first_pass.verdicts)?;
        let annotated =
            decision::annotate_items(&job.items, &job.files, &first_pass.verdicts, &positions)?;

        let verifier;
        let second_pass: Option<&dyn SecondPass> = if settings.second_pass_enabled {
            verifier = SecondPassVerifier::new(
                self.blobs.clone(),
                self.model.clone(),
                settings.model_id.clone(),
            );
            Some(&verifier)
        } else {
            None
        };

        let eval = decision::evaluate(
            job.id,
            annotated,
            &first_pass.verdicts,
            second_pass,
            self.log.as_ref(),
        )
        .await;

        let mut usage = first_pass.usage;
        usage += eval.second_pass_usage;

        job.items = eval.items;
        job.status = eval.status;
        job.cost = Some(vision::usage_cost(&settings.model_id, &usage));
        job.updated_at = Utc::now();

        self.log
            .log(
                job.id,
                LogLevel::Info,
                &format!(
                    "Final status: {} (any_cluster_passed={}, all_mandatory_standalone_passed={})",
                    eval.status, eval.any_cluster_passed, eval.all_mandatory_standalone_passed
                ),
            )
            .await;

        self.store.save(job).await?;

        self.log
            .log(
                job.id,
                LogLevel::Info,
                &format!("Job {} processed successfully with status {}", job.id, job.status),
            )
            .await;

        Ok(eval.status)
    }
}

/// One item's line in the listing shown to the model.
fn listing_line(item: &ItemInstance) -> String {
    let rule_text = if item.description_rules.is_empty() {
        "N/A".to_string()
    } else {
        item.description_rules
            .iter()
            .map(|r| r.description.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "Item id: {}\nItem description: {} - {} . {}",
        item.id, item.name, item.description, rule_text
    )
}

fn wrap_listing(listing: &str) -> String {
    format!(
        "Here is the list of items. We are looking for images that match these items, \
         these images may not be present, so do not make up any details.\n<Items>\n{listing}\n</Items>"
    )
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("Label detection failed: {0}")]
    Detector(#[from] DetectorError),

    #[error("{0}")]
    Decision(#[from] DecisionError),

    #[error("Composite construction failed: {0}")]
    Compose(#[from] image::ImageError),

    #[error("Could not load settings: {0}")]
    Settings(sqlx::Error),
}
