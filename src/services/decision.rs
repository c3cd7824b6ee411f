//! Verdict validation, item annotation and status evaluation.
//!
//! Everything here is deterministic given the model's verdicts: the
//! transforms build fresh item records rather than mutating the job in
//! place, and the caller persists the result in one write at the end.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use crate::models::file::CollectionFileInstance;
use crate::models::item::ItemInstance;
use crate::models::job::{AssessmentStatus, VerificationJob};
use crate::models::verdict::{ItemVerdict, ModelUsage, VerdictOutcome};
use crate::services::joblog::{JobLog, LogLevel};

/// An item passes only when its match confidence reaches this floor.
pub const CONFIDENCE_FLOOR: f64 = 0.8;

#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    #[error("Model returned verdicts for unknown items: {}", .0.join(", "))]
    UnknownItems(Vec<String>),

    #[error("Verdict for item {item_id} references unknown position {position}")]
    UnknownPosition { item_id: String, position: String },
}

/// Confirmation pass over a provisionally approved item. Implementations
/// never fail; an empty outcome reads as "nothing confirmed".
#[async_trait]
pub trait SecondPass: Send + Sync {
    async fn confirm(
        &self,
        item: &ItemInstance,
        approved: &[CollectionFileInstance],
    ) -> VerdictOutcome;
}

/// The result of evaluating one job's verdicts.
#[derive(Debug)]
pub struct Evaluation {
    /// Items in persistence order: standalone first, then clusters by
    /// ascending cluster number.
    pub items: Vec<ItemInstance>,
    pub status: AssessmentStatus,
    pub second_pass_usage: ModelUsage,
    pub any_cluster_passed: bool,
    pub all_mandatory_standalone_passed: bool,
}

/// Reject the whole pass when the model answered for items the job does not
/// contain. A wrong id is a model fault the operator must see, not a miss.
pub fn validate_verdicts(
    job: &VerificationJob,
    verdicts: &[ItemVerdict],
) -> Result<(), DecisionError> {
    let known: HashSet<String> = job.items.iter().map(|i| i.id.to_string()).collect();
    let unknown: Vec<String> = verdicts
        .iter()
        .filter(|v| !known.contains(&v.item_id))
        .map(|v| v.item_id.clone())
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(DecisionError::UnknownItems(unknown))
    }
}

/// The first verdict answering for `item`, if any.
pub fn verdict_for<'a>(
    verdicts: &'a [ItemVerdict],
    item: &ItemInstance,
) -> Option<&'a ItemVerdict> {
    let id = item.id.to_string();
    verdicts.iter().find(|v| v.item_id == id)
}

/// Build annotated copies of every item from the first-pass verdicts.
///
/// A matched item takes the verdict's confidence and reasoning; its approved
/// files are resolved from grid positions only when the match is found with
/// confidence at or above the floor. Unmatched items are cleared. Item
/// status is untouched here; [`evaluate`] assigns it.
pub fn annotate_items(
    items: &[ItemInstance],
    files: &[CollectionFileInstance],
    verdicts: &[ItemVerdict],
    positions: &HashMap<String, Uuid>,
) -> Result<Vec<ItemInstance>, DecisionError> {
    let now = Utc::now();
    items
        .iter()
        .map(|item| {
            let mut annotated = item.clone();
            annotated.updated_at = now;
            match verdict_for(verdicts, item) {
                Some(verdict) => {
                    annotated.confidence = verdict.confidence;
                    annotated.assessment_reasoning = Some(verdict.reasoning.clone());
                    annotated.approved_files = if verdict.image_found
                        && verdict.confidence.is_some_and(|c| c >= CONFIDENCE_FLOOR)
                    {
                        let mut resolved = HashSet::new();
                        for position in &verdict.file_ids {
                            let file_id = positions.get(position).ok_or_else(|| {
                                DecisionError::UnknownPosition {
                                    item_id: verdict.item_id.clone(),
                                    position: position.clone(),
                                }
                            })?;
                            resolved.insert(*file_id);
                        }
                        files
                            .iter()
                            .filter(|f| resolved.contains(&f.id))
                            .cloned()
                            .collect()
                    } else {
                        Vec::new()
                    };
                }
                None => {
                    annotated.confidence = None;
                    annotated.assessment_reasoning = None;
                    annotated.approved_files = Vec::new();
                }
            }
            Ok(annotated)
        })
        .collect()
}

/// Whether an annotated item fails the first pass outright.
pub fn first_pass_failed(item: &ItemInstance, verdict: Option<&ItemVerdict>) -> bool {
    let Some(verdict) = verdict else {
        return true;
    };
    if !verdict.image_found {
        return true;
    }
    if verdict.confidence.is_some_and(|c| c < CONFIDENCE_FLOOR) {
        return true;
    }
    item.approved_files.is_empty()
}

/// Evaluate annotated items into final per-item statuses and the job status.
///
/// Standalone items gate the job through their mandatory rules. Cluster
/// items are grouped by cluster number; a cluster counts as passed when none
/// of its mandatory items failed the first pass, and the job needs at least
/// one passing cluster (or no clusters at all). Every item that survives the
/// first pass is confirmed by the second pass when one is configured, but
/// for cluster items that confirmation only affects their own status, never
/// the cluster outcome.
pub async fn evaluate(
    job_id: Uuid,
    annotated: Vec<ItemInstance>,
    verdicts: &[ItemVerdict],
    second_pass: Option<&dyn SecondPass>,
    log: &dyn JobLog,
) -> Evaluation {
    let mut second_pass_usage = ModelUsage::default();
    let mut all_mandatory_standalone_passed = true;
    let mut any_cluster_passed = false;

    let mut standalone = Vec::new();
    let mut clusters: BTreeMap<i64, Vec<ItemInstance>> = BTreeMap::new();
    for item in annotated {
        match item.cluster_number {
            Some(n) => clusters.entry(n).or_default().push(item),
            None => standalone.push(item),
        }
    }
    let had_clusters = !clusters.is_empty();

    for item in &mut standalone {
        let verdict = verdict_for(verdicts, item);
        if first_pass_failed(item, verdict) {
            item.status = AssessmentStatus::Rejected;
            if item.is_mandatory() {
                all_mandatory_standalone_passed = false;
            }
        } else if let Some(sp) = second_pass {
            let confirmed = confirm_item(item, sp, &mut second_pass_usage).await;
            if !confirmed && item.is_mandatory() {
                all_mandatory_standalone_passed = false;
            }
        } else {
            item.status = AssessmentStatus::Approved;
        }
    }

    for (cluster_number, items) in &mut clusters {
        let mut any_mandatory_failed = false;
        for item in items.iter_mut() {
            let verdict = verdict_for(verdicts, item);
            if first_pass_failed(item, verdict) {
                item.status = AssessmentStatus::Rejected;
                log.log(
                    job_id,
                    LogLevel::Info,
                    &format!(
                        "Item {} in cluster {} rejected due to cluster rule",
                        item.id, cluster_number
                    ),
                )
                .await;
                if item.is_mandatory() {
                    any_mandatory_failed = true;
                }
            } else if let Some(sp) = second_pass {
                confirm_item(item, sp, &mut second_pass_usage).await;
            } else {
                item.status = AssessmentStatus::Approved;
            }
        }
        if !any_mandatory_failed {
            any_cluster_passed = true;
        }
    }

    let status = if (any_cluster_passed || !had_clusters) && all_mandatory_standalone_passed {
        AssessmentStatus::Approved
    } else {
        AssessmentStatus::Rejected
    };

    let mut items = standalone;
    for (_, cluster_items) in clusters {
        items.extend(cluster_items);
    }

    Evaluation {
        items,
        status,
        second_pass_usage,
        any_cluster_passed,
        all_mandatory_standalone_passed,
    }
}

/// Run the confirmation pass for one item and settle its status from the
/// result. Returns whether the item was confirmed.
async fn confirm_item(
    item: &mut ItemInstance,
    second_pass: &dyn SecondPass,
    usage: &mut ModelUsage,
) -> bool {
    let outcome = second_pass.confirm(item, &item.approved_files).await;
    *usage += outcome.usage;

    let confirmations: Vec<&str> = outcome
        .verdicts
        .iter()
        .filter(|v| v.image_found)
        .map(|v| v.reasoning.as_str())
        .collect();

    if !confirmations.is_empty() {
        item.status = AssessmentStatus::Approved;
        item.assessment_reasoning = Some(confirmations.join(" "));
        true
    } else {
        item.status = AssessmentStatus::Rejected;
        let denials: Vec<&str> = outcome
            .verdicts
            .iter()
            .filter(|v| !v.image_found)
            .map(|v| v.reasoning.as_str())
            .collect();
        if !denials.is_empty() {
            item.assessment_reasoning = Some(denials.join(" "));
        }
        false
    }
}
