//! Candidate photo selection.
//!
//! Before any model call, the collection's files are narrowed down to the
//! photos worth looking at: non-images are ignored, unfetchable or
//! undecodable files are skipped, byte-identical duplicates are dropped and
//! photos carrying a forbidden label are excluded. Every exclusion leaves a
//! line in the job's audit log.

use futures::future::join_all;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::file::CollectionFileInstance;
use crate::models::item::{ItemInstance, RuleEffect};
use crate::services::detector::{DetectorError, LabelDetector};
use crate::services::joblog::{JobLog, LogLevel};
use crate::services::storage::BlobStore;

/// Content types accepted as photos.
pub const ACCEPTED_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/jpg"];
/// A forbidden label only excludes a photo above this detector confidence.
const FORBIDDEN_CONFIDENCE: f64 = 70.0;

/// A photo that survived filtering, with its bytes already in hand.
#[derive(Debug, Clone)]
pub struct FilteredImage {
    pub file_id: Uuid,
    pub storage_key: String,
    pub bytes: Vec<u8>,
}

/// Collect the forbidden label names across all items, lowercased.
pub fn forbidden_labels(items: &[ItemInstance]) -> HashSet<String> {
    items
        .iter()
        .flat_map(|item| item.label_rules.iter())
        .filter(|rule| rule.effect == RuleEffect::Forbid)
        .flat_map(|rule| rule.labels.iter())
        .map(|label| label.to_lowercase())
        .collect()
}

pub struct PreFilter {
    blobs: Arc<dyn BlobStore>,
    detector: Arc<dyn LabelDetector>,
    log: Arc<dyn JobLog>,
}

impl PreFilter {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        detector: Arc<dyn LabelDetector>,
        log: Arc<dyn JobLog>,
    ) -> Self {
        Self {
            blobs,
            detector,
            log,
        }
    }

    /// Narrow `files` down to the photos that go to the model. Detection
    /// failures abort the job; everything else just excludes the file.
    pub async fn run(
        &self,
        job_id: Uuid,
        files: &[CollectionFileInstance],
        forbidden: &HashSet<String>,
    ) -> Result<Vec<FilteredImage>, DetectorError> {
        let mut candidates = Vec::new();
        for file in files {
            // content types are matched case-insensitively
            if !ACCEPTED_CONTENT_TYPES.contains(&file.content_type.to_ascii_lowercase().as_str()) {
                self.log
                    .log(
                        job_id,
                        LogLevel::Info,
                        &format!("File {} is not an image, ignoring it", file.storage_key),
                    )
                    .await;
                continue;
            }
            candidates.push(file);
        }

        let fetched = join_all(candidates.iter().map(|f| self.blobs.fetch(&f.storage_key))).await;

        let mut loaded = Vec::new();
        for (file, result) in candidates.iter().zip(fetched) {
            let bytes = match result {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    self.skip_unloadable(job_id, &file.storage_key).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(key = %file.storage_key, error = %e, "file fetch failed");
                    self.skip_unloadable(job_id, &file.storage_key).await;
                    continue;
                }
            };
            if image::load_from_memory(&bytes).is_err() {
                self.skip_unloadable(job_id, &file.storage_key).await;
                continue;
            }
            loaded.push(FilteredImage {
                file_id: file.id,
                storage_key: file.storage_key.clone(),
                bytes,
            });
        }

        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for img in loaded {
            let digest: [u8; 32] = Sha256::digest(&img.bytes).into();
            if !seen.insert(digest) {
                self.log
                    .log(
                        job_id,
                        LogLevel::Info,
                        &format!("Removing duplicate file {}", img.storage_key),
                    )
                    .await;
                continue;
            }
            unique.push(img);
        }

        if forbidden.is_empty() {
            return Ok(unique);
        }

        let detections = join_all(
            unique
                .iter()
                .map(|img| self.detector.detect(&img.bytes, true)),
        )
        .await;

        let mut kept = Vec::new();
        for (img, detection) in unique.into_iter().zip(detections) {
            let labels = detection?;
            let hit = labels
                .iter()
                .find(|l| forbidden.contains(&l.name.to_lowercase()) && l.confidence > FORBIDDEN_CONFIDENCE);
            match hit {
                Some(label) => {
                    self.log
                        .log(
                            job_id,
                            LogLevel::Info,
                            &format!(
                                "Removing {} due to label match: {}",
                                img.storage_key, label.name
                            ),
                        )
                        .await;
                }
                None => kept.push(img),
            }
        }

        Ok(kept)
    }

    async fn skip_unloadable(&self, job_id: Uuid, key: &str) {
        self.log
            .log(
                job_id,
                LogLevel::Warn,
                &format!("Could not load file {key}, skipping"),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::item::LabelRule;
    use chrono::Utc;

    fn item_with_rules(rules: Vec<LabelRule>) -> ItemInstance {
        ItemInstance {
            id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            name: "item".to_string(),
            description: String::new(),
            label_rules: rules,
            description_rules: vec![],
            status: crate::models::job::AssessmentStatus::Pending,
            confidence: None,
            assessment_reasoning: None,
            approved_files: vec![],
            cluster_number: None,
            agent_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn rule(labels: &[&str], effect: RuleEffect) -> LabelRule {
        LabelRule {
            id: Uuid::new_v4(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            effect,
            min_confidence: None,
            min_area_percent: None,
        }
    }

    #[test]
    fn forbidden_labels_are_lowercased_and_deduplicated() {
        let items = vec![
            item_with_rules(vec![rule(&["Weapon", "Alcohol"], RuleEffect::Forbid)]),
            item_with_rules(vec![rule(&["weapon", "Tobacco"], RuleEffect::Forbid)]),
        ];
        let forbidden = forbidden_labels(&items);
        assert_eq!(forbidden.len(), 3);
        assert!(forbidden.contains("weapon"));
        assert!(forbidden.contains("alcohol"));
        assert!(forbidden.contains("tobacco"));
    }

    #[test]
    fn require_rules_do_not_forbid() {
        let items = vec![item_with_rules(vec![
            rule(&["Logo"], RuleEffect::Require),
            rule(&["Weapon"], RuleEffect::Forbid),
        ])];
        let forbidden = forbidden_labels(&items);
        assert_eq!(forbidden.len(), 1);
        assert!(forbidden.contains("weapon"));
        assert!(!forbidden.contains("logo"));
    }

    #[test]
    fn no_rules_means_nothing_forbidden() {
        let items = vec![item_with_rules(vec![])];
        assert!(forbidden_labels(&items).is_empty());
    }
}
