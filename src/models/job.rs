use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::file::CollectionFileInstance;
use super::item::ItemInstance;

/// Assessment lifecycle shared by jobs and item instances.
///
/// A single run moves a job Pending → Assessing → (Approved | Rejected |
/// Error). Error is terminal for that run; a requeue starts a fresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum AssessmentStatus {
    #[serde(rename = "Pending")]
    #[strum(serialize = "Pending")]
    Pending,
    #[serde(rename = "Assessing")]
    #[strum(serialize = "Assessing")]
    Assessing,
    #[serde(rename = "Approved")]
    #[strum(serialize = "Approved")]
    Approved,
    #[serde(rename = "Rejected")]
    #[strum(serialize = "Rejected")]
    Rejected,
    #[serde(rename = "Needs Review")]
    #[strum(serialize = "Needs Review")]
    NeedsReview,
    #[serde(rename = "Error")]
    #[strum(serialize = "Error")]
    Error,
}

/// One verification run: a collection's files evaluated against item
/// instances. The processor owns this document exclusively for the duration
/// of a run and writes it back wholesale at checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationJob {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub status: AssessmentStatus,
    #[serde(default)]
    pub items: Vec<ItemInstance>,
    #[serde(default)]
    pub files: Vec<CollectionFileInstance>,
    /// Aggregate confidence supplied by the job creator; the processor does
    /// not write this field.
    pub confidence: Option<f64>,
    /// Total model spend for the last run, in dollars.
    pub cost: Option<f64>,
    pub error_message: Option<String>,
    /// Allow description augmentation to reach out to the internet.
    #[serde(default)]
    pub search_internet: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
