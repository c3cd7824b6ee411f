use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::AssessmentStatus;

/// One uploaded file in the collection under verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionFileInstance {
    pub id: Uuid,
    pub storage_key: String,
    pub filename: String,
    pub content_type: String,
    pub size: Option<i64>,
    pub description: Option<String>,
    /// Per-item check records, stored in their own table and merged in on
    /// load.
    #[serde(default)]
    pub file_checks: Vec<FileCheck>,
    pub created_at: DateTime<Utc>,
}

/// The outcome of checking one file against one item instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCheck {
    pub item_instance_id: Uuid,
    pub status: AssessmentStatus,
    pub status_reasoning: Option<String>,
    pub address_match: Option<bool>,
    pub detected_address: Option<String>,
    pub cost: Option<f64>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub cluster_number: Option<i64>,
}
