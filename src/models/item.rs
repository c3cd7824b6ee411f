use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::file::CollectionFileInstance;
use super::job::AssessmentStatus;

/// What a label rule does to images carrying its labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleEffect {
    /// The label must appear; the rule text rides along in the item listing
    /// given to the vision model.
    Require,
    /// Images carrying the label are excluded before model invocation.
    #[default]
    Forbid,
}

/// An object-label rule applied to an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelRule {
    pub id: Uuid,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub effect: RuleEffect,
    pub min_confidence: Option<f64>,
    /// Minimum fraction of the image the labeled object must occupy.
    pub min_area_percent: Option<f64>,
}

/// A free-text requirement evaluated by the vision model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptionRule {
    pub id: Uuid,
    pub description: String,
    pub min_confidence: Option<f64>,
    /// A failing mandatory rule fails its owning item's gate unconditionally.
    #[serde(default)]
    pub mandatory: bool,
}

/// One verification requirement inside a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemInstance {
    pub id: Uuid,
    /// The source item this instance was created from.
    pub item_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub label_rules: Vec<LabelRule>,
    #[serde(default)]
    pub description_rules: Vec<DescriptionRule>,
    pub status: AssessmentStatus,
    pub confidence: Option<f64>,
    pub assessment_reasoning: Option<String>,
    /// Files the model grounded its match on, resolved from position indices.
    #[serde(default)]
    pub approved_files: Vec<CollectionFileInstance>,
    /// Items sharing a cluster number are evaluated as a group; None means
    /// standalone. Set at job creation, never altered by the processor.
    pub cluster_number: Option<i64>,
    /// Agents used to augment the description text before the model call.
    #[serde(default)]
    pub agent_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ItemInstance {
    /// An item is mandatory when any of its description rules is.
    pub fn is_mandatory(&self) -> bool {
        self.description_rules.iter().any(|rule| rule.mandatory)
    }
}
