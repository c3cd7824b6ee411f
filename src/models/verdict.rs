//! Model response types for a verification pass.

use serde::{Deserialize, Serialize};

/// One item's verdict as returned by the vision model.
///
/// `item_id` is kept as a string rather than a parsed UUID so that an id the
/// model invented still reaches validation instead of failing deserialization.
/// `file_ids` hold grid position indices ("0", "1", ...) which are resolved
/// back to file ids through the position map built during tiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemVerdict {
    pub item_id: String,
    #[serde(default)]
    pub file_ids: Vec<String>,
    #[serde(default)]
    pub image_found: bool,
    #[serde(default)]
    pub reasoning: String,
    pub confidence: Option<f64>,
    pub location: Option<String>,
}

/// The full response payload of one verification pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerdictSet {
    #[serde(default)]
    pub items: Vec<ItemVerdict>,
}

/// What one verification pass produced: the verdicts plus the tokens spent
/// getting them.
#[derive(Debug, Clone, Default)]
pub struct VerdictOutcome {
    pub verdicts: Vec<ItemVerdict>,
    pub usage: ModelUsage,
}

/// Token counts consumed by model calls, accumulated across retries and
/// passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl ModelUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::AddAssign for ModelUsage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}
