//! Runtime-tunable processing settings.
//!
//! The model id, system prompt and second-pass switch live in the
//! `runtime_config` table so operators can change them without a deploy.
//! Missing rows fall back to the built-in defaults.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::config_queries;

pub const CONFIG_MODEL_ID: &str = "model_id";
pub const CONFIG_SYSTEM_PROMPT: &str = "system_prompt";
pub const CONFIG_SECOND_PASS: &str = "verification_second_pass";

pub const DEFAULT_MODEL_ID: &str = "anthropic.claude-3-5-sonnet-20241022-v2:0";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a visual compliance reviewer. You will receive one or more composite images. Each composite shows several photos arranged in a grid over a thatched background pattern, and every photo has its position number printed beneath it as 'ID: <n>'. For each item in the list you are given, decide whether any photo shows that item. Respond with JSON of the form {\"items\": [...]} where each entry has: item_id (the item's id), file_ids (the position numbers of the matching photos, as strings), image_found (whether a matching photo exists), reasoning (a short explanation), confidence (a number from 0 to 1, or null when you cannot judge) and location (where in the photo the item appears, or null). Only report what is actually visible in the photos. If no photo matches an item, say so instead of guessing.";

/// Prompt for the confirmation pass. Deliberately not configurable: the
/// pass exists to cross-check the first one, so it keeps its own wording.
pub const SECOND_PASS_PROMPT: &str = "You are double-checking an earlier review. You will receive composite images containing only the photos that were approved for a single item, each photo labelled with its position number as 'ID: <n>', plus that item's description. Confirm whether the photos really show the described item. Respond with JSON of the form {\"items\": [...]} where each entry has item_id, file_ids, image_found, reasoning, confidence and location. Be strict: set image_found only when a photo clearly shows the item.";

/// The settings one processing run operates under.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub model_id: String,
    pub system_prompt: String,
    pub second_pass_enabled: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            second_pass_enabled: false,
        }
    }
}

/// Source of per-run settings.
#[async_trait]
pub trait Settings: Send + Sync {
    async fn load(&self) -> Result<RunSettings, sqlx::Error>;
}

/// Settings backed by the `runtime_config` table.
pub struct PgSettings {
    pool: PgPool,
}

impl PgSettings {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Settings for PgSettings {
    async fn load(&self) -> Result<RunSettings, sqlx::Error> {
        let model_id = config_queries::active_value(&self.pool, CONFIG_MODEL_ID)
            .await?
            .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string());
        let system_prompt = config_queries::active_value(&self.pool, CONFIG_SYSTEM_PROMPT)
            .await?
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let second_pass_enabled = config_queries::active_value(&self.pool, CONFIG_SECOND_PASS)
            .await?
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(RunSettings {
            model_id,
            system_prompt,
            second_pass_enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_second_pass() {
        let settings = RunSettings::default();
        assert_eq!(settings.model_id, DEFAULT_MODEL_ID);
        assert!(!settings.second_pass_enabled);
    }

    #[test]
    fn second_pass_flag_parses_case_insensitively() {
        for v in ["true", "TRUE", "True"] {
            assert!(v.eq_ignore_ascii_case("true"));
        }
        assert!(!"false".eq_ignore_ascii_case("true"));
        assert!(!"yes".eq_ignore_ascii_case("true"));
    }
}
