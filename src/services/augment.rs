//! Item description augmentation through configured agents.
//!
//! Items can reference agents that pull in extra context (a knowledge base,
//! a REST endpoint, an analytics query) before the model sees the item
//! listing. Augmentation is best-effort: a missing or failing agent is
//! logged and skipped, and with no usable fragments the input text comes
//! back unchanged.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::agent_queries;
use crate::models::agent::{AgentKind, AgentRecord};

/// Longest fragment one agent may contribute.
const MAX_FRAGMENT_CHARS: usize = 2000;

/// Enriches item description text with agent-provided context.
#[async_trait]
pub trait Augmenter: Send + Sync {
    async fn augment(&self, text: &str, agent_ids: &[Uuid], allow_internet_search: bool) -> String;
}

pub struct AgentAugmenter {
    pool: PgPool,
    http: Client,
    gateway_url: Option<String>,
}

#[derive(Deserialize)]
struct KnowledgeBaseResponse {
    #[serde(default)]
    passages: Vec<String>,
}

#[derive(Deserialize)]
struct AnalyticsResponse {
    #[serde(default)]
    rows: Vec<serde_json::Value>,
}

impl AgentAugmenter {
    pub fn new(pool: PgPool, gateway_url: Option<String>) -> Self {
        Self {
            pool,
            http: Client::new(),
            gateway_url,
        }
    }

    async fn invoke(
        &self,
        agent: &AgentRecord,
        query: &str,
        allow_internet_search: bool,
    ) -> Result<Option<String>, reqwest::Error> {
        match &agent.kind {
            AgentKind::KnowledgeBase { knowledge_base_id } => {
                let Some(gateway) = &self.gateway_url else {
                    tracing::warn!(agent = %agent.name, "no agent gateway configured, skipping");
                    return Ok(None);
                };
                let url = format!("{gateway}/knowledge-bases/{knowledge_base_id}/query");
                let response = self
                    .http
                    .post(&url)
                    .json(&serde_json::json!({
                        "query": query,
                        "allow_internet_search": allow_internet_search,
                    }))
                    .send()
                    .await?
                    .error_for_status()?;
                let parsed: KnowledgeBaseResponse = response.json().await?;
                if parsed.passages.is_empty() {
                    return Ok(None);
                }
                Ok(Some(truncate_fragment(
                    &parsed.passages.join("\n"),
                    MAX_FRAGMENT_CHARS,
                )))
            }
            AgentKind::RestApi { api_endpoint } => {
                let response = self
                    .http
                    .get(api_endpoint)
                    .send()
                    .await?
                    .error_for_status()?;
                let body = response.text().await?;
                if body.trim().is_empty() {
                    return Ok(None);
                }
                Ok(Some(truncate_fragment(body.trim(), MAX_FRAGMENT_CHARS)))
            }
            AgentKind::AnalyticsQuery { database, query } => {
                let Some(gateway) = &self.gateway_url else {
                    tracing::warn!(agent = %agent.name, "no agent gateway configured, skipping");
                    return Ok(None);
                };
                let url = format!("{gateway}/analytics/query");
                let response = self
                    .http
                    .post(&url)
                    .json(&serde_json::json!({
                        "database": database,
                        "query": query,
                    }))
                    .send()
                    .await?
                    .error_for_status()?;
                let parsed: AnalyticsResponse = response.json().await?;
                if parsed.rows.is_empty() {
                    return Ok(None);
                }
                let lines: Vec<String> = parsed.rows.iter().map(|row| row.to_string()).collect();
                Ok(Some(truncate_fragment(
                    &lines.join("\n"),
                    MAX_FRAGMENT_CHARS,
                )))
            }
        }
    }
}

#[async_trait]
impl Augmenter for AgentAugmenter {
    async fn augment(&self, text: &str, agent_ids: &[Uuid], allow_internet_search: bool) -> String {
        if agent_ids.is_empty() {
            return text.to_string();
        }

        let mut fragments = Vec::new();
        for agent_id in agent_ids {
            let agent = match agent_queries::get_agent(&self.pool, *agent_id).await {
                Ok(Some(agent)) => agent,
                Ok(None) => {
                    tracing::warn!(agent_id = %agent_id, "agent not found, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(agent_id = %agent_id, error = %e, "could not load agent, skipping");
                    continue;
                }
            };

            match self.invoke(&agent, text, allow_internet_search).await {
                Ok(Some(fragment)) => fragments.push(fragment),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(agent = %agent.name, error = %e, "agent call failed, skipping");
                }
            }
        }

        if fragments.is_empty() {
            return text.to_string();
        }
        format!("{text}\nAdditional context: {}", fragments.join("\n"))
    }
}

/// Truncate on a character boundary.
fn truncate_fragment(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_character_boundaries() {
        assert_eq!(truncate_fragment("hello", 10), "hello");
        assert_eq!(truncate_fragment("hello", 3), "hel");
        assert_eq!(truncate_fragment("héllo", 2), "hé");
        assert_eq!(truncate_fragment("", 5), "");
    }
}
