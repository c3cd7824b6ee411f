use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retrieval backend an agent is wired to. The variant carries the
/// connection details it needs, so a record cannot be missing them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentKind {
    KnowledgeBase { knowledge_base_id: String },
    RestApi { api_endpoint: String },
    AnalyticsQuery { database: String, query: String },
}

/// A configured context-augmentation agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub kind: AgentKind,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_kind_tagged_representation() {
        let kind = AgentKind::KnowledgeBase {
            knowledge_base_id: "kb-1".to_string(),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "knowledge_base");
        assert_eq!(json["knowledge_base_id"], "kb-1");

        let parsed: AgentKind = serde_json::from_value(serde_json::json!({
            "type": "analytics_query",
            "database": "sales",
            "query": "SELECT 1",
        }))
        .unwrap();
        match parsed {
            AgentKind::AnalyticsQuery { database, query } => {
                assert_eq!(database, "sales");
                assert_eq!(query, "SELECT 1");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
