use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::agent::{AgentKind, AgentRecord};

/// Get an agent by ID
pub async fn get_agent(pool: &PgPool, agent_id: Uuid) -> Result<Option<AgentRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, name, description, kind, created_at
        FROM agents
        WHERE id = $1
        "#,
    )
    .bind(agent_id)
    .fetch_optional(pool)
    .await?;

    Ok(match row {
        Some(r) => {
            let kind: Json<AgentKind> = r.try_get("kind")?;
            Some(AgentRecord {
                id: r.try_get("id")?,
                name: r.try_get("name")?,
                description: r.try_get("description")?,
                kind: kind.0,
                created_at: r.try_get("created_at")?,
            })
        }
        None => None,
    })
}
