use sqlx::{PgPool, Row};

/// Get the active value for a config type, if one is set
pub async fn active_value(
    pool: &PgPool,
    config_type: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT value
        FROM runtime_config
        WHERE config_type = $1 AND is_active = TRUE
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(config_type)
    .fetch_optional(pool)
    .await?;

    Ok(match row {
        Some(r) => Some(r.try_get("value")?),
        None => None,
    })
}

/// Set a new active value for a config type. Previous rows are deactivated
/// rather than deleted.
pub async fn save_value(
    pool: &PgPool,
    config_type: &str,
    value: &str,
    description: Option<&str>,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE runtime_config SET is_active = FALSE WHERE config_type = $1 AND is_active = TRUE",
    )
    .bind(config_type)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO runtime_config (config_type, value, description, is_active)
        VALUES ($1, $2, $3, TRUE)
        "#,
    )
    .bind(config_type)
    .bind(value)
    .bind(description)
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}
