use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::models::file::{CollectionFileInstance, FileCheck};
use crate::models::item::ItemInstance;
use crate::models::job::{AssessmentStatus, VerificationJob};

/// Get a job by ID. File check records live in their own table and are
/// merged in by the store layer, not here.
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<VerificationJob>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, collection_id, status, confidence, cost, error_message,
               search_internet, items, files, created_at, updated_at
        FROM verification_jobs
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    Ok(match row {
        Some(r) => {
            let status: String = r.try_get("status")?;
            let items: Json<Vec<ItemInstance>> = r.try_get("items")?;
            let files: Json<Vec<CollectionFileInstance>> = r.try_get("files")?;

            Some(VerificationJob {
                id: r.try_get("id")?,
                collection_id: r.try_get("collection_id")?,
                status: status.parse().unwrap_or(AssessmentStatus::Pending),
                items: items.0,
                files: files.0,
                confidence: r.try_get("confidence")?,
                cost: r.try_get("cost")?,
                error_message: r.try_get("error_message")?,
                search_internet: r.try_get("search_internet")?,
                created_at: r.try_get("created_at")?,
                updated_at: r.try_get("updated_at")?,
            })
        }
        None => None,
    })
}

/// Get all file check records for a job, keyed by the file they belong to.
pub async fn get_file_checks(
    pool: &PgPool,
    job_id: Uuid,
) -> Result<Vec<(Uuid, FileCheck)>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT file_id, item_instance_id, status, status_reasoning, address_match,
               detected_address, cost, input_tokens, output_tokens, cluster_number
        FROM file_checks
        WHERE verification_job_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            let file_id: Uuid = r.try_get("file_id")?;
            let status: String = r.try_get("status")?;
            Ok((
                file_id,
                FileCheck {
                    item_instance_id: r.try_get("item_instance_id")?,
                    status: status.parse().unwrap_or(AssessmentStatus::Pending),
                    status_reasoning: r.try_get("status_reasoning")?,
                    address_match: r.try_get("address_match")?,
                    detected_address: r.try_get("detected_address")?,
                    cost: r.try_get("cost")?,
                    input_tokens: r.try_get("input_tokens")?,
                    output_tokens: r.try_get("output_tokens")?,
                    cluster_number: r.try_get("cluster_number")?,
                },
            ))
        })
        .collect()
}

/// Write the whole job document back
pub async fn save_job(conn: &mut PgConnection, job: &VerificationJob) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE verification_jobs
        SET status = $1,
            confidence = $2,
            cost = $3,
            error_message = $4,
            items = $5,
            files = $6,
            updated_at = $7
        WHERE id = $8
        "#,
    )
    .bind(job.status.to_string())
    .bind(job.confidence)
    .bind(job.cost)
    .bind(job.error_message.as_deref())
    .bind(Json(&job.items))
    .bind(Json(&job.files))
    .bind(job.updated_at)
    .bind(job.id)
    .execute(conn)
    .await?;

    Ok(())
}

/// Replace every file check record for a job
pub async fn replace_file_checks(
    conn: &mut PgConnection,
    job_id: Uuid,
    checks: &[(Uuid, FileCheck)],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM file_checks WHERE verification_job_id = $1")
        .bind(job_id)
        .execute(&mut *conn)
        .await?;

    for (file_id, check) in checks {
        sqlx::query(
            r#"
            INSERT INTO file_checks (verification_job_id, file_id, item_instance_id, status,
                                     status_reasoning, address_match, detected_address, cost,
                                     input_tokens, output_tokens, cluster_number)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(job_id)
        .bind(file_id)
        .bind(check.item_instance_id)
        .bind(check.status.to_string())
        .bind(check.status_reasoning.as_deref())
        .bind(check.address_match)
        .bind(check.detected_address.as_deref())
        .bind(check.cost)
        .bind(check.input_tokens)
        .bind(check.output_tokens)
        .bind(check.cluster_number)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Bump updated_at without touching anything else
pub async fn touch_job(pool: &PgPool, job_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE verification_jobs SET updated_at = NOW() WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;

    Ok(())
}
