//! Staging table for extracted entities awaiting review.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use manuals_core::defaults::ENTITY_SOURCE;
use manuals_core::{DipEntity, EntityCandidate, EntityCandidateStore, Error, Result};

/// Review state of a freshly staged candidate.
pub const PENDING_STATUS: &str = "pending";

/// PostgreSQL implementation of EntityCandidateStore.
#[derive(Clone)]
pub struct PgEntityCandidateStore {
    pool: Pool<Postgres>,
}

impl PgEntityCandidateStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Candidates staged for a document, oldest first.
    pub async fn list_for_document(&self, doc_id: &str) -> Result<Vec<EntityCandidate>> {
        let rows = sqlx::query(
            "SELECT id, doc_id, entity_type, value, source, status, confidence, page, context,
                    created_by, created_at
             FROM entity_candidates WHERE doc_id = $1 ORDER BY created_at, id",
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter()
            .map(|row| -> Result<EntityCandidate> {
                Ok(EntityCandidate {
                    id: row.try_get("id")?,
                    doc_id: row.try_get("doc_id")?,
                    entity_type: row.try_get("entity_type")?,
                    value: row.try_get("value")?,
                    source: row.try_get("source")?,
                    status: row.try_get("status")?,
                    confidence: row.try_get("confidence")?,
                    page: row.try_get("page")?,
                    context: row.try_get("context")?,
                    created_by: row.try_get("created_by")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl EntityCandidateStore for PgEntityCandidateStore {
    async fn insert_entity_candidate(
        &self,
        doc_id: &str,
        entity: &DipEntity,
        actor: &str,
    ) -> Result<()> {
        if entity.value.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "Entity of type '{}' has an empty value",
                entity.entity_type
            )));
        }

        sqlx::query(
            "INSERT INTO entity_candidates
                 (id, doc_id, entity_type, value, source, status, confidence, page, context,
                  payload, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(Uuid::now_v7())
        .bind(doc_id)
        .bind(&entity.entity_type)
        .bind(&entity.value)
        .bind(ENTITY_SOURCE)
        .bind(PENDING_STATUS)
        .bind(entity.confidence)
        .bind(entity.page)
        .bind(&entity.context)
        .bind(Json(entity))
        .bind(actor)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }
}
