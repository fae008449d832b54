//! Equipment registry lookup.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use manuals_core::{Error, Result, SystemMetadata, SystemMetadataResolver};

/// Resolves (manufacturer, model) against the `systems` table.
#[derive(Clone)]
pub struct PgSystemMetadataResolver {
    pool: Pool<Postgres>,
}

impl PgSystemMetadataResolver {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SystemMetadataResolver for PgSystemMetadataResolver {
    async fn lookup(&self, manufacturer_norm: &str, model_norm: &str) -> Result<SystemMetadata> {
        let row = sqlx::query(
            "SELECT asset_uid::text AS asset_uid, system_norm, subsystem_norm
             FROM systems
             WHERE lower(manufacturer_norm) = lower($1) AND lower(model_norm) = lower($2)",
        )
        .bind(manufacturer_norm.trim())
        .bind(model_norm.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::SystemLookup(e.to_string()))?
        .ok_or_else(|| {
            Error::SystemLookup(format!(
                "No system registered for manufacturer '{}' model '{}'",
                manufacturer_norm, model_norm
            ))
        })?;

        let metadata = SystemMetadata {
            asset_uid: row.try_get("asset_uid")?,
            system_norm: row.try_get("system_norm")?,
            subsystem_norm: row.try_get("subsystem_norm")?,
        };

        debug!(
            subsystem = "db",
            component = "systems",
            asset_uid = %metadata.asset_uid,
            "Resolved system metadata"
        );
        Ok(metadata)
    }
}
