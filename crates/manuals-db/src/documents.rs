//! Document and chunk queries backing the job record store.

use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use manuals_core::{Document, DocumentChunk, DocumentUpsert, Error, Result};

const DOCUMENT_COLUMNS: &str = "doc_id, manufacturer, model, manufacturer_norm, model_norm, \
     asset_uid, system_norm, subsystem_norm, revision_date, language, brand_family, source_url, \
     storage_path, last_ingest_version, last_job_id, created_at, updated_at";

pub(crate) fn parse_document_row(row: &PgRow) -> Result<Document> {
    Ok(Document {
        doc_id: row.try_get("doc_id")?,
        manufacturer: row.try_get("manufacturer")?,
        model: row.try_get("model")?,
        manufacturer_norm: row.try_get("manufacturer_norm")?,
        model_norm: row.try_get("model_norm")?,
        asset_uid: row.try_get("asset_uid")?,
        system_norm: row.try_get("system_norm")?,
        subsystem_norm: row.try_get("subsystem_norm")?,
        revision_date: row.try_get("revision_date")?,
        language: row.try_get("language")?,
        brand_family: row.try_get("brand_family")?,
        source_url: row.try_get("source_url")?,
        storage_path: row.try_get("storage_path")?,
        last_ingest_version: row.try_get("last_ingest_version")?,
        last_job_id: row.try_get("last_job_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_chunk_row(row: &PgRow) -> Result<DocumentChunk> {
    Ok(DocumentChunk {
        chunk_id: row.try_get("chunk_id")?,
        doc_id: row.try_get("doc_id")?,
        chunk_index: row.try_get("chunk_index")?,
        page: row.try_get("page")?,
        content: row.try_get("content")?,
        content_type: row.try_get("content_type")?,
    })
}

pub(crate) async fn fetch_document(pool: &Pool<Postgres>, doc_id: &str) -> Result<Option<Document>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM documents WHERE doc_id = $1",
        DOCUMENT_COLUMNS
    ))
    .bind(doc_id)
    .fetch_optional(pool)
    .await
    .map_err(Error::Database)?;

    row.as_ref().map(parse_document_row).transpose()
}

/// Insert or merge a document. `storage_path` and `created_at` survive a re-ingest.
pub(crate) async fn upsert_document(pool: &Pool<Postgres>, doc: &DocumentUpsert) -> Result<Document> {
    let row = sqlx::query(&format!(
        "INSERT INTO documents (doc_id, manufacturer, model, manufacturer_norm, model_norm,
             asset_uid, system_norm, subsystem_norm, revision_date, language, brand_family,
             source_url, last_ingest_version, last_job_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
         ON CONFLICT (doc_id) DO UPDATE SET
             manufacturer = EXCLUDED.manufacturer,
             model = EXCLUDED.model,
             manufacturer_norm = EXCLUDED.manufacturer_norm,
             model_norm = EXCLUDED.model_norm,
             asset_uid = EXCLUDED.asset_uid,
             system_norm = EXCLUDED.system_norm,
             subsystem_norm = EXCLUDED.subsystem_norm,
             revision_date = COALESCE(EXCLUDED.revision_date, documents.revision_date),
             language = COALESCE(EXCLUDED.language, documents.language),
             brand_family = COALESCE(EXCLUDED.brand_family, documents.brand_family),
             source_url = COALESCE(EXCLUDED.source_url, documents.source_url),
             last_ingest_version = EXCLUDED.last_ingest_version,
             last_job_id = EXCLUDED.last_job_id,
             updated_at = now()
         RETURNING {}",
        DOCUMENT_COLUMNS
    ))
    .bind(&doc.doc_id)
    .bind(&doc.manufacturer)
    .bind(&doc.model)
    .bind(&doc.manufacturer_norm)
    .bind(&doc.model_norm)
    .bind(doc.asset_uid)
    .bind(&doc.system_norm)
    .bind(&doc.subsystem_norm)
    .bind(&doc.revision_date)
    .bind(&doc.language)
    .bind(&doc.brand_family)
    .bind(&doc.source_url)
    .bind(&doc.last_ingest_version)
    .bind(doc.last_job_id)
    .fetch_one(pool)
    .await
    .map_err(Error::Database)?;

    parse_document_row(&row)
}

pub(crate) async fn set_storage_path(pool: &Pool<Postgres>, doc_id: &str, path: &str) -> Result<()> {
    let result = sqlx::query(
        "UPDATE documents SET storage_path = $2, updated_at = now() WHERE doc_id = $1",
    )
    .bind(doc_id)
    .bind(path)
    .execute(pool)
    .await
    .map_err(Error::Database)?;

    if result.rows_affected() == 0 {
        return Err(Error::DocumentNotFound(doc_id.to_string()));
    }
    Ok(())
}

pub(crate) async fn fetch_chunks(pool: &Pool<Postgres>, doc_id: &str) -> Result<Vec<DocumentChunk>> {
    let rows = sqlx::query(
        "SELECT chunk_id, doc_id, chunk_index, page, content, content_type
         FROM document_chunks WHERE doc_id = $1 ORDER BY chunk_index",
    )
    .bind(doc_id)
    .fetch_all(pool)
    .await
    .map_err(Error::Database)?;

    rows.iter().map(parse_chunk_row).collect()
}

pub(crate) async fn list_documents(
    pool: &Pool<Postgres>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Document>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM documents ORDER BY updated_at DESC LIMIT $1 OFFSET $2",
        DOCUMENT_COLUMNS
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(Error::Database)?;

    rows.iter().map(parse_document_row).collect()
}
