//! Stage the entities of a stored DIP artifact as review candidates.

use tracing::{debug, info, warn};

use manuals_core::{
    dip_artifact_path, BlobStorage, DipArtifact, EntityCandidateStore, Error, ParseOutcome, Result,
};

/// Read `manuals/{doc_id}/dip.json` and insert each entity individually.
///
/// An unreadable or malformed artifact is an error. A failed insert is logged
/// and skipped; it never aborts the batch.
pub async fn parse_dip_to_entity_candidates(
    storage: &dyn BlobStorage,
    candidates: &dyn EntityCandidateStore,
    doc_id: &str,
    actor: &str,
) -> Result<ParseOutcome> {
    let path = dip_artifact_path(doc_id);
    let raw = storage.download(&path).await?;
    let artifact: DipArtifact = serde_json::from_slice(&raw)
        .map_err(|e| Error::Serialization(format!("Malformed DIP artifact {}: {}", path, e)))?;

    let total_entities = artifact.entities.len();
    let mut entities_inserted = 0;

    for entity in &artifact.entities {
        match candidates
            .insert_entity_candidate(doc_id, entity, actor)
            .await
        {
            Ok(()) => entities_inserted += 1,
            Err(e) => warn!(
                subsystem = "orchestrator",
                component = "entity_parsing",
                doc_id,
                entity_type = %entity.entity_type,
                value = %entity.value,
                error = %e,
                "Skipping entity candidate"
            ),
        }
    }

    debug!(doc_id, storage_path = %path, "Parsed DIP artifact");
    info!(
        subsystem = "orchestrator",
        component = "entity_parsing",
        doc_id,
        entities_inserted,
        total_entities,
        "Entity candidates staged"
    );

    Ok(ParseOutcome {
        entities_inserted,
        total_entities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBlobStorage, MockEntityStore};
    use manuals_core::DipEntity;

    fn entity(value: &str) -> DipEntity {
        DipEntity {
            entity_type: "model".into(),
            value: value.into(),
            confidence: 0.75,
            page: Some(1),
            context: None,
        }
    }

    fn store_artifact(storage: &MockBlobStorage, doc_id: &str, entities: Vec<DipEntity>) {
        let artifact = DipArtifact {
            doc_id: doc_id.into(),
            entities,
            spec_hints: Vec::new(),
            golden_tests: Vec::new(),
            playbook_hints: Vec::new(),
            generated_at: None,
        };
        storage.put(
            &dip_artifact_path(doc_id),
            serde_json::to_vec(&artifact).unwrap(),
        );
    }

    #[tokio::test]
    async fn test_partial_failures_are_skipped() {
        let storage = MockBlobStorage::new();
        store_artifact(
            &storage,
            "doc",
            vec![entity("bbq-1000"), entity("bbq-2000"), entity("bbq-3000"), entity("bbq-4000")],
        );
        let candidates = MockEntityStore::new().rejecting("bbq-2000").rejecting("bbq-4000");

        let outcome = parse_dip_to_entity_candidates(&storage, &candidates, "doc", "ingest-pipeline")
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ParseOutcome {
                entities_inserted: 2,
                total_entities: 4
            }
        );
        assert_eq!(candidates.attempt_count(), 4);
        let inserted = candidates.inserted();
        assert_eq!(inserted[0].entity.value, "bbq-1000");
        assert_eq!(inserted[1].entity.value, "bbq-3000");
        assert_eq!(inserted[0].actor, "ingest-pipeline");
    }

    #[tokio::test]
    async fn test_empty_artifact() {
        let storage = MockBlobStorage::new();
        store_artifact(&storage, "doc", Vec::new());
        let candidates = MockEntityStore::new();

        let outcome = parse_dip_to_entity_candidates(&storage, &candidates, "doc", "x")
            .await
            .unwrap();
        assert_eq!(outcome, ParseOutcome::default());
    }

    #[tokio::test]
    async fn test_missing_artifact_is_an_error() {
        let storage = MockBlobStorage::new();
        let candidates = MockEntityStore::new();
        let err = parse_dip_to_entity_candidates(&storage, &candidates, "doc", "x")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_malformed_artifact_is_an_error() {
        let storage = MockBlobStorage::new();
        storage.put("manuals/doc/dip.json", b"not json".to_vec());
        let candidates = MockEntityStore::new();
        let err = parse_dip_to_entity_candidates(&storage, &candidates, "doc", "x")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SERIALIZATION_ERROR");
    }
}
