//! Golden record assembly over the golden fixture graph.

mod common;

use atrius_graph_views::golden::golden_catalog;
use atrius_graph_views::memory::MemoryGraphStore;
use atrius_graph_views::{EngineConfig, IdPolicy, ViewEngine, ViewError};
use common::{PATIENT, sample_engine};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

const GOLDEN_PATIENT: &str = "42";

async fn golden_engine(config: EngineConfig) -> ViewEngine {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/golden_graph.json");
    let store = MemoryGraphStore::load(path, false).await.unwrap();
    ViewEngine::with_reference_catalog(Arc::new(store), config).unwrap()
}

#[tokio::test]
async fn test_golden_record_keeps_catalog_order() {
    let engine = golden_engine(EngineConfig::default()).await;
    let pdm = engine.golden_pdm(GOLDEN_PATIENT, false).await.unwrap();

    let types: Vec<&str> = pdm.collections.iter().map(|c| c.data_type.as_str()).collect();
    assert_eq!(
        types,
        vec![
            "patientStatement",
            "condition",
            "encounter",
            "contactPerson",
            "practitioner",
            "organization",
            "location",
            "practitionerRole",
        ]
    );
    assert_eq!(pdm.total_records, 8);
    assert_eq!(pdm.total_items, 11);
    assert_eq!(pdm.record_counts["condition"], 2);
    assert_eq!(
        pdm.get("patientStatement").unwrap().data,
        vec![json!({ "resourceType": "Patient", "id": "42" })]
    );
    assert_eq!(
        pdm.get("contactPerson").unwrap().data,
        vec![json!({ "resourceType": "RelatedPerson", "id": "rp1" })]
    );
}

#[tokio::test]
async fn test_golden_record_with_empty_collections() {
    let engine = golden_engine(EngineConfig::default()).await;
    let pdm = engine.golden_pdm(GOLDEN_PATIENT, true).await.unwrap();

    assert_eq!(pdm.total_records, 19);
    assert_eq!(pdm.total_items, 11);
    assert_eq!(pdm.record_counts["observation"], 0);
    assert_eq!(pdm.record_counts["carePlan"], 0);
}

#[tokio::test]
async fn test_location_union_is_distinct() {
    let engine = golden_engine(EngineConfig::default()).await;
    let location = engine.golden_collection(GOLDEN_PATIENT, "location").await.unwrap();

    assert_eq!(location.count, 2);
    assert_eq!(
        location.data,
        vec![
            json!({ "resourceType": "Location", "id": "clinic" }),
            json!({ "resourceType": "Location", "id": "ward" }),
        ]
    );
}

#[tokio::test]
async fn test_practitioner_roles_follow_the_chain() {
    let engine = golden_engine(EngineConfig::default()).await;
    let roles = engine
        .golden_collection(GOLDEN_PATIENT, "practitionerRole")
        .await
        .unwrap();

    let ids: Vec<&str> = roles.data.iter().filter_map(|doc| doc["id"].as_str()).collect();
    assert_eq!(ids, vec!["gp", "surgeon"]);
}

#[tokio::test]
async fn test_unknown_collection_is_not_found() {
    let engine = golden_engine(EngineConfig::default()).await;
    assert!(matches!(
        engine.golden_collection(GOLDEN_PATIENT, "labs").await,
        Err(ViewError::NotFound(name)) if name == "labs"
    ));
}

#[tokio::test]
async fn test_available_types() {
    let engine = golden_engine(EngineConfig::default()).await;
    let types = engine.golden_types(GOLDEN_PATIENT).await.unwrap();

    assert_eq!(types.total_types, 8);
    assert!(types.available_data_types.contains(&"location".to_string()));
    assert!(!types.available_data_types.contains(&"observation".to_string()));
    assert_eq!(types.all_possible_types, golden_catalog().unwrap().names());
}

#[tokio::test]
async fn test_golden_ids_are_validated() {
    let engine = golden_engine(EngineConfig::default()).await;
    assert!(matches!(
        engine.golden_pdm("  ", false).await,
        Err(ViewError::Validation(_))
    ));

    let strict = golden_engine(EngineConfig {
        id_policy: IdPolicy::UuidOrNumeric,
        ..EngineConfig::default()
    })
    .await;
    assert!(strict.golden_pdm(GOLDEN_PATIENT, false).await.is_ok());
    assert!(matches!(
        strict.golden_types("patient-42").await,
        Err(ViewError::Validation(_))
    ));
}

#[tokio::test]
async fn test_patients_without_documents_have_empty_records() {
    let unknown = golden_engine(EngineConfig::default())
        .await
        .golden_pdm("7", false)
        .await
        .unwrap();
    assert!(unknown.is_empty());
    assert_eq!(unknown.total_records, 0);

    let projected_only = sample_engine().await.golden_pdm(PATIENT, false).await.unwrap();
    assert!(projected_only.is_empty());
}
