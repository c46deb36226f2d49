//! # View Engine
//!
//! Entry point for consumers. A [`ViewEngine`] owns a shared catalog and a graph
//! store and answers `(view, patient id)` requests:
//!
//! 1. look the view up in the catalog (`NotFound` if unregistered)
//! 2. apply the configured [`IdPolicy`](crate::IdPolicy) (`Validation`)
//! 3. compile and run the traversal, retrying transient failures with linear
//!    backoff until the deadline runs out
//! 4. resolve every row and apply the distinct policy
//!
//! The same pipeline assembles the golden record (see [`crate::golden`]).
//!
//! The engine holds no per-request state, so one instance can serve any
//! number of concurrent requests.

use crate::assembler::assemble;
use crate::catalog::{QueryCatalog, ViewSpec};
use crate::config::EngineConfig;
use crate::golden::{
    GOLDEN_BATCH_SIZE, GoldenCollection, GoldenItems, GoldenPdm, GoldenTypes, golden_catalog,
};
use crate::reference::reference_catalog;
use crate::resolver::resolve_row;
use crate::store::{GraphStore, RawRow};
use crate::traversal::{TraversalExecutor, TraversalQuery};
use crate::{ViewError, ViewRecord, ViewResult};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Record counts for every view of one patient.
#[derive(Debug, Clone, Serialize)]
pub struct PatientSummary {
    pub patient_id: String,
    pub catalog_version: String,
    pub generated_at: DateTime<Utc>,
    /// Records per view; views without records only appear when requested
    pub record_counts: BTreeMap<String, usize>,
    /// Views with at least one record, in catalog order
    pub available_views: Vec<String>,
    pub total_views: usize,
    pub total_records: usize,
    pub has_data: bool,
}

#[derive(Debug, Clone)]
pub struct ViewEngine {
    catalog: Arc<QueryCatalog>,
    executor: TraversalExecutor,
    config: EngineConfig,
}

impl ViewEngine {
    pub fn new(catalog: Arc<QueryCatalog>, store: Arc<dyn GraphStore>, config: EngineConfig) -> Self {
        Self {
            catalog,
            executor: TraversalExecutor::new(store),
            config,
        }
    }

    /// An engine serving the nine reference views.
    pub fn with_reference_catalog(
        store: Arc<dyn GraphStore>,
        config: EngineConfig,
    ) -> Result<Self, ViewError> {
        Ok(Self::new(reference_catalog()?, store, config))
    }

    pub fn catalog(&self) -> &QueryCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the records of `view` for `patient_id` under the configured deadline.
    ///
    /// An unknown patient and a patient without matching data both yield an
    /// empty result.
    pub async fn get_view(&self, view: &str, patient_id: &str) -> Result<ViewResult, ViewError> {
        self.get_view_with_deadline(view, patient_id, self.config.deadline)
            .await
    }

    /// Like [`get_view`](Self::get_view) with an explicit deadline covering every
    /// attempt and the backoff between them.
    pub async fn get_view_with_deadline(
        &self,
        view: &str,
        patient_id: &str,
        deadline: Duration,
    ) -> Result<ViewResult, ViewError> {
        let spec = self.catalog.get(view)?;
        self.config.id_policy.validate(patient_id)?;
        let records = self.project(&spec, patient_id, deadline).await?;

        Ok(ViewResult {
            view: spec.name.clone(),
            patient_id: patient_id.to_string(),
            columns: spec.field_names(),
            records,
        })
    }

    /// Compiles, fetches, resolves and assembles one spec.
    async fn project(
        &self,
        spec: &Arc<ViewSpec>,
        patient_id: &str,
        deadline: Duration,
    ) -> Result<Vec<ViewRecord>, ViewError> {
        let query = TraversalExecutor::compile(Arc::clone(spec), patient_id)?;
        let rows = self.fetch_rows(&query, deadline).await?;

        let projected = rows
            .iter()
            .map(|row| resolve_row(&spec.fields, row))
            .collect::<Vec<_>>();
        let row_count = projected.len();
        let records = assemble(spec.distinct, projected);

        info!(
            "View '{}' for patient {}: {} rows, {} records",
            spec.name,
            patient_id,
            row_count,
            records.len()
        );
        Ok(records)
    }

    /// Runs the query with retries; `deadline` bounds all attempts and backoff together.
    async fn fetch_rows(
        &self,
        query: &TraversalQuery,
        deadline: Duration,
    ) -> Result<Vec<RawRow>, ViewError> {
        let attempts = async {
            let mut attempt: u32 = 0;
            loop {
                match self.executor.execute(query, deadline).await {
                    Ok(rows) => return Ok(rows),
                    Err(e) if e.is_retryable() && attempt < self.config.retry_attempts => {
                        attempt += 1;
                        warn!(
                            "View '{}' attempt {} failed ({}), retrying",
                            query.view(),
                            attempt,
                            e
                        );
                        tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        match tokio::time::timeout(deadline, attempts).await {
            Ok(result) => result,
            Err(_) => Err(ViewError::TraversalTimeout {
                view: query.view().to_string(),
                deadline,
            }),
        }
    }

    /// Fetches several views concurrently; results follow the order of `views`.
    ///
    /// The first failure fails the whole call.
    pub async fn get_views(
        &self,
        patient_id: &str,
        views: &[&str],
    ) -> Result<Vec<ViewResult>, ViewError> {
        debug!("Fetching {} views for patient {}", views.len(), patient_id);
        try_join_all(views.iter().map(|view| self.get_view(view, patient_id))).await
    }

    /// Counts the records of every catalog view for `patient_id`.
    pub async fn summarize(
        &self,
        patient_id: &str,
        include_empty: bool,
    ) -> Result<PatientSummary, ViewError> {
        let names: Vec<&str> = self.catalog.view_names().iter().map(String::as_str).collect();
        let results = self.get_views(patient_id, &names).await?;

        let mut record_counts = BTreeMap::new();
        let mut available_views = Vec::new();
        for result in &results {
            if !result.is_empty() {
                available_views.push(result.view.clone());
            }
            if include_empty || !result.is_empty() {
                record_counts.insert(result.view.clone(), result.len());
            }
        }
        let total_records: usize = results.iter().map(ViewResult::len).sum();

        info!(
            "Summary for patient {}: {} views with data, {} total records",
            patient_id,
            available_views.len(),
            total_records
        );

        Ok(PatientSummary {
            patient_id: patient_id.to_string(),
            catalog_version: self.catalog.version().to_string(),
            generated_at: Utc::now(),
            total_views: record_counts.len(),
            record_counts,
            available_views,
            total_records,
            has_data: total_records > 0,
        })
    }

    /// The golden record of `patient_id`: every collection of the golden
    /// catalog, fetched [`GOLDEN_BATCH_SIZE`] at a time.
    ///
    /// With `include_empty = false`, collections without items are omitted.
    pub async fn golden_pdm(
        &self,
        patient_id: &str,
        include_empty: bool,
    ) -> Result<GoldenPdm, ViewError> {
        let catalog = golden_catalog()?;
        self.config.id_policy.validate(patient_id)?;

        let collections: Vec<GoldenItems> = stream::iter(catalog.collections())
            .map(|collection| self.collect_golden(collection, patient_id))
            .buffered(GOLDEN_BATCH_SIZE)
            .try_collect::<Vec<_>>()
            .await?;
        let collections: Vec<GoldenItems> = collections
            .into_iter()
            .filter(|items| include_empty || items.count > 0)
            .collect();

        let pdm = GoldenPdm::new(patient_id, catalog.version(), collections);
        if pdm.is_empty() {
            warn!("No golden data found for patient {}", patient_id);
        } else {
            info!(
                "Golden record for patient {}: {} collections, {} items",
                patient_id, pdm.total_records, pdm.total_items
            );
        }
        Ok(pdm)
    }

    /// One collection of the golden record; `NotFound` for an unknown collection.
    pub async fn golden_collection(
        &self,
        patient_id: &str,
        data_type: &str,
    ) -> Result<GoldenItems, ViewError> {
        let catalog = golden_catalog()?;
        let collection = catalog.get(data_type)?;
        self.config.id_policy.validate(patient_id)?;
        self.collect_golden(collection, patient_id).await
    }

    /// Lists the golden collections holding data for `patient_id`.
    pub async fn golden_types(&self, patient_id: &str) -> Result<GoldenTypes, ViewError> {
        let pdm = self.golden_pdm(patient_id, false).await?;
        let available_data_types: Vec<String> = pdm
            .collections
            .into_iter()
            .map(|items| items.data_type)
            .collect();

        Ok(GoldenTypes {
            patient_id: patient_id.to_string(),
            total_types: available_data_types.len(),
            available_data_types,
            all_possible_types: golden_catalog()?.names(),
        })
    }

    async fn collect_golden(
        &self,
        collection: &GoldenCollection,
        patient_id: &str,
    ) -> Result<GoldenItems, ViewError> {
        let branches = try_join_all(
            collection
                .branches
                .iter()
                .map(|spec| self.project(spec, patient_id, self.config.deadline)),
        )
        .await?;
        Ok(collection.merge(branches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdPolicy;
    use crate::memory::GraphBuilder;
    use serde_json::json;

    fn engine(config: EngineConfig) -> ViewEngine {
        let store = GraphBuilder::new()
            .node("p1", &["Patient"], json!({ "id": "123" }))
            .node("n1", &["Note"], json!({ "noteType": "Progress", "text": "Stable" }))
            .node("n2", &["Note"], json!({ "category": "Progress", "content": "Stable" }))
            .edge("p1", "HAS_NOTE", "n1")
            .edge("p1", "HAS_NOTE", "n2")
            .build()
            .unwrap();
        ViewEngine::with_reference_catalog(Arc::new(store), config).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_view_is_checked_first() {
        let engine = engine(EngineConfig::default());
        assert!(matches!(
            engine.get_view("labs", "").await,
            Err(ViewError::NotFound(view)) if view == "labs"
        ));
        assert!(matches!(
            engine.get_view("clinical_notes", "  ").await,
            Err(ViewError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_coalesced_notes_collapse() {
        let engine = engine(EngineConfig::default());
        let notes = engine.get_view("clinical_notes", "123").await.unwrap();

        assert_eq!(notes.columns, vec!["noteType", "content"]);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes.get(0, "content").and_then(|v| v.as_str()), Some("Stable"));
    }

    #[tokio::test]
    async fn test_id_policy_is_applied() {
        let strict = engine(EngineConfig {
            id_policy: IdPolicy::UuidOrNumeric,
            ..EngineConfig::default()
        });
        assert!(matches!(
            strict.get_view("clinical_notes", "patient-1").await,
            Err(ViewError::Validation(_))
        ));
        assert_eq!(strict.get_view("clinical_notes", "123").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let engine = engine(EngineConfig::default());

        let summary = engine.summarize("123", false).await.unwrap();
        assert_eq!(summary.catalog_version, "2024.1");
        assert_eq!(summary.available_views, vec!["clinical_notes"]);
        assert_eq!(summary.record_counts.get("clinical_notes"), Some(&1));
        assert_eq!(summary.total_views, 1);
        assert_eq!(summary.total_records, 1);
        assert!(summary.has_data);

        let full = engine.summarize("123", true).await.unwrap();
        assert_eq!(full.total_views, 9);
        assert_eq!(full.record_counts.get("conditions"), Some(&0));

        let nobody = engine.summarize("999", false).await.unwrap();
        assert!(!nobody.has_data);
        assert!(nobody.record_counts.is_empty());
    }
}
