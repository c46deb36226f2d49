//! # Patient Graph Views
//!
//! This crate projects a patient's clinical history, stored in a labeled property
//! graph, into flattened and deduplicated record views (conditions, procedures,
//! encounters, allergies, medications, immunizations, observations, clinical notes
//! and providers). Every view is declared as data in a [`QueryCatalog`] and
//! interpreted by a single engine, so adding a view never means writing another
//! hand-crafted query.
//!
//! ## Architecture
//!
//! A request for `(view, patient id)` flows through four stages:
//!
//! - **Query Catalog** ([`catalog`]): immutable, versioned map of view name to [`ViewSpec`]
//! - **Traversal Executor** ([`traversal`]): compiles a spec and a patient id into a
//!   [`TraversalQuery`] with bound parameters and runs it against a [`GraphStore`]
//! - **Field Resolver** ([`resolver`]): applies decode / coalesce / textSet /
//!   passthrough rules to the raw row bindings
//! - **View Assembler** ([`assembler`]): applies the view's [`DistinctPolicy`]
//!
//! The [`ViewEngine`] wires the stages together and adds deadlines, retries of
//! transient store failures and concurrent multi-view fetches.
//! It also assembles the golden record ([`golden`]), the decoded resource
//! documents linked to a patient, from the same pipeline.
//!
//! ## Usage Example
//!
//! ```rust
//! use atrius_graph_views::{EngineConfig, FieldValue, ViewEngine, memory::GraphBuilder};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = GraphBuilder::new()
//!     .node("p1", &["Patient"], json!({ "id": "p1" }))
//!     .node("c1", &["Condition"], json!({ "display": ["Diabetes"] }))
//!     .node("c2", &["Condition"], json!({ "display": ["DIABETES"] }))
//!     .edge("p1", "HAS_CONDITION", "c1")
//!     .edge("p1", "HAS_CONDITION", "c2")
//!     .build()?;
//!
//! let engine = ViewEngine::with_reference_catalog(Arc::new(store), EngineConfig::default())?;
//! let conditions = engine.get_view("conditions", "p1").await?;
//!
//! assert_eq!(conditions.len(), 1);
//! assert_eq!(conditions.get(0, "conditionCode"), Some(&FieldValue::Null));
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`ViewError`]. Transient store failures report
//! [`ViewError::is_retryable`]:
//!
//! ```rust,no_run
//! use atrius_graph_views::{ViewEngine, ViewError};
//!
//! # async fn example(engine: &ViewEngine) {
//! match engine.get_view("allergies", "008288897179").await {
//!     Ok(result) => println!("{} allergies", result.len()),
//!     Err(ViewError::NotFound(view)) => eprintln!("No such view: {}", view),
//!     Err(e) if e.is_retryable() => eprintln!("Try again later: {}", e),
//!     Err(e) => eprintln!("Failed: {}", e),
//! }
//! # }
//! ```

pub mod assembler;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod golden;
pub mod memory;
pub mod output;
pub mod reference;
pub mod resolver;
pub mod store;
pub mod traversal;

use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

// Re-export commonly used types for easier access
pub use catalog::{
    AttrRef, Cardinality, Direction, DistinctPolicy, EdgeType, FieldSpec, LabelSet, QueryCatalog,
    Rule, TextSource, ViewSpec,
};
pub use config::{EngineConfig, IdPolicy};
pub use engine::{PatientSummary, ViewEngine};
pub use golden::{GoldenItems, GoldenPdm, GoldenTypes};
pub use output::ContentType;
pub use store::{GraphStore, NodeBinding, RawRow, StoreError};
pub use traversal::{BoundParams, TraversalExecutor, TraversalQuery};

/// Error type for view retrieval.
///
/// The variants follow the retry semantics callers need: validation and lookup
/// failures are the caller's fault and must not be retried, while timeouts and
/// store outages are transient.
///
/// # Error Categories
///
/// - **Caller errors**: [`NotFound`](Self::NotFound), [`Validation`](Self::Validation)
/// - **Transient**: [`TraversalTimeout`](Self::TraversalTimeout), [`StoreUnavailable`](Self::StoreUnavailable)
/// - **Startup**: [`InvalidViewSpec`](Self::InvalidViewSpec)
/// - **Unexpected**: [`Internal`](Self::Internal)
/// - **Output**: serialization and CSV failures while formatting results
#[derive(Debug, Error)]
pub enum ViewError {
    /// The requested view is not registered in the catalog.
    #[error("View not found: {0}")]
    NotFound(String),

    /// The patient identifier is empty or does not satisfy the configured policy.
    #[error("Invalid patient id: {0}")]
    Validation(String),

    /// The traversal did not complete before its deadline.
    #[error("Traversal for view '{view}' exceeded its deadline of {deadline:?}")]
    TraversalTimeout { view: String, deadline: Duration },

    /// The graph store could not be reached or refused the request.
    #[error("Graph store unavailable: {0}")]
    StoreUnavailable(String),

    /// A view specification failed validation while building a catalog.
    #[error("Invalid view specification: {0}")]
    InvalidViewSpec(String),

    /// Unexpected failure; logged with the view, patient id and query text.
    #[error("Internal error: {0}")]
    Internal(String),

    /// JSON serialization of the results failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// CSV output generation failed.
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// The CSV writer could not be flushed.
    #[error("CSV writer error: {0}")]
    CsvWriterError(String),

    /// Unsupported output content type requested.
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),
}

impl ViewError {
    /// Returns `true` when repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ViewError::TraversalTimeout { .. } | ViewError::StoreUnavailable(_)
        )
    }
}

/// A resolved field value: a scalar, a case-folded string set, or null.
///
/// String sets are kept ordered so two records holding the same set compare
/// and serialize identically.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Scalar(serde_json::Value),
    TextSet(BTreeSet<String>),
}

impl FieldValue {
    /// Builds a string set from the given values, as the textSet rule would.
    pub fn text_set<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        FieldValue::TextSet(values.into_iter().map(|v| fold_case(v.as_ref())).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Null, or a string set with no members.
    pub fn is_absent(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::TextSet(set) => set.is_empty(),
            FieldValue::Scalar(_) => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Scalar(value) => value.as_str(),
            _ => None,
        }
    }

    pub fn as_text_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            FieldValue::TextSet(set) => Some(set),
            _ => None,
        }
    }

    /// Converts the value to JSON; sets become arrays.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Scalar(value) => value.clone(),
            FieldValue::TextSet(set) => serde_json::Value::Array(
                set.iter()
                    .map(|s| serde_json::Value::String(s.clone()))
                    .collect(),
            ),
        }
    }
}

/// Unicode default case folding, so `Straße` and `STRASSE` compare equal.
pub(crate) fn fold_case(text: &str) -> String {
    caseless::default_case_fold_str(text)
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        if value.is_null() {
            FieldValue::Null
        } else {
            FieldValue::Scalar(value)
        }
    }
}

/// One projected record; values are ordered like [`ViewResult::columns`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewRecord {
    pub values: Vec<FieldValue>,
}

/// The assembled output of a view for one patient.
///
/// # Examples
///
/// ```rust
/// use atrius_graph_views::{FieldValue, ViewRecord, ViewResult};
/// use serde_json::json;
///
/// let result = ViewResult {
///     view: "clinical_notes".to_string(),
///     patient_id: "p1".to_string(),
///     columns: vec!["noteType".to_string(), "content".to_string()],
///     records: vec![ViewRecord {
///         values: vec![
///             FieldValue::from(json!("Condition")),
///             FieldValue::Null,
///         ],
///     }],
/// };
///
/// assert_eq!(result.get(0, "noteType").and_then(|v| v.as_str()), Some("Condition"));
/// assert_eq!(result.to_objects()[0]["content"], json!(null));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewResult {
    /// Name of the view that produced the records
    pub view: String,
    /// Patient the traversal was scoped to
    pub patient_id: String,
    /// Declared field names, in declaration order
    pub columns: Vec<String>,
    /// Final records after the distinct policy has been applied
    pub records: Vec<ViewRecord>,
}

impl ViewResult {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Looks up a field of the record at `row` by column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&FieldValue> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.records.get(row)?.values.get(index)
    }

    /// All values of one column, in record order.
    pub fn column_values(&self, column: &str) -> Vec<&FieldValue> {
        match self.columns.iter().position(|c| c == column) {
            Some(index) => self
                .records
                .iter()
                .filter_map(|record| record.values.get(index))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Renders each record as a JSON object keyed by field name.
    pub fn to_objects(&self) -> Vec<serde_json::Value> {
        self.records
            .iter()
            .map(|record| {
                let object: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(record.values.iter().map(FieldValue::to_json))
                    .collect();
                serde_json::Value::Object(object)
            })
            .collect()
    }
}
