//! # Graph Store Interface
//!
//! The engine consumes a graph store through the [`GraphStore`] trait. A store
//! receives a compiled [`TraversalQuery`](crate::TraversalQuery) (pattern, bound
//! parameters and a Cypher rendering) and returns one [`RawRow`] per match,
//! with a binding for every alias of the view.
//!
//! Connection lifecycle, credentials and pooling belong to the store
//! implementation, not to the engine.

use crate::traversal::TraversalQuery;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Failures reported by a graph store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store gave up on the query before it completed.
    #[error("Store timeout: {0}")]
    Timeout(String),

    /// The store could not be reached or is refusing work.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the query or its parameters.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Graph data could not be loaded or is inconsistent.
    #[error("Invalid graph data: {0}")]
    InvalidGraph(String),

    /// Reading graph data from disk failed.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A matched node: its labels and attributes.
///
/// Attribute values are whatever the store holds. JSON-encoded composites
/// may arrive as strings or, when the store decodes them at its boundary, as
/// structured values; the resolver accepts both.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeBinding {
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl NodeBinding {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// The attribute value, treating JSON null as absent.
    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name).filter(|value| !value.is_null())
    }
}

/// One result row: alias to node, `None` where an optional hop found nothing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRow {
    bindings: BTreeMap<String, Option<Arc<NodeBinding>>>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, alias: &str, node: Option<Arc<NodeBinding>>) {
        self.bindings.insert(alias.to_string(), node);
    }

    pub fn with(mut self, alias: &str, node: Option<Arc<NodeBinding>>) -> Self {
        self.bind(alias, node);
        self
    }

    /// The node bound to `alias`, if the alias exists and is not null.
    pub fn node(&self, alias: &str) -> Option<&NodeBinding> {
        self.bindings.get(alias).and_then(|node| node.as_deref())
    }

    /// Shorthand for an attribute of the node bound to `alias`.
    pub fn attribute(&self, alias: &str, name: &str) -> Option<&serde_json::Value> {
        self.node(alias).and_then(|node| node.attribute(name))
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }
}

/// A store able to execute compiled traversals.
///
/// Implementations must treat the patient id strictly as a bound parameter
/// and must not modify the graph. Rows are returned in a stable order.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn execute(&self, query: &TraversalQuery) -> Result<Vec<RawRow>, StoreError>;
}

#[async_trait]
impl<S: GraphStore + ?Sized> GraphStore for Arc<S> {
    async fn execute(&self, query: &TraversalQuery) -> Result<Vec<RawRow>, StoreError> {
        (**self).execute(query).await
    }
}
