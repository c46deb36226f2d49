//! # In-Memory Property Graph Store
//!
//! A [`GraphStore`] that holds a labeled property graph in memory and executes
//! traversal queries natively. It backs the CLI and the test suite, and serves
//! as the reference semantics for adapters to external graph databases.
//!
//! ## Graph document format
//!
//! ```json
//! {
//!   "nodes": [
//!     { "key": "p1", "labels": ["Patient"], "properties": { "id": "p1" } },
//!     { "key": "c1", "labels": ["Condition"], "properties": { "display": ["Asthma"] } }
//!   ],
//!   "edges": [
//!     { "from": "p1", "type": "HAS_CONDITION", "to": "c1" }
//!   ]
//! }
//! ```
//!
//! Node keys only identify nodes inside the document; queries match patients
//! on their id attribute.
//!
//! ## Embedded JSON
//!
//! Graphs exported from document stores often keep composite attributes as
//! JSON text. With `decode_embedded` enabled, string attributes holding a JSON
//! object or an array of objects are replaced by the parsed value once, at
//! load time. Other strings, including bracketed text like `"[1]"`, are kept.

use crate::catalog::{Cardinality, Direction, EdgeType, FilterOp, LabelSet};
use crate::store::{GraphStore, NodeBinding, RawRow, StoreError};
use crate::traversal::TraversalQuery;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
struct NodeRecord {
    key: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    properties: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct EdgeRecord {
    from: String,
    #[serde(rename = "type")]
    rel_type: String,
    to: String,
}

#[derive(Debug, Default, Deserialize)]
struct GraphDocument {
    #[serde(default)]
    nodes: Vec<NodeRecord>,
    #[serde(default)]
    edges: Vec<EdgeRecord>,
}

/// Incrementally builds a [`MemoryGraphStore`].
///
/// # Examples
///
/// ```rust
/// use atrius_graph_views::memory::GraphBuilder;
/// use serde_json::json;
///
/// let store = GraphBuilder::new()
///     .node("p1", &["Patient"], json!({ "id": "p1" }))
///     .node("n1", &["Note"], json!({ "text": "Follow-up in two weeks" }))
///     .edge("p1", "HAS_NOTE", "n1")
///     .build()?;
///
/// assert_eq!(store.node_count(), 2);
/// assert_eq!(store.edge_count(), 1);
/// # Ok::<(), atrius_graph_views::StoreError>(())
/// ```
#[derive(Debug, Default)]
pub struct GraphBuilder {
    document: GraphDocument,
    decode_embedded: bool,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, key: &str, labels: &[&str], properties: Value) -> Self {
        self.document.nodes.push(NodeRecord {
            key: key.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            properties,
        });
        self
    }

    pub fn edge(mut self, from: &str, rel_type: &str, to: &str) -> Self {
        self.document.edges.push(EdgeRecord {
            from: from.to_string(),
            rel_type: rel_type.to_string(),
            to: to.to_string(),
        });
        self
    }

    /// Parse JSON text attributes into structured values when building.
    pub fn decode_embedded(mut self, enabled: bool) -> Self {
        self.decode_embedded = enabled;
        self
    }

    pub fn build(self) -> Result<MemoryGraphStore, StoreError> {
        MemoryGraphStore::from_document(self.document, self.decode_embedded)
    }
}

/// Read-only property graph with adjacency lists in insertion order.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    nodes: Vec<Arc<NodeBinding>>,
    outgoing: Vec<Vec<(String, usize)>>,
    incoming: Vec<Vec<(String, usize)>>,
    edge_count: usize,
}

impl MemoryGraphStore {
    /// Parses a graph document.
    pub fn from_json_str(content: &str, decode_embedded: bool) -> Result<Self, StoreError> {
        let document: GraphDocument = serde_json::from_str(content)
            .map_err(|e| StoreError::InvalidGraph(format!("Failed to parse graph: {}", e)))?;
        Self::from_document(document, decode_embedded)
    }

    /// Loads a graph document from a local file.
    pub async fn load(path: impl AsRef<Path>, decode_embedded: bool) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!("Loading graph from {}", path.display());
        let content = fs::read_to_string(path).await?;
        Self::from_json_str(&content, decode_embedded)
    }

    fn from_document(document: GraphDocument, decode_embedded: bool) -> Result<Self, StoreError> {
        let mut keys: HashMap<String, usize> = HashMap::with_capacity(document.nodes.len());
        let mut nodes = Vec::with_capacity(document.nodes.len());

        for record in document.nodes {
            if keys.contains_key(&record.key) {
                return Err(StoreError::InvalidGraph(format!(
                    "Duplicate node key: {}",
                    record.key
                )));
            }
            let mut properties = match record.properties {
                Value::Object(map) => map,
                Value::Null => serde_json::Map::new(),
                other => {
                    return Err(StoreError::InvalidGraph(format!(
                        "Properties of node '{}' must be an object, got {}",
                        record.key, other
                    )));
                }
            };
            if decode_embedded {
                for value in properties.values_mut() {
                    decode_embedded_value(value);
                }
            }
            keys.insert(record.key, nodes.len());
            nodes.push(Arc::new(NodeBinding {
                labels: record.labels,
                properties,
            }));
        }

        let mut outgoing = vec![Vec::new(); nodes.len()];
        let mut incoming = vec![Vec::new(); nodes.len()];
        let lookup = |key: &str| {
            keys.get(key)
                .copied()
                .ok_or_else(|| StoreError::InvalidGraph(format!("Edge references unknown node: {}", key)))
        };
        let edge_count = document.edges.len();
        for edge in document.edges {
            let from = lookup(&edge.from)?;
            let to = lookup(&edge.to)?;
            outgoing[from].push((edge.rel_type.clone(), to));
            incoming[to].push((edge.rel_type, from));
        }

        info!("Loaded graph with {} nodes and {} edges", nodes.len(), edge_count);
        Ok(Self {
            nodes,
            outgoing,
            incoming,
            edge_count,
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Nodes reachable from `node` over matching edges, in insertion order.
    fn neighbors<'a>(
        &'a self,
        node: usize,
        edge: &'a EdgeType,
        direction: Direction,
        labels: &'a LabelSet,
    ) -> impl Iterator<Item = usize> + 'a {
        let adjacency = match direction {
            Direction::Outgoing => &self.outgoing[node],
            Direction::Incoming => &self.incoming[node],
        };
        adjacency
            .iter()
            .filter(move |(rel_type, target)| {
                edge.matches(rel_type) && labels.matches(&self.nodes[*target].labels)
            })
            .map(|(_, target)| *target)
    }

    fn passes_filters(&self, node: usize, query: &TraversalQuery) -> bool {
        let binding = &self.nodes[node];
        query.filters().all(|(filter, param)| {
            let actual = binding.attribute(&filter.attribute).and_then(Value::as_str);
            let expected = query.filter_value(&param);
            match filter.op {
                FilterOp::Equals => actual.is_some() && actual == expected,
                FilterOp::NotEquals => actual != expected,
            }
        })
    }

    fn match_rows(&self, query: &TraversalQuery) -> Vec<Vec<Option<usize>>> {
        let spec = query.spec();
        let anchor = &spec.anchor;
        let patient_id = query.patient_id();

        let anchors = self.nodes.iter().enumerate().filter(|(_, node)| {
            anchor.labels.matches(&node.labels)
                && node.attribute(&anchor.id_attribute).and_then(Value::as_str) == Some(patient_id)
        });

        let mut rows: Vec<Vec<Option<usize>>> = Vec::new();
        for (anchor_index, _) in anchors {
            let Some(mandatory) = &spec.mandatory else {
                rows.push(vec![Some(anchor_index)]);
                continue;
            };
            for target in self.neighbors(
                anchor_index,
                &mandatory.edge,
                mandatory.direction,
                &mandatory.labels,
            ) {
                if self.passes_filters(target, query) {
                    rows.push(vec![Some(anchor_index), Some(target)]);
                }
            }
        }

        let aliases = spec.aliases();
        for hop in &spec.optional {
            let Some(source) = aliases.iter().position(|alias| *alias == hop.from) else {
                continue;
            };
            let mut expanded = Vec::with_capacity(rows.len());
            for row in rows {
                let targets: Vec<usize> = match row[source] {
                    Some(node) => {
                        let mut targets =
                            self.neighbors(node, &hop.edge, hop.direction, &hop.labels);
                        match hop.cardinality {
                            Cardinality::One => targets.next().into_iter().collect(),
                            Cardinality::Many => targets.collect(),
                        }
                    }
                    None => Vec::new(),
                };
                if targets.is_empty() {
                    let mut row = row;
                    row.push(None);
                    expanded.push(row);
                } else {
                    for target in targets {
                        let mut row = row.clone();
                        row.push(Some(target));
                        expanded.push(row);
                    }
                }
            }
            rows = expanded;
        }

        rows
    }
}

/// Replaces an embedded JSON object, or array of objects, with its parsed value.
///
/// Arrays of scalars stay text: display strings such as `"[1]"` must keep
/// feeding text sets.
fn decode_embedded_value(value: &mut Value) {
    let Value::String(text) = value else {
        return;
    };
    let trimmed = text.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return;
    }
    let Ok(parsed) = serde_json::from_str::<Value>(text) else {
        return;
    };
    let composite = match &parsed {
        Value::Object(_) => true,
        Value::Array(items) => !items.is_empty() && items.iter().all(Value::is_object),
        _ => false,
    };
    if composite {
        *value = parsed;
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn execute(&self, query: &TraversalQuery) -> Result<Vec<RawRow>, StoreError> {
        let aliases = query.spec().aliases();
        let rows: Vec<RawRow> = self
            .match_rows(query)
            .into_iter()
            .map(|positions| {
                aliases
                    .iter()
                    .zip(positions)
                    .fold(RawRow::new(), |row, (alias, position)| {
                        row.with(alias, position.map(|i| Arc::clone(&self.nodes[i])))
                    })
            })
            .collect();

        debug!("View '{}' matched {} rows", query.view(), rows.len());
        Ok(rows)
    }
}
