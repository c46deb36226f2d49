//! # Traversal Executor
//!
//! Compiles a [`ViewSpec`] and a patient id into a [`TraversalQuery`] and runs it
//! against a [`GraphStore`] under a deadline.
//!
//! The patient id and every filter constant travel as [`BoundParams`]. The
//! Cypher rendering produced by [`TraversalQuery::to_cypher`] contains only
//! catalog identifiers (validated when the catalog was built) and `$parameter`
//! references, so no caller-supplied text ever becomes part of the query.
//!
//! ## Execution semantics
//!
//! 1. Point-match the anchor node by exact equality on its id attribute
//! 2. Follow the mandatory edge; no match means no rows. Anchor-only views
//!    yield one row per matched anchor instead
//! 3. Expand every optional hop as a left-outer join: a missing target binds
//!    null, `Many` fans out one row per target, `One` keeps the first target
//! 4. A null source nulls every hop downstream of it

use crate::ViewError;
use crate::catalog::{
    Cardinality, Direction, EdgeType, FilterOp, LabelSet, PropertyFilter, ViewSpec,
};
use crate::store::{GraphStore, RawRow, StoreError};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Name of the parameter carrying the patient id.
pub const PATIENT_ID_PARAM: &str = "patientId";

/// Typed parameters bound to a traversal, keyed by parameter name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoundParams(BTreeMap<String, String>);

impl BoundParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn bind(&mut self, name: String, value: String) {
        self.0.insert(name, value);
    }
}

fn filter_param(index: usize) -> String {
    format!("filter{}", index)
}

/// A compiled, parameterized traversal for one view and one patient.
#[derive(Debug, Clone)]
pub struct TraversalQuery {
    spec: Arc<ViewSpec>,
    params: BoundParams,
}

impl TraversalQuery {
    pub fn spec(&self) -> &ViewSpec {
        &self.spec
    }

    pub fn view(&self) -> &str {
        &self.spec.name
    }

    pub fn params(&self) -> &BoundParams {
        &self.params
    }

    pub fn patient_id(&self) -> &str {
        self.params.get(PATIENT_ID_PARAM).unwrap_or_default()
    }

    /// Filters on the primary entity, each with the name of its bound parameter.
    pub fn filters(&self) -> impl Iterator<Item = (&PropertyFilter, String)> {
        self.spec
            .mandatory
            .iter()
            .flat_map(|mandatory| mandatory.filters.iter())
            .enumerate()
            .map(|(index, filter)| (filter, filter_param(index)))
    }

    /// Value bound for a filter parameter.
    pub fn filter_value(&self, param: &str) -> Option<&str> {
        self.params.get(param)
    }

    /// Renders the traversal as parameterized Cypher.
    pub fn to_cypher(&self) -> String {
        let spec = &self.spec;
        let anchor = &spec.anchor;
        let mut cypher = String::new();

        let _ = writeln!(cypher, "MATCH {}", node_pattern(&anchor.alias, &anchor.labels));
        let mut conditions = vec![format!(
            "{}.{} = ${}",
            anchor.alias, anchor.id_attribute, PATIENT_ID_PARAM
        )];
        conditions.extend(label_condition(&anchor.labels, &anchor.alias));
        let _ = writeln!(cypher, "WHERE {}", conditions.join(" AND "));

        let mut bound = vec![anchor.alias.as_str()];
        if let Some(mandatory) = &spec.mandatory {
            let _ = writeln!(
                cypher,
                "MATCH {}",
                hop_pattern(
                    &anchor.alias,
                    &mandatory.edge,
                    mandatory.direction,
                    &mandatory.alias,
                    &mandatory.labels
                )
            );
            let mut conditions: Vec<String> =
                label_condition(&mandatory.labels, &mandatory.alias).into_iter().collect();
            for (filter, param) in self.filters() {
                conditions.push(match filter.op {
                    FilterOp::Equals => {
                        format!("{}.{} = ${}", mandatory.alias, filter.attribute, param)
                    }
                    FilterOp::NotEquals => format!(
                        "coalesce({}.{}, '') <> ${}",
                        mandatory.alias, filter.attribute, param
                    ),
                });
            }
            if !conditions.is_empty() {
                let _ = writeln!(cypher, "WHERE {}", conditions.join(" AND "));
            }
            bound.push(mandatory.alias.as_str());
        }

        for hop in &spec.optional {
            let _ = writeln!(
                cypher,
                "OPTIONAL MATCH {}",
                hop_pattern(&hop.from, &hop.edge, hop.direction, &hop.alias, &hop.labels)
            );
            if let Some(condition) = label_condition(&hop.labels, &hop.alias) {
                let _ = writeln!(cypher, "WHERE {}", condition);
            }
            if hop.cardinality == Cardinality::One {
                let _ = writeln!(
                    cypher,
                    "WITH {}, head(collect({})) AS {}",
                    bound.join(", "),
                    hop.alias,
                    hop.alias
                );
            }
            bound.push(hop.alias.as_str());
        }

        let _ = write!(cypher, "RETURN {}", bound.join(", "));
        cypher
    }
}

fn node_pattern(alias: &str, labels: &LabelSet) -> String {
    match labels.labels() {
        [label] => format!("({}:{})", alias, label),
        _ => format!("({})", alias),
    }
}

/// Polymorphic label sets are matched with a disjunction in the WHERE clause.
fn label_condition(labels: &LabelSet, alias: &str) -> Option<String> {
    if !labels.is_polymorphic() {
        return None;
    }
    let alternatives: Vec<String> = labels
        .labels()
        .iter()
        .map(|label| format!("{}:{}", alias, label))
        .collect();
    Some(format!("({})", alternatives.join(" OR ")))
}

fn hop_pattern(
    from: &str,
    edge: &EdgeType,
    direction: Direction,
    alias: &str,
    labels: &LabelSet,
) -> String {
    let relationship = match edge {
        EdgeType::Typed(rel_type) => format!("[:{}]", rel_type),
        EdgeType::Any => String::new(),
    };
    let target = node_pattern(alias, labels);
    match direction {
        Direction::Outgoing => format!("({})-{}->{}", from, relationship, target),
        Direction::Incoming => format!("({})<-{}-{}", from, relationship, target),
    }
}

/// Runs compiled traversals against a graph store.
#[derive(Clone)]
pub struct TraversalExecutor {
    store: Arc<dyn GraphStore>,
}

impl std::fmt::Debug for TraversalExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraversalExecutor").finish_non_exhaustive()
    }
}

impl TraversalExecutor {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Binds a patient id to a view.
    ///
    /// The id is bound exactly as given; it is only rejected when it is empty
    /// or whitespace.
    pub fn compile(spec: Arc<ViewSpec>, patient_id: &str) -> Result<TraversalQuery, ViewError> {
        if patient_id.trim().is_empty() {
            return Err(ViewError::Validation(
                "patient id must not be empty".to_string(),
            ));
        }

        let mut params = BoundParams::default();
        params.bind(PATIENT_ID_PARAM.to_string(), patient_id.to_string());
        let filters = spec.mandatory.iter().flat_map(|mandatory| mandatory.filters.iter());
        for (index, filter) in filters.enumerate() {
            params.bind(filter_param(index), filter.value.clone());
        }

        Ok(TraversalQuery { spec, params })
    }

    /// Executes the query, failing with `TraversalTimeout` once `deadline` passes.
    pub async fn execute(
        &self,
        query: &TraversalQuery,
        deadline: Duration,
    ) -> Result<Vec<RawRow>, ViewError> {
        debug!(
            "Executing traversal for view '{}' with {} bound parameters",
            query.view(),
            query.params().len()
        );

        let outcome = tokio::time::timeout(deadline, self.store.execute(query)).await;
        match outcome {
            Err(_) => Err(ViewError::TraversalTimeout {
                view: query.view().to_string(),
                deadline,
            }),
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(StoreError::Timeout(_))) => Err(ViewError::TraversalTimeout {
                view: query.view().to_string(),
                deadline,
            }),
            Ok(Err(StoreError::Unavailable(msg))) => Err(ViewError::StoreUnavailable(msg)),
            Ok(Err(e)) => {
                error!(
                    "Traversal failed for view '{}', patient '{}': {}\n{}",
                    query.view(),
                    query.patient_id(),
                    e,
                    query.to_cypher()
                );
                Err(ViewError::Internal(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Rule;
    use async_trait::async_trait;

    fn conditions() -> Arc<ViewSpec> {
        Arc::new(
            ViewSpec::builder("conditions")
                .mandatory(
                    EdgeType::typed("HAS_CONDITION"),
                    Direction::Outgoing,
                    "c",
                    LabelSet::single("Condition"),
                )
                .optional(
                    "c",
                    EdgeType::typed("ENCODED_AS"),
                    Direction::Outgoing,
                    "code",
                    LabelSet::single("Code"),
                    Cardinality::Many,
                )
                .field("conditionCode", Rule::passthrough("code", "code"))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_compile_binds_patient_id() {
        let query = TraversalExecutor::compile(conditions(), " p1 ").unwrap();
        assert_eq!(query.patient_id(), " p1 ");
        assert_eq!(query.params().get(PATIENT_ID_PARAM), Some(" p1 "));
        assert_eq!(query.view(), "conditions");
    }

    #[test]
    fn test_compile_rejects_blank_ids() {
        for id in ["", "   ", "\t\n"] {
            assert!(matches!(
                TraversalExecutor::compile(conditions(), id),
                Err(ViewError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_cypher_rendering() {
        let query = TraversalExecutor::compile(conditions(), "p1").unwrap();
        assert_eq!(
            query.to_cypher(),
            "MATCH (p:Patient)\n\
             WHERE p.id = $patientId\n\
             MATCH (p)-[:HAS_CONDITION]->(c:Condition)\n\
             OPTIONAL MATCH (c)-[:ENCODED_AS]->(code:Code)\n\
             RETURN p, c, code"
        );
    }

    #[test]
    fn test_cypher_filters_polymorphism_and_cardinality() {
        let medications = Arc::new(
            ViewSpec::builder("medications")
                .mandatory(
                    EdgeType::typed("HAS_MEDICATION_EVENT"),
                    Direction::Outgoing,
                    "me",
                    LabelSet::single("MedicationEvent"),
                )
                .filter("eventType", FilterOp::NotEquals, "Immunization")
                .optional(
                    "me",
                    EdgeType::typed("REFERS_TO"),
                    Direction::Outgoing,
                    "m",
                    LabelSet::single("Medication"),
                    Cardinality::One,
                )
                .optional(
                    "me",
                    EdgeType::Any,
                    Direction::Incoming,
                    "prov",
                    LabelSet::any_of(&["Practitioner", "Organization"]),
                    Cardinality::Many,
                )
                .field("medication", Rule::passthrough("m", "name"))
                .build()
                .unwrap(),
        );

        let query = TraversalExecutor::compile(medications, "p1").unwrap();
        let cypher = query.to_cypher();

        assert!(cypher.contains(
            "MATCH (p)-[:HAS_MEDICATION_EVENT]->(me:MedicationEvent)\n\
             WHERE coalesce(me.eventType, '') <> $filter0\n"
        ));
        assert!(cypher.contains("WITH p, me, head(collect(m)) AS m\n"));
        assert!(cypher.contains(
            "OPTIONAL MATCH (me)<--(prov)\nWHERE (prov:Practitioner OR prov:Organization)\n"
        ));
        assert!(cypher.ends_with("RETURN p, me, m, prov"));
        assert_eq!(query.filter_value("filter0"), Some("Immunization"));
        assert!(!cypher.contains("Immunization"));
    }

    #[test]
    fn test_cypher_for_anchor_only_view() {
        let statement = Arc::new(
            ViewSpec::builder("patientStatement")
                .anchor_only()
                .field("content", Rule::decode("p", "content", ""))
                .build()
                .unwrap(),
        );
        let query = TraversalExecutor::compile(statement, "p1").unwrap();
        assert_eq!(
            query.to_cypher(),
            "MATCH (p:Patient)\nWHERE p.id = $patientId\nRETURN p"
        );
        assert_eq!(query.params().len(), 1);
        assert_eq!(query.filters().count(), 0);
    }

    #[test]
    fn test_patient_id_never_reaches_query_text() {
        let hostile = "x' OR 1=1 WITH p MATCH (n) DETACH DELETE n //";
        let query = TraversalExecutor::compile(conditions(), hostile).unwrap();
        assert!(!query.to_cypher().contains(hostile));
        assert_eq!(query.patient_id(), hostile);
    }

    struct FailingStore(fn() -> StoreError);

    #[async_trait]
    impl GraphStore for FailingStore {
        async fn execute(&self, _query: &TraversalQuery) -> Result<Vec<RawRow>, StoreError> {
            Err((self.0)())
        }
    }

    struct SlowStore;

    #[async_trait]
    impl GraphStore for SlowStore {
        async fn execute(&self, _query: &TraversalQuery) -> Result<Vec<RawRow>, StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_store_errors_are_mapped() {
        let query = TraversalExecutor::compile(conditions(), "p1").unwrap();
        let deadline = Duration::from_secs(1);

        let unavailable = TraversalExecutor::new(Arc::new(FailingStore(|| {
            StoreError::Unavailable("connection refused".to_string())
        })));
        assert!(matches!(
            unavailable.execute(&query, deadline).await,
            Err(ViewError::StoreUnavailable(_))
        ));

        let timeout = TraversalExecutor::new(Arc::new(FailingStore(|| {
            StoreError::Timeout("server side".to_string())
        })));
        assert!(matches!(
            timeout.execute(&query, deadline).await,
            Err(ViewError::TraversalTimeout { .. })
        ));

        let invalid = TraversalExecutor::new(Arc::new(FailingStore(|| {
            StoreError::InvalidQuery("syntax".to_string())
        })));
        assert!(matches!(
            invalid.execute(&query, deadline).await,
            Err(ViewError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_deadline_is_enforced() {
        let query = TraversalExecutor::compile(conditions(), "p1").unwrap();
        let executor = TraversalExecutor::new(Arc::new(SlowStore));

        match executor.execute(&query, Duration::from_millis(20)).await {
            Err(ViewError::TraversalTimeout { view, deadline }) => {
                assert_eq!(view, "conditions");
                assert_eq!(deadline, Duration::from_millis(20));
            }
            other => panic!("Expected TraversalTimeout, got {:?}", other),
        }
    }
}
