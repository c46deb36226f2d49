//! # Query Catalog
//!
//! Views are declared as data. A [`ViewSpec`] names the anchor node, the mandatory
//! edge to the primary entity set (absent for views over the anchor node
//! itself), an ordered list of optional hops, the output
//! fields with their resolution [`Rule`]s and the [`DistinctPolicy`]. A
//! [`QueryCatalog`] maps view names to specs and is never mutated once built.
//!
//! ## Validation
//!
//! Specs are validated when built, not when executed:
//!
//! - labels, edge types, aliases and attribute names must be plain identifiers
//!   (`[A-Za-z_][A-Za-z0-9_]*`), so they can be embedded in query text safely
//! - aliases are unique within a view
//! - every optional hop starts from an alias declared before it
//! - every rule operand refers to a declared alias
//! - field names are unique and at least one field is declared
//!
//! ## Example
//!
//! ```rust
//! use atrius_graph_views::catalog::{
//!     Cardinality, Direction, DistinctPolicy, EdgeType, LabelSet, QueryCatalog, Rule,
//!     TextSource, ViewSpec,
//! };
//!
//! let spec = ViewSpec::builder("conditions")
//!     .mandatory(EdgeType::typed("HAS_CONDITION"), Direction::Outgoing, "c", LabelSet::single("Condition"))
//!     .optional("c", EdgeType::typed("ENCODED_AS"), Direction::Outgoing, "code", LabelSet::single("Code"), Cardinality::Many)
//!     .field("condition", Rule::text_set(vec![TextSource::attribute("c", "display"), TextSource::name_of("code")], None))
//!     .field("conditionCode", Rule::passthrough("code", "code"))
//!     .distinct(DistinctPolicy::Collapse)
//!     .build()?;
//!
//! let catalog = QueryCatalog::builder("example").register(spec).build()?;
//! assert!(catalog.get("conditions").is_ok());
//! assert!(catalog.get("labs").is_err());
//! # Ok::<(), atrius_graph_views::ViewError>(())
//! ```

use crate::ViewError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

fn ensure_identifier(kind: &str, value: &str, view: &str) -> Result<(), ViewError> {
    if IDENTIFIER.is_match(value) {
        Ok(())
    } else {
        Err(ViewError::InvalidViewSpec(format!(
            "{} '{}' in view '{}' is not a valid identifier",
            kind, value, view
        )))
    }
}

/// A set of node labels; a node matches when it carries any of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet(Vec<String>);

impl LabelSet {
    pub fn single(label: &str) -> Self {
        LabelSet(vec![label.to_string()])
    }

    /// A polymorphic endpoint matching the union of the given labels.
    pub fn any_of(labels: &[&str]) -> Self {
        LabelSet(labels.iter().map(|l| l.to_string()).collect())
    }

    pub fn labels(&self) -> &[String] {
        &self.0
    }

    pub fn is_polymorphic(&self) -> bool {
        self.0.len() > 1
    }

    pub fn matches(&self, node_labels: &[String]) -> bool {
        node_labels.iter().any(|l| self.0.contains(l))
    }

    /// Returns the first of the node's labels that belongs to this set.
    pub fn discriminate<'a>(&self, node_labels: &'a [String]) -> Option<&'a str> {
        node_labels
            .iter()
            .find(|l| self.0.contains(l))
            .map(String::as_str)
    }
}

/// Direction of an edge relative to the node the hop starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Relationship type of a hop; `Any` follows untyped edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeType {
    Typed(String),
    Any,
}

impl EdgeType {
    pub fn typed(rel_type: &str) -> Self {
        EdgeType::Typed(rel_type.to_string())
    }

    pub fn matches(&self, rel_type: &str) -> bool {
        match self {
            EdgeType::Typed(expected) => expected == rel_type,
            EdgeType::Any => true,
        }
    }
}

/// How many targets an optional hop contributes per source row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// At most one target: the first match in store order.
    One,
    /// Every match becomes its own row.
    Many,
}

/// Comparison applied by a [`PropertyFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equals,
    /// A missing attribute counts as not equal.
    NotEquals,
}

/// Restricts the primary entity set by comparing a string attribute to a
/// constant. The constant travels as a bound parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyFilter {
    pub attribute: String,
    pub op: FilterOp,
    pub value: String,
}

/// The node every traversal starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub alias: String,
    pub labels: LabelSet,
    /// Attribute compared by exact equality with the patient id
    pub id_attribute: String,
}

impl Default for Anchor {
    fn default() -> Self {
        Anchor {
            alias: "p".to_string(),
            labels: LabelSet::single("Patient"),
            id_attribute: "id".to_string(),
        }
    }
}

/// The required hop from the anchor to the primary entity set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MandatoryEdge {
    pub edge: EdgeType,
    pub direction: Direction,
    pub alias: String,
    pub labels: LabelSet,
    pub filters: Vec<PropertyFilter>,
}

/// A left-outer hop from an already bound alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalHop {
    pub from: String,
    pub edge: EdgeType,
    pub direction: Direction,
    pub alias: String,
    pub labels: LabelSet,
    pub cardinality: Cardinality,
}

/// Reference to an attribute of a bound node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrRef {
    pub alias: String,
    pub attribute: String,
}

impl AttrRef {
    pub fn new(alias: &str, attribute: &str) -> Self {
        AttrRef {
            alias: alias.to_string(),
            attribute: attribute.to_string(),
        }
    }
}

/// Dot-separated key path into a decoded composite attribute. Numeric segments
/// index arrays; the empty path selects the whole value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn parse(path: &str) -> Self {
        KeyPath(
            path.split('.')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for KeyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// One contribution to a textSet field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextSource {
    /// A string attribute or a list-of-strings attribute
    Attribute(AttrRef),
    /// Constant values
    Literal(Vec<String>),
}

impl TextSource {
    pub fn attribute(alias: &str, attribute: &str) -> Self {
        TextSource::Attribute(AttrRef::new(alias, attribute))
    }

    /// The `name` attribute of a related node, typically a Code.
    pub fn name_of(alias: &str) -> Self {
        TextSource::Attribute(AttrRef::new(alias, "name"))
    }

    pub fn literal(values: &[&str]) -> Self {
        TextSource::Literal(values.iter().map(|v| v.to_string()).collect())
    }
}

/// Resolution rule for one output field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// The attribute unchanged.
    Passthrough(AttrRef),
    /// Parse a JSON-valued attribute and extract a nested path.
    Decode { source: AttrRef, path: KeyPath },
    /// The first candidate that resolves to a present value.
    Coalesce(Vec<Rule>),
    /// Lower-cased, deduplicated strings gathered from every source.
    TextSet {
        sources: Vec<TextSource>,
        exclude: Option<String>,
    },
    /// The label under which a polymorphic endpoint matched.
    Label { alias: String, candidates: LabelSet },
}

impl Rule {
    pub fn passthrough(alias: &str, attribute: &str) -> Self {
        Rule::Passthrough(AttrRef::new(alias, attribute))
    }

    pub fn decode(alias: &str, attribute: &str, path: &str) -> Self {
        Rule::Decode {
            source: AttrRef::new(alias, attribute),
            path: KeyPath::parse(path),
        }
    }

    pub fn coalesce(candidates: Vec<Rule>) -> Self {
        Rule::Coalesce(candidates)
    }

    pub fn text_set(sources: Vec<TextSource>, exclude: Option<&str>) -> Self {
        Rule::TextSet {
            sources,
            exclude: exclude.map(str::to_string),
        }
    }

    pub fn label(alias: &str, candidates: LabelSet) -> Self {
        Rule::Label {
            alias: alias.to_string(),
            candidates,
        }
    }

    /// Every alias the rule reads from.
    fn aliases<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Rule::Passthrough(attr) | Rule::Decode { source: attr, .. } => {
                out.push(&attr.alias)
            }
            Rule::Coalesce(candidates) => {
                for candidate in candidates {
                    candidate.aliases(out);
                }
            }
            Rule::TextSet { sources, .. } => {
                for source in sources {
                    if let TextSource::Attribute(attr) = source {
                        out.push(&attr.alias);
                    }
                }
            }
            Rule::Label { alias, .. } => out.push(alias),
        }
    }

    fn validate(&self, view: &str, field: &str) -> Result<(), ViewError> {
        match self {
            Rule::Passthrough(attr) | Rule::Decode { source: attr, .. } => {
                ensure_identifier("attribute", &attr.attribute, view)
            }
            Rule::Coalesce(candidates) => {
                if candidates.is_empty() {
                    return Err(ViewError::InvalidViewSpec(format!(
                        "coalesce for field '{}' in view '{}' has no candidates",
                        field, view
                    )));
                }
                candidates
                    .iter()
                    .try_for_each(|candidate| candidate.validate(view, field))
            }
            Rule::TextSet { sources, .. } => sources.iter().try_for_each(|source| match source {
                TextSource::Attribute(attr) => ensure_identifier("attribute", &attr.attribute, view),
                TextSource::Literal(_) => Ok(()),
            }),
            Rule::Label { candidates, .. } => candidates
                .labels()
                .iter()
                .try_for_each(|label| ensure_identifier("label", label, view)),
        }
    }
}

/// A named output field and the rule that resolves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub rule: Rule,
}

/// Post-projection deduplication policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistinctPolicy {
    /// Identical projected records collapse into one.
    Collapse,
    /// Every optional-branch combination is kept.
    FanOut,
}

/// Declarative description of one patient-scoped view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSpec {
    pub name: String,
    pub anchor: Anchor,
    /// `None` when the anchor node is the primary entity.
    pub mandatory: Option<MandatoryEdge>,
    pub optional: Vec<OptionalHop>,
    pub fields: Vec<FieldSpec>,
    pub distinct: DistinctPolicy,
}

impl ViewSpec {
    pub fn builder(name: &str) -> ViewSpecBuilder {
        ViewSpecBuilder {
            name: name.to_string(),
            anchor: Anchor::default(),
            mandatory: None,
            anchor_only: false,
            filters: Vec::new(),
            optional: Vec::new(),
            fields: Vec::new(),
            distinct: DistinctPolicy::Collapse,
        }
    }

    /// Aliases in binding order: anchor, primary entity, then optional hops.
    pub fn aliases(&self) -> Vec<&str> {
        let mut aliases = vec![self.anchor.alias.as_str()];
        aliases.extend(self.mandatory.iter().map(|edge| edge.alias.as_str()));
        aliases.extend(self.optional.iter().map(|hop| hop.alias.as_str()));
        aliases
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    fn validate(&self) -> Result<(), ViewError> {
        let view = self.name.as_str();
        if view.trim().is_empty() {
            return Err(ViewError::InvalidViewSpec(
                "view name must not be empty".to_string(),
            ));
        }

        for label in self.anchor.labels.labels() {
            ensure_identifier("label", label, view)?;
        }
        ensure_identifier("alias", &self.anchor.alias, view)?;
        ensure_identifier("attribute", &self.anchor.id_attribute, view)?;

        let mut declared: Vec<&str> = vec![self.anchor.alias.as_str()];
        if let Some(mandatory) = &self.mandatory {
            self.validate_hop(
                &mandatory.edge,
                &mandatory.alias,
                &mandatory.labels,
                &mut declared,
            )?;
            for filter in &mandatory.filters {
                ensure_identifier("attribute", &filter.attribute, view)?;
            }
        }

        for hop in &self.optional {
            if !declared.contains(&hop.from.as_str()) {
                return Err(ViewError::InvalidViewSpec(format!(
                    "optional hop '{}' in view '{}' starts from undeclared alias '{}'",
                    hop.alias, view, hop.from
                )));
            }
            self.validate_hop(&hop.edge, &hop.alias, &hop.labels, &mut declared)?;
        }

        if self.fields.is_empty() {
            return Err(ViewError::InvalidViewSpec(format!(
                "view '{}' declares no fields",
                view
            )));
        }

        let mut names = HashSet::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return Err(ViewError::InvalidViewSpec(format!(
                    "field '{}' is declared twice in view '{}'",
                    field.name, view
                )));
            }
            field.rule.validate(view, &field.name)?;

            let mut used = Vec::new();
            field.rule.aliases(&mut used);
            if let Some(unknown) = used.iter().find(|alias| !declared.contains(*alias)) {
                return Err(ViewError::InvalidViewSpec(format!(
                    "field '{}' in view '{}' reads undeclared alias '{}'",
                    field.name, view, unknown
                )));
            }
        }

        Ok(())
    }

    fn validate_hop<'a>(
        &self,
        edge: &EdgeType,
        alias: &'a str,
        labels: &LabelSet,
        declared: &mut Vec<&'a str>,
    ) -> Result<(), ViewError> {
        let view = self.name.as_str();
        if let EdgeType::Typed(rel_type) = edge {
            ensure_identifier("edge type", rel_type, view)?;
        }
        if labels.labels().is_empty() {
            return Err(ViewError::InvalidViewSpec(format!(
                "alias '{}' in view '{}' has no target labels",
                alias, view
            )));
        }
        for label in labels.labels() {
            ensure_identifier("label", label, view)?;
        }
        ensure_identifier("alias", alias, view)?;
        if declared.contains(&alias) {
            return Err(ViewError::InvalidViewSpec(format!(
                "alias '{}' is bound twice in view '{}'",
                alias, view
            )));
        }
        declared.push(alias);
        Ok(())
    }
}

/// Fluent builder for [`ViewSpec`]; the anchor defaults to `(p:Patient)`
/// matched on `id`.
#[derive(Debug, Clone)]
pub struct ViewSpecBuilder {
    name: String,
    anchor: Anchor,
    mandatory: Option<MandatoryEdge>,
    anchor_only: bool,
    filters: Vec<PropertyFilter>,
    optional: Vec<OptionalHop>,
    fields: Vec<FieldSpec>,
    distinct: DistinctPolicy,
}

impl ViewSpecBuilder {
    pub fn anchor(mut self, alias: &str, labels: LabelSet, id_attribute: &str) -> Self {
        self.anchor = Anchor {
            alias: alias.to_string(),
            labels,
            id_attribute: id_attribute.to_string(),
        };
        self
    }

    pub fn mandatory(
        mut self,
        edge: EdgeType,
        direction: Direction,
        alias: &str,
        labels: LabelSet,
    ) -> Self {
        self.mandatory = Some(MandatoryEdge {
            edge,
            direction,
            alias: alias.to_string(),
            labels,
            filters: Vec::new(),
        });
        self
    }

    /// Projects the anchor node itself instead of following a mandatory edge.
    pub fn anchor_only(mut self) -> Self {
        self.anchor_only = true;
        self
    }

    /// Adds a filter on the primary entity. Filters are kept until
    /// [`build`](Self::build), so they may be declared before or after
    /// [`mandatory`](Self::mandatory).
    pub fn filter(mut self, attribute: &str, op: FilterOp, value: &str) -> Self {
        self.filters.push(PropertyFilter {
            attribute: attribute.to_string(),
            op,
            value: value.to_string(),
        });
        self
    }

    pub fn optional(
        mut self,
        from: &str,
        edge: EdgeType,
        direction: Direction,
        alias: &str,
        labels: LabelSet,
        cardinality: Cardinality,
    ) -> Self {
        self.optional.push(OptionalHop {
            from: from.to_string(),
            edge,
            direction,
            alias: alias.to_string(),
            labels,
            cardinality,
        });
        self
    }

    pub fn field(mut self, name: &str, rule: Rule) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            rule,
        });
        self
    }

    pub fn distinct(mut self, policy: DistinctPolicy) -> Self {
        self.distinct = policy;
        self
    }

    pub fn build(self) -> Result<ViewSpec, ViewError> {
        let mandatory = match (self.mandatory, self.anchor_only) {
            (Some(mut mandatory), false) => {
                mandatory.filters.extend(self.filters);
                Some(mandatory)
            }
            (None, true) if self.filters.is_empty() => None,
            (None, true) => {
                return Err(ViewError::InvalidViewSpec(format!(
                    "view '{}' filters its anchor; filters need a mandatory edge",
                    self.name
                )));
            }
            (Some(_), true) => {
                return Err(ViewError::InvalidViewSpec(format!(
                    "view '{}' is anchor-only but declares a mandatory edge",
                    self.name
                )));
            }
            (None, false) => {
                return Err(ViewError::InvalidViewSpec(format!(
                    "view '{}' has no mandatory edge",
                    self.name
                )));
            }
        };
        let spec = ViewSpec {
            name: self.name,
            anchor: self.anchor,
            mandatory,
            optional: self.optional,
            fields: self.fields,
            distinct: self.distinct,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Immutable, versioned registry of view specifications.
#[derive(Debug, Clone)]
pub struct QueryCatalog {
    version: String,
    order: Vec<String>,
    views: HashMap<String, Arc<ViewSpec>>,
}

impl QueryCatalog {
    pub fn builder(version: &str) -> QueryCatalogBuilder {
        QueryCatalogBuilder {
            version: version.to_string(),
            specs: Vec::new(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Looks up a view by name.
    pub fn get(&self, view: &str) -> Result<Arc<ViewSpec>, ViewError> {
        self.views
            .get(view)
            .cloned()
            .ok_or_else(|| ViewError::NotFound(view.to_string()))
    }

    /// Registered view names, in registration order.
    pub fn view_names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct QueryCatalogBuilder {
    version: String,
    specs: Vec<ViewSpec>,
}

impl QueryCatalogBuilder {
    pub fn register(mut self, spec: ViewSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn build(self) -> Result<QueryCatalog, ViewError> {
        let mut order = Vec::with_capacity(self.specs.len());
        let mut views = HashMap::with_capacity(self.specs.len());
        for spec in self.specs {
            if views.contains_key(&spec.name) {
                return Err(ViewError::InvalidViewSpec(format!(
                    "view '{}' is registered twice",
                    spec.name
                )));
            }
            order.push(spec.name.clone());
            views.insert(spec.name.clone(), Arc::new(spec));
        }
        Ok(QueryCatalog {
            version: self.version,
            order,
            views,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ViewSpecBuilder {
        ViewSpec::builder("conditions").mandatory(
            EdgeType::typed("HAS_CONDITION"),
            Direction::Outgoing,
            "c",
            LabelSet::single("Condition"),
        )
    }

    #[test]
    fn test_builder_defaults_to_patient_anchor() {
        let spec = base()
            .field("condition", Rule::passthrough("c", "display"))
            .build()
            .unwrap();

        assert_eq!(spec.anchor.alias, "p");
        assert_eq!(spec.anchor.labels, LabelSet::single("Patient"));
        assert_eq!(spec.anchor.id_attribute, "id");
        assert_eq!(spec.distinct, DistinctPolicy::Collapse);
        assert_eq!(spec.aliases(), vec!["p", "c"]);
    }

    #[test]
    fn test_rejects_missing_mandatory_edge() {
        let result = ViewSpec::builder("empty")
            .field("x", Rule::passthrough("p", "id"))
            .build();
        assert!(matches!(result, Err(ViewError::InvalidViewSpec(_))));
    }

    #[test]
    fn test_filters_survive_any_declaration_order() {
        let early = ViewSpec::builder("immunizations")
            .filter("eventType", FilterOp::Equals, "Immunization")
            .mandatory(
                EdgeType::typed("HAS_MEDICATION_EVENT"),
                Direction::Outgoing,
                "me",
                LabelSet::single("MedicationEvent"),
            )
            .filter("status", FilterOp::NotEquals, "entered-in-error")
            .field("status", Rule::passthrough("me", "status"))
            .build()
            .unwrap();

        let filters: Vec<(&str, FilterOp, &str)> = early
            .mandatory
            .as_ref()
            .unwrap()
            .filters
            .iter()
            .map(|f| (f.attribute.as_str(), f.op, f.value.as_str()))
            .collect();
        assert_eq!(
            filters,
            vec![
                ("eventType", FilterOp::Equals, "Immunization"),
                ("status", FilterOp::NotEquals, "entered-in-error"),
            ]
        );

        let orphan = ViewSpec::builder("orphan")
            .filter("eventType", FilterOp::Equals, "Immunization")
            .field("x", Rule::passthrough("p", "id"))
            .build();
        assert!(matches!(orphan, Err(ViewError::InvalidViewSpec(_))));
    }

    #[test]
    fn test_anchor_only_views() {
        let statement = ViewSpec::builder("patientStatement")
            .anchor_only()
            .field("content", Rule::decode("p", "content", ""))
            .build()
            .unwrap();
        assert_eq!(statement.mandatory, None);
        assert_eq!(statement.aliases(), vec!["p"]);

        let filtered = ViewSpec::builder("patientStatement")
            .anchor_only()
            .filter("active", FilterOp::Equals, "true")
            .field("content", Rule::passthrough("p", "content"))
            .build();
        assert!(matches!(filtered, Err(ViewError::InvalidViewSpec(_))));

        let both = ViewSpec::builder("notes")
            .anchor_only()
            .mandatory(
                EdgeType::typed("HAS_NOTE"),
                Direction::Outgoing,
                "n",
                LabelSet::single("Note"),
            )
            .field("content", Rule::passthrough("n", "text"))
            .build();
        assert!(matches!(both, Err(ViewError::InvalidViewSpec(_))));
    }

    #[test]
    fn test_rejects_non_identifier_labels() {
        let result = ViewSpec::builder("bad")
            .mandatory(
                EdgeType::typed("HAS_CONDITION"),
                Direction::Outgoing,
                "c",
                LabelSet::single("Condition) DETACH DELETE (x"),
            )
            .field("x", Rule::passthrough("c", "display"))
            .build();

        match result {
            Err(ViewError::InvalidViewSpec(msg)) => assert!(msg.contains("not a valid identifier")),
            other => panic!("Expected InvalidViewSpec, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_hop_from_undeclared_alias() {
        let result = base()
            .optional(
                "ac",
                EdgeType::typed("ENCODED_AS"),
                Direction::Outgoing,
                "acode",
                LabelSet::single("Code"),
                Cardinality::Many,
            )
            .field("x", Rule::passthrough("c", "display"))
            .build();

        match result {
            Err(ViewError::InvalidViewSpec(msg)) => assert!(msg.contains("undeclared alias 'ac'")),
            other => panic!("Expected InvalidViewSpec, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_duplicate_alias() {
        let result = base()
            .optional(
                "c",
                EdgeType::typed("ENCODED_AS"),
                Direction::Outgoing,
                "c",
                LabelSet::single("Code"),
                Cardinality::Many,
            )
            .field("x", Rule::passthrough("c", "display"))
            .build();
        assert!(matches!(result, Err(ViewError::InvalidViewSpec(_))));
    }

    #[test]
    fn test_rejects_rule_on_unknown_alias() {
        let result = base()
            .field(
                "condition",
                Rule::text_set(vec![TextSource::name_of("code")], None),
            )
            .build();

        match result {
            Err(ViewError::InvalidViewSpec(msg)) => assert!(msg.contains("undeclared alias 'code'")),
            other => panic!("Expected InvalidViewSpec, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_duplicate_fields_and_empty_coalesce() {
        let duplicate = base()
            .field("x", Rule::passthrough("c", "a"))
            .field("x", Rule::passthrough("c", "b"))
            .build();
        assert!(matches!(duplicate, Err(ViewError::InvalidViewSpec(_))));

        let empty = base().field("x", Rule::coalesce(vec![])).build();
        assert!(matches!(empty, Err(ViewError::InvalidViewSpec(_))));
    }

    #[test]
    fn test_catalog_lookup_and_order() {
        let first = base()
            .field("x", Rule::passthrough("c", "display"))
            .build()
            .unwrap();
        let second = ViewSpec::builder("notes")
            .mandatory(
                EdgeType::typed("HAS_NOTE"),
                Direction::Outgoing,
                "n",
                LabelSet::single("Note"),
            )
            .field("content", Rule::passthrough("n", "text"))
            .build()
            .unwrap();

        let catalog = QueryCatalog::builder("test-1")
            .register(first)
            .register(second)
            .build()
            .unwrap();

        assert_eq!(catalog.version(), "test-1");
        assert_eq!(catalog.view_names(), &["conditions".to_string(), "notes".to_string()]);
        assert_eq!(catalog.get("notes").unwrap().aliases(), vec!["p", "n"]);
        assert!(matches!(catalog.get("labs"), Err(ViewError::NotFound(name)) if name == "labs"));
    }

    #[test]
    fn test_catalog_rejects_duplicate_views() {
        let spec = base()
            .field("x", Rule::passthrough("c", "display"))
            .build()
            .unwrap();
        let result = QueryCatalog::builder("dup")
            .register(spec.clone())
            .register(spec)
            .build();
        assert!(matches!(result, Err(ViewError::InvalidViewSpec(_))));
    }

    #[test]
    fn test_label_set_discrimination() {
        let providers = LabelSet::any_of(&["Practitioner", "Organization"]);
        let labels = vec!["Resource".to_string(), "Organization".to_string()];

        assert!(providers.is_polymorphic());
        assert!(providers.matches(&labels));
        assert_eq!(providers.discriminate(&labels), Some("Organization"));
        assert_eq!(providers.discriminate(&["Patient".to_string()]), None);
    }

    #[test]
    fn test_key_path_parsing() {
        assert_eq!(
            KeyPath::parse("coding.0.code").segments(),
            &["coding".to_string(), "0".to_string(), "code".to_string()]
        );
        assert!(KeyPath::parse("").segments().is_empty());
        assert_eq!(KeyPath::parse("route.text").to_string(), "route.text");
    }
}
