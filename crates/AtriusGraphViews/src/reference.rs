//! # Reference Catalog
//!
//! The nine patient views of the clinical graph. The catalog is built on first
//! use and shared read-only for the rest of the process.
//!
//! | View | Primary entity | Policy |
//! |------|----------------|--------|
//! | `conditions` | `Condition` | Collapse |
//! | `procedures` | `Procedure` | Collapse |
//! | `encounters` | `Encounter` | Collapse |
//! | `allergies` | `Allergy` | Collapse |
//! | `medications` | `MedicationEvent` except immunizations | FanOut |
//! | `immunizations` | `MedicationEvent` of type `Immunization` | FanOut |
//! | `observations` | `Observation` | Collapse |
//! | `clinical_notes` | `Note` | Collapse |
//! | `providers` | `Practitioner` or `Organization` | Collapse |

use crate::ViewError;
use crate::catalog::{
    Cardinality, Direction, DistinctPolicy, EdgeType, FilterOp, LabelSet, QueryCatalog, Rule,
    TextSource, ViewSpec, ViewSpecBuilder,
};
use once_cell::sync::OnceCell;
use std::sync::Arc;

pub const CATALOG_VERSION: &str = "2024.1";

const ENCODED_AS: &str = "ENCODED_AS";
const ASSOCIATED_WITH: &str = "ASSOCIATED_WITH";
const IMMUNIZATION: &str = "Immunization";

static REFERENCE_CATALOG: OnceCell<Arc<QueryCatalog>> = OnceCell::new();

/// The shared reference catalog.
pub fn reference_catalog() -> Result<Arc<QueryCatalog>, ViewError> {
    REFERENCE_CATALOG
        .get_or_try_init(|| build_reference_catalog().map(Arc::new))
        .cloned()
}

/// Builds a fresh copy of the reference catalog.
pub fn build_reference_catalog() -> Result<QueryCatalog, ViewError> {
    QueryCatalog::builder(CATALOG_VERSION)
        .register(conditions()?)
        .register(procedures()?)
        .register(encounters()?)
        .register(allergies()?)
        .register(medications()?)
        .register(immunizations()?)
        .register(observations()?)
        .register(clinical_notes()?)
        .register(providers()?)
        .build()
}

/// A view over `(p:Patient)-[:rel_type]->(alias:label)`.
fn has(name: &str, rel_type: &str, alias: &str, label: &str) -> ViewSpecBuilder {
    ViewSpec::builder(name).mandatory(
        EdgeType::typed(rel_type),
        Direction::Outgoing,
        alias,
        LabelSet::single(label),
    )
}

/// Optional `(from)-[:ENCODED_AS]->(alias:Code)` hop.
fn encoded_as(builder: ViewSpecBuilder, from: &str, alias: &str) -> ViewSpecBuilder {
    builder.optional(
        from,
        EdgeType::typed(ENCODED_AS),
        Direction::Outgoing,
        alias,
        LabelSet::single("Code"),
        Cardinality::Many,
    )
}

/// Display strings of an entity and of its code.
fn display_and_code(alias: &str, code: &str) -> Rule {
    Rule::text_set(
        vec![TextSource::attribute(alias, "display"), TextSource::name_of(code)],
        None,
    )
}

/// Hops to the condition an event was performed for, plus its four fields.
fn associated_condition(builder: ViewSpecBuilder, from: &str) -> ViewSpecBuilder {
    let builder = builder.optional(
        from,
        EdgeType::typed(ASSOCIATED_WITH),
        Direction::Outgoing,
        "ac",
        LabelSet::single("Condition"),
        Cardinality::Many,
    );
    encoded_as(builder, "ac", "acode")
        .field("associatedCondition", display_and_code("ac", "acode"))
        .field("associatedConditionSystem", Rule::passthrough("acode", "system"))
        .field("associatedConditionCode", Rule::passthrough("acode", "code"))
        .field(
            "associatedConditionStatus",
            Rule::decode("ac", "clinicalStatus", "coding.0.code"),
        )
}

fn conditions() -> Result<ViewSpec, ViewError> {
    let builder = has("conditions", "HAS_CONDITION", "c", "Condition");
    encoded_as(builder, "c", "code")
        .field(
            "condition",
            Rule::text_set(
                vec![TextSource::attribute("c", "display"), TextSource::name_of("code")],
                Some("diagnosis"),
            ),
        )
        .field("conditionCode", Rule::passthrough("code", "code"))
        .field("codeSystem", Rule::passthrough("code", "system"))
        .field(
            "clinicalStatus",
            Rule::coalesce(vec![
                Rule::decode("c", "clinicalStatus", "coding.0.code"),
                Rule::decode("c", "clinicalStatus", "text"),
                Rule::passthrough("c", "status"),
            ]),
        )
        .field(
            "onsetDate",
            Rule::coalesce(vec![
                Rule::passthrough("c", "onsetDateTime"),
                Rule::decode("c", "onsetPeriod", "start"),
            ]),
        )
        .field(
            "abatementDate",
            Rule::coalesce(vec![
                Rule::passthrough("c", "abatementDateTime"),
                Rule::decode("c", "abatementPeriod", "start"),
            ]),
        )
        .distinct(DistinctPolicy::Collapse)
        .build()
}

fn procedures() -> Result<ViewSpec, ViewError> {
    let builder = encoded_as(
        has("procedures", "HAS_PROCEDURE", "pr", "Procedure"),
        "pr",
        "code",
    )
    .field(
        "startDate",
        Rule::coalesce(vec![
            Rule::passthrough("pr", "performedDateTime"),
            Rule::decode("pr", "performedPeriod", "start"),
        ]),
    )
    .field("procedure", display_and_code("pr", "code"))
    .field("procedureCode", Rule::passthrough("code", "code"))
    .field("codeSystem", Rule::passthrough("code", "system"))
    .field("procedureStatus", Rule::passthrough("pr", "status"));

    associated_condition(builder, "pr")
        .distinct(DistinctPolicy::Collapse)
        .build()
}

fn encounters() -> Result<ViewSpec, ViewError> {
    encoded_as(
        has("encounters", "HAS_ENCOUNTER", "e", "Encounter"),
        "e",
        "code",
    )
    .field(
        "startDate",
        Rule::coalesce(vec![
            Rule::decode("e", "period", "start"),
            Rule::passthrough("e", "startDate"),
        ]),
    )
    .field(
        "endDate",
        Rule::coalesce(vec![
            Rule::decode("e", "period", "end"),
            Rule::passthrough("e", "endDate"),
        ]),
    )
    .field(
        "encounterClassification",
        Rule::coalesce(vec![
            Rule::decode("e", "class", "display"),
            Rule::decode("e", "class", "code"),
            Rule::passthrough("e", "class"),
        ]),
    )
    .field("encounterType", display_and_code("e", "code"))
    .distinct(DistinctPolicy::Collapse)
    .build()
}

fn allergies() -> Result<ViewSpec, ViewError> {
    encoded_as(has("allergies", "HAS_ALLERGY", "a", "Allergy"), "a", "code")
        .optional(
            "a",
            EdgeType::typed("CAUSED_BY"),
            Direction::Incoming,
            "r",
            LabelSet::single("Reaction"),
            Cardinality::Many,
        )
        .field("allergyRecordedDate", Rule::passthrough("a", "recordedDate"))
        .field("allergy", display_and_code("a", "code"))
        .field("allergyCode", Rule::passthrough("code", "code"))
        .field("codeSystem", Rule::passthrough("code", "system"))
        .field(
            "allergyType",
            Rule::coalesce(vec![
                Rule::passthrough("a", "category"),
                Rule::passthrough("a", "type"),
            ]),
        )
        .field(
            "reactionRecordedDate",
            Rule::coalesce(vec![
                Rule::passthrough("r", "onset"),
                Rule::passthrough("r", "recordedDate"),
            ]),
        )
        .field("reactionSeverity", Rule::passthrough("r", "severity"))
        .distinct(DistinctPolicy::Collapse)
        .build()
}

fn medications() -> Result<ViewSpec, ViewError> {
    let builder = has("medications", "HAS_MEDICATION_EVENT", "me", "MedicationEvent")
        .filter("eventType", FilterOp::NotEquals, IMMUNIZATION);

    let builder = encoded_as(builder, "me", "code")
        .optional(
            "me",
            EdgeType::typed("REFERS_TO"),
            Direction::Outgoing,
            "m",
            LabelSet::single("Medication"),
            Cardinality::Many,
        )
        .field(
            "startDate",
            Rule::coalesce(vec![
                Rule::decode("me", "effectivePeriod", "start"),
                Rule::passthrough("me", "effectiveDateTime"),
                Rule::passthrough("me", "authoredOn"),
            ]),
        )
        .field("endDate", Rule::decode("me", "effectivePeriod", "end"))
        .field(
            "medication",
            Rule::text_set(
                vec![
                    TextSource::attribute("me", "display"),
                    TextSource::name_of("m"),
                    TextSource::name_of("code"),
                ],
                None,
            ),
        )
        .field("medicationCode", Rule::passthrough("code", "code"))
        .field("codeSystem", Rule::passthrough("code", "system"))
        .field("medicationStatus", Rule::passthrough("me", "status"))
        .field(
            "route",
            Rule::coalesce(vec![
                Rule::decode("me", "dosage", "route.text"),
                Rule::decode("me", "dosage", "route.coding.0.display"),
            ]),
        )
        .field(
            "dosage",
            Rule::coalesce(vec![
                Rule::decode("me", "dosage", "text"),
                Rule::passthrough("me", "dosageText"),
            ]),
        );

    associated_condition(builder, "me")
        .distinct(DistinctPolicy::FanOut)
        .build()
}

fn immunizations() -> Result<ViewSpec, ViewError> {
    let builder = has("immunizations", "HAS_MEDICATION_EVENT", "me", "MedicationEvent")
        .filter("eventType", FilterOp::Equals, IMMUNIZATION);

    encoded_as(builder, "me", "code")
        .field(
            "recordedDate",
            Rule::coalesce(vec![
                Rule::passthrough("me", "occurrenceDateTime"),
                Rule::passthrough("me", "recorded"),
            ]),
        )
        .field("status", Rule::passthrough("me", "status"))
        .field("immunization", display_and_code("me", "code"))
        .field("immunizationCode", Rule::passthrough("code", "code"))
        .field("codeSystem", Rule::passthrough("code", "system"))
        .distinct(DistinctPolicy::FanOut)
        .build()
}

fn observations() -> Result<ViewSpec, ViewError> {
    encoded_as(
        has("observations", "HAS_OBSERVATION", "o", "Observation"),
        "o",
        "code",
    )
    .optional(
        "o",
        EdgeType::typed("HAS_RESULT"),
        Direction::Incoming,
        "dr",
        LabelSet::single("DiagnosticReport"),
        Cardinality::Many,
    )
    .field(
        "startDate",
        Rule::coalesce(vec![
            Rule::decode("o", "effectivePeriod", "start"),
            Rule::passthrough("o", "effectiveDateTime"),
            Rule::passthrough("o", "issued"),
        ]),
    )
    .field("endDate", Rule::decode("o", "effectivePeriod", "end"))
    .field(
        "diagnosticReport",
        Rule::text_set(
            vec![TextSource::attribute("dr", "display"), TextSource::name_of("dr")],
            None,
        ),
    )
    .field(
        "observationType",
        Rule::coalesce(vec![
            Rule::decode("o", "category", "0.coding.0.code"),
            Rule::passthrough("o", "observationType"),
        ]),
    )
    .field("observation", display_and_code("o", "code"))
    .field("observationCode", Rule::passthrough("code", "code"))
    .field("codeSystem", Rule::passthrough("code", "system"))
    .field(
        "valueText",
        Rule::coalesce(vec![
            Rule::passthrough("o", "valueString"),
            Rule::decode("o", "valueCodeableConcept", "text"),
        ]),
    )
    .field(
        "valueQuantity",
        Rule::coalesce(vec![
            Rule::decode("o", "valueQuantity", ""),
            Rule::decode("o", "valueCodeableConcept", ""),
        ]),
    )
    .field(
        "category",
        Rule::coalesce(vec![
            Rule::decode("o", "category", "0.text"),
            Rule::decode("o", "category", "0.coding.0.display"),
        ]),
    )
    .distinct(DistinctPolicy::Collapse)
    .build()
}

fn clinical_notes() -> Result<ViewSpec, ViewError> {
    has("clinical_notes", "HAS_NOTE", "n", "Note")
        .field(
            "noteType",
            Rule::coalesce(vec![
                Rule::passthrough("n", "noteType"),
                Rule::passthrough("n", "category"),
            ]),
        )
        .field(
            "content",
            Rule::coalesce(vec![
                Rule::passthrough("n", "text"),
                Rule::passthrough("n", "content"),
            ]),
        )
        .distinct(DistinctPolicy::Collapse)
        .build()
}

fn providers() -> Result<ViewSpec, ViewError> {
    let provider_labels = LabelSet::any_of(&["Practitioner", "Organization"]);
    ViewSpec::builder("providers")
        .mandatory(
            EdgeType::Any,
            Direction::Outgoing,
            "prov",
            provider_labels.clone(),
        )
        .field("providerType", Rule::label("prov", provider_labels))
        .field(
            "name",
            Rule::coalesce(vec![
                Rule::decode("prov", "name", "0.text"),
                Rule::passthrough("prov", "name"),
            ]),
        )
        .field("telecom", Rule::decode("prov", "telecom", ""))
        .field("address", Rule::decode("prov", "address", "0.line.0"))
        .field("city", Rule::decode("prov", "address", "0.city"))
        .field("state", Rule::decode("prov", "address", "0.state"))
        .field("postalCode", Rule::decode("prov", "address", "0.postalCode"))
        .distinct(DistinctPolicy::Collapse)
        .build()
}
