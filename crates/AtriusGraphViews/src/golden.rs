//! # Golden Patient Data Model
//!
//! The golden record of a patient: the decoded `content` document of every
//! resource linked to the patient, grouped into named collections
//! (`condition`, `observation`, `location`, ...).
//!
//! Collections are declared with the same [`ViewSpec`] machinery as the
//! projected views. Each one has a single `content` field that decodes the
//! node's stored JSON document. A collection may union several branches; the
//! `location` collection, for instance, reaches locations both through the
//! organizations the patient interacts with and through the patient's
//! encounters, and keeps each distinct location document once.
//!
//! Records whose content is missing or cannot be decoded are skipped.

use crate::ViewError;
use crate::assembler::assemble;
use crate::catalog::{
    Cardinality, Direction, DistinctPolicy, EdgeType, LabelSet, Rule, ViewSpec, ViewSpecBuilder,
};
use crate::{FieldValue, ViewRecord};
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const GOLDEN_VERSION: &str = "1.0.0";

/// Collections fetched concurrently while assembling a full golden record.
pub const GOLDEN_BATCH_SIZE: usize = 5;

const CONTENT: &str = "content";

static GOLDEN_CATALOG: OnceCell<Arc<GoldenCatalog>> = OnceCell::new();

/// One named collection of the golden record.
#[derive(Debug, Clone)]
pub struct GoldenCollection {
    pub name: String,
    /// Traversals whose `content` values are concatenated in order
    pub branches: Vec<Arc<ViewSpec>>,
    pub distinct: DistinctPolicy,
}

impl GoldenCollection {
    /// Merges the records of every branch into this collection's items.
    pub fn merge(&self, branches: Vec<Vec<ViewRecord>>) -> GoldenItems {
        let records: Vec<ViewRecord> = branches
            .into_iter()
            .flatten()
            .filter_map(|record| record.values.into_iter().next())
            .filter(|value| !value.is_absent())
            .map(|value| ViewRecord {
                values: vec![value],
            })
            .collect();

        let data: Vec<Value> = assemble(self.distinct, records)
            .iter()
            .flat_map(|record| record.values.iter().map(FieldValue::to_json))
            .collect();

        GoldenItems {
            data_type: self.name.clone(),
            count: data.len(),
            data,
        }
    }
}

/// Ordered, immutable set of golden collections.
#[derive(Debug, Clone)]
pub struct GoldenCatalog {
    version: String,
    collections: Vec<GoldenCollection>,
}

impl GoldenCatalog {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn collections(&self) -> &[GoldenCollection] {
        &self.collections
    }

    pub fn names(&self) -> Vec<String> {
        self.collections.iter().map(|c| c.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Result<&GoldenCollection, ViewError> {
        self.collections
            .iter()
            .find(|collection| collection.name == name)
            .ok_or_else(|| ViewError::NotFound(name.to_string()))
    }
}

/// The items of one collection for one patient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoldenItems {
    pub data_type: String,
    pub count: usize,
    pub data: Vec<Value>,
}

/// The golden record of one patient.
#[derive(Debug, Clone, Serialize)]
pub struct GoldenPdm {
    pub patient_id: String,
    pub version: String,
    /// Collections in catalog order
    pub collections: Vec<GoldenItems>,
    /// Number of collections returned
    pub total_records: usize,
    pub record_counts: BTreeMap<String, usize>,
    /// Number of items across all collections
    pub total_items: usize,
}

impl GoldenPdm {
    pub fn new(patient_id: &str, version: &str, collections: Vec<GoldenItems>) -> Self {
        let record_counts = collections
            .iter()
            .map(|items| (items.data_type.clone(), items.count))
            .collect();
        GoldenPdm {
            patient_id: patient_id.to_string(),
            version: version.to_string(),
            total_records: collections.len(),
            total_items: collections.iter().map(|items| items.count).sum(),
            record_counts,
            collections,
        }
    }

    pub fn get(&self, data_type: &str) -> Option<&GoldenItems> {
        self.collections.iter().find(|items| items.data_type == data_type)
    }

    pub fn is_empty(&self) -> bool {
        self.total_items == 0
    }
}

/// Which collections hold data for a patient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoldenTypes {
    pub patient_id: String,
    pub available_data_types: Vec<String>,
    pub total_types: usize,
    pub all_possible_types: Vec<String>,
}

/// The shared golden catalog.
pub fn golden_catalog() -> Result<Arc<GoldenCatalog>, ViewError> {
    GOLDEN_CATALOG
        .get_or_try_init(|| build_golden_catalog().map(Arc::new))
        .cloned()
}

/// Builds a fresh copy of the golden catalog.
pub fn build_golden_catalog() -> Result<GoldenCatalog, ViewError> {
    let collections = vec![
        single("patientStatement", patient_statement()?),
        linked("condition", "HAS_CONDITION", "Condition")?,
        linked("observation", "HAS_OBSERVATION", "Observation")?,
        linked("documentReference", "HAS_DOCUMENT_REFERENCE", "DocumentReference")?,
        linked("diagnosticReport", "HAS_DIAGNOSTIC_REPORT", "DiagnosticReport")?,
        linked("procedure", "HAS_PROCEDURE", "Procedure")?,
        linked("encounter", "HAS_ENCOUNTER", "Encounter")?,
        linked("contactPerson", "HAS_CONTACT", "ContactPerson")?,
        linked("medicationEvent", "HAS_MEDICATION_EVENT", "MedicationEvent")?,
        linked("practitioner", "HAS_PRACTITIONER", "Practitioner")?,
        linked("allergy", "HAS_ALLERGY", "Allergy")?,
        linked("familyMemberHistory", "HAS_FAMILY_MEMBER_HISTORY", "FamilyMemberHistory")?,
        linked("composition", "HAS_COMPOSITION", "Composition")?,
        linked("serviceRequest", "HAS_SERVICE_REQUEST", "ServiceRequest")?,
        linked("careTeam", "HAS_CARE_TEAM", "CareTeam")?,
        linked("carePlan", "HAS_CARE_PLAN", "CarePlan")?,
        linked("organization", "INTERACTS_WITH", "Organization")?,
        location()?,
        single("practitionerRole", practitioner_role()?),
    ];

    Ok(GoldenCatalog {
        version: GOLDEN_VERSION.to_string(),
        collections,
    })
}

fn single(name: &str, spec: ViewSpec) -> GoldenCollection {
    GoldenCollection {
        name: name.to_string(),
        distinct: spec.distinct,
        branches: vec![Arc::new(spec)],
    }
}

fn content_of(
    builder: ViewSpecBuilder,
    alias: &str,
    policy: DistinctPolicy,
) -> Result<ViewSpec, ViewError> {
    builder
        .field(CONTENT, Rule::decode(alias, CONTENT, ""))
        .distinct(policy)
        .build()
}

fn from_patient(name: &str, rel_type: &str, alias: &str, label: &str) -> ViewSpecBuilder {
    ViewSpec::builder(name).mandatory(
        EdgeType::typed(rel_type),
        Direction::Outgoing,
        alias,
        LabelSet::single(label),
    )
}

/// Every `(p)-[:rel_type]->(x:label)` document, duplicates included.
fn linked(name: &str, rel_type: &str, label: &str) -> Result<GoldenCollection, ViewError> {
    let spec = content_of(
        from_patient(name, rel_type, "x", label),
        "x",
        DistinctPolicy::FanOut,
    )?;
    Ok(single(name, spec))
}

fn patient_statement() -> Result<ViewSpec, ViewError> {
    content_of(
        ViewSpec::builder("patientStatement").anchor_only(),
        "p",
        DistinctPolicy::FanOut,
    )
}

fn practitioner_role() -> Result<ViewSpec, ViewError> {
    let builder = from_patient("practitionerRole", "HAS_PRACTITIONER", "pr", "Practitioner")
        .optional(
            "pr",
            EdgeType::typed("HAS_ROLE"),
            Direction::Outgoing,
            "role",
            LabelSet::single("PractitionerRole"),
            Cardinality::Many,
        );
    content_of(builder, "role", DistinctPolicy::FanOut)
}

/// Locations managed by the patient's organizations, then locations of the
/// patient's encounters; each distinct document once.
fn location() -> Result<GoldenCollection, ViewError> {
    let via_organization = from_patient(
        "location_via_organization",
        "INTERACTS_WITH",
        "o",
        "Organization",
    )
    .optional(
        "o",
        EdgeType::typed("MANAGED_BY"),
        Direction::Incoming,
        "l",
        LabelSet::single("Location"),
        Cardinality::Many,
    );
    let via_encounter = from_patient("location_via_encounter", "HAS_ENCOUNTER", "e", "Encounter")
        .optional(
            "e",
            EdgeType::typed("TAKES_PLACE"),
            Direction::Outgoing,
            "l",
            LabelSet::single("Location"),
            Cardinality::Many,
        );

    Ok(GoldenCollection {
        name: "location".to_string(),
        branches: vec![
            Arc::new(content_of(via_organization, "l", DistinctPolicy::Collapse)?),
            Arc::new(content_of(via_encounter, "l", DistinctPolicy::Collapse)?),
        ],
        distinct: DistinctPolicy::Collapse,
    })
}
