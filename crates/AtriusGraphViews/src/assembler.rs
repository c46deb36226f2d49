//! # View Assembler
//!
//! Applies a view's [`DistinctPolicy`] to its projected records.

use crate::ViewRecord;
use crate::catalog::DistinctPolicy;

/// Applies the distinct policy, preserving first-occurrence order.
///
/// Records hold JSON values, which are not `Hash`, so `Collapse` scans the
/// records kept so far.
pub fn assemble(policy: DistinctPolicy, records: Vec<ViewRecord>) -> Vec<ViewRecord> {
    match policy {
        DistinctPolicy::FanOut => records,
        DistinctPolicy::Collapse => {
            let mut kept: Vec<ViewRecord> = Vec::with_capacity(records.len());
            for record in records {
                if !kept.contains(&record) {
                    kept.push(record);
                }
            }
            kept
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldValue;
    use serde_json::json;

    fn record(name: &str, code: Option<&str>) -> ViewRecord {
        ViewRecord {
            values: vec![
                FieldValue::text_set([name]),
                code.map(|c| FieldValue::from(json!(c)))
                    .unwrap_or(FieldValue::Null),
            ],
        }
    }

    #[test]
    fn test_collapse_keeps_first_occurrence_order() {
        let records = vec![
            record("Diabetes", None),
            record("asthma", Some("J45")),
            record("DIABETES", None),
            record("asthma", Some("J45")),
            record("asthma", None),
        ];

        let assembled = assemble(DistinctPolicy::Collapse, records);
        assert_eq!(
            assembled,
            vec![
                record("diabetes", None),
                record("asthma", Some("J45")),
                record("asthma", None),
            ]
        );
    }

    #[test]
    fn test_fan_out_keeps_duplicates() {
        let records = vec![record("aspirin", None), record("aspirin", None)];
        assert_eq!(assemble(DistinctPolicy::FanOut, records.clone()), records);
    }

    #[test]
    fn test_empty_input() {
        assert!(assemble(DistinctPolicy::Collapse, Vec::new()).is_empty());
    }
}
