//! # Output Formatting
//!
//! Serializes view results for the CLI and other consumers.
//!
//! - **JSON**: a pretty-printed array with one object per view:
//!   `{"patient_id", "data_type", "count", "data": [records]}`
//! - **NDJSON**: one record per line, tagged with its `data_type`
//! - **CSV**: one view only; string sets and composite values are written as
//!   JSON text, nulls as empty cells

use crate::{FieldValue, ViewError, ViewResult};
use serde::Serialize;

/// Supported output formats.
///
/// # Examples
///
/// ```rust
/// use atrius_graph_views::ContentType;
///
/// assert_eq!(ContentType::from_string("csv")?, ContentType::CsvWithHeader);
/// assert_eq!(ContentType::from_string("text/csv;header=false")?, ContentType::Csv);
/// assert_eq!(ContentType::from_string("application/x-ndjson")?, ContentType::NdJson);
/// assert!(ContentType::from_string("application/parquet").is_err());
/// # Ok::<(), atrius_graph_views::ViewError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// Comma-separated values format without headers
    Csv,
    /// Comma-separated values format with column headers
    CsvWithHeader,
    /// Pretty-printed JSON array format
    Json,
    /// Newline-delimited JSON format (NDJSON)
    NdJson,
}

impl ContentType {
    /// Parses a short format name or a MIME type.
    pub fn from_string(s: &str) -> Result<Self, ViewError> {
        match s {
            "csv" => Ok(ContentType::CsvWithHeader),
            "json" => Ok(ContentType::Json),
            "ndjson" => Ok(ContentType::NdJson),
            "text/csv;header=false" => Ok(ContentType::Csv),
            "text/csv" | "text/csv;header=true" => Ok(ContentType::CsvWithHeader),
            "application/json" => Ok(ContentType::Json),
            "application/ndjson" | "application/x-ndjson" => Ok(ContentType::NdJson),
            _ => Err(ViewError::UnsupportedContentType(s.to_string())),
        }
    }
}

#[derive(Serialize)]
struct ViewResponse<'a> {
    patient_id: &'a str,
    data_type: &'a str,
    count: usize,
    data: Vec<serde_json::Value>,
}

/// Formats the results of one or more views.
pub fn format_results(results: &[ViewResult], content_type: ContentType) -> Result<Vec<u8>, ViewError> {
    match content_type {
        ContentType::Csv | ContentType::CsvWithHeader => match results {
            [result] => format_csv(result, content_type == ContentType::CsvWithHeader),
            _ => Err(ViewError::UnsupportedContentType(format!(
                "csv output takes exactly one view, got {}",
                results.len()
            ))),
        },
        ContentType::Json => format_json(results),
        ContentType::NdJson => format_ndjson(results),
    }
}

/// Pretty-printed JSON for summaries and golden records.
pub fn format_pretty<T: Serialize>(value: &T) -> Result<Vec<u8>, ViewError> {
    Ok(serde_json::to_vec_pretty(value)?)
}

fn csv_cell(value: &FieldValue) -> Result<String, ViewError> {
    Ok(match value {
        FieldValue::Null => String::new(),
        FieldValue::Scalar(serde_json::Value::String(s)) => s.clone(),
        other => serde_json::to_string(&other.to_json())?,
    })
}

fn format_csv(result: &ViewResult, include_header: bool) -> Result<Vec<u8>, ViewError> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    if include_header {
        wtr.write_record(&result.columns)?;
    }

    for record in &result.records {
        let cells = record
            .values
            .iter()
            .map(csv_cell)
            .collect::<Result<Vec<_>, _>>()?;
        wtr.write_record(&cells)?;
    }

    wtr.into_inner()
        .map_err(|e| ViewError::CsvWriterError(e.to_string()))
}

fn format_json(results: &[ViewResult]) -> Result<Vec<u8>, ViewError> {
    let output: Vec<ViewResponse> = results
        .iter()
        .map(|result| ViewResponse {
            patient_id: &result.patient_id,
            data_type: &result.view,
            count: result.len(),
            data: result.to_objects(),
        })
        .collect();

    Ok(serde_json::to_vec_pretty(&output)?)
}

fn format_ndjson(results: &[ViewResult]) -> Result<Vec<u8>, ViewError> {
    let mut output = Vec::new();

    for result in results {
        for object in result.to_objects() {
            let mut row_obj = serde_json::Map::new();
            row_obj.insert(
                "data_type".to_string(),
                serde_json::Value::String(result.view.clone()),
            );
            if let serde_json::Value::Object(fields) = object {
                row_obj.extend(fields);
            }
            let line = serde_json::to_string(&serde_json::Value::Object(row_obj))?;
            output.extend_from_slice(line.as_bytes());
            output.push(b'\n');
        }
    }

    Ok(output)
}
