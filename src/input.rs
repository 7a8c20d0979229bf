use std::collections::HashSet;
use std::fs;

use camino::Utf8Path;
use rand::seq::IteratorRandom;
use tracing::{info, warn};

use crate::domain::FieldName;
use crate::error::HarvestError;

/// Reads field names from the `column` of a CSV pointing list.
///
/// Blank cells are skipped, malformed names are logged and skipped, repeats
/// keep their first position.
pub fn read_field_list(path: &Utf8Path, column: &str) -> Result<Vec<FieldName>, HarvestError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| HarvestError::Input(format!("{path}: {err}")))?;
    parse_field_list(&content, column)
}

pub fn parse_field_list(content: &str, column: &str) -> Result<Vec<FieldName>, HarvestError> {
    let mut reader = csv::Reader::from_reader(content.as_bytes());
    let headers = reader
        .headers()
        .map_err(|err| HarvestError::Input(err.to_string()))?
        .clone();
    let index = headers
        .iter()
        .position(|header| header.trim() == column)
        .ok_or_else(|| HarvestError::Input(format!("column {column} not found")))?;

    let mut seen = HashSet::new();
    let mut fields = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| HarvestError::Input(err.to_string()))?;
        let Some(cell) = record.get(index) else {
            continue;
        };
        if cell.trim().is_empty() {
            continue;
        }
        match cell.parse::<FieldName>() {
            Ok(field) => {
                if seen.insert(field.clone()) {
                    fields.push(field);
                }
            }
            Err(err) => warn!(error = %err, "skipping pointing"),
        }
    }
    Ok(fields)
}

/// Random subset of `size` fields, keeping list order. Returns everything
/// when the list is not larger than `size`.
pub fn sample_fields(fields: Vec<FieldName>, size: usize) -> Vec<FieldName> {
    if fields.len() <= size {
        return fields;
    }
    let mut rng = rand::rng();
    let mut picked = (0..fields.len()).choose_multiple(&mut rng, size);
    picked.sort_unstable();
    info!(sample = size, total = fields.len(), "sampling fields for a test run");
    picked.into_iter().map(|index| fields[index].clone()).collect()
}
