use std::time::Duration;

use tracing::{info, warn};

use crate::domain::FieldName;
use crate::query::QuerySpec;
use crate::splus::SurveyClient;

/// Cheap existence check run before a field is committed to the batch.
pub struct UnitValidator<'a, C: SurveyClient> {
    client: &'a C,
    timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validation {
    pub accepted: Vec<FieldName>,
    pub rejected: Vec<FieldName>,
}

impl<'a, C: SurveyClient> UnitValidator<'a, C> {
    pub fn new(client: &'a C, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// True only when the probe answers with at least one row. Errors count
    /// as "not valid" and are never retried.
    pub fn validate(&self, field: &FieldName) -> bool {
        match self.client.query(&QuerySpec::probe(field), self.timeout) {
            Ok(table) => !table.is_empty(),
            Err(err) => {
                warn!(field = %field, error = %err, "field validation failed");
                false
            }
        }
    }

    pub fn validate_all(&self, fields: &[FieldName]) -> Validation {
        info!(fields = fields.len(), "validating fields");
        let mut validation = Validation::default();
        for field in fields {
            if self.validate(field) {
                validation.accepted.push(field.clone());
            } else {
                validation.rejected.push(field.clone());
            }
        }
        info!(
            valid = validation.accepted.len(),
            total = fields.len(),
            "validation finished"
        );
        validation
    }
}
