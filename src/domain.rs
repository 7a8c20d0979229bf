use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use camino::Utf8PathBuf;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

static FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.+\-]*$").unwrap());

/// One S-PLUS pointing, the unit of work for a harvest run.
///
/// The name doubles as the per-unit artifact file stem and is quoted into
/// ADQL, so only a conservative character set is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldName(String);

impl FieldName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FieldName {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !FIELD_RE.is_match(trimmed) {
            return Err(HarvestError::InvalidField(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Terminal state of one field after the retrying fetcher is done with it.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success {
        artifact_path: Utf8PathBuf,
        row_count: usize,
    },
    Empty,
    Failed {
        last_error: String,
    },
}

impl FetchOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            FetchOutcome::Success { .. } => "success",
            FetchOutcome::Empty => "empty",
            FetchOutcome::Failed { .. } => "failed",
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            FetchOutcome::Success { row_count, .. } => *row_count,
            FetchOutcome::Empty | FetchOutcome::Failed { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitOutcome {
    pub field: FieldName,
    pub attempts: u32,
    pub outcome: FetchOutcome,
}
