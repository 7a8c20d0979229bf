use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use tracing::info;

use crate::config::ProvenanceLabels;
use crate::domain::{FetchOutcome, UnitOutcome};
use crate::error::HarvestError;
use crate::store::{self, ArtifactStore};
use crate::table::Table;

const OBSERVER: &str = "OBSERVER";
const TELESCOP: &str = "TELESCOP";
const VERSION: &str = "VERSION";
const CREATED: &str = "CREATED";

#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    pub observer: String,
    pub telescope: String,
    pub version: String,
    pub created: String,
}

impl Provenance {
    pub fn stamp(labels: &ProvenanceLabels, now: DateTime<Local>) -> Self {
        Self {
            observer: labels.observer.clone(),
            telescope: labels.telescope.clone(),
            version: labels.version.clone(),
            created: now.format("%Y-%m-%dT%H:%M").to_string(),
        }
    }

    pub fn to_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            (OBSERVER.to_string(), self.observer.clone()),
            (TELESCOP.to_string(), self.telescope.clone()),
            (VERSION.to_string(), self.version.clone()),
            (CREATED.to_string(), self.created.clone()),
        ])
    }

    /// `None` unless all four keys are present.
    pub fn from_metadata(metadata: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            observer: metadata.get(OBSERVER)?.clone(),
            telescope: metadata.get(TELESCOP)?.clone(),
            version: metadata.get(VERSION)?.clone(),
            created: metadata.get(CREATED)?.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CombinedArtifact {
    pub metadata: Provenance,
    pub table: Table,
}

impl CombinedArtifact {
    pub fn num_rows(&self) -> usize {
        self.table.num_rows()
    }

    pub fn read(path: &Utf8Path) -> Result<Self, HarvestError> {
        let (table, metadata) = store::read_parquet(path)?;
        let metadata = Provenance::from_metadata(&metadata).ok_or_else(|| {
            HarvestError::Aggregation(format!("{path} carries no provenance metadata"))
        })?;
        Ok(Self { metadata, table })
    }
}

pub struct Aggregator<'a> {
    labels: &'a ProvenanceLabels,
}

impl<'a> Aggregator<'a> {
    pub fn new(labels: &'a ProvenanceLabels) -> Self {
        Self { labels }
    }

    /// Reads back every non-empty success and stacks them in outcome order.
    /// Returns `None` when no field produced rows.
    pub fn combine(&self, outcomes: &[UnitOutcome]) -> Result<Option<CombinedArtifact>, HarvestError> {
        let tables = outcomes
            .iter()
            .filter_map(|unit| match &unit.outcome {
                FetchOutcome::Success {
                    artifact_path,
                    row_count,
                } if *row_count > 0 => Some(artifact_path),
                _ => None,
            })
            .map(|path| {
                ArtifactStore::read_path(path)
                    .map_err(|err| HarvestError::Aggregation(err.to_string()))
            })
            .collect::<Result<Vec<_>, HarvestError>>()?;

        if tables.is_empty() {
            return Ok(None);
        }

        let table = Table::concat(&tables)?;
        info!(objects = table.num_rows(), fields = tables.len(), "combined field catalogs");
        Ok(Some(CombinedArtifact {
            metadata: Provenance::stamp(self.labels, Local::now()),
            table,
        }))
    }

    /// Writes `splus_data_<YYYYMMDDHHMM>.parquet` into `dir`, provenance in
    /// the file metadata.
    pub fn write(&self, artifact: &CombinedArtifact, dir: &Utf8Path) -> Result<Utf8PathBuf, HarvestError> {
        let stamp = Local::now().format("%Y%m%d%H%M");
        let path = dir.join(format!("splus_data_{stamp}.parquet"));
        store::write_parquet_atomic(&path, artifact.table.batch(), artifact.metadata.to_metadata())
            .map_err(|err| HarvestError::Aggregation(err.to_string()))?;
        info!(path = %path, "combined artifact written");
        Ok(path)
    }
}
