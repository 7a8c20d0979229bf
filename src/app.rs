use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::Aggregator;
use crate::batch::run_batch;
use crate::config::ResolvedConfig;
use crate::domain::{FetchOutcome, FieldName, UnitOutcome};
use crate::error::HarvestError;
use crate::fetch::{RetryPolicy, Sleeper, UnitFetcher};
use crate::splus::SurveyClient;
use crate::store::ArtifactStore;
use crate::validate::UnitValidator;

#[derive(Debug, Clone, Serialize)]
pub struct FieldReport {
    pub field: String,
    pub status: String,
    pub attempts: u32,
    pub rows: usize,
    pub artifact: Option<String>,
    pub error: Option<String>,
}

impl From<&UnitOutcome> for FieldReport {
    fn from(value: &UnitOutcome) -> Self {
        let (artifact, error) = match &value.outcome {
            FetchOutcome::Success { artifact_path, .. } => (Some(artifact_path.to_string()), None),
            FetchOutcome::Empty => (None, None),
            FetchOutcome::Failed { last_error } => (None, Some(last_error.clone())),
        };
        Self {
            field: value.field.to_string(),
            status: value.outcome.status().to_string(),
            attempts: value.attempts,
            rows: value.outcome.row_count(),
            artifact,
            error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub requested: usize,
    pub validated: usize,
    pub excluded: Vec<String>,
    pub fields: Vec<FieldReport>,
    pub succeeded: usize,
    pub empty: usize,
    pub failed: usize,
    pub total_objects: usize,
    pub combined_path: Option<String>,
    pub elapsed_secs: f64,
}

impl RunReport {
    /// False for a run that finished without a combined artifact.
    pub fn has_output(&self) -> bool {
        self.combined_path.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// One harvest run over an open connection: validate, fetch in parallel,
/// combine.
pub struct App<C: SurveyClient, Z: Sleeper> {
    config: ResolvedConfig,
    store: ArtifactStore,
    client: C,
    sleeper: Z,
}

impl<C: SurveyClient, Z: Sleeper> App<C, Z> {
    pub fn new(config: ResolvedConfig, client: C, sleeper: Z) -> Self {
        let store = ArtifactStore::new(config.output_dir.clone());
        Self {
            config,
            store,
            client,
            sleeper,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Per-field failures end up in the report; only artifact directory
    /// setup and the combined write abort the run.
    pub fn run(
        &self,
        fields: &[FieldName],
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, HarvestError> {
        let started = Instant::now();
        let fields = unique_fields(fields);
        let fields = fields.as_slice();
        self.store.ensure_root()?;

        sink.event(ProgressEvent {
            message: format!("phase=Validate; probing {} fields", fields.len()),
            elapsed: None,
        });
        let validation = UnitValidator::new(&self.client, self.config.timeout).validate_all(fields);

        sink.event(ProgressEvent {
            message: format!(
                "phase=Fetch; {} fields on {} workers",
                validation.accepted.len(),
                self.config.max_workers
            ),
            elapsed: Some(started.elapsed()),
        });
        let fetcher = UnitFetcher::new(
            &self.client,
            &self.store,
            &self.sleeper,
            RetryPolicy::from_settings(self.config.retry),
            self.config.filters.clone(),
            self.config.column_types.clone(),
            self.config.timeout,
        );
        let outcomes = run_batch(
            &validation.accepted,
            self.config.max_workers,
            |field| fetcher.fetch(field),
            |unit| {
                match &unit.outcome {
                    FetchOutcome::Success { row_count, .. } => {
                        info!(field = %unit.field, objects = row_count, "field done")
                    }
                    FetchOutcome::Empty => info!(field = %unit.field, "field has no objects"),
                    FetchOutcome::Failed { last_error } => {
                        warn!(field = %unit.field, error = %last_error, "field failed")
                    }
                }
                sink.event(ProgressEvent {
                    message: format!("{} {}", unit.field, unit.outcome.status()),
                    elapsed: Some(started.elapsed()),
                });
            },
        );

        sink.event(ProgressEvent {
            message: "phase=Aggregate; combining field catalogs".to_string(),
            elapsed: Some(started.elapsed()),
        });
        let aggregator = Aggregator::new(&self.config.provenance);
        let (total_objects, combined_path) = match aggregator.combine(&outcomes)? {
            Some(artifact) => {
                let path = aggregator.write(&artifact, &self.config.combined_dir)?;
                (artifact.num_rows(), Some(path.to_string()))
            }
            None => {
                warn!("no data to combine");
                (0, None)
            }
        };
        info!(total_objects, "harvest finished");

        let count = |status: &str| {
            outcomes
                .iter()
                .filter(|unit| unit.outcome.status() == status)
                .count()
        };
        let report = RunReport {
            requested: fields.len(),
            validated: validation.accepted.len(),
            excluded: validation.rejected.iter().map(|f| f.to_string()).collect(),
            fields: outcomes.iter().map(FieldReport::from).collect(),
            succeeded: count("success"),
            empty: count("empty"),
            failed: count("failed"),
            total_objects,
            combined_path,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        Ok(report)
    }
}

/// Drops repeated names, keeping the first occurrence, so no field is
/// fetched or combined twice.
fn unique_fields(fields: &[FieldName]) -> Vec<FieldName> {
    let mut seen = HashSet::new();
    let unique: Vec<FieldName> = fields
        .iter()
        .filter(|field| seen.insert(*field))
        .cloned()
        .collect();
    if unique.len() < fields.len() {
        warn!(dropped = fields.len() - unique.len(), "ignoring repeated fields");
    }
    unique
}
