use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::{QueryFilters, RetrySettings};
use crate::domain::{FetchOutcome, FieldName, UnitOutcome};
use crate::error::HarvestError;
use crate::query::QuerySpec;
use crate::splus::SurveyClient;
use crate::store::ArtifactStore;
use crate::table::ColumnTypeSchema;

/// Blocks the calling worker between attempts. Only the worker that owns the
/// field waits; the rest of the pool keeps going.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            base_delay: settings.retry_delay,
        }
    }

    /// Wait after failed attempt `attempt` (0-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Remote failures and artifact write failures get another attempt;
    /// coercion errors repeat identically and end the field at once.
    pub fn should_retry(&self, attempt: u32, err: &HarvestError) -> bool {
        let retryable = err.is_transient() || matches!(err, HarvestError::Filesystem(_));
        retryable && attempt + 1 < self.max_attempts
    }
}

/// Runs the catalog query for one field with bounded retries, normalizes the
/// result and persists it.
pub struct UnitFetcher<'a, C: SurveyClient, Z: Sleeper> {
    client: &'a C,
    store: &'a ArtifactStore,
    sleeper: &'a Z,
    policy: RetryPolicy,
    filters: QueryFilters,
    schema: ColumnTypeSchema,
    timeout: Duration,
}

impl<'a, C: SurveyClient, Z: Sleeper> UnitFetcher<'a, C, Z> {
    pub fn new(
        client: &'a C,
        store: &'a ArtifactStore,
        sleeper: &'a Z,
        policy: RetryPolicy,
        filters: QueryFilters,
        schema: ColumnTypeSchema,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            store,
            sleeper,
            policy,
            filters,
            schema,
            timeout,
        }
    }

    pub fn fetch(&self, field: &FieldName) -> UnitOutcome {
        let mut attempt = 0u32;
        loop {
            info!(field = %field, attempt = attempt + 1, "querying field");
            match self.attempt(field) {
                Ok(outcome) => {
                    return UnitOutcome {
                        field: field.clone(),
                        attempts: attempt + 1,
                        outcome,
                    };
                }
                Err(err) if self.policy.should_retry(attempt, &err) => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        field = %field,
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "attempt failed; backing off"
                    );
                    self.sleeper.sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    error!(field = %field, attempts = attempt + 1, error = %err, "field not processed");
                    return UnitOutcome {
                        field: field.clone(),
                        attempts: attempt + 1,
                        outcome: FetchOutcome::Failed {
                            last_error: err.to_string(),
                        },
                    };
                }
            }
        }
    }

    fn attempt(&self, field: &FieldName) -> Result<FetchOutcome, HarvestError> {
        let spec = QuerySpec::catalog(field, &self.filters);
        let table = self.client.query(&spec, self.timeout)?;
        if table.is_empty() {
            return Ok(FetchOutcome::Empty);
        }
        let table = table.apply_schema(&self.schema)?;
        let artifact_path = self.store.write(field, &table)?;
        Ok(FetchOutcome::Success {
            artifact_path,
            row_count: table.num_rows(),
        })
    }
}
