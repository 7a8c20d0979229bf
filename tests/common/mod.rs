#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrow::array::{
    ArrayRef, Float32Array, Float64Array, Int8Array, Int32Array, Int64Array, StringArray,
};
use camino::Utf8PathBuf;

use splus_harvest::config::ResolvedConfig;
use splus_harvest::error::HarvestError;
use splus_harvest::fetch::Sleeper;
use splus_harvest::query::{QueryKind, QuerySpec};
use splus_harvest::splus::SurveyClient;
use splus_harvest::table::Table;

#[derive(Debug, Clone, Copy)]
pub enum Probe {
    Found,
    Missing,
    Error,
}

#[derive(Debug, Clone, Copy)]
pub enum Catalog {
    Rows(usize),
    Empty,
    FailAlways,
    FailThenRows(u32, usize),
    ClassOutOfRange,
}

#[derive(Default)]
pub struct MockSurvey {
    probes: HashMap<String, Probe>,
    catalogs: HashMap<String, Catalog>,
    probe_calls: Mutex<HashMap<String, u32>>,
    catalog_calls: Mutex<HashMap<String, u32>>,
}

impl MockSurvey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: &str, probe: Probe, catalog: Catalog) -> Self {
        self.probes.insert(name.to_string(), probe);
        self.catalogs.insert(name.to_string(), catalog);
        self
    }

    pub fn probe_calls(&self, name: &str) -> u32 {
        *self.probe_calls.lock().unwrap().get(name).unwrap_or(&0)
    }

    pub fn catalog_calls(&self, name: &str) -> u32 {
        *self.catalog_calls.lock().unwrap().get(name).unwrap_or(&0)
    }

    fn bump(calls: &Mutex<HashMap<String, u32>>, name: &str) -> u32 {
        let mut guard = calls.lock().unwrap();
        let count = guard.entry(name.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

impl SurveyClient for MockSurvey {
    fn query(&self, spec: &QuerySpec, _timeout: Duration) -> Result<Table, HarvestError> {
        let name = spec.field().as_str();
        match spec.kind() {
            QueryKind::Probe => {
                Self::bump(&self.probe_calls, name);
                match self.probes.get(name) {
                    Some(Probe::Found) => Ok(probe_table(name)),
                    Some(Probe::Error) => Err(HarvestError::Http("connection reset".to_string())),
                    Some(Probe::Missing) | None => Ok(Table::default()),
                }
            }
            QueryKind::Catalog => {
                let call = Self::bump(&self.catalog_calls, name);
                match self.catalogs.get(name) {
                    Some(Catalog::Rows(rows)) => Ok(catalog_table(name, *rows)),
                    Some(Catalog::Empty) | None => Ok(Table::default()),
                    Some(Catalog::FailAlways) => {
                        Err(HarvestError::Timeout("query exceeded 30s".to_string()))
                    }
                    Some(Catalog::FailThenRows(failures, rows)) => {
                        if call <= *failures {
                            Err(HarvestError::Status {
                                status: 503,
                                message: "service unavailable".to_string(),
                            })
                        } else {
                            Ok(catalog_table(name, *rows))
                        }
                    }
                    Some(Catalog::ClassOutOfRange) => Ok(Table::new(vec![
                        ("ID", text(vec![Some(format!("{name}.0"))])),
                        ("CLASS", int64(vec![Some(70_000)])),
                    ])
                    .unwrap()),
                }
            }
        }
    }
}

pub fn float64(values: Vec<Option<f64>>) -> ArrayRef {
    Arc::new(Float64Array::from(values))
}

pub fn float32(values: Vec<Option<f32>>) -> ArrayRef {
    Arc::new(Float32Array::from(values))
}

pub fn int64(values: Vec<Option<i64>>) -> ArrayRef {
    Arc::new(Int64Array::from(values))
}

pub fn int32(values: Vec<Option<i32>>) -> ArrayRef {
    Arc::new(Int32Array::from(values))
}

pub fn int8(values: Vec<Option<i8>>) -> ArrayRef {
    Arc::new(Int8Array::from(values))
}

pub fn text<S: AsRef<str>>(values: Vec<Option<S>>) -> ArrayRef {
    let values: Vec<Option<&str>> = values
        .iter()
        .map(|value| value.as_ref().map(|s| s.as_ref()))
        .collect();
    Arc::new(StringArray::from(values))
}

pub fn probe_table(name: &str) -> Table {
    Table::new(vec![("Field", text(vec![Some(name)]))]).unwrap()
}

/// Catalog rows as the service returns them, before type normalization.
pub fn catalog_table(name: &str, rows: usize) -> Table {
    Table::new(vec![
        ("Field", text(vec![Some(name); rows])),
        (
            "ID",
            text((0..rows).map(|i| Some(format!("{name}.{i}"))).collect()),
        ),
        (
            "RA",
            float64((0..rows).map(|i| Some(150.0 + i as f64 * 0.01)).collect()),
        ),
        ("r_PStotal", float64(vec![Some(17.25); rows])),
        ("CLASS", int64(vec![Some(1); rows])),
        ("SEX_FLAGS_DET", int32(vec![Some(0); rows])),
    ])
    .unwrap()
}

#[derive(Default)]
pub struct RecordingSleeper {
    pub delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

pub fn test_config(root: &Path) -> ResolvedConfig {
    let root = Utf8PathBuf::from_path_buf(root.to_path_buf()).unwrap();
    let mut config = ResolvedConfig::default();
    config.output_dir = root.join("splus_results");
    config.combined_dir = root.clone();
    config
}
