mod common;

use std::sync::Mutex;

use camino::Utf8PathBuf;

use splus_harvest::aggregate::CombinedArtifact;
use splus_harvest::app::{App, ProgressEvent, ProgressSink};
use splus_harvest::domain::FieldName;
use splus_harvest::output::{JsonOutput, render_summary};

use common::{Catalog, MockSurvey, Probe, RecordingSleeper, test_config};

#[derive(Default)]
struct CollectingSink {
    messages: Mutex<Vec<String>>,
}

impl ProgressSink for CollectingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

fn names(list: &[&str]) -> Vec<FieldName> {
    list.iter().map(|name| name.parse().unwrap()).collect()
}

#[test]
fn partial_success_run() {
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(temp.path());
    let client = MockSurvey::new()
        .with_field("F001", Probe::Found, Catalog::Rows(10))
        .with_field("F002", Probe::Found, Catalog::FailAlways)
        .with_field("F003", Probe::Missing, Catalog::Rows(99));
    let app = App::new(config, client, RecordingSleeper::default());
    let sink = CollectingSink::default();

    let report = app.run(&names(&["F001", "F002", "F003"]), &sink).unwrap();

    assert_eq!(report.requested, 3);
    assert_eq!(report.validated, 2);
    assert_eq!(report.excluded, vec!["F003".to_string()]);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.empty, 0);
    assert_eq!(report.total_objects, 10);
    assert!(report.has_output());

    assert_eq!(app.client().catalog_calls("F003"), 0);
    assert_eq!(app.client().catalog_calls("F002"), 5);
    assert_eq!(app.client().catalog_calls("F001"), 1);

    let failed = report.fields.iter().find(|f| f.field == "F002").unwrap();
    assert_eq!(failed.status, "failed");
    assert_eq!(failed.attempts, 5);
    assert!(failed.error.is_some());

    let path = Utf8PathBuf::from(report.combined_path.clone().unwrap());
    let combined = CombinedArtifact::read(&path).unwrap();
    assert_eq!(combined.num_rows(), 10);
    assert_eq!(combined.metadata.observer, "LUIS");

    let messages = sink.messages.lock().unwrap();
    assert!(messages.iter().any(|m| m.starts_with("phase=Aggregate")));

    let summary = render_summary(&report);
    assert!(summary.contains("F003 excluded by validation"));
    assert!(summary.contains("total objects: 10"));
}

#[test]
fn run_without_successes_is_not_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(temp.path());
    let combined_dir = config.combined_dir.clone();
    let client = MockSurvey::new()
        .with_field("F001", Probe::Found, Catalog::Empty)
        .with_field("F002", Probe::Error, Catalog::Rows(5));
    let app = App::new(config, client, RecordingSleeper::default());

    let report = app.run(&names(&["F001", "F002"]), &JsonOutput).unwrap();

    assert_eq!(report.validated, 1);
    assert_eq!(report.empty, 1);
    assert_eq!(report.total_objects, 0);
    assert!(!report.has_output());
    assert_eq!(app.client().probe_calls("F002"), 1);
    assert_eq!(app.client().catalog_calls("F002"), 0);

    let written = std::fs::read_dir(combined_dir.as_std_path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("splus_data_"))
        .count();
    assert_eq!(written, 0);
    assert!(render_summary(&report).contains("no combined artifact written"));
}

#[test]
fn recovered_field_counts_as_success() {
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(temp.path());
    let client = MockSurvey::new()
        .with_field("F001", Probe::Found, Catalog::FailThenRows(4, 6))
        .with_field("F002", Probe::Found, Catalog::Rows(2));
    let app = App::new(config, client, RecordingSleeper::default());

    let report = app.run(&names(&["F001", "F002"]), &JsonOutput).unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.total_objects, 8);
    let recovered = report.fields.iter().find(|f| f.field == "F001").unwrap();
    assert_eq!(recovered.attempts, 5);
    assert_eq!(recovered.rows, 6);
}

#[test]
fn repeated_fields_are_harvested_once() {
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(temp.path());
    let client = MockSurvey::new()
        .with_field("F001", Probe::Found, Catalog::Rows(3))
        .with_field("F002", Probe::Found, Catalog::Rows(2));
    let app = App::new(config, client, RecordingSleeper::default());

    let report = app
        .run(&names(&["F001", "F002", "F001"]), &JsonOutput)
        .unwrap();

    assert_eq!(report.requested, 2);
    assert_eq!(report.fields.len(), 2);
    assert_eq!(report.total_objects, 5);
    assert_eq!(app.client().probe_calls("F001"), 1);
    assert_eq!(app.client().catalog_calls("F001"), 1);
}
