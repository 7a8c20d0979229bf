use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use splus_harvest::batch::run_batch;
use splus_harvest::domain::{FetchOutcome, FieldName, UnitOutcome};

fn fields(count: usize) -> Vec<FieldName> {
    (0..count)
        .map(|i| format!("F{i:03}").parse().unwrap())
        .collect()
}

fn success(field: &FieldName, rows: usize) -> UnitOutcome {
    UnitOutcome {
        field: field.clone(),
        attempts: 1,
        outcome: FetchOutcome::Success {
            artifact_path: Utf8PathBuf::from(format!("{field}.parquet")),
            row_count: rows,
        },
    }
}

#[test]
fn never_exceeds_worker_cap() {
    let in_flight = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);
    let fields = fields(16);

    let outcomes = run_batch(
        &fields,
        4,
        |field| {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(15));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            success(field, 1)
        },
        |_| {},
    );

    assert_eq!(outcomes.len(), 16);
    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[test]
fn every_field_reported_exactly_once() {
    let fields = fields(25);
    let mut seen = Vec::new();

    let outcomes = run_batch(
        &fields,
        4,
        |field| success(field, 2),
        |unit| seen.push(unit.field.clone()),
    );

    let mut reported: Vec<FieldName> = outcomes.iter().map(|unit| unit.field.clone()).collect();
    reported.sort();
    assert_eq!(reported, fields);
    seen.sort();
    assert_eq!(seen, fields);
}

#[test]
fn failing_field_does_not_affect_others() {
    let a: FieldName = "A".parse().unwrap();
    let b: FieldName = "B".parse().unwrap();
    let fields = vec![a.clone(), b.clone()];

    let outcomes = run_batch(
        &fields,
        4,
        |field| {
            if field.as_str() == "A" {
                UnitOutcome {
                    field: field.clone(),
                    attempts: 5,
                    outcome: FetchOutcome::Failed {
                        last_error: "timed out".to_string(),
                    },
                }
            } else {
                success(field, 10)
            }
        },
        |_| {},
    );

    let outcome_b = outcomes.iter().find(|unit| unit.field == b).unwrap();
    assert_matches!(outcome_b.outcome, FetchOutcome::Success { row_count: 10, .. });
    let outcome_a = outcomes.iter().find(|unit| unit.field == a).unwrap();
    assert_matches!(outcome_a.outcome, FetchOutcome::Failed { .. });
}

#[test]
fn panicking_fetch_becomes_failure() {
    let fields = fields(6);

    let outcomes = run_batch(
        &fields,
        2,
        |field| {
            if field.as_str() == "F003" {
                panic!("decoder exploded");
            }
            success(field, 1)
        },
        |_| {},
    );

    assert_eq!(outcomes.len(), 6);
    let broken = outcomes
        .iter()
        .find(|unit| unit.field.as_str() == "F003")
        .unwrap();
    assert_matches!(
        &broken.outcome,
        FetchOutcome::Failed { last_error } if last_error.contains("decoder exploded")
    );
    assert_eq!(
        outcomes
            .iter()
            .filter(|unit| matches!(unit.outcome, FetchOutcome::Success { .. }))
            .count(),
        5
    );
}

#[test]
fn empty_batch_spawns_nothing() {
    let calls = AtomicUsize::new(0);
    let outcomes = run_batch(
        &[],
        4,
        |field| {
            calls.fetch_add(1, Ordering::SeqCst);
            success(field, 1)
        },
        |_| {},
    );
    assert!(outcomes.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
