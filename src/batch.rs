use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use tracing::{debug, error};

use crate::domain::{FetchOutcome, FieldName, UnitOutcome};

/// Runs `fetch` once per field on at most `max_workers` threads.
///
/// Outcomes come back in completion order and `on_complete` sees each one as
/// it arrives. Every field yields exactly one outcome; a panicking fetch is
/// reported as `Failed` and does not disturb the other workers.
pub fn run_batch<F, P>(
    fields: &[FieldName],
    max_workers: usize,
    fetch: F,
    mut on_complete: P,
) -> Vec<UnitOutcome>
where
    F: Fn(&FieldName) -> UnitOutcome + Sync,
    P: FnMut(&UnitOutcome),
{
    if fields.is_empty() {
        return Vec::new();
    }

    let workers = max_workers.max(1).min(fields.len());
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<UnitOutcome>();
    let mut outcomes = Vec::with_capacity(fields.len());

    thread::scope(|scope| {
        let next = &next;
        let fetch = &fetch;
        for worker in 0..workers {
            let tx = tx.clone();
            scope.spawn(move || {
                loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(field) = fields.get(index) else {
                        break;
                    };
                    debug!(worker, field = %field, "worker picked field");
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| fetch(field)))
                        .unwrap_or_else(|payload| panicked(field, payload));
                    if tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        for outcome in rx {
            on_complete(&outcome);
            outcomes.push(outcome);
        }
    });

    outcomes
}

fn panicked(field: &FieldName, payload: Box<dyn Any + Send>) -> UnitOutcome {
    let message = payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_string());
    error!(field = %field, %message, "fetch task panicked");
    UnitOutcome {
        field: field.clone(),
        attempts: 0,
        outcome: FetchOutcome::Failed {
            last_error: format!("worker panicked: {message}"),
        },
    }
}
