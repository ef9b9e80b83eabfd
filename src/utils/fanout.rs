//! Bounded fan-out over independent units of work.
//!
//! Every unit runs to completion regardless of what happens to its
//! siblings. Results come back in input order so callers can fold them
//! deterministically.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread;

use crate::error::{Error, Result};

/// Run `work` over every unit with at most `limit` units in flight.
///
/// A unit that panics yields `Err(internal.unexpected)` in its slot; the
/// remaining units still run.
pub fn run_bounded<T, R, F>(units: Vec<T>, limit: usize, work: F) -> Vec<Result<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let total = units.len();
    if total == 0 {
        return Vec::new();
    }

    if total == 1 || limit <= 1 {
        return units
            .into_iter()
            .map(|unit| run_isolated(&work, unit))
            .collect();
    }

    let queue = Mutex::new(units.into_iter().enumerate());
    let slots: Mutex<Vec<Option<Result<R>>>> = Mutex::new((0..total).map(|_| None).collect());
    let workers = limit.min(total);

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let next = queue
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .next();
                let Some((index, unit)) = next else {
                    break;
                };
                let outcome = run_isolated(&work, unit);
                slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())[index] =
                    Some(outcome);
            });
        }
    });

    slots
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| Err(Error::internal_unexpected("Fan-out unit produced no result")))
        })
        .collect()
}

fn run_isolated<T, R, F>(work: &F, unit: T) -> Result<R>
where
    F: Fn(T) -> R,
{
    panic::catch_unwind(AssertUnwindSafe(|| work(unit))).map_err(|payload| {
        Error::internal_unexpected(format!(
            "Execution thread panicked: {}",
            panic_message(payload.as_ref())
        ))
    })
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
