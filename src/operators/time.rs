//! Delays and named timers.
//!
//! Timers are process-wide and keyed by name, so a `start_time` early in a
//! pipeline pairs with a `stop_time` of the same name further down.
//! Results are reported through `tracing` at `debug` level.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::sequence::Sequence;

struct Timer {
    started: Instant,
    /// Element number for per-element timers, `None` for whole-sequence ones.
    count: Option<u64>,
}

static TIMERS: LazyLock<Mutex<HashMap<String, Timer>>> = LazyLock::new(Default::default);

fn start(name: &str, per_element: bool) {
    let mut timers = TIMERS.lock().unwrap_or_else(PoisonError::into_inner);
    if !per_element && timers.contains_key(name) {
        return;
    }
    let count = match (per_element, timers.get(name)) {
        (false, _) => None,
        (true, Some(Timer { count: Some(n), .. })) => Some(n + 1),
        (true, _) => Some(1),
    };
    timers.insert(
        name.to_string(),
        Timer {
            started: Instant::now(),
            count,
        },
    );
    tracing::debug!(timer = name, count, "timer start");
}

fn stop(name: &str) -> Option<Duration> {
    let timer = TIMERS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(name)?;
    let elapsed = timer.started.elapsed();
    tracing::debug!(
        timer = name,
        count = timer.count,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "timer end"
    );
    Some(elapsed)
}

impl<T: Send + 'static> Sequence<T> {
    /// Sleep for `delay` before passing each element on.
    ///
    /// Upstream work already in progress is not cancelled.
    pub fn wait(self, delay: Duration) -> Sequence<T> {
        self.tap(move |_| thread::sleep(delay))
    }

    /// Start the timer `name`.
    ///
    /// With `per_element` the timer restarts on every element. Otherwise it
    /// starts on the first element only and measures the rest of the run.
    pub fn start_time(self, name: impl Into<String>, per_element: bool) -> Sequence<T> {
        let name = name.into();
        self.tap(move |_| start(&name, per_element))
    }

    /// Stop the timer `name` and report the elapsed time.
    ///
    /// Without `per_element` the whole sequence is drained first, so the
    /// timer covers every element.
    pub fn stop_time(self, name: impl Into<String>, per_element: bool) -> Sequence<T> {
        let name = name.into();
        if per_element {
            return self.tap(move |_| {
                stop(&name);
            });
        }
        self.collect()
            .tap(move |_| {
                stop(&name);
            })
            .flatten::<T>()
    }
}
