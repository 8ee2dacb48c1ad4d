//! Bounded fan-out.
//!
//! [`Sequence::parallel`] keeps up to `concurrency` transforms in flight, each
//! on its own worker thread. Finished tasks report back through a shared
//! channel, so results come out in completion order rather than input order.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::error::{PipelineError, Result};
use crate::sequence::Sequence;
use crate::source::IntoSequence;

/// Default bound on in-flight tasks: available parallelism minus one, at least one.
pub fn default_concurrency() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

type Completion<U> = (usize, Result<U>);

/// Driver state for one `parallel` sequence.
struct Fanout<T, U, F> {
    input: Sequence<T>,
    transform: Arc<F>,
    limit: usize,
    slots: HashMap<usize, JoinHandle<()>>,
    next_id: usize,
    exhausted: bool,
    done_tx: Sender<Completion<U>>,
    done_rx: Receiver<Completion<U>>,
}

impl<T, U, F> Fanout<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Result<U> + Send + Sync + 'static,
{
    fn new(input: Sequence<T>, transform: F, limit: usize) -> Self {
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        Self {
            input,
            transform: Arc::new(transform),
            limit,
            slots: HashMap::new(),
            next_id: 0,
            exhausted: false,
            done_tx,
            done_rx,
        }
    }

    fn submit(&mut self, value: T) -> Result<()> {
        let id = self.next_id;
        self.next_id += 1;
        let transform = self.transform.clone();
        let done = self.done_tx.clone();
        let worker = thread::Builder::new()
            .name(format!("seqpipe-parallel-{id}"))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| transform(value)))
                    .unwrap_or_else(|_| Err(PipelineError::custom("parallel task panicked")));
                // The receiver is gone once the consumer stops pulling.
                let _ = done.send((id, result));
            })?;
        tracing::trace!(task = id, in_flight = self.slots.len() + 1, "parallel task started");
        self.slots.insert(id, worker);
        Ok(())
    }

    fn pull(&mut self) -> Option<Result<U>> {
        while !self.exhausted && self.slots.len() < self.limit {
            match self.input.next() {
                Some(Ok(value)) => {
                    if let Err(err) = self.submit(value) {
                        return Some(Err(err));
                    }
                }
                Some(Err(err)) => return Some(Err(err)),
                None => self.exhausted = true,
            }
        }
        if self.slots.is_empty() {
            return None;
        }
        // A sender is held by `self`, so this only fails if a worker vanished
        // without reporting, which catch_unwind rules out.
        let (id, result) = match self.done_rx.recv() {
            Ok(done) => done,
            Err(_) => return Some(Err(PipelineError::custom("parallel task lost"))),
        };
        if let Some(worker) = self.slots.remove(&id) {
            let _ = worker.join();
        }
        tracing::trace!(task = id, in_flight = self.slots.len(), "parallel task settled");
        Some(result)
    }
}

impl<T: Send + 'static> Sequence<T> {
    /// Apply `transform` to each element with at most `concurrency` tasks in
    /// flight.
    ///
    /// Results are yielded as tasks finish, so a task submitted later can be
    /// yielded before one submitted earlier. A failed task surfaces its error
    /// when it would have been yielded; tasks still running are not cancelled
    /// but their results are discarded once the consumer stops pulling.
    ///
    /// `None` uses [`default_concurrency`].
    pub fn parallel<U, F>(self, transform: F, concurrency: Option<usize>) -> Result<Sequence<U>>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U> + Send + Sync + 'static,
    {
        let limit = concurrency.unwrap_or_else(default_concurrency);
        if limit == 0 {
            return Err(PipelineError::invalid("parallel", "Concurrency must be >= 1"));
        }
        Ok(self.derive("parallel", move |input| {
            let mut fanout = Fanout::new(input, transform, limit);
            std::iter::from_fn(move || fanout.pull())
        }))
    }

    /// [`parallel`](Self::parallel) for transforms that produce a sub-sequence.
    ///
    /// Only the first value of each sub-sequence is used; the rest is never
    /// pulled and the sub-sequence is terminated. An empty sub-sequence
    /// contributes nothing.
    pub fn parallel_first<U, S, F>(
        self,
        transform: F,
        concurrency: Option<usize>,
    ) -> Result<Sequence<U>>
    where
        U: Send + 'static,
        S: IntoSequence<U>,
        F: Fn(T) -> Result<S> + Send + Sync + 'static,
    {
        let first = self.parallel(
            move |value| {
                let mut sub = transform(value)?.into_sequence();
                let head = sub.next().transpose();
                sub.terminate();
                head
            },
            concurrency,
        )?;
        Ok(first.flatten::<U>())
    }
}
