//! Transform operators: deduplication, sorting, grouping, pairing and joining.

use std::cmp::Ordering;

use crate::error::{PipelineError, Result};
use crate::sequence::Sequence;
use crate::source::IntoSequence;

/// Upper bound on the space reserved up front for one batch.
const PREALLOCATE_LIMIT: usize = 1024;

/// What [`Sequence::pair`] does once the secondary source runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairMode {
    /// Pad the remaining primary elements with `None`.
    #[default]
    Empty,
    /// Start the secondary source over from its first element.
    Repeat,
    /// Stop pairing altogether.
    Exact,
}

impl<T: Send + 'static> Sequence<T> {
    /// Drop elements equal to the one right before them.
    ///
    /// Only adjacent duplicates collapse, so `[1, 2, 2, 1]` becomes
    /// `[1, 2, 1]`. This keeps the operator streaming.
    pub fn unique(self) -> Sequence<T>
    where
        T: PartialEq + Clone,
    {
        self.unique_by(|a, b| a == b)
    }

    /// [`unique`](Self::unique) with a custom equality.
    pub fn unique_by<F>(self, mut eq: F) -> Sequence<T>
    where
        T: Clone,
        F: FnMut(&T, &T) -> bool + Send + 'static,
    {
        self.derive("unique", move |mut input| {
            let mut last: Option<T> = None;
            std::iter::from_fn(move || {
                loop {
                    let value = match input.next()? {
                        Ok(value) => value,
                        Err(err) => return Some(Err(err)),
                    };
                    if last.as_ref().is_some_and(|prev| eq(prev, &value)) {
                        continue;
                    }
                    last = Some(value.clone());
                    return Some(Ok(value));
                }
            })
        })
    }

    /// Collapse adjacent runs into `(value, run_length)` pairs.
    ///
    /// A run is emitted once the next different element arrives or the
    /// upstream ends.
    pub fn unique_count(self) -> Sequence<(T, usize)>
    where
        T: PartialEq,
    {
        self.derive("unique_count", move |mut input| {
            let mut run: Option<(T, usize)> = None;
            std::iter::from_fn(move || {
                loop {
                    match input.next() {
                        Some(Ok(value)) => match run.as_mut() {
                            Some((current, count)) if *current == value => *count += 1,
                            _ => {
                                if let Some(done) = run.replace((value, 1)) {
                                    return Some(Ok(done));
                                }
                            }
                        },
                        Some(Err(err)) => return Some(Err(err)),
                        None => return run.take().map(Ok),
                    }
                }
            })
        })
    }

    /// Sort the whole sequence.
    ///
    /// Nothing is emitted until the upstream is exhausted.
    pub fn sort(self) -> Sequence<T>
    where
        T: Ord,
    {
        self.sort_by(|a, b| a.cmp(b))
    }

    /// Sort the whole sequence with a comparator. The sort is stable.
    pub fn sort_by<F>(self, compare: F) -> Sequence<T>
    where
        F: FnMut(&T, &T) -> Ordering + Send + 'static,
    {
        self.derive("sort", move |mut input| {
            let mut compare = Some(compare);
            let mut sorted: Option<std::vec::IntoIter<T>> = None;
            std::iter::from_fn(move || {
                if let Some(mut compare) = compare.take() {
                    let mut all = Vec::new();
                    while let Some(item) = input.next() {
                        match item {
                            Ok(value) => all.push(value),
                            Err(err) => return Some(Err(err)),
                        }
                    }
                    all.sort_by(&mut compare);
                    sorted = Some(all.into_iter());
                }
                sorted.as_mut()?.next().map(Ok)
            })
        })
    }

    /// Group elements into chunks of `size`.
    ///
    /// The last chunk may be shorter; it is never padded and never dropped.
    pub fn batch(self, size: usize) -> Result<Sequence<Vec<T>>> {
        if size == 0 {
            return Err(PipelineError::invalid("batch", "Must be >= 1"));
        }
        Ok(self.derive("batch", move |mut input| {
            let mut done = false;
            std::iter::from_fn(move || {
                if done {
                    return None;
                }
                let mut chunk = Vec::with_capacity(size.min(PREALLOCATE_LIMIT));
                while chunk.len() < size {
                    match input.next() {
                        Some(Ok(value)) => chunk.push(value),
                        Some(Err(err)) => return Some(Err(err)),
                        None => {
                            done = true;
                            break;
                        }
                    }
                }
                (!chunk.is_empty()).then_some(Ok(chunk))
            })
        }))
    }

    /// Zip this sequence with a secondary source.
    ///
    /// `mode` decides what happens once the secondary runs out; see
    /// [`PairMode`].
    pub fn pair<U, S>(self, secondary: S, mode: PairMode) -> Sequence<(T, Option<U>)>
    where
        U: Clone + Send + 'static,
        S: IntoSequence<U>,
    {
        let secondary = secondary.into_sequence();
        let secondary_handle = secondary.handle().clone();
        let seq = self.derive("pair", move |mut input| {
            let mut secondary = Some(secondary);
            let mut seen: Vec<U> = Vec::new();
            let mut replay = 0usize;
            std::iter::from_fn(move || {
                let value = match input.next()? {
                    Ok(value) => value,
                    Err(err) => return Some(Err(err)),
                };
                if let Some(source) = secondary.as_mut() {
                    match source.next() {
                        Some(Ok(other)) => {
                            if mode == PairMode::Repeat {
                                seen.push(other.clone());
                            }
                            return Some(Ok((value, Some(other))));
                        }
                        Some(Err(err)) => return Some(Err(err)),
                        None => secondary = None,
                    }
                }
                match mode {
                    PairMode::Empty => Some(Ok((value, None))),
                    PairMode::Exact => {
                        input.terminate();
                        None
                    }
                    PairMode::Repeat if seen.is_empty() => Some(Ok((value, None))),
                    PairMode::Repeat => {
                        let other = seen[replay % seen.len()].clone();
                        replay += 1;
                        Some(Ok((value, Some(other))))
                    }
                }
            })
        });
        seq.handle().on_release(move || secondary_handle.terminate());
        seq
    }

    /// Pair every element with a copy of `value`.
    pub fn pair_value<U>(self, value: U) -> Sequence<(T, U)>
    where
        U: Clone + Send + 'static,
    {
        self.derive("pair", move |mut input| {
            std::iter::from_fn(move || Some(input.next()?.map(|item| (item, value.clone()))))
        })
    }

    /// Put `separator` between consecutive elements.
    ///
    /// No separator is emitted before the first or after the last element.
    pub fn join(self, separator: T) -> Sequence<T>
    where
        T: Clone,
    {
        self.join_with(Sequence::from_value(separator).repeat(None))
    }

    /// Put successive values of `separators` between consecutive elements.
    ///
    /// Once `separators` is exhausted, the remaining elements are passed
    /// through without separators.
    pub fn join_with<S>(self, separators: S) -> Sequence<T>
    where
        S: IntoSequence<T>,
    {
        let separators = separators.into_sequence();
        let separator_handle = separators.handle().clone();
        let seq = self.derive("join", move |mut input| {
            let mut separators = Some(separators);
            let mut started = false;
            let mut pending: Option<T> = None;
            std::iter::from_fn(move || {
                if let Some(value) = pending.take() {
                    return Some(Ok(value));
                }
                let value = match input.next()? {
                    Ok(value) => value,
                    Err(err) => return Some(Err(err)),
                };
                if !started {
                    started = true;
                    return Some(Ok(value));
                }
                match separators.as_mut().and_then(|s| s.next()) {
                    Some(Ok(separator)) => {
                        pending = Some(value);
                        Some(Ok(separator))
                    }
                    Some(Err(err)) => Some(Err(err)),
                    None => {
                        separators = None;
                        Some(Ok(value))
                    }
                }
            })
        });
        seq.handle().on_release(move || separator_handle.terminate());
        seq
    }
}
