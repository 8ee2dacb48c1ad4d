//! The pull-based sequence type.
//!
//! A [`Sequence`] is a lazily evaluated producer of values. Consumers pull
//! with [`Sequence::next`]; every operator takes a sequence by value and
//! returns a new one that pulls from it on demand. Nothing runs until the
//! final sequence is pulled.
//!
//! ```
//! use seqpipe::Sequence;
//!
//! let words = Sequence::from_collection(vec!["b", "a", "c", "a"])
//!     .map(|w| w.to_uppercase())
//!     .sort()
//!     .values()
//!     .unwrap();
//!
//! assert_eq!(words, vec!["A", "A", "B", "C"]);
//! ```

use std::fmt;

use crate::chain::SequenceHandle;
use crate::error::{PipelineError, Result};

type Producer<T> = Box<dyn Iterator<Item = Result<T>> + Send>;

/// A lazily produced, pull-based stream of values.
pub struct Sequence<T> {
    producer: Producer<T>,
    handle: SequenceHandle,
    finished: bool,
}

impl<T: Send + 'static> Sequence<T> {
    /// Build a root sequence from a producer of results.
    pub(crate) fn root<I>(label: &'static str, producer: I) -> Self
    where
        I: Iterator<Item = Result<T>> + Send + 'static,
    {
        Self {
            producer: Box::new(producer),
            handle: SequenceHandle::root(label),
            finished: false,
        }
    }

    /// Build a sequence derived from `self`.
    ///
    /// This is the only way operators create new sequences, so every derived
    /// sequence is linked to its input in the cancellation chain.
    pub(crate) fn derive<U, I>(
        self,
        label: &'static str,
        build: impl FnOnce(Sequence<T>) -> I,
    ) -> Sequence<U>
    where
        U: Send + 'static,
        I: Iterator<Item = Result<U>> + Send + 'static,
    {
        let handle = SequenceHandle::child(label, &self.handle);
        Sequence {
            producer: Box::new(build(self)),
            handle,
            finished: false,
        }
    }

    /// A sequence of exactly one value.
    pub fn from_value(value: T) -> Self {
        Self::root("value", std::iter::once(Ok(value)))
    }

    /// A sequence over the items of a collection, in order.
    pub fn from_collection<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::root("collection", items.into_iter().map(Ok))
    }

    /// A sequence driven by a generator closure.
    ///
    /// The closure returns `None` once it is exhausted.
    pub fn from_fn<F>(next: F) -> Self
    where
        F: FnMut() -> Option<Result<T>> + Send + 'static,
    {
        Self::root("generator", std::iter::from_fn(next))
    }

    /// A sequence that yields nothing.
    pub fn empty() -> Self {
        Self::root("empty", std::iter::empty())
    }

    /// A sequence whose first pull fails with `error`.
    pub fn failed(error: PipelineError) -> Self {
        Self::root("failed", std::iter::once(Err(error)))
    }

    /// Pull the next value.
    ///
    /// Returns `None` once the sequence is exhausted, has failed, or has been
    /// terminated. An error is yielded at most once.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Result<T>> {
        if self.finished {
            return None;
        }
        if self.handle.is_terminated() {
            self.finished = true;
            return None;
        }
        match self.producer.next() {
            Some(Ok(value)) => Some(Ok(value)),
            Some(Err(err)) => {
                self.finished = true;
                Some(Err(err))
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    /// This sequence's link in the cancellation chain.
    pub fn handle(&self) -> &SequenceHandle {
        &self.handle
    }

    /// Stop this sequence and every upstream producer.
    pub fn terminate(&self) {
        self.handle.terminate();
    }

    /// Drain the sequence, calling `visit` for each value.
    pub fn for_each<F>(mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(T) -> Result<()>,
    {
        while let Some(item) = self.next() {
            visit(item?)?;
        }
        Ok(())
    }

    /// Drain the sequence into a vector.
    pub fn values(mut self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while let Some(item) = self.next() {
            out.push(item?);
        }
        Ok(out)
    }

    /// Take the first value, then terminate the whole pipeline.
    pub fn value(mut self) -> Result<Option<T>> {
        let first = self.next().transpose();
        self.terminate();
        first
    }

    /// Print every value on its own line.
    pub fn console(self) -> Result<()>
    where
        T: fmt::Display,
    {
        self.for_each(|value| {
            println!("{value}");
            Ok(())
        })
    }
}

impl<T> fmt::Debug for Sequence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("handle", &self.handle)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Iterator over the items of a [`Sequence`].
pub struct Values<T> {
    sequence: Sequence<T>,
}

impl<T: Send + 'static> Iterator for Values<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.sequence.next()
    }
}

impl<T: Send + 'static> IntoIterator for Sequence<T> {
    type Item = Result<T>;
    type IntoIter = Values<T>;

    fn into_iter(self) -> Self::IntoIter {
        Values { sequence: self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_value_yields_once() {
        let mut seq = Sequence::from_value(7);
        assert_eq!(seq.next().unwrap().unwrap(), 7);
        assert!(seq.next().is_none());
        assert!(seq.next().is_none());
    }

    #[test]
    fn test_from_collection_preserves_order() {
        let values = Sequence::from_collection(vec![3, 1, 2]).values().unwrap();
        assert_eq!(values, vec![3, 1, 2]);
    }

    #[test]
    fn test_error_is_yielded_once() {
        let mut count = 0;
        let mut seq = Sequence::from_fn(move || {
            count += 1;
            match count {
                1 => Some(Ok(1)),
                _ => Some(Err(PipelineError::custom("boom"))),
            }
        });
        assert_eq!(seq.next().unwrap().unwrap(), 1);
        assert!(seq.next().unwrap().is_err());
        assert!(seq.next().is_none());
    }

    #[test]
    fn test_values_surfaces_error() {
        let err = Sequence::<i32>::failed(PipelineError::custom("bad"))
            .values()
            .unwrap_err();
        assert_eq!(err.to_string(), "bad");
    }

    #[test]
    fn test_value_terminates_root() {
        let seq = Sequence::from_collection(0..);
        let root = seq.handle().clone();
        let first = seq.map(|x| x * 2).value().unwrap();
        assert_eq!(first, Some(0));
        assert!(root.is_terminated());
    }

    #[test]
    fn test_terminated_sequence_stops() {
        let mut seq = Sequence::from_collection(0..);
        assert_eq!(seq.next().unwrap().unwrap(), 0);
        seq.terminate();
        assert!(seq.next().is_none());
    }

    #[test]
    fn test_derived_sequence_links_parent() {
        let seq = Sequence::from_collection(vec![1, 2, 3]).map(|x| x + 1);
        assert_eq!(seq.handle().label(), "map");
        assert_eq!(seq.handle().depth(), 1);
        assert_eq!(seq.handle().root_of().label(), "collection");
    }

    #[test]
    fn test_into_iterator() {
        let mut total = 0;
        for item in Sequence::from_collection(vec![1, 2, 3]) {
            total += item.unwrap();
        }
        assert_eq!(total, 6);
    }
}
