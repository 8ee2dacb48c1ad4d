//! Limiting operators: `first`, `last`, `skip` and `repeat`.

use std::collections::VecDeque;

use crate::error::{PipelineError, Result};
use crate::sequence::Sequence;

impl<T: Send + 'static> Sequence<T> {
    /// Keep the first `count` elements.
    ///
    /// Upstream is terminated as soon as the last wanted element has been
    /// pulled, so an open file or child process is released right away
    /// instead of when the whole pipeline is dropped.
    pub fn first(self, count: usize) -> Result<Sequence<T>> {
        if count == 0 {
            return Err(PipelineError::invalid("first", "Must be >= 1"));
        }
        Ok(self.derive("first", move |mut input| {
            let mut taken = 0;
            std::iter::from_fn(move || {
                if taken >= count {
                    return None;
                }
                let item = input.next()?;
                if item.is_ok() {
                    taken += 1;
                    if taken == count {
                        input.terminate();
                    }
                }
                Some(item)
            })
        }))
    }

    /// Keep only the last `count` elements.
    ///
    /// Memory use is bounded by `count`; nothing is emitted until upstream
    /// is exhausted.
    pub fn last(self, count: usize) -> Result<Sequence<T>> {
        if count == 0 {
            return Err(PipelineError::invalid("last", "Must be >= 1"));
        }
        Ok(self.derive("last", move |mut input| {
            let mut window: Option<VecDeque<T>> = None;
            std::iter::from_fn(move || {
                if window.is_none() {
                    let mut buffer = VecDeque::new();
                    while let Some(item) = input.next() {
                        match item {
                            Ok(value) => {
                                if buffer.len() == count {
                                    buffer.pop_front();
                                }
                                buffer.push_back(value);
                            }
                            Err(err) => return Some(Err(err)),
                        }
                    }
                    window = Some(buffer);
                }
                window.as_mut()?.pop_front().map(Ok)
            })
        }))
    }

    /// Drop elements from either end.
    ///
    /// A positive `count` drops that many leading elements. A negative
    /// `count` drops that many trailing elements, which delays output by
    /// `|count|` elements.
    pub fn skip(self, count: i64) -> Result<Sequence<T>> {
        if count == 0 {
            return Err(PipelineError::invalid("skip", "Must not be 0"));
        }
        let n = usize::try_from(count.unsigned_abs())
            .map_err(|_| PipelineError::invalid("skip", "Count out of range"))?;
        if count > 0 {
            return Ok(self.derive("skip", move |mut input| {
                let mut skipped = 0;
                std::iter::from_fn(move || {
                    while skipped < n {
                        match input.next()? {
                            Ok(_) => skipped += 1,
                            Err(err) => return Some(Err(err)),
                        }
                    }
                    input.next()
                })
            }));
        }
        Ok(self.derive("skip", move |mut input| {
            let mut held: VecDeque<T> = VecDeque::new();
            std::iter::from_fn(move || {
                loop {
                    match input.next()? {
                        Ok(value) => {
                            held.push_back(value);
                            if held.len() > n {
                                return held.pop_front().map(Ok);
                            }
                        }
                        Err(err) => return Some(Err(err)),
                    }
                }
            })
        }))
    }

    /// Replay upstream cyclically until `count` elements were emitted.
    ///
    /// At most `count` elements are read from upstream. With `None` the
    /// whole upstream is replayed forever. An empty upstream yields nothing.
    pub fn repeat(self, count: Option<usize>) -> Sequence<T>
    where
        T: Clone,
    {
        let limit = count.unwrap_or(usize::MAX);
        self.derive("repeat", move |mut input| {
            let mut buffer: Vec<T> = Vec::new();
            let mut reading = true;
            let mut emitted = 0usize;
            std::iter::from_fn(move || {
                if count.is_some() && emitted >= limit {
                    return None;
                }
                if reading {
                    match input.next() {
                        Some(Ok(value)) => {
                            buffer.push(value.clone());
                            emitted += 1;
                            if buffer.len() >= limit {
                                reading = false;
                                input.terminate();
                            }
                            return Some(Ok(value));
                        }
                        Some(Err(err)) => return Some(Err(err)),
                        None => reading = false,
                    }
                }
                if buffer.is_empty() {
                    return None;
                }
                let value = buffer[emitted % buffer.len()].clone();
                emitted = emitted.wrapping_add(1);
                Some(Ok(value))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_first() {
        let out = Sequence::from_collection(1..=10).first(3).unwrap().values().unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn test_first_more_than_available() {
        let out = Sequence::from_collection(vec![1, 2]).first(5).unwrap().values().unwrap();
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn test_first_terminates_upstream_immediately() {
        let released = Arc::new(AtomicBool::new(false));
        let pulls = Arc::new(AtomicUsize::new(0));
        let counter = pulls.clone();
        let source = Sequence::from_fn(move || Some(Ok(counter.fetch_add(1, Ordering::SeqCst))));
        let flag = released.clone();
        source
            .handle()
            .on_release(move || flag.store(true, Ordering::SeqCst));

        let mut seq = source.map(|x| x * 10).first(2).unwrap();
        assert_eq!(seq.next().unwrap().unwrap(), 0);
        assert!(!released.load(Ordering::SeqCst));
        assert_eq!(seq.next().unwrap().unwrap(), 10);
        assert!(released.load(Ordering::SeqCst));
        assert!(seq.next().is_none());
        assert_eq!(pulls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_last() {
        let out = Sequence::from_collection(1..=10).last(3).unwrap().values().unwrap();
        assert_eq!(out, vec![8, 9, 10]);

        let short = Sequence::from_collection(vec![1]).last(3).unwrap().values().unwrap();
        assert_eq!(short, vec![1]);
    }

    #[test]
    fn test_zero_counts_rejected() {
        assert!(Sequence::from_collection(vec![1]).first(0).is_err());
        assert!(Sequence::from_collection(vec![1]).last(0).is_err());
        let err = Sequence::from_collection(vec![1]).skip(0).unwrap_err();
        assert!(err.to_string().contains("skip"));
    }

    #[test]
    fn test_skip_leading() {
        let out = Sequence::from_collection(1..=5).skip(2).unwrap().values().unwrap();
        assert_eq!(out, vec![3, 4, 5]);

        let none = Sequence::from_collection(1..=2).skip(5).unwrap().values().unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_skip_trailing() {
        let out = Sequence::from_collection(1..=5).skip(-2).unwrap().values().unwrap();
        assert_eq!(out, vec![1, 2, 3]);

        let none = Sequence::from_collection(1..=2).skip(-3).unwrap().values().unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_huge_counts_do_not_reserve() {
        let items = || Sequence::from_collection(vec![1, 2, 3]);
        assert_eq!(items().last(usize::MAX).unwrap().values().unwrap(), vec![1, 2, 3]);
        assert!(items().skip(i64::MIN).unwrap().values().unwrap().is_empty());
        assert!(items().skip(i64::MAX).unwrap().values().unwrap().is_empty());
    }

    #[test]
    fn test_repeat_fixed_count() {
        let out = Sequence::from_collection(vec![1, 2, 3])
            .repeat(Some(7))
            .values()
            .unwrap();
        assert_eq!(out, vec![1, 2, 3, 1, 2, 3, 1]);
    }

    #[test]
    fn test_repeat_reads_at_most_count() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let counter = pulls.clone();
        let out = Sequence::from_fn(move || Some(Ok(counter.fetch_add(1, Ordering::SeqCst))))
            .repeat(Some(2))
            .values()
            .unwrap();
        assert_eq!(out, vec![0, 1]);
        assert_eq!(pulls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_repeat_forever() {
        let out = Sequence::from_collection(vec!["a", "b"])
            .repeat(None)
            .first(5)
            .unwrap()
            .values()
            .unwrap();
        assert_eq!(out, vec!["a", "b", "a", "b", "a"]);
    }

    #[test]
    fn test_repeat_empty_upstream() {
        let out = Sequence::<i32>::empty().repeat(None).values().unwrap();
        assert!(out.is_empty());
    }
}
