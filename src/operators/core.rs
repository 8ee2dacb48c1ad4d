//! Core operators: element transforms, flattening, reduction and recovery.

use std::collections::VecDeque;

use crate::chain::InnerLink;
use crate::error::{PipelineError, Result};
use crate::sequence::Sequence;
use crate::source::IntoSequence;

impl<T: Send + 'static> Sequence<T> {
    /// Convert each element with `f`.
    pub fn map<U, F>(self, mut f: F) -> Sequence<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        self.derive("map", move |mut input| {
            std::iter::from_fn(move || input.next().map(|item| item.map(&mut f)))
        })
    }

    /// Convert each element with a fallible `f`.
    ///
    /// The first `Err` returned by `f` ends the sequence.
    pub fn try_map<U, F>(self, mut f: F) -> Sequence<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Result<U> + Send + 'static,
    {
        self.derive("try_map", move |mut input| {
            std::iter::from_fn(move || input.next().map(|item| item.and_then(&mut f)))
        })
    }

    /// Keep the elements for which `pred` returns true.
    pub fn filter<F>(self, mut pred: F) -> Sequence<T>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        self.derive("filter", move |mut input| {
            std::iter::from_fn(move || {
                loop {
                    match input.next()? {
                        Ok(value) if pred(&value) => return Some(Ok(value)),
                        Ok(_) => continue,
                        Err(err) => return Some(Err(err)),
                    }
                }
            })
        })
    }

    /// Keep the elements for which a fallible `pred` returns `Ok(true)`.
    pub fn try_filter<F>(self, mut pred: F) -> Sequence<T>
    where
        F: FnMut(&T) -> Result<bool> + Send + 'static,
    {
        self.derive("try_filter", move |mut input| {
            std::iter::from_fn(move || {
                loop {
                    let value = match input.next()? {
                        Ok(value) => value,
                        Err(err) => return Some(Err(err)),
                    };
                    match pred(&value) {
                        Ok(true) => return Some(Ok(value)),
                        Ok(false) => continue,
                        Err(err) => return Some(Err(err)),
                    }
                }
            })
        })
    }

    /// Observe each element without changing the sequence.
    pub fn tap<F>(self, mut visit: F) -> Sequence<T>
    where
        F: FnMut(&T) + Send + 'static,
    {
        self.derive("tap", move |mut input| {
            std::iter::from_fn(move || {
                let item = input.next()?;
                if let Ok(value) = &item {
                    visit(value);
                }
                Some(item)
            })
        })
    }

    /// Flatten a sequence of collections or sequences.
    pub fn flatten<U>(self) -> Sequence<U>
    where
        T: IntoSequence<U>,
        U: Send + 'static,
    {
        let link = InnerLink::new();
        let inner = link.clone();
        let seq = self.derive("flatten", move |input| {
            Flatten::new(input, inner, |value: T| Ok(value.into_sequence()))
        });
        link.attach(seq.handle());
        seq
    }

    /// Map each element to a collection or sequence and flatten the result.
    ///
    /// Each inner sequence is drained completely before the next outer
    /// element is pulled.
    pub fn flat_map<U, S, F>(self, mut f: F) -> Sequence<U>
    where
        U: Send + 'static,
        S: IntoSequence<U>,
        F: FnMut(T) -> S + Send + 'static,
    {
        let link = InnerLink::new();
        let inner = link.clone();
        let seq = self.derive("flat_map", move |input| {
            Flatten::new(input, inner, move |value: T| Ok(f(value).into_sequence()))
        });
        link.attach(seq.handle());
        seq
    }

    /// Fold the whole sequence into one value.
    ///
    /// Blocks on the first pull until the upstream is exhausted.
    pub fn reduce<U, F>(self, init: U, f: F) -> Sequence<U>
    where
        U: Send + 'static,
        F: FnMut(U, T) -> U + Send + 'static,
    {
        self.fold_into("reduce", init, f)
    }

    /// Gather the whole sequence into a single vector.
    pub fn collect(self) -> Sequence<Vec<T>> {
        self.fold_into("collect", Vec::new(), |mut acc, item| {
            acc.push(item);
            acc
        })
    }

    pub(crate) fn fold_into<U, F>(self, label: &'static str, init: U, f: F) -> Sequence<U>
    where
        U: Send + 'static,
        F: FnMut(U, T) -> U + Send + 'static,
    {
        self.derive(label, move |mut input| {
            let mut pending = Some((init, f));
            std::iter::from_fn(move || {
                let (mut acc, mut f) = pending.take()?;
                while let Some(item) = input.next() {
                    match item {
                        Ok(value) => acc = f(acc, value),
                        Err(err) => return Some(Err(err)),
                    }
                }
                Some(Ok(acc))
            })
        })
    }

    /// Hand the whole sequence to `f` and continue with what it returns.
    ///
    /// `f` runs on the first pull.
    pub fn wrap<U, S, F>(self, f: F) -> Sequence<U>
    where
        U: Send + 'static,
        S: IntoSequence<U>,
        F: FnOnce(Sequence<T>) -> S + Send + 'static,
    {
        let link = InnerLink::new();
        let inner = link.clone();
        let seq = self.derive("wrap", move |input| {
            let mut pending = Some((input, f));
            let mut output: Option<Sequence<U>> = None;
            std::iter::from_fn(move || {
                if let Some((input, f)) = pending.take() {
                    let built = f(input).into_sequence();
                    inner.set(built.handle());
                    output = Some(built);
                }
                output.as_mut()?.next()
            })
        });
        link.attach(seq.handle());
        seq
    }

    /// On the first upstream failure, continue with `alternative`.
    ///
    /// Elements produced before the failure are kept.
    pub fn on_error<S>(self, alternative: S) -> Sequence<T>
    where
        S: IntoSequence<T> + Send + 'static,
    {
        self.on_error_with(move |_| alternative)
    }

    /// Like [`on_error`](Self::on_error), building the alternative from the error.
    pub fn on_error_with<S, F>(self, fallback: F) -> Sequence<T>
    where
        S: IntoSequence<T>,
        F: FnOnce(PipelineError) -> S + Send + 'static,
    {
        let link = InnerLink::new();
        let inner = link.clone();
        let seq = self.derive("on_error", move |input| {
            let mut primary = Some(input);
            let mut fallback = Some(fallback);
            let mut replacement: Option<Sequence<T>> = None;
            std::iter::from_fn(move || {
                if let Some(input) = primary.as_mut() {
                    match input.next() {
                        Some(Ok(value)) => return Some(Ok(value)),
                        None => return None,
                        Some(Err(err)) => {
                            tracing::debug!(error = %err, "switching to fallback sequence");
                            primary = None;
                            let build = fallback.take()?;
                            let built = build(err).into_sequence();
                            inner.set(built.handle());
                            replacement = Some(built);
                        }
                    }
                }
                replacement.as_mut()?.next()
            })
        });
        link.attach(seq.handle());
        seq
    }

    /// Append other sequences, each drained fully before the next starts.
    pub fn concat<S, I>(self, others: I) -> Sequence<T>
    where
        S: IntoSequence<T>,
        I: IntoIterator<Item = S>,
    {
        let rest: VecDeque<Sequence<T>> = others.into_iter().map(|s| s.into_sequence()).collect();
        let handles: Vec<_> = rest.iter().map(|seq| seq.handle().clone()).collect();
        let seq = self.derive("concat", move |first| {
            let mut current = first;
            let mut rest = rest;
            std::iter::from_fn(move || {
                loop {
                    if let Some(item) = current.next() {
                        return Some(item);
                    }
                    current = rest.pop_front()?;
                }
            })
        });
        seq.handle().on_release(move || {
            for handle in handles {
                handle.terminate();
            }
        });
        seq
    }
}

/// Drives an outer sequence through `expand`, draining each inner sequence.
struct Flatten<T, U, F> {
    outer: Sequence<T>,
    inner: Option<Sequence<U>>,
    link: InnerLink,
    expand: F,
}

impl<T, U, F> Flatten<T, U, F>
where
    F: FnMut(T) -> Result<Sequence<U>>,
{
    fn new(outer: Sequence<T>, link: InnerLink, expand: F) -> Self {
        Self {
            outer,
            inner: None,
            link,
            expand,
        }
    }
}

impl<T, U, F> Iterator for Flatten<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> Result<Sequence<U>>,
{
    type Item = Result<U>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(inner) = self.inner.as_mut() {
                match inner.next() {
                    Some(item) => return Some(item),
                    None => self.inner = None,
                }
            }
            match self.outer.next()? {
                Ok(value) => match (self.expand)(value) {
                    Ok(expanded) => {
                        self.link.set(expanded.handle());
                        self.inner = Some(expanded);
                    }
                    Err(err) => return Some(Err(err)),
                },
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
