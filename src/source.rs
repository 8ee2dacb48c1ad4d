//! Coercion of input values into sequences.
//!
//! [`Source`] is the explicit sum of everything a pipeline can start from.
//! [`IntoSequence`] is implemented for the common shapes so operators such as
//! [`Sequence::flat_map`] and [`Sequence::concat`] accept them directly.

use std::any::Any;
use std::io::Read;

use crate::bridge::{self, ReadConfig};
use crate::error::PipelineError;
use crate::sequence::Sequence;

/// Any value a sequence can be built from.
pub enum Source<T> {
    /// A single value, yielded once.
    Scalar(T),
    /// A finite in-memory collection, yielded in order.
    Collection(Vec<T>),
    /// An existing sequence, passed through.
    Sequence(Sequence<T>),
    /// A push-based byte stream, yielded one decoded line at a time.
    Stream {
        reader: Box<dyn Read + Send>,
        decode: fn(String) -> T,
    },
    /// A value of a kind the pipeline does not know how to iterate.
    Unsupported(String),
}

impl<T: Send + 'static> Source<T> {
    /// Wrap a byte stream whose lines are converted with `decode`.
    pub fn stream_with(reader: impl Read + Send + 'static, decode: fn(String) -> T) -> Self {
        Source::Stream {
            reader: Box::new(reader),
            decode,
        }
    }

    /// Classify a type-erased value.
    ///
    /// Recognizes `T`, `Vec<T>`, `Sequence<T>` and `Source<T>`; anything else
    /// becomes [`Source::Unsupported`].
    pub fn from_any(value: Box<dyn Any + Send>) -> Self {
        let value = match value.downcast::<Source<T>>() {
            Ok(source) => return *source,
            Err(value) => value,
        };
        let value = match value.downcast::<Sequence<T>>() {
            Ok(seq) => return Source::Sequence(*seq),
            Err(value) => value,
        };
        let value = match value.downcast::<Vec<T>>() {
            Ok(items) => return Source::Collection(*items),
            Err(value) => value,
        };
        match value.downcast::<T>() {
            Ok(scalar) => Source::Scalar(*scalar),
            Err(_) => Source::Unsupported(format!(
                "value is not a {} or a collection of them",
                std::any::type_name::<T>()
            )),
        }
    }

    /// Produce the sequence for this source.
    ///
    /// Never consumes stream contents eagerly. An unsupported source fails
    /// on first pull rather than here.
    pub fn into_sequence(self) -> Sequence<T> {
        match self {
            Source::Scalar(value) => Sequence::from_value(value),
            Source::Collection(items) => Sequence::from_collection(items),
            Source::Sequence(seq) => seq,
            Source::Stream { reader, decode } => {
                bridge::read_stream(reader, &ReadConfig::default()).map(decode)
            }
            Source::Unsupported(kind) => Sequence::failed(PipelineError::UnsupportedSource(kind)),
        }
    }
}

impl Source<String> {
    /// Wrap a byte stream as a sequence of text lines.
    pub fn stream(reader: impl Read + Send + 'static) -> Self {
        Source::stream_with(reader, std::convert::identity)
    }
}

impl<T> From<Sequence<T>> for Source<T> {
    fn from(seq: Sequence<T>) -> Self {
        Source::Sequence(seq)
    }
}

impl<T> From<Vec<T>> for Source<T> {
    fn from(items: Vec<T>) -> Self {
        Source::Collection(items)
    }
}

/// Conversion into a [`Sequence`].
pub trait IntoSequence<T> {
    fn into_sequence(self) -> Sequence<T>;
}

impl<T: Send + 'static> IntoSequence<T> for Sequence<T> {
    fn into_sequence(self) -> Sequence<T> {
        self
    }
}

impl<T: Send + 'static> IntoSequence<T> for Source<T> {
    fn into_sequence(self) -> Sequence<T> {
        Source::into_sequence(self)
    }
}

impl<T: Send + 'static> IntoSequence<T> for Vec<T> {
    fn into_sequence(self) -> Sequence<T> {
        Sequence::from_collection(self)
    }
}

impl<T: Send + 'static> IntoSequence<T> for Option<T> {
    fn into_sequence(self) -> Sequence<T> {
        Sequence::from_collection(self)
    }
}
