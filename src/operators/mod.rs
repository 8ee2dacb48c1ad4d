//! Operators on [`Sequence`](crate::Sequence).
//!
//! Every operator is an inherent method that consumes its input and returns a
//! derived sequence. Operators that validate arguments return `Result` so a
//! bad argument fails when the pipeline is built, before anything is pulled.

pub mod core;
pub mod data;
pub mod limit;
pub mod parallel;
pub mod text;
pub mod time;
pub mod transform;

pub use parallel::default_concurrency;
pub use text::{EMAIL_PATTERN, MatchMode, Pattern, Separator, URL_PATTERN};
pub use transform::PairMode;
