//! # seqpipe
//!
//! Lazy, pull-based sequence pipelines.
//!
//! A [`Sequence`] is a chain of operators that produces values only when the
//! consumer pulls. Sources range from in-memory collections to files, child
//! processes, directory scans and HTTP responses; long-running sources are
//! bridged onto reader threads with bounded channels so memory stays flat.
//!
//! ## Overview
//!
//! - **Pull-based**: nothing runs until a terminal such as
//!   [`values`](Sequence::values) or [`for_each`](Sequence::for_each) pulls
//! - **Errors flow downstream**: a failure is yielded once as `Err`, then the
//!   sequence is finished
//! - **Early termination**: operators that stop early (`first`, exact `pair`,
//!   `repeat`) terminate their upstream chain, which closes files, kills
//!   processes and drops connections
//! - **Parallel**: [`parallel`](Sequence::parallel) runs a bounded number of
//!   transforms at once and emits in completion order
//! - **Textual pipelines**: [`dsl`] runs CMS Pipelines style `.pipe` files
//!   over the operators in [`registry`]
//!
//! ## Example
//!
//! ```
//! use seqpipe::Sequence;
//!
//! let words = Sequence::from_collection(vec!["pear", "apple", "fig", "apple"])
//!     .map(str::to_string)
//!     .sort()
//!     .unique()
//!     .first(2)
//!     .unwrap()
//!     .values()
//!     .unwrap();
//!
//! assert_eq!(words, vec!["apple", "fig"]);
//! ```

pub mod bridge;
pub mod chain;
pub mod config;
pub mod dsl;
pub mod error;
pub mod exec;
pub mod net;
pub mod operators;
pub mod registry;
pub mod scan;
pub mod sequence;
pub mod source;

pub use bridge::{Emit, ReadConfig, ReadMode, SequenceReader, Teardown, WriteMode};
pub use chain::SequenceHandle;
pub use config::Settings;
pub use dsl::{Stage, parse_pipeline, run_pipeline};
pub use error::{PipelineError, Result};
pub use exec::{ExecConfig, Execution};
pub use net::HttpConfig;
pub use operators::{MatchMode, PairMode, Pattern, Separator, default_concurrency};
pub use registry::{OperatorDescriptor, OperatorKind};
pub use scan::{FileMatcher, ScanConfig, ScanEntry, scan};
pub use sequence::{Sequence, Values};
pub use source::{IntoSequence, Source};
