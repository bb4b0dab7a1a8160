//! Parallel aggregation of `name:value` line records.
//!
//! One reader thread splits the input into line-aligned chunks, a fixed pool
//! of workers parses and folds them into per-worker aggregates, and a reducer
//! merges those into the final per-key count/sum/min/max. Values are kept in
//! tenths as integers.

pub mod aggregate;
pub mod constants;
pub mod error;
pub mod parse;
pub mod reader;
pub mod runtime;
pub mod stats;
pub mod utils;
pub mod worker;

pub use aggregate::{Aggregate, FinalAggregate, MergeReducer, PartialAggregate, Stats};
pub use error::{CombinedError, ParseError, ParseErrorKind, Participant, StageError};
pub use parse::{parse_line, Record};
pub use reader::{CancelToken, Chunk, ChunkReader};
pub use runtime::{aggregate_file, Pipeline, PipelineConfig, RunOutcome};
pub use stats::RunReport;
