//! Execution results: payload kinds and normalization of raw backend output

mod normalize;
mod outcome;

pub use normalize::ResultNormalizer;
pub use outcome::{Execution, ExecutionOutcome, ImageRef, Payload};
