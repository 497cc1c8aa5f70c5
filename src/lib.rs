//! Chartsmith - conversational orchestration of chart-rendering tools
//!
//! Chartsmith turns free-text chart requests into validated tool invocations. A
//! conversation accumulates chart type and parameters across turns until a complete
//! request exists, which is then rendered by an isolated, time-bounded backend process
//! and normalized into data, image, and chart-spec payloads.

pub mod conversation;
pub mod engine;
pub mod error;
pub mod id;
pub mod interpret;
pub mod orchestrator;
pub mod output;
pub mod params;
pub mod storage;
pub mod tools;

pub use error::{ChartsmithError, Result};
