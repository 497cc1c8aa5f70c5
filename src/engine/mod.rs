//! Rendering backends: engine kinds, process execution, pooling, and dispatch

mod dispatcher;
mod kind;
mod pool;
mod process;

pub use dispatcher::{EngineDispatcher, select_engine};
pub use kind::EngineKind;
pub use pool::WorkerPool;
pub use process::{Engine, EngineError, OUTPUT_DIR_ENV, ProcessEngine, RawOutput};
