//! Parameter schemas and resolution against supplied values

mod resolver;
mod schema;

pub use resolver::{InvalidParam, Resolution, resolve, validate_strict};
pub use schema::{ParamSpec, ParamType};
