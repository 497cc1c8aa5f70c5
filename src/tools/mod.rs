//! Tool System - tool definitions, path-key addressing, and catalog loading

mod catalog;
mod definition;

pub use catalog::{CatalogIndex, LoadReport, SkippedTool, ToolCatalog};
pub use definition::{PATH_SEPARATOR, ToolDefinition, ToolPath};
