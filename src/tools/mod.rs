//! Tool System - definitions, registry, argument normalization and routing

pub mod calendar;
mod definition;
mod normalize;
mod registry;
mod router;

pub use calendar::{AVAILABILITY_TOOL, CREATE_EVENT_TOOL, calendar_registry};
pub use definition::{ParamSpec, ParamType, ToolDefinition, ToolHandler, ToolOutput, ToolSpec};
pub use normalize::normalize_arguments;
pub use registry::{ToolRegistry, bind_arguments};
pub use router::{ToolRouter, dispatch_tool};
