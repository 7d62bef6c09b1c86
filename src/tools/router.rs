//! Tool routing and execution
//!
//! Defines the ToolRouter trait the run driver dispatches through and the
//! dispatch boundary the tool server answers `tools/call` with. The IPC
//! client implements the trait for a tool server in another process.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{CalbotError, Result};

use super::definition::{ToolOutput, ToolSpec};
use super::registry::ToolRegistry;

/// Trait for listing and invoking tools
#[async_trait]
pub trait ToolRouter: Send + Sync {
    /// Tools available for dispatch
    async fn list_tools(&self) -> Result<Vec<ToolSpec>>;

    /// Invoke a tool by name.
    ///
    /// Handler failures come back as `Ok` outputs with `is_error` set.
    /// `Err` is reserved for unknown tools and transport failures.
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolOutput>;
}

/// Dispatch boundary used by the tool server for every `tools/call`.
///
/// Unknown tools propagate as errors; every other failure is turned into a
/// readable failed output so one bad call never takes down the session.
pub async fn dispatch_tool(registry: &ToolRegistry, name: &str, arguments: &Map<String, Value>) -> Result<ToolOutput> {
    match registry.dispatch(name, arguments).await {
        Ok(output) => {
            tracing::debug!(tool = %name, is_error = output.is_error, "Tool finished");
            Ok(output)
        }
        Err(CalbotError::UnknownTool(name)) => {
            tracing::warn!(tool = %name, "Unknown tool requested");
            Err(CalbotError::UnknownTool(name))
        }
        Err(e) => {
            tracing::warn!(tool = %name, error = %e, "Tool failed");
            Ok(ToolOutput::error(e.to_string()))
        }
    }
}
