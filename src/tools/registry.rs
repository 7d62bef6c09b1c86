//! Tool registry
//!
//! Maps tool names to definitions. Built once at startup; read-only after.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{CalbotError, Result};

use super::definition::{ToolDefinition, ToolOutput, ToolSpec};

/// Registry of tool definitions, keyed by unique name
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
    order: Vec<String>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(&mut self, definition: ToolDefinition) -> Result<()> {
        if self.tools.contains_key(&definition.name) {
            return Err(CalbotError::DuplicateTool(definition.name));
        }
        self.order.push(definition.name.clone());
        self.tools.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Get a tool by name
    pub fn lookup(&self, name: &str) -> Result<&ToolDefinition> {
        self.tools
            .get(name)
            .ok_or_else(|| CalbotError::UnknownTool(name.to_string()))
    }

    /// All definitions in registration order
    pub fn list(&self) -> Vec<&ToolDefinition> {
        self.order.iter().filter_map(|name| self.tools.get(name)).collect()
    }

    /// Advertised specs in registration order
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.list().into_iter().map(ToolDefinition::spec).collect()
    }

    /// Get number of tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Look up, bind and invoke a tool.
    ///
    /// Unknown names fail before any handler runs. Argument and handler
    /// errors are returned as-is; callers at the dispatch boundary turn them
    /// into failed outputs.
    pub async fn dispatch(&self, name: &str, arguments: &Map<String, Value>) -> Result<ToolOutput> {
        let definition = self.lookup(name)?;
        let bound = bind_arguments(definition, arguments)?;
        definition.handler().call(&bound).await
    }
}

/// Bind caller arguments to a definition's parameters.
///
/// Fills declared defaults for absent optional parameters, rejects missing
/// required parameters and type mismatches, and drops undeclared keys.
pub fn bind_arguments(definition: &ToolDefinition, arguments: &Map<String, Value>) -> Result<Map<String, Value>> {
    let mut bound = Map::new();

    for param in &definition.params {
        match arguments.get(&param.name) {
            Some(Value::Null) | None => {
                if let Some(default) = &param.default {
                    bound.insert(param.name.clone(), default.clone());
                } else if param.required {
                    return Err(CalbotError::InvalidArguments(format!(
                        "Tool '{}' missing required field: {}",
                        definition.name, param.name
                    )));
                }
            }
            Some(value) => {
                if !param.param_type.accepts(value) {
                    return Err(CalbotError::InvalidArguments(format!(
                        "Tool '{}' field '{}' must be of type {}",
                        definition.name,
                        param.name,
                        param.param_type.as_str()
                    )));
                }
                bound.insert(param.name.clone(), value.clone());
            }
        }
    }

    Ok(bound)
}
