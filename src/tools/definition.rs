//! Tool definitions, parameter schemas and the tagged tool output
//!
//! A definition pairs a declared parameter list with an async handler. The
//! parameter list renders to the JSON Schema advertised to the orchestrator.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Declared type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    /// JSON Schema type name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    /// Check whether a JSON value is acceptable for this type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    /// A parameter the caller must supply
    pub fn required(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
            default: None,
        }
    }

    /// An optional parameter
    pub fn optional(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    /// Set the value bound when the caller omits this parameter
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Uniform result produced by every tool handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Human-readable result text
    pub text: String,
    /// Optional machine-readable fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<Map<String, Value>>,
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful plain-text output
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
            is_error: false,
        }
    }

    /// Failed output
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
            is_error: true,
        }
    }

    /// Attach structured fields
    pub fn with_structured(mut self, structured: Value) -> Self {
        self.structured = match structured {
            Value::Object(map) => Some(map),
            _ => None,
        };
        self
    }

    /// String submitted back to the orchestrator for this output.
    ///
    /// Plain text when there are no structured fields, otherwise a JSON object
    /// holding the text under `result` next to the structured fields.
    pub fn to_submission(&self) -> String {
        match &self.structured {
            None => self.text.clone(),
            Some(fields) => {
                let mut obj = Map::new();
                obj.insert("result".to_string(), Value::String(self.text.clone()));
                for (k, v) in fields {
                    obj.insert(k.clone(), v.clone());
                }
                Value::Object(obj).to_string()
            }
        }
    }
}

/// Async function behind a tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Invoke with bound arguments (defaults already filled in)
    async fn call(&self, args: &Map<String, Value>) -> Result<ToolOutput>;
}

/// Advertised tool shape: what `list_tools` returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolSpec {
    /// Function-tool entry in the orchestrator's agent definition format
    pub fn to_function_tool(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema,
            }
        })
    }
}

/// A registered tool: name, description, parameters and handler
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    /// Create a new tool definition with no parameters
    pub fn new(name: impl Into<String>, description: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            handler,
        }
    }

    /// Declare a parameter
    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Names of the required parameters, in declaration order
    pub fn required_params(&self) -> Vec<&str> {
        self.params.iter().filter(|p| p.required).map(|p| p.name.as_str()).collect()
    }

    /// JSON schema for input parameters
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.params {
            let mut prop = Map::new();
            prop.insert("type".to_string(), Value::String(param.param_type.as_str().to_string()));
            prop.insert("description".to_string(), Value::String(param.description.clone()));
            if let Some(default) = &param.default {
                prop.insert("default".to_string(), default.clone());
            }
            properties.insert(param.name.clone(), Value::Object(prop));
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": self.required_params(),
        })
    }

    /// Advertised form of this tool
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema(),
        }
    }

    pub(crate) fn handler(&self) -> &Arc<dyn ToolHandler> {
        &self.handler
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
