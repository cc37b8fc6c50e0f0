//! # Tool descriptors and handler registry
//!
//! A [`Tool`] is only a capability descriptor: a name, a description and a
//! JSON Schema for its input. It is what gets advertised to the model. The
//! code that actually runs lives elsewhere, behind a [`ToolCallback`] that
//! the orchestrator awaits whenever the model asks for a tool.
//!
//! [`ToolRegistry`] pairs descriptors with async handlers and turns them into
//! such a callback, so most hosts never write one by hand.
//!
//! ## Schema Conversion
//!
//! Schemas may be written in three shapes, all normalized to a standard
//! `{"type": "object", "properties": ..., "required": [...]}` object:
//!
//! - **Simple notation**: `{"location": "string", "units": "string"}`
//! - **Typed schema**: `{"param": {"type": "number", "description": "A value"}}`
//! - **Full JSON Schema**: passed through unchanged
//!
//! Property order is preserved. Positional arguments in textual tool calls
//! are mapped onto parameters in that order.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use agent_runtime::{tool, ToolRegistry, History};
//! use serde_json::json;
//!
//! let weather = tool("get_weather", "Get current weather for a location")
//!     .param("location", "string")
//!     .param("units", "string")
//!     .build();
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(weather, |args| async move {
//!     let location = args["location"].as_str().unwrap_or("Unknown");
//!     Ok(json!({"location": location, "temperature": 22}))
//! });
//!
//! let callback = registry.callback(History::new());
//! # let _ = callback;
//! ```

use crate::history::History;
use crate::types::{Message, ToolResultBlock};
use crate::{Error, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Async handler run for one tool call.
///
/// ```text
/// Arc<                                 // shared between registry clones
///   dyn Fn(Value)                      // tool input as JSON
///     -> BoxFuture<Result<Value>>      // result content, or a tool failure
///     + Send + Sync>
/// ```
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Host callback invoked with each `tool_use` message.
///
/// On success it must leave exactly one `tool_result` for the call as the
/// newest history entry. Returning `Err` (or appending nothing) makes the
/// orchestrator record an `is_error` result instead.
pub type ToolCallback =
    Arc<dyn Fn(Message, CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Tool capability descriptor advertised to the model.
///
/// ## Naming
///
/// Names should be snake_case and descriptive (`get_weather`,
/// `search_documents`). The model uses the name when it decides to call the
/// tool, and the description heavily influences when it does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
}

impl Tool {
    /// Create a tool, normalizing the schema into JSON Schema form.
    ///
    /// Parameters in extended form can be marked optional with
    /// `"optional": true`, `"required": false`, or by giving a `"default"`.
    ///
    /// ```rust
    /// use agent_runtime::Tool;
    /// use serde_json::json;
    ///
    /// let search = Tool::new(
    ///     "search",
    ///     "Search for information",
    ///     json!({
    ///         "query": {"type": "string", "description": "What to search for"},
    ///         "max_results": {"type": "integer", "optional": true, "default": 10}
    ///     }),
    /// );
    /// assert_eq!(search.input_schema()["required"], json!(["query"]));
    /// ```
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: convert_schema(input_schema),
        }
    }

    /// Returns the tool's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tool's description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns a reference to the tool's input schema.
    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// Declared parameter names, in schema order
    pub fn parameter_names(&self) -> Vec<String> {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Convert the accepted schema shapes to a JSON Schema object.
///
/// ## Required vs Optional Parameters
///
/// 1. `"required": true` → required
/// 2. `"required": false` or `"optional": true` → optional
/// 3. a `"default"` value → optional
/// 4. otherwise → required
///
/// The per-property `optional`/`required` flags are removed from the output.
fn convert_schema(schema: Value) -> Value {
    let Value::Object(obj) = schema else {
        return serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        });
    };

    if obj.contains_key("type") && obj.contains_key("properties") {
        return Value::Object(obj);
    }

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for (param_name, param_type) in obj {
        match param_type {
            Value::String(type_str) => {
                properties.insert(param_name.clone(), type_to_json_schema(&type_str));
                required.push(param_name);
            }
            Value::Object(mut prop) => {
                let is_optional = prop
                    .remove("optional")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let is_required = prop.remove("required").and_then(|v| v.as_bool());
                let has_default = prop.contains_key("default");

                properties.insert(param_name.clone(), Value::Object(prop));

                if let Some(true) = is_required {
                    required.push(param_name);
                } else if is_optional || is_required == Some(false) {
                    // optional
                } else if !has_default {
                    required.push(param_name);
                }
            }
            _ => {}
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

/// Map a friendly type string to a JSON Schema type object.
///
/// | Input Types | JSON Schema Type |
/// |-------------|------------------|
/// | `"string"`, `"str"` | `"string"` |
/// | `"number"`, `"float"`, `"f32"`, `"f64"` | `"number"` |
/// | `"integer"`, `"int"`, `"i32"`, `"i64"`, `"u32"`, `"u64"` | `"integer"` |
/// | `"boolean"`, `"bool"` | `"boolean"` |
/// | `"array"`, `"list"`, `"vec"` | `"array"` |
/// | `"object"`, `"dict"`, `"map"` | `"object"` |
/// | anything else | `"string"` |
fn type_to_json_schema(type_str: &str) -> Value {
    let json_type = match type_str {
        "string" | "str" => "string",
        "integer" | "int" | "i32" | "i64" | "u32" | "u64" => "integer",
        "number" | "float" | "f32" | "f64" => "number",
        "boolean" | "bool" => "boolean",
        "array" | "list" | "vec" => "array",
        "object" | "dict" | "map" => "object",
        _ => "string",
    };

    serde_json::json!({ "type": json_type })
}

/// Builder for creating tools with a fluent API.
///
/// Use either `.param()` for simple cases or `.schema()` for complex ones.
/// Calling `.schema()` replaces earlier params; calling `.param()` after a
/// non-object schema resets it to an empty object first.
pub struct ToolBuilder {
    name: String,
    description: String,
    schema: Value,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: serde_json::json!({}),
        }
    }

    /// Set the complete input schema.
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    /// Add a single required parameter with a simple type string.
    pub fn param(mut self, name: &str, type_str: &str) -> Self {
        if let Value::Object(obj) = &mut self.schema {
            obj.insert(name.to_string(), Value::String(type_str.to_string()));
        } else {
            let mut obj = serde_json::Map::new();
            obj.insert(name.to_string(), Value::String(type_str.to_string()));
            self.schema = Value::Object(obj);
        }
        self
    }

    pub fn build(self) -> Tool {
        Tool::new(self.name, self.description, self.schema)
    }
}

/// Create a tool using the builder pattern (convenience function).
///
/// ```rust
/// use agent_runtime::tool;
///
/// let add = tool("add", "Add two numbers")
///     .param("a", "number")
///     .param("b", "number")
///     .build();
/// assert_eq!(add.parameter_names(), vec!["a", "b"]);
/// ```
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name, description)
}

/// Descriptors plus the handlers that execute them
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
    handlers: HashMap<String, ToolHandler>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool and its handler, replacing any tool with the same name
    pub fn register<F, Fut>(&mut self, tool: Tool, handler: F) -> &mut Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let name = tool.name().to_string();
        self.tools.retain(|t| t.name() != name);
        self.tools.push(tool);
        let handler: ToolHandler =
            Arc::new(move |args| -> BoxFuture<'static, Result<Value>> { Box::pin(handler(args)) });
        self.handlers.insert(name, handler);
        self
    }

    /// Descriptors to advertise to the model
    pub fn tools(&self) -> Vec<Tool> {
        self.tools.clone()
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run one tool by name
    pub async fn execute(&self, name: &str, input: Value) -> Result<Value> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| Error::tool(format!("unknown tool: {}", name)))?;
        handler(input).await
    }

    /// Build a callback that runs the matching handler and records its
    /// result in `history`.
    ///
    /// The handler races the cancellation token; a cancelled call records
    /// nothing and reports [`Error::Cancelled`].
    pub fn callback(&self, history: History) -> ToolCallback {
        let registry = self.clone();
        Arc::new(move |message: Message, cancel: CancellationToken| -> BoxFuture<'static, Result<()>> {
            let registry = registry.clone();
            let history = history.clone();
            Box::pin(async move {
                let tool_use = message
                    .tool_uses()
                    .next()
                    .cloned()
                    .ok_or_else(|| Error::tool("callback invoked without a tool_use block"))?;

                let outcome = tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    outcome = registry.execute(&tool_use.name, tool_use.input.clone()) => outcome,
                };

                let content = outcome?;
                let result = ToolResultBlock::new(&tool_use.id, content).with_name(&tool_use.name);
                history.append_tool_result(result);
                Ok(())
            })
        })
    }
}
