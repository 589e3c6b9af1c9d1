//! Tool registry: name to descriptor and handler.
//!
//! Safe to mutate while calls are being served. Every mutation is published on
//! a broadcast channel so the notification bus can tell clients the list changed.

use std::collections::HashMap;
use std::sync::Arc;

use dbmcp_protocol::{JsonSchema, McpError, McpResult, Tool, ToolSchema};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::tool::{ToolHandler, json_type_name};

const REGISTRY_EVENT_BUFFER: usize = 64;

/// Registry mutation, published to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered(String),
    Deregistered(String),
}

/// Descriptor and handler of one tool
#[derive(Clone)]
pub struct RegisteredTool {
    pub tool: Tool,
    pub handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    pub fn name(&self) -> &str {
        &self.tool.name
    }

    pub fn validate(&self, args: &Map<String, Value>) -> McpResult<()> {
        validate_arguments(&self.tool.input_schema, args)
    }
}

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(REGISTRY_EVENT_BUFFER);
        Self {
            tools: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Insert or replace a tool. Returns true if a tool of that name was replaced.
    pub fn register<H>(&self, tool: Tool, handler: H) -> bool
    where
        H: ToolHandler + 'static,
    {
        self.register_arc(tool, Arc::new(handler))
    }

    pub fn register_arc(&self, tool: Tool, handler: Arc<dyn ToolHandler>) -> bool {
        let name = tool.name.clone();
        let replaced = self
            .tools
            .write()
            .insert(name.clone(), RegisteredTool { tool, handler })
            .is_some();

        if replaced {
            info!(tool = %name, "Tool replaced");
        } else {
            debug!(tool = %name, "Tool registered");
        }
        // No subscribers is fine
        let _ = self.events.send(RegistryEvent::Registered(name));
        replaced
    }

    /// Remove a tool. Returns false if it was not registered.
    pub fn deregister(&self, name: &str) -> bool {
        let removed = self.tools.write().remove(name).is_some();
        if removed {
            info!(tool = %name, "Tool deregistered");
            let _ = self.events.send(RegistryEvent::Deregistered(name.to_string()));
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<RegisteredTool> {
        self.tools.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// All descriptors, sorted by name
    pub fn list(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .tools
            .read()
            .values()
            .map(|registered| registered.tool.clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Check `args` against the schema of tool `name`
    pub fn validate(&self, name: &str, args: &Map<String, Value>) -> McpResult<()> {
        let registered = self
            .get(name)
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;
        registered.validate(args)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check required parameters are present and every known parameter is loosely
/// compatible with its declared type.
///
/// Clients often send numbers as strings and vice versa, so scalars convert
/// where the conversion is lossless. Unknown arguments are ignored.
pub fn validate_arguments(schema: &ToolSchema, args: &Map<String, Value>) -> McpResult<()> {
    for name in &schema.required {
        match args.get(name) {
            None | Some(Value::Null) => return Err(McpError::missing_param(name)),
            Some(_) => {}
        }
    }

    let mut names: Vec<&String> = args.keys().collect();
    names.sort();
    for name in names {
        let (Some(property), Some(value)) = (schema.properties.get(name), args.get(name)) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        check_value(name, property, value)?;
    }
    Ok(())
}

fn check_value(name: &str, schema: &JsonSchema, value: &Value) -> McpResult<()> {
    let mismatch = || McpError::invalid_param_type(name, schema.type_name(), json_type_name(value));

    match schema {
        JsonSchema::String { enum_values, .. } => {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(_) | Value::Bool(_) => value.to_string(),
                _ => return Err(mismatch()),
            };
            match enum_values {
                Some(allowed) if !allowed.contains(&text) => {
                    Err(McpError::InvalidParameters(format!(
                        "'{}' must be one of: {}",
                        name,
                        allowed.join(", ")
                    )))
                }
                _ => Ok(()),
            }
        }
        JsonSchema::Number { .. } => match value {
            Value::Number(_) => Ok(()),
            Value::String(s) if s.trim().parse::<f64>().is_ok() => Ok(()),
            _ => Err(mismatch()),
        },
        JsonSchema::Integer {
            minimum, maximum, ..
        } => {
            let parsed = match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            let n = parsed.ok_or_else(mismatch)?;
            if minimum.is_some_and(|min| n < min) || maximum.is_some_and(|max| n > max) {
                return Err(McpError::InvalidParameters(format!(
                    "'{}' is out of range: {}",
                    name, n
                )));
            }
            Ok(())
        }
        JsonSchema::Boolean { .. } => match value {
            Value::Bool(_) => Ok(()),
            Value::String(s) if s == "true" || s == "false" => Ok(()),
            _ => Err(mismatch()),
        },
        JsonSchema::Array { .. } => value.is_array().then_some(()).ok_or_else(mismatch),
        JsonSchema::Object { .. } => value.is_object().then_some(()).ok_or_else(mismatch),
    }
}
