pub mod weather;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use rustc_hash::FxHashMap;
use serde_json::{json, Map, Value};

pub use weather::WeatherTool;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure raised while resolving or running a tool.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Tool execution failed: {source}")]
    Execution {
        tool: String,
        #[source]
        source: BoxError,
    },
}

impl ToolError {
    pub fn execution(tool: &str, source: impl Into<BoxError>) -> Self {
        ToolError::Execution {
            tool: tool.to_string(),
            source: source.into(),
        }
    }

    /// JSON value sent to the client in place of a tool result.
    #[must_use]
    pub fn error_payload(&self) -> Value {
        json!({ "error": self.to_string() })
    }
}

/// One declared tool argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    /// JSON schema type name, e.g. `number`.
    pub json_type: String,
    pub description: String,
    pub required: bool,
}

impl ParameterSpec {
    #[must_use]
    pub fn required(name: &str, json_type: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            json_type: json_type.to_string(),
            description: description.to_string(),
            required: true,
        }
    }
}

/// Name, description and argument list of a tool, as advertised to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
}

impl ToolDeclaration {
    /// JSON schema object describing the arguments.
    #[must_use]
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::with_capacity(self.parameters.len());
        let mut required = Vec::new();
        for param in &self.parameters {
            properties.insert(
                param.name.clone(),
                json!({ "type": param.json_type, "description": param.description }),
            );
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A callable the model may invoke.
pub trait Tool: Send + Sync {
    fn declaration(&self) -> &ToolDeclaration;

    /// Run the tool with the decoded arguments.
    fn call<'a>(&'a self, args: &'a Value) -> BoxFuture<'a, Result<Value, ToolError>>;
}

/// Name-indexed set of tools, built once at startup and shared read-only.
#[derive(Default)]
pub struct ToolRegistry {
    by_name: FxHashMap<String, usize>,
    tools: Vec<Arc<dyn Tool>>,
    declarations: Vec<ToolDeclaration>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; a later tool with the same name replaces the earlier one.
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        let declaration = tool.declaration().clone();
        if let Some(&index) = self.by_name.get(&declaration.name) {
            self.tools[index] = tool;
            self.declarations[index] = declaration;
        } else {
            self.by_name.insert(declaration.name.clone(), self.tools.len());
            self.tools.push(tool);
            self.declarations.push(declaration);
        }
        self
    }

    /// Declarations in registration order.
    #[must_use]
    pub fn declarations(&self) -> &[ToolDeclaration] {
        &self.declarations
    }

    #[must_use]
    pub fn tool_names(&self) -> Vec<&str> {
        self.declarations.iter().map(|d| d.name.as_str()).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Look up `name` and run it.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`] when no tool has that name, or the
    /// tool's own [`ToolError::Execution`].
    pub async fn invoke(&self, name: &str, args: &Value) -> Result<Value, ToolError> {
        let index = self
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        self.tools[index].call(args).await
    }

    /// Like [`ToolRegistry::invoke`], with failures turned into the
    /// `{"error": ...}` payload.
    pub async fn invoke_or_error_payload(&self, name: &str, args: &Value) -> Value {
        match self.invoke(name, args).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(tool = name, error = %err, "tool call failed");
                err.error_payload()
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{echo_registry, EchoTool};
    use super::*;

    #[test]
    fn test_parameters_schema() {
        let decl = EchoTool::new("echo").declaration().clone();
        assert_eq!(
            decl.parameters_schema(),
            json!({
                "type": "object",
                "properties": {"value": {"type": "string", "description": "Anything"}},
                "required": ["value"]
            })
        );
    }

    #[tokio::test]
    async fn test_invoke_known_tool() {
        let registry = echo_registry();
        let result = registry.invoke("echo", &json!({"value": "x"})).await.unwrap();
        assert_eq!(result, json!({"echo": {"value": "x"}}));
    }

    #[tokio::test]
    async fn test_unknown_tool_payload() {
        let registry = echo_registry();
        let err = registry.invoke("nope", &json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(ref n) if n == "nope"));
        assert_eq!(
            registry.invoke_or_error_payload("nope", &json!({})).await,
            json!({"error": "Unknown tool: nope"})
        );
    }

    #[tokio::test]
    async fn test_execution_failure_payload() {
        let registry = echo_registry();
        assert_eq!(
            registry
                .invoke_or_error_payload("echo", &json!({"fail": true}))
                .await,
            json!({"error": "Tool execution failed: boom"})
        );
    }

    #[test]
    fn test_later_registration_replaces() {
        let registry = ToolRegistry::new()
            .with_tool(Arc::new(EchoTool::new("echo")))
            .with_tool(Arc::new(EchoTool::new("other")))
            .with_tool(Arc::new(EchoTool::new("echo")));
        assert_eq!(registry.tool_names(), vec!["echo", "other"]);
        assert!(!registry.is_empty());
    }
}
