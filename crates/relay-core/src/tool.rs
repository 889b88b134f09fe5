//! Tool System
//!
//! Named, schema-described functions the model may call during a turn.
//! Tools are registered once at startup; the executor validates arguments,
//! runs the tool, and converts any failure (including a panic) into a
//! single [`AgentError::ToolExecution`].

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::state::StateManager;

/// Tool arguments as a JSON object
pub type ToolArgs = serde_json::Map<String, Value>;

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool identifier
    pub name: String,

    /// Arguments as key-value pairs
    #[serde(default)]
    pub arguments: ToolArgs,

    /// Provider call ID for tracking
    #[serde(default)]
    pub id: Option<String>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: ToolArgs) -> Self {
        Self {
            name: name.into(),
            arguments,
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, integer, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Enum of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterSchema {
    pub fn required(name: impl Into<String>, param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: true,
            default: None,
            enum_values: None,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    fn accepts(&self, value: &Value) -> bool {
        match self.param_type.as_str() {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            _ => true,
        }
    }
}

/// Tool definition schema (for LLM function calling)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,
}

impl ToolSchema {
    /// JSON Schema object for the parameters. Provider adapters translate
    /// this into their function-declaration format.
    pub fn to_json_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| {
                let mut property = json!({
                    "type": p.param_type,
                    "description": p.description,
                });
                if let Some(values) = &p.enum_values {
                    property["enum"] = Value::Array(values.clone());
                }
                if let Some(default) = &p.default {
                    property["default"] = default.clone();
                }
                (p.name.clone(), property)
            })
            .collect();

        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check arguments against the parameter definitions
    pub fn validate(&self, args: &ToolArgs) -> Result<()> {
        for param in &self.parameters {
            match args.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(AgentError::InputValidation(format!(
                        "missing required parameter '{}' for tool '{}'",
                        param.name, self.name
                    )));
                }
                None | Some(Value::Null) => {}
                Some(value) => {
                    if !param.accepts(value) {
                        return Err(AgentError::InputValidation(format!(
                            "parameter '{}' of tool '{}' must be of type {}",
                            param.name, self.name, param.param_type
                        )));
                    }
                    if let Some(allowed) = &param.enum_values {
                        if !allowed.contains(value) {
                            return Err(AgentError::InputValidation(format!(
                                "parameter '{}' of tool '{}' must be one of {}",
                                param.name,
                                self.name,
                                Value::Array(allowed.clone())
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// What a tool may touch while it runs
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub state: Arc<StateManager>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, state: Arc<StateManager>) -> Self {
        Self {
            session_id: session_id.into(),
            state,
        }
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema for LLM function calling
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with validated arguments
    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<Value>;
}

/// Registry and invoker for tools. Holds no session state.
pub struct ToolExecutor {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolExecutor {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Executor preloaded with the built-in tools
    pub fn with_builtins() -> Self {
        let mut executor = Self::new();
        for tool in builtin_tools() {
            // names are distinct, registration cannot collide
            let _ = executor.register_arc(tool);
        }
        executor
    }

    /// Register a new tool. Duplicate names are rejected and the
    /// registry is left unchanged.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.schema().name;
        if name.trim().is_empty() {
            return Err(AgentError::InputValidation("tool name must not be empty".into()));
        }
        if self.tools.contains_key(&name) {
            return Err(AgentError::InputValidation(format!(
                "tool '{name}' is already registered"
            )));
        }
        tracing::debug!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Look up, validate, and run a tool
    pub async fn execute(&self, name: &str, args: &ToolArgs, ctx: &ToolContext) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::tool(name, "tool is not registered"))?;

        tool.schema().validate(args)?;

        tracing::debug!(tool = %name, session = %ctx.session_id, "Executing tool");

        match AssertUnwindSafe(tool.execute(args, ctx)).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(AgentError::ToolExecution { tool_name, message })) if tool_name == name => {
                Err(AgentError::ToolExecution { tool_name, message })
            }
            Ok(Err(e)) => Err(AgentError::tool(name, e.to_string())),
            Err(payload) => Err(AgentError::tool(
                name,
                format!("tool panicked: {}", panic_message(payload.as_ref())),
            )),
        }
    }

    /// Run a model-issued call
    pub async fn execute_call(&self, call: &ToolCall, ctx: &ToolContext) -> Result<Value> {
        self.execute(&call.name, &call.arguments, ctx).await
    }

    /// All tool schemas, sorted by name
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<_> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

// ============================================================================
// Built-in Tools
// ============================================================================

pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(TimeTool),
        Arc::new(GetSessionStateTool),
        Arc::new(SetSessionStateTool),
    ]
}

/// Current date and time
pub struct TimeTool;

#[async_trait]
impl Tool for TimeTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "getTime".into(),
            description: "Get the current date and time in UTC".into(),
            parameters: vec![
                ParameterSchema::optional("format", "string", "Output format: 'iso', 'human', or 'unix'")
                    .with_default(json!("iso"))
                    .with_enum(vec![json!("iso"), json!("human"), json!("unix")]),
            ],
        }
    }

    async fn execute(&self, args: &ToolArgs, _ctx: &ToolContext) -> Result<Value> {
        let now = chrono::Utc::now();
        let formatted = match args.get("format").and_then(Value::as_str).unwrap_or("iso") {
            "unix" => now.timestamp().to_string(),
            "human" => now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string(),
            _ => now.to_rfc3339(),
        };
        Ok(Value::String(formatted))
    }
}

/// Read a value from the session's application state
pub struct GetSessionStateTool;

#[async_trait]
impl Tool for GetSessionStateTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "getSessionState".into(),
            description: "Read a value saved earlier in this conversation. Omit 'key' to read everything.".into(),
            parameters: vec![ParameterSchema::optional("key", "string", "Name of the value to read")],
        }
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<Value> {
        match args.get("key").and_then(Value::as_str) {
            Some(key) => Ok(ctx.state.get(&ctx.session_id, key).await.unwrap_or(Value::Null)),
            None => {
                let snapshot = ctx.state.snapshot(&ctx.session_id).await;
                Ok(Value::Object(snapshot.into_iter().collect()))
            }
        }
    }
}

/// Save a value into the session's application state
pub struct SetSessionStateTool;

#[async_trait]
impl Tool for SetSessionStateTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "setSessionState".into(),
            description: "Remember a value for the rest of this conversation".into(),
            parameters: vec![
                ParameterSchema::required("key", "string", "Name of the value"),
                ParameterSchema::required("value", "string", "Value to store"),
            ],
        }
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<Value> {
        let key = args
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::tool("setSessionState", "key must be a string"))?;
        let value = args.get("value").cloned().unwrap_or(Value::Null);
        let previous = ctx.state.set(&ctx.session_id, key, value).await;
        Ok(json!({ "stored": key, "previous": previous }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedTool {
        name: &'static str,
        result: Value,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for FixedTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: self.name.into(),
                description: "returns a fixed value".into(),
                parameters: vec![
                    ParameterSchema::optional("mode", "string", "mode").with_enum(vec![json!("a"), json!("b")]),
                    ParameterSchema::optional("count", "integer", "count"),
                ],
            }
        }

        async fn execute(&self, _args: &ToolArgs, _ctx: &ToolContext) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "flaky".into(),
                description: "always fails".into(),
                parameters: vec![],
            }
        }

        async fn execute(&self, _args: &ToolArgs, _ctx: &ToolContext) -> Result<Value> {
            Err(AgentError::Network("upstream reset".into()))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "explode".into(),
                description: "panics".into(),
                parameters: vec![],
            }
        }

        async fn execute(&self, _args: &ToolArgs, _ctx: &ToolContext) -> Result<Value> {
            panic!("kaboom");
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new("s1", Arc::new(StateManager::new()))
    }

    fn fixed(name: &'static str, result: Value) -> (FixedTool, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            FixedTool {
                name,
                result,
                calls: calls.clone(),
            },
            calls,
        )
    }

    fn args(value: Value) -> ToolArgs {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_execute_returns_tool_result_unchanged() {
        let mut executor = ToolExecutor::new();
        let result = json!({"time": "12:00", "nested": [1, 2, 3]});
        let (tool, calls) = fixed("getTime", result.clone());
        executor.register(tool).unwrap();

        let output = executor.execute("getTime", &ToolArgs::new(), &ctx()).await.unwrap();
        assert_eq!(output, result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut executor = ToolExecutor::new();
        let (first, _) = fixed("getTime", json!("first"));
        let (second, _) = fixed("getTime", json!("second"));

        executor.register(first).unwrap();
        let err = executor.register(second).unwrap_err();
        assert!(matches!(err, AgentError::InputValidation(_)));
        assert_eq!(executor.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_keeps_first_registration() {
        let mut executor = ToolExecutor::new();
        let (first, _) = fixed("getTime", json!("first"));
        let (second, _) = fixed("getTime", json!("second"));
        executor.register(first).unwrap();
        let _ = executor.register(second);

        let output = executor.execute("getTime", &ToolArgs::new(), &ctx()).await.unwrap();
        assert_eq!(output, json!("first"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_fail_before_invocation() {
        let mut executor = ToolExecutor::new();
        let (tool, calls) = fixed("pick", json!(null));
        executor.register(tool).unwrap();

        let bad_enum = executor.execute("pick", &args(json!({"mode": "c"})), &ctx()).await;
        assert!(matches!(bad_enum, Err(AgentError::InputValidation(_))));

        let bad_type = executor.execute("pick", &args(json!({"count": "three"})), &ctx()).await;
        assert!(matches!(bad_type, Err(AgentError::InputValidation(_))));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_required_argument() {
        let executor = ToolExecutor::with_builtins();
        let err = executor
            .execute("setSessionState", &args(json!({"key": "k"})), &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing required parameter 'value'"));
    }

    #[tokio::test]
    async fn test_tool_error_is_wrapped_once() {
        let mut executor = ToolExecutor::new();
        executor.register(FailingTool).unwrap();

        let err = executor.execute("flaky", &ToolArgs::new(), &ctx()).await.unwrap_err();
        match err {
            AgentError::ToolExecution { tool_name, message } => {
                assert_eq!(tool_name, "flaky");
                assert!(message.contains("upstream reset"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(executor.len(), 1);
        assert!(executor.get("flaky").is_some());
    }

    #[tokio::test]
    async fn test_panicking_tool_is_contained() {
        let mut executor = ToolExecutor::new();
        executor.register(PanickingTool).unwrap();

        let err = executor.execute("explode", &ToolArgs::new(), &ctx()).await.unwrap_err();
        match err {
            AgentError::ToolExecution { tool_name, message } => {
                assert_eq!(tool_name, "explode");
                assert!(message.contains("kaboom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(executor.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let executor = ToolExecutor::new();
        let err = executor.execute("nope", &ToolArgs::new(), &ctx()).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolExecution { ref tool_name, .. } if tool_name == "nope"));
    }

    #[test]
    fn test_json_schema_keeps_required_and_enum() {
        let schema = TimeTool.schema().to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["format"]["enum"], json!(["iso", "human", "unix"]));
        assert_eq!(schema["required"], json!([]));

        let schema = SetSessionStateTool.schema().to_json_schema();
        assert_eq!(schema["required"], json!(["key", "value"]));
    }

    #[tokio::test]
    async fn test_state_tools_share_session_state() {
        let executor = ToolExecutor::with_builtins();
        let ctx = ctx();

        executor
            .execute("setSessionState", &args(json!({"key": "active_file", "value": "main.rs"})), &ctx)
            .await
            .unwrap();

        let value = executor
            .execute("getSessionState", &args(json!({"key": "active_file"})), &ctx)
            .await
            .unwrap();
        assert_eq!(value, json!("main.rs"));
        assert_eq!(ctx.state.get("s1", "active_file").await, Some(json!("main.rs")));
    }

    #[tokio::test]
    async fn test_builtin_time_formats() {
        let executor = ToolExecutor::with_builtins();
        let unix = executor
            .execute("getTime", &args(json!({"format": "unix"})), &ctx())
            .await
            .unwrap();
        assert!(unix.as_str().unwrap().parse::<i64>().is_ok());
        assert_eq!(executor.schemas().len(), 3);
    }
}
