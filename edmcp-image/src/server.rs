//! MCP Server implementation for the Easy Diffusion image server.
//!
//! This module provides the JSON-RPC dispatcher that exposes the single
//! `generate_image` tool.

use crate::content::GenerationOutcome;
use crate::handler::{GenerationClient, ImageGenerator};
use crate::payload::{DEFAULT_NEGATIVE_PROMPT, GenerateImageArgs, GenerationInput};
use async_trait::async_trait;
use edmcp_common::config::Config;
use edmcp_common::error::Error;
use edmcp_common::jsonrpc::{
    JsonRpcRequest, JsonRpcResponse, internal_error, invalid_params, method_not_found,
};
use edmcp_common::server::RpcHandler;
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, ListToolsResult, ServerCapabilities, ServerInfo, Tool},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Name of the only tool.
pub const TOOL_NAME: &str = "generate_image";

/// Server name reported by `initialize`.
pub const SERVER_NAME: &str = "edmcp-image";

/// Server version reported by `initialize`.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// `tools/call` params.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// MCP Server for image generation.
#[derive(Clone)]
pub struct ImageServer {
    /// Backend that produces the images
    generator: Arc<dyn ImageGenerator>,
    /// Server configuration
    config: Arc<Config>,
}

impl ImageServer {
    /// Create a server backed by the given generator.
    pub fn new(config: Arc<Config>, generator: Arc<dyn ImageGenerator>) -> Self {
        Self { generator, config }
    }

    /// Create a server backed by the Easy Diffusion client.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: Arc<Config>) -> Result<Self, Error> {
        let client = GenerationClient::new(Arc::clone(&config))?;
        Ok(Self::new(config, Arc::new(client)))
    }

    /// Result of `initialize`.
    pub fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo {
            instructions: Some(
                "Image generation server backed by Easy Diffusion. \
                 Use generate_image to create an image from a text prompt."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        };
        info.server_info.name = SERVER_NAME.to_string();
        info.server_info.version = SERVER_VERSION.to_string();
        info
    }

    /// Result of `tools/list`.
    pub fn list_tools(&self) -> ListToolsResult {
        ListToolsResult {
            tools: vec![self.tool()],
            next_cursor: None,
            meta: None,
        }
    }

    fn tool(&self) -> Tool {
        Tool {
            name: Cow::Borrowed(TOOL_NAME),
            description: Some(Cow::Borrowed(
                "Generate an image from a text prompt using Easy Diffusion. \
                 Returns the first generated image as base64 PNG data.",
            )),
            input_schema: self.input_schema(),
            annotations: None,
            icons: None,
            meta: None,
            output_schema: None,
            title: None,
        }
    }

    /// JSON schema of the tool arguments, with defaults that come from
    /// configuration filled in.
    fn input_schema(&self) -> Arc<Map<String, Value>> {
        let schema = schemars::schema_for!(GenerateImageArgs);
        let mut value = serde_json::to_value(&schema).unwrap_or_default();

        let defaults = [
            ("negative_prompt", DEFAULT_NEGATIVE_PROMPT.to_string()),
            ("use_stable_diffusion_model", self.config.default_model.clone()),
        ];
        for (field, default) in defaults {
            if let Some(property) = value
                .pointer_mut(&format!("/properties/{}", field))
                .and_then(Value::as_object_mut)
            {
                property.insert("default".to_string(), Value::String(default));
            }
        }

        match value {
            Value::Object(map) => Arc::new(map),
            _ => Arc::new(Map::new()),
        }
    }

    /// Handle `tools/call`.
    ///
    /// Protocol problems (missing params, unknown tool, bad arguments) are
    /// `Err`; generation failures are an `Ok` result with `isError` set.
    pub async fn call_tool(&self, params: Option<Value>) -> Result<CallToolResult, McpError> {
        let params = params
            .filter(|p| !p.is_null())
            .ok_or_else(|| invalid_params("Missing params"))?;

        let call: ToolCallParams = serde_json::from_value(params)
            .map_err(|e| invalid_params(format!("Invalid params: {}", e)))?;

        if call.name != TOOL_NAME {
            return Err(invalid_params(format!("Unknown tool: {}", call.name)));
        }

        let arguments = call
            .arguments
            .filter(|a| !a.is_null())
            .unwrap_or_else(|| Value::Object(Map::new()));
        let args: GenerateImageArgs = serde_json::from_value(arguments)
            .map_err(|e| invalid_params(format!("Invalid arguments: {}", e)))?;

        self.generate_image(args).await
    }

    /// Generate an image from validated tool arguments.
    pub async fn generate_image(&self, args: GenerateImageArgs) -> Result<CallToolResult, McpError> {
        info!(
            prompt = %args.prompt,
            model = ?args.use_stable_diffusion_model,
            width = args.width,
            height = args.height,
            "Generating image"
        );

        let input = GenerationInput::from_args(args, &self.config).map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            invalid_params(messages.join("; "))
        })?;

        let generator = Arc::clone(&self.generator);
        let result = tokio::spawn(async move { generator.generate(input).await })
            .await
            .map_err(|e| {
                let detail = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                };
                error!(detail = %detail, "Generation task aborted");
                internal_error(detail)
            })?;

        let outcome = GenerationOutcome::from(result);
        if let GenerationOutcome::Failed(message) = &outcome {
            info!(message = %message, "Reporting failed generation");
        }
        Ok(outcome.into_tool_result())
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "generation task panicked".to_string()
    }
}

fn to_result<T: Serialize>(value: T) -> Result<Value, McpError> {
    serde_json::to_value(value).map_err(|e| internal_error(e.to_string()))
}

#[async_trait]
impl RpcHandler for ImageServer {
    async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!(method = %request.method, id = ?request.id, "Dispatching request");

        let result = match request.method.as_str() {
            "initialize" => to_result(self.get_info()),
            "tools/list" => to_result(self.list_tools()),
            "tools/call" => match self.call_tool(request.params).await {
                Ok(result) => to_result(result),
                Err(e) => Err(e),
            },
            "ping" => Ok(Value::Object(Map::new())),
            method if method.starts_with("notifications/") => Ok(Value::Null),
            other => Err(method_not_found(other)),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => {
                debug!(code = e.code.0, message = %e.message, "Request failed");
                JsonRpcResponse::error(request.id, e)
            }
        }
    }

    fn server_name(&self) -> &str {
        SERVER_NAME
    }

    fn server_version(&self) -> &str {
        SERVER_VERSION
    }
}
