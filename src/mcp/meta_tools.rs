//! Generic proxy tools
//!
//! Six fixed bindings that reach the remote by name instead of through a
//! mirrored key. Useful when a capability appeared remotely after the last
//! mirror pass.

use serde_json::{json, Value};
use std::sync::Arc;

use super::error::{GatewayError, GatewayResult};
use super::gateway::ProxyGateway;
use super::mirror::{BindingSource, LocalCapabilityBinding};
use super::schema::{ParameterSchema, ParameterSpec, ParameterType};

pub const LIST_TOOLS: &str = "proxy_list_tools";
pub const CALL_TOOL: &str = "proxy_call_tool";
pub const LIST_RESOURCES: &str = "proxy_list_resources";
pub const READ_RESOURCE: &str = "proxy_read_resource";
pub const LIST_PROMPTS: &str = "proxy_list_prompts";
pub const GET_PROMPT: &str = "proxy_get_prompt";

fn param(name: &str, ty: ParameterType, required: bool, description: &str) -> ParameterSpec {
    ParameterSpec {
        name: name.to_string(),
        ty,
        required,
        description: Some(description.to_string()),
    }
}

fn required_str(args: &Value, field: &str) -> GatewayResult<String> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GatewayError::remote(format!("missing string argument `{}`", field)))
}

/// Normalize `toolArgs`: objects pass through, JSON strings are parsed,
/// other non-blank strings become `{"value": <trimmed>}`, and absent,
/// null or blank input becomes `{}`.
pub fn parse_tool_args(raw: Option<&Value>) -> Value {
    match raw {
        None | Some(Value::Null) => json!({}),
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                json!({})
            } else {
                serde_json::from_str(trimmed).unwrap_or_else(|_| json!({ "value": trimmed }))
            }
        }
        Some(other) => other.clone(),
    }
}

/// Build the six proxy bindings over `gateway`
pub fn meta_tool_bindings(gateway: &Arc<ProxyGateway>) -> Vec<LocalCapabilityBinding> {
    let mut bindings = Vec::with_capacity(6);

    let gw = gateway.clone();
    bindings.push(LocalCapabilityBinding::new(
        BindingSource::Meta,
        LIST_TOOLS,
        "List external tools",
        "List tools available on the external MCP server",
        ParameterSchema::empty(),
        move |_args| {
            let gw = gw.clone();
            async move {
                let tools = gw.list_tools().await?;
                let summary: Vec<Value> = tools
                    .iter()
                    .map(|t| json!({ "name": t.name, "description": t.description }))
                    .collect();
                Ok::<_, GatewayError>(Value::Array(summary))
            }
        },
    ));

    let gw = gateway.clone();
    bindings.push(LocalCapabilityBinding::new(
        BindingSource::Meta,
        CALL_TOOL,
        "Call external tool",
        "Call a tool on the external MCP server by name",
        ParameterSchema::Object(vec![
            param("toolName", ParameterType::String, true, "Name of the remote tool"),
            param(
                "toolArgs",
                ParameterType::Unconstrained,
                false,
                "Tool arguments as an object or a JSON string",
            ),
        ]),
        move |args| {
            let gw = gw.clone();
            async move {
                let name = required_str(&args, "toolName")?;
                let tool_args = parse_tool_args(args.get("toolArgs"));
                gw.call_tool(&name, tool_args).await
            }
        },
    ));

    let gw = gateway.clone();
    bindings.push(LocalCapabilityBinding::new(
        BindingSource::Meta,
        LIST_RESOURCES,
        "List external resources",
        "List resources available on the external MCP server",
        ParameterSchema::empty(),
        move |_args| {
            let gw = gw.clone();
            async move {
                let resources = gw.list_resources().await?;
                Ok::<_, GatewayError>(serde_json::to_value(resources)?)
            }
        },
    ));

    let gw = gateway.clone();
    bindings.push(LocalCapabilityBinding::new(
        BindingSource::Meta,
        READ_RESOURCE,
        "Read external resource",
        "Read a resource from the external MCP server by URI",
        ParameterSchema::Object(vec![param("uri", ParameterType::String, true, "Resource URI")]),
        move |args| {
            let gw = gw.clone();
            async move {
                let uri = required_str(&args, "uri")?;
                gw.read_resource(&uri).await
            }
        },
    ));

    let gw = gateway.clone();
    bindings.push(LocalCapabilityBinding::new(
        BindingSource::Meta,
        LIST_PROMPTS,
        "List external prompts",
        "List prompts available on the external MCP server",
        ParameterSchema::empty(),
        move |_args| {
            let gw = gw.clone();
            async move {
                let prompts = gw.list_prompts().await?;
                Ok::<_, GatewayError>(serde_json::to_value(prompts)?)
            }
        },
    ));

    let gw = gateway.clone();
    bindings.push(LocalCapabilityBinding::new(
        BindingSource::Meta,
        GET_PROMPT,
        "Get external prompt",
        "Render a prompt from the external MCP server",
        ParameterSchema::Object(vec![
            param("promptName", ParameterType::String, true, "Name of the remote prompt"),
            param("promptArgs", ParameterType::Unconstrained, false, "Prompt arguments"),
        ]),
        move |args| {
            let gw = gw.clone();
            async move {
                let name = required_str(&args, "promptName")?;
                let prompt_args = args.get("promptArgs").cloned().unwrap_or(Value::Null);
                gw.get_prompt(&name, prompt_args).await
            }
        },
    ));

    bindings
}
