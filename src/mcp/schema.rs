//! Parameter schema inference
//!
//! Translates loosely-typed remote descriptors (a tool's `inputSchema`, a
//! prompt's `arguments` list) into local parameter definitions. Inference is
//! best-effort: a malformed descriptor falls back to a permissive schema
//! instead of blocking registration.

use log::warn;
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::error::{GatewayError, GatewayResult};

/// Local type of one parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
    /// Sequence of any values
    Sequence,
    /// Accepts any value
    Unconstrained,
}

impl ParameterType {
    /// Map a declared JSON-Schema primitive type. Anything unrecognized,
    /// including `object`, `integer` and union types, is unconstrained.
    pub fn from_declared(declared: Option<&Value>) -> Self {
        match declared.and_then(Value::as_str) {
            Some("string") => ParameterType::String,
            Some("number") => ParameterType::Number,
            Some("boolean") => ParameterType::Boolean,
            Some("array") => ParameterType::Sequence,
            _ => ParameterType::Unconstrained,
        }
    }

    fn json_schema(&self) -> Value {
        match self {
            ParameterType::String => json!({ "type": "string" }),
            ParameterType::Number => json!({ "type": "number" }),
            ParameterType::Boolean => json!({ "type": "boolean" }),
            ParameterType::Sequence => json!({ "type": "array", "items": {} }),
            ParameterType::Unconstrained => json!({}),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParameterType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Inferred local schema for one binding
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "shape", content = "parameters", rename_all = "lowercase")]
pub enum ParameterSchema {
    /// A single optional value of any shape
    Unconstrained,
    /// Named parameters
    Object(Vec<ParameterSpec>),
}

impl ParameterSchema {
    pub fn empty() -> Self {
        ParameterSchema::Object(Vec::new())
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        match self {
            ParameterSchema::Unconstrained => &[],
            ParameterSchema::Object(params) => params,
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters().iter().find(|p| p.name == name)
    }

    pub fn is_unconstrained(&self) -> bool {
        matches!(self, ParameterSchema::Unconstrained)
    }

    /// Render as JSON Schema for the registration collaborator
    pub fn to_json_schema(&self) -> Value {
        match self {
            ParameterSchema::Unconstrained => json!({}),
            ParameterSchema::Object(params) => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for param in params {
                    let mut schema = param.ty.json_schema();
                    if let (Some(description), Some(obj)) =
                        (&param.description, schema.as_object_mut())
                    {
                        obj.insert("description".to_string(), json!(description));
                    }
                    properties.insert(param.name.clone(), schema);
                    if param.required {
                        required.push(json!(param.name));
                    }
                }
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                })
            }
        }
    }
}

fn inference_error(message: impl Into<String>) -> GatewayError {
    GatewayError::SchemaInference(message.into())
}

fn description_of(value: &Value) -> Option<String> {
    value
        .get("description")
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}

/// Infer a tool's parameters from its `inputSchema`.
pub fn infer_input_schema(input_schema: &Value) -> GatewayResult<ParameterSchema> {
    let Some(schema) = input_schema.as_object() else {
        return Ok(ParameterSchema::Unconstrained);
    };
    let Some(properties) = schema.get("properties") else {
        return Ok(ParameterSchema::Unconstrained);
    };
    let properties = properties
        .as_object()
        .ok_or_else(|| inference_error("`properties` is not an object"))?;

    let required: Vec<&str> = match schema.get("required") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(names)) => names.iter().filter_map(Value::as_str).collect(),
        Some(other) => {
            return Err(inference_error(format!("`required` is not an array: {}", other)))
        }
    };

    let params = properties
        .iter()
        .map(|(name, property)| ParameterSpec {
            name: name.clone(),
            ty: ParameterType::from_declared(property.get("type")),
            required: required.contains(&name.as_str()),
            description: description_of(property),
        })
        .collect();

    Ok(ParameterSchema::Object(params))
}

/// Infer a prompt's parameters from its ordered `arguments` list. Entries
/// without a name are skipped; only `required: true` makes one required.
pub fn infer_prompt_arguments(arguments: &Value) -> GatewayResult<ParameterSchema> {
    let entries = match arguments {
        Value::Null => return Ok(ParameterSchema::empty()),
        Value::Array(entries) => entries,
        other => return Err(inference_error(format!("prompt arguments are not a list: {}", other))),
    };

    let params = entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name").and_then(Value::as_str).filter(|n| !n.is_empty())?;
            Some(ParameterSpec {
                name: name.to_string(),
                ty: ParameterType::from_declared(entry.get("type")),
                required: entry.get("required").and_then(Value::as_bool).unwrap_or(false),
                description: description_of(entry),
            })
        })
        .collect();

    Ok(ParameterSchema::Object(params))
}

/// Tool parameters, falling back to `Unconstrained` on malformed input
pub fn tool_parameters(tool_name: &str, input_schema: &Value) -> ParameterSchema {
    infer_input_schema(input_schema).unwrap_or_else(|e| {
        warn!("Failed to parse schema for tool {}, using generic: {}", tool_name, e);
        ParameterSchema::Unconstrained
    })
}

/// Prompt parameters, falling back to an empty schema on malformed input
pub fn prompt_parameters(prompt_name: &str, arguments: &Value) -> ParameterSchema {
    infer_prompt_arguments(arguments).unwrap_or_else(|e| {
        warn!("Failed to parse arguments for prompt {}, using generic: {}", prompt_name, e);
        ParameterSchema::empty()
    })
}

/// Compiled check of caller arguments against a `ParameterSchema`
pub struct ArgumentValidator {
    validator: Option<jsonschema::Validator>,
}

impl ArgumentValidator {
    pub fn compile(schema: &ParameterSchema) -> GatewayResult<Self> {
        if schema.is_unconstrained() {
            return Ok(Self { validator: None });
        }
        let validator = jsonschema::validator_for(&schema.to_json_schema())
            .map_err(|e| inference_error(format!("cannot compile parameter schema: {}", e)))?;
        Ok(Self {
            validator: Some(validator),
        })
    }

    /// Accept-anything validator
    pub fn permissive() -> Self {
        Self { validator: None }
    }

    pub fn check(&self, arguments: &Value) -> GatewayResult<()> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        let problems: Vec<String> =
            validator.iter_errors(arguments).map(|e| e.to_string()).collect();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::remote(format!("invalid arguments: {}", problems.join("; "))))
        }
    }
}

impl std::fmt::Debug for ArgumentValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgumentValidator")
            .field("enabled", &self.validator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_schema_is_unconstrained() {
        assert_eq!(infer_input_schema(&Value::Null).unwrap(), ParameterSchema::Unconstrained);
        assert_eq!(infer_input_schema(&json!("string")).unwrap(), ParameterSchema::Unconstrained);
        assert_eq!(
            infer_input_schema(&json!({ "type": "object" })).unwrap(),
            ParameterSchema::Unconstrained
        );
    }

    #[test]
    fn test_required_and_optional_mapping() {
        let schema = infer_input_schema(&json!({
            "type": "object",
            "properties": {
                "a": { "type": "string", "description": "first" },
                "b": { "type": "number" }
            },
            "required": ["a"]
        }))
        .unwrap();

        let a = schema.parameter("a").unwrap();
        assert_eq!(a.ty, ParameterType::String);
        assert!(a.required);
        assert_eq!(a.description.as_deref(), Some("first"));

        let b = schema.parameter("b").unwrap();
        assert_eq!(b.ty, ParameterType::Number);
        assert!(!b.required);
    }

    #[test]
    fn test_type_mapping() {
        let schema = infer_input_schema(&json!({
            "properties": {
                "flag": { "type": "boolean" },
                "items": { "type": "array", "items": { "type": "string" } },
                "nested": { "type": "object" },
                "count": { "type": "integer" },
                "loose": {},
                "weird": 7
            }
        }))
        .unwrap();

        assert_eq!(schema.parameter("flag").unwrap().ty, ParameterType::Boolean);
        assert_eq!(schema.parameter("items").unwrap().ty, ParameterType::Sequence);
        for name in ["nested", "count", "loose", "weird"] {
            assert_eq!(
                schema.parameter(name).unwrap().ty,
                ParameterType::Unconstrained,
                "{}",
                name
            );
        }
        assert!(schema.parameters().iter().all(|p| !p.required));
    }

    #[test]
    fn test_malformed_schema_falls_back() {
        let bad_required = json!({ "properties": { "a": { "type": "string" } }, "required": "a" });
        assert!(matches!(infer_input_schema(&bad_required), Err(GatewayError::SchemaInference(_))));
        assert_eq!(tool_parameters("t", &bad_required), ParameterSchema::Unconstrained);

        let bad_properties = json!({ "properties": ["a", "b"] });
        assert_eq!(tool_parameters("t", &bad_properties), ParameterSchema::Unconstrained);
    }

    #[test]
    fn test_prompt_arguments() {
        let schema = infer_prompt_arguments(&json!([
            { "name": "topic", "description": "what to write about", "required": true },
            { "name": "count", "type": "number" },
            { "description": "no name, skipped" },
            "junk"
        ]))
        .unwrap();

        assert_eq!(schema.parameters().len(), 2);
        let topic = schema.parameter("topic").unwrap();
        assert!(topic.required);
        assert_eq!(topic.ty, ParameterType::Unconstrained);
        assert_eq!(schema.parameter("count").unwrap().ty, ParameterType::Number);
        assert!(!schema.parameter("count").unwrap().required);
    }

    #[test]
    fn test_prompt_fallbacks() {
        assert_eq!(infer_prompt_arguments(&Value::Null).unwrap(), ParameterSchema::empty());
        assert_eq!(prompt_parameters("p", &json!({ "name": "x" })), ParameterSchema::empty());
    }

    #[test]
    fn test_json_schema_rendering() {
        let schema = ParameterSchema::Object(vec![ParameterSpec {
            name: "q".into(),
            ty: ParameterType::String,
            required: true,
            description: Some("query".into()),
        }]);
        let rendered = schema.to_json_schema();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["properties"]["q"]["type"], "string");
        assert_eq!(rendered["properties"]["q"]["description"], "query");
        assert_eq!(rendered["required"], json!(["q"]));
        assert_eq!(ParameterSchema::Unconstrained.to_json_schema(), json!({}));
    }

    #[test]
    fn test_validator() {
        let schema = infer_input_schema(&json!({
            "properties": { "a": { "type": "string" }, "b": { "type": "number" } },
            "required": ["a"]
        }))
        .unwrap();
        let validator = ArgumentValidator::compile(&schema).unwrap();

        assert!(validator.check(&json!({ "a": "x" })).is_ok());
        assert!(validator.check(&json!({ "a": "x", "b": 2, "extra": true })).is_ok());
        assert!(validator.check(&json!({ "b": 2 })).is_err());
        assert!(validator.check(&json!({ "a": 1 })).is_err());

        let anything = ArgumentValidator::compile(&ParameterSchema::Unconstrained).unwrap();
        assert!(anything.check(&json!([1, 2, 3])).is_ok());
    }
}
