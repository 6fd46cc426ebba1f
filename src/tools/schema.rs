//! Tool parameter schemas, derived from the argument structs with `schemars`.
//!
//! A field is required unless it is an `Option` or carries `#[serde(default)]`.
//! Doc comments on the fields become parameter descriptions.

use indexmap::IndexMap;
use schemars::schema::{InstanceType, RootSchema, Schema, SingleOrVec};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
    pub description: String,
}

/// Name, description and ordered parameters of one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: IndexMap<String, ParamSpec>,
}

impl ToolDefinition {
    /// Build a definition whose parameters come from `A`'s schema.
    pub fn derive<A: JsonSchema>(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: params_from_schema(&schemars::schema_for!(A)),
        }
    }

    /// The `parameters` object: `{type: object, properties, required}`.
    pub fn parameters_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .parameters
            .iter()
            .map(|(name, p)| {
                (
                    name.clone(),
                    json!({"type": p.kind, "description": p.description}),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|(_, p)| p.required)
            .map(|(name, _)| name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Full JSON-schema-like declaration handed to the model.
    pub fn json_schema(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters_schema(),
        })
    }

    /// Check an argument object against the declared parameters.
    /// Unknown keys are tolerated; missing required keys and type
    /// mismatches are not.
    pub fn validate(&self, arguments: &Value) -> Result<(), String> {
        let Some(object) = arguments.as_object() else {
            return Err("arguments must be an object".into());
        };
        for (name, spec) in &self.parameters {
            match object.get(name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(format!("missing required parameter '{name}'"));
                }
                None | Some(Value::Null) => {}
                Some(value) if !type_matches(&spec.kind, value) => {
                    return Err(format!("parameter '{name}' must be of type {}", spec.kind));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn type_matches(kind: &str, value: &Value) -> bool {
    match kind {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn type_name(t: &InstanceType) -> &'static str {
    match t {
        InstanceType::Null => "null",
        InstanceType::Boolean => "boolean",
        InstanceType::Object => "object",
        InstanceType::Array => "array",
        InstanceType::Number => "number",
        InstanceType::String => "string",
        InstanceType::Integer => "integer",
    }
}

fn params_from_schema(root: &RootSchema) -> IndexMap<String, ParamSpec> {
    let Some(object) = root.schema.object.as_ref() else {
        return IndexMap::new();
    };

    object
        .properties
        .iter()
        .map(|(name, schema)| {
            let (kind, description) = match schema {
                Schema::Object(obj) => {
                    let kind = match &obj.instance_type {
                        Some(SingleOrVec::Single(t)) => type_name(t),
                        // `Option<T>` is `[T, null]`.
                        Some(SingleOrVec::Vec(types)) => types
                            .iter()
                            .find(|t| **t != InstanceType::Null)
                            .map_or("string", type_name),
                        None => "string",
                    };
                    let description = obj
                        .metadata
                        .as_ref()
                        .and_then(|m| m.description.clone())
                        .unwrap_or_default();
                    (kind, description)
                }
                Schema::Bool(_) => ("string", String::new()),
            };
            let spec = ParamSpec {
                kind: kind.to_string(),
                required: object.required.contains(name),
                description,
            };
            (name.clone(), spec)
        })
        .collect()
}
