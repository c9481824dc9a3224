//! Capability trait and registry: the operations the reasoning loop can invoke.
//!
//! A capability (retrieval, current weather, forecast, budget, web search)
//! declares a name, a natural-language description and an [`InputSchema`].
//! The [`CapabilityRegistry`] validates input against that schema before
//! dispatching, and turns every execution outcome (success, error, panic or
//! timeout) into an [`Observation`]. Nothing raised by a capability crosses
//! the registry boundary.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{CapabilityError, RegistryError};
use crate::provider::ToolDefinition;

/// Timeout applied to capabilities registered without an explicit one.
pub const DEFAULT_CAPABILITY_TIMEOUT: Duration = Duration::from_secs(15);

// ── Input schema ──────────────────────────────────────────────────────────

/// Type of a single capability parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    StringList,
}

impl ParamKind {
    fn label(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::StringList => "list of strings",
        }
    }
}

/// One named parameter of an input schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub description: String,
    /// Permitted values for strings and list items (case-insensitive).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
    /// Lower bound for integers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: description.into(),
            allowed: Vec::new(),
            minimum: None,
        }
    }

    pub fn optional(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    pub fn with_allowed(mut self, values: &[&str]) -> Self {
        self.allowed = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn with_minimum(mut self, minimum: i64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    fn check_allowed(&self, value: &str) -> Result<String, String> {
        if self.allowed.is_empty() {
            return Ok(value.to_string());
        }
        self.allowed
            .iter()
            .find(|a| a.eq_ignore_ascii_case(value))
            .cloned()
            .ok_or_else(|| {
                format!(
                    "'{}' must be one of [{}], got '{value}'",
                    self.name,
                    self.allowed.join(", ")
                )
            })
    }

    fn coerce(&self, value: &Value) -> Result<Value, String> {
        let type_error = || format!("'{}' must be a {}", self.name, self.kind.label());
        match self.kind {
            ParamKind::String => {
                let s = match value {
                    Value::String(s) => s.trim().to_string(),
                    Value::Number(n) => n.to_string(),
                    _ => return Err(type_error()),
                };
                if s.is_empty() && self.required {
                    return Err(format!("'{}' must not be empty", self.name));
                }
                Ok(Value::String(self.check_allowed(&s)?))
            }
            ParamKind::Integer => {
                let n = match value {
                    Value::Number(n) => n
                        .as_i64()
                        .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                }
                .ok_or_else(type_error)?;
                if let Some(min) = self.minimum {
                    if n < min {
                        return Err(format!("'{}' must be at least {min}, got {n}", self.name));
                    }
                }
                Ok(Value::from(n))
            }
            ParamKind::Number => {
                let n = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                }
                .ok_or_else(type_error)?;
                Ok(Value::from(n))
            }
            ParamKind::Boolean => match value {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
                _ => Err(type_error()),
            },
            ParamKind::StringList => {
                let items: Vec<String> = match value {
                    Value::Array(items) => items
                        .iter()
                        .map(|v| v.as_str().map(|s| s.trim().to_string()).ok_or_else(type_error))
                        .collect::<Result<_, _>>()?,
                    Value::String(s) => s
                        .split(',')
                        .map(|part| part.trim().to_string())
                        .filter(|part| !part.is_empty())
                        .collect(),
                    _ => return Err(type_error()),
                };
                let checked = items
                    .iter()
                    .map(|item| self.check_allowed(item).map(Value::String))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(checked))
            }
        }
    }
}

/// The named parameters a capability accepts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputSchema {
    params: Vec<ParamSpec>,
}

impl InputSchema {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Compact signature for prompts, e.g. `location: string, days?: integer`.
    pub fn signature(&self) -> String {
        self.params
            .iter()
            .map(|p| {
                let marker = if p.required { "" } else { "?" };
                format!("{}{marker}: {}", p.name, p.kind.label())
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Validate raw input and return the normalized parameters.
    ///
    /// Accepts a JSON object, `null` (no parameters), or free text. Free text
    /// is bound to the single required string parameter when there is exactly
    /// one; otherwise it is rejected.
    pub fn validate(&self, input: Value) -> Result<CapabilityInput, String> {
        let object = match input {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            Value::String(text) => self.bind_free_text(text)?,
            other => {
                return Err(format!(
                    "expected an object with parameters ({}), got {other}",
                    self.signature()
                ));
            }
        };

        if let Some(unknown) = object.keys().find(|k| !self.params.iter().any(|p| &p.name == *k)) {
            return Err(format!(
                "unknown parameter '{unknown}', expected ({})",
                self.signature()
            ));
        }

        let mut values = Map::new();
        for spec in &self.params {
            match object.get(&spec.name) {
                Some(Value::Null) | None if spec.required => {
                    return Err(format!("missing required parameter '{}'", spec.name));
                }
                Some(Value::Null) | None => {}
                Some(raw) => {
                    values.insert(spec.name.clone(), spec.coerce(raw)?);
                }
            }
        }
        Ok(CapabilityInput { values })
    }

    fn bind_free_text(&self, text: String) -> Result<Map<String, Value>, String> {
        let mut map = Map::new();
        let text = text.trim();
        if self.params.is_empty() {
            return Ok(map);
        }
        let required_strings: Vec<&ParamSpec> = self
            .params
            .iter()
            .filter(|p| p.required && p.kind == ParamKind::String)
            .collect();
        let required_count = self.params.iter().filter(|p| p.required).count();
        match required_strings.as_slice() {
            [only] if required_count == 1 => {
                map.insert(only.name.clone(), Value::String(text.to_string()));
                Ok(map)
            }
            _ => Err(format!(
                "free-text input is ambiguous, provide a JSON object with ({})",
                self.signature()
            )),
        }
    }

    /// JSON Schema rendering for native tool calling.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.params {
            let mut prop = Map::new();
            match p.kind {
                ParamKind::StringList => {
                    prop.insert("type".into(), "array".into());
                    let mut items = Map::new();
                    items.insert("type".into(), "string".into());
                    if !p.allowed.is_empty() {
                        items.insert("enum".into(), p.allowed.clone().into());
                    }
                    prop.insert("items".into(), Value::Object(items));
                }
                kind => {
                    prop.insert("type".into(), kind_json_type(kind).into());
                    if !p.allowed.is_empty() {
                        prop.insert("enum".into(), p.allowed.clone().into());
                    }
                }
            }
            if let Some(min) = p.minimum {
                prop.insert("minimum".into(), min.into());
            }
            prop.insert("description".into(), p.description.clone().into());
            properties.insert(p.name.clone(), Value::Object(prop));
        }
        let required: Vec<Value> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| Value::String(p.name.clone()))
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

fn kind_json_type(kind: ParamKind) -> &'static str {
    match kind {
        ParamKind::String => "string",
        ParamKind::Integer => "integer",
        ParamKind::Number => "number",
        ParamKind::Boolean => "boolean",
        ParamKind::StringList => "array",
    }
}

/// Schema-validated parameters handed to a capability.
#[derive(Debug, Clone, Default)]
pub struct CapabilityInput {
    values: Map<String, Value>,
}

impl CapabilityInput {
    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(Value::as_i64)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(Value::as_f64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(Value::as_bool)
    }

    pub fn list(&self, name: &str) -> Option<Vec<String>> {
        self.values.get(name).and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

// ── Capability trait ──────────────────────────────────────────────────────

/// What a capability returns on success.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityOutput {
    /// Text fed back to the model.
    pub content: String,

    /// Structured payload for callers and tests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Attributions for the final answer (guide pages, services, URLs).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl CapabilityOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }
}

/// An operation the reasoning loop can select.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Unique name the model uses in `Action:` lines.
    fn name(&self) -> &str;

    /// Natural-language description injected into the prompt.
    fn description(&self) -> &str;

    fn input_schema(&self) -> InputSchema;

    /// Execute with already-validated input.
    async fn invoke(&self, input: CapabilityInput) -> Result<CapabilityOutput, CapabilityError>;
}

/// Registered, immutable description of a capability.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
    #[serde(skip)]
    pub timeout: Duration,
}

impl CapabilityDescriptor {
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.to_json_schema(),
        }
    }
}

/// Result of executing a capability, fed back into the reasoning context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub capability: String,
    pub success: bool,
    /// Payload text on success, error description on failure.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl Observation {
    pub fn success(capability: impl Into<String>, output: CapabilityOutput) -> Self {
        Self {
            capability: capability.into(),
            success: true,
            content: output.content,
            data: output.data,
            sources: output.sources,
        }
    }

    pub fn failure(capability: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            success: false,
            content: error.into(),
            data: None,
            sources: Vec::new(),
        }
    }

    /// Rendering used in the `Observation:` section of the prompt.
    pub fn render(&self) -> String {
        if self.success {
            self.content.clone()
        } else {
            format!("ERROR from {}: {}", self.capability, self.content)
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────

struct Entry {
    descriptor: CapabilityDescriptor,
    handle: Arc<dyn Capability>,
}

/// The set of capabilities available to the reasoning loop.
///
/// Built once at startup, then shared read-only (typically behind an `Arc`)
/// across sessions.
pub struct CapabilityRegistry {
    entries: Vec<Entry>,
    by_name: HashMap<String, usize>,
    default_timeout: Duration,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::with_default_timeout(DEFAULT_CAPABILITY_TIMEOUT)
    }

    pub fn with_default_timeout(default_timeout: Duration) -> Self {
        Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
            default_timeout,
        }
    }

    /// Register a capability with the registry's default timeout.
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Result<(), RegistryError> {
        let timeout = self.default_timeout;
        self.register_with_timeout(capability, timeout)
    }

    /// Register a capability. Fails if the name is already taken.
    pub fn register_with_timeout(
        &mut self,
        capability: Arc<dyn Capability>,
        timeout: Duration,
    ) -> Result<(), RegistryError> {
        let name = capability.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateCapability(name));
        }
        let descriptor = CapabilityDescriptor {
            name: name.clone(),
            description: capability.description().to_string(),
            input_schema: capability.input_schema(),
            timeout,
        };
        self.by_name.insert(name, self.entries.len());
        self.entries.push(Entry {
            descriptor,
            handle: capability,
        });
        Ok(())
    }

    /// Descriptors in registration order.
    pub fn describe_all(&self) -> Vec<CapabilityDescriptor> {
        self.entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    /// Native tool definitions in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.entries.iter().map(|e| e.descriptor.to_definition()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.descriptor.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate `input` and execute the named capability.
    ///
    /// Returns `Err` only for an unknown name or schema-invalid input. Any
    /// failure during execution, including a panic or a timeout, comes back
    /// as a failed [`Observation`].
    pub async fn invoke(&self, name: &str, input: Value) -> Result<Observation, RegistryError> {
        let entry = self
            .by_name
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| RegistryError::UnknownCapability(name.to_string()))?;

        let validated = entry
            .descriptor
            .input_schema
            .validate(input)
            .map_err(|reason| RegistryError::InputValidation {
                capability: name.to_string(),
                reason,
            })?;

        let start = Instant::now();
        let timeout = entry.descriptor.timeout;
        let call = AssertUnwindSafe(entry.handle.invoke(validated)).catch_unwind();

        let observation = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(Ok(output))) => Observation::success(name, output),
            Ok(Ok(Err(err))) => {
                warn!(capability = %name, error = %err, "Capability failed");
                Observation::failure(name, err.to_string())
            }
            Ok(Err(panic)) => {
                let err = CapabilityError::ExecutionFailed {
                    capability: name.to_string(),
                    reason: panic_message(panic.as_ref()),
                };
                warn!(capability = %name, error = %err, "Capability panicked");
                Observation::failure(name, err.to_string())
            }
            Err(_) => {
                let err = CapabilityError::Timeout {
                    capability: name.to_string(),
                    timeout_secs: timeout.as_secs(),
                };
                warn!(capability = %name, error = %err, "Capability timed out");
                Observation::failure(name, err.to_string())
            }
        };

        debug!(
            capability = %name,
            success = observation.success,
            duration_ms = start.elapsed().as_millis() as u64,
            "Capability invoked"
        );
        Ok(observation)
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
