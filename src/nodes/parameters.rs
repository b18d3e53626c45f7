//! Declared node parameters: kinds, coercion and conditional visibility.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::expression::{resolve_value, Scope};

/// Declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterKind {
    String,
    Number,
    Boolean,
    /// One of a fixed set of values
    Options,
    /// Arbitrary JSON; strings are parsed
    Json,
    /// Object of optional settings
    Collection,
    /// Object of named groups, each a list of entries
    FixedCollection,
}

/// A resolved parameter value, tagged with its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Options(Value),
    Json(Value),
    Collection(Map<String, Value>),
    FixedCollection(Map<String, Value>),
}

impl ParameterValue {
    /// Coerce a resolved value to `kind`.
    pub fn coerce(kind: ParameterKind, value: Value, options: &[ParameterOption]) -> std::result::Result<Self, String> {
        match kind {
            ParameterKind::String => match value {
                Value::String(s) => Ok(Self::String(s)),
                Value::Null => Ok(Self::String(String::new())),
                Value::Number(n) => Ok(Self::String(n.to_string())),
                Value::Bool(b) => Ok(Self::String(b.to_string())),
                other => Err(format!("expected a string but received {}", kind_of(&other))),
            },
            ParameterKind::Number => match &value {
                Value::Number(n) => n
                    .as_f64()
                    .map(Self::Number)
                    .ok_or_else(|| "number out of range".to_string()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Self::Number)
                    .map_err(|_| format!("expected a number but received '{}'", s)),
                other => Err(format!("expected a number but received {}", kind_of(other))),
            },
            ParameterKind::Boolean => match &value {
                Value::Bool(b) => Ok(Self::Boolean(*b)),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Self::Boolean(true)),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Self::Boolean(false)),
                Value::Null => Ok(Self::Boolean(false)),
                other => Err(format!("expected a boolean but received {}", kind_of(other))),
            },
            ParameterKind::Options => {
                if options.is_empty() || options.iter().any(|o| o.value == value) {
                    Ok(Self::Options(value))
                } else {
                    let allowed: Vec<String> = options.iter().map(|o| o.value.to_string()).collect();
                    Err(format!(
                        "invalid option {} (allowed: {})",
                        value,
                        allowed.join(", ")
                    ))
                }
            }
            ParameterKind::Json => match value {
                Value::String(s) if s.trim().is_empty() => Ok(Self::Json(Value::Null)),
                Value::String(s) => serde_json::from_str(&s)
                    .map(Self::Json)
                    .map_err(|e| format!("invalid JSON: {}", e)),
                other => Ok(Self::Json(other)),
            },
            ParameterKind::Collection | ParameterKind::FixedCollection => {
                let map = match value {
                    Value::Object(map) => map,
                    Value::Null => Map::new(),
                    other => {
                        return Err(format!(
                            "expected an object but received {}",
                            kind_of(&other)
                        ))
                    }
                };
                Ok(if kind == ParameterKind::Collection {
                    Self::Collection(map)
                } else {
                    Self::FixedCollection(map)
                })
            }
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            Self::String(s) => Value::String(s),
            Self::Number(n) => crate::expression::number_value(n),
            Self::Boolean(b) => Value::Bool(b),
            Self::Options(v) | Self::Json(v) => v,
            Self::Collection(m) | Self::FixedCollection(m) => Value::Object(m),
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterOption {
    pub name: String,
    pub value: Value,
}

/// Visibility predicate over sibling parameter values.
///
/// `show` requires every listed sibling to hold one of its values; `hide`
/// hides the parameter when any listed sibling holds one of its values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisplayOptions {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub show: BTreeMap<String, Vec<Value>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub hide: BTreeMap<String, Vec<Value>>,
}

impl DisplayOptions {
    pub fn is_visible(&self, siblings: &Map<String, Value>) -> bool {
        let holds = |name: &String, values: &Vec<Value>| {
            let current = siblings.get(name).unwrap_or(&Value::Null);
            values.iter().any(|v| v == current)
        };
        self.show.iter().all(|(name, values)| holds(name, values))
            && !self.hide.iter().any(|(name, values)| holds(name, values))
    }

    fn referenced(&self) -> impl Iterator<Item = &String> {
        self.show.keys().chain(self.hide.keys())
    }
}

/// Schema of one declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSchema {
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    pub default: Value,
    pub required: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ParameterOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_options: Option<DisplayOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterSchema {
    pub fn new(name: &str, kind: ParameterKind) -> Self {
        Self {
            name: name.to_string(),
            display_name: name.to_string(),
            kind,
            default: Value::Null,
            required: false,
            options: Vec::new(),
            display_options: None,
            description: None,
        }
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, ParameterKind::String).default(Value::String(String::new()))
    }

    pub fn number(name: &str, default: f64) -> Self {
        Self::new(name, ParameterKind::Number).default(crate::expression::number_value(default))
    }

    pub fn boolean(name: &str, default: bool) -> Self {
        Self::new(name, ParameterKind::Boolean).default(Value::Bool(default))
    }

    /// Options parameter; the first option is the default.
    pub fn options(name: &str, values: &[&str]) -> Self {
        let options: Vec<ParameterOption> = values
            .iter()
            .map(|v| ParameterOption {
                name: v.to_string(),
                value: Value::String(v.to_string()),
            })
            .collect();
        let default = options.first().map(|o| o.value.clone()).unwrap_or(Value::Null);
        Self {
            options,
            ..Self::new(name, ParameterKind::Options).default(default)
        }
    }

    pub fn json(name: &str) -> Self {
        Self::new(name, ParameterKind::Json)
    }

    pub fn collection(name: &str) -> Self {
        Self::new(name, ParameterKind::Collection).default(Value::Object(Map::new()))
    }

    pub fn fixed_collection(name: &str) -> Self {
        Self::new(name, ParameterKind::FixedCollection).default(Value::Object(Map::new()))
    }

    pub fn display_name(mut self, display_name: &str) -> Self {
        self.display_name = display_name.to_string();
        self
    }

    pub fn default(mut self, default: Value) -> Self {
        self.default = default;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Only show when `parameter` holds one of `values`.
    pub fn show_when(mut self, parameter: &str, values: &[Value]) -> Self {
        self.display_options
            .get_or_insert_with(DisplayOptions::default)
            .show
            .insert(parameter.to_string(), values.to_vec());
        self
    }

    /// Hide when `parameter` holds one of `values`.
    pub fn hide_when(mut self, parameter: &str, values: &[Value]) -> Self {
        self.display_options
            .get_or_insert_with(DisplayOptions::default)
            .hide
            .insert(parameter.to_string(), values.to_vec());
        self
    }
}

const MAX_VISIBILITY_DEPTH: usize = 16;

/// Resolves a node's configured parameters against its declared schemas.
///
/// Visibility is decided before a parameter's own expression is evaluated,
/// so hidden parameters never run their expressions.
pub struct ParameterResolver<'a> {
    node: &'a str,
    schemas: &'a [ParameterSchema],
    configured: &'a Map<String, Value>,
    item_index: usize,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(
        node: &'a str,
        schemas: &'a [ParameterSchema],
        configured: &'a Map<String, Value>,
        item_index: usize,
    ) -> Self {
        Self {
            node,
            schemas,
            configured,
            item_index,
        }
    }

    /// Resolve every visible parameter. Undeclared configured parameters are
    /// resolved and passed through after the declared ones.
    pub fn resolve_all(&self, scope: &dyn Scope) -> Result<Map<String, Value>> {
        let mut memo = HashMap::new();
        let mut out = Map::new();
        for schema in self.schemas {
            if let Some(value) = self.resolve_inner(&schema.name, scope, &mut memo, 0)? {
                out.insert(schema.name.clone(), value);
            }
        }
        for (name, raw) in self.configured {
            if !out.contains_key(name) && self.schema(name).is_none() {
                out.insert(name.clone(), resolve_value(raw, scope)?);
            }
        }
        Ok(out)
    }

    /// Resolve a single parameter. `None` when it is hidden or unset and
    /// undeclared.
    pub fn resolve(&self, name: &str, scope: &dyn Scope) -> Result<Option<Value>> {
        self.resolve_inner(name, scope, &mut HashMap::new(), 0)
    }

    fn schema(&self, name: &str) -> Option<&'a ParameterSchema> {
        self.schemas.iter().find(|s| s.name == name)
    }

    fn resolve_inner(
        &self,
        name: &str,
        scope: &dyn Scope,
        memo: &mut HashMap<String, Option<Value>>,
        depth: usize,
    ) -> Result<Option<Value>> {
        if let Some(done) = memo.get(name) {
            return Ok(done.clone());
        }
        let Some(schema) = self.schema(name) else {
            return match self.configured.get(name) {
                Some(raw) => resolve_value(raw, scope).map(Some),
                None => Ok(None),
            };
        };
        if depth > MAX_VISIBILITY_DEPTH {
            return Err(Error::node_item(
                self.node,
                format!("Parameter '{}' has circular display options", name),
                self.item_index,
            ));
        }

        if let Some(display) = &schema.display_options {
            let mut siblings = Map::new();
            for sibling in display.referenced() {
                let value = self.resolve_inner(sibling, scope, memo, depth + 1)?;
                siblings.insert(sibling.clone(), value.unwrap_or(Value::Null));
            }
            if !display.is_visible(&siblings) {
                memo.insert(name.to_string(), None);
                return Ok(None);
            }
        }

        let raw = self.configured.get(name).unwrap_or(&schema.default);
        let resolved = resolve_value(raw, scope)?;
        if schema.required && is_blank(&resolved) {
            return Err(Error::node_item(
                self.node,
                format!("Parameter '{}' is required", name),
                self.item_index,
            ));
        }
        let value = ParameterValue::coerce(schema.kind, resolved, &schema.options)
            .map_err(|message| {
                Error::node_item(
                    self.node,
                    format!("Parameter '{}': {}", name, message),
                    self.item_index,
                )
            })?
            .into_json();
        memo.insert(name.to_string(), Some(value.clone()));
        Ok(Some(value))
    }
}
