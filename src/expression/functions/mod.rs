//! Allow-listed helper functions callable from expressions.
//!
//! Every helper is a pure function over JSON values. Expressions call them as
//! `$name(args)`, or as methods where the receiver becomes the first argument
//! (`$json.name.toUpperCase()` is `$upper($json.name)`).

mod codec;
mod collections;
mod logic;
mod math;
mod text;

use std::cmp::Ordering;

use serde_json::Value;

use super::{number_value, EvalError, EvalResult};

static NULL: Value = Value::Null;

/// Call a helper by name (without the `$`). `None` when no helper exists.
pub(crate) fn call(name: &str, args: &[Value]) -> Option<EvalResult<Value>> {
    logic::call(name, args)
        .or_else(|| math::call(name, args))
        .or_else(|| text::call(name, args))
        .or_else(|| collections::call(name, args))
        .or_else(|| codec::call(name, args))
}

/// Map a method name to the helper implementing it.
pub(crate) fn method_alias(method: &str) -> &str {
    match method {
        "toUpperCase" | "toLocaleUpperCase" => "upper",
        "toLowerCase" | "toLocaleLowerCase" => "lower",
        "replace" => "replaceFirst",
        "replaceAll" => "replace",
        "toJsonString" => "jsonStringify",
        "parseJson" => "jsonParse",
        "substr" => "substring",
        other => other,
    }
}

/// Helpers that accept an arrow function argument.
pub(crate) const HIGHER_ORDER: &[&str] = &[
    "filter", "map", "reduce", "find", "findIndex", "some", "every", "sort", "sortBy",
];

pub(crate) fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&NULL)
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// JavaScript-style truthiness.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Numeric coercion: numbers, booleans, null and numeric strings.
pub(crate) fn to_number(value: &Value) -> EvalResult<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| EvalError::new("Number out of range")),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Null => Ok(0.0),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(0.0);
            }
            trimmed
                .parse::<f64>()
                .map_err(|_| EvalError::new(format!("Cannot convert '{}' to a number", s)))
        }
        other => Err(EvalError::new(format!(
            "Cannot convert {} to a number",
            type_name(other)
        ))),
    }
}

/// Text form used when splicing values into strings.
pub(crate) fn to_display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

pub(crate) fn str_arg(args: &[Value], index: usize) -> String {
    to_display(arg(args, index))
}

pub(crate) fn num_arg(args: &[Value], index: usize, function: &str) -> EvalResult<f64> {
    to_number(arg(args, index)).map_err(|e| EvalError::new(format!("${}: {}", function, e)))
}

pub(crate) fn opt_num_arg(args: &[Value], index: usize, function: &str) -> EvalResult<Option<f64>> {
    match arg(args, index) {
        Value::Null => Ok(None),
        _ => num_arg(args, index, function).map(Some),
    }
}

pub(crate) fn array_arg(args: &[Value], index: usize, function: &str) -> EvalResult<Vec<Value>> {
    match arg(args, index) {
        Value::Array(items) => Ok(items.clone()),
        Value::Null => Ok(Vec::new()),
        other => Err(EvalError::new(format!(
            "${} expects an array but received {}",
            function,
            type_name(other)
        ))),
    }
}

pub(crate) fn object_arg(
    args: &[Value],
    index: usize,
    function: &str,
) -> EvalResult<serde_json::Map<String, Value>> {
    match arg(args, index) {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(serde_json::Map::new()),
        other => Err(EvalError::new(format!(
            "${} expects an object but received {}",
            function,
            type_name(other)
        ))),
    }
}

pub(crate) fn number(n: f64) -> EvalResult<Value> {
    if n.is_finite() {
        Ok(number_value(n))
    } else {
        Err(EvalError::new("Arithmetic result is not a finite number"))
    }
}

/// Ordering used by comparisons and sorting.
///
/// Numbers compare numerically, strings lexicographically, and a number
/// against a numeric string numerically. Other pairs are unordered.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_))
        | (Value::Number(_), Value::Bool(_))
        | (Value::Bool(_), Value::Number(_))
        | (Value::Bool(_), Value::Bool(_)) => {
            let (x, y) = (to_number(a).ok()?, to_number(b).ok()?);
            x.partial_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            let (x, y) = (to_number(a).ok()?, to_number(b).ok()?);
            x.partial_cmp(&y)
        }
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Total order for sorting: unordered pairs fall back to type rank.
pub(crate) fn sort_order(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    compare_values(a, b).unwrap_or_else(|| rank(a).cmp(&rank(b)))
}

/// Structural equality that treats `1` and `1.0` as equal.
pub(crate) fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| strict_equals(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| strict_equals(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Equality with string/number/boolean coercion.
pub(crate) fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(_), Value::Number(_))
        | (Value::Number(_), Value::String(_))
        | (Value::Bool(_), Value::Number(_))
        | (Value::Number(_), Value::Bool(_))
        | (Value::Bool(_), Value::String(_))
        | (Value::String(_), Value::Bool(_)) => match (to_number(a), to_number(b)) {
            (Ok(x), Ok(y)) => x == y,
            _ => false,
        },
        _ => strict_equals(a, b),
    }
}

/// Emptiness as used by `$isEmpty`: null, "", [], {}.
pub(crate) fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
