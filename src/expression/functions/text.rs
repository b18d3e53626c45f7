//! String helpers.

use serde_json::Value;

use super::{arg, num_arg, opt_num_arg, str_arg, strict_equals};
use crate::expression::EvalResult;

pub(super) fn call(name: &str, args: &[Value]) -> Option<EvalResult<Value>> {
    let result = match name {
        "upper" => Ok(Value::String(str_arg(args, 0).to_uppercase())),
        "lower" => Ok(Value::String(str_arg(args, 0).to_lowercase())),
        "trim" => Ok(Value::String(str_arg(args, 0).trim().to_string())),
        "trimStart" => Ok(Value::String(str_arg(args, 0).trim_start().to_string())),
        "trimEnd" => Ok(Value::String(str_arg(args, 0).trim_end().to_string())),
        "capitalize" => Ok(Value::String(capitalize(&str_arg(args, 0)))),
        "padStart" => pad(args, true),
        "padEnd" => pad(args, false),
        "replace" => Ok(Value::String(
            str_arg(args, 0).replace(&str_arg(args, 1), &str_arg(args, 2)),
        )),
        "replaceFirst" => Ok(Value::String(str_arg(args, 0).replacen(
            &str_arg(args, 1),
            &str_arg(args, 2),
            1,
        ))),
        "split" => Ok(split(args)),
        "substring" => substring(args),
        "startsWith" => Ok(Value::Bool(str_arg(args, 0).starts_with(&str_arg(args, 1)))),
        "endsWith" => Ok(Value::Bool(str_arg(args, 0).ends_with(&str_arg(args, 1)))),
        "includes" | "contains" => Ok(Value::Bool(includes(arg(args, 0), arg(args, 1)))),
        "indexOf" => Ok(Value::from(index_of(arg(args, 0), arg(args, 1)))),
        "repeat" => num_arg(args, 1, name)
            .map(|n| Value::String(str_arg(args, 0).repeat(n.clamp(0.0, 10_000.0) as usize))),
        _ => return None,
    };
    Some(result)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn pad(args: &[Value], at_start: bool) -> EvalResult<Value> {
    let function = if at_start { "padStart" } else { "padEnd" };
    let text = str_arg(args, 0);
    let width = num_arg(args, 1, function)?.clamp(0.0, 10_000.0) as usize;
    let fill = match arg(args, 2) {
        Value::Null => " ".to_string(),
        other => super::to_display(other),
    };
    let len = text.chars().count();
    if len >= width || fill.is_empty() {
        return Ok(Value::String(text));
    }
    let padding: String = fill.chars().cycle().take(width - len).collect();
    Ok(Value::String(if at_start {
        padding + text.as_str()
    } else {
        text + padding.as_str()
    }))
}

fn split(args: &[Value]) -> Value {
    let text = str_arg(args, 0);
    let parts: Vec<Value> = match arg(args, 1) {
        Value::Null => vec![Value::String(text)],
        sep => {
            let sep = super::to_display(sep);
            if sep.is_empty() {
                text.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                text.split(sep.as_str())
                    .map(|p| Value::String(p.to_string()))
                    .collect()
            }
        }
    };
    Value::Array(parts)
}

/// Resolve JavaScript-style slice bounds (negative counts from the end).
pub(super) fn slice_bounds(len: usize, start: Option<f64>, end: Option<f64>) -> (usize, usize) {
    let resolve = |n: f64| -> usize {
        let n = n.trunc() as i64;
        if n < 0 {
            (len as i64 + n).max(0) as usize
        } else {
            (n as usize).min(len)
        }
    };
    let from = start.map(resolve).unwrap_or(0);
    let to = end.map(resolve).unwrap_or(len);
    (from, to.max(from))
}

fn substring(args: &[Value]) -> EvalResult<Value> {
    let chars: Vec<char> = str_arg(args, 0).chars().collect();
    let start = opt_num_arg(args, 1, "substring")?.map(|n| n.max(0.0));
    let end = opt_num_arg(args, 2, "substring")?.map(|n| n.max(0.0));
    let (from, to) = slice_bounds(chars.len(), start, end);
    Ok(Value::String(chars[from..to].iter().collect()))
}

pub(super) fn includes(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| strict_equals(item, needle)),
        Value::Object(map) => match needle {
            Value::String(key) => map.contains_key(key),
            _ => false,
        },
        Value::Null => false,
        other => super::to_display(other).contains(&super::to_display(needle)),
    }
}

fn index_of(haystack: &Value, needle: &Value) -> i64 {
    match haystack {
        Value::Array(items) => items
            .iter()
            .position(|item| strict_equals(item, needle))
            .map(|p| p as i64)
            .unwrap_or(-1),
        other => {
            let text = super::to_display(other);
            let needle = super::to_display(needle);
            text.find(&needle)
                .map(|byte| text[..byte].chars().count() as i64)
                .unwrap_or(-1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(name: &str, args: &[Value]) -> Value {
        call(name, args).unwrap().unwrap()
    }

    #[test]
    fn test_case_and_trim() {
        assert_eq!(run("upper", &[json!("abc")]), json!("ABC"));
        assert_eq!(run("lower", &[json!("ABC")]), json!("abc"));
        assert_eq!(run("trim", &[json!("  x ")]), json!("x"));
        assert_eq!(run("capitalize", &[json!("hello")]), json!("Hello"));
        assert_eq!(run("upper", &[json!(null)]), json!(""));
    }

    #[test]
    fn test_padding() {
        assert_eq!(run("padStart", &[json!("7"), json!(3), json!("0")]), json!("007"));
        assert_eq!(run("padEnd", &[json!("ab"), json!(4)]), json!("ab  "));
        assert_eq!(run("padStart", &[json!("long"), json!(2)]), json!("long"));
    }

    #[test]
    fn test_replace_and_split() {
        assert_eq!(run("replace", &[json!("a-b-c"), json!("-"), json!("+")]), json!("a+b+c"));
        assert_eq!(run("replaceFirst", &[json!("a-b-c"), json!("-"), json!("+")]), json!("a+b-c"));
        assert_eq!(run("split", &[json!("a,b"), json!(",")]), json!(["a", "b"]));
        assert_eq!(run("split", &[json!("ab"), json!("")]), json!(["a", "b"]));
    }

    #[test]
    fn test_search() {
        assert_eq!(run("includes", &[json!("hello"), json!("ell")]), json!(true));
        assert_eq!(run("includes", &[json!([1, 2]), json!(2.0)]), json!(true));
        assert_eq!(run("indexOf", &[json!("héllo"), json!("l")]), json!(2));
        assert_eq!(run("indexOf", &[json!(["a"]), json!("b")]), json!(-1));
        assert_eq!(run("startsWith", &[json!("nodeflow"), json!("node")]), json!(true));
        assert_eq!(run("substring", &[json!("nodeflow"), json!(4)]), json!("flow"));
    }
}
