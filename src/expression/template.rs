//! `{{ ... }}` templates inside parameter values.

use serde_json::{Map, Value};

use super::functions::to_display;
use super::{evaluate_str, EvalError, Scope};
use crate::error::{Error, Result};

/// Whether a parameter string needs evaluation.
pub fn is_expression(text: &str) -> bool {
    text.starts_with('=') || text.contains("{{")
}

enum Segment<'a> {
    Text(&'a str),
    Block(&'a str),
}

/// Split a template into literal text and expression blocks.
fn segments(text: &str) -> std::result::Result<Vec<Segment<'_>>, EvalError> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        if open > 0 {
            out.push(Segment::Text(&rest[..open]));
        }
        let body = &rest[open + 2..];
        let close = block_end(body).ok_or_else(|| {
            EvalError::new("Unterminated expression block: missing '}}'")
        })?;
        out.push(Segment::Block(&body[..close]));
        rest = &body[close + 2..];
    }
    if !rest.is_empty() {
        out.push(Segment::Text(rest));
    }
    Ok(out)
}

/// Byte offset of the `}}` closing a block, skipping braces and string
/// literals inside the expression.
fn block_end(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' | b'`' => quote = Some(b),
                b'{' => depth += 1,
                b'}' if depth > 0 => depth -= 1,
                b'}' if bytes.get(i + 1) == Some(&b'}') => return Some(i),
                _ => {}
            },
        }
        i += 1;
    }
    None
}

/// Render a template string.
///
/// A value that is exactly one block (optionally prefixed with `=` and
/// padded with whitespace) yields the expression's native value. Otherwise
/// each block is stringified and spliced into the surrounding text.
pub fn render_template(text: &str, scope: &dyn Scope) -> Result<Value> {
    let wrap = |message: String| Error::Expression {
        expression: text.to_string(),
        item_index: scope.item_index(),
        message,
    };
    let body = text.strip_prefix('=').unwrap_or(text);
    let parts = segments(body).map_err(|e| wrap(e.message))?;

    let blocks = parts
        .iter()
        .filter(|p| matches!(p, Segment::Block(_)))
        .count();
    let only_whitespace = parts.iter().all(|p| match p {
        Segment::Text(t) => t.trim().is_empty(),
        Segment::Block(_) => true,
    });
    if blocks == 1 && only_whitespace {
        for part in &parts {
            if let Segment::Block(source) = part {
                return evaluate_str(source, scope).map_err(|e| wrap(e.message));
            }
        }
    }

    let mut out = String::with_capacity(body.len());
    for part in parts {
        match part {
            Segment::Text(t) => out.push_str(t),
            Segment::Block(source) => {
                let value = evaluate_str(source, scope).map_err(|e| wrap(e.message))?;
                out.push_str(&to_display(&value));
            }
        }
    }
    Ok(Value::String(out))
}

/// Resolve every expression string inside a parameter value.
pub fn resolve_value(value: &Value, scope: &dyn Scope) -> Result<Value> {
    match value {
        Value::String(text) if is_expression(text) => render_template(text, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, scope))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, inner) in map {
                out.insert(key.clone(), resolve_value(inner, scope)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ItemScope;
    use serde_json::json;

    fn ann() -> ItemScope {
        ItemScope::from_json(json!({"name": "Ann", "n": 5, "tags": ["x"]}))
    }

    #[test]
    fn test_whole_value_keeps_native_type() {
        let scope = ann();
        assert_eq!(render_template("{{ 1 + 1 }}", &scope).unwrap(), json!(2));
        assert_eq!(render_template("={{ $json.n }}", &scope).unwrap(), json!(5));
        assert_eq!(render_template("  {{ $json.tags }} ", &scope).unwrap(), json!(["x"]));
    }

    #[test]
    fn test_fragments_are_spliced() {
        let scope = ann();
        assert_eq!(
            render_template("Hello {{$json.name}}", &scope).unwrap(),
            json!("Hello Ann")
        );
        assert_eq!(
            render_template("{{ $json.n }} of {{ $json.n * 2 }}", &scope).unwrap(),
            json!("5 of 10")
        );
        assert_eq!(render_template("=plain", &scope).unwrap(), json!("plain"));
    }

    #[test]
    fn test_braces_inside_blocks() {
        let scope = ann();
        assert_eq!(
            render_template("{{ {a: {b: 1}}.a.b }}", &scope).unwrap(),
            json!(1)
        );
        assert_eq!(render_template("{{ '}}' }}", &scope).unwrap(), json!("}}"));
    }

    #[test]
    fn test_errors_carry_expression_and_index() {
        let scope = ann().with_item_index(0);
        let err = render_template("x {{ $json.n", &scope).unwrap_err();
        assert!(matches!(err, Error::Expression { .. }));
        assert!(err.to_string().contains("Unterminated"));

        let err = render_template("{{ $missing }}", &scope).unwrap_err();
        match err {
            Error::Expression {
                expression,
                item_index,
                message,
            } => {
                assert_eq!(expression, "{{ $missing }}");
                assert_eq!(item_index, 0);
                assert_eq!(message, "Unknown variable '$missing'");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_value_recurses() {
        let scope = ann();
        let params = json!({
            "greeting": "Hi {{ $json.name }}",
            "count": "={{ $json.n + 1 }}",
            "list": ["{{ $json.n }}", 3],
            "plain": "no template",
            "flag": true
        });
        assert_eq!(
            resolve_value(&params, &scope).unwrap(),
            json!({
                "greeting": "Hi Ann",
                "count": 6,
                "list": [5, 3],
                "plain": "no template",
                "flag": true
            })
        );
    }
}
