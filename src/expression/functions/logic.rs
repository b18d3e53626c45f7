//! Emptiness checks, conditionals, type predicates and coercions.

use serde_json::Value;

use super::{arg, is_empty_value, number, str_arg, to_number, truthy, type_name};
use crate::expression::EvalResult;

pub(super) fn call(name: &str, args: &[Value]) -> Option<EvalResult<Value>> {
    let result = match name {
        "isEmpty" => Ok(Value::Bool(is_empty_value(arg(args, 0)))),
        "isNotEmpty" => Ok(Value::Bool(!is_empty_value(arg(args, 0)))),
        "exists" | "isDefined" => Ok(Value::Bool(!arg(args, 0).is_null())),
        "ifEmpty" => Ok(if is_empty_value(arg(args, 0)) {
            arg(args, 1).clone()
        } else {
            arg(args, 0).clone()
        }),
        "if" => Ok(if truthy(arg(args, 0)) {
            arg(args, 1).clone()
        } else {
            arg(args, 2).clone()
        }),
        "switch" => Ok(switch(args)),
        "and" => Ok(Value::Bool(!args.is_empty() && args.iter().all(truthy))),
        "or" => Ok(Value::Bool(args.iter().any(truthy))),
        "not" => Ok(Value::Bool(!truthy(arg(args, 0)))),
        "isString" => Ok(Value::Bool(arg(args, 0).is_string())),
        "isNumber" => Ok(Value::Bool(arg(args, 0).is_number())),
        "isBoolean" => Ok(Value::Bool(arg(args, 0).is_boolean())),
        "isArray" => Ok(Value::Bool(arg(args, 0).is_array())),
        "isObject" => Ok(Value::Bool(arg(args, 0).is_object())),
        "isNull" => Ok(Value::Bool(arg(args, 0).is_null())),
        "isNumeric" => Ok(Value::Bool(match arg(args, 0) {
            Value::Number(_) => true,
            Value::String(s) => !s.trim().is_empty() && s.trim().parse::<f64>().is_ok(),
            _ => false,
        })),
        "typeOf" => Ok(Value::String(type_name(arg(args, 0)).to_string())),
        "toString" | "string" => Ok(Value::String(str_arg(args, 0))),
        "toNumber" | "number" | "toFloat" => to_number(arg(args, 0)).and_then(number),
        "toInt" | "parseInt" => to_number(arg(args, 0)).and_then(|n| number(n.trunc())),
        "toBoolean" | "boolean" => Ok(Value::Bool(to_boolean(arg(args, 0)))),
        _ => return None,
    };
    Some(result)
}

/// `$switch(value, case1, result1, case2, result2, ..., default?)`
fn switch(args: &[Value]) -> Value {
    let subject = arg(args, 0);
    let mut rest = &args[args.len().min(1)..];
    while rest.len() >= 2 {
        if super::strict_equals(subject, &rest[0]) {
            return rest[1].clone();
        }
        rest = &rest[2..];
    }
    rest.first().cloned().unwrap_or(Value::Null)
}

/// Boolean coercion that understands "false", "0", "no" and "off" strings.
fn to_boolean(value: &Value) -> bool {
    match value {
        Value::String(s) => !matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "" | "false" | "0" | "no" | "off"
        ),
        other => truthy(other),
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
    fn test_emptiness() {
        assert_eq!(run("isEmpty", &[json!("")]), json!(true));
        assert_eq!(run("isEmpty", &[json!([])]), json!(true));
        assert_eq!(run("isEmpty", &[json!(0)]), json!(false));
        assert_eq!(run("isNotEmpty", &[json!({"a": 1})]), json!(true));
        assert_eq!(run("exists", &[]), json!(false));
        assert_eq!(run("ifEmpty", &[json!(""), json!("fallback")]), json!("fallback"));
    }

    #[test]
    fn test_conditionals() {
        assert_eq!(run("if", &[json!(true), json!("a"), json!("b")]), json!("a"));
        assert_eq!(run("if", &[json!(0), json!("a"), json!("b")]), json!("b"));
        let args = [json!(2), json!(1), json!("one"), json!(2), json!("two"), json!("other")];
        assert_eq!(run("switch", &args), json!("two"));
        let args = [json!(9), json!(1), json!("one"), json!("other")];
        assert_eq!(run("switch", &args), json!("other"));
        assert_eq!(run("and", &[json!(true), json!(1)]), json!(true));
        assert_eq!(run("or", &[json!(false), json!(null)]), json!(false));
        assert_eq!(run("not", &[json!("")]), json!(true));
    }

    #[test]
    fn test_coercions() {
        assert_eq!(run("toNumber", &[json!("4.5")]), json!(4.5));
        assert_eq!(run("toInt", &[json!("4.9")]), json!(4));
        assert_eq!(run("toString", &[json!(3)]), json!("3"));
        assert_eq!(run("toBoolean", &[json!("false")]), json!(false));
        assert_eq!(run("toBoolean", &[json!("yes")]), json!(true));
        assert_eq!(run("typeOf", &[json!([1])]), json!("array"));
        assert_eq!(run("isNumeric", &[json!("12")]), json!(true));
        assert!(call("toNumber", &[json!("abc")]).unwrap().is_err());
    }
}
