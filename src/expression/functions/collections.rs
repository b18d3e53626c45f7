//! Array and object helpers.

use serde_json::{Map, Value};

use super::text::slice_bounds;
use super::{arg, array_arg, object_arg, opt_num_arg, sort_order, str_arg, strict_equals, to_display};
use crate::expression::{EvalError, EvalResult};

pub(super) fn call(name: &str, args: &[Value]) -> Option<EvalResult<Value>> {
    let result = match name {
        "length" | "count" => Ok(Value::from(length(arg(args, 0)))),
        "first" => first_or_last(args, true),
        "last" => first_or_last(args, false),
        "unique" => array_arg(args, 0, name).map(|items| Value::Array(unique(items))),
        "sort" | "sortBy" => sort(args),
        "reverse" => reverse(args),
        "slice" => slice(args),
        "concat" => Ok(concat(args)),
        "join" => array_arg(args, 0, name).map(|items| {
            let sep = match arg(args, 1) {
                Value::Null => ",".to_string(),
                other => to_display(other),
            };
            Value::String(items.iter().map(to_display).collect::<Vec<_>>().join(&sep))
        }),
        "flatten" => array_arg(args, 0, name).map(|items| Value::Array(flatten(items))),
        "compact" => array_arg(args, 0, name).map(|items| {
            Value::Array(items.into_iter().filter(|v| !v.is_null()).collect())
        }),
        "chunk" => chunk(args),
        "keys" => object_arg(args, 0, name)
            .map(|map| Value::Array(map.keys().cloned().map(Value::String).collect())),
        "values" => object_arg(args, 0, name)
            .map(|map| Value::Array(map.values().cloned().collect())),
        "entries" => object_arg(args, 0, name).map(|map| {
            Value::Array(
                map.into_iter()
                    .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
                    .collect(),
            )
        }),
        "fromEntries" => from_entries(args),
        "merge" => merge(args),
        "pick" => select_keys(args, true),
        "omit" => select_keys(args, false),
        "hasField" => object_arg(args, 0, name)
            .map(|map| Value::Bool(map.contains_key(&str_arg(args, 1)))),
        "get" => Ok(get_path(arg(args, 0), &str_arg(args, 1))
            .cloned()
            .unwrap_or_else(|| arg(args, 2).clone())),
        _ => return None,
    };
    Some(result)
}

fn length(value: &Value) -> usize {
    match value {
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        Value::Null => 0,
        other => to_display(other).chars().count(),
    }
}

fn first_or_last(args: &[Value], first: bool) -> EvalResult<Value> {
    let value = match arg(args, 0) {
        Value::Array(items) => {
            let picked = if first { items.first() } else { items.last() };
            picked.cloned().unwrap_or(Value::Null)
        }
        Value::String(s) => {
            let picked = if first { s.chars().next() } else { s.chars().last() };
            picked.map(|c| Value::String(c.to_string())).unwrap_or(Value::Null)
        }
        Value::Null => Value::Null,
        other => {
            return Err(EvalError::new(format!(
                "${} expects an array but received {}",
                if first { "first" } else { "last" },
                super::type_name(other)
            )))
        }
    };
    Ok(value)
}

fn unique(items: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !out.iter().any(|seen| strict_equals(seen, &item)) {
            out.push(item);
        }
    }
    out
}

/// `$sort(array, key?, "desc"?)`; `key` is a dot path into each element.
fn sort(args: &[Value]) -> EvalResult<Value> {
    let mut items = array_arg(args, 0, "sort")?;
    let key = match arg(args, 1) {
        Value::String(k) if !k.is_empty() && k != "asc" && k != "desc" => Some(k.clone()),
        _ => None,
    };
    let descending = args
        .iter()
        .skip(1)
        .any(|a| a.as_str().map(|s| s.eq_ignore_ascii_case("desc")).unwrap_or(false));

    items.sort_by(|a, b| match &key {
        Some(path) => sort_order(
            get_path(a, path).unwrap_or(&Value::Null),
            get_path(b, path).unwrap_or(&Value::Null),
        ),
        None => sort_order(a, b),
    });
    if descending {
        items.reverse();
    }
    Ok(Value::Array(items))
}

fn reverse(args: &[Value]) -> EvalResult<Value> {
    match arg(args, 0) {
        Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
        _ => {
            let mut items = array_arg(args, 0, "reverse")?;
            items.reverse();
            Ok(Value::Array(items))
        }
    }
}

fn slice(args: &[Value]) -> EvalResult<Value> {
    let start = opt_num_arg(args, 1, "slice")?;
    let end = opt_num_arg(args, 2, "slice")?;
    match arg(args, 0) {
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (from, to) = slice_bounds(chars.len(), start, end);
            Ok(Value::String(chars[from..to].iter().collect()))
        }
        _ => {
            let items = array_arg(args, 0, "slice")?;
            let (from, to) = slice_bounds(items.len(), start, end);
            Ok(Value::Array(items[from..to].to_vec()))
        }
    }
}

fn concat(args: &[Value]) -> Value {
    if let Some(Value::Array(_)) = args.first() {
        let mut out = Vec::new();
        for value in args {
            match value {
                Value::Array(items) => out.extend(items.iter().cloned()),
                other => out.push(other.clone()),
            }
        }
        Value::Array(out)
    } else {
        Value::String(args.iter().map(to_display).collect())
    }
}

fn flatten(items: Vec<Value>) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Array(inner) => out.extend(inner),
            other => out.push(other),
        }
    }
    out
}

fn chunk(args: &[Value]) -> EvalResult<Value> {
    let items = array_arg(args, 0, "chunk")?;
    let size = opt_num_arg(args, 1, "chunk")?.unwrap_or(1.0);
    if size < 1.0 {
        return Err(EvalError::new("$chunk size must be at least 1"));
    }
    Ok(Value::Array(
        items
            .chunks(size as usize)
            .map(|c| Value::Array(c.to_vec()))
            .collect(),
    ))
}

fn from_entries(args: &[Value]) -> EvalResult<Value> {
    let mut map = Map::new();
    for entry in array_arg(args, 0, "fromEntries")? {
        match entry {
            Value::Array(pair) if !pair.is_empty() => {
                let key = to_display(&pair[0]);
                map.insert(key, pair.get(1).cloned().unwrap_or(Value::Null));
            }
            other => {
                return Err(EvalError::new(format!(
                    "$fromEntries expects [key, value] pairs but received {}",
                    super::type_name(&other)
                )))
            }
        }
    }
    Ok(Value::Object(map))
}

/// Shallow merge; later objects win.
fn merge(args: &[Value]) -> EvalResult<Value> {
    let mut out = Map::new();
    for (index, _) in args.iter().enumerate() {
        out.extend(object_arg(args, index, "merge")?);
    }
    Ok(Value::Object(out))
}

/// Keys given either as an array or as trailing arguments.
fn select_keys(args: &[Value], keep: bool) -> EvalResult<Value> {
    let function = if keep { "pick" } else { "omit" };
    let source = object_arg(args, 0, function)?;
    let keys: Vec<String> = match arg(args, 1) {
        Value::Array(list) => list.iter().map(to_display).collect(),
        _ => args.iter().skip(1).map(to_display).collect(),
    };
    let out: Map<String, Value> = source
        .into_iter()
        .filter(|(k, _)| keys.contains(k) == keep)
        .collect();
    Ok(Value::Object(out))
}

/// Walk a dot path (`a.b.0.c`) through objects and arrays.
pub(crate) fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(name: &str, args: &[Value]) -> Value {
        call(name, args).unwrap().unwrap()
    }

    #[test]
    fn test_array_basics() {
        assert_eq!(run("first", &[json!([1, 2, 3])]), json!(1));
        assert_eq!(run("last", &[json!([1, 2, 3])]), json!(3));
        assert_eq!(run("first", &[json!([])]), json!(null));
        assert_eq!(run("length", &[json!("héllo")]), json!(5));
        assert_eq!(run("unique", &[json!([1, 1.0, "1", 2])]), json!([1, "1", 2]));
        assert_eq!(run("reverse", &[json!([1, 2])]), json!([2, 1]));
        assert_eq!(run("slice", &[json!([1, 2, 3, 4]), json!(1), json!(-1)]), json!([2, 3]));
        assert_eq!(run("join", &[json!(["a", 1, null])]), json!("a,1,"));
        assert_eq!(run("flatten", &[json!([[1], 2, [3, [4]]])]), json!([1, 2, 3, [4]]));
        assert_eq!(run("chunk", &[json!([1, 2, 3]), json!(2)]), json!([[1, 2], [3]]));
    }

    #[test]
    fn test_sort() {
        assert_eq!(run("sort", &[json!([3, 1, 2])]), json!([1, 2, 3]));
        assert_eq!(run("sort", &[json!(["b", "a"]), json!("desc")]), json!(["b", "a"]));
        let people = json!([{"age": 40, "n": "a"}, {"age": 30, "n": "b"}]);
        assert_eq!(
            run("sort", &[people, json!("age")]),
            json!([{"age": 30, "n": "b"}, {"age": 40, "n": "a"}])
        );
    }

    #[test]
    fn test_objects() {
        let obj = json!({"a": 1, "b": 2, "c": 3});
        assert_eq!(run("keys", &[obj.clone()]), json!(["a", "b", "c"]));
        assert_eq!(run("values", &[obj.clone()]), json!([1, 2, 3]));
        assert_eq!(run("pick", &[obj.clone(), json!(["a", "c"])]), json!({"a": 1, "c": 3}));
        assert_eq!(run("omit", &[obj.clone(), json!("a")]), json!({"b": 2, "c": 3}));
        assert_eq!(
            run("merge", &[json!({"a": 1}), json!({"a": 2, "z": 0})]),
            json!({"a": 2, "z": 0})
        );
        assert_eq!(run("entries", &[json!({"k": "v"})]), json!([["k", "v"]]));
        assert_eq!(run("fromEntries", &[json!([["k", "v"]])]), json!({"k": "v"}));
        assert_eq!(run("get", &[json!({"a": {"b": [5]}}), json!("a.b.0")]), json!(5));
        assert_eq!(run("get", &[json!({}), json!("x.y"), json!("d")]), json!("d"));
    }

    #[test]
    fn test_type_errors() {
        assert!(call("keys", &[json!([1])]).unwrap().is_err());
        assert!(call("unique", &[json!("abc")]).unwrap().is_err());
    }
}
