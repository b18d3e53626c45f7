//! Tree-walking evaluation of parsed expressions.

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::{Map, Value};

use super::ast::{BinaryOp, Expr, LogicalOp, UnaryOp};
use super::functions::{
    self, compare_values, loose_equals, method_alias, number, sort_order, strict_equals,
    to_display, to_number, truthy, type_name, HIGHER_ORDER,
};
use super::scope::{ItemSource, Scope};
use super::{EvalError, EvalResult, MAX_NESTING_DEPTH};

/// Evaluate an expression tree against a scope.
pub fn evaluate(expr: &Expr, scope: &dyn Scope) -> EvalResult<Value> {
    let mut interpreter = Interpreter {
        scope,
        locals: Vec::new(),
        depth: 0,
    };
    let value = interpreter.eval(expr)?;
    interpreter.materialize(value)
}

/// Intermediate values. Node references stay symbolic until a property or
/// method picks items out of them.
#[derive(Debug, Clone)]
enum Val {
    Json(Value),
    /// `$node`, waiting for a node name.
    NodeMap,
    /// `$input`, `$("Name")` or `$node["Name"]`.
    Source(ItemSource),
}

struct Interpreter<'s> {
    scope: &'s dyn Scope,
    locals: Vec<HashMap<String, Value>>,
    depth: usize,
}

impl<'s> Interpreter<'s> {
    fn eval(&mut self, expr: &Expr) -> EvalResult<Val> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH * 4 {
            self.depth -= 1;
            return Err(EvalError::new("Expression evaluation is nested too deeply"));
        }
        let result = self.eval_inner(expr);
        self.depth -= 1;
        result
    }

    fn eval_json(&mut self, expr: &Expr) -> EvalResult<Value> {
        let value = self.eval(expr)?;
        self.materialize(value)
    }

    fn eval_inner(&mut self, expr: &Expr) -> EvalResult<Val> {
        match expr {
            Expr::Literal(value) => Ok(Val::Json(value.clone())),
            Expr::Array(elements) => {
                let mut out = Vec::with_capacity(elements.len());
                for element in elements {
                    out.push(self.eval_json(element)?);
                }
                Ok(Val::Json(Value::Array(out)))
            }
            Expr::Object(entries) => {
                let mut out = Map::new();
                for (key, value) in entries {
                    out.insert(key.clone(), self.eval_json(value)?);
                }
                Ok(Val::Json(Value::Object(out)))
            }
            Expr::Ident(name) => self.identifier(name),
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let target = self.eval(object)?;
                if *optional && matches!(target, Val::Json(Value::Null)) {
                    return Ok(Val::Json(Value::Null));
                }
                self.member(target, property)
            }
            Expr::Index {
                object,
                index,
                optional,
            } => {
                let target = self.eval(object)?;
                if *optional && matches!(target, Val::Json(Value::Null)) {
                    return Ok(Val::Json(Value::Null));
                }
                let key = self.eval_json(index)?;
                self.index(target, &key)
            }
            Expr::Call { callee, args } => self.call(callee, args),
            Expr::MethodCall {
                receiver,
                method,
                args,
                optional,
            } => {
                let target = self.eval(receiver)?;
                if *optional && matches!(target, Val::Json(Value::Null)) {
                    return Ok(Val::Json(Value::Null));
                }
                self.method(target, method, args)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval_json(operand)?;
                let result = match op {
                    UnaryOp::Not => Value::Bool(!truthy(&value)),
                    UnaryOp::Negate => number(-to_number(&value)?)?,
                    UnaryOp::Plus => number(to_number(&value)?)?,
                };
                Ok(Val::Json(result))
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval_json(left)?;
                let r = self.eval_json(right)?;
                binary(*op, &l, &r).map(Val::Json)
            }
            Expr::Logical { op, left, right } => {
                let l = self.eval_json(left)?;
                let short_circuit = match op {
                    LogicalOp::And => !truthy(&l),
                    LogicalOp::Or => truthy(&l),
                    LogicalOp::Coalesce => !l.is_null(),
                };
                if short_circuit {
                    Ok(Val::Json(l))
                } else {
                    self.eval(right)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if truthy(&self.eval_json(test)?) {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            Expr::Lambda { .. } => Err(EvalError::new(format!(
                "Arrow functions can only be passed to {}",
                HIGHER_ORDER.join(", ")
            ))),
        }
    }

    fn materialize(&self, value: Val) -> EvalResult<Value> {
        match value {
            Val::Json(value) => Ok(value),
            Val::NodeMap => Err(EvalError::new(
                "$node must be followed by a node name, e.g. $node[\"Name\"].json",
            )),
            Val::Source(source) => Ok(Value::Array(self.items(&source)?.to_vec())),
        }
    }

    fn identifier(&mut self, name: &str) -> EvalResult<Val> {
        for frame in self.locals.iter().rev() {
            if let Some(value) = frame.get(name) {
                return Ok(Val::Json(value.clone()));
            }
        }
        match name {
            "$node" => return Ok(Val::NodeMap),
            "$input" => return Ok(Val::Source(ItemSource::Input)),
            "$prevNode" => {
                return Ok(match self.scope.previous_node() {
                    Some(previous) => Val::Source(ItemSource::Node(previous)),
                    None => Val::Json(Value::Null),
                })
            }
            _ => {}
        }
        match self.scope.variable(name)? {
            Some(value) => Ok(Val::Json(value)),
            None => Err(EvalError::new(format!("Unknown variable '{}'", name))),
        }
    }

    fn node_source(&self, name: &str) -> EvalResult<Val> {
        if self.scope.node_exists(name) {
            Ok(Val::Source(ItemSource::Node(name.to_string())))
        } else {
            Err(EvalError::new(format!(
                "Referenced node '{}' does not exist",
                name
            )))
        }
    }

    fn items(&self, source: &ItemSource) -> EvalResult<Rc<Vec<Value>>> {
        match (self.scope.source_items(source)?, source) {
            (Some(items), _) => Ok(items),
            (None, ItemSource::Input) => Ok(Rc::new(Vec::new())),
            (None, ItemSource::Node(name)) => Err(EvalError::new(format!(
                "Node '{}' has not been executed yet",
                name
            ))),
        }
    }

    /// Item at the current index, falling back to the first item.
    fn current_item(&self, source: &ItemSource) -> EvalResult<Value> {
        let items = self.items(source)?;
        let index = self.scope.item_index();
        Ok(items
            .get(index)
            .or_else(|| items.first())
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn member(&mut self, target: Val, property: &str) -> EvalResult<Val> {
        match target {
            Val::NodeMap => self.node_source(property),
            Val::Source(source) => self.source_member(&source, property).map(Val::Json),
            Val::Json(value) => Ok(Val::Json(json_member(&value, property))),
        }
    }

    fn source_member(&self, source: &ItemSource, property: &str) -> EvalResult<Value> {
        match property {
            "name" => Ok(match source {
                ItemSource::Node(name) => Value::String(name.clone()),
                ItemSource::Input => self
                    .scope
                    .previous_node()
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            }),
            "isExecuted" => Ok(Value::Bool(self.scope.source_items(source)?.is_some())),
            "item" => self.current_item(source),
            "json" | "binary" | "pairedItem" => {
                let item = self.current_item(source)?;
                Ok(item.get(property).cloned().unwrap_or(match property {
                    "pairedItem" => Value::Null,
                    _ => Value::Object(Map::new()),
                }))
            }
            other => Err(EvalError::new(format!(
                "Unknown property '{}' on node data (use json, binary, item, all(), first() or last())",
                other
            ))),
        }
    }

    fn index(&mut self, target: Val, key: &Value) -> EvalResult<Val> {
        match target {
            Val::NodeMap => match key {
                Value::String(name) => self.node_source(name),
                other => Err(EvalError::new(format!(
                    "$node expects a node name but received {}",
                    type_name(other)
                ))),
            },
            Val::Source(source) => match key {
                Value::String(property) => self.source_member(&source, property).map(Val::Json),
                Value::Number(_) => {
                    let items = self.items(&source)?;
                    let index = to_number(key)? as i64;
                    Ok(Val::Json(position(&items, index).cloned().unwrap_or(Value::Null)))
                }
                other => Err(EvalError::new(format!(
                    "Cannot index node data with {}",
                    type_name(other)
                ))),
            },
            Val::Json(value) => Ok(Val::Json(json_index(&value, key)?)),
        }
    }

    fn call(&mut self, callee: &Expr, args: &[Expr]) -> EvalResult<Val> {
        let Expr::Ident(name) = callee else {
            return Err(EvalError::new("Only $-prefixed helper functions can be called"));
        };
        if name == "$" {
            return match args.first() {
                Some(arg) => match self.eval_json(arg)? {
                    Value::String(node) => self.node_source(&node),
                    other => Err(EvalError::new(format!(
                        "$() expects a node name but received {}",
                        type_name(&other)
                    ))),
                },
                None => Err(EvalError::new("$() expects a node name")),
            };
        }
        let Some(helper) = name.strip_prefix('$') else {
            return Err(EvalError::new(format!("'{}' is not a function", name)));
        };
        if HIGHER_ORDER.contains(&helper) && args.iter().skip(1).any(is_lambda) {
            let receiver = match args.first() {
                Some(first) => self.eval_json(first)?,
                None => Value::Null,
            };
            return self.higher_order(helper, receiver, &args[1..]).map(Val::Json);
        }
        let values = self.eval_args(args)?;
        match functions::call(helper, &values) {
            Some(result) => result.map(Val::Json),
            None => Err(EvalError::new(format!("Unknown function '{}'", name))),
        }
    }

    fn method(&mut self, target: Val, method: &str, args: &[Expr]) -> EvalResult<Val> {
        let receiver = match target {
            Val::Source(source) => return self.source_method(&source, method, args),
            Val::NodeMap => {
                return Err(EvalError::new(format!(
                    "Cannot call '{}' on $node; select a node first",
                    method
                )))
            }
            Val::Json(value) => value,
        };
        if HIGHER_ORDER.contains(&method) && args.iter().any(is_lambda) {
            return self.higher_order(method, receiver, args).map(Val::Json);
        }
        let mut values = Vec::with_capacity(args.len() + 1);
        values.push(receiver);
        values.extend(self.eval_args(args)?);
        match functions::call(method_alias(method), &values) {
            Some(result) => result.map(Val::Json),
            None => Err(EvalError::new(format!(
                "Unknown method '{}' on {}",
                method,
                type_name(&values[0])
            ))),
        }
    }

    fn source_method(&mut self, source: &ItemSource, method: &str, args: &[Expr]) -> EvalResult<Val> {
        let items = self.items(source)?;
        let value = match method {
            "all" => Value::Array(items.to_vec()),
            "first" => items.first().cloned().unwrap_or(Value::Null),
            "last" => items.last().cloned().unwrap_or(Value::Null),
            "itemMatching" => {
                let index = match args.first() {
                    Some(arg) => to_number(&self.eval_json(arg)?)? as i64,
                    None => self.scope.item_index() as i64,
                };
                position(&items, index).cloned().unwrap_or(Value::Null)
            }
            other => {
                return Err(EvalError::new(format!(
                    "Unknown method '{}' on node data (use all(), first(), last() or itemMatching())",
                    other
                )))
            }
        };
        Ok(Val::Json(value))
    }

    fn eval_args(&mut self, args: &[Expr]) -> EvalResult<Vec<Value>> {
        args.iter().map(|arg| self.eval_json(arg)).collect()
    }

    fn call_lambda(&mut self, params: &[String], body: &Expr, values: Vec<Value>) -> EvalResult<Value> {
        let frame: HashMap<String, Value> = params
            .iter()
            .cloned()
            .zip(values.into_iter().chain(std::iter::repeat(Value::Null)))
            .collect();
        self.locals.push(frame);
        let result = self.eval_json(body);
        self.locals.pop();
        result
    }

    fn higher_order(&mut self, name: &str, receiver: Value, args: &[Expr]) -> EvalResult<Value> {
        let items = match receiver {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(EvalError::new(format!(
                    "{}() expects an array but received {}",
                    name,
                    type_name(&other)
                )))
            }
        };
        let Some(Expr::Lambda { params, body }) = args.first() else {
            return Err(EvalError::new(format!(
                "{}() expects an arrow function as its first argument",
                name
            )));
        };

        match name {
            "filter" => {
                let mut out = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    if truthy(&self.call_lambda(params, body, vec![item.clone(), Value::from(i)])?) {
                        out.push(item);
                    }
                }
                Ok(Value::Array(out))
            }
            "map" => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    out.push(self.call_lambda(params, body, vec![item, Value::from(i)])?);
                }
                Ok(Value::Array(out))
            }
            "find" | "findIndex" => {
                for (i, item) in items.into_iter().enumerate() {
                    if truthy(&self.call_lambda(params, body, vec![item.clone(), Value::from(i)])?) {
                        return Ok(if name == "find" { item } else { Value::from(i) });
                    }
                }
                Ok(if name == "find" { Value::Null } else { Value::from(-1) })
            }
            "some" | "every" => {
                let want = name == "some";
                for (i, item) in items.into_iter().enumerate() {
                    if truthy(&self.call_lambda(params, body, vec![item, Value::from(i)])?) == want {
                        return Ok(Value::Bool(want));
                    }
                }
                Ok(Value::Bool(!want))
            }
            "reduce" => {
                let mut iter = items.into_iter().enumerate();
                let mut acc = match args.get(1) {
                    Some(init) => self.eval_json(init)?,
                    None => match iter.next() {
                        Some((_, first)) => first,
                        None => {
                            return Err(EvalError::new(
                                "reduce() of an empty array needs an initial value",
                            ))
                        }
                    },
                };
                for (i, item) in iter {
                    acc = self.call_lambda(params, body, vec![acc, item, Value::from(i)])?;
                }
                Ok(acc)
            }
            "sort" | "sortBy" => {
                let descending = match args.get(1) {
                    Some(direction) => to_display(&self.eval_json(direction)?).eq_ignore_ascii_case("desc"),
                    None => false,
                };
                let mut sorted = if params.len() >= 2 {
                    self.merge_sort(items, &mut |this, a, b| {
                        let result = this.call_lambda(params, body, vec![a.clone(), b.clone()])?;
                        Ok(to_number(&result)? > 0.0)
                    })?
                } else {
                    let mut keyed = Vec::with_capacity(items.len());
                    for item in items {
                        let key = self.call_lambda(params, body, vec![item.clone()])?;
                        keyed.push(Value::Array(vec![key, item]));
                    }
                    self.merge_sort(keyed, &mut |_, a, b| {
                        Ok(sort_order(&a[0], &b[0]) == std::cmp::Ordering::Greater)
                    })?
                    .into_iter()
                    .filter_map(|pair| match pair {
                        Value::Array(mut pair) if pair.len() == 2 => pair.pop(),
                        _ => None,
                    })
                    .collect()
                };
                if descending {
                    sorted.reverse();
                }
                Ok(Value::Array(sorted))
            }
            other => Err(EvalError::new(format!("{}() does not take an arrow function", other))),
        }
    }

    /// Stable merge sort with a fallible "a goes after b" predicate.
    fn merge_sort(
        &mut self,
        items: Vec<Value>,
        after: &mut dyn FnMut(&mut Self, &Value, &Value) -> EvalResult<bool>,
    ) -> EvalResult<Vec<Value>> {
        if items.len() <= 1 {
            return Ok(items);
        }
        let mut left = items;
        let right = left.split_off(left.len() / 2);
        let left = self.merge_sort(left, after)?;
        let right = self.merge_sort(right, after)?;

        let mut out = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
            if after(self, l, r)? {
                out.extend(right.next());
            } else {
                out.extend(left.next());
            }
        }
        out.extend(left);
        out.extend(right);
        Ok(out)
    }
}

fn is_lambda(expr: &Expr) -> bool {
    matches!(expr, Expr::Lambda { .. })
}

fn position(items: &[Value], index: i64) -> Option<&Value> {
    let resolved = if index < 0 {
        items.len() as i64 + index
    } else {
        index
    };
    usize::try_from(resolved).ok().and_then(|i| items.get(i))
}

fn json_member(value: &Value, property: &str) -> Value {
    match value {
        Value::Object(map) => map.get(property).cloned().unwrap_or(Value::Null),
        Value::Array(items) if property == "length" => Value::from(items.len()),
        Value::String(s) if property == "length" => Value::from(s.chars().count()),
        _ => Value::Null,
    }
}

fn json_index(value: &Value, key: &Value) -> EvalResult<Value> {
    Ok(match (value, key) {
        (Value::Array(items), Value::Number(_)) => {
            let index = to_number(key)?;
            if index.fract() != 0.0 || index < 0.0 {
                Value::Null
            } else {
                items.get(index as usize).cloned().unwrap_or(Value::Null)
            }
        }
        (Value::String(s), Value::Number(_)) => {
            let index = to_number(key)?;
            if index.fract() != 0.0 || index < 0.0 {
                Value::Null
            } else {
                s.chars()
                    .nth(index as usize)
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or(Value::Null)
            }
        }
        (Value::Null, _) => Value::Null,
        (other, key) => json_member(other, &to_display(key)),
    })
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> EvalResult<Value> {
    let compare = |pred: fn(std::cmp::Ordering) -> bool| {
        Value::Bool(compare_values(l, r).map(pred).unwrap_or(false))
    };
    Ok(match op {
        BinaryOp::Add => {
            let concatenates = |v: &Value| matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_));
            if concatenates(l) || concatenates(r) {
                Value::String(format!("{}{}", to_display(l), to_display(r)))
            } else {
                number(to_number(l)? + to_number(r)?)?
            }
        }
        BinaryOp::Sub => number(to_number(l)? - to_number(r)?)?,
        BinaryOp::Mul => number(to_number(l)? * to_number(r)?)?,
        BinaryOp::Div | BinaryOp::Mod => {
            let divisor = to_number(r)?;
            if divisor == 0.0 {
                return Err(EvalError::new("Division by zero"));
            }
            let dividend = to_number(l)?;
            number(if op == BinaryOp::Div {
                dividend / divisor
            } else {
                dividend % divisor
            })?
        }
        BinaryOp::Lt => compare(|o| o.is_lt()),
        BinaryOp::Le => compare(|o| o.is_le()),
        BinaryOp::Gt => compare(|o| o.is_gt()),
        BinaryOp::Ge => compare(|o| o.is_ge()),
        BinaryOp::LooseEq => Value::Bool(loose_equals(l, r)),
        BinaryOp::LooseNe => Value::Bool(!loose_equals(l, r)),
        BinaryOp::StrictEq => Value::Bool(strict_equals(l, r)),
        BinaryOp::StrictNe => Value::Bool(!strict_equals(l, r)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{evaluate_str, ItemScope};
    use crate::workflow::Item;
    use serde_json::json;

    fn eval(source: &str, scope: &ItemScope) -> EvalResult<Value> {
        evaluate_str(source, scope)
    }

    fn scope() -> ItemScope {
        ItemScope::new(&[
            Item::from_value(json!({"name": "Ann", "age": 31, "tags": ["a", "b"]})),
            Item::from_value(json!({"name": "Bob", "age": 17, "tags": []})),
        ])
        .with_node_output(
            "Fetch",
            &[Item::from_value(json!({"id": 42})), Item::from_value(json!({"id": 43}))],
        )
    }

    #[test]
    fn test_arithmetic_and_strings() {
        let s = scope();
        assert_eq!(eval("1 + 1", &s).unwrap(), json!(2));
        assert_eq!(eval("7 % 4 * 2", &s).unwrap(), json!(6));
        assert_eq!(eval("10 / 4", &s).unwrap(), json!(2.5));
        assert_eq!(eval("'n' + 1", &s).unwrap(), json!("n1"));
        assert_eq!(eval("-'3'", &s).unwrap(), json!(-3));
        assert!(eval("1 / 0", &s).unwrap_err().message.contains("Division by zero"));

        // Anything the parser accepts stays within the evaluation depth limit.
        let chain = vec!["1"; 60].join(" + ");
        assert_eq!(eval(&chain, &s).unwrap(), json!(60));
    }

    #[test]
    fn test_comparisons_and_logic() {
        let s = scope();
        assert_eq!(eval("$json.age >= 18 && $json.name == 'Ann'", &s).unwrap(), json!(true));
        assert_eq!(eval("1 == '1'", &s).unwrap(), json!(true));
        assert_eq!(eval("1 === '1'", &s).unwrap(), json!(false));
        assert_eq!(eval("$json.missing ?? 'fallback'", &s).unwrap(), json!("fallback"));
        assert_eq!(eval("'' || 'x'", &s).unwrap(), json!("x"));
        assert_eq!(eval("$json.age > 30 ? 'old' : 'young'", &s).unwrap(), json!("old"));
        assert_eq!(eval("{} < 1", &s).unwrap(), json!(false));
    }

    #[test]
    fn test_member_access() {
        let s = scope();
        assert_eq!(eval("$json.name", &s).unwrap(), json!("Ann"));
        assert_eq!(eval("$json['tags'][1]", &s).unwrap(), json!("b"));
        assert_eq!(eval("$json.tags.length", &s).unwrap(), json!(2));
        assert_eq!(eval("$json.nope?.deeper", &s).unwrap(), json!(null));
        assert_eq!(eval("$json.name.length", &s).unwrap(), json!(3));
    }

    #[test]
    fn test_item_index_changes_current_item() {
        let s = scope().with_item_index(1);
        assert_eq!(eval("$json.name", &s).unwrap(), json!("Bob"));
        assert_eq!(eval("$itemIndex", &s).unwrap(), json!(1));
    }

    #[test]
    fn test_node_references() {
        let s = scope().with_item_index(1);
        assert_eq!(eval("$node[\"Fetch\"].json.id", &s).unwrap(), json!(43));
        assert_eq!(eval("$node.Fetch.json.id", &s).unwrap(), json!(43));
        assert_eq!(eval("$('Fetch').first().json.id", &s).unwrap(), json!(42));
        assert_eq!(eval("$('Fetch').all().length", &s).unwrap(), json!(2));
        assert_eq!(eval("$('Fetch').last().json.id", &s).unwrap(), json!(43));
        assert_eq!(eval("$input.all()[0].json.name", &s).unwrap(), json!("Ann"));
        assert_eq!(eval("$input.item.json.name", &s).unwrap(), json!("Bob"));

        let err = eval("$node[\"Missing\"].json", &s).unwrap_err();
        assert_eq!(err.message, "Referenced node 'Missing' does not exist");
    }

    #[test]
    fn test_methods_and_helpers() {
        let s = scope();
        assert_eq!(eval("$json.name.toUpperCase()", &s).unwrap(), json!("ANN"));
        assert_eq!(eval("$upper($json.name)", &s).unwrap(), json!("ANN"));
        assert_eq!(eval("$json.tags.join('-')", &s).unwrap(), json!("a-b"));
        assert_eq!(eval("'a-b-c'.replace('-', '+')", &s).unwrap(), json!("a+b-c"));
        assert_eq!(eval("$round(2.346, 2)", &s).unwrap(), json!(2.35));
        assert!(eval("$nope(1)", &s).unwrap_err().message.contains("Unknown function"));
        assert!(eval("$json.name.explode()", &s).unwrap_err().message.contains("Unknown method"));
    }

    #[test]
    fn test_higher_order_helpers() {
        let s = scope();
        assert_eq!(eval("[1, 2, 3, 4].filter(x => x % 2 == 0)", &s).unwrap(), json!([2, 4]));
        assert_eq!(eval("[1, 2, 3].map((x, i) => x * 10 + i)", &s).unwrap(), json!([10, 21, 32]));
        assert_eq!(eval("[1, 2, 3].reduce((acc, x) => acc + x, 0)", &s).unwrap(), json!(6));
        assert_eq!(eval("[5, 7].find(x => x > 5)", &s).unwrap(), json!(7));
        assert_eq!(eval("[5, 7].findIndex(x => x > 9)", &s).unwrap(), json!(-1));
        assert_eq!(eval("[1, 2].some(x => x > 1)", &s).unwrap(), json!(true));
        assert_eq!(eval("[1, 2].every(x => x > 1)", &s).unwrap(), json!(false));
        assert_eq!(eval("[3, 1, 2].sort((a, b) => b - a)", &s).unwrap(), json!([3, 2, 1]));
        assert_eq!(
            eval("$input.all().sortBy(i => i.json.age).map(i => i.json.name)", &s).unwrap(),
            json!(["Bob", "Ann"])
        );
        assert_eq!(eval("$filter([1, 2, 3], x => x > 1)", &s).unwrap(), json!([2, 3]));
        assert!(eval("x => x", &s).is_err());
    }

    #[test]
    fn test_unknown_variable() {
        let err = eval("$nothing", &scope()).unwrap_err();
        assert_eq!(err.message, "Unknown variable '$nothing'");
    }

    #[test]
    fn test_custom_variables() {
        let s = scope().with_variable("$vars", json!({"region": "eu"}));
        assert_eq!(eval("$vars.region", &s).unwrap(), json!("eu"));
    }
}
