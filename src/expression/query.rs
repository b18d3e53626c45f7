//! JMESPath-style structured queries for `$jmespath(value, query)`.
//!
//! Supported subset:
//!
//! - field paths: `a.b.c`, quoted fields `"odd key"`
//! - indices: `a[0]`, `a[-1]`
//! - projections: `a[*].b`, `*.b` over object values
//! - filters: `a[?price > `10` && inStock]`, operands are paths, `@`,
//!   `'raw strings'`, `` `json literals` `` or bare numbers
//! - pipes: `a[*].b | [0]`

use std::cmp::Ordering;

use serde_json::Value;

use super::functions::{compare_values, strict_equals, truthy};
use super::{EvalError, EvalResult};

/// Evaluate `query` against `data`.
pub fn search(data: &Value, query: &str) -> EvalResult<Value> {
    let pipeline = parse(query)?;
    let mut current = data.clone();
    for steps in &pipeline {
        current = apply(steps, &current);
    }
    Ok(current)
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Field(String),
    Index(i64),
    Current,
    /// `[*]` over an array
    Project,
    /// `*` over object values
    ProjectValues,
    Filter(Condition),
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Compare(Operand, CmpOp, Operand),
    Truthy(Operand),
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Path(Vec<Step>),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn apply(steps: &[Step], value: &Value) -> Value {
    let Some((step, rest)) = steps.split_first() else {
        return value.clone();
    };
    match step {
        Step::Current => apply(rest, value),
        Step::Field(name) => match value.get(name.as_str()) {
            Some(inner) if value.is_object() => apply(rest, inner),
            _ => Value::Null,
        },
        Step::Index(index) => match value {
            Value::Array(items) => {
                let resolved = if *index < 0 {
                    items.len() as i64 + index
                } else {
                    *index
                };
                match usize::try_from(resolved).ok().and_then(|i| items.get(i)) {
                    Some(inner) => apply(rest, inner),
                    None => Value::Null,
                }
            }
            _ => Value::Null,
        },
        Step::Project => match value {
            Value::Array(items) => project(rest, items.iter()),
            _ => Value::Null,
        },
        Step::ProjectValues => match value {
            Value::Object(map) => project(rest, map.values()),
            _ => Value::Null,
        },
        Step::Filter(condition) => match value {
            Value::Array(items) => project(rest, items.iter().filter(|item| test(condition, item))),
            _ => Value::Null,
        },
    }
}

/// Apply the remaining steps to each element, dropping nulls.
fn project<'a>(rest: &[Step], items: impl Iterator<Item = &'a Value>) -> Value {
    Value::Array(
        items
            .map(|item| apply(rest, item))
            .filter(|v| !v.is_null())
            .collect(),
    )
}

fn resolve(operand: &Operand, item: &Value) -> Value {
    match operand {
        Operand::Path(steps) => apply(steps, item),
        Operand::Literal(value) => value.clone(),
    }
}

fn test(condition: &Condition, item: &Value) -> bool {
    match condition {
        Condition::Truthy(operand) => {
            let value = resolve(operand, item);
            // JMESPath falsiness: empty containers are false too.
            truthy(&value) && value != Value::Array(vec![]) && value != Value::Object(Default::default())
        }
        Condition::Not(inner) => !test(inner, item),
        Condition::And(a, b) => test(a, item) && test(b, item),
        Condition::Or(a, b) => test(a, item) || test(b, item),
        Condition::Compare(left, op, right) => {
            let (l, r) = (resolve(left, item), resolve(right, item));
            match op {
                CmpOp::Eq => strict_equals(&l, &r),
                CmpOp::Ne => !strict_equals(&l, &r),
                _ => {
                    if !(l.is_number() && r.is_number()) && !(l.is_string() && r.is_string()) {
                        return false;
                    }
                    match compare_values(&l, &r) {
                        Some(ord) => match op {
                            CmpOp::Lt => ord == Ordering::Less,
                            CmpOp::Le => ord != Ordering::Greater,
                            CmpOp::Gt => ord == Ordering::Greater,
                            CmpOp::Ge => ord != Ordering::Less,
                            CmpOp::Eq | CmpOp::Ne => false,
                        },
                        None => false,
                    }
                }
            }
        }
    }
}

struct QueryParser<'a> {
    chars: Vec<char>,
    pos: usize,
    source: &'a str,
}

fn parse(query: &str) -> EvalResult<Vec<Vec<Step>>> {
    let mut parser = QueryParser {
        chars: query.chars().collect(),
        pos: 0,
        source: query,
    };
    let mut pipeline = vec![parser.path(false)?];
    loop {
        parser.skip_ws();
        if parser.eat('|') && !parser.peek_is('|') {
            pipeline.push(parser.path(false)?);
        } else if parser.pos >= parser.chars.len() {
            return Ok(pipeline);
        } else {
            return Err(parser.error("unexpected character"));
        }
    }
}

impl<'a> QueryParser<'a> {
    fn error(&self, message: &str) -> EvalError {
        EvalError::new(format!(
            "$jmespath: {} at position {} in '{}'",
            message, self.pos, self.source
        ))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_is(&self, c: char) -> bool {
        self.peek() == Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek_is(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().map(char::is_whitespace).unwrap_or(false) {
            self.pos += 1;
        }
    }

    /// A dotted path. Inside filters, stops at operators and `]`.
    fn path(&mut self, in_filter: bool) -> EvalResult<Vec<Step>> {
        let mut steps = Vec::new();
        self.skip_ws();
        let mut expect_segment = true;
        loop {
            match self.peek() {
                Some('[') => {
                    self.pos += 1;
                    steps.push(self.bracket()?);
                    expect_segment = false;
                }
                Some('.') if !expect_segment => {
                    self.pos += 1;
                    expect_segment = true;
                }
                Some('@') if expect_segment => {
                    self.pos += 1;
                    steps.push(Step::Current);
                    expect_segment = false;
                }
                Some('*') if expect_segment => {
                    self.pos += 1;
                    steps.push(Step::ProjectValues);
                    expect_segment = false;
                }
                Some('"') if expect_segment => {
                    steps.push(Step::Field(self.quoted('"')?));
                    expect_segment = false;
                }
                Some(c) if expect_segment && (c.is_alphanumeric() || c == '_') => {
                    let start = self.pos;
                    while self
                        .peek()
                        .map(|c| c.is_alphanumeric() || c == '_' || c == '-' && !in_filter)
                        .unwrap_or(false)
                    {
                        self.pos += 1;
                    }
                    steps.push(Step::Field(self.chars[start..self.pos].iter().collect()));
                    expect_segment = false;
                }
                _ => break,
            }
        }
        if steps.is_empty() {
            return Err(self.error("expected a path"));
        }
        if expect_segment {
            return Err(self.error("path ends with '.'"));
        }
        Ok(steps)
    }

    fn bracket(&mut self) -> EvalResult<Step> {
        self.skip_ws();
        let step = if self.eat('*') {
            Step::Project
        } else if self.eat('?') {
            Step::Filter(self.condition()?)
        } else if self.peek_is(']') {
            // `[]` flattens in full JMESPath; treated as a projection here.
            Step::Project
        } else {
            let start = self.pos;
            if self.peek_is('-') {
                self.pos += 1;
            }
            while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                self.pos += 1;
            }
            let text: String = self.chars[start..self.pos].iter().collect();
            let index = text
                .parse::<i64>()
                .map_err(|_| self.error("expected an index, '*' or '?'"))?;
            Step::Index(index)
        };
        self.skip_ws();
        if !self.eat(']') {
            return Err(self.error("expected ']'"));
        }
        Ok(step)
    }

    fn condition(&mut self) -> EvalResult<Condition> {
        let mut left = self.conjunction()?;
        loop {
            self.skip_ws();
            if self.starts_with("||") {
                self.pos += 2;
                let right = self.conjunction()?;
                left = Condition::Or(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn conjunction(&mut self) -> EvalResult<Condition> {
        let mut left = self.comparison()?;
        loop {
            self.skip_ws();
            if self.starts_with("&&") {
                self.pos += 2;
                let right = self.comparison()?;
                left = Condition::And(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn comparison(&mut self) -> EvalResult<Condition> {
        self.skip_ws();
        if self.eat('!') {
            let inner = self.comparison()?;
            return Ok(Condition::Not(Box::new(inner)));
        }
        if self.eat('(') {
            let inner = self.condition()?;
            self.skip_ws();
            if !self.eat(')') {
                return Err(self.error("expected ')'"));
            }
            return Ok(inner);
        }
        let left = self.operand()?;
        self.skip_ws();
        let op = if self.starts_with("==") {
            Some((CmpOp::Eq, 2))
        } else if self.starts_with("!=") {
            Some((CmpOp::Ne, 2))
        } else if self.starts_with("<=") {
            Some((CmpOp::Le, 2))
        } else if self.starts_with(">=") {
            Some((CmpOp::Ge, 2))
        } else if self.starts_with("<") {
            Some((CmpOp::Lt, 1))
        } else if self.starts_with(">") {
            Some((CmpOp::Gt, 1))
        } else {
            None
        };
        match op {
            Some((op, width)) => {
                self.pos += width;
                let right = self.operand()?;
                Ok(Condition::Compare(left, op, right))
            }
            None => Ok(Condition::Truthy(left)),
        }
    }

    fn operand(&mut self) -> EvalResult<Operand> {
        self.skip_ws();
        match self.peek() {
            Some('\'') => Ok(Operand::Literal(Value::String(self.quoted('\'')?))),
            Some('`') => {
                let raw = self.quoted('`')?;
                let value = serde_json::from_str(&raw)
                    .unwrap_or_else(|_| Value::String(raw.clone()));
                Ok(Operand::Literal(value))
            }
            Some(c) if c.is_ascii_digit() || c == '-' => {
                let start = self.pos;
                self.pos += 1;
                while self
                    .peek()
                    .map(|c| c.is_ascii_digit() || c == '.')
                    .unwrap_or(false)
                {
                    self.pos += 1;
                }
                let text: String = self.chars[start..self.pos].iter().collect();
                let number: f64 = text.parse().map_err(|_| self.error("invalid number"))?;
                Ok(Operand::Literal(super::number_value(number)))
            }
            _ => Ok(Operand::Path(self.path(true)?)),
        }
    }

    fn quoted(&mut self, quote: char) -> EvalResult<String> {
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == '\\' {
                if let Some(next) = self.peek() {
                    out.push(next);
                    self.pos += 1;
                }
                continue;
            }
            if c == quote {
                return Ok(out);
            }
            out.push(c);
        }
        Err(self.error("unterminated literal"))
    }

    fn starts_with(&self, text: &str) -> bool {
        let mut pos = self.pos;
        for expected in text.chars() {
            if self.chars.get(pos) != Some(&expected) {
                return false;
            }
            pos += 1;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> Value {
        json!({
            "store": {
                "items": [
                    {"name": "apple", "price": 3, "tags": ["fruit"]},
                    {"name": "bread", "price": 12, "inStock": true},
                    {"name": "cheese", "price": 25, "inStock": false}
                ],
                "owner": {"first name": "Ann"}
            }
        })
    }

    #[test]
    fn test_field_paths_and_indices() {
        assert_eq!(search(&data(), "store.items[0].name").unwrap(), json!("apple"));
        assert_eq!(search(&data(), "store.items[-1].price").unwrap(), json!(25));
        assert_eq!(search(&data(), "store.owner.\"first name\"").unwrap(), json!("Ann"));
        assert_eq!(search(&data(), "store.missing.deep").unwrap(), json!(null));
    }

    #[test]
    fn test_projections() {
        assert_eq!(
            search(&data(), "store.items[*].name").unwrap(),
            json!(["apple", "bread", "cheese"])
        );
        assert_eq!(search(&data(), "store.items[*].inStock").unwrap(), json!([true, false]));
        assert_eq!(search(&json!({"a": {"x": 1}, "b": {"x": 2}}), "*.x").unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_filters() {
        assert_eq!(
            search(&data(), "store.items[?price > `10`].name").unwrap(),
            json!(["bread", "cheese"])
        );
        assert_eq!(
            search(&data(), "store.items[?price > `10` && inStock].name").unwrap(),
            json!(["bread"])
        );
        assert_eq!(
            search(&data(), "store.items[?name == 'apple' || price >= 25].name").unwrap(),
            json!(["apple", "cheese"])
        );
        assert_eq!(
            search(&data(), "store.items[?!inStock].name").unwrap(),
            json!(["apple", "cheese"])
        );
    }

    #[test]
    fn test_pipes() {
        assert_eq!(
            search(&data(), "store.items[*].name | [0]").unwrap(),
            json!("apple")
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert!(search(&data(), "store.").is_err());
        assert!(search(&data(), "store.items[?price >").is_err());
        assert!(search(&data(), "store.items[x]").is_err());
    }
}
