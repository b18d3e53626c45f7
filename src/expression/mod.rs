//! Embedded expression language.
//!
//! Parameter strings may embed `{{ ... }}` blocks. Each block is tokenized,
//! parsed into an [`Expr`] tree with a restricted grammar and interpreted
//! against a [`Scope`]: there is no code generation, and the only callable
//! things are the allow-listed helpers in `functions`.
//!
//! ```text
//! "Hello {{ $json.name }}"          -> "Hello Ann"
//! "={{ $json.items.length > 2 }}"   -> true
//! "{{ $node[\"Fetch\"].json.id }}"  -> 42
//! ```

pub mod ast;
mod functions;
mod interpreter;
mod lexer;
mod parser;
pub mod query;
mod scope;
mod template;

use serde_json::{Number, Value};
use thiserror::Error;

pub use ast::Expr;
pub use interpreter::evaluate;
pub use parser::parse_expression;
pub use scope::{ItemScope, ItemSource, Scope};
pub use template::{is_expression, render_template, resolve_value};

pub(crate) use functions::{compare_values, is_empty_value, loose_equals, to_display, truthy};

/// Longest expression text accepted by the parser.
pub const MAX_EXPRESSION_LENGTH: usize = 10_000;

/// Nesting limit shared by the parser and the interpreter.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Failure while parsing or evaluating a single expression.
///
/// Callers wrap it into [`crate::Error::Expression`] together with the
/// expression text and item index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// Parse and evaluate a bare expression (without `{{ }}` delimiters).
pub fn evaluate_str(source: &str, scope: &dyn Scope) -> EvalResult<Value> {
    let expr = parse_expression(source)?;
    evaluate(&expr, scope)
}

/// Convert a float into a JSON number, using an integer when it is integral.
pub(crate) fn number_value(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}
