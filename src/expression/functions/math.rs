//! Numeric helpers.

use rand::Rng;
use serde_json::Value;

use super::{arg, array_arg, num_arg, number, opt_num_arg, to_number};
use crate::expression::{EvalError, EvalResult};

pub(super) fn call(name: &str, args: &[Value]) -> Option<EvalResult<Value>> {
    let result = match name {
        "round" => round(args),
        "floor" => num_arg(args, 0, name).and_then(|n| number(n.floor())),
        "ceil" => num_arg(args, 0, name).and_then(|n| number(n.ceil())),
        "abs" => num_arg(args, 0, name).and_then(|n| number(n.abs())),
        "sqrt" => num_arg(args, 0, name).and_then(|n| number(n.sqrt())),
        "pow" => num_arg(args, 0, name)
            .and_then(|base| num_arg(args, 1, name).and_then(|exp| number(base.powf(exp)))),
        "min" => extreme(name, args, f64::min),
        "max" => extreme(name, args, f64::max),
        "sum" => numbers(name, args).and_then(|ns| number(ns.iter().sum())),
        "average" | "avg" => numbers(name, args).and_then(|ns| {
            if ns.is_empty() {
                Ok(Value::Null)
            } else {
                number(ns.iter().sum::<f64>() / ns.len() as f64)
            }
        }),
        "toFixed" => to_fixed(args),
        "random" => number(rand::thread_rng().gen::<f64>()),
        "randomInt" => random_int(args),
        _ => return None,
    };
    Some(result)
}

fn round(args: &[Value]) -> EvalResult<Value> {
    let value = num_arg(args, 0, "round")?;
    let decimals = opt_num_arg(args, 1, "round")?.unwrap_or(0.0).clamp(0.0, 15.0) as i32;
    let factor = 10f64.powi(decimals);
    number((value * factor).round() / factor)
}

fn to_fixed(args: &[Value]) -> EvalResult<Value> {
    let value = num_arg(args, 0, "toFixed")?;
    let decimals = opt_num_arg(args, 1, "toFixed")?.unwrap_or(0.0).clamp(0.0, 20.0) as usize;
    Ok(Value::String(format!("{:.*}", decimals, value)))
}

/// Numbers from either a single array argument or the argument list itself.
fn numbers(function: &str, args: &[Value]) -> EvalResult<Vec<f64>> {
    let values = match (args.len(), arg(args, 0)) {
        (1, Value::Array(_)) => array_arg(args, 0, function)?,
        _ => args.to_vec(),
    };
    values
        .iter()
        .map(|v| to_number(v).map_err(|e| EvalError::new(format!("${}: {}", function, e))))
        .collect()
}

fn extreme(function: &str, args: &[Value], pick: fn(f64, f64) -> f64) -> EvalResult<Value> {
    let values = numbers(function, args)?;
    match values.into_iter().reduce(pick) {
        Some(n) => number(n),
        None => Ok(Value::Null),
    }
}

fn random_int(args: &[Value]) -> EvalResult<Value> {
    let low = num_arg(args, 0, "randomInt")?.ceil() as i64;
    let high = num_arg(args, 1, "randomInt")?.floor() as i64;
    if high < low {
        return Err(EvalError::new(format!(
            "$randomInt: max ({}) is lower than min ({})",
            high, low
        )));
    }
    Ok(Value::from(rand::thread_rng().gen_range(low..=high)))
}
