//! Encoding, hashing, date and query helpers.

use std::fmt::Write as _;

use base64::Engine as _;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

use super::{arg, num_arg, str_arg, to_display};
use crate::expression::query;
use crate::expression::{EvalError, EvalResult};

pub(super) fn call(name: &str, args: &[Value]) -> Option<EvalResult<Value>> {
    let result = match name {
        "jsonParse" => json_parse(args),
        "jsonStringify" => json_stringify(args),
        "urlEncode" | "encodeURIComponent" => {
            Ok(Value::String(urlencoding::encode(&str_arg(args, 0)).into_owned()))
        }
        "urlDecode" | "decodeURIComponent" => urlencoding::decode(&str_arg(args, 0))
            .map(|s| Value::String(s.into_owned()))
            .map_err(|e| EvalError::new(format!("$urlDecode: {}", e))),
        "htmlEncode" | "escapeHtml" => Ok(Value::String(html_encode(&str_arg(args, 0)))),
        "htmlDecode" | "unescapeHtml" => Ok(Value::String(html_decode(&str_arg(args, 0)))),
        "base64Encode" => Ok(Value::String(
            base64::engine::general_purpose::STANDARD.encode(str_arg(args, 0)),
        )),
        "base64Decode" => base64_decode(args),
        "hash" => hash(args),
        "toDate" => parse_date(arg(args, 0), "toDate").map(|dt| Value::String(rfc3339(&dt))),
        "formatDate" => format_date(args),
        "dateAdd" => date_add(args),
        "jmespath" => query::search(arg(args, 0), &str_arg(args, 1)),
        _ => return None,
    };
    Some(result)
}

fn json_parse(args: &[Value]) -> EvalResult<Value> {
    match arg(args, 0) {
        Value::String(text) => serde_json::from_str(text)
            .map_err(|e| EvalError::new(format!("$jsonParse: invalid JSON: {}", e))),
        other => Ok(other.clone()),
    }
}

fn json_stringify(args: &[Value]) -> EvalResult<Value> {
    let value = arg(args, 0);
    let pretty = super::truthy(arg(args, 1));
    let text = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    text.map(Value::String)
        .map_err(|e| EvalError::new(format!("$jsonStringify: {}", e)))
}

fn html_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn html_decode(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

fn base64_decode(args: &[Value]) -> EvalResult<Value> {
    let input = str_arg(args, 0);
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(input.trim())
        .map_err(|e| EvalError::new(format!("$base64Decode: {}", e)))?;
    String::from_utf8(bytes)
        .map(Value::String)
        .map_err(|_| EvalError::new("$base64Decode: decoded data is not valid UTF-8"))
}

/// `$hash(value, algorithm = "sha256")` as lowercase hex.
fn hash(args: &[Value]) -> EvalResult<Value> {
    let input = match arg(args, 0) {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let algorithm = match arg(args, 1) {
        Value::Null => "sha256".to_string(),
        other => to_display(other).to_ascii_lowercase(),
    };
    let digest = match algorithm.as_str() {
        "md5" => format!("{:x}", md5::compute(input.as_bytes())),
        "sha1" => hex::encode(ring::digest::digest(
            &ring::digest::SHA1_FOR_LEGACY_USE_ONLY,
            input.as_bytes(),
        )),
        "sha256" => hex::encode(ring::digest::digest(&ring::digest::SHA256, input.as_bytes())),
        "sha384" => hex::encode(ring::digest::digest(&ring::digest::SHA384, input.as_bytes())),
        "sha512" => hex::encode(ring::digest::digest(&ring::digest::SHA512, input.as_bytes())),
        other => {
            return Err(EvalError::new(format!(
                "$hash: unsupported algorithm '{}' (use md5, sha1, sha256, sha384 or sha512)",
                other
            )))
        }
    };
    Ok(Value::String(digest))
}

fn rfc3339(dt: &DateTime<FixedOffset>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accepts RFC 3339 strings, `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, or epoch milliseconds.
fn parse_date(value: &Value, function: &str) -> EvalResult<DateTime<FixedOffset>> {
    let utc = FixedOffset::east_opt(0).ok_or_else(|| EvalError::new("invalid offset"))?;
    match value {
        Value::String(text) => {
            let text = text.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                return Ok(dt);
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
                return Ok(utc.from_utc_datetime(&naive));
            }
            if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
                if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                    return Ok(utc.from_utc_datetime(&naive));
                }
            }
            Err(EvalError::new(format!(
                "${}: cannot parse '{}' as a date",
                function, text
            )))
        }
        Value::Number(n) => {
            let millis = n.as_f64().unwrap_or(0.0) as i64;
            Utc.timestamp_millis_opt(millis)
                .single()
                .map(|dt| dt.fixed_offset())
                .ok_or_else(|| EvalError::new(format!("${}: timestamp out of range", function)))
        }
        other => Err(EvalError::new(format!(
            "${} expects a date string or timestamp but received {}",
            function,
            super::type_name(other)
        ))),
    }
}

/// `$formatDate(date, format = "%Y-%m-%d")` using strftime specifiers.
fn format_date(args: &[Value]) -> EvalResult<Value> {
    let dt = parse_date(arg(args, 0), "formatDate")?;
    let format = match arg(args, 1) {
        Value::Null => "%Y-%m-%d".to_string(),
        other => to_display(other),
    };
    if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
        return Err(EvalError::new(format!(
            "$formatDate: invalid format string '{}'",
            format
        )));
    }
    let mut out = String::new();
    write!(out, "{}", dt.format(&format))
        .map_err(|_| EvalError::new("$formatDate: formatting failed"))?;
    Ok(Value::String(out))
}

/// `$dateAdd(date, amount, unit)`; unit is seconds..years, singular or plural.
fn date_add(args: &[Value]) -> EvalResult<Value> {
    let dt = parse_date(arg(args, 0), "dateAdd")?;
    let amount = num_arg(args, 1, "dateAdd")?.trunc() as i64;
    let unit = str_arg(args, 2).to_ascii_lowercase();
    let unit = unit.trim_end_matches('s');

    let delta = match unit {
        "millisecond" => Duration::try_milliseconds(amount),
        "second" => Duration::try_seconds(amount),
        "minute" => Duration::try_minutes(amount),
        "hour" => Duration::try_hours(amount),
        "day" => Duration::try_days(amount),
        "week" => Duration::try_weeks(amount),
        _ => None,
    };
    let shifted = match unit {
        "millisecond" | "second" | "minute" | "hour" | "day" | "week" => {
            delta.and_then(|d| dt.checked_add_signed(d))
        }
        "month" | "year" => {
            let months = if unit == "year" {
                amount
                    .checked_mul(12)
                    .ok_or_else(|| EvalError::new("$dateAdd: amount out of range"))?
            } else {
                amount
            };
            let delta = u32::try_from(months.unsigned_abs())
                .map(Months::new)
                .map_err(|_| EvalError::new("$dateAdd: amount out of range"))?;
            if months >= 0 {
                dt.checked_add_months(delta)
            } else {
                dt.checked_sub_months(delta)
            }
        }
        other => {
            return Err(EvalError::new(format!(
                "$dateAdd: unknown unit '{}'",
                other
            )))
        }
    };
    shifted
        .map(|dt| Value::String(rfc3339(&dt)))
        .ok_or_else(|| EvalError::new("$dateAdd: resulting date is out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(name: &str, args: &[Value]) -> Value {
        call(name, args).unwrap().unwrap()
    }

    #[test]
    fn test_json_roundtrip_helpers() {
        assert_eq!(run("jsonParse", &[json!(r#"{"a":[1]}"#)]), json!({"a": [1]}));
        assert_eq!(run("jsonStringify", &[json!({"a": 1})]), json!(r#"{"a":1}"#));
        assert!(call("jsonParse", &[json!("{oops")]).unwrap().is_err());
    }

    #[test]
    fn test_url_html_base64() {
        assert_eq!(run("urlEncode", &[json!("a b&c")]), json!("a%20b%26c"));
        assert_eq!(run("urlDecode", &[json!("a%20b")]), json!("a b"));
        assert_eq!(run("htmlEncode", &[json!("<b>\"x\"</b>")]), json!("&lt;b&gt;&quot;x&quot;&lt;/b&gt;"));
        assert_eq!(run("htmlDecode", &[json!("&lt;a&gt; &amp;amp;")]), json!("<a> &amp;"));
        assert_eq!(run("base64Encode", &[json!("hello")]), json!("aGVsbG8="));
        assert_eq!(run("base64Decode", &[json!("aGVsbG8=")]), json!("hello"));
    }

    #[test]
    fn test_hash() {
        assert_eq!(
            run("hash", &[json!("abc")]),
            json!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(
            run("hash", &[json!("abc"), json!("md5")]),
            json!("900150983cd24fb0d6963f7d28e17f72")
        );
        assert_eq!(
            run("hash", &[json!("abc"), json!("SHA1")]),
            json!("a9993e364706816aba3e25717850c26c9cd0d89d")
        );
        assert!(call("hash", &[json!("abc"), json!("crc32")]).unwrap().is_err());
    }

    #[test]
    fn test_dates() {
        assert_eq!(
            run("formatDate", &[json!("2024-03-05T10:20:30Z"), json!("%d/%m/%Y %H:%M")]),
            json!("05/03/2024 10:20")
        );
        assert_eq!(run("formatDate", &[json!("2024-03-05")]), json!("2024-03-05"));
        assert_eq!(
            run("dateAdd", &[json!("2024-01-31T00:00:00Z"), json!(1), json!("month")]),
            json!("2024-02-29T00:00:00.000Z")
        );
        assert_eq!(
            run("dateAdd", &[json!("2024-01-01T00:00:00Z"), json!(-2), json!("days")]),
            json!("2023-12-30T00:00:00.000Z")
        );
        assert_eq!(run("toDate", &[json!(0)]), json!("1970-01-01T00:00:00.000Z"));
        assert!(call("formatDate", &[json!("2024-01-01"), json!("%Q")]).unwrap().is_err());
        assert!(call("dateAdd", &[json!("2024-01-01"), json!(1), json!("fortnight")]).unwrap().is_err());
        for unit in ["years", "months", "days", "weeks"] {
            for amount in [json!(1e18), json!(-1e18)] {
                let result = call("dateAdd", &[json!("2024-01-01"), amount, json!(unit)]).unwrap();
                assert!(result.is_err(), "{} accepted", unit);
            }
        }
    }
}
