use serde_json::{json, Map, Value};

use crate::PbmockError;

/// Parse a `package.Service.Method` reference into (service, method).
/// The method is everything after the last dot.
pub fn parse_method_ref(input: &str) -> Result<(String, String), PbmockError> {
    let dot = input.rfind('.').ok_or_else(|| {
        PbmockError::InvalidArgument(format!(
            "Invalid method reference '{input}': expected 'package.Service.Method' format"
        ))
    })?;
    let service = &input[..dot];
    let method = &input[dot + 1..];
    if service.is_empty() || method.is_empty() {
        return Err(PbmockError::InvalidArgument(format!(
            "Invalid method reference '{input}': service and method names must be non-empty"
        )));
    }
    Ok((service.to_string(), method.to_string()))
}

/// Parse CLI arguments into a JSON object.
///
/// Supports `key:value` and `key=value`. Values are coerced:
/// - Quoted strings have quotes stripped
/// - `true`/`false`/`null` become JSON literals
/// - Valid numbers become JSON numbers
/// - Inline `{...}` / `[...]` JSON is parsed
/// - Everything else stays a string
pub fn parse_args(args: &[String]) -> Result<Value, PbmockError> {
    let mut map = Map::new();
    for arg in args {
        let (key, raw_value) = arg
            .split_once(':')
            .or_else(|| arg.split_once('='))
            .ok_or_else(|| {
                PbmockError::InvalidArgument(format!(
                    "Cannot parse argument '{arg}': expected 'key:value' or 'key=value'"
                ))
            })?;

        if key.is_empty() {
            return Err(PbmockError::InvalidArgument(format!(
                "Empty key in argument '{arg}'"
            )));
        }
        map.insert(key.to_string(), coerce_value(raw_value));
    }
    Ok(Value::Object(map))
}

/// Build the request message from `--data` JSON and `key:value` args.
/// Args override fields of the same name in `--data`.
pub fn request_body(data: Option<&str>, args: &[String]) -> Result<Value, PbmockError> {
    let mut body = match data {
        Some(raw) => serde_json::from_str::<Value>(raw)
            .map_err(|e| PbmockError::InvalidArgument(format!("Invalid --data JSON: {e}")))?,
        None => json!({}),
    };
    let Value::Object(fields) = &mut body else {
        return Err(PbmockError::InvalidArgument(
            "--data must be a JSON object".to_string(),
        ));
    };
    if let Value::Object(extra) = parse_args(args)? {
        fields.extend(extra);
    }
    Ok(body)
}

/// Suggest a method name close to `input` (Levenshtein <= 2).
/// Returns None if nothing is close enough or several are equally close.
pub fn suggest_method(input: &str, known: &[&str]) -> Option<String> {
    let mut best_dist = usize::MAX;
    let mut best: Option<&str> = None;
    let mut ambiguous = false;

    for &name in known {
        let dist = strsim::levenshtein(input, name);
        if dist < best_dist {
            best_dist = dist;
            best = Some(name);
            ambiguous = false;
        } else if dist == best_dist {
            ambiguous = true;
        }
    }

    if best_dist <= 2 && !ambiguous {
        best.map(str::to_string)
    } else {
        None
    }
}

fn coerce_value(raw: &str) -> Value {
    if raw.len() >= 2
        && ((raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\'')))
    {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }

    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if raw == "null" {
        return Value::Null;
    }

    if let Ok(n) = raw.parse::<i64>() {
        return json!(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return json!(f);
        }
    }

    if (raw.starts_with('{') && raw.ends_with('}')) || (raw.starts_with('[') && raw.ends_with(']'))
    {
        if let Ok(v) = serde_json::from_str::<Value>(raw) {
            return v;
        }
    }

    Value::String(raw.to_string())
}
