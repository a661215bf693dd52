//! Built-in fallback parsers, one per supported format.
//!
//! JSON, YAML, and TOML parse through their ecosystem crates. INI,
//! Properties, and HCL are deliberately minimal line-oriented parsers:
//! enough for real-world configuration files, replaceable through the
//! registry when a host needs full dialect coverage.

use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};
use crate::format::ConfigFormat;
use crate::parser::ConfigMap;

/// Parses `bytes` as `format` with the built-in parser for that format.
///
/// # Errors
///
/// Returns [`Error::Parse`] when the content is not valid for the format,
/// when the top-level value is not a mapping, or when the format is
/// [`ConfigFormat::Unknown`].
pub fn fallback_parse(bytes: &[u8], format: ConfigFormat) -> Result<ConfigMap> {
    match format {
        ConfigFormat::Json => parse_json(bytes),
        ConfigFormat::Yaml => parse_yaml(bytes),
        ConfigFormat::Toml => parse_toml(bytes),
        ConfigFormat::Ini => parse_ini(text(bytes, "INI")?),
        ConfigFormat::Properties => parse_properties(text(bytes, "Properties")?),
        ConfigFormat::Hcl => parse_hcl(text(bytes, "HCL")?),
        ConfigFormat::Unknown => Err(Error::parse(
            "unknown",
            "no parser registered for this format and no extension to detect one",
        )),
    }
}

fn text<'a>(bytes: &'a [u8], format: &'static str) -> Result<&'a str> {
    std::str::from_utf8(bytes).map_err(|e| Error::parse(format, format!("invalid UTF-8: {e}")))
}

fn into_map(value: Value, format: &'static str) -> Result<ConfigMap> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::parse(
            format,
            format!(
                "top-level value must be a mapping, got {}",
                value_kind(&other)
            ),
        )),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON / YAML / TOML
// ─────────────────────────────────────────────────────────────────────────────

fn parse_json(bytes: &[u8]) -> Result<ConfigMap> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| Error::parse("JSON", e.to_string()))?;
    into_map(value, "JSON")
}

fn parse_yaml(bytes: &[u8]) -> Result<ConfigMap> {
    let content = text(bytes, "YAML")?;
    let value: Value =
        serde_saphyr::from_str(content).map_err(|e| Error::parse("YAML", e.to_string()))?;
    into_map(value, "YAML")
}

fn parse_toml(bytes: &[u8]) -> Result<ConfigMap> {
    let content = text(bytes, "TOML")?;
    let value: toml::Value =
        toml::from_str(content).map_err(|e| Error::parse("TOML", e.to_string()))?;
    into_map(toml_to_json(value), "TOML")
}

/// Convert a TOML value tree to a JSON value tree.
fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),

        toml::Value::Integer(i) => Value::Number(i.into()),

        toml::Value::Float(f) => Value::Number(Number::from_f64(f).unwrap_or_else(|| 0.into())),

        toml::Value::Boolean(b) => Value::Bool(b),

        toml::Value::Datetime(dt) => Value::String(dt.to_string()),

        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),

        toml::Value::Table(table) => {
            let map: Map<String, Value> = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect();
            Value::Object(map)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scalar coercion for line-oriented formats
// ─────────────────────────────────────────────────────────────────────────────

/// Coerces a raw string to its most precise scalar form.
///
/// Quoted values stay strings; otherwise boolean, then `i64`, then `f64`
/// (only when a decimal point is present), then string.
pub(crate) fn coerce_scalar(raw: &str) -> Value {
    let trimmed = raw.trim();

    if trimmed.len() >= 2
        && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
            || (trimmed.starts_with('\'') && trimmed.ends_with('\'')))
    {
        return Value::String(trimmed[1..trimmed.len() - 1].to_string());
    }

    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }

    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Number(i.into());
    }

    if trimmed.contains('.')
        && let Ok(f) = trimmed.parse::<f64>()
        && let Some(n) = Number::from_f64(f)
    {
        return Value::Number(n);
    }

    Value::String(trimmed.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// INI
// ─────────────────────────────────────────────────────────────────────────────

fn parse_ini(content: &str) -> Result<ConfigMap> {
    let mut root = ConfigMap::new();
    let mut section: Option<String> = None;

    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') {
            let name = line
                .strip_prefix('[')
                .and_then(|l| l.strip_suffix(']'))
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| {
                    Error::parse("INI", format!("malformed section header at line {}", lineno + 1))
                })?;
            let entry = root
                .entry(name.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                // A scalar key earlier in the file shadowed this section name.
                *entry = Value::Object(Map::new());
            }
            section = Some(name.to_string());
            continue;
        }

        let Some((key, value)) = split_key_value(line) else {
            return Err(Error::parse(
                "INI",
                format!("expected 'key = value' at line {}", lineno + 1),
            ));
        };

        match &section {
            Some(name) => {
                if let Some(Value::Object(map)) = root.get_mut(name.as_str()) {
                    map.insert(key.to_string(), coerce_scalar(value));
                }
            }
            None => {
                root.insert(key.to_string(), coerce_scalar(value));
            }
        }
    }

    Ok(root)
}

// ─────────────────────────────────────────────────────────────────────────────
// Properties
// ─────────────────────────────────────────────────────────────────────────────

fn parse_properties(content: &str) -> Result<ConfigMap> {
    let mut root = ConfigMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        // A bare key with no delimiter maps to the empty string, matching
        // java.util.Properties.
        match split_key_value(line) {
            Some((key, value)) => {
                root.insert(key.to_string(), coerce_scalar(value));
            }
            None => {
                root.insert(line.to_string(), Value::String(String::new()));
            }
        }
    }

    Ok(root)
}

/// Splits on the first `=` or `:` delimiter.
fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let idx = line.find(['=', ':'])?;
    let key = line[..idx].trim();
    let value = line[idx + 1..].trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value))
}

// ─────────────────────────────────────────────────────────────────────────────
// HCL (minimal subset)
// ─────────────────────────────────────────────────────────────────────────────

/// Parses the attribute-and-block subset of HCL:
/// `key = value`, `block { ... }`, and `block "label" { ... }`.
fn parse_hcl(content: &str) -> Result<ConfigMap> {
    let mut stack: Vec<ConfigMap> = vec![ConfigMap::new()];
    // Key under which each open block will be inserted into its parent.
    let mut keys: Vec<Vec<String>> = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        let line = strip_hcl_comment(line).trim();
        if line.is_empty() {
            continue;
        }

        if line == "}" {
            let Some(path) = keys.pop() else {
                return Err(Error::parse(
                    "HCL",
                    format!("unbalanced '}}' at line {}", lineno + 1),
                ));
            };
            let finished = stack.pop().expect("stack never empty while a block is open");
            let parent = stack.last_mut().expect("root map always present");
            insert_nested(parent, &path, Value::Object(finished));
            continue;
        }

        if let Some(header) = line.strip_suffix('{') {
            let path = parse_block_header(header).ok_or_else(|| {
                Error::parse("HCL", format!("malformed block header at line {}", lineno + 1))
            })?;
            keys.push(path);
            stack.push(ConfigMap::new());
            continue;
        }

        let Some((key, raw)) = split_hcl_attribute(line) else {
            return Err(Error::parse(
                "HCL",
                format!("expected 'key = value' at line {}", lineno + 1),
            ));
        };
        let value = parse_hcl_value(raw);
        let current = stack.last_mut().expect("root map always present");
        current.insert(key.to_string(), value);
    }

    if keys.is_empty() {
        Ok(stack.pop().expect("root map always present"))
    } else {
        Err(Error::parse("HCL", "unclosed block at end of input"))
    }
}

fn strip_hcl_comment(line: &str) -> &str {
    // Comment markers inside quoted strings are out of scope for the
    // minimal subset.
    let cut = line
        .find('#')
        .into_iter()
        .chain(line.find("//"))
        .min()
        .unwrap_or(line.len());
    &line[..cut]
}

/// `name` or `name "label" ["label2" ...]` before the opening brace.
fn parse_block_header(header: &str) -> Option<Vec<String>> {
    let mut path = Vec::new();
    for token in header.split_whitespace() {
        if token.contains('=') {
            // Inline map expressions are outside the minimal subset.
            return None;
        }
        let part = token
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .unwrap_or(token);
        if part.is_empty() {
            return None;
        }
        path.push(part.to_string());
    }
    if path.is_empty() { None } else { Some(path) }
}

fn split_hcl_attribute(line: &str) -> Option<(&str, &str)> {
    let idx = line.find('=')?;
    let key = line[..idx].trim();
    let value = line[idx + 1..].trim();
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

fn parse_hcl_value(raw: &str) -> Value {
    let trimmed = raw.trim().trim_end_matches(',');

    if let Some(inner) = trimmed.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        let items = inner
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(coerce_scalar)
            .collect();
        return Value::Array(items);
    }

    coerce_scalar(trimmed)
}

/// Inserts `value` at a nested path, merging into existing mappings so
/// repeated labeled blocks accumulate instead of clobbering each other.
fn insert_nested(map: &mut ConfigMap, path: &[String], value: Value) {
    match path {
        [] => {}
        [leaf] => match (map.get_mut(leaf.as_str()), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                for (k, v) in incoming {
                    existing.insert(k, v);
                }
            }
            (_, value) => {
                map.insert(leaf.clone(), value);
            }
        },
        [head, rest @ ..] => {
            let entry = map
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(nested) = entry {
                insert_nested(nested, rest, value);
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
