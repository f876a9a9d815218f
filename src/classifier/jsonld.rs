use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script[^>]+type=["']application/ld\+json["'][^>]*>(.*?)</script>"#)
        .unwrap()
});

/// Parse every `application/ld+json` block in `html`.
///
/// Blocks that fail to parse are skipped. Top-level arrays are flattened so
/// callers see one entry per described entity, in document order.
pub fn entries(html: &str) -> Vec<Value> {
    SCRIPT_RE
        .captures_iter(html)
        .filter_map(|caps| serde_json::from_str::<Value>(caps[1].trim()).ok())
        .flat_map(|value| match value {
            Value::Array(items) => items,
            other => vec![other],
        })
        .collect()
}

/// Type string of an entry: `@type`, then `type`, then `@context`, first non-empty wins.
pub fn declared_type(entry: &Value) -> Option<String> {
    ["@type", "type", "@context"]
        .iter()
        .filter_map(|key| entry.get(*key))
        .find(|v| is_truthy(v))
        .map(render)
}

/// Whether the entry's declared type mentions a product.
pub fn is_product_entry(entry: &Value) -> bool {
    declared_type(entry)
        .map(|t| t.contains("Product") || t.contains("product"))
        .unwrap_or(false)
}

/// Whether the entry carries a non-empty `offers` field.
pub fn has_offers(entry: &Value) -> bool {
    entry.get("offers").map(is_truthy).unwrap_or(false)
}

/// Empty strings, arrays, objects, `null`, `false` and zero count as absent.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// String view of a scalar or list field (`"Product"`, `["Product", "Thing"]`).
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(render).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

/// First string found under `key`, looking inside `{ "url": ... }`/`{ "name": ... }`
/// objects and lists the way schema.org publishers nest them.
pub fn text_field(entry: &Value, key: &str) -> Option<String> {
    fn scalar(v: &Value) -> Option<String> {
        match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Array(items) => items.iter().find_map(scalar),
            Value::Object(o) => ["url", "name", "@id"]
                .iter()
                .find_map(|k| o.get(*k).and_then(scalar)),
            _ => None,
        }
    }
    entry.get(key).and_then(scalar)
}

// ── Tests ──
