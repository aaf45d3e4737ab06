//! Line framing for the extension socket.
//!
//! Every message is one JSON object followed by `\n`. Outgoing calls carry
//! `{id, fn, args}`; incoming results carry `{id, type, data, complete}`.

use ffcli_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct CallEnvelope<'a> {
    pub id: u64,
    #[serde(rename = "fn")]
    pub method: &'a str,
    pub args: &'a [Value],
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultEnvelope {
    pub id: u64,
    #[serde(rename = "type", default = "default_kind", deserialize_with = "kind")]
    pub kind: String,
    /// Absent on a bare completion marker, `Some(Null)` for an explicit null.
    #[serde(default, deserialize_with = "present")]
    pub data: Option<Value>,
    #[serde(default, deserialize_with = "flag")]
    pub complete: bool,
}

fn default_kind() -> String {
    "data".to_string()
}

/// Null or non-string types are treated as data.
fn kind<'de, D>(d: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => s,
        _ => default_kind(),
    })
}

fn present<'de, D>(d: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(d).map(Some)
}

fn flag<'de, D>(d: D) -> std::result::Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(d)?.unwrap_or(false))
}

impl ResultEnvelope {
    pub fn is_error(&self) -> bool {
        self.kind == "error"
    }
}

/// Serialize one call as a single line (without the trailing newline).
pub fn encode_call(id: u64, method: &str, args: &[Value]) -> Result<String> {
    if method.is_empty() {
        return Err(Error::Protocol("empty method name".to_string()));
    }
    let line = serde_json::to_string(&CallEnvelope { id, method, args })?;
    Ok(line)
}

/// Parse one incoming line. Invalid JSON, non-objects and objects without a
/// numeric id are protocol errors.
pub fn decode_line(line: &[u8]) -> Result<ResultEnvelope> {
    let value: Value = serde_json::from_slice(line)
        .map_err(|e| Error::Protocol(format!("invalid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(Error::Protocol(format!(
            "expected an object, got {}",
            kind_name(&value)
        )));
    }
    serde_json::from_value(value).map_err(|e| Error::Protocol(format!("bad envelope: {}", e)))
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_call() {
        let line = encode_call(7, "browser.cookies.getAll", &[json!({"url": "https://example.com"})])
            .unwrap();
        let v: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            v,
            json!({"id": 7, "fn": "browser.cookies.getAll", "args": [{"url": "https://example.com"}]})
        );
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_encode_rejects_empty_method() {
        assert!(matches!(encode_call(1, "", &[]), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_decode_full_envelope() {
        let env = decode_line(br#"{"id": 3, "type": "error", "data": {"error": "x"}, "complete": true}"#)
            .unwrap();
        assert_eq!(env.id, 3);
        assert!(env.is_error());
        assert_eq!(env.data, Some(json!({"error": "x"})));
        assert!(env.complete);
    }

    #[test]
    fn test_decode_defaults() {
        let env = decode_line(br#"{"id": 4, "data": null}"#).unwrap();
        assert_eq!(env.kind, "data");
        assert_eq!(env.data, Some(Value::Null));
        assert!(!env.complete);

        let env = decode_line(br#"{"id": 4, "complete": true}"#).unwrap();
        assert_eq!(env.data, None);
        assert!(env.complete);

        let env = decode_line(br#"{"id": 4, "data": 1, "complete": null}"#).unwrap();
        assert!(!env.complete);
    }

    #[test]
    fn test_untyped_envelope_is_data() {
        let env = decode_line(br#"{"id": 1, "type": null, "data": 5}"#).unwrap();
        assert_eq!(env.kind, "data");
        assert_eq!(env.data, Some(json!(5)));

        let env = decode_line(br#"{"id": 2, "type": 7, "data": 1, "complete": true}"#).unwrap();
        assert!(!env.is_error());
        assert!(env.complete);
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(decode_line(b"not json"), Err(Error::Protocol(_))));
        assert!(matches!(decode_line(b"[1, 2]"), Err(Error::Protocol(_))));
        assert!(matches!(decode_line(br#"{"type": "data"}"#), Err(Error::Protocol(_))));
        assert!(matches!(decode_line(&[0xff, 0xfe, b'\n']), Err(Error::Protocol(_))));
    }
}
