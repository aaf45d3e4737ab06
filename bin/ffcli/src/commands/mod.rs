pub mod crud;
pub mod curl;
pub mod do_cmd;
pub mod import_cookies;
pub mod screenshot;
pub mod user_agent;

use ffcli_client::Client;
use ffcli_core::{Config, Paths};
use serde_json::{Map, Value};

/// Connect to the extension of `profile`, failing early if it is not running.
pub async fn connect(profile: Option<&str>) -> anyhow::Result<Client> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let client = Client::from_profile(profile, &config)?;
    client.start().await?;
    Ok(client)
}

/// Parse a command-line value as JSON or YAML, falling back to the raw
/// string. Outside JSON a `#` would start a YAML comment, so such values stay
/// strings.
pub fn parse_maybe_json(raw: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return value;
    }
    if raw.trim().is_empty() {
        return Value::Null;
    }
    if raw.contains('#') {
        return Value::String(raw.to_string());
    }
    serde_yaml::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// `key=value` arguments as an object; values are parsed "maybe JSON".
pub fn parse_props(props: &[String]) -> Map<String, Value> {
    props
        .iter()
        .map(|p| {
            let (k, v) = p.split_once('=').unwrap_or((p.as_str(), ""));
            (k.to_string(), parse_maybe_json(v))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_maybe_json() {
        assert_eq!(parse_maybe_json("12"), json!(12));
        assert_eq!(parse_maybe_json("{\"a\": [1, true]}"), json!({"a": [1, true]}));
        assert_eq!(parse_maybe_json("{a: 1}"), json!({"a": 1}));
        assert_eq!(parse_maybe_json("hello world"), json!("hello world"));
        assert_eq!(parse_maybe_json("#main"), json!("#main"));
        assert_eq!(parse_maybe_json("a # b"), json!("a # b"));
        assert_eq!(parse_maybe_json("[x#1, y]"), json!("[x#1, y]"));
        assert_eq!(parse_maybe_json("{\"tag\": \"#a\"}"), json!({"tag": "#a"}));
        assert_eq!(parse_maybe_json("{unclosed"), json!("{unclosed"));
    }

    #[test]
    fn test_parse_props() {
        let props = parse_props(&["active=true".into(), "title=a=b".into(), "flag".into()]);
        assert_eq!(props["active"], json!(true));
        assert_eq!(props["title"], json!("a=b"));
        assert_eq!(props["flag"], Value::Null);
    }
}
