use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection closed before the call completed")]
    ConnectionClosed,

    /// The peer answered with an error-typed envelope. Carries its payload.
    #[error("Remote error: {}", display_remote(.0))]
    Remote(Value),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Call '{0}' produced no result")]
    EmptyResult(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(String),
}

fn display_remote(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        // The extension reports `{error, stack}`
        Value::Object(map) => match map.get("error").and_then(|e| e.as_str()) {
            Some(msg) => msg.to_string(),
            None => payload.to_string(),
        },
        other => other.to_string(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
