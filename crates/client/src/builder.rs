//! Dotted method paths built segment by segment.

use serde_json::{Map, Value};

use crate::client::Client;
use crate::response::Response;

/// Accumulates a dotted method name, e.g. `browser.cookies.getAll`.
///
/// Extending the path has no side effects; only `call` creates a handle.
#[derive(Clone)]
pub struct RequestBuilder {
    client: Client,
    segments: Vec<String>,
}

impl RequestBuilder {
    pub(crate) fn new(client: Client, segment: &str) -> Self {
        Self {
            client,
            segments: vec![segment.to_string()],
        }
    }

    pub fn attr(&self, name: &str) -> RequestBuilder {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self {
            client: self.client.clone(),
            segments,
        }
    }

    pub fn path(&self) -> String {
        self.segments.join(".")
    }

    pub fn call(&self, args: Vec<Value>) -> Response {
        self.client.invoke(&self.path(), args)
    }

    /// Call with keyword arguments packed as a trailing object.
    pub fn call_with(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Response {
        self.client.invoke(&self.path(), pack_kwargs(args, kwargs))
    }
}

/// Append `kwargs` as a trailing object argument, merging into an existing
/// trailing object. Keyword values win over keys already present.
pub fn pack_kwargs(mut args: Vec<Value>, kwargs: Map<String, Value>) -> Vec<Value> {
    if kwargs.is_empty() {
        return args;
    }
    match args.last_mut() {
        Some(Value::Object(last)) => last.extend(kwargs),
        _ => args.push(Value::Object(kwargs)),
    }
    args
}
