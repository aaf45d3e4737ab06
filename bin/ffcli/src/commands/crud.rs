use anyhow::bail;
use ffcli_client::Client;
use serde_json::{Map, Value};

use super::{parse_maybe_json, parse_props};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    List,
    Create,
    Get,
    Update,
    Delete,
}

impl Verb {
    fn api_name(self) -> &'static str {
        match self {
            Verb::List => "query",
            Verb::Create => "create",
            Verb::Get => "get",
            Verb::Update => "update",
            Verb::Delete => "remove",
        }
    }

    fn command(self) -> &'static str {
        match self {
            Verb::List => "list",
            Verb::Create => "create",
            Verb::Get => "get",
            Verb::Update => "update",
            Verb::Delete => "delete",
        }
    }
}

/// Extension function behind `verb` on `kind`, e.g. `browser.tabs.query`.
pub fn resolve_method(verb: Verb, kind: &str) -> anyhow::Result<String> {
    let method = format!("browser.{}.{}", kind, verb.api_name());
    let method = match method.as_str() {
        "browser.cookies.query" => "browser.cookies.getAll",
        "browser.bookmarks.query" => "browser.bookmarks.search",
        "browser.windows.query" => "browser.windows.getAll",
        "browser.cookies.get" | "browser.cookies.update" | "browser.cookies.remove" => {
            bail!("{} {} is not supported", verb.command(), kind)
        }
        other => other,
    };
    Ok(method.to_string())
}

fn build_args(id: Option<&str>, props: Option<&Map<String, Value>>) -> Vec<Value> {
    let mut args = Vec::new();
    if let Some(id) = id {
        args.push(parse_maybe_json(id));
    }
    if let Some(props) = props {
        args.push(Value::Object(props.clone()));
    }
    if args.is_empty() {
        args.push(Value::Object(Map::new()));
    }
    args
}

fn matches_filter(item: &Value, filter: &Map<String, Value>) -> bool {
    filter.iter().all(|(k, v)| item.get(k) == Some(v))
}

pub async fn run(
    client: &Client,
    verb: Verb,
    kind: &str,
    id: Option<&str>,
    props: Option<&[String]>,
) -> anyhow::Result<i32> {
    let method = resolve_method(verb, kind)?;
    let props = props.map(parse_props);
    let result = client.invoke(&method, build_args(id, props.as_ref())).await?;

    if verb == Verb::List {
        let filter = props.unwrap_or_default();
        for item in result.as_array().into_iter().flatten() {
            if matches_filter(item, &filter) {
                println!("{}", serde_json::to_string(item)?);
            }
        }
    } else {
        println!("{}", serde_json::to_string(&result)?);
    }
    Ok(0)
}
