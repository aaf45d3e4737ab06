//! Resolving the browser's user agent.

use ffcli_core::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::client::Client;

/// Hosts whose pages refuse content scripts.
static MOZILLA_HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|\.)(mozilla\.net|firefox\.com|mozilla\.org)$").unwrap());

/// A tab page that can run `userAgent` in place.
fn is_accessible(url: &str) -> bool {
    if !url.starts_with("http") {
        return false;
    }
    match url::Url::parse(url) {
        Ok(parsed) => !parsed
            .host_str()
            .map_or(false, |host| MOZILLA_HOST.is_match(host)),
        Err(_) => false,
    }
}

impl Client {
    /// The user agent the browser sends. With `real`, it is read from inside
    /// a tab (an existing one if possible, otherwise a hidden temporary tab),
    /// which reflects per-site overrides. `tab` asks a specific tab.
    pub async fn get_user_agent(&self, real: bool, tab: Option<i64>) -> Result<String> {
        let mut tab = tab;
        let mut temporary = None;

        if real && tab.is_none() {
            let tabs = self
                .browser()
                .attr("tabs")
                .attr("query")
                .call(vec![json!({"discarded": false})])
                .get()
                .await?;
            tab = tabs.as_array().into_iter().flatten().find_map(|t| {
                let url = t.get("url")?.as_str()?;
                if is_accessible(url) {
                    t.get("id")?.as_i64()
                } else {
                    None
                }
            });

            if tab.is_none() {
                let created = self.open_probe_tab().await?;
                temporary = Some(created);
                tab = Some(created);
            }
        }

        let result = match temporary {
            Some(id) => match self.load_probe_page(id).await {
                Ok(()) => self.ask_user_agent(tab).await,
                Err(e) => Err(e),
            },
            None => self.ask_user_agent(tab).await,
        };

        if let Some(id) = temporary {
            let removed = self
                .browser()
                .attr("tabs")
                .attr("remove")
                .call(vec![json!(id)])
                .collect()
                .await;
            if let Err(e) = removed {
                warn!(tab = id, "failed to close temporary tab: {}", e);
            }
        }
        result
    }

    async fn open_probe_tab(&self) -> Result<i64> {
        let tabs = self.browser().attr("tabs");
        let created = tabs.attr("create").call(vec![json!({})]).get().await?;
        let id = created
            .get("id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| Error::Protocol(format!("tabs.create returned {}", created)))?;
        debug!(tab = id, "opened temporary tab");
        tabs.attr("hide").call(vec![json!(id)]).collect().await?;
        Ok(id)
    }

    /// Navigate `tab` to the probe URL and wait until it reports the load.
    async fn load_probe_page(&self, tab: i64) -> Result<()> {
        let mut filter = Map::new();
        filter.insert("tabId".into(), json!(tab));
        filter.insert("properties".into(), json!(["url"]));
        let mut sub = self.subscribe("browser.tabs.onUpdated", Some(1), filter);
        sub.id().await?;

        self.browser()
            .attr("tabs")
            .attr("update")
            .call(vec![json!(tab), json!({"url": self.config().user_agent_probe_url})])
            .collect()
            .await?;

        while let Some(event) = sub.next_event().await {
            event?;
        }
        Ok(())
    }

    async fn ask_user_agent(&self, tab: Option<i64>) -> Result<String> {
        let args = vec![tab.map(Value::from).unwrap_or(Value::Null)];
        let mut value = self.invoke("userAgent", args).get().await?;
        // executed in a tab, the answer is one result per frame
        if let Value::Array(items) = value {
            value = items.into_iter().next().unwrap_or(Value::Null);
        }
        match value {
            Value::String(ua) => Ok(ua),
            other => Err(Error::Protocol(format!("unexpected user agent {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock_pair;

    #[test]
    fn test_is_accessible() {
        assert!(is_accessible("https://example.com/page"));
        assert!(!is_accessible("about:blank"));
        assert!(!is_accessible("https://addons.mozilla.org/en-US/"));
        assert!(!is_accessible("https://www.firefox.com/"));
        assert!(is_accessible("https://notmozilla.org.example/"));
    }

    #[tokio::test]
    async fn test_plain_user_agent() {
        let (client, mut peer) = mock_pair();
        let server = tokio::spawn(async move {
            let call = peer.answer("userAgent", json!("Mozilla/5.0 Test")).await;
            assert_eq!(call["args"], json!([null]));
            peer
        });
        assert_eq!(client.get_user_agent(false, None).await.unwrap(), "Mozilla/5.0 Test");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_real_user_agent_uses_existing_tab() {
        let (client, mut peer) = mock_pair();
        let server = tokio::spawn(async move {
            peer.answer(
                "browser.tabs.query",
                json!([
                    {"id": 1, "url": "about:newtab"},
                    {"id": 2, "url": "https://addons.mozilla.org/"},
                    {"id": 3, "url": "https://example.com/"},
                ]),
            )
            .await;
            let call = peer.answer("userAgent", json!(["UA in tab"])).await;
            assert_eq!(call["args"], json!([3]));
            peer
        });
        assert_eq!(client.get_user_agent(true, None).await.unwrap(), "UA in tab");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_real_user_agent_with_temporary_tab() {
        let (client, mut peer) = mock_pair();
        let server = tokio::spawn(async move {
            peer.answer("browser.tabs.query", json!([])).await;
            peer.answer("browser.tabs.create", json!({"id": 9})).await;
            let hide = peer.answer("browser.tabs.hide", json!([9])).await;
            assert_eq!(hide["args"], json!([9]));

            let sub = peer.recv_call().await;
            assert_eq!(sub["fn"], "subscribe");
            assert_eq!(
                sub["args"],
                json!(["browser.tabs.onUpdated", 1, {"tabId": 9, "properties": ["url"]}])
            );
            let sub_id = sub["id"].as_u64().unwrap();
            peer.data(sub_id, json!({"subscriptionId": "s9"})).await;

            let update = peer.answer("browser.tabs.update", json!({"id": 9})).await;
            assert_eq!(update["args"], json!([9, {"url": "https://google.com/404"}]));
            peer.data(sub_id, json!([9, {"url": "https://google.com/404"}])).await;
            peer.complete(sub_id, Value::Null).await;

            let ua = peer.answer("userAgent", json!(["Hidden UA"])).await;
            assert_eq!(ua["args"], json!([9]));
            let remove = peer.answer("browser.tabs.remove", Value::Null).await;
            assert_eq!(remove["args"], json!([9]));
            peer
        });
        assert_eq!(client.get_user_agent(true, None).await.unwrap(), "Hidden UA");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_temporary_tab_removed_on_failure() {
        let (client, mut peer) = mock_pair();
        let server = tokio::spawn(async move {
            peer.answer("browser.tabs.query", json!([])).await;
            peer.answer("browser.tabs.create", json!({"id": 5})).await;
            peer.answer("browser.tabs.hide", json!([5])).await;
            let sub = peer.recv_call().await;
            let sub_id = sub["id"].as_u64().unwrap();
            peer.data(sub_id, json!({"subscriptionId": "s5"})).await;
            let update = peer.recv_call().await;
            peer.send(json!({"id": update["id"], "type": "error", "data": {"error": "denied"}, "complete": true}))
                .await;
            // the dropped subscription releases itself, then the tab is removed
            let mut seen = Vec::new();
            for _ in 0..2 {
                let call = peer.recv_call().await;
                seen.push(call["fn"].as_str().unwrap().to_string());
                peer.complete(call["id"].as_u64().unwrap(), Value::Null).await;
            }
            seen.sort();
            assert_eq!(seen, vec!["browser.tabs.remove", "unsubscribe"]);
            peer
        });
        let err = client.get_user_agent(true, None).await.unwrap_err();
        assert!(matches!(err, Error::Remote(_)));
        server.await.unwrap();
    }
}
