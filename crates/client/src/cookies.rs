//! Cookie translation between HTTP headers, cookie files and the extension's
//! `browser.cookies` API.

use cookie::Cookie;
use ffcli_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::client::Client;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameSitePolicy {
    #[default]
    NoRestriction,
    Lax,
    Strict,
}

impl From<Option<cookie::SameSite>> for SameSitePolicy {
    fn from(same_site: Option<cookie::SameSite>) -> Self {
        match same_site {
            Some(cookie::SameSite::Lax) => Self::Lax,
            Some(cookie::SameSite::Strict) => Self::Strict,
            Some(cookie::SameSite::None) | None => Self::NoRestriction,
        }
    }
}

/// Argument of `browser.cookies.set`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserCookie {
    pub url: String,
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Seconds since the epoch; session cookie when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSitePolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_id: Option<String>,
    #[serde(default)]
    pub partition_key: Option<Value>,
}

impl BrowserCookie {
    /// Translate one `Set-Cookie` header received from `url`. `Expires` wins
    /// over `Max-Age`, which counts from `now` (seconds since the epoch).
    pub fn from_set_cookie(
        header: &str,
        url: &str,
        store_id: Option<&str>,
        now: i64,
    ) -> Result<Self> {
        let parsed = Cookie::parse(header)
            .map_err(|e| Error::Protocol(format!("invalid Set-Cookie {:?}: {}", header, e)))?;

        let expiration_date = match parsed.expires_datetime() {
            Some(at) => Some(at.unix_timestamp()),
            None => parsed.max_age().map(|age| now + age.whole_seconds()),
        };

        Ok(Self {
            url: url.to_string(),
            name: parsed.name().to_string(),
            value: parsed.value().to_string(),
            domain: parsed.domain().map(str::to_string),
            path: parsed.path().map(str::to_string),
            expiration_date,
            http_only: parsed.http_only().unwrap_or(false),
            secure: parsed.secure().unwrap_or(false),
            same_site: parsed.same_site().into(),
            store_id: store_id.map(str::to_string),
            partition_key: None,
        })
    }
}

/// `Cookie` header value for cookies returned by `browser.cookies.getAll`.
pub fn cookie_header(cookies: &[Value]) -> Option<String> {
    let pairs: Vec<String> = cookies
        .iter()
        .filter_map(|c| {
            let name = c.get("name")?.as_str()?;
            let value = c.get("value")?.as_str()?;
            Some(format!("{}={}", name, value))
        })
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

/// One line of a Netscape (`cookies.txt`) cookie file.
#[derive(Debug, Clone, PartialEq)]
pub struct NetscapeCookie {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    pub expires: Option<i64>,
    pub name: String,
    pub value: String,
    pub http_only: bool,
}

impl NetscapeCookie {
    pub fn to_browser(&self, store_id: Option<&str>) -> BrowserCookie {
        BrowserCookie {
            url: format!("https://{}{}", self.domain.trim_start_matches('.'), self.path),
            name: self.name.clone(),
            value: self.value.clone(),
            domain: Some(self.domain.clone()),
            path: Some(self.path.clone()),
            expiration_date: self.expires,
            http_only: self.http_only,
            secure: self.secure,
            same_site: SameSitePolicy::NoRestriction,
            store_id: store_id.map(str::to_string),
            partition_key: None,
        }
    }
}

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

pub fn parse_netscape(text: &str) -> Result<Vec<NetscapeCookie>> {
    let mut cookies = Vec::new();
    for (n, raw) in text.lines().enumerate() {
        let mut line = raw.trim_end_matches(['\r', '\n']);
        let http_only = line.starts_with(HTTP_ONLY_PREFIX);
        if http_only {
            line = &line[HTTP_ONLY_PREFIX.len()..];
        } else if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 7 {
            return Err(Error::Other(format!(
                "malformed cookie file line {}: expected 7 fields, got {}",
                n + 1,
                fields.len()
            )));
        }
        let expires = match fields[4].trim() {
            "" | "0" => None,
            s => Some(s.parse::<i64>().map_err(|_| {
                Error::Other(format!("malformed cookie file line {}: bad expiry {:?}", n + 1, s))
            })?),
        };
        cookies.push(NetscapeCookie {
            domain: fields[0].to_string(),
            include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
            path: fields[2].to_string(),
            secure: fields[3].eq_ignore_ascii_case("TRUE"),
            expires,
            name: fields[5].to_string(),
            value: fields[6].to_string(),
            http_only,
        });
    }
    Ok(cookies)
}

impl Client {
    /// Cookies the browser would send to `url` from the given store.
    pub async fn cookies_for(&self, url: &str, store_id: Option<&str>) -> Result<Vec<Value>> {
        let found = self
            .browser()
            .attr("cookies")
            .attr("getAll")
            .call(vec![json!({"url": url, "storeId": store_id})])
            .get()
            .await?;
        Ok(found.as_array().cloned().unwrap_or_default())
    }

    pub async fn set_cookie(&self, cookie: &BrowserCookie) -> Result<Value> {
        debug!(name = %cookie.name, url = %cookie.url, "setting cookie");
        self.browser()
            .attr("cookies")
            .attr("set")
            .call(vec![serde_json::to_value(cookie)?])
            .get()
            .await
    }

    /// Cookie store of the container named `name`.
    pub async fn container_store(&self, name: &str) -> Result<String> {
        let found = self
            .browser()
            .attr("contextualIdentities")
            .attr("query")
            .call(vec![json!({"name": name})])
            .get()
            .await?;
        found
            .get(0)
            .and_then(|c| c.get("cookieStoreId"))
            .and_then(|s| s.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::NotFound(format!("container {:?}", name)))
    }

    pub async fn tab_store(&self, tab: i64) -> Result<String> {
        let found = self
            .browser()
            .attr("tabs")
            .attr("get")
            .call(vec![json!(tab)])
            .get()
            .await?;
        found
            .get("cookieStoreId")
            .and_then(|s| s.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::NotFound(format!("cookie store of tab {}", tab)))
    }
}
