//! Hooks for an intercepting HTTP proxy that borrows the browser's identity.
//!
//! In pass-through mode the proxy forwards requests itself and the hooks only
//! inject the browser's cookies and user agent, then store cookies the server
//! sets. In real-proxy mode every request is answered by a fetch performed by
//! the extension, so it leaves the browser's own network stack.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use ffcli_core::{Config, Error, Result};
use tracing::{debug, warn};

use crate::client::Client;
use crate::cookies::{cookie_header, BrowserCookie};
use crate::fetch::{FetchHandle, FetchRequest, HeaderList};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyOptions {
    /// Firefox profile name or directory; the configured one when `None`.
    pub profile: Option<String>,
    /// Answer requests with fetches made by the extension.
    pub real_proxy: bool,
    /// Resolve the user agent from inside a tab.
    pub real_ua: bool,
    /// Container whose cookie store is used.
    pub container: Option<String>,
}

/// State the request hook leaves for the response hook of the same flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowMetadata {
    pub real_proxy: bool,
    pub store_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InterceptedRequest {
    pub url: String,
    pub method: String,
    pub headers: HeaderList,
    pub body: Bytes,
    pub metadata: FlowMetadata,
}

impl InterceptedRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterceptedResponse {
    pub status: u16,
    pub headers: HeaderList,
    pub body: Bytes,
}

impl InterceptedResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    fn redirect(location: &str) -> Self {
        Self {
            status: 302,
            headers: vec![("Location".to_string(), location.to_string())],
            body: Bytes::new(),
        }
    }
}

fn set_header(headers: &mut HeaderList, name: &str, value: String) {
    remove_header(headers, name);
    headers.push((name.to_string(), value));
}

fn remove_header(headers: &mut HeaderList, name: &str) {
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
}

/// Parked redirects beyond this count evict the oldest one.
const MAX_PARKED_REDIRECTS: usize = 16;
/// A parked redirect whose target was not requested within this time is dropped.
const PARKED_REDIRECT_TTL: Duration = Duration::from_secs(60);

struct ParkedRedirect {
    seq: u64,
    parked_at: Instant,
    fetch: FetchHandle,
}

pub struct ProxyContext {
    config: Config,
    options: ProxyOptions,
    client: Option<Client>,
    store_id: Option<String>,
    user_agent: Option<String>,
    /// Fetches that followed a redirect, parked until the proxied client
    /// asks for the target URL.
    redirects: HashMap<String, ParkedRedirect>,
    parked: u64,
}

impl ProxyContext {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            options: ProxyOptions::default(),
            client: None,
            store_id: None,
            user_agent: None,
            redirects: HashMap::new(),
            parked: 0,
        }
    }

    /// Context over an existing client, already configured with `options`.
    pub fn with_client(client: Client, options: ProxyOptions) -> Self {
        let mut ctx = Self::new(client.config().clone());
        ctx.client = Some(client);
        ctx.options = options;
        ctx
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    /// Apply new options. A different profile replaces the client; a
    /// different container forgets the resolved cookie store.
    pub async fn configure(&mut self, options: ProxyOptions) -> Result<()> {
        if self.client.is_none() || options.profile != self.options.profile {
            if let Some(old) = self.client.take() {
                old.stop().await;
            }
            self.redirects.clear();
            self.client = Some(Client::from_profile(options.profile.as_deref(), &self.config)?);
        }
        if options.container != self.options.container {
            self.store_id = None;
        }
        if options.real_ua != self.options.real_ua {
            self.user_agent = None;
        }
        self.options = options;
        Ok(())
    }

    fn client(&self) -> Result<Client> {
        self.client
            .clone()
            .ok_or_else(|| Error::Config("proxy used before it was configured".to_string()))
    }

    /// Request hook. Returns the response to answer with in real-proxy mode,
    /// `None` when the request should go upstream.
    pub async fn request(&mut self, req: &mut InterceptedRequest) -> Result<Option<InterceptedResponse>> {
        let client = self.client()?;
        client.start().await?;

        if self.store_id.is_none() {
            if let Some(container) = &self.options.container {
                self.store_id = Some(client.container_store(container).await?);
            }
        }
        req.metadata = FlowMetadata {
            real_proxy: self.options.real_proxy,
            store_id: self.store_id.clone(),
        };

        let user_agent = match &self.user_agent {
            Some(ua) => ua.clone(),
            None => {
                let ua = client.get_user_agent(self.options.real_ua, None).await?;
                self.user_agent = Some(ua.clone());
                ua
            }
        };

        if !self.options.real_proxy {
            let cookies = client.cookies_for(&req.url, self.store_id.as_deref()).await?;
            match cookie_header(&cookies) {
                Some(cookie) => set_header(&mut req.headers, "cookie", cookie),
                None => remove_header(&mut req.headers, "cookie"),
            }
            set_header(&mut req.headers, "user-agent", user_agent);
            return Ok(None);
        }

        // the browser supplies its own
        remove_header(&mut req.headers, "user-agent");

        let mut fetch = match self.redirects.remove(&req.url) {
            Some(parked) => {
                debug!(url = %req.url, "resuming redirected fetch");
                parked.fetch
            }
            None => {
                let request = FetchRequest {
                    headers: req.headers.clone(),
                    body: req.body.clone(),
                    store_id: self.store_id.clone(),
                    ..FetchRequest::new(req.url.clone()).method(req.method.clone())
                };
                let mut fetch = client.fetch(&request);
                fetch.response_meta().await?;
                let target = fetch.redirected_to().or_else(|| fetch.redirect_location());
                if let Some(target) = target {
                    debug!(from = %req.url, to = %target, "answering redirect");
                    let response = InterceptedResponse::redirect(&target);
                    self.park(target, fetch, Instant::now());
                    return Ok(Some(response));
                }
                fetch
            }
        };

        let body = fetch.bytes().await?;
        let meta = fetch.response_meta().await?;
        Ok(Some(InterceptedResponse {
            status: meta.status,
            headers: meta.headers.clone(),
            body,
        }))
    }

    fn park(&mut self, target: String, fetch: FetchHandle, now: Instant) {
        self.evict_stale(now);
        if self.redirects.len() >= MAX_PARKED_REDIRECTS {
            let oldest = self
                .redirects
                .iter()
                .min_by_key(|(_, p)| p.seq)
                .map(|(url, _)| url.clone());
            if let Some(url) = oldest {
                debug!(url = %url, "evicting parked redirect");
                self.redirects.remove(&url);
            }
        }
        self.parked += 1;
        let parked = ParkedRedirect {
            seq: self.parked,
            parked_at: now,
            fetch,
        };
        self.redirects.insert(target, parked);
    }

    fn evict_stale(&mut self, now: Instant) {
        self.redirects
            .retain(|_, p| now.saturating_duration_since(p.parked_at) < PARKED_REDIRECT_TTL);
    }

    /// Like `request`, but a failing hook answers `503` instead.
    pub async fn request_or_unavailable(&mut self, req: &mut InterceptedRequest) -> Option<InterceptedResponse> {
        match self.request(req).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %req.url, "proxy request hook failed: {}", e);
                Some(InterceptedResponse::new(503))
            }
        }
    }

    /// Response hook: store cookies set by an upstream answer.
    pub async fn response(&self, req: &InterceptedRequest, resp: &InterceptedResponse) -> Result<()> {
        if req.metadata.real_proxy {
            return Ok(());
        }
        let client = self.client()?;
        let now = chrono::Utc::now().timestamp();
        let store_id = req.metadata.store_id.as_deref();
        for (_, value) in resp.headers.iter().filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie")) {
            match BrowserCookie::from_set_cookie(value, &req.url, store_id, now) {
                Ok(cookie) => {
                    client.set_cookie(&cookie).await?;
                }
                Err(e) => warn!(url = %req.url, "skipping cookie: {}", e),
            }
        }
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        self.redirects.clear();
        if let Some(client) = self.client.take() {
            client.stop().await;
        }
    }
}
