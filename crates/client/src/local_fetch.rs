//! Local fetch emulator.
//!
//! Performs the HTTP exchange in this process with `reqwest` while borrowing
//! the browser's identity: cookies come from `browser.cookies.getAll` before
//! every hop, the user agent is the browser's, and `Set-Cookie` headers are
//! written back with `browser.cookies.set`. Progress is reported as the same
//! [`FetchEvent`]s a remote fetch produces.

use std::time::Duration;

use ffcli_core::{Error, Result};
use reqwest::header::{LOCATION, SET_COOKIE};
use reqwest::{Method, StatusCode};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::Client;
use crate::cookies::{cookie_header, BrowserCookie};
use crate::fetch::{FetchEvent, FetchHandle, FetchRequest, HeaderList, RedirectMode, RequestMeta, ResponseMeta};

type EventTx = mpsc::UnboundedSender<Result<FetchEvent>>;

impl Client {
    /// Fetch `request` locally. The exchange runs on a spawned task; the
    /// handle fails with the task's error if the exchange breaks off.
    pub fn local_fetch(&self, request: FetchRequest) -> FetchHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = run(&client, request, &tx).await {
                debug!("local fetch ended: {}", e);
                let _ = tx.send(Err(e));
            }
        });
        FetchHandle::local(rx)
    }
}

fn emit(tx: &EventTx, event: FetchEvent) -> Result<()> {
    tx.send(Ok(event))
        .map_err(|_| Error::Other("fetch handle dropped".to_string()))
}

fn http_error(url: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Http(format!("request to {} timed out", url))
    } else if e.is_connect() {
        Error::Http(format!("connection to {} failed: {}", url, e))
    } else {
        Error::Http(format!("request to {} failed: {}", url, e))
    }
}

fn build_http_client(timeout: Option<u64>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
    if let Some(secs) = timeout {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder
        .build()
        .map_err(|e| Error::Http(format!("failed to create HTTP client: {}", e)))
}

/// Request headers for one hop: the caller's, with the browser's user agent
/// and cookies replacing any the caller set.
fn hop_headers(base: &HeaderList, user_agent: &str, cookie: Option<&str>) -> HeaderList {
    let mut headers: HeaderList = base
        .iter()
        .filter(|(k, _)| {
            !k.eq_ignore_ascii_case("user-agent")
                && !(cookie.is_some() && k.eq_ignore_ascii_case("cookie"))
        })
        .cloned()
        .collect();
    headers.push(("User-Agent".to_string(), user_agent.to_string()));
    if let Some(cookie) = cookie {
        headers.push(("Cookie".to_string(), cookie.to_string()));
    }
    headers
}

fn follows(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Method (and whether the body is kept) for the next hop.
fn redirect_method(status: StatusCode, method: &Method) -> (Method, bool) {
    match status.as_u16() {
        303 if *method != Method::HEAD => (Method::GET, false),
        301 | 302 if *method == Method::POST => (Method::GET, false),
        _ => (method.clone(), true),
    }
}

async fn run(client: &Client, request: FetchRequest, tx: &EventTx) -> Result<()> {
    let store_id = request.store_id.as_deref();
    let user_agent = client.get_user_agent(request.real_ua, None).await?;
    let http = build_http_client(client.config().request_timeout_secs)?;
    let max_redirects = client.config().max_redirects;

    let mut url = request.url.clone();
    let mut method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| Error::Http(format!("invalid method {:?}", request.method)))?;
    let mut body = (!request.body.is_empty()).then(|| request.body.clone());
    let mut hops = 0usize;

    loop {
        let cookies = client.cookies_for(&url, store_id).await?;
        let headers = hop_headers(&request.headers, &user_agent, cookie_header(&cookies).as_deref());
        emit(
            tx,
            FetchEvent::RequestSent(RequestMeta {
                url: url.clone(),
                method: method.to_string(),
                headers: headers.clone(),
            }),
        )?;

        let mut builder = http.request(method.clone(), &url);
        for (k, v) in &headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some(body) = &body {
            builder = builder.body(body.clone());
        }
        debug!(method = %method, url = %url, "local fetch hop");
        let mut response = builder.send().await.map_err(|e| http_error(&url, e))?;

        let status = response.status();
        let response_headers: HeaderList = response
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let set_cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        emit(
            tx,
            FetchEvent::HeadersReceived(ResponseMeta {
                status: status.as_u16(),
                status_line: Some(format!("{:?} {}", response.version(), status)),
                headers: response_headers,
                url: Some(url.clone()),
                redirected: hops > 0,
            }),
        )?;

        while let Some(chunk) = response.chunk().await.map_err(|e| http_error(&url, e))? {
            emit(tx, FetchEvent::Body(chunk))?;
        }

        let now = chrono::Utc::now().timestamp();
        for header in &set_cookies {
            let cookie = match BrowserCookie::from_set_cookie(header, &url, store_id, now) {
                Ok(cookie) => cookie,
                Err(e) => {
                    warn!("skipping cookie from {}: {}", url, e);
                    continue;
                }
            };
            if let Err(e) = client.set_cookie(&cookie).await {
                warn!(name = %cookie.name, "failed to store cookie: {}", e);
            }
        }

        if !follows(status) || request.redirect == RedirectMode::Manual {
            return Ok(());
        }
        let Some(location) = location else {
            return Ok(());
        };
        if hops >= max_redirects {
            return Err(Error::Http(format!(
                "too many redirects (more than {}) from {}",
                max_redirects, request.url
            )));
        }

        let next = url::Url::parse(&url)
            .and_then(|base| base.join(&location))
            .map_err(|e| Error::Http(format!("bad redirect location {:?}: {}", location, e)))?;
        let (next_method, keep_body) = redirect_method(status, &method);
        if !keep_body {
            body = None;
        }
        method = next_method;
        url = next.to_string();
        hops += 1;
    }
}
