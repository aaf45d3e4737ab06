//! HTTP fetches performed through the extension (or emulated locally).
//!
//! The extension reports a fetch as a stream of events. Two shapes exist on
//! the wire: tagged items `{type, data}` (`sendHeaders`, `headersReceived`,
//! `response`, `responseBody`) and flat items carrying `status`, `headers`
//! and `body` directly. Both are normalized into [`FetchEvent`] as soon as
//! they are parsed, so [`FetchHandle`] only deals with one shape.

use std::collections::VecDeque;

use base64::Engine;
use bytes::{Bytes, BytesMut};
use ffcli_core::{Error, Result};
use futures::Stream;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use crate::client::Client;
use crate::response::Response;

pub type HeaderList = Vec<(String, String)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectMode {
    #[default]
    Follow,
    /// Report the redirect response instead of chasing it.
    Manual,
}

impl RedirectMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: String,
    pub headers: HeaderList,
    pub body: Bytes,
    /// Cookie store (container) whose cookies the request uses.
    pub store_id: Option<String>,
    pub redirect: RedirectMode,
    /// Resolve the user agent from inside a real tab.
    pub real_ua: bool,
    /// Run the fetch inside this tab (extension only).
    pub tab_id: Option<i64>,
    /// Fetch cache mode (extension only), e.g. `no-store`.
    pub cache: Option<String>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
            store_id: None,
            redirect: RedirectMode::default(),
            real_ua: false,
            tab_id: None,
            cache: None,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn store_id(mut self, store_id: Option<String>) -> Self {
        self.store_id = store_id;
        self
    }

    pub fn redirect(mut self, redirect: RedirectMode) -> Self {
        self.redirect = redirect;
        self
    }

    pub fn real_ua(mut self, real_ua: bool) -> Self {
        self.real_ua = real_ua;
        self
    }

    pub fn tab_id(mut self, tab_id: Option<i64>) -> Self {
        self.tab_id = tab_id;
        self
    }

    pub fn cache(mut self, cache: Option<String>) -> Self {
        self.cache = cache;
        self
    }

    /// Options object of the extension's `fetch(url, opts)`.
    fn remote_options(&self) -> Value {
        let headers: Map<String, Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let body = if self.body.is_empty() {
            Value::Null
        } else {
            Value::String(base64::engine::general_purpose::STANDARD.encode(&self.body))
        };
        let mut opts = json!({
            "method": self.method,
            "headers": headers,
            "body": body,
            "cookieStoreId": self.store_id,
            "redirect": self.redirect.as_str(),
        });
        if let Some(tab) = self.tab_id {
            opts["tabId"] = json!(tab);
        }
        if let Some(cache) = &self.cache {
            opts["cache"] = json!(cache);
        }
        opts
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestMeta {
    pub url: String,
    pub method: String,
    pub headers: HeaderList,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseMeta {
    pub status: u16,
    pub status_line: Option<String>,
    pub headers: HeaderList,
    pub url: Option<String>,
    /// The fetch followed at least one redirect to reach `url`.
    pub redirected: bool,
}

impl ResponseMeta {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

/// One normalized step of a fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchEvent {
    /// Request headers as sent on the wire (one per hop).
    RequestSent(RequestMeta),
    /// Response headers observed by request tracking (one per hop).
    HeadersReceived(ResponseMeta),
    /// Response as seen by the fetch itself, after any redirects.
    Response(ResponseMeta),
    Body(Bytes),
    Other { kind: String, data: Value },
}

impl FetchEvent {
    /// Normalize one payload of the extension's `fetch` call. `null` (the
    /// final value of the call) produces no events.
    pub fn parse(payload: Value) -> Result<Vec<FetchEvent>> {
        let mut map = match payload {
            Value::Null => return Ok(Vec::new()),
            Value::Object(map) => map,
            other => {
                return Ok(vec![FetchEvent::Other {
                    kind: String::new(),
                    data: other,
                }])
            }
        };

        let tagged = map.contains_key("data") && map.get("type").map_or(false, |t| t.is_string());
        if tagged {
            let kind = map
                .remove("type")
                .and_then(|t| t.as_str().map(str::to_string))
                .unwrap_or_default();
            let data = map.remove("data").unwrap_or(Value::Null);
            let event = match kind.as_str() {
                "sendHeaders" => FetchEvent::RequestSent(request_meta(&data)),
                "headersReceived" => FetchEvent::HeadersReceived(response_meta(&data)),
                "response" => FetchEvent::Response(response_meta(&data)),
                "responseBody" => FetchEvent::Body(decode_body(&data)?),
                _ => FetchEvent::Other { kind, data },
            };
            return Ok(vec![event]);
        }

        let data = Value::Object(map);
        let mut events = Vec::new();
        if data.get("status").is_some() || data.get("statusCode").is_some() {
            events.push(FetchEvent::Response(response_meta(&data)));
        }
        if let Some(body) = data.get("body").filter(|b| !b.is_null()) {
            events.push(FetchEvent::Body(decode_body(body)?));
        }
        if events.is_empty() {
            events.push(FetchEvent::Other {
                kind: String::new(),
                data,
            });
        }
        Ok(events)
    }
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(|s| s.as_str()).map(str::to_string)
}

/// `[{name, value}]` lists used by request tracking.
fn header_list(v: Option<&Value>) -> HeaderList {
    let Some(items) = v.and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|h| {
            let name = h.get("name")?.as_str()?.to_string();
            let value = match h.get("value").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => {
                    let raw: Vec<u8> = h
                        .get("binaryValue")?
                        .as_array()?
                        .iter()
                        .filter_map(|b| b.as_u64().map(|b| b as u8))
                        .collect();
                    String::from_utf8_lossy(&raw).into_owned()
                }
            };
            Some((name, value))
        })
        .collect()
}

/// `{name: value}` objects used by the fetch API.
fn header_object(v: Option<&Value>) -> HeaderList {
    let Some(obj) = v.and_then(|v| v.as_object()) else {
        return Vec::new();
    };
    obj.iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

fn request_meta(data: &Value) -> RequestMeta {
    RequestMeta {
        url: str_field(data, "url").unwrap_or_default(),
        method: str_field(data, "method").unwrap_or_else(|| "GET".to_string()),
        headers: header_list(data.get("requestHeaders")),
    }
}

fn response_meta(data: &Value) -> ResponseMeta {
    let status = data
        .get("statusCode")
        .or_else(|| data.get("status"))
        .and_then(|s| s.as_u64())
        .and_then(|s| u16::try_from(s).ok())
        .unwrap_or(0);
    let headers = if data.get("responseHeaders").is_some() {
        header_list(data.get("responseHeaders"))
    } else {
        header_object(data.get("headers"))
    };
    let status_line = str_field(data, "statusLine").or_else(|| {
        str_field(data, "statusText")
            .filter(|t| !t.is_empty())
            .map(|t| format!("HTTP {} {}", status, t))
    });
    ResponseMeta {
        status,
        status_line,
        headers,
        url: str_field(data, "url"),
        redirected: data.get("redirected").and_then(|r| r.as_bool()).unwrap_or(false),
    }
}

fn decode_body(data: &Value) -> Result<Bytes> {
    match data {
        Value::String(s) => base64::engine::general_purpose::STANDARD
            .decode(s)
            .map(Bytes::from)
            .map_err(|e| Error::Protocol(format!("invalid base64 body chunk: {}", e))),
        Value::Array(items) => Ok(items
            .iter()
            .filter_map(|b| b.as_u64().map(|b| b as u8))
            .collect::<Vec<u8>>()
            .into()),
        other => Err(Error::Protocol(format!("unexpected body chunk: {}", other))),
    }
}

enum EventSource {
    Remote(Response),
    Local(mpsc::UnboundedReceiver<Result<FetchEvent>>),
}

/// A fetch in progress, remote or emulated.
///
/// Metadata is cached as events go by; body chunks seen while waiting for
/// metadata are buffered and handed out first by [`FetchHandle::read`].
pub struct FetchHandle {
    source: EventSource,
    queued: VecDeque<FetchEvent>,
    request: Option<RequestMeta>,
    response: Option<ResponseMeta>,
    /// Request tracking is active; `Response` events no longer overwrite
    /// the metadata reported by `HeadersReceived`.
    tracked: bool,
    body: VecDeque<Bytes>,
    done: bool,
}

impl FetchHandle {
    pub(crate) fn remote(response: Response) -> Self {
        Self::with_source(EventSource::Remote(response))
    }

    pub(crate) fn local(rx: mpsc::UnboundedReceiver<Result<FetchEvent>>) -> Self {
        Self::with_source(EventSource::Local(rx))
    }

    fn with_source(source: EventSource) -> Self {
        Self {
            source,
            queued: VecDeque::new(),
            request: None,
            response: None,
            tracked: false,
            body: VecDeque::new(),
            done: false,
        }
    }

    async fn pull(&mut self) -> Option<Result<FetchEvent>> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Some(Ok(event));
            }
            if self.done {
                return None;
            }
            match &mut self.source {
                EventSource::Local(rx) => return rx.recv().await,
                EventSource::Remote(response) => match response.next().await? {
                    Ok(payload) => match FetchEvent::parse(payload) {
                        Ok(events) => self.queued.extend(events),
                        Err(e) => return Some(Err(e)),
                    },
                    Err(e) => return Some(Err(e)),
                },
            }
        }
    }

    /// Next normalized event. Metadata and body chunks are also recorded on
    /// the handle.
    pub async fn next_event(&mut self) -> Option<Result<FetchEvent>> {
        match self.pull().await {
            None => {
                self.done = true;
                None
            }
            Some(Err(e)) => {
                self.done = true;
                self.queued.clear();
                Some(Err(e))
            }
            Some(Ok(event)) => {
                self.observe(&event);
                Some(Ok(event))
            }
        }
    }

    fn observe(&mut self, event: &FetchEvent) {
        match event {
            FetchEvent::RequestSent(meta) => {
                self.tracked = true;
                self.request = Some(meta.clone());
            }
            FetchEvent::HeadersReceived(meta) => self.response = Some(meta.clone()),
            FetchEvent::Response(meta) if !self.tracked => self.response = Some(meta.clone()),
            FetchEvent::Body(chunk) => self.body.push_back(chunk.clone()),
            _ => {}
        }
    }

    pub fn request(&self) -> Option<&RequestMeta> {
        self.request.as_ref()
    }

    /// Response metadata, waiting for it if necessary. After redirects the
    /// most recent hop wins.
    pub async fn response_meta(&mut self) -> Result<&ResponseMeta> {
        while self.response.is_none() {
            match self.next_event().await {
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(Error::Protocol(
                        "fetch finished without response headers".to_string(),
                    ))
                }
            }
        }
        self.response
            .as_ref()
            .ok_or_else(|| Error::Protocol("missing response metadata".to_string()))
    }

    pub async fn status(&mut self) -> Result<u16> {
        Ok(self.response_meta().await?.status)
    }

    pub async fn headers(&mut self) -> Result<HeaderList> {
        Ok(self.response_meta().await?.headers.clone())
    }

    /// Next body chunk not yet handed out, or `None` once the fetch is over.
    pub async fn read(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(chunk) = self.body.pop_front() {
                return Ok(Some(chunk));
            }
            match self.next_event().await {
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
                None => return Ok(None),
            }
        }
    }

    /// The rest of the body.
    pub async fn bytes(&mut self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.read().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    pub fn body_stream(&mut self) -> impl Stream<Item = Result<Bytes>> + Send + '_ {
        futures::stream::unfold(self, |h| async move {
            match h.read().await {
                Ok(Some(chunk)) => Some((Ok(chunk), h)),
                Ok(None) => None,
                Err(e) => Some((Err(e), h)),
            }
        })
    }

    /// Forget buffered body chunks already consumed through `next_event`.
    pub fn discard_buffered(&mut self) {
        self.body.clear();
    }

    /// Target of the current redirect response (3xx with `Location`),
    /// resolved against the request URL.
    pub fn redirect_location(&self) -> Option<String> {
        let meta = self.response.as_ref().filter(|m| m.is_redirect())?;
        let location = meta.header("location")?;
        let base = self
            .request
            .as_ref()
            .map(|r| r.url.as_str())
            .or(meta.url.as_deref());
        match base.and_then(|b| url::Url::parse(b).ok()) {
            Some(base) => base.join(location).ok().map(String::from),
            None => Some(location.to_string()),
        }
    }

    /// Final URL when the fetch followed redirects on its own.
    pub fn redirected_to(&self) -> Option<String> {
        self.response
            .as_ref()
            .filter(|m| m.redirected)
            .and_then(|m| m.url.clone())
    }
}

impl Client {
    /// Fetch through the extension, with the browser's cookies and network
    /// stack.
    pub fn fetch(&self, request: &FetchRequest) -> FetchHandle {
        let response = self.invoke(
            "fetch",
            vec![Value::String(request.url.clone()), request.remote_options()],
        );
        FetchHandle::remote(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock_pair;
    use futures::StreamExt;

    fn b64(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s)
    }

    #[test]
    fn test_parse_tagged_events() {
        let events = FetchEvent::parse(json!({
            "type": "sendHeaders",
            "data": {"url": "https://a.test/", "method": "POST",
                     "requestHeaders": [{"name": "Accept", "value": "*/*"}]}
        }))
        .unwrap();
        assert_eq!(
            events,
            vec![FetchEvent::RequestSent(RequestMeta {
                url: "https://a.test/".into(),
                method: "POST".into(),
                headers: vec![("Accept".into(), "*/*".into())],
            })]
        );

        let events = FetchEvent::parse(json!({
            "type": "headersReceived",
            "data": {"statusCode": 404, "statusLine": "HTTP/1.1 404 Not Found",
                     "responseHeaders": [{"name": "X-Bin", "binaryValue": [104, 105]}]}
        }))
        .unwrap();
        match &events[0] {
            FetchEvent::HeadersReceived(meta) => {
                assert_eq!(meta.status, 404);
                assert_eq!(meta.status_line.as_deref(), Some("HTTP/1.1 404 Not Found"));
                assert_eq!(meta.header("x-bin"), Some("hi"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let events = FetchEvent::parse(json!({"type": "responseBody", "data": b64("hello")})).unwrap();
        assert_eq!(events, vec![FetchEvent::Body(Bytes::from_static(b"hello"))]);

        assert!(FetchEvent::parse(Value::Null).unwrap().is_empty());
        assert!(FetchEvent::parse(json!({"type": "responseBody", "data": "%%%"})).is_err());
    }

    #[test]
    fn test_parse_flat_shape() {
        let events = FetchEvent::parse(json!({
            "status": 200,
            "statusText": "OK",
            "headers": {"content-type": "text/plain"},
            "url": "https://b.test/final",
            "redirected": true,
            "body": b64("flat"),
        }))
        .unwrap();
        assert_eq!(events.len(), 2);
        match &events[0] {
            FetchEvent::Response(meta) => {
                assert_eq!(meta.status, 200);
                assert_eq!(meta.status_line.as_deref(), Some("HTTP 200 OK"));
                assert_eq!(meta.header("Content-Type"), Some("text/plain"));
                assert!(meta.redirected);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(events[1], FetchEvent::Body(Bytes::from_static(b"flat")));
    }

    #[test]
    fn test_out_of_range_status_is_unknown() {
        let events = FetchEvent::parse(json!({"status": 65736, "headers": {}})).unwrap();
        match &events[0] {
            FetchEvent::Response(meta) => assert_eq!(meta.status, 0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tagged_fetch_scenario() {
        let (client, mut peer) = mock_pair();
        let request = FetchRequest::new("https://example.com/")
            .method("POST")
            .header("X-Test", "1")
            .body(&b"payload"[..])
            .store_id(Some("firefox-container-1".into()))
            .redirect(RedirectMode::Manual);
        let mut fetch = client.fetch(&request);

        let server = tokio::spawn(async move {
            let call = peer.recv_call().await;
            assert_eq!(call["fn"], "fetch");
            assert_eq!(call["args"][0], "https://example.com/");
            let opts = &call["args"][1];
            assert_eq!(opts["method"], "POST");
            assert_eq!(opts["headers"], json!({"X-Test": "1"}));
            assert_eq!(opts["body"], json!(b64("payload")));
            assert_eq!(opts["cookieStoreId"], "firefox-container-1");
            assert_eq!(opts["redirect"], "manual");

            let id = call["id"].as_u64().unwrap();
            peer.data(id, json!({"type": "sendHeaders", "data": {"url": "https://example.com/", "method": "POST", "requestHeaders": []}})).await;
            peer.data(id, json!({"type": "headersReceived", "data": {"statusCode": 200, "responseHeaders": [{"name": "Content-Type", "value": "text/html"}]}})).await;
            // ignored for metadata once request tracking is active
            peer.data(id, json!({"type": "response", "data": {"status": 299, "headers": {}}})).await;
            peer.data(id, json!({"type": "responseBody", "data": b64("hello ")})).await;
            peer.data(id, json!({"type": "responseBody", "data": b64("world")})).await;
            peer.complete(id, Value::Null).await;
            peer
        });

        assert_eq!(fetch.status().await.unwrap(), 200);
        assert_eq!(
            fetch.headers().await.unwrap(),
            vec![("Content-Type".to_string(), "text/html".to_string())]
        );
        assert_eq!(fetch.request().unwrap().method, "POST");
        assert_eq!(&fetch.bytes().await.unwrap()[..], b"hello world");
        assert_eq!(fetch.status().await.unwrap(), 200);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_read_returns_disjoint_chunks() {
        let (client, mut peer) = mock_pair();
        let mut fetch = client.fetch(&FetchRequest::new("https://example.com/"));
        let server = tokio::spawn(async move {
            let id = peer.recv_call().await["id"].as_u64().unwrap();
            peer.data(id, json!({"type": "responseBody", "data": b64("a")})).await;
            peer.data(id, json!({"type": "headersReceived", "data": {"statusCode": 200, "responseHeaders": []}})).await;
            for chunk in ["b", "c", "d"] {
                peer.data(id, json!({"type": "responseBody", "data": b64(chunk)})).await;
            }
            peer.complete(id, Value::Null).await;
            peer
        });

        // body chunk "a" arrives before the headers and gets buffered
        assert_eq!(fetch.status().await.unwrap(), 200);
        let mut chunks = Vec::new();
        while let Some(chunk) = fetch.read().await.unwrap() {
            chunks.push(chunk);
        }
        assert_eq!(chunks, vec!["a", "b", "c", "d"].into_iter().map(Bytes::from).collect::<Vec<_>>());
        assert!(fetch.read().await.unwrap().is_none());
        assert!(Box::pin(fetch.body_stream()).next().await.is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_redirect_signals() {
        let (client, mut peer) = mock_pair();
        let mut fetch = client.fetch(&FetchRequest::new("https://a.test/start").redirect(RedirectMode::Manual));
        let server = tokio::spawn(async move {
            let id = peer.recv_call().await["id"].as_u64().unwrap();
            peer.data(id, json!({"type": "sendHeaders", "data": {"url": "https://a.test/start", "method": "GET"}})).await;
            peer.data(id, json!({"type": "headersReceived", "data": {"statusCode": 302, "responseHeaders": [{"name": "Location", "value": "/next"}]}})).await;
            peer.complete(id, Value::Null).await;
            peer
        });
        assert_eq!(fetch.status().await.unwrap(), 302);
        assert_eq!(fetch.redirect_location().as_deref(), Some("https://a.test/next"));
        assert!(fetch.redirected_to().is_none());
        assert!(fetch.bytes().await.unwrap().is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_error_fails_status() {
        let (client, mut peer) = mock_pair();
        let mut fetch = client.fetch(&FetchRequest::new("https://a.test/"));
        let server = tokio::spawn(async move {
            let id = peer.recv_call().await["id"].as_u64().unwrap();
            peer.send(json!({"id": id, "type": "error", "data": {"error": "TypeError: NetworkError"}, "complete": true})).await;
            peer
        });
        assert!(matches!(fetch.status().await, Err(Error::Remote(_))));
        assert!(fetch.read().await.unwrap().is_none());
        server.await.unwrap();
    }
}
