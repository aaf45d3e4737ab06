//! The extension client: one connection shared by every call.
//!
//! Calls are multiplexed by id over a single newline-delimited JSON stream.
//! A background reader task routes each incoming envelope to the queue of
//! the call it answers, so any number of calls can be in flight at once.

use std::path::PathBuf;
use std::sync::Arc;

use ffcli_core::{Config, Result};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::builder::RequestBuilder;
use crate::codec;
use crate::connection::Connection;
use crate::dispatch::{DeliveryRx, DispatchTable};
use crate::reader;
use crate::response::Response;
use crate::subscription::Subscription;

struct ClientInner {
    connection: Connection,
    dispatch: Arc<DispatchTable>,
    config: Config,
}

/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Client for the socket at `socket_path`. Connects on first use.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self::with_config(socket_path, Config::default())
    }

    pub fn with_config(socket_path: impl Into<PathBuf>, config: Config) -> Self {
        let dispatch = Arc::new(DispatchTable::new());
        let connection = Connection::unix(socket_path.into(), dispatch.clone());
        Self::assemble(connection, dispatch, config)
    }

    /// Client for a Firefox profile name or directory (`None` uses the
    /// configured profile). Fails if the profile has no extension socket.
    pub fn from_profile(profile: Option<&str>, config: &Config) -> Result<Self> {
        let socket = config.socket_path(profile)?;
        debug!(socket = %socket.display(), "resolved extension socket");
        Ok(Self::with_config(socket, config.clone()))
    }

    /// Client over an already open stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let dispatch = Arc::new(DispatchTable::new());
        let connection = Connection::stream(stream, dispatch.clone());
        Self::assemble(connection, dispatch, Config::default())
    }

    fn assemble(connection: Connection, dispatch: Arc<DispatchTable>, config: Config) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                connection,
                dispatch,
                config,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Connect now instead of on the first call.
    pub async fn start(&self) -> Result<()> {
        self.inner.connection.ensure_connected().await.map(|_| ())
    }

    pub async fn stop(&self) {
        self.inner.connection.close().await;
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    /// Number of calls still waiting for their completion envelope.
    pub async fn pending_calls(&self) -> usize {
        self.inner.dispatch.pending().await
    }

    /// Register a queue under a fresh id, then write the call. The queue
    /// exists before the line is sent so an early answer is never lost.
    pub(crate) async fn execute(&self, method: &str, args: Vec<Value>) -> Result<DeliveryRx> {
        let (id, rx) = self.inner.dispatch.register().await;
        let sent = async {
            let line = codec::encode_call(id, method, &args)?;
            debug!(id, "ffcli → {}", reader::preview(line.as_bytes()));
            self.inner.connection.write_line(&line).await
        };
        if let Err(e) = sent.await {
            self.inner.dispatch.deregister(id).await;
            return Err(e);
        }
        Ok(rx)
    }

    /// Call `method` (a dotted path) with positional arguments.
    pub fn invoke(&self, method: &str, args: Vec<Value>) -> Response {
        Response::new(self.clone(), method, args)
    }

    /// Start a dotted method path, e.g. `client.method("browser").attr("tabs")`.
    pub fn method(&self, name: &str) -> RequestBuilder {
        RequestBuilder::new(self.clone(), name)
    }

    pub fn browser(&self) -> RequestBuilder {
        self.method("browser")
    }

    /// Subscribe to an extension event such as `browser.tabs.onUpdated`.
    /// `num_events` limits how many events the extension forwards.
    pub fn subscribe(
        &self,
        event: &str,
        num_events: Option<u64>,
        filter: Map<String, Value>,
    ) -> Subscription {
        Subscription::new(self.clone(), event, num_events, filter)
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> Response {
        self.invoke("unsubscribe", vec![Value::String(subscription_id.to_string())])
    }
}
