//! Lazily established duplex stream to the extension.

use std::path::PathBuf;
use std::sync::Arc;

use ffcli_core::{Error, Result};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::dispatch::DispatchTable;
use crate::reader;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

enum Target {
    Unix(PathBuf),
    /// A stream handed in by the caller; taken on first connect.
    Stream(std::sync::Mutex<Option<(BoxedReader, BoxedWriter)>>),
}

pub(crate) struct Connection {
    target: Target,
    dispatch: Arc<DispatchTable>,
    writer: OnceCell<Mutex<BoxedWriter>>,
    reader_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    pub fn unix(path: PathBuf, dispatch: Arc<DispatchTable>) -> Self {
        Self::with_target(Target::Unix(path), dispatch)
    }

    pub fn stream<S>(stream: S, dispatch: Arc<DispatchTable>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (r, w) = tokio::io::split(stream);
        let halves: (BoxedReader, BoxedWriter) = (Box::new(r), Box::new(w));
        Self::with_target(Target::Stream(std::sync::Mutex::new(Some(halves))), dispatch)
    }

    fn with_target(target: Target, dispatch: Arc<DispatchTable>) -> Self {
        Self {
            target,
            dispatch,
            writer: OnceCell::new(),
            reader_handle: std::sync::Mutex::new(None),
        }
    }

    /// Connect once and start the reader loop. Concurrent callers share the
    /// same connection; a failed attempt is reported to every waiter.
    pub async fn ensure_connected(&self) -> Result<&Mutex<BoxedWriter>> {
        self.writer
            .get_or_try_init(|| async {
                let (reader, writer) = self.open().await?;
                let handle = tokio::spawn(reader::run(reader, self.dispatch.clone()));
                if let Ok(mut slot) = self.reader_handle.lock() {
                    *slot = Some(handle);
                }
                Ok::<_, Error>(Mutex::new(writer))
            })
            .await
    }

    async fn open(&self) -> Result<(BoxedReader, BoxedWriter)> {
        match &self.target {
            Target::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(|e| {
                    Error::Connection(format!("failed to connect to {}: {}", path.display(), e))
                })?;
                info!(socket = %path.display(), "connected to extension");
                let (r, w) = stream.into_split();
                Ok((Box::new(r), Box::new(w)))
            }
            Target::Stream(slot) => slot
                .lock()
                .ok()
                .and_then(|mut s| s.take())
                .ok_or_else(|| Error::Connection("stream already consumed".to_string())),
        }
    }

    /// Write one full line. Holding the writer lock across the write and the
    /// flush keeps lines from different callers from interleaving.
    pub async fn write_line(&self, line: &str) -> Result<()> {
        let writer = self.ensure_connected().await?;
        let mut w = writer.lock().await;
        let write = async {
            w.write_all(line.as_bytes()).await?;
            w.write_all(b"\n").await?;
            w.flush().await
        };
        write
            .await
            .map_err(|e| Error::Connection(format!("write error: {}", e)))
    }

    pub fn is_connected(&self) -> bool {
        self.writer.initialized()
    }

    /// Shut the stream down and release every call still waiting.
    pub async fn close(&self) {
        if let Some(writer) = self.writer.get() {
            let mut w = writer.lock().await;
            if let Err(e) = w.shutdown().await {
                debug!("shutdown of extension socket failed: {}", e);
            }
        }
        let handle = self.reader_handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            handle.abort();
        }
        self.dispatch.disconnect_all().await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.reader_handle.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}
