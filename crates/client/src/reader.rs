//! Background task demultiplexing incoming lines into the dispatch table.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, error, warn};

use crate::codec;
use crate::dispatch::DispatchTable;

/// Read until end of stream. Malformed lines are logged and skipped; on exit
/// every call still waiting is released with a disconnect marker.
pub(crate) async fn run<R>(reader: R, table: Arc<DispatchTable>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => {
                debug!("extension socket closed");
                break;
            }
            Ok(_) => {
                let text = trim_line(&line);
                if text.is_empty() {
                    continue;
                }
                debug!("ffcli ← {}", preview(text));
                match codec::decode_line(text) {
                    Ok(envelope) => {
                        let id = envelope.id;
                        if !table.deliver(envelope).await {
                            debug!(id, "no pending call for result, discarded");
                        }
                    }
                    Err(e) => {
                        warn!("discarding line from extension: {}", e);
                    }
                }
            }
            Err(e) => {
                error!("extension socket read error: {}", e);
                break;
            }
        }
    }

    table.disconnect_all().await;
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r' | b' ' | b'\t') {
        end -= 1;
    }
    &line[..end]
}

pub(crate) fn preview(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    text.chars().take(200).collect()
}
