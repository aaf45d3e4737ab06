//! In-memory stand-in for the browser extension.

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

use crate::client::Client;

pub(crate) struct MockPeer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

pub(crate) fn mock_pair() -> (Client, MockPeer) {
    let (ours, theirs) = tokio::io::duplex(1 << 20);
    let (r, w) = tokio::io::split(theirs);
    let peer = MockPeer {
        lines: BufReader::new(r).lines(),
        writer: w,
    };
    (Client::from_stream(ours), peer)
}

impl MockPeer {
    /// Next call written by the client, as `{id, fn, args}`.
    pub async fn recv_call(&mut self) -> Value {
        let line = self
            .lines
            .next_line()
            .await
            .expect("read from client")
            .expect("client closed the socket");
        serde_json::from_str(&line).expect("client wrote invalid JSON")
    }

    /// Like `recv_call`, but `None` once the client hung up.
    pub async fn try_recv_call(&mut self) -> Option<Value> {
        let line = self.lines.next_line().await.ok()??;
        serde_json::from_str(&line).ok()
    }

    pub async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn send(&mut self, envelope: Value) {
        self.send_raw(&envelope.to_string()).await;
    }

    pub async fn data(&mut self, id: u64, data: Value) {
        self.send(json!({"id": id, "type": "data", "data": data})).await;
    }

    pub async fn complete(&mut self, id: u64, data: Value) {
        self.send(json!({"id": id, "type": "data", "data": data, "complete": true}))
            .await;
    }

    pub async fn complete_bare(&mut self, id: u64) {
        self.send(json!({"id": id, "complete": true})).await;
    }

    pub async fn error(&mut self, id: u64, data: Value) {
        self.send(json!({"id": id, "type": "error", "data": data})).await;
    }

    /// Answer the next call with a single final value, asserting its method.
    pub async fn answer(&mut self, method: &str, data: Value) -> Value {
        let call = self.recv_call().await;
        assert_eq!(call["fn"], method, "unexpected call {}", call);
        self.complete(call["id"].as_u64().unwrap(), data).await;
        call
    }
}
