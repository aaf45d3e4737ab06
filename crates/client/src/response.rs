//! Call handles: one issued remote call viewed as a lazy sequence of payloads.

use std::future::IntoFuture;

use ffcli_core::{Error, Result};
use futures::future::BoxFuture;
use futures::Stream;
use serde_json::Value;

use crate::client::Client;
use crate::dispatch::{Delivery, DeliveryRx};

enum State {
    Unissued(Vec<Value>),
    Issued(DeliveryRx),
    Finished,
}

/// A remote call. Nothing is sent until the first item is requested.
///
/// Awaiting a `Response` directly drains it and yields the final value.
pub struct Response {
    client: Client,
    method: String,
    state: State,
}

impl Response {
    pub(crate) fn new(client: Client, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            client,
            method: method.into(),
            state: State::Unissued(args),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Send the call if that has not happened yet.
    pub async fn issue(&mut self) -> Result<()> {
        let args = match &mut self.state {
            State::Unissued(args) => std::mem::take(args),
            _ => return Ok(()),
        };
        match self.client.execute(&self.method, args).await {
            Ok(rx) => {
                self.state = State::Issued(rx);
                Ok(())
            }
            Err(e) => {
                self.state = State::Finished;
                Err(e)
            }
        }
    }

    /// Next payload, or `None` once the call has completed.
    ///
    /// An error envelope fails the sequence at that point and nothing queued
    /// behind it is delivered.
    pub async fn next(&mut self) -> Option<Result<Value>> {
        if let Err(e) = self.issue().await {
            return Some(Err(e));
        }
        loop {
            let State::Issued(rx) = &mut self.state else {
                return None;
            };
            match rx.recv().await {
                None => {
                    self.state = State::Finished;
                    return None;
                }
                Some(Delivery::Disconnected) => {
                    self.state = State::Finished;
                    return Some(Err(Error::ConnectionClosed));
                }
                Some(Delivery::Envelope(envelope)) => {
                    if envelope.is_error() {
                        self.state = State::Finished;
                        return Some(Err(Error::Remote(envelope.data.unwrap_or(Value::Null))));
                    }
                    match envelope.data {
                        Some(data) => return Some(Ok(data)),
                        // bare completion marker
                        None if envelope.complete => continue,
                        None => return Some(Ok(Value::Null)),
                    }
                }
            }
        }
    }

    /// The payloads as a stream borrowing this handle.
    pub fn stream(&mut self) -> impl Stream<Item = Result<Value>> + Send + '_ {
        futures::stream::unfold(self, |r| async move {
            let item = r.next().await?;
            Some((item, r))
        })
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Value>> + Send + 'static {
        futures::stream::unfold(self, |mut r| async move {
            let item = r.next().await?;
            Some((item, r))
        })
    }

    /// First payload; the rest stays queued for later pulls.
    pub async fn first(&mut self) -> Result<Value> {
        match self.next().await {
            Some(item) => item,
            None => Err(Error::EmptyResult(self.method.clone())),
        }
    }

    /// Drain the call and return the last payload.
    pub async fn get(mut self) -> Result<Value> {
        let mut last = None;
        while let Some(item) = self.next().await {
            last = Some(item?);
        }
        last.ok_or(Error::EmptyResult(self.method))
    }

    pub async fn collect(mut self) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await {
            out.push(item?);
        }
        Ok(out)
    }
}

impl IntoFuture for Response {
    type Output = Result<Value>;
    type IntoFuture = BoxFuture<'static, Result<Value>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock_pair;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_nothing_is_sent_before_first_pull() {
        let (client, _peer) = mock_pair();
        let mut resp = client.invoke("status", vec![]);
        assert_eq!(resp.method(), "status");
        assert_eq!(client.pending_calls().await, 0);
        resp.issue().await.unwrap();
        resp.issue().await.unwrap();
        assert_eq!(client.pending_calls().await, 1);
    }

    #[tokio::test]
    async fn test_get_returns_final_value() {
        let (client, mut peer) = mock_pair();
        let server = tokio::spawn(async move {
            let call = peer.recv_call().await;
            assert_eq!(call["fn"], "status");
            assert_eq!(call["args"], json!([]));
            peer.complete(call["id"].as_u64().unwrap(), json!(true)).await;
            peer
        });
        let value = client.invoke("status", vec![]).await.unwrap();
        assert_eq!(value, json!(true));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_error_stops_sequence_at_error_point() {
        let (client, mut peer) = mock_pair();
        let mut resp = client.invoke("stream", vec![]);
        resp.issue().await.unwrap();

        let call = peer.recv_call().await;
        let id = call["id"].as_u64().unwrap();
        peer.data(id, json!(1)).await;
        peer.data(id, json!(2)).await;
        peer.error(id, json!({"error": "boom"})).await;
        peer.data(id, json!(3)).await;
        peer.complete(id, json!(4)).await;

        assert_eq!(resp.next().await.unwrap().unwrap(), json!(1));
        assert_eq!(resp.next().await.unwrap().unwrap(), json!(2));
        match resp.next().await {
            Some(Err(Error::Remote(payload))) => assert_eq!(payload, json!({"error": "boom"})),
            other => panic!("expected remote error, got {:?}", other),
        }
        assert!(resp.next().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_result_is_an_error() {
        let (client, mut peer) = mock_pair();
        let server = tokio::spawn(async move {
            let call = peer.recv_call().await;
            peer.complete_bare(call["id"].as_u64().unwrap()).await;
            peer
        });
        let err = client.invoke("nothing", vec![]).get().await.unwrap_err();
        assert!(matches!(err, Error::EmptyResult(ref m) if m == "nothing"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_explicit_null_is_a_value() {
        let (client, mut peer) = mock_pair();
        let server = tokio::spawn(async move {
            let call = peer.recv_call().await;
            peer.complete(call["id"].as_u64().unwrap(), Value::Null).await;
            peer
        });
        assert_eq!(client.invoke("noop", vec![]).await.unwrap(), Value::Null);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_first_leaves_rest_queued() {
        let (client, mut peer) = mock_pair();
        let mut resp = client.invoke("multi", vec![]);
        resp.issue().await.unwrap();
        let id = peer.recv_call().await["id"].as_u64().unwrap();
        peer.data(id, json!("a")).await;
        peer.data(id, json!("b")).await;
        peer.complete(id, json!("c")).await;

        assert_eq!(resp.first().await.unwrap(), json!("a"));
        let rest: Vec<Value> = resp
            .stream()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(rest, vec![json!("b"), json!("c")]);
        // exhausted: re-iteration yields nothing further
        assert!(resp.next().await.is_none());
        assert!(matches!(resp.first().await, Err(Error::EmptyResult(_))));
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_call() {
        let (client, mut peer) = mock_pair();
        let mut resp = client.invoke("hang", vec![]);
        resp.issue().await.unwrap();
        let id = peer.recv_call().await["id"].as_u64().unwrap();
        peer.data(id, json!(1)).await;
        drop(peer);

        assert_eq!(resp.next().await.unwrap().unwrap(), json!(1));
        assert!(matches!(resp.next().await, Some(Err(Error::ConnectionClosed))));
        assert!(resp.next().await.is_none());
    }
}
