//! Event subscriptions.
//!
//! The extension answers `subscribe` with `{subscriptionId}` first and then
//! one payload per event until the subscription is released. Release it
//! with [`Subscription::unsubscribe`] where the lifetime is clear; dropping an
//! unreleased subscription schedules a best-effort `unsubscribe` on the
//! runtime it was created on, which may never run if that runtime is
//! shutting down.

use ffcli_core::{Error, Result};
use futures::Stream;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tracing::debug;

use crate::client::Client;
use crate::response::Response;

pub struct Subscription {
    response: Response,
    id: Option<String>,
    /// Released explicitly or ended by the extension.
    finished: bool,
    runtime: Option<Handle>,
}

impl Subscription {
    pub(crate) fn new(
        client: Client,
        event: &str,
        num_events: Option<u64>,
        filter: Map<String, Value>,
    ) -> Self {
        let args = vec![
            Value::String(event.to_string()),
            num_events.map(Value::from).unwrap_or(Value::Null),
            Value::Object(filter),
        ];
        Self {
            response: Response::new(client, "subscribe", args),
            id: None,
            finished: false,
            runtime: Handle::try_current().ok(),
        }
    }

    async fn next_raw(&mut self) -> Option<Result<Value>> {
        let item = self.response.next().await;
        match &item {
            None | Some(Err(_)) => self.finished = true,
            Some(Ok(data)) if self.id.is_none() => {
                match data.get("subscriptionId").and_then(|v| v.as_str()) {
                    Some(id) => self.id = Some(id.to_string()),
                    None => {
                        self.finished = true;
                        return Some(Err(Error::Protocol(format!(
                            "subscription answered without an id: {}",
                            data
                        ))));
                    }
                }
            }
            Some(Ok(_)) => {}
        }
        item
    }

    /// The id assigned by the extension. Waits for the first item once, then
    /// returns the cached value.
    pub async fn id(&mut self) -> Result<String> {
        while self.id.is_none() {
            match self.next_raw().await {
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(Error::Protocol(
                        "subscription ended before an id was assigned".to_string(),
                    ))
                }
            }
        }
        Ok(self.id.clone().unwrap_or_default())
    }

    /// Next event payload; `None` once the extension ends the subscription.
    pub async fn next_event(&mut self) -> Option<Result<Value>> {
        if let Err(e) = self.id().await {
            return Some(Err(e));
        }
        loop {
            match self.next_raw().await? {
                Ok(Value::Null) => continue,
                other => return Some(other),
            }
        }
    }

    pub fn events(&mut self) -> impl Stream<Item = Result<Value>> + Send + '_ {
        futures::stream::unfold(self, |s| async move {
            let item = s.next_event().await?;
            Some((item, s))
        })
    }

    /// Release the remote registration. A no-op if the id was never resolved
    /// or the extension already ended the subscription.
    pub async fn unsubscribe(mut self) -> Result<()> {
        let Some(id) = self.id.clone() else {
            return Ok(());
        };
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.response.client().unsubscribe(&id).collect().await?;
        Ok(())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let (Some(id), Some(runtime)) = (self.id.take(), self.runtime.as_ref()) else {
            return;
        };
        let client = self.response.client().clone();
        // Spawning onto a runtime that is shutting down drops the task.
        runtime.spawn(async move {
            if let Err(e) = client.unsubscribe(&id).collect().await {
                debug!(subscription = %id, "best-effort unsubscribe failed: {}", e);
            }
        });
    }
}
