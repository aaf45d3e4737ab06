//! Per-call delivery queues keyed by call id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::codec::ResultEnvelope;

/// What the reader loop pushes into a call's queue.
///
/// A completed call is signalled by its sender being dropped, so the
/// consumer sees the end of the queue after the last envelope.
#[derive(Debug)]
pub(crate) enum Delivery {
    Envelope(ResultEnvelope),
    /// The connection ended before the call completed.
    Disconnected,
}

pub(crate) type DeliveryRx = mpsc::UnboundedReceiver<Delivery>;

pub(crate) struct DispatchTable {
    queues: Mutex<HashMap<u64, mpsc::UnboundedSender<Delivery>>>,
    next_id: AtomicU64,
    disconnected: AtomicBool,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Allocate the next call id and its queue.
    pub async fn register(&self) -> (u64, DeliveryRx) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        // checked under the lock so a concurrent disconnect_all cannot miss us
        let mut queues = self.queues.lock().await;
        if self.disconnected.load(Ordering::SeqCst) {
            let _ = tx.send(Delivery::Disconnected);
            return (id, rx);
        }
        queues.insert(id, tx);
        (id, rx)
    }

    pub async fn deregister(&self, id: u64) {
        self.queues.lock().await.remove(&id);
    }

    /// Route one envelope. Returns false when no live queue exists for its id.
    pub async fn deliver(&self, envelope: ResultEnvelope) -> bool {
        let id = envelope.id;
        let complete = envelope.complete;
        let mut queues = self.queues.lock().await;
        let Some(tx) = queues.get(&id) else {
            return false;
        };
        if tx.send(Delivery::Envelope(envelope)).is_err() {
            // consumer went away
            debug!(id, "dropping result for abandoned call");
            queues.remove(&id);
            return false;
        }
        if complete {
            queues.remove(&id);
        }
        true
    }

    /// Release every outstanding consumer after the connection ended.
    pub async fn disconnect_all(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        let mut queues = self.queues.lock().await;
        for (_, tx) in queues.drain() {
            let _ = tx.send(Delivery::Disconnected);
        }
    }

    pub async fn pending(&self) -> usize {
        self.queues.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(id: u64, data: serde_json::Value, complete: bool) -> ResultEnvelope {
        ResultEnvelope {
            id,
            kind: "data".to_string(),
            data: Some(data),
            complete,
        }
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let table = DispatchTable::new();
        let (a, _ra) = table.register().await;
        let (b, _rb) = table.register().await;
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(table.pending().await, 2);
    }

    #[tokio::test]
    async fn test_complete_removes_entry_and_closes_queue() {
        let table = DispatchTable::new();
        let (id, mut rx) = table.register().await;

        assert!(table.deliver(env(id, json!(1), false)).await);
        assert!(table.deliver(env(id, json!(2), true)).await);
        assert_eq!(table.pending().await, 0);
        // late arrival after completion
        assert!(!table.deliver(env(id, json!(3), false)).await);

        assert!(matches!(rx.recv().await, Some(Delivery::Envelope(e)) if e.data == Some(json!(1))));
        assert!(matches!(rx.recv().await, Some(Delivery::Envelope(e)) if e.data == Some(json!(2))));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_and_abandoned_ids_are_dropped() {
        let table = DispatchTable::new();
        assert!(!table.deliver(env(42, json!(null), false)).await);

        let (id, rx) = table.register().await;
        drop(rx);
        assert!(!table.deliver(env(id, json!(1), false)).await);
        assert_eq!(table.pending().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_releases_consumers() {
        let table = DispatchTable::new();
        let (_, mut rx) = table.register().await;
        table.disconnect_all().await;
        assert!(matches!(rx.recv().await, Some(Delivery::Disconnected)));
        assert!(rx.recv().await.is_none());

        // registering after the connection is gone fails immediately
        let (_, mut late) = table.register().await;
        assert!(matches!(late.recv().await, Some(Delivery::Disconnected)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_disconnect_racing_register_releases_everyone() {
        use std::sync::Arc;
        use std::time::Duration;

        for _ in 0..20 {
            let table = Arc::new(DispatchTable::new());
            let registrations: Vec<_> = (0..16)
                .map(|_| {
                    let table = table.clone();
                    tokio::spawn(async move { table.register().await.1 })
                })
                .collect();
            table.disconnect_all().await;
            for handle in registrations {
                let mut rx = handle.await.unwrap();
                let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                    .await
                    .expect("consumer left hanging");
                assert!(matches!(first, Some(Delivery::Disconnected)));
            }
            assert_eq!(table.pending().await, 0);
        }
    }
}
