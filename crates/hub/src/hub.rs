//! Broadcast hub: one registry of subscribers, one worker doing fan-out.
//!
//! Inbound frames are decoded once, collapsed to the payload viewers should
//! see, debounced against the last enqueued payload and pushed onto a
//! bounded queue. A single worker drains the queue in order and offers each
//! frame to every subscriber without waiting on any of them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use busrelay_protocol::{InboundMessage, Payload};

use crate::history::HistoryStore;

/// Rendered text frame shared by every subscriber of one broadcast.
pub type Frame = Arc<str>;

/// What happened to an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// Queued for fan-out.
    Enqueued,
    /// Same payload as the previous broadcast.
    Debounced,
    /// Nothing to broadcast (empty batch).
    Empty,
    /// The queue was full or the hub is shutting down.
    Dropped,
}

#[derive(Debug, Default)]
struct Registry {
    subscribers: RwLock<HashMap<String, mpsc::Sender<Frame>>>,
}

impl Registry {
    fn snapshot(&self) -> Vec<(String, mpsc::Sender<Frame>)> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, tx)| (id.clone(), tx.clone()))
            .collect()
    }

    fn insert(&self, id: String, tx: mpsc::Sender<Frame>) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
    }

    fn remove(&self, id: &str) -> bool {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn clear(&self) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Server-side registry of subscribers plus the broadcast queue.
pub struct BroadcastHub {
    registry: Arc<Registry>,
    history: Arc<HistoryStore>,
    queue_tx: mpsc::Sender<Payload>,
    queue_rx: Mutex<Option<mpsc::Receiver<Payload>>>,
    last_enqueued: Mutex<Option<Payload>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl BroadcastHub {
    pub fn new(history: Arc<HistoryStore>, queue_capacity: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            registry: Arc::new(Registry::default()),
            history,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            last_enqueued: Mutex::new(None),
            worker: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Starts the broadcast worker. Later calls do nothing.
    pub fn spawn_worker(&self) {
        let Some(queue_rx) = self
            .queue_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        let handle = tokio::spawn(broadcast_worker(
            queue_rx,
            Arc::clone(&self.registry),
            self.cancel.clone(),
        ));
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Registers a subscriber. Once shutdown has begun the sender is
    /// dropped instead, which closes the new socket.
    pub fn on_connect(&self, id: impl Into<String>, tx: mpsc::Sender<Frame>) {
        let id = id.into();
        if self.cancel.is_cancelled() {
            debug!(subscriber = %id, "hub shutting down, refusing subscriber");
            return;
        }
        self.registry.insert(id.clone(), tx);
        info!(subscriber = %id, total = self.registry.len(), "subscriber connected");
    }

    /// Removes the subscriber now, even if a fan-out is in progress.
    pub fn on_disconnect(&self, id: &str) -> bool {
        let removed = self.registry.remove(id);
        if removed {
            info!(subscriber = %id, total = self.registry.len(), "subscriber disconnected");
        }
        removed
    }

    /// Handles a text frame pushed by a subscriber. Never blocks.
    pub fn on_message(&self, id: &str, text: &str) -> Accepted {
        let message = InboundMessage::decode(text);

        let records = message.records();
        if !records.is_empty() {
            trace!(subscriber = %id, count = records.len(), "storing records");
            self.history.extend(records);
        }
        if let InboundMessage::Undecodable(_) = &message {
            debug!(subscriber = %id, "undecodable frame, forwarding raw");
        }

        let Some(payload) = message.into_payload() else {
            return Accepted::Empty;
        };
        self.enqueue(payload)
    }

    /// Debounces and queues a payload for fan-out.
    pub fn enqueue(&self, payload: Payload) -> Accepted {
        let mut last = self
            .last_enqueued
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if last.as_ref() == Some(&payload) {
            trace!("duplicate payload, skipped");
            return Accepted::Debounced;
        }

        match self.queue_tx.try_send(payload.clone()) {
            Ok(()) => {
                *last = Some(payload);
                Accepted::Enqueued
            }
            Err(TrySendError::Full(_)) => {
                warn!("broadcast queue full, dropping newest payload");
                Accepted::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                debug!("broadcast queue closed, dropping payload");
                Accepted::Dropped
            }
        }
    }

    /// Lets the worker deliver everything already queued, then drops every
    /// subscriber channel.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
        self.registry.clear();
        info!("broadcast hub stopped");
    }
}

async fn broadcast_worker(
    mut queue: mpsc::Receiver<Payload>,
    registry: Arc<Registry>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            payload = queue.recv() => match payload {
                Some(payload) => {
                    fan_out(&registry, &payload);
                }
                None => break,
            },
            _ = cancel.cancelled() => {
                queue.close();
                while let Ok(payload) = queue.try_recv() {
                    fan_out(&registry, &payload);
                }
                break;
            }
        }
    }
}

/// Offers `payload` to every subscriber. Subscribers whose channel is full
/// or closed are removed once the pass is complete.
fn fan_out(registry: &Registry, payload: &Payload) -> usize {
    let frame: Frame = Arc::from(payload.to_text());
    let mut delivered = 0;
    let mut failed = Vec::new();

    for (id, tx) in registry.snapshot() {
        match tx.try_send(Arc::clone(&frame)) {
            Ok(()) => delivered += 1,
            Err(e) => {
                debug!(subscriber = %id, error = %e, "delivery failed");
                failed.push(id);
            }
        }
    }

    for id in &failed {
        if registry.remove(id) {
            warn!(subscriber = %id, "dropping unresponsive subscriber");
        }
    }
    trace!(delivered, failed = failed.len(), "broadcast");
    delivered
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use serde_json::json;

    fn hub(queue: usize) -> BroadcastHub {
        BroadcastHub::new(Arc::new(HistoryStore::default()), queue)
    }

    fn subscriber(hub: &BroadcastHub, id: &str) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(8);
        hub.on_connect(id, tx);
        rx
    }

    async fn next(rx: &mut mpsc::Receiver<Frame>) -> Option<Frame> {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn duplicate_after_drop_delivers_nothing() {
        let hub = hub(16);
        hub.spawn_worker();
        let mut a = subscriber(&hub, "a");
        let mut b = subscriber(&hub, "b");
        let mut c = subscriber(&hub, "c");

        assert_eq!(hub.on_message("a", r#"{"humidity":60}"#), Accepted::Enqueued);
        for rx in [&mut a, &mut b, &mut c] {
            let frame = next(rx).await.expect("delivery");
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(value, json!({"humidity": 60}));
        }

        assert!(hub.on_disconnect("c"));
        assert_eq!(hub.subscriber_count(), 2);

        assert_eq!(hub.on_message("a", r#"{"humidity":60}"#), Accepted::Debounced);
        assert!(next(&mut a).await.is_none());
        assert!(next(&mut b).await.is_none());
    }

    #[tokio::test]
    async fn debounce_ignores_key_order() {
        let hub = hub(16);
        assert_eq!(hub.on_message("x", r#"{"a":1,"b":2}"#), Accepted::Enqueued);
        assert_eq!(hub.on_message("x", r#"{"b":2,"a":1}"#), Accepted::Debounced);
        assert_eq!(hub.on_message("x", r#"{"a":1,"b":3}"#), Accepted::Enqueued);
        assert_eq!(hub.on_message("x", r#"{"a":1,"b":2}"#), Accepted::Enqueued);
    }

    #[tokio::test]
    async fn batch_broadcasts_latest_and_stores_all() {
        let hub = hub(16);
        hub.spawn_worker();
        let mut rx = subscriber(&hub, "viewer");

        let record = |n: u32| {
            json!({
                "humidity": 50.0, "temp_c": 20.0, "temp_f": 68.0, "passengers": n,
                "distance": 3.0, "buzzer": "OFF", "timestamp": f64::from(n)
            })
        };
        let batch = json!({
            "type": "batch", "timestamp": 10.0, "count": 3,
            "data": [record(1), record(2), record(3)]
        });
        assert_eq!(hub.on_message("collector", &batch.to_string()), Accepted::Enqueued);

        let frame = next(&mut rx).await.expect("latest record");
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["passengers"], 3);
        assert!(next(&mut rx).await.is_none(), "only the latest is broadcast");

        let stored: Vec<u32> = hub
            .history()
            .all()
            .iter()
            .map(|r| r.reading.passengers)
            .collect();
        assert_eq!(stored, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_batch_is_not_broadcast() {
        let hub = hub(16);
        let text = r#"{"type":"batch","timestamp":1.0,"count":0,"data":[]}"#;
        assert_eq!(hub.on_message("x", text), Accepted::Empty);
    }

    #[tokio::test]
    async fn undecodable_text_passes_through() {
        let hub = hub(16);
        hub.spawn_worker();
        let mut rx = subscriber(&hub, "viewer");

        assert_eq!(hub.on_message("x", "not json"), Accepted::Enqueued);
        assert_eq!(next(&mut rx).await.as_deref(), Some("not json"));
        assert!(hub.history().is_empty());
    }

    #[tokio::test]
    async fn full_queue_drops_newest_without_poisoning_debounce() {
        // No worker yet, so nothing drains the queue.
        let hub = hub(1);
        assert_eq!(hub.on_message("x", r#"{"n":1}"#), Accepted::Enqueued);
        assert_eq!(hub.on_message("x", r#"{"n":2}"#), Accepted::Dropped);

        hub.spawn_worker();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // {"n":2} was never broadcast, so it is not a duplicate.
        assert_eq!(hub.on_message("x", r#"{"n":2}"#), Accepted::Enqueued);
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_block_others() {
        let hub = hub(16);
        hub.spawn_worker();
        let mut healthy = subscriber(&hub, "healthy");

        let (full_tx, _full_rx) = mpsc::channel(1);
        full_tx.try_send(Arc::from("backlog")).unwrap();
        hub.on_connect("stuck", full_tx);

        let (closed_tx, closed_rx) = mpsc::channel(1);
        drop(closed_rx);
        hub.on_connect("gone", closed_tx);

        hub.on_message("healthy", r#"{"n":1}"#);
        assert!(next(&mut healthy).await.is_some());
        assert_eq!(hub.subscriber_count(), 1);

        hub.on_message("healthy", r#"{"n":2}"#);
        assert!(next(&mut healthy).await.is_some());
    }

    #[tokio::test]
    async fn broadcasts_keep_enqueue_order() {
        let hub = hub(16);
        let mut rx = subscriber(&hub, "viewer");
        for n in 0..5 {
            hub.on_message("x", &json!({ "n": n }).to_string());
        }
        hub.spawn_worker();

        for n in 0..5 {
            let frame = next(&mut rx).await.unwrap();
            assert_eq!(&*frame, json!({ "n": n }).to_string());
        }
    }

    #[tokio::test]
    async fn shutdown_drains_queue_then_drops_subscribers() {
        let hub = hub(16);
        let mut rx = subscriber(&hub, "viewer");
        hub.on_message("x", r#"{"n":1}"#);
        hub.on_message("x", r#"{"n":2}"#);
        hub.spawn_worker();
        hub.shutdown().await;

        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(rx.recv().await.as_deref(), Some(r#"{"n":1}"#));
        assert_eq!(rx.recv().await.as_deref(), Some(r#"{"n":2}"#));
        assert!(rx.recv().await.is_none(), "channel closes after shutdown");
        assert_eq!(hub.on_message("x", r#"{"n":3}"#), Accepted::Dropped);
    }

    #[tokio::test]
    async fn refuses_subscribers_once_shutting_down() {
        let hub = hub(16);
        hub.spawn_worker();
        hub.shutdown().await;

        let mut late = subscriber(&hub, "late");
        assert_eq!(hub.subscriber_count(), 0);
        assert!(late.recv().await.is_none(), "late channel is closed at once");
    }

    #[test]
    fn fan_out_counts_deliveries() {
        let registry = Registry::default();
        let (tx, _rx) = mpsc::channel(4);
        registry.insert("a".into(), tx.clone());
        registry.insert("b".into(), tx);
        assert_eq!(fan_out(&registry, &Payload::Raw("hi".into())), 2);
    }
}
