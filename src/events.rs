//! Live document events fanned out to subscribers.
//!
//! Each subscriber owns a private queue. [`EventBroadcaster::broadcast`]
//! pushes into every queue without awaiting anything: a full or closed queue
//! is logged and skipped, so one slow consumer never delays the others or the
//! state store that triggered the event.
//!
//! Queue capacity is governed by [`EventQueuePolicy`]. The default is
//! unbounded, which means a subscriber that stops reading grows its queue
//! forever; bounded queues shed events according to [`OverflowPolicy`].
//!
//! Dropping a [`Subscription`] unsubscribes it, so a disconnecting client
//! (its SSE/WebSocket task ends) cleans up without an explicit call.

use crate::config::{EventQueuePolicy, OverflowPolicy};
use crate::model::Document;
use futures::Stream;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// A lifecycle notification.
///
/// Serialises as `{"type": "document_created", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DocumentEvent {
    DocumentCreated(Document),
    DocumentUpdated(Document),
    /// Carries only the id; the document no longer exists.
    DocumentDeleted(String),
}

impl DocumentEvent {
    /// Id of the document the event is about.
    pub fn document_id(&self) -> &str {
        match self {
            DocumentEvent::DocumentCreated(d) | DocumentEvent::DocumentUpdated(d) => &d.id,
            DocumentEvent::DocumentDeleted(id) => id,
        }
    }

    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentEvent::DocumentCreated(_) => "document_created",
            DocumentEvent::DocumentUpdated(_) => "document_updated",
            DocumentEvent::DocumentDeleted(_) => "document_deleted",
        }
    }
}

/// Why a push into one subscriber queue did not land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushError {
    Full,
    Closed,
}

/// One subscriber's queue.
struct SubscriberQueue {
    events: Mutex<VecDeque<DocumentEvent>>,
    notify: Notify,
    closed: AtomicBool,
    policy: EventQueuePolicy,
}

impl SubscriberQueue {
    fn new(policy: EventQueuePolicy) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DocumentEvent>> {
        // Queue operations cannot leave the deque half-modified, so a
        // poisoned lock still holds consistent data.
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns `Ok(true)` when an older event had to be dropped.
    fn push(&self, event: DocumentEvent) -> Result<bool, PushError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PushError::Closed);
        }
        let mut dropped_oldest = false;
        {
            let mut q = self.lock();
            if let EventQueuePolicy::Bounded { capacity, overflow } = self.policy {
                if q.len() >= capacity {
                    match overflow {
                        OverflowPolicy::DropNewest => return Err(PushError::Full),
                        OverflowPolicy::DropOldest => {
                            q.pop_front();
                            dropped_oldest = true;
                        }
                    }
                }
            }
            q.push_back(event);
        }
        self.notify.notify_one();
        Ok(dropped_oldest)
    }

    fn pop(&self) -> Option<DocumentEvent> {
        self.lock().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

#[derive(Default)]
struct Registry {
    subscribers: Mutex<HashMap<u64, Arc<SubscriberQueue>>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Arc<SubscriberQueue>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, id: u64) -> bool {
        let removed = self.lock().remove(&id);
        match removed {
            Some(queue) => {
                queue.close();
                true
            }
            None => false,
        }
    }
}

/// Fans out [`DocumentEvent`]s to every registered [`Subscription`].
pub struct EventBroadcaster {
    registry: Arc<Registry>,
    next_id: AtomicU64,
    policy: EventQueuePolicy,
}

impl EventBroadcaster {
    pub fn new(policy: EventQueuePolicy) -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            next_id: AtomicU64::new(1),
            policy,
        }
    }

    /// Register a new subscriber queue.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(self.policy));
        let total = {
            let mut subs = self.registry.lock();
            subs.insert(id, Arc::clone(&queue));
            subs.len()
        };
        info!(subscriber = id, total, "Client subscribed");
        Subscription {
            id,
            queue,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, subscription_id: u64) {
        if self.registry.remove(subscription_id) {
            info!(
                subscriber = subscription_id,
                total = self.subscriber_count(),
                "Client unsubscribed"
            );
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Push `event` to every current subscriber. Never blocks, never fails.
    pub fn broadcast(&self, event: DocumentEvent) {
        // Snapshot the subscriber list so pushes happen outside the registry lock.
        let targets: Vec<(u64, Arc<SubscriberQueue>)> = self
            .registry
            .lock()
            .iter()
            .map(|(id, q)| (*id, Arc::clone(q)))
            .collect();

        debug!(
            event = event.kind(),
            doc_id = event.document_id(),
            subscribers = targets.len(),
            "Broadcasting event"
        );

        for (id, queue) in targets {
            match queue.push(event.clone()) {
                Ok(false) => {}
                Ok(true) => warn!(
                    subscriber = id,
                    "Subscriber queue full, dropped its oldest event"
                ),
                Err(PushError::Full) => warn!(
                    subscriber = id,
                    event = event.kind(),
                    "Subscriber queue full, event dropped"
                ),
                Err(PushError::Closed) => {
                    debug!(subscriber = id, "Subscriber queue closed, removing");
                    self.registry.remove(id);
                }
            }
        }
    }
}

impl Drop for EventBroadcaster {
    fn drop(&mut self) {
        for (_, queue) in self.registry.lock().drain() {
            queue.close();
        }
    }
}

/// Receiving end of one subscriber queue.
///
/// Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    queue: Arc<SubscriberQueue>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. `None` once the broadcaster is gone (or
    /// this subscription was removed) and the queue is drained.
    pub async fn recv(&mut self) -> Option<DocumentEvent> {
        loop {
            if let Some(event) = self.queue.pop() {
                return Some(event);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<DocumentEvent> {
        self.queue.pop()
    }

    /// Number of events waiting in this subscriber's queue.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Adapt into a `Stream`, e.g. for an SSE response body.
    pub fn into_stream(self) -> impl Stream<Item = DocumentEvent> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.recv().await?;
            Some((event, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(self.id) {
                debug!(subscriber = self.id, "Subscription dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    fn updated(id: &str) -> DocumentEvent {
        DocumentEvent::DocumentUpdated(Document::new(id, "scan.pdf"))
    }

    #[tokio::test]
    async fn every_subscriber_receives_each_event() {
        let b = EventBroadcaster::new(EventQueuePolicy::Unbounded);
        let mut a = b.subscribe();
        let mut c = b.subscribe();

        b.broadcast(updated("d1"));
        b.broadcast(DocumentEvent::DocumentDeleted("d1".into()));

        assert_eq!(a.recv().await.unwrap().kind(), "document_updated");
        assert_eq!(a.recv().await.unwrap().kind(), "document_deleted");
        assert_eq!(c.recv().await.unwrap().document_id(), "d1");
        assert_eq!(c.pending(), 1);
    }

    #[tokio::test]
    async fn recv_wakes_on_later_broadcast() {
        let b = Arc::new(EventBroadcaster::new(EventQueuePolicy::Unbounded));
        let mut sub = b.subscribe();
        let sender = Arc::clone(&b);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sender.broadcast(updated("late"));
        });
        let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("event should arrive")
            .unwrap();
        assert_eq!(event.document_id(), "late");
    }

    #[test]
    fn drop_newest_keeps_the_first_events() {
        let b = EventBroadcaster::new(EventQueuePolicy::Bounded {
            capacity: 2,
            overflow: OverflowPolicy::DropNewest,
        });
        let mut sub = b.subscribe();
        for id in ["a", "b", "c"] {
            b.broadcast(updated(id));
        }
        assert_eq!(sub.try_recv().unwrap().document_id(), "a");
        assert_eq!(sub.try_recv().unwrap().document_id(), "b");
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn drop_oldest_keeps_the_latest_events() {
        let b = EventBroadcaster::new(EventQueuePolicy::Bounded {
            capacity: 2,
            overflow: OverflowPolicy::DropOldest,
        });
        let mut sub = b.subscribe();
        for id in ["a", "b", "c"] {
            b.broadcast(updated(id));
        }
        assert_eq!(sub.try_recv().unwrap().document_id(), "b");
        assert_eq!(sub.try_recv().unwrap().document_id(), "c");
    }

    #[test]
    fn full_subscriber_does_not_starve_others() {
        let b = EventBroadcaster::new(EventQueuePolicy::Bounded {
            capacity: 1,
            overflow: OverflowPolicy::DropNewest,
        });
        let _stalled = b.subscribe();
        let mut healthy = b.subscribe();
        b.broadcast(updated("a"));
        assert_eq!(healthy.try_recv().unwrap().document_id(), "a");
        b.broadcast(updated("b"));
        assert_eq!(healthy.try_recv().unwrap().document_id(), "b");
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let b = EventBroadcaster::new(EventQueuePolicy::Unbounded);
        let sub = b.subscribe();
        let _other = b.subscribe();
        assert_eq!(b.subscriber_count(), 2);
        drop(sub);
        assert_eq!(b.subscriber_count(), 1);
        b.broadcast(updated("x"));
    }

    #[tokio::test]
    async fn explicit_unsubscribe_ends_the_stream() {
        let b = EventBroadcaster::new(EventQueuePolicy::Unbounded);
        let sub = b.subscribe();
        b.broadcast(updated("x"));
        b.unsubscribe(sub.id());
        b.unsubscribe(sub.id());
        let events: Vec<_> = sub.into_stream().collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(b.subscriber_count(), 0);
    }

    #[test]
    fn event_wire_format() {
        let json = serde_json::to_value(DocumentEvent::DocumentDeleted("abc".into())).unwrap();
        assert_eq!(json["type"], "document_deleted");
        assert_eq!(json["data"], "abc");

        let json = serde_json::to_value(updated("d1")).unwrap();
        assert_eq!(json["type"], "document_updated");
        assert_eq!(json["data"]["id"], "d1");
        assert_eq!(json["data"]["status"], "processing");
    }
}
