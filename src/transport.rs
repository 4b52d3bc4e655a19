// Event Transport Adapter
// Topic-based publish/subscribe with at-least-once delivery and per-key
// ordering, plus the router loop that dispatches envelopes to registered
// handlers under the process-wide inflight ceiling. Above the ceiling,
// events are simply not consumed; backpressure belongs to the transport.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::errors::PipelineError;
use crate::events::EventEnvelope;

const TOPIC_CHANNEL_CAPACITY: usize = 1024;

/// Transport contract the core consumes.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Publish one envelope to a topic. At-least-once: an envelope may be
    /// delivered to a subscriber more than once; handlers are idempotent
    /// with respect to the correlation id.
    async fn publish(&self, topic: &str, envelope: EventEnvelope) -> Result<(), PipelineError>;

    /// Subscribe to a topic. Envelopes published to one topic arrive in
    /// publish order (per-key ordering is implied by per-topic ordering
    /// here); no ordering holds across topics.
    fn subscribe(&self, topic: &str) -> mpsc::Receiver<EventEnvelope>;
}

/// Handler registered with the router.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, event_type: &str) -> bool;

    async fn handle(&self, envelope: EventEnvelope) -> Result<(), PipelineError>;
}

/// In-process transport backed by per-topic channels.
#[derive(Default)]
pub struct InMemoryTransport {
    subscribers: DashMap<String, Vec<mpsc::Sender<EventEnvelope>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .get(topic)
            .map(|senders| senders.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventTransport for InMemoryTransport {
    async fn publish(&self, topic: &str, envelope: EventEnvelope) -> Result<(), PipelineError> {
        let senders: Vec<mpsc::Sender<EventEnvelope>> = self
            .subscribers
            .get(topic)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        if senders.is_empty() {
            debug!(topic = topic, "no subscribers for topic, dropping event");
            return Ok(());
        }

        let mut delivered = 0;
        for sender in &senders {
            // Waiting here is the backpressure path: a full subscriber
            // channel stalls the producer rather than dropping the event.
            if sender.send(envelope.clone()).await.is_ok() {
                delivered += 1;
            }
        }

        // Prune subscribers whose receivers are gone.
        if delivered < senders.len() {
            self.subscribers
                .entry(topic.to_string())
                .and_modify(|senders| senders.retain(|s| !s.is_closed()));
        }

        if delivered == 0 {
            warn!(topic = topic, "all subscribers gone, event dropped");
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> mpsc::Receiver<EventEnvelope> {
        let (sender, receiver) = mpsc::channel(TOPIC_CHANNEL_CAPACITY);
        self.subscribers
            .entry(topic.to_string())
            .or_default()
            .push(sender);
        receiver
    }
}

/// Consumes request topics and dispatches envelopes to handlers.
pub struct EventRouter {
    transport: Arc<dyn EventTransport>,
    handlers: Vec<Arc<dyn EventHandler>>,
    inflight: Arc<Semaphore>,
}

impl EventRouter {
    pub fn new(transport: Arc<dyn EventTransport>, max_inflight: usize) -> Self {
        Self {
            transport,
            handlers: Vec::new(),
            inflight: Arc::new(Semaphore::new(max_inflight.max(1))),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        info!(handler = handler.name(), "registered event handler");
        self.handlers.push(handler);
    }

    /// Consume the given topics until every topic's channel closes. One
    /// logical task per envelope, bounded by the inflight ceiling; the
    /// permit is acquired before the next receive, so events beyond the
    /// ceiling stay in the transport.
    pub async fn run(self: Arc<Self>, topics: Vec<String>) {
        let mut tasks = JoinSet::new();

        for topic in topics {
            let mut receiver = self.transport.subscribe(&topic);
            let router = Arc::clone(&self);

            tasks.spawn(async move {
                loop {
                    let permit = match router.inflight.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let Some(envelope) = receiver.recv().await else {
                        break;
                    };

                    let router = Arc::clone(&router);
                    tokio::spawn(async move {
                        router.dispatch(envelope).await;
                        drop(permit);
                    });
                }
                debug!(topic = topic, "topic channel closed, consumer exiting");
            });
        }

        while tasks.join_next().await.is_some() {}
    }

    async fn dispatch(&self, envelope: EventEnvelope) {
        let handler = self
            .handlers
            .iter()
            .find(|h| h.can_handle(&envelope.event_type));

        let Some(handler) = handler else {
            warn!(
                event_type = %envelope.event_type,
                correlation_id = %envelope.correlation_id,
                "no handler for event type"
            );
            return;
        };

        let correlation_id = envelope.correlation_id;
        let event_type = envelope.event_type.clone();
        if let Err(e) = handler.handle(envelope).await {
            // Handlers publish their own failure events; an error here means
            // even that was impossible.
            error!(
                handler = handler.name(),
                event_type = %event_type,
                correlation_id = %correlation_id,
                error = %e,
                "handler failed terminally"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CorrelationId;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn envelope(event_type: &str) -> EventEnvelope {
        EventEnvelope::new(
            event_type,
            CorrelationId::new(),
            serde_json::json!({}),
            "test",
        )
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let transport = InMemoryTransport::new();
        let mut rx1 = transport.subscribe("t");
        let mut rx2 = transport.subscribe("t");

        transport.publish("t", envelope("t")).await.unwrap();

        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_publish_preserves_order_per_topic() {
        let transport = InMemoryTransport::new();
        let mut rx = transport.subscribe("t");

        for i in 0..5 {
            let mut env = envelope("t");
            env.payload = serde_json::json!({ "seq": i });
            transport.publish("t", env).await.unwrap();
        }

        for i in 0..5 {
            let env = rx.recv().await.unwrap();
            assert_eq!(env.payload["seq"], i);
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let transport = InMemoryTransport::new();
        transport.publish("empty", envelope("empty")).await.unwrap();
    }

    struct CountingHandler {
        event_type: &'static str,
        count: Arc<AtomicU32>,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn can_handle(&self, event_type: &str) -> bool {
            event_type == self.event_type
        }

        async fn handle(&self, _envelope: EventEnvelope) -> Result<(), PipelineError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_router_dispatches_to_matching_handler() {
        let transport = Arc::new(InMemoryTransport::new());
        let count = Arc::new(AtomicU32::new(0));

        let mut router = EventRouter::new(transport.clone(), 4);
        router.register(Arc::new(CountingHandler {
            event_type: "a",
            count: count.clone(),
        }));
        let router = Arc::new(router);

        let run = tokio::spawn(router.clone().run(vec!["a".to_string(), "b".to_string()]));
        // Let the consumers subscribe before publishing.
        tokio::time::sleep(Duration::from_millis(20)).await;

        transport.publish("a", envelope("a")).await.unwrap();
        transport.publish("b", envelope("b")).await.unwrap();
        transport.publish("a", envelope("a")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        run.abort();
    }

    #[tokio::test]
    async fn test_router_ceiling_limits_concurrency() {
        struct SlowHandler {
            peak: Arc<AtomicU32>,
            current: Arc<AtomicU32>,
        }

        #[async_trait]
        impl EventHandler for SlowHandler {
            fn name(&self) -> &'static str {
                "slow"
            }

            fn can_handle(&self, event_type: &str) -> bool {
                event_type == "slow"
            }

            async fn handle(&self, _envelope: EventEnvelope) -> Result<(), PipelineError> {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                self.current.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let transport = Arc::new(InMemoryTransport::new());
        let peak = Arc::new(AtomicU32::new(0));
        let current = Arc::new(AtomicU32::new(0));

        let mut router = EventRouter::new(transport.clone(), 2);
        router.register(Arc::new(SlowHandler {
            peak: peak.clone(),
            current: current.clone(),
        }));
        let router = Arc::new(router);

        let run = tokio::spawn(router.clone().run(vec!["slow".to_string()]));
        tokio::time::sleep(Duration::from_millis(20)).await;

        for _ in 0..8 {
            transport.publish("slow", envelope("slow")).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(peak.load(Ordering::SeqCst) <= 2, "inflight ceiling exceeded");
        run.abort();
    }
}
