use super::{MessageCallback, MessageSource, SubscriptionId};
use crate::error::HarnessError;
use crate::utils::validate_name;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Configuration for the in-process broker
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Messages buffered per subscriber before publishers wait
    pub queue_depth: usize,
    /// Messages held per topic or channel while nobody can take them; the
    /// oldest are dropped beyond this
    pub backlog_limit: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            queue_depth: 1000,
            backlog_limit: 10_000,
        }
    }
}

#[derive(Clone)]
struct Delivery {
    sender: Arc<str>,
    payload: Arc<[u8]>,
}

struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::Sender<Delivery>,
}

#[derive(Default)]
struct Channel {
    subscribers: Vec<Subscriber>,
    next: usize,
    /// Messages published while the channel had no subscriber
    backlog: VecDeque<Delivery>,
}

impl Channel {
    /// Pick the next live subscriber round-robin
    fn next_subscriber(&mut self) -> Option<mpsc::Sender<Delivery>> {
        self.subscribers.retain(|s| !s.tx.is_closed());
        if self.subscribers.is_empty() {
            return None;
        }
        let index = self.next % self.subscribers.len();
        self.next = index + 1;
        Some(self.subscribers[index].tx.clone())
    }
}

/// Queue a held message, evicting the oldest once `limit` is reached.
/// Returns whether a message was evicted.
fn hold(queue: &mut VecDeque<Delivery>, delivery: Delivery, limit: usize) -> bool {
    let evicted = queue.len() >= limit && queue.pop_front().is_some();
    queue.push_back(delivery);
    evicted
}

#[derive(Default)]
struct Topic {
    channels: HashMap<String, Channel>,
    /// Messages published before the topic had any channel
    pending: VecDeque<Delivery>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Topic>,
    subscriptions: HashMap<SubscriptionId, (String, String)>,
}

/// In-process message broker with topic/channel semantics
///
/// Each published message is copied to every channel of its topic. Within a
/// channel, messages are handed to subscribers round-robin. Every subscriber
/// drains its own bounded queue on a dedicated Tokio task, so callbacks of
/// different subscribers run concurrently on a multi-threaded runtime.
///
/// Messages published before a topic has any channel are held and given to
/// the first channel created; messages reaching a channel with no subscriber
/// are held until one subscribes.
#[derive(Clone)]
pub struct LoopbackBroker {
    state: Arc<Mutex<BrokerState>>,
    next_id: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    config: LoopbackConfig,
}

impl Default for LoopbackBroker {
    fn default() -> Self {
        Self::new(LoopbackConfig::default())
    }
}

impl LoopbackBroker {
    pub fn new(mut config: LoopbackConfig) -> Self {
        config.backlog_limit = config.backlog_limit.max(1);
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            dropped: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    /// Held messages evicted because a backlog was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Publish a single message to `topic`
    pub async fn publish(&self, topic: &str, sender: &str, payload: Vec<u8>) -> Result<()> {
        self.publish_batch(topic, sender, vec![payload]).await?;
        Ok(())
    }

    /// Publish several messages to `topic` in one routing pass
    ///
    /// Returns the number of messages accepted. Waits while a subscriber queue
    /// is full.
    pub async fn publish_batch(
        &self,
        topic: &str,
        sender: &str,
        payloads: Vec<Vec<u8>>,
    ) -> Result<usize> {
        validate_name("topic", topic)?;
        let sender: Arc<str> = Arc::from(sender);
        let accepted = payloads.len();
        let limit = self.config.backlog_limit;
        let mut routed = Vec::new();
        let mut evicted = 0u64;

        {
            let mut state = self.state.lock();
            let topic = state.topics.entry(topic.to_string()).or_default();
            for payload in payloads {
                let delivery = Delivery {
                    sender: Arc::clone(&sender),
                    payload: payload.into(),
                };
                if topic.channels.is_empty() {
                    evicted += u64::from(hold(&mut topic.pending, delivery, limit));
                    continue;
                }
                for channel in topic.channels.values_mut() {
                    match channel.next_subscriber() {
                        Some(tx) => routed.push((tx, delivery.clone())),
                        None => {
                            evicted +=
                                u64::from(hold(&mut channel.backlog, delivery.clone(), limit));
                        }
                    }
                }
            }
        }

        if evicted > 0 {
            self.dropped.fetch_add(evicted, Ordering::Relaxed);
            debug!("Backlog full on '{}', dropped {} held message(s)", topic, evicted);
        }

        for (tx, delivery) in routed {
            if tx.send(delivery).await.is_err() {
                debug!("Subscriber queue closed before delivery");
            }
        }
        Ok(accepted)
    }

    /// Number of live subscriptions on a topic/channel pair
    pub fn subscriber_count(&self, topic: &str, channel: &str) -> usize {
        let state = self.state.lock();
        state
            .topics
            .get(topic)
            .and_then(|t| t.channels.get(channel))
            .map_or(0, |c| c.subscribers.len())
    }

    /// Names of the channels that exist on `topic`, sorted
    pub fn channel_names(&self, topic: &str) -> Vec<String> {
        let state = self.state.lock();
        let mut names: Vec<String> = state
            .topics
            .get(topic)
            .map(|t| t.channels.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[async_trait]
impl MessageSource for LoopbackBroker {
    async fn subscribe(
        &self,
        topic: &str,
        channel: &str,
        callback: MessageCallback,
    ) -> Result<SubscriptionId> {
        validate_name("topic", topic)?;
        validate_name("channel", channel)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::channel::<Delivery>(self.config.queue_depth.max(1));

        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                    callback(&delivery.sender[..], &delivery.payload[..])
                }));
                if delivered.is_err() {
                    warn!("Subscription {} callback panicked, continuing", id);
                }
            }
            debug!("Subscription {} drained", id);
        });

        let backlog = {
            let mut state = self.state.lock();
            let topic_entry = state.topics.entry(topic.to_string()).or_default();
            let first_channel = topic_entry.channels.is_empty();
            let pending = if first_channel {
                std::mem::take(&mut topic_entry.pending)
            } else {
                VecDeque::new()
            };

            let channel_entry = topic_entry.channels.entry(channel.to_string()).or_default();
            channel_entry.backlog.extend(pending);
            channel_entry.subscribers.push(Subscriber { id, tx: tx.clone() });
            let backlog = std::mem::take(&mut channel_entry.backlog);

            state
                .subscriptions
                .insert(id, (topic.to_string(), channel.to_string()));
            backlog
        };

        if !backlog.is_empty() {
            debug!(
                "Subscription {} receives {} held message(s)",
                id,
                backlog.len()
            );
        }
        for delivery in backlog {
            if tx.send(delivery).await.is_err() {
                break;
            }
        }

        debug!("Subscription {} attached to {}/{}", id, topic, channel);
        Ok(id)
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<()> {
        let mut state = self.state.lock();
        let (topic, channel) = state
            .subscriptions
            .remove(&subscription)
            .ok_or(HarnessError::UnknownSubscription(subscription))?;

        if let Some(channel) = state
            .topics
            .get_mut(&topic)
            .and_then(|t| t.channels.get_mut(&channel))
        {
            channel.subscribers.retain(|s| s.id != subscription);
        }

        debug!("Subscription {} detached from {}/{}", subscription, topic, channel);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_callback(counter: Arc<AtomicUsize>) -> MessageCallback {
        Arc::new(move |_sender: &str, _payload: &[u8]| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    async fn wait_for(counter: &AtomicUsize, expected: usize) {
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_shared_channel_is_round_robin() {
        let broker = LoopbackBroker::default();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        broker
            .subscribe("perf", "shared", counting_callback(a.clone()))
            .await
            .unwrap();
        broker
            .subscribe("perf", "shared", counting_callback(b.clone()))
            .await
            .unwrap();

        broker
            .publish_batch("perf", "test", vec![vec![0u8; 8]; 10])
            .await
            .unwrap();
        wait_for(&a, 5).await;
        wait_for(&b, 5).await;

        assert_eq!(a.load(Ordering::SeqCst), 5);
        assert_eq!(b.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_every_channel_gets_every_message() {
        let broker = LoopbackBroker::default();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        broker
            .subscribe("perf", "perf-1", counting_callback(a.clone()))
            .await
            .unwrap();
        broker
            .subscribe("perf", "perf-2", counting_callback(b.clone()))
            .await
            .unwrap();

        broker
            .publish_batch("perf", "test", vec![vec![1u8; 4]; 7])
            .await
            .unwrap();
        wait_for(&a, 7).await;
        wait_for(&b, 7).await;

        assert_eq!(a.load(Ordering::SeqCst), 7);
        assert_eq!(b.load(Ordering::SeqCst), 7);
        assert_eq!(broker.channel_names("perf"), vec!["perf-1", "perf-2"]);
    }

    #[tokio::test]
    async fn test_messages_before_first_channel_are_held() {
        let broker = LoopbackBroker::default();
        broker
            .publish_batch("perf", "test", vec![vec![2u8; 16]; 3])
            .await
            .unwrap();
        broker.publish("perf", "test", vec![3u8; 16]).await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        broker
            .subscribe("perf", "late", counting_callback(seen.clone()))
            .await
            .unwrap();
        wait_for(&seen, 4).await;
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_panicking_callback_keeps_draining() {
        let broker = LoopbackBroker::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let callback: MessageCallback = {
            let calls = calls.clone();
            Arc::new(move |_sender: &str, _payload: &[u8]| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("handler failed on its first message");
                }
            })
        };
        broker.subscribe("perf", "shared", callback).await.unwrap();

        broker
            .publish_batch("perf", "test", vec![vec![5u8; 8]; 10])
            .await
            .unwrap();
        wait_for(&calls, 10).await;

        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(broker.subscriber_count("perf", "shared"), 1);
    }

    #[tokio::test]
    async fn test_backlog_is_capped_after_last_subscriber_leaves() {
        let broker = LoopbackBroker::new(LoopbackConfig {
            backlog_limit: 5,
            ..LoopbackConfig::default()
        });
        let first = Arc::new(AtomicUsize::new(0));
        let id = broker
            .subscribe("perf", "chan", counting_callback(first.clone()))
            .await
            .unwrap();
        broker.unsubscribe(id).await.unwrap();

        broker
            .publish_batch("perf", "test", vec![vec![6u8; 8]; 20])
            .await
            .unwrap();
        assert_eq!(broker.dropped_count(), 15);

        let second = Arc::new(AtomicUsize::new(0));
        broker
            .subscribe("perf", "chan", counting_callback(second.clone()))
            .await
            .unwrap();
        wait_for(&second, 5).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(second.load(Ordering::SeqCst), 5);
        assert_eq!(first.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let broker = LoopbackBroker::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let id = broker
            .subscribe("perf", "chan", counting_callback(seen))
            .await
            .unwrap();
        assert_eq!(broker.subscriber_count("perf", "chan"), 1);

        broker.unsubscribe(id).await.unwrap();
        assert_eq!(broker.subscriber_count("perf", "chan"), 0);

        let err = broker.unsubscribe(id).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::UnknownSubscription(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_names_are_rejected() {
        let broker = LoopbackBroker::default();
        let seen = Arc::new(AtomicUsize::new(0));
        assert!(broker
            .subscribe("", "chan", counting_callback(seen.clone()))
            .await
            .is_err());
        assert!(broker
            .subscribe("perf", "bad channel", counting_callback(seen))
            .await
            .is_err());
    }
}
