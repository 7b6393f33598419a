//! # Message Source Abstraction
//!
//! The harness never talks to a queue directly. It consumes a
//! [`MessageSource`]: something that can attach a callback to a
//! topic/channel pair and later detach it. Each delivered message reaches the
//! callback as a `(sender_id, payload)` pair.
//!
//! Channel semantics follow the usual queue model:
//!
//! - every channel of a topic receives every message published to the topic
//! - subscribers that share a channel split that channel's messages between them
//!
//! [`LoopbackBroker`] implements these semantics in-process.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub mod loopback;

pub use loopback::{LoopbackBroker, LoopbackConfig};

/// Identifier returned by [`MessageSource::subscribe`]
pub type SubscriptionId = u64;

/// Callback invoked for every message delivered to a subscription.
///
/// Arguments are the sender id and the raw payload. The callback may be
/// invoked concurrently with callbacks of other subscriptions.
pub type MessageCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Generic subscribe/unsubscribe interface of a message-queue client
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Attach `callback` to `channel` of `topic`
    ///
    /// Resolves once the subscription is ready to receive messages.
    async fn subscribe(
        &self,
        topic: &str,
        channel: &str,
        callback: MessageCallback,
    ) -> Result<SubscriptionId>;

    /// Detach a subscription
    ///
    /// Messages already handed to the subscription may still reach its
    /// callback after this returns.
    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<()>;

    /// Get source name for identification
    fn name(&self) -> &'static str;
}
