//! # Load Generator
//!
//! Publishes a fixed number of random payloads to a topic in batches so a run
//! has something to consume. All messages in a run share one random payload,
//! generated once up front; batching mirrors the multi-publish call of real
//! queue clients.
//!
//! Progress is reported every 1000 messages and after the last batch, and the
//! publisher-side throughput is returned as a [`PublishSummary`].

use crate::{
    cli::Args,
    error::HarnessError,
    status::StatusSink,
    transport::LoopbackBroker,
    utils::validate_message_size,
};
use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Sender id attached to every published message
pub const PUBLISHER_ID: &str = "performance-test-publisher";

/// Progress is reported whenever the sent count crosses a multiple of this
const PROGRESS_EVERY: u64 = 1000;

/// Parameters of one publishing run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublishConfig {
    pub message_count: u64,
    pub message_size: usize,
    pub batch_size: usize,
    /// Optional pause between batches
    pub batch_delay: Option<Duration>,
}

impl PublishConfig {
    pub fn new(
        message_count: u64,
        message_size: usize,
        batch_size: usize,
    ) -> Result<Self, HarnessError> {
        let config = Self {
            message_count,
            message_size,
            batch_size,
            batch_delay: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Create publish configuration from CLI arguments
    ///
    /// The message count defaults to the expected count. In broadcast mode
    /// every consumer sees every message, so publishing the per-consumer
    /// expected count is enough to complete the run.
    pub fn from_args(args: &Args) -> Result<Self> {
        let config = Self {
            message_count: args.publish_count.unwrap_or(args.expected_messages),
            message_size: args.message_size,
            batch_size: args.batch_size,
            batch_delay: args.batch_delay,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        validate_message_size(self.message_size)?;
        if self.batch_size == 0 {
            return Err(HarnessError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Publisher-side results
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublishSummary {
    pub sent: u64,
    pub elapsed: Duration,
    pub messages_per_second: f64,
    pub mb_per_second: f64,
}

/// Batched publisher over the loopback broker
pub struct LoadGenerator {
    broker: LoopbackBroker,
    topic: String,
    config: PublishConfig,
    sink: Arc<dyn StatusSink>,
}

impl LoadGenerator {
    pub fn new(
        broker: LoopbackBroker,
        topic: impl Into<String>,
        config: PublishConfig,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            broker,
            topic: topic.into(),
            config,
            sink,
        }
    }

    /// Publish every message and report throughput
    pub async fn run(&self) -> Result<PublishSummary> {
        let total = self.config.message_count;
        self.sink.write(&format!(
            "Preparing to send {} messages of size {} bytes with batch size {}",
            total, self.config.message_size, self.config.batch_size
        ));

        let payload = random_payload(self.config.message_size);
        let batch_size = self.config.batch_size as u64;
        let started = Instant::now();
        let mut sent = 0u64;

        while sent < total {
            let current = batch_size.min(total - sent);
            let batch = vec![payload.clone(); current as usize];
            self.broker
                .publish_batch(&self.topic, PUBLISHER_ID, batch)
                .await
                .with_context(|| format!("Failed to publish batch at message {}", sent))?;

            let before = sent;
            sent += current;
            if sent / PROGRESS_EVERY > before / PROGRESS_EVERY || sent == total {
                self.sink
                    .write(&format!("Sent {}/{} messages...", sent, total));
            }

            if let Some(delay) = self.config.batch_delay {
                if sent < total {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let elapsed = started.elapsed();
        let summary = summarize(sent, self.config.message_size, elapsed);
        debug!(
            "Publisher finished: {} batches of up to {} messages",
            (sent + batch_size - 1) / batch_size,
            batch_size
        );

        self.sink.write(&format!(
            "Publisher: {} messages in {:.2} seconds ({:.2} messages/second, {:.2} MB/second)",
            summary.sent,
            elapsed.as_secs_f64(),
            summary.messages_per_second,
            summary.mb_per_second
        ));
        Ok(summary)
    }
}

fn random_payload(size: usize) -> Vec<u8> {
    let mut payload = vec![0u8; size];
    rand::thread_rng().fill(&mut payload[..]);
    payload
}

fn summarize(sent: u64, message_size: usize, elapsed: Duration) -> PublishSummary {
    let seconds = elapsed.as_secs_f64();
    let (messages_per_second, mb_per_second) = if seconds > 0.0 {
        (
            sent as f64 / seconds,
            sent as f64 * message_size as f64 / (1024.0 * 1024.0) / seconds,
        )
    } else {
        (0.0, 0.0)
    };

    PublishSummary {
        sent,
        elapsed,
        messages_per_second,
        mb_per_second,
    }
}
