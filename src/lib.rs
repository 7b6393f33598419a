//! # Message-Consumer Performance Harness
//!
//! A harness for measuring how a group of concurrent message consumers keeps
//! up with a topic: how fast messages arrive, how fairly they are spread over
//! consumers, and how long each consumer spends per message.
//!
//! ## Architecture Overview
//!
//! The library is organized into several key modules:
//!
//! - `timer`: Inactivity-aware stopwatch that pauses while no messages arrive
//! - `metrics`: Lock-sharded aggregation of counts, sizes, and processing times
//! - `orchestrator`: Subscribes consumers and monitors a run to completion
//! - `report`: Throughput, fairness, histograms, and percentile statistics
//! - `transport`: The `MessageSource` seam and an in-process loopback broker
//! - `publisher`: Batched load generator feeding the loopback broker
//! - `results`: JSON output with run metadata
//! - `cli`, `logging`, `utils`: Binary plumbing and shared helpers
//!
//! Data flows one way: a transport delivers a message to a consumer callback,
//! which notifies the timer and records into the aggregator; when the run
//! ends, the reporter reads a snapshot of both.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use mq_consumer_bench::{
//!     DistributionMode, LoopbackBroker, PerformanceTimer, RunConfig, StatisticsReporter,
//!     StatsAggregator, SystemClock, TracingStatusSink, WorkerOrchestrator,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunConfig::new(3, 10_000, DistributionMode::LoadBalance)?;
//!     let broker = LoopbackBroker::default();
//!     let sink = Arc::new(TracingStatusSink);
//!     let orchestrator = WorkerOrchestrator::new(
//!         Arc::new(broker.clone()),
//!         Arc::new(PerformanceTimer::new(Arc::new(SystemClock), config.inactivity_timeout)),
//!         Arc::new(StatsAggregator::new()),
//!         sink.clone(),
//!     );
//!
//!     orchestrator.subscribe_handlers("performance-testing", "workers", &config).await?;
//!     // ... publish to "performance-testing" ...
//!     let result = orchestrator.monitor(&config).await?;
//!     orchestrator.stop_all().await;
//!
//!     let report = StatisticsReporter::compute(&result);
//!     StatisticsReporter::render(&report, sink.as_ref());
//!     Ok(())
//! }
//! ```

/// Command-line interface and configuration
///
/// Argument parsing with clap, the distribution-mode enum, and the
/// human-readable duration parser ("500ms", "1.5s", "5m").
pub mod cli;

pub mod clock;

/// Domain error types
pub mod error;

/// Console and file logging setup
pub mod logging;

/// Concurrent statistics aggregation
///
/// Per-handler counters and the size histogram live in sharded maps with
/// atomic values; processing times go to cache-padded shards. No single lock
/// is shared by all handlers.
pub mod metrics;

/// Consumer subscription and run monitoring
pub mod orchestrator;

pub mod publisher;

/// Throughput, fairness, and latency statistics for a finished run
pub mod report;

/// JSON result output with metadata and system information
pub mod results;

pub mod status;

/// Inactivity-aware performance timer
pub mod timer;

/// Message source abstraction and the loopback broker
pub mod transport;

pub mod utils;

pub use cli::{Args, DistributionMode};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::HarnessError;
pub use metrics::{AggregateSnapshot, Sample, StatsAggregator};
pub use orchestrator::{RunConfig, RunOutcome, RunResult, StopHandle, WorkerOrchestrator};
pub use publisher::{LoadGenerator, PublishConfig, PublishSummary};
pub use report::{RunReport, StatisticsReporter};
pub use results::ResultsManager;
pub use status::{MemoryStatusSink, StatusSink, TracingStatusSink};
pub use timer::{PerformanceTimer, TimerState, TimerTransition};
pub use transport::{LoopbackBroker, MessageCallback, MessageSource, SubscriptionId};

/// The current version of the harness
///
/// Populated from Cargo.toml and written into JSON results.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Default number of concurrent consumers
    pub const HANDLER_COUNT: usize = 3;

    /// Default number of expected messages (per consumer in broadcast mode)
    pub const EXPECTED_MESSAGES: u64 = 10_000;

    /// Default topic
    pub const TOPIC: &str = "performance-testing";

    /// Default channel; broadcast consumers append `-1`, `-2`, ...
    pub const CHANNEL: &str = "performance-testing-channel";

    /// Gap without arrivals after which the timer pauses
    pub const INACTIVITY_TIMEOUT: Duration = Duration::from_millis(3000);

    /// Interval between monitor polls
    pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

    /// Default published payload size in bytes
    pub const MESSAGE_SIZE: usize = 1000;

    /// Default number of messages per publish batch
    pub const BATCH_SIZE: usize = 100;
}
