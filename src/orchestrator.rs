//! # Worker Orchestration Module
//!
//! This module drives a complete consumer run: it subscribes N handlers to a
//! topic, wires every handler's message callback into the shared
//! [`PerformanceTimer`] and [`StatsAggregator`], and polls progress until the
//! expected number of messages has arrived.
//!
//! ## Key Components
//!
//! - **RunConfig**: Handler count, expected messages, distribution mode, timing
//! - **WorkerOrchestrator**: Subscription lifecycle plus the monitor loop
//! - **StopHandle**: Cloneable signal that ends a run early
//! - **RunResult**: Snapshot of timer and aggregator taken when the run ends
//!
//! ## Run Lifecycle
//!
//! 1. **Subscribe**: Handlers `consumer-1..N` are subscribed one at a time,
//!    each awaited before the next. In load-balance mode they share one
//!    channel; in broadcast mode handler `i` gets channel `{channel}-{i}`.
//! 2. **Monitor**: Every poll interval the monitor either reports that it is
//!    still waiting for the first message, or runs the inactivity check and
//!    reports progress.
//! 3. **Complete**: Once the received total reaches the expected total the
//!    timer is stopped and a [`RunResult`] is returned. A stop signal ends the
//!    run the same way with [`RunOutcome::Interrupted`].
//! 4. **Release**: [`WorkerOrchestrator::stop_all`] unsubscribes every handler.
//!
//! `subscribe_handlers` and `monitor` are separate so a caller can start a
//! publisher once consumers are attached; [`WorkerOrchestrator::start`] runs
//! both back to back.
//!
//! ## Message Callback
//!
//! For every delivered message a handler notifies the timer, then records a
//! [`Sample`] with the payload size and the wall time spent in the callback.
//! A message whose processing fails or panics is logged and counted as
//! failed; the handler keeps consuming.

use crate::{
    cli::{Args, DistributionMode},
    error::HarnessError,
    metrics::{AggregateSnapshot, Sample, StatsAggregator},
    status::StatusSink,
    timer::{PerformanceTimer, TimerTransition},
    transport::{MessageCallback, MessageSource, SubscriptionId},
    utils::{create_progress_indicator, validate_handler_count, validate_name},
};
use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Width of the textual progress bar in progress lines
const PROGRESS_BAR_WIDTH: usize = 20;

/// Configuration of a single consumer run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of concurrent handlers
    pub handler_count: usize,

    /// Messages expected; per handler in broadcast mode
    pub expected_message_count: u64,

    pub distribution_mode: DistributionMode,

    /// Gap between arrivals after which the timer pauses
    pub inactivity_timeout: Duration,

    /// Interval between monitor polls
    pub poll_interval: Duration,
}

impl RunConfig {
    /// Create a validated configuration with the default timeout and poll interval
    pub fn new(
        handler_count: usize,
        expected_message_count: u64,
        distribution_mode: DistributionMode,
    ) -> Result<Self, HarnessError> {
        let config = Self {
            handler_count,
            expected_message_count,
            distribution_mode,
            inactivity_timeout: crate::defaults::INACTIVITY_TIMEOUT,
            poll_interval: crate::defaults::POLL_INTERVAL,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Result<Self, HarnessError> {
        self.inactivity_timeout = timeout;
        self.validate()?;
        Ok(self)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Result<Self, HarnessError> {
        self.poll_interval = interval;
        self.validate()?;
        Ok(self)
    }

    /// Create run configuration from CLI arguments
    ///
    /// ## Validation
    /// - At least one handler, at most 1024
    /// - At least one expected message
    /// - Non-zero inactivity timeout and poll interval
    pub fn from_args(args: &Args) -> Result<Self> {
        let config = Self {
            handler_count: args.handler_count,
            expected_message_count: args.expected_messages,
            distribution_mode: args.mode,
            inactivity_timeout: args.inactivity_timeout,
            poll_interval: args.poll_interval,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        validate_handler_count(self.handler_count)?;
        if self.expected_message_count == 0 {
            return Err(HarnessError::InvalidConfig(
                "expected message count must be at least 1".to_string(),
            ));
        }
        if self.inactivity_timeout.is_zero() {
            return Err(HarnessError::InvalidConfig(
                "inactivity timeout must be greater than 0".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(HarnessError::InvalidConfig(
                "poll interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Messages the run waits for across all handlers
    ///
    /// In broadcast mode every handler receives every message, so the total
    /// is the expected count times the handler count.
    pub fn expected_total(&self) -> u64 {
        match self.distribution_mode {
            DistributionMode::LoadBalance => self.expected_message_count,
            DistributionMode::Broadcast => self
                .expected_message_count
                .saturating_mul(self.handler_count as u64),
        }
    }

    /// Name of handler `index` (zero-based)
    pub fn handler_name(index: usize) -> String {
        format!("consumer-{}", index + 1)
    }

    /// Channel handler `index` subscribes to
    pub fn handler_channel(&self, channel: &str, index: usize) -> String {
        match self.distribution_mode {
            DistributionMode::LoadBalance => channel.to_string(),
            DistributionMode::Broadcast => format!("{}-{}", channel, index + 1),
        }
    }
}

/// Single source of truth for the run banner
struct RunConfigDisplay<'a> {
    config: &'a RunConfig,
    topic: &'a str,
    channel: &'a str,
    source: &'static str,
}

impl<'a> std::fmt::Display for RunConfigDisplay<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode_description = match self.config.distribution_mode {
            DistributionMode::LoadBalance => "each message is processed by one consumer",
            DistributionMode::Broadcast => "each message is processed by all consumers",
        };

        writeln!(
            f,
            "-----------------------------------------------------------------"
        )?;
        writeln!(f, "Starting Consumer Run on: {}", self.source)?;
        writeln!(f, "  Topic:              {}", self.topic)?;
        writeln!(f, "  Channel:            {}", self.channel)?;
        writeln!(f, "  Consumers:          {}", self.config.handler_count)?;
        writeln!(
            f,
            "  Mode:               {} ({})",
            self.config.distribution_mode, mode_description
        )?;
        writeln!(
            f,
            "  Expected Messages:  {}",
            self.config.expected_message_count
        )?;
        if self.config.distribution_mode == DistributionMode::Broadcast {
            writeln!(f, "  Expected Total:     {}", self.config.expected_total())?;
        }
        writeln!(
            f,
            "  Inactivity Timeout: {:?}",
            self.config.inactivity_timeout
        )?;
        writeln!(f, "  Poll Interval:      {:?}", self.config.poll_interval)?;
        write!(
            f,
            "-----------------------------------------------------------------"
        )
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// The expected total was reached
    Completed,
    /// A stop signal ended the run first
    Interrupted,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "Completed"),
            RunOutcome::Interrupted => write!(f, "Interrupted"),
        }
    }
}

/// Snapshot of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub config: RunConfig,
    /// Timer elapsed time, paused intervals excluded
    pub elapsed: Duration,
    pub total_received: u64,
    pub aggregates: AggregateSnapshot,
    pub outcome: RunOutcome,
}

/// Cloneable handle that ends a running monitor loop
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Ask the monitor to stop at its next wake-up
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Subscribes handlers and monitors a run to completion
///
/// ## Usage Pattern
///
/// ```rust,no_run
/// # use mq_consumer_bench::{
/// #     clock::SystemClock, metrics::StatsAggregator, status::TracingStatusSink,
/// #     timer::PerformanceTimer, transport::LoopbackBroker,
/// #     orchestrator::{RunConfig, WorkerOrchestrator}, cli::DistributionMode,
/// # };
/// # use std::sync::Arc;
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let config = RunConfig::new(3, 10_000, DistributionMode::LoadBalance)?;
/// let timer = Arc::new(PerformanceTimer::new(Arc::new(SystemClock), config.inactivity_timeout));
/// let orchestrator = WorkerOrchestrator::new(
///     Arc::new(LoopbackBroker::default()),
///     timer,
///     Arc::new(StatsAggregator::new()),
///     Arc::new(TracingStatusSink),
/// );
/// let result = orchestrator.start("performance-testing", "performance-testing-channel", &config).await?;
/// orchestrator.stop_all().await;
/// println!("Received {} messages in {:?}", result.total_received, result.elapsed);
/// # Ok(())
/// # }
/// ```
pub struct WorkerOrchestrator {
    source: Arc<dyn MessageSource>,
    timer: Arc<PerformanceTimer>,
    aggregator: Arc<StatsAggregator>,
    sink: Arc<dyn StatusSink>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl WorkerOrchestrator {
    pub fn new(
        source: Arc<dyn MessageSource>,
        timer: Arc<PerformanceTimer>,
        aggregator: Arc<StatsAggregator>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            source,
            timer,
            aggregator,
            sink,
            subscriptions: Mutex::new(Vec::new()),
            stop_tx: Arc::new(stop_tx),
        }
    }

    pub fn timer(&self) -> &Arc<PerformanceTimer> {
        &self.timer
    }

    pub fn aggregator(&self) -> &Arc<StatsAggregator> {
        &self.aggregator
    }

    /// Handle that ends the monitor loop early
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: Arc::clone(&self.stop_tx),
        }
    }

    /// Number of handlers currently subscribed
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Subscribe every handler, then monitor until the run ends
    pub async fn start(&self, topic: &str, channel: &str, config: &RunConfig) -> Result<RunResult> {
        self.subscribe_handlers(topic, channel, config).await?;
        self.monitor(config).await
    }

    /// Subscribe handlers `consumer-1..N` one after another
    ///
    /// Names are checked before the first subscription. If any subscription
    /// fails, the handlers already subscribed are released and the failure is
    /// returned as [`HarnessError::Subscription`].
    pub async fn subscribe_handlers(
        &self,
        topic: &str,
        channel: &str,
        config: &RunConfig,
    ) -> Result<()> {
        config.validate()?;
        validate_name("topic", topic)?;
        for index in 0..config.handler_count {
            validate_name("channel", &config.handler_channel(channel, index))?;
        }

        self.sink.write(
            &RunConfigDisplay {
                config,
                topic,
                channel,
                source: self.source.name(),
            }
            .to_string(),
        );

        for index in 0..config.handler_count {
            let handler = RunConfig::handler_name(index);
            let handler_channel = config.handler_channel(channel, index);
            self.aggregator.init_handler(&handler);

            let callback = self.message_callback(handler.clone());
            match self.source.subscribe(topic, &handler_channel, callback).await {
                Ok(id) => {
                    self.subscriptions.lock().push(id);
                    debug!(
                        "{} subscribed to {}/{} as subscription {}",
                        handler, topic, handler_channel, id
                    );
                }
                Err(e) => {
                    warn!("Failed to subscribe {}: {:#}", handler, e);
                    self.stop_all().await;
                    return Err(HarnessError::Subscription {
                        handler,
                        topic: topic.to_string(),
                        channel: handler_channel,
                        source: e.into(),
                    }
                    .into());
                }
            }

            if config.distribution_mode == DistributionMode::Broadcast {
                self.sink.write(&format!(
                    "  Started {} on dedicated channel '{}'",
                    handler, handler_channel
                ));
            }
        }

        if config.distribution_mode == DistributionMode::LoadBalance {
            self.sink.write(&format!(
                "All consumers subscribed to shared channel '{}'",
                channel
            ));
        }
        self.sink
            .write("Consumers started. Waiting for first message...");
        Ok(())
    }

    /// Poll progress until the expected total arrives or a stop is requested
    ///
    /// The timer is stopped before returning in both cases.
    pub async fn monitor(&self, config: &RunConfig) -> Result<RunResult> {
        config.validate()?;
        let expected = config.expected_total();
        let mut stop_rx = self.stop_tx.subscribe();

        let outcome = loop {
            if *stop_rx.borrow_and_update() {
                break RunOutcome::Interrupted;
            }

            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval) => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break RunOutcome::Interrupted;
                    }
                    continue;
                }
            }

            let received = self.aggregator.total_received();
            if self.timer.has_started() {
                if let Some(transition) = self.timer.check_inactivity() {
                    report_transition(self.sink.as_ref(), transition);
                }
                self.sink.write(&progress_line(
                    received,
                    expected,
                    self.timer.is_running(),
                ));
            } else {
                self.sink.write("Waiting for first message...");
            }

            if received >= expected {
                break RunOutcome::Completed;
            }
        };

        let elapsed = self.timer.stop();
        let aggregates = self.aggregator.snapshot();

        match outcome {
            RunOutcome::Completed => info!(
                "Run completed: {} messages in {:.3}s",
                aggregates.total_received,
                elapsed.as_secs_f64()
            ),
            RunOutcome::Interrupted => {
                self.sink.write(&format!(
                    "Run interrupted after {}/{} messages",
                    aggregates.total_received, expected
                ));
            }
        }

        Ok(RunResult {
            config: config.clone(),
            elapsed,
            total_received: aggregates.total_received,
            aggregates,
            outcome,
        })
    }

    /// Unsubscribe every handler
    ///
    /// Safe to call more than once, after the monitor has exited, and while
    /// callbacks are still in flight. Returns the number of handlers released.
    pub async fn stop_all(&self) -> usize {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        let released = subscriptions.len();

        for id in subscriptions {
            if let Err(e) = self.source.unsubscribe(id).await {
                warn!("Failed to unsubscribe subscription {}: {:#}", id, e);
            }
        }

        if released > 0 {
            debug!("Released {} subscription(s)", released);
        }
        released
    }

    fn message_callback(&self, handler: String) -> MessageCallback {
        let timer = Arc::clone(&self.timer);
        let aggregator = Arc::clone(&self.aggregator);
        let sink = Arc::clone(&self.sink);

        Arc::new(move |_sender: &str, payload: &[u8]| {
            let processed = panic::catch_unwind(AssertUnwindSafe(|| {
                let started = Instant::now();
                if let Some(transition) = timer.notify_arrival() {
                    report_transition(sink.as_ref(), transition);
                }
                aggregator.record_sample(&Sample {
                    source_id: handler.clone(),
                    size_bytes: payload.len(),
                    processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                })
            }));

            let reason = match processed {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_reason(panic.as_ref()),
            };
            warn!("{} failed to process message: {}", handler, reason);
            aggregator.record_failure();
        })
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(reason) = panic.downcast_ref::<&str>() {
        (*reason).to_string()
    } else if let Some(reason) = panic.downcast_ref::<String>() {
        reason.clone()
    } else {
        "panicked".to_string()
    }
}

fn report_transition(sink: &dyn StatusSink, transition: TimerTransition) {
    let line = match transition {
        TimerTransition::Started => {
            "First message received! Starting performance measurement at 0.000s".to_string()
        }
        TimerTransition::Resumed { at } => format!(
            "Messages resumed - Restarting timer at {:.3}s",
            at.as_secs_f64()
        ),
        TimerTransition::Paused { at, idle } => format!(
            "No messages received for {}ms - Pausing timer at {:.3}s",
            idle.as_millis(),
            at.as_secs_f64()
        ),
    };
    sink.write(&line);
}

fn progress_line(received: u64, expected: u64, running: bool) -> String {
    let percentage = received as f64 / expected as f64 * 100.0;
    format!(
        "Received {}/{} messages... ({:.1}%) {} [Timer: {}]",
        received,
        expected,
        percentage,
        create_progress_indicator(received, expected, PROGRESS_BAR_WIDTH),
        if running { "Running" } else { "Paused" }
    )
}
