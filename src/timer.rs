//! # Inactivity-Aware Performance Timer
//!
//! Throughput should reflect the time spent actually processing messages, not
//! dead air while a producer stalls. [`PerformanceTimer`] is a stopwatch that
//! starts on the first message, pauses once no message has arrived for the
//! configured inactivity timeout, and resumes on the next arrival.
//!
//! ## State Machine
//!
//! ```text
//! NotStarted --arrival--> Running --inactivity--> Paused --arrival--> Running
//!      |                     |                       |
//!      +-------stop----------+---------stop----------+----> Stopped
//! ```
//!
//! ## Concurrency
//!
//! `notify_arrival` is called from every message callback concurrently. While
//! the timer is `Running` (the overwhelmingly common case) it only bumps an
//! atomic timestamp. Every state transition happens under a single mutex, so
//! exactly one caller performs each transition no matter how many arrivals
//! race at the boundary.
//!
//! ## Pause Point
//!
//! When the monitor detects inactivity, elapsed time is frozen at the moment of
//! the check, not backdated to the last arrival plus the timeout. Running time
//! is therefore over-counted by up to one polling interval per pause.

use crate::clock::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Lifecycle state of a [`PerformanceTimer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerState {
    NotStarted,
    Running,
    Paused,
    Stopped,
}

impl TimerState {
    const fn as_u8(self) -> u8 {
        match self {
            TimerState::NotStarted => 0,
            TimerState::Running => 1,
            TimerState::Paused => 2,
            TimerState::Stopped => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => TimerState::NotStarted,
            1 => TimerState::Running,
            2 => TimerState::Paused,
            _ => TimerState::Stopped,
        }
    }
}

impl std::fmt::Display for TimerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerState::NotStarted => write!(f, "Not started"),
            TimerState::Running => write!(f, "Running"),
            TimerState::Paused => write!(f, "Paused"),
            TimerState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// A state change performed by a timer entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTransition {
    /// First arrival; measurement starts at zero.
    Started,
    /// Arrival after a pause; measurement continues from `at`.
    Resumed { at: Duration },
    /// Inactivity detected; measurement frozen at `at` after `idle` without arrivals.
    Paused { at: Duration, idle: Duration },
}

struct TimerInner {
    accumulated: Duration,
    /// Start of the current running segment; `Some` only while `Running`.
    running_since: Option<Instant>,
}

/// Inactivity-aware stopwatch shared by all message handlers and the monitor
pub struct PerformanceTimer {
    clock: Arc<dyn Clock>,
    origin: Instant,
    inactivity_timeout: Duration,
    last_arrival_ns: AtomicU64,
    state: AtomicU8,
    inner: Mutex<TimerInner>,
}

impl std::fmt::Debug for PerformanceTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceTimer")
            .field("state", &self.state())
            .field("inactivity_timeout", &self.inactivity_timeout)
            .field("elapsed", &self.elapsed())
            .finish()
    }
}

impl PerformanceTimer {
    /// Create a timer in the `NotStarted` state
    pub fn new(clock: Arc<dyn Clock>, inactivity_timeout: Duration) -> Self {
        let origin = clock.now();
        Self {
            clock,
            origin,
            inactivity_timeout,
            last_arrival_ns: AtomicU64::new(0),
            state: AtomicU8::new(TimerState::NotStarted.as_u8()),
            inner: Mutex::new(TimerInner {
                accumulated: Duration::ZERO,
                running_since: None,
            }),
        }
    }

    /// Record a message arrival
    ///
    /// Starts the timer on the first arrival and resumes it after a pause.
    /// Returns the transition this call performed, if any. Arrivals after
    /// `stop` are ignored.
    pub fn notify_arrival(&self) -> Option<TimerTransition> {
        let now = self.clock.now();
        self.last_arrival_ns
            .fetch_max(self.offset_of(now), Ordering::SeqCst);

        if self.state() == TimerState::Running {
            return None;
        }

        let mut inner = self.inner.lock();
        match self.state() {
            TimerState::NotStarted => {
                inner.accumulated = Duration::ZERO;
                inner.running_since = Some(self.clock.now());
                self.set_state(TimerState::Running);
                debug!("Performance timer started");
                Some(TimerTransition::Started)
            }
            TimerState::Paused => {
                let at = inner.accumulated;
                inner.running_since = Some(self.clock.now());
                self.set_state(TimerState::Running);
                debug!("Performance timer resumed at {:.3}s", at.as_secs_f64());
                Some(TimerTransition::Resumed { at })
            }
            TimerState::Running | TimerState::Stopped => None,
        }
    }

    /// Pause the timer if no message arrived within the inactivity timeout
    ///
    /// Only meaningful while `Running`; a no-op in every other state.
    pub fn check_inactivity(&self) -> Option<TimerTransition> {
        if self.state() != TimerState::Running {
            return None;
        }

        let mut inner = self.inner.lock();
        if self.state() != TimerState::Running {
            return None;
        }

        let now = self.clock.now();
        let last_seen = self.last_arrival_ns.load(Ordering::SeqCst);
        let idle = self.idle_since(last_seen, now);
        if idle <= self.inactivity_timeout {
            return None;
        }

        // Publish Paused before re-reading the last arrival: a racing arrival
        // either observes Paused and resumes, or is observed here.
        self.set_state(TimerState::Paused);
        if self.last_arrival_ns.load(Ordering::SeqCst) != last_seen {
            self.set_state(TimerState::Running);
            return None;
        }

        if let Some(since) = inner.running_since.take() {
            inner.accumulated += now.saturating_duration_since(since);
        }
        let at = inner.accumulated;
        debug!(
            "No arrivals for {:?}, performance timer paused at {:.3}s",
            idle,
            at.as_secs_f64()
        );
        Some(TimerTransition::Paused { at, idle })
    }

    /// Stop the timer for good and return the final elapsed time
    pub fn stop(&self) -> Duration {
        let mut inner = self.inner.lock();
        match self.state() {
            TimerState::Running => {
                if let Some(since) = inner.running_since.take() {
                    inner.accumulated += self.clock.now().saturating_duration_since(since);
                }
                self.set_state(TimerState::Stopped);
            }
            TimerState::NotStarted | TimerState::Paused => {
                self.set_state(TimerState::Stopped);
            }
            TimerState::Stopped => {}
        }
        inner.accumulated
    }

    /// Time spent running, excluding every paused interval
    pub fn elapsed(&self) -> Duration {
        let inner = self.inner.lock();
        match inner.running_since {
            Some(since) => inner.accumulated + self.clock.now().saturating_duration_since(since),
            None => inner.accumulated,
        }
    }

    pub fn state(&self) -> TimerState {
        TimerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether at least one message has arrived (or the timer was stopped)
    pub fn has_started(&self) -> bool {
        self.state() != TimerState::NotStarted
    }

    pub fn is_running(&self) -> bool {
        self.state() == TimerState::Running
    }

    pub fn inactivity_timeout(&self) -> Duration {
        self.inactivity_timeout
    }

    fn set_state(&self, state: TimerState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn offset_of(&self, instant: Instant) -> u64 {
        instant.saturating_duration_since(self.origin).as_nanos() as u64
    }

    fn idle_since(&self, last_arrival_ns: u64, now: Instant) -> Duration {
        now.saturating_duration_since(self.origin + Duration::from_nanos(last_arrival_ns))
    }
}
