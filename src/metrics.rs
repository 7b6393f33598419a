//! # Concurrent Statistics Aggregation
//!
//! [`StatsAggregator`] is written by every message callback and read once, by
//! the reporter, after the run has completed. It holds three structures:
//!
//! - per-handler received counts (keys registered up front, values only grow)
//! - a payload-size histogram keyed by exact byte length
//! - an unordered multiset of per-message processing times
//!
//! None of them is guarded by a single global lock. Counters live in sharded
//! `DashMap`s with atomic values, so two handlers only contend when their keys
//! hash to the same shard. Latency samples go to one of several cache-padded
//! vectors picked round-robin.
//!
//! ## Invariant
//!
//! Once callbacks have quiesced, the total received count equals the sum of the
//! per-handler counts, the sum of the size histogram, and the number of latency
//! samples.

use crate::error::HarnessError;
use crossbeam::utils::CachePadded;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// One received message's observable facts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// The handler that received the message
    pub source_id: String,
    pub size_bytes: usize,
    /// Wall time spent inside the message callback
    pub processing_time_ms: f64,
}

/// Received count for one handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerCount {
    pub handler: String,
    pub received: u64,
}

/// Point-in-time copy of everything a [`StatsAggregator`] has collected
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    /// Per-handler counts in registration order
    pub handler_counts: Vec<HandlerCount>,
    /// Exact payload size in bytes -> number of messages
    pub size_counts: BTreeMap<usize, u64>,
    /// Processing times in milliseconds, in no particular order
    pub latencies_ms: Vec<f64>,
    pub total_received: u64,
    /// Messages whose processing failed and were left out of the statistics
    pub failed: u64,
}

impl AggregateSnapshot {
    /// Per-handler counts without the handler names
    pub fn counts(&self) -> Vec<u64> {
        self.handler_counts.iter().map(|c| c.received).collect()
    }

    /// Total number of messages across the size histogram
    pub fn size_total(&self) -> u64 {
        self.size_counts.values().sum()
    }
}

struct HandlerSlot {
    index: usize,
    received: AtomicU64,
}

/// Thread-safe accumulator for per-message statistics
pub struct StatsAggregator {
    handlers: DashMap<String, HandlerSlot>,
    sizes: DashMap<usize, AtomicU64>,
    latency_shards: Box<[CachePadded<Mutex<Vec<f64>>>]>,
    next_shard: AtomicUsize,
    total_received: AtomicU64,
    failed: AtomicU64,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StatsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsAggregator")
            .field("handlers", &self.handlers.len())
            .field("total_received", &self.total_received())
            .field("failed", &self.failed())
            .finish()
    }
}

impl StatsAggregator {
    /// Create an empty aggregator with one latency shard per CPU core
    pub fn new() -> Self {
        Self::with_latency_shards(num_cpus::get())
    }

    /// Create an empty aggregator with an explicit number of latency shards
    pub fn with_latency_shards(shards: usize) -> Self {
        let latency_shards = (0..shards.max(1))
            .map(|_| CachePadded::new(Mutex::new(Vec::new())))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            handlers: DashMap::new(),
            sizes: DashMap::new(),
            latency_shards,
            next_shard: AtomicUsize::new(0),
            total_received: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Register a handler with a zero count so it shows up in every report
    ///
    /// Registering the same id twice keeps the first slot and count.
    pub fn init_handler(&self, id: &str) {
        let index = self.handlers.len();
        self.handlers
            .entry(id.to_string())
            .or_insert_with(|| HandlerSlot {
                index,
                received: AtomicU64::new(0),
            });
    }

    /// Count one message of `size_bytes` for handler `id`
    ///
    /// Fails without touching any counter when `id` was never registered.
    pub fn record(&self, id: &str, size_bytes: usize) -> Result<(), HarnessError> {
        self.count(id, size_bytes, None)
    }

    /// Record a complete sample: its counters and its processing time
    ///
    /// The latency is stored before the total moves, so a reader that sees the
    /// new total also sees the sample.
    pub fn record_sample(&self, sample: &Sample) -> Result<(), HarnessError> {
        self.count(
            &sample.source_id,
            sample.size_bytes,
            Some(sample.processing_time_ms),
        )
    }

    fn count(
        &self,
        id: &str,
        size_bytes: usize,
        processing_time_ms: Option<f64>,
    ) -> Result<(), HarnessError> {
        {
            let slot = self
                .handlers
                .get(id)
                .ok_or_else(|| HarnessError::UnknownHandler(id.to_string()))?;
            slot.received.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(bucket) = self.sizes.get(&size_bytes) {
            bucket.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sizes
                .entry(size_bytes)
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }
        if let Some(ms) = processing_time_ms {
            self.record_latency(ms);
        }

        self.total_received.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Add one processing-time sample, in milliseconds
    pub fn record_latency(&self, processing_time_ms: f64) {
        let shard = self.next_shard.fetch_add(1, Ordering::Relaxed) % self.latency_shards.len();
        self.latency_shards[shard].lock().push(processing_time_ms);
    }

    /// Count a message whose processing failed
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_received(&self) -> u64 {
        self.total_received.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Received count for one handler, if registered
    pub fn handler_count(&self, id: &str) -> Option<u64> {
        self.handlers
            .get(id)
            .map(|slot| slot.received.load(Ordering::Relaxed))
    }

    /// Per-handler counts in registration order
    pub fn handler_counts(&self) -> Vec<HandlerCount> {
        let mut slots: Vec<(usize, HandlerCount)> = self
            .handlers
            .iter()
            .map(|entry| {
                (
                    entry.value().index,
                    HandlerCount {
                        handler: entry.key().clone(),
                        received: entry.value().received.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        slots.sort_by_key(|(index, _)| *index);
        slots.into_iter().map(|(_, count)| count).collect()
    }

    /// Exact payload size -> number of messages
    pub fn size_counts(&self) -> BTreeMap<usize, u64> {
        self.sizes
            .iter()
            .map(|entry| (*entry.key(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }

    /// All processing-time samples collected so far
    pub fn latencies_ms(&self) -> Vec<f64> {
        let mut all = Vec::new();
        for shard in self.latency_shards.iter() {
            all.extend_from_slice(&shard.lock());
        }
        all
    }

    /// Copy every structure into an owned snapshot
    pub fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot {
            handler_counts: self.handler_counts(),
            size_counts: self.size_counts(),
            latencies_ms: self.latencies_ms(),
            total_received: self.total_received(),
            failed: self.failed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_handlers_start_at_zero() {
        let aggregator = StatsAggregator::new();
        aggregator.init_handler("consumer-1");
        aggregator.init_handler("consumer-2");

        let counts = aggregator.handler_counts();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].handler, "consumer-1");
        assert_eq!(counts[1].received, 0);
        assert_eq!(aggregator.total_received(), 0);
    }

    #[test]
    fn test_handler_counts_keep_registration_order() {
        let aggregator = StatsAggregator::new();
        for i in 1..=12 {
            aggregator.init_handler(&format!("consumer-{}", i));
        }
        let names: Vec<String> = aggregator
            .handler_counts()
            .into_iter()
            .map(|c| c.handler)
            .collect();
        assert_eq!(names[1], "consumer-2");
        assert_eq!(names[9], "consumer-10");
        assert_eq!(names[11], "consumer-12");
    }

    #[test]
    fn test_duplicate_registration_keeps_count() {
        let aggregator = StatsAggregator::new();
        aggregator.init_handler("consumer-1");
        aggregator.record("consumer-1", 10).unwrap();
        aggregator.init_handler("consumer-1");
        assert_eq!(aggregator.handler_count("consumer-1"), Some(1));
        assert_eq!(aggregator.handler_counts().len(), 1);
    }

    #[test]
    fn test_record_updates_counts_and_sizes() {
        let aggregator = StatsAggregator::new();
        aggregator.init_handler("consumer-1");
        aggregator.init_handler("consumer-2");

        aggregator.record("consumer-1", 1000).unwrap();
        aggregator.record("consumer-1", 1000).unwrap();
        aggregator.record("consumer-2", 250).unwrap();

        assert_eq!(aggregator.handler_count("consumer-1"), Some(2));
        assert_eq!(aggregator.handler_count("consumer-2"), Some(1));
        assert_eq!(aggregator.total_received(), 3);

        let sizes = aggregator.size_counts();
        assert_eq!(sizes.get(&1000), Some(&2));
        assert_eq!(sizes.get(&250), Some(&1));
    }

    #[test]
    fn test_unknown_handler_is_rejected_without_side_effects() {
        let aggregator = StatsAggregator::new();
        aggregator.init_handler("consumer-1");

        let err = aggregator.record("consumer-7", 64).unwrap_err();
        assert!(matches!(err, HarnessError::UnknownHandler(ref id) if id == "consumer-7"));
        assert_eq!(aggregator.total_received(), 0);
        assert!(aggregator.size_counts().is_empty());
    }

    #[test]
    fn test_record_sample_and_failures() {
        let aggregator = StatsAggregator::with_latency_shards(2);
        aggregator.init_handler("consumer-1");
        aggregator
            .record_sample(&Sample {
                source_id: "consumer-1".to_string(),
                size_bytes: 512,
                processing_time_ms: 0.25,
            })
            .unwrap();
        aggregator.record_failure();

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.total_received, 1);
        assert_eq!(snapshot.latencies_ms, vec![0.25]);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.counts(), vec![1]);
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 5_000;

        let aggregator = StatsAggregator::with_latency_shards(4);
        for t in 0..THREADS {
            aggregator.init_handler(&format!("consumer-{}", t + 1));
        }

        std::thread::scope(|scope| {
            for t in 0..THREADS {
                let aggregator = &aggregator;
                scope.spawn(move || {
                    let id = format!("consumer-{}", t + 1);
                    for i in 0..PER_THREAD {
                        aggregator.record(&id, (i % 7) * 100).unwrap();
                        aggregator.record_latency(i as f64 * 0.001);
                    }
                });
            }
        });

        let snapshot = aggregator.snapshot();
        let expected = (THREADS * PER_THREAD) as u64;
        assert_eq!(snapshot.total_received, expected);
        assert_eq!(snapshot.counts().iter().sum::<u64>(), expected);
        assert_eq!(snapshot.size_total(), expected);
        assert_eq!(snapshot.latencies_ms.len() as u64, expected);
        assert!(snapshot.counts().iter().all(|&c| c == PER_THREAD as u64));
    }
}
