//! # Statistics Reporting
//!
//! Turns a finished [`RunResult`] into a [`RunReport`]: throughput, the
//! per-handler distribution and its fairness, payload-size histograms, and
//! processing-time statistics with percentiles. Computation is pure; the
//! report is serializable and can be rendered as text to any
//! [`StatusSink`].
//!
//! ## Percentiles
//!
//! Processing times are sorted ascending and percentiles use linear
//! interpolation between closest ranks (see [`crate::utils::percentile`]).
//!
//! ## Threshold Buckets
//!
//! Latency and size buckets are exclusive: each value is counted in the first
//! bucket whose threshold it does not exceed, or in the trailing overflow
//! bucket.

use crate::{
    cli::DistributionMode,
    metrics::HandlerCount,
    orchestrator::{RunOutcome, RunResult},
    status::StatusSink,
    utils::{calculate_stats, percentile},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Width of a size-histogram bucket in bytes
pub const SIZE_BUCKET_WIDTH: usize = 100;

/// Processing-time thresholds in milliseconds
pub const LATENCY_THRESHOLDS_MS: [u64; 7] = [1, 2, 5, 10, 20, 50, 100];

/// Payload-size thresholds in bytes
pub const SIZE_THRESHOLDS_BYTES: [u64; 5] = [100, 500, 1000, 2000, 5000];

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Messages-per-second figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputStats {
    /// Total received divided by elapsed seconds
    pub messages_per_second: f64,
    /// Combined throughput divided by the handler count; broadcast only
    pub per_handler_messages_per_second: Option<f64>,
}

/// One handler's slice of the received messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerShare {
    pub handler: String,
    pub received: u64,
    /// Fraction of all received messages
    pub share_of_total: f64,
    /// Fraction of the per-handler expected count; broadcast only
    pub completion: Option<f64>,
}

/// Load-balancing fairness over per-handler counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairnessStats {
    pub min: u64,
    pub max: u64,
    pub avg: f64,
    /// `None` when the least-served handler received nothing
    pub max_min_ratio: Option<f64>,
    /// `min / avg`; 1.0 is perfect balance, 0.0 when nothing arrived
    pub fairness_index: f64,
}

/// Messages whose size falls in `[start, end]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeBucket {
    pub start: usize,
    pub end: usize,
    pub count: u64,
}

/// Count of values up to `threshold`, or above the last threshold when `None`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdBucket {
    pub threshold: Option<u64>,
    pub count: u64,
}

/// Payload-size summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeStats {
    /// Integer average payload size in bytes
    pub average_bytes: u64,
    pub buckets: Vec<ThresholdBucket>,
}

/// Processing-time statistics in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub samples: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    /// Population standard deviation
    pub std_dev_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Everything reported about one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: DistributionMode,
    pub outcome: RunOutcome,
    pub handler_count: usize,
    /// Expected messages per handler in broadcast mode, overall otherwise
    pub expected_message_count: u64,
    pub elapsed_seconds: f64,
    pub total_received: u64,
    pub failed: u64,
    pub throughput: ThroughputStats,
    pub distribution: Vec<HandlerShare>,
    pub fairness: Option<FairnessStats>,
    pub size_histogram: Vec<SizeBucket>,
    pub size_stats: Option<SizeStats>,
    pub latency: Option<LatencyStats>,
    pub latency_buckets: Vec<ThresholdBucket>,
    pub total_data_mb: f64,
}

/// Computes and renders run statistics
pub struct StatisticsReporter;

impl StatisticsReporter {
    /// Compute the full report for a finished run
    pub fn compute(result: &RunResult) -> RunReport {
        let config = &result.config;
        let aggregates = &result.aggregates;
        let elapsed_seconds = result.elapsed.as_secs_f64();
        let broadcast = config.distribution_mode == DistributionMode::Broadcast;

        let mut sorted = aggregates.latencies_ms.clone();
        sorted.sort_by(f64::total_cmp);

        let messages_per_second = throughput(result.total_received, elapsed_seconds);
        let per_handler = broadcast.then(|| messages_per_second / config.handler_count.max(1) as f64);

        let fairness = if broadcast {
            None
        } else {
            fairness(&aggregates.counts())
        };

        RunReport {
            mode: config.distribution_mode,
            outcome: result.outcome,
            handler_count: config.handler_count,
            expected_message_count: config.expected_message_count,
            elapsed_seconds,
            total_received: result.total_received,
            failed: aggregates.failed,
            throughput: ThroughputStats {
                messages_per_second,
                per_handler_messages_per_second: per_handler,
            },
            distribution: distribution(
                &aggregates.handler_counts,
                result.total_received,
                broadcast.then_some(config.expected_message_count),
            ),
            fairness,
            size_histogram: size_histogram(&aggregates.size_counts),
            size_stats: size_stats(&aggregates.size_counts),
            latency: latency_stats(&sorted),
            latency_buckets: if sorted.is_empty() {
                Vec::new()
            } else {
                threshold_buckets(
                    sorted.iter().map(|&ms| (ms, 1)),
                    &LATENCY_THRESHOLDS_MS,
                )
            },
            total_data_mb: total_data_mb(result.total_received, &aggregates.size_counts),
        }
    }

    /// Write the human-readable result block
    pub fn render(report: &RunReport, sink: &dyn StatusSink) {
        sink.write("");
        sink.write("Performance Results:");
        sink.write(&format!("Mode: {}", report.mode));
        if report.outcome == RunOutcome::Interrupted {
            sink.write("Outcome: Interrupted before the expected total arrived");
        }
        sink.write(&format!("Total time: {:.2} seconds", report.elapsed_seconds));

        match report.throughput.per_handler_messages_per_second {
            Some(per_handler) => {
                sink.write(&format!(
                    "Individual throughput: {:.2} messages/second/consumer",
                    per_handler
                ));
                sink.write(&format!(
                    "Combined throughput: {:.2} messages/second",
                    report.throughput.messages_per_second
                ));
            }
            None => sink.write(&format!(
                "Throughput: {:.2} messages/second",
                report.throughput.messages_per_second
            )),
        }

        sink.write("");
        sink.write("Message distribution across consumers:");
        for share in &report.distribution {
            match share.completion {
                Some(completion) => sink.write(&format!(
                    "  {}: {}/{} messages ({:.2}% of expected)",
                    share.handler,
                    share.received,
                    report.expected_message_count,
                    completion * 100.0
                )),
                None => sink.write(&format!(
                    "  {}: {} messages ({:.2}% of total)",
                    share.handler,
                    share.received,
                    share.share_of_total * 100.0
                )),
            }
        }

        if let Some(fairness) = &report.fairness {
            sink.write("");
            sink.write("Load balancing fairness metrics:");
            sink.write(&format!(
                "  Min: {}, Max: {}, Avg: {:.2}",
                fairness.min, fairness.max, fairness.avg
            ));
            match fairness.max_min_ratio {
                Some(ratio) => sink.write(&format!("  Max/Min ratio: {:.2}", ratio)),
                None => sink.write("  Max/Min ratio: n/a (a consumer received nothing)"),
            }
            sink.write(&format!(
                "  Fairness index: {:.4} (1.0 is perfectly balanced)",
                fairness.fairness_index
            ));
        }

        if !report.size_histogram.is_empty() {
            sink.write("");
            sink.write("Message size distribution:");
            for bucket in &report.size_histogram {
                sink.write(&format!(
                    "  {}-{} bytes: {} messages",
                    bucket.start, bucket.end, bucket.count
                ));
            }
        }

        if let Some(latency) = &report.latency {
            sink.write("");
            sink.write("Processing time statistics:");
            sink.write(&format!(
                "  Standard Deviation: {:.6} ms",
                latency.std_dev_ms
            ));

            sink.write("");
            sink.write("Processing time distribution:");
            render_threshold_buckets(sink, &report.latency_buckets, "ms");

            if let Some(size_stats) = &report.size_stats {
                sink.write("");
                sink.write("Message size statistics:");
                sink.write(&format!(
                    "  Average size: {} bytes",
                    size_stats.average_bytes
                ));
                sink.write("");
                sink.write("Message size thresholds:");
                render_threshold_buckets(sink, &size_stats.buckets, "bytes");
            }

            sink.write("");
            sink.write("Aggregate Performance:");
            sink.write(&format!(
                "  Total messages processed: {}",
                report.total_received
            ));
            sink.write(&format!(
                "  Total data processed: {:.2} MB",
                report.total_data_mb
            ));

            sink.write("");
            sink.write("Processing time statistics:");
            sink.write("  In milliseconds:");
            for (label, value) in latency.labelled() {
                sink.write(&format!("    {}: {:.6} ms", label, value));
            }
            sink.write("  In microseconds:");
            for (label, value) in latency.labelled() {
                sink.write(&format!("    {}: {:.2} μs", label, value * 1000.0));
            }
        }

        if report.failed > 0 {
            sink.write("");
            sink.write(&format!(
                "Failed messages (not included above): {}",
                report.failed
            ));
        }
    }
}

impl LatencyStats {
    fn labelled(&self) -> [(&'static str, f64); 6] {
        [
            ("Min", self.min_ms),
            ("Max", self.max_ms),
            ("Avg", self.mean_ms),
            ("P50", self.p50_ms),
            ("P95", self.p95_ms),
            ("P99", self.p99_ms),
        ]
    }
}

fn render_threshold_buckets(sink: &dyn StatusSink, buckets: &[ThresholdBucket], unit: &str) {
    let last = buckets.iter().filter_map(|b| b.threshold).max().unwrap_or(0);
    for bucket in buckets {
        match bucket.threshold {
            Some(threshold) => sink.write(&format!(
                "  <= {} {}: {} messages",
                threshold, unit, bucket.count
            )),
            None => sink.write(&format!("  > {} {}: {} messages", last, unit, bucket.count)),
        }
    }
}

/// Messages per second; 0 when no time elapsed
pub fn throughput(total_received: u64, elapsed_seconds: f64) -> f64 {
    if elapsed_seconds > 0.0 {
        total_received as f64 / elapsed_seconds
    } else {
        0.0
    }
}

/// Fairness of per-handler counts; `None` with fewer than two handlers
pub fn fairness(counts: &[u64]) -> Option<FairnessStats> {
    if counts.len() < 2 {
        return None;
    }

    let min = counts.iter().copied().min().unwrap_or(0);
    let max = counts.iter().copied().max().unwrap_or(0);
    let avg = counts.iter().sum::<u64>() as f64 / counts.len() as f64;

    Some(FairnessStats {
        min,
        max,
        avg,
        max_min_ratio: (min > 0).then(|| max as f64 / min as f64),
        fairness_index: if avg > 0.0 { min as f64 / avg } else { 0.0 },
    })
}

fn distribution(
    counts: &[HandlerCount],
    total_received: u64,
    expected_per_handler: Option<u64>,
) -> Vec<HandlerShare> {
    counts
        .iter()
        .map(|count| HandlerShare {
            handler: count.handler.clone(),
            received: count.received,
            share_of_total: ratio(count.received, total_received),
            completion: expected_per_handler.map(|expected| ratio(count.received, expected)),
        })
        .collect()
}

/// Group exact sizes into buckets of [`SIZE_BUCKET_WIDTH`] bytes, ascending
pub fn size_histogram(size_counts: &BTreeMap<usize, u64>) -> Vec<SizeBucket> {
    let mut grouped: BTreeMap<usize, u64> = BTreeMap::new();
    for (&size, &count) in size_counts {
        *grouped
            .entry(size / SIZE_BUCKET_WIDTH * SIZE_BUCKET_WIDTH)
            .or_insert(0) += count;
    }

    grouped
        .into_iter()
        .map(|(start, count)| SizeBucket {
            start,
            end: start + SIZE_BUCKET_WIDTH - 1,
            count,
        })
        .collect()
}

fn size_stats(size_counts: &BTreeMap<usize, u64>) -> Option<SizeStats> {
    let messages: u64 = size_counts.values().sum();
    if messages == 0 {
        return None;
    }

    Some(SizeStats {
        average_bytes: size_sum(size_counts) / messages,
        buckets: threshold_buckets(
            size_counts.iter().map(|(&size, &count)| (size as f64, count)),
            &SIZE_THRESHOLDS_BYTES,
        ),
    })
}

/// Latency summary over ascending-sorted samples; `None` when empty
pub fn latency_stats(sorted_ms: &[f64]) -> Option<LatencyStats> {
    if sorted_ms.is_empty() {
        return None;
    }

    let (mean_ms, min_ms, max_ms, std_dev_ms) = calculate_stats(sorted_ms);
    Some(LatencyStats {
        samples: sorted_ms.len(),
        min_ms,
        max_ms,
        mean_ms,
        std_dev_ms,
        p50_ms: percentile(sorted_ms, 50.0),
        p95_ms: percentile(sorted_ms, 95.0),
        p99_ms: percentile(sorted_ms, 99.0),
    })
}

/// Count weighted values into exclusive threshold buckets plus an overflow bucket
pub fn threshold_buckets(
    values: impl IntoIterator<Item = (f64, u64)>,
    thresholds: &[u64],
) -> Vec<ThresholdBucket> {
    let mut counts = vec![0u64; thresholds.len() + 1];
    for (value, weight) in values {
        let index = thresholds
            .iter()
            .position(|&threshold| value <= threshold as f64)
            .unwrap_or(thresholds.len());
        counts[index] += weight;
    }

    thresholds
        .iter()
        .map(|&threshold| Some(threshold))
        .chain(std::iter::once(None))
        .zip(counts)
        .map(|(threshold, count)| ThresholdBucket { threshold, count })
        .collect()
}

/// Received count times the integer average size, in MB
fn total_data_mb(total_received: u64, size_counts: &BTreeMap<usize, u64>) -> f64 {
    if total_received == 0 {
        return 0.0;
    }
    let average_size = size_sum(size_counts) / total_received;
    (total_received * average_size) as f64 / BYTES_PER_MB
}

fn size_sum(size_counts: &BTreeMap<usize, u64>) -> u64 {
    size_counts
        .iter()
        .map(|(&size, &count)| size as u64 * count)
        .sum()
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::AggregateSnapshot;
    use crate::orchestrator::RunConfig;
    use crate::status::MemoryStatusSink;
    use std::time::Duration;

    fn run_result(
        mode: DistributionMode,
        expected: u64,
        counts: &[u64],
        sizes: &[(usize, u64)],
        latencies: &[f64],
        elapsed: Duration,
    ) -> RunResult {
        let config = RunConfig::new(counts.len(), expected, mode).unwrap();
        let handler_counts: Vec<HandlerCount> = counts
            .iter()
            .enumerate()
            .map(|(i, &received)| HandlerCount {
                handler: RunConfig::handler_name(i),
                received,
            })
            .collect();
        let total: u64 = counts.iter().sum();
        RunResult {
            config,
            elapsed,
            total_received: total,
            aggregates: AggregateSnapshot {
                handler_counts,
                size_counts: sizes.iter().copied().collect(),
                latencies_ms: latencies.to_vec(),
                total_received: total,
                failed: 0,
            },
            outcome: RunOutcome::Completed,
        }
    }

    #[test]
    fn test_fairness_index() {
        let even = fairness(&[100, 100, 100]).unwrap();
        assert_eq!(even.fairness_index, 1.0);
        assert_eq!(even.max_min_ratio, Some(1.0));

        let skewed = fairness(&[50, 100, 150]).unwrap();
        assert_eq!(skewed.fairness_index, 0.5);
        assert_eq!(skewed.max_min_ratio, Some(3.0));
        assert_eq!(skewed.avg, 100.0);
    }

    #[test]
    fn test_fairness_edges() {
        assert!(fairness(&[42]).is_none());
        assert!(fairness(&[]).is_none());

        let starved = fairness(&[0, 10]).unwrap();
        assert_eq!(starved.max_min_ratio, None);
        assert_eq!(starved.fairness_index, 0.0);

        let idle = fairness(&[0, 0]).unwrap();
        assert_eq!(idle.fairness_index, 0.0);
    }

    #[test]
    fn test_size_histogram_groups_by_hundreds() {
        let sizes: BTreeMap<usize, u64> = [(0, 1), (99, 2), (100, 3), (1000, 4), (1099, 5)]
            .into_iter()
            .collect();
        let histogram = size_histogram(&sizes);

        assert_eq!(
            histogram,
            vec![
                SizeBucket { start: 0, end: 99, count: 3 },
                SizeBucket { start: 100, end: 199, count: 3 },
                SizeBucket { start: 1000, end: 1099, count: 9 },
            ]
        );
        assert_eq!(histogram.iter().map(|b| b.count).sum::<u64>(), 15);
    }

    #[test]
    fn test_threshold_buckets_are_exclusive() {
        let buckets = threshold_buckets(
            [0.5, 1.0, 1.5, 2.0, 99.0, 100.0, 100.5, 250.0]
                .into_iter()
                .map(|v| (v, 1)),
            &LATENCY_THRESHOLDS_MS,
        );
        let counts: Vec<u64> = buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 2, 0, 0, 0, 0, 2, 2]);
        assert_eq!(buckets.last().unwrap().threshold, None);
    }

    #[test]
    fn test_latency_stats() {
        let stats = latency_stats(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(stats.min_ms, 1.0);
        assert_eq!(stats.max_ms, 5.0);
        assert_eq!(stats.mean_ms, 3.0);
        assert_eq!(stats.p50_ms, 3.0);
        assert!((stats.std_dev_ms - 2.0_f64.sqrt()).abs() < 1e-12);
        assert!(latency_stats(&[]).is_none());
    }

    #[test]
    fn test_compute_load_balance_report() {
        let result = run_result(
            DistributionMode::LoadBalance,
            300,
            &[50, 100, 150],
            &[(1000, 300)],
            &vec![0.01; 300],
            Duration::from_secs(2),
        );
        let report = StatisticsReporter::compute(&result);

        assert_eq!(report.throughput.messages_per_second, 150.0);
        assert_eq!(report.throughput.per_handler_messages_per_second, None);
        assert_eq!(report.fairness.as_ref().unwrap().fairness_index, 0.5);
        assert_eq!(report.distribution[0].share_of_total, 50.0 / 300.0);
        assert_eq!(report.distribution[0].completion, None);
        assert_eq!(report.size_stats.as_ref().unwrap().average_bytes, 1000);
        assert_eq!(report.total_data_mb, 300_000.0 / BYTES_PER_MB);
        assert_eq!(
            report.latency_buckets.iter().map(|b| b.count).sum::<u64>(),
            300
        );
    }

    #[test]
    fn test_compute_broadcast_report() {
        let result = run_result(
            DistributionMode::Broadcast,
            10,
            &[10, 10, 10],
            &[(64, 30)],
            &vec![0.002; 30],
            Duration::from_secs(3),
        );
        let report = StatisticsReporter::compute(&result);

        assert_eq!(report.throughput.messages_per_second, 10.0);
        let per_handler = report.throughput.per_handler_messages_per_second.unwrap();
        assert!((per_handler - 10.0 / 3.0).abs() < 1e-12);
        assert!(report.fairness.is_none());
        assert_eq!(report.distribution[2].completion, Some(1.0));
    }

    #[test]
    fn test_compute_empty_run() {
        let mut result = run_result(
            DistributionMode::LoadBalance,
            10,
            &[0, 0],
            &[],
            &[],
            Duration::ZERO,
        );
        result.outcome = RunOutcome::Interrupted;
        let report = StatisticsReporter::compute(&result);

        assert_eq!(report.throughput.messages_per_second, 0.0);
        assert!(report.latency.is_none());
        assert!(report.size_stats.is_none());
        assert!(report.size_histogram.is_empty());
        assert!(report.latency_buckets.is_empty());
        assert_eq!(report.total_data_mb, 0.0);
        assert_eq!(report.distribution[0].share_of_total, 0.0);

        let sink = MemoryStatusSink::new();
        StatisticsReporter::render(&report, &sink);
        assert!(sink.contains("Outcome: Interrupted"));
        assert!(!sink.contains("In microseconds:"));
    }

    #[test]
    fn test_render_sections() {
        let result = run_result(
            DistributionMode::LoadBalance,
            4,
            &[2, 2],
            &[(150, 4)],
            &[0.5, 1.5, 3.0, 120.0],
            Duration::from_secs(1),
        );
        let report = StatisticsReporter::compute(&result);
        let sink = MemoryStatusSink::new();
        StatisticsReporter::render(&report, &sink);

        let lines = sink.lines();
        assert!(lines.contains(&"Mode: Load Balancing".to_string()));
        assert!(lines.contains(&"Throughput: 4.00 messages/second".to_string()));
        assert!(lines.contains(&"  consumer-1: 2 messages (50.00% of total)".to_string()));
        assert!(lines.contains(&"  Fairness index: 1.0000 (1.0 is perfectly balanced)".to_string()));
        assert!(lines.contains(&"  100-199 bytes: 4 messages".to_string()));
        assert!(lines.contains(&"  <= 1 ms: 1 messages".to_string()));
        assert!(lines.contains(&"  > 100 ms: 1 messages".to_string()));
        assert!(lines.contains(&"  <= 500 bytes: 4 messages".to_string()));
        assert!(lines.contains(&"    Max: 120.000000 ms".to_string()));
        assert!(lines.contains(&"    Max: 120000.00 μs".to_string()));
    }

    #[test]
    fn test_report_serializes() {
        let result = run_result(
            DistributionMode::Broadcast,
            1,
            &[1, 1],
            &[(10, 2)],
            &[0.1, 0.2],
            Duration::from_millis(500),
        );
        let report = StatisticsReporter::compute(&result);
        let json = serde_json::to_string(&report).unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total_received, 2);
        assert_eq!(back.mode, DistributionMode::Broadcast);
    }
}
