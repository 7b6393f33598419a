use anyhow::Result;
use mq_consumer_bench::{
    DistributionMode, LoadGenerator, LoopbackBroker, MemoryStatusSink, PerformanceTimer,
    PublishConfig, RunConfig, RunOutcome, StatisticsReporter, StatsAggregator, SystemClock,
    WorkerOrchestrator,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn harness(
    broker: &LoopbackBroker,
    inactivity_timeout: Duration,
) -> (WorkerOrchestrator, Arc<MemoryStatusSink>) {
    let sink = Arc::new(MemoryStatusSink::new());
    let orchestrator = WorkerOrchestrator::new(
        Arc::new(broker.clone()),
        Arc::new(PerformanceTimer::new(Arc::new(SystemClock), inactivity_timeout)),
        Arc::new(StatsAggregator::new()),
        sink.clone(),
    );
    (orchestrator, sink)
}

/// Publish through the load generator and consume with three consumers on a
/// shared channel. Round-robin delivery splits the messages evenly.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn load_balance_run_end_to_end() -> Result<()> {
    let broker = LoopbackBroker::default();
    let (orchestrator, sink) = harness(&broker, Duration::from_secs(3));
    let config = RunConfig::new(3, 300, DistributionMode::LoadBalance)?
        .with_poll_interval(Duration::from_millis(20))?;

    orchestrator
        .subscribe_handlers("performance-testing", "workers", &config)
        .await?;

    let generator = LoadGenerator::new(
        broker.clone(),
        "performance-testing",
        PublishConfig::new(300, 512, 50)?,
        sink.clone(),
    );
    let publisher = tokio::spawn(async move { generator.run().await });

    let result = orchestrator.monitor(&config).await?;
    let summary = publisher.await??;
    orchestrator.stop_all().await;

    assert_eq!(summary.sent, 300);
    assert_eq!(result.outcome, RunOutcome::Completed);
    assert_eq!(result.total_received, 300);
    assert_eq!(result.aggregates.counts(), vec![100, 100, 100]);
    assert_eq!(result.aggregates.size_total(), 300);

    let report = StatisticsReporter::compute(&result);
    assert_eq!(report.fairness.as_ref().map(|f| f.fairness_index), Some(1.0));
    assert_eq!(report.size_histogram.len(), 1);
    assert_eq!(report.size_histogram[0].start, 500);
    assert_eq!(report.size_histogram[0].count, 300);
    assert!(report.throughput.messages_per_second > 0.0);

    StatisticsReporter::render(&report, sink.as_ref());
    assert!(sink.contains("Consumers started. Waiting for first message..."));
    assert!(sink.contains("Sent 300/300 messages..."));
    assert!(sink.contains("Received 300/300 messages... (100.0%)"));
    assert!(sink.contains("Fairness index: 1.0000"));
    Ok(())
}

/// A gap longer than the inactivity timeout pauses the timer; the next
/// message resumes it. The reported elapsed time excludes the gap.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn inactivity_gap_is_excluded_from_elapsed() -> Result<()> {
    let broker = LoopbackBroker::default();
    let (orchestrator, sink) = harness(&broker, Duration::from_millis(100));
    let config = RunConfig::new(2, 40, DistributionMode::LoadBalance)?
        .with_inactivity_timeout(Duration::from_millis(100))?
        .with_poll_interval(Duration::from_millis(20))?;

    orchestrator
        .subscribe_handlers("performance-testing", "workers", &config)
        .await?;

    let wall_start = Instant::now();
    let producer = {
        let broker = broker.clone();
        async move {
            broker
                .publish_batch("performance-testing", "test", vec![vec![7u8; 10]; 20])
                .await?;
            tokio::time::sleep(Duration::from_millis(600)).await;
            broker
                .publish_batch("performance-testing", "test", vec![vec![7u8; 10]; 20])
                .await?;
            anyhow::Ok(())
        }
    };

    let (result, produced) = tokio::join!(orchestrator.monitor(&config), producer);
    produced?;
    let result = result?;
    let wall = wall_start.elapsed();
    orchestrator.stop_all().await;

    assert_eq!(result.outcome, RunOutcome::Completed);
    assert_eq!(result.total_received, 40);
    assert!(sink.contains("Pausing timer at"));
    assert!(sink.contains("Restarting timer at"));
    assert!(sink.contains("[Timer: Paused]"));
    assert!(
        result.elapsed + Duration::from_millis(300) < wall,
        "elapsed {:?} should exclude most of the idle gap (wall {:?})",
        result.elapsed,
        wall
    );
    Ok(())
}
