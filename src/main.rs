//! # Message-Consumer Performance Harness - Main Entry Point
//!
//! Runs a complete consumer benchmark against the in-process loopback broker:
//!
//! 1. **Initialize logging**: Console output plus an optional log file
//! 2. **Parse arguments**: Build the run and publish configurations
//! 3. **Subscribe consumers**: All handlers are attached before publishing
//! 4. **Publish**: The load generator runs as a separate task
//! 5. **Monitor**: Poll progress until the expected total arrives or Ctrl-C
//! 6. **Report**: Render statistics and optionally write JSON results

use anyhow::Result;
use clap::Parser;
use mq_consumer_bench::{
    cli::Args,
    logging,
    utils::generate_run_id,
    LoadGenerator, LoopbackBroker, PerformanceTimer, PublishConfig, ResultsManager, RunConfig,
    StatisticsReporter, StatsAggregator, StatusSink, SystemClock, TracingStatusSink,
    WorkerOrchestrator,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Held until exit so the file writer flushes
    let _log_guard = logging::init(args.verbose, args.quiet, args.log_file.as_deref())?;

    let run_id = generate_run_id();
    info!("Starting message-consumer performance harness (run {})", run_id);
    debug!("Configuration: {:?}", args);

    let config = RunConfig::from_args(&args)?;
    let publish_config = PublishConfig::from_args(&args)?;

    let sink: Arc<dyn StatusSink> = Arc::new(TracingStatusSink);
    let broker = LoopbackBroker::default();
    let timer = Arc::new(PerformanceTimer::new(
        Arc::new(SystemClock),
        config.inactivity_timeout,
    ));
    let orchestrator = WorkerOrchestrator::new(
        Arc::new(broker.clone()),
        timer,
        Arc::new(StatsAggregator::new()),
        Arc::clone(&sink),
    );

    orchestrator
        .subscribe_handlers(&args.topic, &args.channel, &config)
        .await?;

    let generator = LoadGenerator::new(
        broker.clone(),
        args.topic.clone(),
        publish_config,
        Arc::clone(&sink),
    );
    let publisher = tokio::spawn(async move {
        let outcome = generator.run().await;
        if let Err(e) = &outcome {
            error!("Publisher failed: {:#}", e);
        }
        outcome
    });

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping run");
            stop.stop();
        }
    });

    let result = orchestrator.monitor(&config).await;
    orchestrator.stop_all().await;

    if !publisher.is_finished() {
        publisher.abort();
    }
    match publisher.await {
        Ok(Ok(summary)) => debug!("Publisher sent {} messages", summary.sent),
        Ok(Err(_)) => {}
        Err(e) if e.is_cancelled() => debug!("Publisher cancelled before finishing"),
        Err(e) => warn!("Publisher task failed: {}", e),
    }

    let result = result?;
    let report = StatisticsReporter::compute(&result);
    StatisticsReporter::render(&report, sink.as_ref());

    if let Some(ref output_file) = args.output_file {
        ResultsManager::new(output_file, run_id).write(&report)?;
    }

    info!(
        "Harness finished ({}, {} messages received)",
        report.outcome, report.total_received
    );
    Ok(())
}
