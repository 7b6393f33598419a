use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Message-consumer performance harness: start several consumers on a
/// topic, feed them from the built-in publisher, and report throughput,
/// fairness, and processing-time statistics.
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Number of concurrent consumers
    #[clap(short = 'n', long = "handlers", default_value_t = crate::defaults::HANDLER_COUNT, help_heading = "Core Options")]
    pub handler_count: usize,

    /// Messages expected (per consumer in broadcast mode)
    #[clap(short = 'e', long, default_value_t = crate::defaults::EXPECTED_MESSAGES, help_heading = "Core Options")]
    pub expected_messages: u64,

    /// How messages are spread over consumers
    #[clap(short = 'm', long, value_enum, default_value_t = DistributionMode::LoadBalance, help_heading = "Core Options")]
    pub mode: DistributionMode,

    /// Topic to consume from
    #[clap(long, default_value = crate::defaults::TOPIC, help_heading = "Core Options")]
    pub topic: String,

    /// Channel name (suffixed with -1, -2, ... in broadcast mode)
    #[clap(long, default_value = crate::defaults::CHANNEL, help_heading = "Core Options")]
    pub channel: String,

    /// Pause the timer after this long without a message (e.g. 3s, 1500ms)
    #[clap(long, value_parser = parse_duration, default_value = "3s", help_heading = "Timing")]
    pub inactivity_timeout: Duration,

    /// Interval between progress checks
    #[clap(long, value_parser = parse_duration, default_value = "500ms", help_heading = "Timing")]
    pub poll_interval: Duration,

    /// Messages the built-in publisher sends (defaults to the expected count)
    #[clap(long, help_heading = "Publisher")]
    pub publish_count: Option<u64>,

    /// Payload size in bytes
    #[clap(short = 's', long, default_value_t = crate::defaults::MESSAGE_SIZE, help_heading = "Publisher")]
    pub message_size: usize,

    /// Messages per publish batch
    #[clap(short = 'b', long, default_value_t = crate::defaults::BATCH_SIZE, help_heading = "Publisher")]
    pub batch_size: usize,

    /// Pause between publish batches
    #[clap(long, value_parser = parse_duration, help_heading = "Publisher")]
    pub batch_delay: Option<Duration>,

    /// Write the report as JSON to this file
    #[clap(short = 'o', long, help_heading = "Output")]
    pub output_file: Option<PathBuf>,

    /// Also write log lines to this file
    #[clap(long, help_heading = "Output")]
    pub log_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = clap::ArgAction::Count, help_heading = "Output")]
    pub verbose: u8,

    /// Only log warnings and errors
    #[clap(short = 'q', long, conflicts_with = "verbose", help_heading = "Output")]
    pub quiet: bool,
}

/// How consumers are bound to channels
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum DistributionMode {
    /// All consumers share one channel; each message goes to one of them
    #[clap(name = "load-balance")]
    LoadBalance,

    /// Each consumer has its own channel; every consumer gets every message
    #[clap(name = "broadcast")]
    Broadcast,
}

impl std::fmt::Display for DistributionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistributionMode::LoadBalance => write!(f, "Load Balancing"),
            DistributionMode::Broadcast => write!(f, "Broadcast"),
        }
    }
}

/// Parse duration from string (e.g., "10s", "1.5s", "500ms", "5m", "1h")
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s")
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let seconds = match unit {
        "ms" => num / 1000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Duration::try_from_secs_f64(seconds).map_err(|e| format!("Duration out of range: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration(" 250ms ").unwrap(), Duration::from_millis(250));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("-3s").is_err());
    }

    #[test]
    fn test_distribution_mode_display() {
        assert_eq!(DistributionMode::LoadBalance.to_string(), "Load Balancing");
        assert_eq!(DistributionMode::Broadcast.to_string(), "Broadcast");
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["mq-consumer-bench"]);
        assert_eq!(args.handler_count, 3);
        assert_eq!(args.expected_messages, 10_000);
        assert_eq!(args.mode, DistributionMode::LoadBalance);
        assert_eq!(args.topic, "performance-testing");
        assert_eq!(args.channel, "performance-testing-channel");
        assert_eq!(args.inactivity_timeout, Duration::from_secs(3));
        assert_eq!(args.poll_interval, Duration::from_millis(500));
        assert_eq!(args.publish_count, None);
        assert_eq!(args.message_size, 1000);
        assert_eq!(args.batch_size, 100);
        assert!(args.output_file.is_none());
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
    }

    #[test]
    fn test_broadcast_flags() {
        let args = Args::parse_from([
            "mq-consumer-bench",
            "-n",
            "4",
            "-e",
            "250",
            "-m",
            "broadcast",
            "--inactivity-timeout",
            "1500ms",
            "-vv",
        ]);
        assert_eq!(args.handler_count, 4);
        assert_eq!(args.expected_messages, 250);
        assert_eq!(args.mode, DistributionMode::Broadcast);
        assert_eq!(args.inactivity_timeout, Duration::from_millis(1500));
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Args::try_parse_from(["mq-consumer-bench", "-q", "-v"]).is_err());
    }
}
