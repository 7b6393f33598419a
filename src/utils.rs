//! # Utility Functions and Helper Module
//!
//! Helpers shared across the harness:
//!
//! - **Statistics**: Mean/min/max/standard deviation and interpolated percentiles
//! - **Validation**: Configuration and queue-name checks with clear error messages
//! - **Display Helpers**: Progress indicators for the monitor loop
//!
//! ## Usage Examples
//!
//! ```rust
//! use mq_consumer_bench::utils::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! assert_eq!(percentile(&[10.0, 20.0, 30.0, 40.0], 50.0), 25.0);
//!
//! validate_name("topic", "performance-testing")?;
//! # Ok(())
//! # }
//! ```

use crate::error::HarnessError;
use uuid::Uuid;

/// Longest topic or channel name accepted
pub const MAX_NAME_LENGTH: usize = 64;

/// Generate a unique identifier for a run
///
/// Returns the string form of a UUID v4. Used to tag JSON results and log
/// lines so that several runs against the same queue can be told apart.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Calculate statistics from a slice of values
///
/// ## Returns
/// Tuple of (mean, min, max, standard_deviation)
///
/// ## Empty Dataset Handling
///
/// If the input slice is empty, returns (0.0, 0.0, 0.0, 0.0) rather than
/// producing NaN.
///
/// ## Standard Deviation Calculation
///
/// Uses the population standard deviation formula:
/// σ = √(Σ(x - μ)² / N)
///
/// ```rust
/// # use mq_consumer_bench::utils::calculate_stats;
/// let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
/// let (mean, min, max, std_dev) = calculate_stats(&values);
/// assert_eq!(mean, 3.0);
/// assert_eq!(min, 1.0);
/// assert_eq!(max, 5.0);
/// assert!((std_dev - 2.0_f64.sqrt()).abs() < 1e-12);
/// ```
pub fn calculate_stats(values: &[f64]) -> (f64, f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }

    let sum: f64 = values.iter().sum();
    let count = values.len() as f64;
    let mean = sum / count;

    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / count;
    let std_dev = variance.sqrt();

    (mean, min, max, std_dev)
}

/// Percentile of an ascending-sorted slice by linear interpolation
///
/// ## Algorithm
///
/// For percentile `p` over `n` values: `rank = p/100 * (n-1)`,
/// `k = floor(rank)`, `frac = rank - k`. When `k >= n-1` the result is the
/// last value, otherwise `values[k] + frac * (values[k+1] - values[k])`.
///
/// An empty slice yields 0.0. The slice must already be sorted.
///
/// ```rust
/// # use mq_consumer_bench::utils::percentile;
/// let sorted = [10.0, 20.0, 30.0, 40.0];
/// assert_eq!(percentile(&sorted, 0.0), 10.0);
/// assert_eq!(percentile(&sorted, 50.0), 25.0);
/// assert_eq!(percentile(&sorted, 100.0), 40.0);
/// ```
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let last = sorted.len() - 1;
    let rank = (p / 100.0) * last as f64;
    let k = rank.floor().max(0.0) as usize;
    if k >= last {
        return sorted[last];
    }
    let frac = rank - k as f64;
    sorted[k] + frac * (sorted[k + 1] - sorted[k])
}

/// Validate a topic or channel name
///
/// Names must be 1 to 64 characters drawn from `[A-Za-z0-9._-]`.
pub fn validate_name(kind: &'static str, name: &str) -> Result<(), HarnessError> {
    let invalid = |reason| HarnessError::InvalidName {
        kind,
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(invalid("longer than 64 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid("only [A-Za-z0-9._-] are allowed"));
    }
    Ok(())
}

/// Validate the number of concurrent handlers
///
/// At least one handler is required; more than 1024 is almost certainly a
/// typo and would only measure scheduler overhead.
pub fn validate_handler_count(handlers: usize) -> Result<(), HarnessError> {
    if handlers == 0 {
        return Err(HarnessError::InvalidConfig(
            "handler count must be at least 1".to_string(),
        ));
    }
    if handlers > 1024 {
        return Err(HarnessError::InvalidConfig(format!(
            "handler count {} is too large (maximum 1024)",
            handlers
        )));
    }
    Ok(())
}

/// Validate a published payload size
///
/// Payloads must be non-empty and at most 16 MB.
pub fn validate_message_size(message_size: usize) -> Result<(), HarnessError> {
    if message_size == 0 {
        return Err(HarnessError::InvalidConfig(
            "message size must be greater than 0".to_string(),
        ));
    }
    if message_size > 16 * 1024 * 1024 {
        return Err(HarnessError::InvalidConfig(format!(
            "message size {} is too large (maximum 16 MB)",
            message_size
        )));
    }
    Ok(())
}

/// Create a progress indicator string
///
/// Uses filled blocks (█) for completed progress and light shade (░) for the
/// rest. Progress is capped at 100% since handlers can overshoot the expected
/// count between polls; a zero total renders as complete.
///
/// ```rust
/// # use mq_consumer_bench::utils::create_progress_indicator;
/// assert_eq!(create_progress_indicator(0, 100, 10), "░░░░░░░░░░");
/// assert_eq!(create_progress_indicator(50, 100, 10), "█████░░░░░");
/// assert_eq!(create_progress_indicator(150, 100, 10), "██████████");
/// ```
pub fn create_progress_indicator(current: u64, total: u64, width: usize) -> String {
    if total == 0 {
        return "█".repeat(width);
    }

    let progress = (current as f64 / total as f64).min(1.0);
    let filled = ((progress * width as f64) as usize).min(width);
    let empty = width - filled;

    format!("{}{}", "█".repeat(filled), "░".repeat(empty))
}
