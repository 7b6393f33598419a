use crate::report::RunReport;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// System information for reproducibility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub rust_version: String,
    pub harness_version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            rust_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
            harness_version: crate::VERSION.to_string(),
        }
    }
}

/// Run metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub run_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub system_info: SystemInfo,
}

/// Final results document written to the output file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalRunResults {
    pub metadata: RunMetadata,
    pub report: RunReport,
}

/// Results manager for writing the JSON report
pub struct ResultsManager {
    output_file: PathBuf,
    run_id: String,
}

impl ResultsManager {
    /// Create a new results manager
    pub fn new(output_file: &Path, run_id: impl Into<String>) -> Self {
        Self {
            output_file: output_file.to_path_buf(),
            run_id: run_id.into(),
        }
    }

    pub fn output_file(&self) -> &Path {
        &self.output_file
    }

    /// Wrap `report` with metadata and write it as pretty JSON
    pub fn write(&self, report: &RunReport) -> Result<FinalRunResults> {
        let final_results = FinalRunResults {
            metadata: RunMetadata {
                version: crate::VERSION.to_string(),
                run_id: self.run_id.clone(),
                timestamp: chrono::Utc::now(),
                system_info: SystemInfo::default(),
            },
            report: report.clone(),
        };

        let json = serde_json::to_string_pretty(&final_results)
            .context("Failed to serialize run results")?;
        std::fs::write(&self.output_file, json).with_context(|| {
            format!(
                "Failed to write results to {}",
                self.output_file.display()
            )
        })?;

        info!("Results written to: {:?}", self.output_file);
        Ok(final_results)
    }
}
