//! JSON backtest report writer.

use crate::domain::backtest::BacktestReport;
use crate::domain::error::EventcastError;
use crate::ports::report_port::ReportPort;
use std::fs::File;
use std::io::{BufWriter, Write};
use tracing::info;

pub struct JsonReportAdapter {
    /// Drop per-grid-point records and keep only plan, metrics and counts.
    summary_only: bool,
}

impl JsonReportAdapter {
    pub fn new() -> Self {
        Self {
            summary_only: false,
        }
    }

    pub fn summary_only() -> Self {
        Self { summary_only: true }
    }
}

impl Default for JsonReportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportPort for JsonReportAdapter {
    fn write(&self, report: &BacktestReport, output_path: &str) -> Result<(), EventcastError> {
        let file = File::create(output_path)?;
        let mut writer = BufWriter::new(file);
        let result = if self.summary_only {
            let trimmed = BacktestReport {
                records: Vec::new(),
                ..report.clone()
            };
            serde_json::to_writer_pretty(&mut writer, &trimmed)
        } else {
            serde_json::to_writer_pretty(&mut writer, report)
        };
        result.map_err(|e| EventcastError::DataFormat {
            source_name: output_path.to_string(),
            reason: format!("failed to serialize report: {e}"),
        })?;
        writer.flush()?;
        info!(path = output_path, records = report.records.len(), "report written");
        Ok(())
    }
}
