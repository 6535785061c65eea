use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::domain::{BYTES_PER_GB, JobStatus};
use crate::scanner::{StatusCount, bump};

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Final status of every processed job, in first-seen order.
    pub statuses: Vec<StatusCount>,
    /// Rows skipped by the scanner because they were already complete.
    pub complete: Vec<StatusCount>,
    pub processed: usize,
    pub transferred_bytes: u64,
    pub checksum_mismatches: usize,
    pub elapsed_secs: u64,
}

impl RunSummary {
    pub fn record(&mut self, status: &JobStatus) {
        self.processed += 1;
        bump(&mut self.statuses, status.as_str());
    }

    pub fn count(&self, status: &JobStatus) -> usize {
        self.statuses
            .iter()
            .find(|entry| entry.status == status.as_str())
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    pub fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed_secs = elapsed.as_secs();
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "    DOWNLOAD SUMMARY    ")?;
        writeln!(f, "BAM status         Count")?;
        writeln!(f, "------------------------")?;
        for entry in &self.statuses {
            writeln!(f, "{:<15}  {:>7}", entry.status, entry.count)?;
        }
        writeln!(f, "------------------------")?;
        writeln!(
            f,
            "{:.2} GB total",
            self.transferred_bytes as f64 / BYTES_PER_GB
        )?;
        if self.checksum_mismatches > 0 {
            writeln!(f, "{} checksum mismatch(es)", self.checksum_mismatches)?;
        }
        let secs = self.elapsed_secs;
        write!(
            f,
            "Total walltime = {} days {:2} hours {:2} minutes {:2} seconds",
            secs / 86_400,
            (secs % 86_400) / 3_600,
            (secs % 3_600) / 60,
            secs % 60
        )
    }
}
