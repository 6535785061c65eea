use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{BYTES_PER_GB, BYTES_PER_MB, DownloadJob};
use crate::ledger::Ledger;

#[derive(Debug, Clone, Serialize)]
pub struct StatusCount {
    pub status: String,
    pub count: usize,
}

/// Outcome of scanning the ledger: the jobs that still need work, in ledger
/// order, plus the rows that were skipped as already complete.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub work: Vec<DownloadJob>,
    pub complete: Vec<StatusCount>,
    pub anticipated_bytes: u64,
}

impl ScanReport {
    pub fn complete_total(&self) -> usize {
        self.complete.iter().map(|entry| entry.count).sum()
    }
}

pub fn scan(ledger: &Ledger) -> ScanReport {
    let mut report = ScanReport::default();
    for job in ledger.jobs() {
        if job.status.is_complete() {
            debug!(name = %job.name, status = %job.status, "already complete");
            bump(&mut report.complete, job.status.as_str());
            continue;
        }
        report.anticipated_bytes += job.size;
        report.work.push(job);
    }

    for job in &report.work {
        info!(
            name = %job.name,
            size_mb = job.size as f64 / BYTES_PER_MB,
            status = %job.status,
            "queued"
        );
    }
    info!(
        jobs = report.work.len(),
        complete = report.complete_total(),
        anticipated_gb = %format!("{:.2}", report.anticipated_bytes as f64 / BYTES_PER_GB),
        "work list ready"
    );
    report
}

pub(crate) fn bump(counts: &mut Vec<StatusCount>, status: &str) {
    match counts.iter_mut().find(|entry| entry.status == status) {
        Some(entry) => entry.count += 1,
        None => counts.push(StatusCount {
            status: status.to_string(),
            count: 1,
        }),
    }
}
