use std::fs;
use std::time::{Duration, Instant};

use chrono::Local;
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{CatalogClient, check_availability};
use crate::config::RunConfig;
use crate::domain::{DownloadJob, JobStatus, columns, rate_mb_per_sec};
use crate::error::FetchError;
use crate::ledger::Ledger;
use crate::process::ProcessRunner;
use crate::reaper::reap_empty_dirs;
use crate::scanner::scan;
use crate::staging::{Verification, stage, verify};
use crate::summary::RunSummary;
use crate::transfer::{TransferPlan, remove_descriptor, run_transfer};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

/// Operator console for transfer client output and phase messages.
pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// What happened to one job during this run.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub name: String,
    pub status: String,
    pub attempts: u32,
    pub transferred_bytes: u64,
    pub checksum_mismatch: bool,
}

pub struct App<C: CatalogClient, R: ProcessRunner> {
    config: RunConfig,
    catalog: C,
    runner: R,
}

impl<C: CatalogClient, R: ProcessRunner> App<C, R> {
    pub fn new(config: RunConfig, catalog: C, runner: R) -> Self {
        Self {
            config,
            catalog,
            runner,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Processes every pending row of the ledger, one job at a time. Only
    /// ledger write failures stop the run; everything else is recorded per job.
    pub fn run(
        &self,
        ledger: &mut Ledger,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, FetchError> {
        let started = Instant::now();
        let report = scan(ledger);
        let mut summary = RunSummary {
            complete: report.complete.clone(),
            ..RunSummary::default()
        };

        let total = report.work.len();
        for (idx, mut job) in report.work.into_iter().enumerate() {
            sink.event(ProgressEvent {
                message: format!("phase=Job; {} ({} of {total})", job.name, idx + 1),
                elapsed: Some(started.elapsed()),
            });
            let job_report = self.process_job(ledger, &mut job, sink)?;
            summary.record(&job.status);
            summary.transferred_bytes += job_report.transferred_bytes;
            if job_report.checksum_mismatch {
                summary.checksum_mismatches += 1;
            }
        }

        summary.set_elapsed(started.elapsed());
        Ok(summary)
    }

    /// Availability check, transfer with retries, staging, verification and
    /// cleanup for a single job.
    pub fn process_job(
        &self,
        ledger: &mut Ledger,
        job: &mut DownloadJob,
        sink: &dyn ProgressSink,
    ) -> Result<JobReport, FetchError> {
        let pipeline_started = Local::now();
        let plan = TransferPlan::for_job(&self.config, job);
        let mut report = JobReport {
            name: job.name.clone(),
            status: job.status.to_string(),
            attempts: 0,
            transferred_bytes: 0,
            checksum_mismatch: false,
        };
        info!(name = %job.name, uuid = %job.uuid, status = %job.status, "processing");

        if job.status.is_transferred() {
            info!(name = %job.name, status = %job.status, "already downloaded");
            if job.status == JobStatus::Cached && !self.config.is_cached() {
                warn!(name = %job.name, "cached copy waits for a run in cached mode");
            }
        } else if check_availability(&self.catalog, ledger, job)? {
            if !self.config.is_cached() {
                if let Err(err) = fs::create_dir_all(plan.destination.as_std_path()) {
                    warn!(path = %plan.destination, error = %err, "could not create target directory");
                }
            }
            let outcome = run_transfer(&self.config, &self.runner, ledger, job, &plan, sink)?;
            report.attempts = outcome.attempts;
            if outcome.succeeded {
                report.transferred_bytes = job.size;
                let rate = rate_mb_per_sec(job.size, outcome.elapsed_seconds());
                ledger.update_field(&job.name, columns::OVERALL_RATE, &format!("{rate:.2}"))?;
                if !self.config.is_cached() {
                    let relative_dir = job.archive_path().relative_dir().to_string();
                    ledger.update_field(&job.name, columns::ARCHIVE_PATH, &relative_dir)?;
                }
            }
        }
        remove_descriptor(&plan, &job.status);

        if self.config.is_cached() {
            if job.status == JobStatus::Cached {
                stage(&self.config, &self.runner, ledger, job)?;
            }
            if job.status == JobStatus::Staged {
                let verification =
                    verify(&self.config, &self.runner, ledger, job, pipeline_started)?;
                report.checksum_mismatch = matches!(verification, Verification::Mismatch { .. });
            }
        }

        if !matches!(job.status, JobStatus::Finished | JobStatus::Staged) {
            let removed = reap_empty_dirs(&self.config.archive_root);
            if !removed.is_empty() {
                info!(count = removed.len(), "pruned empty directories");
            }
        }

        report.status = job.status.to_string();
        info!(name = %job.name, status = %job.status, "done");
        Ok(report)
    }
}
