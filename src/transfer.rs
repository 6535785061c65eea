use std::fs;
use std::io;

use camino::Utf8PathBuf;
use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::config::RunConfig;
use crate::domain::{DownloadJob, JobStatus, columns, format_timestamp};
use crate::error::FetchError;
use crate::ledger::Ledger;
use crate::process::{CommandSpec, ProcessRunner};

pub const MAX_ATTEMPTS: u32 = 5;

/// Where the transfer client is pointed and where its output should appear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    /// Directory handed to the client with `-p`.
    pub destination: Utf8PathBuf,
    /// File that must exist after a successful run.
    pub artifact: Utf8PathBuf,
    /// The client's `{uuid}.gto` descriptor, left beside the payload directory.
    pub descriptor: Utf8PathBuf,
}

impl TransferPlan {
    pub fn for_job(config: &RunConfig, job: &DownloadJob) -> Self {
        let destination = if config.is_cached() {
            config.scratch_dir.clone()
        } else {
            config
                .archive_root
                .join(job.archive_path().relative_platform_dir())
        };
        Self {
            artifact: destination.join(&job.uuid).join(&job.name),
            descriptor: destination.join(format!("{}.gto", job.uuid)),
            destination,
        }
    }
}

pub fn transfer_command(config: &RunConfig, plan: &TransferPlan, uuid: &str) -> CommandSpec {
    let mut command = CommandSpec::new(config.transfer_executable.clone()).arg("-t");
    if config.verbose {
        command = command.arg("-v");
    }
    command
        .arg("--max-children")
        .arg(config.workers.to_string())
        .arg("--rate-limit")
        .arg(config.max_bandwidth.to_string())
        .arg("-k")
        .arg(config.stall_timeout_minutes.to_string())
        .arg("-c")
        .arg(config.credential_file.to_string())
        .arg("-p")
        .arg(plan.destination.to_string())
        .arg("-d")
        .arg(uuid)
}

#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub attempts: u32,
    pub succeeded: bool,
    /// Start and end of the last attempt.
    pub started: DateTime<Local>,
    pub ended: DateTime<Local>,
}

impl TransferOutcome {
    pub fn elapsed_seconds(&self) -> i64 {
        (self.ended - self.started).num_seconds()
    }
}

/// Runs the transfer client until it succeeds or `MAX_ATTEMPTS` runs have
/// failed. Every status change is written to the ledger before the next step.
pub fn run_transfer<R: ProcessRunner>(
    config: &RunConfig,
    runner: &R,
    ledger: &mut Ledger,
    job: &mut DownloadJob,
    plan: &TransferPlan,
    sink: &dyn ProgressSink,
) -> Result<TransferOutcome, FetchError> {
    let command = transfer_command(config, plan, &job.uuid);
    let mut outcome = TransferOutcome {
        attempts: 0,
        succeeded: false,
        started: Local::now(),
        ended: Local::now(),
    };

    while outcome.attempts < MAX_ATTEMPTS {
        outcome.attempts += 1;
        ledger.update_field(&job.name, columns::ATTEMPT, &outcome.attempts.to_string())?;
        job.status = JobStatus::InProcess;
        ledger.update_field(&job.name, columns::STATUS, job.status.as_str())?;
        outcome.started = Local::now();
        job.start_time = Some(outcome.started.naive_local());
        ledger.update_field(
            &job.name,
            columns::START_TIME,
            &format_timestamp(&outcome.started),
        )?;
        info!(
            name = %job.name,
            attempt = outcome.attempts,
            max = MAX_ATTEMPTS,
            "starting transfer"
        );

        let code = match runner.stream(&command, &mut |line: &str| {
            sink.event(ProgressEvent {
                message: line.to_string(),
                elapsed: None,
            })
        }) {
            Ok(code) => code,
            Err(err) => {
                warn!(error = %err, "transfer client did not start");
                None
            }
        };

        outcome.ended = Local::now();
        job.end_time = Some(outcome.ended.naive_local());
        ledger.update_field(&job.name, columns::END_TIME, &format_timestamp(&outcome.ended))?;

        let artifact_present = plan.artifact.as_std_path().is_file();
        if code == Some(0) && artifact_present {
            let size = fs::metadata(plan.artifact.as_std_path())
                .map_err(|err| FetchError::Filesystem(format!("stat {}: {err}", plan.artifact)))?
                .len();
            job.size = size;
            ledger.update_field(&job.name, columns::FILES_SIZE, &size.to_string())?;
            job.status = if config.is_cached() {
                JobStatus::Cached
            } else {
                JobStatus::Finished
            };
            ledger.update_field(&job.name, columns::STATUS, job.status.as_str())?;
            info!(name = %job.name, bytes = size, status = %job.status, "transfer complete");
            outcome.succeeded = true;
            return Ok(outcome);
        }

        if code == Some(0) {
            warn!(artifact = %plan.artifact, "client exited cleanly but the file is missing");
        } else {
            warn!(code = ?code, attempt = outcome.attempts, max = MAX_ATTEMPTS, "transfer failed");
        }
        job.status = JobStatus::Failed;
        ledger.update_field(&job.name, columns::STATUS, job.status.as_str())?;
    }

    Ok(outcome)
}

/// Deletes the client's descriptor unless the job failed or was suppressed.
pub fn remove_descriptor(plan: &TransferPlan, status: &JobStatus) {
    if matches!(status, JobStatus::Failed | JobStatus::Suppressed) {
        return;
    }
    match fs::remove_file(plan.descriptor.as_std_path()) {
        Ok(()) => debug!(path = %plan.descriptor, "removed descriptor"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %plan.descriptor, error = %err, "could not remove descriptor"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigFile, ConfigLoader, Overrides};

    fn job() -> DownloadJob {
        DownloadJob {
            name: "sample.bam".to_string(),
            uuid: "uuid-1".to_string(),
            size: 0,
            checksum: String::new(),
            start_time: None,
            end_time: None,
            status: JobStatus::Unknown,
            disease: "GBM".to_string(),
            barcode: "TCGA-02-0001-01C-01D".to_string(),
            library: "WXS".to_string(),
            platform: "ILLUMINA".to_string(),
        }
    }

    fn config(cached: bool) -> RunConfig {
        let overrides = Overrides {
            archive_root: Some("/archive".into()),
            scratch_dir: Some("/scratch".into()),
            credential_file: Some("/keys/cghub.key".into()),
            cached,
            ..Overrides::default()
        };
        ConfigLoader::resolve_config(ConfigFile::default(), overrides)
    }

    #[test]
    fn direct_plan_targets_platform_directory() {
        let plan = TransferPlan::for_job(&config(false), &job());
        assert_eq!(
            plan.destination,
            Utf8PathBuf::from("/archive/gbm/TCGA-02-0001/TCGA-02-0001-01/WXS/CGHub_ILLUMINA")
        );
        assert!(plan.artifact.ends_with("CGHub_ILLUMINA/uuid-1/sample.bam"));
        assert!(plan.descriptor.ends_with("CGHub_ILLUMINA/uuid-1.gto"));
    }

    #[test]
    fn cached_plan_targets_scratch() {
        let plan = TransferPlan::for_job(&config(true), &job());
        assert_eq!(plan.destination, Utf8PathBuf::from("/scratch"));
        assert_eq!(plan.artifact, Utf8PathBuf::from("/scratch/uuid-1/sample.bam"));
        assert_eq!(plan.descriptor, Utf8PathBuf::from("/scratch/uuid-1.gto"));
    }

    #[test]
    fn command_carries_client_parameters() {
        let config = config(true);
        let plan = TransferPlan::for_job(&config, &job());
        let command = transfer_command(&config, &plan, "uuid-1");
        assert_eq!(command.flag_value("--max-children"), Some("24"));
        assert_eq!(command.flag_value("--rate-limit"), Some("10000"));
        assert_eq!(command.flag_value("-k"), Some("10"));
        assert_eq!(command.flag_value("-c"), Some("/keys/cghub.key"));
        assert_eq!(command.flag_value("-p"), Some("/scratch"));
        assert_eq!(command.flag_value("-d"), Some("uuid-1"));
    }
}
