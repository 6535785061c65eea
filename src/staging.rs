use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::domain::{DownloadJob, JobStatus, columns, rate_mb_per_sec};
use crate::error::FetchError;
use crate::ledger::Ledger;
use crate::process::{CommandSpec, ProcessRunner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Promoted,
    Mismatch {
        expected: String,
        computed: Option<String>,
    },
}

/// Final location of the job's file under the archive root.
pub fn final_location(config: &RunConfig, job: &DownloadJob) -> Utf8PathBuf {
    config.archive_root.join(job.archive_path().relative())
}

/// Copies `{scratch}/{uuid}` into the archive's platform directory and marks
/// the job `Staged`. A failed copy leaves the job `Cached` so a later run
/// retries staging. Returns whether the job was staged.
pub fn stage<R: ProcessRunner>(
    config: &RunConfig,
    runner: &R,
    ledger: &mut Ledger,
    job: &mut DownloadJob,
) -> Result<bool, FetchError> {
    let archive_path = job.archive_path();
    let parent = config.archive_root.join(archive_path.relative_platform_dir());
    let source = config.scratch_dir.join(&job.uuid);

    if let Err(err) = fs::create_dir_all(parent.as_std_path()) {
        warn!(path = %parent, error = %err, "could not create archive directory");
        return Ok(false);
    }

    let flags = if config.verbose { "-rtv" } else { "-rt" };
    let command = CommandSpec::new(config.copy_executable.clone())
        .arg(flags)
        .arg(source.to_string())
        .arg(parent.to_string());
    info!(from = %source, to = %parent, "staging");
    let copied = match runner.output(&command) {
        Ok(output) if output.success() => true,
        Ok(output) => {
            warn!(command = %command.display(), code = ?output.code, "copy failed");
            false
        }
        Err(err) => {
            warn!(command = %command.display(), error = %err, "copy failed");
            false
        }
    };
    if !copied {
        return Ok(false);
    }

    job.status = JobStatus::Staged;
    ledger.update_field(&job.name, columns::STATUS, job.status.as_str())?;
    ledger.update_field(
        &job.name,
        columns::ARCHIVE_PATH,
        archive_path.relative_dir().as_str(),
    )?;
    Ok(true)
}

/// Checksums the archived file and promotes the job to `Finished` on a match.
/// On a mismatch the job is marked `Failed`, its end time cleared, and the
/// scratch copy kept for inspection.
pub fn verify<R: ProcessRunner>(
    config: &RunConfig,
    runner: &R,
    ledger: &mut Ledger,
    job: &mut DownloadJob,
    pipeline_started: DateTime<Local>,
) -> Result<Verification, FetchError> {
    let location = final_location(config, job);
    let computed = compute_checksum(config, runner, &location);

    let matches = computed.as_deref().is_some_and(|digest| {
        !job.checksum.is_empty() && digest.eq_ignore_ascii_case(&job.checksum)
    });
    if !matches {
        warn!(
            name = %job.name,
            reference = %job.checksum,
            calculated = computed.as_deref().unwrap_or("-"),
            "checksum does not match"
        );
        job.status = JobStatus::Failed;
        ledger.update_field(&job.name, columns::STATUS, job.status.as_str())?;
        job.end_time = None;
        ledger.update_field(&job.name, columns::END_TIME, "")?;
        return Ok(Verification::Mismatch {
            expected: job.checksum.clone(),
            computed,
        });
    }

    job.status = JobStatus::Finished;
    ledger.update_field(&job.name, columns::STATUS, job.status.as_str())?;
    let seconds = (Local::now() - pipeline_started).num_seconds();
    let rate = rate_mb_per_sec(job.size, seconds);
    ledger.update_field(&job.name, columns::OVERALL_RATE, &format!("{rate:.2}"))?;
    info!(name = %job.name, rate_mb_s = %format!("{rate:.2}"), "checksum passed");

    remove_scratch(&config.scratch_dir, &job.uuid);
    Ok(Verification::Promoted)
}

fn compute_checksum<R: ProcessRunner>(
    config: &RunConfig,
    runner: &R,
    location: &Utf8Path,
) -> Option<String> {
    let command = CommandSpec::new(config.checksum_executable.clone()).arg(location.to_string());
    match runner.output(&command) {
        Ok(output) if output.success() => {
            output.stdout.split_whitespace().next().map(str::to_string)
        }
        Ok(output) => {
            warn!(command = %command.display(), code = ?output.code, "checksum tool failed");
            None
        }
        Err(err) => {
            warn!(command = %command.display(), error = %err, "checksum tool failed");
            None
        }
    }
}

/// Removes the scratch payload directory `{uuid}` and any `{uuid}.*` files
/// the client left beside it.
pub fn remove_scratch(scratch_dir: &Utf8Path, uuid: &str) {
    if uuid.is_empty() {
        return;
    }
    let entries = match fs::read_dir(scratch_dir.as_std_path()) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %scratch_dir, error = %err, "could not list scratch directory");
            return;
        }
    };
    let prefix = format!("{uuid}.");
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name != uuid && !name.starts_with(&prefix) {
            continue;
        }
        let path = entry.path();
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => debug!(path = %path.display(), "removed scratch entry"),
            Err(err) => warn!(path = %path.display(), error = %err, "could not remove scratch entry"),
        }
    }
}
