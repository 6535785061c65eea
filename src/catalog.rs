use std::sync::OnceLock;

use camino::Utf8PathBuf;
use regex::Regex;
use tracing::{info, warn};

use crate::domain::{DownloadJob, JobStatus, columns};
use crate::error::FetchError;
use crate::ledger::Ledger;
use crate::process::{CommandSpec, ProcessRunner};

/// Line the catalog prints when every object matching the query can be fetched.
pub const DOWNLOADABLE_MARKER: &str = "All matching objects are in a downloadable state.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Live,
    /// Not downloadable right now; carries the catalog's state token.
    Unavailable(String),
}

pub trait CatalogClient {
    fn availability(&self, uuid: &str) -> Result<Availability, FetchError>;
}

/// Catalog client backed by the `cgquery` command line tool.
pub struct CgQueryClient<R: ProcessRunner> {
    executable: Utf8PathBuf,
    runner: R,
}

impl<R: ProcessRunner> CgQueryClient<R> {
    pub fn new(executable: Utf8PathBuf, runner: R) -> Self {
        Self { executable, runner }
    }

    pub fn command(&self, uuid: &str) -> CommandSpec {
        CommandSpec::new(self.executable.clone())
            .arg(format!("analysis_id={uuid}"))
            .arg("-a")
    }
}

impl<R: ProcessRunner> CatalogClient for CgQueryClient<R> {
    fn availability(&self, uuid: &str) -> Result<Availability, FetchError> {
        let command = self.command(uuid);
        let output = self.runner.output(&command)?;
        if !output.success() {
            let stderr = output.stderr.trim();
            let message = if stderr.is_empty() {
                format!("command failed: {}", command.display())
            } else {
                stderr.to_string()
            };
            return Err(FetchError::CatalogQuery(message));
        }
        Ok(parse_report(&output.stdout))
    }
}

/// Reads a catalog report. Without the success marker the state is the first
/// token after the `state_count` heading.
pub fn parse_report(report: &str) -> Availability {
    if report.contains(DOWNLOADABLE_MARKER) {
        return Availability::Live;
    }
    static STATE: OnceLock<Regex> = OnceLock::new();
    let pattern = STATE.get_or_init(|| {
        Regex::new(r"state_count\S*\s+(\S+)").expect("state_count pattern is valid")
    });
    let token = pattern
        .captures(report)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| JobStatus::Unknown.to_string());
    Availability::Unavailable(token)
}

/// Asks the catalog whether `job` can be fetched and records the answer.
/// Returns `true` when a transfer should be attempted.
pub fn check_availability<C: CatalogClient>(
    catalog: &C,
    ledger: &mut Ledger,
    job: &mut DownloadJob,
) -> Result<bool, FetchError> {
    match catalog.availability(&job.uuid) {
        Ok(Availability::Live) => {
            info!(uuid = %job.uuid, "downloadable");
            ledger.update_field(&job.name, columns::STATE, JobStatus::Live.as_str())?;
            Ok(true)
        }
        Ok(Availability::Unavailable(token)) => {
            info!(uuid = %job.uuid, state = %token, "not in a downloadable state, skipping");
            job.status = token.parse().unwrap_or(JobStatus::Unknown);
            ledger.update_field(&job.name, columns::STATUS, &token)?;
            ledger.update_field(&job.name, columns::STATE, &token)?;
            Ok(false)
        }
        Err(err) => {
            warn!(uuid = %job.uuid, error = %err, "availability unknown, not transferring");
            Ok(false)
        }
    }
}
