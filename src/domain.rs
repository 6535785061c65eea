use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;

/// Ledger timestamp layout, e.g. `08/22/14 03:15 PM`.
pub const TIME_FORMAT: &str = "%m/%d/%y %I:%M %p";

pub const BYTES_PER_MB: f64 = 1_048_576.0;
pub const BYTES_PER_GB: f64 = 1_073_741_824.0;

/// Column names the pipeline reads or writes. Any other column is carried
/// through untouched.
pub mod columns {
    pub const FILENAME: &str = "filename";
    pub const ANALYSIS_ID: &str = "analysis_id";
    pub const FILES_SIZE: &str = "files_size";
    pub const CHECKSUM: &str = "checksum";
    pub const START_TIME: &str = "start_time";
    pub const END_TIME: &str = "end_time";
    pub const STATUS: &str = "status";
    pub const DISEASE: &str = "disease";
    pub const BARCODE: &str = "barcode";
    pub const LIBRARY_TYPE: &str = "library_type";
    pub const PLATFORM_NAME: &str = "platform_name";
    pub const ATTEMPT: &str = "download_attempt_num";
    pub const STATE: &str = "state";
    pub const OVERALL_RATE: &str = "overall_rate_(MB/s)";
    pub const ARCHIVE_PATH: &str = "pgrr_file_path";

    pub const REQUIRED: [&str; 15] = [
        FILENAME,
        ANALYSIS_ID,
        FILES_SIZE,
        CHECKSUM,
        START_TIME,
        END_TIME,
        STATUS,
        DISEASE,
        BARCODE,
        LIBRARY_TYPE,
        PLATFORM_NAME,
        ATTEMPT,
        STATE,
        OVERALL_RATE,
        ARCHIVE_PATH,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum JobStatus {
    Unknown,
    Live,
    InProcess,
    Cached,
    Staged,
    Finished,
    Failed,
    Suppressed,
    /// Any other state token reported by the catalog, kept verbatim.
    Remote(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Unknown => "Unknown",
            JobStatus::Live => "Live",
            JobStatus::InProcess => "InProcess",
            JobStatus::Cached => "Cached",
            JobStatus::Staged => "Staged",
            JobStatus::Finished => "Finished",
            JobStatus::Failed => "Failed",
            JobStatus::Suppressed => "suppressed",
            JobStatus::Remote(token) => token,
        }
    }

    /// Already present in the archive; never scheduled again.
    pub fn is_complete(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Live)
    }

    /// The payload already left the transfer client, so no new transfer is needed.
    pub fn is_transferred(&self) -> bool {
        matches!(
            self,
            JobStatus::Cached | JobStatus::Staged | JobStatus::Finished | JobStatus::Live
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value.trim() {
            "" | "Unknown" => JobStatus::Unknown,
            "Live" => JobStatus::Live,
            "InProcess" => JobStatus::InProcess,
            "Cached" => JobStatus::Cached,
            "Staged" => JobStatus::Staged,
            "Finished" => JobStatus::Finished,
            "Failed" => JobStatus::Failed,
            "suppressed" => JobStatus::Suppressed,
            other => JobStatus::Remote(other.to_string()),
        })
    }
}

impl From<JobStatus> for String {
    fn from(value: JobStatus) -> Self {
        value.as_str().to_string()
    }
}

/// Working copy of one ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadJob {
    pub name: String,
    pub uuid: String,
    pub size: u64,
    pub checksum: String,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub status: JobStatus,
    pub disease: String,
    pub barcode: String,
    pub library: String,
    pub platform: String,
}

impl DownloadJob {
    pub fn archive_path(&self) -> ArchivePath {
        ArchivePath::derive(
            &self.disease,
            &self.barcode,
            &self.library,
            &self.platform,
            &self.uuid,
            &self.name,
        )
    }
}

/// Relative location of a file inside the archival root:
/// `{disease}/{participant}/{sample}/{library}/CGHub_{platform}/{uuid}/{name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePath {
    relative: Utf8PathBuf,
}

impl ArchivePath {
    /// Builds the archival path from the row metadata.
    ///
    /// - `disease` is lowercased.
    /// - `participant` is the first three `-` separated fields of the barcode
    ///   (`TCGA-02-0001-01C-01D` becomes `TCGA-02-0001`).
    /// - `sample` is the first four fields with the final character dropped,
    ///   which strips the vial letter (`TCGA-02-0001-01`). Barcodes with fewer
    ///   fields use whatever fields exist; an empty result stays empty.
    pub fn derive(
        disease: &str,
        barcode: &str,
        library: &str,
        platform: &str,
        uuid: &str,
        name: &str,
    ) -> Self {
        let fields: Vec<&str> = barcode.split('-').collect();
        let participant = fields[..fields.len().min(3)].join("-");
        let mut sample = fields[..fields.len().min(4)].join("-");
        sample.pop();

        let mut relative = Utf8PathBuf::from(disease.to_lowercase());
        relative.push(participant);
        relative.push(sample);
        relative.push(library);
        relative.push(format!("CGHub_{platform}"));
        relative.push(uuid);
        relative.push(name);
        Self { relative }
    }

    pub fn relative(&self) -> &Utf8Path {
        &self.relative
    }

    /// Directory holding the file, relative to the archive root. This is what
    /// gets recorded in the ledger once the file lands.
    pub fn relative_dir(&self) -> &Utf8Path {
        self.relative.parent().unwrap_or(Utf8Path::new(""))
    }

    /// Platform directory: the parent of the per-uuid directory. The transfer
    /// client and the directory copy both write `{uuid}/{name}` beneath it.
    pub fn relative_platform_dir(&self) -> &Utf8Path {
        self.relative_dir().parent().unwrap_or(Utf8Path::new(""))
    }
}

pub fn format_timestamp(value: &DateTime<Local>) -> String {
    value.format(TIME_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(trimmed, TIME_FORMAT).ok()
}

/// Parses `files_size`, which upstream tools sometimes write as a float.
pub fn parse_size(value: &str) -> u64 {
    let trimmed = value.trim();
    trimmed
        .parse::<u64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().map(|v| v.max(0.0) as u64))
        .unwrap_or(0)
}

/// MB/s over `seconds`; zero when no time elapsed.
pub fn rate_mb_per_sec(bytes: u64, seconds: i64) -> f64 {
    if seconds <= 0 {
        return 0.0;
    }
    (bytes as f64 / BYTES_PER_MB) / seconds as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_vocabulary() {
        for token in [
            "Unknown",
            "Live",
            "InProcess",
            "Cached",
            "Staged",
            "Finished",
            "Failed",
            "suppressed",
        ] {
            let status: JobStatus = token.parse().unwrap();
            assert_eq!(status.as_str(), token);
        }
    }

    #[test]
    fn empty_status_is_unknown() {
        assert_eq!("".parse::<JobStatus>().unwrap(), JobStatus::Unknown);
        assert_eq!("  ".parse::<JobStatus>().unwrap(), JobStatus::Unknown);
    }

    #[test]
    fn catalog_tokens_are_kept() {
        let status: JobStatus = "redacted".parse().unwrap();
        assert_eq!(status, JobStatus::Remote("redacted".to_string()));
        assert_eq!(status.to_string(), "redacted");
    }

    #[test]
    fn timestamp_format_matches_ledger() {
        let parsed = parse_timestamp("08/22/14 03:15 PM").unwrap();
        assert_eq!(parsed.format(TIME_FORMAT).to_string(), "08/22/14 03:15 PM");
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn size_accepts_float_notation() {
        assert_eq!(parse_size("1024"), 1024);
        assert_eq!(parse_size("1.5e3"), 1500);
        assert_eq!(parse_size(""), 0);
    }
}
