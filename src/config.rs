use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::process::find_in_path;

pub const DEFAULT_TRANSFER_EXECUTABLE: &str = "/usr/bin/gtdownload";
pub const DEFAULT_QUERY_EXECUTABLE: &str = "/usr/bin/cgquery";
pub const DEFAULT_COPY_EXECUTABLE: &str = "rsync";
pub const DEFAULT_CHECKSUM_EXECUTABLE: &str = "md5sum";
pub const DEFAULT_STALL_MINUTES: u32 = 10;
pub const DEFAULT_WORKERS: u32 = 24;
pub const DEFAULT_MAX_BANDWIDTH: u32 = 10_000;
pub const DEFAULT_SCRATCH_DIR: &str = "/tmp";
pub const DEFAULT_REQUEST_DIR: &str = ".";
pub const DEFAULT_REQUEST_FILE: &str = "bam_status.tsv";
pub const DEFAULT_ARCHIVE_ROOT: &str = "/supercell/tcga";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// The transfer client writes straight into the archive.
    Direct,
    /// The transfer client writes to scratch; files are staged and verified.
    Cached,
}

/// On-disk JSON config. Every field is optional and overrides the default.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub transfer_executable: Option<Utf8PathBuf>,
    #[serde(default)]
    pub query_executable: Option<Utf8PathBuf>,
    #[serde(default)]
    pub copy_executable: Option<Utf8PathBuf>,
    #[serde(default)]
    pub checksum_executable: Option<Utf8PathBuf>,
    #[serde(default)]
    pub credential_file: Option<Utf8PathBuf>,
    #[serde(default)]
    pub stall_timeout_minutes: Option<u32>,
    #[serde(default)]
    pub workers: Option<u32>,
    #[serde(default)]
    pub max_bandwidth: Option<u32>,
    #[serde(default)]
    pub request_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub request_file: Option<String>,
    #[serde(default)]
    pub scratch_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub archive_root: Option<Utf8PathBuf>,
    #[serde(default)]
    pub mode: Option<TransferMode>,
    #[serde(default)]
    pub verbose: Option<bool>,
}

/// Command-line values; `None` leaves the file or default value in place.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub transfer_executable: Option<Utf8PathBuf>,
    pub query_executable: Option<Utf8PathBuf>,
    pub credential_file: Option<Utf8PathBuf>,
    pub stall_timeout_minutes: Option<u32>,
    pub workers: Option<u32>,
    pub max_bandwidth: Option<u32>,
    pub request_dir: Option<Utf8PathBuf>,
    pub request_file: Option<String>,
    pub scratch_dir: Option<Utf8PathBuf>,
    pub archive_root: Option<Utf8PathBuf>,
    pub cached: bool,
    pub verbose: bool,
}

/// Settings for one run. Built once at startup and shared read-only.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub transfer_executable: Utf8PathBuf,
    pub query_executable: Utf8PathBuf,
    pub copy_executable: Utf8PathBuf,
    pub checksum_executable: Utf8PathBuf,
    pub credential_file: Utf8PathBuf,
    pub stall_timeout_minutes: u32,
    pub workers: u32,
    pub max_bandwidth: u32,
    pub ledger_path: Utf8PathBuf,
    pub scratch_dir: Utf8PathBuf,
    pub archive_root: Utf8PathBuf,
    pub mode: TransferMode,
    pub verbose: bool,
}

impl RunConfig {
    pub fn is_cached(&self) -> bool {
        self.mode == TransferMode::Cached
    }

    /// Checks tools and paths before any job runs. Every failure here is a
    /// configuration error.
    pub fn validate(&self) -> Result<(), FetchError> {
        for tool in [&self.transfer_executable, &self.query_executable] {
            if !tool.as_std_path().is_file() {
                return Err(FetchError::MissingTool(tool.clone()));
            }
        }
        if self.is_cached() {
            for tool in [&self.copy_executable, &self.checksum_executable] {
                if find_in_path(tool).is_none() {
                    return Err(FetchError::MissingTool(tool.clone()));
                }
            }
        }

        if !self.ledger_path.as_std_path().is_file() {
            return Err(FetchError::LedgerMissing(self.ledger_path.clone()));
        }
        fs::OpenOptions::new()
            .append(true)
            .open(self.ledger_path.as_std_path())
            .map_err(|_| FetchError::NotWritable(self.ledger_path.clone()))?;
        if let Some(dir) = self.ledger_path.parent().filter(|d| !d.as_str().is_empty()) {
            ensure_writable_dir(dir)?;
        }

        if self.is_cached() {
            ensure_writable_dir(&self.scratch_dir)?;
        }
        ensure_writable_dir(&self.archive_root)
    }
}

fn ensure_writable_dir(dir: &Utf8Path) -> Result<(), FetchError> {
    tempfile::Builder::new()
        .prefix(".bamfetch-probe")
        .tempfile_in(dir.as_std_path())
        .map(drop)
        .map_err(|_| FetchError::NotWritable(dir.to_path_buf()))
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&Utf8Path>, overrides: Overrides) -> Result<RunConfig, FetchError> {
        let file = match path {
            Some(path) => {
                let content = fs::read_to_string(path.as_std_path())
                    .map_err(|_| FetchError::ConfigRead(path.to_path_buf()))?;
                serde_json::from_str(&content)
                    .map_err(|err| FetchError::ConfigParse(err.to_string()))?
            }
            None => ConfigFile::default(),
        };
        Ok(Self::resolve_config(file, overrides))
    }

    pub fn resolve_config(file: ConfigFile, overrides: Overrides) -> RunConfig {
        let request_dir = overrides
            .request_dir
            .or(file.request_dir)
            .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_REQUEST_DIR));
        let request_file = overrides
            .request_file
            .or(file.request_file)
            .unwrap_or_else(|| DEFAULT_REQUEST_FILE.to_string());
        let mode = if overrides.cached {
            TransferMode::Cached
        } else {
            file.mode.unwrap_or(TransferMode::Direct)
        };

        RunConfig {
            transfer_executable: overrides
                .transfer_executable
                .or(file.transfer_executable)
                .unwrap_or_else(|| DEFAULT_TRANSFER_EXECUTABLE.into()),
            query_executable: overrides
                .query_executable
                .or(file.query_executable)
                .unwrap_or_else(|| DEFAULT_QUERY_EXECUTABLE.into()),
            copy_executable: file
                .copy_executable
                .unwrap_or_else(|| DEFAULT_COPY_EXECUTABLE.into()),
            checksum_executable: file
                .checksum_executable
                .unwrap_or_else(|| DEFAULT_CHECKSUM_EXECUTABLE.into()),
            credential_file: overrides
                .credential_file
                .or(file.credential_file)
                .unwrap_or_default(),
            stall_timeout_minutes: overrides
                .stall_timeout_minutes
                .or(file.stall_timeout_minutes)
                .unwrap_or(DEFAULT_STALL_MINUTES),
            workers: overrides
                .workers
                .or(file.workers)
                .unwrap_or(DEFAULT_WORKERS),
            max_bandwidth: overrides
                .max_bandwidth
                .or(file.max_bandwidth)
                .unwrap_or(DEFAULT_MAX_BANDWIDTH),
            ledger_path: request_dir.join(request_file),
            scratch_dir: overrides
                .scratch_dir
                .or(file.scratch_dir)
                .unwrap_or_else(|| DEFAULT_SCRATCH_DIR.into()),
            archive_root: overrides
                .archive_root
                .or(file.archive_root)
                .unwrap_or_else(|| DEFAULT_ARCHIVE_ROOT.into()),
            mode,
            verbose: overrides.verbose || file.verbose.unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_file_or_flags() {
        let config = ConfigLoader::resolve_config(ConfigFile::default(), Overrides::default());
        assert_eq!(config.mode, TransferMode::Direct);
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.stall_timeout_minutes, DEFAULT_STALL_MINUTES);
        assert_eq!(config.ledger_path, Utf8PathBuf::from("./bam_status.tsv"));
    }

    #[test]
    fn flags_override_file_values() {
        let file: ConfigFile =
            serde_json::from_str(r#"{"workers": 6, "mode": "cached", "request_file": "a.tsv"}"#)
                .unwrap();
        let overrides = Overrides {
            workers: Some(12),
            ..Overrides::default()
        };
        let config = ConfigLoader::resolve_config(file, overrides);
        assert_eq!(config.workers, 12);
        assert_eq!(config.mode, TransferMode::Cached);
        assert!(config.ledger_path.ends_with("a.tsv"));
    }

    struct Workspace {
        _temp: tempfile::TempDir,
        root: Utf8PathBuf,
        config: RunConfig,
    }

    fn workspace(cached: bool) -> Workspace {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        for dir in ["bin", "scratch", "archive"] {
            fs::create_dir_all(root.join(dir).as_std_path()).unwrap();
        }
        for tool in ["gtdownload", "cgquery", "rsync", "md5sum"] {
            fs::write(root.join("bin").join(tool).as_std_path(), b"").unwrap();
        }
        fs::write(root.join("bam_status.tsv").as_std_path(), b"filename\n").unwrap();
        let file = ConfigFile {
            copy_executable: Some(root.join("bin/rsync")),
            checksum_executable: Some(root.join("bin/md5sum")),
            ..ConfigFile::default()
        };
        let overrides = Overrides {
            transfer_executable: Some(root.join("bin/gtdownload")),
            query_executable: Some(root.join("bin/cgquery")),
            request_dir: Some(root.clone()),
            scratch_dir: Some(root.join("scratch")),
            archive_root: Some(root.join("archive")),
            cached,
            ..Overrides::default()
        };
        let config = ConfigLoader::resolve_config(file, overrides);
        Workspace {
            _temp: temp,
            root,
            config,
        }
    }

    #[test]
    fn complete_environment_validates() {
        assert!(workspace(false).config.validate().is_ok());
        assert!(workspace(true).config.validate().is_ok());
    }

    #[test]
    fn missing_transfer_executable_is_rejected() {
        let mut ws = workspace(false);
        ws.config.transfer_executable = ws.root.join("bin/absent");
        let err = ws.config.validate().unwrap_err();
        assert!(matches!(&err, FetchError::MissingTool(tool) if tool.ends_with("absent")));
        assert!(err.is_configuration());
    }

    #[test]
    fn cached_mode_requires_copy_and_checksum_tools() {
        let mut ws = workspace(true);
        ws.config.copy_executable = ws.root.join("bin/no-rsync");
        let err = ws.config.validate().unwrap_err();
        assert!(matches!(&err, FetchError::MissingTool(tool) if tool.ends_with("no-rsync")));
        assert!(err.is_configuration());

        let mut ws = workspace(true);
        ws.config.checksum_executable = ws.root.join("bin/no-md5sum");
        let err = ws.config.validate().unwrap_err();
        assert!(matches!(&err, FetchError::MissingTool(tool) if tool.ends_with("no-md5sum")));
        assert!(err.is_configuration());

        // Direct mode never uses them.
        let mut ws = workspace(false);
        ws.config.copy_executable = ws.root.join("bin/no-rsync");
        assert!(ws.config.validate().is_ok());
    }

    #[test]
    fn read_only_ledger_is_rejected() {
        let ws = workspace(false);
        let ledger = ws.config.ledger_path.as_std_path();
        let mut permissions = fs::metadata(ledger).unwrap().permissions();
        permissions.set_readonly(true);
        fs::set_permissions(ledger, permissions).unwrap();
        // Privileged users can append regardless of the mode bits.
        if fs::OpenOptions::new().append(true).open(ledger).is_ok() {
            return;
        }
        let err = ws.config.validate().unwrap_err();
        assert!(matches!(&err, FetchError::NotWritable(path) if *path == ws.config.ledger_path));
        assert!(err.is_configuration());
    }

    #[test]
    fn unwritable_archive_root_is_rejected() {
        let mut ws = workspace(false);
        let blocked = ws.root.join("archive-is-a-file");
        fs::write(blocked.as_std_path(), b"").unwrap();
        ws.config.archive_root = blocked.clone();
        let err = ws.config.validate().unwrap_err();
        assert!(matches!(&err, FetchError::NotWritable(path) if *path == blocked));
        assert!(err.is_configuration());
    }

    #[test]
    fn missing_ledger_is_rejected() {
        let mut ws = workspace(false);
        ws.config.ledger_path = ws.root.join("absent.tsv");
        let err = ws.config.validate().unwrap_err();
        assert!(matches!(err, FetchError::LedgerMissing(_)));
        assert!(err.is_configuration());
    }
}
