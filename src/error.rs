use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    #[error("required tool not found: {0}")]
    MissingTool(Utf8PathBuf),

    #[error("requests file not found: {0}")]
    LedgerMissing(Utf8PathBuf),

    #[error("no permission to write to {0}")]
    NotWritable(Utf8PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("requests file {path} is missing required column `{column}`")]
    MissingColumn { path: Utf8PathBuf, column: String },

    #[error("requests file {path} lists `{name}` more than once")]
    DuplicateRow { path: Utf8PathBuf, name: String },

    #[error("requests file {0} has no header row")]
    EmptyLedger(Utf8PathBuf),

    #[error("no row named `{0}` in requests file")]
    UnknownRow(String),

    #[error("no column named `{0}` in requests file")]
    UnknownColumn(String),

    #[error("ledger update failed: {0}")]
    #[diagnostic(help("the requests file is the only record of download state; check disk space and permissions"))]
    LedgerWrite(String),

    #[error("catalog query failed: {0}")]
    CatalogQuery(String),

    #[error("failed to launch {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl FetchError {
    /// Errors raised while checking the environment, before any job runs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FetchError::MissingTool(_)
                | FetchError::LedgerMissing(_)
                | FetchError::NotWritable(_)
                | FetchError::ConfigRead(_)
                | FetchError::ConfigParse(_)
                | FetchError::MissingColumn { .. }
                | FetchError::DuplicateRow { .. }
                | FetchError::EmptyLedger(_)
        )
    }
}
