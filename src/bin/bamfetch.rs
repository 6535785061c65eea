use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bamfetch::app::App;
use bamfetch::catalog::CgQueryClient;
use bamfetch::config::{ConfigLoader, Overrides, RunConfig};
use bamfetch::error::FetchError;
use bamfetch::ledger::Ledger;
use bamfetch::output::{ConsoleOutput, JsonOutput, OutputMode};
use bamfetch::process::SystemRunner;

const EXIT_CONFIGURATION: u8 = 10;
const EXIT_CHECKSUM_MISMATCH: u8 = 5;

#[derive(Parser)]
#[command(name = "bamfetch")]
#[command(
    about = "Download the files listed in a tab-delimited requests file, verify them, and record progress back into it"
)]
#[command(version, author)]
struct Cli {
    /// Requests file name, looked up in the request directory
    requests_file: Option<String>,

    /// JSON file with default settings
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Path to the transfer client executable
    #[arg(short = 'e')]
    transfer_executable: Option<Utf8PathBuf>,

    /// Path to the catalog query executable
    #[arg(short = 'q')]
    query_executable: Option<Utf8PathBuf>,

    /// Credential file for catalog access
    #[arg(short = 'C')]
    credential_file: Option<Utf8PathBuf>,

    /// Minutes of inactivity before the transfer client gives up
    #[arg(short = 'w')]
    wait_minutes: Option<u32>,

    /// Transfer client worker count
    #[arg(short = 'n')]
    workers: Option<u32>,

    /// Bandwidth cap in MB/s
    #[arg(short = 'b')]
    bandwidth: Option<u32>,

    /// Directory holding the requests file
    #[arg(short = 'd')]
    request_dir: Option<Utf8PathBuf>,

    /// Scratch directory for cached mode
    #[arg(short = 'l')]
    scratch_dir: Option<Utf8PathBuf>,

    /// Archive root for finished files
    #[arg(short = 't')]
    target_dir: Option<Utf8PathBuf>,

    /// Cache to the scratch directory first instead of downloading in place
    #[arg(short = 'D')]
    cached: bool,

    #[arg(short = 'v')]
    verbose: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Exit with status 5 when any checksum mismatched
    #[arg(long)]
    fail_on_mismatch: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<FetchError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &FetchError) -> u8 {
    if error.is_configuration() {
        EXIT_CONFIGURATION
    } else {
        1
    }
}

fn run() -> miette::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    let fail_on_mismatch = cli.fail_on_mismatch;
    let overrides = Overrides {
        transfer_executable: cli.transfer_executable.map(absolute),
        query_executable: cli.query_executable.map(absolute),
        credential_file: cli.credential_file.map(absolute),
        stall_timeout_minutes: cli.wait_minutes,
        workers: cli.workers,
        max_bandwidth: cli.bandwidth,
        request_dir: cli.request_dir.map(absolute),
        request_file: cli.requests_file,
        scratch_dir: cli.scratch_dir.map(absolute),
        archive_root: cli.target_dir.map(absolute),
        cached: cli.cached,
        verbose: cli.verbose,
    };

    let config = ConfigLoader::resolve(cli.config.as_deref(), overrides)?;
    log_parameters(&config);
    config.validate()?;

    let mut ledger = Ledger::open(&config.ledger_path)?;
    let catalog = CgQueryClient::new(config.query_executable.clone(), SystemRunner);
    let app = App::new(config, catalog, SystemRunner);

    let summary = match output_mode {
        OutputMode::Text => {
            let summary = app.run(&mut ledger, &ConsoleOutput)?;
            ConsoleOutput::print_summary(&summary).into_diagnostic()?;
            summary
        }
        OutputMode::Json => {
            let summary = app.run(&mut ledger, &JsonOutput)?;
            JsonOutput::print_summary(&summary).into_diagnostic()?;
            summary
        }
    };

    if fail_on_mismatch && summary.checksum_mismatches > 0 {
        return Ok(ExitCode::from(EXIT_CHECKSUM_MISMATCH));
    }
    Ok(ExitCode::SUCCESS)
}

fn absolute(path: Utf8PathBuf) -> Utf8PathBuf {
    std::path::absolute(path.as_std_path())
        .ok()
        .and_then(|abs| Utf8PathBuf::from_path_buf(abs).ok())
        .unwrap_or(path)
}

fn log_parameters(config: &RunConfig) {
    info!(
        transfer = %config.transfer_executable,
        query = %config.query_executable,
        credentials = %config.credential_file,
        requests = %config.ledger_path,
        target = %config.archive_root,
        workers = config.workers,
        bandwidth_mb_s = config.max_bandwidth,
        stall_minutes = config.stall_timeout_minutes,
        mode = ?config.mode,
        "download parameters"
    );
    if config.is_cached() {
        info!(scratch = %config.scratch_dir, "caching to local directory first");
    }
}
