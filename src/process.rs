use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::error::FetchError;

/// One external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: Utf8PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Value following `flag` in the argument list, if any.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|idx| self.args.get(idx + 1))
            .map(String::as_str)
    }

    pub fn display(&self) -> String {
        let mut out = self.program.to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external tools to completion. Every collaborator (catalog query,
/// transfer client, directory copy, checksum) goes through this seam so the
/// pipeline can be driven by a test double.
pub trait ProcessRunner {
    /// Runs the command and captures its output.
    fn output(&self, command: &CommandSpec) -> Result<CommandOutput, FetchError>;

    /// Runs the command, handing each line of combined stdout/stderr to
    /// `on_line` as it arrives, and returns the exit code.
    fn stream(
        &self,
        command: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<Option<i32>, FetchError>;
}

impl<T: ProcessRunner + ?Sized> ProcessRunner for &T {
    fn output(&self, command: &CommandSpec) -> Result<CommandOutput, FetchError> {
        (**self).output(command)
    }

    fn stream(
        &self,
        command: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<Option<i32>, FetchError> {
        (**self).stream(command, on_line)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn output(&self, command: &CommandSpec) -> Result<CommandOutput, FetchError> {
        debug!(command = %command.display(), "running");
        let output = Command::new(command.program.as_std_path())
            .args(&command.args)
            .output()
            .map_err(|err| spawn_error(command, err))?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn stream(
        &self,
        command: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<Option<i32>, FetchError> {
        debug!(command = %command.display(), "streaming");
        let mut child = Command::new(command.program.as_std_path())
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| spawn_error(command, err))?;

        // Drain both pipes concurrently; the child blocks if either fills.
        let (tx, rx) = mpsc::channel::<String>();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        for line in rx {
            on_line(&line);
        }
        for reader in readers {
            let _ = reader.join();
        }

        let status = child.wait().map_err(|err| spawn_error(command, err))?;
        Ok(status.code())
    }
}

/// Consecutive read errors after which a pipe is treated as closed.
const MAX_READ_FAILURES: u32 = 16;

fn forward_lines<R: Read + Send + 'static>(
    source: R,
    tx: mpsc::Sender<String>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut line = Vec::new();
        let mut failures = 0;
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => failures = 0,
                // Drop the damaged chunk and keep draining so the child never
                // blocks on a full pipe.
                Err(err) => {
                    failures += 1;
                    debug!(error = %err, "discarding unreadable output");
                    if failures >= MAX_READ_FAILURES {
                        break;
                    }
                    continue;
                }
            }
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches('\n').trim_end_matches('\r');
            if tx.send(text.to_string()).is_err() {
                break;
            }
        }
    })
}

fn spawn_error(command: &CommandSpec, err: std::io::Error) -> FetchError {
    FetchError::Spawn {
        program: command.program.to_string(),
        message: err.to_string(),
    }
}

/// Resolves a tool name against `PATH`; paths containing a separator are
/// checked as given.
pub fn find_in_path(name: &Utf8Path) -> Option<Utf8PathBuf> {
    if name.components().count() > 1 {
        return name.as_std_path().is_file().then(|| name.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name.as_std_path());
        if candidate.is_file() {
            return Utf8PathBuf::from_path_buf(candidate).ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_value_reads_following_argument() {
        let spec = CommandSpec::new("/usr/bin/gtdownload")
            .arg("-p")
            .arg("/scratch")
            .arg("-d")
            .arg("uuid-1");
        assert_eq!(spec.flag_value("-p"), Some("/scratch"));
        assert_eq!(spec.flag_value("-d"), Some("uuid-1"));
        assert_eq!(spec.flag_value("-k"), None);
        assert_eq!(spec.display(), "/usr/bin/gtdownload -p /scratch -d uuid-1");
    }

    #[test]
    fn absolute_tool_paths_are_checked_directly() {
        let temp = tempfile::tempdir().unwrap();
        let tool = Utf8PathBuf::from_path_buf(temp.path().join("tool")).unwrap();
        assert!(find_in_path(&tool).is_none());
        std::fs::write(tool.as_std_path(), b"").unwrap();
        assert_eq!(find_in_path(&tool), Some(tool));
    }

    struct FlakyPipe {
        chunks: std::collections::VecDeque<std::io::Result<Vec<u8>>>,
    }

    impl Read for FlakyPipe {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.chunks.pop_front() {
                None => Ok(0),
                Some(Err(err)) => Err(err),
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
            }
        }
    }

    #[test]
    fn read_error_does_not_stop_forwarding() {
        let pipe = FlakyPipe {
            chunks: [
                Ok(b"first\r\n".to_vec()),
                Err(std::io::Error::other("transient")),
                Ok(b"second\n".to_vec()),
            ]
            .into_iter()
            .collect(),
        };
        let (tx, rx) = mpsc::channel();
        forward_lines(pipe, tx).join().unwrap();
        let lines: Vec<String> = rx.into_iter().collect();
        assert_eq!(lines, ["first", "second"]);
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let spec = CommandSpec::new("/nonexistent/bamfetch-tool");
        let err = SystemRunner.output(&spec).unwrap_err();
        assert!(matches!(err, FetchError::Spawn { .. }));
    }
}
