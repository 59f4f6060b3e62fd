/// External tool invocation
///
/// Runs external commands and captures their output. A nonzero exit status
/// is reported in [`ToolOutput`], never as an error; only a process that
/// cannot be started or that overruns its deadline fails.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{CompileError, Result};

/// How often a running child is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A single command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
    /// File fed to the child's stdin
    pub stdin: Option<PathBuf>,
    /// File receiving the child's stdout instead of the capture buffer
    pub stdout: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            stdout: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn stdin_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        if let Some(stdin) = &self.stdin {
            write!(f, " < {}", stdin.display())?;
        }
        if let Some(stdout) = &self.stdout {
            write!(f, " > {}", stdout.display())?;
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Combined output, stderr last, for logging failures
    pub fn transcript(&self) -> String {
        let mut text = String::new();
        if !self.stdout.trim().is_empty() {
            text.push_str("stdout:\n");
            text.push_str(self.stdout.trim_end());
            text.push('\n');
        }
        if !self.stderr.trim().is_empty() {
            text.push_str("stderr:\n");
            text.push_str(self.stderr.trim_end());
            text.push('\n');
        }
        text
    }

    /// Last non-empty line of stderr (or stdout), used as a short failure reason
    pub fn summary(&self) -> String {
        let last = |s: &str| s.lines().rev().find(|l| !l.trim().is_empty()).map(str::to_string);
        last(&self.stderr)
            .or_else(|| last(&self.stdout))
            .unwrap_or_else(|| match self.code {
                Some(code) => format!("exit status {}", code),
                None => "terminated by signal".to_string(),
            })
    }
}

/// Something that can run an [`Invocation`]
pub trait ToolRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput>;
}

/// Runs commands as child processes with a deadline
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            if let Err(e) = reader.read_to_end(&mut buf) {
                tracing::warn!(error = %e, "Failed to read tool output");
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Kill and reap a child that will not be waited on normally
fn terminate(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!(error = %e, "Kill failed, child already exited");
    }
    if let Err(e) = child.wait() {
        tracing::warn!(error = %e, "Failed to reap child process");
    }
}

fn open_input(program: &str, path: &Path) -> Result<File> {
    File::open(path).map_err(|source| CompileError::ToolInvocation {
        program: program.to_string(),
        source,
    })
}

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        tracing::debug!(command = %invocation, "Running external tool");

        let program = invocation.program.as_str();
        let mut command = Command::new(program);
        command.args(&invocation.args).stderr(Stdio::piped());

        match &invocation.stdin {
            Some(path) => command.stdin(open_input(program, path)?),
            None => command.stdin(Stdio::null()),
        };
        match &invocation.stdout {
            Some(path) => {
                let file = File::create(path).map_err(|source| CompileError::ToolInvocation {
                    program: program.to_string(),
                    source,
                })?;
                command.stdout(file)
            }
            None => command.stdout(Stdio::piped()),
        };

        let mut child = command
            .spawn()
            .map_err(|source| CompileError::ToolInvocation {
                program: program.to_string(),
                source,
            })?;

        // Pipes are drained concurrently so a chatty child cannot block on a full pipe.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    terminate(&mut child);
                    return Err(e.into());
                }
            }
            if Instant::now() >= deadline {
                terminate(&mut child);
                tracing::error!(
                    command = %invocation,
                    timeout = ?self.timeout,
                    "External tool timed out"
                );
                return Err(CompileError::ToolTimeout {
                    program: program.to_string(),
                    timeout: self.timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        let output = ToolOutput {
            code: status.code(),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        };
        tracing::debug!(command = %invocation, code = ?output.code, "External tool finished");
        Ok(output)
    }
}
