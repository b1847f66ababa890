//! External tool execution.
//!
//! Every command-line tool the pipeline shells out to (pdfinfo, pdftoppm,
//! zbarimg, pdftotext, tesseract, qpdf, ...) is invoked through [`ToolRunner`]
//! so backends can be swapped for fakes in tests and timeouts are enforced in
//! one place.

use std::ffi::OsString;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Interval between child status polls while waiting for a timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Errors from running an external tool.
///
/// Display output never includes the tool's raw stderr; it is kept on the
/// error for debug logging only.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("External tool not found: {tool}")]
    Unavailable { tool: String },

    #[error("{tool} failed with exit code {code:?}")]
    ExecutionFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{tool} timed out after {secs}s")]
    TimedOut { tool: String, secs: u64 },

    #[error("{tool} produced unexpected output: {detail}")]
    UnexpectedOutput { tool: String, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Log the captured stderr of a failed invocation at debug level.
    pub fn log_details(&self) {
        if let ToolError::ExecutionFailed { tool, stderr, .. } = self {
            if !stderr.trim().is_empty() {
                tracing::debug!("{} stderr: {}", tool, stderr.trim());
            }
        }
    }
}

/// A single tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<OsString>,
    pub timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.as_os_str().to_os_string())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Captured result of a finished tool.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Convert a non-zero exit into [`ToolError::ExecutionFailed`].
    pub fn into_success(self, tool: &str) -> Result<ToolOutput, ToolError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ToolError::ExecutionFailed {
                tool: tool.to_string(),
                code: self.code,
                stderr: self.stderr,
            })
        }
    }
}

/// Process execution capability.
///
/// Implementations return `Ok` for any process that ran to completion,
/// whatever its exit code; interpreting the code is up to the caller.
pub trait ToolRunner: Send + Sync {
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ToolError>;
}

/// Runs tools as child processes of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemToolRunner;

impl SystemToolRunner {
    pub fn new() -> Self {
        Self
    }
}

impl ToolRunner for SystemToolRunner {
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ToolError> {
        tracing::debug!("Running {} {:?}", command.program, command.args);

        let mut child = match Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::Unavailable {
                    tool: command.program.clone(),
                });
            }
            Err(e) => return Err(ToolError::Io(e)),
        };

        // Drain pipes on separate threads so a chatty tool can't block on a full pipe.
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= command.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolError::TimedOut {
                    tool: command.program.clone(),
                    secs: command.timeout.as_secs(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(ToolOutput {
            code: status.code(),
            stdout: join_reader(stdout_reader),
            stderr: join_reader(stderr_reader),
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
        .unwrap_or_default()
}

/// Check if a binary is available in PATH.
pub fn check_binary(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Availability of every tool the pipeline knows about.
pub fn check_tools() -> Vec<(&'static str, bool)> {
    [
        "pdfinfo",
        "pdftoppm",
        "gs",
        "zbarimg",
        "pdftotext",
        "tesseract",
        "qpdf",
        "pdftk",
    ]
    .iter()
    .map(|tool| (*tool, check_binary(tool)))
    .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted runner for exercising command construction and output parsing.

    use std::sync::Mutex;

    use super::*;

    /// Returns canned outputs in order and records every command it receives.
    pub struct ScriptedRunner {
        responses: Mutex<Vec<Result<ToolOutput, ToolError>>>,
        pub calls: Mutex<Vec<ToolCommand>>,
    }

    impl ScriptedRunner {
        pub fn new(responses: Vec<Result<ToolOutput, ToolError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn ok(stdout: &str) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput {
                code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            })
        }

        pub fn exit(code: i32, stderr: &str) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            })
        }

        pub fn args_of(&self, index: usize) -> Vec<String> {
            self.calls.lock().unwrap()[index]
                .args
                .iter()
                .map(|a| a.to_string_lossy().to_string())
                .collect()
        }
    }

    impl ToolRunner for ScriptedRunner {
        fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ToolError> {
            self.calls.lock().unwrap().push(command.clone());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ToolError::Unavailable {
                    tool: command.program.clone(),
                }))
        }
    }
}
