//! External command execution with captured output.
//!
//! Everything that shells out (the geo-replication scheduler, the GlusterFS
//! client, `mountpoint` and `umount`) goes through [`CommandRunner`] so the
//! orchestrator can be driven by scripted runners in tests.

use std::ffi::OsString;
use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};
use std::thread;

use camino::Utf8PathBuf;
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::{debug, info};

/// Description of a single external command invocation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Invocation {
    /// Program to execute, resolved through `PATH` when not absolute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Working directory for the child; inherits ours when unset.
    pub cwd: Option<Utf8PathBuf>,
    /// Bytes written to the child's standard input before waiting.
    pub stdin: Option<Vec<u8>>,
    /// Extra environment variables layered over the inherited environment.
    pub env: Vec<(OsString, OsString)>,
}

impl Invocation {
    /// Starts an invocation of `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Appends a single argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<OsString>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn cwd(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Supplies data for the child's standard input.
    #[must_use]
    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// Adds an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Renders the command line with shell quoting, for logs and errors.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut rendered = escape(self.program.as_str().into()).into_owned();
        for arg in &self.args {
            rendered.push(' ');
            let text = arg.to_string_lossy();
            rendered.push_str(escape(text).as_ref());
        }
        rendered
    }
}

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Standard output split into lines without terminators.
    #[must_use]
    pub fn stdout_lines(&self) -> Vec<&str> {
        self.stdout.lines().collect()
    }

    /// Standard error split into lines without terminators.
    #[must_use]
    pub fn stderr_lines(&self) -> Vec<&str> {
        self.stderr.lines().collect()
    }

    /// Human readable exit status (`unknown` when killed by a signal).
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Errors raised when an external command cannot be run at all.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProcessError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when standard input could not be delivered to the child.
    #[error("failed to write stdin of {program}: {message}")]
    Stdin {
        /// Command whose input pipe failed.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs the invocation to completion, capturing stdout and stderr.
    ///
    /// A non-zero exit code is reported through [`CommandOutput::code`]; it
    /// is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Spawn`] if the command cannot be started.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError> {
        (**self).run(invocation)
    }
}

/// Real command runner that shells out to the host operating system.
///
/// Descriptors opened by the standard library carry `O_CLOEXEC`, so the
/// child only sees the three standard streams configured here.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError> {
        let cwd_text = invocation
            .cwd
            .as_ref()
            .map_or_else(|| String::from("None"), ToString::to_string);
        info!(
            command = %invocation.command_line(),
            cwd = %cwd_text,
            "running external command"
        );

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = invocation.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &invocation.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|err| ProcessError::Spawn {
            program: invocation.program.clone(),
            message: err.to_string(),
        })?;

        // Feed stdin from its own thread so a child that fills its output
        // pipes before reading input cannot stall the runner.
        let feeder = match (invocation.stdin.clone(), child.stdin.take()) {
            (Some(data), Some(mut pipe)) => Some(thread::spawn(move || pipe.write_all(&data))),
            _ => None,
        };

        let output = child
            .wait_with_output()
            .map_err(|err| ProcessError::Spawn {
                program: invocation.program.clone(),
                message: err.to_string(),
            })?;

        if let Some(handle) = feeder {
            let stdin_error = |message: String| ProcessError::Stdin {
                program: invocation.program.clone(),
                message,
            };
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.kind() == ErrorKind::BrokenPipe => {
                    debug!(command = %invocation.command_line(), "child closed stdin early");
                }
                Ok(Err(err)) => return Err(stdin_error(err.to_string())),
                Err(_) => return Err(stdin_error(String::from("stdin writer panicked"))),
            }
        }

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        info!(
            outcome = if result.is_success() { "SUCCESS" } else { "FAILED" },
            err = ?result.stderr,
            rc = %result.status_text(),
            "external command finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests;
