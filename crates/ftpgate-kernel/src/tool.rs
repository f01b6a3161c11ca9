//! External tool invocation.
//!
//! `db_load`, `chown`, and `systemctl` are each run exactly once through a
//! [`ToolRunner`], which applies the privilege prefix, pipes optional stdin,
//! captures both output streams, and kills the child if it outlives the
//! configured timeout. Callers get a typed [`ToolOutput`] or [`ToolError`],
//! never raw text to match against.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Error type for tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{command}: failed to start: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command}: i/o error: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command}: exited with {}: {stderr}", display_code(.code))]
    Exit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{command}: timed out after {after:?}")]
    Timeout { command: String, after: Duration },
}

impl ToolError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "signal".to_string(),
    }
}

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A program and its arguments, before the privilege prefix is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Runs external commands with a privilege prefix and a hard timeout.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    privilege_prefix: Vec<String>,
    timeout: Duration,
}

impl ToolRunner {
    pub fn new(privilege_prefix: Vec<String>, timeout: Duration) -> Self {
        Self {
            privilege_prefix,
            timeout,
        }
    }

    /// A runner without privilege escalation.
    pub fn unprivileged(timeout: Duration) -> Self {
        Self::new(Vec::new(), timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Apply the privilege prefix: `sudo -n` + `chown a b` → `sudo -n chown a b`.
    pub fn elevate(&self, command: &ToolCommand) -> ToolCommand {
        match self.privilege_prefix.split_first() {
            Some((program, rest)) => ToolCommand::new(program.clone())
                .args(rest.iter().cloned())
                .arg(command.program.clone())
                .args(command.args.iter().cloned()),
            None => command.clone(),
        }
    }

    /// Run `command` once, feeding `stdin` if given.
    ///
    /// A non-zero exit is an error carrying the captured stderr. On timeout
    /// the child is killed.
    pub async fn run(
        &self,
        command: &ToolCommand,
        stdin: Option<&[u8]>,
    ) -> Result<ToolOutput, ToolError> {
        let elevated = self.elevate(command);
        let label = elevated.to_string();

        let mut cmd = Command::new(&elevated.program);
        cmd.args(&elevated.args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(command = %label, "running tool");

        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            command: label.clone(),
            source,
        })?;

        let run = async {
            if let Some(data) = stdin
                && let Some(mut pipe) = child.stdin.take()
            {
                // A child that exits without draining stdin still has a status to report
                match pipe.write_all(data).await {
                    Ok(()) => drop(pipe),
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                    Err(e) => return Err(e),
                }
            }
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ToolError::Io {
                    command: label,
                    source,
                });
            }
            Err(_) => {
                tracing::warn!(command = %label, timeout = ?self.timeout, "tool timed out");
                return Err(ToolError::Timeout {
                    command: label,
                    after: self.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

        if !output.status.success() {
            return Err(ToolError::Exit {
                command: label,
                code: output.status.code(),
                stderr,
            });
        }

        Ok(ToolOutput { stdout, stderr })
    }
}
