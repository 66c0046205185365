//! Running external commands
//!
//! Every interaction with the container runtime and the SSH tooling goes
//! through [`Cmd`], which captures output so failures can be reported with
//! what the tool actually printed.

use crate::error::{Result, VindError};
use std::process::{Command, Output, Stdio};

/// External command invocation
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    quiet: bool,
}

impl Cmd {
    /// Create a command for a program
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            quiet: false,
        }
    }

    /// Log failure output at debug instead of error, for queries that are
    /// expected to fail (existence checks)
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Printable command line
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn output(&self) -> Result<Output> {
        tracing::debug!("running {}", self.command_line());

        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| self.failure(e.to_string()))
    }

    fn failure(&self, output: String) -> VindError {
        VindError::Command {
            command: self.command_line(),
            output,
        }
    }

    /// Run to completion; a non-zero exit is an error carrying the output
    pub fn run(&self) -> Result<()> {
        self.combined_output_lines().map(|_| ())
    }

    /// Run and return stdout followed by stderr, split into lines.
    /// On failure the lines are logged (unless quiet) and carried by the error.
    pub fn combined_output_lines(&self) -> Result<Vec<String>> {
        let output = self.output()?;

        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        lines.extend(
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_string),
        );

        if !output.status.success() {
            for line in &lines {
                if self.quiet {
                    tracing::debug!(command = %self.program, "{}", line);
                } else {
                    tracing::error!(command = %self.program, "{}", line);
                }
            }
            let mut message = format!("exit status {}", output.status);
            if !lines.is_empty() {
                message.push_str(": ");
                message.push_str(&lines.join("\n"));
            }
            return Err(self.failure(message));
        }

        Ok(lines)
    }

    /// Run with the terminal attached (stdin, stdout and stderr inherited)
    pub fn run_attached(&self) -> Result<()> {
        tracing::debug!("running attached {}", self.command_line());

        let status = Command::new(&self.program)
            .args(&self.args)
            .status()
            .map_err(|e| self.failure(e.to_string()))?;
        if !status.success() {
            return Err(self.failure(format!("exit status {}", status)));
        }
        Ok(())
    }
}
