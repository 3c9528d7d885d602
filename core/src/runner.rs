//! Command runner abstraction for executing external programs.
//!
//! `CommandRunner` is the seam every step goes through. `ProcessRunner` is the
//! production implementation that spawns the program directly (no shell).
//! `DryRunRunner` logs instead of executing. `MockRunner` is the test double
//! that records invocations and returns preset responses.

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};


// ---------------------------------------------------------------------------
// Invocation / CommandOutput
// ---------------------------------------------------------------------------

/// A program and its argument vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Stream stdout/stderr to the terminal instead of capturing them.
    pub inherit_output: bool,
}

impl Invocation {
    pub fn new(program: &str) -> Self {
        Invocation {
            program: program.to_string(),
            args: Vec::new(),
            inherit_output: false,
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
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

    pub fn inherit_output(mut self) -> Self {
        self.inherit_output = true;
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"') {
                write!(f, " '{}'", arg.replace('\'', r"'\''"))?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Exit status and captured output of a finished program.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok() -> Self {
        CommandOutput {
            code: Some(0),
            ..Default::default()
        }
    }

    pub fn exit(code: i32, stderr: &str) -> Self {
        CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Short description of a failure for error messages.
    pub fn describe(&self) -> String {
        let status = match self.code {
            Some(code) => format!("exit {}", code),
            None => "killed by signal".to_string(),
        };
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            status
        } else {
            format!("{}: {}", status, stderr)
        }
    }
}


// ---------------------------------------------------------------------------
// CommandRunner
// ---------------------------------------------------------------------------

/// Executes an `Invocation`. `Err` means the program could not be started at
/// all; a non-zero exit is reported through `CommandOutput::code`.
pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput>;
}

/// Production runner that spawns the program and waits for it.
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        debug!(command = %invocation, "spawning");
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args).stdin(Stdio::null());

        if invocation.inherit_output {
            let status = command
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()?;
            return Ok(CommandOutput {
                code: status.code(),
                ..Default::default()
            });
        }

        let output = command.output()?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Runner that only logs what would be executed and reports success.
pub struct DryRunRunner;

impl CommandRunner for DryRunRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        info!(command = %invocation, "dry run");
        Ok(CommandOutput::ok())
    }
}

/// Test-double runner that records invocations and returns pre-configured
/// responses in order. `Err` responses simulate a program that cannot start.
pub struct MockRunner {
    responses: RefCell<Vec<Result<CommandOutput, String>>>,
    invocations: RefCell<Vec<Invocation>>,
}

impl MockRunner {
    pub fn with_responses(responses: Vec<Result<CommandOutput, String>>) -> Self {
        let mut reversed = responses;
        reversed.reverse();
        MockRunner {
            responses: RefCell::new(reversed),
            invocations: RefCell::new(Vec::new()),
        }
    }

    pub fn new() -> Self {
        MockRunner {
            responses: RefCell::new(Vec::new()),
            invocations: RefCell::new(Vec::new()),
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.borrow().clone()
    }

    /// Recorded invocations rendered as command lines.
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations.borrow().iter().map(|i| i.to_string()).collect()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        self.invocations.borrow_mut().push(invocation.clone());
        match self.responses.borrow_mut().pop() {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(io::Error::new(io::ErrorKind::NotFound, message)),
            None => Ok(CommandOutput::ok()),
        }
    }
}
