//! Fake device for testing.
//!
//! `FakeDevice` is a `CommandRunner` that plays both the local build tool and
//! the remote host. Builds write artifact files to the requested target
//! directory; `ssh` and `scp` invocations act on an in-memory home directory
//! and process table. Every call is recorded, making it easy to write
//! deterministic tests for the orchestrator.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use crate::remote::{KILLALL_NO_MATCH, SSH_CONNECTION_FAILURE};
use crate::runner::{CommandOutput, CommandRunner, Invocation};

#[derive(Debug, Clone)]
struct RunningProcess {
    pid: u32,
    name: String,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct DeviceState {
    build_outputs: BTreeMap<String, Vec<u8>>,
    build_fails: bool,
    unreachable: bool,
    failing_transfer: Option<String>,
    files: BTreeMap<String, Vec<u8>>,
    processes: Vec<RunningProcess>,
    next_pid: u32,
    local_calls: Vec<Invocation>,
    remote_calls: Vec<Invocation>,
    launches: Vec<String>,
}

/// A test double standing in for the build toolchain and the device.
pub struct FakeDevice {
    state: RefCell<DeviceState>,
}

impl FakeDevice {
    pub fn new() -> Self {
        FakeDevice {
            state: RefCell::new(DeviceState {
                next_pid: 100,
                ..Default::default()
            }),
        }
    }

    /// Content the build writes for `name`. Unset names get their own name
    /// as content.
    pub fn with_build_output(self, name: &str, content: &[u8]) -> Self {
        self.state
            .borrow_mut()
            .build_outputs
            .insert(name.to_string(), content.to_vec());
        self
    }

    /// Pre-existing process (and its binary in the home directory).
    pub fn with_running(self, name: &str, content: &[u8]) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.files.insert(name.to_string(), content.to_vec());
            spawn(&mut state, name, content.to_vec());
        }
        self
    }

    pub fn failing_build(self) -> Self {
        self.state.borrow_mut().build_fails = true;
        self
    }

    /// Every ssh/scp call exits 255.
    pub fn unreachable(self) -> Self {
        self.state.borrow_mut().unreachable = true;
        self
    }

    /// Transfers of `name` fail as if the disk were full.
    pub fn failing_transfer(self, name: &str) -> Self {
        self.state.borrow_mut().failing_transfer = Some(name.to_string());
        self
    }

    pub fn remote_file(&self, name: &str) -> Option<Vec<u8>> {
        self.state.borrow().files.get(name).cloned()
    }

    /// Binary content of every running instance of `name`.
    pub fn running(&self, name: &str) -> Vec<Vec<u8>> {
        self.state
            .borrow()
            .processes
            .iter()
            .filter(|p| p.name == name)
            .map(|p| p.content.clone())
            .collect()
    }

    pub fn pids(&self, name: &str) -> Vec<u32> {
        self.state
            .borrow()
            .processes
            .iter()
            .filter(|p| p.name == name)
            .map(|p| p.pid)
            .collect()
    }

    pub fn local_calls(&self) -> Vec<Invocation> {
        self.state.borrow().local_calls.clone()
    }

    pub fn remote_calls(&self) -> Vec<Invocation> {
        self.state.borrow().remote_calls.clone()
    }

    /// Names of the artifacts launched so far.
    pub fn launches(&self) -> Vec<String> {
        self.state.borrow().launches.clone()
    }

    fn build(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        let mut state = self.state.borrow_mut();
        state.local_calls.push(invocation.clone());
        if state.build_fails {
            return Ok(CommandOutput::exit(101, "error: could not compile `wave`"));
        }

        let target = flag_value(&invocation.args, "--target").unwrap_or_default();
        let target_dir = flag_value(&invocation.args, "--target-dir").unwrap_or("target");
        let out_dir = Path::new(target_dir).join(target).join("release");
        std::fs::create_dir_all(&out_dir)?;
        for bin in flag_values(&invocation.args, "--bin") {
            let content = state
                .build_outputs
                .get(bin)
                .cloned()
                .unwrap_or_else(|| bin.as_bytes().to_vec());
            std::fs::write(out_dir.join(bin), content)?;
        }
        Ok(CommandOutput::ok())
    }

    fn ssh(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        let mut state = self.state.borrow_mut();
        state.remote_calls.push(invocation.clone());
        if state.unreachable {
            return Ok(CommandOutput::exit(
                SSH_CONNECTION_FAILURE,
                "ssh: connect to host remarkable port 22: No route to host",
            ));
        }

        let command = invocation.args.last().map(String::as_str).unwrap_or("");
        let command = match command.split_once(" && ") {
            Some((cd, rest)) if cd.starts_with("cd ") => rest,
            _ => command,
        };
        let command = command.trim_start_matches("nohup ");
        let command = command.trim_end_matches(" >/dev/null 2>&1 &");

        if let Some(name) = command.strip_prefix("killall -9 ") {
            let before = state.processes.len();
            state.processes.retain(|p| p.name != name);
            if state.processes.len() == before {
                return Ok(CommandOutput::exit(
                    KILLALL_NO_MATCH,
                    &format!("killall: {}: no process killed", name),
                ));
            }
            return Ok(CommandOutput::ok());
        }

        if let Some(name) = command.strip_prefix("./") {
            let content = match state.files.get(name) {
                Some(content) => content.clone(),
                None => {
                    return Ok(CommandOutput::exit(127, &format!("sh: ./{}: not found", name)))
                }
            };
            state.launches.push(name.to_string());
            spawn(&mut state, name, content);
            return Ok(CommandOutput::ok());
        }

        Ok(CommandOutput::exit(127, &format!("sh: {}: not found", command)))
    }

    fn scp(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        let mut state = self.state.borrow_mut();
        state.remote_calls.push(invocation.clone());
        if state.unreachable {
            return Ok(CommandOutput::exit(SSH_CONNECTION_FAILURE, "lost connection"));
        }

        let n = invocation.args.len();
        if n < 2 {
            return Ok(CommandOutput::exit(1, "usage: scp source target"));
        }
        let local = PathBuf::from(&invocation.args[n - 2]);
        let name = local
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        if state.failing_transfer.as_deref() == Some(name.as_str()) {
            return Ok(CommandOutput::exit(
                1,
                &format!("scp: {}: No space left on device", name),
            ));
        }
        match std::fs::read(&local) {
            Ok(content) => {
                state.files.insert(name, content);
                Ok(CommandOutput::ok())
            }
            Err(e) => Ok(CommandOutput::exit(1, &format!("{}: {}", local.display(), e))),
        }
    }
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for FakeDevice {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        match invocation.program.as_str() {
            "cross" | "cargo" => self.build(invocation),
            "ssh" => self.ssh(invocation),
            "scp" => self.scp(invocation),
            other => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: not found", other),
            )),
        }
    }
}

fn spawn(state: &mut DeviceState, name: &str, content: Vec<u8>) {
    let pid = state.next_pid;
    state.next_pid += 1;
    state.processes.push(RunningProcess {
        pid,
        name: name.to_string(),
        content,
    });
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    flag_values(args, flag).into_iter().next()
}

fn flag_values<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
    args.windows(2)
        .filter(|pair| pair[0] == flag)
        .map(|pair| pair[1].as_str())
        .collect()
}
