//! Remote commands against the device.
//!
//! Builds the `ssh`/`scp` argument vectors for teardown, transfer and launch,
//! and classifies their outcomes. ssh reserves exit status 255 for its own
//! failures (connection refused, auth denied, host unknown), so 255 always
//! means the device was not reached. `killall` exits 1 when nothing matched,
//! which teardown treats as success.

use tracing::{debug, info, warn};

use crate::artifact::Artifact;
use crate::config::{DeployConfig, LaunchMode};
use crate::error::DeployError;
use crate::runner::{CommandOutput, CommandRunner, Invocation};

/// Exit status ssh uses for connection and authentication failures.
pub const SSH_CONNECTION_FAILURE: i32 = 255;

/// Exit status of `killall` when no process matched.
pub const KILLALL_NO_MATCH: i32 = 1;


// ---------------------------------------------------------------------------
// Command construction
// ---------------------------------------------------------------------------

/// `ssh <base args> <remote command>`.
pub fn ssh_invocation(config: &DeployConfig, remote_command: &str) -> Invocation {
    Invocation::new("ssh")
        .args(config.ssh_base_args())
        .arg(remote_command)
}

/// Remote command forcibly terminating every instance of `process`.
pub fn kill_command(process: &str) -> String {
    format!("killall -9 {}", process)
}

pub fn kill_invocation(config: &DeployConfig, process: &str) -> Invocation {
    ssh_invocation(config, &kill_command(process))
}

/// `scp -p <base args> <local> <user@host>:<dir>`.
pub fn transfer_invocation(config: &DeployConfig, artifact: &Artifact) -> Invocation {
    Invocation::new("scp")
        .args(config.scp_base_args())
        .arg(artifact.local_path.to_string_lossy())
        .arg(config.scp_destination())
}

/// Remote command starting `artifact` from the deploy directory.
pub fn launch_command(config: &DeployConfig, artifact: &str) -> String {
    let start = match config.launch_mode {
        LaunchMode::Foreground => format!("./{}", artifact),
        LaunchMode::Background => format!("nohup ./{} >/dev/null 2>&1 &", artifact),
    };
    match config.remote_dir {
        Some(ref dir) => format!("cd {} && {}", dir, start),
        None => start,
    }
}

pub fn launch_invocation(config: &DeployConfig, artifact: &str) -> Invocation {
    let invocation = ssh_invocation(config, &launch_command(config, artifact));
    match config.launch_mode {
        LaunchMode::Foreground => invocation.inherit_output(),
        LaunchMode::Background => invocation,
    }
}


// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

/// Result of a single kill request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// At least one instance was running and has been signalled.
    Killed,
    /// Nothing to kill.
    ProcessNotRunning,
}

/// Classify the result of `killall -9 <process>` over ssh.
pub fn classify_kill(
    config: &DeployConfig,
    process: &str,
    result: std::io::Result<CommandOutput>,
) -> Result<KillOutcome, DeployError> {
    let output = result.map_err(|e| host_unreachable(config, format!("cannot run ssh: {}", e)))?;
    match output.code {
        Some(0) => Ok(KillOutcome::Killed),
        Some(KILLALL_NO_MATCH) => Ok(KillOutcome::ProcessNotRunning),
        Some(SSH_CONNECTION_FAILURE) => Err(host_unreachable(config, output.describe())),
        code => Err(DeployError::Teardown {
            process: process.to_string(),
            code: code.unwrap_or(-1),
            stderr: output.stderr.trim().to_string(),
        }),
    }
}

/// Kill every instance of each process, in order. Absent processes are fine;
/// any other failure stops the teardown.
pub fn teardown(
    config: &DeployConfig,
    runner: &dyn CommandRunner,
    processes: &[String],
) -> Result<Vec<(String, KillOutcome)>, DeployError> {
    let mut outcomes = Vec::with_capacity(processes.len());
    for process in processes {
        let invocation = kill_invocation(config, process);
        debug!(command = %invocation, "teardown");
        let outcome = classify_kill(config, process, runner.run(&invocation))?;
        match outcome {
            KillOutcome::Killed => info!(process = %process, "killed running instances"),
            KillOutcome::ProcessNotRunning => {
                warn!(process = %process, "not running, nothing to kill")
            }
        }
        outcomes.push((process.clone(), outcome));
    }
    Ok(outcomes)
}


// ---------------------------------------------------------------------------
// Transfer / Launch
// ---------------------------------------------------------------------------

/// Copy one artifact to the device, overwriting any file of the same name.
pub fn transfer(
    config: &DeployConfig,
    runner: &dyn CommandRunner,
    artifact: &Artifact,
) -> Result<(), DeployError> {
    let invocation = transfer_invocation(config, artifact);
    debug!(command = %invocation, "transfer");
    let output = runner
        .run(&invocation)
        .map_err(|e| host_unreachable(config, format!("cannot run scp: {}", e)))?;
    match output.code {
        Some(0) => Ok(()),
        Some(SSH_CONNECTION_FAILURE) => Err(host_unreachable(config, output.describe())),
        _ => Err(DeployError::Transfer {
            artifact: artifact.name.clone(),
            reason: output.describe(),
        }),
    }
}

/// Start `artifact` on the device. A foreground launch returns when the
/// remote process exits.
pub fn launch(
    config: &DeployConfig,
    runner: &dyn CommandRunner,
    artifact: &str,
) -> Result<(), DeployError> {
    let invocation = launch_invocation(config, artifact);
    debug!(command = %invocation, "launch");
    let output = runner
        .run(&invocation)
        .map_err(|e| host_unreachable(config, format!("cannot run ssh: {}", e)))?;
    match output.code {
        Some(0) => Ok(()),
        Some(SSH_CONNECTION_FAILURE) => Err(host_unreachable(config, output.describe())),
        _ => Err(DeployError::Launch {
            artifact: artifact.to_string(),
            reason: output.describe(),
        }),
    }
}

fn host_unreachable(config: &DeployConfig, reason: String) -> DeployError {
    DeployError::RemoteUnreachable {
        host: config.user_at_host(),
        reason,
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockRunner;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    // -- Construction --

    #[test]
    fn kill_invocation_targets_root_at_remarkable() {
        let inv = kill_invocation(&DeployConfig::default(), "wave");
        assert_eq!(inv.program, "ssh");
        assert_eq!(inv.args[inv.args.len() - 2], "root@remarkable");
        assert_eq!(inv.args.last().unwrap(), "killall -9 wave");
    }

    #[test]
    fn transfer_invocation_copies_to_home() {
        let config = DeployConfig::default();
        let inv = transfer_invocation(&config, &Artifact::new(&config, "tray"));
        assert_eq!(inv.program, "scp");
        let n = inv.args.len();
        assert_eq!(inv.args[n - 2], "target/armv7-unknown-linux-gnueabihf/release/tray");
        assert_eq!(inv.args[n - 1], "root@remarkable:");
    }

    #[test]
    fn launch_command_variants() {
        let mut config = DeployConfig::default();
        assert_eq!(launch_command(&config, "wave"), "./wave");
        assert!(launch_invocation(&config, "wave").inherit_output);

        config.launch_mode = LaunchMode::Background;
        assert_eq!(launch_command(&config, "wave"), "nohup ./wave >/dev/null 2>&1 &");
        assert!(!launch_invocation(&config, "wave").inherit_output);

        config.remote_dir = Some("/home/root/bin".into());
        assert_eq!(
            launch_command(&config, "wave"),
            "cd /home/root/bin && nohup ./wave >/dev/null 2>&1 &"
        );
    }

    // -- Classification --

    #[test]
    fn kill_exit_codes() {
        let config = DeployConfig::default();
        assert_eq!(
            classify_kill(&config, "wave", Ok(CommandOutput::ok())).unwrap(),
            KillOutcome::Killed
        );
        assert_eq!(
            classify_kill(
                &config,
                "wave",
                Ok(CommandOutput::exit(1, "killall: wave: no process killed"))
            )
            .unwrap(),
            KillOutcome::ProcessNotRunning
        );
        let err = classify_kill(
            &config,
            "wave",
            Ok(CommandOutput::exit(255, "Permission denied (publickey).")),
        )
        .unwrap_err();
        assert!(matches!(err, DeployError::RemoteUnreachable { .. }));
        let err = classify_kill(&config, "wave", Ok(CommandOutput::exit(127, "sh: killall: not found")))
            .unwrap_err();
        match err {
            DeployError::Teardown { process, code, stderr } => {
                assert_eq!(process, "wave");
                assert_eq!(code, 127);
                assert_eq!(stderr, "sh: killall: not found");
            }
            other => panic!("unexpected: {}", other),
        }
    }

    #[test]
    fn kill_spawn_failure_is_unreachable() {
        let config = DeployConfig::default();
        let err = classify_kill(
            &config,
            "wave",
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "ssh")),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "remote_unreachable");
    }

    // -- Teardown --

    #[test]
    fn teardown_swallows_absent_processes() {
        let config = DeployConfig::default();
        let runner = MockRunner::with_responses(vec![
            Ok(CommandOutput::exit(1, "no process killed")),
            Ok(CommandOutput::exit(1, "no process killed")),
        ]);
        let outcomes = teardown(&config, &runner, &names(&["tray", "wave"])).unwrap();
        assert_eq!(
            outcomes,
            vec![
                ("tray".to_string(), KillOutcome::ProcessNotRunning),
                ("wave".to_string(), KillOutcome::ProcessNotRunning),
            ]
        );
        assert_eq!(runner.invocations().len(), 2);
    }

    #[test]
    fn teardown_stops_on_unreachable_host() {
        let config = DeployConfig::default();
        let runner = MockRunner::with_responses(vec![Ok(CommandOutput::exit(
            255,
            "ssh: Could not resolve hostname remarkable",
        ))]);
        let err = teardown(&config, &runner, &names(&["tray", "wave"])).unwrap_err();
        assert!(matches!(err, DeployError::RemoteUnreachable { .. }));
        assert_eq!(runner.invocations().len(), 1);
    }

    // -- Transfer / Launch --

    #[test]
    fn transfer_failure_names_artifact() {
        let config = DeployConfig::default();
        let runner = MockRunner::with_responses(vec![Ok(CommandOutput::exit(
            1,
            "scp: wave: No space left on device",
        ))]);
        let err = transfer(&config, &runner, &Artifact::new(&config, "wave")).unwrap_err();
        match err {
            DeployError::Transfer { artifact, reason } => {
                assert_eq!(artifact, "wave");
                assert!(reason.contains("No space left"));
            }
            other => panic!("unexpected: {}", other),
        }
    }

    #[test]
    fn transfer_255_is_unreachable() {
        let config = DeployConfig::default();
        let runner = MockRunner::with_responses(vec![Ok(CommandOutput::exit(255, "lost connection"))]);
        let err = transfer(&config, &runner, &Artifact::new(&config, "tray")).unwrap_err();
        assert_eq!(err.kind(), "remote_unreachable");
    }

    #[test]
    fn launch_non_zero_is_launch_failure() {
        let config = DeployConfig::default();
        let runner = MockRunner::with_responses(vec![Ok(CommandOutput::exit(127, "sh: ./wave: not found"))]);
        let err = launch(&config, &runner, "wave").unwrap_err();
        assert_eq!(err.kind(), "launch_failure");
        assert!(launch(&config, &MockRunner::new(), "wave").is_ok());
    }
}
