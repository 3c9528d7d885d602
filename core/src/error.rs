use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Deployment errors
// ---------------------------------------------------------------------------

/// Every way a deployment run can stop. A process that is not running during
/// teardown is not an error; see `remote::KillOutcome`.
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("build failed: {0}")]
    Build(String),

    #[error("remote host {host} unreachable: {reason}")]
    RemoteUnreachable { host: String, reason: String },

    #[error("could not stop '{process}' (exit {code}): {stderr}")]
    Teardown {
        process: String,
        code: i32,
        stderr: String,
    },

    #[error("transfer of '{artifact}' failed: {reason}")]
    Transfer { artifact: String, reason: String },

    #[error("launch of '{artifact}' failed: {reason}")]
    Launch { artifact: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot read config {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("cannot parse config: {0}")]
    ConfigSyntax(#[from] serde_yaml::Error),
}

impl DeployError {
    /// Stable identifier for reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::Build(_) => "build_failure",
            DeployError::RemoteUnreachable { .. } => "remote_unreachable",
            DeployError::Teardown { .. } => "teardown_failure",
            DeployError::Transfer { .. } => "transfer_failure",
            DeployError::Launch { .. } => "launch_failure",
            DeployError::Config(_)
            | DeployError::ConfigRead { .. }
            | DeployError::ConfigParse { .. }
            | DeployError::ConfigSyntax(_) => "config_error",
        }
    }

    /// Whether the error is a configuration problem rather than a step failure.
    pub fn is_config(&self) -> bool {
        self.kind() == "config_error"
    }
}
