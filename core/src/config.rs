//! Deployment target configuration.
//!
//! `DeployConfig` names the device (SSH coordinates, remote directory), the
//! build target and the artifact set. Defaults describe the reMarkable setup:
//! `root@remarkable`, `armv7-unknown-linux-gnueabihf`, artifacts `tray` and
//! `wave`, with `wave` launched after the transfer. A YAML file can override
//! any field; missing fields keep their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DeployError;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "TDEPLOY_CONFIG";

/// Config file picked up from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "tdeploy.yaml";

pub const DEFAULT_HOST: &str = "remarkable";
pub const DEFAULT_USER: &str = "root";
pub const DEFAULT_TARGET: &str = "armv7-unknown-linux-gnueabihf";


// ---------------------------------------------------------------------------
// BuildTool / LaunchMode
// ---------------------------------------------------------------------------

/// Program used to cross-compile the artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildTool {
    /// `cross build` (container-based toolchain).
    Cross,
    /// Plain `cargo build` with a locally installed target.
    Cargo,
}

impl BuildTool {
    pub fn program(&self) -> &'static str {
        match self {
            BuildTool::Cross => "cross",
            BuildTool::Cargo => "cargo",
        }
    }
}

/// How the primary artifact is started on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    /// Hold the SSH session open while the process runs.
    Foreground,
    /// Detach with `nohup` and return as soon as the process is spawned.
    Background,
}


// ---------------------------------------------------------------------------
// DeployConfig
// ---------------------------------------------------------------------------

/// Everything the orchestrator needs to know about the target and artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    /// Hostname or IP address of the device.
    pub host: String,
    /// Account used for SSH and SCP.
    pub user: String,
    /// SSH port.
    pub port: u16,
    /// Path to an SSH private key, if not using the default.
    pub ssh_key: Option<String>,
    /// Seconds ssh waits for the connection to be established.
    pub connect_timeout_secs: u32,
    /// Rust target triple the artifacts are built for.
    pub target: String,
    pub build_tool: BuildTool,
    /// Cargo target directory holding the build output.
    pub target_dir: PathBuf,
    /// Binaries to build and transfer, in transfer order.
    pub artifacts: Vec<String>,
    /// The artifact started after the transfer.
    pub primary: String,
    /// Directory on the device receiving the artifacts. `None` is the
    /// account's home directory.
    pub remote_dir: Option<String>,
    pub launch_mode: LaunchMode,
}

impl Default for DeployConfig {
    fn default() -> Self {
        DeployConfig {
            host: DEFAULT_HOST.to_string(),
            user: DEFAULT_USER.to_string(),
            port: 22,
            ssh_key: None,
            connect_timeout_secs: 10,
            target: DEFAULT_TARGET.to_string(),
            build_tool: BuildTool::Cross,
            target_dir: PathBuf::from("target"),
            artifacts: vec!["tray".to_string(), "wave".to_string()],
            primary: "wave".to_string(),
            remote_dir: None,
            launch_mode: LaunchMode::Foreground,
        }
    }
}

impl DeployConfig {
    /// Read and validate a YAML config file.
    pub fn load(path: &Path) -> Result<DeployConfig, DeployError> {
        let content = std::fs::read_to_string(path).map_err(|source| DeployError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|e| match e {
            DeployError::ConfigSyntax(source) => DeployError::ConfigParse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate a YAML document. Absent keys keep their defaults.
    pub fn from_yaml(yaml: &str) -> Result<DeployConfig, DeployError> {
        let config: DeployConfig = if yaml.trim().is_empty() {
            DeployConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, DeployError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check the invariants the orchestrator relies on. Names end up inside
    /// remote shell commands, so they are restricted to a safe alphabet.
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.host.trim().is_empty() {
            return Err(DeployError::Config("host must not be empty".into()));
        }
        if self.user.trim().is_empty() {
            return Err(DeployError::Config("user must not be empty".into()));
        }
        for (field, value) in [("host", &self.host), ("user", &self.user)] {
            if value.starts_with('-') {
                return Err(DeployError::Config(format!(
                    "{} '{}' must not start with '-'",
                    field, value
                )));
            }
        }
        if self.target.trim().is_empty() {
            return Err(DeployError::Config("target triple must not be empty".into()));
        }
        if self.artifacts.is_empty() {
            return Err(DeployError::Config("at least one artifact is required".into()));
        }
        for (i, name) in self.artifacts.iter().enumerate() {
            if !is_safe_name(name) {
                return Err(DeployError::Config(format!(
                    "invalid artifact name '{}'",
                    name
                )));
            }
            if self.artifacts[..i].contains(name) {
                return Err(DeployError::Config(format!(
                    "artifact '{}' listed twice",
                    name
                )));
            }
        }
        if !self.artifacts.contains(&self.primary) {
            return Err(DeployError::Config(format!(
                "primary artifact '{}' is not in the artifact list",
                self.primary
            )));
        }
        if let Some(ref dir) = self.remote_dir {
            if dir.is_empty() || !dir.chars().all(|c| is_safe_char(c) || c == '/' || c == '~') {
                return Err(DeployError::Config(format!("invalid remote_dir '{}'", dir)));
            }
        }
        Ok(())
    }

    /// Build the `user@host` string used in SSH/SCP commands.
    pub fn user_at_host(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Base SSH arguments (port, options, key, user@host) without a command.
    pub fn ssh_base_args(&self) -> Vec<String> {
        let mut args = vec!["-p".to_string(), self.port.to_string()];
        args.extend(self.common_options());
        args.push(self.user_at_host());
        args
    }

    /// Base SCP arguments (mode preservation, port, options, key). Source
    /// and destination are appended by the caller.
    pub fn scp_base_args(&self) -> Vec<String> {
        let mut args = vec!["-p".to_string(), "-P".to_string(), self.port.to_string()];
        args.extend(self.common_options());
        args
    }

    /// SCP destination, `user@host:` for the home directory.
    pub fn scp_destination(&self) -> String {
        match self.remote_dir {
            Some(ref dir) => format!("{}:{}/", self.user_at_host(), dir.trim_end_matches('/')),
            None => format!("{}:", self.user_at_host()),
        }
    }

    fn common_options(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
        ];
        if let Some(ref key) = self.ssh_key {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        args
    }
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && name.chars().all(is_safe_char)
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
