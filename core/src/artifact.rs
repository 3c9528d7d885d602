//! Compiled binaries produced by the build step.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::DeployConfig;

/// A named, architecture-specific release binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    /// Target triple the binary was built for.
    pub target: String,
    /// `<target_dir>/<target>/release/<name>`.
    pub local_path: PathBuf,
}

impl Artifact {
    pub fn new(config: &DeployConfig, name: &str) -> Self {
        Artifact {
            name: name.to_string(),
            target: config.target.clone(),
            local_path: config
                .target_dir
                .join(&config.target)
                .join("release")
                .join(name),
        }
    }

    /// All configured artifacts, in transfer order.
    pub fn all(config: &DeployConfig) -> Vec<Artifact> {
        config
            .artifacts
            .iter()
            .map(|name| Artifact::new(config, name))
            .collect()
    }

    pub fn exists(&self) -> bool {
        self.local_path.is_file()
    }
}
