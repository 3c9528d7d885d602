//! Release build of the artifact set.
//!
//! One `cross build` (or `cargo build`) invocation compiles every configured
//! binary for the target triple. The step succeeds only when the tool exits
//! zero and every expected artifact exists afterwards.

use std::path::Path;

use tracing::{debug, info};

use crate::artifact::Artifact;
use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::runner::{CommandRunner, Invocation};

/// Build the compiler invocation for the configured artifacts.
pub fn build_invocation(config: &DeployConfig) -> Invocation {
    let mut invocation = Invocation::new(config.build_tool.program())
        .arg("build")
        .arg("--release")
        .arg("--target")
        .arg(config.target.as_str());
    if config.target_dir != Path::new("target") {
        invocation = invocation
            .arg("--target-dir")
            .arg(config.target_dir.to_string_lossy());
    }
    for name in &config.artifacts {
        invocation = invocation.arg("--bin").arg(name.as_str());
    }
    invocation.inherit_output()
}

/// Compile the artifacts and return them. With `skip` set the compiler is not
/// invoked and existing build output is used as-is. A dry run produces no
/// output, so the artifact files are not checked.
pub fn build(
    config: &DeployConfig,
    runner: &dyn CommandRunner,
    skip: bool,
    dry_run: bool,
) -> Result<Vec<Artifact>, DeployError> {
    if skip {
        info!("skipping build, reusing existing artifacts");
    } else {
        let invocation = build_invocation(config);
        debug!(command = %invocation, "building");
        let output = runner.run(&invocation).map_err(|e| {
            DeployError::Build(format!("cannot run {}: {}", invocation.program, e))
        })?;
        if !output.success() {
            return Err(DeployError::Build(format!(
                "{} {}",
                invocation.program,
                output.describe()
            )));
        }
    }

    let artifacts = Artifact::all(config);
    if !dry_run {
        verify(&artifacts)?;
    }
    Ok(artifacts)
}

fn verify(artifacts: &[Artifact]) -> Result<(), DeployError> {
    let missing: Vec<String> = artifacts
        .iter()
        .filter(|a| !a.exists())
        .map(|a| a.local_path.display().to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(DeployError::Build(format!(
            "missing artifact(s): {}",
            missing.join(", ")
        )))
    }
}
