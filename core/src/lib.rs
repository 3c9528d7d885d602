//! Tablet deployment core.
//!
//! Builds the `wave` and `tray` binaries for the tablet's ARM target, stops
//! any running instances on the device, copies the new binaries over and
//! starts `wave` again. All external programs (`cross`/`cargo`, `ssh`,
//! `scp`) are described as `Invocation`s and executed through the
//! `CommandRunner` seam, so the whole sequence can be exercised against
//! `mock::FakeDevice`.

pub mod artifact;
pub mod builder;
pub mod config;
pub mod error;
pub mod mock;
pub mod orchestrator;
pub mod pipeline;
pub mod remote;
pub mod runner;

pub use artifact::Artifact;
pub use config::{BuildTool, DeployConfig, LaunchMode};
pub use error::DeployError;
pub use orchestrator::{Orchestrator, RunOptions};
pub use pipeline::{Outcome, RunReport, Step, StepStatus};
pub use runner::{CommandRunner, DryRunRunner, Invocation, ProcessRunner};
