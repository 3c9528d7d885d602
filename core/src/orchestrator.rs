//! Deployment orchestrator — runs the step plan through a `CommandRunner`.
//!
//! `Orchestrator` is the only component that causes side effects, and only
//! through the injected runner (`ProcessRunner` in production, `DryRunRunner`
//! for `--dry-run`, `MockRunner` or `FakeDevice` in tests). Steps run strictly
//! in order; the first failure ends the run without retry or rollback.

use std::fmt;
use std::time::Instant;

use tracing::{error, info};

use crate::artifact::Artifact;
use crate::builder;
use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::pipeline::{plan, RunReport, Step};
use crate::remote::{self, KillOutcome};
use crate::runner::{CommandRunner, Invocation};

/// Per-run switches that are not part of the target description.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Reuse existing build output instead of compiling.
    pub skip_build: bool,
    /// Mark the report as a dry run and skip the post-build artifact check.
    pub dry_run: bool,
}

pub struct Orchestrator<'a> {
    config: &'a DeployConfig,
    runner: &'a dyn CommandRunner,
    options: RunOptions,
}

impl fmt::Debug for Orchestrator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("target", &self.config.user_at_host())
            .field("options", &self.options)
            .finish()
    }
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a DeployConfig, runner: &'a dyn CommandRunner) -> Self {
        Orchestrator {
            config,
            runner,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// The step list together with the commands each step issues.
    pub fn commands(&self) -> Vec<(Step, Vec<Invocation>)> {
        plan(self.config)
            .into_iter()
            .map(|step| {
                let invocations = match step {
                    Step::Build if self.options.skip_build => Vec::new(),
                    Step::Build => vec![builder::build_invocation(self.config)],
                    Step::Teardown => self
                        .config
                        .artifacts
                        .iter()
                        .map(|name| remote::kill_invocation(self.config, name))
                        .collect(),
                    Step::Transfer(ref name) => vec![remote::transfer_invocation(
                        self.config,
                        &Artifact::new(self.config, name),
                    )],
                    Step::Launch(ref name) => vec![remote::launch_invocation(self.config, name)],
                };
                (step, invocations)
            })
            .collect()
    }

    /// Run every step in order, stopping at the first failure.
    pub fn run(&self) -> RunReport {
        let steps = plan(self.config);
        let mut report = RunReport::new(&self.config.user_at_host(), steps.clone());
        report.dry_run = self.options.dry_run;
        info!(
            target_host = %self.config.user_at_host(),
            triple = %self.config.target,
            steps = steps.len(),
            "deployment started"
        );

        for (index, step) in steps.iter().enumerate() {
            let started = Instant::now();
            info!(step = index + 1, name = %step, "step started");
            let result = self.execute(step);
            let elapsed = started.elapsed().as_millis() as u64;
            match result {
                Ok(detail) => {
                    info!(step = index + 1, name = %step, elapsed_ms = elapsed, "step succeeded");
                    report.succeed(index, elapsed, detail);
                }
                Err(e) => {
                    error!(step = index + 1, name = %step, kind = e.kind(), "step failed: {}", e);
                    report.fail(index, elapsed, &e);
                    return report;
                }
            }
        }

        info!(elapsed_ms = report.total_duration_ms(), "deployment succeeded");
        report
    }

    fn execute(&self, step: &Step) -> Result<Option<String>, DeployError> {
        match step {
            Step::Build => {
                let artifacts = builder::build(
                    self.config,
                    self.runner,
                    self.options.skip_build,
                    self.options.dry_run,
                )?;
                let names: Vec<&str> = artifacts.iter().map(|a| a.name.as_str()).collect();
                let target = artifacts.first().map(|a| a.target.as_str()).unwrap_or_default();
                Ok(Some(format!("built {} for {}", names.join(", "), target)))
            }
            Step::Teardown => {
                let outcomes = remote::teardown(self.config, self.runner, &self.config.artifacts)?;
                let notes: Vec<String> = outcomes
                    .iter()
                    .map(|(name, outcome)| match outcome {
                        KillOutcome::Killed => format!("{} killed", name),
                        KillOutcome::ProcessNotRunning => format!("{} not running", name),
                    })
                    .collect();
                Ok(Some(notes.join(", ")))
            }
            Step::Transfer(name) => {
                let artifact = Artifact::new(self.config, name);
                remote::transfer(self.config, self.runner, &artifact)?;
                Ok(Some(format!(
                    "{} -> {}",
                    artifact.local_path.display(),
                    self.config.scp_destination()
                )))
            }
            Step::Launch(name) => {
                remote::launch(self.config, self.runner, name)?;
                Ok(None)
            }
        }
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
