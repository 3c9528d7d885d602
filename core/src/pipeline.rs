//! Deployment steps, per-step records and the run report.
//!
//! A run is the fixed forward sequence `Build → Teardown → Transfer(a)… →
//! Launch(primary)`. `RunReport` records each step's status and timing and
//! ends in exactly one `Outcome`: every step succeeded, or the run stopped at
//! the first failing step (numbered from 1) and the rest were skipped.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DeployConfig;
use crate::error::DeployError;

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// One stage of a deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", content = "artifact", rename_all = "snake_case")]
pub enum Step {
    Build,
    Teardown,
    Transfer(String),
    Launch(String),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Build => write!(f, "build"),
            Step::Teardown => write!(f, "teardown"),
            Step::Transfer(name) => write!(f, "transfer({})", name),
            Step::Launch(name) => write!(f, "launch({})", name),
        }
    }
}

/// The ordered step list for a config.
pub fn plan(config: &DeployConfig) -> Vec<Step> {
    let mut steps = Vec::with_capacity(config.artifacts.len() + 3);
    steps.push(Step::Build);
    steps.push(Step::Teardown);
    steps.extend(config.artifacts.iter().cloned().map(Step::Transfer));
    steps.push(Step::Launch(config.primary.clone()));
    steps
}

// ---------------------------------------------------------------------------
// StepStatus / StepRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Step,
    pub status: StepStatus,
    pub duration_ms: u64,
    /// Human-readable note, e.g. which processes were killed or the error.
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Not finished yet.
    Running,
    Succeeded,
    FailedAt {
        /// 1-based position of the failing step.
        step_number: usize,
        step: Step,
        kind: String,
        error: String,
    },
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// `user@host` the run targeted.
    pub target: String,
    pub dry_run: bool,
    pub steps: Vec<StepRecord>,
    pub outcome: Outcome,
}

impl RunReport {
    pub fn new(target: &str, steps: Vec<Step>) -> Self {
        RunReport {
            target: target.to_string(),
            dry_run: false,
            steps: steps
                .into_iter()
                .map(|step| StepRecord {
                    step,
                    status: StepStatus::Pending,
                    duration_ms: 0,
                    detail: None,
                })
                .collect(),
            outcome: Outcome::Running,
        }
    }

    /// Record success of the step at `index`. The run succeeds once the last
    /// step has succeeded.
    pub fn succeed(&mut self, index: usize, duration_ms: u64, detail: Option<String>) {
        if self.outcome != Outcome::Running {
            return;
        }
        if let Some(record) = self.steps.get_mut(index) {
            record.status = StepStatus::Succeeded;
            record.duration_ms = duration_ms;
            record.detail = detail;
        }
        if self.steps.iter().all(|r| r.status == StepStatus::Succeeded) {
            self.outcome = Outcome::Succeeded;
        }
    }

    /// Record failure of the step at `index` and skip everything after it.
    pub fn fail(&mut self, index: usize, duration_ms: u64, error: &DeployError) {
        if self.outcome != Outcome::Running || index >= self.steps.len() {
            return;
        }
        let record = &mut self.steps[index];
        record.status = StepStatus::Failed;
        record.duration_ms = duration_ms;
        record.detail = Some(error.to_string());
        let step = record.step.clone();

        for later in &mut self.steps[index + 1..] {
            later.status = StepStatus::Skipped;
        }
        self.outcome = Outcome::FailedAt {
            step_number: index + 1,
            step,
            kind: error.kind().to_string(),
            error: error.to_string(),
        };
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }

    /// Steps with the given status, in order.
    pub fn with_status(&self, status: StepStatus) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|r| r.status == status)
            .map(|r| &r.step)
            .collect()
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.steps.iter().map(|r| r.duration_ms).sum()
    }

    /// One-line summary, `SUCCEEDED` or `FAILED-AT-STEP-n`.
    pub fn summary(&self) -> String {
        let prefix = if self.dry_run { "[dry run] " } else { "" };
        match self.outcome {
            Outcome::Running => format!("{}{}: running", prefix, self.target),
            Outcome::Succeeded => format!(
                "{}{}: SUCCEEDED ({} steps, {} ms)",
                prefix,
                self.target,
                self.steps.len(),
                self.total_duration_ms()
            ),
            Outcome::FailedAt {
                step_number,
                ref step,
                ref error,
                ..
            } => format!(
                "{}{}: FAILED-AT-STEP-{} ({}): {} ({} skipped)",
                prefix,
                self.target,
                step_number,
                step,
                error,
                self.with_status(StepStatus::Skipped).len()
            ),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> RunReport {
        RunReport::new("root@remarkable", plan(&DeployConfig::default()))
    }

    #[test]
    fn default_plan_order() {
        let steps = plan(&DeployConfig::default());
        assert_eq!(
            steps,
            vec![
                Step::Build,
                Step::Teardown,
                Step::Transfer("tray".into()),
                Step::Transfer("wave".into()),
                Step::Launch("wave".into()),
            ]
        );
    }

    #[test]
    fn all_steps_succeeding_completes_run() {
        let mut r = report();
        for i in 0..4 {
            r.succeed(i, 10, None);
            assert_eq!(r.outcome, Outcome::Running);
        }
        r.succeed(4, 10, None);
        assert!(r.succeeded());
        assert_eq!(r.total_duration_ms(), 50);
        assert!(r.summary().contains("SUCCEEDED"));
    }

    #[test]
    fn failure_skips_remaining_steps() {
        let mut r = report();
        r.succeed(0, 5, None);
        r.succeed(1, 5, None);
        let err = DeployError::Transfer {
            artifact: "tray".into(),
            reason: "exit 1".into(),
        };
        r.fail(2, 7, &err);

        assert!(!r.succeeded());
        assert_eq!(r.with_status(StepStatus::Failed), vec![&Step::Transfer("tray".into())]);
        assert_eq!(
            r.with_status(StepStatus::Skipped),
            vec![&Step::Transfer("wave".into()), &Step::Launch("wave".into())]
        );
        match r.outcome {
            Outcome::FailedAt {
                step_number,
                ref kind,
                ..
            } => {
                assert_eq!(step_number, 3);
                assert_eq!(kind, "transfer_failure");
            }
            ref other => panic!("unexpected outcome {:?}", other),
        }
        assert!(r.summary().contains("FAILED-AT-STEP-3 (transfer(tray))"));
        assert!(r.summary().ends_with("(2 skipped)"));
    }

    #[test]
    fn terminal_outcome_is_final() {
        let mut r = report();
        r.fail(0, 1, &DeployError::Build("boom".into()));
        r.succeed(1, 1, None);
        assert_eq!(r.steps[1].status, StepStatus::Skipped);
        assert!(matches!(r.outcome, Outcome::FailedAt { step_number: 1, .. }));
    }

    #[test]
    fn json_report_shape() {
        let mut r = report();
        r.fail(0, 1, &DeployError::Build("boom".into()));
        let value: serde_json::Value = serde_json::from_str(&r.to_json().unwrap()).unwrap();
        assert_eq!(value["outcome"]["outcome"], "failed_at");
        assert_eq!(value["outcome"]["kind"], "build_failure");
        assert_eq!(value["steps"][0]["step"]["step"], "build");
        assert_eq!(value["steps"][2]["step"]["artifact"], "tray");
        assert_eq!(value["steps"][4]["status"], "skipped");
    }

    #[test]
    fn step_display() {
        assert_eq!(Step::Transfer("tray".into()).to_string(), "transfer(tray)");
        assert_eq!(Step::Launch("wave".into()).to_string(), "launch(wave)");
    }
}
