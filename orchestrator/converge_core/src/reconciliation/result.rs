//! Per-container and per-batch reconciliation reports.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::actuate::{ActionOutcome, ActionTaken};
use super::compare::Decision;
use super::hooks::HookOutcome;

/// Stages of one container's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    PendingPreHook,
    Deciding,
    Acting,
    PendingPostHook,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::PendingPreHook => "pending-pre-hook",
            PipelineStage::Deciding => "deciding",
            PipelineStage::Acting => "acting",
            PipelineStage::PendingPostHook => "pending-post-hook",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a container ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A pre or post hook failed.
    HookFailure,
    /// The runtime or registry could not be reached.
    TransportError,
    /// A runtime action failed without removing the existing container.
    ActionFailure,
    /// The divergent container was removed and could not be recreated.
    DivergentRecreateFailure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::HookFailure => "hook failure",
            FailureKind::TransportError => "transport error",
            FailureKind::ActionFailure => "action failure",
            FailureKind::DivergentRecreateFailure => "removed but not recreated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TerminalState {
    Done,
    Failed {
        kind: FailureKind,
        /// Stage in which the pipeline stopped
        stage: PipelineStage,
        reason: String,
    },
}

impl TerminalState {
    pub fn is_failed(&self) -> bool {
        matches!(self, TerminalState::Failed { .. })
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalState::Done => f.write_str("Done"),
            TerminalState::Failed { kind, .. } => write!(f, "Failed: {}", kind),
        }
    }
}

/// Report for one declared container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub name: String,
    pub pre_hook: HookOutcome,
    /// `None` when the pipeline stopped before a decision was made.
    pub decision: Option<Decision>,
    pub action_taken: ActionTaken,
    pub action_outcome: ActionOutcome,
    /// `None` when the post-hook stage was not reached.
    pub post_hook: Option<HookOutcome>,
    pub terminal: TerminalState,
}

impl ReconciliationResult {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pre_hook: HookOutcome::Skipped,
            decision: None,
            action_taken: ActionTaken::None,
            action_outcome: ActionOutcome::NotAttempted,
            post_hook: None,
            terminal: TerminalState::Done,
        }
    }

    pub(crate) fn fail(mut self, kind: FailureKind, stage: PipelineStage, reason: String) -> Self {
        self.terminal = TerminalState::Failed {
            kind,
            stage,
            reason,
        };
        self
    }

    pub fn is_failed(&self) -> bool {
        self.terminal.is_failed()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.terminal {
            TerminalState::Failed { kind, .. } => Some(*kind),
            TerminalState::Done => None,
        }
    }

    /// Whether the host was changed by this container's action.
    pub fn changed(&self) -> bool {
        matches!(
            self.action_outcome,
            ActionOutcome::Succeeded | ActionOutcome::RemovedNotRecreated(_)
        )
    }
}

/// Aggregate report for a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Results in declared order.
    pub results: Vec<ReconciliationResult>,
    /// Containers not processed because the run halted.
    pub skipped: Vec<String>,
    pub halted: bool,
}

impl BatchResult {
    pub fn get(&self, name: &str) -> Option<&ReconciliationResult> {
        self.results.iter().find(|r| r.name == name)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ReconciliationResult> {
        self.results.iter().filter(|r| r.is_failed())
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    /// Process exit code for the run: 1 if any container failed, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }

    pub fn changed_count(&self) -> usize {
        self.results.iter().filter(|r| r.changed()).count()
    }
}

/// Check-mode report for one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub name: String,
    pub decision: Option<Decision>,
    pub action: Option<ActionTaken>,
    /// Transport error that prevented a decision.
    pub error: Option<String>,
}
