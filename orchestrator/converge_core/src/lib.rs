//! Core of the converge engine.
//!
//! Given an ordered list of declared containers, [`Reconciler`] drives the
//! host's container runtime until each container matches its declaration,
//! running declared hooks around every container action.

pub mod reconciliation;
pub mod stats;

pub use reconciliation::{
    decide, ActionOutcome, ActionTaken, BatchResult, Decision, FailureKind, HookOutcome,
    PipelineStage, PlanEntry, ReconcileError, ReconcileOptions, Reconciler, ReconciliationResult,
    TerminalState,
};
pub use stats::RunStats;
