//! Hook execution for the pre/post phases of a container pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use converge_types::ContainerSpec;
use host_interface::{HookContext, HookPhase, HookRunner};

/// Result of running (or not running) one hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum HookOutcome {
    /// No task file declared for this phase.
    Skipped,
    Succeeded,
    /// Non-zero or abnormal completion, or the runner could not launch it.
    Failed(String),
}

impl HookOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, HookOutcome::Failed(_))
    }
}

impl fmt::Display for HookOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookOutcome::Skipped => f.write_str("skipped"),
            HookOutcome::Succeeded => f.write_str("succeeded"),
            HookOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Runs declared hook task files through a [`HookRunner`].
#[derive(Clone)]
pub struct HookExecutor {
    runner: Arc<dyn HookRunner>,
    /// Operator variables passed to every hook
    extra_vars: BTreeMap<String, String>,
}

impl HookExecutor {
    pub fn new(runner: Arc<dyn HookRunner>, extra_vars: BTreeMap<String, String>) -> Self {
        Self { runner, extra_vars }
    }

    fn context(&self, spec: &ContainerSpec, phase: HookPhase) -> HookContext {
        HookContext {
            container_name: spec.name.clone(),
            phase,
            image: spec
                .effective_image()
                .unwrap_or_else(|_| spec.image.clone()),
            options: spec.options.clone(),
            extra_vars: self.extra_vars.clone(),
        }
    }

    /// Run the task file at `path` for `spec`, or skip when no path is declared.
    pub async fn run(&self, path: Option<&Path>, spec: &ContainerSpec, phase: HookPhase) -> HookOutcome {
        let Some(path) = path else {
            debug!(%phase, "No hook declared");
            return HookOutcome::Skipped;
        };

        let context = self.context(spec, phase);
        match self.runner.execute(path, &context).await {
            Ok(output) if output.success() => {
                info!(%phase, task = %path.display(), "Hook succeeded");
                HookOutcome::Succeeded
            }
            Ok(output) => {
                let reason = match (output.exit_code, output.diagnostics.trim()) {
                    (Some(code), "") => format!("exited with code {}", code),
                    (None, "") => "terminated abnormally".to_string(),
                    (_, diagnostics) => diagnostics.to_string(),
                };
                warn!(%phase, task = %path.display(), exit = ?output.exit_code, "Hook failed");
                HookOutcome::Failed(reason)
            }
            Err(e) => {
                warn!(%phase, task = %path.display(), error = %e, "Hook could not be run");
                HookOutcome::Failed(e.to_string())
            }
        }
    }
}
