//! Hook runner executing task files with an external program.
//!
//! By default task files are Ansible playbooks run with `ansible-playbook`.
//! The hook context is passed as JSON through `--extra-vars`: container data
//! under the `converge` key, operator variables at the top level.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::process::Command;
use tracing::{debug, info, warn};

use converge_types::{ConvergeError, Result};
use host_interface::{HookContext, HookRunOutput, HookRunner};

/// Number of trailing output lines kept as diagnostics.
const DIAGNOSTIC_LINES: usize = 40;

/// Configuration for [`PlaybookHookRunner`].
#[derive(Debug, Clone)]
pub struct PlaybookConfig {
    /// Program that executes a task file (default: "ansible-playbook")
    pub program: PathBuf,
    /// Arguments placed before the task file path
    pub extra_args: Vec<String>,
    /// Upper bound on a single hook run (default: 30m)
    pub timeout: Duration,
}

impl Default for PlaybookConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ansible-playbook"),
            extra_args: Vec::new(),
            timeout: Duration::from_secs(1800),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlaybookHookRunner {
    config: PlaybookConfig,
}

impl PlaybookHookRunner {
    pub fn new(config: PlaybookConfig) -> Self {
        Self { config }
    }

    /// JSON document passed through `--extra-vars`.
    pub fn extra_vars_document(context: &HookContext) -> Result<String> {
        let container = serde_json::to_value(context)
            .map_err(|e| ConvergeError::HookError(format!("encoding hook context: {}", e)))?;

        let mut document: Map<String, Value> = context
            .extra_vars
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        document.insert("converge".to_string(), container);

        Ok(json!(document).to_string())
    }
}

/// Keep the tail of the combined output.
fn tail_lines(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let start = lines.len().saturating_sub(DIAGNOSTIC_LINES);
    lines[start..].join("\n")
}

#[async_trait]
impl HookRunner for PlaybookHookRunner {
    async fn execute(&self, task_file: &Path, context: &HookContext) -> Result<HookRunOutput> {
        let is_file = tokio::fs::metadata(task_file)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(ConvergeError::HookError(format!(
                "task file {} does not exist",
                task_file.display()
            )));
        }

        let extra_vars = Self::extra_vars_document(context)?;
        info!(
            container = %context.container_name,
            phase = %context.phase,
            task = %task_file.display(),
            "Running hook"
        );

        let child = Command::new(&self.config.program)
            .args(&self.config.extra_args)
            .arg(task_file)
            .arg("--extra-vars")
            .arg(&extra_vars)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.config.timeout, child).await {
            Ok(result) => result.map_err(|e| {
                ConvergeError::HookError(format!(
                    "failed to run {:?}: {}",
                    self.config.program, e
                ))
            })?,
            Err(_) => {
                warn!(task = %task_file.display(), "Hook timed out");
                return Ok(HookRunOutput {
                    exit_code: None,
                    diagnostics: format!(
                        "hook timed out after {}s",
                        self.config.timeout.as_secs()
                    ),
                });
            }
        };

        let diagnostics = tail_lines(&output.stdout, &output.stderr);
        debug!(exit = ?output.status.code(), "Hook finished");

        Ok(HookRunOutput {
            exit_code: output.status.code(),
            diagnostics,
        })
    }
}
