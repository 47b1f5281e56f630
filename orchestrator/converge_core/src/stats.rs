//! Run statistics file.
//!
//! A small JSON summary of a reconciliation run, written for wrappers and
//! CI jobs that need to know whether the run went cleanly without parsing
//! the full report.
//!
//! Containers whose runtime or registry could not be reached are counted as
//! `unreachable` rather than as `failures`, so a wrapper can decide for
//! itself whether to tolerate them.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::reconciliation::{ActionOutcome, BatchResult, FailureKind};

const KNOWN_FIELDS: [&str; 7] = [
    "num_failures",
    "failures",
    "num_unreachable",
    "unreachable",
    "num_degraded",
    "degraded",
    "halted",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunStats {
    pub num_failures: usize,
    /// Names of containers that failed for any reason other than an unreachable runtime
    pub failures: Vec<String>,
    pub num_unreachable: usize,
    /// Names of containers that failed with a transport error
    pub unreachable: Vec<String>,
    pub num_degraded: usize,
    /// Names of containers removed but not recreated
    pub degraded: Vec<String>,
    pub halted: bool,
}

impl RunStats {
    pub fn from_batch(batch: &BatchResult) -> Self {
        let (unreachable, failures): (Vec<_>, Vec<_>) = batch
            .failed()
            .partition(|r| r.failure_kind() == Some(FailureKind::TransportError));
        let failures: Vec<String> = failures.into_iter().map(|r| r.name.clone()).collect();
        let unreachable: Vec<String> = unreachable.into_iter().map(|r| r.name.clone()).collect();
        let degraded: Vec<String> = batch
            .results
            .iter()
            .filter(|r| matches!(r.action_outcome, ActionOutcome::RemovedNotRecreated(_)))
            .map(|r| r.name.clone())
            .collect();

        Self {
            num_failures: failures.len(),
            failures,
            num_unreachable: unreachable.len(),
            unreachable,
            num_degraded: degraded.len(),
            degraded,
            halted: batch.halted,
        }
    }

    /// True when nothing failed and the run was not halted. Unreachable
    /// containers do not count.
    pub fn completed_without_failures(&self) -> bool {
        self.num_failures == 0 && !self.halted
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        debug!(path = %path.display(), "Wrote run statistics");
        Ok(())
    }

    /// Read a statistics file. Missing fields take defaults, unknown fields
    /// are logged and ignored. Returns `None` if the file cannot be read or
    /// is not a JSON object.
    pub fn from_json(path: &Path) -> Option<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read run statistics");
                return None;
            }
        };

        let value: Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to parse run statistics");
                return None;
            }
        };

        if let Value::Object(map) = &value {
            for key in map.keys().filter(|k| !KNOWN_FIELDS.contains(&k.as_str())) {
                warn!(field = %key, "Ignoring unknown run statistics field");
            }
        }

        match serde_json::from_value(value) {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Invalid run statistics");
                None
            }
        }
    }
}
