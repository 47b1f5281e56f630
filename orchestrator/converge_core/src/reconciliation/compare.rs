//! Reconciliation Compare Module
//!
//! The compare phase decides, for one declared container, whether the host
//! already matches the declaration. It never talks to the runtime: the
//! observed state is sensed beforehand and passed in.
//!
//! # Key Invariants
//!
//! - **Deterministic**: Same inputs always produce same outputs
//! - **Presence first**: `Diverges` is only produced for a present container
//! - **Order-insensitive**: env, ports, volumes, capabilities, sysctls and
//!   ulimits compare as sets or maps; `command` compares as an ordered vector

use converge_types::{canonical_image, ComparedField, ContainerSpec, RuntimeState};
use serde::{Deserialize, Serialize};

/// Outcome of comparing a declared spec against the observed container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// No container with the declared name exists.
    Absent,

    /// Every compared field equals the declaration.
    Matches,

    /// At least one compared field differs.
    Diverges {
        /// Fields that differ, in comparison order. Reporting only.
        fields: Vec<ComparedField>,
    },
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Absent => "absent",
            Decision::Matches => "matches",
            Decision::Diverges { .. } => "diverges",
        }
    }
}

/// Image reference the declaration resolves to, in canonical form.
fn declared_image(spec: &ContainerSpec) -> String {
    let effective = spec
        .effective_image()
        .unwrap_or_else(|_| spec.image.trim().to_string());
    canonical_image(&effective)
}

fn field_matches(field: ComparedField, spec: &ContainerSpec, observed: &RuntimeState) -> bool {
    let want = &spec.options;
    let have = &observed.options;

    match field {
        ComparedField::Image => declared_image(spec) == canonical_image(&observed.image),
        ComparedField::Command => want.command == have.command,
        ComparedField::Env => want.env == have.env,
        ComparedField::Ports => want.ports == have.ports,
        ComparedField::Volumes => want.volumes == have.volumes,
        ComparedField::NetworkMode => want.network_mode == have.network_mode,
        ComparedField::Capabilities => want.capabilities == have.capabilities,
        ComparedField::Privileged => want.privileged == have.privileged,
        ComparedField::RestartPolicy => want.restart_policy == have.restart_policy,
        ComparedField::ShmSize => want.shm_size == have.shm_size,
        ComparedField::Sysctls => want.sysctls == have.sysctls,
        ComparedField::Ulimits => want.ulimits == have.ulimits,
        ComparedField::User => want.user == have.user,
        ComparedField::PidMode => want.pid_mode == have.pid_mode,
        ComparedField::IpcMode => want.ipc_mode == have.ipc_mode,
        ComparedField::Init => want.init == have.init,
    }
}

/// Decide what the host needs for `spec` given what was observed.
///
/// Only the spec's compared fields (its `comparisons` override, or the
/// defaults) take part. A field listed twice is reported once.
pub fn decide(spec: &ContainerSpec, observed: Option<&RuntimeState>) -> Decision {
    let Some(observed) = observed else {
        return Decision::Absent;
    };

    let mut fields: Vec<ComparedField> = Vec::new();
    for &field in spec.compared_fields() {
        if !fields.contains(&field) && !field_matches(field, spec, observed) {
            fields.push(field);
        }
    }

    if fields.is_empty() {
        Decision::Matches
    } else {
        Decision::Diverges { fields }
    }
}
