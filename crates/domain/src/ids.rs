//! Identifier helpers.
//!
//! Subsystems reference each other by opaque ids, never by pointer. Each id
//! carries a short prefix so a bare id in a log line is self-describing.

use uuid::Uuid;

/// Monotonically increasing per-profile turn number.
pub type TurnId = u64;

/// User/session namespace. All persisted artifacts are scoped by profile.
pub type ProfileId = String;

fn prefixed(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

pub fn new_trace_id() -> String {
    prefixed("tr")
}

pub fn new_job_id() -> String {
    prefixed("job")
}

pub fn new_intervention_id() -> String {
    prefixed("iv")
}

pub fn new_permission_id() -> String {
    prefixed("perm")
}
