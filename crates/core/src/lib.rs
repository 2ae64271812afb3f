//! pakt core types: package condition model and wait errors

#![forbid(unsafe_code)]

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Status of a named condition as reported on a package resource.
/// Anything the cluster reports outside True/False maps to Unknown.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }

    pub fn is_true(self) -> bool {
        matches!(self, ConditionStatus::True)
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Condition kinds the harness cares about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConditionKind {
    Installed,
    Healthy,
}

impl ConditionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionKind::Installed => "Installed",
            ConditionKind::Healthy => "Healthy",
        }
    }
}

/// Target activation state assigned to a package revision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DesiredState {
    Active,
    Inactive,
}

impl DesiredState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Active" => Some(DesiredState::Active),
            "Inactive" => Some(DesiredState::Inactive),
            _ => None,
        }
    }
}

/// Read-only view predicates use to inspect a fetched item. Keeps the
/// polling layer decoupled from the concrete resource schema.
pub trait PackageView {
    /// Object name, for diagnostics.
    fn name(&self) -> &str;
    /// Status of the given condition; absent conditions read Unknown.
    fn condition(&self, kind: ConditionKind) -> ConditionStatus;
    /// Desired activation state (revisions only).
    fn desired_state(&self) -> Option<DesiredState>;
    /// Package identity string (revisions only).
    fn package(&self) -> Option<&str>;
}

/// Lightweight carrier parsed out of a raw cluster object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LitePackage {
    pub name: String,
    pub package: Option<String>,
    pub desired_state: Option<DesiredState>,
    pub creation_ts: i64,
    /// Raw condition type -> status pairs as reported by the cluster.
    pub conditions: SmallVec<[(String, ConditionStatus); 4]>,
}

impl LitePackage {
    /// Extract the fields the harness inspects from a raw JSON object.
    /// Missing fields degrade to empty/Unknown rather than erroring: a
    /// half-populated object is a normal sight mid-reconcile.
    pub fn from_raw(raw: &serde_json::Value) -> Self {
        let meta = raw.get("metadata");
        let name = meta
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let creation_ts = meta
            .and_then(|m| m.get("creationTimestamp"))
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp())
            .unwrap_or(0);
        let spec = raw.get("spec");
        let package = spec
            .and_then(|s| s.get("package"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let desired_state = spec
            .and_then(|s| s.get("desiredState"))
            .and_then(|v| v.as_str())
            .and_then(DesiredState::parse);
        let mut conditions: SmallVec<[(String, ConditionStatus); 4]> = SmallVec::new();
        if let Some(list) = raw
            .get("status")
            .and_then(|s| s.get("conditions"))
            .and_then(|v| v.as_array())
        {
            for c in list {
                let ty = c.get("type").and_then(|v| v.as_str());
                let status = c.get("status").and_then(|v| v.as_str());
                if let (Some(ty), Some(status)) = (ty, status) {
                    conditions.push((ty.to_string(), ConditionStatus::parse(status)));
                }
            }
        }
        Self { name, package, desired_state, creation_ts, conditions }
    }
}

impl PackageView for LitePackage {
    fn name(&self) -> &str {
        &self.name
    }

    fn condition(&self, kind: ConditionKind) -> ConditionStatus {
        self.conditions
            .iter()
            .find(|(ty, _)| ty == kind.as_str())
            .map(|(_, st)| *st)
            .unwrap_or(ConditionStatus::Unknown)
    }

    fn desired_state(&self) -> Option<DesiredState> {
        self.desired_state
    }

    fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }
}

/// Terminal outcomes of a wait. "Not yet satisfied" is the retry signal,
/// never an error; only these four end a poll.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("listing packages failed: {0}")]
    Transport(#[from] anyhow::Error),
    #[error("condition not met within {timeout:?} ({attempts} attempts over {elapsed:?})")]
    TimedOut {
        timeout: Duration,
        elapsed: Duration,
        attempts: u32,
    },
    #[error("wait cancelled")]
    Cancelled,
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revision_json(name: &str, pkg: &str, state: &str, healthy: &str) -> serde_json::Value {
        serde_json::json!({
            "metadata": { "name": name, "creationTimestamp": "2024-03-01T10:00:00Z" },
            "spec": { "package": pkg, "desiredState": state },
            "status": { "conditions": [ { "type": "Healthy", "status": healthy } ] }
        })
    }

    #[test]
    fn parses_revision_fields() {
        let raw = revision_json("prov-abc123", "registry/prov:v2", "Active", "True");
        let p = LitePackage::from_raw(&raw);
        assert_eq!(p.name, "prov-abc123");
        assert_eq!(p.package.as_deref(), Some("registry/prov:v2"));
        assert_eq!(p.desired_state, Some(DesiredState::Active));
        assert!(p.creation_ts > 0);
        assert!(p.condition(ConditionKind::Healthy).is_true());
    }

    #[test]
    fn absent_condition_reads_unknown() {
        let raw = serde_json::json!({ "metadata": { "name": "p" } });
        let p = LitePackage::from_raw(&raw);
        assert_eq!(p.condition(ConditionKind::Installed), ConditionStatus::Unknown);
        assert_eq!(p.condition(ConditionKind::Healthy), ConditionStatus::Unknown);
        assert!(p.desired_state.is_none());
        assert!(p.package.is_none());
    }

    #[test]
    fn odd_status_strings_map_to_unknown() {
        assert_eq!(ConditionStatus::parse("True"), ConditionStatus::True);
        assert_eq!(ConditionStatus::parse("False"), ConditionStatus::False);
        assert_eq!(ConditionStatus::parse("true"), ConditionStatus::Unknown);
        assert_eq!(ConditionStatus::parse(""), ConditionStatus::Unknown);
    }

    #[test]
    fn desired_state_parse_rejects_unknown_values() {
        assert_eq!(DesiredState::parse("Active"), Some(DesiredState::Active));
        assert_eq!(DesiredState::parse("Inactive"), Some(DesiredState::Inactive));
        assert_eq!(DesiredState::parse("active"), None);
    }
}
