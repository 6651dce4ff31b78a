//! Kubernetes-style status conditions
//!
//! Every CRD status carries a list of conditions. Condition types used by the
//! controllers are collected in [`condition_type`], reasons in [`reason`].

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition types
pub mod condition_type {
    pub const READY: &str = "Ready";
    pub const EXECUTING: &str = "Executing";
    pub const SUCCEEDED: &str = "Succeeded";
    pub const FAILED: &str = "Failed";
    pub const CANCELED: &str = "Canceled";
    pub const VALID_MAPPING: &str = "ValidMapping";
    pub const CONNECTION_TEST_SUCCEEDED: &str = "ConnectionTestSucceeded";
}

/// Condition reasons
pub mod reason {
    pub const READY: &str = "Ready";
    pub const NO_VALID_VMS: &str = "NoValidVMs";
    pub const VM_NOT_FOUND: &str = "VMNotFound";
    pub const MAP_NOT_READY: &str = "MapNotReady";
    pub const MAP_CREATED: &str = "MapCreated";
    pub const PROVIDER_NOT_READY: &str = "ProviderNotReady";
    pub const INVENTORY_ERROR: &str = "InventoryError";
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    pub const CONFIGURATION_ERROR: &str = "ConfigurationError";
    pub const STARTED: &str = "Started";
    pub const COMPLETED: &str = "Completed";
    pub const CANCELED: &str = "Canceled";
    pub const FAILED: &str = "Failed";
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., Ready, Executing)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Shorthand for a `True` condition
    pub fn truthy(type_: &str, reason: &str, message: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::True, reason, message)
    }

    /// Shorthand for a `False` condition
    pub fn falsy(type_: &str, reason: &str, message: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::False, reason, message)
    }
}

/// Find a condition by type.
pub fn find<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// True when the condition exists with status `True`.
pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    find(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// Insert or replace a condition.
///
/// The transition time is kept when the status did not change so that
/// repeated reconciles produce identical status patches.
pub fn set(conditions: &mut Vec<Condition>, mut condition: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        if existing.status == condition.status {
            condition.last_transition_time = existing.last_transition_time;
        }
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}

/// Remove a condition by type. Returns true when something was removed.
pub fn remove(conditions: &mut Vec<Condition>, type_: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.type_ != type_);
    before != conditions.len()
}
