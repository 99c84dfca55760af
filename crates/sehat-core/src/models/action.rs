//! Queued action model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Identifier of a queued action.
///
/// Assigned by the storage engine at enqueue time. Ids grow monotonically and
/// are never reused, even after the action is purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(i64);

impl ActionId {
    /// Wrap a raw row id.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw row id.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Kind of user action awaiting delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// A meal added to the nutrition log
    NutritionLogEntry,
    /// The nutrition log shared with a community health worker
    ChwShare,
}

impl ActionKind {
    /// Stable tag stored in the queue table.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NutritionLogEntry => "nutrition-log-entry",
            Self::ChwShare => "chw-share",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nutrition-log-entry" => Ok(Self::NutritionLogEntry),
            "chw-share" => Ok(Self::ChwShare),
            other => Err(Error::CorruptRecord(format!("unknown action kind '{other}'"))),
        }
    }
}

/// Delivery status of a queued action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Waiting for delivery
    Pending,
    /// Delivery attempt in progress
    InFlight,
    /// Acknowledged by the endpoint, awaiting purge
    Synced,
    /// Retry ceiling exceeded, needs a manual retry
    Failed,
}

impl ActionStatus {
    /// Stable value stored in the queue table.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(Error::CorruptRecord(format!(
                "unknown action status '{other}'"
            ))),
        }
    }
}

/// A durably recorded user action awaiting delivery to the sync endpoint.
///
/// The queue tracks delivery only. The data of record (nutrition entries,
/// shares) lives in the key/value store and outlives the queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAction {
    /// Unique, monotonically assigned id
    pub id: ActionId,
    /// Action type tag
    pub kind: ActionKind,
    /// Opaque payload specific to `kind`
    pub payload: serde_json::Value,
    /// Local creation timestamp (Unix ms)
    pub created_at: i64,
    /// Delivery status
    pub status: ActionStatus,
    /// Delivery attempts so far
    pub attempts: u32,
    /// Description of the last failed attempt
    pub last_error: Option<String>,
}

impl QueuedAction {
    /// Whether the action still needs delivery (pending or in flight).
    pub const fn is_unsynced(&self) -> bool {
        matches!(self.status, ActionStatus::Pending | ActionStatus::InFlight)
    }

    /// Whether the action was abandoned and needs user attention.
    pub const fn needs_attention(&self) -> bool {
        matches!(self.status, ActionStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_kind_round_trips_through_tag() {
        for kind in [ActionKind::NutritionLogEntry, ActionKind::ChwShare] {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), kind);
        }
        assert!("sms-share".parse::<ActionKind>().is_err());
    }

    #[test]
    fn action_status_serializes_as_snake_case() {
        let json = serde_json::to_string(&ActionStatus::InFlight).unwrap();
        assert_eq!(json, "\"in_flight\"");
        assert_eq!(
            "in_flight".parse::<ActionStatus>().unwrap(),
            ActionStatus::InFlight
        );
    }

    #[test]
    fn action_id_parse() {
        assert_eq!(" 42 ".parse::<ActionId>().unwrap(), ActionId::new(42));
        assert!("abc".parse::<ActionId>().is_err());
    }
}
