use crate::model::{GrantId, RateLimitParams, SpeedRuleId, TunnelId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Usage delta reported by a data-plane node for one grant.
///
/// Byte fields are signed because they come straight off the wire; the ledger
/// rejects negative values. `sequence` is optional and, when present, must grow
/// per grant so duplicated deliveries can be dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub grant_id: GrantId,
    pub upload_bytes: i64,
    pub download_bytes: i64,
    pub active_forwards: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sequence: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisableReason {
    DisabledByAdmin,
    Expired,
    QuotaExceeded,
    LimitExceeded,
    SpeedRuleUnresolved(SpeedRuleId),
    Revoked,
}

impl fmt::Display for DisableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisableReason::DisabledByAdmin => f.write_str("disabled by admin"),
            DisableReason::Expired => f.write_str("grant expired"),
            DisableReason::QuotaExceeded => f.write_str("flow quota exceeded"),
            DisableReason::LimitExceeded => f.write_str("forward limit reached"),
            DisableReason::SpeedRuleUnresolved(id) => {
                write!(f, "speed limit rule {} unresolved", id)
            }
            DisableReason::Revoked => f.write_str("grant revoked"),
        }
    }
}

/// Command issued to the node collaborator that enforces a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NodeCommand {
    Enable {
        tunnel_id: TunnelId,
        grant_id: GrantId,
        rate_limit: Option<RateLimitParams>,
    },
    Disable {
        tunnel_id: TunnelId,
        grant_id: GrantId,
        reason: DisableReason,
    },
}

impl NodeCommand {
    pub fn tunnel_id(&self) -> TunnelId {
        match self {
            NodeCommand::Enable { tunnel_id, .. } | NodeCommand::Disable { tunnel_id, .. } => {
                *tunnel_id
            }
        }
    }

    pub fn grant_id(&self) -> GrantId {
        match self {
            NodeCommand::Enable { grant_id, .. } | NodeCommand::Disable { grant_id, .. } => {
                *grant_id
            }
        }
    }

    pub fn is_enable(&self) -> bool {
        matches!(self, NodeCommand::Enable { .. })
    }
}

impl fmt::Display for NodeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeCommand::Enable {
                tunnel_id,
                grant_id,
                rate_limit: Some(rate),
            } => write!(
                f,
                "enable tunnel {} for grant {} at {} B/s",
                tunnel_id, grant_id, rate.bytes_per_second
            ),
            NodeCommand::Enable {
                tunnel_id,
                grant_id,
                rate_limit: None,
            } => write!(f, "enable tunnel {} for grant {} unrestricted", tunnel_id, grant_id),
            NodeCommand::Disable {
                tunnel_id,
                grant_id,
                reason,
            } => write!(f, "disable tunnel {} for grant {}: {}", tunnel_id, grant_id, reason),
        }
    }
}
