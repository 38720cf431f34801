use super::{AuditedRecord, GrantId, SpeedRuleId, TunnelId, UserId};
use crate::error::PolicyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Admin-set switch, independent of quota and expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantStatus {
    Disabled,
    Enabled,
}

impl GrantStatus {
    pub fn code(self) -> i32 {
        match self {
            GrantStatus::Disabled => 0,
            GrantStatus::Enabled => 1,
        }
    }
}

impl TryFrom<i32> for GrantStatus {
    type Error = PolicyError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GrantStatus::Disabled),
            1 => Ok(GrantStatus::Enabled),
            other => Err(PolicyError::UnknownCode {
                field: "status",
                value: other.into(),
            }),
        }
    }
}

/// Quota and policy assigned to one user on one tunnel.
///
/// `flow` and `num` use zero as the "no cap" sentinel. `flow_reset_time` is the
/// instant of the next scheduled reset, `None` for grants that never reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTunnelGrant {
    pub record: AuditedRecord,
    pub user_id: UserId,
    pub tunnel_id: TunnelId,
    pub flow: u64,
    pub num: u32,
    pub flow_reset_time: Option<DateTime<Utc>>,
    pub exp_time: DateTime<Utc>,
    pub status: GrantStatus,
    pub speed_id: Option<SpeedRuleId>,
}

impl UserTunnelGrant {
    pub fn id(&self) -> GrantId {
        self.record.id
    }

    pub fn is_flow_capped(&self) -> bool {
        self.flow > 0
    }

    pub fn is_forward_capped(&self) -> bool {
        self.num > 0
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.exp_time
    }
}
