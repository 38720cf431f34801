use crate::message::DisableReason;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Verdict on whether a grant's tunnel should currently forward traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Enabled,
    DisabledByAdmin,
    Expired,
    QuotaExceeded,
    LimitExceeded,
}

impl Decision {
    pub fn is_enabled(self) -> bool {
        matches!(self, Decision::Enabled)
    }

    pub fn disable_reason(self) -> Option<DisableReason> {
        match self {
            Decision::Enabled => None,
            Decision::DisabledByAdmin => Some(DisableReason::DisabledByAdmin),
            Decision::Expired => Some(DisableReason::Expired),
            Decision::QuotaExceeded => Some(DisableReason::QuotaExceeded),
            Decision::LimitExceeded => Some(DisableReason::LimitExceeded),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Decision::Enabled => "ENABLED",
            Decision::DisabledByAdmin => "DISABLED_BY_ADMIN",
            Decision::Expired => "EXPIRED",
            Decision::QuotaExceeded => "QUOTA_EXCEEDED",
            Decision::LimitExceeded => "LIMIT_EXCEEDED",
        };
        f.write_str(label)
    }
}
