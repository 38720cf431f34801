use super::{AuditedRecord, GrantStatus, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account-wide limits shared by every grant a user holds.
///
/// `flow` caps the billed bytes summed over all the user's grants and `num`
/// caps their summed active forwards; zero means no cap for either.
/// `flow_reset_day` is the day of the month the aggregate counters reset on,
/// zero for accounts that never reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub record: AuditedRecord,
    pub name: String,
    pub flow: u64,
    pub num: u32,
    pub flow_reset_day: u32,
    pub exp_time: DateTime<Utc>,
    pub status: GrantStatus,
}

impl UserAccount {
    pub fn id(&self) -> UserId {
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

    pub fn reset_day(&self) -> Option<u32> {
        (self.flow_reset_day > 0).then_some(self.flow_reset_day)
    }
}
