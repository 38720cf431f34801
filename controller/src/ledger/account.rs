use super::entry::remaining_quota;
use super::reset::{latest_boundary, next_month_day};
use chrono::{DateTime, Utc};
use policy::{UserAccount, UserId};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Point-in-time copy of one user's aggregate counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub user_id: UserId,
    pub upload_bytes: u64,
    pub download_bytes: u64,
    pub billed_bytes: u64,
    pub flow_limit: u64,
    pub next_reset_at: Option<DateTime<Utc>>,
    pub last_reset_at: Option<DateTime<Utc>>,
    pub revision: u64,
}

impl AccountSnapshot {
    pub fn remaining(&self) -> i64 {
        remaining_quota(self.flow_limit, self.billed_bytes)
    }
}

/// Account counters after any due reset, with the active forwards summed over
/// the user's grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSettled {
    pub snapshot: AccountSnapshot,
    pub active_forwards: u32,
    pub reset_applied: bool,
}

#[derive(Debug)]
pub(crate) struct AccountEntry {
    pub user_id: UserId,
    pub flow_limit: u64,
    pub upload_bytes: u64,
    pub download_bytes: u64,
    pub billed_bytes: u64,
    pub reset_day: Option<u32>,
    pub next_reset_at: Option<DateTime<Utc>>,
    pub last_reset_at: Option<DateTime<Utc>>,
    pub revision: u64,
}

impl AccountEntry {
    pub fn new(account: &UserAccount, now: DateTime<Utc>) -> Self {
        let reset_day = account.reset_day();
        Self {
            user_id: account.id(),
            flow_limit: account.flow,
            upload_bytes: 0,
            download_bytes: 0,
            billed_bytes: 0,
            reset_day,
            next_reset_at: reset_day.and_then(|day| next_month_day(now, day)),
            last_reset_at: None,
            revision: 0,
        }
    }

    pub fn restore(account: &UserAccount, snapshot: &AccountSnapshot) -> Self {
        Self {
            user_id: snapshot.user_id,
            flow_limit: account.flow,
            upload_bytes: snapshot.upload_bytes,
            download_bytes: snapshot.download_bytes,
            billed_bytes: snapshot.billed_bytes,
            reset_day: account.reset_day(),
            next_reset_at: snapshot.next_reset_at,
            last_reset_at: snapshot.last_reset_at,
            revision: snapshot.revision,
        }
    }

    /// Refreshes the account limits. A changed reset day restarts the cycle
    /// from `now`.
    pub fn update_terms(&mut self, account: &UserAccount, now: DateTime<Utc>) {
        self.flow_limit = account.flow;
        let reset_day = account.reset_day();
        if reset_day != self.reset_day {
            self.reset_day = reset_day;
            self.next_reset_at = reset_day.and_then(|day| next_month_day(now, day));
        }
        self.revision += 1;
    }

    /// Applies the latest reset boundary at or before `now`, collapsing missed
    /// months into one reset.
    pub fn apply_due_reset(&mut self, now: DateTime<Utc>) -> bool {
        let (Some(due), Some(day)) = (self.next_reset_at, self.reset_day) else {
            return false;
        };
        if now < due {
            return false;
        }
        let (boundary, next) = latest_boundary(due, now, |from| next_month_day(from, day));
        if next.is_none() {
            warn!(user_id = self.user_id, day, "No next account reset instant, further resets are off");
        }
        self.zero_counters(boundary);
        self.next_reset_at = next;
        true
    }

    pub fn zero_counters(&mut self, at: DateTime<Utc>) {
        self.upload_bytes = 0;
        self.download_bytes = 0;
        self.billed_bytes = 0;
        self.last_reset_at = Some(at);
        self.revision += 1;
    }

    /// Adds usage already billed by one of the user's grants.
    pub fn charge(&mut self, upload: u64, download: u64, billed: u64) {
        self.upload_bytes = self.upload_bytes.saturating_add(upload);
        self.download_bytes = self.download_bytes.saturating_add(download);
        self.billed_bytes = self.billed_bytes.saturating_add(billed);
        self.revision += 1;
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            user_id: self.user_id,
            upload_bytes: self.upload_bytes,
            download_bytes: self.download_bytes,
            billed_bytes: self.billed_bytes,
            flow_limit: self.flow_limit,
            next_reset_at: self.next_reset_at,
            last_reset_at: self.last_reset_at,
            revision: self.revision,
        }
    }
}
