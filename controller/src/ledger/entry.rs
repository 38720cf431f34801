use super::ResetSchedule;
use super::reset::latest_boundary;
use chrono::{DateTime, Utc};
use super::AccountSnapshot;
use policy::{Billing, GrantId, UserId};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Quota left under `limit` after `billed` bytes. Negative once over quota.
pub fn remaining_quota(limit: u64, billed: u64) -> i64 {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let billed = i64::try_from(billed).unwrap_or(i64::MAX);
    limit.saturating_sub(billed)
}

/// Point-in-time copy of one grant's ledger entry.
///
/// `revision` grows with every mutation so persisted copies can be ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub grant_id: GrantId,
    pub upload_bytes: u64,
    pub download_bytes: u64,
    pub billed_bytes: u64,
    pub flow_limit: u64,
    pub active_forwards: u32,
    pub next_reset_at: Option<DateTime<Utc>>,
    pub last_reset_at: Option<DateTime<Utc>>,
    pub last_sequence: Option<u64>,
    pub revision: u64,
}

impl UsageSnapshot {
    pub fn remaining(&self) -> i64 {
        remaining_quota(self.flow_limit, self.billed_bytes)
    }
}

/// Result of applying a usage delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageResult {
    pub snapshot: UsageSnapshot,
    pub billed_delta: u64,
    pub reset_applied: bool,
    /// Counters of the owning user's account, when the user has one.
    pub account: Option<AccountSnapshot>,
}

impl UsageResult {
    pub fn remaining(&self) -> i64 {
        self.snapshot.remaining()
    }
}

/// Snapshot taken after any due reset has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    pub snapshot: UsageSnapshot,
    pub reset_applied: bool,
}

#[derive(Debug)]
pub(crate) struct LedgerEntry {
    pub grant_id: GrantId,
    pub user_id: UserId,
    pub billing: Billing,
    pub flow_limit: u64,
    pub upload_bytes: u64,
    pub download_bytes: u64,
    pub billed_bytes: u64,
    pub active_forwards: u32,
    /// Reset instant last written by an admin; a change re-anchors the cycle.
    pub configured_reset_at: Option<DateTime<Utc>>,
    pub next_reset_at: Option<DateTime<Utc>>,
    pub last_reset_at: Option<DateTime<Utc>>,
    pub last_sequence: Option<u64>,
    pub revision: u64,
}

impl LedgerEntry {
    pub fn new(
        grant_id: GrantId,
        user_id: UserId,
        billing: Billing,
        flow_limit: u64,
        reset_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            grant_id,
            user_id,
            billing,
            flow_limit,
            upload_bytes: 0,
            download_bytes: 0,
            billed_bytes: 0,
            active_forwards: 0,
            configured_reset_at: reset_at,
            next_reset_at: reset_at,
            last_reset_at: None,
            last_sequence: None,
            revision: 0,
        }
    }

    pub fn restore(
        user_id: UserId,
        billing: Billing,
        configured_reset_at: Option<DateTime<Utc>>,
        snapshot: &UsageSnapshot,
    ) -> Self {
        Self {
            grant_id: snapshot.grant_id,
            user_id,
            billing,
            flow_limit: snapshot.flow_limit,
            upload_bytes: snapshot.upload_bytes,
            download_bytes: snapshot.download_bytes,
            billed_bytes: snapshot.billed_bytes,
            active_forwards: snapshot.active_forwards,
            configured_reset_at,
            next_reset_at: snapshot.next_reset_at,
            last_reset_at: snapshot.last_reset_at,
            last_sequence: snapshot.last_sequence,
            revision: snapshot.revision,
        }
    }

    /// Refreshes billing terms. Counters survive; a changed admin reset instant
    /// replaces the running schedule.
    pub fn update_terms(&mut self, billing: Billing, flow_limit: u64, reset_at: Option<DateTime<Utc>>) {
        self.billing = billing;
        self.flow_limit = flow_limit;
        if reset_at != self.configured_reset_at {
            self.configured_reset_at = reset_at;
            self.next_reset_at = reset_at;
        }
        self.revision += 1;
    }

    /// Applies every reset boundary at or before `now`. Several missed cycles
    /// collapse into one reset anchored at the latest boundary.
    pub fn apply_due_reset(&mut self, now: DateTime<Utc>, schedule: &ResetSchedule) -> bool {
        let Some(due) = self.next_reset_at else {
            return false;
        };
        if now < due {
            return false;
        }

        let anchor = self.configured_reset_at;
        let (boundary, next) = latest_boundary(due, now, |from| schedule.next_after(from, anchor));
        if next.is_none() {
            warn!(
                grant_id = self.grant_id,
                ?schedule,
                "Reset schedule produced no next instant, further resets are off"
            );
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

    pub fn accumulate(&mut self, upload: u64, download: u64) -> u64 {
        let billed = self.billing.billable_bytes(upload, download);
        self.upload_bytes = self.upload_bytes.saturating_add(upload);
        self.download_bytes = self.download_bytes.saturating_add(download);
        self.billed_bytes = self.billed_bytes.saturating_add(billed);
        self.revision += 1;
        billed
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            grant_id: self.grant_id,
            upload_bytes: self.upload_bytes,
            download_bytes: self.download_bytes,
            billed_bytes: self.billed_bytes,
            flow_limit: self.flow_limit,
            active_forwards: self.active_forwards,
            next_reset_at: self.next_reset_at,
            last_reset_at: self.last_reset_at,
            last_sequence: self.last_sequence,
            revision: self.revision,
        }
    }
}
