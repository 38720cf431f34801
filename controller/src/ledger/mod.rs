mod account;
mod entry;
mod reset;

pub use account::{AccountSettled, AccountSnapshot};
pub use entry::{Settled, UsageResult, UsageSnapshot, remaining_quota};
pub use reset::ResetSchedule;

use crate::error::{ConsistencyError, ControllerError, Result};
use chrono::{DateTime, Utc};
use account::AccountEntry;
use dashmap::DashMap;
use entry::LedgerEntry;
use parking_lot::Mutex;
use policy::{GrantId, Tunnel, UsageReport, UserAccount, UserId, UserTunnelGrant};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Per-grant usage counters and flow-reset cycles, plus the aggregate counters
/// of users that have an account.
///
/// Every entry sits behind its own lock, so reports for different grants never
/// contend and two reports for the same grant are applied one after the other.
/// A report locks its grant entry before the owner's account entry; nothing
/// takes them in the other order.
///
/// Revisions keep growing across a remove and re-register of the same id, so
/// state read before a removal always orders before state read after it.
pub struct QuotaLedger {
    entries: DashMap<GrantId, Arc<Mutex<LedgerEntry>>>,
    accounts: DashMap<UserId, Arc<Mutex<AccountEntry>>>,
    retired_grants: DashMap<GrantId, u64>,
    retired_accounts: DashMap<UserId, u64>,
    schedule: ResetSchedule,
}

impl QuotaLedger {
    pub fn new(schedule: ResetSchedule) -> Self {
        Self {
            entries: DashMap::new(),
            accounts: DashMap::new(),
            retired_grants: DashMap::new(),
            retired_accounts: DashMap::new(),
            schedule,
        }
    }

    pub fn schedule(&self) -> ResetSchedule {
        self.schedule
    }

    /// Creates the entry for a grant, or refreshes its billing terms.
    pub fn register(&self, grant: &UserTunnelGrant, tunnel: &Tunnel) {
        if let Some(existing) = self.entries.get(&grant.id()).map(|e| e.value().clone()) {
            existing
                .lock()
                .update_terms(tunnel.billing(), grant.flow, grant.flow_reset_time);
            return;
        }
        let mut entry = LedgerEntry::new(
            grant.id(),
            grant.user_id,
            tunnel.billing(),
            grant.flow,
            grant.flow_reset_time,
        );
        if let Some((_, last)) = self.retired_grants.remove(&grant.id()) {
            entry.revision = last + 1;
        }
        self.entries
            .entry(grant.id())
            .or_insert_with(|| Arc::new(Mutex::new(entry)));
    }

    /// Rebuilds an entry from persisted counters.
    pub fn restore(&self, grant: &UserTunnelGrant, tunnel: &Tunnel, snapshot: &UsageSnapshot) {
        let mut entry = LedgerEntry::restore(
            grant.user_id,
            tunnel.billing(),
            grant.flow_reset_time,
            snapshot,
        );
        entry.flow_limit = grant.flow;
        self.entries
            .insert(grant.id(), Arc::new(Mutex::new(entry)));
    }

    pub fn remove(&self, grant_id: GrantId) -> bool {
        let Some((_, entry)) = self.entries.remove(&grant_id) else {
            return false;
        };
        let revision = entry.lock().revision;
        self.retired_grants.insert(grant_id, revision);
        true
    }

    pub fn contains(&self, grant_id: GrantId) -> bool {
        self.entries.contains_key(&grant_id)
    }

    fn entry(&self, grant_id: GrantId) -> Result<Arc<Mutex<LedgerEntry>>> {
        self.entries
            .get(&grant_id)
            .map(|e| e.value().clone())
            .ok_or(ControllerError::GrantNotFound(grant_id))
    }

    /// Adds a raw usage delta, applying any due reset first.
    #[instrument(skip(self))]
    pub fn apply_usage(
        &self,
        grant_id: GrantId,
        upload: u64,
        download: u64,
        now: DateTime<Utc>,
    ) -> Result<UsageResult> {
        let entry = self.entry(grant_id)?;
        let mut entry = entry.lock();
        let reset_applied = entry.apply_due_reset(now, &self.schedule);
        let billed_delta = entry.accumulate(upload, download);
        let account = self.charge_account(entry.user_id, upload, download, billed_delta, now);
        Ok(UsageResult {
            snapshot: entry.snapshot(),
            billed_delta,
            reset_applied,
            account,
        })
    }

    /// Applies a node report. Negative deltas, duplicated sequence numbers and
    /// reports stamped before the latest reset are rejected without touching
    /// the counters.
    #[instrument(skip(self, report), fields(grant_id = report.grant_id))]
    pub fn ingest(&self, report: &UsageReport, now: DateTime<Utc>) -> Result<UsageResult> {
        let grant_id = report.grant_id;
        if report.upload_bytes < 0 || report.download_bytes < 0 {
            return Err(ConsistencyError::NegativeDelta {
                grant_id,
                upload: report.upload_bytes,
                download: report.download_bytes,
            }
            .into());
        }

        let entry = self.entry(grant_id)?;
        let mut entry = entry.lock();

        if let (Some(sequence), Some(last)) = (report.sequence, entry.last_sequence)
            && sequence <= last
        {
            return Err(ConsistencyError::DuplicateReport {
                grant_id,
                sequence,
                last,
            }
            .into());
        }

        let reset_applied = entry.apply_due_reset(now, &self.schedule);

        if let Some(reset_at) = entry.last_reset_at
            && report.timestamp < reset_at
        {
            return Err(ConsistencyError::StaleReport {
                grant_id,
                reported_at: report.timestamp,
                reset_at,
            }
            .into());
        }

        let (upload, download) = (report.upload_bytes as u64, report.download_bytes as u64);
        let billed_delta = entry.accumulate(upload, download);
        let account = self.charge_account(entry.user_id, upload, download, billed_delta, now);
        entry.active_forwards = report.active_forwards;
        if report.sequence.is_some() {
            entry.last_sequence = report.sequence;
        }
        debug!(
            billed_delta,
            billed_total = entry.billed_bytes,
            active_forwards = entry.active_forwards,
            "Usage report applied"
        );

        Ok(UsageResult {
            snapshot: entry.snapshot(),
            billed_delta,
            reset_applied,
            account,
        })
    }

    /// Applies the scheduled reset when it is due. Returns whether a reset
    /// happened; calling again for the same boundary is a no-op.
    #[instrument(skip(self))]
    pub fn schedule_reset(&self, grant_id: GrantId, now: DateTime<Utc>) -> Result<bool> {
        let entry = self.entry(grant_id)?;
        let mut entry = entry.lock();
        let reset = entry.apply_due_reset(now, &self.schedule);
        if reset {
            info!(
                grant_id,
                last_reset_at = ?entry.last_reset_at,
                next_reset_at = ?entry.next_reset_at,
                "Flow counters reset"
            );
        }
        Ok(reset)
    }

    /// Zeroes the counters right away without moving the reset schedule.
    #[instrument(skip(self))]
    pub fn reset_now(&self, grant_id: GrantId, now: DateTime<Utc>) -> Result<UsageSnapshot> {
        let entry = self.entry(grant_id)?;
        let mut entry = entry.lock();
        entry.zero_counters(now);
        info!(grant_id, "Flow counters reset by admin");
        Ok(entry.snapshot())
    }

    /// Applies any due reset and returns the resulting snapshot.
    pub fn settle(&self, grant_id: GrantId, now: DateTime<Utc>) -> Result<Settled> {
        let entry = self.entry(grant_id)?;
        let mut entry = entry.lock();
        let reset_applied = entry.apply_due_reset(now, &self.schedule);
        if reset_applied {
            info!(grant_id, next_reset_at = ?entry.next_reset_at, "Flow counters reset");
        }
        Ok(Settled {
            snapshot: entry.snapshot(),
            reset_applied,
        })
    }

    pub fn snapshot(&self, grant_id: GrantId) -> Result<UsageSnapshot> {
        Ok(self.entry(grant_id)?.lock().snapshot())
    }

    /// Billed bytes in the current cycle.
    pub fn current_usage(&self, grant_id: GrantId) -> Result<u64> {
        Ok(self.entry(grant_id)?.lock().billed_bytes)
    }

    pub fn remaining(&self, grant_id: GrantId) -> Result<i64> {
        Ok(self.snapshot(grant_id)?.remaining())
    }

    pub fn grant_ids(&self) -> Vec<GrantId> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    /// Creates the aggregate entry for a user account, or refreshes its limits.
    pub fn register_account(&self, account: &UserAccount, now: DateTime<Utc>) {
        if let Some(existing) = self.accounts.get(&account.id()).map(|e| e.value().clone()) {
            existing.lock().update_terms(account, now);
            return;
        }
        let mut entry = AccountEntry::new(account, now);
        if let Some((_, last)) = self.retired_accounts.remove(&account.id()) {
            entry.revision = last + 1;
        }
        self.accounts
            .entry(account.id())
            .or_insert_with(|| Arc::new(Mutex::new(entry)));
    }

    pub fn restore_account(&self, account: &UserAccount, snapshot: &AccountSnapshot) {
        let entry = AccountEntry::restore(account, snapshot);
        self.accounts.insert(account.id(), Arc::new(Mutex::new(entry)));
    }

    pub fn remove_account(&self, user_id: UserId) -> bool {
        let Some((_, entry)) = self.accounts.remove(&user_id) else {
            return false;
        };
        let revision = entry.lock().revision;
        self.retired_accounts.insert(user_id, revision);
        true
    }

    pub fn has_account(&self, user_id: UserId) -> bool {
        self.accounts.contains_key(&user_id)
    }

    fn account(&self, user_id: UserId) -> Option<Arc<Mutex<AccountEntry>>> {
        self.accounts.get(&user_id).map(|a| a.value().clone())
    }

    /// Adds a grant's accepted usage to its owner's account. Called with the
    /// grant entry locked.
    fn charge_account(
        &self,
        user_id: UserId,
        upload: u64,
        download: u64,
        billed: u64,
        now: DateTime<Utc>,
    ) -> Option<AccountSnapshot> {
        let account = self.account(user_id)?;
        let mut account = account.lock();
        if account.apply_due_reset(now) {
            info!(user_id, next_reset_at = ?account.next_reset_at, "Account counters reset");
        }
        account.charge(upload, download, billed);
        Some(account.snapshot())
    }

    /// Active forwards summed over every grant the user holds.
    pub fn account_forwards(&self, user_id: UserId) -> u32 {
        let entries: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries
            .iter()
            .map(|entry| entry.lock())
            .filter(|entry| entry.user_id == user_id)
            .fold(0u32, |total, entry| total.saturating_add(entry.active_forwards))
    }

    /// Applies any due account reset and returns the aggregate counters, or
    /// `None` when the user has no account.
    pub fn settle_account(&self, user_id: UserId, now: DateTime<Utc>) -> Option<AccountSettled> {
        let active_forwards = self.account_forwards(user_id);
        let account = self.account(user_id)?;
        let mut account = account.lock();
        let reset_applied = account.apply_due_reset(now);
        if reset_applied {
            info!(user_id, next_reset_at = ?account.next_reset_at, "Account counters reset");
        }
        Some(AccountSettled {
            snapshot: account.snapshot(),
            active_forwards,
            reset_applied,
        })
    }

    pub fn account_snapshot(&self, user_id: UserId) -> Option<AccountSnapshot> {
        Some(self.account(user_id)?.lock().snapshot())
    }

    /// Zeroes a user's aggregate counters without moving the account's reset
    /// day. Grant counters are left alone.
    #[instrument(skip(self))]
    pub fn reset_account_now(&self, user_id: UserId, now: DateTime<Utc>) -> Result<AccountSnapshot> {
        let account = self
            .account(user_id)
            .ok_or(ControllerError::UserNotFound(user_id))?;
        let mut account = account.lock();
        account.zero_counters(now);
        info!(user_id, "Account counters reset by admin");
        Ok(account.snapshot())
    }
}

impl Default for QuotaLedger {
    fn default() -> Self {
        Self::new(ResetSchedule::default())
    }
}
