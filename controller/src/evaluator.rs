use crate::ledger::{AccountSettled, UsageSnapshot, remaining_quota};
use chrono::{DateTime, Utc};
use policy::{Decision, GrantStatus, UserAccount, UserTunnelGrant};
use serde::Serialize;

/// Decides whether a grant's tunnel may forward traffic.
///
/// Checks run in fixed precedence: admin status, expiry, flow quota, forward
/// count. A zero `flow` or `num` on the grant means no cap.
pub fn evaluate(grant: &UserTunnelGrant, usage: &UsageSnapshot, now: DateTime<Utc>) -> Decision {
    if grant.status == GrantStatus::Disabled {
        return Decision::DisabledByAdmin;
    }
    if grant.is_expired_at(now) {
        return Decision::Expired;
    }
    if grant.is_flow_capped() && remaining_quota(grant.flow, usage.billed_bytes) <= 0 {
        return Decision::QuotaExceeded;
    }
    if grant.is_forward_capped() && usage.active_forwards >= grant.num {
        return Decision::LimitExceeded;
    }
    Decision::Enabled
}

/// Same checks as [`evaluate`], against the user's account limits and the
/// usage summed over all of the user's grants.
pub fn evaluate_account(account: &UserAccount, usage: &AccountSettled, now: DateTime<Utc>) -> Decision {
    if account.status == GrantStatus::Disabled {
        return Decision::DisabledByAdmin;
    }
    if account.is_expired_at(now) {
        return Decision::Expired;
    }
    if account.is_flow_capped() && remaining_quota(account.flow, usage.snapshot.billed_bytes) <= 0 {
        return Decision::QuotaExceeded;
    }
    if account.is_forward_capped() && usage.active_forwards >= account.num {
        return Decision::LimitExceeded;
    }
    Decision::Enabled
}

/// The more restrictive of a grant decision and its account decision, by the
/// same precedence `evaluate` checks in.
pub fn gate(grant: Decision, account: Decision) -> Decision {
    if precedence(account) < precedence(grant) {
        account
    } else {
        grant
    }
}

fn precedence(decision: Decision) -> u8 {
    match decision {
        Decision::DisabledByAdmin => 0,
        Decision::Expired => 1,
        Decision::QuotaExceeded => 2,
        Decision::LimitExceeded => 3,
        Decision::Enabled => 4,
    }
}

/// Expiry state shown to admins ahead of the hard cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpiryOutlook {
    Expired,
    ExpiringSoon { days_left: i64 },
    Active { days_left: i64 },
}

pub fn expiry_outlook(
    grant: &UserTunnelGrant,
    now: DateTime<Utc>,
    warning_days: u32,
) -> ExpiryOutlook {
    if grant.is_expired_at(now) {
        return ExpiryOutlook::Expired;
    }
    let days_left = common::days_until(now, grant.exp_time);
    if days_left <= i64::from(warning_days) {
        ExpiryOutlook::ExpiringSoon { days_left }
    } else {
        ExpiryOutlook::Active { days_left }
    }
}
