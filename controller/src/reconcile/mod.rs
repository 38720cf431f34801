mod retry;
mod slot;

pub use retry::{RetryConfig, RetryDecision, calculate_retry_delay};

use crate::error::Result;
use crate::evaluator::{evaluate, evaluate_account, gate};
use crate::ledger::{AccountSettled, AccountSnapshot, QuotaLedger, UsageSnapshot};
use crate::node::NodeCommander;
use crate::registry::{GrantBinding, PolicyRegistry};
use crate::speed::SpeedRuleResolver;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use policy::{Decision, DisableReason, GrantId, NodeCommand, TunnelId};
use serde::Serialize;
use slot::{DeliverySettings, DeliverySlot, StateRevision};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// What one reconcile pass decided for a grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub grant_id: GrantId,
    pub decision: Decision,
    pub command: NodeCommand,
    /// Whether the command differed from the last one and was queued for delivery.
    pub issued: bool,
    pub usage: UsageSnapshot,
    pub reset_applied: bool,
    /// Owner's account counters, when the owner has an account.
    pub account: Option<AccountSnapshot>,
    pub account_reset_applied: bool,
}

#[derive(Debug, Default, Clone)]
pub struct SweepReport {
    pub evaluated: usize,
    pub issued: usize,
    pub failed: usize,
    /// Snapshots of grants whose counters were reset during the sweep.
    pub resets: Vec<UsageSnapshot>,
    /// Snapshots of accounts whose counters were reset during the sweep.
    pub account_resets: Vec<AccountSnapshot>,
}

/// Delivery state of a grant's commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatus {
    pub desired: Decision,
    pub applied: Option<Decision>,
    pub in_sync: bool,
    pub failed: bool,
}

/// Drives node state toward the evaluated decision of every grant.
///
/// Evaluation and publishing are synchronous; delivery runs on one worker task
/// per grant, so a slow node never holds up other grants.
pub struct Reconciler {
    registry: Arc<PolicyRegistry>,
    ledger: Arc<QuotaLedger>,
    resolver: Arc<SpeedRuleResolver>,
    commander: Arc<dyn NodeCommander>,
    settings: DeliverySettings,
    slots: DashMap<GrantId, Arc<DeliverySlot>>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<PolicyRegistry>,
        ledger: Arc<QuotaLedger>,
        resolver: Arc<SpeedRuleResolver>,
        commander: Arc<dyn NodeCommander>,
        retry: RetryConfig,
        command_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            ledger,
            resolver,
            commander,
            settings: DeliverySettings {
                retry,
                command_timeout,
            },
            slots: DashMap::new(),
        }
    }

    /// Re-evaluates one grant and queues a node command if its decision changed.
    /// Must run inside a tokio runtime.
    #[instrument(skip(self))]
    pub fn reconcile_grant(&self, grant_id: GrantId, now: DateTime<Utc>) -> Result<ReconcileOutcome> {
        let binding = self.registry.binding(grant_id)?;
        let settled = self.ledger.settle(grant_id, now)?;
        let account = self.settle_account(&binding, now);
        let (decision, command) =
            self.desired_command(&binding, &settled.snapshot, account.as_ref(), now);
        let revision = StateRevision {
            usage: settled.snapshot.revision,
            account: account.as_ref().map(|a| a.snapshot.revision),
        };

        let issued = self
            .slot(grant_id)
            .publish(decision, command.clone(), Some(revision));
        if issued {
            info!(grant_id, %decision, %command, "Queued node command");
        } else {
            debug!(grant_id, %decision, "Decision unchanged");
        }

        let account_reset_applied = account.as_ref().is_some_and(|a| a.reset_applied);
        Ok(ReconcileOutcome {
            grant_id,
            decision,
            command,
            issued,
            usage: settled.snapshot,
            reset_applied: settled.reset_applied,
            account: account.map(|a| a.snapshot),
            account_reset_applied,
        })
    }

    /// Account counters for the grant's owner, `None` when the owner has no
    /// account.
    pub(crate) fn settle_account(
        &self,
        binding: &GrantBinding,
        now: DateTime<Utc>,
    ) -> Option<AccountSettled> {
        let account = binding.account.as_ref()?;
        self.ledger.settle_account(account.id(), now)
    }

    /// The decision a reconcile would publish for this state, speed-rule
    /// resolution and account limits included.
    pub(crate) fn desired_decision(
        &self,
        binding: &GrantBinding,
        usage: &UsageSnapshot,
        account: Option<&AccountSettled>,
        now: DateTime<Utc>,
    ) -> Decision {
        self.desired_command(binding, usage, account, now).0
    }

    fn desired_command(
        &self,
        binding: &GrantBinding,
        usage: &UsageSnapshot,
        account: Option<&AccountSettled>,
        now: DateTime<Utc>,
    ) -> (Decision, NodeCommand) {
        let mut decision = evaluate(&binding.grant, usage, now);
        if let (Some(user), Some(account)) = (&binding.account, account) {
            decision = gate(decision, evaluate_account(user, account, now));
        }

        let tunnel_id = binding.tunnel.id();
        let grant_id = binding.grant.id();
        if let Some(reason) = decision.disable_reason() {
            return (
                decision,
                NodeCommand::Disable {
                    tunnel_id,
                    grant_id,
                    reason,
                },
            );
        }
        match self.resolver.resolve(binding.grant.speed_id, tunnel_id) {
            Ok(rate_limit) => (
                decision,
                NodeCommand::Enable {
                    tunnel_id,
                    grant_id,
                    rate_limit,
                },
            ),
            Err(e) => {
                warn!(grant_id, error = %e, "Speed limit unresolved, holding tunnel disabled");
                (
                    Decision::DisabledByAdmin,
                    NodeCommand::Disable {
                        tunnel_id,
                        grant_id,
                        reason: DisableReason::SpeedRuleUnresolved(
                            binding.grant.speed_id.unwrap_or_default(),
                        ),
                    },
                )
            }
        }
    }

    fn slot(&self, grant_id: GrantId) -> Arc<DeliverySlot> {
        self.slots
            .entry(grant_id)
            .or_insert_with(|| {
                Arc::new(DeliverySlot::spawn(
                    grant_id,
                    self.commander.clone(),
                    self.settings.clone(),
                ))
            })
            .clone()
    }

    /// Sends a final disable for a grant that is going away. The slot stays, so
    /// a grant re-created under the same id publishes on it and supersedes the
    /// revoke instead of racing it from a second worker.
    #[instrument(skip(self))]
    pub fn retire(&self, grant_id: GrantId, tunnel_id: TunnelId) {
        self.slot(grant_id).publish(
            Decision::DisabledByAdmin,
            NodeCommand::Disable {
                tunnel_id,
                grant_id,
                reason: DisableReason::Revoked,
            },
            None,
        );
        info!(grant_id, tunnel_id, "Grant retired");
    }

    /// Reconciles every known grant. A failing grant is logged and skipped.
    #[instrument(skip(self))]
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        for grant_id in self.registry.grant_ids() {
            report.evaluated += 1;
            match self.reconcile_grant(grant_id, now) {
                Ok(outcome) => {
                    if outcome.issued {
                        report.issued += 1;
                    }
                    if outcome.reset_applied {
                        report.resets.push(outcome.usage);
                    }
                    if outcome.account_reset_applied
                        && let Some(account) = outcome.account
                    {
                        report.account_resets.push(account);
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(grant_id, error = %e, "Reconcile failed for grant");
                }
            }
        }
        report
    }

    pub fn delivery_status(&self, grant_id: GrantId) -> Option<DeliveryStatus> {
        let slot = self.slots.get(&grant_id)?.value().clone();
        let desired = slot.latest()?;
        let applied = slot.applied();
        Some(DeliveryStatus {
            desired: desired.decision,
            applied: applied.as_ref().map(|a| a.decision),
            in_sync: applied.is_some_and(|a| a.generation == desired.generation),
            failed: slot.delivery_failed(),
        })
    }
}
