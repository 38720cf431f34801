use crate::config::{ControllerConfig, SeedConfig};
use crate::error::{ControllerError, Result};
use crate::evaluator::{ExpiryOutlook, evaluate_account, expiry_outlook};
use crate::ledger::{AccountSnapshot, QuotaLedger, UsageResult, UsageSnapshot};
use crate::node::NodeCommander;
use crate::reconcile::{DeliveryStatus, ReconcileOutcome, Reconciler, SweepReport};
use crate::registry::PolicyRegistry;
use crate::speed::SpeedRuleResolver;
use crate::store::PolicyStore;
use chrono::{DateTime, Utc};
use policy::{
    Decision, GrantCreateDto, GrantId, GrantStatus, GrantUpdateDto, SpeedLimitRule, SpeedRuleDto,
    SpeedRuleId, Tunnel, TunnelDto, TunnelId, UsageReport, UserAccount, UserDto, UserId,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Status of one grant as reported to admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantStatusView {
    pub grant_id: GrantId,
    pub user_id: UserId,
    pub tunnel_id: TunnelId,
    pub status: GrantStatus,
    pub decision: Decision,
    pub usage: UsageSnapshot,
    /// `None` when the grant has no flow cap.
    pub remaining_bytes: Option<i64>,
    pub expiry: ExpiryOutlook,
    pub delivery: Option<DeliveryStatus>,
    /// Owner's account counters, when the owner has an account.
    pub account: Option<AccountSnapshot>,
}

/// Status of one user account as reported to admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusView {
    pub user_id: UserId,
    pub name: String,
    pub status: GrantStatus,
    /// Verdict of the account limits alone; each grant is additionally held
    /// to its own limits.
    pub decision: Decision,
    pub usage: AccountSnapshot,
    pub active_forwards: u32,
    /// `None` when the account has no flow cap.
    pub remaining_bytes: Option<i64>,
    pub grants: Vec<GrantId>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub tunnels: usize,
    pub users: usize,
    pub grants: usize,
    pub speed_rules: usize,
    pub restored_usage: usize,
}

/// Entry point for admin mutations, node usage reports and the periodic sweep.
///
/// Every mutation is persisted, mirrored into the in-memory registry and ledger,
/// then followed by a reconcile of the grants it touches.
pub struct ControlPlane {
    config: Arc<ControllerConfig>,
    registry: Arc<PolicyRegistry>,
    ledger: Arc<QuotaLedger>,
    resolver: Arc<SpeedRuleResolver>,
    reconciler: Reconciler,
    store: Arc<dyn PolicyStore>,
}

impl ControlPlane {
    pub fn new(
        config: Arc<ControllerConfig>,
        store: Arc<dyn PolicyStore>,
        commander: Arc<dyn NodeCommander>,
    ) -> Self {
        let registry = Arc::new(PolicyRegistry::new());
        let ledger = Arc::new(QuotaLedger::new(config.reset_schedule));
        let resolver = Arc::new(SpeedRuleResolver::new());
        let reconciler = Reconciler::new(
            registry.clone(),
            ledger.clone(),
            resolver.clone(),
            commander,
            config.retry.clone(),
            config.command_timeout(),
        );
        Self {
            config,
            registry,
            ledger,
            resolver,
            reconciler,
            store,
        }
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// Rebuilds the in-memory state from the store.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<LoadSummary> {
        let mut summary = LoadSummary::default();

        for tunnel in self.store.load_tunnels().await? {
            self.registry.upsert_tunnel(tunnel);
            summary.tunnels += 1;
        }
        for rule in self.store.load_speed_rules().await? {
            self.resolver.upsert(rule);
            summary.speed_rules += 1;
        }
        let account_usage = self.store.load_account_usage().await?;
        for account in self.store.load_users().await? {
            match account_usage.iter().find(|u| u.user_id == account.id()) {
                Some(snapshot) => self.ledger.restore_account(&account, snapshot),
                None => self.ledger.register_account(&account, Utc::now()),
            }
            self.registry.upsert_user(account);
            summary.users += 1;
        }
        let usage = self.store.load_usage().await?;
        for grant in self.store.load_grants().await? {
            let Some(tunnel) = self.registry.tunnel(grant.tunnel_id) else {
                warn!(
                    grant_id = grant.id(),
                    tunnel_id = grant.tunnel_id,
                    "Skipping stored grant bound to a missing tunnel"
                );
                continue;
            };
            match usage.iter().find(|u| u.grant_id == grant.id()) {
                Some(snapshot) => {
                    self.ledger.restore(&grant, &tunnel, snapshot);
                    summary.restored_usage += 1;
                }
                None => self.ledger.register(&grant, &tunnel),
            }
            self.registry.upsert_grant(grant);
            summary.grants += 1;
        }

        info!(
            tunnels = summary.tunnels,
            users = summary.users,
            grants = summary.grants,
            speed_rules = summary.speed_rules,
            restored_usage = summary.restored_usage,
            "Policy state loaded"
        );
        Ok(summary)
    }

    /// Applies seed records. Grants that already exist are left alone.
    #[instrument(skip(self, seed))]
    pub async fn apply_seed(&self, seed: &SeedConfig, now: DateTime<Utc>) -> Result<()> {
        for tunnel in &seed.tunnels {
            self.upsert_tunnel(tunnel, now).await?;
        }
        for rule in &seed.speed_rules {
            self.upsert_speed_rule(rule).await?;
        }
        for user in &seed.users {
            self.upsert_user(user, now).await?;
        }
        for grant in &seed.grants {
            match self.create_grant(grant, now).await {
                Ok(_) => {}
                Err(ControllerError::GrantExists(grant_id)) => {
                    debug!(grant_id, "Seed grant already present");
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            tunnels = seed.tunnels.len(),
            speed_rules = seed.speed_rules.len(),
            users = seed.users.len(),
            grants = seed.grants.len(),
            "Seed applied"
        );
        Ok(())
    }

    #[instrument(skip(self, dto))]
    pub async fn upsert_tunnel(&self, dto: &TunnelDto, now: DateTime<Utc>) -> Result<Tunnel> {
        let draft = dto.validate()?;
        let previous = self.registry.tunnel(draft.id);
        let tunnel = draft.into_tunnel(previous.as_ref(), now);
        self.store.save_tunnel(&tunnel).await?;
        self.registry.upsert_tunnel(tunnel.clone());
        info!(tunnel_id = tunnel.id(), name = %tunnel.name, "Tunnel saved");

        for grant_id in self.registry.grants_on_tunnel(tunnel.id()) {
            if let Some(grant) = self.registry.grant(grant_id) {
                self.ledger.register(&grant, &tunnel);
            }
            self.reconcile_logged(grant_id, now);
        }
        Ok(tunnel)
    }

    /// Deletes a tunnel together with every grant bound to it.
    #[instrument(skip(self))]
    pub async fn delete_tunnel(&self, tunnel_id: TunnelId) -> Result<()> {
        if self.registry.tunnel(tunnel_id).is_none() {
            return Err(ControllerError::TunnelNotFound(tunnel_id));
        }
        for grant_id in self.registry.grants_on_tunnel(tunnel_id) {
            self.revoke_grant(grant_id).await?;
        }
        self.store.delete_tunnel(tunnel_id).await?;
        self.registry.remove_tunnel(tunnel_id);
        info!(tunnel_id, "Tunnel deleted");
        Ok(())
    }

    /// Creates or replaces a user account. Every grant the user holds is
    /// re-evaluated against the new limits.
    #[instrument(skip(self, dto))]
    pub async fn upsert_user(&self, dto: &UserDto, now: DateTime<Utc>) -> Result<UserAccount> {
        let draft = dto.validate()?;
        let previous = self.registry.user(draft.id);
        let account = draft.into_account(previous.as_ref(), now);
        self.store.save_user(&account).await?;
        self.ledger.register_account(&account, now);
        self.registry.upsert_user(account.clone());
        info!(
            user_id = account.id(),
            flow = account.flow,
            num = account.num,
            "User account saved"
        );

        self.reconcile_user(account.id(), now).await;
        Ok(account)
    }

    /// Drops a user account. The user's grants stay and are held to their own
    /// limits only.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, user_id: UserId, now: DateTime<Utc>) -> Result<()> {
        if self.registry.user(user_id).is_none() {
            return Err(ControllerError::UserNotFound(user_id));
        }
        self.store.delete_user(user_id).await?;
        self.registry.remove_user(user_id);
        self.ledger.remove_account(user_id);
        info!(user_id, "User account deleted");

        self.reconcile_user(user_id, now).await;
        Ok(())
    }

    /// Admin-triggered reset of a user's aggregate counters. Grant counters and
    /// the account's reset day are unchanged.
    #[instrument(skip(self))]
    pub async fn reset_user_flow(&self, user_id: UserId, now: DateTime<Utc>) -> Result<AccountSnapshot> {
        let snapshot = self.ledger.reset_account_now(user_id, now)?;
        self.store.save_account_usage(&snapshot).await?;
        self.reconcile_user(user_id, now).await;
        Ok(snapshot)
    }

    pub fn user_status(&self, user_id: UserId, now: DateTime<Utc>) -> Result<UserStatusView> {
        let account = self
            .registry
            .user(user_id)
            .ok_or(ControllerError::UserNotFound(user_id))?;
        let settled = self
            .ledger
            .settle_account(user_id, now)
            .ok_or(ControllerError::UserNotFound(user_id))?;
        Ok(UserStatusView {
            user_id,
            name: account.name.clone(),
            status: account.status,
            decision: evaluate_account(&account, &settled, now),
            remaining_bytes: account.is_flow_capped().then(|| settled.snapshot.remaining()),
            usage: settled.snapshot,
            active_forwards: settled.active_forwards,
            grants: self.registry.grants_of_user(user_id),
        })
    }

    /// Reconciles every grant of a user and persists the counters it settled.
    async fn reconcile_user(&self, user_id: UserId, now: DateTime<Utc>) {
        for grant_id in self.registry.grants_of_user(user_id) {
            if let Err(e) = self.reconcile_and_persist(grant_id, now).await {
                warn!(grant_id, user_id, error = %e, "Reconcile failed for grant");
            }
        }
    }

    #[instrument(skip(self, dto))]
    pub async fn create_grant(&self, dto: &GrantCreateDto, now: DateTime<Utc>) -> Result<ReconcileOutcome> {
        let draft = dto.validate()?;
        if self.registry.contains_grant(draft.id) {
            return Err(ControllerError::GrantExists(draft.id));
        }
        let tunnel = self
            .registry
            .tunnel(draft.tunnel_id)
            .ok_or(ControllerError::TunnelNotFound(draft.tunnel_id))?;
        let grant = draft.into_grant(now);

        self.store.save_grant(&grant).await?;
        self.ledger.register(&grant, &tunnel);
        self.registry.upsert_grant(grant.clone());
        info!(
            grant_id = grant.id(),
            user_id = grant.user_id,
            tunnel_id = grant.tunnel_id,
            flow = grant.flow,
            "Grant created"
        );

        self.reconcile_and_persist(grant.id(), now).await
    }

    /// Applies new limits. Counters are kept; the next decision reflects them.
    #[instrument(skip(self, dto))]
    pub async fn update_grant(&self, dto: &GrantUpdateDto, now: DateTime<Utc>) -> Result<ReconcileOutcome> {
        let update = dto.validate()?;
        let binding = self.registry.binding(update.id)?;
        let mut grant = binding.grant;
        update.apply_to(&mut grant, now);

        self.store.save_grant(&grant).await?;
        self.ledger.register(&grant, &binding.tunnel);
        self.registry.upsert_grant(grant.clone());
        info!(grant_id = grant.id(), flow = grant.flow, num = grant.num, "Grant updated");

        self.reconcile_and_persist(grant.id(), now).await
    }

    #[instrument(skip(self))]
    pub async fn revoke_grant(&self, grant_id: GrantId) -> Result<()> {
        let grant = self
            .registry
            .grant(grant_id)
            .ok_or(ControllerError::GrantNotFound(grant_id))?;
        self.store.delete_grant(grant_id).await?;
        self.registry.remove_grant(grant_id);
        self.ledger.remove(grant_id);
        self.reconciler.retire(grant_id, grant.tunnel_id);
        info!(grant_id, "Grant revoked");
        Ok(())
    }

    /// Admin-triggered flow reset. The scheduled reset instant is unchanged.
    #[instrument(skip(self))]
    pub async fn reset_flow(&self, grant_id: GrantId, now: DateTime<Utc>) -> Result<ReconcileOutcome> {
        let snapshot = self.ledger.reset_now(grant_id, now)?;
        self.store.save_usage(&snapshot).await?;
        self.reconcile_and_persist(grant_id, now).await
    }

    /// Saves a speed rule and re-resolves every grant that references it.
    #[instrument(skip(self, dto))]
    pub async fn upsert_speed_rule(&self, dto: &SpeedRuleDto) -> Result<SpeedLimitRule> {
        let rule = dto.validate()?;
        if self.registry.tunnel(rule.tunnel_id).is_none() {
            return Err(ControllerError::TunnelNotFound(rule.tunnel_id));
        }
        self.store.save_speed_rule(&rule).await?;
        self.resolver.upsert(rule.clone());
        self.reconcile_users_of(rule.id, Utc::now());
        Ok(rule)
    }

    /// Removes a speed rule. Grants still referencing it are held disabled
    /// until they are pointed at another rule.
    #[instrument(skip(self))]
    pub async fn remove_speed_rule(&self, rule_id: SpeedRuleId) -> Result<()> {
        if self.resolver.get(rule_id).is_none() {
            return Err(ControllerError::SpeedRuleNotFound(rule_id));
        }
        self.store.delete_speed_rule(rule_id).await?;
        self.resolver.remove(rule_id);
        self.reconcile_users_of(rule_id, Utc::now());
        Ok(())
    }

    fn reconcile_users_of(&self, rule_id: SpeedRuleId, now: DateTime<Utc>) {
        for grant_id in self.registry.grants_using_speed_rule(rule_id) {
            self.reconcile_logged(grant_id, now);
        }
    }

    /// Applies a node usage report and reconciles the grant when it is accepted.
    /// When the owner has an account, every grant of the owner is reconciled,
    /// since the report also moved the shared account counters.
    ///
    /// Once the ledger has accepted a report the call succeeds: a failed write
    /// of the counters is logged and left to the next persist of the grant,
    /// so a retried report cannot be billed twice.
    #[instrument(skip(self, report), fields(grant_id = report.grant_id))]
    pub async fn report_usage(&self, report: &UsageReport, now: DateTime<Utc>) -> Result<UsageResult> {
        if !self.registry.contains_grant(report.grant_id) {
            return Err(ControllerError::GrantNotFound(report.grant_id));
        }
        let result = match self.ledger.ingest(report, now) {
            Ok(result) => result,
            Err(e @ ControllerError::Consistency(_)) => {
                warn!(error = %e, "Usage report rejected");
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        match &result.account {
            Some(account) => {
                for grant_id in self.registry.grants_of_user(account.user_id) {
                    self.reconcile_logged(grant_id, now);
                }
            }
            None => self.reconcile_logged(report.grant_id, now),
        }

        if let Err(e) = self.store.save_usage(&result.snapshot).await {
            error!(error = %e, "Failed to persist usage counters");
        }
        if let Some(account) = &result.account
            && let Err(e) = self.store.save_account_usage(account).await
        {
            error!(user_id = account.user_id, error = %e, "Failed to persist account counters");
        }
        Ok(result)
    }

    pub fn reconcile_grant(&self, grant_id: GrantId, now: DateTime<Utc>) -> Result<ReconcileOutcome> {
        self.reconciler.reconcile_grant(grant_id, now)
    }

    async fn reconcile_and_persist(&self, grant_id: GrantId, now: DateTime<Utc>) -> Result<ReconcileOutcome> {
        let outcome = self.reconciler.reconcile_grant(grant_id, now)?;
        self.store.save_usage(&outcome.usage).await?;
        if let Some(account) = &outcome.account {
            self.store.save_account_usage(account).await?;
        }
        Ok(outcome)
    }

    fn reconcile_logged(&self, grant_id: GrantId, now: DateTime<Utc>) {
        if let Err(e) = self.reconciler.reconcile_grant(grant_id, now) {
            warn!(grant_id, error = %e, "Reconcile failed for grant");
        }
    }

    /// Reconciles every grant and persists counters reset along the way.
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self, now: DateTime<Utc>) -> SweepReport {
        let report = self.reconciler.sweep(now);
        for snapshot in &report.resets {
            if let Err(e) = self.store.save_usage(snapshot).await {
                error!(grant_id = snapshot.grant_id, error = %e, "Failed to persist reset counters");
            }
        }
        for snapshot in &report.account_resets {
            if let Err(e) = self.store.save_account_usage(snapshot).await {
                error!(user_id = snapshot.user_id, error = %e, "Failed to persist reset account counters");
            }
        }
        report
    }

    pub async fn grant_status(&self, grant_id: GrantId, now: DateTime<Utc>) -> Result<GrantStatusView> {
        let binding = self.registry.binding(grant_id)?;
        let settled = self.ledger.settle(grant_id, now)?;
        if settled.reset_applied {
            self.store.save_usage(&settled.snapshot).await?;
        }
        let account = self.reconciler.settle_account(&binding, now);
        if let Some(account) = account.as_ref().filter(|a| a.reset_applied) {
            self.store.save_account_usage(&account.snapshot).await?;
        }
        let decision = self
            .reconciler
            .desired_decision(&binding, &settled.snapshot, account.as_ref(), now);
        let grant = binding.grant;
        Ok(GrantStatusView {
            grant_id,
            user_id: grant.user_id,
            tunnel_id: grant.tunnel_id,
            status: grant.status,
            decision,
            remaining_bytes: grant.is_flow_capped().then(|| settled.snapshot.remaining()),
            usage: settled.snapshot,
            expiry: expiry_outlook(&grant, now, self.config.expiry_warning_days),
            delivery: self.reconciler.delivery_status(grant_id),
            account: account.map(|a| a.snapshot),
        })
    }

    pub async fn grant_statuses(&self, now: DateTime<Utc>) -> Vec<GrantStatusView> {
        let mut views = Vec::new();
        for grant_id in self.registry.grant_ids() {
            match self.grant_status(grant_id, now).await {
                Ok(view) => views.push(view),
                Err(e) => warn!(grant_id, error = %e, "Grant status unavailable"),
            }
        }
        views
    }

    /// Periodic sweep until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.reconcile_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.reconcile_interval_secs,
            "Reconcile loop started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Reconcile loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.reconcile_all(Utc::now()).await;
                    debug!(
                        evaluated = report.evaluated,
                        issued = report.issued,
                        failed = report.failed,
                        resets = report.resets.len(),
                        account_resets = report.account_resets.len(),
                        "Reconcile sweep finished"
                    );
                }
            }
        }
    }
}
