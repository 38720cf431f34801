use super::PolicyStore;
use crate::error::Result;
use crate::ledger::{AccountSnapshot, UsageSnapshot};
use async_trait::async_trait;
use dashmap::DashMap;
use policy::{
    GrantId, SpeedLimitRule, SpeedRuleId, Tunnel, TunnelId, UserAccount, UserId, UserTunnelGrant,
};

/// Store that lives as long as the process. Used when no database is configured.
#[derive(Default)]
pub struct MemoryStore {
    tunnels: DashMap<TunnelId, Tunnel>,
    grants: DashMap<GrantId, UserTunnelGrant>,
    speed_rules: DashMap<SpeedRuleId, SpeedLimitRule>,
    usage: DashMap<GrantId, UsageSnapshot>,
    users: DashMap<UserId, UserAccount>,
    account_usage: DashMap<UserId, AccountSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn load_tunnels(&self) -> Result<Vec<Tunnel>> {
        Ok(self.tunnels.iter().map(|t| t.value().clone()).collect())
    }

    async fn load_grants(&self) -> Result<Vec<UserTunnelGrant>> {
        Ok(self.grants.iter().map(|g| g.value().clone()).collect())
    }

    async fn load_speed_rules(&self) -> Result<Vec<SpeedLimitRule>> {
        Ok(self.speed_rules.iter().map(|r| r.value().clone()).collect())
    }

    async fn load_usage(&self) -> Result<Vec<UsageSnapshot>> {
        Ok(self.usage.iter().map(|u| u.value().clone()).collect())
    }

    async fn load_users(&self) -> Result<Vec<UserAccount>> {
        Ok(self.users.iter().map(|u| u.value().clone()).collect())
    }

    async fn load_account_usage(&self) -> Result<Vec<AccountSnapshot>> {
        Ok(self.account_usage.iter().map(|u| u.value().clone()).collect())
    }

    async fn save_tunnel(&self, tunnel: &Tunnel) -> Result<()> {
        self.tunnels.insert(tunnel.id(), tunnel.clone());
        Ok(())
    }

    async fn delete_tunnel(&self, tunnel_id: TunnelId) -> Result<()> {
        self.tunnels.remove(&tunnel_id);
        Ok(())
    }

    async fn save_grant(&self, grant: &UserTunnelGrant) -> Result<()> {
        self.grants.insert(grant.id(), grant.clone());
        Ok(())
    }

    async fn delete_grant(&self, grant_id: GrantId) -> Result<()> {
        self.grants.remove(&grant_id);
        self.usage.remove(&grant_id);
        Ok(())
    }

    async fn save_speed_rule(&self, rule: &SpeedLimitRule) -> Result<()> {
        self.speed_rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn delete_speed_rule(&self, rule_id: SpeedRuleId) -> Result<()> {
        self.speed_rules.remove(&rule_id);
        Ok(())
    }

    async fn save_usage(&self, usage: &UsageSnapshot) -> Result<()> {
        self.usage
            .entry(usage.grant_id)
            .and_modify(|stored| {
                if usage.revision > stored.revision {
                    *stored = usage.clone();
                }
            })
            .or_insert_with(|| usage.clone());
        Ok(())
    }

    async fn save_user(&self, account: &UserAccount) -> Result<()> {
        self.users.insert(account.id(), account.clone());
        Ok(())
    }

    async fn delete_user(&self, user_id: UserId) -> Result<()> {
        self.users.remove(&user_id);
        self.account_usage.remove(&user_id);
        Ok(())
    }

    async fn save_account_usage(&self, usage: &AccountSnapshot) -> Result<()> {
        self.account_usage
            .entry(usage.user_id)
            .and_modify(|stored| {
                if usage.revision > stored.revision {
                    *stored = usage.clone();
                }
            })
            .or_insert_with(|| usage.clone());
        Ok(())
    }
}
