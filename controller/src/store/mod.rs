mod entity;
mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::ledger::{AccountSnapshot, UsageSnapshot};
use async_trait::async_trait;
use policy::{
    GrantId, SpeedLimitRule, SpeedRuleId, Tunnel, TunnelId, UserAccount, UserId, UserTunnelGrant,
};

/// Durable home of policy records and ledger counters.
///
/// `save_usage` and `save_account_usage` keep the snapshot with the highest
/// revision, so concurrent writers cannot roll the counters back.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn load_tunnels(&self) -> Result<Vec<Tunnel>>;
    async fn load_grants(&self) -> Result<Vec<UserTunnelGrant>>;
    async fn load_speed_rules(&self) -> Result<Vec<SpeedLimitRule>>;
    async fn load_usage(&self) -> Result<Vec<UsageSnapshot>>;
    async fn load_users(&self) -> Result<Vec<UserAccount>>;
    async fn load_account_usage(&self) -> Result<Vec<AccountSnapshot>>;

    async fn save_tunnel(&self, tunnel: &Tunnel) -> Result<()>;
    async fn delete_tunnel(&self, tunnel_id: TunnelId) -> Result<()>;
    async fn save_grant(&self, grant: &UserTunnelGrant) -> Result<()>;
    /// Also drops the grant's usage counters.
    async fn delete_grant(&self, grant_id: GrantId) -> Result<()>;
    async fn save_speed_rule(&self, rule: &SpeedLimitRule) -> Result<()>;
    async fn delete_speed_rule(&self, rule_id: SpeedRuleId) -> Result<()>;
    async fn save_usage(&self, usage: &UsageSnapshot) -> Result<()>;
    async fn save_user(&self, account: &UserAccount) -> Result<()>;
    /// Also drops the account's aggregate counters.
    async fn delete_user(&self, user_id: UserId) -> Result<()>;
    async fn save_account_usage(&self, usage: &AccountSnapshot) -> Result<()>;
}
