use crate::error::{ControllerError, Result};
use dashmap::DashMap;
use policy::{GrantId, SpeedRuleId, Tunnel, TunnelId, UserAccount, UserId, UserTunnelGrant};

/// A grant together with the tunnel it is bound to and its owner's account,
/// if the owner has one.
#[derive(Debug, Clone)]
pub struct GrantBinding {
    pub grant: UserTunnelGrant,
    pub tunnel: Tunnel,
    pub account: Option<UserAccount>,
}

/// In-memory view of tunnels, grants and user accounts, the source the
/// reconciler reads.
pub struct PolicyRegistry {
    tunnels: DashMap<TunnelId, Tunnel>,
    grants: DashMap<GrantId, UserTunnelGrant>,
    users: DashMap<UserId, UserAccount>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self {
            tunnels: DashMap::new(),
            grants: DashMap::new(),
            users: DashMap::new(),
        }
    }

    pub fn upsert_user(&self, account: UserAccount) -> Option<UserAccount> {
        self.users.insert(account.id(), account)
    }

    pub fn user(&self, user_id: UserId) -> Option<UserAccount> {
        self.users.get(&user_id).map(|u| u.value().clone())
    }

    pub fn remove_user(&self, user_id: UserId) -> Option<UserAccount> {
        self.users.remove(&user_id).map(|(_, account)| account)
    }

    pub fn grants_of_user(&self, user_id: UserId) -> Vec<GrantId> {
        let mut ids: Vec<GrantId> = self
            .grants
            .iter()
            .filter(|g| g.user_id == user_id)
            .map(|g| *g.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn upsert_tunnel(&self, tunnel: Tunnel) -> Option<Tunnel> {
        self.tunnels.insert(tunnel.id(), tunnel)
    }

    pub fn tunnel(&self, tunnel_id: TunnelId) -> Option<Tunnel> {
        self.tunnels.get(&tunnel_id).map(|t| t.value().clone())
    }

    pub fn remove_tunnel(&self, tunnel_id: TunnelId) -> Option<Tunnel> {
        self.tunnels.remove(&tunnel_id).map(|(_, tunnel)| tunnel)
    }

    pub fn tunnels(&self) -> Vec<Tunnel> {
        self.tunnels.iter().map(|t| t.value().clone()).collect()
    }

    pub fn upsert_grant(&self, grant: UserTunnelGrant) -> Option<UserTunnelGrant> {
        self.grants.insert(grant.id(), grant)
    }

    pub fn grant(&self, grant_id: GrantId) -> Option<UserTunnelGrant> {
        self.grants.get(&grant_id).map(|g| g.value().clone())
    }

    pub fn remove_grant(&self, grant_id: GrantId) -> Option<UserTunnelGrant> {
        self.grants.remove(&grant_id).map(|(_, grant)| grant)
    }

    pub fn contains_grant(&self, grant_id: GrantId) -> bool {
        self.grants.contains_key(&grant_id)
    }

    pub fn binding(&self, grant_id: GrantId) -> Result<GrantBinding> {
        let grant = self
            .grant(grant_id)
            .ok_or(ControllerError::GrantNotFound(grant_id))?;
        let tunnel = self
            .tunnel(grant.tunnel_id)
            .ok_or(ControllerError::TunnelNotFound(grant.tunnel_id))?;
        let account = self.user(grant.user_id);
        Ok(GrantBinding {
            grant,
            tunnel,
            account,
        })
    }

    pub fn grant_ids(&self) -> Vec<GrantId> {
        let mut ids: Vec<GrantId> = self.grants.iter().map(|g| *g.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn grants_on_tunnel(&self, tunnel_id: TunnelId) -> Vec<GrantId> {
        self.grants
            .iter()
            .filter(|g| g.tunnel_id == tunnel_id)
            .map(|g| *g.key())
            .collect()
    }

    pub fn grants_using_speed_rule(&self, rule_id: SpeedRuleId) -> Vec<GrantId> {
        self.grants
            .iter()
            .filter(|g| g.speed_id == Some(rule_id))
            .map(|g| *g.key())
            .collect()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
