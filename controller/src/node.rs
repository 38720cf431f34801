use crate::error::NodeCommandError;
use async_trait::async_trait;
use policy::{DisableReason, GrantId, NodeCommand, RateLimitParams, TunnelId};
use tracing::info;

/// Collaborator that applies enable/disable commands on the data-plane nodes.
///
/// A call returns once the node has acknowledged the command. Transient errors
/// are retried by the caller; rejections are final.
#[async_trait]
pub trait NodeCommander: Send + Sync {
    async fn enable_tunnel(
        &self,
        tunnel_id: TunnelId,
        grant_id: GrantId,
        rate_limit: Option<RateLimitParams>,
    ) -> Result<(), NodeCommandError>;

    async fn disable_tunnel(
        &self,
        tunnel_id: TunnelId,
        grant_id: GrantId,
        reason: DisableReason,
    ) -> Result<(), NodeCommandError>;
}

pub async fn deliver(
    commander: &dyn NodeCommander,
    command: &NodeCommand,
) -> Result<(), NodeCommandError> {
    match command {
        NodeCommand::Enable {
            tunnel_id,
            grant_id,
            rate_limit,
        } => commander.enable_tunnel(*tunnel_id, *grant_id, *rate_limit).await,
        NodeCommand::Disable {
            tunnel_id,
            grant_id,
            reason,
        } => commander.disable_tunnel(*tunnel_id, *grant_id, *reason).await,
    }
}

/// Commander that only logs. Used when no node transport is configured.
#[derive(Debug, Default, Clone)]
pub struct LoggingCommander;

#[async_trait]
impl NodeCommander for LoggingCommander {
    async fn enable_tunnel(
        &self,
        tunnel_id: TunnelId,
        grant_id: GrantId,
        rate_limit: Option<RateLimitParams>,
    ) -> Result<(), NodeCommandError> {
        info!(
            tunnel_id,
            grant_id,
            bytes_per_second = rate_limit.map(|r| r.bytes_per_second),
            "Enable tunnel"
        );
        Ok(())
    }

    async fn disable_tunnel(
        &self,
        tunnel_id: TunnelId,
        grant_id: GrantId,
        reason: DisableReason,
    ) -> Result<(), NodeCommandError> {
        info!(tunnel_id, grant_id, %reason, "Disable tunnel");
        Ok(())
    }
}
