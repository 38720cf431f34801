use async_trait::async_trait;
use controller::{NodeCommandError, NodeCommander};
use parking_lot::Mutex;
use policy::{DisableReason, GrantId, NodeCommand, RateLimitParams, TunnelId};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

/// What the mock node currently enforces for one grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardState {
    Enabled(Option<RateLimitParams>),
    Disabled(DisableReason),
}

/// In-process stand-in for a data-plane node.
///
/// Commands take `latency` to acknowledge. Scripted failures are consumed one
/// per call before any command succeeds.
#[derive(Default)]
pub struct MockNode {
    latency: Duration,
    failures: Mutex<VecDeque<NodeCommandError>>,
    applied: Mutex<Vec<NodeCommand>>,
    state: Mutex<HashMap<GrantId, ForwardState>>,
    calls: Mutex<usize>,
}

impl MockNode {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    pub fn fail_next(&self, error: NodeCommandError) {
        self.failures.lock().push_back(error);
    }

    /// Acknowledged commands, oldest first.
    pub fn applied(&self) -> Vec<NodeCommand> {
        self.applied.lock().clone()
    }

    pub fn applied_for(&self, grant_id: GrantId) -> Vec<NodeCommand> {
        self.applied
            .lock()
            .iter()
            .filter(|c| c.grant_id() == grant_id)
            .cloned()
            .collect()
    }

    pub fn state(&self, grant_id: GrantId) -> Option<ForwardState> {
        self.state.lock().get(&grant_id).cloned()
    }

    pub fn is_forwarding(&self, grant_id: GrantId) -> bool {
        matches!(self.state(grant_id), Some(ForwardState::Enabled(_)))
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }

    async fn apply(&self, command: NodeCommand) -> Result<(), NodeCommandError> {
        *self.calls.lock() += 1;
        tokio::time::sleep(self.latency).await;

        let failure = self.failures.lock().pop_front();
        if let Some(failure) = failure {
            debug!(%command, error = %failure, "Mock node failing command");
            return Err(failure);
        }

        let state = match &command {
            NodeCommand::Enable { rate_limit, .. } => ForwardState::Enabled(*rate_limit),
            NodeCommand::Disable { reason, .. } => ForwardState::Disabled(*reason),
        };
        self.state.lock().insert(command.grant_id(), state);
        self.applied.lock().push(command);
        Ok(())
    }
}

#[async_trait]
impl NodeCommander for MockNode {
    async fn enable_tunnel(
        &self,
        tunnel_id: TunnelId,
        grant_id: GrantId,
        rate_limit: Option<RateLimitParams>,
    ) -> Result<(), NodeCommandError> {
        self.apply(NodeCommand::Enable {
            tunnel_id,
            grant_id,
            rate_limit,
        })
        .await
    }

    async fn disable_tunnel(
        &self,
        tunnel_id: TunnelId,
        grant_id: GrantId,
        reason: DisableReason,
    ) -> Result<(), NodeCommandError> {
        self.apply(NodeCommand::Disable {
            tunnel_id,
            grant_id,
            reason,
        })
        .await
    }
}
