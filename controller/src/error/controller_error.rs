use chrono::{DateTime, Utc};
use policy::{GrantId, PolicyError, SpeedRuleId, TunnelId, UserId, ValidationError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Common error: {0}")]
    Common(#[from] common::CommonError),

    #[error("Grant not found: {0}")]
    GrantNotFound(GrantId),

    #[error("Grant already exists: {0}")]
    GrantExists(GrantId),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Tunnel not found: {0}")]
    TunnelNotFound(TunnelId),

    #[error("Speed limit rule not found: {0}")]
    SpeedRuleNotFound(SpeedRuleId),

    #[error("Speed limit rule {rule_id} belongs to tunnel {rule_tunnel_id}, not tunnel {tunnel_id}")]
    SpeedRuleTunnelMismatch {
        rule_id: SpeedRuleId,
        rule_tunnel_id: TunnelId,
        tunnel_id: TunnelId,
    },

    #[error("Usage report rejected: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// A usage report that cannot be applied without corrupting the ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("negative usage delta for grant {grant_id} (upload {upload}, download {download})")]
    NegativeDelta {
        grant_id: GrantId,
        upload: i64,
        download: i64,
    },

    #[error("report for grant {grant_id} stamped {reported_at} predates the reset at {reset_at}")]
    StaleReport {
        grant_id: GrantId,
        reported_at: DateTime<Utc>,
        reset_at: DateTime<Utc>,
    },

    #[error("duplicate report for grant {grant_id}: sequence {sequence} already seen (last {last})")]
    DuplicateReport {
        grant_id: GrantId,
        sequence: u64,
        last: u64,
    },
}

/// Failure reported by the node collaborator for one command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeCommandError {
    #[error("node unreachable: {0}")]
    Transient(String),

    #[error("node rejected command: {0}")]
    Rejected(String),
}

impl NodeCommandError {
    pub fn is_transient(&self) -> bool {
        matches!(self, NodeCommandError::Transient(_))
    }
}
