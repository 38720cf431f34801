pub mod decision;
pub mod error;
pub mod message;
pub mod model;
pub mod validation;

pub use decision::Decision;
pub use error::{PolicyError, Result};
pub use message::{DisableReason, NodeCommand, UsageReport};
pub use model::{
    AuditedRecord, Billing, FlowMode, GrantId, GrantStatus, NodeId, RateLimitParams, SpeedLimitRule,
    SpeedRuleId, Tunnel, TunnelId, TunnelType, UserAccount, UserId, UserTunnelGrant,
};
pub use validation::{
    GrantCreateDto, GrantDraft, GrantUpdate, GrantUpdateDto, SpeedRuleDto, TunnelDraft,
    TunnelDto, UserDraft, UserDto, ValidationError, Violation,
};
