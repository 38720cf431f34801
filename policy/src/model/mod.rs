mod grant;
mod record;
mod speed;
mod tunnel;
mod user;

pub use grant::{GrantStatus, UserTunnelGrant};
pub use record::AuditedRecord;
pub use speed::{RateLimitParams, SpeedLimitRule};
pub use tunnel::{Billing, FlowMode, Tunnel, TunnelType};
pub use user::UserAccount;

pub type TunnelId = i64;
pub type GrantId = i64;
pub type NodeId = i64;
pub type UserId = i64;
pub type SpeedRuleId = i64;
