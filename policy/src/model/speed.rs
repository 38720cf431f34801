use super::{SpeedRuleId, TunnelId};
use serde::{Deserialize, Serialize};

/// A named rate limit scoped to one tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedLimitRule {
    pub id: SpeedRuleId,
    pub name: String,
    pub tunnel_id: TunnelId,
    pub speed_mbps: u64,
}

impl SpeedLimitRule {
    pub fn rate_limit_params(&self) -> RateLimitParams {
        // Megabits per second to bytes per second
        let bytes_per_second = self.speed_mbps.saturating_mul(1_000_000) / 8;
        RateLimitParams {
            rule_id: self.id,
            bytes_per_second,
            burst_bytes: bytes_per_second,
        }
    }
}

/// Concrete rate-limit parameters carried by an enable command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimitParams {
    pub rule_id: SpeedRuleId,
    pub bytes_per_second: u64,
    pub burst_bytes: u64,
}
