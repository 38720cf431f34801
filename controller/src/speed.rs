use crate::error::{ControllerError, Result};
use dashmap::DashMap;
use policy::{RateLimitParams, SpeedLimitRule, SpeedRuleId, TunnelId};
use tracing::info;

/// Catalogue of speed limit rules, resolved into rate-limit parameters on demand.
pub struct SpeedRuleResolver {
    rules: DashMap<SpeedRuleId, SpeedLimitRule>,
}

impl SpeedRuleResolver {
    pub fn new() -> Self {
        Self {
            rules: DashMap::new(),
        }
    }

    pub fn upsert(&self, rule: SpeedLimitRule) -> Option<SpeedLimitRule> {
        info!(
            rule_id = rule.id,
            tunnel_id = rule.tunnel_id,
            speed_mbps = rule.speed_mbps,
            "Speed limit rule registered"
        );
        self.rules.insert(rule.id, rule)
    }

    pub fn remove(&self, rule_id: SpeedRuleId) -> Option<SpeedLimitRule> {
        self.rules.remove(&rule_id).map(|(_, rule)| rule)
    }

    pub fn get(&self, rule_id: SpeedRuleId) -> Option<SpeedLimitRule> {
        self.rules.get(&rule_id).map(|r| r.value().clone())
    }

    pub fn rules(&self) -> Vec<SpeedLimitRule> {
        self.rules.iter().map(|r| r.value().clone()).collect()
    }

    /// Rate limit for a grant on `tunnel_id`. No rule means unrestricted; a rule
    /// that is missing or scoped to another tunnel is an error.
    pub fn resolve(
        &self,
        speed_id: Option<SpeedRuleId>,
        tunnel_id: TunnelId,
    ) -> Result<Option<RateLimitParams>> {
        let Some(rule_id) = speed_id else {
            return Ok(None);
        };
        let rule = self
            .rules
            .get(&rule_id)
            .ok_or(ControllerError::SpeedRuleNotFound(rule_id))?;
        if rule.tunnel_id != tunnel_id {
            return Err(ControllerError::SpeedRuleTunnelMismatch {
                rule_id,
                rule_tunnel_id: rule.tunnel_id,
                tunnel_id,
            });
        }
        Ok(Some(rule.rate_limit_params()))
    }
}

impl Default for SpeedRuleResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> SpeedRuleResolver {
        let resolver = SpeedRuleResolver::new();
        resolver.upsert(SpeedLimitRule {
            id: 5,
            name: "10M".to_string(),
            tunnel_id: 1,
            speed_mbps: 10,
        });
        resolver
    }

    #[test]
    fn no_rule_is_unrestricted() {
        assert_eq!(resolver().resolve(None, 1).unwrap(), None);
    }

    #[test]
    fn resolves_rule_on_its_tunnel() {
        let params = resolver().resolve(Some(5), 1).unwrap().unwrap();
        assert_eq!(params.bytes_per_second, 1_250_000);
        assert_eq!(params.rule_id, 5);
    }

    #[test]
    fn unknown_rule_is_not_found() {
        assert!(matches!(
            resolver().resolve(Some(6), 1),
            Err(ControllerError::SpeedRuleNotFound(6))
        ));
    }

    #[test]
    fn rule_from_other_tunnel_is_rejected() {
        assert!(matches!(
            resolver().resolve(Some(5), 2),
            Err(ControllerError::SpeedRuleTunnelMismatch {
                rule_id: 5,
                rule_tunnel_id: 1,
                tunnel_id: 2
            })
        ));
    }

    #[test]
    fn removed_rule_stops_resolving() {
        let resolver = resolver();
        assert!(resolver.remove(5).is_some());
        assert!(resolver.resolve(Some(5), 1).is_err());
    }
}
