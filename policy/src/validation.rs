//! Boundary validation for admin payloads.
//!
//! Each DTO mirrors the JSON an admin client submits. `validate` checks every
//! constraint and reports all violations at once; only a validated draft or
//! update can be turned into a core record.

use crate::model::{
    AuditedRecord, FlowMode, GrantId, GrantStatus, NodeId, SpeedLimitRule, SpeedRuleId, Tunnel,
    TunnelId, TunnelType, UserAccount, UserId, UserTunnelGrant,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: &'static str,
    pub message: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Validation failed: {}", summarize(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn has_violation(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("{} {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Default)]
struct Violations(Vec<Violation>);

impl Violations {
    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(Violation {
            field,
            message: message.into(),
        });
    }

    fn required<T: Copy>(&mut self, field: &'static str, value: Option<T>) -> Option<T> {
        if value.is_none() {
            self.push(field, "is required");
        }
        value
    }

    fn non_negative(&mut self, field: &'static str, value: Option<i64>) -> Option<u64> {
        let value = self.required(field, value)?;
        match u64::try_from(value) {
            Ok(v) => Some(v),
            Err(_) => {
                self.push(field, "must not be negative");
                None
            }
        }
    }

    fn forward_count(&mut self, field: &'static str, value: Option<i64>) -> Option<u32> {
        let value = self.non_negative(field, value)?;
        match u32::try_from(value) {
            Ok(v) => Some(v),
            Err(_) => {
                self.push(field, "is too large");
                None
            }
        }
    }

    fn instant(&mut self, field: &'static str, millis: Option<i64>) -> Option<DateTime<Utc>> {
        let millis = self.required(field, millis)?;
        match common::datetime_from_millis(millis) {
            Ok(instant) => Some(instant),
            Err(_) => {
                self.push(field, "is not a valid timestamp");
                None
            }
        }
    }

    /// The reset instant uses `0` as "never resets".
    fn reset_instant(
        &mut self,
        field: &'static str,
        millis: Option<i64>,
    ) -> Option<Option<DateTime<Utc>>> {
        match self.required(field, millis)? {
            0 => Some(None),
            m if m < 0 => {
                self.push(field, "must not be negative");
                None
            }
            m => self.instant(field, Some(m)).map(Some),
        }
    }

    fn status(&mut self, field: &'static str, code: Option<i32>) -> Option<GrantStatus> {
        let code = self.required(field, code)?;
        match GrantStatus::try_from(code) {
            Ok(status) => Some(status),
            Err(_) => {
                self.push(field, "must be 0 (disabled) or 1 (enabled)");
                None
            }
        }
    }

    fn finish<T>(self, build: impl FnOnce() -> Option<T>) -> Result<T, ValidationError> {
        if !self.0.is_empty() {
            return Err(ValidationError { violations: self.0 });
        }
        build().ok_or_else(|| ValidationError {
            violations: vec![Violation {
                field: "payload",
                message: "is incomplete".to_string(),
            }],
        })
    }
}

/// Admin update of an existing grant's limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantUpdateDto {
    pub id: Option<i64>,
    pub flow: Option<i64>,
    pub num: Option<i64>,
    pub flow_reset_time: Option<i64>,
    pub exp_time: Option<i64>,
    pub status: Option<i32>,
    pub speed_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantUpdate {
    pub id: GrantId,
    pub flow: u64,
    pub num: u32,
    pub flow_reset_time: Option<DateTime<Utc>>,
    pub exp_time: DateTime<Utc>,
    pub status: GrantStatus,
    pub speed_id: Option<SpeedRuleId>,
}

impl GrantUpdateDto {
    pub fn validate(&self) -> Result<GrantUpdate, ValidationError> {
        let mut v = Violations::default();
        let id = v.required("id", self.id);
        let flow = v.non_negative("flow", self.flow);
        let num = v.forward_count("num", self.num);
        let flow_reset_time = v.reset_instant("flowResetTime", self.flow_reset_time);
        let exp_time = v.instant("expTime", self.exp_time);
        let status = v.status("status", self.status);

        v.finish(|| {
            Some(GrantUpdate {
                id: id?,
                flow: flow?,
                num: num?,
                flow_reset_time: flow_reset_time?,
                exp_time: exp_time?,
                status: status?,
                speed_id: self.speed_id,
            })
        })
    }
}

impl GrantUpdate {
    pub fn apply_to(&self, grant: &mut UserTunnelGrant, now: DateTime<Utc>) {
        grant.flow = self.flow;
        grant.num = self.num;
        grant.flow_reset_time = self.flow_reset_time;
        grant.exp_time = self.exp_time;
        grant.status = self.status;
        grant.speed_id = self.speed_id;
        grant.record.touch(now);
    }
}

/// Admin assignment of quota to a user on a tunnel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantCreateDto {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub tunnel_id: Option<i64>,
    pub flow: Option<i64>,
    pub num: Option<i64>,
    pub flow_reset_time: Option<i64>,
    pub exp_time: Option<i64>,
    /// Defaults to enabled when omitted.
    pub status: Option<i32>,
    pub speed_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantDraft {
    pub id: GrantId,
    pub user_id: UserId,
    pub tunnel_id: TunnelId,
    pub flow: u64,
    pub num: u32,
    pub flow_reset_time: Option<DateTime<Utc>>,
    pub exp_time: DateTime<Utc>,
    pub status: GrantStatus,
    pub speed_id: Option<SpeedRuleId>,
}

impl GrantCreateDto {
    pub fn validate(&self) -> Result<GrantDraft, ValidationError> {
        let mut v = Violations::default();
        let id = v.required("id", self.id);
        let user_id = v.required("userId", self.user_id);
        let tunnel_id = v.required("tunnelId", self.tunnel_id);
        let flow = v.non_negative("flow", self.flow);
        let num = v.forward_count("num", self.num);
        let flow_reset_time = v.reset_instant("flowResetTime", self.flow_reset_time);
        let exp_time = v.instant("expTime", self.exp_time);
        let status = v.status(
            "status",
            Some(self.status.unwrap_or(GrantStatus::Enabled.code())),
        );

        v.finish(|| {
            Some(GrantDraft {
                id: id?,
                user_id: user_id?,
                tunnel_id: tunnel_id?,
                flow: flow?,
                num: num?,
                flow_reset_time: flow_reset_time?,
                exp_time: exp_time?,
                status: status?,
                speed_id: self.speed_id,
            })
        })
    }
}

impl GrantDraft {
    pub fn into_grant(self, now: DateTime<Utc>) -> UserTunnelGrant {
        UserTunnelGrant {
            record: AuditedRecord::new(self.id, now),
            user_id: self.user_id,
            tunnel_id: self.tunnel_id,
            flow: self.flow,
            num: self.num,
            flow_reset_time: self.flow_reset_time,
            exp_time: self.exp_time,
            status: self.status,
            speed_id: self.speed_id,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelDto {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub in_node_id: Option<i64>,
    pub in_ip: Option<String>,
    pub out_node_id: Option<i64>,
    pub out_ip: Option<String>,
    #[serde(rename = "type")]
    pub tunnel_type: Option<i32>,
    /// Flow accounting mode: 1 upload only, 2 both directions.
    #[serde(rename = "flow")]
    pub flow_mode: Option<i32>,
    pub protocol: Option<String>,
    pub traffic_ratio: Option<Decimal>,
    pub tcp_listen_addr: Option<String>,
    pub udp_listen_addr: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TunnelDraft {
    pub id: TunnelId,
    pub name: String,
    pub in_node_id: NodeId,
    pub in_ip: Option<String>,
    pub out_node_id: Option<NodeId>,
    pub out_ip: Option<String>,
    pub tunnel_type: TunnelType,
    pub flow_mode: FlowMode,
    pub protocol: String,
    pub traffic_ratio: Decimal,
    pub tcp_listen_addr: Option<String>,
    pub udp_listen_addr: Option<String>,
}

impl TunnelDto {
    pub fn validate(&self) -> Result<TunnelDraft, ValidationError> {
        let mut v = Violations::default();
        let id = v.required("id", self.id);
        let name = match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Some(name.to_string()),
            _ => {
                v.push("name", "must not be blank");
                None
            }
        };
        let in_node_id = v.required("inNodeId", self.in_node_id);
        let tunnel_type = v
            .required("type", self.tunnel_type)
            .and_then(|code| match TunnelType::try_from(code) {
                Ok(t) => Some(t),
                Err(_) => {
                    v.push("type", "must be 1 (port forward) or 2 (tunnel forward)");
                    None
                }
            });
        let flow_mode = v
            .required("flow", self.flow_mode)
            .and_then(|code| match FlowMode::try_from(code) {
                Ok(m) => Some(m),
                Err(_) => {
                    v.push("flow", "must be 1 (upload only) or 2 (bidirectional)");
                    None
                }
            });
        let traffic_ratio = match self.traffic_ratio {
            Some(ratio) if ratio.is_sign_negative() && !ratio.is_zero() => {
                v.push("trafficRatio", "must not be negative");
                None
            }
            Some(ratio) => Some(ratio),
            None => Some(Decimal::ONE),
        };

        v.finish(|| {
            Some(TunnelDraft {
                id: id?,
                name: name?,
                in_node_id: in_node_id?,
                in_ip: self.in_ip.clone(),
                out_node_id: self.out_node_id,
                out_ip: self.out_ip.clone(),
                tunnel_type: tunnel_type?,
                flow_mode: flow_mode?,
                protocol: self.protocol.clone().unwrap_or_else(|| "tls".to_string()),
                traffic_ratio: traffic_ratio?,
                tcp_listen_addr: self.tcp_listen_addr.clone(),
                udp_listen_addr: self.udp_listen_addr.clone(),
            })
        })
    }
}

impl TunnelDraft {
    /// Builds the record, keeping the creation time of the tunnel it replaces.
    pub fn into_tunnel(self, previous: Option<&Tunnel>, now: DateTime<Utc>) -> Tunnel {
        let record = match previous {
            Some(existing) => AuditedRecord {
                id: self.id,
                created_at: existing.record.created_at,
                updated_at: now,
            },
            None => AuditedRecord::new(self.id, now),
        };
        Tunnel {
            record,
            name: self.name,
            in_node_id: self.in_node_id,
            in_ip: self.in_ip,
            out_node_id: self.out_node_id,
            out_ip: self.out_ip,
            tunnel_type: self.tunnel_type,
            flow_mode: self.flow_mode,
            protocol: self.protocol,
            traffic_ratio: self.traffic_ratio,
            tcp_listen_addr: self.tcp_listen_addr,
            udp_listen_addr: self.udp_listen_addr,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedRuleDto {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub tunnel_id: Option<i64>,
    /// Megabits per second.
    pub speed: Option<i64>,
}

impl SpeedRuleDto {
    pub fn validate(&self) -> Result<SpeedLimitRule, ValidationError> {
        let mut v = Violations::default();
        let id = v.required("id", self.id);
        let tunnel_id = v.required("tunnelId", self.tunnel_id);
        let speed_mbps = v.non_negative("speed", self.speed);
        if speed_mbps == Some(0) {
            v.push("speed", "must be greater than 0");
        }

        v.finish(|| {
            Some(SpeedLimitRule {
                id: id?,
                name: self.name.clone().unwrap_or_default(),
                tunnel_id: tunnel_id?,
                speed_mbps: speed_mbps?,
            })
        })
    }
}

/// Admin create or update of a user account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub flow: Option<i64>,
    pub num: Option<i64>,
    /// Day of the month the account's counters reset on, `0` for never.
    pub flow_reset_time: Option<i64>,
    pub exp_time: Option<i64>,
    /// Defaults to enabled when omitted.
    pub status: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDraft {
    pub id: UserId,
    pub name: String,
    pub flow: u64,
    pub num: u32,
    pub flow_reset_day: u32,
    pub exp_time: DateTime<Utc>,
    pub status: GrantStatus,
}

impl UserDto {
    pub fn validate(&self) -> Result<UserDraft, ValidationError> {
        let mut v = Violations::default();
        let id = v.required("id", self.id);
        let flow = v.non_negative("flow", self.flow);
        let num = v.forward_count("num", self.num);
        let flow_reset_day = match self.flow_reset_time.unwrap_or(0) {
            day @ 0..=31 => Some(day as u32),
            _ => {
                v.push("flowResetTime", "must be a day of the month (1-31) or 0");
                None
            }
        };
        let exp_time = v.instant("expTime", self.exp_time);
        let status = v.status(
            "status",
            Some(self.status.unwrap_or(GrantStatus::Enabled.code())),
        );

        v.finish(|| {
            Some(UserDraft {
                id: id?,
                name: self.name.as_deref().map(str::trim).unwrap_or_default().to_string(),
                flow: flow?,
                num: num?,
                flow_reset_day: flow_reset_day?,
                exp_time: exp_time?,
                status: status?,
            })
        })
    }
}

impl UserDraft {
    /// Builds the record, keeping the creation time of the account it replaces.
    pub fn into_account(self, previous: Option<&UserAccount>, now: DateTime<Utc>) -> UserAccount {
        let record = match previous {
            Some(existing) => AuditedRecord {
                id: self.id,
                created_at: existing.record.created_at,
                updated_at: now,
            },
            None => AuditedRecord::new(self.id, now),
        };
        UserAccount {
            record,
            name: self.name,
            flow: self.flow,
            num: self.num,
            flow_reset_day: self.flow_reset_day,
            exp_time: self.exp_time,
            status: self.status,
        }
    }
}
