use super::{AuditedRecord, NodeId, TunnelId};
use crate::error::PolicyError;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TunnelType {
    PortForward,
    TunnelForward,
}

impl TunnelType {
    pub fn code(self) -> i32 {
        match self {
            TunnelType::PortForward => 1,
            TunnelType::TunnelForward => 2,
        }
    }
}

impl TryFrom<i32> for TunnelType {
    type Error = PolicyError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TunnelType::PortForward),
            2 => Ok(TunnelType::TunnelForward),
            other => Err(PolicyError::UnknownCode {
                field: "type",
                value: other.into(),
            }),
        }
    }
}

/// How raw byte counters combine into billable flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowMode {
    UploadOnly,
    Bidirectional,
}

impl FlowMode {
    pub fn code(self) -> i32 {
        match self {
            FlowMode::UploadOnly => 1,
            FlowMode::Bidirectional => 2,
        }
    }

    pub fn raw_flow(self, upload: u64, download: u64) -> u64 {
        match self {
            FlowMode::UploadOnly => upload,
            FlowMode::Bidirectional => upload.saturating_add(download),
        }
    }
}

impl TryFrom<i32> for FlowMode {
    type Error = PolicyError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FlowMode::UploadOnly),
            2 => Ok(FlowMode::Bidirectional),
            other => Err(PolicyError::UnknownCode {
                field: "flow",
                value: other.into(),
            }),
        }
    }
}

/// Billing terms of a tunnel: which counters count and how they are scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Billing {
    pub flow_mode: FlowMode,
    pub traffic_ratio: Decimal,
}

impl Billing {
    /// Billable bytes for a usage delta: the flow mode picks the raw counters,
    /// the traffic ratio scales them and the fraction is truncated.
    pub fn billable_bytes(&self, upload: u64, download: u64) -> u64 {
        let raw = Decimal::from(self.flow_mode.raw_flow(upload, download));
        raw.checked_mul(self.traffic_ratio)
            .map(|billed| billed.trunc().to_u64().unwrap_or(u64::MAX))
            .unwrap_or(u64::MAX)
    }
}

/// A forwarding path between an ingress and an egress node.
///
/// Node ids are weak references; the tunnel does not own node lifecycle.
/// Listen addresses are carried verbatim to the nodes and never parsed here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tunnel {
    pub record: AuditedRecord,
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

impl Tunnel {
    pub fn id(&self) -> TunnelId {
        self.record.id
    }

    pub fn billing(&self) -> Billing {
        Billing {
            flow_mode: self.flow_mode,
            traffic_ratio: self.traffic_ratio,
        }
    }

    pub fn billable_bytes(&self, upload: u64, download: u64) -> u64 {
        self.billing().billable_bytes(upload, download)
    }
}
