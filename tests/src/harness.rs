use crate::mock_node::MockNode;
use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use controller::config::ControllerConfig;
use controller::store::MemoryStore;
use controller::{ControlPlane, ReconcileOutcome, RetryConfig};
use policy::{GrantCreateDto, GrantId, TunnelDto, TunnelId, UsageReport};
use std::sync::Arc;
use std::time::Duration;

/// A control plane wired to a mock node and an in-memory store.
pub struct Harness {
    pub control: Arc<ControlPlane>,
    pub node: Arc<MockNode>,
}

impl Harness {
    pub fn new(node_latency: Duration) -> Self {
        let config = ControllerConfig {
            command_timeout_secs: 1,
            retry: RetryConfig {
                base_delay_ms: 10,
                max_retries: 3,
                max_delay_ms: 100,
                jitter: false,
            },
            ..Default::default()
        };
        let node = Arc::new(MockNode::new(node_latency));
        let control = Arc::new(ControlPlane::new(
            Arc::new(config),
            Arc::new(MemoryStore::new()),
            node.clone(),
        ));
        Self { control, node }
    }

    /// Tunnel with ratio 1. `flow_mode` 1 bills upload only, 2 both directions.
    pub async fn tunnel(&self, tunnel_id: TunnelId, flow_mode: i32) -> Result<()> {
        self.control
            .upsert_tunnel(
                &TunnelDto {
                    id: Some(tunnel_id),
                    name: Some(format!("tunnel-{}", tunnel_id)),
                    in_node_id: Some(1),
                    out_node_id: Some(2),
                    tunnel_type: Some(2),
                    flow_mode: Some(flow_mode),
                    ..Default::default()
                },
                Utc::now(),
            )
            .await?;
        Ok(())
    }

    pub fn grant_dto(grant_id: GrantId, tunnel_id: TunnelId, flow: i64, num: i64) -> GrantCreateDto {
        GrantCreateDto {
            id: Some(grant_id),
            user_id: Some(grant_id * 10),
            tunnel_id: Some(tunnel_id),
            flow: Some(flow),
            num: Some(num),
            flow_reset_time: Some(0),
            exp_time: Some((Utc::now() + TimeDelta::days(30)).timestamp_millis()),
            ..Default::default()
        }
    }

    pub async fn grant(&self, dto: GrantCreateDto) -> Result<ReconcileOutcome> {
        Ok(self.control.create_grant(&dto, Utc::now()).await?)
    }

    pub fn report(grant_id: GrantId, upload: i64, download: i64, at: DateTime<Utc>) -> UsageReport {
        UsageReport {
            grant_id,
            upload_bytes: upload,
            download_bytes: download,
            active_forwards: 1,
            timestamp: at,
            sequence: None,
        }
    }

    /// Gives delivery workers time to drain.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
}
