use crate::harness::Harness;
use crate::mock_node::ForwardState;
use anyhow::{Result, ensure};
use chrono::{TimeDelta, Utc};
use controller::{ConsistencyError, ControllerError, NodeCommandError};
use policy::{Decision, DisableReason, GrantUpdateDto, NodeCommand, SpeedRuleDto};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Debug, Serialize)]
pub struct ScenarioResults {
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub test_details: Vec<TestResult>,
}

#[derive(Debug, Serialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub error: Option<String>,
    pub duration_ms: u128,
}

/// Run every policy scenario against an in-process control plane
pub async fn run_all_scenarios() -> Result<ScenarioResults> {
    info!("=== Starting Policy Scenarios ===");

    let mut results = ScenarioResults {
        total_tests: 0,
        passed: 0,
        failed: 0,
        test_details: Vec::new(),
    };

    results.add_test(run_scenario("Quota crossing disables tunnel", quota_crossing_disables).await);
    results.add_test(run_scenario("Upload-only billing ignores download", upload_only_billing).await);
    results.add_test(run_scenario("Flapping decision delivers final command", flapping_delivers_final_command).await);
    results.add_test(run_scenario("Expiry disables tunnel", expiry_disables).await);
    results.add_test(run_scenario("Forward limit disables tunnel", forward_limit_disables).await);
    results.add_test(run_scenario("Scheduled reset re-enables tunnel", scheduled_reset_re_enables).await);
    results.add_test(run_scenario("Speed rule resolution", speed_rule_resolution).await);
    results.add_test(run_scenario("Transient node failures are retried", transient_failures_retried).await);
    results.add_test(run_scenario("Concurrent reports are counted exactly", concurrent_reports_counted_exactly).await);
    results.add_test(run_scenario("Duplicate and stale reports are rejected", inconsistent_reports_rejected).await);
    results.add_test(run_scenario("Revoked grant is disabled", revoke_disables).await);

    info!("=== Policy Scenarios Complete ===");
    info!(
        "Total: {}, Passed: {}, Failed: {}",
        results.total_tests, results.passed, results.failed
    );

    Ok(results)
}

impl ScenarioResults {
    fn add_test(&mut self, result: TestResult) {
        self.total_tests += 1;
        if result.passed {
            self.passed += 1;
            info!("✓ {} - PASSED ({} ms)", result.name, result.duration_ms);
        } else {
            self.failed += 1;
            error!(
                "✗ {} - FAILED: {}",
                result.name,
                result.error.as_deref().unwrap_or("Unknown error")
            );
        }
        self.test_details.push(result);
    }
}

async fn run_scenario<F, Fut>(name: &str, scenario: F) -> TestResult
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let start = Instant::now();
    let outcome = scenario().await;
    TestResult {
        name: name.to_string(),
        passed: outcome.is_ok(),
        error: outcome.err().map(|e| format!("{:#}", e)),
        duration_ms: start.elapsed().as_millis(),
    }
}

async fn quota_crossing_disables() -> Result<()> {
    let h = Harness::new(Duration::ZERO);
    h.tunnel(1, 2).await?;
    h.grant(Harness::grant_dto(7, 1, 1000, 0)).await?;
    h.settle().await;
    ensure!(h.node.is_forwarding(7), "grant should start enabled");

    let now = Utc::now();
    let result = h.control.report_usage(&Harness::report(7, 600, 500, now), now).await?;
    ensure!(result.remaining() == -100, "remaining was {}", result.remaining());
    h.settle().await;

    ensure!(
        h.node.state(7) == Some(ForwardState::Disabled(DisableReason::QuotaExceeded)),
        "node state was {:?}",
        h.node.state(7)
    );
    Ok(())
}

async fn upload_only_billing() -> Result<()> {
    let h = Harness::new(Duration::ZERO);
    h.tunnel(1, 1).await?;
    h.grant(Harness::grant_dto(7, 1, 1000, 0)).await?;

    let now = Utc::now();
    let result = h.control.report_usage(&Harness::report(7, 600, 500, now), now).await?;
    ensure!(result.remaining() == 400, "remaining was {}", result.remaining());
    h.settle().await;
    ensure!(h.node.is_forwarding(7), "upload-only grant should stay enabled");
    Ok(())
}

async fn flapping_delivers_final_command() -> Result<()> {
    let h = Harness::new(Duration::from_millis(50));
    h.tunnel(1, 2).await?;
    h.grant(Harness::grant_dto(7, 1, 1000, 0)).await?;
    h.settle().await;

    let now = Utc::now();
    h.control.report_usage(&Harness::report(7, 600, 500, now), now).await?;
    let outcome = h
        .control
        .update_grant(
            &GrantUpdateDto {
                id: Some(7),
                flow: Some(5000),
                num: Some(0),
                flow_reset_time: Some(0),
                exp_time: Harness::grant_dto(7, 1, 0, 0).exp_time,
                status: Some(1),
                speed_id: None,
            },
            now,
        )
        .await?;
    ensure!(outcome.decision == Decision::Enabled, "decision was {}", outcome.decision);
    h.settle().await;

    let applied = h.node.applied_for(7);
    ensure!(
        applied.iter().all(NodeCommand::is_enable),
        "a superseded disable reached the node: {:?}",
        applied
    );
    ensure!(h.node.is_forwarding(7), "grant should end enabled");
    Ok(())
}

async fn expiry_disables() -> Result<()> {
    let h = Harness::new(Duration::ZERO);
    h.tunnel(1, 2).await?;
    h.grant(Harness::grant_dto(7, 1, 0, 0)).await?;

    let report = h.control.reconcile_all(Utc::now() + TimeDelta::days(31)).await;
    ensure!(report.issued == 1, "sweep issued {} commands", report.issued);
    h.settle().await;
    ensure!(
        h.node.state(7) == Some(ForwardState::Disabled(DisableReason::Expired)),
        "node state was {:?}",
        h.node.state(7)
    );
    Ok(())
}

async fn forward_limit_disables() -> Result<()> {
    let h = Harness::new(Duration::ZERO);
    h.tunnel(1, 2).await?;
    h.grant(Harness::grant_dto(7, 1, 0, 2)).await?;

    let now = Utc::now();
    let mut report = Harness::report(7, 10, 10, now);
    report.active_forwards = 2;
    h.control.report_usage(&report, now).await?;
    h.settle().await;
    ensure!(
        h.node.state(7) == Some(ForwardState::Disabled(DisableReason::LimitExceeded)),
        "node state was {:?}",
        h.node.state(7)
    );
    Ok(())
}

async fn scheduled_reset_re_enables() -> Result<()> {
    let h = Harness::new(Duration::ZERO);
    h.tunnel(1, 2).await?;
    let now = Utc::now();
    let reset_at = now + TimeDelta::days(1);
    let mut dto = Harness::grant_dto(7, 1, 1000, 0);
    dto.flow_reset_time = Some(reset_at.timestamp_millis());
    h.grant(dto).await?;

    h.control.report_usage(&Harness::report(7, 600, 500, now), now).await?;
    h.settle().await;
    ensure!(!h.node.is_forwarding(7), "grant should be over quota");

    let report = h.control.reconcile_all(reset_at + TimeDelta::seconds(1)).await;
    ensure!(report.resets.len() == 1, "expected one reset, saw {}", report.resets.len());
    h.settle().await;
    ensure!(h.node.is_forwarding(7), "reset should re-enable the grant");

    let again = h.control.reconcile_all(reset_at + TimeDelta::seconds(2)).await;
    ensure!(again.resets.is_empty(), "reset ran twice for one boundary");
    Ok(())
}

async fn speed_rule_resolution() -> Result<()> {
    let h = Harness::new(Duration::ZERO);
    h.tunnel(1, 2).await?;
    h.control
        .upsert_speed_rule(&SpeedRuleDto {
            id: Some(5),
            name: Some("10M".to_string()),
            tunnel_id: Some(1),
            speed: Some(10),
        })
        .await?;
    let mut dto = Harness::grant_dto(7, 1, 0, 0);
    dto.speed_id = Some(5);
    h.grant(dto).await?;
    h.settle().await;

    match h.node.state(7) {
        Some(ForwardState::Enabled(Some(rate))) => {
            ensure!(rate.bytes_per_second == 1_250_000, "rate was {:?}", rate)
        }
        other => anyhow::bail!("expected a rate-limited enable, node state was {:?}", other),
    }

    h.control.remove_speed_rule(5).await?;
    h.settle().await;
    ensure!(
        h.node.state(7) == Some(ForwardState::Disabled(DisableReason::SpeedRuleUnresolved(5))),
        "node state was {:?}",
        h.node.state(7)
    );
    Ok(())
}

async fn transient_failures_retried() -> Result<()> {
    let h = Harness::new(Duration::ZERO);
    h.node
        .fail_next(NodeCommandError::Transient("connection refused".to_string()));
    h.node
        .fail_next(NodeCommandError::Transient("connection reset".to_string()));
    h.tunnel(1, 2).await?;
    h.grant(Harness::grant_dto(7, 1, 0, 0)).await?;
    h.settle().await;

    ensure!(h.node.calls() == 3, "node saw {} calls", h.node.calls());
    ensure!(h.node.is_forwarding(7), "retries should end with the grant enabled");
    Ok(())
}

async fn concurrent_reports_counted_exactly() -> Result<()> {
    let h = Arc::new(Harness::new(Duration::ZERO));
    h.tunnel(1, 2).await?;
    h.grant(Harness::grant_dto(7, 1, 0, 0)).await?;

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let h = h.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    let now = Utc::now();
                    h.control
                        .report_usage(&Harness::report(7, 1, 1, now), now)
                        .await?;
                }
                Ok::<_, ControllerError>(())
            })
        })
        .collect();
    for result in futures::future::join_all(tasks).await {
        result??;
    }

    let billed = h.control.ledger().current_usage(7)?;
    ensure!(billed == 3200, "billed {} bytes, expected 3200", billed);
    Ok(())
}

async fn inconsistent_reports_rejected() -> Result<()> {
    let h = Harness::new(Duration::ZERO);
    h.tunnel(1, 2).await?;
    h.grant(Harness::grant_dto(7, 1, 0, 0)).await?;
    let now = Utc::now();

    let mut first = Harness::report(7, 10, 0, now);
    first.sequence = Some(1);
    h.control.report_usage(&first, now).await?;
    let duplicate = h.control.report_usage(&first, now).await;
    ensure!(
        matches!(
            duplicate,
            Err(ControllerError::Consistency(ConsistencyError::DuplicateReport { .. }))
        ),
        "duplicate was {:?}",
        duplicate
    );

    let negative = h
        .control
        .report_usage(&Harness::report(7, -1, 0, now), now)
        .await;
    ensure!(
        matches!(
            negative,
            Err(ControllerError::Consistency(ConsistencyError::NegativeDelta { .. }))
        ),
        "negative delta was {:?}",
        negative
    );

    let billed = h.control.ledger().current_usage(7)?;
    ensure!(billed == 10, "billed {} bytes, expected 10", billed);
    Ok(())
}

async fn revoke_disables() -> Result<()> {
    let h = Harness::new(Duration::ZERO);
    h.tunnel(1, 2).await?;
    h.grant(Harness::grant_dto(7, 1, 0, 0)).await?;
    h.settle().await;

    h.control.revoke_grant(7).await?;
    h.settle().await;
    ensure!(
        h.node.state(7) == Some(ForwardState::Disabled(DisableReason::Revoked)),
        "node state was {:?}",
        h.node.state(7)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_scenario_passes() {
        let results = run_all_scenarios().await.unwrap();
        let failures: Vec<_> = results
            .test_details
            .iter()
            .filter(|r| !r.passed)
            .map(|r| format!("{}: {}", r.name, r.error.as_deref().unwrap_or("")))
            .collect();
        assert!(failures.is_empty(), "failed scenarios: {:?}", failures);
        assert_eq!(results.total_tests, 11);
    }

    #[tokio::test]
    async fn failing_scenario_is_reported() {
        let result = run_scenario("always fails", || async { anyhow::bail!("boom") }).await;
        assert!(!result.passed);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }
}
