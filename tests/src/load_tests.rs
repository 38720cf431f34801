use crate::harness::Harness;
use anyhow::Result;
use chrono::Utc;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use policy::GrantId;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestResults {
    pub test_duration_secs: u64,
    pub grants: usize,
    pub concurrency: usize,
    pub total_reports: usize,
    pub accepted_reports: usize,
    pub rejected_reports: usize,
    pub reports_per_second: f64,
    pub billed_bytes: u64,
    pub ledger_consistent: bool,
    pub report_metrics: RequestMetrics,
    pub sweep_metrics: RequestMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub total_requests: usize,
    pub successful: usize,
    pub failed: usize,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
}

struct Counters {
    histogram: Mutex<Histogram<u64>>,
    success: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn new() -> Result<Self> {
        Ok(Self {
            histogram: Mutex::new(Histogram::<u64>::new(3)?),
            success: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        })
    }

    fn record(&self, elapsed: Duration, ok: bool) {
        self.histogram.lock().saturating_record(elapsed.as_micros() as u64);
        if ok {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn metrics(&self) -> RequestMetrics {
        calculate_metrics(
            &self.histogram.lock(),
            self.success.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

/// Drives usage reports from `concurrency` workers against `grants` uncapped
/// grants while a background task sweeps once per second, then checks that
/// the ledger holds exactly the bytes the workers had accepted.
pub async fn run_load_tests(grants: usize, concurrency: usize, duration_secs: u64) -> Result<LoadTestResults> {
    info!("=== Starting Load Tests ===");
    info!("Grants: {}, Concurrency: {}, Duration: {}s", grants, concurrency, duration_secs);

    let harness = Arc::new(Harness::new(Duration::ZERO));
    harness.tunnel(1, 2).await?;
    let grant_ids: Vec<GrantId> = (1..=grants.max(1) as GrantId).collect();
    for grant_id in &grant_ids {
        harness.grant(Harness::grant_dto(*grant_id, 1, 0, 0)).await?;
    }
    let grant_ids = Arc::new(grant_ids);

    let start_time = Instant::now();
    let end_time = start_time + Duration::from_secs(duration_secs);

    let reports = Arc::new(Counters::new()?);
    let sweeps = Arc::new(Counters::new()?);
    let accepted_bytes = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::new();
    for _ in 0..concurrency.max(1) {
        let harness = harness.clone();
        let grant_ids = grant_ids.clone();
        let reports = reports.clone();
        let accepted_bytes = accepted_bytes.clone();
        handles.push(tokio::spawn(async move {
            report_worker(harness, grant_ids, end_time, reports, accepted_bytes).await;
        }));
    }

    let sweep_harness = harness.clone();
    let sweep_counters = sweeps.clone();
    let sweep_handle = tokio::spawn(async move {
        while Instant::now() < end_time {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let started = Instant::now();
            let report = sweep_harness.control.reconcile_all(Utc::now()).await;
            sweep_counters.record(started.elapsed(), report.failed == 0);
        }
    });

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Report worker panicked: {}", e);
        }
    }
    let _ = sweep_handle.await;

    let actual_duration = start_time.elapsed();

    let mut billed_bytes = 0u64;
    for grant_id in grant_ids.iter() {
        billed_bytes += harness.control.ledger().current_usage(*grant_id)?;
    }
    let expected = accepted_bytes.load(Ordering::Relaxed);
    let ledger_consistent = billed_bytes == expected;
    if !ledger_consistent {
        warn!(billed_bytes, expected, "Ledger total differs from accepted reports");
    }

    let report_metrics = reports.metrics();
    let sweep_metrics = sweeps.metrics();
    let total_reports = report_metrics.total_requests;
    let reports_per_second = total_reports as f64 / actual_duration.as_secs_f64();

    let results = LoadTestResults {
        test_duration_secs: actual_duration.as_secs(),
        grants: grant_ids.len(),
        concurrency: concurrency.max(1),
        total_reports,
        accepted_reports: report_metrics.successful,
        rejected_reports: report_metrics.failed,
        reports_per_second,
        billed_bytes,
        ledger_consistent,
        report_metrics,
        sweep_metrics,
    };

    info!("=== Load Tests Complete ===");
    info!("Total Reports: {}", results.total_reports);
    info!("Reports/sec: {:.2}", results.reports_per_second);
    info!("Billed: {} bytes, consistent: {}", results.billed_bytes, results.ledger_consistent);

    Ok(results)
}

async fn report_worker(
    harness: Arc<Harness>,
    grant_ids: Arc<Vec<GrantId>>,
    end_time: Instant,
    counters: Arc<Counters>,
    accepted_bytes: Arc<AtomicU64>,
) {
    while Instant::now() < end_time {
        let (grant_id, upload, download) = {
            let mut rng = rand::rng();
            (
                grant_ids[rng.random_range(0..grant_ids.len())],
                rng.random_range(0..64 * 1024i64),
                rng.random_range(0..256 * 1024i64),
            )
        };
        let now = Utc::now();

        let started = Instant::now();
        let outcome = harness
            .control
            .report_usage(&Harness::report(grant_id, upload, download, now), now)
            .await;
        counters.record(started.elapsed(), outcome.is_ok());

        match outcome {
            Ok(result) => {
                accepted_bytes.fetch_add(result.billed_delta, Ordering::Relaxed);
            }
            Err(e) => warn!(grant_id, error = %e, "Usage report rejected"),
        }
        tokio::task::yield_now().await;
    }
}

fn calculate_metrics(histogram: &Histogram<u64>, success: usize, failed: usize) -> RequestMetrics {
    let total = success + failed;

    if histogram.is_empty() {
        return RequestMetrics {
            total_requests: total,
            successful: success,
            failed,
            avg_latency_ms: 0.0,
            min_latency_ms: 0.0,
            max_latency_ms: 0.0,
            p50_latency_ms: 0.0,
            p95_latency_ms: 0.0,
            p99_latency_ms: 0.0,
        };
    }

    RequestMetrics {
        total_requests: total,
        successful: success,
        failed,
        avg_latency_ms: histogram.mean() / 1000.0,
        min_latency_ms: histogram.min() as f64 / 1000.0,
        max_latency_ms: histogram.max() as f64 / 1000.0,
        p50_latency_ms: histogram.value_at_quantile(0.50) as f64 / 1000.0,
        p95_latency_ms: histogram.value_at_quantile(0.95) as f64 / 1000.0,
        p99_latency_ms: histogram.value_at_quantile(0.99) as f64 / 1000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_from_empty_histogram_are_zero() {
        let histogram = Histogram::<u64>::new(3).unwrap();
        let metrics = calculate_metrics(&histogram, 0, 0);
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.p99_latency_ms, 0.0);
    }

    #[test]
    fn metrics_convert_micros_to_millis() {
        let mut histogram = Histogram::<u64>::new(3).unwrap();
        histogram.record(1_000).unwrap();
        histogram.record(3_000).unwrap();
        let metrics = calculate_metrics(&histogram, 2, 1);
        assert_eq!(metrics.total_requests, 3);
        assert!((metrics.avg_latency_ms - 2.0).abs() < 0.01);
        assert!((metrics.min_latency_ms - 1.0).abs() < 0.01);
        assert!((metrics.max_latency_ms - 3.0).abs() < 0.01);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn short_load_run_keeps_ledger_consistent() {
        let results = run_load_tests(4, 8, 1).await.unwrap();
        assert!(results.total_reports > 0);
        assert_eq!(results.rejected_reports, 0);
        assert!(results.ledger_consistent);
    }
}
