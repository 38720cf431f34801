use crate::load_tests::{LoadTestResults, RequestMetrics};
use crate::scenarios::ScenarioResults;
use anyhow::Result;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Write the load results as JSON and Markdown next to `output_path`
pub fn generate_reports(results: &LoadTestResults, output_path: &str) -> Result<()> {
    let json_path = with_extension(output_path, "json");
    write_json(results, &json_path)?;
    info!("JSON report generated: {}", json_path);

    let md_path = with_extension(output_path, "md");
    write_file(&md_path, &load_markdown(results))?;
    info!("Markdown report generated: {}", md_path);

    Ok(())
}

pub fn generate_scenario_report(results: &ScenarioResults, output_path: &str) -> Result<()> {
    let json_path = with_extension(output_path, "json");
    write_json(results, &json_path)?;
    info!("JSON report generated: {}", json_path);

    let md_path = with_extension(output_path, "md");
    write_file(&md_path, &scenario_markdown(results))?;
    info!("Markdown report generated: {}", md_path);

    Ok(())
}

fn with_extension(path: &str, extension: &str) -> String {
    Path::new(path)
        .with_extension(extension)
        .to_string_lossy()
        .into_owned()
}

fn write_json<T: Serialize>(value: &T, path: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_file(path, &json)
}

fn write_file(path: &str, content: &str) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn load_markdown(results: &LoadTestResults) -> String {
    let mut content = String::new();

    content.push_str("# Flowgate Controller Load Test Report\n\n");
    content.push_str(&format!("**Test Duration:** {} seconds\n\n", results.test_duration_secs));

    content.push_str("## Summary\n\n");
    content.push_str(&format!("- **Grants:** {}\n", results.grants));
    content.push_str(&format!("- **Concurrency:** {}\n", results.concurrency));
    content.push_str(&format!("- **Total Reports:** {}\n", results.total_reports));
    content.push_str(&format!("- **Accepted Reports:** {}\n", results.accepted_reports));
    content.push_str(&format!("- **Rejected Reports:** {}\n", results.rejected_reports));
    content.push_str(&format!("- **Reports per Second:** {:.2}\n", results.reports_per_second));
    content.push_str(&format!("- **Billed Bytes:** {}\n", results.billed_bytes));
    content.push_str(&format!(
        "- **Ledger Consistent:** {}\n\n",
        if results.ledger_consistent { "yes" } else { "NO" }
    ));

    content.push_str("## Usage Report Latency\n\n");
    push_metrics_table(&mut content, &results.report_metrics);
    content.push_str("## Sweep Latency\n\n");
    push_metrics_table(&mut content, &results.sweep_metrics);

    content
}

fn push_metrics_table(content: &mut String, metrics: &RequestMetrics) {
    content.push_str("| Metric | Value |\n");
    content.push_str("|--------|-------|\n");
    content.push_str(&format!("| Total | {} |\n", metrics.total_requests));
    content.push_str(&format!("| Successful | {} |\n", metrics.successful));
    content.push_str(&format!("| Failed | {} |\n", metrics.failed));
    content.push_str(&format!("| Avg Latency | {:.3} ms |\n", metrics.avg_latency_ms));
    content.push_str(&format!("| Min Latency | {:.3} ms |\n", metrics.min_latency_ms));
    content.push_str(&format!("| Max Latency | {:.3} ms |\n", metrics.max_latency_ms));
    content.push_str(&format!("| P50 Latency | {:.3} ms |\n", metrics.p50_latency_ms));
    content.push_str(&format!("| P95 Latency | {:.3} ms |\n", metrics.p95_latency_ms));
    content.push_str(&format!("| P99 Latency | {:.3} ms |\n\n", metrics.p99_latency_ms));
}

fn scenario_markdown(results: &ScenarioResults) -> String {
    let mut content = String::new();

    content.push_str("# Flowgate Policy Scenario Report\n\n");
    content.push_str(&format!(
        "**Total:** {}, **Passed:** {}, **Failed:** {}\n\n",
        results.total_tests, results.passed, results.failed
    ));
    content.push_str("| Scenario | Result | Duration | Error |\n");
    content.push_str("|----------|--------|----------|-------|\n");
    for test in &results.test_details {
        content.push_str(&format!(
            "| {} | {} | {} ms | {} |\n",
            test.name,
            if test.passed { "PASS" } else { "FAIL" },
            test.duration_ms,
            test.error.as_deref().unwrap_or("")
        ));
    }

    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::TestResult;

    fn metrics() -> RequestMetrics {
        RequestMetrics {
            total_requests: 10,
            successful: 9,
            failed: 1,
            avg_latency_ms: 0.5,
            min_latency_ms: 0.1,
            max_latency_ms: 2.0,
            p50_latency_ms: 0.4,
            p95_latency_ms: 1.5,
            p99_latency_ms: 1.9,
        }
    }

    #[test]
    fn reports_are_written_beside_output_path() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("load-report.md");
        let results = LoadTestResults {
            test_duration_secs: 1,
            grants: 2,
            concurrency: 4,
            total_reports: 10,
            accepted_reports: 9,
            rejected_reports: 1,
            reports_per_second: 10.0,
            billed_bytes: 4096,
            ledger_consistent: true,
            report_metrics: metrics(),
            sweep_metrics: metrics(),
        };

        generate_reports(&results, output.to_str().unwrap()).unwrap();

        let json = std::fs::read_to_string(dir.path().join("load-report.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["billed_bytes"], 4096);
        let markdown = std::fs::read_to_string(&output).unwrap();
        assert!(markdown.contains("**Ledger Consistent:** yes"));
        assert!(markdown.contains("## Sweep Latency"));
    }

    #[test]
    fn scenario_markdown_lists_failures() {
        let results = ScenarioResults {
            total_tests: 1,
            passed: 0,
            failed: 1,
            test_details: vec![TestResult {
                name: "Quota crossing".to_string(),
                passed: false,
                error: Some("still enabled".to_string()),
                duration_ms: 12,
            }],
        };
        let markdown = scenario_markdown(&results);
        assert!(markdown.contains("| Quota crossing | FAIL | 12 ms | still enabled |"));
    }
}
