use chrono::{Duration, NaiveDate};
use finops_core::prelude::*;
use finops_core::{AnomalySeverity, ChargebackConfig, FileProvider, SharedCostRule};
use std::fmt::Write as _;
use std::sync::Arc;
use tempfile::tempdir;

fn end() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
}

/// Sixty days of steady EC2 spend with one spike on the last day, plus an
/// untagged S3 line per day.
fn aws_export() -> String {
    let mut lines = String::new();
    for n in (0..60).rev() {
        let date = end() - Duration::days(n);
        let compute = match n {
            0 => 400.0,
            _ if n % 2 == 0 => 95.0,
            _ => 105.0,
        };
        writeln!(
            lines,
            r#"{{"cloud": "aws", "account": "111", "region": "us-east-1", "cloud_service": "Amazon Elastic Compute Cloud - Compute", "cost": {compute}, "date": "{date}", "tags": {{"cost_center": "Platform"}}}}"#
        )
        .unwrap();
        writeln!(
            lines,
            r#"{{"cloud": "aws", "account": "111", "region": "us-east-1", "cloud_service": "Amazon Simple Storage Service", "cost": 10.0, "date": "{date}"}}"#
        )
        .unwrap();
    }
    lines
}

fn gcp_export() -> String {
    let mut lines = String::new();
    for n in 0..60 {
        let date = end() - Duration::days(n);
        writeln!(
            lines,
            r#"{{"cloud": "gcp", "account": "analytics", "cloud_service": "Cloud SQL", "cost": 30.0, "date": "{date}", "tags": {{"team": "Data"}}}}"#
        )
        .unwrap();
    }
    lines
}

#[tokio::test]
async fn test_full_run_over_file_exports() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("aws.jsonl"), aws_export()).unwrap();
    std::fs::create_dir(dir.path().join("gcp")).unwrap();
    std::fs::write(dir.path().join("gcp").join("june.jsonl"), gcp_export()).unwrap();

    let config = Config::from_yaml_str(&format!(
        r#"
providers:
  - name: aws
    cloud: aws
    path: {aws}
  - name: gcp
    cloud: gcp
    path: {gcp}
budgets:
  - name: org-monthly
    monthly_limit: 100000
    alert_at: [50, 75, 90]
  - name: gcp-only
    provider: gcp
    monthly_limit: 1000
anomaly:
  sensitivity: high
chargeback:
  untagged_pool: Shared
"#,
        aws = dir.path().join("aws.jsonl").display(),
        gcp = dir.path().join("gcp").display(),
    ))
    .unwrap();

    let monitor = CostMonitor::from_config(config);
    let start = end() - Duration::days(59);
    let report = monitor.run(start, end(), &CancellationToken::new()).await.unwrap();

    let result = report.result();
    assert!(report.failures().is_empty());
    assert_eq!(result.entry_count(), 180);
    assert_eq!(result.by_service()["Compute"], 29.0 * 95.0 + 30.0 * 105.0 + 400.0);
    assert_eq!(result.by_service()["Storage"], 600.0);
    assert_eq!(result.by_service()["Database"], 1800.0);

    let total = result.total_cost();
    assert!((result.by_provider().values().sum::<f64>() - total).abs() < 1e-6);
    assert!((result.by_account().values().sum::<f64>() - total).abs() < 1e-6);

    let spike = report
        .anomalies()
        .iter()
        .find(|anomaly| anomaly.date() == end())
        .expect("spike on the last day");
    assert_eq!(spike.key().service(), "Compute");
    assert_eq!(spike.severity(), AnomalySeverity::Critical);

    // budgets only see June, not the whole sixty days
    let june = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    assert_eq!(report.budget_window(), (june, end()));
    let alerts = report.budget_alerts().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].budget_name(), "gcp-only");
    assert_eq!(alerts[0].current_spend(), 900.0);

    let chargeback = report.chargeback().unwrap();
    let centers: Vec<&str> = chargeback
        .allocations()
        .iter()
        .map(|allocation| allocation.cost_center())
        .collect();
    assert_eq!(centers, vec!["Platform", "Data", "Shared"]);
    let allocated: f64 = chargeback.allocations().iter().map(|a| a.total_cost()).sum();
    assert!((allocated - total).abs() < 1e-6);
}

#[tokio::test]
async fn test_missing_export_degrades_to_partial_result() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("gcp.jsonl"), gcp_export()).unwrap();

    let mut aggregator = Aggregator::new(Config::default());
    aggregator.register_provider(
        "aws",
        Arc::new(FileProvider::new("aws", dir.path().join("missing.jsonl"))),
    );
    aggregator.register_provider(
        "gcp",
        Arc::new(FileProvider::new("gcp", dir.path().join("gcp.jsonl"))),
    );

    let outcome = aggregator
        .aggregate(end() - Duration::days(6), end(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.failures().len(), 1);
    assert_eq!(outcome.failures()[0].provider(), "aws");
    assert_eq!(outcome.result().by_provider().len(), 1);
    assert_eq!(outcome.result().total_cost(), 210.0);
}

#[test]
fn test_shared_split_over_limit_rejected_at_load() {
    let err = Config::from_yaml_str(
        r#"
chargeback:
  shared_cost_split:
    - cost_center: Platform
      percentage: 70
    - cost_center: Security
      percentage: 40
"#,
    )
    .unwrap_err();
    assert!(matches!(err, FinopsError::Configuration { .. }));

    // the same rule set built in code is caught by the allocator
    let config = ChargebackConfig {
        shared_cost_split: vec![
            SharedCostRule::new("Platform", 70.0),
            SharedCostRule::new("Security", 40.0),
        ],
        ..ChargebackConfig::default()
    };
    assert!(finops_core::ChargebackAllocator::new(config).is_err());
}
