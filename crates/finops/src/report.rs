//! Plain-text summaries for the terminal.

use finops_core::{
    AggregationResult, Anomaly, AnomalyConfig, BudgetAlert, BudgetChecker, ChargebackReport,
    Config, ProviderError, RunReport,
};
use chrono::NaiveDate;
use serde::Serialize;

pub fn print_failures(failures: &[ProviderError]) {
    for failure in failures {
        eprintln!("! {}", failure);
    }
}

fn print_breakdown(title: &str, breakdown: &std::collections::HashMap<String, f64>, total: f64) {
    let mut rows: Vec<(&String, &f64)> = breakdown.iter().collect();
    rows.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)));

    println!("\n{}:", title);
    for (name, cost) in rows {
        println!("  {:<32} ${:>12.2}  {:>5.1}%", name, cost, share(*cost, total));
    }
}

fn share(cost: f64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        cost / total * 100.0
    }
}

pub fn print_aggregation(result: &AggregationResult, top: usize) {
    println!(
        "Spend {}..{}: ${:.2} across {} records",
        result.start(),
        result.end(),
        result.total_cost(),
        result.entry_count()
    );

    print_breakdown("By provider", result.by_provider(), result.total_cost());

    println!("\nTop services:");
    for (service, cost) in result.top_services(top) {
        println!(
            "  {:<32} ${:>12.2}  {:>5.1}%",
            service,
            cost,
            share(cost, result.total_cost())
        );
    }

    if let (Some((first, _)), Some((last, _))) =
        (result.by_date().iter().next(), result.by_date().iter().next_back())
    {
        let days = (*last - *first).num_days() + 1;
        println!(
            "\nDaily average over {} days: ${:.2}",
            days,
            result.total_cost() / days as f64
        );
    }
}

pub fn print_anomalies(anomalies: &[Anomaly], config: &AnomalyConfig) {
    if anomalies.is_empty() {
        println!("No anomalies detected ({} sensitivity)", config.sensitivity.name());
        return;
    }

    println!(
        "{} anomalies ({} sensitivity, z >= {}):",
        anomalies.len(),
        config.sensitivity.name(),
        config.sensitivity.z_threshold()
    );
    for anomaly in anomalies {
        // rows past the configured deviation get a marker
        let marker = match anomaly.percent_change() {
            Some(pct) if config.exceeds_deviation(pct) => "*",
            _ => " ",
        };
        let change = match anomaly.percent_change() {
            Some(pct) => format!("{:+.1}%", pct),
            None => "n/a".to_string(),
        };
        let key = anomaly.key().to_string();
        println!(
            "{} [{:<8}] {} {:<40} actual ${:>10.2} expected ${:>10.2} ({}, z={:.2})",
            marker,
            anomaly.severity().name(),
            anomaly.date(),
            key,
            anomaly.actual_cost(),
            anomaly.expected_cost(),
            change,
            anomaly.deviation()
        );
        println!("    {}", anomaly.reason());
    }
}

pub fn print_budgets(checker: &BudgetChecker, result: &AggregationResult, alerts: &[BudgetAlert]) {
    println!("Budgets {}..{}:", result.start(), result.end());
    for budget in checker.budgets() {
        let spend = checker.current_spend(budget, result);
        println!(
            "  {:<24} ${:>12.2} of ${:>12.2}  {:>6.1}%",
            budget.name,
            spend,
            budget.monthly_limit,
            share(spend, budget.monthly_limit)
        );
    }
    print_alerts(alerts);
}

fn print_alerts(alerts: &[BudgetAlert]) {
    if alerts.is_empty() {
        println!("\nNo budget thresholds crossed");
        return;
    }

    println!();
    for alert in alerts {
        println!(
            "[{:<6}] {} reached {:.1}% of ${:.2} (alert at {:.0}%)",
            alert.severity().name(),
            alert.budget_name(),
            alert.percent_used(),
            alert.limit(),
            alert.threshold()
        );
    }
}

pub fn print_chargeback(report: &ChargebackReport) {
    println!("Chargeback {}:", report.period());
    println!(
        "  {:<24} {:>12} {:>12} {:>12} {:>7}",
        "Cost Center", "Total", "Direct", "Allocated", "Share"
    );
    for allocation in report.allocations() {
        println!(
            "  {:<24} {:>12.2} {:>12.2} {:>12.2} {:>6.1}%",
            allocation.cost_center(),
            allocation.total_cost(),
            allocation.direct_cost(),
            allocation.allocated_cost(),
            share(allocation.total_cost(), report.total_cost())
        );
    }
    if report.unallocated() != 0.0 {
        println!(
            "  {:<24} {:>12.2} {:>12} {:>12} {:>6.1}%",
            "(unallocated)",
            report.unallocated(),
            "",
            "",
            share(report.unallocated(), report.total_cost())
        );
    }
    println!("  {:<24} {:>12.2}", "TOTAL", report.total_cost());
}

pub fn print_run(run: &RunReport, config: &Config) {
    print_failures(run.failures());
    print_aggregation(run.result(), 10);

    println!();
    print_anomalies(run.anomalies(), &config.anomaly);

    let (budget_start, budget_end) = run.budget_window();
    println!();
    println!("Budgets (month to date, {}..{}):", budget_start, budget_end);
    match run.budget_alerts() {
        Ok(alerts) => print_alerts(alerts),
        Err(e) => eprintln!("Budget check failed: {}", e),
    }

    println!();
    match run.chargeback() {
        Ok(report) => print_chargeback(report),
        Err(e) => eprintln!("Chargeback failed: {}", e),
    }
}

/// JSON shape of a full run; component errors become strings.
#[derive(Serialize)]
pub struct RunSummary<'a> {
    result: &'a AggregationResult,
    failures: Vec<String>,
    anomalies: &'a [Anomaly],
    budget_window: (NaiveDate, NaiveDate),
    #[serde(skip_serializing_if = "Option::is_none")]
    budget_alerts: Option<&'a [BudgetAlert]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    budget_error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chargeback: Option<&'a ChargebackReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chargeback_error: Option<&'a str>,
}

impl<'a> From<&'a RunReport> for RunSummary<'a> {
    fn from(run: &'a RunReport) -> Self {
        Self {
            result: run.result(),
            failures: run.failures().iter().map(ToString::to_string).collect(),
            anomalies: run.anomalies(),
            budget_window: run.budget_window(),
            budget_alerts: run.budget_alerts().ok(),
            budget_error: run.budget_alerts().err(),
            chargeback: run.chargeback().ok(),
            chargeback_error: run.chargeback().err(),
        }
    }
}
