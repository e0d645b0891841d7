use finops_core::prelude::*;
use finops_core::{Budget, StaticProvider};
use std::sync::Arc;

fn sample_records(cloud: &str, account: &str, daily: f64) -> Vec<CostRecord> {
    (1..=28)
        .filter_map(|d| NaiveDate::from_ymd_opt(2024, 2, d))
        .flat_map(|date| {
            [
                CostRecord::new(cloud, account, "Compute", daily, date)
                    .with_tag("cost_center", "Platform"),
                CostRecord::new(cloud, account, "Storage", daily / 4.0, date),
            ]
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config {
        budgets: vec![Budget::new("monthly", 5_000.0, vec![50.0, 75.0, 90.0])],
        ..Config::default()
    };

    let mut monitor = CostMonitor::new(config);
    monitor.register_provider(
        "aws",
        Arc::new(StaticProvider::new("aws", sample_records("aws", "111", 80.0))),
    );
    monitor.register_provider(
        "gcp",
        Arc::new(StaticProvider::new("gcp", sample_records("gcp", "proj", 40.0))),
    );

    let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap_or_default();
    let end = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap_or_default();
    let report = monitor.run(start, end, &CancellationToken::new()).await?;

    let result = report.result();
    println!("Total spend {}..{}: ${:.2}", result.start(), result.end(), result.total_cost());
    for (provider, cost) in result.by_provider() {
        println!("  {:<8} ${:>10.2}", provider, cost);
    }

    println!("\nTop services:");
    for (service, cost) in result.top_services(3) {
        println!("  {:<16} ${:>10.2}", service, cost);
    }

    match report.budget_alerts() {
        Ok(alerts) => {
            for alert in alerts {
                println!(
                    "\nBudget '{}' at {:.1}% (threshold {:.0}%, {})",
                    alert.budget_name(),
                    alert.percent_used(),
                    alert.threshold(),
                    alert.severity().name()
                );
            }
        }
        Err(e) => eprintln!("budget check failed: {}", e),
    }

    if let Ok(chargeback) = report.chargeback() {
        println!("\nChargeback {}:", chargeback.period());
        for allocation in chargeback.allocations() {
            println!(
                "  {:<10} ${:>10.2} (direct ${:.2}, allocated ${:.2})",
                allocation.cost_center(),
                allocation.total_cost(),
                allocation.direct_cost(),
                allocation.allocated_cost()
            );
        }
    }

    Ok(())
}
