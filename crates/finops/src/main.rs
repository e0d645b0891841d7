use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use finops_core::monitor::{month_start, period_label};
use finops_core::prelude::*;
use finops_core::{AnomalyDetector, BudgetChecker, ChargebackAllocator, DetectorConfig, Sensitivity};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod report;

#[derive(Parser, Debug)]
#[clap(author = "Red", version, about)]
struct Args {
    /// Pipeline configuration (YAML)
    #[arg(short, long, default_value = "finops.yaml", global = true)]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// First day of the window (default: 30 days before --end)
    #[arg(long, global = true)]
    start: Option<NaiveDate>,

    /// Last day of the window (default: today)
    #[arg(long, global = true)]
    end: Option<NaiveDate>,

    /// Also write the output as JSON to this path (`-` for stdout)
    #[arg(long, global = true)]
    json: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Aggregate spend across every configured provider
    Aggregate {
        /// How many services to list
        #[arg(long, default_value_t = 10)]
        top: usize,
    },

    /// Detect statistical cost anomalies
    Anomaly {
        /// Days of history to fetch, ending at --end
        #[arg(long, default_value_t = 60)]
        days: u32,

        /// low, medium or high (overrides the config)
        #[arg(long)]
        sensitivity: Option<Sensitivity>,
    },

    /// Allocate spend to cost centers
    Chargeback {
        /// Calendar month to allocate, YYYY-MM (overrides --start/--end)
        #[arg(long)]
        month: Option<String>,

        /// Write the report as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Check month-to-date spend against budgets
    Budget,

    /// Aggregate once and run every analysis
    Run,
}

fn init_tracing(log_level: &str) -> Result<()> {
    let level = match log_level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    // RUST_LOG wins when set
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn load_config(path: &str) -> Result<Config> {
    let path = shellexpand::tilde(path);
    let config = Config::load(&*path)
        .with_context(|| format!("Failed to load config from {}", path))?;
    if config.providers.is_empty() {
        warn!("No providers configured");
    }
    Ok(config)
}

/// Cancels in-flight fetches on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling provider fetches");
            cancel.cancel();
        }
    });
    token
}

fn window(args: &Args, default_days: i64) -> (NaiveDate, NaiveDate) {
    let end = args.end.unwrap_or_else(|| Utc::now().date_naive());
    let start = args.start.unwrap_or(end - Duration::days(default_days));
    (start, end)
}

fn month_window(month: &str) -> Result<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d")
        .with_context(|| format!("Invalid month '{}', expected YYYY-MM", month))?;
    let next = if start.month() == 12 {
        NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
    };
    let end = next
        .and_then(|next| next.pred_opt())
        .with_context(|| format!("Month '{}' is out of range", month))?;
    Ok((start, end))
}

fn write_json<T: Serialize>(path: Option<&Path>, value: &T) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };

    let content = serde_json::to_string_pretty(value)?;
    if path == Path::new("-") {
        println!("{}", content);
    } else {
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "Wrote JSON output");
    }
    Ok(())
}

async fn aggregate(
    monitor: &CostMonitor,
    start: NaiveDate,
    end: NaiveDate,
    cancel: &CancellationToken,
) -> Result<AggregationResult> {
    let outcome = monitor.aggregator().aggregate(start, end, cancel).await?;
    report::print_failures(outcome.failures());
    let (result, _) = outcome.into_parts();
    Ok(result)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let mut config = load_config(&args.config)?;
    let cancel = cancel_on_ctrl_c();
    let json = args.json.as_deref();

    match &args.command {
        Command::Aggregate { top } => {
            let (start, end) = window(&args, 30);
            let monitor = CostMonitor::from_config(config);
            let result = aggregate(&monitor, start, end, &cancel).await?;

            report::print_aggregation(&result, *top);
            write_json(json, &result)?;
        }

        Command::Anomaly { days, sensitivity } => {
            if let Some(sensitivity) = sensitivity {
                config.anomaly.sensitivity = *sensitivity;
            }
            let end = args.end.unwrap_or_else(|| Utc::now().date_naive());
            let start = args.start.unwrap_or(end - Duration::days(i64::from(*days)));

            let anomaly_config = config.anomaly.clone();
            let monitor = CostMonitor::from_config(config);
            let result = aggregate(&monitor, start, end, &cancel).await?;

            let detector =
                AnomalyDetector::with_reference_date(DetectorConfig::from(&anomaly_config), end);
            let anomalies = detector.detect(result.entries());

            report::print_anomalies(&anomalies, &anomaly_config);
            write_json(json, &anomalies)?;
        }

        Command::Chargeback { month, csv } => {
            let (start, end) = match month {
                Some(month) => month_window(month)?,
                None => window(&args, 30),
            };

            let allocator = ChargebackAllocator::new(config.chargeback.clone())?;
            let monitor = CostMonitor::from_config(config);
            let result = aggregate(&monitor, start, end, &cancel).await?;

            let chargeback = allocator
                .allocate(result.entries())
                .into_report(period_label(start, end));

            report::print_chargeback(&chargeback);
            if let Some(csv) = csv {
                chargeback.save_csv(csv)?;
                println!("\nCSV written to {}", csv.display());
            }
            write_json(json, &chargeback)?;
        }

        Command::Budget => {
            let end = args.end.unwrap_or_else(|| Utc::now().date_naive());
            let start = args.start.unwrap_or_else(|| month_start(end));

            let checker = BudgetChecker::new(config.budgets.clone())?;
            let monitor = CostMonitor::from_config(config);
            let result = aggregate(&monitor, start, end, &cancel).await?;

            let alerts = checker.check(&result);
            report::print_budgets(&checker, &result, &alerts);
            write_json(json, &alerts)?;
        }

        Command::Run => {
            let (start, end) = window(&args, 30);
            let monitor = CostMonitor::from_config(config);
            let run = monitor.run(start, end, &cancel).await?;

            report::print_run(&run, monitor.config());
            write_json(json, &report::RunSummary::from(&run))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_window() {
        let (start, end) = month_window("2024-02").unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        let (_, end) = month_window("2023-12").unwrap();
        assert_eq!(end, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());

        assert!(month_window("2024-13").is_err());
        assert!(month_window("February").is_err());
    }

    #[test]
    fn test_args_parse_subcommands() {
        let args = Args::try_parse_from([
            "finops",
            "--start",
            "2024-01-01",
            "anomaly",
            "--sensitivity",
            "high",
        ])
        .unwrap();
        assert_eq!(args.start, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert!(matches!(
            args.command,
            Command::Anomaly {
                days: 60,
                sensitivity: Some(Sensitivity::High)
            }
        ));

        let args = Args::try_parse_from(["finops", "chargeback", "--month", "2024-05"]).unwrap();
        assert_eq!(args.config, "finops.yaml");
        assert!(matches!(args.command, Command::Chargeback { month: Some(_), csv: None }));
    }

    #[test]
    fn test_default_window_is_thirty_days() {
        let args = Args::try_parse_from(["finops", "--end", "2024-03-31", "aggregate"]).unwrap();
        let (start, end) = window(&args, 30);
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }
}
