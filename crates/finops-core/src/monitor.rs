use crate::aggregator::Aggregator;
use crate::chargeback::{ChargebackAllocator, ChargebackReport};
use crate::config::Config;
use crate::data_structures::{AggregationResult, Anomaly, BudgetAlert};
use crate::error::{ProviderError, Result};
use crate::provider::{CostProvider, FileProvider};
use chrono::{Datelike, NaiveDate};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs every analysis over a single aggregation.
pub struct CostMonitor {
    aggregator: Aggregator,
}

impl CostMonitor {
    pub fn new(config: Config) -> Self {
        Self {
            aggregator: Aggregator::new(config),
        }
    }

    /// Registers a [`FileProvider`] for every provider in the config.
    pub fn from_config(config: Config) -> Self {
        let providers = config.providers.clone();
        let mut monitor = Self::new(config);
        for provider in providers {
            let path = provider.expanded_path();
            info!(
                provider = %provider.name,
                cloud = %provider.cloud,
                path = %path.display(),
                "Registering file provider"
            );
            let file = FileProvider::new(provider.name.clone(), path).with_cloud(provider.cloud);
            monitor.register_provider(provider.name, Arc::new(file));
        }
        monitor
    }

    pub fn register_provider(&mut self, name: impl Into<String>, provider: Arc<dyn CostProvider>) {
        self.aggregator.register_provider(name, provider);
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn config(&self) -> &Config {
        self.aggregator.config()
    }

    /// Aggregates once, then runs anomaly detection, budget checks and
    /// chargeback over the same result. Budgets are monthly, so they only
    /// see the month-to-date slice of it. A component error lands in the
    /// report instead of failing the run.
    pub async fn run(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let (result, failures) = self.aggregator.aggregate(start, end, cancel).await?.into_parts();

        let anomalies = self.aggregator.detect_anomalies(&result);

        let month_to_date = result.since(month_start(end));
        let budget_window = (month_to_date.start(), month_to_date.end());
        let budget_alerts = self.aggregator.check_budgets(&month_to_date).map_err(|e| {
            warn!(error = %e, "Budget check failed");
            e.to_string()
        });

        let chargeback = self.chargeback(&result).map_err(|e| {
            warn!(error = %e, "Chargeback allocation failed");
            e.to_string()
        });

        Ok(RunReport {
            result,
            failures,
            anomalies,
            budget_window,
            budget_alerts,
            chargeback,
        })
    }

    pub fn chargeback(&self, result: &AggregationResult) -> Result<ChargebackReport> {
        let allocator = ChargebackAllocator::new(self.config().chargeback.clone())?;
        Ok(allocator
            .allocate(result.entries())
            .into_report(period_label(result.start(), result.end())))
    }
}

/// First day of the month `date` falls in.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// `YYYY-MM` for a window inside one month, otherwise `start..end`.
pub fn period_label(start: NaiveDate, end: NaiveDate) -> String {
    if start.year() == end.year() && start.month() == end.month() {
        start.format("%Y-%m").to_string()
    } else {
        format!("{}..{}", start, end)
    }
}

#[derive(Debug)]
pub struct RunReport {
    result: AggregationResult,
    failures: Vec<ProviderError>,
    anomalies: Vec<Anomaly>,
    budget_window: (NaiveDate, NaiveDate),
    budget_alerts: std::result::Result<Vec<BudgetAlert>, String>,
    chargeback: std::result::Result<ChargebackReport, String>,
}

impl RunReport {
    pub fn result(&self) -> &AggregationResult {
        &self.result
    }

    pub fn failures(&self) -> &[ProviderError] {
        &self.failures
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    /// Month-to-date window the budgets were checked against.
    pub fn budget_window(&self) -> (NaiveDate, NaiveDate) {
        self.budget_window
    }

    pub fn budget_alerts(&self) -> std::result::Result<&[BudgetAlert], &str> {
        self.budget_alerts
            .as_ref()
            .map(Vec::as_slice)
            .map_err(String::as_str)
    }

    pub fn chargeback(&self) -> std::result::Result<&ChargebackReport, &str> {
        self.chargeback.as_ref().map_err(String::as_str)
    }
}
