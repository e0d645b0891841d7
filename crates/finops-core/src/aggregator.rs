//! Concurrent multi-provider aggregation.
//!
//! Every registered provider is fetched on its own task. Each task builds a
//! private partial summary; the partials are merged only after all tasks
//! have reported, so no shared state is touched while fetches are running.

use crate::anomaly::{AnomalyDetector, DetectorConfig};
use crate::budget::BudgetChecker;
use crate::config::Config;
use crate::data_structures::{AggregationResult, Anomaly, BudgetAlert, PartialAggregation};
use crate::error::{FinopsError, ProviderError, Result};
use crate::provider::CostProvider;
use chrono::NaiveDate;
use futures::FutureExt;
use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type FetchOutcome = std::result::Result<PartialAggregation, ProviderError>;

pub struct Aggregator {
    config: Config,
    providers: BTreeMap<String, Arc<dyn CostProvider>>,
}

impl Aggregator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            providers: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registering a name twice replaces the earlier provider.
    pub fn register_provider(&mut self, name: impl Into<String>, provider: Arc<dyn CostProvider>) {
        let name = name.into();
        if self.providers.insert(name.clone(), provider).is_some() {
            debug!(provider = %name, "Replaced previously registered provider");
        }
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Fetches `start..=end` from every provider and merges what came back.
    ///
    /// Individual provider failures are returned alongside the result. Only
    /// when every provider fails does the whole call fail.
    pub async fn aggregate(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<AggregateOutcome> {
        if self.providers.is_empty() {
            return Err(FinopsError::config("aggregator", "no providers registered"));
        }
        if start > end {
            return Err(FinopsError::config(
                "aggregator",
                format!("window start {} is after end {}", start, end),
            ));
        }

        let timeout = self.config.aggregator.fetch_timeout();
        let mut tasks = JoinSet::new();
        let mut pending: HashSet<String> = HashSet::new();

        for (name, provider) in &self.providers {
            let name = name.clone();
            let provider = Arc::clone(provider);
            let cancel = cancel.clone();
            pending.insert(name.clone());

            tasks.spawn(async move {
                let outcome = fetch_partial(&name, provider, start, end, timeout, cancel).await;
                (name, outcome)
            });
        }

        let mut partials = Vec::new();
        let mut failures = Vec::new();
        let mut join_failures = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, outcome)) => {
                    pending.remove(&name);
                    match outcome {
                        Ok(partial) => partials.push(partial),
                        Err(e) => failures.push(e),
                    }
                }
                Err(e) => join_failures.push(e.to_string()),
            }
        }

        // Tasks that died without reporting back still owe a result.
        for provider in pending {
            failures.push(ProviderError::TaskAborted {
                provider,
                start,
                end,
                reason: if join_failures.is_empty() {
                    "fetch task ended without reporting".to_string()
                } else {
                    join_failures.join("; ")
                },
            });
        }

        failures.sort_by(|a, b| a.provider().cmp(b.provider()));

        if partials.is_empty() {
            return Err(FinopsError::AggregationFailed {
                start,
                end,
                errors: failures,
            });
        }

        for failure in &failures {
            warn!(provider = failure.provider(), error = %failure, "Provider excluded from aggregation");
        }

        partials.sort_by(|a, b| a.provider().cmp(b.provider()));

        let mut result = AggregationResult::new(start, end);
        for partial in partials {
            debug!(
                provider = partial.provider(),
                records = partial.record_count(),
                "Merging provider records"
            );
            result.merge(partial);
        }

        info!(
            %start,
            %end,
            providers = result.by_provider().len(),
            failed = failures.len(),
            records = result.entry_count(),
            total_cost = result.total_cost(),
            "Aggregation complete"
        );

        Ok(AggregateOutcome { result, failures })
    }

    /// Anomalies in the aggregated records, scored relative to the end of
    /// the aggregated window.
    pub fn detect_anomalies(&self, result: &AggregationResult) -> Vec<Anomaly> {
        if !self.config.anomaly.enabled {
            debug!("Anomaly detection disabled");
            return Vec::new();
        }

        let detector = AnomalyDetector::with_reference_date(
            DetectorConfig::from(&self.config.anomaly),
            result.end(),
        );
        detector.detect(result.entries())
    }

    pub fn check_budgets(&self, result: &AggregationResult) -> Result<Vec<BudgetAlert>> {
        let checker = BudgetChecker::new(self.config.budgets.clone())?;
        Ok(checker.check(result))
    }
}

/// A merged result plus the providers that could not contribute to it.
#[derive(Debug)]
pub struct AggregateOutcome {
    result: AggregationResult,
    failures: Vec<ProviderError>,
}

impl AggregateOutcome {
    pub fn result(&self) -> &AggregationResult {
        &self.result
    }

    pub fn failures(&self) -> &[ProviderError] {
        &self.failures
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn into_parts(self) -> (AggregationResult, Vec<ProviderError>) {
        (self.result, self.failures)
    }
}

async fn fetch_partial(
    name: &str,
    provider: Arc<dyn CostProvider>,
    start: NaiveDate,
    end: NaiveDate,
    timeout: Option<Duration>,
    cancel: CancellationToken,
) -> FetchOutcome {
    let fetch = AssertUnwindSafe(provider.fetch(start, end)).catch_unwind();
    let bounded = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, fetch)
                .await
                .map_err(|_| ProviderError::TimedOut {
                    provider: name.to_string(),
                    start,
                    end,
                    timeout_secs: limit.as_secs(),
                }),
            None => Ok(fetch.await),
        }
    };

    let fetched = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled {
            provider: name.to_string(),
            start,
            end,
        }),
        fetched = bounded => fetched,
    }?;

    match fetched {
        Ok(Ok(records)) => {
            debug!(provider = name, records = records.len(), "Provider fetch succeeded");
            Ok(PartialAggregation::from_records(name, records))
        }
        Ok(Err(source)) => Err(ProviderError::Fetch {
            provider: name.to_string(),
            start,
            end,
            source,
        }),
        Err(panic) => Err(ProviderError::TaskAborted {
            provider: name.to_string(),
            start,
            end,
            reason: panic_message(panic.as_ref()),
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AggregatorConfig, AnomalyConfig, Budget};
    use crate::data_structures::CostRecord;
    use crate::provider::StaticProvider;
    use async_trait::async_trait;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    struct FailingProvider;

    #[async_trait]
    impl CostProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn fetch(&self, _: NaiveDate, _: NaiveDate) -> anyhow::Result<Vec<CostRecord>> {
            Err(anyhow::anyhow!("credentials expired"))
        }
    }

    struct SlowProvider(Duration);

    #[async_trait]
    impl CostProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn fetch(&self, start: NaiveDate, _: NaiveDate) -> anyhow::Result<Vec<CostRecord>> {
            tokio::time::sleep(self.0).await;
            Ok(vec![CostRecord::new("azure", "sub", "Compute", 1.0, start)])
        }
    }

    struct PanickingProvider;

    #[async_trait]
    impl CostProvider for PanickingProvider {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn fetch(&self, _: NaiveDate, _: NaiveDate) -> anyhow::Result<Vec<CostRecord>> {
            panic!("malformed billing payload")
        }
    }

    fn aws() -> Arc<dyn CostProvider> {
        Arc::new(StaticProvider::new(
            "aws",
            vec![
                CostRecord::new("aws", "111", "Compute", 10.0, day(1)).with_region("us-east-1"),
                CostRecord::new("aws", "111", "Storage", 2.5, day(2)).with_region("us-east-1"),
            ],
        ))
    }

    fn gcp() -> Arc<dyn CostProvider> {
        Arc::new(StaticProvider::new(
            "gcp",
            vec![CostRecord::new("gcp", "proj", "Compute", 7.5, day(2)).with_region("us-central1")],
        ))
    }

    #[tokio::test]
    async fn test_aggregate_merges_all_providers() {
        let mut aggregator = Aggregator::new(Config::default());
        aggregator.register_provider("aws", aws());
        aggregator.register_provider("gcp", gcp());

        let outcome = aggregator
            .aggregate(day(1), day(31), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.is_partial());

        let result = outcome.result();
        assert_eq!(result.total_cost(), 20.0);
        assert_eq!(result.by_provider()["aws"], 12.5);
        assert_eq!(result.by_provider()["gcp"], 7.5);
        assert_eq!(result.by_service()["Compute"], 17.5);
        assert_eq!(result.by_date()[&day(2)], 10.0);
        assert_eq!(result.entry_count(), 3);
    }

    #[tokio::test]
    async fn test_breakdowns_sum_to_total() {
        let mut aggregator = Aggregator::new(Config::default());
        aggregator.register_provider("aws", aws());
        aggregator.register_provider("gcp", gcp());

        let outcome = aggregator
            .aggregate(day(1), day(31), &CancellationToken::new())
            .await
            .unwrap();
        let result = outcome.result();
        let total = result.total_cost();

        for breakdown in [
            result.by_provider(),
            result.by_service(),
            result.by_account(),
            result.by_region(),
        ] {
            assert!((breakdown.values().sum::<f64>() - total).abs() < 1e-9);
        }
        assert!((result.by_date().values().sum::<f64>() - total).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successes() {
        let mut aggregator = Aggregator::new(Config::default());
        aggregator.register_provider("aws", aws());
        aggregator.register_provider("azure", Arc::new(FailingProvider));

        let outcome = aggregator
            .aggregate(day(1), day(31), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_partial());
        assert_eq!(outcome.failures().len(), 1);
        assert_eq!(outcome.failures()[0].provider(), "azure");
        assert!(outcome.failures()[0].to_string().contains("credentials expired"));
        assert_eq!(outcome.result().total_cost(), 12.5);
        assert!(!outcome.result().by_provider().contains_key("azure"));
    }

    #[tokio::test]
    async fn test_all_providers_fail() {
        let mut aggregator = Aggregator::new(Config::default());
        aggregator.register_provider("azure", Arc::new(FailingProvider));
        aggregator.register_provider("other", Arc::new(FailingProvider));

        let err = aggregator
            .aggregate(day(1), day(31), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            FinopsError::AggregationFailed { errors, start, .. } => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].provider(), "azure");
                assert_eq!(errors[1].provider(), "other");
                assert_eq!(start, day(1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_no_providers_is_configuration_error() {
        let aggregator = Aggregator::new(Config::default());
        let err = aggregator
            .aggregate(day(1), day(31), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FinopsError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_inverted_window_rejected() {
        let mut aggregator = Aggregator::new(Config::default());
        aggregator.register_provider("aws", aws());
        let err = aggregator
            .aggregate(day(31), day(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FinopsError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_register_same_name_replaces() {
        let mut aggregator = Aggregator::new(Config::default());
        aggregator.register_provider("cloud", aws());
        aggregator.register_provider("cloud", gcp());
        assert_eq!(aggregator.provider_names(), vec!["cloud"]);

        let outcome = aggregator
            .aggregate(day(1), day(31), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.result().by_provider()["cloud"], 7.5);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let mut aggregator = Aggregator::new(Config::default());
        aggregator.register_provider("aws", aws());
        aggregator.register_provider("gcp", gcp());

        let token = CancellationToken::new();
        token.cancel();

        match aggregator.aggregate(day(1), day(31), &token).await {
            Err(FinopsError::AggregationFailed { errors, .. }) => {
                assert_eq!(errors.len(), 2);
                assert!(errors.iter().all(ProviderError::is_cancelled));
            }
            other => panic!("expected every fetch to be cancelled, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_fetch() {
        let mut aggregator = Aggregator::new(Config::default());
        aggregator.register_provider("aws", aws());
        aggregator.register_provider("slow", Arc::new(SlowProvider(Duration::from_secs(3600))));

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let outcome = aggregator.aggregate(day(1), day(31), &token).await.unwrap();
        assert_eq!(outcome.failures().len(), 1);
        assert!(outcome.failures()[0].is_cancelled());
        assert_eq!(outcome.failures()[0].provider(), "slow");
        assert_eq!(outcome.result().total_cost(), 12.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let config = Config {
            aggregator: AggregatorConfig {
                fetch_timeout_secs: Some(5),
            },
            ..Config::default()
        };
        let mut aggregator = Aggregator::new(config);
        aggregator.register_provider("aws", aws());
        aggregator.register_provider("slow", Arc::new(SlowProvider(Duration::from_secs(60))));

        let outcome = aggregator
            .aggregate(day(1), day(31), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.failures().len(), 1);
        assert!(matches!(
            outcome.failures()[0],
            ProviderError::TimedOut { timeout_secs: 5, .. }
        ));
        assert_eq!(outcome.result().by_provider().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_within_timeout_succeeds() {
        let config = Config {
            aggregator: AggregatorConfig {
                fetch_timeout_secs: Some(5),
            },
            ..Config::default()
        };
        let mut aggregator = Aggregator::new(config);
        aggregator.register_provider("slow", Arc::new(SlowProvider(Duration::from_secs(1))));

        let outcome = aggregator
            .aggregate(day(1), day(31), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.is_partial());
        assert_eq!(outcome.result().total_cost(), 1.0);
    }

    #[tokio::test]
    async fn test_panicking_provider_is_isolated() {
        let mut aggregator = Aggregator::new(Config::default());
        aggregator.register_provider("aws", aws());
        aggregator.register_provider("panicking", Arc::new(PanickingProvider));

        let outcome = aggregator
            .aggregate(day(1), day(31), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.failures().len(), 1);
        match &outcome.failures()[0] {
            ProviderError::TaskAborted { provider, reason, .. } => {
                assert_eq!(provider, "panicking");
                assert!(reason.contains("malformed billing payload"));
            }
            other => panic!("unexpected failure: {other}"),
        }
        assert_eq!(outcome.result().total_cost(), 12.5);
    }

    #[tokio::test]
    async fn test_check_budgets_and_disabled_anomalies() {
        let config = Config {
            budgets: vec![Budget::new("org", 20.0, vec![50.0, 90.0])],
            anomaly: AnomalyConfig {
                enabled: false,
                ..AnomalyConfig::default()
            },
            ..Config::default()
        };
        let mut aggregator = Aggregator::new(config);
        aggregator.register_provider("aws", aws());

        let outcome = aggregator
            .aggregate(day(1), day(31), &CancellationToken::new())
            .await
            .unwrap();

        let alerts = aggregator.check_budgets(outcome.result()).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].threshold(), 50.0);
        assert!(aggregator.detect_anomalies(outcome.result()).is_empty());
    }
}
