use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use crate::identifier::PartitionKey;

fn default_currency() -> String {
    "USD".to_string()
}

/// One normalized billing line from a cloud provider.
///
/// Records are facts: once a provider hands them over nothing downstream
/// mutates them, so every field is private behind a getter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    cloud: String,
    account: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    cloud_service: String,
    #[serde(default)]
    service: String,
    cost: f64,
    #[serde(default = "default_currency")]
    currency: String,
    #[serde(default)]
    usage_quantity: f64,
    #[serde(default)]
    usage_unit: String,
    date: NaiveDate,
    #[serde(default)]
    tags: HashMap<String, String>,
}

impl CostRecord {
    pub fn new(
        cloud: impl Into<String>,
        account: impl Into<String>,
        service: impl Into<String>,
        cost: f64,
        date: NaiveDate,
    ) -> Self {
        let service = service.into();
        Self {
            cloud: cloud.into(),
            account: account.into(),
            region: String::new(),
            cloud_service: service.clone(),
            service,
            cost,
            currency: default_currency(),
            usage_quantity: 0.0,
            usage_unit: String::new(),
            date,
            tags: HashMap::new(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Sets the provider's own service name, keeping the normalized one.
    pub fn with_cloud_service(mut self, cloud_service: impl Into<String>) -> Self {
        self.cloud_service = cloud_service.into();
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    pub fn with_usage(mut self, quantity: f64, unit: impl Into<String>) -> Self {
        self.usage_quantity = quantity;
        self.usage_unit = unit.into();
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn cloud(&self) -> &str {
        &self.cloud
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn cloud_service(&self) -> &str {
        &self.cloud_service
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn usage_quantity(&self) -> f64 {
        self.usage_quantity
    }

    pub fn usage_unit(&self) -> &str {
        &self.usage_unit
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    /// Non-empty tag value, if any.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::new(&self.cloud, &self.account, &self.service)
    }
}

/// Merged spend summary for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationResult {
    start: NaiveDate,
    end: NaiveDate,
    total_cost: f64,
    by_provider: HashMap<String, f64>,
    by_service: HashMap<String, f64>,
    by_account: HashMap<String, f64>,
    by_region: HashMap<String, f64>,
    by_date: BTreeMap<NaiveDate, f64>,
    /// provider -> account -> cost
    by_provider_account: HashMap<String, HashMap<String, f64>>,
    entries: Vec<CostRecord>,
    /// Which slice of `entries` each provider contributed
    #[serde(skip)]
    provider_entries: Vec<(String, Range<usize>)>,
}

impl AggregationResult {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            total_cost: 0.0,
            by_provider: HashMap::new(),
            by_service: HashMap::new(),
            by_account: HashMap::new(),
            by_region: HashMap::new(),
            by_date: BTreeMap::new(),
            by_provider_account: HashMap::new(),
            entries: Vec::new(),
            provider_entries: Vec::new(),
        }
    }

    /// Folds one provider's partial accumulation into the result.
    pub(crate) fn merge(&mut self, partial: PartialAggregation) {
        self.total_cost += partial.total_cost;
        *self.by_provider.entry(partial.provider.clone()).or_insert(0.0) += partial.total_cost;
        merge_into(
            self.by_provider_account.entry(partial.provider.clone()).or_default(),
            partial.by_account.clone(),
        );
        merge_into(&mut self.by_service, partial.by_service);
        merge_into(&mut self.by_account, partial.by_account);
        merge_into(&mut self.by_region, partial.by_region);
        for (date, cost) in partial.by_date {
            *self.by_date.entry(date).or_insert(0.0) += cost;
        }
        let first = self.entries.len();
        self.entries.extend(partial.entries);
        self.provider_entries
            .push((partial.provider, first..self.entries.len()));
    }

    /// Re-aggregates the records dated on or after `start`, keeping each
    /// record attributed to the provider that returned it.
    pub fn since(&self, start: NaiveDate) -> AggregationResult {
        let mut result = AggregationResult::new(start.max(self.start), self.end);
        for (provider, range) in &self.provider_entries {
            let records = self.entries[range.clone()]
                .iter()
                .filter(|record| record.date() >= start)
                .cloned()
                .collect();
            result.merge(PartialAggregation::from_records(provider.clone(), records));
        }
        result
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn by_provider(&self) -> &HashMap<String, f64> {
        &self.by_provider
    }

    pub fn by_service(&self) -> &HashMap<String, f64> {
        &self.by_service
    }

    pub fn by_account(&self) -> &HashMap<String, f64> {
        &self.by_account
    }

    pub fn by_region(&self) -> &HashMap<String, f64> {
        &self.by_region
    }

    pub fn by_date(&self) -> &BTreeMap<NaiveDate, f64> {
        &self.by_date
    }

    /// Spend for one account as reported by one provider.
    pub fn provider_account_cost(&self, provider: &str, account: &str) -> f64 {
        self.by_provider_account
            .get(provider)
            .and_then(|accounts| accounts.get(account))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn entries(&self) -> &[CostRecord] {
        &self.entries
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `n` most expensive `cloud:service` pairs, largest first.
    pub fn top_services(&self, n: usize) -> Vec<(String, f64)> {
        let mut services: HashMap<String, f64> = HashMap::new();
        for entry in &self.entries {
            *services
                .entry(format!("{}:{}", entry.cloud(), entry.service()))
                .or_insert(0.0) += entry.cost();
        }

        let mut ranked: Vec<(String, f64)> = services.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }
}

fn merge_into(target: &mut HashMap<String, f64>, source: HashMap<String, f64>) {
    for (key, cost) in source {
        *target.entry(key).or_insert(0.0) += cost;
    }
}

/// Private accumulator owned by a single fetch task.
#[derive(Debug, Clone)]
pub(crate) struct PartialAggregation {
    provider: String,
    total_cost: f64,
    by_service: HashMap<String, f64>,
    by_account: HashMap<String, f64>,
    by_region: HashMap<String, f64>,
    by_date: BTreeMap<NaiveDate, f64>,
    entries: Vec<CostRecord>,
}

impl PartialAggregation {
    pub(crate) fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            total_cost: 0.0,
            by_service: HashMap::new(),
            by_account: HashMap::new(),
            by_region: HashMap::new(),
            by_date: BTreeMap::new(),
            entries: Vec::new(),
        }
    }

    pub(crate) fn from_records(provider: impl Into<String>, records: Vec<CostRecord>) -> Self {
        let mut partial = Self::new(provider);
        for record in records {
            partial.add_record(record);
        }
        partial
    }

    pub(crate) fn add_record(&mut self, record: CostRecord) {
        let cost = record.cost();
        self.total_cost += cost;
        *self.by_service.entry(record.service().to_string()).or_insert(0.0) += cost;
        *self.by_account.entry(record.account().to_string()).or_insert(0.0) += cost;
        *self.by_region.entry(record.region().to_string()).or_insert(0.0) += cost;
        *self.by_date.entry(record.date()).or_insert(0.0) += cost;
        self.entries.push(record);
    }

    pub(crate) fn provider(&self) -> &str {
        &self.provider
    }

    pub(crate) fn record_count(&self) -> usize {
        self.entries.len()
    }
}

/// Statistics of one partition's historical window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Baseline {
    mean: f64,
    std_dev: f64,
    min: f64,
    max: f64,
    count: usize,
}

impl Baseline {
    pub fn new(mean: f64, std_dev: f64, min: f64, max: f64, count: usize) -> Self {
        Self {
            mean,
            std_dev,
            min,
            max,
            count,
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

impl Sensitivity {
    /// Minimum |z| that counts as anomalous. Lower is stricter.
    pub fn z_threshold(&self) -> f64 {
        match self {
            Sensitivity::Low => 3.0,
            Sensitivity::Medium => 2.0,
            Sensitivity::High => 1.5,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Sensitivity::Low => "low",
            Sensitivity::Medium => "medium",
            Sensitivity::High => "high",
        }
    }
}

impl std::str::FromStr for Sensitivity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Sensitivity::Low),
            "medium" => Ok(Sensitivity::Medium),
            "high" => Ok(Sensitivity::High),
            other => Err(format!("unknown sensitivity '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AnomalySeverity {
    pub fn from_z_score(z_score: f64) -> Self {
        let magnitude = z_score.abs();
        if magnitude >= 4.0 {
            AnomalySeverity::Critical
        } else if magnitude >= 3.0 {
            AnomalySeverity::High
        } else if magnitude >= 2.0 {
            AnomalySeverity::Medium
        } else {
            AnomalySeverity::Low
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            AnomalySeverity::Low => 1,
            AnomalySeverity::Medium => 2,
            AnomalySeverity::High => 3,
            AnomalySeverity::Critical => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AnomalySeverity::Low => "low",
            AnomalySeverity::Medium => "medium",
            AnomalySeverity::High => "high",
            AnomalySeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    key: PartitionKey,
    date: NaiveDate,
    actual_cost: f64,
    expected_cost: f64,
    deviation: f64,
    /// Absent when the baseline mean is zero
    percent_change: Option<f64>,
    severity: AnomalySeverity,
    reason: String,
}

impl Anomaly {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key: PartitionKey,
        date: NaiveDate,
        actual_cost: f64,
        expected_cost: f64,
        deviation: f64,
        percent_change: Option<f64>,
        severity: AnomalySeverity,
        reason: String,
    ) -> Self {
        Self {
            key,
            date,
            actual_cost,
            expected_cost,
            deviation,
            percent_change,
            severity,
            reason,
        }
    }

    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn actual_cost(&self) -> f64 {
        self.actual_cost
    }

    pub fn expected_cost(&self) -> f64 {
        self.expected_cost
    }

    /// z-score of the actual cost against the baseline
    pub fn deviation(&self) -> f64 {
        self.deviation
    }

    pub fn percent_change(&self) -> Option<f64> {
        self.percent_change
    }

    pub fn severity(&self) -> AnomalySeverity {
        self.severity
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedCostRule {
    pub cost_center: String,
    pub percentage: f64,
}

impl SharedCostRule {
    pub fn new(cost_center: impl Into<String>, percentage: f64) -> Self {
        Self {
            cost_center: cost_center.into(),
            percentage,
        }
    }
}

/// Cost charged to one cost center.
#[derive(Debug, Clone, Serialize)]
pub struct Allocation {
    cost_center: String,
    total_cost: f64,
    direct_cost: f64,
    allocated_cost: f64,
    by_cloud: HashMap<String, f64>,
    by_service: HashMap<String, f64>,
    #[serde(skip)]
    records: Vec<CostRecord>,
}

impl Allocation {
    pub fn new(cost_center: impl Into<String>) -> Self {
        Self {
            cost_center: cost_center.into(),
            total_cost: 0.0,
            direct_cost: 0.0,
            allocated_cost: 0.0,
            by_cloud: HashMap::new(),
            by_service: HashMap::new(),
            records: Vec::new(),
        }
    }

    pub(crate) fn add_direct(&mut self, record: &CostRecord) {
        self.direct_cost += record.cost();
        self.total_cost += record.cost();
        self.add_breakdown(record);
        self.records.push(record.clone());
    }

    /// Shared cost with no record-level breakdown.
    pub(crate) fn add_allocated(&mut self, amount: f64) {
        self.allocated_cost += amount;
        self.total_cost += amount;
    }

    /// Shared cost that keeps the untagged record's cloud/service breakdown.
    pub(crate) fn absorb_untagged(&mut self, record: &CostRecord) {
        self.add_allocated(record.cost());
        self.add_breakdown(record);
        self.records.push(record.clone());
    }

    fn add_breakdown(&mut self, record: &CostRecord) {
        *self.by_cloud.entry(record.cloud().to_string()).or_insert(0.0) += record.cost();
        *self
            .by_service
            .entry(record.service().to_string())
            .or_insert(0.0) += record.cost();
    }

    pub fn cost_center(&self) -> &str {
        &self.cost_center
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn direct_cost(&self) -> f64 {
        self.direct_cost
    }

    pub fn allocated_cost(&self) -> f64 {
        self.allocated_cost
    }

    pub fn by_cloud(&self) -> &HashMap<String, f64> {
        &self.by_cloud
    }

    pub fn by_service(&self) -> &HashMap<String, f64> {
        &self.by_service
    }

    pub fn records(&self) -> &[CostRecord] {
        &self.records
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Low,
    Medium,
    High,
}

impl AlertSeverity {
    /// Severity of crossing the given alert percentage.
    pub fn for_threshold(percent: f64) -> Self {
        if percent >= 90.0 {
            AlertSeverity::High
        } else if percent >= 75.0 {
            AlertSeverity::Medium
        } else if percent >= 50.0 {
            AlertSeverity::Low
        } else {
            AlertSeverity::Info
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetAlert {
    budget_name: String,
    provider_filter: Option<String>,
    scope: Option<String>,
    limit: f64,
    current_spend: f64,
    percent_used: f64,
    threshold: f64,
    severity: AlertSeverity,
    alerted_at: DateTime<Utc>,
}

impl BudgetAlert {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        budget_name: impl Into<String>,
        provider_filter: Option<String>,
        scope: Option<String>,
        limit: f64,
        current_spend: f64,
        percent_used: f64,
        threshold: f64,
        alerted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            budget_name: budget_name.into(),
            provider_filter,
            scope,
            limit,
            current_spend,
            percent_used,
            threshold,
            severity: AlertSeverity::for_threshold(threshold),
            alerted_at,
        }
    }

    pub fn budget_name(&self) -> &str {
        &self.budget_name
    }

    pub fn provider_filter(&self) -> Option<&str> {
        self.provider_filter.as_deref()
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }

    pub fn current_spend(&self) -> f64 {
        self.current_spend
    }

    pub fn percent_used(&self) -> f64 {
        self.percent_used
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn severity(&self) -> AlertSeverity {
        self.severity
    }

    pub fn alerted_at(&self) -> DateTime<Utc> {
        self.alerted_at
    }
}
