//! Statistical cost anomaly detection.
//!
//! Each (cloud, account, service) partition gets a baseline from its older
//! records; recent records are scored against it by z-score.

use crate::calculator::Calculator;
use crate::config::AnomalyConfig;
use crate::data_structures::{Anomaly, AnomalySeverity, Baseline, CostRecord, Sensitivity};
use crate::identifier::{Partition, PartitionIdentifier};
use chrono::{Duration, NaiveDate, Utc};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    pub sensitivity: Sensitivity,
    /// Records older than this many days form the baseline
    pub baseline_days: u32,
    /// Records newer than this many days are scored
    pub recent_days: u32,
    /// Partitions whose baseline mean is below this are ignored
    pub min_spend: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sensitivity: Sensitivity::Medium,
            baseline_days: 30,
            recent_days: 7,
            min_spend: 0.0,
        }
    }
}

impl From<&AnomalyConfig> for DetectorConfig {
    fn from(config: &AnomalyConfig) -> Self {
        Self {
            sensitivity: config.sensitivity,
            baseline_days: config.baseline_days,
            recent_days: config.recent_days,
            min_spend: config.min_cost_threshold,
        }
    }
}

pub struct AnomalyDetector {
    config: DetectorConfig,
    reference_date: NaiveDate,
    calculator: Calculator,
    identifier: PartitionIdentifier,
}

impl AnomalyDetector {
    /// Windows are measured back from today (UTC).
    pub fn new(config: DetectorConfig) -> Self {
        Self::with_reference_date(config, Utc::now().date_naive())
    }

    pub fn with_reference_date(config: DetectorConfig, reference_date: NaiveDate) -> Self {
        Self {
            config,
            reference_date,
            calculator: Calculator::new(),
            identifier: PartitionIdentifier::new(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    pub fn detect(&self, records: &[CostRecord]) -> Vec<Anomaly> {
        if records.is_empty() {
            return Vec::new();
        }

        let mut anomalies = Vec::new();
        for partition in self.identifier.identify_partitions(records) {
            anomalies.extend(self.detect_in_partition(&partition));
        }

        anomalies.sort_by(|a, b| b.severity().rank().cmp(&a.severity().rank()));

        info!(
            records = records.len(),
            anomalies = anomalies.len(),
            sensitivity = self.config.sensitivity.name(),
            "Anomaly detection complete"
        );
        anomalies
    }

    fn detect_in_partition(&self, partition: &Partition<'_>) -> Vec<Anomaly> {
        let baseline = self.calculate_baseline(partition);
        if baseline.is_empty() {
            debug!(partition = %partition.key(), "No baseline history, skipping");
            return Vec::new();
        }
        if baseline.mean() < self.config.min_spend {
            debug!(
                partition = %partition.key(),
                mean = baseline.mean(),
                "Baseline below minimum spend, skipping"
            );
            return Vec::new();
        }

        self.recent_records(partition)
            .filter_map(|record| self.check_anomaly(partition, record, &baseline))
            .collect()
    }

    pub fn calculate_baseline(&self, partition: &Partition<'_>) -> Baseline {
        let cutoff = self.baseline_cutoff();
        let values: Vec<f64> = partition
            .records()
            .iter()
            .filter(|record| record.date() < cutoff)
            .map(|record| record.cost())
            .collect();

        self.calculator.calculate_baseline(&values)
    }

    fn recent_records<'p, 'a>(
        &self,
        partition: &'p Partition<'a>,
    ) -> impl Iterator<Item = &'a CostRecord> + 'p {
        let cutoff = self.recent_cutoff();
        partition
            .records()
            .iter()
            .copied()
            .filter(move |record| record.date() > cutoff)
    }

    fn check_anomaly(
        &self,
        partition: &Partition<'_>,
        record: &CostRecord,
        baseline: &Baseline,
    ) -> Option<Anomaly> {
        let z_score = self.calculator.calculate_z_score(record.cost(), baseline)?;
        if z_score.abs() < self.config.sensitivity.z_threshold() {
            return None;
        }

        let percent_change = self
            .calculator
            .calculate_percent_change(record.cost(), baseline.mean());

        Some(Anomaly::new(
            partition.key().clone(),
            record.date(),
            record.cost(),
            baseline.mean(),
            z_score,
            percent_change,
            AnomalySeverity::from_z_score(z_score),
            percent_change
                .map_or(ZERO_BASELINE_REASON, describe_change)
                .to_string(),
        ))
    }

    fn baseline_cutoff(&self) -> NaiveDate {
        self.reference_date - Duration::days(i64::from(self.config.baseline_days))
    }

    fn recent_cutoff(&self) -> NaiveDate {
        self.reference_date - Duration::days(i64::from(self.config.recent_days))
    }
}

const ZERO_BASELINE_REASON: &str =
    "Deviation from a zero-mean baseline: credits offset charges historically";

/// Coarse label for the size of a change. An annotation, not a diagnosis.
pub fn describe_change(percent_change: f64) -> &'static str {
    if percent_change > 100.0 {
        "Cost spike: possible new workload or misconfiguration"
    } else if percent_change > 50.0 {
        "Notable increase: check for scaling events or new resources"
    } else if percent_change < -50.0 {
        "Significant decrease: resources terminated or usage reduced"
    } else if percent_change > 20.0 {
        "Moderate increase: gradual growth or normal variance"
    } else {
        "Deviation from historical baseline"
    }
}
