pub mod aggregator;
pub mod anomaly;
pub mod budget;
pub mod calculator;
pub mod chargeback;
pub mod config;
pub mod data_structures;
pub mod error;
pub mod identifier;
pub mod loader;
pub mod monitor;
pub mod normalizer;
pub mod provider;

pub use aggregator::{AggregateOutcome, Aggregator};
pub use anomaly::{AnomalyDetector, DetectorConfig};
pub use budget::BudgetChecker;
pub use calculator::Calculator;
pub use chargeback::{Allocations, ChargebackAllocator, ChargebackReport};
pub use config::{AggregatorConfig, AnomalyConfig, Budget, ChargebackConfig, Config, ProviderConfig};
pub use data_structures::{
    AggregationResult, AlertSeverity, Allocation, Anomaly, AnomalySeverity, Baseline, BudgetAlert,
    CostRecord, Sensitivity, SharedCostRule,
};
pub use error::{FinopsError, ProviderError, Result};
pub use identifier::{Partition, PartitionIdentifier, PartitionKey};
pub use loader::DataLoader;
pub use monitor::{CostMonitor, RunReport};
pub use normalizer::ServiceNormalizer;
pub use provider::{CostProvider, FileProvider, StaticProvider};

pub use chrono::{NaiveDate, Utc};
pub use tokio_util::sync::CancellationToken;

pub mod prelude {
    pub use crate::aggregator::Aggregator;
    pub use crate::config::Config;
    pub use crate::data_structures::{AggregationResult, CostRecord};
    pub use crate::error::{FinopsError, Result};
    pub use crate::monitor::CostMonitor;
    pub use crate::provider::CostProvider;
    pub use chrono::NaiveDate;
    pub use tokio_util::sync::CancellationToken;
}
