//! Cost provider capability.
//!
//! Every cloud (or export file) is one implementation of [`CostProvider`].
//! The aggregator only ever sees the trait, so AWS, Azure and GCP sources
//! are interchangeable and selected by configuration.

use crate::data_structures::CostRecord;
use crate::loader::DataLoader;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
pub trait CostProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Normalized records dated within `start..=end`.
    async fn fetch(&self, start: NaiveDate, end: NaiveDate) -> anyhow::Result<Vec<CostRecord>>;
}

/// Serves records from a JSONL export file or directory.
pub struct FileProvider {
    name: String,
    path: PathBuf,
    /// Only records from this cloud are served when set
    cloud: Option<String>,
    loader: Arc<DataLoader>,
}

impl FileProvider {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            cloud: None,
            loader: Arc::new(DataLoader::new()),
        }
    }

    pub fn with_cloud(mut self, cloud: impl Into<String>) -> Self {
        let cloud = cloud.into();
        self.cloud = (!cloud.is_empty()).then_some(cloud);
        self
    }

    fn retain_cloud(&self, records: &mut Vec<CostRecord>) {
        let Some(cloud) = &self.cloud else {
            return;
        };

        let before = records.len();
        records.retain(|record| record.cloud().eq_ignore_ascii_case(cloud));
        let dropped = before - records.len();
        if dropped > 0 {
            warn!(
                provider = %self.name,
                cloud = %cloud,
                dropped,
                "Dropped records from another cloud"
            );
        }
    }
}

#[async_trait]
impl CostProvider for FileProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, start: NaiveDate, end: NaiveDate) -> anyhow::Result<Vec<CostRecord>> {
        let loader = Arc::clone(&self.loader);
        let path = self.path.clone();

        // File reads block; keep them off the async workers.
        let mut records =
            tokio::task::spawn_blocking(move || loader.load_window(&path, start, end)).await??;
        self.retain_cloud(&mut records);

        debug!(provider = %self.name, records = records.len(), "Fetched records from file");
        Ok(records)
    }
}

/// Serves a fixed set of records; used for replaying snapshots and in tests.
pub struct StaticProvider {
    name: String,
    records: Vec<CostRecord>,
}

impl StaticProvider {
    pub fn new(name: impl Into<String>, records: Vec<CostRecord>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }
}

#[async_trait]
impl CostProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, start: NaiveDate, end: NaiveDate) -> anyhow::Result<Vec<CostRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|record| record.date() >= start && record.date() <= end)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, d).unwrap()
    }

    #[tokio::test]
    async fn test_static_provider_filters_window() {
        let provider = StaticProvider::new(
            "aws",
            vec![
                CostRecord::new("aws", "1", "Compute", 1.0, day(1)),
                CostRecord::new("aws", "1", "Compute", 2.0, day(10)),
                CostRecord::new("aws", "1", "Compute", 4.0, day(20)),
            ],
        );

        let records = provider.fetch(day(5), day(20)).await.unwrap();
        assert_eq!(provider.name(), "aws");
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_file_provider_fetch() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"{{"cloud": "azure", "account": "sub", "cloud_service": "Virtual Machines", "cost": 7.0, "date": "2024-02-03"}}"#
        )
        .unwrap();

        let provider = FileProvider::new("azure", temp_file.path());
        let records = provider.fetch(day(1), day(28)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].service(), "Compute");
    }

    #[tokio::test]
    async fn test_file_provider_keeps_only_its_cloud() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"{{"cloud": "AWS", "account": "111", "cloud_service": "Amazon Simple Storage Service", "cost": 3.0, "date": "2024-02-03"}}"#
        )
        .unwrap();
        writeln!(
            temp_file,
            r#"{{"cloud": "gcp", "account": "analytics", "cloud_service": "Cloud SQL", "cost": 5.0, "date": "2024-02-03"}}"#
        )
        .unwrap();

        let provider = FileProvider::new("aws", temp_file.path()).with_cloud("aws");
        let records = provider.fetch(day(1), day(28)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].cost(), 3.0);

        // an empty cloud serves everything
        let provider = FileProvider::new("mixed", temp_file.path()).with_cloud("");
        assert_eq!(provider.fetch(day(1), day(28)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_file_provider_missing_path_errors() {
        let provider = FileProvider::new("gcp", "/no/such/export.jsonl");
        assert!(provider.fetch(day(1), day(28)).await.is_err());
    }
}
