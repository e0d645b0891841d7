use crate::data_structures::CostRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// (cloud, account, service) triple that owns one baseline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    cloud: String,
    account: String,
    service: String,
}

impl PartitionKey {
    pub fn new(
        cloud: impl Into<String>,
        account: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            cloud: cloud.into(),
            account: account.into(),
            service: service.into(),
        }
    }

    pub fn cloud(&self) -> &str {
        &self.cloud
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.cloud, self.account, self.service)
    }
}

/// Records of one partition, oldest first.
#[derive(Debug, Clone)]
pub struct Partition<'a> {
    key: PartitionKey,
    records: Vec<&'a CostRecord>,
}

impl<'a> Partition<'a> {
    fn new(key: PartitionKey) -> Self {
        Self {
            key,
            records: Vec::new(),
        }
    }

    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    pub fn records(&self) -> &[&'a CostRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub struct PartitionIdentifier;

impl PartitionIdentifier {
    pub fn new() -> Self {
        Self
    }

    /// Groups records by partition key. Partitions come back sorted by key
    /// and each partition's records sorted by date, so callers see the same
    /// order regardless of how the input slice was assembled.
    pub fn identify_partitions<'a>(&self, records: &'a [CostRecord]) -> Vec<Partition<'a>> {
        let mut grouped: HashMap<PartitionKey, Partition<'a>> = HashMap::new();

        for record in records {
            let key = record.partition_key();
            grouped
                .entry(key.clone())
                .or_insert_with(|| Partition::new(key))
                .records
                .push(record);
        }

        let mut partitions: Vec<Partition<'a>> = grouped.into_values().collect();
        for partition in &mut partitions {
            partition.records.sort_by_key(|record| record.date());
        }
        partitions.sort_by(|a, b| a.key.cmp(&b.key));
        partitions
    }
}

impl Default for PartitionIdentifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_empty_input() {
        let identifier = PartitionIdentifier::new();
        assert!(identifier.identify_partitions(&[]).is_empty());
    }

    #[test]
    fn test_same_service_different_accounts_split() {
        let identifier = PartitionIdentifier::new();
        let records = vec![
            CostRecord::new("aws", "111", "Compute", 10.0, day(1)),
            CostRecord::new("aws", "222", "Compute", 20.0, day(1)),
            CostRecord::new("aws", "111", "Compute", 30.0, day(2)),
        ];

        let partitions = identifier.identify_partitions(&records);
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].key(), &PartitionKey::new("aws", "111", "Compute"));
        assert_eq!(partitions[0].len(), 2);
        assert_eq!(partitions[1].len(), 1);
    }

    #[test]
    fn test_records_sorted_by_date() {
        let identifier = PartitionIdentifier::new();
        let records = vec![
            CostRecord::new("gcp", "proj", "Storage", 3.0, day(3)),
            CostRecord::new("gcp", "proj", "Storage", 1.0, day(1)),
            CostRecord::new("gcp", "proj", "Storage", 2.0, day(2)),
        ];

        let partitions = identifier.identify_partitions(&records);
        let costs: Vec<f64> = partitions[0].records().iter().map(|r| r.cost()).collect();
        assert_eq!(costs, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_key_display() {
        let key = PartitionKey::new("azure", "sub-1", "Database");
        assert_eq!(key.to_string(), "azure:sub-1:Database");
    }
}
