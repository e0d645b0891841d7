use crate::data_structures::CostRecord;
use crate::normalizer::ServiceNormalizer;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

/// Reads normalized cost records from JSON Lines files.
pub struct DataLoader {
    normalizer: ServiceNormalizer,
}

impl DataLoader {
    pub fn new() -> Self {
        Self {
            normalizer: ServiceNormalizer::new(),
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<CostRecord>> {
        let file = File::open(&path)
            .with_context(|| format!("Failed to open file: {}", path.as_ref().display()))?;

        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read line {}", line_num + 1))?;

            if line.trim().is_empty() {
                continue;
            }

            match self.parse_line(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        path = %path.as_ref().display(),
                        line = line_num + 1,
                        error = %e,
                        "Skipping malformed cost record"
                    );
                }
            }
        }

        debug!(path = %path.as_ref().display(), records = records.len(), "Loaded cost records");
        Ok(records)
    }

    pub fn load_from_directory<P: AsRef<Path>>(&self, dir_path: P) -> Result<Vec<CostRecord>> {
        let mut all_records = Vec::new();
        self.load_from_directory_recursive(dir_path.as_ref(), &mut all_records)?;
        all_records.sort_by_key(|record| record.date());
        Ok(all_records)
    }

    /// File or directory, keeping only records dated within `start..=end`.
    pub fn load_window<P: AsRef<Path>>(
        &self,
        path: P,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CostRecord>> {
        let path = path.as_ref();
        let records = if path.is_dir() {
            self.load_from_directory(path)?
        } else {
            self.load_from_file(path)?
        };

        Ok(records
            .into_iter()
            .filter(|record| record.date() >= start && record.date() <= end)
            .collect())
    }

    fn load_from_directory_recursive(
        &self,
        dir_path: &Path,
        records: &mut Vec<CostRecord>,
    ) -> Result<()> {
        let dir = std::fs::read_dir(dir_path)
            .with_context(|| format!("Failed to read directory: {}", dir_path.display()))?;

        for entry in dir {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();

            if path.is_file() {
                if path.extension().is_some_and(|extension| extension == "jsonl") {
                    match self.load_from_file(&path) {
                        Ok(mut file_records) => records.append(&mut file_records),
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Failed to load file");
                        }
                    }
                }
            } else if path.is_dir() {
                if let Err(e) = self.load_from_directory_recursive(&path, records) {
                    warn!(path = %path.display(), error = %e, "Failed to load from directory");
                }
            }
        }

        Ok(())
    }

    fn parse_line(&self, line: &str) -> Result<CostRecord> {
        let record: CostRecord =
            serde_json::from_str(line).context("Failed to parse cost record")?;

        if record.cloud().is_empty() {
            return Err(anyhow::anyhow!("Missing or invalid 'cloud' field"));
        }

        match (record.service().is_empty(), record.cloud_service().is_empty()) {
            (true, true) => Err(anyhow::anyhow!("Missing 'service' and 'cloud_service' fields")),
            (true, false) => {
                let normalized = self
                    .normalizer
                    .normalize(record.cloud(), record.cloud_service())
                    .to_string();
                Ok(record.with_service(normalized))
            }
            (false, true) => {
                let service = record.service().to_string();
                Ok(record.with_cloud_service(service))
            }
            (false, false) => Ok(record),
        }
    }
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}
