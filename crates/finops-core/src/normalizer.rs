use std::collections::HashMap;

/// Maps each cloud's own service names onto a shared category vocabulary
/// so that "Amazon Simple Storage Service" and "Cloud Storage" roll up
/// under the same `Storage` bucket.
pub struct ServiceNormalizer {
    mapping_cache: HashMap<String, HashMap<String, String>>,
}

impl ServiceNormalizer {
    pub fn new() -> Self {
        let mut normalizer = Self {
            mapping_cache: HashMap::new(),
        };

        normalizer.insert_cloud(
            "aws",
            &[
                ("Amazon Elastic Compute Cloud - Compute", "Compute"),
                ("Amazon Relational Database Service", "Database"),
                ("Amazon Simple Storage Service", "Storage"),
                ("AWS Lambda", "Serverless"),
                ("Amazon Virtual Private Cloud", "Networking"),
                ("Amazon CloudWatch", "Monitoring"),
            ],
        );

        normalizer.insert_cloud(
            "azure",
            &[
                ("Virtual Machines", "Compute"),
                ("Azure SQL Database", "Database"),
                ("Storage", "Storage"),
                ("Azure Functions", "Serverless"),
                ("Virtual Network", "Networking"),
                ("Azure Monitor", "Monitoring"),
            ],
        );

        normalizer.insert_cloud(
            "gcp",
            &[
                ("Compute Engine", "Compute"),
                ("Cloud SQL", "Database"),
                ("Cloud Storage", "Storage"),
                ("Cloud Functions", "Serverless"),
                ("Virtual Private Cloud", "Networking"),
                ("Cloud Monitoring", "Monitoring"),
            ],
        );

        normalizer
    }

    fn insert_cloud(&mut self, cloud: &str, pairs: &[(&str, &str)]) {
        let mapping = self.mapping_cache.entry(cloud.to_string()).or_default();
        for (cloud_service, normalized) in pairs {
            mapping.insert(cloud_service.to_string(), normalized.to_string());
        }
    }

    /// Registers or overrides one mapping.
    pub fn add_mapping(&mut self, cloud: &str, cloud_service: &str, normalized: &str) {
        self.insert_cloud(cloud, &[(cloud_service, normalized)]);
    }

    /// Normalized name, or the cloud's own name when no mapping exists.
    pub fn normalize<'a>(&'a self, cloud: &str, cloud_service: &'a str) -> &'a str {
        self.mapping_cache
            .get(&cloud.to_ascii_lowercase())
            .and_then(|mapping| mapping.get(cloud_service))
            .map(String::as_str)
            .unwrap_or(cloud_service)
    }

    pub fn supported_clouds(&self) -> Vec<&String> {
        self.mapping_cache.keys().collect()
    }
}

impl Default for ServiceNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_services_normalize() {
        let normalizer = ServiceNormalizer::new();
        assert_eq!(normalizer.normalize("aws", "AWS Lambda"), "Serverless");
        assert_eq!(normalizer.normalize("azure", "Virtual Machines"), "Compute");
        assert_eq!(normalizer.normalize("GCP", "Cloud SQL"), "Database");
    }

    #[test]
    fn test_unknown_service_passes_through() {
        let normalizer = ServiceNormalizer::new();
        assert_eq!(normalizer.normalize("aws", "Amazon SageMaker"), "Amazon SageMaker");
        assert_eq!(normalizer.normalize("oracle", "Compute"), "Compute");
    }

    #[test]
    fn test_add_mapping() {
        let mut normalizer = ServiceNormalizer::new();
        normalizer.add_mapping("aws", "Amazon SageMaker", "ML");
        assert_eq!(normalizer.normalize("aws", "Amazon SageMaker"), "ML");
        assert_eq!(normalizer.supported_clouds().len(), 3);
    }
}
