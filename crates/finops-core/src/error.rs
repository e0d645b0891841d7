// Error types for the cost pipeline

use chrono::NaiveDate;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, FinopsError>;

/// A single provider failed to deliver records for a window.
///
/// Never fatal on its own: the aggregator collects these and keeps going
/// with whatever providers succeeded.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider '{provider}' failed to fetch costs for {start}..{end}: {source}")]
    Fetch {
        provider: String,
        start: NaiveDate,
        end: NaiveDate,
        #[source]
        source: anyhow::Error,
    },

    #[error("provider '{provider}' timed out after {timeout_secs}s fetching {start}..{end}")]
    TimedOut {
        provider: String,
        start: NaiveDate,
        end: NaiveDate,
        timeout_secs: u64,
    },

    #[error("provider '{provider}' fetch for {start}..{end} was cancelled")]
    Cancelled {
        provider: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("provider '{provider}' fetch task for {start}..{end} aborted: {reason}")]
    TaskAborted {
        provider: String,
        start: NaiveDate,
        end: NaiveDate,
        reason: String,
    },
}

impl ProviderError {
    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Fetch { provider, .. }
            | ProviderError::TimedOut { provider, .. }
            | ProviderError::Cancelled { provider, .. }
            | ProviderError::TaskAborted { provider, .. } => provider,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled { .. })
    }
}

/// Pipeline errors
#[derive(Debug, Error)]
pub enum FinopsError {
    /// A single provider failure surfaced on its own
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Every registered provider failed for the requested window
    #[error("all {} providers failed for {start}..{end}: {}", errors.len(), join_errors(errors))]
    AggregationFailed {
        start: NaiveDate,
        end: NaiveDate,
        errors: Vec<ProviderError>,
    },

    /// Malformed budget, allocation or pipeline configuration
    #[error("configuration error in {scope}: {reason}")]
    Configuration { scope: String, reason: String },

    /// Record or config file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Config file could not be parsed
    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl FinopsError {
    pub fn config(scope: impl Into<String>, reason: impl Into<String>) -> Self {
        FinopsError::Configuration {
            scope: scope.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        FinopsError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

fn join_errors(errors: &[ProviderError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
