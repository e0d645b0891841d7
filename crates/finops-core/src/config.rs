use crate::data_structures::{Sensitivity, SharedCostRule};
use crate::error::{FinopsError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Run-scoped pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub budgets: Vec<Budget>,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub chargeback: ChargebackConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

/// A file-backed provider: JSONL exports for one cloud.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub cloud: String,
    pub path: String,
}

impl ProviderConfig {
    pub fn expanded_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).as_ref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub name: String,
    /// Registered provider name, or `all`/absent for every provider
    #[serde(default, alias = "provider")]
    pub provider_filter: Option<String>,
    /// Account, subscription or project id
    #[serde(default, alias = "scope")]
    pub scope_override: Option<String>,
    pub monthly_limit: f64,
    #[serde(default = "default_alert_at", alias = "alert_at")]
    pub alert_at_percentages: Vec<f64>,
    #[serde(default)]
    pub notify_targets: Vec<String>,
}

impl Budget {
    pub fn new(name: impl Into<String>, monthly_limit: f64, alert_at_percentages: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            provider_filter: None,
            scope_override: None,
            monthly_limit,
            alert_at_percentages,
            notify_targets: Vec::new(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider_filter = Some(provider.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope_override = Some(scope.into());
        self
    }

    /// The provider filter, unless it is empty or `all`.
    pub fn provider(&self) -> Option<&str> {
        self.provider_filter
            .as_deref()
            .filter(|provider| !provider.is_empty() && !provider.eq_ignore_ascii_case("all"))
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope_override.as_deref().filter(|scope| !scope.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        let scope = format!("budget '{}'", self.name);

        if self.name.is_empty() {
            return Err(FinopsError::config("budgets", "Budget name cannot be empty"));
        }

        if !(self.monthly_limit > 0.0) {
            return Err(FinopsError::config(
                scope,
                format!("monthly_limit must be positive, got {}", self.monthly_limit),
            ));
        }

        if self.alert_at_percentages.is_empty() {
            return Err(FinopsError::config(scope, "alert_at_percentages cannot be empty"));
        }

        if let Some(bad) = self.alert_at_percentages.iter().find(|pct| !(**pct > 0.0)) {
            return Err(FinopsError::config(
                scope,
                format!("alert percentage must be positive, got {}", bad),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_baseline_days", alias = "lookback_days")]
    pub baseline_days: u32,
    #[serde(default = "default_recent_days")]
    pub recent_days: u32,
    /// Percent change past which an anomaly is highlighted in summaries
    #[serde(default = "default_deviation_threshold", alias = "deviation_threshold")]
    pub deviation_threshold_percent: f64,
    #[serde(default, alias = "minimum_cost_threshold")]
    pub min_cost_threshold: f64,
    #[serde(default)]
    pub sensitivity: Sensitivity,
}

impl AnomalyConfig {
    pub fn exceeds_deviation(&self, percent_change: f64) -> bool {
        percent_change.abs() > self.deviation_threshold_percent
    }

    pub fn validate(&self) -> Result<()> {
        if self.baseline_days == 0 {
            return Err(FinopsError::config("anomaly", "baseline_days must be at least 1"));
        }
        if self.recent_days == 0 {
            return Err(FinopsError::config("anomaly", "recent_days must be at least 1"));
        }
        if self.deviation_threshold_percent < 0.0 || self.min_cost_threshold < 0.0 {
            return Err(FinopsError::config(
                "anomaly",
                "deviation_threshold_percent and min_cost_threshold cannot be negative",
            ));
        }
        Ok(())
    }
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            baseline_days: default_baseline_days(),
            recent_days: default_recent_days(),
            deviation_threshold_percent: default_deviation_threshold(),
            min_cost_threshold: 0.0,
            sensitivity: Sensitivity::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargebackConfig {
    #[serde(default = "default_primary_tag")]
    pub primary_tag: String,
    #[serde(default = "default_fallback_tag")]
    pub fallback_tag: String,
    #[serde(default)]
    pub untagged_pool: Option<String>,
    #[serde(default)]
    pub shared_cost_split: Vec<SharedCostRule>,
}

impl ChargebackConfig {
    pub fn shared_percentage(&self) -> f64 {
        self.shared_cost_split.iter().map(|rule| rule.percentage).sum()
    }

    pub fn validate(&self) -> Result<()> {
        if self.primary_tag.is_empty() {
            return Err(FinopsError::config("chargeback", "primary_tag cannot be empty"));
        }

        for rule in &self.shared_cost_split {
            if rule.cost_center.is_empty() {
                return Err(FinopsError::config(
                    "chargeback.shared_cost_split",
                    "cost_center cannot be empty",
                ));
            }
            if !(0.0..=100.0).contains(&rule.percentage) {
                return Err(FinopsError::config(
                    "chargeback.shared_cost_split",
                    format!(
                        "percentage for '{}' must be between 0 and 100, got {}",
                        rule.cost_center, rule.percentage
                    ),
                ));
            }
        }

        let total = self.shared_percentage();
        if total > 100.0 + 1e-9 {
            return Err(FinopsError::config(
                "chargeback.shared_cost_split",
                format!("percentages sum to {}, which exceeds 100", total),
            ));
        }

        Ok(())
    }
}

impl Default for ChargebackConfig {
    fn default() -> Self {
        Self {
            primary_tag: default_primary_tag(),
            fallback_tag: default_fallback_tag(),
            untagged_pool: None,
            shared_cost_split: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Per-provider fetch deadline
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
}

impl AggregatorConfig {
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_baseline_days() -> u32 {
    30
}

fn default_recent_days() -> u32 {
    7
}

fn default_deviation_threshold() -> f64 {
    25.0
}

fn default_alert_at() -> Vec<f64> {
    vec![50.0, 75.0, 90.0, 100.0]
}

fn default_primary_tag() -> String {
    "cost_center".to_string()
}

fn default_fallback_tag() -> String {
    "team".to_string()
}

impl Config {
    /// Reads a YAML config, expanding `$VAR`/`${VAR}` from the environment
    /// before parsing.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(&path).map_err(|e| FinopsError::io(&path, e))?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let expanded = expand_env(raw)?;
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for provider in &self.providers {
            if provider.name.is_empty() || provider.path.is_empty() {
                return Err(FinopsError::config(
                    "providers",
                    "every provider needs a name and a path",
                ));
            }
        }

        for budget in &self.budgets {
            budget.validate()?;
        }

        self.anomaly.validate()?;
        self.chargeback.validate()?;

        if self.aggregator.fetch_timeout_secs == Some(0) {
            return Err(FinopsError::config(
                "aggregator",
                "fetch_timeout_secs must be at least 1",
            ));
        }

        Ok(())
    }
}

/// Expands environment variables line by line, leaving YAML comments as
/// written so a `$` in prose never has to resolve.
fn expand_env(raw: &str) -> Result<String> {
    let mut expanded = String::with_capacity(raw.len());
    for line in raw.split_inclusive('\n') {
        let (content, comment) = line.split_at(comment_start(line).unwrap_or(line.len()));
        let content = shellexpand::env(content)
            .map_err(|e| FinopsError::config("environment", e.to_string()))?;
        expanded.push_str(&content);
        expanded.push_str(comment);
    }
    Ok(expanded)
}

/// Byte offset of a `#` that opens a comment: at line start or after
/// whitespace, and outside quoted scalars.
fn comment_start(line: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut previous: Option<char> = None;
    for (offset, c) in line.char_indices() {
        let boundary = previous.map_or(true, |p| p.is_whitespace() || "[{,:".contains(p));
        match (quote, c) {
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') if boundary => quote = Some(c),
            (None, '#') if previous.map_or(true, char::is_whitespace) => return Some(offset),
            (None, _) => {}
        }
        previous = Some(c);
    }
    None
}
