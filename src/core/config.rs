use crate::core::fetcher::RetryPolicy;
use anyhow::{Context, Result, ensure};
use directories::ProjectDirs;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

/// A symbol to try, in what unit it is quoted, and where it sits in line.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct SourceCandidate {
    pub symbol: String,
    /// Converts one unit of the instrument into the target unit, e.g. the
    /// number of trust shares per troy ounce.
    #[serde(default = "default_multiplier")]
    pub unit_multiplier: Decimal,
    #[serde(default)]
    pub priority: u32,
    /// The instrument is quoted the other way round and must be inverted.
    #[serde(default)]
    pub inverse: bool,
}

impl SourceCandidate {
    pub fn new(symbol: &str, priority: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            unit_multiplier: Decimal::ONE,
            priority,
            inverse: false,
        }
    }
}

fn default_multiplier() -> Decimal {
    Decimal::ONE
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourcesConfig {
    pub primary: Vec<SourceCandidate>,
    #[serde(default)]
    pub backup: Vec<SourceCandidate>,
    pub rate: Vec<SourceCandidate>,
    /// Asset series used for history; defaults to the first primary.
    pub history_asset: Option<SourceCandidate>,
    /// Rate series used for history; defaults to the first rate candidate.
    pub history_rate: Option<SourceCandidate>,
}

impl SourcesConfig {
    pub fn history_asset(&self) -> Option<&SourceCandidate> {
        self.history_asset.as_ref().or_else(|| self.primary.first())
    }

    pub fn history_rate(&self) -> Option<&SourceCandidate> {
        self.history_rate.as_ref().or_else(|| self.rate.first())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct YahooProviderConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub yahoo: Option<YahooProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            yahoo: Some(YahooProviderConfig {
                base_url: "https://query1.finance.yahoo.com".to_string(),
                timeout_secs: default_timeout_secs(),
            }),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 4000,
            jitter_ms: 250,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
    pub max_ttl_secs: u64,
    pub price_ttl_secs: u64,
    pub history_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            max_ttl_secs: 86400,
            price_ttl_secs: 900,
            history_ttl_secs: 3600,
        }
    }
}

impl CacheConfig {
    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.max_ttl_secs)
    }

    pub fn price_ttl(&self) -> Duration {
        Duration::from_secs(self.price_ttl_secs)
    }

    pub fn history_ttl(&self) -> Duration {
        Duration::from_secs(self.history_ttl_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub default_days: u32,
    pub max_days: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_days: 30,
            max_days: 3650,
        }
    }
}

fn default_base_currency() -> String {
    "USD".to_string()
}

fn default_quote_currency() -> String {
    "CNY".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,
    pub sources: SourcesConfig,
    /// Rate used when no rate candidate answers.
    pub fallback_rate: Decimal,
    /// Local market markup over the benchmark price.
    #[serde(default = "default_multiplier")]
    pub premium_multiplier: Decimal,
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
    #[serde(default = "default_quote_currency")]
    pub quote_currency: String,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    pub data_path: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "aurum", "aurum")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("dev", "aurum", "aurum")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config = Self::from_yaml(&config_str)
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Parses, validates and orders candidates by priority.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(yaml).context("Failed to parse config")?;
        config.validate()?;
        for list in [
            &mut config.sources.primary,
            &mut config.sources.backup,
            &mut config.sources.rate,
        ] {
            list.sort_by_key(|c| c.priority);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.sources.primary.is_empty(),
            "At least one primary source is required"
        );
        ensure!(
            !self.sources.rate.is_empty(),
            "At least one rate source is required"
        );
        for (name, list) in [
            ("primary", &self.sources.primary),
            ("backup", &self.sources.backup),
            ("rate", &self.sources.rate),
        ] {
            validate_candidates(name, list)?;
        }
        for candidate in [&self.sources.history_asset, &self.sources.history_rate]
            .into_iter()
            .flatten()
        {
            validate_candidates("history", std::slice::from_ref(candidate))?;
        }

        ensure!(
            self.fallback_rate > Decimal::ZERO,
            "fallback_rate must be positive"
        );
        ensure!(
            self.premium_multiplier > Decimal::ZERO,
            "premium_multiplier must be positive"
        );
        ensure!(self.retry.max_retries >= 1, "retry.max_retries must be at least 1");
        ensure!(
            self.retry.base_delay_ms <= self.retry.max_delay_ms,
            "retry.base_delay_ms must not exceed retry.max_delay_ms"
        );
        for (name, ttl) in [
            ("default_ttl_secs", self.cache.default_ttl_secs),
            ("price_ttl_secs", self.cache.price_ttl_secs),
            ("history_ttl_secs", self.cache.history_ttl_secs),
        ] {
            ensure!(
                ttl <= self.cache.max_ttl_secs,
                "cache.{name} must not exceed cache.max_ttl_secs"
            );
        }
        ensure!(
            self.history.default_days >= 1 && self.history.default_days <= self.history.max_days,
            "history.default_days must be between 1 and history.max_days"
        );
        Ok(())
    }
}

fn validate_candidates(list_name: &str, candidates: &[SourceCandidate]) -> Result<()> {
    let mut priorities = HashSet::new();
    for candidate in candidates {
        ensure!(
            !candidate.symbol.trim().is_empty(),
            "Empty symbol in {list_name} sources"
        );
        ensure!(
            candidate.unit_multiplier > Decimal::ZERO,
            "Non-positive unit_multiplier for {} in {list_name} sources",
            candidate.symbol
        );
        ensure!(
            priorities.insert(candidate.priority),
            "Duplicate priority {} in {list_name} sources",
            candidate.priority
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MINIMAL: &str = r#"
sources:
  primary:
    - symbol: "XAUUSD=X"
      priority: 2
    - symbol: "GC=F"
      priority: 1
  backup:
    - symbol: "GLD"
      unit_multiplier: 10.8
      priority: 1
  rate:
    - symbol: "CNY=X"
      priority: 1
    - symbol: "CNYUSD=X"
      inverse: true
      priority: 2
fallback_rate: 7.2
premium_multiplier: 1.015
"#;

    #[test]
    fn test_config_deserialization() {
        let config = AppConfig::from_yaml(MINIMAL).expect("Failed to deserialize");

        let primary: Vec<_> = config
            .sources
            .primary
            .iter()
            .map(|c| c.symbol.as_str())
            .collect();
        assert_eq!(primary, vec!["GC=F", "XAUUSD=X"]);
        assert_eq!(config.sources.primary[0].unit_multiplier, Decimal::ONE);
        assert_eq!(config.sources.backup[0].unit_multiplier, dec!(10.8));
        assert!(config.sources.rate[1].inverse);
        assert!(!config.sources.rate[0].inverse);
        assert_eq!(config.fallback_rate, dec!(7.2));
        assert_eq!(config.premium_multiplier, dec!(1.015));

        assert_eq!(config.base_currency, "USD");
        assert_eq!(config.quote_currency, "CNY");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.cache.history_ttl_secs, 3600);
        assert_eq!(config.history.default_days, 30);
        assert_eq!(
            config.providers.yahoo.unwrap().base_url,
            "https://query1.finance.yahoo.com"
        );

        assert_eq!(config.sources.history_asset().unwrap().symbol, "GC=F");
        assert_eq!(config.sources.history_rate().unwrap().symbol, "CNY=X");
    }

    #[test]
    fn test_config_overrides() {
        let yaml = format!(
            "{MINIMAL}\nproviders:\n  yahoo:\n    base_url: \"http://example.com/yahoo\"\nretry:\n  max_retries: 5\ncache:\n  history_ttl_secs: 60\nquote_currency: EUR\n"
        );
        let config = AppConfig::from_yaml(&yaml).unwrap();
        let yahoo = config.providers.yahoo.unwrap();
        assert_eq!(yahoo.base_url, "http://example.com/yahoo");
        assert_eq!(yahoo.timeout_secs, 10);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.cache.history_ttl_secs, 60);
        assert_eq!(config.cache.max_ttl_secs, 86400);
        assert_eq!(config.quote_currency, "EUR");

        let policy = RetryPolicy::from(&config.retry);
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_config_rejects_bad_candidates() {
        let no_primary = MINIMAL.replace(
            "  primary:\n    - symbol: \"XAUUSD=X\"\n      priority: 2\n    - symbol: \"GC=F\"\n      priority: 1\n",
            "  primary: []\n",
        );
        let err = AppConfig::from_yaml(&no_primary).unwrap_err();
        assert!(err.to_string().contains("primary source"));

        let duplicate = MINIMAL.replace("priority: 2\n    - symbol: \"GC=F\"", "priority: 1\n    - symbol: \"GC=F\"");
        let err = AppConfig::from_yaml(&duplicate).unwrap_err();
        assert!(err.to_string().contains("Duplicate priority"));

        let zero_multiplier = MINIMAL.replace("unit_multiplier: 10.8", "unit_multiplier: 0");
        let err = AppConfig::from_yaml(&zero_multiplier).unwrap_err();
        assert!(err.to_string().contains("unit_multiplier"));
    }

    #[test]
    fn test_config_rejects_bad_limits() {
        let yaml = format!("{MINIMAL}\nretry:\n  max_retries: 0\n");
        assert!(AppConfig::from_yaml(&yaml).is_err());

        let yaml = format!("{MINIMAL}\ncache:\n  history_ttl_secs: 100000\n");
        let err = AppConfig::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("max_ttl_secs"));

        let yaml = MINIMAL.replace("fallback_rate: 7.2", "fallback_rate: 0");
        assert!(AppConfig::from_yaml(&yaml).is_err());
    }
}
