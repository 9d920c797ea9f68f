use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    pub venues: HashMap<String, VenueConfig>,
    pub fees: FeeConfig,
    pub assets: Vec<AssetConfig>,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    #[serde(default = "default_failure_alert_threshold")]
    pub failure_alert_threshold: u32,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: default_drain_timeout_ms(),
            failure_alert_threshold: default_failure_alert_threshold(),
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VenueConfig {
    pub name: String,
    pub base_url: String,
    /// Path template; `{asset}` is substituted.
    pub ticker_path: String,
    /// JSON pointer to the price inside the ticker response.
    pub price_pointer: String,
    #[serde(default)]
    pub order_path: Option<String>,
    #[serde(default = "default_order_id_pointer")]
    pub order_id_pointer: String,
    #[serde(default)]
    pub fill_price_pointer: Option<String>,
    #[serde(default)]
    pub filled_amount_pointer: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FeeConfig {
    #[serde(default = "default_fee_cache_ttl_ms")]
    pub default_cache_ttl_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    pub sources: Vec<FeeSourceConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeeSourceConfig {
    Http {
        name: String,
        /// URL template; `{asset}` is substituted.
        url: String,
        fee_pointer: String,
        #[serde(default = "default_divisor")]
        divisor: String,
    },
    GasPrice {
        name: String,
        rpc_url: String,
        gas_limit: u64,
        /// Quote-currency value of one native coin.
        native_price: String,
    },
}

impl FeeSourceConfig {
    pub fn name(&self) -> &str {
        match self {
            FeeSourceConfig::Http { name, .. } | FeeSourceConfig::GasPrice { name, .. } => name,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AssetConfig {
    pub asset: String,
    pub venues: Vec<String>,
    pub trade_amount: String,
    pub min_profit_threshold: String,
    pub cycle_interval_ms: u64,
    pub quote_timeout_ms: u64,
    #[serde(default)]
    pub fee_cache_ttl_ms: Option<u64>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Validated, parsed settings for one monitored asset.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetSettings {
    pub asset: String,
    pub venues: Vec<String>,
    pub trade_amount: BigDecimal,
    pub min_profit_threshold: BigDecimal,
    pub cycle_interval: Duration,
    pub quote_timeout: Duration,
    pub fee_cache_ttl: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

fn default_drain_timeout_ms() -> u64 {
    30_000
}

fn default_failure_alert_threshold() -> u32 {
    5
}

fn default_event_capacity() -> usize {
    256
}

fn default_order_id_pointer() -> String {
    "/orderId".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_fee_cache_ttl_ms() -> u64 {
    60_000
}

fn default_divisor() -> String {
    "1".to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    250
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let mut settings = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::Environment::with_prefix("ARBITRAGE").separator("__"));

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            settings = settings.set_override("database.url", db_url)?;
        }

        let mut config: Config = settings.build()?.try_deserialize()?;

        // The config crate cannot address array elements from the environment.
        if let Ok(rpc_url) = std::env::var("RPC_URL") {
            for source in &mut config.fees.sources {
                if let FeeSourceConfig::GasPrice { rpc_url: url, .. } = source {
                    *url = rpc_url.clone();
                }
            }
        }

        Ok(config)
    }

    /// Checks the whole configuration before any task starts.
    pub fn validate(&self) -> EngineResult<Vec<AssetSettings>> {
        if self.assets.is_empty() {
            return Err(EngineError::Configuration("no assets configured".to_string()));
        }
        if self.fees.sources.is_empty() {
            return Err(EngineError::Configuration("no fee sources configured".to_string()));
        }

        let mut seen_assets = HashSet::new();
        let mut validated = Vec::with_capacity(self.assets.len());

        for asset in &self.assets {
            if asset.asset.trim().is_empty() {
                return Err(EngineError::Configuration("asset symbol cannot be empty".to_string()));
            }
            if !seen_assets.insert(asset.asset.clone()) {
                return Err(EngineError::Configuration(format!(
                    "asset {} is configured more than once",
                    asset.asset
                )));
            }
            validated.push(self.validate_asset(asset)?);
        }

        Ok(validated)
    }

    fn validate_asset(&self, asset: &AssetConfig) -> EngineResult<AssetSettings> {
        let symbol = &asset.asset;

        if asset.venues.len() < 2 {
            return Err(EngineError::Configuration(format!(
                "{} needs at least 2 venues, got {}",
                symbol,
                asset.venues.len()
            )));
        }

        let mut seen_venues = HashSet::new();
        for venue in &asset.venues {
            if !seen_venues.insert(venue.as_str()) {
                return Err(EngineError::Configuration(format!(
                    "{} lists venue {} more than once",
                    symbol, venue
                )));
            }
            if !self.venues.contains_key(venue) {
                return Err(EngineError::Configuration(format!(
                    "{} references undefined venue {}",
                    symbol, venue
                )));
            }
        }

        let trade_amount = parse_decimal(symbol, "trade_amount", &asset.trade_amount)?;
        if trade_amount <= BigDecimal::from(0) {
            return Err(EngineError::Configuration(format!(
                "{} trade_amount must be positive",
                symbol
            )));
        }

        let min_profit_threshold =
            parse_decimal(symbol, "min_profit_threshold", &asset.min_profit_threshold)?;
        if min_profit_threshold < BigDecimal::from(0) {
            return Err(EngineError::Configuration(format!(
                "{} min_profit_threshold cannot be negative",
                symbol
            )));
        }

        if asset.cycle_interval_ms == 0 {
            return Err(EngineError::Configuration(format!(
                "{} cycle_interval_ms must be positive",
                symbol
            )));
        }
        if asset.quote_timeout_ms == 0 {
            return Err(EngineError::Configuration(format!(
                "{} quote_timeout_ms must be positive",
                symbol
            )));
        }

        let fee_cache_ttl_ms = asset.fee_cache_ttl_ms.unwrap_or(self.fees.default_cache_ttl_ms);
        if fee_cache_ttl_ms == 0 {
            return Err(EngineError::Configuration(format!(
                "{} fee_cache_ttl_ms must be positive",
                symbol
            )));
        }

        Ok(AssetSettings {
            asset: symbol.clone(),
            venues: asset.venues.clone(),
            trade_amount,
            min_profit_threshold,
            cycle_interval: Duration::from_millis(asset.cycle_interval_ms),
            quote_timeout: Duration::from_millis(asset.quote_timeout_ms),
            fee_cache_ttl: Duration::from_millis(fee_cache_ttl_ms),
            max_retries: asset.max_retries,
            retry_backoff: Duration::from_millis(asset.retry_backoff_ms),
        })
    }
}

fn parse_decimal(asset: &str, field: &str, value: &str) -> EngineResult<BigDecimal> {
    BigDecimal::from_str(value.trim()).map_err(|e| {
        EngineError::Configuration(format!("{} has invalid {} '{}': {}", asset, field, value, e))
    })
}
