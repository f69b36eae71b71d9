use marketfeed_core::{
    connection::ConnectionConfig,
    reconnect::BackoffConfig,
};
use marketfeed_instrument::exchange::ExchangeId;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Everything the binary reads from its TOML file, expressed as a close mirror of the config
/// keys table: durations are authored in milliseconds and converted once at load time so the
/// rest of the process only ever handles [`Duration`]s.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub exchanges: Vec<String>,
    #[serde(default)]
    pub trading_type: TradingType,
    #[serde(default)]
    pub enable_redis: bool,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub data_timeout: DataTimeoutConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum TradingType {
    #[default]
    Spot,
    Perpetual,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisConfig {
    #[serde(default = "RedisConfig::default_host")]
    pub host: String,
    #[serde(default = "RedisConfig::default_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub db: i64,
    #[serde(default = "RedisConfig::default_key_prefix")]
    pub key_prefix: String,
}

impl RedisConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port() -> u16 {
        6379
    }

    fn default_key_prefix() -> String {
        "market".to_string()
    }

    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{password}@{}:{}/{}", self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            password: None,
            db: 0,
            key_prefix: Self::default_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "ReconnectConfig::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "ReconnectConfig::default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "ReconnectConfig::default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl ReconnectConfig {
    fn default_max_attempts() -> u32 {
        10
    }
    fn default_base_delay_ms() -> u64 {
        500
    }
    fn default_max_delay_ms() -> u64 {
        30_000
    }

    /// `enabled = false` maps to `max_attempts = 0`: the venue still reports a `ReconnectFailed`
    /// event after its first close rather than silently going dark, but never retries.
    pub fn as_backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: if self.enabled { self.max_attempts } else { 0 },
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: Self::default_max_attempts(),
            base_delay_ms: Self::default_base_delay_ms(),
            max_delay_ms: Self::default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "HeartbeatConfig::default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "HeartbeatConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl HeartbeatConfig {
    fn default_interval_ms() -> u64 {
        20_000
    }
    fn default_timeout_ms() -> u64 {
        30_000
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: Self::default_interval_ms(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTimeoutConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "DataTimeoutConfig::default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "DataTimeoutConfig::default_check_interval_ms")]
    pub check_interval_ms: u64,
}

impl DataTimeoutConfig {
    fn default_timeout_ms() -> u64 {
        30_000
    }
    fn default_check_interval_ms() -> u64 {
        5_000
    }
}

impl Default for DataTimeoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: Self::default_timeout_ms(),
            check_interval_ms: Self::default_check_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    #[serde(default = "StreamConfig::default_max_len")]
    pub max_len: usize,
    #[serde(default = "default_true")]
    pub trim_approx: bool,
}

impl StreamConfig {
    fn default_max_len() -> usize {
        10_000
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_len: Self::default_max_len(),
            trim_approx: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPoolConfig {
    pub max_subscriptions_per_connection: Option<usize>,
    #[serde(default = "default_true")]
    pub use_combined_stream: bool,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_subscriptions_per_connection: None,
            use_combined_stream: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    #[serde(default = "CacheConfig::default_max_candles")]
    pub max_candles: usize,
    #[serde(default = "CacheConfig::default_history_candles")]
    pub history_candles: usize,
}

impl CacheConfig {
    fn default_max_candles() -> usize {
        1_000
    }
    fn default_history_candles() -> usize {
        200
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_candles: Self::default_max_candles(),
            history_candles: Self::default_history_candles(),
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            heartbeat_enabled: self.heartbeat.enabled,
            heartbeat_interval: Duration::from_millis(self.heartbeat.interval_ms),
            data_timeout_enabled: self.data_timeout.enabled,
            data_timeout: Duration::from_millis(self.data_timeout.timeout_ms),
            data_timeout_check_interval: Duration::from_millis(self.data_timeout.check_interval_ms),
        }
    }

    /// Resolves each configured exchange name (`binance`, `bybit`, `okx`, ...) into the concrete
    /// [`ExchangeId`] this process's trading type selects, erroring on an unrecognised name
    /// rather than silently skipping it.
    pub fn resolve_exchange_ids(&self) -> Result<Vec<ExchangeId>, ConfigError> {
        self.exchanges
            .iter()
            .map(|name| resolve_exchange_id(name, self.trading_type))
            .collect()
    }
}

fn resolve_exchange_id(name: &str, trading_type: TradingType) -> Result<ExchangeId, ConfigError> {
    use TradingType::{Perpetual, Spot};
    let id = match (name.to_ascii_lowercase().as_str(), trading_type) {
        ("binance", Spot) => ExchangeId::BinanceSpot,
        ("binance", Perpetual) => ExchangeId::BinanceFuturesUsd,
        ("bybit", Spot) => ExchangeId::BybitSpot,
        ("bybit", Perpetual) => ExchangeId::BybitPerpetual,
        ("gate" | "gateio", Spot) => ExchangeId::GateSpot,
        ("gate" | "gateio", Perpetual) => ExchangeId::GatePerpetual,
        ("kraken", Spot) => ExchangeId::KrakenSpot,
        ("kraken", Perpetual) => ExchangeId::KrakenFutures,
        ("okx", _) => ExchangeId::Okx,
        ("deribit", _) => ExchangeId::Deribit,
        ("bitget", _) => ExchangeId::Bitget,
        ("kucoin", _) => ExchangeId::Kucoin,
        (other, _) => return Err(ConfigError::UnknownExchange(other.to_string())),
    };
    Ok(id)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("unknown exchange name in config: {0}")]
    UnknownExchange(String),
}

pub fn load(path: &str) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_falls_back_to_defaults() {
        let config: Config = toml::from_str(r#"exchanges = ["binance", "okx"]"#).unwrap();
        assert_eq!(config.trading_type, TradingType::Spot);
        assert!(config.reconnect.enabled);
        assert_eq!(config.cache.max_candles, 1_000);
        assert_eq!(config.cache.history_candles, 200);
    }

    #[test]
    fn test_resolve_exchange_ids_respects_trading_type() {
        let config = Config {
            exchanges: vec!["binance".to_string(), "kraken".to_string()],
            trading_type: TradingType::Perpetual,
            ..minimal()
        };
        let ids = config.resolve_exchange_ids().unwrap();
        assert_eq!(ids, vec![ExchangeId::BinanceFuturesUsd, ExchangeId::KrakenFutures]);
    }

    #[test]
    fn test_resolve_exchange_ids_rejects_unknown_name() {
        let config = Config {
            exchanges: vec!["not-a-venue".to_string()],
            ..minimal()
        };
        assert!(config.resolve_exchange_ids().is_err());
    }

    fn minimal() -> Config {
        toml::from_str(r#"exchanges = []"#).unwrap()
    }
}
