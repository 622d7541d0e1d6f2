//! Archiver configuration
//!
//! Loaded from a JSON file, then selectively overridden from the
//! environment. Every error here is fatal at startup.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use persistence::ClickHouseConfig;
use serde::Deserialize;
use thiserror::Error;
use types::asset::{AssetClass, SamplingInterval};
use types::errors::TypesError;
use types::ids::SymbolId;

use crate::connector::{ConnectorConfig, ReconnectPolicy};
use crate::dispatcher::{DispatcherConfig, OverflowPolicy, DEFAULT_FLUSH_THRESHOLD};
use crate::feed::FeedEndpoints;

/// Env var naming the config file.
pub const CONFIG_PATH_ENV: &str = "TRADE_ARCHIVER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.json";
/// Overrides `dispatcher_buffer_size`.
pub const BUFFER_SIZE_ENV: &str = "DISPATCHER_BUFFER_SIZE";
/// Any non-empty value selects `host_name_docker`.
pub const IN_DOCKER_ENV: &str = "AM_I_IN_DOCKER";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid aggregate-trade stream interval: {0}")]
    InvalidInterval(#[source] TypesError),

    #[error("No symbols configured")]
    NoSymbols,

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(#[source] TypesError),

    #[error("Invalid {field}: {reason}")]
    InvalidThreshold { field: &'static str, reason: String },
}

/// Base URL overrides per asset class; unset entries use the venue default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub spot: Option<String>,
    pub usd_m: Option<String>,
    pub coin_m: Option<String>,
}

/// One entry of the ranked symbol file.
#[derive(Debug, Deserialize)]
struct RankedSymbol {
    full_symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ArchiverConfig {
    /// Carried for completeness; public streams need no credentials.
    pub api_key: String,
    pub api_secret: String,
    /// Canonical symbols, e.g. `BTCUSDT`, `USD_F_ETHUSDT`.
    pub symbols: Vec<String>,
    /// JSON array of `{"full_symbol": ...}` ranked by trade count. Replaces
    /// `symbols` when set.
    pub symbols_file: Option<PathBuf>,
    pub aggtrade_stream_interval: u64,
    pub log_to_console: bool,
    pub dispatcher_buffer_size: usize,
    pub dispatcher_max_buffered: Option<usize>,
    pub overflow_policy: OverflowPolicy,
    pub flush_interval_ms: u64,
    pub store_write_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// `0` disables the idle timeout.
    pub idle_timeout_ms: u64,
    pub reconnect_initial_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub db_name: String,
    pub host_name_docker: String,
    pub host_name_default: String,
    pub store_port: u16,
    pub store_user: Option<String>,
    pub store_password: Option<String>,
    pub endpoints: EndpointConfig,
    #[serde(skip)]
    in_docker: bool,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            symbols: Vec::new(),
            symbols_file: None,
            aggtrade_stream_interval: 100,
            log_to_console: true,
            dispatcher_buffer_size: DEFAULT_FLUSH_THRESHOLD,
            dispatcher_max_buffered: None,
            overflow_policy: OverflowPolicy::default(),
            flush_interval_ms: 5_000,
            store_write_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            idle_timeout_ms: 600_000,
            reconnect_initial_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            db_name: "archive".to_string(),
            host_name_docker: "clickhouse".to_string(),
            host_name_default: "localhost".to_string(),
            store_port: 8123,
            store_user: None,
            store_password: None,
            endpoints: EndpointConfig::default(),
            in_docker: false,
        }
    }
}

impl ArchiverConfig {
    /// Read `path`, apply process environment overrides, validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(&text)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Path from `TRADE_ARCHIVER_CONFIG`, else `config.json`.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            what: "configuration".to_string(),
            source,
        })
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(BUFFER_SIZE_ENV) {
            self.dispatcher_buffer_size =
                raw.trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::InvalidThreshold {
                        field: BUFFER_SIZE_ENV,
                        reason: format!("{raw:?}: {e}"),
                    })?;
        }
        self.in_docker = lookup(IN_DOCKER_ENV).is_some_and(|v| !v.is_empty());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sampling_interval()?;

        if self.dispatcher_buffer_size == 0 {
            return Err(ConfigError::InvalidThreshold {
                field: "dispatcher_buffer_size",
                reason: "must be positive".to_string(),
            });
        }
        if let Some(cap) = self.dispatcher_max_buffered {
            if cap < self.dispatcher_buffer_size {
                return Err(ConfigError::InvalidThreshold {
                    field: "dispatcher_max_buffered",
                    reason: format!(
                        "{cap} is below dispatcher_buffer_size ({})",
                        self.dispatcher_buffer_size
                    ),
                });
            }
        }
        for (field, value) in [
            ("flush_interval_ms", self.flush_interval_ms),
            ("store_write_timeout_ms", self.store_write_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidThreshold {
                    field,
                    reason: "must be positive".to_string(),
                });
            }
        }
        if self.reconnect_initial_delay_ms > self.reconnect_max_delay_ms {
            return Err(ConfigError::InvalidThreshold {
                field: "reconnect_initial_delay_ms",
                reason: "exceeds reconnect_max_delay_ms".to_string(),
            });
        }

        if self.symbols_file.is_none() {
            parse_symbols(&self.symbols)?;
        }
        Ok(())
    }

    pub fn sampling_interval(&self) -> Result<SamplingInterval, ConfigError> {
        SamplingInterval::try_from(self.aggtrade_stream_interval).map_err(ConfigError::InvalidInterval)
    }

    /// Symbols to archive, in configured (or ranked) order, duplicates removed.
    pub fn symbol_universe(&self) -> Result<Vec<SymbolId>, ConfigError> {
        match &self.symbols_file {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                let ranked: Vec<RankedSymbol> =
                    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                        what: path.display().to_string(),
                        source,
                    })?;
                let names: Vec<String> = ranked.into_iter().map(|r| r.full_symbol).collect();
                parse_symbols(&names)
            }
            None => parse_symbols(&self.symbols),
        }
    }

    pub fn store_host(&self) -> &str {
        if self.in_docker {
            &self.host_name_docker
        } else {
            &self.host_name_default
        }
    }

    pub fn store_config(&self) -> ClickHouseConfig {
        ClickHouseConfig::new(
            format!("http://{}:{}/", self.store_host(), self.store_port),
            self.db_name.clone(),
        )
        .with_credentials(self.store_user.clone(), self.store_password.clone())
    }

    pub fn store_write_timeout(&self) -> Duration {
        Duration::from_millis(self.store_write_timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            flush_threshold: self.dispatcher_buffer_size,
            max_buffered: self.dispatcher_max_buffered,
            overflow_policy: self.overflow_policy,
            write_timeout: self.store_write_timeout(),
        }
    }

    pub fn feed_endpoints(&self) -> FeedEndpoints {
        let overrides = [
            (AssetClass::Spot, &self.endpoints.spot),
            (AssetClass::UsdMarginedFutures, &self.endpoints.usd_m),
            (AssetClass::CoinMarginedFutures, &self.endpoints.coin_m),
        ];
        overrides
            .into_iter()
            .fold(FeedEndpoints::default(), |endpoints, (class, base)| match base {
                Some(base) => endpoints.with_override(class, base.clone()),
                None => endpoints,
            })
    }

    pub fn connector_config(&self) -> Result<ConnectorConfig, ConfigError> {
        Ok(ConnectorConfig {
            endpoints: self.feed_endpoints(),
            sampling_interval: self.sampling_interval()?,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            idle_timeout: (self.idle_timeout_ms > 0)
                .then(|| Duration::from_millis(self.idle_timeout_ms)),
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(self.reconnect_initial_delay_ms),
                max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            },
        })
    }
}

fn parse_symbols(names: &[String]) -> Result<Vec<SymbolId>, ConfigError> {
    let mut symbols: Vec<SymbolId> = Vec::with_capacity(names.len());
    for name in names {
        let symbol = SymbolId::parse(name).map_err(ConfigError::InvalidSymbol)?;
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    if symbols.is_empty() {
        return Err(ConfigError::NoSymbols);
    }
    Ok(symbols)
}
