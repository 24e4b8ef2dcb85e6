//! Configuration layer: typed settings with layered precedence (file → env).
//!
//! Sources, lowest to highest: `config/default.*`, `scopa.*` next to the
//! process, an explicit file passed by the host, then `SCOPA__`-prefixed
//! environment variables. Driver selection is resolved once at startup and
//! immutable for the process lifetime.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::path::Path;
use std::str::FromStr;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "scopa";

pub(crate) const DEFAULT_TAG_HEADER: &str = "Cache-Tags";
pub(crate) const DEFAULT_INFO_HEADER: &str = "X-Scopa-Cache";
const DEFAULT_PURGE_TAG_HEADER: &str = "X-Purge-Tags";
const DEFAULT_PURGE_METHOD: &str = "PURGE";
const DEFAULT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub purge: PurgeSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Connection settings for the Postgres-backed tag index.
///
/// `url` is optional: deployments without fallback mode, or with the
/// in-memory index, never open a database connection.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: NonZeroU32::new(DEFAULT_DB_MAX_CONNECTIONS).unwrap_or(NonZeroU32::MIN),
        }
    }
}

/// Invalidation settings: the driver registry and the knobs shared by all
/// drivers.
#[derive(Debug, Clone)]
pub struct PurgeSettings {
    /// Name of the driver to activate; must exist in `drivers`.
    pub active_driver: String,
    /// Named registry of driver definitions.
    pub drivers: HashMap<String, DriverSettings>,
    /// Maintain the local tag index and emulate purge-by-tag through it.
    pub fallback_local_index: bool,
    /// Multi-tenant namespace prefix prepended to tags before transmission.
    pub key_prefix: String,
    /// Response header carrying the canonical tags of the current page.
    pub tag_header: String,
    /// Informational response header (hit/miss/bypass); observability only.
    pub info_header: String,
    /// Maximum mutation events merged into one purge batch.
    pub consume_batch_limit: usize,
}

impl Default for PurgeSettings {
    fn default() -> Self {
        let mut drivers = HashMap::new();
        drivers.insert("noop".to_string(), DriverSettings::noop());
        Self {
            active_driver: "noop".to_string(),
            drivers,
            fallback_local_index: false,
            key_prefix: String::new(),
            tag_header: DEFAULT_TAG_HEADER.to_string(),
            info_header: DEFAULT_INFO_HEADER.to_string(),
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
        }
    }
}

/// One entry in the driver registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    pub kind: DriverKind,
    /// Purge endpoint; required for `http` drivers.
    pub endpoint: Option<String>,
    /// HTTP method for purge calls.
    pub method: String,
    /// Request header carrying tags on outbound purge calls
    /// (`xkey-purge` for Varnish, `Surrogate-Key` for Fastly).
    pub tag_header: String,
    /// Optional auth header name/token pair; both or neither.
    pub auth_header: Option<String>,
    pub auth_token: Option<String>,
    /// Whether the backend can purge by tag natively.
    pub tag_capable: bool,
    /// Whether all tags of a batch fit into one purge call.
    pub batch: bool,
    /// Per-call deadline.
    pub timeout_ms: u64,
    /// Bounded fan-out when batching is unsupported.
    pub concurrency: usize,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            kind: DriverKind::Noop,
            endpoint: None,
            method: DEFAULT_PURGE_METHOD.to_string(),
            tag_header: DEFAULT_PURGE_TAG_HEADER.to_string(),
            auth_header: None,
            auth_token: None,
            tag_capable: true,
            batch: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl DriverSettings {
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn http(endpoint: impl Into<String>) -> Self {
        Self {
            kind: DriverKind::Http,
            endpoint: Some(endpoint.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    Noop,
    Http,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (files → environment).
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("SCOPA").separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    purge: RawPurgeSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPurgeSettings {
    active_driver: Option<String>,
    drivers: HashMap<String, DriverSettings>,
    fallback_local_index: Option<bool>,
    key_prefix: Option<String>,
    tag_header: Option<String>,
    info_header: Option<String>,
    consume_batch_limit: Option<usize>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            purge,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            purge: build_purge_settings(purge)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = database.max_connections.unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = NonZeroU32::new(max_connections)
        .ok_or_else(|| LoadError::invalid("database.max_connections", "must be greater than zero"))?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_purge_settings(purge: RawPurgeSettings) -> Result<PurgeSettings, LoadError> {
    let defaults = PurgeSettings::default();

    let active_driver = purge
        .active_driver
        .unwrap_or_else(|| defaults.active_driver.clone());
    if active_driver.is_empty() {
        return Err(LoadError::invalid(
            "purge.active_driver",
            "driver name must not be empty",
        ));
    }

    let drivers = if purge.drivers.is_empty() {
        defaults.drivers
    } else {
        purge.drivers
    };

    let tag_header = purge.tag_header.unwrap_or(defaults.tag_header);
    if tag_header.is_empty() {
        return Err(LoadError::invalid(
            "purge.tag_header",
            "header name must not be empty",
        ));
    }

    let info_header = purge.info_header.unwrap_or(defaults.info_header);
    if info_header.is_empty() {
        return Err(LoadError::invalid(
            "purge.info_header",
            "header name must not be empty",
        ));
    }

    let consume_batch_limit = purge
        .consume_batch_limit
        .unwrap_or(defaults.consume_batch_limit);
    if consume_batch_limit == 0 {
        return Err(LoadError::invalid(
            "purge.consume_batch_limit",
            "must be greater than zero",
        ));
    }

    Ok(PurgeSettings {
        active_driver,
        drivers,
        fallback_local_index: purge
            .fallback_local_index
            .unwrap_or(defaults.fallback_local_index),
        key_prefix: purge.key_prefix.unwrap_or(defaults.key_prefix),
        tag_header,
        info_header,
        consume_batch_limit,
    })
}
