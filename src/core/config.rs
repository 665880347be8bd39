//! # Configuration Module
//!
//! Static configuration for the broker, loaded once at startup.
//!
//! ## Key Features
//! - YAML configuration parsing with serde
//! - Environment variable override support (`BROKER_<SECTION>_<FIELD>`)
//! - Validation that reports every problem at once
//! - Per-region settings held in a [`RegionMap`], so a missing region is a
//!   parse error rather than a runtime lookup failure

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::core::error::{BrokerError, BrokerResult};
use crate::core::types::Region;

/// Main broker configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// HTTP surface settings
    pub server: ServerConfig,

    /// Booking provider endpoints and credentials
    pub tcn: TcnConfig,

    /// Slot availability cache
    pub cache: CacheConfig,

    /// CRM endpoint used by the marker sync
    pub crm: CrmConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BrokerConfig {
    /// Load configuration from a YAML file, apply overrides and validate
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> BrokerResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BrokerError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: BrokerConfig = serde_yaml::from_str(&content)
            .map_err(|e| BrokerError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: BROKER_<SECTION>_<FIELD>
    /// For example: BROKER_SERVER_PORT=8080
    pub fn apply_env_overrides(&mut self) -> BrokerResult<()> {
        use std::env;

        if let Ok(port) = env::var("BROKER_SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| BrokerError::config(format!("Invalid BROKER_SERVER_PORT: {}", e)))?;
        }

        if let Ok(addr) = env::var("BROKER_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Ok(timeout) = env::var("BROKER_SERVER_REQUEST_TIMEOUT") {
            self.server.request_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                BrokerError::config(format!("Invalid BROKER_SERVER_REQUEST_TIMEOUT: {}", e))
            })?;
        }

        // Provider overrides
        for region in Region::ALL {
            let var = format!("BROKER_TCN_URL_{}", region.as_str().to_uppercase());
            if let Ok(url) = env::var(&var) {
                self.tcn.regions.get_mut(region).base_url = url;
            }
        }

        if let Ok(url) = env::var("BROKER_TCN_STUB_URL") {
            self.tcn.stub_url = Some(url);
        }

        if let Ok(use_stub) = env::var("BROKER_TCN_USE_STUB") {
            self.tcn.use_stub = use_stub
                .parse()
                .map_err(|e| BrokerError::config(format!("Invalid BROKER_TCN_USE_STUB: {}", e)))?;
        }

        if let Ok(token) = env::var("BROKER_TCN_BEARER_TOKEN") {
            self.tcn.bearer_token = token;
        }

        // Cache overrides
        if let Ok(enabled) = env::var("BROKER_CACHE_ENABLED") {
            self.cache.enabled = enabled
                .parse()
                .map_err(|e| BrokerError::config(format!("Invalid BROKER_CACHE_ENABLED: {}", e)))?;
        }

        if let Ok(prefix) = env::var("BROKER_CACHE_KEY_PREFIX") {
            self.cache.key_prefix = prefix;
        }

        if let Ok(ttl) = env::var("BROKER_CACHE_DEFAULT_TTL") {
            self.cache.default_ttl_seconds = ttl.parse().map_err(|e| {
                BrokerError::config(format!("Invalid BROKER_CACHE_DEFAULT_TTL: {}", e))
            })?;
        }

        if let Ok(url) = env::var("BROKER_REDIS_URL") {
            self.cache.redis.url = url;
        }

        // CRM overrides
        if let Ok(url) = env::var("BROKER_CRM_BASE_URL") {
            self.crm.base_url = url;
        }

        if let Ok(token) = env::var("BROKER_CRM_BEARER_TOKEN") {
            self.crm.bearer_token = token;
        }

        // Logging overrides
        if let Ok(level) = env::var("BROKER_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = env::var("BROKER_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Configuration validation with detailed error messages
    pub fn validate(&self) -> BrokerResult<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server port must be greater than 0".to_string());
        }

        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }

        if self.server.request_timeout.is_zero() {
            errors.push("server request_timeout must be greater than 0".to_string());
        }

        for (region, tcn) in self.tcn.regions.iter() {
            if Url::parse(&tcn.base_url).is_err() {
                errors.push(format!(
                    "TCN region '{}' has invalid base_url: {}",
                    region, tcn.base_url
                ));
            }
        }

        if self.tcn.use_stub {
            match &self.tcn.stub_url {
                Some(url) if Url::parse(url).is_ok() => {}
                Some(url) => errors.push(format!("TCN stub_url is invalid: {}", url)),
                None => errors.push("TCN use_stub is set but stub_url is missing".to_string()),
            }
        }

        if self.tcn.request_timeout.is_zero() {
            errors.push("TCN request_timeout must be greater than 0".to_string());
        }

        if self.cache.key_prefix.is_empty() {
            errors.push("cache key_prefix cannot be empty".to_string());
        } else if self.cache.key_prefix.contains('|') {
            errors.push("cache key_prefix cannot contain '|'".to_string());
        }

        if self.cache.default_ttl_seconds == 0 {
            errors.push("cache default_ttl_seconds must be greater than 0".to_string());
        }

        if self.cache.backend == CacheBackend::Redis && self.cache.redis.url.is_empty() {
            errors.push("redis url cannot be empty when the redis backend is selected".to_string());
        }

        if Url::parse(&self.crm.base_url).is_err() {
            errors.push(format!("CRM base_url is invalid: {}", self.crm.base_url));
        }

        if self.crm.batch_size == 0 {
            errors.push("CRM batch_size must be greater than 0".to_string());
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => errors.push(format!("Invalid log level: {}", self.logging.level)),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "text" => {}
            _ => errors.push(format!("Invalid log format: {}", self.logging.format)),
        }

        if !errors.is_empty() {
            return Err(BrokerError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }

    /// Cache policy derived from the cache section
    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy::from_config(&self.cache)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            tcn: TcnConfig::default(),
            cache: CacheConfig::default(),
            crm: CrmConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// One value per region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionMap<T> {
    pub a: T,
    pub b: T,
    pub c: T,
}

impl<T> RegionMap<T> {
    pub fn get(&self, region: Region) -> &T {
        match region {
            Region::A => &self.a,
            Region::B => &self.b,
            Region::C => &self.c,
        }
    }

    pub fn get_mut(&mut self, region: Region) -> &mut T {
        match region {
            Region::A => &mut self.a,
            Region::B => &mut self.b,
            Region::C => &mut self.c,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Region, &T)> {
        Region::ALL.into_iter().map(move |region| (region, self.get(region)))
    }
}

impl<T: Clone> RegionMap<T> {
    /// Same value for every region
    pub fn uniform(value: T) -> Self {
        Self {
            a: value.clone(),
            b: value.clone(),
            c: value,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,

    pub port: u16,

    /// Overall timeout for one inbound request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-region booking provider settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcnRegionConfig {
    pub base_url: String,

    /// Whether this region's provider understands the `preferredDate` parameter
    #[serde(default)]
    pub accepts_preferred_date: bool,
}

/// Booking provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcnConfig {
    pub regions: RegionMap<TcnRegionConfig>,

    /// Single stub endpoint used for every region when `use_stub` is set
    #[serde(default)]
    pub stub_url: Option<String>,

    #[serde(default)]
    pub use_stub: bool,

    /// Static bearer token sent on every provider call
    #[serde(default)]
    pub bearer_token: String,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl TcnConfig {
    /// Base URL for a region, honouring the stub switch
    pub fn base_url(&self, region: Region) -> &str {
        match (&self.stub_url, self.use_stub) {
            (Some(stub), true) => stub,
            _ => &self.regions.get(region).base_url,
        }
    }

    pub fn accepts_preferred_date(&self, region: Region) -> bool {
        self.regions.get(region).accepts_preferred_date
    }
}

impl Default for TcnConfig {
    fn default() -> Self {
        Self {
            regions: RegionMap {
                a: TcnRegionConfig {
                    base_url: "http://localhost:9001".to_string(),
                    accepts_preferred_date: true,
                },
                b: TcnRegionConfig {
                    base_url: "http://localhost:9002".to_string(),
                    accepts_preferred_date: false,
                },
                c: TcnRegionConfig {
                    base_url: "http://localhost:9003".to_string(),
                    accepts_preferred_date: false,
                },
            },
            stub_url: None,
            use_stub: false,
            bearer_token: String::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Storage backend for the slot cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    Memory,
}

impl Default for CacheBackend {
    fn default() -> Self {
        Self::Redis
    }
}

/// Per-region cache switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionCacheConfig {
    pub enabled: bool,

    /// Zero means "use the default TTL"
    #[serde(default)]
    pub ttl_seconds: u64,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Global switch, ANDed with the region flag
    pub enabled: bool,

    /// First field of every cache key
    pub key_prefix: String,

    pub default_ttl_seconds: u64,

    pub regions: RegionMap<RegionCacheConfig>,

    #[serde(default)]
    pub backend: CacheBackend,

    #[serde(default)]
    pub redis: RedisConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: "slot-broker".to_string(),
            default_ttl_seconds: 300,
            regions: RegionMap::uniform(RegionCacheConfig {
                enabled: true,
                ttl_seconds: 0,
            }),
            backend: CacheBackend::Redis,
            redis: RedisConfig::default(),
        }
    }
}

/// Redis connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,

    /// Attempts per command before giving up
    pub max_retries: u32,

    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// CRM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    /// OData Web API root, e.g. `https://org.crm.example/api/data/v9.1`
    pub base_url: String,

    #[serde(default)]
    pub bearer_token: String,

    /// Candidate ids per marker query
    pub batch_size: usize,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9100/api/data/v9.1".to_string(),
            bearer_token: String::new(),
            batch_size: 50,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Answers "is caching on for this region" and "how long do entries live"
#[derive(Debug, Clone)]
pub struct CachePolicy {
    enabled: bool,
    key_prefix: String,
    default_ttl: u64,
    regions: RegionMap<RegionCacheConfig>,
}

impl CachePolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            key_prefix: config.key_prefix.clone(),
            default_ttl: config.default_ttl_seconds,
            regions: config.regions.clone(),
        }
    }

    /// Global flag AND region flag
    pub fn is_enabled(&self, region: Region) -> bool {
        self.enabled && self.regions.get(region).enabled
    }

    pub fn is_globally_enabled(&self) -> bool {
        self.enabled
    }

    /// Region TTL in seconds, or the default when the region TTL is zero
    pub fn ttl(&self, region: Region) -> u64 {
        match self.regions.get(region).ttl_seconds {
            0 => self.default_ttl,
            ttl => ttl,
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }
}
