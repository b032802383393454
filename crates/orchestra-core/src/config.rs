//! Configuration for Orchestra
//!
//! Every knob has a default so an empty TOML document is a valid config.
//! Durations are stored as integer seconds or milliseconds and exposed as
//! [`Duration`] through accessor methods.

use crate::error::{OrchestraError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the router API key
pub const ENV_ROUTER_API_KEY: &str = "ORCHESTRA_ROUTER_API_KEY";
/// Environment variable overriding the router base URL
pub const ENV_ROUTER_BASE_URL: &str = "ORCHESTRA_ROUTER_BASE_URL";
/// Environment variable overriding the daemon URL
pub const ENV_DAEMON_URL: &str = "ORCHESTRA_DAEMON_URL";
/// Environment variable overriding the model directory
pub const ENV_MODEL_DIR: &str = "ORCHESTRA_MODEL_DIR";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestraConfig {
    /// Provider tried first when set
    pub active_provider: Option<String>,
    pub registry: RegistryConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub maintenance: MaintenanceConfig,
    pub providers: ProvidersConfig,
    pub breaker: BreakerConfig,
}

impl OrchestraConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document
    ///
    /// # Errors
    /// - `OrchestraError::Configuration` on malformed TOML or invalid values
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| OrchestraError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// - `OrchestraError::Io` if the file cannot be read
    /// - `OrchestraError::Configuration` on malformed TOML or invalid values
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Self::from_toml_str(&source)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// - `OrchestraError::Configuration` if serialization fails
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| OrchestraError::Configuration(format!("cannot render config: {e}")))
    }

    /// Apply `ORCHESTRA_*` environment overrides
    #[must_use]
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (environment, test map)
    #[must_use]
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup(ENV_ROUTER_API_KEY).filter(|k| !k.is_empty()) {
            self.providers.router.api_key = Some(key);
        }
        if let Some(url) = lookup(ENV_ROUTER_BASE_URL) {
            self.providers.router.base_url = url;
        }
        if let Some(url) = lookup(ENV_DAEMON_URL) {
            self.providers.daemon.base_url = url;
        }
        if let Some(dir) = lookup(ENV_MODEL_DIR) {
            self.registry.model_dir = PathBuf::from(dir);
        }
        self
    }

    /// Check cross-field consistency
    ///
    /// # Errors
    /// - `OrchestraError::Configuration` describing the first violation
    pub fn validate(&self) -> Result<()> {
        let r = &self.registry;
        if !(0.0..=1.0).contains(&r.low_watermark) || !(0.0..=1.0).contains(&r.high_watermark) {
            return Err(OrchestraError::Configuration(
                "watermarks must be within 0.0..=1.0".to_string(),
            ));
        }
        if r.low_watermark >= r.high_watermark {
            return Err(OrchestraError::Configuration(format!(
                "low watermark {} must be below high watermark {}",
                r.low_watermark, r.high_watermark
            )));
        }
        if r.memory_ceiling_fraction <= 0.0 || r.memory_ceiling_fraction > 1.0 {
            return Err(OrchestraError::Configuration(
                "memory_ceiling_fraction must be within (0.0, 1.0]".to_string(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(OrchestraError::Configuration(
                "cache capacity must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(OrchestraError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(OrchestraError::Configuration(
                "retry.base_delay_ms exceeds retry.max_delay_ms".to_string(),
            ));
        }
        if self.breaker.enabled
            && (self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0)
        {
            return Err(OrchestraError::Configuration(
                "breaker thresholds must be at least 1".to_string(),
            ));
        }
        if self.maintenance.interval_secs == 0 {
            return Err(OrchestraError::Configuration(
                "maintenance.interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// With model directory
    #[inline]
    #[must_use]
    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.registry.model_dir = dir.into();
        self
    }

    /// With fixed memory ceiling
    #[inline]
    #[must_use]
    pub fn with_max_memory_bytes(mut self, bytes: u64) -> Self {
        self.registry.max_memory_bytes = Some(bytes);
        self
    }

    /// With active provider
    #[inline]
    #[must_use]
    pub fn with_active_provider(mut self, provider: impl Into<String>) -> Self {
        self.active_provider = Some(provider.into());
        self
    }

    /// With retry settings
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// With cache settings
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

/// Model registry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory scanned for model files
    pub model_dir: PathBuf,
    /// File extensions treated as models
    pub extensions: Vec<String>,
    /// Fixed ceiling; when absent a fraction of system memory is used
    pub max_memory_bytes: Option<u64>,
    /// Fraction of total system memory used as the ceiling
    pub memory_ceiling_fraction: f64,
    /// Usage ratio above which cleanup evicts
    pub high_watermark: f64,
    /// Usage ratio at which cleanup stops
    pub low_watermark: f64,
    /// Resident memory estimate as a multiple of file size
    pub memory_overhead_factor: f64,
    /// Register every model file at startup
    pub scan_on_startup: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("./models"),
            extensions: vec!["onnx".to_string()],
            max_memory_bytes: None,
            memory_ceiling_fraction: 0.5,
            high_watermark: 0.80,
            low_watermark: 0.60,
            memory_overhead_factor: 1.5,
            scan_on_startup: true,
        }
    }
}

/// Result cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    /// Maximum number of entries
    pub capacity: usize,
}

impl CacheConfig {
    /// Entry lifetime
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            capacity: 100,
        }
    }
}

/// Retry and backoff settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per provider, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Add up to 10% random jitter to each delay
    pub jitter: bool,
    /// Timeout applied to every single attempt
    pub attempt_timeout_ms: u64,
}

impl RetryConfig {
    /// Delay before the first retry
    #[inline]
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Upper bound on any single delay
    #[inline]
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Per-attempt timeout
    #[inline]
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter: true,
            attempt_timeout_ms: 120_000,
        }
    }
}

/// Maintenance scheduler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl MaintenanceConfig {
    /// Pass period
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
        }
    }
}

/// Per-provider circuit breaker, off unless enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub enabled: bool,
    /// Consecutive transient failures that open the circuit
    pub failure_threshold: u32,
    /// Time spent open before calls are let through again
    pub open_timeout_secs: u64,
    /// Half-open successes needed to close the circuit
    pub success_threshold: u32,
}

impl BreakerConfig {
    /// Enabled breaker with default thresholds
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: 5,
            open_timeout_secs: 60,
            success_threshold: 3,
        }
    }
}

/// Backends registered at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub local: LocalProviderConfig,
    pub router: RemoteProviderConfig,
    pub daemon: RemoteProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            local: LocalProviderConfig::default(),
            router: RemoteProviderConfig::router(),
            daemon: RemoteProviderConfig::daemon(),
        }
    }
}

/// Local model provider settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalProviderConfig {
    pub enabled: bool,
    pub id: String,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            id: "local".to_string(),
        }
    }
}

/// Remote HTTP provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteProviderConfig {
    pub enabled: bool,
    pub id: String,
    pub base_url: String,
    /// Bearer token; required by the router
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Model used when a request names none
    pub default_model: String,
    /// USD per 1k tokens used for cost estimates
    pub cost_per_1k_tokens: f64,
    /// Sent as `HTTP-Referer`
    pub referer: Option<String>,
    /// Sent as `X-Title`
    pub app_name: Option<String>,
}

impl RemoteProviderConfig {
    /// Defaults for the hosted router
    #[must_use]
    pub fn router() -> Self {
        Self {
            enabled: true,
            id: "router".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
            timeout_secs: 30,
            default_model: "openai/gpt-4o-mini".to_string(),
            cost_per_1k_tokens: 0.002,
            referer: None,
            app_name: Some("Orchestra".to_string()),
        }
    }

    /// Defaults for the local daemon
    #[must_use]
    pub fn daemon() -> Self {
        Self {
            enabled: false,
            id: "daemon".to_string(),
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: None,
            timeout_secs: 300,
            default_model: "llama3".to_string(),
            cost_per_1k_tokens: 0.0,
            referer: None,
            app_name: None,
        }
    }

    /// Request timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RemoteProviderConfig {
    fn default() -> Self {
        Self::router()
    }
}
