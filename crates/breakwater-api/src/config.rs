//! Configuration for the Breakwater service.
//!
//! Loaded in priority order: environment variables (prefix `BREAKWATER_`,
//! highest), then `config.toml`, then built-in defaults. The service
//! works out of the box; per-provider webhook secrets are the only
//! setting a deployment must supply.

use std::{collections::HashMap, net::SocketAddr, time::Duration};

use anyhow::{bail, Context, Result};
use breakwater_guard::{BreakerConfig, RateLimiterConfig, ServiceSettings};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "BREAKWATER_";

/// Webhook verification settings for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Shared secret used to verify inbound signatures.
    pub signing_secret: String,
    /// Header carrying the signature.
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
}

/// Per-service overrides for outbound resilience settings.
///
/// Any field left unset inherits the global `outbound_*` default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundOverride {
    /// Failure ratio that opens the circuit.
    pub failure_threshold: Option<f64>,
    /// Minimum requests before the ratio is considered.
    pub min_requests: Option<u32>,
    /// Trial calls admitted while half-open.
    pub half_open_max_requests: Option<u32>,
    /// Rolling counter window, seconds.
    pub interval_seconds: Option<u64>,
    /// Open-state timeout before probing, seconds.
    pub open_timeout_seconds: Option<u64>,
    /// Token bucket capacity.
    pub rate_limit_tokens: Option<u32>,
    /// Token refill interval, milliseconds.
    pub rate_limit_refill_ms: Option<u64>,
    /// Per-call deadline, seconds.
    pub call_timeout_seconds: Option<u64>,
}

/// Complete service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Maximum database connections in the pool.
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    // Server
    /// Server bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Server bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    // Inbound webhooks
    /// Webhook verification settings keyed by provider name.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Maximum entries in the idempotency cache.
    #[serde(default = "default_cache_capacity")]
    pub idempotency_cache_capacity: u64,
    /// TTL for cached idempotency results, seconds.
    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl_seconds: u64,
    /// Failed processing runs after which an event is abandoned.
    #[serde(default = "default_max_event_retries")]
    pub max_event_retries: i32,

    // Outbound resilience defaults
    /// Failure ratio that opens a circuit.
    #[serde(default = "default_failure_threshold")]
    pub outbound_failure_threshold: f64,
    /// Minimum requests before the ratio is considered.
    #[serde(default = "default_min_requests")]
    pub outbound_min_requests: u32,
    /// Trial calls admitted while half-open.
    #[serde(default = "default_half_open_max_requests")]
    pub outbound_half_open_max_requests: u32,
    /// Rolling counter window, seconds.
    #[serde(default = "default_interval_seconds")]
    pub outbound_interval_seconds: u64,
    /// Open-state timeout before probing, seconds.
    #[serde(default = "default_open_timeout_seconds")]
    pub outbound_open_timeout_seconds: u64,
    /// Token bucket capacity.
    #[serde(default = "default_rate_limit_tokens")]
    pub outbound_rate_limit_tokens: u32,
    /// Token refill interval, milliseconds.
    #[serde(default = "default_rate_limit_refill_ms")]
    pub outbound_rate_limit_refill_ms: u64,
    /// Per-call deadline, seconds.
    #[serde(default = "default_call_timeout_seconds")]
    pub outbound_call_timeout_seconds: u64,
    /// Per-service overrides keyed by service name.
    #[serde(default)]
    pub outbound_services: HashMap<String, OutboundOverride>,

    // Logging
    /// Log level configuration (RUST_LOG syntax).
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            providers: HashMap::new(),
            idempotency_cache_capacity: default_cache_capacity(),
            idempotency_ttl_seconds: default_idempotency_ttl(),
            max_event_retries: default_max_event_retries(),
            outbound_failure_threshold: default_failure_threshold(),
            outbound_min_requests: default_min_requests(),
            outbound_half_open_max_requests: default_half_open_max_requests(),
            outbound_interval_seconds: default_interval_seconds(),
            outbound_open_timeout_seconds: default_open_timeout_seconds(),
            outbound_rate_limit_tokens: default_rate_limit_tokens(),
            outbound_rate_limit_refill_ms: default_rate_limit_refill_ms(),
            outbound_call_timeout_seconds: default_call_timeout_seconds(),
            outbound_services: HashMap::new(),
            rust_log: default_log_level(),
        }
    }
}

impl Config {
    /// Loads configuration from defaults, `config.toml`, and
    /// `BREAKWATER_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Fails when a source cannot be parsed or validation rejects the
    /// merged result.
    pub fn load() -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("failed to load configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.outbound_failure_threshold)
            || self.outbound_failure_threshold == 0.0
        {
            bail!(
                "outbound_failure_threshold must be in (0.0, 1.0], got {}",
                self.outbound_failure_threshold
            );
        }

        if self.max_event_retries <= 0 {
            bail!("max_event_retries must be positive, got {}", self.max_event_retries);
        }

        if self.outbound_rate_limit_tokens == 0 {
            bail!("outbound_rate_limit_tokens must be positive");
        }

        for (name, provider) in &self.providers {
            if provider.signing_secret.is_empty() {
                bail!("provider {name} has an empty signing secret");
            }
        }

        Ok(())
    }

    /// Socket address the server binds to.
    ///
    /// # Errors
    ///
    /// Fails when `host` is not a valid IP address.
    pub fn server_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    /// HTTP request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// TTL applied to idempotency cache entries.
    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_seconds)
    }

    /// Webhook settings for a provider, if configured.
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// Global outbound resilience defaults.
    pub fn outbound_defaults(&self) -> ServiceSettings {
        ServiceSettings {
            breaker: BreakerConfig {
                max_requests: self.outbound_half_open_max_requests,
                min_requests: self.outbound_min_requests,
                failure_threshold: self.outbound_failure_threshold,
                interval: Duration::from_secs(self.outbound_interval_seconds),
                timeout: Duration::from_secs(self.outbound_open_timeout_seconds),
            },
            rate_limit: RateLimiterConfig {
                max_tokens: self.outbound_rate_limit_tokens,
                refill_interval: Duration::from_millis(self.outbound_rate_limit_refill_ms),
            },
            call_timeout: Duration::from_secs(self.outbound_call_timeout_seconds),
        }
    }

    /// Per-service outbound settings with overrides applied over the
    /// defaults.
    pub fn outbound_overrides(&self) -> HashMap<String, ServiceSettings> {
        let defaults = self.outbound_defaults();

        self.outbound_services
            .iter()
            .map(|(name, over)| {
                let settings = ServiceSettings {
                    breaker: BreakerConfig {
                        max_requests: over
                            .half_open_max_requests
                            .unwrap_or(defaults.breaker.max_requests),
                        min_requests: over.min_requests.unwrap_or(defaults.breaker.min_requests),
                        failure_threshold: over
                            .failure_threshold
                            .unwrap_or(defaults.breaker.failure_threshold),
                        interval: over
                            .interval_seconds
                            .map_or(defaults.breaker.interval, Duration::from_secs),
                        timeout: over
                            .open_timeout_seconds
                            .map_or(defaults.breaker.timeout, Duration::from_secs),
                    },
                    rate_limit: RateLimiterConfig {
                        max_tokens: over
                            .rate_limit_tokens
                            .unwrap_or(defaults.rate_limit.max_tokens),
                        refill_interval: over
                            .rate_limit_refill_ms
                            .map_or(defaults.rate_limit.refill_interval, Duration::from_millis),
                    },
                    call_timeout: over
                        .call_timeout_seconds
                        .map_or(defaults.call_timeout, Duration::from_secs),
                };
                (name.clone(), settings)
            })
            .collect()
    }
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/breakwater".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_signature_header() -> String {
    "X-Webhook-Signature".to_string()
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_idempotency_ttl() -> u64 {
    24 * 60 * 60
}

fn default_max_event_retries() -> i32 {
    12
}

fn default_failure_threshold() -> f64 {
    0.6
}

fn default_min_requests() -> u32 {
    5
}

fn default_half_open_max_requests() -> u32 {
    3
}

fn default_interval_seconds() -> u64 {
    10
}

fn default_open_timeout_seconds() -> u64 {
    30
}

fn default_rate_limit_tokens() -> u32 {
    100
}

fn default_rate_limit_refill_ms() -> u64 {
    10
}

fn default_call_timeout_seconds() -> u64 {
    5
}

fn default_log_level() -> String {
    "info,breakwater=debug".to_string()
}
