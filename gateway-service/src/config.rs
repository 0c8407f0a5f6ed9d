//! Environment configuration.
//!
//! Everything comes from the environment, with development defaults and
//! prod-strict required values. The kernel's own tunables are assembled here
//! into a [`KernelConfig`] value.

use std::env;

use action_kernel::config::{KernelConfig, RateLimitConfig, WindowLimit};
use serde::Deserialize;

use crate::error::GatewayError;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub admin_api_key: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kernel: KernelConfig,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, GatewayError> {
        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| GatewayError::Config(anyhow::anyhow!(e)))?;
        let is_prod = environment == Environment::Prod;

        let config = GatewayConfig {
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("gateway-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            port: parse_env("PORT", Some("8080"), is_prod)?,
            allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            admin_api_key: get_env("ADMIN_API_KEY", None, true)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
            },
            kernel: kernel_config_from_env(is_prod)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), GatewayError> {
        if self.port == 0 {
            return Err(GatewayError::Config(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }
        if self.environment == Environment::Prod
            && self.allowed_origins.iter().any(|o| o == "*")
        {
            return Err(GatewayError::Config(anyhow::anyhow!(
                "Wildcard CORS origin not allowed in production"
            )));
        }
        if self.kernel.idempotency_ttl_secs == 0 {
            return Err(GatewayError::Config(anyhow::anyhow!(
                "IDEMPOTENCY_TTL_SECS must be positive"
            )));
        }
        Ok(())
    }
}

fn kernel_config_from_env(is_prod: bool) -> Result<KernelConfig, GatewayError> {
    let defaults = KernelConfig::default();
    Ok(KernelConfig {
        rate_limits: RateLimitConfig {
            api_key: windows_from_env("API_KEY", &[100, 1_000, 10_000], is_prod)?,
            tenant: windows_from_env("TENANT", &[200, 2_000, 20_000], is_prod)?,
            source_ip: windows_from_env("SOURCE_IP", &[300, 3_000, 30_000], is_prod)?,
            tier_multipliers: defaults.rate_limits.tier_multipliers.clone(),
        },
        idempotency_ttl_secs: parse_env("IDEMPOTENCY_TTL_SECS", Some("86400"), is_prod)?,
        verification_token_ttl_secs: parse_env(
            "VERIFICATION_TOKEN_TTL_SECS",
            Some("86400"),
            is_prod,
        )?,
        handler_timeout_secs: parse_env("HANDLER_TIMEOUT_SECS", Some("30"), is_prod)?,
        audit_flush_timeout_ms: parse_env("AUDIT_FLUSH_TIMEOUT_MS", Some("250"), is_prod)?,
        ..defaults
    })
}

/// Three fixed windows per dimension: burst (5m), hourly, daily.
fn windows_from_env(
    dimension: &str,
    defaults: &[u64; 3],
    is_prod: bool,
) -> Result<Vec<WindowLimit>, GatewayError> {
    let burst: u64 = parse_env(
        &format!("RATE_LIMIT_{}_BURST", dimension),
        Some(&defaults[0].to_string()),
        is_prod,
    )?;
    let hourly: u64 = parse_env(
        &format!("RATE_LIMIT_{}_HOURLY", dimension),
        Some(&defaults[1].to_string()),
        is_prod,
    )?;
    let daily: u64 = parse_env(
        &format!("RATE_LIMIT_{}_DAILY", dimension),
        Some(&defaults[2].to_string()),
        is_prod,
    )?;
    Ok(vec![
        WindowLimit::new("burst", 300, burst),
        WindowLimit::new("hourly", 3_600, hourly),
        WindowLimit::new("daily", 86_400, daily),
    ])
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, GatewayError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(GatewayError::Config(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(GatewayError::Config(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(
    key: &str,
    default: Option<&str>,
    is_prod: bool,
) -> Result<T, GatewayError>
where
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?
        .parse()
        .map_err(|e: T::Err| GatewayError::Config(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
