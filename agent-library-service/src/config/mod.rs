use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentLibraryConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub mongodb: MongoConfig,
    pub redis: RedisConfig,
    pub clerk: ClerkConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Identity provider settings. Keys may be absent in dev; the service then
/// rejects every authenticated request and every webhook delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct ClerkConfig {
    pub publishable_key: Option<String>,
    pub secret_key: Option<String>,
    pub jwt_key_path: Option<String>,
    pub authorized_parties: Vec<String>,
    pub webhook_secret: Option<String>,
}

const PLACEHOLDER_PUBLISHABLE_KEY: &str = "your_clerk_publishable_key";
const PLACEHOLDER_SECRET_KEY: &str = "your_clerk_secret_key";

impl ClerkConfig {
    /// Both provider keys are set to something other than the sample
    /// `.env` placeholders.
    pub fn is_configured(&self) -> bool {
        let real = |key: &Option<String>, placeholder: &str| {
            key.as_deref().is_some_and(|k| k != placeholder)
        };
        real(&self.publishable_key, PLACEHOLDER_PUBLISHABLE_KEY)
            && real(&self.secret_key, PLACEHOLDER_SECRET_KEY)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub agents_ttl_seconds: u64,
    pub usage_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub requests: u32,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

impl AgentLibraryConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AgentLibraryConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("agent-library-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT"),
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("ai-lib"), false)?,
            },
            redis: RedisConfig {
                url: redis_url(is_prod)?,
            },
            clerk: ClerkConfig {
                publishable_key: get_optional_env("CLERK_PUBLISHABLE_KEY"),
                secret_key: get_optional_env("CLERK_SECRET_KEY"),
                jwt_key_path: get_optional_env("CLERK_JWT_KEY_PATH"),
                authorized_parties: get_optional_env("CLERK_AUTHORIZED_PARTIES")
                    .map(|v| split_list(&v))
                    .unwrap_or_default(),
                webhook_secret: get_optional_env("CLERK_WEBHOOK_SECRET"),
            },
            cache: CacheConfig {
                agents_ttl_seconds: parse_env("CACHE_AGENTS_TTL_SECONDS", "600")?,
                usage_ttl_seconds: parse_env("CACHE_USAGE_TTL_SECONDS", "3600")?,
            },
            rate_limit: RateLimitConfig {
                requests: parse_env("RATE_LIMIT_REQUESTS", "60")?,
                window_seconds: parse_env("RATE_LIMIT_WINDOW_SECONDS", "60")?,
            },
            security: SecurityConfig {
                allowed_origins: split_list(&get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.rate_limit.requests == 0 || self.rate_limit.window_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "RATE_LIMIT_REQUESTS and RATE_LIMIT_WINDOW_SECONDS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if !self.clerk.is_configured() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "CLERK_PUBLISHABLE_KEY and CLERK_SECRET_KEY are required in production"
                )));
            }

            if self.clerk.jwt_key_path.is_none() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "CLERK_JWT_KEY_PATH is required in production but not set"
                )));
            }

            if self.clerk.webhook_secret.is_none() {
                tracing::error!("CLERK_WEBHOOK_SECRET is not set - webhook deliveries will be rejected");
            }
        }

        Ok(())
    }
}

/// `REDIS_URL` wins; otherwise assemble one from host, port and password.
fn redis_url(is_prod: bool) -> Result<String, AppError> {
    if let Some(url) = get_optional_env("REDIS_URL") {
        return Ok(url);
    }

    let host = get_env("REDIS_HOST", Some("localhost"), is_prod)?;
    let port = get_env("REDIS_PORT", Some("6379"), false)?;
    Ok(match get_optional_env("REDIS_PASSWORD") {
        Some(password) => format!("redis://:{}@{}:{}", password, host, port),
        None => format!("redis://{}:{}", host, port),
    })
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Tunables always have a usable default, even in production.
fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), false)?.parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e))
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
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
