use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::warn;

const MIN_JWT_SECRET_LENGTH: usize = 32;
const DEV_JWT_SECRET: &str = "marketwise-development-only-signing-secret";
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingVar(String),
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_lowercase().as_str() {
            "" | "dev" | "development" => Ok(Self::Development),
            "prod" | "production" => Ok(Self::Production),
            other => Err(ConfigError::InvalidValue("APP_ENV".into(), other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: SecretString,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub database_url: String,
    pub jwt: JwtConfig,
    pub generation: GenerationConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::parse(&std::env::var("APP_ENV").unwrap_or_default())?;
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://marketwise.db?mode=rwc".into());

        let jwt = JwtConfig {
            secret: resolve_jwt_secret(environment, std::env::var("JWT_SECRET_KEY").ok())?,
            ttl_minutes: parse_or("JWT_TTL_MINUTES", 60 * 24 * 7)?,
        };

        let api_key = std::env::var("GOOGLE_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("GOOGLE_API_KEY".into()))?;
        let generation = GenerationConfig {
            api_key: SecretString::from(api_key),
            model: std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-pro-latest".into()),
            base_url: std::env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_GEMINI_BASE_URL.into()),
            timeout: Duration::from_secs(parse_or("GENERATION_TIMEOUT_SECS", 120)?),
            language: std::env::var("PROMPT_LANGUAGE")
                .unwrap_or_else(|_| "Brazilian Portuguese".into()),
        };

        Ok(Self {
            environment,
            database_url,
            jwt,
            generation,
        })
    }
}

/// Picks the token signing secret. Production refuses to start without a
/// real secret; development falls back to a fixed one and says so loudly.
pub fn resolve_jwt_secret(
    environment: Environment,
    raw: Option<String>,
) -> Result<SecretString, ConfigError> {
    let raw = raw.filter(|s| !s.trim().is_empty());
    match (environment, raw) {
        (Environment::Production, None) => Err(ConfigError::MissingVar("JWT_SECRET_KEY".into())),
        (Environment::Production, Some(secret)) if secret.len() < MIN_JWT_SECRET_LENGTH => {
            Err(ConfigError::InvalidValue(
                "JWT_SECRET_KEY".into(),
                format!(
                    "must be at least {} bytes (got {})",
                    MIN_JWT_SECRET_LENGTH,
                    secret.len()
                ),
            ))
        }
        (_, Some(secret)) => Ok(SecretString::from(secret)),
        (Environment::Development, None) => {
            warn!("JWT_SECRET_KEY is not set; using the development signing secret. Never run this in production.");
            Ok(SecretString::from(DEV_JWT_SECRET.to_string()))
        }
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl JwtConfig {
    pub fn secret_bytes(&self) -> &[u8] {
        self.secret.expose_secret().as_bytes()
    }
}
