use anyhow::{anyhow, Context};
use chrono::{FixedOffset, Offset, Utc};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// How the identity provider's token signatures are checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityKey {
    /// Shared HS256 secret.
    Secret(String),
    /// RS256 public key in PEM form.
    PublicKeyPem(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    pub key: IdentityKey,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub base_url: String,
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

/// Business settings the workflow services read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSettings {
    pub max_advertised_tickets: i64,
    /// Offset in which ticket schedules are written.
    pub departure_offset: FixedOffset,
    pub currency: String,
    /// Upper bound on gateway pages scanned for one payment history.
    pub history_max_pages: u32,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            max_advertised_tickets: 6,
            departure_offset: FixedOffset::east_opt(6 * 3600).unwrap_or_else(|| Utc.fix()),
            currency: "bdt".to_string(),
            history_max_pages: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow!("LOG_FORMAT must be 'text' or 'json', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub gateway: GatewayConfig,
    pub identity: IdentityConfig,
    pub core: CoreSettings,
    pub cors_allowed_origins: AllowedOrigins,
    pub log_format: LogFormat,
    pub log_request_body: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| get(key).with_context(|| format!("{} must be set", key));

        let identity_key = match (get("IDENTITY_JWT_SECRET"), get("IDENTITY_JWT_PUBLIC_KEY")) {
            (_, Some(pem)) => IdentityKey::PublicKeyPem(pem.replace("\\n", "\n")),
            (Some(secret), None) => IdentityKey::Secret(secret),
            (None, None) => {
                anyhow::bail!("IDENTITY_JWT_SECRET or IDENTITY_JWT_PUBLIC_KEY must be set")
            }
        };

        let offset_minutes: i32 = parse_or(&get, "DEPARTURE_UTC_OFFSET_MINUTES", 360)?;
        let departure_offset = FixedOffset::east_opt(offset_minutes * 60)
            .with_context(|| format!("DEPARTURE_UTC_OFFSET_MINUTES out of range: {}", offset_minutes))?;

        let max_advertised_tickets: i64 = parse_or(&get, "MAX_ADVERTISED_TICKETS", 6)?;
        if max_advertised_tickets < 0 {
            anyhow::bail!("MAX_ADVERTISED_TICKETS must not be negative");
        }

        Ok(Config {
            server_port: parse_or(&get, "SERVER_PORT", 3000)?,
            database_url: required("DATABASE_URL")?,
            database_max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            gateway: GatewayConfig {
                base_url: get("PAYMENT_GATEWAY_URL")
                    .unwrap_or_else(|| "https://api.stripe.com".to_string()),
                secret_key: required("PAYMENT_GATEWAY_SECRET_KEY")?,
                webhook_secret: get("PAYMENT_WEBHOOK_SECRET"),
                timeout: Duration::from_secs(parse_or(&get, "GATEWAY_TIMEOUT_SECS", 15)?),
                max_retries: parse_or(&get, "GATEWAY_MAX_RETRIES", 3)?,
                backoff_base: Duration::from_millis(parse_or(&get, "GATEWAY_BACKOFF_BASE_MS", 200)?),
            },
            identity: IdentityConfig {
                key: identity_key,
                issuer: get("IDENTITY_ISSUER"),
                audience: get("IDENTITY_AUDIENCE"),
            },
            core: CoreSettings {
                max_advertised_tickets,
                departure_offset,
                currency: get("PAYMENT_CURRENCY")
                    .map(|c| c.to_ascii_lowercase())
                    .unwrap_or_else(|| "bdt".to_string()),
                history_max_pages: 3,
            },
            cors_allowed_origins: parse_origins(
                &get("CORS_ALLOWED_ORIGINS").unwrap_or_else(|| "*".to_string()),
            ),
            log_format: get("LOG_FORMAT")
                .map(|f| f.parse::<LogFormat>())
                .transpose()?
                .unwrap_or(LogFormat::Text),
            log_request_body: get("LOG_REQUEST_BODY")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {}='{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

fn parse_origins(raw: &str) -> AllowedOrigins {
    let value = raw.trim();
    if value == "*" {
        return AllowedOrigins::Any;
    }

    AllowedOrigins::List(
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect(),
    )
}
