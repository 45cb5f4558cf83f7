use crate::config::{Config, IdentityKey};
use anyhow::{Context, Result};
use reqwest::StatusCode;
use sqlx::PgPool;
use std::time::Duration;

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub gateway: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.gateway
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("Payment Gateway:       {}", status(self.gateway));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config, pool: &PgPool) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        gateway: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_database(pool).await {
        report.database = false;
        report.errors.push(format!("Database: {}", e));
    }

    if let Err(e) = validate_gateway(&config.gateway.base_url, &config.gateway.secret_key).await {
        report.gateway = false;
        report.errors.push(format!("Payment gateway: {}", e));
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is empty");
    }
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if config.gateway.secret_key.is_empty() {
        anyhow::bail!("PAYMENT_GATEWAY_SECRET_KEY is empty");
    }
    if let IdentityKey::Secret(secret) = &config.identity.key {
        if secret.len() < 16 {
            anyhow::bail!("IDENTITY_JWT_SECRET must be at least 16 characters");
        }
    }
    let currency = &config.core.currency;
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        anyhow::bail!("PAYMENT_CURRENCY must be a three-letter ISO code");
    }

    url::Url::parse(&config.database_url).context("DATABASE_URL is not a valid URL")?;
    url::Url::parse(&config.gateway.base_url).context("PAYMENT_GATEWAY_URL is not a valid URL")?;

    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

async fn validate_gateway(base_url: &str, secret_key: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let response = client
        .get(format!("{}/v1/balance", base_url.trim_end_matches('/')))
        .bearer_auth(secret_key)
        .send()
        .await
        .context("Failed to connect to payment gateway")?;

    match response.status() {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED => anyhow::bail!("gateway rejected the secret key"),
        s => anyhow::bail!("gateway returned status: {}", s),
    }
}
