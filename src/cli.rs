use clap::{Parser, Subcommand};
use sqlx::PgPool;
use std::sync::Arc;

use crate::adapters::PostgresUserRepository;
use crate::config::{Config, IdentityKey};
use crate::domain::Role;
use crate::ports::RepositoryError;
use crate::services::UserDirectory;

#[derive(Parser)]
#[command(name = "ticketbari-core")]
#[command(about = "TicketBari Core - ticket inventory, booking and settlement service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,

    /// Account administration commands
    #[command(subcommand)]
    User(UserCommands),
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Assign a role to a registered account (bootstraps the first admin)
    SetRole {
        /// Account id (the identity token subject)
        #[arg(value_name = "USER_ID")]
        user_id: String,

        /// consumer, vendor or admin
        #[arg(value_name = "ROLE", value_parser = parse_role)]
        role: Role,
    },
}

fn parse_role(raw: &str) -> Result<Role, String> {
    raw.parse::<Role>().map_err(|e| e.to_string())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub async fn handle_user_set_role(pool: &PgPool, user_id: &str, role: Role) -> anyhow::Result<()> {
    let directory = UserDirectory::new(Arc::new(PostgresUserRepository::new(pool.clone())));

    match directory.find(user_id).await {
        Ok(_) => {}
        Err(RepositoryError::NotFound { .. }) => {
            tracing::warn!("User {} not found", user_id);
            anyhow::bail!("User {} not found; they must sign in once before a role can be set", user_id)
        }
        Err(e) => return Err(e.into()),
    }

    let user = directory.assign_role(user_id, role).await?;
    println!("✓ User {} ({}) is now {}", user.id, user.email, user.role);
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Payment Gateway URL: {}", config.gateway.base_url);
    println!(
        "  Payment Webhook: {}",
        if config.gateway.webhook_secret.is_some() { "enabled" } else { "disabled" }
    );
    println!("  Currency: {}", config.core.currency);
    println!("  Identity Key: {}", match config.identity.key {
        IdentityKey::Secret(_) => "HS256 shared secret",
        IdentityKey::PublicKeyPem(_) => "RS256 public key",
    });
    println!("  Max Advertised Tickets: {}", config.core.max_advertised_tickets);
    println!("  Departure Offset: {}", config.core.departure_offset);

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
