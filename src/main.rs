use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ticketbari_core::cli::{Cli, Commands, DbCommands, UserCommands};
use ticketbari_core::config::{Config, LogFormat};
use ticketbari_core::gateway::{RetryPolicy, StripeClient};
use ticketbari_core::health::{GatewayChecker, HealthChecks, PostgresChecker};
use ticketbari_core::middleware::{IdentityVerifier, RequestLogging};
use ticketbari_core::{build_router, cli, db, startup, AppState, Repositories};

const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
const CIRCUIT_RESET_SECS: u64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    match cli.command {
        None | Some(Commands::Serve) => serve(config).await,
        Some(Commands::Db(DbCommands::Migrate)) => cli::handle_db_migrate(&config).await,
        Some(Commands::Config) => {
            cli::handle_config_validate(&config)?;
            let pool = db::create_pool(&config).await?;
            let report = startup::validate_environment(&config, &pool).await?;
            report.print();
            if !report.is_valid() {
                anyhow::bail!("startup validation failed");
            }
            Ok(())
        }
        Some(Commands::User(UserCommands::SetRole { user_id, role })) => {
            let pool = db::create_pool(&config).await?;
            cli::handle_user_set_role(&pool, &user_id, role).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let stripe = StripeClient::with_policy(
        config.gateway.base_url.clone(),
        config.gateway.secret_key.clone(),
        config.gateway.timeout,
        RetryPolicy {
            max_retries: config.gateway.max_retries,
            base_delay: config.gateway.backoff_base,
        },
        CIRCUIT_FAILURE_THRESHOLD,
        CIRCUIT_RESET_SECS,
    );
    tracing::info!("Payment gateway client initialized with URL: {}", config.gateway.base_url);

    let verifier = IdentityVerifier::from_config(&config.identity)?;
    if config.gateway.webhook_secret.is_none() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET not set; webhook confirmation disabled");
    }

    let health = HealthChecks::new()
        .with("postgres", true, PostgresChecker::new(pool.clone()))
        .with("payment_gateway", false, GatewayChecker::new(stripe.clone()));

    let state = AppState::new(
        Repositories::postgres(pool),
        Arc::new(stripe),
        verifier,
        config.core.clone(),
    )
    .with_webhook_secret(config.gateway.webhook_secret.clone())
    .with_health(health);

    let app = build_router(
        state,
        &config.cors_allowed_origins,
        RequestLogging {
            log_body: config.log_request_body,
        },
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
