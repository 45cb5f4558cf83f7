pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod startup;
pub mod utils;
pub mod validation;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::adapters::{
    MemoryStore, PostgresBookingRepository, PostgresTicketRepository, PostgresUserRepository,
};
use crate::config::{AllowedOrigins, CoreSettings};
use crate::health::HealthChecks;
use crate::middleware::{request_logger_middleware, IdentityVerifier, RequestLogging};
use crate::ports::{BookingRepository, PaymentGateway, TicketRepository, UserRepository};
use crate::services::{InventoryService, ReservationService, SettlementService, UserDirectory};

/// The three stores the services run against.
#[derive(Clone)]
pub struct Repositories {
    pub tickets: Arc<dyn TicketRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub users: Arc<dyn UserRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            tickets: Arc::new(PostgresTicketRepository::new(pool.clone())),
            bookings: Arc::new(PostgresBookingRepository::new(pool.clone())),
            users: Arc::new(PostgresUserRepository::new(pool)),
        }
    }

    pub fn memory(store: MemoryStore) -> Self {
        Self {
            tickets: Arc::new(store.clone()),
            bookings: Arc::new(store.clone()),
            users: Arc::new(store),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub inventory: Arc<InventoryService>,
    pub reservations: Arc<ReservationService>,
    pub settlement: Arc<SettlementService>,
    pub users: Arc<UserDirectory>,
    pub verifier: Arc<IdentityVerifier>,
    /// Webhook signing secret. The webhook route answers 404 without it.
    pub webhook_secret: Option<String>,
    pub health: HealthChecks,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        repos: Repositories,
        gateway: Arc<dyn PaymentGateway>,
        verifier: IdentityVerifier,
        settings: CoreSettings,
    ) -> Self {
        Self {
            inventory: Arc::new(InventoryService::new(
                repos.tickets.clone(),
                repos.users.clone(),
                settings.clone(),
            )),
            reservations: Arc::new(ReservationService::new(
                repos.tickets,
                repos.bookings.clone(),
                repos.users.clone(),
                settings.clone(),
            )),
            settlement: Arc::new(SettlementService::new(repos.bookings, gateway, settings)),
            users: Arc::new(UserDirectory::new(repos.users)),
            verifier: Arc::new(verifier),
            webhook_secret: None,
            health: HealthChecks::new(),
            start_time: Instant::now(),
        }
    }

    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret;
        self
    }

    pub fn with_health(mut self, health: HealthChecks) -> Self {
        self.health = health;
        self
    }
}

/// Router with permissive CORS and no body logging.
pub fn create_app(state: AppState) -> Router {
    build_router(state, &AllowedOrigins::Any, RequestLogging::default())
}

pub fn build_router(state: AppState, origins: &AllowedOrigins, logging: RequestLogging) -> Router {
    let tickets = Router::new()
        .route(
            "/",
            get(handlers::tickets::list_tickets).post(handlers::tickets::create_ticket),
        )
        .route("/mine", get(handlers::tickets::list_my_tickets))
        .route("/advertised", get(handlers::tickets::list_advertised))
        .route(
            "/:id",
            get(handlers::tickets::get_ticket)
                .put(handlers::tickets::update_ticket)
                .delete(handlers::tickets::delete_ticket),
        );

    let bookings = Router::new()
        .route(
            "/",
            get(handlers::bookings::list_bookings).post(handlers::bookings::create_booking),
        )
        .route("/mine", get(handlers::bookings::list_my_bookings))
        .route("/requested", get(handlers::bookings::list_requested))
        .route("/revenue", get(handlers::bookings::revenue))
        .route(
            "/:id",
            get(handlers::bookings::get_booking)
                .put(handlers::bookings::decide_booking)
                .delete(handlers::bookings::cancel_booking),
        );

    let payments = Router::new()
        .route(
            "/create-payment-intent",
            post(handlers::payments::create_payment_intent),
        )
        .route("/confirm-payment", post(handlers::payments::confirm_payment))
        .route("/history/:email", get(handlers::payments::payment_history))
        .route("/webhook", post(handlers::payments::webhook));

    let users = Router::new()
        .route(
            "/",
            get(handlers::users::list_users).post(handlers::users::register),
        )
        .route("/me", get(handlers::users::me))
        .route("/:id", put(handlers::users::update_user));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/tickets", tickets)
        .nest("/bookings", bookings)
        .nest("/payments", payments)
        .nest("/users", users)
        .layer(axum_middleware::from_fn_with_state(
            logging,
            request_logger_middleware,
        ))
        .layer(cors_layer(origins))
        .with_state(state)
}

fn cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    let allow_origin = match origins {
        AllowedOrigins::Any => AllowOrigin::any(),
        AllowedOrigins::List(list) => {
            let values: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(values)
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([HeaderName::from_static("x-request-id")])
        .max_age(Duration::from_secs(86400))
}
