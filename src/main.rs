//! DeskHive Cancellation Service - Main Application Entry Point
//!
//! This is the REST API server for the cancellation and refund workflow of
//! the DeskHive coworking booking marketplace. It evaluates listing
//! cancellation policies, tracks request approval, executes refunds against
//! the PayFlux payment gateway, and exposes the administrative views over
//! the workflow.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Authentication**: API key with SHA-256 hashing
//! - **Payment Gateway**: PayFlux over reqwest
//! - **Format**: JSON requests/responses
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Build the gateway client
//! 5. Build HTTP router with routes and middleware
//! 6. Start server on configured port

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use deskhive::{AppState, config, db, gateway::GatewayClient, handlers, middleware};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    // Build the payment gateway client
    let gateway = GatewayClient::new(
        &config.gateway_base_url,
        config.gateway_api_key.clone(),
        Duration::from_secs(config.gateway_timeout_secs),
    )?;
    tracing::info!("Gateway client ready");

    let state = AppState {
        pool: pool.clone(),
        gateway,
    };

    // Create authenticated routes (API endpoints)
    let authenticated_routes = Router::new()
        // Cancellation workflow routes
        .route(
            "/api/v1/bookings/{booking_id}/cancellation",
            post(handlers::cancellations::create_cancellation),
        )
        .route(
            "/api/v1/cancellations",
            get(handlers::cancellations::list_cancellations),
        )
        .route(
            "/api/v1/cancellations/{id}",
            get(handlers::cancellations::get_cancellation),
        )
        .route(
            "/api/v1/cancellations/{id}/approve",
            post(handlers::cancellations::approve_cancellation),
        )
        .route(
            "/api/v1/cancellations/{id}/reject",
            post(handlers::cancellations::reject_cancellation),
        )
        .route(
            "/api/v1/cancellations/{id}/process",
            post(handlers::cancellations::process_cancellation),
        )
        .route(
            "/api/v1/cancellations/{id}/retry",
            post(handlers::cancellations::retry_cancellation),
        )
        .route(
            "/api/v1/cancellations/{id}/complete-manual",
            post(handlers::cancellations::complete_cancellation_manually),
        )
        // Refund transaction routes
        .route(
            "/api/v1/refund-transactions/{id}/status",
            get(handlers::cancellations::refund_transaction_status),
        )
        .route(
            "/api/v1/refund-transactions/{id}/reconcile",
            post(handlers::cancellations::reconcile_refund_transaction),
        )
        // Admin routes
        .route(
            "/api/v1/admin/cancellations",
            get(handlers::admin::list_cancellations),
        )
        .route(
            "/api/v1/admin/cancellations/stats",
            get(handlers::admin::cancellation_stats),
        )
        .route(
            "/api/v1/admin/cancellations/{id}",
            get(handlers::admin::get_cancellation),
        )
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            pool.clone(),
            middleware::auth::auth_middleware,
        ));

    // Combine authenticated routes with public routes
    let app = Router::new()
        // Public routes (no authentication required)
        .route("/health", get(handlers::health::health_check))
        // Merge authenticated routes
        .merge(authenticated_routes)
        // Add distributed tracing middleware for observability
        .layer(TraceLayer::new_for_http())
        // Share application state with all handlers via State extraction
        .with_state(state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Start serving HTTP requests
    // This blocks forever, handling requests concurrently with tokio
    axum::serve(listener, app).await?;

    Ok(())
}
