//! Enrollment Service - payment verification and enrollment commitment.
//!
//! Verifies client-supplied payment references with the payment provider and
//! grants course access exactly once per confirmed transaction.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::middleware::rate_limit::{FixedWindowLimiter, RateLimitConfig};
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use config::Config;
use services::{Database, PaystackClient};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub paystack: PaystackClient,
    pub limiter: Arc<FixedWindowLimiter>,
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;
        db.run_migrations().await?;

        let paystack = PaystackClient::new(config.paystack.clone())?;
        if paystack.is_configured() {
            tracing::info!("Paystack client initialized");
        } else {
            tracing::warn!("Paystack credentials not configured - verification will be limited");
        }

        let limiter = Arc::new(FixedWindowLimiter::new(RateLimitConfig {
            max_attempts: config.verification.rate_limit_attempts,
            window: Duration::from_secs(config.verification.rate_limit_window_seconds),
            block_duration: Duration::from_secs(config.verification.rate_limit_block_seconds),
        }));

        services::init_metrics();

        let state = AppState {
            config: config.clone(),
            db,
            paystack,
            limiter,
        };

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics))
            .route(
                "/enrollments/verify",
                post(handlers::enrollments::verify_payment),
            )
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                        version = ?request.version(),
                        user_id = tracing::field::Empty,
                    )
                }),
            )
            .with_state(state);

        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        tracing::info!("Enrollment service listening on {}:{}", config.server.host, port);

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}
