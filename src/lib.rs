use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod auth;
pub mod config;
pub mod database;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use config::Config;
use database::{AccountStore, Database, MemoryStore};
use handlers::AppState;
use services::{
    payment::{HttpPaymentGateway, PaymentGateway, SimulatedPaymentGateway},
    upscaler::{ReplicateUpscaler, SimulatedUpscaler, Upscaler},
};

/// Multipart framing on top of the largest accepted file.
const UPLOAD_OVERHEAD: usize = 64 * 1024;

pub fn create_app(state: AppState) -> Router {
    let upload_limit = state.config.max_file_size + UPLOAD_OVERHEAD;

    let jobs = Router::new()
        .route(
            "/api/jobs",
            post(handlers::jobs::select_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/jobs/:id/start", post(handlers::jobs::start_processing))
        .route("/api/jobs/:id/progress", get(handlers::jobs::progress))
        .route("/api/jobs/:id/cancel", post(handlers::jobs::cancel))
        .route("/api/jobs/:id/result", get(handlers::jobs::result));

    let account = Router::new()
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/session", get(handlers::auth::current_session))
        .route(
            "/api/auth/profile",
            get(handlers::auth::get_profile).put(handlers::auth::update_profile),
        )
        .route("/api/plans", get(handlers::plans::list_plans))
        .route("/api/subscription", get(handlers::plans::get_subscription))
        .route("/api/subscription/purchase", post(handlers::plans::purchase))
        .route("/api/subscription/cancel", post(handlers::plans::cancel_subscription))
        .route("/api/usage", get(handlers::plans::usage));

    Router::new()
        .route("/health", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        .route("/metrics", get(handlers::metrics::metrics_handler))
        .merge(account)
        .merge(jobs)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Wires collaborators from configuration. Unset service URLs fall back to
/// in-process stand-ins.
pub async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let store: Arc<dyn AccountStore> = match &config.database_url {
        Some(url) => {
            let database = Database::new(url).await?;
            database.migrate().await?;
            tracing::info!("Using Postgres account store");
            Arc::new(database)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, accounts are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let upscaler: Arc<dyn Upscaler> = match &config.upscaler_url {
        Some(url) => Arc::new(ReplicateUpscaler::new(
            url,
            config.upscaler_api_token.clone(),
            &config.upscaler_model_version,
        )?),
        None => {
            tracing::warn!("UPSCALER_URL not set, using the simulated upscaler");
            Arc::new(SimulatedUpscaler::default())
        }
    };

    let gateway: Arc<dyn PaymentGateway> = match &config.payment_url {
        Some(url) => Arc::new(HttpPaymentGateway::new(url, config.payment_api_key.clone())?),
        None => {
            tracing::warn!("PAYMENT_URL not set, using the simulated payment gateway");
            Arc::new(SimulatedPaymentGateway::new())
        }
    };

    AppState::new(config, store, upscaler, gateway)
}
