use std::sync::Arc;
use std::time::Duration;

use crate::{
    auth::{AccountAuth, AuthService},
    config::Config,
    database::AccountStore,
    services::{
        metrics::MetricsService,
        orchestrator::{JobServices, ProcessingSettings},
        payment::PaymentGateway,
        plan_catalog::{PlanCatalog, UpgradeFlow},
        sessions::SessionRegistry,
        upscaler::Upscaler,
    },
};

pub mod auth;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod plans;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn AccountStore>,
    pub auth: Arc<dyn AuthService>,
    pub sessions: Arc<SessionRegistry>,
    pub upgrades: Arc<UpgradeFlow>,
    pub metrics: Arc<MetricsService>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn AccountStore>,
        upscaler: Arc<dyn Upscaler>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> anyhow::Result<Self> {
        let metrics = Arc::new(MetricsService::new()?);
        let auth: Arc<dyn AuthService> = Arc::new(AccountAuth::new(store.clone(), &config.jwt_secret));

        let sessions = Arc::new(SessionRegistry::new(
            JobServices {
                store: store.clone(),
                upscaler,
                metrics: metrics.clone(),
                settings: ProcessingSettings::from_config(&config),
            },
            Duration::from_secs(config.session_idle_timeout_secs),
        ));
        let upgrades = Arc::new(UpgradeFlow::new(Arc::new(PlanCatalog::standard()), gateway));

        Ok(Self {
            config,
            store,
            auth,
            sessions,
            upgrades,
            metrics,
        })
    }
}
