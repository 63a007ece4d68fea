//! Application state

use std::sync::Arc;

use sqlx::PgPool;

use coda_commerce::{
    CommerceService, CommerceStore, PaymentProcessor, PgCommerceStore, StripeClient,
    StripeProcessor,
};

use crate::auth::{AuthState, JwtManager};
use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt_manager: JwtManager,
    pub commerce: Arc<CommerceService>,
    /// Direct store handle for the admin read endpoints.
    pub store: Arc<PgCommerceStore>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let jwt_manager = JwtManager::new(
            &config.jwt_secret,
            config.jwt_expiry_hours,
            config.download_token_minutes,
        );

        let stripe = StripeClient::from_env()
            .map_err(|e| anyhow::anyhow!("Stripe configuration error: {e}"))?;
        let webhook_secret = stripe.config().webhook_secret.clone();
        let platform_fee_percent = stripe.config().platform_fee_percent;
        tracing::info!(
            platform_fee_percent = platform_fee_percent,
            "Stripe client initialized"
        );

        let store = Arc::new(PgCommerceStore::new(pool.clone()));
        let processor: Arc<dyn PaymentProcessor> = Arc::new(StripeProcessor::new(stripe));
        let commerce = Arc::new(CommerceService::new(
            Arc::clone(&store) as Arc<dyn CommerceStore>,
            processor,
            platform_fee_percent,
            webhook_secret,
        ));
        tracing::info!("Commerce service initialized");

        Ok(Self {
            pool,
            config,
            jwt_manager,
            commerce,
            store,
        })
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
        }
    }
}
