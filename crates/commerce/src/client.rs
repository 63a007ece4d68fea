//! Stripe client wrapper

use std::sync::Arc;

use crate::error::{CommerceError, CommerceResult};

/// Stripe configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    /// Base URL the hosted checkout redirects back to.
    pub app_base_url: String,
    /// Platform cut, in whole percent of the charged amount.
    pub platform_fee_percent: i64,
}

impl StripeConfig {
    pub fn from_env() -> CommerceResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| CommerceError::InvalidInput("STRIPE_SECRET_KEY not set".into()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default();
        let app_base_url = std::env::var("APP_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        let platform_fee_percent = std::env::var("PLATFORM_FEE_PERCENT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(7);

        Ok(Self {
            secret_key,
            webhook_secret,
            app_base_url,
            platform_fee_percent,
        })
    }
}

/// Shared Stripe client carrying its config alongside the SDK handle.
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: Arc<StripeConfig>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> CommerceResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    /// The platform-account client.
    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }

    /// A client scoped to a connected account (Stripe-Account header), for
    /// direct charges and connected-account subscription operations.
    pub fn for_account(&self, account_id: &str) -> CommerceResult<stripe::Client> {
        let parsed = account_id.parse::<stripe::AccountId>().map_err(|e| {
            CommerceError::InvalidInput(format!("invalid payee account id: {e}"))
        })?;
        Ok(self.client.clone().with_stripe_account(parsed))
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
