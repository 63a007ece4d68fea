// Commerce crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Store trait methods mirror wide table rows
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Coda Commerce Module
//!
//! The commerce and pledge settlement core: everything that computes a
//! chargeable price, builds payment-processor checkout sessions with fee
//! splits, tracks pledge and subscription lifecycles, and turns confirmed
//! payments or redeemed download codes into durable ownership records.
//!
//! ## Features
//!
//! - **Price Resolution**: pay-what-you-want amounts validated against minimums
//! - **Checkout Sessions**: release, track, catalogue, tip, and merch purchases
//! - **Pledges**: amend/cancel plus all-or-nothing fundraiser settlement
//! - **Subscriptions**: cancellation with upstream-cancellation tolerance
//! - **Purchases**: idempotent registration under at-least-once delivery
//! - **Download Codes**: single-use, race-safe redemption
//! - **Webhooks**: processor event intake with an atomic delivery ledger

pub mod checkout;
pub mod client;
pub mod codes;
pub mod error;
pub mod pledges;
pub mod price;
pub mod processor;
pub mod purchases;
pub mod store;
pub mod subscriptions;
pub mod types;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Checkout
pub use checkout::{CheckoutService, MerchPurchaseArgs};

// Client
pub use client::{StripeClient, StripeConfig};

// Codes
pub use codes::DownloadCodeService;

// Error
pub use error::{CommerceError, CommerceResult};

// Pledges
pub use pledges::{PledgeService, SettlementResult};

// Price
pub use price::{resolve_price, ResolvedPrice};

// Processor
pub use processor::{
    CancelOutcome, CheckoutSessionRef, CheckoutSessionSpec, PaymentProcessor, ProcessorError,
    StripeProcessor,
};

// Purchases
pub use purchases::PurchaseRegistrar;

// Store
pub use store::{CommerceStore, MemoryCommerceStore, PgCommerceStore, StoreError};

// Subscriptions
pub use subscriptions::{ensure_follow, SubscriptionService};

// Types
pub use types::{
    Artist, DownloadCode, Fundraiser, ItemKind, ItemRef, MerchItem, MerchListing, MerchOption,
    Pledge, Purchase, Release, ShippingDestination, Subscription, SubscriptionTier, Tip, Track,
    User,
};

// Webhooks
pub use webhooks::WebhookHandler;

use std::sync::Arc;

use sqlx::PgPool;

/// Main commerce service that combines all commerce functionality
pub struct CommerceService {
    pub checkout: CheckoutService,
    pub pledges: PledgeService,
    pub purchases: PurchaseRegistrar,
    pub subscriptions: SubscriptionService,
    pub codes: DownloadCodeService,
    pub webhooks: WebhookHandler,
}

impl CommerceService {
    /// Create a commerce service backed by Postgres and Stripe, configured
    /// from environment variables.
    pub fn from_env(pool: PgPool) -> CommerceResult<Self> {
        let stripe = StripeClient::from_env()?;
        let store: Arc<dyn CommerceStore> = Arc::new(PgCommerceStore::new(pool));
        let webhook_secret = stripe.config().webhook_secret.clone();
        let platform_fee_percent = stripe.config().platform_fee_percent;
        let processor: Arc<dyn PaymentProcessor> = Arc::new(StripeProcessor::new(stripe));

        Ok(Self::new(
            store,
            processor,
            platform_fee_percent,
            webhook_secret,
        ))
    }

    /// Create a commerce service with explicit collaborators; tests pass an
    /// in-memory store and a stub processor.
    pub fn new(
        store: Arc<dyn CommerceStore>,
        processor: Arc<dyn PaymentProcessor>,
        platform_fee_percent: i64,
        webhook_secret: String,
    ) -> Self {
        Self {
            checkout: CheckoutService::new(
                Arc::clone(&store),
                Arc::clone(&processor),
                platform_fee_percent,
            ),
            pledges: PledgeService::new(Arc::clone(&store)),
            purchases: PurchaseRegistrar::new(Arc::clone(&store)),
            subscriptions: SubscriptionService::new(Arc::clone(&store), Arc::clone(&processor)),
            codes: DownloadCodeService::new(Arc::clone(&store)),
            webhooks: WebhookHandler::new(store, processor, webhook_secret),
        }
    }
}
