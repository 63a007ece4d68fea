//! Payment-processor boundary
//!
//! The commerce core only depends on this narrow contract: create a hosted
//! checkout session, cancel a recurring charge. `StripeProcessor` is the
//! production implementation; tests substitute their own.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::client::StripeClient;

#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The referenced processor object does not exist (already cancelled,
    /// wrong account, expired). Callers decide whether this is tolerable.
    #[error("processor object not found: {0}")]
    NotFound(String),

    #[error("processor request failed: {0}")]
    Api(String),
}

pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Everything needed to build one hosted checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutSessionSpec {
    /// Total charge in minor units, per-unit prices already summed.
    pub amount: i64,
    pub currency: String,
    /// Connected account receiving the charge; `None` only for zero-amount
    /// guest sessions that never reach the processor's payment rail.
    pub payee_account: Option<String>,
    /// Platform cut retained from the charge, minor units.
    pub application_fee: i64,
    /// Receipt recipient.
    pub customer_email: String,
    /// Line-item title shown on the hosted page.
    pub product_name: String,
    pub product_description: Option<String>,
    /// Consumed later by the webhook handler; see the metadata key constants
    /// in `checkout`.
    pub metadata: HashMap<String, String>,
}

/// The processor's answer: where to send the purchaser.
#[derive(Debug, Clone)]
pub struct CheckoutSessionRef {
    pub id: String,
    pub redirect_url: String,
}

/// Result of an upstream recurring-charge cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Upstream had already cancelled it; local state proceeds regardless.
    AlreadyGone,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_checkout_session(
        &self,
        spec: CheckoutSessionSpec,
    ) -> ProcessorResult<CheckoutSessionRef>;

    /// Cancel a recurring charge, scoped to the payee's connected account
    /// when one is given.
    async fn cancel_subscription(
        &self,
        payee_account: Option<&str>,
        processor_key: &str,
    ) -> ProcessorResult<CancelOutcome>;
}

/// Stripe-backed processor.
pub struct StripeProcessor {
    stripe: StripeClient,
}

impl StripeProcessor {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    fn parse_currency(code: &str) -> stripe::Currency {
        code.parse::<stripe::Currency>().unwrap_or_else(|_| {
            tracing::warn!(currency = %code, "Unknown currency code, defaulting to usd");
            stripe::Currency::USD
        })
    }
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    async fn create_checkout_session(
        &self,
        spec: CheckoutSessionSpec,
    ) -> ProcessorResult<CheckoutSessionRef> {
        let base_url = &self.stripe.config().app_base_url;
        let success_url = format!(
            "{}/checkout?result=success&session_id={{CHECKOUT_SESSION_ID}}",
            base_url
        );
        let cancel_url = format!("{}/checkout?result=cancelled", base_url);

        let line_items = vec![stripe::CreateCheckoutSessionLineItems {
            price_data: Some(stripe::CreateCheckoutSessionLineItemsPriceData {
                currency: Self::parse_currency(&spec.currency),
                unit_amount: Some(spec.amount),
                product_data: Some(
                    stripe::CreateCheckoutSessionLineItemsPriceDataProductData {
                        name: spec.product_name.clone(),
                        description: spec.product_description.clone(),
                        ..Default::default()
                    },
                ),
                ..Default::default()
            }),
            quantity: Some(1),
            ..Default::default()
        }];

        let payment_intent_data = stripe::CreateCheckoutSessionPaymentIntentData {
            application_fee_amount: (spec.application_fee > 0)
                .then_some(spec.application_fee),
            receipt_email: Some(spec.customer_email.clone()),
            ..Default::default()
        };

        let params = stripe::CreateCheckoutSession {
            mode: Some(stripe::CheckoutSessionMode::Payment),
            line_items: Some(line_items),
            success_url: Some(&success_url),
            cancel_url: Some(&cancel_url),
            customer_email: Some(&spec.customer_email),
            metadata: Some(spec.metadata.clone()),
            payment_intent_data: Some(payment_intent_data),
            ..Default::default()
        };

        // Direct charge on the payee's connected account; the application
        // fee flows back to the platform.
        let client = match &spec.payee_account {
            Some(account) => self
                .stripe
                .for_account(account)
                .map_err(|e| ProcessorError::Api(e.to_string()))?,
            None => self.stripe.inner().clone(),
        };

        let session = stripe::CheckoutSession::create(&client, params)
            .await
            .map_err(|e| ProcessorError::Api(e.to_string()))?;

        let redirect_url = session
            .url
            .ok_or_else(|| ProcessorError::Api("checkout session has no URL".into()))?;

        tracing::info!(
            session_id = %session.id,
            amount = spec.amount,
            currency = %spec.currency,
            application_fee = spec.application_fee,
            "Created checkout session"
        );

        Ok(CheckoutSessionRef {
            id: session.id.to_string(),
            redirect_url,
        })
    }

    async fn cancel_subscription(
        &self,
        payee_account: Option<&str>,
        processor_key: &str,
    ) -> ProcessorResult<CancelOutcome> {
        let subscription_id = processor_key
            .parse::<stripe::SubscriptionId>()
            .map_err(|e| ProcessorError::Api(format!("invalid subscription id: {e}")))?;

        let client = match payee_account {
            Some(account) => self
                .stripe
                .for_account(account)
                .map_err(|e| ProcessorError::Api(e.to_string()))?,
            None => self.stripe.inner().clone(),
        };

        let params = stripe::CancelSubscription {
            cancellation_details: None,
            invoice_now: None,
            prorate: None,
        };

        match stripe::Subscription::cancel(&client, &subscription_id, params).await {
            Ok(_) => Ok(CancelOutcome::Cancelled),
            Err(e) => {
                let message = e.to_string();
                if message.contains("resource_missing")
                    || message.contains("No such subscription")
                {
                    Ok(CancelOutcome::AlreadyGone)
                } else {
                    Err(ProcessorError::Api(message))
                }
            }
        }
    }
}
