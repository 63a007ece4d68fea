//! Processor webhook handling
//!
//! The external-confirmation path: a verified `checkout.session.completed`
//! event is what turns a checkout into a Purchase, a pledge, or a tip. Every
//! event is claimed atomically in the processor-event ledger first, so
//! at-least-once delivery collapses to exactly-once processing.

use std::collections::HashMap;
use std::sync::Arc;

use stripe::{Event, EventObject, EventType};
use uuid::Uuid;

use crate::checkout::meta;
use crate::error::{CommerceError, CommerceResult};
use crate::pledges::PledgeService;
use crate::processor::PaymentProcessor;
use crate::purchases::PurchaseRegistrar;
use crate::store::{CatalogStore, CommerceStore, EventLedgerStore, TipStore, UserStore};
use crate::subscriptions::SubscriptionService;
use crate::types::{ItemKind, ItemRef};

pub struct WebhookHandler {
    store: Arc<dyn CommerceStore>,
    registrar: PurchaseRegistrar,
    pledges: PledgeService,
    subscriptions: SubscriptionService,
    webhook_secret: String,
}

impl WebhookHandler {
    pub fn new(
        store: Arc<dyn CommerceStore>,
        processor: Arc<dyn PaymentProcessor>,
        webhook_secret: String,
    ) -> Self {
        Self {
            registrar: PurchaseRegistrar::new(Arc::clone(&store)),
            pledges: PledgeService::new(Arc::clone(&store)),
            subscriptions: SubscriptionService::new(Arc::clone(&store), processor),
            store,
            webhook_secret,
        }
    }

    /// Verify and parse a webhook delivery.
    pub fn verify_event(&self, payload: &str, signature: &str) -> CommerceResult<Event> {
        stripe::Webhook::construct_event(payload, signature, &self.webhook_secret).map_err(|e| {
            tracing::warn!(error = %e, "Webhook signature verification failed");
            CommerceError::Unauthorized
        })
    }

    /// Handle a verified event.
    ///
    /// The ledger claim makes duplicate deliveries a logged no-op. Handler
    /// failures release the claim (status `failed`) so the processor's
    /// redelivery can retry; this core never retries on its own.
    pub async fn handle_event(&self, event: Event) -> CommerceResult<()> {
        let event_key = event.id.to_string();
        let event_type = event.type_.to_string();

        if !self.store.claim_event(&event_key, &event_type).await? {
            tracing::info!(
                event_key = %event_key,
                event_type = %event_type,
                "Duplicate webhook delivery, already claimed"
            );
            return Ok(());
        }

        let outcome = self.dispatch(event).await;

        match &outcome {
            Ok(()) => {
                self.store.finish_event(&event_key, true, None).await?;
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(
                    event_key = %event_key,
                    event_type = %event_type,
                    error = %message,
                    "Webhook event processing failed"
                );
                self.store
                    .finish_event(&event_key, false, Some(&message))
                    .await?;
            }
        }

        outcome
    }

    async fn dispatch(&self, event: Event) -> CommerceResult<()> {
        match event.type_ {
            EventType::CheckoutSessionCompleted => {
                if let EventObject::CheckoutSession(session) = event.data.object {
                    let processor_key = session
                        .payment_intent
                        .as_ref()
                        .map(|pi| pi.id().to_string())
                        .unwrap_or_else(|| session.id.to_string());
                    let amount = session.amount_total.unwrap_or(0);
                    let currency = session
                        .currency
                        .map(|c| c.to_string().to_lowercase())
                        .unwrap_or_else(|| "usd".to_string());
                    let metadata = session.metadata.clone().unwrap_or_default();

                    self.handle_checkout_completed(&processor_key, amount, &currency, &metadata)
                        .await
                } else {
                    Ok(())
                }
            }
            EventType::CustomerSubscriptionDeleted => {
                if let EventObject::Subscription(subscription) = event.data.object {
                    self.subscriptions
                        .reconcile_upstream_cancelled(subscription.id.as_str())
                        .await
                } else {
                    Ok(())
                }
            }
            other => {
                tracing::debug!(event_type = %other, "Ignoring unhandled webhook event");
                Ok(())
            }
        }
    }

    /// Materialise a confirmed checkout according to its session metadata.
    pub async fn handle_checkout_completed(
        &self,
        processor_key: &str,
        amount: i64,
        currency: &str,
        metadata: &HashMap<String, String>,
    ) -> CommerceResult<()> {
        let kind = metadata
            .get(meta::KIND)
            .map(String::as_str)
            .ok_or_else(|| {
                CommerceError::InvalidInput("checkout session missing kind metadata".into())
            })?;

        let purchaser_id = self.resolve_purchaser(metadata).await?;

        match kind {
            "release" => {
                let item_id = required_uuid(metadata, meta::ITEM_ID)?;
                if let Some(fundraiser_id) = metadata.get(meta::FUNDRAISER_ID) {
                    let fundraiser_id = parse_uuid(fundraiser_id, meta::FUNDRAISER_ID)?;
                    self.pledges
                        .create_from_checkout(fundraiser_id, purchaser_id, amount, currency)
                        .await?;
                } else {
                    self.registrar
                        .register(
                            purchaser_id,
                            ItemRef::release(item_id),
                            amount,
                            currency,
                            Some(processor_key),
                        )
                        .await?;
                }
            }
            "track" => {
                let item_id = required_uuid(metadata, meta::ITEM_ID)?;
                self.registrar
                    .register(
                        purchaser_id,
                        ItemRef::track(item_id),
                        amount,
                        currency,
                        Some(processor_key),
                    )
                    .await?;
            }
            "catalogue" => {
                let artist_id = required_uuid(metadata, meta::ARTIST_ID)?;
                self.registrar
                    .register(
                        purchaser_id,
                        ItemRef::catalogue(artist_id),
                        amount,
                        currency,
                        Some(processor_key),
                    )
                    .await?;
            }
            "merch" => {
                let item_id = required_uuid(metadata, meta::ITEM_ID)?;
                self.registrar
                    .register(
                        purchaser_id,
                        ItemRef {
                            kind: ItemKind::Merch,
                            id: item_id,
                        },
                        amount,
                        currency,
                        Some(processor_key),
                    )
                    .await?;

                let quantity = metadata
                    .get(meta::QUANTITY)
                    .and_then(|q| q.parse::<i64>().ok())
                    .unwrap_or(1);
                if !self.store.decrement_merch_stock(item_id, quantity).await? {
                    tracing::warn!(
                        merch_id = %item_id,
                        quantity = quantity,
                        "Merch sold past remaining stock, manual fulfillment review needed"
                    );
                }
            }
            "tip" => {
                let artist_id = required_uuid(metadata, meta::ARTIST_ID)?;
                self.store
                    .insert_tip_idempotent(
                        Some(purchaser_id),
                        artist_id,
                        amount,
                        currency,
                        metadata.get(meta::MESSAGE).map(String::as_str),
                        processor_key,
                    )
                    .await?;
            }
            other => {
                return Err(CommerceError::InvalidInput(format!(
                    "unknown checkout kind '{other}'"
                )));
            }
        }

        Ok(())
    }

    /// The purchaser: the authenticated user recorded at checkout time, else
    /// the guest found-or-created from the receipt email.
    async fn resolve_purchaser(
        &self,
        metadata: &HashMap<String, String>,
    ) -> CommerceResult<Uuid> {
        if let Some(user_id) = metadata.get(meta::USER_ID) {
            return parse_uuid(user_id, meta::USER_ID);
        }
        if let Some(email) = metadata.get(meta::EMAIL) {
            return Ok(self.store.find_or_create_user_by_email(email).await?.id);
        }
        Err(CommerceError::InvalidInput(
            "checkout session carries no purchaser identity".into(),
        ))
    }
}

fn parse_uuid(value: &str, key: &str) -> CommerceResult<Uuid> {
    value
        .parse()
        .map_err(|_| CommerceError::InvalidInput(format!("metadata {key} is not a UUID")))
}

fn required_uuid(metadata: &HashMap<String, String>, key: &str) -> CommerceResult<Uuid> {
    let value = metadata
        .get(key)
        .ok_or_else(|| CommerceError::InvalidInput(format!("metadata {key} missing")))?;
    parse_uuid(value, key)
}
