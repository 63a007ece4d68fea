//! Purchase registration
//!
//! The single place a confirmed payment or redeemed code becomes a durable
//! ownership record. Idempotent under at-least-once delivery: registering
//! the same (purchaser, item, processor key) twice yields one row.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::CommerceResult;
use crate::store::{CommerceStore, PurchaseStore};
use crate::types::{ItemRef, Purchase};

pub struct PurchaseRegistrar {
    store: Arc<dyn CommerceStore>,
}

impl PurchaseRegistrar {
    pub fn new(store: Arc<dyn CommerceStore>) -> Self {
        Self { store }
    }

    /// Materialise an ownership record. Duplicate confirmations (webhook
    /// redelivery, double redemption attempts by the same user) return the
    /// original row unchanged.
    pub async fn register(
        &self,
        purchaser_id: Uuid,
        item: ItemRef,
        amount: i64,
        currency: &str,
        processor_key: Option<&str>,
    ) -> CommerceResult<Purchase> {
        let purchase = self
            .store
            .insert_purchase_idempotent(purchaser_id, item, amount, currency, processor_key)
            .await?;

        tracing::info!(
            purchase_id = %purchase.id,
            user_id = %purchaser_id,
            item_kind = %item.kind,
            item_id = %item.id,
            amount = amount,
            "Registered purchase"
        );

        Ok(purchase)
    }

    /// Whether the user owns the item, for download/stream access checks.
    pub async fn owns(&self, user_id: Uuid, item: ItemRef) -> CommerceResult<bool> {
        Ok(self.store.user_owns_item(user_id, item).await?)
    }
}
