//! Subscription lifecycle
//!
//! Cancellation reconciles local state with the upstream recurring-billing
//! system; creation in this core is the idempotent zero-amount "follow"
//! subscription issued alongside checkouts and explicit follow actions.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{CommerceError, CommerceResult};
use crate::processor::{CancelOutcome, PaymentProcessor, ProcessorError};
use crate::store::{CatalogStore, CommerceStore, SubscriptionStore, UserStore};
use crate::types::Subscription;

/// Idempotently ensure a zero-amount follow subscription between a user and
/// an artist. Shared by checkout's best-effort side effect and explicit
/// follow actions.
pub async fn ensure_follow(
    store: &dyn CommerceStore,
    user_id: Uuid,
    artist_id: Uuid,
) -> CommerceResult<Subscription> {
    let tier = store.find_or_create_follow_tier(artist_id).await?;
    let subscription = store
        .insert_subscription_idempotent(user_id, tier.id, 0, &tier.currency, None)
        .await?;
    Ok(subscription)
}

pub struct SubscriptionService {
    store: Arc<dyn CommerceStore>,
    processor: Arc<dyn PaymentProcessor>,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn CommerceStore>, processor: Arc<dyn PaymentProcessor>) -> Self {
        Self { store, processor }
    }

    pub async fn follow_artist(
        &self,
        user_id: Uuid,
        artist_id: Uuid,
    ) -> CommerceResult<Subscription> {
        if self.store.find_artist(artist_id).await?.is_none() {
            return Err(CommerceError::ItemNotFound("artist"));
        }
        ensure_follow(self.store.as_ref(), user_id, artist_id).await
    }

    /// Cancel a subscription on behalf of its owner (or an admin).
    ///
    /// The upstream recurring charge is cancelled first, scoped to the
    /// tier-owning artist's connected account. An upstream "no such
    /// subscription" is tolerated; any other upstream failure is logged as a
    /// warning. Local deletion proceeds regardless — remote failure never
    /// strands a subscriber on a subscription they asked to leave.
    pub async fn cancel(
        &self,
        subscription_id: Uuid,
        caller_user_id: Uuid,
        caller_is_admin: bool,
    ) -> CommerceResult<()> {
        let subscription = self
            .store
            .find_subscription(subscription_id)
            .await?
            .ok_or(CommerceError::ItemNotFound("subscription"))?;

        if subscription.user_id != caller_user_id && !caller_is_admin {
            return Err(CommerceError::Unauthorized);
        }

        if subscription.deleted_at.is_some() {
            // Already cancelled; idempotent success.
            return Ok(());
        }

        if let Some(processor_key) = &subscription.processor_key {
            let payee_account = self.payee_account_for_tier(subscription.tier_id).await?;
            match self
                .processor
                .cancel_subscription(payee_account.as_deref(), processor_key)
                .await
            {
                Ok(CancelOutcome::Cancelled) => {
                    tracing::info!(
                        subscription_id = %subscription_id,
                        processor_key = %processor_key,
                        "Cancelled upstream subscription"
                    );
                }
                Ok(CancelOutcome::AlreadyGone) | Err(ProcessorError::NotFound(_)) => {
                    tracing::info!(
                        subscription_id = %subscription_id,
                        processor_key = %processor_key,
                        "Upstream subscription already cancelled"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        subscription_id = %subscription_id,
                        processor_key = %processor_key,
                        error = %e,
                        "Upstream subscription cancel failed; deleting locally anyway"
                    );
                }
            }
        }

        let deleted = self
            .store
            .soft_delete_subscription(subscription_id, OffsetDateTime::now_utc())
            .await
            .map_err(|e| CommerceError::SubscriptionCancelFailed(e.to_string()))?;

        if !deleted {
            // A concurrent cancel won; both callers get success.
            tracing::info!(
                subscription_id = %subscription_id,
                "Subscription already deleted locally"
            );
        }

        Ok(())
    }

    /// Upstream told us a recurring charge is gone
    /// (`customer.subscription.deleted`); mirror it locally. Unknown keys
    /// are a logged no-op.
    pub async fn reconcile_upstream_cancelled(&self, processor_key: &str) -> CommerceResult<()> {
        let deleted = self
            .store
            .soft_delete_by_processor_key(processor_key, OffsetDateTime::now_utc())
            .await?;

        if deleted {
            tracing::info!(
                processor_key = %processor_key,
                "Soft-deleted subscription after upstream cancellation"
            );
        } else {
            tracing::info!(
                processor_key = %processor_key,
                "Upstream cancellation for unknown or already-deleted subscription"
            );
        }

        Ok(())
    }

    /// The connected account the subscription's charges run on.
    async fn payee_account_for_tier(&self, tier_id: Uuid) -> CommerceResult<Option<String>> {
        let Some(tier) = self.store.find_tier(tier_id).await? else {
            return Ok(None);
        };
        let Some(artist) = self.store.find_artist(tier.artist_id).await? else {
            return Ok(None);
        };
        let payee = self.store.find_user(artist.payee_user_id()).await?;
        Ok(payee.and_then(|u| u.payment_account))
    }
}
