//! Storage abstraction for the commerce core
//!
//! Each handler used to reach for a process-wide database client; here every
//! service is handed a `dyn CommerceStore` instead, so check-then-act
//! sequences become single conditional updates inside one implementation and
//! tests run against an in-memory double.
//!
//! Contract notes shared by all implementations:
//! - "claim" methods are compare-and-swap updates: they succeed for exactly
//!   one caller under concurrency and report the loser with `false`/`None`.
//! - "insert_*_idempotent" methods never create duplicates for the same
//!   natural key and return the surviving row.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::types::{
    Artist, DownloadCode, Fundraiser, ItemRef, MerchListing, Pledge, Purchase, Release,
    Subscription, SubscriptionTier, Tip, Track, User,
};

pub use memory::MemoryCommerceStore;
pub use postgres::PgCommerceStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Sellable-entity lookups.
#[async_trait]
pub trait CatalogStore {
    async fn find_artist(&self, artist_id: Uuid) -> StoreResult<Option<Artist>>;
    async fn find_release(&self, release_id: Uuid) -> StoreResult<Option<Release>>;
    async fn find_track(&self, track_id: Uuid) -> StoreResult<Option<Track>>;
    async fn find_merch(&self, merch_id: Uuid) -> StoreResult<Option<MerchListing>>;

    /// Minimum price for buying an artist's entire catalogue: the sum of the
    /// minimum prices of their published releases.
    async fn catalogue_min_price(&self, artist_id: Uuid) -> StoreResult<i64>;

    /// Conditionally take `quantity` units of stock. `false` when the item
    /// is unknown or has fewer units remaining.
    async fn decrement_merch_stock(&self, merch_id: Uuid, quantity: i64) -> StoreResult<bool>;

    async fn find_fundraiser(&self, fundraiser_id: Uuid) -> StoreResult<Option<Fundraiser>>;

    /// The live fundraiser (not settled, not past its end date) backed by
    /// the given release, if any.
    async fn live_fundraiser_for_release(
        &self,
        release_id: Uuid,
        now: OffsetDateTime,
    ) -> StoreResult<Option<Fundraiser>>;

    /// Releases backing a fundraiser.
    async fn fundraiser_releases(&self, fundraiser_id: Uuid) -> StoreResult<Vec<Release>>;

    /// Fundraisers whose end date has passed and which are not yet settled.
    async fn due_fundraisers(&self, now: OffsetDateTime) -> StoreResult<Vec<Fundraiser>>;

    /// Stamp `settled_at`; `false` when another settler got there first.
    async fn claim_fundraiser_settlement(
        &self,
        fundraiser_id: Uuid,
        now: OffsetDateTime,
    ) -> StoreResult<bool>;
}

/// The identity-resolver boundary: user lookup and guest find-or-create.
#[async_trait]
pub trait UserStore {
    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>>;
    async fn find_or_create_user_by_email(&self, email: &str) -> StoreResult<User>;
}

#[async_trait]
pub trait PledgeStore {
    /// The pledger's live (non-cancelled) pledge for a fundraiser.
    async fn find_live_pledge(
        &self,
        fundraiser_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Pledge>>;

    /// Insert a pending pledge; duplicate-delivery safe (the existing live
    /// pledge wins and is returned).
    async fn insert_pledge_idempotent(
        &self,
        fundraiser_id: Uuid,
        user_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> StoreResult<Pledge>;

    /// Update the amount of a pledge iff it is still pending.
    async fn amend_pledge_amount(&self, pledge_id: Uuid, amount: i64) -> StoreResult<bool>;

    /// Set `cancelled_at` iff the pledge is still pending.
    async fn cancel_pledge(&self, pledge_id: Uuid, now: OffsetDateTime) -> StoreResult<bool>;

    /// Sum of pending pledge amounts for a fundraiser.
    async fn pending_pledge_total(&self, fundraiser_id: Uuid) -> StoreResult<i64>;

    /// Transition every pending pledge to paid; returns the pledges moved.
    async fn mark_pending_pledges_paid(
        &self,
        fundraiser_id: Uuid,
        now: OffsetDateTime,
    ) -> StoreResult<Vec<Pledge>>;

    /// Cancel every pending pledge; returns how many were cancelled.
    async fn cancel_pending_pledges(
        &self,
        fundraiser_id: Uuid,
        now: OffsetDateTime,
    ) -> StoreResult<u64>;

    async fn list_pledges(&self, skip: i64, take: i64) -> StoreResult<Vec<Pledge>>;
}

#[async_trait]
pub trait PurchaseStore {
    /// Insert an ownership record; the unique key is
    /// (user, item kind, item id, processor key). On conflict the existing
    /// row is returned unchanged.
    async fn insert_purchase_idempotent(
        &self,
        user_id: Uuid,
        item: ItemRef,
        amount: i64,
        currency: &str,
        processor_key: Option<&str>,
    ) -> StoreResult<Purchase>;

    async fn user_owns_item(&self, user_id: Uuid, item: ItemRef) -> StoreResult<bool>;

    async fn list_purchases(&self, skip: i64, take: i64) -> StoreResult<Vec<Purchase>>;
}

#[async_trait]
pub trait SubscriptionStore {
    async fn find_subscription(&self, subscription_id: Uuid) -> StoreResult<Option<Subscription>>;

    async fn find_tier(&self, tier_id: Uuid) -> StoreResult<Option<SubscriptionTier>>;

    /// The artist's zero-amount follow tier, created on first use.
    async fn find_or_create_follow_tier(&self, artist_id: Uuid) -> StoreResult<SubscriptionTier>;

    /// Idempotent subscribe: at most one live subscription per (user, tier).
    async fn insert_subscription_idempotent(
        &self,
        user_id: Uuid,
        tier_id: Uuid,
        amount: i64,
        currency: &str,
        processor_key: Option<&str>,
    ) -> StoreResult<Subscription>;

    /// Soft delete iff still live; `false` when already deleted.
    async fn soft_delete_subscription(
        &self,
        subscription_id: Uuid,
        now: OffsetDateTime,
    ) -> StoreResult<bool>;

    /// Soft delete the live subscription carrying an upstream key, if any.
    async fn soft_delete_by_processor_key(
        &self,
        processor_key: &str,
        now: OffsetDateTime,
    ) -> StoreResult<bool>;

    async fn list_subscriptions(&self, skip: i64, take: i64) -> StoreResult<Vec<Subscription>>;
}

#[async_trait]
pub trait CodeStore {
    /// An unredeemed code row matching (release, code).
    async fn find_unredeemed_code(
        &self,
        release_id: Uuid,
        code: &str,
    ) -> StoreResult<Option<DownloadCode>>;

    /// Atomically consume the code for a user. Exactly one concurrent caller
    /// wins; everyone else sees `false`.
    async fn claim_code(&self, code_id: Uuid, user_id: Uuid) -> StoreResult<bool>;

    /// Release a claim made by `claim_code` (compensation when downstream
    /// registration fails).
    async fn unclaim_code(&self, code_id: Uuid) -> StoreResult<()>;
}

#[async_trait]
pub trait TipStore {
    /// Record a tip; duplicate delivery for the same processor key is a
    /// no-op.
    async fn insert_tip_idempotent(
        &self,
        user_id: Option<Uuid>,
        artist_id: Uuid,
        amount: i64,
        currency: &str,
        message: Option<&str>,
        processor_key: &str,
    ) -> StoreResult<Tip>;

    async fn list_tips(&self, skip: i64, take: i64) -> StoreResult<Vec<Tip>>;
}

/// Processed-event ledger for webhook deliveries.
#[async_trait]
pub trait EventLedgerStore {
    /// Atomically claim an event key for processing. `false` means another
    /// delivery already claimed (or finished) it.
    async fn claim_event(&self, event_key: &str, event_type: &str) -> StoreResult<bool>;

    /// Mark a claimed event completed or failed. Failed events release the
    /// claim so a redelivery can retry.
    async fn finish_event(
        &self,
        event_key: &str,
        succeeded: bool,
        error_message: Option<&str>,
    ) -> StoreResult<()>;
}

/// The full storage surface the commerce services are built against.
pub trait CommerceStore:
    CatalogStore
    + UserStore
    + PledgeStore
    + PurchaseStore
    + SubscriptionStore
    + CodeStore
    + TipStore
    + EventLedgerStore
    + Send
    + Sync
{
}

impl<T> CommerceStore for T where
    T: CatalogStore
        + UserStore
        + PledgeStore
        + PurchaseStore
        + SubscriptionStore
        + CodeStore
        + TipStore
        + EventLedgerStore
        + Send
        + Sync
{
}
