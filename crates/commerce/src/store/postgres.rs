//! Postgres-backed store
//!
//! Raw sqlx queries; every idempotency contract is an `ON CONFLICT` clause
//! and every claim is a conditional `UPDATE`, so no operation here needs an
//! explicit transaction to be safe under concurrent delivery.

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::store::{
    CatalogStore, CodeStore, EventLedgerStore, PledgeStore, PurchaseStore, StoreResult,
    SubscriptionStore, TipStore, UserStore,
};
use crate::types::{
    Artist, DownloadCode, Fundraiser, ItemRef, MerchItem, MerchListing, MerchOption, Pledge,
    Purchase, Release, ShippingDestination, Subscription, SubscriptionTier, Tip, Track, User,
};

#[derive(Clone)]
pub struct PgCommerceStore {
    pool: PgPool,
}

impl PgCommerceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const PURCHASE_COLUMNS: &str =
    "id, user_id, item_kind, item_id, amount, currency, processor_key, created_at";

#[async_trait]
impl CatalogStore for PgCommerceStore {
    async fn find_artist(&self, artist_id: Uuid) -> StoreResult<Option<Artist>> {
        let artist = sqlx::query_as::<_, Artist>(
            "SELECT id, owner_user_id, payout_user_id, name, created_at
             FROM artists WHERE id = $1",
        )
        .bind(artist_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(artist)
    }

    async fn find_release(&self, release_id: Uuid) -> StoreResult<Option<Release>> {
        let release = sqlx::query_as::<_, Release>(
            "SELECT id, artist_id, title, min_price, currency, published, created_at
             FROM releases WHERE id = $1",
        )
        .bind(release_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(release)
    }

    async fn find_track(&self, track_id: Uuid) -> StoreResult<Option<Track>> {
        let track = sqlx::query_as::<_, Track>(
            "SELECT id, release_id, title, min_price, currency FROM tracks WHERE id = $1",
        )
        .bind(track_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(track)
    }

    async fn find_merch(&self, merch_id: Uuid) -> StoreResult<Option<MerchListing>> {
        let item = sqlx::query_as::<_, MerchItem>(
            "SELECT id, artist_id, title, min_price, currency, quantity_remaining, created_at
             FROM merch_items WHERE id = $1",
        )
        .bind(merch_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(item) = item else {
            return Ok(None);
        };

        let options = sqlx::query_as::<_, MerchOption>(
            "SELECT id, merch_item_id, name, additional_price
             FROM merch_options WHERE merch_item_id = $1",
        )
        .bind(merch_id)
        .fetch_all(&self.pool)
        .await?;

        let shipping_destinations = sqlx::query_as::<_, ShippingDestination>(
            "SELECT id, merch_item_id, destination, cost
             FROM merch_shipping_destinations WHERE merch_item_id = $1",
        )
        .bind(merch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(MerchListing {
            item,
            options,
            shipping_destinations,
        }))
    }

    async fn catalogue_min_price(&self, artist_id: Uuid) -> StoreResult<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(min_price), 0)::BIGINT
             FROM releases WHERE artist_id = $1 AND published",
        )
        .bind(artist_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn decrement_merch_stock(&self, merch_id: Uuid, quantity: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE merch_items
             SET quantity_remaining = quantity_remaining - $2
             WHERE id = $1 AND quantity_remaining >= $2",
        )
        .bind(merch_id)
        .bind(quantity as i32)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_fundraiser(&self, fundraiser_id: Uuid) -> StoreResult<Option<Fundraiser>> {
        let fundraiser = sqlx::query_as::<_, Fundraiser>(
            "SELECT id, artist_id, name, goal_amount, currency, ends_at, is_all_or_nothing,
                    settled_at, created_at
             FROM fundraisers WHERE id = $1",
        )
        .bind(fundraiser_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(fundraiser)
    }

    async fn live_fundraiser_for_release(
        &self,
        release_id: Uuid,
        now: OffsetDateTime,
    ) -> StoreResult<Option<Fundraiser>> {
        let fundraiser = sqlx::query_as::<_, Fundraiser>(
            "SELECT f.id, f.artist_id, f.name, f.goal_amount, f.currency, f.ends_at,
                    f.is_all_or_nothing, f.settled_at, f.created_at
             FROM fundraisers f
             JOIN fundraiser_releases fr ON fr.fundraiser_id = f.id
             WHERE fr.release_id = $1
               AND f.settled_at IS NULL
               AND f.ends_at > $2
             LIMIT 1",
        )
        .bind(release_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(fundraiser)
    }

    async fn fundraiser_releases(&self, fundraiser_id: Uuid) -> StoreResult<Vec<Release>> {
        let releases = sqlx::query_as::<_, Release>(
            "SELECT r.id, r.artist_id, r.title, r.min_price, r.currency, r.published, r.created_at
             FROM releases r
             JOIN fundraiser_releases fr ON fr.release_id = r.id
             WHERE fr.fundraiser_id = $1",
        )
        .bind(fundraiser_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(releases)
    }

    async fn due_fundraisers(&self, now: OffsetDateTime) -> StoreResult<Vec<Fundraiser>> {
        let fundraisers = sqlx::query_as::<_, Fundraiser>(
            "SELECT id, artist_id, name, goal_amount, currency, ends_at, is_all_or_nothing,
                    settled_at, created_at
             FROM fundraisers
             WHERE settled_at IS NULL AND ends_at <= $1
             ORDER BY ends_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(fundraisers)
    }

    async fn claim_fundraiser_settlement(
        &self,
        fundraiser_id: Uuid,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE fundraisers SET settled_at = $2 WHERE id = $1 AND settled_at IS NULL",
        )
        .bind(fundraiser_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl UserStore for PgCommerceStore {
    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, name, payment_account, is_admin, created_at
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_or_create_user_by_email(&self, email: &str) -> StoreResult<User> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email)
            VALUES (LOWER($1))
            ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
            RETURNING id, email, name, payment_account, is_admin, created_at
            "#,
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }
}

#[async_trait]
impl PledgeStore for PgCommerceStore {
    async fn find_live_pledge(
        &self,
        fundraiser_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Pledge>> {
        let pledge = sqlx::query_as::<_, Pledge>(
            "SELECT id, fundraiser_id, user_id, amount, currency, created_at, paid_at, cancelled_at
             FROM pledges
             WHERE fundraiser_id = $1 AND user_id = $2 AND cancelled_at IS NULL",
        )
        .bind(fundraiser_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(pledge)
    }

    async fn insert_pledge_idempotent(
        &self,
        fundraiser_id: Uuid,
        user_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> StoreResult<Pledge> {
        let inserted = sqlx::query_as::<_, Pledge>(
            r#"
            INSERT INTO pledges (fundraiser_id, user_id, amount, currency)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (fundraiser_id, user_id) WHERE cancelled_at IS NULL DO NOTHING
            RETURNING id, fundraiser_id, user_id, amount, currency, created_at, paid_at,
                      cancelled_at
            "#,
        )
        .bind(fundraiser_id)
        .bind(user_id)
        .bind(amount)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(pledge) = inserted {
            return Ok(pledge);
        }

        // Lost to a concurrent (or earlier) insert; the live pledge wins.
        let existing = self.find_live_pledge(fundraiser_id, user_id).await?;
        existing.ok_or_else(|| {
            super::StoreError::Database("pledge insert conflicted but no live pledge found".into())
        })
    }

    async fn amend_pledge_amount(&self, pledge_id: Uuid, amount: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE pledges SET amount = $2
             WHERE id = $1 AND paid_at IS NULL AND cancelled_at IS NULL",
        )
        .bind(pledge_id)
        .bind(amount)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel_pledge(&self, pledge_id: Uuid, now: OffsetDateTime) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE pledges SET cancelled_at = $2
             WHERE id = $1 AND paid_at IS NULL AND cancelled_at IS NULL",
        )
        .bind(pledge_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn pending_pledge_total(&self, fundraiser_id: Uuid) -> StoreResult<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT
             FROM pledges
             WHERE fundraiser_id = $1 AND paid_at IS NULL AND cancelled_at IS NULL",
        )
        .bind(fundraiser_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn mark_pending_pledges_paid(
        &self,
        fundraiser_id: Uuid,
        now: OffsetDateTime,
    ) -> StoreResult<Vec<Pledge>> {
        let pledges = sqlx::query_as::<_, Pledge>(
            r#"
            UPDATE pledges SET paid_at = $2
            WHERE fundraiser_id = $1 AND paid_at IS NULL AND cancelled_at IS NULL
            RETURNING id, fundraiser_id, user_id, amount, currency, created_at, paid_at,
                      cancelled_at
            "#,
        )
        .bind(fundraiser_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(pledges)
    }

    async fn cancel_pending_pledges(
        &self,
        fundraiser_id: Uuid,
        now: OffsetDateTime,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE pledges SET cancelled_at = $2
             WHERE fundraiser_id = $1 AND paid_at IS NULL AND cancelled_at IS NULL",
        )
        .bind(fundraiser_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_pledges(&self, skip: i64, take: i64) -> StoreResult<Vec<Pledge>> {
        let pledges = sqlx::query_as::<_, Pledge>(
            "SELECT id, fundraiser_id, user_id, amount, currency, created_at, paid_at,
                    cancelled_at
             FROM pledges ORDER BY created_at DESC OFFSET $1 LIMIT $2",
        )
        .bind(skip)
        .bind(take)
        .fetch_all(&self.pool)
        .await?;

        Ok(pledges)
    }
}

#[async_trait]
impl PurchaseStore for PgCommerceStore {
    async fn insert_purchase_idempotent(
        &self,
        user_id: Uuid,
        item: ItemRef,
        amount: i64,
        currency: &str,
        processor_key: Option<&str>,
    ) -> StoreResult<Purchase> {
        let inserted = sqlx::query_as::<_, Purchase>(&format!(
            r#"
            INSERT INTO purchases (user_id, item_kind, item_id, amount, currency, processor_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, item_kind, item_id, COALESCE(processor_key, '')) DO NOTHING
            RETURNING {PURCHASE_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(item.kind.as_str())
        .bind(item.id)
        .bind(amount)
        .bind(currency)
        .bind(processor_key)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(purchase) = inserted {
            return Ok(purchase);
        }

        let existing = sqlx::query_as::<_, Purchase>(&format!(
            r#"
            SELECT {PURCHASE_COLUMNS} FROM purchases
            WHERE user_id = $1 AND item_kind = $2 AND item_id = $3
              AND COALESCE(processor_key, '') = COALESCE($4, '')
            "#
        ))
        .bind(user_id)
        .bind(item.kind.as_str())
        .bind(item.id)
        .bind(processor_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(existing)
    }

    async fn user_owns_item(&self, user_id: Uuid, item: ItemRef) -> StoreResult<bool> {
        let owns: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM purchases
                 WHERE user_id = $1 AND item_kind = $2 AND item_id = $3
             )",
        )
        .bind(user_id)
        .bind(item.kind.as_str())
        .bind(item.id)
        .fetch_one(&self.pool)
        .await?;

        Ok(owns)
    }

    async fn list_purchases(&self, skip: i64, take: i64) -> StoreResult<Vec<Purchase>> {
        let purchases = sqlx::query_as::<_, Purchase>(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases
             ORDER BY created_at DESC OFFSET $1 LIMIT $2"
        ))
        .bind(skip)
        .bind(take)
        .fetch_all(&self.pool)
        .await?;

        Ok(purchases)
    }
}

#[async_trait]
impl SubscriptionStore for PgCommerceStore {
    async fn find_subscription(&self, subscription_id: Uuid) -> StoreResult<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            "SELECT id, user_id, tier_id, amount, currency, processor_key, created_at, deleted_at
             FROM subscriptions WHERE id = $1",
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn find_tier(&self, tier_id: Uuid) -> StoreResult<Option<SubscriptionTier>> {
        let tier = sqlx::query_as::<_, SubscriptionTier>(
            r#"SELECT id, artist_id, name, min_amount, currency, allow_variable,
                      is_default_tier, "interval", created_at
               FROM subscription_tiers WHERE id = $1"#,
        )
        .bind(tier_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tier)
    }

    async fn find_or_create_follow_tier(&self, artist_id: Uuid) -> StoreResult<SubscriptionTier> {
        let tier = sqlx::query_as::<_, SubscriptionTier>(
            r#"
            INSERT INTO subscription_tiers (artist_id, name, min_amount, is_default_tier)
            VALUES ($1, 'Follow', 0, TRUE)
            ON CONFLICT (artist_id) WHERE is_default_tier DO UPDATE
                SET is_default_tier = TRUE
            RETURNING id, artist_id, name, min_amount, currency, allow_variable,
                      is_default_tier, "interval", created_at
            "#,
        )
        .bind(artist_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(tier)
    }

    async fn insert_subscription_idempotent(
        &self,
        user_id: Uuid,
        tier_id: Uuid,
        amount: i64,
        currency: &str,
        processor_key: Option<&str>,
    ) -> StoreResult<Subscription> {
        let inserted = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (user_id, tier_id, amount, currency, processor_key)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, tier_id) WHERE deleted_at IS NULL DO NOTHING
            RETURNING id, user_id, tier_id, amount, currency, processor_key, created_at,
                      deleted_at
            "#,
        )
        .bind(user_id)
        .bind(tier_id)
        .bind(amount)
        .bind(currency)
        .bind(processor_key)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(subscription) = inserted {
            return Ok(subscription);
        }

        let existing = sqlx::query_as::<_, Subscription>(
            "SELECT id, user_id, tier_id, amount, currency, processor_key, created_at, deleted_at
             FROM subscriptions
             WHERE user_id = $1 AND tier_id = $2 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .bind(tier_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(existing)
    }

    async fn soft_delete_subscription(
        &self,
        subscription_id: Uuid,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE subscriptions SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(subscription_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn soft_delete_by_processor_key(
        &self,
        processor_key: &str,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE subscriptions SET deleted_at = $2
             WHERE processor_key = $1 AND deleted_at IS NULL",
        )
        .bind(processor_key)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() >= 1)
    }

    async fn list_subscriptions(&self, skip: i64, take: i64) -> StoreResult<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(
            "SELECT id, user_id, tier_id, amount, currency, processor_key, created_at, deleted_at
             FROM subscriptions ORDER BY created_at DESC OFFSET $1 LIMIT $2",
        )
        .bind(skip)
        .bind(take)
        .fetch_all(&self.pool)
        .await?;

        Ok(subscriptions)
    }
}

#[async_trait]
impl CodeStore for PgCommerceStore {
    async fn find_unredeemed_code(
        &self,
        release_id: Uuid,
        code: &str,
    ) -> StoreResult<Option<DownloadCode>> {
        let row = sqlx::query_as::<_, DownloadCode>(
            "SELECT id, release_id, code, redeemed_by_user_id, created_at
             FROM download_codes
             WHERE release_id = $1 AND code = $2 AND redeemed_by_user_id IS NULL",
        )
        .bind(release_id)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn claim_code(&self, code_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE download_codes SET redeemed_by_user_id = $2
             WHERE id = $1 AND redeemed_by_user_id IS NULL",
        )
        .bind(code_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn unclaim_code(&self, code_id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE download_codes SET redeemed_by_user_id = NULL WHERE id = $1")
            .bind(code_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl TipStore for PgCommerceStore {
    async fn insert_tip_idempotent(
        &self,
        user_id: Option<Uuid>,
        artist_id: Uuid,
        amount: i64,
        currency: &str,
        message: Option<&str>,
        processor_key: &str,
    ) -> StoreResult<Tip> {
        let inserted = sqlx::query_as::<_, Tip>(
            r#"
            INSERT INTO tips (user_id, artist_id, amount, currency, message, processor_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (processor_key) DO NOTHING
            RETURNING id, user_id, artist_id, amount, currency, message, processor_key,
                      created_at
            "#,
        )
        .bind(user_id)
        .bind(artist_id)
        .bind(amount)
        .bind(currency)
        .bind(message)
        .bind(processor_key)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(tip) = inserted {
            return Ok(tip);
        }

        let existing = sqlx::query_as::<_, Tip>(
            "SELECT id, user_id, artist_id, amount, currency, message, processor_key, created_at
             FROM tips WHERE processor_key = $1",
        )
        .bind(processor_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(existing)
    }

    async fn list_tips(&self, skip: i64, take: i64) -> StoreResult<Vec<Tip>> {
        let tips = sqlx::query_as::<_, Tip>(
            "SELECT id, user_id, artist_id, amount, currency, message, processor_key, created_at
             FROM tips ORDER BY created_at DESC OFFSET $1 LIMIT $2",
        )
        .bind(skip)
        .bind(take)
        .fetch_all(&self.pool)
        .await?;

        Ok(tips)
    }
}

#[async_trait]
impl EventLedgerStore for PgCommerceStore {
    async fn claim_event(&self, event_key: &str, event_type: &str) -> StoreResult<bool> {
        // INSERT ... ON CONFLICT ... RETURNING claims exclusive processing
        // rights for exactly one delivery; failed events may be re-claimed.
        let claimed: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO processor_events (event_key, event_type, status)
            VALUES ($1, $2, 'processing')
            ON CONFLICT (event_key) DO UPDATE SET
                status = 'processing',
                error_message = NULL
            WHERE processor_events.status = 'failed'
            RETURNING id
            "#,
        )
        .bind(event_key)
        .bind(event_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn finish_event(
        &self,
        event_key: &str,
        succeeded: bool,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE processor_events
             SET status = $2, error_message = $3, processed_at = NOW()
             WHERE event_key = $1",
        )
        .bind(event_key)
        .bind(if succeeded { "completed" } else { "failed" })
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
