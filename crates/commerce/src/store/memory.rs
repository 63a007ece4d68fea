//! In-memory store
//!
//! Mutex-guarded test double implementing the full [`CommerceStore`]
//! surface. Claim methods take the lock for the whole check-then-act, which
//! gives the same one-winner semantics the conditional updates give in
//! Postgres.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::store::{
    CatalogStore, CodeStore, EventLedgerStore, PledgeStore, PurchaseStore, StoreResult,
    SubscriptionStore, TipStore, UserStore,
};
use crate::types::{
    Artist, DownloadCode, Fundraiser, ItemRef, MerchListing, MerchOption, Pledge, Purchase,
    Release, ShippingDestination, Subscription, SubscriptionTier, Tip, Track, User,
};

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    artists: Vec<Artist>,
    releases: Vec<Release>,
    tracks: Vec<Track>,
    merch: Vec<MerchListing>,
    fundraisers: Vec<Fundraiser>,
    fundraiser_releases: Vec<(Uuid, Uuid)>,
    pledges: Vec<Pledge>,
    purchases: Vec<Purchase>,
    tiers: Vec<SubscriptionTier>,
    subscriptions: Vec<Subscription>,
    tips: Vec<Tip>,
    codes: Vec<DownloadCode>,
    events: Vec<(String, String, String)>,
}

#[derive(Default)]
pub struct MemoryCommerceStore {
    inner: Mutex<Inner>,
}

impl MemoryCommerceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- seeding helpers for tests ----

    pub fn seed_user(&self, email: &str, payment_account: Option<&str>) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_lowercase(),
            name: None,
            payment_account: payment_account.map(String::from),
            is_admin: false,
            created_at: OffsetDateTime::now_utc(),
        };
        self.lock().users.push(user.clone());
        user
    }

    pub fn seed_admin(&self, email: &str) -> User {
        let mut user = self.seed_user(email, None);
        user.is_admin = true;
        let mut inner = self.lock();
        if let Some(stored) = inner.users.iter_mut().find(|u| u.id == user.id) {
            stored.is_admin = true;
        }
        user
    }

    pub fn seed_artist(&self, owner: &User) -> Artist {
        let artist = Artist {
            id: Uuid::new_v4(),
            owner_user_id: owner.id,
            payout_user_id: None,
            name: "Seeded Artist".into(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.lock().artists.push(artist.clone());
        artist
    }

    pub fn seed_release(&self, artist: &Artist, min_price: i64) -> Release {
        let release = Release {
            id: Uuid::new_v4(),
            artist_id: artist.id,
            title: "Seeded Release".into(),
            min_price,
            currency: "usd".into(),
            published: true,
            created_at: OffsetDateTime::now_utc(),
        };
        self.lock().releases.push(release.clone());
        release
    }

    pub fn seed_merch(
        &self,
        artist: &Artist,
        min_price: i64,
        quantity_remaining: i32,
        options: &[(&str, i64)],
        destinations: &[(&str, i64)],
    ) -> MerchListing {
        let item_id = Uuid::new_v4();
        let listing = MerchListing {
            item: crate::types::MerchItem {
                id: item_id,
                artist_id: artist.id,
                title: "Seeded Merch".into(),
                min_price,
                currency: "usd".into(),
                quantity_remaining,
                created_at: OffsetDateTime::now_utc(),
            },
            options: options
                .iter()
                .map(|(name, price)| MerchOption {
                    id: Uuid::new_v4(),
                    merch_item_id: item_id,
                    name: (*name).into(),
                    additional_price: *price,
                })
                .collect(),
            shipping_destinations: destinations
                .iter()
                .map(|(dest, cost)| ShippingDestination {
                    id: Uuid::new_v4(),
                    merch_item_id: item_id,
                    destination: (*dest).into(),
                    cost: *cost,
                })
                .collect(),
        };
        self.lock().merch.push(listing.clone());
        listing
    }

    pub fn seed_fundraiser(
        &self,
        artist: &Artist,
        releases: &[&Release],
        goal_amount: i64,
        ends_at: OffsetDateTime,
    ) -> Fundraiser {
        let fundraiser = Fundraiser {
            id: Uuid::new_v4(),
            artist_id: artist.id,
            name: "Seeded Fundraiser".into(),
            goal_amount,
            currency: "usd".into(),
            ends_at,
            is_all_or_nothing: true,
            settled_at: None,
            created_at: OffsetDateTime::now_utc(),
        };
        let mut inner = self.lock();
        for release in releases {
            inner
                .fundraiser_releases
                .push((fundraiser.id, release.id));
        }
        inner.fundraisers.push(fundraiser.clone());
        fundraiser
    }

    pub fn seed_tier(&self, artist: &Artist, min_amount: i64) -> SubscriptionTier {
        let tier = SubscriptionTier {
            id: Uuid::new_v4(),
            artist_id: artist.id,
            name: "Seeded Tier".into(),
            min_amount,
            currency: "usd".into(),
            allow_variable: false,
            is_default_tier: false,
            interval: "monthly".into(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.lock().tiers.push(tier.clone());
        tier
    }

    pub fn seed_subscription(
        &self,
        user: &User,
        tier: &SubscriptionTier,
        amount: i64,
        processor_key: Option<&str>,
    ) -> Subscription {
        let subscription = Subscription {
            id: Uuid::new_v4(),
            user_id: user.id,
            tier_id: tier.id,
            amount,
            currency: tier.currency.clone(),
            processor_key: processor_key.map(String::from),
            created_at: OffsetDateTime::now_utc(),
            deleted_at: None,
        };
        self.lock().subscriptions.push(subscription.clone());
        subscription
    }

    pub fn seed_code(&self, release: &Release, code: &str) -> DownloadCode {
        let code = DownloadCode {
            id: Uuid::new_v4(),
            release_id: release.id,
            code: code.into(),
            redeemed_by_user_id: None,
            created_at: OffsetDateTime::now_utc(),
        };
        self.lock().codes.push(code.clone());
        code
    }

    pub fn get_pledge(&self, pledge_id: Uuid) -> Option<Pledge> {
        self.lock().pledges.iter().find(|p| p.id == pledge_id).cloned()
    }

    pub fn get_subscription(&self, subscription_id: Uuid) -> Option<Subscription> {
        self.lock()
            .subscriptions
            .iter()
            .find(|s| s.id == subscription_id)
            .cloned()
    }

    pub fn get_code(&self, code_id: Uuid) -> Option<DownloadCode> {
        self.lock().codes.iter().find(|c| c.id == code_id).cloned()
    }

    pub fn purchase_count(&self) -> usize {
        self.lock().purchases.len()
    }

    pub fn subscription_count_for(&self, user_id: Uuid) -> usize {
        self.lock()
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.deleted_at.is_none())
            .count()
    }
}

#[async_trait]
impl CatalogStore for MemoryCommerceStore {
    async fn find_artist(&self, artist_id: Uuid) -> StoreResult<Option<Artist>> {
        Ok(self.lock().artists.iter().find(|a| a.id == artist_id).cloned())
    }

    async fn find_release(&self, release_id: Uuid) -> StoreResult<Option<Release>> {
        Ok(self
            .lock()
            .releases
            .iter()
            .find(|r| r.id == release_id)
            .cloned())
    }

    async fn find_track(&self, track_id: Uuid) -> StoreResult<Option<Track>> {
        Ok(self.lock().tracks.iter().find(|t| t.id == track_id).cloned())
    }

    async fn find_merch(&self, merch_id: Uuid) -> StoreResult<Option<MerchListing>> {
        Ok(self
            .lock()
            .merch
            .iter()
            .find(|m| m.item.id == merch_id)
            .cloned())
    }

    async fn catalogue_min_price(&self, artist_id: Uuid) -> StoreResult<i64> {
        Ok(self
            .lock()
            .releases
            .iter()
            .filter(|r| r.artist_id == artist_id && r.published)
            .map(|r| r.min_price)
            .sum())
    }

    async fn decrement_merch_stock(&self, merch_id: Uuid, quantity: i64) -> StoreResult<bool> {
        let mut inner = self.lock();
        let Some(listing) = inner.merch.iter_mut().find(|m| m.item.id == merch_id) else {
            return Ok(false);
        };
        if i64::from(listing.item.quantity_remaining) < quantity {
            return Ok(false);
        }
        listing.item.quantity_remaining -= quantity as i32;
        Ok(true)
    }

    async fn find_fundraiser(&self, fundraiser_id: Uuid) -> StoreResult<Option<Fundraiser>> {
        Ok(self
            .lock()
            .fundraisers
            .iter()
            .find(|f| f.id == fundraiser_id)
            .cloned())
    }

    async fn live_fundraiser_for_release(
        &self,
        release_id: Uuid,
        now: OffsetDateTime,
    ) -> StoreResult<Option<Fundraiser>> {
        let inner = self.lock();
        let fundraiser_ids: Vec<Uuid> = inner
            .fundraiser_releases
            .iter()
            .filter(|(_, rid)| *rid == release_id)
            .map(|(fid, _)| *fid)
            .collect();
        Ok(inner
            .fundraisers
            .iter()
            .find(|f| fundraiser_ids.contains(&f.id) && f.is_live(now))
            .cloned())
    }

    async fn fundraiser_releases(&self, fundraiser_id: Uuid) -> StoreResult<Vec<Release>> {
        let inner = self.lock();
        let release_ids: Vec<Uuid> = inner
            .fundraiser_releases
            .iter()
            .filter(|(fid, _)| *fid == fundraiser_id)
            .map(|(_, rid)| *rid)
            .collect();
        Ok(inner
            .releases
            .iter()
            .filter(|r| release_ids.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn due_fundraisers(&self, now: OffsetDateTime) -> StoreResult<Vec<Fundraiser>> {
        Ok(self
            .lock()
            .fundraisers
            .iter()
            .filter(|f| f.settled_at.is_none() && f.ends_at <= now)
            .cloned()
            .collect())
    }

    async fn claim_fundraiser_settlement(
        &self,
        fundraiser_id: Uuid,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        let mut inner = self.lock();
        let Some(fundraiser) = inner.fundraisers.iter_mut().find(|f| f.id == fundraiser_id)
        else {
            return Ok(false);
        };
        if fundraiser.settled_at.is_some() {
            return Ok(false);
        }
        fundraiser.settled_at = Some(now);
        Ok(true)
    }
}

#[async_trait]
impl UserStore for MemoryCommerceStore {
    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.lock().users.iter().find(|u| u.id == user_id).cloned())
    }

    async fn find_or_create_user_by_email(&self, email: &str) -> StoreResult<User> {
        let email = email.to_lowercase();
        let mut inner = self.lock();
        if let Some(user) = inner.users.iter().find(|u| u.email == email) {
            return Ok(user.clone());
        }
        let user = User {
            id: Uuid::new_v4(),
            email,
            name: None,
            payment_account: None,
            is_admin: false,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.users.push(user.clone());
        Ok(user)
    }
}

#[async_trait]
impl PledgeStore for MemoryCommerceStore {
    async fn find_live_pledge(
        &self,
        fundraiser_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Pledge>> {
        Ok(self
            .lock()
            .pledges
            .iter()
            .find(|p| {
                p.fundraiser_id == fundraiser_id
                    && p.user_id == user_id
                    && p.cancelled_at.is_none()
            })
            .cloned())
    }

    async fn insert_pledge_idempotent(
        &self,
        fundraiser_id: Uuid,
        user_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> StoreResult<Pledge> {
        let mut inner = self.lock();
        if let Some(existing) = inner.pledges.iter().find(|p| {
            p.fundraiser_id == fundraiser_id && p.user_id == user_id && p.cancelled_at.is_none()
        }) {
            return Ok(existing.clone());
        }
        let pledge = Pledge {
            id: Uuid::new_v4(),
            fundraiser_id,
            user_id,
            amount,
            currency: currency.into(),
            created_at: OffsetDateTime::now_utc(),
            paid_at: None,
            cancelled_at: None,
        };
        inner.pledges.push(pledge.clone());
        Ok(pledge)
    }

    async fn amend_pledge_amount(&self, pledge_id: Uuid, amount: i64) -> StoreResult<bool> {
        let mut inner = self.lock();
        let Some(pledge) = inner
            .pledges
            .iter_mut()
            .find(|p| p.id == pledge_id && p.is_pending())
        else {
            return Ok(false);
        };
        pledge.amount = amount;
        Ok(true)
    }

    async fn cancel_pledge(&self, pledge_id: Uuid, now: OffsetDateTime) -> StoreResult<bool> {
        let mut inner = self.lock();
        let Some(pledge) = inner
            .pledges
            .iter_mut()
            .find(|p| p.id == pledge_id && p.is_pending())
        else {
            return Ok(false);
        };
        pledge.cancelled_at = Some(now);
        Ok(true)
    }

    async fn pending_pledge_total(&self, fundraiser_id: Uuid) -> StoreResult<i64> {
        Ok(self
            .lock()
            .pledges
            .iter()
            .filter(|p| p.fundraiser_id == fundraiser_id && p.is_pending())
            .map(|p| p.amount)
            .sum())
    }

    async fn mark_pending_pledges_paid(
        &self,
        fundraiser_id: Uuid,
        now: OffsetDateTime,
    ) -> StoreResult<Vec<Pledge>> {
        let mut inner = self.lock();
        let mut moved = Vec::new();
        for pledge in inner
            .pledges
            .iter_mut()
            .filter(|p| p.fundraiser_id == fundraiser_id && p.is_pending())
        {
            pledge.paid_at = Some(now);
            moved.push(pledge.clone());
        }
        Ok(moved)
    }

    async fn cancel_pending_pledges(
        &self,
        fundraiser_id: Uuid,
        now: OffsetDateTime,
    ) -> StoreResult<u64> {
        let mut inner = self.lock();
        let mut cancelled = 0;
        for pledge in inner
            .pledges
            .iter_mut()
            .filter(|p| p.fundraiser_id == fundraiser_id && p.is_pending())
        {
            pledge.cancelled_at = Some(now);
            cancelled += 1;
        }
        Ok(cancelled)
    }

    async fn list_pledges(&self, skip: i64, take: i64) -> StoreResult<Vec<Pledge>> {
        Ok(self
            .lock()
            .pledges
            .iter()
            .skip(skip as usize)
            .take(take as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PurchaseStore for MemoryCommerceStore {
    async fn insert_purchase_idempotent(
        &self,
        user_id: Uuid,
        item: ItemRef,
        amount: i64,
        currency: &str,
        processor_key: Option<&str>,
    ) -> StoreResult<Purchase> {
        let mut inner = self.lock();
        if let Some(existing) = inner.purchases.iter().find(|p| {
            p.user_id == user_id
                && p.item_ref() == item
                && p.processor_key.as_deref().unwrap_or("")
                    == processor_key.unwrap_or("")
        }) {
            return Ok(existing.clone());
        }
        let purchase = Purchase {
            id: Uuid::new_v4(),
            user_id,
            item_kind: item.kind.into(),
            item_id: item.id,
            amount,
            currency: currency.into(),
            processor_key: processor_key.map(String::from),
            created_at: OffsetDateTime::now_utc(),
        };
        inner.purchases.push(purchase.clone());
        Ok(purchase)
    }

    async fn user_owns_item(&self, user_id: Uuid, item: ItemRef) -> StoreResult<bool> {
        Ok(self
            .lock()
            .purchases
            .iter()
            .any(|p| p.user_id == user_id && p.item_ref() == item))
    }

    async fn list_purchases(&self, skip: i64, take: i64) -> StoreResult<Vec<Purchase>> {
        Ok(self
            .lock()
            .purchases
            .iter()
            .skip(skip as usize)
            .take(take as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryCommerceStore {
    async fn find_subscription(&self, subscription_id: Uuid) -> StoreResult<Option<Subscription>> {
        Ok(self
            .lock()
            .subscriptions
            .iter()
            .find(|s| s.id == subscription_id)
            .cloned())
    }

    async fn find_tier(&self, tier_id: Uuid) -> StoreResult<Option<SubscriptionTier>> {
        Ok(self.lock().tiers.iter().find(|t| t.id == tier_id).cloned())
    }

    async fn find_or_create_follow_tier(&self, artist_id: Uuid) -> StoreResult<SubscriptionTier> {
        let mut inner = self.lock();
        if let Some(tier) = inner
            .tiers
            .iter()
            .find(|t| t.artist_id == artist_id && t.is_default_tier)
        {
            return Ok(tier.clone());
        }
        let tier = SubscriptionTier {
            id: Uuid::new_v4(),
            artist_id,
            name: "Follow".into(),
            min_amount: 0,
            currency: "usd".into(),
            allow_variable: false,
            is_default_tier: true,
            interval: "monthly".into(),
            created_at: OffsetDateTime::now_utc(),
        };
        inner.tiers.push(tier.clone());
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
        let mut inner = self.lock();
        if let Some(existing) = inner
            .subscriptions
            .iter()
            .find(|s| s.user_id == user_id && s.tier_id == tier_id && s.deleted_at.is_none())
        {
            return Ok(existing.clone());
        }
        let subscription = Subscription {
            id: Uuid::new_v4(),
            user_id,
            tier_id,
            amount,
            currency: currency.into(),
            processor_key: processor_key.map(String::from),
            created_at: OffsetDateTime::now_utc(),
            deleted_at: None,
        };
        inner.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn soft_delete_subscription(
        &self,
        subscription_id: Uuid,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        let mut inner = self.lock();
        let Some(subscription) = inner
            .subscriptions
            .iter_mut()
            .find(|s| s.id == subscription_id && s.deleted_at.is_none())
        else {
            return Ok(false);
        };
        subscription.deleted_at = Some(now);
        Ok(true)
    }

    async fn soft_delete_by_processor_key(
        &self,
        processor_key: &str,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        let mut inner = self.lock();
        let mut any = false;
        for subscription in inner.subscriptions.iter_mut().filter(|s| {
            s.processor_key.as_deref() == Some(processor_key) && s.deleted_at.is_none()
        }) {
            subscription.deleted_at = Some(now);
            any = true;
        }
        Ok(any)
    }

    async fn list_subscriptions(&self, skip: i64, take: i64) -> StoreResult<Vec<Subscription>> {
        Ok(self
            .lock()
            .subscriptions
            .iter()
            .skip(skip as usize)
            .take(take as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CodeStore for MemoryCommerceStore {
    async fn find_unredeemed_code(
        &self,
        release_id: Uuid,
        code: &str,
    ) -> StoreResult<Option<DownloadCode>> {
        Ok(self
            .lock()
            .codes
            .iter()
            .find(|c| {
                c.release_id == release_id && c.code == code && c.redeemed_by_user_id.is_none()
            })
            .cloned())
    }

    async fn claim_code(&self, code_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let mut inner = self.lock();
        let Some(code) = inner
            .codes
            .iter_mut()
            .find(|c| c.id == code_id && c.redeemed_by_user_id.is_none())
        else {
            return Ok(false);
        };
        code.redeemed_by_user_id = Some(user_id);
        Ok(true)
    }

    async fn unclaim_code(&self, code_id: Uuid) -> StoreResult<()> {
        let mut inner = self.lock();
        if let Some(code) = inner.codes.iter_mut().find(|c| c.id == code_id) {
            code.redeemed_by_user_id = None;
        }
        Ok(())
    }
}

#[async_trait]
impl TipStore for MemoryCommerceStore {
    async fn insert_tip_idempotent(
        &self,
        user_id: Option<Uuid>,
        artist_id: Uuid,
        amount: i64,
        currency: &str,
        message: Option<&str>,
        processor_key: &str,
    ) -> StoreResult<Tip> {
        let mut inner = self.lock();
        if let Some(existing) = inner
            .tips
            .iter()
            .find(|t| t.processor_key == processor_key)
        {
            return Ok(existing.clone());
        }
        let tip = Tip {
            id: Uuid::new_v4(),
            user_id,
            artist_id,
            amount,
            currency: currency.into(),
            message: message.map(String::from),
            processor_key: processor_key.into(),
            created_at: OffsetDateTime::now_utc(),
        };
        inner.tips.push(tip.clone());
        Ok(tip)
    }

    async fn list_tips(&self, skip: i64, take: i64) -> StoreResult<Vec<Tip>> {
        Ok(self
            .lock()
            .tips
            .iter()
            .skip(skip as usize)
            .take(take as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EventLedgerStore for MemoryCommerceStore {
    async fn claim_event(&self, event_key: &str, event_type: &str) -> StoreResult<bool> {
        let mut inner = self.lock();
        if let Some((_, _, status)) = inner.events.iter_mut().find(|(key, _, _)| key == event_key)
        {
            if status == "failed" {
                *status = "processing".into();
                return Ok(true);
            }
            return Ok(false);
        }
        inner
            .events
            .push((event_key.into(), event_type.into(), "processing".into()));
        Ok(true)
    }

    async fn finish_event(
        &self,
        event_key: &str,
        succeeded: bool,
        _error_message: Option<&str>,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        if let Some((_, _, status)) = inner.events.iter_mut().find(|(key, _, _)| key == event_key)
        {
            *status = if succeeded { "completed" } else { "failed" }.into();
        }
        Ok(())
    }
}
