//! Checkout session orchestration
//!
//! Builds hosted-payment sessions for the four purchase kinds: a single
//! release (or track), an artist's full catalogue, a tip, and merchandise.
//! Each call is stateless; the resulting Purchase is materialised later by
//! the registrar when the processor confirms payment.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{CommerceError, CommerceResult};
use crate::price::resolve_price;
use crate::processor::{CheckoutSessionRef, CheckoutSessionSpec, PaymentProcessor};
use crate::store::{CatalogStore, CommerceStore, UserStore};
use crate::subscriptions::ensure_follow;
use crate::types::{Artist, ItemKind, MerchListing, User};

/// Metadata keys carried on every checkout session and read back by the
/// webhook handler. These strings are a wire contract; do not rename.
pub mod meta {
    pub const KIND: &str = "checkout_kind";
    pub const ITEM_ID: &str = "item_id";
    pub const ARTIST_ID: &str = "artist_id";
    pub const USER_ID: &str = "user_id";
    pub const EMAIL: &str = "purchaser_email";
    pub const FUNDRAISER_ID: &str = "fundraiser_id";
    pub const QUANTITY: &str = "quantity";
    pub const MESSAGE: &str = "message";
    pub const OPTION_IDS: &str = "merch_option_ids";
    pub const DESTINATION_ID: &str = "shipping_destination_id";
}

/// Merch-specific checkout arguments.
#[derive(Debug, Clone, Default)]
pub struct MerchPurchaseArgs {
    pub price: Option<i64>,
    pub email: Option<String>,
    pub quantity: Option<i64>,
    pub merch_option_ids: Vec<Uuid>,
    pub shipping_destination_id: Uuid,
    pub message: Option<String>,
}

pub struct CheckoutService {
    store: Arc<dyn CommerceStore>,
    processor: Arc<dyn PaymentProcessor>,
    platform_fee_percent: i64,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn CommerceStore>,
        processor: Arc<dyn PaymentProcessor>,
        platform_fee_percent: i64,
    ) -> Self {
        Self {
            store,
            processor,
            platform_fee_percent,
        }
    }

    /// Checkout for a single release. When a live all-or-nothing fundraiser
    /// backs the release, the confirmed payment becomes a pledge instead of
    /// an immediate purchase.
    pub async fn release_checkout(
        &self,
        release_id: Uuid,
        authenticated_user_id: Option<Uuid>,
        price: Option<i64>,
        guest_email: Option<String>,
    ) -> CommerceResult<CheckoutSessionRef> {
        let release = self
            .store
            .find_release(release_id)
            .await?
            .ok_or(CommerceError::ItemNotFound("release"))?;
        let artist = self.require_artist(release.artist_id).await?;

        let resolved = resolve_price(price, Some(release.min_price))?;
        let purchaser = self
            .resolve_purchaser(authenticated_user_id, guest_email)
            .await?;
        self.reject_free_checkout(&purchaser, resolved.is_free, resolved.amount)?;

        let mut metadata = self.base_metadata(ItemKind::Release.as_str(), release.id, &artist, &purchaser);
        let fundraiser = self
            .store
            .live_fundraiser_for_release(release.id, time::OffsetDateTime::now_utc())
            .await?;
        if let Some(fundraiser) = fundraiser.filter(|f| f.is_all_or_nothing) {
            metadata.insert(meta::FUNDRAISER_ID.into(), fundraiser.id.to_string());
        }

        self.issue_session(
            &artist,
            &purchaser,
            resolved.amount,
            &release.currency,
            release.title.clone(),
            Some(format!("Release by {}", artist.name)),
            metadata,
        )
        .await
    }

    /// Checkout for a single track.
    pub async fn track_checkout(
        &self,
        track_id: Uuid,
        authenticated_user_id: Option<Uuid>,
        price: Option<i64>,
        guest_email: Option<String>,
    ) -> CommerceResult<CheckoutSessionRef> {
        let track = self
            .store
            .find_track(track_id)
            .await?
            .ok_or(CommerceError::ItemNotFound("track"))?;
        let release = self
            .store
            .find_release(track.release_id)
            .await?
            .ok_or(CommerceError::ItemNotFound("release"))?;
        let artist = self.require_artist(release.artist_id).await?;

        let resolved = resolve_price(price, Some(track.min_price))?;
        let purchaser = self
            .resolve_purchaser(authenticated_user_id, guest_email)
            .await?;
        self.reject_free_checkout(&purchaser, resolved.is_free, resolved.amount)?;

        let metadata = self.base_metadata(ItemKind::Track.as_str(), track.id, &artist, &purchaser);

        self.issue_session(
            &artist,
            &purchaser,
            resolved.amount,
            &track.currency,
            track.title.clone(),
            Some(format!("Track from {}", release.title)),
            metadata,
        )
        .await
    }

    /// Checkout for an artist's entire published catalogue.
    pub async fn catalogue_checkout(
        &self,
        artist_id: Uuid,
        authenticated_user_id: Option<Uuid>,
        price: Option<i64>,
        guest_email: Option<String>,
    ) -> CommerceResult<CheckoutSessionRef> {
        let artist = self.require_artist(artist_id).await?;
        let min_price = self.store.catalogue_min_price(artist_id).await?;

        let resolved = resolve_price(price, Some(min_price))?;
        let purchaser = self
            .resolve_purchaser(authenticated_user_id, guest_email)
            .await?;
        self.reject_free_checkout(&purchaser, resolved.is_free, resolved.amount)?;

        let metadata = self.base_metadata(ItemKind::Catalogue.as_str(), artist.id, &artist, &purchaser);

        self.issue_session(
            &artist,
            &purchaser,
            resolved.amount,
            "usd",
            format!("Complete catalogue: {}", artist.name),
            None,
            metadata,
        )
        .await
    }

    /// Checkout for a one-off tip. Tips have no minimum, but a zero tip is
    /// meaningless and rejected up front.
    pub async fn tip_checkout(
        &self,
        artist_id: Uuid,
        authenticated_user_id: Option<Uuid>,
        price: Option<i64>,
        guest_email: Option<String>,
        message: Option<String>,
    ) -> CommerceResult<CheckoutSessionRef> {
        let artist = self.require_artist(artist_id).await?;

        let resolved = resolve_price(price, None)?;
        let purchaser = self
            .resolve_purchaser(authenticated_user_id, guest_email)
            .await?;
        self.reject_free_checkout(&purchaser, resolved.is_free, resolved.amount)?;
        if resolved.amount == 0 {
            return Err(CommerceError::InvalidInput("tip amount required".into()));
        }

        let mut metadata = self.base_metadata("tip", artist.id, &artist, &purchaser);
        if let Some(message) = &message {
            metadata.insert(meta::MESSAGE.into(), message.clone());
        }

        self.issue_session(
            &artist,
            &purchaser,
            resolved.amount,
            "usd",
            format!("Tip for {}", artist.name),
            message,
            metadata,
        )
        .await
    }

    /// Checkout for a merchandise item. Unknown option ids are silently
    /// dropped; known ones add their price per unit. The chosen shipping
    /// destination must belong to the item and adds its cost once.
    pub async fn merch_checkout(
        &self,
        merch_id: Uuid,
        authenticated_user_id: Option<Uuid>,
        args: MerchPurchaseArgs,
    ) -> CommerceResult<CheckoutSessionRef> {
        let listing = self
            .store
            .find_merch(merch_id)
            .await?
            .ok_or(CommerceError::ItemNotFound("merch item"))?;
        let artist = self.require_artist(listing.item.artist_id).await?;

        let quantity = args.quantity.unwrap_or(1);
        if quantity < 1 {
            return Err(CommerceError::InvalidInput(format!(
                "quantity must be at least 1, got {quantity}"
            )));
        }
        let remaining = i64::from(listing.item.quantity_remaining);
        if quantity > remaining {
            return Err(CommerceError::OutOfStock {
                requested: quantity,
                remaining,
            });
        }

        let resolved = resolve_price(args.price, Some(listing.item.min_price))?;
        let option_total = selected_option_total(&listing, &args.merch_option_ids);
        let destination = listing
            .shipping_destinations
            .iter()
            .find(|d| d.id == args.shipping_destination_id)
            .ok_or(CommerceError::ItemNotFound("shipping destination"))?;

        let total = (resolved.amount + option_total) * quantity + destination.cost;

        let purchaser = self
            .resolve_purchaser(authenticated_user_id, args.email)
            .await?;
        self.reject_free_checkout(&purchaser, resolved.is_free, total)?;

        let mut metadata =
            self.base_metadata(ItemKind::Merch.as_str(), listing.item.id, &artist, &purchaser);
        metadata.insert(meta::QUANTITY.into(), quantity.to_string());
        metadata.insert(
            meta::DESTINATION_ID.into(),
            destination.id.to_string(),
        );
        let selected: Vec<String> = listing
            .options
            .iter()
            .filter(|o| args.merch_option_ids.contains(&o.id))
            .map(|o| o.id.to_string())
            .collect();
        if !selected.is_empty() {
            metadata.insert(meta::OPTION_IDS.into(), selected.join(","));
        }
        if let Some(message) = &args.message {
            metadata.insert(meta::MESSAGE.into(), message.clone());
        }

        self.issue_session(
            &artist,
            &purchaser,
            total,
            &listing.item.currency,
            listing.item.title.clone(),
            Some(format!("Merch from {}", artist.name)),
            metadata,
        )
        .await
    }

    // ---- shared contract ----

    async fn require_artist(&self, artist_id: Uuid) -> CommerceResult<Artist> {
        self.store
            .find_artist(artist_id)
            .await?
            .ok_or(CommerceError::ItemNotFound("artist"))
    }

    /// Resolve who is paying: the authenticated user's email, else the guest
    /// email from the request body.
    async fn resolve_purchaser(
        &self,
        authenticated_user_id: Option<Uuid>,
        guest_email: Option<String>,
    ) -> CommerceResult<Purchaser> {
        if let Some(user_id) = authenticated_user_id {
            let user = self
                .store
                .find_user(user_id)
                .await?
                .ok_or(CommerceError::Unauthorized)?;
            return Ok(Purchaser {
                email: user.email.clone(),
                user: Some(user),
            });
        }

        let email = guest_email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .ok_or(CommerceError::NoIdentityProvided)?;

        Ok(Purchaser { email, user: None })
    }

    /// A logged-in user must not route a free item through the payment rail.
    fn reject_free_checkout(
        &self,
        purchaser: &Purchaser,
        is_free: bool,
        total: i64,
    ) -> CommerceResult<()> {
        if purchaser.user.is_some() && is_free && total == 0 {
            return Err(CommerceError::FreeItemRequiresNoCheckout);
        }
        Ok(())
    }

    fn base_metadata(
        &self,
        kind: &str,
        item_id: Uuid,
        artist: &Artist,
        purchaser: &Purchaser,
    ) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        metadata.insert(meta::KIND.into(), kind.into());
        metadata.insert(meta::ITEM_ID.into(), item_id.to_string());
        metadata.insert(meta::ARTIST_ID.into(), artist.id.to_string());
        metadata.insert(meta::EMAIL.into(), purchaser.email.clone());
        if let Some(user) = &purchaser.user {
            metadata.insert(meta::USER_ID.into(), user.id.to_string());
        }
        metadata
    }

    async fn issue_session(
        &self,
        artist: &Artist,
        purchaser: &Purchaser,
        amount: i64,
        currency: &str,
        product_name: String,
        product_description: Option<String>,
        metadata: HashMap<String, String>,
    ) -> CommerceResult<CheckoutSessionRef> {
        let payee_account = self.resolve_payee_account(artist).await?;
        if payee_account.is_none() && amount > 0 {
            return Err(CommerceError::PayeeNotOnboarded);
        }

        // Best effort: every purchaser automatically follows the artist they
        // support. Never allowed to fail the checkout.
        if let Some(user) = &purchaser.user {
            self.spawn_auto_follow(user.id, artist.id);
        }

        let application_fee = amount * self.platform_fee_percent / 100;
        let spec = CheckoutSessionSpec {
            amount,
            currency: currency.to_string(),
            payee_account,
            application_fee,
            customer_email: purchaser.email.clone(),
            product_name,
            product_description,
            metadata,
        };

        self.processor
            .create_checkout_session(spec)
            .await
            .map_err(|e| CommerceError::CheckoutSessionFailed(e.to_string()))
    }

    /// The artist's designated payment recipient's connected account, or the
    /// owner's when no recipient is designated.
    async fn resolve_payee_account(&self, artist: &Artist) -> CommerceResult<Option<String>> {
        let payee = self.store.find_user(artist.payee_user_id()).await?;
        Ok(payee.and_then(|u| u.payment_account))
    }

    fn spawn_auto_follow(&self, user_id: Uuid, artist_id: Uuid) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = ensure_follow(store.as_ref(), user_id, artist_id).await {
                tracing::warn!(
                    user_id = %user_id,
                    artist_id = %artist_id,
                    error = %e,
                    "Auto-follow after checkout failed"
                );
            }
        });
    }
}

struct Purchaser {
    user: Option<User>,
    email: String,
}

/// Sum of `additional_price` for the recognised option ids. Unknown ids are
/// dropped without error.
fn selected_option_total(listing: &MerchListing, option_ids: &[Uuid]) -> i64 {
    listing
        .options
        .iter()
        .filter(|o| option_ids.contains(&o.id))
        .map(|o| o.additional_price)
        .sum()
}
