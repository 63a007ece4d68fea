//! Domain entities for the commerce core
//!
//! Row types double as API response bodies; amounts are minor currency units
//! and currencies are lower-case ISO codes.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// What is being purchased.
///
/// Replaces field-presence type guards with an explicit tagged reference:
/// a purchase row is always `(kind, id)` where catalogue references carry
/// the artist id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Release,
    Track,
    Merch,
    Catalogue,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Release => "release",
            ItemKind::Track => "track",
            ItemKind::Merch => "merch",
            ItemKind::Catalogue => "catalogue",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "release" => Some(ItemKind::Release),
            "track" => Some(ItemKind::Track),
            "merch" => Some(ItemKind::Merch),
            "catalogue" => Some(ItemKind::Catalogue),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A polymorphic reference to a sellable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub kind: ItemKind,
    pub id: Uuid,
}

impl ItemRef {
    pub fn release(id: Uuid) -> Self {
        Self {
            kind: ItemKind::Release,
            id,
        }
    }

    pub fn track(id: Uuid) -> Self {
        Self {
            kind: ItemKind::Track,
            id,
        }
    }

    pub fn merch(id: Uuid) -> Self {
        Self {
            kind: ItemKind::Merch,
            id,
        }
    }

    /// Full-catalogue purchases reference the artist.
    pub fn catalogue(artist_id: Uuid) -> Self {
        Self {
            kind: ItemKind::Catalogue,
            id: artist_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    /// Connected payment-processor account; NULL until onboarded.
    pub payment_account: Option<String>,
    pub is_admin: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Artist {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub payout_user_id: Option<Uuid>,
    pub name: String,
    pub created_at: OffsetDateTime,
}

impl Artist {
    /// The user whose processor account receives this artist's money.
    pub fn payee_user_id(&self) -> Uuid {
        self.payout_user_id.unwrap_or(self.owner_user_id)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Release {
    pub id: Uuid,
    pub artist_id: Uuid,
    pub title: String,
    pub min_price: i64,
    pub currency: String,
    pub published: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Track {
    pub id: Uuid,
    pub release_id: Uuid,
    pub title: String,
    pub min_price: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MerchItem {
    pub id: Uuid,
    pub artist_id: Uuid,
    pub title: String,
    pub min_price: i64,
    pub currency: String,
    pub quantity_remaining: i32,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MerchOption {
    pub id: Uuid,
    pub merch_item_id: Uuid,
    pub name: String,
    pub additional_price: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ShippingDestination {
    pub id: Uuid,
    pub merch_item_id: Uuid,
    pub destination: String,
    pub cost: i64,
}

/// A merch item together with its option catalogue and shipping destinations.
#[derive(Debug, Clone, Serialize)]
pub struct MerchListing {
    pub item: MerchItem,
    pub options: Vec<MerchOption>,
    pub shipping_destinations: Vec<ShippingDestination>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Fundraiser {
    pub id: Uuid,
    pub artist_id: Uuid,
    pub name: String,
    pub goal_amount: i64,
    pub currency: String,
    pub ends_at: OffsetDateTime,
    pub is_all_or_nothing: bool,
    pub settled_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl Fundraiser {
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        self.settled_at.is_none() && self.ends_at > now
    }
}

/// Pledge lifecycle: pending (both timestamps NULL) → paid | cancelled.
/// Paid and cancelled are terminal.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Pledge {
    pub id: Uuid,
    pub fundraiser_id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub created_at: OffsetDateTime,
    pub paid_at: Option<OffsetDateTime>,
    pub cancelled_at: Option<OffsetDateTime>,
}

impl Pledge {
    pub fn is_pending(&self) -> bool {
        self.paid_at.is_none() && self.cancelled_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SubscriptionTier {
    pub id: Uuid,
    pub artist_id: Uuid,
    pub name: String,
    pub min_amount: i64,
    pub currency: String,
    pub allow_variable: bool,
    pub is_default_tier: bool,
    pub interval: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub processor_key: Option<String>,
    pub created_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

/// Immutable ownership record; created exactly once per confirmed payment
/// or redemption.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Purchase {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub item_kind: ItemKindColumn,
    pub item_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub processor_key: Option<String>,
    pub created_at: OffsetDateTime,
}

impl Purchase {
    pub fn item_ref(&self) -> ItemRef {
        ItemRef {
            kind: self.item_kind.0,
            id: self.item_id,
        }
    }
}

/// Newtype so `item_kind` TEXT columns decode straight into [`ItemKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKindColumn(pub ItemKind);

impl TryFrom<String> for ItemKindColumn {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ItemKind::parse(&value)
            .map(ItemKindColumn)
            .ok_or_else(|| format!("unknown item kind '{value}'"))
    }
}

impl From<ItemKind> for ItemKindColumn {
    fn from(kind: ItemKind) -> Self {
        ItemKindColumn(kind)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Tip {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub artist_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub message: Option<String>,
    pub processor_key: String,
    pub created_at: OffsetDateTime,
}

/// Single-use token granting free ownership of a release.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DownloadCode {
    pub id: Uuid,
    pub release_id: Uuid,
    pub code: String,
    pub redeemed_by_user_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}
