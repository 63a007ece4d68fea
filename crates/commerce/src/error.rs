//! Commerce error taxonomy
//!
//! Every variant maps to a single HTTP status so the API layer can stay a
//! thin translation. Validation errors are raised before any external call
//! or mutation; duplicate-delivery and remote already-gone conditions are
//! treated as success upstream of this type and never surface here.

use thiserror::Error;

use crate::processor::ProcessorError;
use crate::store::StoreError;

pub type CommerceResult<T> = Result<T, CommerceError>;

#[derive(Debug, Error)]
pub enum CommerceError {
    /// Submitted price is under the item's (or pledge's backing release's)
    /// minimum price.
    #[error("price {submitted} is below the minimum of {minimum}")]
    PriceBelowMinimum { submitted: i64, minimum: i64 },

    /// The payee has no payment-processor account and the price is non-zero.
    #[error("payee has not completed payment-processor onboarding")]
    PayeeNotOnboarded,

    /// A logged-in user asked to route a free item through the payment rail.
    #[error("free items cannot be purchased through checkout")]
    FreeItemRequiresNoCheckout,

    /// No download code matches, or it has already been consumed.
    #[error("download code not found")]
    CodeNotFound,

    /// Neither an authenticated user nor a guest email was supplied.
    #[error("no purchaser identity provided")]
    NoIdentityProvided,

    /// Referenced release/track/merch/artist/fundraiser does not exist.
    #[error("{0} not found")]
    ItemNotFound(&'static str),

    /// Caller does not own the resource and is not an admin.
    #[error("not authorized")]
    Unauthorized,

    /// Requested merch quantity exceeds remaining stock.
    #[error("requested quantity {requested} exceeds remaining stock {remaining}")]
    OutOfStock { requested: i64, remaining: i64 },

    /// Malformed or out-of-range input caught before any side effect.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The processor rejected or failed the checkout-session request.
    #[error("checkout session creation failed: {0}")]
    CheckoutSessionFailed(String),

    /// Local subscription delete failed.
    #[error("subscription cancellation failed: {0}")]
    SubscriptionCancelFailed(String),

    /// Storage failure.
    #[error("store error: {0}")]
    Store(String),

    /// Unclassified processor failure outside the checkout path.
    #[error("payment processor error: {0}")]
    Processor(String),
}

impl CommerceError {
    /// HTTP status the API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            CommerceError::PriceBelowMinimum { .. }
            | CommerceError::PayeeNotOnboarded
            | CommerceError::FreeItemRequiresNoCheckout
            | CommerceError::NoIdentityProvided
            | CommerceError::OutOfStock { .. }
            | CommerceError::InvalidInput(_) => 400,
            CommerceError::Unauthorized => 401,
            CommerceError::CodeNotFound | CommerceError::ItemNotFound(_) => 404,
            CommerceError::CheckoutSessionFailed(_)
            | CommerceError::SubscriptionCancelFailed(_)
            | CommerceError::Store(_)
            | CommerceError::Processor(_) => 500,
        }
    }
}

impl From<StoreError> for CommerceError {
    fn from(err: StoreError) -> Self {
        CommerceError::Store(err.to_string())
    }
}

impl From<ProcessorError> for CommerceError {
    fn from(err: ProcessorError) -> Self {
        CommerceError::Processor(err.to_string())
    }
}
