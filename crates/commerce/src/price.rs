//! Price resolution
//!
//! Pure logic deciding what a purchaser is actually charged. Checked before
//! any checkout session is constructed, and again defensively inside pledge
//! amendment.

use crate::error::{CommerceError, CommerceResult};

/// A validated chargeable amount, in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPrice {
    pub amount: i64,
    /// True only when the item has no minimum and nothing was offered:
    /// the purchase bypasses the payment rail entirely.
    pub is_free: bool,
}

/// Resolve a user-submitted price against an item's minimum price.
///
/// The amount is the submitted price when present, else the minimum, else
/// zero. A submitted price under the minimum fails; paying more than the
/// minimum is always allowed.
pub fn resolve_price(
    submitted: Option<i64>,
    min_price: Option<i64>,
) -> CommerceResult<ResolvedPrice> {
    let minimum = min_price.unwrap_or(0);

    if let Some(offered) = submitted {
        if offered < 0 {
            return Err(CommerceError::InvalidInput(format!(
                "price must be non-negative, got {offered}"
            )));
        }
    }

    let amount = submitted.unwrap_or(minimum);

    if amount < minimum {
        return Err(CommerceError::PriceBelowMinimum {
            submitted: amount,
            minimum,
        });
    }

    Ok(ResolvedPrice {
        amount,
        is_free: minimum == 0 && amount == 0,
    })
}
