//! Download-code redemption
//!
//! The zero-price ownership path: a single-use code becomes a free Purchase
//! without touching the payment processor. The claim on the code row is a
//! conditional update, so two concurrent redemptions produce exactly one
//! winner.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{CommerceError, CommerceResult};
use crate::purchases::PurchaseRegistrar;
use crate::store::{CodeStore, CommerceStore, UserStore};
use crate::types::{ItemRef, Purchase};

pub struct DownloadCodeService {
    store: Arc<dyn CommerceStore>,
    registrar: PurchaseRegistrar,
}

impl DownloadCodeService {
    pub fn new(store: Arc<dyn CommerceStore>) -> Self {
        let registrar = PurchaseRegistrar::new(Arc::clone(&store));
        Self { store, registrar }
    }

    /// Redeem a code against a release.
    ///
    /// Validation happens before any mutation: the code must exist
    /// unredeemed and a purchaser identity must be resolvable. The claim
    /// itself re-checks the unredeemed state, so a concurrent redemption
    /// loses with `CodeNotFound`.
    pub async fn redeem(
        &self,
        release_id: Uuid,
        code: &str,
        authenticated_user_id: Option<Uuid>,
        email: Option<&str>,
    ) -> CommerceResult<Purchase> {
        let code_row = self
            .store
            .find_unredeemed_code(release_id, code)
            .await?
            .ok_or(CommerceError::CodeNotFound)?;

        let purchaser_id = match authenticated_user_id {
            Some(user_id) => user_id,
            None => {
                let email = email
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .ok_or(CommerceError::NoIdentityProvided)?;
                self.store.find_or_create_user_by_email(email).await?.id
            }
        };

        if !self.store.claim_code(code_row.id, purchaser_id).await? {
            // Lost the race to a concurrent redemption.
            return Err(CommerceError::CodeNotFound);
        }

        let registered = self
            .registrar
            .register(
                purchaser_id,
                ItemRef::release(release_id),
                0,
                "usd",
                None,
            )
            .await;

        match registered {
            Ok(purchase) => {
                tracing::info!(
                    code_id = %code_row.id,
                    user_id = %purchaser_id,
                    release_id = %release_id,
                    "Redeemed download code"
                );
                Ok(purchase)
            }
            Err(e) => {
                // Give the code back so the user can retry.
                if let Err(unclaim_err) = self.store.unclaim_code(code_row.id).await {
                    tracing::error!(
                        code_id = %code_row.id,
                        error = %unclaim_err,
                        "Failed to release code claim after registration failure"
                    );
                }
                Err(e)
            }
        }
    }
}
