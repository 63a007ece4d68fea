//! Pledge lifecycle
//!
//! Pledges back all-or-nothing fundraisers. States: pending (both
//! timestamps null) → paid | cancelled, both terminal. Creation happens on
//! confirmed checkout (see `webhooks`); settlement runs when a fundraiser's
//! end date passes.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{CommerceError, CommerceResult};
use crate::purchases::PurchaseRegistrar;
use crate::store::{CatalogStore, CommerceStore, PledgeStore};
use crate::types::{Fundraiser, ItemRef, Pledge};

/// Result of settling one fundraiser.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SettlementResult {
    pub fundraiser_id: Uuid,
    pub goal_met: bool,
    pub pledges_paid: u64,
    pub pledges_cancelled: u64,
}

pub struct PledgeService {
    store: Arc<dyn CommerceStore>,
    registrar: PurchaseRegistrar,
}

impl PledgeService {
    pub fn new(store: Arc<dyn CommerceStore>) -> Self {
        let registrar = PurchaseRegistrar::new(Arc::clone(&store));
        Self { store, registrar }
    }

    /// Record a pending pledge from a confirmed checkout. Duplicate
    /// confirmations return the existing live pledge.
    pub async fn create_from_checkout(
        &self,
        fundraiser_id: Uuid,
        user_id: Uuid,
        amount: i64,
        currency: &str,
    ) -> CommerceResult<Pledge> {
        if self.store.find_fundraiser(fundraiser_id).await?.is_none() {
            return Err(CommerceError::ItemNotFound("fundraiser"));
        }

        let pledge = self
            .store
            .insert_pledge_idempotent(fundraiser_id, user_id, amount, currency)
            .await?;

        tracing::info!(
            pledge_id = %pledge.id,
            fundraiser_id = %fundraiser_id,
            user_id = %user_id,
            amount = amount,
            "Recorded pledge"
        );

        Ok(pledge)
    }

    /// Change the amount of the caller's pending pledge.
    ///
    /// No pending pledge is a silent no-op. An amount under the backing
    /// releases' minimum price fails before anything is written; the update
    /// itself is guarded on the pending state so a concurrent cancel cannot
    /// be overwritten.
    pub async fn amend(
        &self,
        fundraiser_id: Uuid,
        pledger_id: Uuid,
        new_amount: i64,
    ) -> CommerceResult<Option<Pledge>> {
        if new_amount < 0 {
            return Err(CommerceError::InvalidInput(format!(
                "pledge amount must be non-negative, got {new_amount}"
            )));
        }

        let Some(pledge) = self
            .store
            .find_live_pledge(fundraiser_id, pledger_id)
            .await?
        else {
            return Ok(None);
        };
        if !pledge.is_pending() {
            // Paid pledges are immutable.
            return Ok(None);
        }

        let minimum = self.backing_min_price(fundraiser_id).await?;
        if new_amount < minimum {
            return Err(CommerceError::PriceBelowMinimum {
                submitted: new_amount,
                minimum,
            });
        }

        let amended = self
            .store
            .amend_pledge_amount(pledge.id, new_amount)
            .await?;
        if !amended {
            // Lost a race against cancel or settlement; nothing changed.
            tracing::info!(pledge_id = %pledge.id, "Pledge amend skipped, no longer pending");
            return Ok(None);
        }

        Ok(Some(Pledge {
            amount: new_amount,
            ..pledge
        }))
    }

    /// Amend addressed by a backing release instead of the fundraiser.
    pub async fn amend_by_release(
        &self,
        release_id: Uuid,
        pledger_id: Uuid,
        new_amount: i64,
    ) -> CommerceResult<Option<Pledge>> {
        let fundraiser = self.live_fundraiser_for(release_id).await?;
        self.amend(fundraiser.id, pledger_id, new_amount).await
    }

    /// Cancel addressed by a backing release instead of the fundraiser.
    pub async fn cancel_by_release(
        &self,
        release_id: Uuid,
        pledger_id: Uuid,
    ) -> CommerceResult<()> {
        let fundraiser = self.live_fundraiser_for(release_id).await?;
        self.cancel(fundraiser.id, pledger_id).await
    }

    async fn live_fundraiser_for(&self, release_id: Uuid) -> CommerceResult<Fundraiser> {
        if self.store.find_release(release_id).await?.is_none() {
            return Err(CommerceError::ItemNotFound("release"));
        }
        self.store
            .live_fundraiser_for_release(release_id, OffsetDateTime::now_utc())
            .await?
            .ok_or(CommerceError::ItemNotFound("fundraiser"))
    }

    /// Cancel the caller's pledge. Idempotent: no pledge, an already
    /// cancelled pledge, or a paid pledge all succeed without change.
    pub async fn cancel(&self, fundraiser_id: Uuid, pledger_id: Uuid) -> CommerceResult<()> {
        let Some(pledge) = self
            .store
            .find_live_pledge(fundraiser_id, pledger_id)
            .await?
        else {
            return Ok(());
        };

        let cancelled = self
            .store
            .cancel_pledge(pledge.id, OffsetDateTime::now_utc())
            .await?;
        if cancelled {
            tracing::info!(
                pledge_id = %pledge.id,
                fundraiser_id = %fundraiser_id,
                "Cancelled pledge"
            );
        }

        Ok(())
    }

    /// Settle every fundraiser whose end date has passed. Each fundraiser is
    /// claimed exactly once, so concurrent settlement runs cannot
    /// double-settle.
    pub async fn settle_due_fundraisers(&self) -> CommerceResult<Vec<SettlementResult>> {
        let now = OffsetDateTime::now_utc();
        let due = self.store.due_fundraisers(now).await?;

        let mut results = Vec::new();
        for fundraiser in due {
            match self.settle(&fundraiser, now).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {} // another settler claimed it
                Err(e) => {
                    tracing::error!(
                        fundraiser_id = %fundraiser.id,
                        error = %e,
                        "Fundraiser settlement failed"
                    );
                }
            }
        }

        Ok(results)
    }

    /// Settle one fundraiser: goal met → all pending pledges become paid and
    /// each pledger receives their backing releases; goal missed on an
    /// all-or-nothing campaign → all pending pledges are cancelled.
    async fn settle(
        &self,
        fundraiser: &Fundraiser,
        now: OffsetDateTime,
    ) -> CommerceResult<Option<SettlementResult>> {
        let total = self.store.pending_pledge_total(fundraiser.id).await?;
        let goal_met = total >= fundraiser.goal_amount;

        if !self
            .store
            .claim_fundraiser_settlement(fundraiser.id, now)
            .await?
        {
            return Ok(None);
        }

        let result = if goal_met {
            let paid = self
                .store
                .mark_pending_pledges_paid(fundraiser.id, now)
                .await?;
            let releases = self.store.fundraiser_releases(fundraiser.id).await?;

            for pledge in &paid {
                for release in &releases {
                    // Deterministic key makes re-runs after a partial
                    // failure idempotent.
                    let key = format!("pledge-{}", pledge.id);
                    self.registrar
                        .register(
                            pledge.user_id,
                            ItemRef::release(release.id),
                            pledge.amount,
                            &pledge.currency,
                            Some(&key),
                        )
                        .await?;
                }
            }

            SettlementResult {
                fundraiser_id: fundraiser.id,
                goal_met: true,
                pledges_paid: paid.len() as u64,
                pledges_cancelled: 0,
            }
        } else {
            let cancelled = self
                .store
                .cancel_pending_pledges(fundraiser.id, now)
                .await?;

            SettlementResult {
                fundraiser_id: fundraiser.id,
                goal_met: false,
                pledges_paid: 0,
                pledges_cancelled: cancelled,
            }
        };

        tracing::info!(
            fundraiser_id = %fundraiser.id,
            goal_met = result.goal_met,
            pledges_paid = result.pledges_paid,
            pledges_cancelled = result.pledges_cancelled,
            "Settled fundraiser"
        );

        Ok(Some(result))
    }

    /// The minimum a pledge may be amended to: the highest minimum price
    /// among the fundraiser's backing releases.
    async fn backing_min_price(&self, fundraiser_id: Uuid) -> CommerceResult<i64> {
        let releases = self.store.fundraiser_releases(fundraiser_id).await?;
        Ok(releases.iter().map(|r| r.min_price).max().unwrap_or(0))
    }
}
