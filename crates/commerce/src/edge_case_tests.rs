// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Commerce Core
//!
//! Exercises the boundary conditions and race conditions in:
//! - Checkout session construction
//! - Pledge lifecycle and fundraiser settlement
//! - Purchase registration idempotency
//! - Download code redemption races
//! - Subscription cancellation and upstream tolerance
//! - Webhook-driven purchase materialisation

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::checkout::{meta, CheckoutService, MerchPurchaseArgs};
use crate::codes::DownloadCodeService;
use crate::error::CommerceError;
use crate::pledges::PledgeService;
use crate::processor::{
    CancelOutcome, CheckoutSessionRef, CheckoutSessionSpec, PaymentProcessor, ProcessorError,
    ProcessorResult,
};
use crate::purchases::PurchaseRegistrar;
use crate::store::{
    CatalogStore, CodeStore, CommerceStore, EventLedgerStore, MemoryCommerceStore, PledgeStore,
    PurchaseStore, TipStore, UserStore,
};
use crate::subscriptions::{ensure_follow, SubscriptionService};
use crate::types::{ItemKind, ItemRef};
use crate::webhooks::WebhookHandler;

/// What the stub processor should answer to cancellation requests.
#[derive(Clone, Copy, PartialEq, Eq)]
enum CancelResponse {
    Cancelled,
    AlreadyGone,
    Fail,
}

/// Records every request; never talks to a network.
struct StubProcessor {
    sessions: Mutex<Vec<CheckoutSessionSpec>>,
    cancel_calls: Mutex<Vec<(Option<String>, String)>>,
    cancel_response: Mutex<CancelResponse>,
}

impl StubProcessor {
    fn new() -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
            cancel_calls: Mutex::new(Vec::new()),
            cancel_response: Mutex::new(CancelResponse::Cancelled),
        }
    }

    fn set_cancel_response(&self, response: CancelResponse) {
        *self.cancel_response.lock().unwrap() = response;
    }

    fn sessions(&self) -> Vec<CheckoutSessionSpec> {
        self.sessions.lock().unwrap().clone()
    }

    fn cancel_calls(&self) -> Vec<(Option<String>, String)> {
        self.cancel_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentProcessor for StubProcessor {
    async fn create_checkout_session(
        &self,
        spec: CheckoutSessionSpec,
    ) -> ProcessorResult<CheckoutSessionRef> {
        self.sessions.lock().unwrap().push(spec);
        Ok(CheckoutSessionRef {
            id: "cs_test_1".into(),
            redirect_url: "https://checkout.example/cs_test_1".into(),
        })
    }

    async fn cancel_subscription(
        &self,
        payee_account: Option<&str>,
        processor_key: &str,
    ) -> ProcessorResult<CancelOutcome> {
        self.cancel_calls
            .lock()
            .unwrap()
            .push((payee_account.map(String::from), processor_key.to_string()));
        match *self.cancel_response.lock().unwrap() {
            CancelResponse::Cancelled => Ok(CancelOutcome::Cancelled),
            CancelResponse::AlreadyGone => Ok(CancelOutcome::AlreadyGone),
            CancelResponse::Fail => Err(ProcessorError::Api("processor unavailable".into())),
        }
    }
}

struct Harness {
    store: Arc<MemoryCommerceStore>,
    processor: Arc<StubProcessor>,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryCommerceStore::new()),
            processor: Arc::new(StubProcessor::new()),
        }
    }

    fn checkout(&self) -> CheckoutService {
        CheckoutService::new(
            self.store.clone() as Arc<dyn CommerceStore>,
            self.processor.clone() as Arc<dyn PaymentProcessor>,
            7,
        )
    }

    fn pledges(&self) -> PledgeService {
        PledgeService::new(self.store.clone() as Arc<dyn CommerceStore>)
    }

    fn registrar(&self) -> PurchaseRegistrar {
        PurchaseRegistrar::new(self.store.clone() as Arc<dyn CommerceStore>)
    }

    fn codes(&self) -> DownloadCodeService {
        DownloadCodeService::new(self.store.clone() as Arc<dyn CommerceStore>)
    }

    fn subscriptions(&self) -> SubscriptionService {
        SubscriptionService::new(
            self.store.clone() as Arc<dyn CommerceStore>,
            self.processor.clone() as Arc<dyn PaymentProcessor>,
        )
    }

    fn webhooks(&self) -> WebhookHandler {
        WebhookHandler::new(
            self.store.clone() as Arc<dyn CommerceStore>,
            self.processor.clone() as Arc<dyn PaymentProcessor>,
            "whsec_test".into(),
        )
    }
}

mod checkout_tests {
    use super::*;

    #[tokio::test]
    async fn test_merch_option_price_added_to_session_amount() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let listing = h
            .store
            .seed_merch(&artist, 1_000, 10, &[("XL", 200)], &[("US", 0)]);

        let session = h
            .checkout()
            .merch_checkout(
                listing.item.id,
                None,
                MerchPurchaseArgs {
                    email: Some("buyer@example.com".into()),
                    merch_option_ids: vec![listing.options[0].id],
                    shipping_destination_id: listing.shipping_destinations[0].id,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(session.redirect_url, "https://checkout.example/cs_test_1");
        let specs = h.processor.sessions();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].amount, 1_200, "min 1000 + XL option 200");
    }

    #[tokio::test]
    async fn test_unknown_merch_option_excluded_from_amount() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let listing = h
            .store
            .seed_merch(&artist, 1_000, 10, &[("XL", 200)], &[("US", 0)]);

        h.checkout()
            .merch_checkout(
                listing.item.id,
                None,
                MerchPurchaseArgs {
                    email: Some("buyer@example.com".into()),
                    merch_option_ids: vec![Uuid::new_v4()],
                    shipping_destination_id: listing.shipping_destinations[0].id,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(h.processor.sessions()[0].amount, 1_000);
    }

    #[tokio::test]
    async fn test_shipping_cost_added_once_regardless_of_quantity() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let listing = h.store.seed_merch(&artist, 1_000, 10, &[], &[("EU", 350)]);

        h.checkout()
            .merch_checkout(
                listing.item.id,
                None,
                MerchPurchaseArgs {
                    email: Some("buyer@example.com".into()),
                    quantity: Some(3),
                    shipping_destination_id: listing.shipping_destinations[0].id,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(h.processor.sessions()[0].amount, 3 * 1_000 + 350);
    }

    #[tokio::test]
    async fn test_merch_quantity_over_stock_rejected() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let listing = h.store.seed_merch(&artist, 1_000, 2, &[], &[("US", 0)]);

        let err = h
            .checkout()
            .merch_checkout(
                listing.item.id,
                None,
                MerchPurchaseArgs {
                    email: Some("buyer@example.com".into()),
                    quantity: Some(3),
                    shipping_destination_id: listing.shipping_destinations[0].id,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CommerceError::OutOfStock { .. }));
        assert!(h.processor.sessions().is_empty(), "no session issued");
    }

    #[tokio::test]
    async fn test_unknown_shipping_destination_rejected() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let listing = h.store.seed_merch(&artist, 1_000, 5, &[], &[("US", 0)]);

        let err = h
            .checkout()
            .merch_checkout(
                listing.item.id,
                None,
                MerchPurchaseArgs {
                    email: Some("buyer@example.com".into()),
                    shipping_destination_id: Uuid::new_v4(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CommerceError::ItemNotFound(_)));
    }

    #[tokio::test]
    async fn test_price_below_minimum_rejected_before_processor_call() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, 500);

        let err = h
            .checkout()
            .release_checkout(release.id, None, Some(400), Some("buyer@example.com".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, CommerceError::PriceBelowMinimum { .. }));
        assert!(h.processor.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_authenticated_free_catalogue_rejected() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        // No published releases: catalogue minimum resolves to zero.
        let buyer = h.store.seed_user("fan@example.com", None);

        let err = h
            .checkout()
            .catalogue_checkout(artist.id, Some(buyer.id), None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, CommerceError::FreeItemRequiresNoCheckout));
    }

    #[tokio::test]
    async fn test_guest_without_email_rejected() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, 500);

        let err = h
            .checkout()
            .release_checkout(release.id, None, None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, CommerceError::NoIdentityProvided));
    }

    #[tokio::test]
    async fn test_payee_without_processor_account_rejected() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", None);
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, 500);

        let err = h
            .checkout()
            .release_checkout(release.id, None, None, Some("buyer@example.com".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, CommerceError::PayeeNotOnboarded));
    }

    #[tokio::test]
    async fn test_platform_fee_is_percentage_of_amount() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, 1_000);

        h.checkout()
            .release_checkout(release.id, None, None, Some("buyer@example.com".into()))
            .await
            .unwrap();

        let specs = h.processor.sessions();
        assert_eq!(specs[0].application_fee, 70, "7% of 1000");
        assert_eq!(specs[0].payee_account.as_deref(), Some("acct_123"));
    }

    #[tokio::test]
    async fn test_checkout_ensures_follow_for_authenticated_purchaser() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, 500);
        let buyer = h.store.seed_user("fan@example.com", None);

        h.checkout()
            .release_checkout(release.id, Some(buyer.id), Some(500), None)
            .await
            .unwrap();

        // The follow is fire-and-forget; give the spawned task a beat.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(h.store.subscription_count_for(buyer.id), 1);
    }

    #[tokio::test]
    async fn test_fundraiser_backed_release_carries_fundraiser_metadata() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, 500);
        let fundraiser = h.store.seed_fundraiser(
            &artist,
            &[&release],
            100_000,
            OffsetDateTime::now_utc() + Duration::days(30),
        );

        h.checkout()
            .release_checkout(release.id, None, None, Some("backer@example.com".into()))
            .await
            .unwrap();

        let specs = h.processor.sessions();
        assert_eq!(
            specs[0].metadata.get(meta::FUNDRAISER_ID),
            Some(&fundraiser.id.to_string())
        );
    }
}

mod pledge_tests {
    use super::*;

    async fn seeded_pledge(h: &Harness, min_price: i64, amount: i64) -> (Uuid, Uuid, Uuid) {
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, min_price);
        let fundraiser = h.store.seed_fundraiser(
            &artist,
            &[&release],
            50_000,
            OffsetDateTime::now_utc() + Duration::days(10),
        );
        let backer = h.store.seed_user("backer@example.com", None);
        let pledge = h
            .pledges()
            .create_from_checkout(fundraiser.id, backer.id, amount, "usd")
            .await
            .unwrap();
        (fundraiser.id, backer.id, pledge.id)
    }

    #[tokio::test]
    async fn test_amend_below_minimum_rejected_and_amount_unchanged() {
        let h = Harness::new();
        let (fundraiser_id, backer_id, pledge_id) = seeded_pledge(&h, 500, 1_000).await;

        let err = h
            .pledges()
            .amend(fundraiser_id, backer_id, 400)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CommerceError::PriceBelowMinimum {
                submitted: 400,
                minimum: 500
            }
        ));
        assert_eq!(h.store.get_pledge(pledge_id).unwrap().amount, 1_000);
    }

    #[tokio::test]
    async fn test_amend_at_minimum_succeeds() {
        let h = Harness::new();
        let (fundraiser_id, backer_id, pledge_id) = seeded_pledge(&h, 500, 1_000).await;

        let amended = h
            .pledges()
            .amend(fundraiser_id, backer_id, 500)
            .await
            .unwrap();

        assert_eq!(amended.unwrap().amount, 500);
        assert_eq!(h.store.get_pledge(pledge_id).unwrap().amount, 500);
    }

    #[tokio::test]
    async fn test_amend_without_pledge_is_noop() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", None);
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, 500);
        let fundraiser = h.store.seed_fundraiser(
            &artist,
            &[&release],
            50_000,
            OffsetDateTime::now_utc() + Duration::days(10),
        );
        let someone = h.store.seed_user("someone@example.com", None);

        let amended = h
            .pledges()
            .amend(fundraiser.id, someone.id, 9_999)
            .await
            .unwrap();

        assert!(amended.is_none());
    }

    #[tokio::test]
    async fn test_cancel_twice_is_idempotent() {
        let h = Harness::new();
        let (fundraiser_id, backer_id, pledge_id) = seeded_pledge(&h, 500, 1_000).await;

        h.pledges().cancel(fundraiser_id, backer_id).await.unwrap();
        let first_cancelled_at = h.store.get_pledge(pledge_id).unwrap().cancelled_at;
        assert!(first_cancelled_at.is_some());

        h.pledges().cancel(fundraiser_id, backer_id).await.unwrap();
        assert_eq!(
            h.store.get_pledge(pledge_id).unwrap().cancelled_at,
            first_cancelled_at,
            "second cancel must not move the timestamp"
        );
    }

    #[tokio::test]
    async fn test_duplicate_checkout_creates_single_pledge() {
        let h = Harness::new();
        let (fundraiser_id, backer_id, pledge_id) = seeded_pledge(&h, 500, 1_000).await;

        let again = h
            .pledges()
            .create_from_checkout(fundraiser_id, backer_id, 1_000, "usd")
            .await
            .unwrap();

        assert_eq!(again.id, pledge_id);
    }

    #[tokio::test]
    async fn test_settlement_pays_pledges_when_goal_met() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, 500);
        let fundraiser = h.store.seed_fundraiser(
            &artist,
            &[&release],
            1_500,
            OffsetDateTime::now_utc() - Duration::days(1),
        );
        let backer_a = h.store.seed_user("a@example.com", None);
        let backer_b = h.store.seed_user("b@example.com", None);
        let pledges = h.pledges();
        pledges
            .create_from_checkout(fundraiser.id, backer_a.id, 1_000, "usd")
            .await
            .unwrap();
        pledges
            .create_from_checkout(fundraiser.id, backer_b.id, 600, "usd")
            .await
            .unwrap();

        let results = pledges.settle_due_fundraisers().await.unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].goal_met);
        assert_eq!(results[0].pledges_paid, 2);
        // Each paid pledger now owns the backing release.
        assert_eq!(h.store.purchase_count(), 2);

        // A second run finds nothing to settle.
        let again = pledges.settle_due_fundraisers().await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_settlement_cancels_pledges_when_goal_missed() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", None);
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, 500);
        let fundraiser = h.store.seed_fundraiser(
            &artist,
            &[&release],
            100_000,
            OffsetDateTime::now_utc() - Duration::days(1),
        );
        let backer = h.store.seed_user("a@example.com", None);
        let pledges = h.pledges();
        let pledge = pledges
            .create_from_checkout(fundraiser.id, backer.id, 1_000, "usd")
            .await
            .unwrap();

        let results = pledges.settle_due_fundraisers().await.unwrap();

        assert!(!results[0].goal_met);
        assert_eq!(results[0].pledges_cancelled, 1);
        assert!(h.store.get_pledge(pledge.id).unwrap().cancelled_at.is_some());
        assert_eq!(h.store.purchase_count(), 0);
    }
}

mod registrar_tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_registration_creates_single_purchase() {
        let h = Harness::new();
        let buyer = h.store.seed_user("buyer@example.com", None);
        let item = ItemRef::release(Uuid::new_v4());
        let registrar = h.registrar();

        let first = registrar
            .register(buyer.id, item, 1_000, "usd", Some("pi_123"))
            .await
            .unwrap();
        let second = registrar
            .register(buyer.id, item, 1_000, "usd", Some("pi_123"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(h.store.purchase_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_registration_creates_single_purchase() {
        use tokio::sync::Barrier;

        let h = Harness::new();
        let buyer = h.store.seed_user("buyer@example.com", None);
        let item = ItemRef::release(Uuid::new_v4());
        let registrar = Arc::new(h.registrar());

        let barrier = Arc::new(Barrier::new(4));
        let mut handles = vec![];
        for _ in 0..4 {
            let registrar = Arc::clone(&registrar);
            let barrier = Arc::clone(&barrier);
            let buyer_id = buyer.id;
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                registrar
                    .register(buyer_id, item, 1_000, "usd", Some("pi_123"))
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(h.store.purchase_count(), 1);
    }

    #[tokio::test]
    async fn test_distinct_processor_keys_create_distinct_purchases() {
        let h = Harness::new();
        let buyer = h.store.seed_user("buyer@example.com", None);
        let item = ItemRef::merch(Uuid::new_v4());
        let registrar = h.registrar();

        registrar
            .register(buyer.id, item, 1_000, "usd", Some("pi_1"))
            .await
            .unwrap();
        registrar
            .register(buyer.id, item, 1_000, "usd", Some("pi_2"))
            .await
            .unwrap();

        assert_eq!(h.store.purchase_count(), 2);
    }

    #[tokio::test]
    async fn test_ownership_check_after_registration() {
        let h = Harness::new();
        let buyer = h.store.seed_user("buyer@example.com", None);
        let item = ItemRef::release(Uuid::new_v4());
        let registrar = h.registrar();

        assert!(!registrar.owns(buyer.id, item).await.unwrap());
        registrar
            .register(buyer.id, item, 0, "usd", None)
            .await
            .unwrap();
        assert!(registrar.owns(buyer.id, item).await.unwrap());
    }
}

mod code_tests {
    use super::*;

    #[tokio::test]
    async fn test_guest_redemption_creates_user_and_free_purchase() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", None);
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, 1_000);
        let code = h.store.seed_code(&release, "SECRET-1");

        let purchase = h
            .codes()
            .redeem(release.id, "SECRET-1", None, Some("a@b.com"))
            .await
            .unwrap();

        assert_eq!(purchase.amount, 0);
        assert_eq!(purchase.item_ref(), ItemRef::release(release.id));
        assert!(purchase.processor_key.is_none());

        let user = h
            .store
            .find_or_create_user_by_email("a@b.com")
            .await
            .unwrap();
        assert_eq!(purchase.user_id, user.id);
        assert_eq!(
            h.store.get_code(code.id).unwrap().redeemed_by_user_id,
            Some(user.id)
        );
    }

    #[tokio::test]
    async fn test_redemption_without_identity_rejected() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", None);
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, 1_000);
        h.store.seed_code(&release, "SECRET-1");

        let err = h
            .codes()
            .redeem(release.id, "SECRET-1", None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, CommerceError::NoIdentityProvided));
        // Validation failed before any mutation: the code is still live.
        assert!(h
            .store
            .find_unredeemed_code(release.id, "SECRET-1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_unknown_code_rejected() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", None);
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, 1_000);

        let err = h
            .codes()
            .redeem(release.id, "NOPE", None, Some("a@b.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, CommerceError::CodeNotFound));
    }

    #[tokio::test]
    async fn test_second_redemption_of_consumed_code_rejected() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", None);
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, 1_000);
        h.store.seed_code(&release, "SECRET-1");
        let codes = h.codes();

        codes
            .redeem(release.id, "SECRET-1", None, Some("first@example.com"))
            .await
            .unwrap();
        let err = codes
            .redeem(release.id, "SECRET-1", None, Some("second@example.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, CommerceError::CodeNotFound));
        assert_eq!(h.store.purchase_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_redemption_has_exactly_one_winner() {
        use tokio::sync::Barrier;

        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", None);
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, 1_000);
        h.store.seed_code(&release, "SECRET-1");

        let codes = Arc::new(h.codes());
        let barrier = Arc::new(Barrier::new(2));
        let mut handles = vec![];
        for i in 0..2 {
            let codes = Arc::clone(&codes);
            let barrier = Arc::clone(&barrier);
            let release_id = release.id;
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                let email = format!("racer{i}@example.com");
                codes
                    .redeem(release_id, "SECRET-1", None, Some(email.as_str()))
                    .await
            }));
        }

        let mut ok = 0;
        let mut not_found = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(CommerceError::CodeNotFound) => not_found += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(ok, 1, "exactly one winner");
        assert_eq!(not_found, 1, "exactly one loser");
        assert_eq!(h.store.purchase_count(), 1);
    }
}

mod subscription_tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_by_non_owner_rejected() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let tier = h.store.seed_tier(&artist, 500);
        let subscriber = h.store.seed_user("fan@example.com", None);
        let stranger = h.store.seed_user("stranger@example.com", None);
        let subscription = h
            .store
            .seed_subscription(&subscriber, &tier, 500, Some("sub_123"));

        let err = h
            .subscriptions()
            .cancel(subscription.id, stranger.id, false)
            .await
            .unwrap_err();

        assert!(matches!(err, CommerceError::Unauthorized));
        assert!(h
            .store
            .get_subscription(subscription.id)
            .unwrap()
            .deleted_at
            .is_none());
    }

    #[tokio::test]
    async fn test_admin_can_cancel_any_subscription() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let tier = h.store.seed_tier(&artist, 500);
        let subscriber = h.store.seed_user("fan@example.com", None);
        let admin = h.store.seed_admin("admin@example.com");
        let subscription = h
            .store
            .seed_subscription(&subscriber, &tier, 500, Some("sub_123"));

        h.subscriptions()
            .cancel(subscription.id, admin.id, true)
            .await
            .unwrap();

        assert!(h
            .store
            .get_subscription(subscription.id)
            .unwrap()
            .deleted_at
            .is_some());
    }

    #[tokio::test]
    async fn test_upstream_cancel_scoped_to_payee_account() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let tier = h.store.seed_tier(&artist, 500);
        let subscriber = h.store.seed_user("fan@example.com", None);
        let subscription = h
            .store
            .seed_subscription(&subscriber, &tier, 500, Some("sub_123"));

        h.subscriptions()
            .cancel(subscription.id, subscriber.id, false)
            .await
            .unwrap();

        let calls = h.processor.cancel_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.as_deref(), Some("acct_123"));
        assert_eq!(calls[0].1, "sub_123");
    }

    #[tokio::test]
    async fn test_upstream_already_cancelled_still_deletes_locally() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let tier = h.store.seed_tier(&artist, 500);
        let subscriber = h.store.seed_user("fan@example.com", None);
        let subscription = h
            .store
            .seed_subscription(&subscriber, &tier, 500, Some("sub_gone"));
        h.processor.set_cancel_response(CancelResponse::AlreadyGone);

        h.subscriptions()
            .cancel(subscription.id, subscriber.id, false)
            .await
            .unwrap();

        assert!(h
            .store
            .get_subscription(subscription.id)
            .unwrap()
            .deleted_at
            .is_some());
    }

    #[tokio::test]
    async fn test_upstream_failure_never_blocks_local_delete() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let tier = h.store.seed_tier(&artist, 500);
        let subscriber = h.store.seed_user("fan@example.com", None);
        let subscription = h
            .store
            .seed_subscription(&subscriber, &tier, 500, Some("sub_123"));
        h.processor.set_cancel_response(CancelResponse::Fail);

        h.subscriptions()
            .cancel(subscription.id, subscriber.id, false)
            .await
            .unwrap();

        assert!(h
            .store
            .get_subscription(subscription.id)
            .unwrap()
            .deleted_at
            .is_some());
    }

    #[tokio::test]
    async fn test_follow_subscription_without_upstream_key_skips_processor() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", Some("acct_123"));
        let artist = h.store.seed_artist(&owner);
        let tier = h.store.seed_tier(&artist, 0);
        let subscriber = h.store.seed_user("fan@example.com", None);
        let subscription = h.store.seed_subscription(&subscriber, &tier, 0, None);

        h.subscriptions()
            .cancel(subscription.id, subscriber.id, false)
            .await
            .unwrap();

        assert!(h.processor.cancel_calls().is_empty());
        assert!(h
            .store
            .get_subscription(subscription.id)
            .unwrap()
            .deleted_at
            .is_some());
    }

    #[tokio::test]
    async fn test_ensure_follow_is_idempotent() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", None);
        let artist = h.store.seed_artist(&owner);
        let fan = h.store.seed_user("fan@example.com", None);

        let first = ensure_follow(h.store.as_ref(), fan.id, artist.id)
            .await
            .unwrap();
        let second = ensure_follow(h.store.as_ref(), fan.id, artist.id)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.amount, 0);
        assert_eq!(h.store.subscription_count_for(fan.id), 1);
    }

    #[tokio::test]
    async fn test_reconcile_upstream_cancelled_soft_deletes_matching_row() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", None);
        let artist = h.store.seed_artist(&owner);
        let tier = h.store.seed_tier(&artist, 500);
        let subscriber = h.store.seed_user("fan@example.com", None);
        let subscription = h
            .store
            .seed_subscription(&subscriber, &tier, 500, Some("sub_123"));

        let service = h.subscriptions();
        service.reconcile_upstream_cancelled("sub_123").await.unwrap();
        assert!(h
            .store
            .get_subscription(subscription.id)
            .unwrap()
            .deleted_at
            .is_some());

        // Unknown keys are a quiet no-op.
        service.reconcile_upstream_cancelled("sub_unknown").await.unwrap();
    }
}

mod webhook_tests {
    use super::*;

    fn metadata(entries: &[(&str, String)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_completed_release_checkout_registers_purchase() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", None);
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, 500);
        let buyer = h.store.seed_user("buyer@example.com", None);

        h.webhooks()
            .handle_checkout_completed(
                "pi_123",
                700,
                "usd",
                &metadata(&[
                    (meta::KIND, ItemKind::Release.as_str().to_string()),
                    (meta::ITEM_ID, release.id.to_string()),
                    (meta::ARTIST_ID, artist.id.to_string()),
                    (meta::USER_ID, buyer.id.to_string()),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(h.store.purchase_count(), 1);
        assert!(h
            .store
            .user_owns_item(buyer.id, ItemRef::release(release.id))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_completed_fundraiser_checkout_creates_pending_pledge() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", None);
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, 500);
        let fundraiser = h.store.seed_fundraiser(
            &artist,
            &[&release],
            50_000,
            OffsetDateTime::now_utc() + Duration::days(30),
        );
        let backer = h.store.seed_user("backer@example.com", None);

        h.webhooks()
            .handle_checkout_completed(
                "pi_123",
                1_000,
                "usd",
                &metadata(&[
                    (meta::KIND, ItemKind::Release.as_str().to_string()),
                    (meta::ITEM_ID, release.id.to_string()),
                    (meta::ARTIST_ID, artist.id.to_string()),
                    (meta::USER_ID, backer.id.to_string()),
                    (meta::FUNDRAISER_ID, fundraiser.id.to_string()),
                ]),
            )
            .await
            .unwrap();

        // Money is promised, not owned: a pledge, no purchase.
        assert_eq!(h.store.purchase_count(), 0);
        let pledge = h
            .store
            .find_live_pledge(fundraiser.id, backer.id)
            .await
            .unwrap()
            .unwrap();
        assert!(pledge.is_pending());
        assert_eq!(pledge.amount, 1_000);
    }

    #[tokio::test]
    async fn test_completed_guest_checkout_finds_or_creates_user() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", None);
        let artist = h.store.seed_artist(&owner);
        let release = h.store.seed_release(&artist, 500);

        h.webhooks()
            .handle_checkout_completed(
                "pi_123",
                500,
                "usd",
                &metadata(&[
                    (meta::KIND, ItemKind::Release.as_str().to_string()),
                    (meta::ITEM_ID, release.id.to_string()),
                    (meta::ARTIST_ID, artist.id.to_string()),
                    (meta::EMAIL, "guest@example.com".to_string()),
                ]),
            )
            .await
            .unwrap();

        let guest = h
            .store
            .find_or_create_user_by_email("guest@example.com")
            .await
            .unwrap();
        assert!(h
            .store
            .user_owns_item(guest.id, ItemRef::release(release.id))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_completed_merch_checkout_decrements_stock() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", None);
        let artist = h.store.seed_artist(&owner);
        let listing = h.store.seed_merch(&artist, 1_000, 5, &[], &[("US", 0)]);
        let buyer = h.store.seed_user("buyer@example.com", None);

        h.webhooks()
            .handle_checkout_completed(
                "pi_123",
                2_000,
                "usd",
                &metadata(&[
                    (meta::KIND, ItemKind::Merch.as_str().to_string()),
                    (meta::ITEM_ID, listing.item.id.to_string()),
                    (meta::ARTIST_ID, artist.id.to_string()),
                    (meta::USER_ID, buyer.id.to_string()),
                    (meta::QUANTITY, "2".to_string()),
                ]),
            )
            .await
            .unwrap();

        let remaining = h
            .store
            .find_merch(listing.item.id)
            .await
            .unwrap()
            .unwrap()
            .item
            .quantity_remaining;
        assert_eq!(remaining, 3);
    }

    #[tokio::test]
    async fn test_completed_tip_checkout_records_tip_idempotently() {
        let h = Harness::new();
        let owner = h.store.seed_user("artist@example.com", None);
        let artist = h.store.seed_artist(&owner);
        let fan = h.store.seed_user("fan@example.com", None);
        let webhooks = h.webhooks();

        let md = metadata(&[
            (meta::KIND, "tip".to_string()),
            (meta::ARTIST_ID, artist.id.to_string()),
            (meta::USER_ID, fan.id.to_string()),
            (meta::MESSAGE, "love the record".to_string()),
        ]);
        webhooks
            .handle_checkout_completed("pi_tip", 500, "usd", &md)
            .await
            .unwrap();
        webhooks
            .handle_checkout_completed("pi_tip", 500, "usd", &md)
            .await
            .unwrap();

        let tips = h.store.list_tips(0, 10).await.unwrap();
        assert_eq!(tips.len(), 1);
        assert_eq!(tips[0].amount, 500);
        assert_eq!(tips[0].message.as_deref(), Some("love the record"));
    }

    #[tokio::test]
    async fn test_event_claim_blocks_duplicate_delivery() {
        let h = Harness::new();

        assert!(h
            .store
            .claim_event("evt_1", "checkout.session.completed")
            .await
            .unwrap());
        assert!(!h
            .store
            .claim_event("evt_1", "checkout.session.completed")
            .await
            .unwrap());

        // A failed event releases the claim for redelivery.
        h.store
            .finish_event("evt_1", false, Some("boom"))
            .await
            .unwrap();
        assert!(h
            .store
            .claim_event("evt_1", "checkout.session.completed")
            .await
            .unwrap());
    }
}
