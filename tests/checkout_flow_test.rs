use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use storefront::app::ports::{EntitlementStore, PaymentProvider};
use storefront::app::retry::RetryPolicy;
use storefront::app::{CheckoutOrchestrator, ConfirmationOutcome, OrderLedger};
use storefront::domain::{
    Book, CartItem, ConfirmationPayload, Entitlement, OrderStatus, PaymentConfirmation, PaymentIntent,
};
use storefront::error::StorefrontError;
use storefront::infra::in_memory::{InMemoryCatalog, InMemoryEntitlementStore, InMemoryOrderStore};
use storefront::infra::manual_provider::{sign_manual_event, ManualProvider};
use uuid::Uuid;

const SECRET: &str = "whsec_test";

fn book(id: &str, price: Decimal) -> Book {
    Book {
        id: id.into(),
        title: None,
        price,
        file_ref: format!("books/{}.epub", id.to_lowercase()),
        stock: None,
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: std::time::Duration::from_millis(1),
        max_delay: std::time::Duration::from_millis(5),
    }
}

fn orchestrator(provider: Arc<dyn PaymentProvider>, entitlements: Arc<dyn EntitlementStore>) -> CheckoutOrchestrator {
    let catalog = InMemoryCatalog::with_books(vec![
        book("B1", Decimal::new(999, 2)),
        book("B2", Decimal::new(1450, 2)),
    ]);
    let ledger = OrderLedger::new(Arc::new(catalog), Arc::new(InMemoryOrderStore::new()));
    CheckoutOrchestrator::new(Arc::new(ledger), provider, entitlements, "usd").with_retry_policy(fast_retry())
}

/// Grants fail with a transient store error while `down` is set, for one book only.
struct FlakyEntitlements {
    inner: InMemoryEntitlementStore,
    failing_book: String,
    down: AtomicBool,
}

#[async_trait]
impl EntitlementStore for FlakyEntitlements {
    async fn grant(&self, user_id: &str, book_id: &str) -> storefront::error::Result<()> {
        if book_id == self.failing_book && self.down.load(Ordering::SeqCst) {
            return Err(StorefrontError::StoreUnavailable("entitlements offline".into()));
        }
        self.inner.grant(user_id, book_id).await
    }

    async fn has_access(&self, user_id: &str, book_id: &str) -> storefront::error::Result<bool> {
        self.inner.has_access(user_id, book_id).await
    }

    async fn list_for_user(&self, user_id: &str) -> storefront::error::Result<Vec<Entitlement>> {
        self.inner.list_for_user(user_id).await
    }
}

/// Fails `create_intent` with a transient error a fixed number of times.
struct FlakyProvider {
    inner: ManualProvider,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyProvider {
    fn new(failures: usize) -> Self {
        Self {
            inner: ManualProvider::new(SECRET, "usd"),
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PaymentProvider for FlakyProvider {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn signature_header(&self) -> &'static str {
        self.inner.signature_header()
    }

    async fn create_intent(
        &self,
        order_id: Uuid,
        amount: Decimal,
        currency: &str,
    ) -> storefront::error::Result<PaymentIntent> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(StorefrontError::ProviderUnavailable("503 from provider".into()));
        }
        self.inner.create_intent(order_id, amount, currency).await
    }

    async fn get_intent(&self, intent_id: &str) -> storefront::error::Result<PaymentIntent> {
        self.inner.get_intent(intent_id).await
    }

    fn confirm_intent(&self, payload: &ConfirmationPayload) -> storefront::error::Result<Option<PaymentConfirmation>> {
        self.inner.confirm_intent(payload)
    }
}

async fn intent_ref(checkout: &CheckoutOrchestrator, order_id: Uuid) -> Result<String> {
    let order = checkout.ledger().get(order_id).await?;
    Ok(order.payment_intent_ref.expect("order has an intent"))
}

#[tokio::test]
async fn test_single_book_purchase_is_fulfilled() -> Result<()> {
    let provider = Arc::new(ManualProvider::new(SECRET, "usd"));
    let entitlements = Arc::new(InMemoryEntitlementStore::new());
    let checkout = orchestrator(provider.clone(), entitlements.clone());

    let receipt = checkout.submit_checkout("u1", &[CartItem::new("B1", 1)]).await?;
    assert!(receipt.client_secret.is_some());

    let order = checkout.ledger().get(receipt.order_id).await?;
    assert_eq!(order.status, OrderStatus::PaymentRequested);
    assert_eq!(order.total(), Decimal::new(999, 2));

    let intent_id = intent_ref(&checkout, receipt.order_id).await?;
    let intent = provider.get_intent(&intent_id).await?;
    assert_eq!(intent.amount, Decimal::new(999, 2));

    let payload = provider.signed_event(&intent_id, receipt.order_id, true)?;
    let outcome = checkout.handle_payment_confirmation(&payload).await?;
    assert_eq!(outcome, ConfirmationOutcome::Fulfilled);

    let order = checkout.ledger().get(receipt.order_id).await?;
    assert_eq!(order.status, OrderStatus::Fulfilled);
    assert!(entitlements.has_access("u1", "B1").await?);
    assert!(!entitlements.has_access("u1", "B2").await?);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_confirmation_is_harmless() -> Result<()> {
    let provider = Arc::new(ManualProvider::new(SECRET, "usd"));
    let entitlements = Arc::new(InMemoryEntitlementStore::new());
    let checkout = orchestrator(provider.clone(), entitlements.clone());

    let receipt = checkout
        .submit_checkout("u1", &[CartItem::new("B1", 1), CartItem::new("B2", 2)])
        .await?;
    let intent_id = intent_ref(&checkout, receipt.order_id).await?;
    let payload = provider.signed_event(&intent_id, receipt.order_id, true)?;

    assert_eq!(checkout.handle_payment_confirmation(&payload).await?, ConfirmationOutcome::Fulfilled);
    assert_eq!(checkout.handle_payment_confirmation(&payload).await?, ConfirmationOutcome::Duplicate);

    assert_eq!(entitlements.len(), 2);
    let order = checkout.ledger().get(receipt.order_id).await?;
    assert_eq!(order.status, OrderStatus::Fulfilled);
    Ok(())
}

#[tokio::test]
async fn test_forged_signature_changes_nothing() -> Result<()> {
    let provider = Arc::new(ManualProvider::new(SECRET, "usd"));
    let entitlements = Arc::new(InMemoryEntitlementStore::new());
    let checkout = orchestrator(provider.clone(), entitlements.clone());

    let receipt = checkout.submit_checkout("u1", &[CartItem::new("B1", 1)]).await?;
    let intent_id = intent_ref(&checkout, receipt.order_id).await?;
    let forged = sign_manual_event("not-the-secret", &intent_id, receipt.order_id, true)?;

    let err = checkout.handle_payment_confirmation(&forged).await.unwrap_err();
    assert!(matches!(err, StorefrontError::InvalidSignature(_)));

    let unsigned = ConfirmationPayload::new(forged.body.clone(), None);
    let err = checkout.handle_payment_confirmation(&unsigned).await.unwrap_err();
    assert!(matches!(err, StorefrontError::InvalidSignature(_)));

    let order = checkout.ledger().get(receipt.order_id).await?;
    assert_eq!(order.status, OrderStatus::PaymentRequested);
    assert!(!entitlements.has_access("u1", "B1").await?);
    Ok(())
}

#[tokio::test]
async fn test_failed_payment_grants_nothing() -> Result<()> {
    let provider = Arc::new(ManualProvider::new(SECRET, "usd"));
    let entitlements = Arc::new(InMemoryEntitlementStore::new());
    let checkout = orchestrator(provider.clone(), entitlements.clone());

    let receipt = checkout.submit_checkout("u1", &[CartItem::new("B1", 1)]).await?;
    let intent_id = intent_ref(&checkout, receipt.order_id).await?;
    let payload = provider.signed_event(&intent_id, receipt.order_id, false)?;

    assert_eq!(
        checkout.handle_payment_confirmation(&payload).await?,
        ConfirmationOutcome::PaymentFailed
    );
    let order = checkout.ledger().get(receipt.order_id).await?;
    assert_eq!(order.status, OrderStatus::Failed);
    assert!(entitlements.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_confirmation_for_other_intent_is_ignored() -> Result<()> {
    let provider = Arc::new(ManualProvider::new(SECRET, "usd"));
    let checkout = orchestrator(provider.clone(), Arc::new(InMemoryEntitlementStore::new()));

    let receipt = checkout.submit_checkout("u1", &[CartItem::new("B1", 1)]).await?;
    let stray = provider.signed_event("man_unknown", receipt.order_id, true)?;
    assert_eq!(checkout.handle_payment_confirmation(&stray).await?, ConfirmationOutcome::Ignored);

    let unknown_order = provider.signed_event("man_unknown", Uuid::new_v4(), true)?;
    assert_eq!(
        checkout.handle_payment_confirmation(&unknown_order).await?,
        ConfirmationOutcome::Ignored
    );

    let order = checkout.ledger().get(receipt.order_id).await?;
    assert_eq!(order.status, OrderStatus::PaymentRequested);
    Ok(())
}

#[tokio::test]
async fn test_partial_grant_failure_is_finished_by_sweep() -> Result<()> {
    let provider = Arc::new(ManualProvider::new(SECRET, "usd"));
    let entitlements = Arc::new(FlakyEntitlements {
        inner: InMemoryEntitlementStore::new(),
        failing_book: "B2".into(),
        down: AtomicBool::new(true),
    });
    let checkout = orchestrator(provider.clone(), entitlements.clone());

    let receipt = checkout
        .submit_checkout("u1", &[CartItem::new("B1", 1), CartItem::new("B2", 1)])
        .await?;
    let intent_id = intent_ref(&checkout, receipt.order_id).await?;
    let payload = provider.signed_event(&intent_id, receipt.order_id, true)?;

    assert_eq!(
        checkout.handle_payment_confirmation(&payload).await?,
        ConfirmationOutcome::AwaitingFulfillment
    );
    let order = checkout.ledger().get(receipt.order_id).await?;
    assert_eq!(order.status, OrderStatus::Paid);
    assert!(entitlements.has_access("u1", "B1").await?);
    assert!(!entitlements.has_access("u1", "B2").await?);

    // Redelivery while the store is still down changes nothing
    assert_eq!(checkout.handle_payment_confirmation(&payload).await?, ConfirmationOutcome::Duplicate);

    entitlements.down.store(false, Ordering::SeqCst);
    let report = checkout.sweep().await?;
    assert_eq!(report.refulfilled, 1);
    assert_eq!(report.errors, 0);

    let order = checkout.ledger().get(receipt.order_id).await?;
    assert_eq!(order.status, OrderStatus::Fulfilled);
    assert!(entitlements.has_access("u1", "B2").await?);
    Ok(())
}

#[tokio::test]
async fn test_transient_provider_failures_are_retried() -> Result<()> {
    let provider = Arc::new(FlakyProvider::new(2));
    let checkout = orchestrator(provider.clone(), Arc::new(InMemoryEntitlementStore::new()));

    let receipt = checkout.submit_checkout("u1", &[CartItem::new("B1", 1)]).await?;
    assert_eq!(provider.attempts.load(Ordering::SeqCst), 3);

    let order = checkout.ledger().get(receipt.order_id).await?;
    assert_eq!(order.status, OrderStatus::PaymentRequested);
    Ok(())
}

#[tokio::test]
async fn test_provider_outage_leaves_order_pending_until_retry() -> Result<()> {
    let provider = Arc::new(FlakyProvider::new(3));
    let checkout = orchestrator(provider.clone(), Arc::new(InMemoryEntitlementStore::new()));

    let err = checkout
        .submit_checkout("u1", &[CartItem::new("B1", 1)])
        .await
        .unwrap_err();
    let order_id = match err {
        StorefrontError::PaymentInitFailed { order_id, .. } => order_id,
        other => panic!("unexpected error {other:?}"),
    };

    let order = checkout.order_for_user("u1", order_id).await?;
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.payment_intent_ref.is_none());

    // Provider is back; retrying reuses the same order
    let receipt = checkout.retry_payment("u1", order_id).await?;
    assert_eq!(receipt.order_id, order_id);
    assert_eq!(checkout.orders_for_user("u1").await?.len(), 1);

    let order = checkout.ledger().get(order_id).await?;
    assert_eq!(order.status, OrderStatus::PaymentRequested);

    // A second retry hands back the recorded intent
    let again = checkout.retry_payment("u1", order_id).await?;
    assert_eq!(again.client_secret, receipt.client_secret);
    Ok(())
}

#[tokio::test]
async fn test_sweep_reconciles_lost_webhook() -> Result<()> {
    let provider = Arc::new(ManualProvider::new(SECRET, "usd"));
    let entitlements = Arc::new(InMemoryEntitlementStore::new());
    let checkout = orchestrator(provider.clone(), entitlements.clone());

    let receipt = checkout.submit_checkout("u1", &[CartItem::new("B1", 1)]).await?;
    let intent_id = intent_ref(&checkout, receipt.order_id).await?;

    // The provider settles the intent but the delivery never reaches us
    let payload = provider.signed_event(&intent_id, receipt.order_id, true)?;
    provider.confirm_intent(&payload)?;

    let report = checkout.sweep().await?;
    assert_eq!(report.reconciled, 1);

    let order = checkout.ledger().get(receipt.order_id).await?;
    assert_eq!(order.status, OrderStatus::Fulfilled);
    assert!(entitlements.has_access("u1", "B1").await?);
    Ok(())
}

#[tokio::test]
async fn test_sweep_expires_abandoned_pending_orders() -> Result<()> {
    let provider = Arc::new(FlakyProvider::new(usize::MAX));
    let checkout = orchestrator(provider, Arc::new(InMemoryEntitlementStore::new()))
        .with_pending_timeout(Duration::hours(24));

    let err = checkout.submit_checkout("u1", &[CartItem::new("B1", 1)]).await.unwrap_err();
    let StorefrontError::PaymentInitFailed { order_id, .. } = err else {
        panic!("unexpected error {err:?}");
    };

    let report = checkout.sweep_at(Utc::now() + Duration::hours(1)).await?;
    assert_eq!(report.expired, 0);

    let report = checkout.sweep_at(Utc::now() + Duration::hours(25)).await?;
    assert_eq!(report.expired, 1);
    let order = checkout.ledger().get(order_id).await?;
    assert_eq!(order.status, OrderStatus::Cancelled);
    Ok(())
}

#[tokio::test]
async fn test_cancel_only_before_payment_is_requested() -> Result<()> {
    let checkout = orchestrator(
        Arc::new(ManualProvider::new(SECRET, "usd")),
        Arc::new(InMemoryEntitlementStore::new()),
    );

    let receipt = checkout.submit_checkout("u1", &[CartItem::new("B1", 1)]).await?;
    let err = checkout.cancel_order("u1", receipt.order_id).await.unwrap_err();
    assert!(matches!(err, StorefrontError::InvalidRequest(_)));

    // Other users cannot see or touch the order
    let err = checkout.cancel_order("u2", receipt.order_id).await.unwrap_err();
    assert!(matches!(err, StorefrontError::NotFound { .. }));
    assert!(checkout.orders_for_user("u2").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_invalid_carts_create_no_order() -> Result<()> {
    let checkout = orchestrator(
        Arc::new(ManualProvider::new(SECRET, "usd")),
        Arc::new(InMemoryEntitlementStore::new()),
    );

    for items in [vec![], vec![CartItem::new("B9", 1)], vec![CartItem::new("B1", 0)]] {
        let err = checkout.submit_checkout("u1", &items).await.unwrap_err();
        assert!(matches!(err, StorefrontError::InvalidCart(_)), "{err:?}");
    }
    assert!(checkout.orders_for_user("u1").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_sweep_expires_abandoned_payment_requests() -> Result<()> {
    let provider = Arc::new(ManualProvider::new(SECRET, "usd"));
    let entitlements = Arc::new(InMemoryEntitlementStore::new());
    let checkout = orchestrator(provider.clone(), entitlements.clone()).with_pending_timeout(Duration::hours(24));

    let receipt = checkout.submit_checkout("u1", &[CartItem::new("B1", 1)]).await?;
    let intent_id = intent_ref(&checkout, receipt.order_id).await?;

    // Customer is still within the window
    let report = checkout.sweep_at(Utc::now() + Duration::hours(1)).await?;
    assert_eq!(report.expired, 0);
    let order = checkout.ledger().get(receipt.order_id).await?;
    assert_eq!(order.status, OrderStatus::PaymentRequested);

    let report = checkout.sweep_at(Utc::now() + Duration::days(30)).await?;
    assert_eq!(report.expired, 1);
    assert_eq!(report.reconciled, 0);
    let order = checkout.ledger().get(receipt.order_id).await?;
    assert_eq!(order.status, OrderStatus::Cancelled);

    // A confirmation arriving after the cancel grants nothing
    let payload = provider.signed_event(&intent_id, receipt.order_id, true)?;
    assert_eq!(checkout.handle_payment_confirmation(&payload).await?, ConfirmationOutcome::Duplicate);
    assert!(entitlements.is_empty());

    // Nothing left for later sweeps to poll
    let report = checkout.sweep_at(Utc::now() + Duration::days(31)).await?;
    assert_eq!(report, Default::default());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_confirmations_fulfill_once() -> Result<()> {
    let provider = Arc::new(ManualProvider::new(SECRET, "usd"));
    let entitlements = Arc::new(InMemoryEntitlementStore::new());
    let checkout = Arc::new(orchestrator(provider.clone(), entitlements.clone()));

    let receipt = checkout.submit_checkout("u1", &[CartItem::new("B1", 1)]).await?;
    let intent_id = intent_ref(&checkout, receipt.order_id).await?;
    let payload = provider.signed_event(&intent_id, receipt.order_id, true)?;

    let first = {
        let (checkout, payload) = (checkout.clone(), payload.clone());
        tokio::spawn(async move { checkout.handle_payment_confirmation(&payload).await })
    };
    let second = {
        let (checkout, payload) = (checkout.clone(), payload.clone());
        tokio::spawn(async move { checkout.handle_payment_confirmation(&payload).await })
    };
    let (first, second) = tokio::join!(first, second);

    let mut outcomes = vec![first??, second??];
    outcomes.sort_by_key(|outcome| outcome.as_str());
    assert_eq!(outcomes, vec![ConfirmationOutcome::Duplicate, ConfirmationOutcome::Fulfilled]);

    assert_eq!(entitlements.len(), 1);
    let order = checkout.ledger().get(receipt.order_id).await?;
    assert_eq!(order.status, OrderStatus::Fulfilled);
    Ok(())
}
