use crate::app::ledger::OrderLedger;
use crate::app::ports::{EntitlementStore, PaymentProvider};
use crate::app::retry::{retry_transient, RetryPolicy};
use crate::domain::{
    CartItem, CheckoutReceipt, ConfirmationPayload, Order, OrderStatus, PaymentConfirmation,
    ProviderStatus,
};
use crate::error::{Result, StorefrontError};
use crate::observability::metrics;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// What a payment confirmation did to its order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Paid and every entitlement granted.
    Fulfilled,
    /// Paid, but some grants failed; the recovery sweep finishes the job.
    AwaitingFulfillment,
    PaymentFailed,
    /// Another delivery already moved the order on.
    Duplicate,
    /// Authentic payload with nothing to act on.
    Ignored,
    /// Payment request abandoned past the pending timeout and cancelled.
    Expired,
}

impl ConfirmationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationOutcome::Fulfilled => "fulfilled",
            ConfirmationOutcome::AwaitingFulfillment => "awaiting_fulfillment",
            ConfirmationOutcome::PaymentFailed => "payment_failed",
            ConfirmationOutcome::Duplicate => "duplicate",
            ConfirmationOutcome::Ignored => "ignored",
            ConfirmationOutcome::Expired => "expired",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub refulfilled: usize,
    pub reconciled: usize,
    pub expired: usize,
    pub errors: usize,
}

/// Moves orders from cart submission to fulfillment.
pub struct CheckoutOrchestrator {
    ledger: Arc<OrderLedger>,
    provider: Arc<dyn PaymentProvider>,
    entitlements: Arc<dyn EntitlementStore>,
    currency: String,
    retry: RetryPolicy,
    pending_timeout: Duration,
}

impl CheckoutOrchestrator {
    pub fn new(
        ledger: Arc<OrderLedger>,
        provider: Arc<dyn PaymentProvider>,
        entitlements: Arc<dyn EntitlementStore>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            provider,
            entitlements,
            currency: currency.into(),
            retry: RetryPolicy::default(),
            pending_timeout: Duration::hours(24),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pending_timeout(mut self, pending_timeout: Duration) -> Self {
        self.pending_timeout = pending_timeout;
        self
    }

    pub fn ledger(&self) -> &Arc<OrderLedger> {
        &self.ledger
    }

    pub fn provider(&self) -> &Arc<dyn PaymentProvider> {
        &self.provider
    }

    pub async fn submit_checkout(&self, user_id: &str, items: &[CartItem]) -> Result<CheckoutReceipt> {
        let order = match self.ledger.create_order(user_id, items).await {
            Ok(order) => order,
            Err(e) => {
                metrics::checkout_rejected(e.kind());
                return Err(e);
            }
        };
        metrics::checkout_submitted();

        self.request_payment(&order)
            .instrument(info_span!("request_payment", order_id = %order.id))
            .await
    }

    /// Re-submits payment for an existing order instead of creating a new one.
    pub async fn retry_payment(&self, user_id: &str, order_id: Uuid) -> Result<CheckoutReceipt> {
        let order = self.order_for_user(user_id, order_id).await?;
        match order.status {
            OrderStatus::Pending => self.request_payment(&order).await,
            OrderStatus::PaymentRequested => self.existing_receipt(&order).await,
            other => Err(StorefrontError::InvalidRequest(format!(
                "order is {other}, payment cannot be retried"
            ))),
        }
    }

    /// User abort. Only orders that never reached the provider can be cancelled.
    pub async fn cancel_order(&self, user_id: &str, order_id: Uuid) -> Result<Order> {
        let order = self.order_for_user(user_id, order_id).await?;
        match self
            .ledger
            .transition(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
        {
            Ok(cancelled) => {
                info!(%order_id, "Order cancelled by user");
                Ok(cancelled)
            }
            Err(StorefrontError::StaleTransition { actual, .. }) => Err(StorefrontError::InvalidRequest(
                format!("order is {actual} and can no longer be cancelled"),
            )),
            Err(e) => Err(e),
        }
    }

    /// Orders are only visible to their owner; anyone else gets `NotFound`.
    pub async fn order_for_user(&self, user_id: &str, order_id: Uuid) -> Result<Order> {
        let order = self.ledger.get(order_id).await?;
        if order.user_id != user_id {
            return Err(StorefrontError::not_found("order", order_id.to_string()));
        }
        Ok(order)
    }

    pub async fn orders_for_user(&self, user_id: &str) -> Result<Vec<Order>> {
        self.ledger.list_for_user(user_id).await
    }

    /// Entry point for the provider's asynchronous callback.
    pub async fn handle_payment_confirmation(
        &self,
        payload: &ConfirmationPayload,
    ) -> Result<ConfirmationOutcome> {
        let confirmation = match self.provider.confirm_intent(payload) {
            Ok(Some(confirmation)) => confirmation,
            Ok(None) => return Ok(self.record(ConfirmationOutcome::Ignored)),
            Err(e @ StorefrontError::InvalidSignature(_)) => {
                warn!(
                    target: "audit",
                    provider = self.provider.name(),
                    error = %e,
                    body_bytes = payload.body.len(),
                    "Rejected payment webhook"
                );
                metrics::webhook_rejected(e.kind());
                return Err(e);
            }
            Err(e) => {
                metrics::webhook_rejected(e.kind());
                return Err(e);
            }
        };

        let span = info_span!("payment_confirmation", order_id = %confirmation.order_id, intent_id = %confirmation.intent_id);
        let outcome = self.apply_confirmation(confirmation).instrument(span).await?;
        Ok(self.record(outcome))
    }

    async fn apply_confirmation(&self, confirmation: PaymentConfirmation) -> Result<ConfirmationOutcome> {
        let order = match self.ledger.get(confirmation.order_id).await {
            Ok(order) => order,
            Err(StorefrontError::NotFound { .. }) => {
                warn!("Confirmation for unknown order");
                return Ok(ConfirmationOutcome::Ignored);
            }
            Err(e) => return Err(e),
        };

        if order.payment_intent_ref.as_deref() != Some(confirmation.intent_id.as_str()) {
            warn!(
                expected = ?order.payment_intent_ref,
                "Confirmation intent does not match the order's intent"
            );
            return Ok(ConfirmationOutcome::Ignored);
        }

        if confirmation.succeeded {
            self.settle_paid(&order).await
        } else {
            self.settle_failed(&order).await
        }
    }

    async fn settle_paid(&self, order: &Order) -> Result<ConfirmationOutcome> {
        match self
            .ledger
            .transition(order.id, OrderStatus::PaymentRequested, OrderStatus::Paid)
            .await
        {
            Ok(paid) => {
                info!(order_id = %paid.id, total = %paid.total(), "Payment succeeded");
                self.fulfill(&paid).await
            }
            Err(StorefrontError::StaleTransition { actual, .. }) => {
                debug!(order_id = %order.id, %actual, "Duplicate payment confirmation");
                Ok(ConfirmationOutcome::Duplicate)
            }
            Err(e) => Err(e),
        }
    }

    async fn settle_failed(&self, order: &Order) -> Result<ConfirmationOutcome> {
        match self
            .ledger
            .transition(order.id, OrderStatus::PaymentRequested, OrderStatus::Failed)
            .await
        {
            Ok(_) => {
                info!(order_id = %order.id, "Payment failed");
                Ok(ConfirmationOutcome::PaymentFailed)
            }
            Err(StorefrontError::StaleTransition { actual, .. }) => {
                debug!(order_id = %order.id, %actual, "Duplicate payment failure");
                Ok(ConfirmationOutcome::Duplicate)
            }
            Err(e) => Err(e),
        }
    }

    /// Grants every line item of a paid order, then marks it fulfilled. Safe to
    /// repeat: grants are idempotent and the final step is a CAS from `paid`.
    pub async fn fulfill(&self, order: &Order) -> Result<ConfirmationOutcome> {
        let mut failed = 0usize;
        for item in &order.line_items {
            let entitlements = &self.entitlements;
            let user_id = order.user_id.as_str();
            let book_id = item.book_id.as_str();
            let granted = retry_transient(&self.retry, "grant_entitlement", move || {
                entitlements.grant(user_id, book_id)
            })
            .await;
            if let Err(e) = granted {
                warn!(order_id = %order.id, book_id, error = %e, "Entitlement grant failed");
                failed += 1;
            }
        }

        if failed > 0 {
            metrics::fulfillment_incomplete();
            warn!(
                order_id = %order.id,
                failed,
                "Order left paid until the recovery sweep completes fulfillment"
            );
            return Ok(ConfirmationOutcome::AwaitingFulfillment);
        }

        match self
            .ledger
            .transition(order.id, OrderStatus::Paid, OrderStatus::Fulfilled)
            .await
        {
            Ok(_) => {
                info!(order_id = %order.id, items = order.line_items.len(), "Order fulfilled");
                Ok(ConfirmationOutcome::Fulfilled)
            }
            Err(StorefrontError::StaleTransition { .. }) => Ok(ConfirmationOutcome::Duplicate),
            Err(e) => Err(e),
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Recovery pass: finish fulfilling paid orders, reconcile payment requests with
    /// the provider in case a webhook was lost, and expire stale pending orders.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for order in self.ledger.list_by_status(OrderStatus::Paid).await? {
            match self.fulfill(&order).await {
                Ok(ConfirmationOutcome::Fulfilled) => report.refulfilled += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "Re-fulfillment failed");
                    report.errors += 1;
                }
            }
        }

        for order in self.ledger.list_by_status(OrderStatus::PaymentRequested).await? {
            match self.reconcile(&order, now).await {
                Ok(Some(ConfirmationOutcome::Expired)) => report.expired += 1,
                Ok(Some(_)) => report.reconciled += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "Reconciliation failed");
                    report.errors += 1;
                }
            }
        }

        for order in self.ledger.list_by_status(OrderStatus::Pending).await? {
            if now - order.created_at < self.pending_timeout {
                continue;
            }
            match self
                .ledger
                .transition(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
                .await
            {
                Ok(_) => {
                    info!(order_id = %order.id, "Expired pending order");
                    report.expired += 1;
                }
                Err(StorefrontError::StaleTransition { .. }) => {}
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "Could not expire pending order");
                    report.errors += 1;
                }
            }
        }

        metrics::sweep_completed(report.refulfilled, report.reconciled, report.expired);
        if report.errors > 0 {
            error!(?report, "Recovery sweep finished with errors");
        } else {
            info!(?report, "Recovery sweep finished");
        }
        Ok(report)
    }

    /// Settles a payment request from the provider's view of its intent. A request
    /// still awaiting the customer past the pending timeout is abandoned.
    async fn reconcile(&self, order: &Order, now: DateTime<Utc>) -> Result<Option<ConfirmationOutcome>> {
        let Some(intent_ref) = order.payment_intent_ref.as_deref() else {
            return Ok(None);
        };
        let provider = &self.provider;
        let intent = retry_transient(&self.retry, "get_intent", move || provider.get_intent(intent_ref)).await?;

        let outcome = match intent.provider_status {
            ProviderStatus::Succeeded => self.settle_paid(order).await?,
            ProviderStatus::Failed => self.settle_failed(order).await?,
            ProviderStatus::RequiresAction if now - order.created_at >= self.pending_timeout => {
                return self.expire_payment_request(order).await;
            }
            ProviderStatus::RequiresAction => return Ok(None),
        };
        info!(order_id = %order.id, outcome = outcome.as_str(), "Reconciled payment with provider");
        Ok(Some(outcome))
    }

    async fn expire_payment_request(&self, order: &Order) -> Result<Option<ConfirmationOutcome>> {
        match self
            .ledger
            .transition(order.id, OrderStatus::PaymentRequested, OrderStatus::Cancelled)
            .await
        {
            Ok(_) => {
                info!(order_id = %order.id, "Expired abandoned payment request");
                Ok(Some(ConfirmationOutcome::Expired))
            }
            // A confirmation landed between the lookup and the cancel
            Err(StorefrontError::StaleTransition { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn request_payment(&self, order: &Order) -> Result<CheckoutReceipt> {
        let provider = &self.provider;
        let currency = self.currency.as_str();
        let (order_id, total) = (order.id, order.total());

        let intent = retry_transient(&self.retry, "create_intent", move || {
            provider.create_intent(order_id, total, currency)
        })
        .await
        .map_err(|e| {
            warn!(%order_id, error = %e, "Payment intent creation failed, order stays pending");
            metrics::payment_init_failed(e.kind());
            StorefrontError::PaymentInitFailed {
                order_id,
                reason: e.to_string(),
            }
        })?;

        match self.ledger.request_payment(order_id, &intent.id).await {
            Ok(_) => {
                info!(%order_id, intent_id = %intent.id, provider = provider.name(), "Payment requested");
                Ok(CheckoutReceipt {
                    order_id,
                    client_secret: intent.client_secret,
                })
            }
            // A concurrent retry got there first; hand back what it recorded
            Err(StorefrontError::StaleTransition {
                actual: OrderStatus::PaymentRequested,
                ..
            }) => {
                let current = self.ledger.get(order_id).await?;
                self.existing_receipt(&current).await
            }
            Err(e) => Err(e),
        }
    }

    async fn existing_receipt(&self, order: &Order) -> Result<CheckoutReceipt> {
        let intent_ref = order.payment_intent_ref.as_deref().ok_or_else(|| {
            StorefrontError::InvalidRequest(format!("order {} has no payment intent", order.id))
        })?;
        let provider = &self.provider;
        let intent = retry_transient(&self.retry, "get_intent", move || provider.get_intent(intent_ref))
            .await
            .map_err(|e| StorefrontError::PaymentInitFailed {
                order_id: order.id,
                reason: e.to_string(),
            })?;
        Ok(CheckoutReceipt {
            order_id: order.id,
            client_secret: intent.client_secret,
        })
    }

    fn record(&self, outcome: ConfirmationOutcome) -> ConfirmationOutcome {
        metrics::confirmation_handled(outcome.as_str());
        outcome
    }
}
