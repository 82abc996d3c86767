use crate::domain::{
    Book, ConfirmationPayload, Entitlement, Order, OrderStatus, PaymentConfirmation, PaymentIntent,
};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

// Read side of the catalog, owned by the catalog-management collaborator
#[async_trait]
pub trait CatalogReader: Send + Sync {
    async fn get_book(&self, book_id: &str) -> Result<Option<Book>>;
}

/// Durable order rows. Status changes go through `compare_and_swap` only.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<()>;
    async fn get(&self, order_id: Uuid) -> Result<Option<Order>>;
    /// Sets the status to `to` iff it is currently `from`, optionally recording the
    /// payment intent reference in the same write. Fails with `StaleTransition` when
    /// the observed status differs and `NotFound` when the order does not exist.
    async fn compare_and_swap(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        payment_intent_ref: Option<&str>,
    ) -> Result<Order>;
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Order>>;
    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>>;
}

#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Insert-if-absent. Granting an existing entitlement is a no-op.
    async fn grant(&self, user_id: &str, book_id: &str) -> Result<()>;
    async fn has_access(&self, user_id: &str, book_id: &str) -> Result<bool>;
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Entitlement>>;
}

/// Capability contract every payment provider variant implements.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Header carrying the webhook signature for this provider.
    fn signature_header(&self) -> &'static str;

    async fn create_intent(
        &self,
        order_id: Uuid,
        amount: Decimal,
        currency: &str,
    ) -> Result<PaymentIntent>;

    async fn get_intent(&self, intent_id: &str) -> Result<PaymentIntent>;

    /// Verifies the payload signature before looking at its content. Returns `None` for
    /// authentic events that do not carry a payment outcome.
    fn confirm_intent(&self, payload: &ConfirmationPayload) -> Result<Option<PaymentConfirmation>>;
}

#[async_trait]
pub trait StorageSigner: Send + Sync {
    async fn create_signed_reference(&self, file_ref: &str, ttl_seconds: u64) -> Result<String>;
}
