use crate::app::ports::{CatalogReader, OrderStore};
use crate::domain::{CartItem, LineItem, Order, OrderStatus};
use crate::error::{Result, StorefrontError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Append-only order ledger. Prices come from the catalog at creation time and
/// the status only ever moves through `transition`.
pub struct OrderLedger {
    catalog: Arc<dyn CatalogReader>,
    store: Arc<dyn OrderStore>,
    enforce_stock: bool,
}

impl OrderLedger {
    pub fn new(catalog: Arc<dyn CatalogReader>, store: Arc<dyn OrderStore>) -> Self {
        Self {
            catalog,
            store,
            enforce_stock: false,
        }
    }

    pub fn with_stock_enforcement(mut self, enforce_stock: bool) -> Self {
        self.enforce_stock = enforce_stock;
        self
    }

    pub async fn create_order(&self, user_id: &str, items: &[CartItem]) -> Result<Order> {
        let items = merge_cart(items)?;

        let mut line_items = Vec::with_capacity(items.len());
        for item in &items {
            let book = self
                .catalog
                .get_book(&item.book_id)
                .await?
                .ok_or_else(|| {
                    StorefrontError::InvalidCart(format!("unknown book '{}'", item.book_id))
                })?;

            if self.enforce_stock && book.stock == Some(0) {
                return Err(StorefrontError::InvalidCart(format!(
                    "book '{}' is out of stock",
                    book.id
                )));
            }
            if book.price.is_sign_negative() {
                return Err(StorefrontError::InvalidCart(format!(
                    "book '{}' has a negative price",
                    book.id
                )));
            }

            line_items.push(LineItem {
                book_id: book.id,
                quantity: item.quantity,
                unit_price: book.price,
            });
        }

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            line_items,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            payment_intent_ref: None,
        };
        self.store.insert(&order).await?;

        info!(order_id = %order.id, user_id, total = %order.total(), "Created order");
        Ok(order)
    }

    /// Compare-and-swap on the order status.
    pub async fn transition(&self, order_id: Uuid, from: OrderStatus, to: OrderStatus) -> Result<Order> {
        self.swap(order_id, from, to, None).await
    }

    /// `pending -> payment_requested`, recording the intent reference in the same write.
    pub async fn request_payment(&self, order_id: Uuid, payment_intent_ref: &str) -> Result<Order> {
        self.swap(
            order_id,
            OrderStatus::Pending,
            OrderStatus::PaymentRequested,
            Some(payment_intent_ref),
        )
        .await
    }

    pub async fn get(&self, order_id: Uuid) -> Result<Order> {
        self.store
            .get(order_id)
            .await?
            .ok_or_else(|| StorefrontError::not_found("order", order_id.to_string()))
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Order>> {
        self.store.list_for_user(user_id).await
    }

    pub async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        self.store.list_by_status(status).await
    }

    async fn swap(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        payment_intent_ref: Option<&str>,
    ) -> Result<Order> {
        if !from.can_transition_to(to) {
            return Err(StorefrontError::IllegalTransition { from, to });
        }
        let order = self
            .store
            .compare_and_swap(order_id, from, to, payment_intent_ref)
            .await?;
        debug!(%order_id, %from, %to, "Order transitioned");
        Ok(order)
    }
}

/// Validates the cart and folds repeated book ids into one entry, keeping first-seen order.
pub fn merge_cart(items: &[CartItem]) -> Result<Vec<CartItem>> {
    if items.is_empty() {
        return Err(StorefrontError::InvalidCart("cart is empty".into()));
    }

    let mut merged: Vec<CartItem> = Vec::with_capacity(items.len());
    for item in items {
        if item.book_id.trim().is_empty() {
            return Err(StorefrontError::InvalidCart("book id is empty".into()));
        }
        if item.quantity == 0 {
            return Err(StorefrontError::InvalidCart(format!(
                "quantity for '{}' must be at least 1",
                item.book_id
            )));
        }
        match merged.iter_mut().find(|m| m.book_id == item.book_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.checked_add(item.quantity).ok_or_else(|| {
                    StorefrontError::InvalidCart(format!("quantity for '{}' is too large", item.book_id))
                })?;
            }
            None => merged.push(item.clone()),
        }
    }
    Ok(merged)
}
