use crate::app::ports::{CatalogReader, EntitlementStore, OrderStore};
use crate::domain::{Book, Entitlement, Order, OrderStatus};
use crate::error::{Result, StorefrontError};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;
use uuid::Uuid;

fn poisoned<T>(_: PoisonError<T>) -> StorefrontError {
    StorefrontError::StoreUnavailable("in-memory store lock poisoned".to_string())
}

/// In-memory catalog for development and testing
pub struct InMemoryCatalog {
    books: Arc<RwLock<HashMap<String, Book>>>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            books: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_books(books: Vec<Book>) -> Self {
        let map = books.into_iter().map(|b| (b.id.clone(), b)).collect();
        Self {
            books: Arc::new(RwLock::new(map)),
        }
    }

    /// Stand-in for the catalog-management collaborator changing a price.
    pub fn set_price(&self, book_id: &str, price: Decimal) -> Result<()> {
        let mut books = self.books.write().map_err(poisoned)?;
        let book = books
            .get_mut(book_id)
            .ok_or_else(|| StorefrontError::not_found("book", book_id))?;
        book.price = price;
        Ok(())
    }
}

#[async_trait]
impl CatalogReader for InMemoryCatalog {
    async fn get_book(&self, book_id: &str) -> Result<Option<Book>> {
        let books = self.books.read().map_err(poisoned)?;
        Ok(books.get(book_id).cloned())
    }
}

pub struct InMemoryOrderStore {
    orders: Arc<Mutex<HashMap<Uuid, Order>>>,
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self {
            orders: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.lock().map_err(poisoned)?;
        if orders.contains_key(&order.id) {
            return Err(StorefrontError::StoreUnavailable(format!(
                "order {} already exists",
                order.id
            )));
        }
        orders.insert(order.id, order.clone());

        debug!("Inserted order {}", order.id);
        Ok(())
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>> {
        let orders = self.orders.lock().map_err(poisoned)?;
        Ok(orders.get(&order_id).cloned())
    }

    async fn compare_and_swap(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        payment_intent_ref: Option<&str>,
    ) -> Result<Order> {
        let mut orders = self.orders.lock().map_err(poisoned)?;
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| StorefrontError::not_found("order", order_id.to_string()))?;

        if order.status != from {
            return Err(StorefrontError::StaleTransition {
                order_id,
                expected: from,
                actual: order.status,
            });
        }

        order.status = to;
        order.updated_at = Utc::now();
        if let Some(intent_ref) = payment_intent_ref {
            order.payment_intent_ref = Some(intent_ref.to_string());
        }
        Ok(order.clone())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Order>> {
        let orders = self.orders.lock().map_err(poisoned)?;
        let mut found: Vec<Order> = orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let orders = self.orders.lock().map_err(poisoned)?;
        let mut found: Vec<Order> = orders
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }
}

pub struct InMemoryEntitlementStore {
    entitlements: Arc<Mutex<HashMap<(String, String), Entitlement>>>,
}

impl Default for InMemoryEntitlementStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEntitlementStore {
    pub fn new() -> Self {
        Self {
            entitlements: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.entitlements.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EntitlementStore for InMemoryEntitlementStore {
    async fn grant(&self, user_id: &str, book_id: &str) -> Result<()> {
        let mut entitlements = self.entitlements.lock().map_err(poisoned)?;
        entitlements
            .entry((user_id.to_string(), book_id.to_string()))
            .or_insert_with(|| Entitlement {
                user_id: user_id.to_string(),
                book_id: book_id.to_string(),
                granted_at: Utc::now(),
            });
        Ok(())
    }

    async fn has_access(&self, user_id: &str, book_id: &str) -> Result<bool> {
        let entitlements = self.entitlements.lock().map_err(poisoned)?;
        Ok(entitlements.contains_key(&(user_id.to_string(), book_id.to_string())))
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Entitlement>> {
        let entitlements = self.entitlements.lock().map_err(poisoned)?;
        let mut found: Vec<Entitlement> = entitlements
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.book_id.cmp(&b.book_id));
        Ok(found)
    }
}
