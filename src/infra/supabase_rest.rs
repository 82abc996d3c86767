use crate::app::ports::{CatalogReader, EntitlementStore, OrderStore};
use crate::domain::{Book, Entitlement, LineItem, Order, OrderStatus};
use crate::error::{Result, StorefrontError};
use crate::infra::supabase::{rejected, send, SupabaseClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const BOOKS: &str = "/rest/v1/books";
const ORDERS: &str = "/rest/v1/orders";
const ENTITLEMENTS: &str = "/rest/v1/entitlements";

/// Catalog, order and entitlement tables behind Supabase's PostgREST API.
///
/// Order status changes are conditional `PATCH`es filtered on the expected
/// status, so the compare-and-swap happens inside Postgres.
pub struct SupabaseRestStore {
    client: Arc<SupabaseClient>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderRow {
    id: Uuid,
    user_id: String,
    line_items: Vec<LineItem>,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    payment_intent_ref: Option<String>,
}

impl From<&Order> for OrderRow {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id.clone(),
            line_items: order.line_items.clone(),
            status: order.status,
            created_at: order.created_at,
            updated_at: order.updated_at,
            payment_intent_ref: order.payment_intent_ref.clone(),
        }
    }
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            line_items: row.line_items,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            payment_intent_ref: row.payment_intent_ref,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntitlementRow {
    user_id: String,
    book_id: String,
    granted_at: DateTime<Utc>,
}

fn status_patch(to: OrderStatus, payment_intent_ref: Option<&str>, now: DateTime<Utc>) -> Value {
    let mut patch = json!({
        "status": to,
        "updated_at": now,
    });
    if let Some(intent_ref) = payment_intent_ref {
        patch["payment_intent_ref"] = json!(intent_ref);
    }
    patch
}

impl SupabaseRestStore {
    pub fn new(client: Arc<SupabaseClient>) -> Self {
        Self { client }
    }

    async fn select<T: for<'de> Deserialize<'de>>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let (status, body) = send(self.client.request(Method::GET, table).query(query)).await?;
        if !status.is_success() {
            return Err(rejected(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn fetch_orders(&self, query: &[(&str, String)]) -> Result<Vec<Order>> {
        let rows: Vec<OrderRow> = self.select(ORDERS, query).await?;
        Ok(rows.into_iter().map(Order::from).collect())
    }
}

#[async_trait]
impl CatalogReader for SupabaseRestStore {
    async fn get_book(&self, book_id: &str) -> Result<Option<Book>> {
        let books: Vec<Book> = self
            .select(
                BOOKS,
                &[
                    ("id", format!("eq.{book_id}")),
                    ("select", "id,title,price,file_ref,stock".to_string()),
                ],
            )
            .await?;
        Ok(books.into_iter().next())
    }
}

#[async_trait]
impl OrderStore for SupabaseRestStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        let request = self
            .client
            .request(Method::POST, ORDERS)
            .header("Prefer", "return=minimal")
            .json(&OrderRow::from(order));
        let (status, body) = send(request).await?;
        if !status.is_success() {
            return Err(rejected(status, &body));
        }
        debug!("Inserted order {}", order.id);
        Ok(())
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>> {
        let orders = self
            .fetch_orders(&[("id", format!("eq.{order_id}")), ("select", "*".to_string())])
            .await?;
        Ok(orders.into_iter().next())
    }

    async fn compare_and_swap(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        payment_intent_ref: Option<&str>,
    ) -> Result<Order> {
        let request = self
            .client
            .request(Method::PATCH, ORDERS)
            .query(&[
                ("id", format!("eq.{order_id}")),
                ("status", format!("eq.{from}")),
            ])
            .header("Prefer", "return=representation")
            .json(&status_patch(to, payment_intent_ref, Utc::now()));
        let (status, body) = send(request).await?;
        if !status.is_success() {
            return Err(rejected(status, &body));
        }

        let updated: Vec<OrderRow> = serde_json::from_str(&body)?;
        if let Some(row) = updated.into_iter().next() {
            return Ok(row.into());
        }

        // Nothing matched: either the order is gone or someone else moved it first
        match self.get(order_id).await? {
            Some(current) => Err(StorefrontError::StaleTransition {
                order_id,
                expected: from,
                actual: current.status,
            }),
            None => Err(StorefrontError::not_found("order", order_id.to_string())),
        }
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Order>> {
        self.fetch_orders(&[
            ("user_id", format!("eq.{user_id}")),
            ("order", "created_at.desc".to_string()),
        ])
        .await
    }

    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        self.fetch_orders(&[
            ("status", format!("eq.{status}")),
            ("order", "created_at.asc".to_string()),
        ])
        .await
    }
}

#[async_trait]
impl EntitlementStore for SupabaseRestStore {
    async fn grant(&self, user_id: &str, book_id: &str) -> Result<()> {
        let row = EntitlementRow {
            user_id: user_id.to_string(),
            book_id: book_id.to_string(),
            granted_at: Utc::now(),
        };
        // ON CONFLICT DO NOTHING keeps the original grant
        let request = self
            .client
            .request(Method::POST, ENTITLEMENTS)
            .query(&[("on_conflict", "user_id,book_id")])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&row);
        let (status, body) = send(request).await?;
        if !status.is_success() {
            return Err(rejected(status, &body));
        }
        Ok(())
    }

    async fn has_access(&self, user_id: &str, book_id: &str) -> Result<bool> {
        let rows: Vec<Value> = self
            .select(
                ENTITLEMENTS,
                &[
                    ("user_id", format!("eq.{user_id}")),
                    ("book_id", format!("eq.{book_id}")),
                    ("select", "user_id".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Entitlement>> {
        let rows: Vec<EntitlementRow> = self
            .select(
                ENTITLEMENTS,
                &[
                    ("user_id", format!("eq.{user_id}")),
                    ("order", "book_id.asc".to_string()),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| Entitlement {
                user_id: r.user_id,
                book_id: r.book_id,
                granted_at: r.granted_at,
            })
            .collect())
    }
}
