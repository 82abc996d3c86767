//! Data shapes shared by the ledger, the payment adapters and the HTTP layer.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Catalog row as seen by the order engine. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub price: Decimal,
    pub file_ref: String,
    /// `None` when the deployment does not track stock.
    #[serde(default)]
    pub stock: Option<u32>,
}

/// A cart entry as submitted by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub book_id: String,
    pub quantity: u32,
}

impl CartItem {
    pub fn new(book_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            book_id: book_id.into(),
            quantity,
        }
    }
}

/// Price and quantity snapshot taken when the order is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub book_id: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PaymentRequested,
    Paid,
    Fulfilled,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::PaymentRequested => "payment_requested",
            OrderStatus::Paid => "paid",
            OrderStatus::Fulfilled => "fulfilled",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Fulfilled | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }

    /// Edges of the order state machine. Fulfillment is only reachable through `Paid`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (*self, next) {
            (Pending, PaymentRequested) | (PaymentRequested, Paid) | (Paid, Fulfilled) => true,
            (from, Failed | Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "payment_requested" => Ok(OrderStatus::PaymentRequested),
            "paid" => Ok(OrderStatus::Paid),
            "fulfilled" => Ok(OrderStatus::Fulfilled),
            "failed" => Ok(OrderStatus::Failed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: String,
    pub line_items: Vec<LineItem>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub payment_intent_ref: Option<String>,
}

impl Order {
    pub fn total(&self) -> Decimal {
        self.line_items.iter().map(LineItem::subtotal).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    RequiresAction,
    Succeeded,
    Failed,
}

/// Mirror of a provider-side payment intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub id: String,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub provider_status: ProviderStatus,
    /// Provider-specific data the browser needs to complete payment.
    pub client_secret: Option<String>,
}

/// Raw inbound webhook delivery, before authenticity has been checked.
#[derive(Debug, Clone)]
pub struct ConfirmationPayload {
    pub body: Vec<u8>,
    pub signature: Option<String>,
}

impl ConfirmationPayload {
    pub fn new(body: impl Into<Vec<u8>>, signature: Option<String>) -> Self {
        Self {
            body: body.into(),
            signature,
        }
    }
}

/// Verified payment outcome extracted from a provider callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub order_id: Uuid,
    pub intent_id: String,
    pub succeeded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub user_id: String,
    pub book_id: String,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadToken {
    pub token: String,
    pub user_id: String,
    pub book_id: String,
    pub expires_at: DateTime<Utc>,
}

impl DownloadToken {
    pub fn expires_in_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

/// What the client receives after a successful checkout submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutReceipt {
    pub order_id: Uuid,
    pub client_secret: Option<String>,
}

/// ISO 4217 codes charged in whole units.
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "bif", "clp", "djf", "gnf", "jpy", "kmf", "krw", "mga", "pyg", "rwf", "ugx", "vnd", "vuv", "xaf",
    "xof", "xpf",
];
/// Three-decimal codes; not supported.
const THREE_DECIMAL_CURRENCIES: &[&str] = &["bhd", "jod", "kwd", "omr", "tnd"];

/// Decimal places of the currency's minor unit, or `None` when unsupported.
pub fn minor_unit_exponent(currency: &str) -> Option<u32> {
    let currency = currency.to_ascii_lowercase();
    if THREE_DECIMAL_CURRENCIES.contains(&currency.as_str()) {
        None
    } else if ZERO_DECIMAL_CURRENCIES.contains(&currency.as_str()) {
        Some(0)
    } else {
        Some(2)
    }
}

/// Converts a decimal amount to integer minor units, rounding half away from zero.
pub fn to_minor_units(amount: Decimal, currency: &str) -> Option<i64> {
    let exponent = minor_unit_exponent(currency)?;
    (amount * Decimal::from(10i64.pow(exponent)))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

pub fn from_minor_units(minor: i64, currency: &str) -> Decimal {
    Decimal::new(minor, minor_unit_exponent(currency).unwrap_or(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_edges() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(PaymentRequested));
        assert!(PaymentRequested.can_transition_to(Paid));
        assert!(Paid.can_transition_to(Fulfilled));
        assert!(Paid.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Cancelled));

        // No skipping straight to fulfillment
        assert!(!Pending.can_transition_to(Paid));
        assert!(!PaymentRequested.can_transition_to(Fulfilled));

        // Terminal states stay terminal
        for terminal in [Fulfilled, Failed, Cancelled] {
            for next in [Pending, PaymentRequested, Paid, Fulfilled, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::PaymentRequested,
            OrderStatus::Paid,
            OrderStatus::Fulfilled,
            OrderStatus::Failed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>(), Ok(status));
        }
        assert!("shipped".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_order_total_and_minor_units() {
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            line_items: vec![
                LineItem {
                    book_id: "B1".into(),
                    quantity: 1,
                    unit_price: Decimal::new(999, 2),
                },
                LineItem {
                    book_id: "B2".into(),
                    quantity: 2,
                    unit_price: Decimal::new(450, 2),
                },
            ],
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            payment_intent_ref: None,
        };
        assert_eq!(order.total(), Decimal::new(1899, 2));
        assert_eq!(to_minor_units(order.total(), "usd"), Some(1899));
        assert_eq!(from_minor_units(1899, "USD"), Decimal::new(1899, 2));
    }

    #[test]
    fn test_minor_units_follow_currency_exponent() {
        assert_eq!(to_minor_units(Decimal::new(1500, 0), "jpy"), Some(1500));
        assert_eq!(to_minor_units(Decimal::new(15005, 1), "JPY"), Some(1501));
        assert_eq!(from_minor_units(1500, "jpy"), Decimal::new(1500, 0));
        assert_eq!(to_minor_units(Decimal::new(1500, 0), "kwd"), None);
        assert_eq!(minor_unit_exponent("eur"), Some(2));
    }

    #[test]
    fn test_cart_item_uses_camel_case() {
        let item: CartItem = serde_json::from_str(r#"{"bookId":"B1","quantity":2}"#).unwrap();
        assert_eq!(item, CartItem::new("B1", 2));
    }
}
