use crate::domain::OrderStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StorefrontError {
    #[error("Invalid cart: {0}")]
    InvalidCart(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Stale transition on order {order_id}: expected {expected}, found {actual}")]
    StaleTransition {
        order_id: Uuid,
        expected: OrderStatus,
        actual: OrderStatus,
    },

    #[error("Illegal order transition: {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Payment provider rejected request: {0}")]
    ProviderRejected(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Payment initialization failed for order {order_id}: {reason}")]
    PaymentInitFailed { order_id: Uuid, reason: String },

    #[error("Access denied to book {book_id}")]
    AccessDenied { book_id: String },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Missing or invalid user identity")]
    Unauthenticated,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorefrontError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StorefrontError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Transient failures that a caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorefrontError::ProviderUnavailable(_) | StorefrontError::StoreUnavailable(_) => true,
            StorefrontError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Short label used for metrics and audit logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StorefrontError::InvalidCart(_) => "invalid_cart",
            StorefrontError::InvalidRequest(_) => "invalid_request",
            StorefrontError::NotFound { .. } => "not_found",
            StorefrontError::StaleTransition { .. } => "stale_transition",
            StorefrontError::IllegalTransition { .. } => "illegal_transition",
            StorefrontError::ProviderUnavailable(_) => "provider_unavailable",
            StorefrontError::ProviderRejected(_) => "provider_rejected",
            StorefrontError::InvalidAmount(_) => "invalid_amount",
            StorefrontError::InvalidSignature(_) => "invalid_signature",
            StorefrontError::MalformedPayload(_) => "malformed_payload",
            StorefrontError::PaymentInitFailed { .. } => "payment_init_failed",
            StorefrontError::AccessDenied { .. } => "access_denied",
            StorefrontError::StoreUnavailable(_) => "store_unavailable",
            StorefrontError::Unauthenticated => "unauthenticated",
            StorefrontError::Config(_) => "config",
            StorefrontError::Http(_) => "http",
            StorefrontError::Json(_) => "json",
            StorefrontError::Toml(_) => "toml",
            StorefrontError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, StorefrontError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(StorefrontError::ProviderUnavailable("503".into()).is_retryable());
        assert!(StorefrontError::StoreUnavailable("down".into()).is_retryable());
        assert!(!StorefrontError::InvalidAmount("0".into()).is_retryable());
        assert!(!StorefrontError::InvalidSignature("bad".into()).is_retryable());
        assert!(!StorefrontError::InvalidCart("empty".into()).is_retryable());
    }

    #[test]
    fn test_stale_transition_message() {
        let order_id = Uuid::nil();
        let err = StorefrontError::StaleTransition {
            order_id,
            expected: OrderStatus::PaymentRequested,
            actual: OrderStatus::Paid,
        };
        assert_eq!(
            err.to_string(),
            format!("Stale transition on order {order_id}: expected payment_requested, found paid")
        );
        assert_eq!(err.kind(), "stale_transition");
    }
}
