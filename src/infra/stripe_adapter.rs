use crate::app::ports::PaymentProvider;
use crate::domain::{
    from_minor_units, ConfirmationPayload, PaymentConfirmation, PaymentIntent, ProviderStatus,
};
use crate::error::{Result, StorefrontError};
use crate::infra::signature::verify_hmac_sha256_hex;
use crate::infra::validate_charge;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Payment intents over the Stripe REST API.
pub struct StripeProvider {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
    webhook_secret: String,
    currency: String,
    tolerance_secs: i64,
    /// Idempotency key generation per order. Stripe replays a stored 5xx for the
    /// same key, so a server error moves the order on to a fresh key.
    key_generations: Mutex<HashMap<Uuid, u32>>,
}

#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    amount: i64,
    currency: String,
    status: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl StripeIntent {
    fn order_id(&self) -> Result<Uuid> {
        let raw = self.metadata.get("order_id").ok_or_else(|| {
            StorefrontError::MalformedPayload(format!("intent {} has no order_id metadata", self.id))
        })?;
        Uuid::parse_str(raw)
            .map_err(|e| StorefrontError::MalformedPayload(format!("bad order_id '{raw}': {e}")))
    }

    fn into_domain(self) -> Result<PaymentIntent> {
        let order_id = self.order_id()?;
        Ok(PaymentIntent {
            provider_status: map_status(&self.status),
            order_id,
            amount: from_minor_units(self.amount, &self.currency),
            currency: self.currency,
            client_secret: self.client_secret,
            id: self.id,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    kind: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

fn map_status(status: &str) -> ProviderStatus {
    match status {
        "succeeded" => ProviderStatus::Succeeded,
        "canceled" => ProviderStatus::Failed,
        _ => ProviderStatus::RequiresAction,
    }
}

/// Splits `t=<unix>,v1=<hex>[,v1=<hex>...]`. Unknown schemes are ignored.
fn parse_signature_header(header: &str) -> Result<(i64, Vec<&str>)> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    StorefrontError::InvalidSignature("timestamp is not an integer".into())
                })?);
            }
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }
    let timestamp = timestamp
        .ok_or_else(|| StorefrontError::InvalidSignature("missing timestamp".into()))?;
    if signatures.is_empty() {
        return Err(StorefrontError::InvalidSignature("missing v1 signature".into()));
    }
    Ok((timestamp, signatures))
}

fn transport_error(e: reqwest::Error) -> StorefrontError {
    StorefrontError::ProviderUnavailable(e.to_string())
}

impl StripeProvider {
    pub fn new(
        secret_key: impl Into<String>,
        webhook_secret: impl Into<String>,
        currency: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            secret_key: secret_key.into(),
            webhook_secret: webhook_secret.into(),
            currency: currency.into(),
            tolerance_secs: 300,
            key_generations: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_tolerance_secs(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Network errors and 429s reuse the current key; Stripe never stored them.
    fn idempotency_key(&self, order_id: Uuid) -> String {
        let generations = self.key_generations.lock().unwrap_or_else(PoisonError::into_inner);
        match generations.get(&order_id) {
            Some(generation) => format!("order-{order_id}-{generation}"),
            None => format!("order-{order_id}"),
        }
    }

    fn rotate_idempotency_key(&self, order_id: Uuid) {
        let mut generations = self.key_generations.lock().unwrap_or_else(PoisonError::into_inner);
        *generations.entry(order_id).or_insert(0) += 1;
    }

    async fn read_intent(&self, resp: reqwest::Response) -> Result<PaymentIntent> {
        let status = resp.status();
        let text = resp.text().await.map_err(transport_error)?;

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(StorefrontError::ProviderUnavailable(format!("stripe returned {status}")));
        }
        if !status.is_success() {
            let message = serde_json::from_str::<StripeErrorBody>(&text)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or_else(|| text.clone());
            return Err(StorefrontError::ProviderRejected(format!("{status}: {message}")));
        }

        let intent: StripeIntent = serde_json::from_str(&text)?;
        intent.into_domain()
    }

    /// Signature verification against an explicit clock.
    pub fn confirm_at(
        &self,
        payload: &ConfirmationPayload,
        now_unix: i64,
    ) -> Result<Option<PaymentConfirmation>> {
        let header = payload
            .signature
            .as_deref()
            .ok_or_else(|| StorefrontError::InvalidSignature("missing Stripe-Signature header".into()))?;
        let (timestamp, signatures) = parse_signature_header(header)?;

        if (now_unix - timestamp).abs() > self.tolerance_secs {
            return Err(StorefrontError::InvalidSignature(
                "timestamp outside tolerance".into(),
            ));
        }

        let mut signed = format!("{timestamp}.").into_bytes();
        signed.extend_from_slice(&payload.body);
        let authentic = signatures
            .iter()
            .any(|sig| verify_hmac_sha256_hex(self.webhook_secret.as_bytes(), &signed, sig));
        if !authentic {
            return Err(StorefrontError::InvalidSignature(
                "no v1 signature matches the payload".into(),
            ));
        }

        let event: StripeEvent = serde_json::from_slice(&payload.body)
            .map_err(|e| StorefrontError::MalformedPayload(e.to_string()))?;
        let succeeded = match event.kind.as_str() {
            "payment_intent.succeeded" => true,
            "payment_intent.payment_failed" | "payment_intent.canceled" => false,
            other => {
                debug!(event_type = other, "Ignoring Stripe event");
                return Ok(None);
            }
        };

        let intent: StripeIntent = serde_json::from_value(event.data.object)
            .map_err(|e| StorefrontError::MalformedPayload(e.to_string()))?;
        Ok(Some(PaymentConfirmation {
            order_id: intent.order_id()?,
            intent_id: intent.id,
            succeeded,
        }))
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    async fn create_intent(
        &self,
        order_id: Uuid,
        amount: Decimal,
        currency: &str,
    ) -> Result<PaymentIntent> {
        let minor = validate_charge(amount, currency, &self.currency)?;
        let params = [
            ("amount", minor.to_string()),
            ("currency", currency.to_lowercase()),
            ("metadata[order_id]", order_id.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];

        let resp = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            // Re-submitting the same order yields the same intent
            .header("Idempotency-Key", self.idempotency_key(order_id))
            .form(&params)
            .send()
            .await
            .map_err(transport_error)?;

        if resp.status().is_server_error() {
            self.rotate_idempotency_key(order_id);
        }
        self.read_intent(resp).await
    }

    async fn get_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        let resp = self
            .client
            .get(format!("{}/v1/payment_intents/{}", self.api_base, intent_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(transport_error)?;

        self.read_intent(resp).await
    }

    fn confirm_intent(&self, payload: &ConfirmationPayload) -> Result<Option<PaymentConfirmation>> {
        self.confirm_at(payload, Utc::now().timestamp())
    }
}
