use crate::app::ports::PaymentProvider;
use crate::domain::{
    ConfirmationPayload, PaymentConfirmation, PaymentIntent, ProviderStatus,
};
use crate::error::{Result, StorefrontError};
use crate::infra::signature::{hmac_sha256_hex, verify_hmac_sha256_hex};
use crate::infra::validate_charge;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

pub const SIGNATURE_HEADER: &str = "x-manual-signature";

/// Webhook body understood by the manual provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualEvent {
    pub intent_id: String,
    pub order_id: Uuid,
    pub status: String,
}

/// Builds a signed webhook delivery for the manual provider.
pub fn sign_manual_event(
    webhook_secret: &str,
    intent_id: &str,
    order_id: Uuid,
    succeeded: bool,
) -> Result<ConfirmationPayload> {
    let event = ManualEvent {
        intent_id: intent_id.to_string(),
        order_id,
        status: if succeeded { "succeeded" } else { "failed" }.to_string(),
    };
    let body = serde_json::to_vec(&event)?;
    let signature = hmac_sha256_hex(webhook_secret.as_bytes(), &body);
    Ok(ConfirmationPayload::new(body, Some(signature)))
}

/// In-process payment provider for local development and tests. Intents live in
/// memory and are settled by posting a signed `ManualEvent` to the webhook.
pub struct ManualProvider {
    webhook_secret: String,
    currency: String,
    intents: Mutex<HashMap<String, PaymentIntent>>,
}

impl ManualProvider {
    pub fn new(webhook_secret: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            currency: currency.into(),
            intents: Mutex::new(HashMap::new()),
        }
    }

    pub fn signed_event(
        &self,
        intent_id: &str,
        order_id: Uuid,
        succeeded: bool,
    ) -> Result<ConfirmationPayload> {
        sign_manual_event(&self.webhook_secret, intent_id, order_id, succeeded)
    }

    fn intents(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, PaymentIntent>>> {
        self.intents
            .lock()
            .map_err(|_| StorefrontError::ProviderUnavailable("manual provider lock poisoned".into()))
    }
}

#[async_trait]
impl PaymentProvider for ManualProvider {
    fn name(&self) -> &'static str {
        "manual"
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
        validate_charge(amount, currency, &self.currency)?;

        let mut intents = self.intents()?;
        // Same order, same open intent
        if let Some(existing) = intents.values().find(|i| {
            i.order_id == order_id && i.provider_status == ProviderStatus::RequiresAction
        }) {
            return Ok(existing.clone());
        }

        let id = format!("man_{}", Uuid::new_v4().simple());
        let intent = PaymentIntent {
            client_secret: Some(format!("{id}_secret_{}", hex::encode(rand::random::<[u8; 16]>()))),
            id: id.clone(),
            order_id,
            amount,
            currency: currency.to_lowercase(),
            provider_status: ProviderStatus::RequiresAction,
        };
        intents.insert(id, intent.clone());

        info!(intent_id = %intent.id, %order_id, %amount, "Created manual payment intent");
        Ok(intent)
    }

    async fn get_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        self.intents()?
            .get(intent_id)
            .cloned()
            .ok_or_else(|| StorefrontError::not_found("payment intent", intent_id))
    }

    fn confirm_intent(&self, payload: &ConfirmationPayload) -> Result<Option<PaymentConfirmation>> {
        let signature = payload.signature.as_deref().ok_or_else(|| {
            StorefrontError::InvalidSignature(format!("missing {SIGNATURE_HEADER} header"))
        })?;
        if !verify_hmac_sha256_hex(self.webhook_secret.as_bytes(), &payload.body, signature) {
            return Err(StorefrontError::InvalidSignature(
                "signature does not match payload".into(),
            ));
        }

        let event: ManualEvent = serde_json::from_slice(&payload.body)
            .map_err(|e| StorefrontError::MalformedPayload(e.to_string()))?;
        let (succeeded, status) = match event.status.as_str() {
            "succeeded" => (true, ProviderStatus::Succeeded),
            "failed" => (false, ProviderStatus::Failed),
            other => {
                debug!(status = other, "Ignoring manual event");
                return Ok(None);
            }
        };

        // Mirror the settled state so reconciliation sees it too
        if let Some(intent) = self.intents()?.get_mut(&event.intent_id) {
            intent.provider_status = status;
        }

        Ok(Some(PaymentConfirmation {
            order_id: event.order_id,
            intent_id: event.intent_id,
            succeeded,
        }))
    }
}
