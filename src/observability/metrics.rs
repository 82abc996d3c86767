//! Prometheus metrics for the order engine.
//!
//! Recording goes through the `metrics` facade, so calls are no-ops until
//! `init` installs the recorder.

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fmt;
use std::sync::OnceLock;
use tracing::info;

/// Every metric the service emits. Avoids magic strings at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    CheckoutSubmitted,
    CheckoutRejected,
    PaymentInitFailed,
    ProviderRetries,
    WebhookRejected,
    ConfirmationsHandled,
    FulfillmentIncomplete,
    SweepRefulfilled,
    SweepReconciled,
    SweepExpired,
    DownloadsAuthorized,
    DownloadsDenied,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::CheckoutSubmitted => "storefront_checkout_submitted_total",
            MetricName::CheckoutRejected => "storefront_checkout_rejected_total",
            MetricName::PaymentInitFailed => "storefront_payment_init_failed_total",
            MetricName::ProviderRetries => "storefront_retries_total",
            MetricName::WebhookRejected => "storefront_webhook_rejected_total",
            MetricName::ConfirmationsHandled => "storefront_confirmations_total",
            MetricName::FulfillmentIncomplete => "storefront_fulfillment_incomplete_total",
            MetricName::SweepRefulfilled => "storefront_sweep_refulfilled_total",
            MetricName::SweepReconciled => "storefront_sweep_reconciled_total",
            MetricName::SweepExpired => "storefront_sweep_expired_total",
            MetricName::DownloadsAuthorized => "storefront_downloads_authorized_total",
            MetricName::DownloadsDenied => "storefront_downloads_denied_total",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MetricName::CheckoutSubmitted => "Orders created from a submitted cart",
            MetricName::CheckoutRejected => "Checkout submissions rejected before an order existed",
            MetricName::PaymentInitFailed => "Orders left pending because no payment intent could be created",
            MetricName::ProviderRetries => "Backoff retries after transient failures",
            MetricName::WebhookRejected => "Payment webhooks rejected before processing",
            MetricName::ConfirmationsHandled => "Payment confirmations by outcome",
            MetricName::FulfillmentIncomplete => "Paid orders whose entitlement grants partially failed",
            MetricName::SweepRefulfilled => "Paid orders fulfilled by the recovery sweep",
            MetricName::SweepReconciled => "Payment requests settled from provider state by the sweep",
            MetricName::SweepExpired => "Pending orders cancelled after the timeout",
            MetricName::DownloadsAuthorized => "Signed download links issued",
            MetricName::DownloadsDenied => "Download requests refused",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            CheckoutSubmitted,
            CheckoutRejected,
            PaymentInitFailed,
            ProviderRetries,
            WebhookRejected,
            ConfirmationsHandled,
            FulfillmentIncomplete,
            SweepRefulfilled,
            SweepReconciled,
            SweepExpired,
            DownloadsAuthorized,
            DownloadsDenied,
        ]
        .into_iter()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder. Calling it again returns the existing handle.
pub fn init() -> Result<PrometheusHandle, Box<dyn std::error::Error + Send + Sync>> {
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    for name in MetricName::all_metrics() {
        describe_counter!(name.as_str(), name.description());
    }

    info!("Metrics system initialized");
    Ok(HANDLE.get_or_init(|| handle).clone())
}

/// Prometheus text exposition, empty when metrics were never initialized.
pub fn render() -> String {
    HANDLE.get().map(|h| h.render()).unwrap_or_default()
}

pub fn checkout_submitted() {
    counter!(MetricName::CheckoutSubmitted.as_str()).increment(1);
}

pub fn checkout_rejected(reason: &'static str) {
    counter!(MetricName::CheckoutRejected.as_str(), "reason" => reason).increment(1);
}

pub fn payment_init_failed(reason: &'static str) {
    counter!(MetricName::PaymentInitFailed.as_str(), "reason" => reason).increment(1);
}

pub fn retry_scheduled(operation: &str) {
    counter!(MetricName::ProviderRetries.as_str(), "operation" => operation.to_string()).increment(1);
}

pub fn webhook_rejected(reason: &'static str) {
    counter!(MetricName::WebhookRejected.as_str(), "reason" => reason).increment(1);
}

pub fn confirmation_handled(outcome: &'static str) {
    counter!(MetricName::ConfirmationsHandled.as_str(), "outcome" => outcome).increment(1);
}

pub fn fulfillment_incomplete() {
    counter!(MetricName::FulfillmentIncomplete.as_str()).increment(1);
}

pub fn sweep_completed(refulfilled: usize, reconciled: usize, expired: usize) {
    counter!(MetricName::SweepRefulfilled.as_str()).increment(refulfilled as u64);
    counter!(MetricName::SweepReconciled.as_str()).increment(reconciled as u64);
    counter!(MetricName::SweepExpired.as_str()).increment(expired as u64);
}

pub fn download_authorized() {
    counter!(MetricName::DownloadsAuthorized.as_str()).increment(1);
}

pub fn download_denied(reason: &'static str) {
    counter!(MetricName::DownloadsDenied.as_str(), "reason" => reason).increment(1);
}
