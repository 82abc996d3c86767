use crate::app::ports::{CatalogReader, EntitlementStore, OrderStore, PaymentProvider, StorageSigner};
use crate::app::{CheckoutOrchestrator, DownloadAuthorizer, OrderLedger};
use crate::config::{Config, ProviderKind, SignerKind, StoreKind};
use crate::error::{Result, StorefrontError};
use crate::infra::in_memory::{InMemoryCatalog, InMemoryEntitlementStore, InMemoryOrderStore};
use crate::infra::local_signer::LocalUrlSigner;
use crate::infra::manual_provider::ManualProvider;
use crate::infra::stripe_adapter::StripeProvider;
use crate::infra::supabase::SupabaseClient;
use crate::infra::supabase_rest::SupabaseRestStore;
use crate::infra::supabase_storage::SupabaseStorageSigner;
use std::sync::Arc;
use tracing::info;

/// Use cases wired to the adapters the configuration selects.
#[derive(Clone)]
pub struct Services {
    pub checkout: Arc<CheckoutOrchestrator>,
    pub downloads: Arc<DownloadAuthorizer>,
    /// Present when downloads are served by this process under `/files`.
    pub local_files: Option<Arc<LocalUrlSigner>>,
}

struct Stores {
    catalog: Arc<dyn CatalogReader>,
    orders: Arc<dyn OrderStore>,
    entitlements: Arc<dyn EntitlementStore>,
}

impl Services {
    pub fn from_config(config: &Config) -> Result<Self> {
        let supabase = match (config.store.kind, config.downloads.signer) {
            (StoreKind::Supabase, _) | (_, SignerKind::Supabase) => {
                Some(Arc::new(SupabaseClient::new(config.supabase_settings()?)?))
            }
            _ => None,
        };
        let supabase_client = || -> Result<Arc<SupabaseClient>> {
            supabase
                .clone()
                .ok_or_else(|| StorefrontError::Config("Supabase settings are missing".into()))
        };

        let stores = match config.store.kind {
            StoreKind::Memory => {
                info!(books = config.catalog.len(), "Using in-memory stores");
                Stores {
                    catalog: Arc::new(InMemoryCatalog::with_books(config.catalog.clone())),
                    orders: Arc::new(InMemoryOrderStore::new()),
                    entitlements: Arc::new(InMemoryEntitlementStore::new()),
                }
            }
            StoreKind::Supabase => {
                let rest = Arc::new(SupabaseRestStore::new(supabase_client()?));
                info!("Using Supabase stores");
                Stores {
                    catalog: rest.clone(),
                    orders: rest.clone(),
                    entitlements: rest,
                }
            }
        };

        let provider = build_provider(config)?;

        let (signer, local_files): (Arc<dyn StorageSigner>, Option<Arc<LocalUrlSigner>>) =
            match config.downloads.signer {
                SignerKind::Supabase => {
                    let signer = SupabaseStorageSigner::new(
                        supabase_client()?,
                        config.store.supabase_bucket.clone(),
                    );
                    let signer: Arc<dyn StorageSigner> = Arc::new(signer);
                    (signer, None)
                }
                SignerKind::Local => {
                    let key = config.downloads.signing_key.clone().ok_or_else(|| {
                        StorefrontError::Config("downloads.signing_key is required for the local signer".into())
                    })?;
                    let signer = Arc::new(LocalUrlSigner::new(
                        config.server.base_url.clone(),
                        key,
                        config.downloads.local_root.clone(),
                    ));
                    let shared: Arc<dyn StorageSigner> = signer.clone();
                    (shared, Some(signer))
                }
            };

        let ledger = Arc::new(
            OrderLedger::new(stores.catalog.clone(), stores.orders)
                .with_stock_enforcement(config.checkout.enforce_stock),
        );
        let checkout = CheckoutOrchestrator::new(
            ledger,
            provider,
            stores.entitlements.clone(),
            config.checkout.currency.clone(),
        )
        .with_retry_policy(config.checkout.retry_policy())
        .with_pending_timeout(config.checkout.pending_timeout());

        let downloads = DownloadAuthorizer::new(stores.catalog, stores.entitlements, signer)
            .with_ttl_seconds(config.downloads.ttl_secs);

        Ok(Self {
            checkout: Arc::new(checkout),
            downloads: Arc::new(downloads),
            local_files,
        })
    }
}

fn build_provider(config: &Config) -> Result<Arc<dyn PaymentProvider>> {
    let webhook_secret = config
        .webhook_secret()
        .ok_or_else(|| StorefrontError::Config("payments.webhook_secret must be set".into()))?;
    let currency = config.checkout.currency.clone();

    let provider: Arc<dyn PaymentProvider> = match config.payments.provider {
        ProviderKind::Stripe => {
            let key = config.payments.stripe_secret_key.clone().ok_or_else(|| {
                StorefrontError::Config("payments.stripe_secret_key is required for stripe".into())
            })?;
            let mut stripe = StripeProvider::new(key, webhook_secret, currency)?
                .with_tolerance_secs(config.payments.signature_tolerance_secs);
            if let Some(base) = &config.payments.stripe_api_base {
                stripe = stripe.with_api_base(base.clone());
            }
            Arc::new(stripe)
        }
        ProviderKind::Manual => Arc::new(ManualProvider::new(webhook_secret, currency)),
    };
    info!(provider = provider.name(), "Payment provider configured");
    Ok(provider)
}
