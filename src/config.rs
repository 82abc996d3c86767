use crate::app::retry::RetryPolicy;
use crate::app::download_use_case::MAX_TTL_SECONDS;
use crate::domain::{minor_unit_exponent, Book};
use crate::error::{Result, StorefrontError};
use crate::infra::supabase::SupabaseSettings;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "storefront.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub checkout: CheckoutConfig,
    pub payments: PaymentsConfig,
    pub downloads: DownloadsConfig,
    pub store: StoreConfig,
    /// Seed books for the in-memory catalog.
    pub catalog: Vec<Book>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Header the upstream auth gateway uses to pass the authenticated user id.
    pub auth_header: String,
    /// Public base URL, used for locally signed download links.
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_header: "x-user-id".into(),
            base_url: "http://localhost:8080".into(),
        }
    }
}

pub const MAX_PENDING_TIMEOUT_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckoutConfig {
    pub currency: String,
    pub enforce_stock: bool,
    pub retry_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub pending_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: "usd".into(),
            enforce_stock: false,
            retry_attempts: 4,
            retry_base_ms: 200,
            retry_max_ms: 5_000,
            pending_timeout_secs: 24 * 60 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl CheckoutConfig {
    /// Bounded so it always fits a `chrono::Duration`.
    pub fn pending_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pending_timeout_secs.min(MAX_PENDING_TIMEOUT_SECS) as i64)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_ms),
            max_delay: Duration::from_millis(self.retry_max_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Stripe,
    Manual,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentsConfig {
    pub provider: ProviderKind,
    pub stripe_secret_key: Option<String>,
    pub stripe_api_base: Option<String>,
    pub webhook_secret: Option<String>,
    pub signature_tolerance_secs: i64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Manual,
            stripe_secret_key: None,
            stripe_api_base: None,
            webhook_secret: None,
            signature_tolerance_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerKind {
    Supabase,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadsConfig {
    pub ttl_secs: u64,
    pub signer: SignerKind,
    pub local_root: PathBuf,
    pub signing_key: Option<String>,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            signer: SignerKind::Local,
            local_root: PathBuf::from("files"),
            signing_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Supabase,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub supabase_url: Option<String>,
    pub supabase_service_role_key: Option<String>,
    pub supabase_bucket: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            supabase_url: None,
            supabase_service_role_key: None,
            supabase_bucket: "books".into(),
        }
    }
}

impl Config {
    /// Loads `storefront.toml` from the working directory, or defaults when it is absent.
    pub fn load() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if path.exists() {
            Self::load_from(path)
        } else {
            let mut config = Config::default();
            config.apply_env_overrides()?;
            config.validate()?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            StorefrontError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("STOREFRONT_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| StorefrontError::Config(format!("STOREFRONT_PORT is not a port: {port}")))?;
        }
        if let Ok(key) = std::env::var("STRIPE_SECRET_KEY") {
            self.payments.stripe_secret_key = Some(key);
        }
        if let Ok(secret) = std::env::var("STOREFRONT_WEBHOOK_SECRET") {
            self.payments.webhook_secret = Some(secret);
        }
        if let Ok(url) = std::env::var("SUPABASE_URL") {
            self.store.supabase_url = Some(url);
        }
        if let Ok(key) = std::env::var("SUPABASE_SERVICE_ROLE_KEY") {
            self.store.supabase_service_role_key = Some(key);
        }
        if let Ok(bucket) = std::env::var("SUPABASE_BUCKET") {
            self.store.supabase_bucket = bucket;
        }
        if let Ok(key) = std::env::var("STOREFRONT_SIGNING_KEY") {
            self.downloads.signing_key = Some(key);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let currency = &self.checkout.currency;
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(StorefrontError::Config(format!(
                "checkout.currency must be an ISO 4217 code, got '{currency}'"
            )));
        }
        if minor_unit_exponent(currency).is_none() {
            return Err(StorefrontError::Config(format!(
                "checkout.currency '{currency}' uses three-decimal minor units, which are not supported"
            )));
        }
        if self.downloads.ttl_secs == 0 || self.downloads.ttl_secs > MAX_TTL_SECONDS {
            return Err(StorefrontError::Config(format!(
                "downloads.ttl_secs must be between 1 and {MAX_TTL_SECONDS}"
            )));
        }
        if self.checkout.pending_timeout_secs == 0
            || self.checkout.pending_timeout_secs > MAX_PENDING_TIMEOUT_SECS
        {
            return Err(StorefrontError::Config(format!(
                "checkout.pending_timeout_secs must be between 1 and {MAX_PENDING_TIMEOUT_SECS}"
            )));
        }
        if self.server.auth_header.trim().is_empty() {
            return Err(StorefrontError::Config("server.auth_header must not be empty".into()));
        }
        if self.webhook_secret().is_none() {
            return Err(StorefrontError::Config(
                "payments.webhook_secret (or STOREFRONT_WEBHOOK_SECRET) must be set".into(),
            ));
        }
        if self.payments.provider == ProviderKind::Stripe && self.payments.stripe_secret_key.is_none() {
            return Err(StorefrontError::Config(
                "payments.stripe_secret_key (or STRIPE_SECRET_KEY) is required for the stripe provider".into(),
            ));
        }
        if self.downloads.signer == SignerKind::Local && self.downloads.signing_key.is_none() {
            return Err(StorefrontError::Config(
                "downloads.signing_key (or STOREFRONT_SIGNING_KEY) is required for the local signer".into(),
            ));
        }
        for book in &self.catalog {
            if book.id.trim().is_empty() || book.price.is_sign_negative() {
                return Err(StorefrontError::Config(format!(
                    "catalog entry '{}' needs an id and a non-negative price",
                    book.id
                )));
            }
        }
        Ok(())
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.payments
            .webhook_secret
            .as_deref()
            .filter(|s| !s.is_empty())
    }

    /// Supabase connection settings, from the store section or the environment.
    pub fn supabase_settings(&self) -> Result<SupabaseSettings> {
        match (&self.store.supabase_url, &self.store.supabase_service_role_key) {
            (Some(url), Some(key)) => Ok(SupabaseSettings::new(url.clone(), key.clone())),
            _ => SupabaseSettings::from_env(),
        }
    }
}
