use crate::app::ports::{CatalogReader, EntitlementStore, StorageSigner};
use crate::domain::{DownloadToken, Entitlement};
use crate::error::{Result, StorefrontError};
use crate::observability::metrics;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_TTL_SECONDS: u64 = 60;
/// Links are meant to be short-lived; anything longer is cut to a day.
pub const MAX_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Turns an entitlement into a short-lived signed link to the book's file.
pub struct DownloadAuthorizer {
    catalog: Arc<dyn CatalogReader>,
    entitlements: Arc<dyn EntitlementStore>,
    signer: Arc<dyn StorageSigner>,
    ttl_seconds: u64,
}

impl DownloadAuthorizer {
    pub fn new(
        catalog: Arc<dyn CatalogReader>,
        entitlements: Arc<dyn EntitlementStore>,
        signer: Arc<dyn StorageSigner>,
    ) -> Self {
        Self {
            catalog,
            entitlements,
            signer,
            ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }

    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds.min(MAX_TTL_SECONDS);
        self
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    pub async fn authorize_download(&self, user_id: &str, book_id: &str) -> Result<DownloadToken> {
        // Unknown books are NotFound whatever the entitlement state
        let book = match self.catalog.get_book(book_id).await? {
            Some(book) => book,
            None => {
                metrics::download_denied("not_found");
                return Err(StorefrontError::not_found("book", book_id));
            }
        };

        if !self.entitlements.has_access(user_id, book_id).await? {
            debug!(user_id, book_id, "Download refused, no entitlement");
            metrics::download_denied("access_denied");
            return Err(StorefrontError::AccessDenied {
                book_id: book_id.to_string(),
            });
        }

        let issued_at = Utc::now();
        let url = self
            .signer
            .create_signed_reference(&book.file_ref, self.ttl_seconds)
            .await?;

        metrics::download_authorized();
        info!(user_id, book_id, ttl = self.ttl_seconds, "Download authorized");
        Ok(DownloadToken {
            token: url,
            user_id: user_id.to_string(),
            book_id: book.id,
            expires_at: issued_at + Duration::seconds(self.ttl_seconds.min(MAX_TTL_SECONDS) as i64),
        })
    }

    /// Every book the user is entitled to.
    pub async fn library(&self, user_id: &str) -> Result<Vec<Entitlement>> {
        self.entitlements.list_for_user(user_id).await
    }
}
