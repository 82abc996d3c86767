use crate::app::ports::StorageSigner;
use crate::error::{Result, StorefrontError};
use crate::infra::signature::{hmac_sha256_hex, verify_hmac_sha256_hex};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Url;
use std::path::{Component, Path, PathBuf};

/// HMAC-signed links to files served by this process from a local directory.
/// Links look like `{base_url}/files/{file_ref}?expires=<unix>&signature=<hex>`,
/// with each path segment of the ref percent-encoded.
pub struct LocalUrlSigner {
    base_url: String,
    signing_key: String,
    root: PathBuf,
}

impl LocalUrlSigner {
    pub fn new(base_url: impl Into<String>, signing_key: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signing_key: signing_key.into(),
            root: root.into(),
        }
    }

    fn message(file_ref: &str, expires: i64) -> Vec<u8> {
        format!("{file_ref}:{expires}").into_bytes()
    }

    pub fn sign_at(&self, file_ref: &str, ttl_seconds: u64, now_unix: i64) -> Result<String> {
        let file_ref = file_ref.trim_start_matches('/');
        let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
        let expires = now_unix.saturating_add(ttl);
        let signature = hmac_sha256_hex(self.signing_key.as_bytes(), &Self::message(file_ref, expires));

        let mut url = Url::parse(&self.base_url)
            .map_err(|e| StorefrontError::Config(format!("bad base url '{}': {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| StorefrontError::Config(format!("base url '{}' cannot hold a path", self.base_url)))?
            .pop_if_empty()
            .push("files")
            .extend(file_ref.split('/'));
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &signature);
        Ok(url.into())
    }

    /// Checks a presented link. Expired and forged links are both `AccessDenied`.
    pub fn verify(&self, file_ref: &str, expires: i64, signature: &str, now_unix: i64) -> Result<()> {
        let file_ref = file_ref.trim_start_matches('/');
        let denied = || StorefrontError::AccessDenied {
            book_id: file_ref.to_string(),
        };
        if now_unix > expires {
            return Err(denied());
        }
        if !verify_hmac_sha256_hex(self.signing_key.as_bytes(), &Self::message(file_ref, expires), signature) {
            return Err(denied());
        }
        Ok(())
    }

    /// Maps a file ref onto the storage root, refusing anything that escapes it.
    pub fn resolve_path(&self, file_ref: &str) -> Result<PathBuf> {
        let relative = Path::new(file_ref.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || relative.as_os_str().is_empty() {
            return Err(StorefrontError::not_found("file", file_ref));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl StorageSigner for LocalUrlSigner {
    async fn create_signed_reference(&self, file_ref: &str, ttl_seconds: u64) -> Result<String> {
        self.sign_at(file_ref, ttl_seconds, Utc::now().timestamp())
    }
}
