use crate::app::ports::StorageSigner;
use crate::error::{Result, StorefrontError};
use crate::infra::supabase::{rejected, send, SupabaseClient};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Signed download links from Supabase Storage.
pub struct SupabaseStorageSigner {
    client: Arc<SupabaseClient>,
    bucket: String,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

impl SupabaseStorageSigner {
    pub fn new(client: Arc<SupabaseClient>, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    fn absolute(&self, signed_path: &str) -> String {
        if signed_path.starts_with("http://") || signed_path.starts_with("https://") {
            return signed_path.to_string();
        }
        format!(
            "{}/storage/v1/{}",
            self.client.base_url(),
            signed_path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl StorageSigner for SupabaseStorageSigner {
    async fn create_signed_reference(&self, file_ref: &str, ttl_seconds: u64) -> Result<String> {
        let path = format!(
            "/storage/v1/object/sign/{}/{}",
            self.bucket,
            file_ref.trim_start_matches('/')
        );
        let request = self
            .client
            .request(Method::POST, &path)
            .json(&json!({ "expiresIn": ttl_seconds }));
        let (status, body) = send(request).await?;

        match status {
            s if s.is_success() => {
                let signed: SignResponse = serde_json::from_str(&body)?;
                Ok(self.absolute(&signed.signed_url))
            }
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
                Err(StorefrontError::not_found("file", file_ref))
            }
            other => Err(rejected(other, &body)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::supabase::SupabaseSettings;

    #[test]
    fn test_signed_path_made_absolute() {
        let client = Arc::new(
            SupabaseClient::new(SupabaseSettings::new("https://abc.supabase.co/", "key")).unwrap(),
        );
        let signer = SupabaseStorageSigner::new(client, "books");

        assert_eq!(
            signer.absolute("/object/sign/books/b1.epub?token=t"),
            "https://abc.supabase.co/storage/v1/object/sign/books/b1.epub?token=t"
        );
        assert_eq!(
            signer.absolute("https://cdn.example.com/x?token=t"),
            "https://cdn.example.com/x?token=t"
        );
    }
}
