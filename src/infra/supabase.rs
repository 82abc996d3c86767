use crate::error::{Result, StorefrontError};
use reqwest::{Method, RequestBuilder, StatusCode};
use std::time::Duration;

/// Connection details for a Supabase project.
#[derive(Debug, Clone)]
pub struct SupabaseSettings {
    pub url: String,
    pub service_role_key: String,
}

impl SupabaseSettings {
    pub fn new(url: impl Into<String>, service_role_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            service_role_key: service_role_key.into(),
        }
    }

    /// Resolves settings from the environment:
    /// - SUPABASE_URL (e.g., https://xyzcompany.supabase.co) OR SUPABASE_PROJECT_REF
    /// - SUPABASE_SERVICE_ROLE_KEY
    pub fn from_env() -> Result<Self> {
        let url = match std::env::var("SUPABASE_URL") {
            Ok(u) => u,
            Err(_) => {
                let project_ref = std::env::var("SUPABASE_PROJECT_REF").map_err(|_| {
                    StorefrontError::Config("SUPABASE_URL or SUPABASE_PROJECT_REF must be set".into())
                })?;
                format!("https://{}.supabase.co", project_ref)
            }
        };
        let key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .map_err(|_| StorefrontError::Config("SUPABASE_SERVICE_ROLE_KEY must be set".into()))?;
        Ok(Self::new(url, key))
    }
}

/// Thin authenticated wrapper around `reqwest` shared by the Supabase adapters.
pub struct SupabaseClient {
    http: reqwest::Client,
    settings: SupabaseSettings,
}

impl SupabaseClient {
    pub fn new(settings: SupabaseSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, settings })
    }

    pub fn base_url(&self) -> &str {
        &self.settings.url
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let key = &self.settings.service_role_key;
        self.http
            .request(method, format!("{}{}", self.settings.url, path))
            .header("Authorization", format!("Bearer {}", key))
            .header("apikey", key.clone())
    }
}

/// Sends the request and returns status and body text. Transport errors and 5xx/429
/// are transient; other statuses are left to the caller.
pub(crate) async fn send(request: RequestBuilder) -> Result<(StatusCode, String)> {
    let resp = request
        .send()
        .await
        .map_err(|e| StorefrontError::StoreUnavailable(e.to_string()))?;
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(StorefrontError::StoreUnavailable(format!(
            "supabase returned {status}"
        )));
    }
    Ok((status, body))
}

pub(crate) fn rejected(status: StatusCode, body: &str) -> StorefrontError {
    StorefrontError::StoreUnavailable(format!("supabase rejected request: {status} - {body}"))
}
