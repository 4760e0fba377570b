//! Epoch key material fetched from a versioned HTTP endpoint

use std::future::Future;
use std::time::Duration;

use reqwest::Client;

use prt_core::EpochKeyMaterial;

use crate::error::{ClientError, Result};

/// Source of per-epoch key material
pub trait KeyMaterialProvider: Send + Sync {
    /// Resolve the key material for `epoch_id_base64`
    fn fetch(&self, epoch_id_base64: &str) -> impl Future<Output = Result<EpochKeyMaterial>> + Send;
}

/// Fetches `{base_url}/{epochIdBase64}.json`
#[derive(Clone)]
pub struct HttpKeyProvider {
    http: Client,
    base_url: String,
}

impl HttpKeyProvider {
    /// Create a provider for the given endpoint
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the key document for an epoch
    pub fn document_url(&self, epoch_id_base64: &str) -> String {
        format!("{}/{}.json", self.base_url, epoch_id_base64)
    }
}

impl KeyMaterialProvider for HttpKeyProvider {
    async fn fetch(&self, epoch_id_base64: &str) -> Result<EpochKeyMaterial> {
        let url = self.document_url(epoch_id_base64);
        tracing::debug!(epoch = epoch_id_base64, url = %url, "Fetching key document");

        let resp = self.http.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(ClientError::Server {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        let body = resp.bytes().await?;
        let key = EpochKeyMaterial::from_json(&body)?;
        Ok(key)
    }
}

/// Builder for HttpKeyProvider
pub struct KeyProviderBuilder {
    base_url: String,
    request_timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl KeyProviderBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: None,
            user_agent: None,
        }
    }

    /// Transport-level timeout; the cache applies its own per-fetch timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn build(self) -> Result<HttpKeyProvider> {
        let mut builder = Client::builder();
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = self.user_agent {
            builder = builder.user_agent(user_agent);
        }
        Ok(HttpKeyProvider::with_client(builder.build()?, self.base_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    async fn serve_keys() -> String {
        async fn key_document(Path(file): Path<String>) -> (StatusCode, String) {
            match file.as_str() {
                "good.json" => (
                    StatusCode::OK,
                    r#"{"privateKey":"AQ","hmacSecret":"c2VjcmV0"}"#.to_string(),
                ),
                "malformed.json" => (StatusCode::OK, r#"{"privateKey":7}"#.to_string()),
                _ => (StatusCode::NOT_FOUND, "no such epoch".to_string()),
            }
        }

        let app = Router::new().route("/v1/:file", get(key_document));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1/", addr)
    }

    #[test]
    fn test_document_url_trims_trailing_slash() {
        let provider = HttpKeyProvider::new("https://keys.example/prt/v1/");
        assert_eq!(provider.base_url(), "https://keys.example/prt/v1");
        assert_eq!(
            provider.document_url("AAECAwQFBgc"),
            "https://keys.example/prt/v1/AAECAwQFBgc.json"
        );
    }

    #[tokio::test]
    async fn test_fetch_valid_document() {
        let provider = HttpKeyProvider::new(serve_keys().await);
        let key = provider.fetch("good").await.unwrap();
        assert_eq!(key.hmac_secret(), b"secret");
    }

    #[tokio::test]
    async fn test_fetch_missing_epoch() {
        let provider = HttpKeyProvider::new(serve_keys().await);
        let err = provider.fetch("unknown").await.unwrap_err();
        assert!(matches!(err, ClientError::Server { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_fetch_malformed_document() {
        let provider = KeyProviderBuilder::new(serve_keys().await)
            .request_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let err = provider.fetch("malformed").await.unwrap_err();
        assert!(matches!(err, ClientError::Core(_)));
    }
}
