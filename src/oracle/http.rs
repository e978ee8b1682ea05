use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Transport settings shared by every outbound client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Reject plain http URLs
    pub require_https: bool,
    /// Per-request timeout
    pub timeout: Duration,
    /// Maximum response body size in bytes
    pub max_response_size: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            require_https: false,
            timeout: Duration::from_secs(8),
            max_response_size: 4 * 1024 * 1024, // 4MB
        }
    }
}

/// JSON-over-HTTP client used by the source, scoring and vote clients.
///
/// Single-shot: no retries. A timeout surfaces as an ordinary error.
#[derive(Clone)]
pub struct OracleHttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl OracleHttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let mut client_builder = Client::builder()
            .timeout(config.timeout)
            .user_agent("GovAI-Sentinel/0.1");

        if config.require_https {
            client_builder = client_builder.https_only(true);
            info!("HTTPS enforcement enabled for oracle and backend calls");
        }

        let client = client_builder
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    pub fn validate_url(&self, url: &str) -> Result<Url> {
        let parsed_url = Url::parse(url).context("Invalid URL format")?;

        if self.config.require_https && parsed_url.scheme() != "https" {
            return Err(anyhow::anyhow!(
                "HTTPS is required but URL uses {}: {}",
                parsed_url.scheme(),
                url
            ));
        }

        if parsed_url.host_str().is_none() {
            return Err(anyhow::anyhow!("URL must have a valid host: {}", url));
        }

        Ok(parsed_url)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let validated_url = self.validate_url(url)?;
        debug!("GET {}", validated_url);

        let response = self
            .client
            .get(validated_url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send HTTP request")?;

        self.read_json(response).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        let validated_url = self.validate_url(url)?;
        debug!("POST {}", validated_url);

        let response = self
            .client
            .post(validated_url.as_str())
            .json(body)
            .send()
            .await
            .context("Failed to send HTTP request")?;

        self.read_json(response).await
    }

    /// Liveness probe: true only for a 2xx answer. Never errors.
    pub async fn probe(&self, url: &str) -> bool {
        let Ok(validated_url) = self.validate_url(url) else {
            return false;
        };

        match self.client.get(validated_url.as_str()).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!("Health probe failed: {}", e);
                false
            }
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        let content_length = response.content_length().unwrap_or(0);
        if content_length > self.config.max_response_size as u64 {
            return Err(anyhow::anyhow!(
                "Response too large: {} bytes (max: {})",
                content_length,
                self.config.max_response_size
            ));
        }

        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if body.len() > self.config.max_response_size {
            return Err(anyhow::anyhow!(
                "Response body too large: {} bytes (max: {})",
                body.len(),
                self.config.max_response_size
            ));
        }

        if !status.is_success() {
            let reason = error_detail(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string());
            return Err(anyhow::anyhow!(
                "HTTP request failed with status {}: {}",
                status.as_u16(),
                reason
            ));
        }

        serde_json::from_str(&body).context("Failed to parse JSON response")
    }
}

/// Join a base origin and an absolute path without doubling slashes
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Backend error bodies look like `{"detail": "..."}`
fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("detail")
        .or_else(|| value.get("error"))
        .and_then(|d| d.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        let client = OracleHttpClient::new(HttpClientConfig {
            require_https: true,
            ..Default::default()
        })
        .unwrap();

        assert!(client.validate_url("https://api.govai.example/health").is_ok());
        assert!(client.validate_url("http://api.govai.example/health").is_err());
        assert!(client.validate_url("not a url").is_err());
    }

    #[test]
    fn test_endpoint_join() {
        assert_eq!(
            endpoint("http://localhost:8000/", "/api/polls/p1"),
            "http://localhost:8000/api/polls/p1"
        );
        assert_eq!(endpoint("http://x", "health"), "http://x/health");
    }

    #[test]
    fn test_error_detail() {
        assert_eq!(
            error_detail(r#"{"detail":"Invalid signature"}"#).as_deref(),
            Some("Invalid signature")
        );
        assert_eq!(error_detail("<html>"), None);
    }
}
