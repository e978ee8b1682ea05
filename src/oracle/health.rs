use super::http::{OracleHttpClient, endpoint};

/// Liveness check against `GET {backend}/health`
#[derive(Clone)]
pub struct HealthProbe {
    http: OracleHttpClient,
    base_url: String,
}

impl HealthProbe {
    pub fn new(http: OracleHttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// True when the backend answers 2xx. Unreachable hosts yield false.
    pub async fn check(&self) -> bool {
        self.http.probe(&endpoint(&self.base_url, "/health")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::HttpClientConfig;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unreachable_backend_is_unhealthy() {
        let http = OracleHttpClient::new(HttpClientConfig {
            timeout: Duration::from_millis(500),
            ..Default::default()
        })
        .unwrap();

        let probe = HealthProbe::new(http, "http://127.0.0.1:9");
        assert!(!probe.check().await);
    }
}
