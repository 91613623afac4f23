use crate::types::{TargetInfo, VersionInfo};
use crate::{DevtoolsError, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTP side of the remote-debugging handshake: readiness (`/json/version`) and target
/// listing (`/json/list`). Everything past discovery happens on the websocket.
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    http_client: reqwest::Client,
    request_timeout: Duration,
}

impl DiscoveryClient {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            request_timeout,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub async fn version(&self, base_url: &str) -> Result<VersionInfo> {
        self.get_json(&format!("{base_url}/json/version")).await
    }

    pub async fn targets(&self, base_url: &str) -> Result<Vec<TargetInfo>> {
        self.get_json(&format!("{base_url}/json/list")).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        tracing::debug!("Discovery request: GET {}", url);

        let response = self
            .http_client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DevtoolsError::InvalidResponse(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| {
            DevtoolsError::InvalidResponse(format!("Malformed discovery payload from {url}: {e}"))
        })
    }
}

impl Default for DiscoveryClient {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}


#[cfg(test)]
mod tests {
    use super::test_server::{closed_port, serve};
    use super::*;

    #[test]
    fn test_default_client() {
        let client = DiscoveryClient::default();
        assert_eq!(client.request_timeout(), DEFAULT_REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_version_and_targets() {
        let (addr, server) = serve(vec![
            (
                "/json/version",
                200,
                r#"{"Browser":"Chrome/124","webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/browser/abc"}"#.to_string(),
            ),
            (
                "/json/list",
                200,
                r#"[{"id":"p1","type":"page","webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/page/p1"}]"#.to_string(),
            ),
        ])
        .await;
        let base = format!("http://{addr}");
        let client = DiscoveryClient::default();

        let version = client.version(&base).await.expect("version payload");
        assert_eq!(version.browser.as_deref(), Some("Chrome/124"));
        assert_eq!(
            version.web_socket_debugger_url.as_deref(),
            Some("ws://127.0.0.1:9222/devtools/browser/abc")
        );

        let targets = client.targets(&base).await.expect("target list");
        assert_eq!(targets.len(), 1);
        assert!(targets[0].is_page());

        server.abort();
    }

    #[tokio::test]
    async fn test_http_errors_and_bad_payloads() {
        let (addr, server) = serve(vec![
            ("/json/version", 500, String::new()),
            ("/json/list", 200, "not json".to_string()),
        ])
        .await;
        let base = format!("http://{addr}");
        let client = DiscoveryClient::default();

        let err = client.version(&base).await.expect_err("500 must fail");
        assert!(err.to_string().contains("HTTP error"), "unexpected error: {err}");

        let err = client.targets(&base).await.expect_err("garbage must fail");
        assert!(matches!(err, DevtoolsError::InvalidResponse(_)));

        server.abort();
    }

    #[tokio::test]
    async fn test_connection_refused_is_http_error() {
        let port = closed_port().await;
        let err = DiscoveryClient::default()
            .version(&format!("http://127.0.0.1:{port}"))
            .await
            .expect_err("nothing is listening");
        assert!(matches!(err, DevtoolsError::Http(_)));
    }
}
