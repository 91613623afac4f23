use crate::{DevtoolsError, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Resolved address of a live debug channel. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugEndpoint {
    pub host: String,
    pub port: u16,
    pub session_id: String,
    pub websocket_url: String,
}

impl DebugEndpoint {
    /// Parses a browser-level debugger URL such as `ws://127.0.0.1:9222/devtools/browser/<id>`.
    pub fn from_websocket_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| DevtoolsError::InvalidResponse(format!("Bad debugger URL '{raw}': {e}")))?;

        let host = url
            .host_str()
            .ok_or_else(|| DevtoolsError::InvalidResponse(format!("Debugger URL '{raw}' has no host")))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| DevtoolsError::InvalidResponse(format!("Debugger URL '{raw}' has no port")))?;
        let session_id = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| {
                DevtoolsError::InvalidResponse(format!("Debugger URL '{raw}' has no session id"))
            })?
            .to_string();

        Ok(Self {
            host,
            port,
            session_id,
            websocket_url: raw.to_string(),
        })
    }

    pub fn http_base(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Payload of `GET /json/version`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "Browser", default)]
    pub browser: Option<String>,
    #[serde(rename = "Protocol-Version", default)]
    pub protocol_version: Option<String>,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub web_socket_debugger_url: Option<String>,
}

/// One entry of `GET /json/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub web_socket_debugger_url: Option<String>,
}

impl TargetInfo {
    pub fn is_page(&self) -> bool {
        self.kind == "page"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_from_browser_url() {
        let endpoint = DebugEndpoint::from_websocket_url(
            "ws://127.0.0.1:9222/devtools/browser/6b1c1f9e-0d3c-4a5e-9d8b-2f1c4e0a7b11",
        )
        .expect("valid debugger url");

        assert_eq!(endpoint.host, "127.0.0.1");
        assert_eq!(endpoint.port, 9222);
        assert_eq!(endpoint.session_id, "6b1c1f9e-0d3c-4a5e-9d8b-2f1c4e0a7b11");
        assert_eq!(endpoint.http_base(), "http://127.0.0.1:9222");
    }

    #[test]
    fn test_endpoint_rejects_urls_without_session() {
        assert!(DebugEndpoint::from_websocket_url("ws://127.0.0.1:9222/").is_err());
        assert!(DebugEndpoint::from_websocket_url("not a url").is_err());
    }

    #[test]
    fn test_target_list_parsing() {
        let targets: Vec<TargetInfo> = serde_json::from_str(
            r#"[
                {"id": "w1", "type": "service_worker", "url": "x"},
                {"id": "p1", "type": "page", "title": "Main", "url": "app://main",
                 "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/p1"}
            ]"#,
        )
        .unwrap();

        assert_eq!(targets.len(), 2);
        assert!(!targets[0].is_page());
        assert!(targets[1].is_page());
        assert_eq!(targets[1].title, "Main");
    }
}
