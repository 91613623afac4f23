use std::{path::PathBuf, sync::Arc, time::Duration};

use devtools_bridge_core::{DebugRun, RunConfig, RunReport};
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters, ServerHandler},
    model::*,
    tool, tool_handler, tool_router, transport, ErrorData as McpError, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

const MAX_DURATION_SECS: u64 = 600;

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
struct DebugRunParams {
    /// Capture window in seconds (default 15)
    #[serde(default)]
    duration_secs: Option<u64>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    workspace: Option<String>,
    #[serde(default)]
    executable: Option<String>,
    #[serde(default)]
    settings_file: Option<String>,
    /// Key in the settings file that receives the workspace path
    #[serde(default)]
    settings_key: Option<String>,
    #[serde(default)]
    capture_raw: bool,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct LastSummaryParams {}

impl DebugRunParams {
    fn into_config(self, base: RunConfig) -> Result<RunConfig, String> {
        let mut config = base;
        if let Some(secs) = self.duration_secs {
            if secs == 0 || secs > MAX_DURATION_SECS {
                return Err(format!(
                    "duration_secs must be between 1 and {MAX_DURATION_SECS}, got {secs}"
                ));
            }
            config.duration = Duration::from_secs(secs);
        }
        if let Some(port) = self.port {
            config.debug_port = port;
        }
        if let Some(workspace) = self.workspace {
            config.workspace = Some(PathBuf::from(workspace));
        }
        if let Some(executable) = self.executable {
            config.executable = Some(PathBuf::from(executable));
        }
        if let Some(settings_file) = self.settings_file {
            config.settings_file = Some(PathBuf::from(settings_file));
        }
        if let Some(settings_key) = self.settings_key.filter(|key| !key.trim().is_empty()) {
            config.settings_key = settings_key;
        }
        config.capture_raw = self.capture_raw;
        config.args = self.args;
        Ok(config)
    }
}

fn report_value(report: &RunReport) -> Result<Value, McpError> {
    serde_json::to_value(report)
        .map_err(|e| McpError::internal_error(format!("Failed to encode run report: {e}"), None))
}

#[derive(Clone)]
struct DebugRunMcpServer {
    tool_router: ToolRouter<Self>,
    runner: Arc<DebugRun>,
    /// Held for the whole cycle; one target per debug port at a time.
    active_run: Arc<Mutex<()>>,
    last_report: Arc<Mutex<Option<RunReport>>>,
}

#[tool_router]
impl DebugRunMcpServer {
    fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
            runner: Arc::new(DebugRun::new()),
            active_run: Arc::new(Mutex::new(())),
            last_report: Arc::new(Mutex::new(None)),
        }
    }

    #[tool(
        description = "Launch the target with remote debugging, capture structured logs for the given window, tear everything down and return the summary"
    )]
    async fn debug_run(
        &self,
        params: Parameters<DebugRunParams>,
    ) -> Result<CallToolResult, McpError> {
        let config = params
            .0
            .into_config(RunConfig::from_env())
            .map_err(|e| McpError::invalid_params(e, None))?;

        let _active = self.active_run.try_lock().map_err(|_| {
            McpError::invalid_request("A debug run is already in progress", None)
        })?;

        tracing::info!(
            "debug_run: {:?} window on port {}",
            config.duration,
            config.debug_port
        );
        let report = self
            .runner
            .run(&config)
            .await
            .map_err(|e| McpError::internal_error(format!("Debug run failed: {e}"), None))?;

        let value = report_value(&report)?;
        *self.last_report.lock().await = Some(report);
        Ok(CallToolResult::structured(value))
    }

    #[tool(description = "Return the report of the most recent debug run")]
    async fn debug_last_summary(
        &self,
        _params: Parameters<LastSummaryParams>,
    ) -> Result<CallToolResult, McpError> {
        let last = self.last_report.lock().await;
        match last.as_ref() {
            Some(report) => Ok(CallToolResult::structured(report_value(report)?)),
            None => Ok(CallToolResult::structured(json!({
                "available": false,
                "message": "No debug run has completed yet",
            }))),
        }
    }
}

#[tool_handler]
impl ServerHandler for DebugRunMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Debug-run MCP Server: launch a target, capture its structured logs, summarize"
                    .into(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout is the MCP transport
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let server = DebugRunMcpServer::new();
    let transport = transport::stdio();

    tracing::info!("Starting Debug-run MCP Server on stdio...");

    server.serve(transport).await?.waiting().await?;

    Ok(())
}
