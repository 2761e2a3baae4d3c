//! ToolProxy — local tool dispatch plus an optional upstream tool server.
//!
//! Wraps a `ToolRegistry` for locally-registered tools. A call whose name
//! isn't registered locally, with an upstream configured, forwards to it as
//! a JSON-RPC 2.0 request over HTTPS, using the same manual line-scanning
//! idiom `provider/client.rs` already uses for SSE rather than a second
//! streaming-client shape.

use crate::tool::{Tool, ToolContext, ToolDefinition, ToolRegistry, ToolResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const CALL_RETRY_DELAYS: [u64; 3] = [2, 5, 10];
const MAX_RETRY_DELAY_SECS: u64 = 30;
const HANDSHAKE_RETRIES: u32 = 3;
const HANDSHAKE_BASE_DELAY_SECS: u64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ToolProxyError {
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream returned a malformed response: {0}")]
    Rpc(String),
    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),
}

/// Upstream MCP-style tool server reachable over JSON-RPC 2.0 / HTTPS.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
}

/// Front door for tool dispatch: local registry first, upstream second.
/// Mirrors `ToolRegistry`'s `definitions`/`execute` surface so it can stand
/// in wherever a session currently dispatches straight to a bare registry.
pub struct ToolProxy {
    registry: ToolRegistry,
    upstream: Option<UpstreamClient>,
}

impl ToolProxy {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            upstream: None,
        }
    }

    pub fn with_upstream(registry: ToolRegistry, config: UpstreamConfig) -> Self {
        Self {
            registry,
            upstream: Some(UpstreamClient::new(config)),
        }
    }

    /// The local registry view, e.g. for building a sub-agent's filtered
    /// tool set from the same underlying handlers.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn register_tool<T: Tool + 'static>(&mut self, tool: T) {
        self.registry.register(tool);
    }

    /// `initialize` + `notifications/initialized` handshake against the
    /// upstream, if one is configured. No-op otherwise.
    pub async fn initialize(&self) -> Result<(), ToolProxyError> {
        match &self.upstream {
            Some(client) => client.initialize().await,
            None => Ok(()),
        }
    }

    /// Local tool definitions, merged with the upstream's `tools/list` when
    /// configured. Local names win on collision. Upstream list failures are
    /// logged and otherwise swallowed — a down upstream shouldn't take the
    /// local tool surface with it.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        let mut defs = self.registry.definitions();
        if let Some(client) = &self.upstream {
            match client.list_tools().await {
                Ok(upstream_defs) => {
                    let local_names: HashSet<&str> =
                        defs.iter().map(|d| d.name.as_str()).collect();
                    defs.extend(
                        upstream_defs
                            .into_iter()
                            .filter(|d| !local_names.contains(d.name.as_str())),
                    );
                }
                Err(e) => {
                    tracing::warn!(target: "tool_proxy", error = %e, "failed to list upstream tools");
                }
            }
        }
        defs
    }

    /// Dispatch `name`: local handler if registered, else upstream with
    /// retry, else a synthetic "tool not found" error.
    pub async fn call_tool(&self, ctx: &ToolContext, name: &str, args: Value) -> ToolResult {
        if let Some(tool) = self.registry.get(name) {
            return tool.execute(args, ctx).await;
        }
        match &self.upstream {
            Some(client) => match client.call_tool(name, args).await {
                Ok(result) => result,
                Err(e) => ToolResult::error(e.to_string()),
            },
            None => ToolResult::error(format!("tool not found: {}", name)),
        }
    }

    /// Upstream calls are one-shot HTTP requests with no persistent
    /// connection; kept for contract symmetry with `initialize`.
    pub fn close(&self) {}
}

#[async_trait]
impl crate::turn_loop::ToolExecutor for ToolProxy {
    async fn execute(
        &self,
        name: &str,
        args: Value,
        working_dir: &PathBuf,
        cancellation: &CancellationToken,
    ) -> Result<String, String> {
        let ctx = ToolContext::new(working_dir.clone(), cancellation.clone());
        let result = self.call_tool(&ctx, name, args).await;
        if result.is_error {
            Err(result.output)
        } else {
            Ok(result.output)
        }
    }
}

#[derive(Deserialize)]
struct UpstreamToolDescriptor {
    name: String,
    description: Option<String>,
    #[serde(rename = "inputSchema")]
    input_schema: Option<Value>,
}

struct UpstreamClient {
    http: reqwest::Client,
    config: UpstreamConfig,
    session_id: RwLock<Option<String>>,
    next_id: AtomicU64,
}

impl UpstreamClient {
    fn new(config: UpstreamConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            session_id: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Retry the whole `initialize`/`notifications/initialized` handshake up
    /// to `HANDSHAKE_RETRIES` times with doubling backoff from
    /// `HANDSHAKE_BASE_DELAY_SECS`.
    async fn initialize(&self) -> Result<(), ToolProxyError> {
        let mut delay = HANDSHAKE_BASE_DELAY_SECS;
        let mut last_err = String::new();
        for attempt in 0..=HANDSHAKE_RETRIES {
            match self.handshake_once().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_err = e;
                    if attempt == HANDSHAKE_RETRIES {
                        break;
                    }
                    tracing::warn!(
                        target: "tool_proxy",
                        attempt,
                        error = %last_err,
                        "initialize handshake failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    delay *= 2;
                }
            }
        }
        Err(ToolProxyError::RetriesExhausted(format!(
            "initialize: {}",
            last_err
        )))
    }

    async fn handshake_once(&self) -> Result<(), String> {
        let init_body = json!({
            "jsonrpc": "2.0",
            "id": self.next_request_id(),
            "method": "initialize",
            "params": {
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "crow-agent", "version": env!("CARGO_PKG_VERSION")},
            }
        });
        self.send(&init_body).await.map_err(|e| e.to_string())?;

        let initialized_notification = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        });
        self.send_notification(&initialized_notification)
            .await
            .map_err(|e| e.to_string())
    }

    /// POST one JSON-RPC envelope, capturing the opaque session-id header
    /// from the first successful response and sending it back on every
    /// subsequent request. The reply is either a single JSON body or an SSE
    /// stream; both are parsed into one `Value`.
    async fn send(&self, body: &Value) -> Result<Value, ToolProxyError> {
        let mut request = self
            .http
            .post(&self.config.base_url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("MCP-Protocol-Version", MCP_PROTOCOL_VERSION);

        if let Some(session_id) = self.session_id.read().clone() {
            request = request.header("Mcp-Session-Id", session_id);
        }

        let response = request
            .json(body)
            .send()
            .await
            .map_err(|e| ToolProxyError::Transport(e.to_string()))?;

        if let Some(sid) = response.headers().get("Mcp-Session-Id") {
            if let Ok(sid) = sid.to_str() {
                *self.session_id.write() = Some(sid.to_string());
            }
        }

        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ToolProxyError::Transport(e.to_string()))?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes);
            return Err(ToolProxyError::Rpc(format!(
                "HTTP {}: {}",
                status,
                text.trim()
            )));
        }

        if content_type.starts_with("text/event-stream") {
            parse_sse_response(&bytes)
        } else {
            serde_json::from_slice(&bytes).map_err(|e| ToolProxyError::Rpc(e.to_string()))
        }
    }

    async fn send_notification(&self, body: &Value) -> Result<(), ToolProxyError> {
        let mut request = self
            .http
            .post(&self.config.base_url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("MCP-Protocol-Version", MCP_PROTOCOL_VERSION);
        if let Some(session_id) = self.session_id.read().clone() {
            request = request.header("Mcp-Session-Id", session_id);
        }
        request
            .json(body)
            .send()
            .await
            .map_err(|e| ToolProxyError::Transport(e.to_string()))?;
        Ok(())
    }

    /// Call with retry: up to 3 retries, delays `[2s, 5s, 10s]`, overridden
    /// by a server-specified `Retry-After`/"try again in N seconds" hint
    /// when the previous error text carries one, clamped to 30s.
    async fn call_with_retry(&self, body: &Value) -> Result<Value, ToolProxyError> {
        let mut last_err = None;
        for (attempt, default_delay) in CALL_RETRY_DELAYS.iter().enumerate() {
            match self.send(body).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let is_last = attempt + 1 >= CALL_RETRY_DELAYS.len();
                    let delay = extract_retry_hint(&e.to_string())
                        .map(|d| d.min(MAX_RETRY_DELAY_SECS))
                        .unwrap_or(*default_delay);
                    last_err = Some(e);
                    if is_last {
                        break;
                    }
                    tracing::warn!(
                        target: "tool_proxy",
                        attempt,
                        delay_secs = delay,
                        error = %last_err.as_ref().unwrap(),
                        "upstream call failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                }
            }
        }
        Err(ToolProxyError::RetriesExhausted(
            last_err.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolProxyError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_request_id(),
            "method": "tools/list",
        });
        let reply = self.call_with_retry(&body).await?;
        let tools = reply
            .get("result")
            .and_then(|r| r.get("tools"))
            .cloned()
            .unwrap_or_else(|| json!([]));
        let tools: Vec<UpstreamToolDescriptor> =
            serde_json::from_value(tools).map_err(|e| ToolProxyError::Rpc(e.to_string()))?;
        Ok(tools
            .into_iter()
            .map(|t| ToolDefinition {
                name: t.name,
                description: t.description.unwrap_or_default(),
                parameters: t.input_schema.unwrap_or_else(|| json!({})),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<ToolResult, ToolProxyError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_request_id(),
            "method": "tools/call",
            "params": {"name": name, "arguments": args},
        });
        let reply = self.call_with_retry(&body).await?;
        if let Some(error) = reply.get("error") {
            return Ok(ToolResult::error(format!("upstream error: {}", error)));
        }
        let result = reply.get("result").cloned().unwrap_or_else(|| json!({}));
        let is_error = result
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let text = result
            .get("content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        Ok(ToolResult {
            output: text,
            is_error,
        })
    }
}

/// Parse an SSE-framed JSON-RPC response: collect `data:` lines until a
/// blank line, parse the joined payload as the Response object.
fn parse_sse_response(bytes: &[u8]) -> Result<Value, ToolProxyError> {
    let text = String::from_utf8_lossy(bytes);
    let mut data_lines = Vec::new();
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start().to_string());
        } else if line.is_empty() && !data_lines.is_empty() {
            break;
        }
    }
    if data_lines.is_empty() {
        return Err(ToolProxyError::Rpc("empty SSE response".to_string()));
    }
    serde_json::from_str(&data_lines.join("\n")).map_err(|e| ToolProxyError::Rpc(e.to_string()))
}

/// Regex-extract a server-specified retry delay: `Retry-After:\s*(\d+)` or
/// `Try again in (\d+) seconds?`.
fn extract_retry_hint(error_text: &str) -> Option<u64> {
    static RETRY_AFTER: OnceLock<Regex> = OnceLock::new();
    static TRY_AGAIN: OnceLock<Regex> = OnceLock::new();

    let retry_after =
        RETRY_AFTER.get_or_init(|| Regex::new(r"(?i)Retry-After:\s*(\d+)").unwrap());
    let try_again =
        TRY_AGAIN.get_or_init(|| Regex::new(r"(?i)Try again in (\d+) seconds?").unwrap());

    retry_after
        .captures(error_text)
        .or_else(|| try_again.captures(error_text))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolRegistry;

    #[test]
    fn test_extract_retry_hint_header_style() {
        assert_eq!(
            extract_retry_hint("HTTP 429: Retry-After: 17"),
            Some(17)
        );
    }

    #[test]
    fn test_extract_retry_hint_sentence_style() {
        assert_eq!(
            extract_retry_hint("rate limited, try again in 9 seconds"),
            Some(9)
        );
    }

    #[test]
    fn test_extract_retry_hint_absent() {
        assert_eq!(extract_retry_hint("connection reset"), None);
    }

    #[test]
    fn test_parse_sse_response_joins_data_lines() {
        let raw = b"event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\n\
                     data: \"result\":{}}\n\n";
        let value = parse_sse_response(raw).unwrap();
        assert_eq!(value["id"], 1);
    }

    #[tokio::test]
    async fn test_call_tool_not_found_without_upstream() {
        let proxy = ToolProxy::new(ToolRegistry::new());
        let ctx = ToolContext::new(PathBuf::from("."), CancellationToken::new());
        let result = proxy.call_tool(&ctx, "nonexistent", json!({})).await;
        assert!(result.is_error);
        assert!(result.output.contains("tool not found"));
    }
}
