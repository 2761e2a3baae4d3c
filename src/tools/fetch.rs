//! WebFetch tool - HTTP GET with URL-keyed caching and size-bounded output.
//!
//! Grounded on `tools2/fetch.rs`'s client/response handling; the markdown
//! styling is dropped in favor of plain block-separated text (scripts/style/
//! noscript stripped, newlines around block elements, whitespace collapsed)
//! and a cache/truncation layer is added around it.

use crate::tool::{Tool, ToolContext, ToolDefinition, ToolResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const MAX_BODY_BYTES: usize = 1024 * 1024;
const DEFAULT_MAX_CHARS: usize = 10_000;

#[derive(Debug, Deserialize)]
struct Args {
    url: String,
    #[serde(default)]
    max_chars: Option<usize>,
}

pub struct FetchTool {
    client: Client,
    cache: Arc<RwLock<HashMap<String, String>>>,
}

impl FetchTool {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_else(|_| Client::new()),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for FetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "web_fetch".to_string(),
            description: "Fetch a URL's content. Results are cached by URL for the session. Useful for reading web pages, APIs, or documentation.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The URL to fetch"
                    },
                    "max_chars": {
                        "type": "integer",
                        "description": "Truncate the returned body to this many characters (default 10000)"
                    }
                },
                "required": ["url"]
            }),
        }
    }

    async fn execute(&self, args_value: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        if ctx.is_cancelled() {
            return ToolResult::error("Cancelled");
        }

        let args: Args = match serde_json::from_value(args_value) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };

        let url = if !args.url.starts_with("https://") && !args.url.starts_with("http://") {
            format!("https://{}", args.url)
        } else {
            args.url
        };

        let content = if let Some(cached) = self.cache.read().get(&url).cloned() {
            cached
        } else {
            let fetched = match self.fetch(&url).await {
                Ok(c) => c,
                Err(e) => return ToolResult::error(e),
            };
            self.cache.write().insert(url.clone(), fetched.clone());
            fetched
        };

        let max_chars = args.max_chars.unwrap_or(DEFAULT_MAX_CHARS);
        ToolResult::success(truncate_runes(&content, max_chars))
    }
}

impl FetchTool {
    async fn fetch(&self, url: &str) -> Result<String, String> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", "crow-agent/0.1")
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;

        if response.status().is_client_error() || response.status().is_server_error() {
            return Err(format!("HTTP error: {}", response.status()));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        let body_bytes = response
            .bytes()
            .await
            .map_err(|e| format!("Failed to read response: {}", e))?;
        let capped = &body_bytes[..body_bytes.len().min(MAX_BODY_BYTES)];
        let body = String::from_utf8_lossy(capped).into_owned();

        let content = if content_type.starts_with("text/html") {
            strip_html(&body)
        } else {
            body
        };

        if content.trim().is_empty() {
            Err("No content found".to_string())
        } else {
            Ok(content)
        }
    }
}

/// Truncate to at most `max_chars` Unicode scalar values, appending a marker
/// when truncation happened. Counts chars, not bytes, so multi-byte UTF-8
/// sequences are never split.
fn truncate_runes(text: &str, max_chars: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}\n\n[Truncated]", truncated)
}

/// Strip `script`/`style`/`noscript`, insert newlines around block-level
/// elements, collapse whitespace. Deliberately not a full markdown
/// conversion — the raw text is what downstream truncation/snippeting acts
/// on.
fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    let mut current_tag = String::new();
    let mut skip_content = false;
    let mut chars = html.chars().peekable();

    const BLOCK_TAGS: &[&str] = &[
        "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "table",
        "section", "article", "header", "blockquote",
    ];

    while let Some(c) = chars.next() {
        if c == '<' {
            in_tag = true;
            current_tag.clear();
            continue;
        }

        if in_tag {
            if c == '>' {
                in_tag = false;
                let tag = current_tag.to_lowercase();
                let tag_name = tag.split_whitespace().next().unwrap_or("");

                if let Some(closing) = tag_name.strip_prefix('/') {
                    match closing {
                        "script" | "style" | "noscript" | "head" => skip_content = false,
                        t if BLOCK_TAGS.contains(&t) => result.push('\n'),
                        _ => {}
                    }
                } else {
                    match tag_name {
                        "script" | "style" | "noscript" | "head" => skip_content = true,
                        t if BLOCK_TAGS.contains(&t) => result.push('\n'),
                        _ => {}
                    }
                }
            } else {
                current_tag.push(c);
            }
            continue;
        }

        if !skip_content {
            if c == '&' {
                let mut entity = String::new();
                while let Some(&next) = chars.peek() {
                    if next == ';' {
                        chars.next();
                        break;
                    }
                    if next.is_alphanumeric() || next == '#' {
                        entity.push(chars.next().unwrap());
                    } else {
                        break;
                    }
                }
                match entity.as_str() {
                    "amp" => result.push('&'),
                    "lt" => result.push('<'),
                    "gt" => result.push('>'),
                    "quot" => result.push('"'),
                    "apos" => result.push('\''),
                    "nbsp" => result.push(' '),
                    _ if entity.starts_with('#') => {
                        if let Ok(code) = entity[1..].parse::<u32>() {
                            if let Some(ch) = char::from_u32(code) {
                                result.push(ch);
                            }
                        }
                    }
                    _ => {
                        result.push('&');
                        result.push_str(&entity);
                        result.push(';');
                    }
                }
            } else {
                result.push(c);
            }
        }
    }

    let mut cleaned = String::new();
    let mut prev_empty = false;
    for line in result.lines() {
        let trimmed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if trimmed.is_empty() {
            if !prev_empty {
                cleaned.push('\n');
                prev_empty = true;
            }
        } else {
            cleaned.push_str(&trimmed);
            cleaned.push('\n');
            prev_empty = false;
        }
    }

    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html_basic() {
        let html = "<h1>Title</h1><p>Hello <strong>world</strong>!</p>";
        let text = strip_html(html);
        assert!(text.contains("Title"));
        assert!(text.contains("Hello"));
        assert!(text.contains("world"));
    }

    #[test]
    fn test_strip_html_removes_script() {
        let html = "<p>Before</p><script>alert('bad')</script><p>After</p>";
        let text = strip_html(html);
        assert!(text.contains("Before"));
        assert!(text.contains("After"));
        assert!(!text.contains("alert"));
    }

    #[test]
    fn test_truncate_runes_appends_marker() {
        let text = "abcdef";
        let truncated = truncate_runes(text, 3);
        assert_eq!(truncated, "abc\n\n[Truncated]");
    }

    #[test]
    fn test_truncate_runes_noop_when_short() {
        let text = "abc";
        assert_eq!(truncate_runes(text, 10), "abc");
    }
}
