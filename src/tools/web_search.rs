//! WebSearch tool using SearXNG, with exact-key result caching.
//!
//! Grounded on `tools2/web_search.rs`'s SearXNG client/response shape; caching
//! and the `num_results`/`type`/`include_domains` surface are added around it.

use crate::tool::{Tool, ToolContext, ToolDefinition, ToolResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

fn default_num_results() -> usize {
    5
}

#[derive(Debug, Deserialize)]
struct Args {
    query: String,
    #[serde(default = "default_num_results")]
    num_results: usize,
    #[serde(default)]
    #[serde(rename = "type")]
    result_type: Option<String>,
    #[serde(default)]
    include_domains: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
struct SearxResponse {
    query: String,
    number_of_results: i64,
    results: Vec<SearchResult>,
    #[serde(default)]
    infoboxes: Vec<Infobox>,
}

#[derive(Debug, Clone, Deserialize)]
struct SearchResult {
    url: String,
    title: String,
    content: String,
    #[serde(default, alias = "publishedDate")]
    published_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Infobox {
    infobox: String,
    id: String,
    content: String,
}

pub struct WebSearchTool {
    client: Client,
    searxng_url: String,
    cache: Arc<RwLock<HashMap<String, SearxResponse>>>,
}

impl WebSearchTool {
    pub fn new() -> Self {
        let searxng_url =
            std::env::var("SEARXNG_URL").unwrap_or_else(|_| "http://localhost:8082".to_string());
        Self {
            client: Client::new(),
            searxng_url,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_url(url: &str) -> Self {
        Self {
            client: Client::new(),
            searxng_url: url.to_string(),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

/// `query|n=N|t=T|d=domain1,domain2`, with empty `type`/`include_domains`
/// rendered as empty segments so the key stays a pure function of the args.
fn cache_key(args: &Args) -> String {
    format!(
        "{}|n={}|t={}|d={}",
        args.query,
        args.num_results,
        args.result_type.as_deref().unwrap_or(""),
        args.include_domains.join(",")
    )
}

/// Cheap substring match against any previously cached response body, tried
/// before hitting the remote API on a cache-key miss.
fn find_content_match(
    cache: &HashMap<String, SearxResponse>,
    query: &str,
) -> Option<SearxResponse> {
    let needle = query.to_lowercase();
    cache
        .values()
        .find(|resp| {
            resp.results.iter().any(|r| {
                r.content.to_lowercase().contains(&needle) || r.title.to_lowercase().contains(&needle)
            })
        })
        .cloned()
}

fn matches_domains(url: &str, include_domains: &[String]) -> bool {
    if include_domains.is_empty() {
        return true;
    }
    include_domains.iter().any(|d| url.contains(d.as_str()))
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "web_search".to_string(),
            description: r#"Search the web using SearXNG. Results are cached by the exact query/options key for the session.
Use for real-time information, facts, or current data.
Requires SEARXNG_URL environment variable (default: http://localhost:8082)"#.to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query"
                    },
                    "num_results": {
                        "type": "integer",
                        "description": "Maximum results (default: 5)"
                    },
                    "type": {
                        "type": "string",
                        "description": "Result category, e.g. 'news' or 'general'"
                    },
                    "include_domains": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Only return results whose URL contains one of these domains"
                    }
                },
                "required": ["query"]
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

        let key = cache_key(&args);

        let data = if let Some(cached) = self.cache.read().get(&key).cloned() {
            cached
        } else if let Some(matched) = find_content_match(&self.cache.read(), &args.query) {
            matched
        } else {
            let mut request = self
                .client
                .get(format!("{}/search", self.searxng_url))
                .query(&[("q", &args.query), ("format", &"json".to_string())]);
            if let Some(category) = &args.result_type {
                request = request.query(&[("categories", category)]);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => return ToolResult::error(format!("Search request failed: {}", e)),
            };

            if !response.status().is_success() {
                return ToolResult::error(format!("Search failed: {}", response.status()));
            }

            let parsed: SearxResponse = match response.json().await {
                Ok(d) => d,
                Err(e) => return ToolResult::error(format!("Failed to parse response: {}", e)),
            };
            self.cache.write().insert(key, parsed.clone());
            parsed
        };

        ToolResult::success(format_results(&data, args.num_results, &args.include_domains))
    }
}

fn format_results(data: &SearxResponse, num_results: usize, include_domains: &[String]) -> String {
    let mut text = String::new();

    for infobox in &data.infoboxes {
        text.push_str(&format!("## Infobox: {}\n", infobox.infobox));
        text.push_str(&format!("ID: {}\n", infobox.id));
        text.push_str(&format!("{}\n\n", infobox.content));
    }

    let filtered: Vec<&SearchResult> = data
        .results
        .iter()
        .filter(|r| matches_domains(&r.url, include_domains))
        .take(num_results)
        .collect();

    if filtered.is_empty() {
        text.push_str("No results found.\n");
    } else {
        for result in filtered {
            text.push_str(&format!("### {}\n", result.title));
            text.push_str(&format!("URL: {}\n", result.url));
            if let Some(date) = &result.published_date {
                text.push_str(&format!("Published: {}\n", date));
            }
            text.push_str(&format!("{}\n\n", result.content));
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SearxResponse {
        SearxResponse {
            query: "rust".to_string(),
            number_of_results: 2,
            results: vec![
                SearchResult {
                    url: "https://rust-lang.org".to_string(),
                    title: "Rust".to_string(),
                    content: "A systems language".to_string(),
                    published_date: Some("2024-01-01".to_string()),
                },
                SearchResult {
                    url: "https://example.com/rust".to_string(),
                    title: "Other Rust".to_string(),
                    content: "Something else".to_string(),
                    published_date: None,
                },
            ],
            infoboxes: vec![],
        }
    }

    #[test]
    fn test_cache_key_includes_all_fields() {
        let args = Args {
            query: "rust".to_string(),
            num_results: 3,
            result_type: Some("news".to_string()),
            include_domains: vec!["rust-lang.org".to_string()],
        };
        assert_eq!(cache_key(&args), "rust|n=3|t=news|d=rust-lang.org");
    }

    #[test]
    fn test_format_results_respects_num_results_and_domains() {
        let data = sample();
        let out = format_results(&data, 5, &["rust-lang.org".to_string()]);
        assert!(out.contains("Rust"));
        assert!(!out.contains("Other Rust"));
        assert!(out.contains("Published: 2024-01-01"));
    }

    #[test]
    fn test_find_content_match_hits_on_substring() {
        let mut cache = HashMap::new();
        cache.insert("other-key".to_string(), sample());
        let found = find_content_match(&cache, "systems language");
        assert!(found.is_some());
    }
}
