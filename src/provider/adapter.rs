//! Shared adapter trait the four wire-format modules implement, normalizing
//! each provider's stream into the teacher's existing `StreamDelta` events.

use super::sse::SseFrame;
use super::StreamDelta;
use async_openai::types::{ChatCompletionRequestMessage, ChatCompletionTool};
use serde_json::Value;

/// One wire format's request shaping + stream parsing. Implementations hold
/// whatever per-stream state they need (e.g. a dense tool-call index map) so
/// `handle_frame` can be `&mut self`.
pub trait ProviderAdapter: Send {
    /// Path appended to the provider's base URL, e.g. "/chat/completions".
    /// Gemini folds `model` into the path itself
    /// (`/models/{model}:streamGenerateContent`); other formats ignore it.
    fn path(&self, model: &str) -> String;

    /// Headers beyond `Content-Type`/`Accept`, e.g. bearer auth or
    /// `anthropic-version`.
    fn headers(&self, api_key: &str) -> Vec<(String, String)>;

    /// Build this wire format's request body, including its own
    /// request-side remapping (system hoisting, tool-result shape, etc).
    fn request_body(
        &self,
        model: &str,
        messages: &[ChatCompletionRequestMessage],
        tools: &[ChatCompletionTool],
    ) -> Value;

    /// True for formats that terminate the stream with a sentinel line
    /// (`data: [DONE]`) rather than a named terminator event.
    fn is_done_sentinel(&self, frame: &SseFrame) -> bool {
        frame.event.is_none() && frame.data == "[DONE]"
    }

    /// Translate one SSE frame into zero or more normalized deltas. A frame
    /// that maps to the format's stream terminator should include
    /// `StreamDelta::Done`.
    fn handle_frame(&mut self, frame: &SseFrame) -> Vec<StreamDelta>;
}

/// Strip JSON-schema meta-keys Gemini's function-declaration schema doesn't
/// accept. Shared helper since both the Gemini adapter and any future
/// schema-stripping caller need the identical key list from §6.
pub fn strip_schema_meta_keys(schema: &Value) -> Value {
    const META_KEYS: &[&str] = &["$schema", "$id", "$defs", "definitions", "additionalProperties"];

    match schema {
        Value::Object(map) => {
            let mut cleaned = serde_json::Map::new();
            for (k, v) in map {
                if META_KEYS.contains(&k.as_str()) {
                    continue;
                }
                cleaned.insert(k.clone(), strip_schema_meta_keys(v));
            }
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_schema_meta_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_schema_meta_keys_removes_known_keys() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "a": {"$defs": {}, "type": "string"}
            }
        });
        let cleaned = strip_schema_meta_keys(&schema);
        assert!(cleaned.get("$schema").is_none());
        assert!(cleaned.get("additionalProperties").is_none());
        assert!(cleaned["properties"]["a"].get("$defs").is_none());
        assert_eq!(cleaned["properties"]["a"]["type"], "string");
    }
}
