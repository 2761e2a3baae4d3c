//! Gemini-shaped streaming wire format.
//!
//! Gemini's `streamGenerateContent` frames carry no `event:` name — each
//! `data:` frame is a full candidate update — and the stream simply closes
//! rather than sending a terminator event; the harness in `client.rs`
//! synthesizes `StreamDelta::Done` once the body ends if the adapter hasn't
//! already emitted one.

use super::adapter::{strip_schema_meta_keys, ProviderAdapter};
use super::sse::SseFrame;
use super::StreamDelta;
use async_openai::types::{ChatCompletionRequestMessage, ChatCompletionTool};
use serde_json::{json, Value};

#[derive(serde::Deserialize)]
struct GeminiChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(serde::Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(serde::Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(serde::Deserialize)]
struct Part {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<FunctionCall>,
}

#[derive(serde::Deserialize)]
struct FunctionCall {
    name: String,
    args: Value,
}

#[derive(serde::Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
}

fn build_contents(messages: &[ChatCompletionRequestMessage]) -> (Option<String>, Vec<Value>) {
    let mut system = String::new();
    let mut contents = Vec::new();

    for msg in messages {
        match msg {
            ChatCompletionRequestMessage::System(s) => {
                if !system.is_empty() {
                    system.push('\n');
                }
                if let async_openai::types::ChatCompletionRequestSystemMessageContent::Text(t) = &s.content {
                    system.push_str(t);
                }
            }
            ChatCompletionRequestMessage::User(u) => {
                let text = match &u.content {
                    async_openai::types::ChatCompletionRequestUserMessageContent::Text(t) => t.clone(),
                    async_openai::types::ChatCompletionRequestUserMessageContent::Array(parts) => parts
                        .iter()
                        .filter_map(|p| match p {
                            async_openai::types::ChatCompletionRequestUserMessageContentPart::Text(t) => {
                                Some(t.text.clone())
                            }
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                        .join(""),
                };
                contents.push(json!({"role": "user", "parts": [{"text": text}]}));
            }
            ChatCompletionRequestMessage::Assistant(a) => {
                let mut parts = Vec::new();
                if let Some(content) = &a.content {
                    if let async_openai::types::ChatCompletionRequestAssistantMessageContent::Text(t) = content {
                        if !t.is_empty() {
                            parts.push(json!({"text": t}));
                        }
                    }
                }
                if let Some(tool_calls) = &a.tool_calls {
                    for tc in tool_calls {
                        let args: Value = serde_json::from_str(&tc.function.arguments).unwrap_or(json!({}));
                        parts.push(json!({"functionCall": {"name": tc.function.name, "args": args}}));
                    }
                }
                contents.push(json!({"role": "model", "parts": parts}));
            }
            ChatCompletionRequestMessage::Tool(t) => {
                contents.push(json!({
                    "role": "function",
                    "parts": [{"functionResponse": {"name": t.tool_call_id, "response": {"content": t.content}}}]
                }));
            }
            _ => {}
        }
    }

    (if system.is_empty() { None } else { Some(system) }, contents)
}

#[derive(Default)]
pub struct GeminiAdapter;

impl ProviderAdapter for GeminiAdapter {
    fn path(&self, model: &str) -> String {
        format!("/models/{}:streamGenerateContent", model)
    }

    fn headers(&self, api_key: &str) -> Vec<(String, String)> {
        vec![("x-goog-api-key".to_string(), api_key.to_string())]
    }

    fn request_body(
        &self,
        _model: &str,
        messages: &[ChatCompletionRequestMessage],
        tools: &[ChatCompletionTool],
    ) -> Value {
        let (system, contents) = build_contents(messages);
        let mut body = json!({ "contents": contents });
        if let Some(system) = system {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if !tools.is_empty() {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.function.name,
                        "description": t.function.description,
                        "parameters": strip_schema_meta_keys(
                            t.function.parameters.as_ref().unwrap_or(&json!({}))
                        ),
                    })
                })
                .collect();
            body["tools"] = json!([{"functionDeclarations": declarations}]);
        }
        body
    }

    fn is_done_sentinel(&self, _frame: &SseFrame) -> bool {
        false
    }

    fn handle_frame(&mut self, frame: &SseFrame) -> Vec<StreamDelta> {
        let Ok(chunk) = serde_json::from_str::<GeminiChunk>(&frame.data) else {
            return vec![];
        };

        let mut out = Vec::new();
        for (part_index, part) in chunk.candidates.iter().flat_map(|c| c.content.parts.iter()).enumerate() {
            if let Some(text) = &part.text {
                if !text.is_empty() {
                    out.push(StreamDelta::Text(text.clone()));
                }
            }
            if let Some(call) = &part.function_call {
                out.push(StreamDelta::ToolCall {
                    index: part_index,
                    id: None,
                    name: Some(call.name.clone()),
                    arguments: call.args.to_string(),
                });
            }
        }

        if let Some(usage) = chunk.usage_metadata {
            out.push(StreamDelta::Usage {
                input: usage.prompt_token_count.unwrap_or(0),
                output: usage.candidates_token_count.unwrap_or(0),
                reasoning: None,
            });
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_frame_text_part() {
        let mut adapter = GeminiAdapter;
        let frame = SseFrame {
            event: None,
            data: r#"{"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}"#.to_string(),
        };
        let deltas = adapter.handle_frame(&frame);
        assert!(matches!(&deltas[0], StreamDelta::Text(t) if t == "hi"));
    }

    #[test]
    fn test_handle_frame_function_call_part() {
        let mut adapter = GeminiAdapter;
        let frame = SseFrame {
            event: None,
            data: r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"edit","args":{"file":"a.rs"}}}]}}]}"#
                .to_string(),
        };
        let deltas = adapter.handle_frame(&frame);
        assert!(matches!(&deltas[0], StreamDelta::ToolCall { name: Some(n), .. } if n == "edit"));
    }
}
