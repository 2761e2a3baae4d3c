//! Anthropic Messages wire format.

use super::adapter::ProviderAdapter;
use super::sse::SseFrame;
use super::StreamDelta;
use async_openai::types::{ChatCompletionRequestMessage, ChatCompletionTool};
use serde_json::{json, Value};
use std::collections::HashMap;

const MAX_TOKENS: u32 = 8192;

#[derive(serde::Deserialize)]
struct ContentBlockStart {
    index: usize,
    content_block: ContentBlock,
}

#[derive(serde::Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(serde::Deserialize)]
struct ContentBlockDelta {
    index: usize,
    delta: DeltaBlock,
}

#[derive(serde::Deserialize)]
struct DeltaBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
    thinking: Option<String>,
    partial_json: Option<String>,
}

#[derive(serde::Deserialize)]
struct MessageDelta {
    usage: Option<UsageBlock>,
}

#[derive(serde::Deserialize)]
struct MessageStart {
    message: MessageStartInner,
}

#[derive(serde::Deserialize)]
struct MessageStartInner {
    usage: Option<UsageBlock>,
}

#[derive(serde::Deserialize)]
struct UsageBlock {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

/// Hoist system messages into the top-level `system` field; turn assistant
/// tool calls into `tool_use` blocks and `tool`-role messages into `user`
/// messages with a `tool_result` block, per §6.
fn build_messages(messages: &[ChatCompletionRequestMessage]) -> (Option<String>, Vec<Value>) {
    let mut system = String::new();
    let mut out = Vec::new();

    for msg in messages {
        match msg {
            ChatCompletionRequestMessage::System(s) => {
                if !system.is_empty() {
                    system.push('\n');
                }
                system.push_str(&match &s.content {
                    async_openai::types::ChatCompletionRequestSystemMessageContent::Text(t) => t.clone(),
                    _ => String::new(),
                });
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
                out.push(json!({"role": "user", "content": text}));
            }
            ChatCompletionRequestMessage::Assistant(a) => {
                let mut blocks = Vec::new();
                if let Some(content) = &a.content {
                    if let async_openai::types::ChatCompletionRequestAssistantMessageContent::Text(t) = content {
                        if !t.is_empty() {
                            blocks.push(json!({"type": "text", "text": t}));
                        }
                    }
                }
                if let Some(tool_calls) = &a.tool_calls {
                    for tc in tool_calls {
                        let input: Value =
                            serde_json::from_str(&tc.function.arguments).unwrap_or(json!({}));
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.function.name,
                            "input": input,
                        }));
                    }
                }
                out.push(json!({"role": "assistant", "content": blocks}));
            }
            ChatCompletionRequestMessage::Tool(t) => {
                out.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": t.tool_call_id,
                        "content": t.content,
                    }]
                }));
            }
            _ => {}
        }
    }

    (if system.is_empty() { None } else { Some(system) }, out)
}

#[derive(Default)]
pub struct AnthropicAdapter {
    /// Raw content-block index -> dense tool-call index.
    tool_indices: HashMap<usize, usize>,
    max_input: u64,
}

impl AnthropicAdapter {
    fn dense_index(&mut self, raw_index: usize) -> usize {
        let next = self.tool_indices.len();
        *self.tool_indices.entry(raw_index).or_insert(next)
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn path(&self, _model: &str) -> String {
        "/messages".to_string()
    }

    fn headers(&self, api_key: &str) -> Vec<(String, String)> {
        vec![
            ("x-api-key".to_string(), api_key.to_string()),
            ("anthropic-version".to_string(), "2023-06-01".to_string()),
            ("anthropic-beta".to_string(), "prompt-caching-2024-07-31".to_string()),
        ]
    }

    fn request_body(
        &self,
        model: &str,
        messages: &[ChatCompletionRequestMessage],
        tools: &[ChatCompletionTool],
    ) -> Value {
        let (system, messages_json) = build_messages(messages);
        let tools_json: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.function.name,
                    "description": t.function.description,
                    "input_schema": t.function.parameters,
                })
            })
            .collect();

        let mut body = json!({
            "model": model,
            "messages": messages_json,
            "max_tokens": MAX_TOKENS,
            "stream": true,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if !tools_json.is_empty() {
            body["tools"] = json!(tools_json);
        }
        body
    }

    fn is_done_sentinel(&self, _frame: &SseFrame) -> bool {
        false
    }

    fn handle_frame(&mut self, frame: &SseFrame) -> Vec<StreamDelta> {
        match frame.event.as_deref() {
            Some("message_start") => {
                if let Ok(start) = serde_json::from_str::<MessageStart>(&frame.data) {
                    if let Some(usage) = start.message.usage {
                        self.max_input = usage.input_tokens.unwrap_or(0);
                    }
                }
                vec![]
            }
            Some("content_block_start") => {
                let Ok(block) = serde_json::from_str::<ContentBlockStart>(&frame.data) else {
                    return vec![];
                };
                if block.content_block.kind == "tool_use" {
                    let index = self.dense_index(block.index);
                    vec![StreamDelta::ToolCall {
                        index,
                        id: block.content_block.id,
                        name: block.content_block.name,
                        arguments: String::new(),
                    }]
                } else {
                    vec![]
                }
            }
            Some("content_block_delta") => {
                let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(&frame.data) else {
                    return vec![];
                };
                match delta.delta.kind.as_str() {
                    "text_delta" => delta
                        .delta
                        .text
                        .filter(|t| !t.is_empty())
                        .map(|t| vec![StreamDelta::Text(t)])
                        .unwrap_or_default(),
                    "thinking_delta" => delta
                        .delta
                        .thinking
                        .filter(|t| !t.is_empty())
                        .map(|t| vec![StreamDelta::Reasoning(t)])
                        .unwrap_or_default(),
                    "input_json_delta" => {
                        let index = self.dense_index(delta.index);
                        vec![StreamDelta::ToolCall {
                            index,
                            id: None,
                            name: None,
                            arguments: delta.delta.partial_json.unwrap_or_default(),
                        }]
                    }
                    _ => vec![],
                }
            }
            Some("message_delta") => {
                let Ok(md) = serde_json::from_str::<MessageDelta>(&frame.data) else {
                    return vec![];
                };
                md.usage
                    .and_then(|u| u.output_tokens)
                    .map(|output| {
                        vec![StreamDelta::Usage { input: self.max_input, output, reasoning: None }]
                    })
                    .unwrap_or_default()
            }
            Some("message_stop") => vec![StreamDelta::Done],
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_use_start_assigns_dense_index() {
        let mut adapter = AnthropicAdapter::default();
        let frame = SseFrame {
            event: Some("content_block_start".to_string()),
            data: r#"{"index":3,"content_block":{"type":"tool_use","id":"t1","name":"read"}}"#.to_string(),
        };
        let deltas = adapter.handle_frame(&frame);
        assert!(matches!(&deltas[0], StreamDelta::ToolCall { index: 0, id: Some(id), .. } if id == "t1"));
    }

    #[test]
    fn test_message_stop_is_done() {
        let mut adapter = AnthropicAdapter::default();
        let frame = SseFrame { event: Some("message_stop".to_string()), data: "{}".to_string() };
        assert!(matches!(adapter.handle_frame(&frame)[0], StreamDelta::Done));
    }

    #[test]
    fn test_text_delta() {
        let mut adapter = AnthropicAdapter::default();
        let frame = SseFrame {
            event: Some("content_block_delta".to_string()),
            data: r#"{"index":0,"delta":{"type":"text_delta","text":"hi"}}"#.to_string(),
        };
        assert!(matches!(&adapter.handle_frame(&frame)[0], StreamDelta::Text(t) if t == "hi"));
    }
}
