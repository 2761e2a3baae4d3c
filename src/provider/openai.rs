//! OpenAI chat-completions wire format.
//!
//! Moved out of `client.rs`'s former inline parsing; same `StreamChunk`
//! shape, now behind the shared `ProviderAdapter` trait so the harness can
//! dispatch to it alongside the other three formats.

use super::adapter::ProviderAdapter;
use super::sse::SseFrame;
use super::StreamDelta;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessageContent,
    ChatCompletionRequestUserMessageContentPart, ChatCompletionTool,
};
use serde_json::{json, Value};

#[derive(serde::Deserialize)]
struct StreamChunkDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<StreamToolCallChunk>>,
}

#[derive(serde::Deserialize)]
struct StreamToolCallChunk {
    index: usize,
    id: Option<String>,
    function: Option<StreamFunctionChunk>,
}

#[derive(serde::Deserialize)]
struct StreamFunctionChunk {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(serde::Deserialize)]
struct StreamChoice {
    delta: StreamChunkDelta,
}

#[derive(serde::Deserialize)]
struct CompletionTokensDetails {
    reasoning_tokens: Option<u64>,
}

#[derive(serde::Deserialize)]
struct StreamUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(serde::Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<StreamUsage>,
}

/// Merge all system messages into one at the front, per §6's OpenAI
/// request-side rule. `merge_in_place` keeps consecutive system messages
/// where they sit instead (Ollama's variant of the same rule).
pub fn message_to_json(msg: &ChatCompletionRequestMessage) -> Value {
    match msg {
        ChatCompletionRequestMessage::System(s) => json!({"role": "system", "content": s.content}),
        ChatCompletionRequestMessage::User(u) => {
            let content = match &u.content {
                ChatCompletionRequestUserMessageContent::Text(t) => t.clone(),
                ChatCompletionRequestUserMessageContent::Array(parts) => parts
                    .iter()
                    .filter_map(|p| match p {
                        ChatCompletionRequestUserMessageContentPart::Text(t) => Some(t.text.clone()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(""),
            };
            json!({"role": "user", "content": content})
        }
        ChatCompletionRequestMessage::Assistant(a) => {
            let mut m = json!({"role": "assistant"});
            if let Some(content) = &a.content {
                m["content"] = json!(content);
            }
            if let Some(tool_calls) = &a.tool_calls {
                m["tool_calls"] = json!(tool_calls);
            }
            m
        }
        ChatCompletionRequestMessage::Tool(t) => json!({
            "role": "tool",
            "tool_call_id": t.tool_call_id,
            "content": t.content,
        }),
        _ => json!({"role": "unknown"}),
    }
}

fn merge_leading_system_messages(mut messages: Vec<Value>) -> Vec<Value> {
    let mut merged = String::new();
    let mut rest = Vec::new();
    let mut seen_non_system = false;

    for m in messages.drain(..) {
        if !seen_non_system && m.get("role").and_then(|r| r.as_str()) == Some("system") {
            if !merged.is_empty() {
                merged.push('\n');
            }
            merged.push_str(m.get("content").and_then(|c| c.as_str()).unwrap_or(""));
        } else {
            seen_non_system = true;
            rest.push(m);
        }
    }

    let mut out = Vec::new();
    if !merged.is_empty() {
        out.push(json!({"role": "system", "content": merged}));
    }
    out.extend(rest);
    out
}

pub struct OpenAiAdapter {
    pub ollama_mode: bool,
}

impl ProviderAdapter for OpenAiAdapter {
    fn path(&self, _model: &str) -> String {
        "/chat/completions".to_string()
    }

    fn headers(&self, api_key: &str) -> Vec<(String, String)> {
        vec![("Authorization".to_string(), format!("Bearer {}", api_key))]
    }

    fn request_body(
        &self,
        model: &str,
        messages: &[ChatCompletionRequestMessage],
        tools: &[ChatCompletionTool],
    ) -> Value {
        let messages_json: Vec<Value> = messages.iter().map(message_to_json).collect();
        let messages_json = if self.ollama_mode {
            messages_json
        } else {
            merge_leading_system_messages(messages_json)
        };

        let tools_json: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.function.name,
                        "description": t.function.description,
                        "parameters": t.function.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": model,
            "messages": messages_json,
            "stream": true,
            "stream_options": {"include_usage": true},
            // llama.cpp/LM Studio: enable prompt caching for faster responses.
            "cache_prompt": true,
        });
        if !tools_json.is_empty() {
            body["tools"] = json!(tools_json);
        }
        body
    }

    fn handle_frame(&mut self, frame: &SseFrame) -> Vec<StreamDelta> {
        if self.is_done_sentinel(frame) {
            return vec![StreamDelta::Done];
        }

        let Ok(chunk) = serde_json::from_str::<StreamChunk>(&frame.data) else {
            return vec![];
        };

        let mut out = Vec::new();
        if let Some(usage) = &chunk.usage {
            let reasoning = usage
                .completion_tokens_details
                .as_ref()
                .and_then(|d| d.reasoning_tokens);
            out.push(StreamDelta::Usage {
                input: usage.prompt_tokens,
                output: usage.completion_tokens,
                reasoning,
            });
        }

        for choice in &chunk.choices {
            if let Some(reasoning) = &choice.delta.reasoning_content {
                if !reasoning.is_empty() {
                    out.push(StreamDelta::Reasoning(reasoning.clone()));
                }
            }
            if let Some(content) = &choice.delta.content {
                if !content.is_empty() {
                    out.push(StreamDelta::Text(content.clone()));
                }
            }
            if let Some(tool_calls) = &choice.delta.tool_calls {
                for tc in tool_calls {
                    out.push(StreamDelta::ToolCall {
                        index: tc.index,
                        id: tc.id.clone(),
                        name: tc.function.as_ref().and_then(|f| f.name.clone()),
                        arguments: tc
                            .function
                            .as_ref()
                            .and_then(|f| f.arguments.clone())
                            .unwrap_or_default(),
                    });
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_sentinel() {
        let adapter = OpenAiAdapter { ollama_mode: false };
        let frame = SseFrame { event: None, data: "[DONE]".to_string() };
        assert!(adapter.is_done_sentinel(&frame));
    }

    #[test]
    fn test_merge_leading_system_messages() {
        let input = vec![
            json!({"role": "system", "content": "a"}),
            json!({"role": "system", "content": "b"}),
            json!({"role": "user", "content": "hi"}),
        ];
        let merged = merge_leading_system_messages(input);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0]["content"], "a\nb");
    }

    #[test]
    fn test_handle_frame_parses_text_delta() {
        let mut adapter = OpenAiAdapter { ollama_mode: false };
        let frame = SseFrame {
            event: None,
            data: r#"{"choices":[{"delta":{"content":"hi"}}]}"#.to_string(),
        };
        let deltas = adapter.handle_frame(&frame);
        assert!(matches!(&deltas[0], StreamDelta::Text(t) if t == "hi"));
    }
}
