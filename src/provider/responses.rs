//! OpenAI Responses API wire format.

use super::adapter::ProviderAdapter;
use super::sse::SseFrame;
use super::StreamDelta;
use async_openai::types::{ChatCompletionRequestMessage, ChatCompletionTool};
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(serde::Deserialize)]
struct TextDeltaEvent {
    delta: String,
}

#[derive(serde::Deserialize)]
struct ReasoningDeltaEvent {
    delta: String,
}

#[derive(serde::Deserialize)]
struct OutputItemAdded {
    output_index: usize,
    item: OutputItem,
}

#[derive(serde::Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    call_id: Option<String>,
    name: Option<String>,
}

#[derive(serde::Deserialize)]
struct FunctionCallArgsDelta {
    output_index: usize,
    delta: String,
}

#[derive(serde::Deserialize)]
struct CompletedEvent {
    response: CompletedResponse,
}

#[derive(serde::Deserialize)]
struct CompletedResponse {
    usage: Option<ResponsesUsage>,
}

#[derive(serde::Deserialize)]
struct ResponsesUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    output_tokens_details: Option<OutputTokensDetails>,
}

#[derive(serde::Deserialize)]
struct OutputTokensDetails {
    reasoning_tokens: Option<u64>,
}

/// True for model names the Responses API treats as reasoning-optimised,
/// where `temperature` must be omitted from the request body entirely.
fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("o1") || model.starts_with("o3") || model.starts_with("gpt-5")
}

/// Convert tool calls/outputs into Responses API `function_call`/
/// `function_call_output` input items, per §6.
fn build_input(messages: &[ChatCompletionRequestMessage]) -> Vec<Value> {
    let mut input = Vec::new();

    for msg in messages {
        match msg {
            ChatCompletionRequestMessage::System(s) => {
                if let async_openai::types::ChatCompletionRequestSystemMessageContent::Text(t) = &s.content {
                    input.push(json!({"role": "system", "content": t}));
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
                input.push(json!({"role": "user", "content": text}));
            }
            ChatCompletionRequestMessage::Assistant(a) => {
                if let Some(content) = &a.content {
                    if let async_openai::types::ChatCompletionRequestAssistantMessageContent::Text(t) = content {
                        if !t.is_empty() {
                            input.push(json!({"role": "assistant", "content": t}));
                        }
                    }
                }
                if let Some(tool_calls) = &a.tool_calls {
                    for tc in tool_calls {
                        input.push(json!({
                            "type": "function_call",
                            "call_id": tc.id,
                            "name": tc.function.name,
                            "arguments": tc.function.arguments,
                        }));
                    }
                }
            }
            ChatCompletionRequestMessage::Tool(t) => {
                input.push(json!({
                    "type": "function_call_output",
                    "call_id": t.tool_call_id,
                    "output": t.content,
                }));
            }
            _ => {}
        }
    }

    input
}

#[derive(Default)]
pub struct ResponsesAdapter {
    /// Responses API `output_index` -> dense tool-call index.
    tool_indices: HashMap<usize, usize>,
}

impl ResponsesAdapter {
    fn dense_index(&mut self, output_index: usize) -> usize {
        let next = self.tool_indices.len();
        *self.tool_indices.entry(output_index).or_insert(next)
    }
}

impl ProviderAdapter for ResponsesAdapter {
    fn path(&self, _model: &str) -> String {
        "/responses".to_string()
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
        let tools_json: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "name": t.function.name,
                    "description": t.function.description,
                    "parameters": t.function.parameters,
                })
            })
            .collect();

        let mut body = json!({
            "model": model,
            "input": build_input(messages),
            "stream": true,
        });
        if !tools_json.is_empty() {
            body["tools"] = json!(tools_json);
        }
        if !is_reasoning_model(model) {
            body["temperature"] = json!(1.0);
        }
        body
    }

    fn is_done_sentinel(&self, _frame: &SseFrame) -> bool {
        false
    }

    fn handle_frame(&mut self, frame: &SseFrame) -> Vec<StreamDelta> {
        match frame.event.as_deref() {
            Some("response.output_text.delta") => {
                serde_json::from_str::<TextDeltaEvent>(&frame.data)
                    .ok()
                    .filter(|e| !e.delta.is_empty())
                    .map(|e| vec![StreamDelta::Text(e.delta)])
                    .unwrap_or_default()
            }
            Some("response.reasoning_summary_text.delta") => {
                serde_json::from_str::<ReasoningDeltaEvent>(&frame.data)
                    .ok()
                    .filter(|e| !e.delta.is_empty())
                    .map(|e| vec![StreamDelta::Reasoning(e.delta)])
                    .unwrap_or_default()
            }
            Some("response.output_item.added") => {
                let Ok(added) = serde_json::from_str::<OutputItemAdded>(&frame.data) else {
                    return vec![];
                };
                if added.item.kind == "function_call" {
                    let index = self.dense_index(added.output_index);
                    vec![StreamDelta::ToolCall {
                        index,
                        id: added.item.call_id,
                        name: added.item.name,
                        arguments: String::new(),
                    }]
                } else {
                    vec![]
                }
            }
            Some("response.function_call_arguments.delta") => {
                let Ok(delta) = serde_json::from_str::<FunctionCallArgsDelta>(&frame.data) else {
                    return vec![];
                };
                let index = self.dense_index(delta.output_index);
                vec![StreamDelta::ToolCall { index, id: None, name: None, arguments: delta.delta }]
            }
            Some("response.completed") => {
                let mut out = Vec::new();
                if let Ok(completed) = serde_json::from_str::<CompletedEvent>(&frame.data) {
                    if let Some(usage) = completed.response.usage {
                        let reasoning = usage
                            .output_tokens_details
                            .and_then(|d| d.reasoning_tokens);
                        out.push(StreamDelta::Usage {
                            input: usage.input_tokens.unwrap_or(0),
                            output: usage.output_tokens.unwrap_or(0),
                            reasoning,
                        });
                    }
                }
                out.push(StreamDelta::Done);
                out
            }
            Some("response.failed") | Some("response.incomplete") => vec![StreamDelta::Done],
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_reasoning_model() {
        assert!(is_reasoning_model("o1-preview"));
        assert!(is_reasoning_model("gpt-5-mini"));
        assert!(!is_reasoning_model("gpt-4o"));
    }

    #[test]
    fn test_function_call_added_assigns_dense_index() {
        let mut adapter = ResponsesAdapter::default();
        let frame = SseFrame {
            event: Some("response.output_item.added".to_string()),
            data: r#"{"output_index":2,"item":{"type":"function_call","call_id":"c1","name":"edit"}}"#
                .to_string(),
        };
        let deltas = adapter.handle_frame(&frame);
        assert!(matches!(&deltas[0], StreamDelta::ToolCall { index: 0, id: Some(id), .. } if id == "c1"));
    }

    #[test]
    fn test_response_completed_emits_usage_then_done() {
        let mut adapter = ResponsesAdapter::default();
        let frame = SseFrame {
            event: Some("response.completed".to_string()),
            data: r#"{"response":{"usage":{"input_tokens":10,"output_tokens":5}}}"#.to_string(),
        };
        let deltas = adapter.handle_frame(&frame);
        assert!(matches!(deltas[0], StreamDelta::Usage { input: 10, output: 5, .. }));
        assert!(matches!(deltas[1], StreamDelta::Done));
    }
}
