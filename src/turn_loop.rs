//! TurnLoop — drives one bounded tool-calling turn.
//!
//! Streams a completion, executes any tool calls in order, repeats until the
//! model stops calling tools or the round budget is exhausted. Replaces the
//! teacher's `BaseAgent::execute_turn` (`agent/base.rs`): the termination
//! rule is "no tool calls", not a special `task_complete` tool, and the
//! doom-loop heuristic is gone — unwanted repetition is the model's problem,
//! not the loop's.

use crate::agent::AgentConfig;
use crate::events::{AgentEvent, ExecutedToolCall, TokenUsage, TurnCompleteReason, TurnResult};
use crate::provider::{ProviderClient, StreamDelta};
use crate::telemetry::{Telemetry, TraceBuilder, TraceGuard};
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolType, FunctionCall,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default max tool-calling rounds at recursion depth 0.
const DEFAULT_MAX_TOOL_ROUNDS: usize = 40;

/// How often (in rounds) to recite the original request when the scratchpad
/// is empty.
const REMINDER_INTERVAL: usize = 5;

/// Tool results longer than this are compacted once they precede the most
/// recent assistant message.
const COMPACTION_THRESHOLD: usize = 200;

const RECITATION_PREFIX: &str = "[Recitation]";

/// A process-local, free-form plan the agent may rewrite via TodoWrite.
/// Injected back into history each round so the model doesn't lose the
/// thread over a long tool-calling turn.
#[derive(Clone, Default)]
pub struct Scratchpad(Arc<RwLock<String>>);

impl Scratchpad {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(String::new())))
    }

    pub fn get(&self) -> String {
        self.0.read().unwrap().clone()
    }

    pub fn set(&self, content: String) {
        *self.0.write().unwrap() = content;
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().unwrap().is_empty()
    }
}

/// Trait for executing tools, keeping the loop ignorant of registry/proxy
/// details.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        working_dir: &PathBuf,
        cancellation: &CancellationToken,
    ) -> Result<String, String>;
}

/// Drives the bounded tool-calling loop for one agent turn.
#[derive(Clone)]
pub struct TurnLoop {
    pub name: String,
    pub config: AgentConfig,
    provider: Arc<ProviderClient>,
    working_dir: PathBuf,
    telemetry: Option<Arc<Telemetry>>,
    pub session_id_override: Option<Uuid>,
}

impl TurnLoop {
    pub fn new(config: AgentConfig, provider: Arc<ProviderClient>, working_dir: PathBuf) -> Self {
        Self {
            name: config.name.clone(),
            config,
            provider,
            working_dir,
            telemetry: None,
            session_id_override: None,
        }
    }

    pub fn with_telemetry(
        config: AgentConfig,
        provider: Arc<ProviderClient>,
        working_dir: PathBuf,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            config,
            provider,
            working_dir,
            telemetry: Some(telemetry),
            session_id_override: None,
        }
    }

    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id_override = Some(session_id);
        self
    }

    pub fn working_dir(&self) -> &PathBuf {
        &self.working_dir
    }

    /// Run one turn: stream, execute tools, repeat until the model makes no
    /// tool calls or `maxToolRounds` is exhausted.
    pub async fn process_turn(
        &self,
        messages: &mut Vec<ChatCompletionRequestMessage>,
        tools: &[ChatCompletionTool],
        tool_executor: &dyn ToolExecutor,
        scratchpad: &Scratchpad,
        event_tx: &mpsc::UnboundedSender<AgentEvent>,
        cancellation: CancellationToken,
    ) -> Result<TurnResult, String> {
        let max_rounds = self
            .config
            .max_iterations
            .unwrap_or(DEFAULT_MAX_TOOL_ROUNDS);

        let mut total_usage = TokenUsage::default();
        let mut all_tool_calls: Vec<ExecutedToolCall> = vec![];
        let files_changed: Vec<PathBuf> = vec![];
        let mut final_text: Option<String> = None;
        let mut final_thinking: Option<String> = None;

        let _ = event_tx.send(AgentEvent::TurnStart {
            agent: self.name.clone(),
        });

        for round in 0..max_rounds {
            if cancellation.is_cancelled() {
                return Ok(self.cancelled_result(final_text, final_thinking, all_tool_calls, total_usage, files_changed, event_tx));
            }

            if round > 0 {
                compact_tool_results(messages);
            }
            inject_recitation(messages, scratchpad, round);

            let round_result = self
                .stream_round(messages, tools, &cancellation, event_tx)
                .await?;

            let RoundOutcome {
                accumulated_text,
                accumulated_thinking,
                tool_call_parts,
                usage,
                cancelled,
            } = round_result;

            if cancelled {
                return Ok(self.cancelled_result(final_text, final_thinking, all_tool_calls, total_usage, files_changed, event_tx));
            }

            total_usage.input += usage.input;
            total_usage.output += usage.output;
            if let Some(r) = usage.reasoning {
                total_usage.reasoning = Some(total_usage.reasoning.unwrap_or(0) + r);
            }

            if !accumulated_thinking.is_empty() {
                let _ = event_tx.send(AgentEvent::ThinkingComplete {
                    agent: self.name.clone(),
                    text: accumulated_thinking.clone(),
                });
                final_thinking = Some(accumulated_thinking);
            }

            if tool_call_parts.is_empty() {
                if !accumulated_text.is_empty() {
                    messages.push(ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(accumulated_text.clone())
                            .build()
                            .map_err(|e| format!("failed to build assistant message: {e}"))?,
                    ));
                    let _ = event_tx.send(AgentEvent::TextComplete {
                        agent: self.name.clone(),
                        text: accumulated_text.clone(),
                    });
                    final_text = Some(accumulated_text);
                }

                let _ = event_tx.send(AgentEvent::TurnComplete {
                    agent: self.name.clone(),
                    reason: TurnCompleteReason::TextResponse,
                });

                return Ok(TurnResult {
                    text: final_text,
                    thinking: final_thinking,
                    tool_calls: all_tool_calls,
                    reason: TurnCompleteReason::TextResponse,
                    usage: total_usage,
                    files_changed,
                });
            }

            push_assistant_tool_calls(messages, &tool_call_parts)?;

            self.execute_tool_calls(
                tool_call_parts,
                messages,
                tool_executor,
                &cancellation,
                event_tx,
                &mut all_tool_calls,
            )
            .await?;

            if cancellation.is_cancelled() {
                return Ok(self.cancelled_result(final_text, final_thinking, all_tool_calls, total_usage, files_changed, event_tx));
            }
        }

        // Budget exhausted: force one final text-only call so the turn still
        // ends with an assistant message.
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(
                    "You have exhausted your tool call limit for this turn. Respond in text \
                     only. Summarize what you accomplished and what remains.",
                )
                .build()
                .map_err(|e| format!("failed to build forced-final user message: {e}"))?,
        ));

        let final_round = self.stream_round(messages, &[], &cancellation, event_tx).await?;

        if final_round.cancelled {
            return Ok(self.cancelled_result(final_text, final_thinking, all_tool_calls, total_usage, files_changed, event_tx));
        }

        total_usage.input += final_round.usage.input;
        total_usage.output += final_round.usage.output;

        if !final_round.accumulated_text.is_empty() {
            messages.push(ChatCompletionRequestMessage::Assistant(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(final_round.accumulated_text.clone())
                    .build()
                    .map_err(|e| format!("failed to build assistant message: {e}"))?,
            ));
            let _ = event_tx.send(AgentEvent::TextComplete {
                agent: self.name.clone(),
                text: final_round.accumulated_text.clone(),
            });
            final_text = Some(final_round.accumulated_text);
        }

        let _ = event_tx.send(AgentEvent::TurnComplete {
            agent: self.name.clone(),
            reason: TurnCompleteReason::BudgetExhausted,
        });

        Ok(TurnResult {
            text: final_text,
            thinking: final_thinking,
            tool_calls: all_tool_calls,
            reason: TurnCompleteReason::BudgetExhausted,
            usage: total_usage,
            files_changed,
        })
    }

    fn cancelled_result(
        &self,
        text: Option<String>,
        thinking: Option<String>,
        tool_calls: Vec<ExecutedToolCall>,
        usage: TokenUsage,
        files_changed: Vec<PathBuf>,
        event_tx: &mpsc::UnboundedSender<AgentEvent>,
    ) -> TurnResult {
        let _ = event_tx.send(AgentEvent::Cancelled {
            agent: self.name.clone(),
        });
        TurnResult {
            text,
            thinking,
            tool_calls,
            reason: TurnCompleteReason::Cancelled,
            usage,
            files_changed,
        }
    }

    /// Stream one completion, accumulating text/thinking/tool-call deltas
    /// and token usage, forwarding events as they arrive.
    async fn stream_round(
        &self,
        messages: &[ChatCompletionRequestMessage],
        tools: &[ChatCompletionTool],
        cancellation: &CancellationToken,
        event_tx: &mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<RoundOutcome, String> {
        let (delta_tx, mut delta_rx) = mpsc::unbounded_channel();

        let model_name = self
            .config
            .model
            .clone()
            .unwrap_or_else(|| self.provider.config().default_model.clone());
        let mut trace_guard = self.telemetry.as_ref().map(|t| {
            let msgs_json = serde_json::to_string(&messages).unwrap_or_default();
            let tools_json = serde_json::to_string(&tools).ok();
            let session_id = self.session_id_override.unwrap_or_else(|| t.session_id());
            let builder = TraceBuilder::new(
                session_id,
                &self.name,
                &self.provider.config().name,
                &model_name,
                msgs_json,
            )
            .with_tools(tools_json.unwrap_or_default());
            let mut guard = TraceGuard::new(t.clone(), builder);
            guard.flush();
            guard
        });

        let provider = self.provider.clone();
        let msgs = messages.to_vec();
        let tool_defs = tools.to_vec();
        let model = self.config.model.clone();
        let cancel = cancellation.clone();

        let stream_handle = tokio::spawn(async move {
            provider
                .chat_stream(msgs, tool_defs, model.as_deref(), delta_tx, Some(cancel))
                .await
        });

        let mut accumulated_text = String::new();
        let mut accumulated_thinking = String::new();
        let mut tool_call_parts: HashMap<usize, (String, String, String)> = HashMap::new();
        let mut usage = TokenUsage::default();

        loop {
            let delta = tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    stream_handle.abort();
                    return Ok(RoundOutcome {
                        accumulated_text,
                        accumulated_thinking,
                        tool_call_parts,
                        usage,
                        cancelled: true,
                    });
                }
                delta = delta_rx.recv() => delta,
            };

            let Some(delta) = delta else { break };

            match delta {
                StreamDelta::Text(text) => {
                    let _ = event_tx.send(AgentEvent::TextDelta {
                        agent: self.name.clone(),
                        delta: text.clone(),
                    });
                    accumulated_text.push_str(&text);
                    if let Some(ref mut guard) = trace_guard {
                        guard.push_text(&text);
                        guard.flush();
                    }
                }
                StreamDelta::Reasoning(text) => {
                    let _ = event_tx.send(AgentEvent::ThinkingDelta {
                        agent: self.name.clone(),
                        delta: text.clone(),
                    });
                    accumulated_thinking.push_str(&text);
                    if let Some(ref mut guard) = trace_guard {
                        guard.push_thinking(&text);
                        guard.flush();
                    }
                }
                StreamDelta::ToolCall { index, id, name, arguments } => {
                    let entry = tool_call_parts
                        .entry(index)
                        .or_insert_with(|| (String::new(), String::new(), String::new()));
                    if let Some(id) = id {
                        entry.0 = id;
                    }
                    if let Some(name) = name {
                        entry.1 = name;
                    }
                    entry.2.push_str(&arguments);
                }
                StreamDelta::Usage { input, output, reasoning } => {
                    usage.input = usage.input.max(input);
                    usage.output = usage.output.max(output);
                    if let Some(r) = reasoning {
                        usage.reasoning = Some(r);
                    }
                    if let Some(ref mut guard) = trace_guard {
                        guard.set_usage(input, output);
                    }
                    let _ = event_tx.send(AgentEvent::Usage {
                        agent: self.name.clone(),
                        input_tokens: input,
                        output_tokens: output,
                        reasoning_tokens: reasoning,
                    });
                }
                StreamDelta::Done => break,
            }
        }

        let stream_result = stream_handle.await;

        if let Some(ref mut guard) = trace_guard {
            for (_, (id, name, args)) in &tool_call_parts {
                guard.push_tool_call(id, name, args);
            }
            match &stream_result {
                Ok(Err(e)) => guard.set_error(e.clone()),
                Err(e) => guard.set_error(e.to_string()),
                Ok(Ok(())) => {}
            }
        }

        if let Some(mut guard) = trace_guard.take() {
            guard.complete();
        }

        match stream_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(format!("stream error: {e}")),
            Err(e) => return Err(format!("stream task panicked: {e}")),
        }

        Ok(RoundOutcome {
            accumulated_text,
            accumulated_thinking,
            tool_call_parts,
            usage,
            cancelled: false,
        })
    }

    async fn execute_tool_calls(
        &self,
        tool_call_parts: HashMap<usize, (String, String, String)>,
        messages: &mut Vec<ChatCompletionRequestMessage>,
        tool_executor: &dyn ToolExecutor,
        cancellation: &CancellationToken,
        event_tx: &mpsc::UnboundedSender<AgentEvent>,
        all_tool_calls: &mut Vec<ExecutedToolCall>,
    ) -> Result<(), String> {
        let mut ordered: Vec<_> = tool_call_parts.into_iter().collect();
        ordered.sort_by_key(|(index, _)| *index);

        for (_, (tool_id, tool_name, tool_args_str)) in ordered {
            if cancellation.is_cancelled() {
                return Ok(());
            }

            let args: serde_json::Value =
                serde_json::from_str(&tool_args_str).unwrap_or(serde_json::json!({}));

            let _ = event_tx.send(AgentEvent::ToolCallStart {
                agent: self.name.clone(),
                call_id: tool_id.clone(),
                tool: tool_name.clone(),
                arguments: args.clone(),
            });

            let start = Instant::now();
            let result = tool_executor
                .execute(&tool_name, args.clone(), &self.working_dir, cancellation)
                .await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let (output, is_error) = match result {
                Ok(output) => (output, false),
                Err(e) => (e, true),
            };

            let _ = event_tx.send(AgentEvent::ToolCallEnd {
                agent: self.name.clone(),
                call_id: tool_id.clone(),
                tool: tool_name.clone(),
                arguments: args.clone(),
                output: output.clone(),
                is_error,
                duration_ms,
            });

            all_tool_calls.push(ExecutedToolCall {
                id: tool_id.clone(),
                name: tool_name.clone(),
                arguments: args,
                output: output.clone(),
                is_error,
                duration_ms,
            });

            messages.push(ChatCompletionRequestMessage::Tool(
                ChatCompletionRequestToolMessageArgs::default()
                    .content(output)
                    .tool_call_id(tool_id)
                    .build()
                    .map_err(|e| format!("failed to build tool message: {e}"))?,
            ));
        }

        Ok(())
    }
}

struct RoundOutcome {
    accumulated_text: String,
    accumulated_thinking: String,
    tool_call_parts: HashMap<usize, (String, String, String)>,
    usage: TokenUsage,
    cancelled: bool,
}

fn push_assistant_tool_calls(
    messages: &mut Vec<ChatCompletionRequestMessage>,
    tool_call_parts: &HashMap<usize, (String, String, String)>,
) -> Result<(), String> {
    let mut ordered: Vec<_> = tool_call_parts.iter().collect();
    ordered.sort_by_key(|(index, _)| **index);

    let openai_tool_calls: Vec<ChatCompletionMessageToolCall> = ordered
        .into_iter()
        .map(|(_, (id, name, args))| ChatCompletionMessageToolCall {
            id: id.clone(),
            r#type: ChatCompletionToolType::Function,
            function: FunctionCall {
                name: name.clone(),
                arguments: args.clone(),
            },
        })
        .collect();

    messages.push(ChatCompletionRequestMessage::Assistant(
        ChatCompletionRequestAssistantMessageArgs::default()
            .tool_calls(openai_tool_calls)
            .build()
            .map_err(|e| format!("failed to build assistant message: {e}"))?,
    ));

    Ok(())
}

/// Replace any `tool`-role message longer than [`COMPACTION_THRESHOLD`]
/// chars with its first line, but only among messages that precede the
/// last assistant message — results the model has already acted on.
fn compact_tool_results(messages: &mut [ChatCompletionRequestMessage]) {
    let last_assistant_index = messages
        .iter()
        .rposition(|m| matches!(m, ChatCompletionRequestMessage::Assistant(_)));

    let Some(last_assistant_index) = last_assistant_index else {
        return;
    };

    for message in messages[..last_assistant_index].iter_mut() {
        if let ChatCompletionRequestMessage::Tool(tool_msg) = message {
            let content = match &tool_msg.content {
                async_openai::types::ChatCompletionRequestToolMessageContent::Text(text) => {
                    text.clone()
                }
                _ => continue,
            };
            if content.len() > COMPACTION_THRESHOLD {
                let first_line = content.lines().next().unwrap_or("");
                let truncated =
                    format!("{first_line}\n[Truncated — already processed by assistant]");
                tool_msg.content =
                    async_openai::types::ChatCompletionRequestToolMessageContent::Text(truncated);
            }
        }
    }
}

/// Strip prior recitation messages, then inject the current one: the
/// scratchpad if non-empty, else the original request every
/// [`REMINDER_INTERVAL`] rounds.
fn inject_recitation(
    messages: &mut Vec<ChatCompletionRequestMessage>,
    scratchpad: &Scratchpad,
    round: usize,
) {
    messages.retain(|m| {
        if let ChatCompletionRequestMessage::User(user_msg) = m {
            if let async_openai::types::ChatCompletionRequestUserMessageContent::Text(text) =
                &user_msg.content
            {
                return !text.starts_with(RECITATION_PREFIX);
            }
        }
        true
    });

    let plan = scratchpad.get();
    if !plan.is_empty() {
        push_recitation(messages, &format!("{RECITATION_PREFIX} Current plan:\n{plan}"));
        return;
    }

    if round > 0 && round % REMINDER_INTERVAL == 0 {
        let original_request = messages.iter().find_map(|m| {
            if let ChatCompletionRequestMessage::User(user_msg) = m {
                if let async_openai::types::ChatCompletionRequestUserMessageContent::Text(text) =
                    &user_msg.content
                {
                    if !text.starts_with(RECITATION_PREFIX) {
                        return Some(text.clone());
                    }
                }
            }
            None
        });

        if let Some(request) = original_request {
            push_recitation(
                messages,
                &format!("{RECITATION_PREFIX} The user's request: {request}"),
            );
        }
    }
}

fn push_recitation(messages: &mut Vec<ChatCompletionRequestMessage>, content: &str) {
    if let Ok(msg) = ChatCompletionRequestUserMessageArgs::default()
        .content(content)
        .build()
    {
        messages.push(ChatCompletionRequestMessage::User(msg));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::types::{
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    };

    #[test]
    fn test_scratchpad_roundtrip() {
        let pad = Scratchpad::new();
        assert!(pad.is_empty());
        pad.set("step 1".to_string());
        assert_eq!(pad.get(), "step 1");
        assert!(!pad.is_empty());
    }

    #[test]
    fn test_compact_tool_results_skips_short_messages() {
        let mut messages = vec![
            ChatCompletionRequestMessage::Tool(
                ChatCompletionRequestToolMessageArgs::default()
                    .content("short")
                    .tool_call_id("1")
                    .build()
                    .unwrap(),
            ),
            ChatCompletionRequestMessage::Assistant(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content("ok")
                    .build()
                    .unwrap(),
            ),
        ];
        compact_tool_results(&mut messages);
        if let ChatCompletionRequestMessage::Tool(t) = &messages[0] {
            if let async_openai::types::ChatCompletionRequestToolMessageContent::Text(text) =
                &t.content
            {
                assert_eq!(text, "short");
            }
        }
    }

    #[test]
    fn test_compact_tool_results_truncates_long_messages_before_last_assistant() {
        let long = "a".repeat(300);
        let mut messages = vec![
            ChatCompletionRequestMessage::Tool(
                ChatCompletionRequestToolMessageArgs::default()
                    .content(long.clone())
                    .tool_call_id("1")
                    .build()
                    .unwrap(),
            ),
            ChatCompletionRequestMessage::Assistant(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content("ok")
                    .build()
                    .unwrap(),
            ),
        ];
        compact_tool_results(&mut messages);
        if let ChatCompletionRequestMessage::Tool(t) = &messages[0] {
            if let async_openai::types::ChatCompletionRequestToolMessageContent::Text(text) =
                &t.content
            {
                assert!(text.contains("[Truncated — already processed by assistant]"));
            }
        } else {
            panic!("expected tool message");
        }
    }

    #[test]
    fn test_inject_recitation_uses_scratchpad_when_present() {
        let mut messages = vec![ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content("do the thing")
                .build()
                .unwrap(),
        )];
        let pad = Scratchpad::new();
        pad.set("plan: do it".to_string());
        inject_recitation(&mut messages, &pad, 1);

        let last = messages.last().unwrap();
        if let ChatCompletionRequestMessage::User(u) = last {
            if let async_openai::types::ChatCompletionRequestUserMessageContent::Text(text) =
                &u.content
            {
                assert!(text.contains("Current plan"));
                assert!(text.contains("plan: do it"));
            }
        } else {
            panic!("expected user message");
        }
    }

    #[test]
    fn test_inject_recitation_strips_previous_recitation() {
        let mut messages = vec![
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content("original request")
                    .build()
                    .unwrap(),
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content("[Recitation] stale")
                    .build()
                    .unwrap(),
            ),
        ];
        let pad = Scratchpad::new();
        inject_recitation(&mut messages, &pad, 5);

        let recitations: Vec<_> = messages
            .iter()
            .filter_map(|m| {
                if let ChatCompletionRequestMessage::User(u) = m {
                    if let async_openai::types::ChatCompletionRequestUserMessageContent::Text(
                        text,
                    ) = &u.content
                    {
                        if text.starts_with(RECITATION_PREFIX) {
                            return Some(text.clone());
                        }
                    }
                }
                None
            })
            .collect();
        assert_eq!(recitations.len(), 1);
        assert!(recitations[0].contains("original request"));
    }

    #[test]
    fn test_inject_recitation_no_reminder_at_round_zero() {
        let mut messages = vec![ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content("original request")
                .build()
                .unwrap(),
        )];
        let pad = Scratchpad::new();
        inject_recitation(&mut messages, &pad, 0);
        assert_eq!(messages.len(), 1);
    }
}
