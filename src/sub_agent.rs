//! SubAgent — delegates a bounded task to a fresh child turn loop.
//!
//! Directly grounded on `tools/task.rs`'s `TaskTool` (registry-copy-without-
//! this-tool recursion guard, throw-away event-drain task, `run_subagent`
//! shape), generalised from the teacher's flexible `AgentRegistry` lookup to
//! a fixed 4-type dispatch table.

use crate::agent::AgentConfig;
use crate::events::AgentEvent;
use crate::provider::ProviderClient;
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolRegistry, ToolResult};
use crate::turn_loop::{Scratchpad, TurnLoop};
use async_openai::types::{ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

const DEFAULT_MAX_ITERATIONS: usize = 5;
const MAX_ITERATIONS_CAP: usize = 20;

const DESCRIPTION: &str = r#"Launch a sub-agent to handle a bounded, well-defined piece of work.

Types:
- explore: read-only investigation (Read, Grep, Shell)
- editor: read and make file changes (Read, Edit, Grep, Shell)
- reviewer: read-only critique (Read, Grep, Shell)
- web: web research (WebSearch, WebFetch)
- (omitted): all tools except SubAgent itself

Usage notes:
- The sub-agent returns a single message with its results
- Each invocation is stateless; it cannot spawn further sub-agents
- Clearly specify what you want investigated or changed"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubAgentType {
    Explore,
    Editor,
    Reviewer,
    Web,
}

impl SubAgentType {
    fn tool_names(&self) -> &'static [&'static str] {
        match self {
            SubAgentType::Explore => &["read_file", "grep", "bash"],
            SubAgentType::Editor => &["read_file", "edit", "grep", "bash"],
            SubAgentType::Reviewer => &["read_file", "grep", "bash"],
            SubAgentType::Web => &["web_search", "web_fetch"],
        }
    }

    fn prompt_fragment(&self) -> &'static str {
        match self {
            SubAgentType::Explore => {
                "You are a read-only exploration sub-agent. Investigate and report findings; do not modify files."
            }
            SubAgentType::Editor => {
                "You are an editing sub-agent. Make the requested file changes directly."
            }
            SubAgentType::Reviewer => {
                "You are a review sub-agent. Critique the indicated work; do not modify files."
            }
            SubAgentType::Web => {
                "You are a web-research sub-agent. Use web search and fetch to answer the request."
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Args {
    /// Short description of the task (3-5 words)
    #[allow(dead_code)]
    description: String,
    /// The full task prompt for the sub-agent
    prompt: String,
    /// Which sub-agent type to use; omitted means all non-SubAgent tools
    #[serde(default)]
    r#type: Option<SubAgentType>,
    /// Max iterations (optional, default 5, capped at 20)
    #[serde(default)]
    max_iterations: Option<usize>,
}

/// Delegates one bounded task to a fresh [`TurnLoop`], depth-limited to 1.
pub struct SubAgentTool {
    provider: Arc<ProviderClient>,
    /// Tools available to the parent, minus SubAgent itself — the pool
    /// every sub-agent type filters down from.
    base_tools: ToolRegistry,
}

impl SubAgentTool {
    pub fn new(provider: Arc<ProviderClient>, base_tools: ToolRegistry) -> Self {
        Self {
            provider,
            base_tools,
        }
    }

    fn build_system_prompt(&self, sub_type: Option<SubAgentType>) -> String {
        let mut prompt = String::from(
            "You are a sub-agent handling one delegated task. Finish the task and respond with \
             your final result as plain text; you cannot delegate further.",
        );
        if let Some(t) = sub_type {
            prompt.push_str("\n\n");
            prompt.push_str(t.prompt_fragment());
        }
        prompt
    }

    async fn run_subagent(
        &self,
        sub_type: Option<SubAgentType>,
        prompt: &str,
        max_iterations: usize,
        ctx: &ToolContext,
    ) -> Result<String, String> {
        let tools_for_type: ToolRegistry = match sub_type {
            Some(t) => {
                let mut filtered = ToolRegistry::new();
                for name in t.tool_names() {
                    if let Some(tool) = self.base_tools.get(name) {
                        filtered.register_arc(name.to_string(), tool);
                    }
                }
                filtered
            }
            None => self.base_tools.clone(),
        };

        let mut config = AgentConfig::new("sub_agent");
        config.system_prompt = Some(self.build_system_prompt(sub_type));
        config.max_iterations = Some(max_iterations);

        let turn_loop = TurnLoop::new(config, self.provider.clone(), ctx.working_dir.clone());

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| format!("failed to build user message: {e}"))?;
        let mut messages: Vec<ChatCompletionRequestMessage> =
            vec![ChatCompletionRequestMessage::User(user_msg)];

        let openai_tools = tools_for_type.to_openai_tools();
        let scratchpad = Scratchpad::new();

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<AgentEvent>();
        let drain_handle = tokio::spawn(async move { while event_rx.recv().await.is_some() {} });

        let result = turn_loop
            .process_turn(
                &mut messages,
                &openai_tools,
                &tools_for_type,
                &scratchpad,
                &event_tx,
                ctx.cancellation.clone(),
            )
            .await;

        drop(event_tx);
        let _ = drain_handle.await;

        match result {
            Ok(turn_result) => match turn_result.text {
                Some(text) if !text.is_empty() => Ok(text),
                _ => Err("sub-agent produced no assistant message".to_string()),
            },
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        "sub_agent"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "sub_agent".to_string(),
            description: DESCRIPTION.to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "description": {
                        "type": "string",
                        "description": "Short (3-5 word) description of the task"
                    },
                    "prompt": {
                        "type": "string",
                        "description": "The detailed task for the sub-agent to perform"
                    },
                    "type": {
                        "type": "string",
                        "enum": ["explore", "editor", "reviewer", "web"],
                        "description": "Sub-agent type; omit for all non-delegation tools"
                    },
                    "max_iterations": {
                        "type": "integer",
                        "description": "Optional max iterations (default 5, capped at 20)"
                    }
                },
                "required": ["description", "prompt"]
            }),
        }
    }

    async fn execute(&self, args_value: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        if ctx.is_cancelled() {
            return ToolResult::error("Cancelled");
        }

        let args: Args = match serde_json::from_value(args_value) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {e}")),
        };

        let max_iterations = args
            .max_iterations
            .unwrap_or(DEFAULT_MAX_ITERATIONS)
            .min(MAX_ITERATIONS_CAP);

        match self
            .run_subagent(args.r#type, &args.prompt, max_iterations, ctx)
            .await
        {
            Ok(output) => ToolResult::success(output),
            Err(e) => ToolResult::error(format!("Sub-agent error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_names_exclude_sub_agent() {
        for t in [
            SubAgentType::Explore,
            SubAgentType::Editor,
            SubAgentType::Reviewer,
            SubAgentType::Web,
        ] {
            assert!(!t.tool_names().contains(&"sub_agent"));
        }
    }

    #[test]
    fn test_editor_type_includes_edit() {
        assert!(SubAgentType::Editor.tool_names().contains(&"edit"));
        assert!(!SubAgentType::Explore.tool_names().contains(&"edit"));
    }

    #[test]
    fn test_max_iterations_cap() {
        let requested = 100usize;
        let capped = requested.min(MAX_ITERATIONS_CAP);
        assert_eq!(capped, 20);
    }

    #[test]
    fn test_max_iterations_default() {
        let none: Option<usize> = None;
        let resolved = none.unwrap_or(DEFAULT_MAX_ITERATIONS).min(MAX_ITERATIONS_CAP);
        assert_eq!(resolved, 5);
    }
}
