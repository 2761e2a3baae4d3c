//! Shell tool — wraps the in-process [`crate::shell::Shell`].
//!
//! Grounded on the teacher's `bash.rs`: same timeout/cancel shape via
//! `tokio::select!`, same stdout+stderr combination and truncation
//! convention — but executing through the persistent, root-anchored
//! interpreter instead of spawning `bash -c` fresh each call.

use crate::delta_tracker::{record_deltas, snapshot_dir};
use crate::shell::{Shell, ShellError};
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const MAX_TIMEOUT_MS: u64 = 600_000;
const MAX_OUTPUT_LENGTH: usize = 30_000;

#[derive(Debug, Deserialize)]
struct Args {
    command: String,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
}

pub struct ShellTool {
    shell: Arc<Shell>,
}

impl ShellTool {
    pub fn new(shell: Arc<Shell>) -> Self {
        Self { shell }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "bash".to_string(),
            description: "Executes a shell command in a persistent, sandboxed session \
                anchored to the project root. The working directory and exported \
                environment persist across calls. Dangerous commands (interpreters, \
                network tools, privilege escalation, global package installs, system \
                modification) are blocked.\n\n\
                Usage notes:\n\
                - The command argument is required.\n\
                - Optional timeout in milliseconds (max 600000ms / 10 minutes, default \
                  60000ms / 1 minute).\n\
                - Output longer than 30000 characters is truncated in the middle.\n\
                - Prefer grep/read_file/find_path over shelling out to search or read files."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The command to execute"
                    },
                    "timeout": {
                        "type": "number",
                        "description": "Optional timeout in milliseconds (max 600000ms, default 60000ms)"
                    },
                    "description": {
                        "type": "string",
                        "description": "Clear, concise description of what this command does in 5-10 words"
                    }
                },
                "required": ["command", "description"]
            }),
        }
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        if ctx.is_cancelled() {
            return ToolResult::error("Cancelled");
        }

        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {e}")),
        };

        let timeout_ms = args.timeout.map(|t| t.min(MAX_TIMEOUT_MS)).unwrap_or(DEFAULT_TIMEOUT_MS);
        let timeout = std::time::Duration::from_millis(timeout_ms);

        let turn_state = match (&ctx.delta_tracker, ctx.session_id, ctx.turn_id) {
            (Some(tracker), Some(session_id), Some(turn_id)) => {
                Some((tracker, session_id, turn_id, snapshot_dir(&ctx.working_dir)))
            }
            _ => None,
        };

        let exec_result = self.shell.exec(&args.command, &ctx.cancellation, timeout).await;

        if let Some((tracker, session_id, turn_id, pre)) = turn_state {
            let post = snapshot_dir(&ctx.working_dir);
            if let Err(e) = record_deltas(tracker, session_id, turn_id, &ctx.working_dir, &pre, &post) {
                tracing::warn!(error = %e, "failed to record shell deltas");
            }
        }

        let (mut combined, timed_out, exit_code) = match exec_result {
            Ok(output) => {
                let mut combined = output.stdout;
                if !output.stderr.is_empty() {
                    if !combined.is_empty() {
                        combined.push('\n');
                    }
                    combined.push_str(&output.stderr);
                }
                (combined, false, Some(output.exit_code))
            }
            Err(ShellError::Blocked(reason)) => {
                return ToolResult::error(format!("command blocked: {reason}"))
            }
            Err(ShellError::Timeout(ms)) => (format!("Command timed out after {ms}ms"), true, None),
            Err(ShellError::Cancelled) => return ToolResult::error("Command was cancelled"),
            Err(e) => return ToolResult::error(format!("Failed to execute command: {e}")),
        };

        if combined.is_empty() {
            combined = "(no output)".to_string();
        }

        combined = truncate_middle(&combined, MAX_OUTPUT_LENGTH);

        if timed_out {
            combined.push_str("\n[timed out]");
        }
        if let Some(code) = exit_code {
            if code != 0 {
                combined.push_str(&format!("\n[exit code: {code}]"));
            }
        }

        let is_error = timed_out || exit_code.map(|c| c != 0).unwrap_or(false);
        if is_error {
            ToolResult::error(combined)
        } else {
            ToolResult::success(combined)
        }
    }
}

/// Truncates `text` by rune count, keeping the head and tail and replacing
/// the middle with the spec's literal marker.
fn truncate_middle(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }

    let marker = "\n\n... [truncated] ...\n\n";
    let keep = max_chars / 2;
    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{head}{marker}{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio_util::sync::CancellationToken;

    fn test_ctx() -> ToolContext {
        ToolContext::new(PathBuf::from("/tmp"), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_shell_echo() {
        let shell = Arc::new(Shell::with_default_blockers(PathBuf::from("/tmp")));
        let tool = ShellTool::new(shell);
        let result = tool
            .execute(json!({"command": "echo hello", "description": "echo"}), &test_ctx())
            .await;
        assert!(!result.is_error);
        assert!(result.output.contains("hello"));
    }

    #[tokio::test]
    async fn test_shell_blocked_command() {
        let shell = Arc::new(Shell::with_default_blockers(PathBuf::from("/tmp")));
        let tool = ShellTool::new(shell);
        let result = tool
            .execute(json!({"command": "curl http://example.com", "description": "fetch"}), &test_ctx())
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("blocked"));
    }

    #[tokio::test]
    async fn test_shell_exit_code() {
        let shell = Arc::new(Shell::with_default_blockers(PathBuf::from("/tmp")));
        let tool = ShellTool::new(shell);
        let result = tool
            .execute(json!({"command": "exit 42", "description": "exit"}), &test_ctx())
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("[exit code: 42]"));
    }

    #[tokio::test]
    async fn test_shell_empty_output() {
        let shell = Arc::new(Shell::with_default_blockers(PathBuf::from("/tmp")));
        let tool = ShellTool::new(shell);
        let result = tool
            .execute(json!({"command": "true", "description": "noop"}), &test_ctx())
            .await;
        assert!(!result.is_error);
        assert_eq!(result.output, "(no output)");
    }

    #[tokio::test]
    async fn test_shell_records_deltas_when_turn_active() {
        let dir = tempfile::TempDir::new().unwrap();
        let shell = Arc::new(Shell::with_default_blockers(dir.path().to_path_buf()));
        let tool = ShellTool::new(shell);

        let tracker = Arc::new(crate::delta_tracker::DeltaTracker::open_in_memory().unwrap());
        let file_read_tracker = Arc::new(crate::session::FileReadTracker::new());
        let session_id = uuid::Uuid::new_v4();
        let turn_id = uuid::Uuid::new_v4();
        let ctx = ToolContext::new(dir.path().to_path_buf(), CancellationToken::new()).with_turn(
            session_id,
            turn_id,
            file_read_tracker,
            tracker.clone(),
        );

        let result = tool
            .execute(json!({"command": "touch created.txt", "description": "create"}), &ctx)
            .await;
        assert!(!result.is_error);

        let affected = tracker.undo(session_id, turn_id).unwrap();
        assert!(affected.iter().any(|p| p.ends_with("created.txt")));
        assert!(!dir.path().join("created.txt").exists());
    }

    #[test]
    fn test_truncate_middle_preserves_head_and_tail() {
        let text: String = (0..100).map(|i| char::from_u32(65 + (i % 26)).unwrap()).collect();
        let truncated = truncate_middle(&text, 20);
        assert!(truncated.contains("... [truncated] ..."));
        assert!(truncated.starts_with(&text[..10]));
        assert!(truncated.ends_with(&text[text.len() - 10..]));
    }

    #[test]
    fn test_truncate_middle_noop_when_short() {
        assert_eq!(truncate_middle("hello", 100), "hello");
    }
}
