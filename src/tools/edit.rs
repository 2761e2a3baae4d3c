//! Edit file tool — hash-anchored line operations.
//!
//! Four operations, exactly one per call: `create` (new file, no prior read
//! required), and `replace`/`insert`/`delete` (require the file to have
//! passed through `read_file` first, and address lines via the `N:HH`
//! anchors `read_file` tagged them with). Anchors are re-validated against
//! the file's current content before every edit, relocating a stale line
//! number when the content still appears exactly once elsewhere.

use crate::delta_tracker::write_restricted;
use crate::hashline::{format_tagged, hash_line, validate_range, Anchor, TaggedLine};
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

const WINDOW_THRESHOLD: usize = 50;
const WINDOW_RADIUS: usize = 20;

#[derive(Debug, Deserialize, Default)]
struct CreateOp {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplaceOp {
    start: String,
    end: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InsertOp {
    after: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteOp {
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
struct Args {
    file: String,
    #[serde(default)]
    create: Option<CreateOp>,
    #[serde(default)]
    replace: Option<ReplaceOp>,
    #[serde(default)]
    insert: Option<InsertOp>,
    #[serde(default)]
    delete: Option<DeleteOp>,
}

enum Operation {
    Create(CreateOp),
    Replace(ReplaceOp),
    Insert(InsertOp),
    Delete(DeleteOp),
}

fn resolve_operation(mut args: Args) -> Result<(String, Operation), String> {
    let present = [
        args.create.is_some(),
        args.replace.is_some(),
        args.insert.is_some(),
        args.delete.is_some(),
    ]
    .iter()
    .filter(|b| **b)
    .count();

    if present == 0 {
        return Err("exactly one operation (create, replace, insert, delete) is required".to_string());
    }
    if present > 1 {
        return Err(
            "exactly one operation (create, replace, insert, delete) is required, got multiple"
                .to_string(),
        );
    }

    let file = args.file.clone();
    if let Some(op) = args.create.take() {
        return Ok((file, Operation::Create(op)));
    }
    if let Some(op) = args.replace.take() {
        return Ok((file, Operation::Replace(op)));
    }
    if let Some(op) = args.insert.take() {
        return Ok((file, Operation::Insert(op)));
    }
    if let Some(op) = args.delete.take() {
        return Ok((file, Operation::Delete(op)));
    }
    unreachable!("present == 1 implies exactly one branch above matched")
}

/// Common LLM mistake: sending `"create": "some text"` instead of
/// `"create": {"content": "some text"}`. Detected by probing the raw JSON
/// before giving up with a generic deserialize error.
fn json_shape_hint(value: &Value) -> Option<String> {
    let obj = value.as_object()?;
    for op in ["create", "replace", "insert", "delete"] {
        if let Some(Value::String(_)) = obj.get(op) {
            return Some(format!(
                "invalid {op}: expected an object, got a string. Use {{\"file\":\"…\",\"{op}\":{{\"content\":\"…\"}}}}"
            ));
        }
    }
    None
}

pub struct EditTool {
    working_dir: PathBuf,
}

impl EditTool {
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }

    /// Join `requested` onto the working dir and lexically collapse `..`/`.`
    /// without touching the filesystem (the path may not exist yet).
    fn normalize(&self, requested: &str) -> Result<PathBuf, String> {
        let requested_path = PathBuf::from(requested);
        let joined = if requested_path.is_absolute() {
            requested_path
        } else {
            self.working_dir.join(&requested_path)
        };

        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                std::path::Component::ParentDir => {
                    normalized.pop();
                }
                std::path::Component::CurDir => {}
                other => normalized.push(other.as_os_str()),
            }
        }

        let working_canonical = self
            .working_dir
            .canonicalize()
            .unwrap_or_else(|_| self.working_dir.clone());
        if !normalized.starts_with(&working_canonical) && !normalized.starts_with(&self.working_dir) {
            return Err(format!("Path outside working directory: {}", requested));
        }

        Ok(normalized)
    }

    fn resolve_existing(&self, requested: &str) -> Result<PathBuf, String> {
        let normalized = self.normalize(requested)?;
        let canonical = normalized.canonicalize().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                format!("File not found: {}", requested)
            } else {
                format!("IO error: {}", e)
            }
        })?;

        let working_canonical = self
            .working_dir
            .canonicalize()
            .map_err(|e| format!("Cannot resolve working dir: {}", e))?;

        if !canonical.starts_with(&working_canonical) {
            return Err(format!("Path outside working directory: {}", requested));
        }

        Ok(canonical)
    }

    async fn do_create(&self, file: &str, op: CreateOp, ctx: &ToolContext) -> ToolResult {
        let path = match self.normalize(file) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if path.exists() {
            return ToolResult::error(format!("File already exists: {}", file));
        }

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolResult::error(format!("Failed to create directories: {}", e));
            }
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o755));
            }
        }

        let content = op.content.unwrap_or_default();
        if let Err(e) = write_restricted(&path, &content) {
            return ToolResult::error(format!("Failed to write file: {}", e));
        }

        if let (Some(tracker), Some(session_id), Some(turn_id)) =
            (&ctx.delta_tracker, ctx.session_id, ctx.turn_id)
        {
            if let Err(e) = tracker.record_create(session_id, turn_id, &path) {
                tracing::warn!(error = %e, "failed to record create delta");
            }
        }

        let lines = content.split('\n').count();
        ToolResult::success(format!("Created {} ({} lines)", file, lines))
    }

    /// Resolve the file for a replace/insert/delete, enforcing the
    /// read-before-write invariant when a tracker is attached.
    fn prepare_edit(&self, file: &str, ctx: &ToolContext) -> Result<(PathBuf, String), String> {
        let path = self.resolve_existing(file)?;

        if let Some(tracker) = &ctx.file_read_tracker {
            if !tracker.was_read(&path) {
                return Err(format!(
                    "{} must be read with read_file before it can be edited",
                    file
                ));
            }
        }

        let content = std::fs::read_to_string(&path).map_err(|e| format!("Failed to read file: {}", e))?;
        Ok((path, content))
    }

    async fn do_replace(&self, file: &str, op: ReplaceOp, ctx: &ToolContext) -> ToolResult {
        let (path, old_content) = match self.prepare_edit(file, ctx) {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };
        let lines: Vec<&str> = old_content.split('\n').collect();

        let start_anchor = match Anchor::parse(&op.start) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let end_anchor = match Anchor::parse(&op.end) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let (start, end) = match validate_range(&start_anchor, &end_anchor, &lines) {
            Ok(r) => r,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let replacement = op.content.unwrap_or_default();
        let mut new_lines: Vec<&str> = lines[..start.line - 1].to_vec();
        let replacement_lines: Vec<&str> = replacement.split('\n').collect();
        new_lines.extend(replacement_lines);
        new_lines.extend(&lines[end.line..]);
        let new_content = new_lines.join("\n");

        self.finish_edit(file, &path, &old_content, &new_content, start.line, ctx)
            .await
    }

    async fn do_insert(&self, file: &str, op: InsertOp, ctx: &ToolContext) -> ToolResult {
        let (path, old_content) = match self.prepare_edit(file, ctx) {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };
        let lines: Vec<&str> = old_content.split('\n').collect();

        let anchor = match Anchor::parse(&op.after) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let after = match anchor.validate(&lines) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let content = op.content.unwrap_or_default();
        let mut new_lines: Vec<&str> = lines[..after.line].to_vec();
        let inserted: Vec<&str> = content.split('\n').collect();
        new_lines.extend(inserted);
        new_lines.extend(&lines[after.line..]);
        let new_content = new_lines.join("\n");

        self.finish_edit(file, &path, &old_content, &new_content, after.line, ctx)
            .await
    }

    async fn do_delete(&self, file: &str, op: DeleteOp, ctx: &ToolContext) -> ToolResult {
        let (path, old_content) = match self.prepare_edit(file, ctx) {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };
        let lines: Vec<&str> = old_content.split('\n').collect();

        let start_anchor = match Anchor::parse(&op.start) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let end_anchor = match Anchor::parse(&op.end) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let (start, end) = match validate_range(&start_anchor, &end_anchor, &lines) {
            Ok(r) => r,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let mut new_lines: Vec<&str> = lines[..start.line - 1].to_vec();
        new_lines.extend(&lines[end.line..]);
        let new_content = new_lines.join("\n");

        self.finish_edit(file, &path, &old_content, &new_content, start.line, ctx)
            .await
    }

    async fn finish_edit(
        &self,
        file: &str,
        path: &Path,
        old_content: &str,
        new_content: &str,
        around_line: usize,
        ctx: &ToolContext,
    ) -> ToolResult {
        if let (Some(tracker), Some(session_id), Some(turn_id)) =
            (&ctx.delta_tracker, ctx.session_id, ctx.turn_id)
        {
            if let Err(e) = tracker.record_modify(session_id, turn_id, path, old_content) {
                tracing::warn!(error = %e, "failed to record modify delta");
            }
        }

        if let Err(e) = write_restricted(path, new_content) {
            return ToolResult::error(format!("Failed to write file: {}", e));
        }

        let new_lines: Vec<&str> = new_content.split('\n').collect();
        let total = new_lines.len();

        let (window_start, window_end) = if total > WINDOW_THRESHOLD {
            let lo = around_line.saturating_sub(WINDOW_RADIUS).max(1);
            let hi = (around_line + WINDOW_RADIUS).min(total);
            (lo, hi)
        } else {
            (1, total)
        };

        let tagged: Vec<TaggedLine> = new_lines[window_start - 1..window_end]
            .iter()
            .enumerate()
            .map(|(i, line)| TaggedLine {
                number: window_start + i,
                hash: hash_line(line),
                content: line.to_string(),
            })
            .collect();

        let body = format_tagged(&tagged);
        let header = if window_start == 1 && window_end == total {
            format!("Edited {} ({} lines):\n\n{}", file, total, body)
        } else {
            format!(
                "Edited {} ({} lines, showing {}-{}):\n\n{}",
                file, total, window_start, window_end, body
            )
        };

        ToolResult::success(header)
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "edit".to_string(),
            description: r#"Modify a file using hash-anchored line operations. Exactly one of
create/replace/insert/delete must be given.

- create: {content} — file must not already exist. No prior read_file call needed.
- replace: {start, end, content} — replace lines start..=end (inclusive) with content.
- insert: {after, content} — insert content as new lines after the given line.
- delete: {start, end} — remove lines start..=end (inclusive).

start/end/after are "N:HH" anchors copied verbatim from read_file's tagged output — a
line number plus its 2-hex-char content hash. A stale line number is relocated
automatically if the hash still identifies exactly one line in the file; otherwise the
call fails and asks you to re-read the file.

replace/insert/delete all require the file to have been read with read_file first."#
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file": {
                        "type": "string",
                        "description": "The path to the file to modify"
                    },
                    "create": {
                        "type": "object",
                        "properties": {
                            "content": {"type": "string"}
                        }
                    },
                    "replace": {
                        "type": "object",
                        "properties": {
                            "start": {"type": "string", "description": "\"N:HH\" anchor"},
                            "end": {"type": "string", "description": "\"N:HH\" anchor"},
                            "content": {"type": "string"}
                        },
                        "required": ["start", "end"]
                    },
                    "insert": {
                        "type": "object",
                        "properties": {
                            "after": {"type": "string", "description": "\"N:HH\" anchor"},
                            "content": {"type": "string"}
                        },
                        "required": ["after"]
                    },
                    "delete": {
                        "type": "object",
                        "properties": {
                            "start": {"type": "string", "description": "\"N:HH\" anchor"},
                            "end": {"type": "string", "description": "\"N:HH\" anchor"}
                        },
                        "required": ["start", "end"]
                    }
                },
                "required": ["file"]
            }),
        }
    }

    async fn execute(&self, args_value: Value, ctx: &ToolContext) -> ToolResult {
        if ctx.is_cancelled() {
            return ToolResult::error("Cancelled");
        }

        let args: Args = match serde_json::from_value(args_value.clone()) {
            Ok(a) => a,
            Err(e) => {
                return ToolResult::error(
                    json_shape_hint(&args_value).unwrap_or_else(|| format!("Invalid arguments: {}", e)),
                )
            }
        };

        let (file, operation) = match resolve_operation(args) {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };

        match operation {
            Operation::Create(op) => self.do_create(&file, op, ctx).await,
            Operation::Replace(op) => self.do_replace(&file, op, ctx).await,
            Operation::Insert(op) => self.do_insert(&file, op, ctx).await,
            Operation::Delete(op) => self.do_delete(&file, op, ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::FileReadTracker;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn test_ctx(working_dir: PathBuf) -> ToolContext {
        ToolContext::new(working_dir, CancellationToken::new())
    }

    fn ctx_with_read_tracker(working_dir: PathBuf, read_path: &Path) -> ToolContext {
        let tracker = Arc::new(FileReadTracker::new());
        tracker.mark_read(read_path);
        ToolContext {
            file_read_tracker: Some(tracker),
            ..test_ctx(working_dir)
        }
    }

    #[tokio::test]
    async fn test_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let tool = EditTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(
                json!({"file": "new.txt", "create": {"content": "Hello World\n"}}),
                &test_ctx(dir.path().to_path_buf()),
            )
            .await;

        assert!(!result.is_error);
        assert!(result.output.contains("Created"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("new.txt")).unwrap(),
            "Hello World\n"
        );
    }

    #[tokio::test]
    async fn test_create_fails_if_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let tool = EditTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(
                json!({"file": "a.txt", "create": {"content": "y"}}),
                &test_ctx(dir.path().to_path_buf()),
            )
            .await;

        assert!(result.is_error);
        assert!(result.output.contains("already exists"));
    }

    #[tokio::test]
    async fn test_replace_requires_prior_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "one\ntwo\nthree").unwrap();
        let tool = EditTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(
                json!({"file": "a.txt", "replace": {"start": "2:00", "end": "2:00", "content": "x"}}),
                &ToolContext {
                    file_read_tracker: Some(Arc::new(FileReadTracker::new())),
                    ..test_ctx(dir.path().to_path_buf())
                },
            )
            .await;

        assert!(result.is_error);
        assert!(result.output.contains("must be read"));
    }

    #[tokio::test]
    async fn test_replace_line_by_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "one\ntwo\nthree").unwrap();
        let canonical = path.canonicalize().unwrap();
        let tool = EditTool::new(dir.path().to_path_buf());

        let hash = hash_line("two");
        let result = tool
            .execute(
                json!({
                    "file": "a.txt",
                    "replace": {"start": format!("2:{hash}"), "end": format!("2:{hash}"), "content": "TWO"}
                }),
                &ctx_with_read_tracker(dir.path().to_path_buf(), &canonical),
            )
            .await;

        assert!(!result.is_error, "{}", result.output);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\nTWO\nthree");
    }

    #[tokio::test]
    async fn test_replace_relocates_stale_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "one\nmoved\ntwo\nthree").unwrap();
        let canonical = path.canonicalize().unwrap();
        let tool = EditTool::new(dir.path().to_path_buf());

        // anchor claims "two" is at line 2, but it's really at line 3
        let hash = hash_line("two");
        let result = tool
            .execute(
                json!({
                    "file": "a.txt",
                    "replace": {"start": format!("2:{hash}"), "end": format!("2:{hash}"), "content": "TWO"}
                }),
                &ctx_with_read_tracker(dir.path().to_path_buf(), &canonical),
            )
            .await;

        assert!(!result.is_error, "{}", result.output);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "one\nmoved\nTWO\nthree"
        );
    }

    #[tokio::test]
    async fn test_insert_after_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "one\ntwo").unwrap();
        let canonical = path.canonicalize().unwrap();
        let tool = EditTool::new(dir.path().to_path_buf());

        let hash = hash_line("one");
        let result = tool
            .execute(
                json!({"file": "a.txt", "insert": {"after": format!("1:{hash}"), "content": "between"}}),
                &ctx_with_read_tracker(dir.path().to_path_buf(), &canonical),
            )
            .await;

        assert!(!result.is_error, "{}", result.output);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "one\nbetween\ntwo"
        );
    }

    #[tokio::test]
    async fn test_delete_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "one\ntwo\nthree\nfour").unwrap();
        let canonical = path.canonicalize().unwrap();
        let tool = EditTool::new(dir.path().to_path_buf());

        let start_hash = hash_line("two");
        let end_hash = hash_line("three");
        let result = tool
            .execute(
                json!({
                    "file": "a.txt",
                    "delete": {"start": format!("2:{start_hash}"), "end": format!("3:{end_hash}")}
                }),
                &ctx_with_read_tracker(dir.path().to_path_buf(), &canonical),
            )
            .await;

        assert!(!result.is_error, "{}", result.output);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\nfour");
    }

    #[tokio::test]
    async fn test_ambiguous_anchor_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "same\nsame\nsame").unwrap();
        let canonical = path.canonicalize().unwrap();
        let tool = EditTool::new(dir.path().to_path_buf());

        let hash = hash_line("same");
        let result = tool
            .execute(
                json!({
                    "file": "a.txt",
                    "replace": {"start": format!("99:{hash}"), "end": format!("99:{hash}"), "content": "x"}
                }),
                &ctx_with_read_tracker(dir.path().to_path_buf(), &canonical),
            )
            .await;

        assert!(result.is_error);
        assert!(result.output.contains("ambiguous"));
    }

    #[tokio::test]
    async fn test_exactly_one_operation_required() {
        let dir = tempfile::tempdir().unwrap();
        let tool = EditTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(json!({"file": "a.txt"}), &test_ctx(dir.path().to_path_buf()))
            .await;

        assert!(result.is_error);
        assert!(result.output.contains("exactly one operation"));
    }

    #[tokio::test]
    async fn test_json_shape_hint_for_string_create() {
        let dir = tempfile::tempdir().unwrap();
        let tool = EditTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(
                json!({"file": "a.txt", "create": "hello"}),
                &test_ctx(dir.path().to_path_buf()),
            )
            .await;

        assert!(result.is_error);
        assert!(result.output.contains("expected an object, got a string"));
    }

    #[tokio::test]
    async fn test_windowed_output_for_long_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        let lines: Vec<String> = (1..=100).map(|i| format!("line{i}")).collect();
        std::fs::write(&path, lines.join("\n")).unwrap();
        let canonical = path.canonicalize().unwrap();
        let tool = EditTool::new(dir.path().to_path_buf());

        let hash = hash_line("line50");
        let result = tool
            .execute(
                json!({
                    "file": "a.txt",
                    "replace": {"start": format!("50:{hash}"), "end": format!("50:{hash}"), "content": "CHANGED"}
                }),
                &ctx_with_read_tracker(dir.path().to_path_buf(), &canonical),
            )
            .await;

        assert!(!result.is_error, "{}", result.output);
        assert!(result.output.contains("showing"));
        assert!(result.output.contains("CHANGED"));
    }
}
