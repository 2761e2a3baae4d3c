//! Read file tool — returns hashline-tagged content so a later Edit call
//! can reference lines by content-addressed anchor instead of raw text.

use crate::hashline::{hash_line, TaggedLine};
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

const BINARY_CHECK_SIZE: usize = 8192;

#[derive(Debug, Deserialize)]
struct Args {
    #[serde(alias = "path")]
    file: String,
    #[serde(default)]
    start: Option<usize>,
    #[serde(default)]
    end: Option<usize>,
}

pub struct ReadFileTool {
    working_dir: PathBuf,
}

impl ReadFileTool {
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }

    fn resolve_path(&self, path: &str) -> Result<PathBuf, String> {
        let requested = PathBuf::from(path);
        let full_path = if requested.is_absolute() {
            requested
        } else {
            self.working_dir.join(&requested)
        };

        let canonical = full_path.canonicalize().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                format!("File not found: {}", path)
            } else {
                format!("IO error: {}", e)
            }
        })?;

        let working_canonical = self
            .working_dir
            .canonicalize()
            .map_err(|e| format!("Cannot resolve working directory: {}", e))?;

        if !canonical.starts_with(&working_canonical) {
            return Err(format!("Path is outside working directory: {}", path));
        }

        Ok(canonical)
    }

    fn is_binary_file(path: &PathBuf) -> Result<bool, String> {
        use std::io::Read;
        let mut file = std::fs::File::open(path).map_err(|e| e.to_string())?;
        let mut buffer = vec![0u8; BINARY_CHECK_SIZE];
        let bytes_read = file.read(&mut buffer).map_err(|e| e.to_string())?;
        Ok(buffer[..bytes_read].contains(&0))
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read a file's contents, tagged line-by-line as `N:HH|content` \
                (N = line number, HH = a 2-hex-char content hash). Reference the `N:HH` \
                anchors verbatim when calling edit — they let edit relocate a line if it \
                moved since this read. Use start/end (1-indexed, inclusive) to read a \
                range of a large file."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file": {
                        "type": "string",
                        "description": "Path to the file (relative to project root)"
                    },
                    "start": {
                        "type": "integer",
                        "description": "First line to return, 1-indexed (default: 1)"
                    },
                    "end": {
                        "type": "integer",
                        "description": "Last line to return, inclusive (default: end of file)"
                    }
                },
                "required": ["file"]
            }),
        }
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };

        if ctx.is_cancelled() {
            return ToolResult::error("Cancelled");
        }

        let path = match self.resolve_path(&args.file) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if !path.is_file() {
            return ToolResult::error(format!("Not a file: {}", args.file));
        }

        if let Ok(true) = Self::is_binary_file(&path) {
            return ToolResult::error(format!("Binary file cannot be read as text: {}", args.file));
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
        };

        let lines: Vec<&str> = content.split('\n').collect();
        let total_lines = lines.len();

        let start = args.start.unwrap_or(1);
        if start < 1 || start > total_lines {
            return ToolResult::error(format!(
                "start line {} out of range (file has {} lines)",
                start, total_lines
            ));
        }

        let end = match args.end {
            Some(end) if end < start => {
                return ToolResult::error(format!(
                    "inverted range: start {} > end {}",
                    start, end
                ))
            }
            Some(end) => end.min(total_lines),
            None => total_lines,
        };

        if let Some(tracker) = &ctx.file_read_tracker {
            tracker.mark_read(&path);
        }

        let tagged: Vec<TaggedLine> = lines[start - 1..end]
            .iter()
            .enumerate()
            .map(|(i, line)| TaggedLine {
                number: start + i,
                hash: hash_line(line),
                content: line.to_string(),
            })
            .collect();

        let body = tagged
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join("\n");

        ToolResult::success(format!(
            "# {} (lines {}-{} of {})\n\n{}",
            args.file, start, end, total_lines, body
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn test_ctx(working_dir: PathBuf) -> ToolContext {
        ToolContext::new(working_dir, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_read_whole_file_is_tagged() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree").unwrap();
        let tool = ReadFileTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(json!({"file": "a.txt"}), &test_ctx(dir.path().to_path_buf()))
            .await;

        assert!(!result.is_error);
        assert!(result.output.contains("1:"));
        assert!(result.output.contains("|one"));
        assert!(result.output.contains("3:"));
        assert!(result.output.contains("|three"));
    }

    #[tokio::test]
    async fn test_read_range_numbers_from_start() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\nfour").unwrap();
        let tool = ReadFileTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(
                json!({"file": "a.txt", "start": 2, "end": 3}),
                &test_ctx(dir.path().to_path_buf()),
            )
            .await;

        assert!(!result.is_error);
        assert!(result.output.contains("2:"));
        assert!(result.output.contains("|two"));
        assert!(!result.output.contains("|one"));
        assert!(!result.output.contains("|four"));
    }

    #[tokio::test]
    async fn test_read_out_of_range_start_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo").unwrap();
        let tool = ReadFileTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(
                json!({"file": "a.txt", "start": 50}),
                &test_ctx(dir.path().to_path_buf()),
            )
            .await;

        assert!(result.is_error);
        assert!(result.output.contains("out of range"));
    }

    #[tokio::test]
    async fn test_read_marks_file_read_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "one").unwrap();
        let tool = ReadFileTool::new(dir.path().to_path_buf());

        let tracker = std::sync::Arc::new(crate::session::FileReadTracker::new());
        let ctx = ToolContext::new(dir.path().to_path_buf(), CancellationToken::new());
        let ctx = ToolContext {
            file_read_tracker: Some(tracker.clone()),
            ..ctx
        };

        let canonical = path.canonicalize().unwrap();
        assert!(!tracker.was_read(&canonical));
        let _ = tool.execute(json!({"file": "a.txt"}), &ctx).await;
        assert!(tracker.was_read(&canonical));
    }
}
