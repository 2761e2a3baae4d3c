//! Grep tool - content search across the working tree.
//!
//! Content search mode scans file bodies for a regex match; with
//! `content_search: false` it searches file *names* instead (same regex
//! dialect, same walk/skip rules), so one tool covers both jobs spec'd for
//! file search.

use crate::gitignore::GitignoreMatcher;
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolResult};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::json;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

const MAX_LINE_LENGTH: usize = 500;
const DEFAULT_MAX_RESULTS: usize = 100;
const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
const BINARY_CHECK_SIZE: usize = 8192;

#[derive(Debug, Error)]
enum GrepError {
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error("path is outside working directory: {0}")]
    OutsideRoot(String),
}

#[derive(Debug, Deserialize)]
struct Args {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    glob: Option<String>,
    #[serde(default)]
    case_sensitive: bool,
    #[serde(default = "default_content_search")]
    content_search: bool,
    #[serde(default = "default_max_results")]
    max_results: usize,
}

fn default_content_search() -> bool {
    true
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

pub struct GrepTool {
    working_dir: PathBuf,
}

impl GrepTool {
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }

    fn resolve_path(&self, path: Option<&str>) -> Result<PathBuf, GrepError> {
        let requested = match path {
            Some(p) if !p.is_empty() && p != "." => {
                let pb = PathBuf::from(p);
                if pb.is_absolute() {
                    pb
                } else {
                    self.working_dir.join(pb)
                }
            }
            _ => self.working_dir.clone(),
        };

        let canonical = requested
            .canonicalize()
            .map_err(|e| GrepError::PathNotFound(e.to_string()))?;

        let working_canonical = self
            .working_dir
            .canonicalize()
            .map_err(|e| GrepError::PathNotFound(e.to_string()))?;

        if !canonical.starts_with(&working_canonical) {
            return Err(GrepError::OutsideRoot(requested.display().to_string()));
        }

        Ok(canonical)
    }

    fn should_skip_dir(name: &str) -> bool {
        let skip_dirs = [
            "node_modules",
            "target",
            ".git",
            "__pycache__",
            "venv",
            ".venv",
            "dist",
            "build",
            ".cargo",
            ".idea",
            ".vscode",
            "vendor",
        ];
        skip_dirs.contains(&name)
    }

    fn is_binary_file(path: &Path) -> bool {
        let Ok(mut file) = std::fs::File::open(path) else {
            return true;
        };
        let mut buffer = vec![0u8; BINARY_CHECK_SIZE];
        let Ok(bytes_read) = file.read(&mut buffer) else {
            return true;
        };
        buffer[..bytes_read].contains(&0)
    }

    fn glob_to_regex(pattern: &str) -> Result<Regex, GrepError> {
        let mut regex_pattern = String::from("^");
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        regex_pattern.push_str(".*");
                    } else {
                        regex_pattern.push_str("[^/]*");
                    }
                }
                '?' => regex_pattern.push_str("[^/]"),
                '.' => regex_pattern.push_str("\\."),
                '+' => regex_pattern.push_str("\\+"),
                '(' => regex_pattern.push_str("\\("),
                ')' => regex_pattern.push_str("\\)"),
                '|' => regex_pattern.push_str("\\|"),
                '^' => regex_pattern.push_str("\\^"),
                '$' => regex_pattern.push_str("\\$"),
                '[' => regex_pattern.push('['),
                ']' => regex_pattern.push(']'),
                '\\' => regex_pattern.push_str("\\\\"),
                other => regex_pattern.push(other),
            }
        }
        regex_pattern.push('$');
        Regex::new(&regex_pattern).map_err(|e| GrepError::InvalidPattern(e.to_string()))
    }

    fn content_search(
        &self,
        regex: &Regex,
        root: &Path,
        glob: Option<&Regex>,
        max_results: usize,
    ) -> Vec<String> {
        let gitignore = GitignoreMatcher::load(root);
        let mut results = Vec::new();

        for entry in WalkDir::new(root).into_iter().filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            if e.file_type().is_dir() && Self::should_skip_dir(&name) {
                return false;
            }
            !gitignore.is_ignored(e.path(), e.file_type().is_dir())
        }) {
            if results.len() >= max_results {
                break;
            }

            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());

            if let Some(glob) = glob {
                if !glob.is_match(&relative.to_string_lossy()) {
                    continue;
                }
            }

            let Ok(meta) = entry.metadata() else { continue };
            if meta.len() > MAX_FILE_SIZE {
                continue;
            }

            if Self::is_binary_file(entry.path()) {
                continue;
            }

            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };

            for (idx, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    let truncated = if line.len() > MAX_LINE_LENGTH {
                        format!("{}...", &line[..MAX_LINE_LENGTH])
                    } else {
                        line.to_string()
                    };
                    results.push(format!("{}:{}: {}", relative.display(), idx + 1, truncated));
                    if results.len() >= max_results {
                        break;
                    }
                }
            }
        }

        results
    }

    fn filename_search(
        &self,
        regex: &Regex,
        root: &Path,
        glob: Option<&Regex>,
        max_results: usize,
    ) -> Vec<String> {
        let gitignore = GitignoreMatcher::load(root);
        let mut results = Vec::new();

        for entry in WalkDir::new(root).into_iter().filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            if e.file_type().is_dir() && Self::should_skip_dir(&name) {
                return false;
            }
            !gitignore.is_ignored(e.path(), e.file_type().is_dir())
        }) {
            if results.len() >= max_results {
                break;
            }

            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let relative_str = relative.to_string_lossy();

            if let Some(glob) = glob {
                if !glob.is_match(&relative_str) {
                    continue;
                }
            }

            let filename = entry.file_name().to_string_lossy();
            if regex.is_match(&filename) {
                results.push(relative_str.to_string());
            }
        }

        results
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "grep".to_string(),
            description: r#"Search file contents (or file names) for a regex pattern.

- Respects .gitignore and skips common build/vendor directories
- Set content_search=false to match file names instead of file bodies
- Results capped at max_results matches (default 100); narrow with `glob` or `path` if truncated"#
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "Regex pattern to search for"
                    },
                    "path": {
                        "type": "string",
                        "description": "Directory to search (default: project root)"
                    },
                    "glob": {
                        "type": "string",
                        "description": "Glob restricting which file paths are searched"
                    },
                    "case_sensitive": {
                        "type": "boolean",
                        "description": "Case-sensitive matching (default: false)"
                    },
                    "content_search": {
                        "type": "boolean",
                        "description": "Search file contents (true, default) or file names (false)"
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of matches to return (default: 100)"
                    }
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn execute(&self, args_value: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        if ctx.is_cancelled() {
            return ToolResult::error("Cancelled");
        }

        let args: Args = match serde_json::from_value(args_value) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };

        let root = match self.resolve_path(args.path.as_deref()) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let regex = match RegexBuilder::new(&args.pattern)
            .case_insensitive(!args.case_sensitive)
            .build()
        {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("Invalid pattern: {}", e)),
        };

        let glob_regex = match args.glob.as_deref().map(Self::glob_to_regex) {
            Some(Ok(r)) => Some(r),
            Some(Err(e)) => return ToolResult::error(e.to_string()),
            None => None,
        };

        let max_results = args.max_results;
        let results = if args.content_search {
            self.content_search(&regex, &root, glob_regex.as_ref(), max_results)
        } else {
            self.filename_search(&regex, &root, glob_regex.as_ref(), max_results)
        };

        if results.is_empty() {
            ToolResult::success(format!("No matches for '{}'", args.pattern))
        } else {
            let truncated = if results.len() >= max_results {
                format!("\n\n(truncated at {} matches)", max_results)
            } else {
                String::new()
            };
            ToolResult::success(format!(
                "{} matches for '{}':\n\n{}{}",
                results.len(),
                args.pattern,
                results.join("\n"),
                truncated
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[tokio::test]
    async fn test_content_search_finds_match() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.rs", "fn main() {\n    println!(\"hello\");\n}\n");
        let tool = GrepTool::new(dir.path().to_path_buf());
        let ctx = ToolContext::new(dir.path().to_path_buf(), Default::default());
        let result = tool
            .execute(json!({"pattern": "println"}), &ctx)
            .await;
        assert!(!result.is_error);
        assert!(result.output.contains("a.rs:2"));
    }

    #[tokio::test]
    async fn test_no_match() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.rs", "fn main() {}\n");
        let tool = GrepTool::new(dir.path().to_path_buf());
        let ctx = ToolContext::new(dir.path().to_path_buf(), Default::default());
        let result = tool
            .execute(json!({"pattern": "nonexistent_token"}), &ctx)
            .await;
        assert!(!result.is_error);
        assert!(result.output.starts_with("No matches"));
    }

    #[tokio::test]
    async fn test_filename_search() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "foo_test.rs", "");
        write_file(dir.path(), "bar.rs", "");
        let tool = GrepTool::new(dir.path().to_path_buf());
        let ctx = ToolContext::new(dir.path().to_path_buf(), Default::default());
        let result = tool
            .execute(
                json!({"pattern": "_test\\.rs$", "content_search": false}),
                &ctx,
            )
            .await;
        assert!(!result.is_error);
        assert!(result.output.contains("foo_test.rs"));
        assert!(!result.output.contains("bar.rs"));
    }

    #[tokio::test]
    async fn test_case_insensitive_by_default() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.rs", "HELLO world\n");
        let tool = GrepTool::new(dir.path().to_path_buf());
        let ctx = ToolContext::new(dir.path().to_path_buf(), Default::default());
        let result = tool.execute(json!({"pattern": "hello"}), &ctx).await;
        assert!(!result.is_error);
        assert!(result.output.contains("a.rs:1"));
    }

    #[tokio::test]
    async fn test_case_sensitive_excludes_mismatched_case() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.rs", "HELLO world\n");
        let tool = GrepTool::new(dir.path().to_path_buf());
        let ctx = ToolContext::new(dir.path().to_path_buf(), Default::default());
        let result = tool
            .execute(json!({"pattern": "hello", "case_sensitive": true}), &ctx)
            .await;
        assert!(!result.is_error);
        assert!(result.output.starts_with("No matches"));
    }

    #[tokio::test]
    async fn test_max_results_caps_matches() {
        let dir = TempDir::new().unwrap();
        let content: String = (0..10).map(|_| "needle\n").collect();
        write_file(dir.path(), "a.rs", &content);
        let tool = GrepTool::new(dir.path().to_path_buf());
        let ctx = ToolContext::new(dir.path().to_path_buf(), Default::default());
        let result = tool
            .execute(json!({"pattern": "needle", "max_results": 3}), &ctx)
            .await;
        assert!(!result.is_error);
        assert!(result.output.contains("3 matches"));
        assert!(result.output.contains("(truncated at 3 matches)"));
    }

    #[tokio::test]
    async fn test_gitignore_excludes_match() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), ".gitignore", "ignored.rs\n");
        write_file(dir.path(), "ignored.rs", "needle");
        write_file(dir.path(), "kept.rs", "needle");
        let tool = GrepTool::new(dir.path().to_path_buf());
        let ctx = ToolContext::new(dir.path().to_path_buf(), Default::default());
        let result = tool.execute(json!({"pattern": "needle"}), &ctx).await;
        assert!(result.output.contains("kept.rs"));
        assert!(!result.output.contains("ignored.rs"));
    }

    #[test]
    fn test_glob_to_regex_double_star() {
        let re = GrepTool::glob_to_regex("**/*.rs").unwrap();
        assert!(re.is_match("src/foo/bar.rs"));
        assert!(re.is_match("bar.rs"));
        assert!(!re.is_match("bar.txt"));
    }
}
