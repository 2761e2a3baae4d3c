//! System prompt construction.
//!
//! Builds the system prompt sent with every turn: a fixed base prompt
//! describing the agent's tools and operating rules, plus environment
//! context (cwd, git status, platform, file tree) and any project-local
//! instructions.

use std::path::Path;

const BASE_PROMPT: &str = include_str!("../prompts/base.txt");

/// Get the base system prompt.
pub fn get_base_prompt() -> &'static str {
    BASE_PROMPT
}

/// Build the complete system prompt for a turn.
pub fn build_system_prompt(working_dir: &Path, custom_prompt: Option<&str>) -> String {
    let mut parts = Vec::new();

    let base = custom_prompt.unwrap_or(BASE_PROMPT);
    parts.push(base.to_string());

    parts.push(build_environment_context(working_dir));

    if let Some(instructions) = load_custom_instructions(working_dir) {
        parts.push(instructions);
    }

    parts.join("\n\n")
}

/// Build environment context section (includes file tree, like opencode).
fn build_environment_context(working_dir: &Path) -> String {
    let mut lines = vec![
        "Here is useful information about the environment you are running in:".to_string(),
        "<env>".to_string(),
    ];

    lines.push(format!("  Working directory: {}", working_dir.display()));

    let is_git = std::process::Command::new("git")
        .args(["rev-parse", "--git-dir"])
        .current_dir(working_dir)
        .output()
        .ok()
        .map(|o| o.status.success())
        .unwrap_or(false);

    lines.push(format!(
        "  Is directory a git repo: {}",
        if is_git { "yes" } else { "no" }
    ));

    lines.push(format!("  Platform: {}", std::env::consts::OS));

    let date = chrono::Local::now().format("%Y-%m-%d").to_string();
    lines.push(format!("  Today's date: {}", date));

    lines.push("</env>".to_string());

    if is_git {
        lines.push("<files>".to_string());
        if let Some(tree) = build_file_tree(working_dir, 200) {
            lines.push(format!("  {}", tree));
        }
        lines.push("</files>".to_string());
    }

    lines.join("\n")
}

/// Build file tree using ripgrep, respecting .gitignore.
fn build_file_tree(working_dir: &Path, limit: usize) -> Option<String> {
    let output = std::process::Command::new("rg")
        .args(["--files", "--sort", "path"])
        .current_dir(working_dir)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let files: Vec<&str> = std::str::from_utf8(&output.stdout)
        .ok()?
        .lines()
        .take(limit)
        .collect();

    if files.is_empty() {
        return None;
    }

    Some(files.join("\n  "))
}

/// Load custom instructions from AGENTS.md, CLAUDE.md, etc.
fn load_custom_instructions(working_dir: &Path) -> Option<String> {
    let files_to_check = ["AGENTS.md", "CLAUDE.md", "CONTEXT.md", ".crow/AGENTS.md"];

    for filename in &files_to_check {
        let path = working_dir.join(filename);
        if path.exists() {
            if let Ok(content) = std::fs::read_to_string(&path) {
                return Some(format!(
                    "# Custom Instructions (from {})\n\n{}",
                    filename, content
                ));
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("crow").join("AGENTS.md");
        if global_path.exists() {
            if let Ok(content) = std::fs::read_to_string(&global_path) {
                return Some(format!(
                    "# Custom Instructions (from ~/.config/crow/AGENTS.md)\n\n{}",
                    content
                ));
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_base_prompt_nonempty() {
        assert!(!get_base_prompt().is_empty());
    }

    #[test]
    fn test_build_environment_context() {
        let ctx = build_environment_context(Path::new("/tmp"));
        assert!(ctx.contains("<env>"));
        assert!(ctx.contains("</env>"));
        assert!(ctx.contains("Working directory:"));
        assert!(ctx.contains("Platform:"));
    }

    #[test]
    fn test_build_system_prompt() {
        let prompt = build_system_prompt(Path::new("/tmp"), None);
        assert!(!prompt.is_empty());
        assert!(prompt.contains("<env>"));
    }

    #[test]
    fn test_build_system_prompt_with_custom() {
        let prompt = build_system_prompt(Path::new("/tmp"), Some("Custom system prompt here"));
        assert!(prompt.contains("Custom system prompt here"));
        assert!(prompt.contains("<env>"));
    }
}
