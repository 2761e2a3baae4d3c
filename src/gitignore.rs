//! `.gitignore`-style pattern matching for the file searcher.
//!
//! Reads one `.gitignore` file's patterns and compiles them into regexes
//! following the same conversion rules the teacher's tools reach for when
//! they hand-roll a glob matcher (`tools/find_path.rs`'s `glob_to_regex`),
//! generalised to gitignore's fuller grammar: `**` segments, anchoring,
//! directory-only patterns, and negation.

use regex::Regex;
use std::path::{Path, PathBuf};

struct Pattern {
    regex: Regex,
    negated: bool,
    dir_only: bool,
}

pub struct GitignoreMatcher {
    patterns: Vec<Pattern>,
    root: PathBuf,
}

impl GitignoreMatcher {
    /// Load `.gitignore` from `root`, if present. A missing file yields an
    /// empty matcher (everything is kept).
    pub fn load(root: &Path) -> Self {
        let path = root.join(".gitignore");
        let patterns = std::fs::read_to_string(&path)
            .map(|content| {
                content
                    .lines()
                    .filter_map(|line| compile_line(line))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            patterns,
            root: root.to_path_buf(),
        }
    }

    /// Whether `path` (absolute, under `root`) should be excluded.
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let relative = match path.strip_prefix(&self.root) {
            Ok(r) => r,
            Err(_) => return false,
        };
        if relative.as_os_str().is_empty() {
            return false;
        }
        let relative_str = relative.to_string_lossy().replace('\\', "/");

        let mut result = false;
        for pattern in &self.patterns {
            if pattern.dir_only && !is_dir {
                // directory-only patterns also match files living under that
                // directory — check every ancestor path too.
                let mut matched_ancestor = false;
                let mut current = relative.parent();
                while let Some(p) = current {
                    if p.as_os_str().is_empty() {
                        break;
                    }
                    let p_str = p.to_string_lossy().replace('\\', "/");
                    if pattern.regex.is_match(&p_str) {
                        matched_ancestor = true;
                        break;
                    }
                    current = p.parent();
                }
                if matched_ancestor {
                    result = !pattern.negated;
                }
                continue;
            }

            if pattern.regex.is_match(&relative_str) {
                result = !pattern.negated;
            }
        }

        result
    }
}

fn compile_line(line: &str) -> Option<Pattern> {
    let line = line.trim_end();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut pattern = line;
    let negated = if let Some(stripped) = pattern.strip_prefix('!') {
        pattern = stripped;
        true
    } else {
        false
    };

    let dir_only = pattern.ends_with('/');
    if dir_only {
        pattern = &pattern[..pattern.len() - 1];
    }

    let anchored = pattern.starts_with('/');
    let pattern = pattern.strip_prefix('/').unwrap_or(pattern);

    let body = glob_to_regex_body(pattern);
    let regex_str = if anchored {
        format!("^{}$", body)
    } else {
        format!("(^|/){}(/.*)?$", body)
    };

    let regex = Regex::new(&regex_str).ok()?;
    Some(Pattern {
        regex,
        negated,
        dir_only,
    })
}

fn glob_to_regex_body(pattern: &str) -> String {
    let mut out = String::new();
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if i + 1 < chars.len() => {
                out.push_str(&regex::escape(&chars[i + 1].to_string()));
                i += 2;
                continue;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    if chars.get(i + 2) == Some(&'/') {
                        out.push_str("(.*/)?");
                        i += 3;
                        continue;
                    } else {
                        out.push_str(".*");
                        i += 2;
                        continue;
                    }
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '[' => {
                // pass character classes through verbatim
                let start = i;
                let mut j = i + 1;
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j < chars.len() {
                    out.extend(&chars[start..=j]);
                    i = j + 1;
                    continue;
                } else {
                    out.push_str("\\[");
                }
            }
            '.' | '+' | '(' | ')' | '|' | '^' | '$' | '@' | '%' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_simple_pattern_matches() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();
        let matcher = GitignoreMatcher::load(dir.path());
        assert!(matcher.is_ignored(&dir.path().join("a.log"), false));
        assert!(!matcher.is_ignored(&dir.path().join("a.txt"), false));
    }

    #[test]
    fn test_directory_only_matches_descendants() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target/\n").unwrap();
        let matcher = GitignoreMatcher::load(dir.path());
        assert!(matcher.is_ignored(&dir.path().join("target"), true));
        assert!(matcher.is_ignored(&dir.path().join("target/debug/foo"), false));
        assert!(!matcher.is_ignored(&dir.path().join("src/target_thing"), false));
    }

    #[test]
    fn test_negation_last_write_wins() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "*.log\n!keep.log\n").unwrap();
        let matcher = GitignoreMatcher::load(dir.path());
        assert!(matcher.is_ignored(&dir.path().join("a.log"), false));
        assert!(!matcher.is_ignored(&dir.path().join("keep.log"), false));
    }

    #[test]
    fn test_anchored_pattern() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "/build\n").unwrap();
        let matcher = GitignoreMatcher::load(dir.path());
        assert!(matcher.is_ignored(&dir.path().join("build"), true));
    }

    #[test]
    fn test_no_gitignore_file_ignores_nothing() {
        let dir = TempDir::new().unwrap();
        let matcher = GitignoreMatcher::load(dir.path());
        assert!(!matcher.is_ignored(&dir.path().join("anything"), false));
    }
}
