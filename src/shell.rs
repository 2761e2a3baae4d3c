//! In-process shell anchored to a root directory.
//!
//! Executes a small POSIX-ish subset internally (builtins `cd`, `export`,
//! `pwd`, `exit`, pipelines via `|`, sequencing via `;`/`&&`) rather than
//! spawning `bash -c` per call, so cwd and exported env persist across
//! calls the way a real shell session would. Anything past a builtin is
//! still executed via `tokio::process::Command` — the one place this
//! interpreter shells out, same as a real POSIX shell execs non-builtins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("command blocked: {0}")]
    Blocked(String),
    #[error("failed to parse command: {0}")]
    Parse(String),
    #[error("command timed out after {0}ms")]
    Timeout(u64),
    #[error("cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A predicate that blocks a command before it would otherwise run.
pub trait BlockFunc: Send + Sync {
    /// Returns `Some(reason)` if this command should be blocked.
    fn check(&self, argv: &[String]) -> Option<String>;
}

/// Blocks any command whose argv[0] is in a fixed name set.
pub struct CommandsBlocker(Vec<String>);

impl CommandsBlocker {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(names.into_iter().map(Into::into).collect())
    }
}

impl BlockFunc for CommandsBlocker {
    fn check(&self, argv: &[String]) -> Option<String> {
        let Some(cmd) = argv.first() else { return None };
        if self.0.iter().any(|n| n == cmd) {
            Some(cmd.clone())
        } else {
            None
        }
    }
}

/// Blocks `cmd <positional_prefix...> ...` only when every flag in
/// `required_flags` is also present (e.g. `go test -exec ...`).
pub struct ArgumentsBlocker {
    cmd: String,
    positional_prefix: Vec<String>,
    required_flags: Vec<String>,
}

impl ArgumentsBlocker {
    pub fn new(
        cmd: impl Into<String>,
        positional_prefix: impl IntoIterator<Item = impl Into<String>>,
        required_flags: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            cmd: cmd.into(),
            positional_prefix: positional_prefix.into_iter().map(Into::into).collect(),
            required_flags: required_flags.into_iter().map(Into::into).collect(),
        }
    }
}

impl BlockFunc for ArgumentsBlocker {
    fn check(&self, argv: &[String]) -> Option<String> {
        if argv.first() != Some(&self.cmd) {
            return None;
        }
        let rest = &argv[1..];
        if rest.len() < self.positional_prefix.len() {
            return None;
        }
        if rest[..self.positional_prefix.len()] != self.positional_prefix[..] {
            return None;
        }
        if self.required_flags.is_empty()
            || self
                .required_flags
                .iter()
                .all(|f| rest.iter().any(|a| a == f))
        {
            Some(argv.join(" "))
        } else {
            None
        }
    }
}

/// The default blocklist: interpreters usable as a bypass, network tools,
/// privilege escalation, package-manager global installs, system
/// modification, and `go test -exec` (an execution escape).
pub fn default_blockers() -> Vec<Box<dyn BlockFunc>> {
    vec![
        Box::new(CommandsBlocker::new([
            "bash", "sh", "zsh", "fish", "python", "python3", "node", "ruby", "perl",
        ])),
        Box::new(CommandsBlocker::new([
            "curl", "wget", "ssh", "scp", "nc", "netcat",
        ])),
        Box::new(CommandsBlocker::new(["sudo", "su", "doas"])),
        Box::new(CommandsBlocker::new(["apt", "dnf", "pacman", "brew"])),
        Box::new(ArgumentsBlocker::new("npm", ["install"], ["-g"])),
        Box::new(ArgumentsBlocker::new("npm", ["i"], ["-g"])),
        Box::new(CommandsBlocker::new(["pip", "pip3", "gem"])),
        Box::new(ArgumentsBlocker::new(
            "cargo",
            ["install"],
            Vec::<String>::new(),
        )),
        Box::new(ArgumentsBlocker::new(
            "go",
            ["install"],
            Vec::<String>::new(),
        )),
        Box::new(CommandsBlocker::new(["mount", "systemctl", "iptables"])),
        Box::new(ArgumentsBlocker::new("go", ["test"], ["-exec"])),
    ]
}

struct ShellState {
    cwd: PathBuf,
    env: HashMap<String, String>,
}

/// A persistent, root-anchored shell session.
pub struct Shell {
    root: PathBuf,
    blockers: Vec<Box<dyn BlockFunc>>,
    state: Mutex<ShellState>,
}

pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl Shell {
    pub fn new(root: PathBuf, blockers: Vec<Box<dyn BlockFunc>>) -> Self {
        Self {
            state: Mutex::new(ShellState {
                cwd: root.clone(),
                env: std::env::vars().collect(),
            }),
            root,
            blockers,
        }
    }

    pub fn with_default_blockers(root: PathBuf) -> Self {
        Self::new(root, default_blockers())
    }

    pub fn cwd(&self) -> PathBuf {
        self.state.lock().unwrap().cwd.clone()
    }

    /// Parse and run `cmd_line`, honoring `;` sequencing, `&&` short-circuit,
    /// and `|` pipelines between external commands. Builtins (`cd`, `export`,
    /// `pwd`, `exit`) run in-process and mutate persisted state; everything
    /// else execs via `tokio::process::Command`.
    pub async fn exec(
        &self,
        cmd_line: &str,
        cancellation: &CancellationToken,
        timeout: std::time::Duration,
    ) -> Result<ExecOutput, ShellError> {
        let (mut cwd, mut env) = {
            let state = self.state.lock().unwrap();
            (state.cwd.clone(), state.env.clone())
        };

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut exit_code = 0;

        let result = tokio::time::timeout(
            timeout,
            self.run_sequence(cmd_line, &mut cwd, &mut env, &mut stdout, &mut stderr, cancellation),
        )
        .await;

        // Persist final cwd/env regardless of how execution ended, clamping
        // an escaped cwd back to root.
        let clamped_cwd = if cwd.starts_with(&self.root) {
            cwd
        } else {
            stderr.push_str(&format!("[cd rejected: you are anchored to {}]\n", self.root.display()));
            self.root.clone()
        };
        {
            let mut state = self.state.lock().unwrap();
            state.cwd = clamped_cwd;
            state.env = env;
        }

        match result {
            Err(_) => return Err(ShellError::Timeout(timeout.as_millis() as u64)),
            Ok(Err(e)) => return Err(e),
            Ok(Ok(code)) => exit_code = code,
        }

        if cancellation.is_cancelled() {
            return Err(ShellError::Cancelled);
        }

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn run_sequence(
        &self,
        cmd_line: &str,
        cwd: &mut PathBuf,
        env: &mut HashMap<String, String>,
        stdout: &mut String,
        stderr: &mut String,
        cancellation: &CancellationToken,
    ) -> Result<i32, ShellError> {
        let mut last_code = 0;
        for (segment, is_and) in split_sequence(cmd_line) {
            if cancellation.is_cancelled() {
                return Err(ShellError::Cancelled);
            }
            if is_and && last_code != 0 {
                continue;
            }
            last_code = self
                .run_pipeline(segment.trim(), cwd, env, stdout, stderr, cancellation)
                .await?;
        }
        Ok(last_code)
    }

    async fn run_pipeline(
        &self,
        segment: &str,
        cwd: &mut PathBuf,
        env: &mut HashMap<String, String>,
        stdout: &mut String,
        stderr: &mut String,
        cancellation: &CancellationToken,
    ) -> Result<i32, ShellError> {
        if segment.is_empty() {
            return Ok(0);
        }

        let stages: Vec<&str> = segment.split('|').map(str::trim).collect();
        let mut piped_input: Option<String> = None;
        let mut last_code = 0;

        for (i, stage) in stages.iter().enumerate() {
            let argv = shell_words::split(stage)
                .map_err(|e| ShellError::Parse(e.to_string()))?;
            let Some(cmd) = argv.first().cloned() else {
                continue;
            };

            if let Some(builtin_result) = self.run_builtin(&cmd, &argv, cwd, env) {
                let (out, code) = builtin_result?;
                if i + 1 == stages.len() {
                    stdout.push_str(&out);
                } else {
                    piped_input = Some(out);
                }
                last_code = code;
                continue;
            }

            if let Some(reason) = self.blockers.iter().find_map(|b| b.check(&argv)) {
                return Err(ShellError::Blocked(reason));
            }

            let mut command = Command::new(&argv[0]);
            command
                .args(&argv[1..])
                .current_dir(&cwd)
                .envs(env.iter())
                .stdin(if piped_input.is_some() {
                    Stdio::piped()
                } else {
                    Stdio::null()
                })
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let mut child = command.spawn()?;

            if let Some(input) = piped_input.take() {
                use tokio::io::AsyncWriteExt;
                if let Some(mut stdin) = child.stdin.take() {
                    let _ = stdin.write_all(input.as_bytes()).await;
                }
            }

            let output = tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Err(ShellError::Cancelled),
                result = child.wait_with_output() => result?,
            };

            let stage_stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stage_stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            last_code = output.status.code().unwrap_or(1);

            if !stage_stderr.is_empty() {
                stderr.push_str(&stage_stderr);
            }

            if i + 1 == stages.len() {
                stdout.push_str(&stage_stdout);
            } else {
                piped_input = Some(stage_stdout);
            }
        }

        Ok(last_code)
    }

    fn run_builtin(
        &self,
        cmd: &str,
        argv: &[String],
        cwd: &mut PathBuf,
        env: &mut HashMap<String, String>,
    ) -> Option<Result<(String, i32), ShellError>> {
        match cmd {
            "cd" => {
                let target = argv.get(1).map(String::as_str).unwrap_or("~");
                let new_dir = if target == "~" {
                    self.root.clone()
                } else if Path::new(target).is_absolute() {
                    PathBuf::from(target)
                } else {
                    cwd.join(target)
                };
                *cwd = match new_dir.canonicalize() {
                    Ok(p) => p,
                    Err(_) => new_dir,
                };
                Some(Ok((String::new(), 0)))
            }
            "pwd" => Some(Ok((format!("{}\n", cwd.display()), 0))),
            "export" => {
                if let Some(assignment) = argv.get(1) {
                    if let Some((key, value)) = assignment.split_once('=') {
                        env.insert(key.to_string(), value.to_string());
                    }
                }
                Some(Ok((String::new(), 0)))
            }
            "exit" => {
                let code: i32 = argv.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
                Some(Ok((String::new(), code)))
            }
            _ => None,
        }
    }
}

/// Split on `;` and `&&`, tagging each segment with whether it was preceded
/// by `&&` (so the caller can short-circuit on a prior non-zero exit).
fn split_sequence(cmd_line: &str) -> Vec<(String, bool)> {
    let mut result = Vec::new();
    let mut rest = cmd_line;
    let mut is_and = false;

    loop {
        let next_and = rest.find("&&");
        let next_semi = rest.find(';');

        let split_at = match (next_and, next_semi) {
            (Some(a), Some(s)) => Some(a.min(s)),
            (Some(a), None) => Some(a),
            (None, Some(s)) => Some(s),
            (None, None) => None,
        };

        match split_at {
            Some(idx) => {
                let (segment, sep_and) = if rest[idx..].starts_with("&&") {
                    (&rest[..idx], true)
                } else {
                    (&rest[..idx], false)
                };
                result.push((segment.to_string(), is_and));
                let sep_len = if sep_and { 2 } else { 1 };
                rest = &rest[idx + sep_len..];
                is_and = sep_and;
            }
            None => {
                result.push((rest.to_string(), is_and));
                break;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn test_echo_roundtrip() {
        let dir = TempDir::new().unwrap();
        let shell = Shell::with_default_blockers(dir.path().to_path_buf());
        let out = shell
            .exec("echo hello", &cancel(), std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn test_cd_persists_across_calls() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let shell = Shell::with_default_blockers(dir.path().to_path_buf());

        shell
            .exec("cd sub", &cancel(), std::time::Duration::from_secs(5))
            .await
            .unwrap();
        let out = shell
            .exec("pwd", &cancel(), std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.stdout.trim().ends_with("sub"));
    }

    #[tokio::test]
    async fn test_cd_outside_root_is_clamped() {
        let dir = TempDir::new().unwrap();
        let shell = Shell::with_default_blockers(dir.path().to_path_buf());
        shell
            .exec("cd /", &cancel(), std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(shell.cwd(), dir.path());
    }

    #[tokio::test]
    async fn test_blocked_command() {
        let dir = TempDir::new().unwrap();
        let shell = Shell::with_default_blockers(dir.path().to_path_buf());
        let result = shell
            .exec("curl http://example.com", &cancel(), std::time::Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(ShellError::Blocked(_))));
    }

    #[tokio::test]
    async fn test_pipeline() {
        let dir = TempDir::new().unwrap();
        let shell = Shell::with_default_blockers(dir.path().to_path_buf());
        let out = shell
            .exec("echo hello | cat", &cancel(), std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_and_short_circuits_on_failure() {
        let dir = TempDir::new().unwrap();
        let shell = Shell::with_default_blockers(dir.path().to_path_buf());
        let out = shell
            .exec("false && echo should_not_print", &cancel(), std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!out.stdout.contains("should_not_print"));
    }

    #[test]
    fn test_go_test_exec_blocked_only_with_flag() {
        let blocker = ArgumentsBlocker::new("go", ["test"], ["-exec"]);
        assert!(blocker
            .check(&["go", "test", "-exec", "sh"].iter().map(|s| s.to_string()).collect::<Vec<_>>())
            .is_some());
        assert!(blocker
            .check(&["go", "test", "./..."].iter().map(|s| s.to_string()).collect::<Vec<_>>())
            .is_none());
    }
}
