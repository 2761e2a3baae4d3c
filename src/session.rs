//! Session identity — the state that survives across turns.
//!
//! A `Session` owns one session id, one `ToolProxy`, one `DeltaTracker`
//! handle, one `FileReadTracker`, and one `Scratchpad`. Turn ids are minted
//! fresh at the top of each `run_turn` call. Grounded on `telemetry.rs`'s
//! single-open-connection pattern: the `DeltaTracker`'s `rusqlite::Connection`
//! is opened once, here, at session construction.

use crate::delta_tracker::DeltaTracker;
use crate::tool::{ToolContext, ToolRegistry};
use crate::tool_proxy::{ToolProxy, UpstreamConfig};
use crate::turn_loop::{Scratchpad, ToolExecutor};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Tracks which absolute paths have been read this session. Edit refuses to
/// modify a path that hasn't passed through Read first; Create bypasses the
/// check entirely.
#[derive(Default)]
pub struct FileReadTracker {
    read: RwLock<HashSet<PathBuf>>,
}

impl FileReadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_read(&self, path: &Path) {
        self.read.write().insert(path.to_path_buf());
    }

    pub fn was_read(&self, path: &Path) -> bool {
        self.read.read().contains(path)
    }
}

/// Long-lived per-session state. One `Session` backs one REPL invocation;
/// sub-agents get their own scratchpad and tool registry view but share the
/// parent's delta tracker and file-read tracker (recorded under the parent
/// turn id, since sub-agent work is still part of the turn that spawned it).
pub struct Session {
    pub id: Uuid,
    pub working_dir: PathBuf,
    pub tool_proxy: ToolProxy,
    pub delta_tracker: Arc<DeltaTracker>,
    pub file_read_tracker: Arc<FileReadTracker>,
    pub scratchpad: Scratchpad,
}

impl Session {
    pub fn new(working_dir: PathBuf, registry: ToolRegistry, delta_tracker: DeltaTracker) -> Self {
        Self {
            id: Uuid::new_v4(),
            working_dir,
            tool_proxy: ToolProxy::new(registry),
            delta_tracker: Arc::new(delta_tracker),
            file_read_tracker: Arc::new(FileReadTracker::new()),
            scratchpad: Scratchpad::new(),
        }
    }

    /// Same as `new`, but with an upstream tool server configured — `name`s
    /// not found in `registry` are forwarded to it via `ToolProxy`.
    pub fn with_upstream_tools(
        working_dir: PathBuf,
        registry: ToolRegistry,
        delta_tracker: DeltaTracker,
        upstream: UpstreamConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            working_dir,
            tool_proxy: ToolProxy::with_upstream(registry, upstream),
            delta_tracker: Arc::new(delta_tracker),
            file_read_tracker: Arc::new(FileReadTracker::new()),
            scratchpad: Scratchpad::new(),
        }
    }

    /// Mint a fresh turn id. Call once at the top of each user-submitted
    /// turn; the returned id scopes every `DeltaTracker` row recorded while
    /// that turn's tool calls execute.
    pub fn begin_turn(&self) -> Uuid {
        Uuid::new_v4()
    }

    /// Undo every file change recorded for `turn_id` and drop its rows.
    pub fn undo_turn(&self, turn_id: Uuid) -> Result<Vec<PathBuf>, crate::delta_tracker::DeltaError> {
        let affected = self.delta_tracker.undo(self.id, turn_id)?;
        self.delta_tracker.delete_turn(self.id, turn_id)?;
        Ok(affected)
    }
}

/// Binds a session's `ToolProxy` to one turn so every tool call it
/// dispatches carries the session id, turn id, and delta/file-read trackers
/// needed for undo and read-before-write enforcement — without `TurnLoop`
/// itself needing to know anything about session identity.
pub struct SessionToolExecutor<'a> {
    tool_proxy: &'a ToolProxy,
    session_id: Uuid,
    turn_id: Uuid,
    file_read_tracker: Arc<FileReadTracker>,
    delta_tracker: Arc<DeltaTracker>,
}

impl<'a> SessionToolExecutor<'a> {
    pub fn new(session: &'a Session, turn_id: Uuid) -> Self {
        Self {
            tool_proxy: &session.tool_proxy,
            session_id: session.id,
            turn_id,
            file_read_tracker: session.file_read_tracker.clone(),
            delta_tracker: session.delta_tracker.clone(),
        }
    }
}

#[async_trait]
impl<'a> ToolExecutor for SessionToolExecutor<'a> {
    async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        working_dir: &PathBuf,
        cancellation: &CancellationToken,
    ) -> Result<String, String> {
        let ctx = ToolContext::new(working_dir.clone(), cancellation.clone()).with_turn(
            self.session_id,
            self.turn_id,
            self.file_read_tracker.clone(),
            self.delta_tracker.clone(),
        );
        let result = self.tool_proxy.call_tool(&ctx, name, args).await;
        if result.is_error {
            Err(result.output)
        } else {
            Ok(result.output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_read_tracker_roundtrip() {
        let tracker = FileReadTracker::new();
        let path = PathBuf::from("/tmp/a.txt");
        assert!(!tracker.was_read(&path));
        tracker.mark_read(&path);
        assert!(tracker.was_read(&path));
    }

    #[test]
    fn test_session_mints_distinct_turn_ids() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(
            dir.path().to_path_buf(),
            ToolRegistry::new(),
            DeltaTracker::open_in_memory().unwrap(),
        );
        let a = session.begin_turn();
        let b = session.begin_turn();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_session_tool_executor_wires_edit_and_undo() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "one\ntwo").unwrap();

        let registry = crate::tools::create_registry(dir.path().to_path_buf());
        let session = Session::new(dir.path().to_path_buf(), registry, DeltaTracker::open_in_memory().unwrap());
        let turn_id = session.begin_turn();
        let executor = SessionToolExecutor::new(&session, turn_id);
        let cancellation = CancellationToken::new();

        executor
            .execute(
                "read_file",
                serde_json::json!({"file": "a.txt"}),
                &session.working_dir,
                &cancellation,
            )
            .await
            .unwrap();

        let hash = crate::hashline::hash_line("two");
        executor
            .execute(
                "edit",
                serde_json::json!({
                    "file": "a.txt",
                    "replace": {"start": format!("2:{hash}"), "end": format!("2:{hash}"), "content": "TWO"}
                }),
                &session.working_dir,
                &cancellation,
            )
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&file).unwrap(), "one\nTWO");

        let affected = session.undo_turn(turn_id).unwrap();
        assert_eq!(affected, vec![file.canonicalize().unwrap()]);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "one\ntwo");
    }
}
