//! Turn-scoped undo log for file edits.
//!
//! Records the pre-edit state of every file touched during a turn so an
//! `undo` can restore it. Backed by `rusqlite`, in the same
//! open-once/prepared-statement idiom `telemetry.rs` uses for its own
//! tables, rather than the teacher's git-shadow-repo approach.

use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;
use walkdir::WalkDir;

const SNAPSHOT_DIR_SKIP: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".venv",
    "vendor",
    ".cache",
    ".next",
    "dist",
    "build",
    "target",
];

const MAX_SNAPSHOT_CONTENT_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("io error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeltaOp {
    Create,
    Modify,
}

impl DeltaOp {
    fn as_str(&self) -> &'static str {
        match self {
            DeltaOp::Create => "create",
            DeltaOp::Modify => "modify",
        }
    }
}

/// Snapshot of a file at a point in time, used to detect and undo changes.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub mtime: std::time::SystemTime,
    pub size: u64,
    pub content: Option<String>,
}

/// Tracks per-(session, turn, path) undo rows in SQLite.
///
/// The connection is mutex-guarded (same pattern as `telemetry.rs`'s
/// `TelemetryDb`) so a `DeltaTracker` can be shared behind an `Arc` across
/// concurrently executing tools.
pub struct DeltaTracker {
    conn: Mutex<Connection>,
}

impl DeltaTracker {
    pub fn open(path: &Path) -> Result<Self, DeltaError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS file_deltas (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                turn_id TEXT NOT NULL,
                file_path TEXT NOT NULL,
                op TEXT NOT NULL,
                old_content TEXT,
                created TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_file_deltas_turn
                ON file_deltas(session_id, turn_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_file_deltas_unique
                ON file_deltas(session_id, turn_id, file_path);
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, DeltaError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            r#"
            CREATE TABLE file_deltas (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                turn_id TEXT NOT NULL,
                file_path TEXT NOT NULL,
                op TEXT NOT NULL,
                old_content TEXT,
                created TEXT NOT NULL
            );
            CREATE UNIQUE INDEX idx_file_deltas_unique
                ON file_deltas(session_id, turn_id, file_path);
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Record the pre-edit content of a modified file. No-op if a row for
    /// this (session, turn, path) already exists — only the first pre-edit
    /// state (the true pre-turn state) is kept.
    pub fn record_modify(
        &self,
        session_id: Uuid,
        turn_id: Uuid,
        abs_path: &Path,
        old_content: &str,
    ) -> Result<(), DeltaError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO file_deltas
                (session_id, turn_id, file_path, op, old_content, created)
             VALUES (?1, ?2, ?3, 'modify', ?4, ?5)",
            params![
                session_id.to_string(),
                turn_id.to_string(),
                abs_path.display().to_string(),
                old_content,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Record that a file was newly created during this turn.
    pub fn record_create(
        &self,
        session_id: Uuid,
        turn_id: Uuid,
        abs_path: &Path,
    ) -> Result<(), DeltaError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO file_deltas
                (session_id, turn_id, file_path, op, old_content, created)
             VALUES (?1, ?2, ?3, 'create', NULL, ?4)",
            params![
                session_id.to_string(),
                turn_id.to_string(),
                abs_path.display().to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Undo every delta recorded for this (session, turn), in reverse
    /// insertion order. Per-row failures are logged and do not abort the
    /// rest of the replay. Returns the set of paths touched.
    pub fn undo(&self, session_id: Uuid, turn_id: Uuid) -> Result<Vec<PathBuf>, DeltaError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT file_path, op, old_content FROM file_deltas
             WHERE session_id = ?1 AND turn_id = ?2
             ORDER BY id DESC",
        )?;

        let rows = stmt.query_map(
            params![session_id.to_string(), turn_id.to_string()],
            |row| {
                let path: String = row.get(0)?;
                let op: String = row.get(1)?;
                let old_content: Option<String> = row.get(2)?;
                Ok((path, op, old_content))
            },
        )?;

        let mut affected = Vec::new();
        for row in rows {
            let (path_str, op, old_content) = match row {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read delta row during undo");
                    continue;
                }
            };
            let path = PathBuf::from(&path_str);

            let result = match op.as_str() {
                "modify" => {
                    let content = old_content.unwrap_or_default();
                    write_restricted(&path, &content)
                }
                "create" => match std::fs::remove_file(&path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(DeltaError::Io { path: path.clone(), source: e }),
                },
                other => {
                    tracing::warn!(op = other, "unknown delta op during undo");
                    Ok(())
                }
            };

            match result {
                Ok(()) => affected.push(path),
                Err(e) => tracing::warn!(error = %e, path = %path_str, "undo failed for row"),
            }
        }

        Ok(affected)
    }

    pub fn delete_turn(&self, session_id: Uuid, turn_id: Uuid) -> Result<(), DeltaError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM file_deltas WHERE session_id = ?1 AND turn_id = ?2",
            params![session_id.to_string(), turn_id.to_string()],
        )?;
        Ok(())
    }
}

/// Write `content` to `path`, creating it if absent, with mode 0600 on unix.
/// Shared with the edit tool so a successful edit and an undo-restore use
/// the same restrictive permissions.
pub(crate) fn write_restricted(path: &Path, content: &str) -> Result<(), DeltaError> {
    use std::fs::OpenOptions;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| DeltaError::Io { path: path.to_path_buf(), source: e })?;
        file.write_all(content.as_bytes())
            .map_err(|e| DeltaError::Io { path: path.to_path_buf(), source: e })?;
    }
    #[cfg(not(unix))]
    {
        std::fs::write(path, content)
            .map_err(|e| DeltaError::Io { path: path.to_path_buf(), source: e })?;
    }
    Ok(())
}

/// Walk `root`, skipping vendored directories, pre-reading content for
/// files at or under 1 MiB.
pub fn snapshot_dir(root: &Path) -> HashMap<PathBuf, FileSnapshot> {
    let mut snapshots = HashMap::new();

    for entry in WalkDir::new(root).into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        !(e.file_type().is_dir() && SNAPSHOT_DIR_SKIP.contains(&name.as_ref()))
    }) {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let Ok(mtime) = meta.modified() else { continue };

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();

        let content = if meta.len() <= MAX_SNAPSHOT_CONTENT_BYTES {
            std::fs::read_to_string(entry.path()).ok()
        } else {
            None
        };

        snapshots.insert(
            relative,
            FileSnapshot {
                mtime,
                size: meta.len(),
                content,
            },
        );
    }

    snapshots
}

/// Compute which files changed between two snapshots. Creates are paths in
/// `post` but not `pre`; modifies are paths whose mtime or size differ, plus
/// deletions (in `pre` but not `post`, recorded as modifies so undo restores
/// them).
pub fn record_deltas(
    tracker: &DeltaTracker,
    session_id: Uuid,
    turn_id: Uuid,
    root: &Path,
    pre: &HashMap<PathBuf, FileSnapshot>,
    post: &HashMap<PathBuf, FileSnapshot>,
) -> Result<(), DeltaError> {
    for (relative, post_snap) in post {
        let abs_path = root.join(relative);
        match pre.get(relative) {
            None => {
                tracker.record_create(session_id, turn_id, &abs_path)?;
            }
            Some(pre_snap) => {
                if pre_snap.mtime != post_snap.mtime || pre_snap.size != post_snap.size {
                    if let Some(old) = &pre_snap.content {
                        tracker.record_modify(session_id, turn_id, &abs_path, old)?;
                    }
                }
            }
        }
    }

    for (relative, pre_snap) in pre {
        if !post.contains_key(relative) {
            let abs_path = root.join(relative);
            if let Some(old) = &pre_snap.content {
                tracker.record_modify(session_id, turn_id, &abs_path, old)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_modify_then_undo_restores_content() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "new content").unwrap();

        let tracker = DeltaTracker::open_in_memory().unwrap();
        let session = Uuid::new_v4();
        let turn = Uuid::new_v4();

        tracker
            .record_modify(session, turn, &file, "old content")
            .unwrap();

        let affected = tracker.undo(session, turn).unwrap();
        assert_eq!(affected, vec![file.clone()]);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "old content");
    }

    #[test]
    fn test_record_modify_keeps_first_write_only() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        let tracker = DeltaTracker::open_in_memory().unwrap();
        let session = Uuid::new_v4();
        let turn = Uuid::new_v4();

        tracker.record_modify(session, turn, &file, "first").unwrap();
        tracker.record_modify(session, turn, &file, "second").unwrap();

        std::fs::write(&file, "current").unwrap();
        tracker.undo(session, turn).unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "first");
    }

    #[test]
    fn test_record_create_then_undo_removes_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("new.txt");
        std::fs::write(&file, "created").unwrap();

        let tracker = DeltaTracker::open_in_memory().unwrap();
        let session = Uuid::new_v4();
        let turn = Uuid::new_v4();
        tracker.record_create(session, turn, &file).unwrap();

        tracker.undo(session, turn).unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn test_undo_tolerates_already_absent_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("gone.txt");

        let tracker = DeltaTracker::open_in_memory().unwrap();
        let session = Uuid::new_v4();
        let turn = Uuid::new_v4();
        tracker.record_create(session, turn, &file).unwrap();

        // file never actually existed on disk; undo should not error
        let affected = tracker.undo(session, turn).unwrap();
        assert_eq!(affected, vec![file]);
    }

    #[test]
    fn test_delete_turn_clears_rows() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        let tracker = DeltaTracker::open_in_memory().unwrap();
        let session = Uuid::new_v4();
        let turn = Uuid::new_v4();
        tracker.record_modify(session, turn, &file, "old").unwrap();
        tracker.delete_turn(session, turn).unwrap();
        let affected = tracker.undo(session, turn).unwrap();
        assert!(affected.is_empty());
    }
}
