//! Tool implementations (new system - no rig dependency)
//!
//! Each tool implements our `Tool` trait from `crate::tool`.

mod edit;
mod fetch;
mod find_path;
mod grep;
mod list_directory;
mod read_file;
mod shell;
mod todo;
mod web_search;

pub use edit::EditTool;
pub use fetch::FetchTool;
pub use find_path::FindPathTool;
pub use grep::GrepTool;
pub use list_directory::ListDirectoryTool;
pub use read_file::ReadFileTool;
pub use shell::ShellTool;
pub use todo::{TodoItem, TodoReadTool, TodoStatus, TodoStore, TodoWriteTool};
pub use web_search::WebSearchTool;

use crate::provider::ProviderClient;
use crate::shell::Shell;
use crate::sub_agent::SubAgentTool;
use crate::tool::ToolRegistry;
use std::path::PathBuf;
use std::sync::Arc;

/// Create a registry with all standard tools (without session-specific tools like todo)
pub fn create_registry(working_dir: PathBuf) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    // File reading
    registry.register(ReadFileTool::new(working_dir.clone()));

    // File editing
    registry.register(EditTool::new(working_dir.clone()));

    // Shell execution
    let shell = Arc::new(Shell::with_default_blockers(working_dir.clone()));
    registry.register(ShellTool::new(shell));

    // Search tools
    registry.register(GrepTool::new(working_dir.clone()));
    registry.register(FindPathTool::new(working_dir.clone()));
    registry.register(ListDirectoryTool::new(working_dir.clone()));

    // Web tools
    registry.register(FetchTool::new());
    registry.register(WebSearchTool::new());

    // Note: Todo tools require session_id and are added via create_registry_with_session()
    // Note: SubAgent tool requires a provider and is added via create_full_registry()

    registry
}

/// Create a registry with all tools including session-specific ones (todo)
pub fn create_registry_with_session(
    working_dir: PathBuf,
    session_id: String,
    todo_store: TodoStore,
) -> ToolRegistry {
    let mut registry = create_registry(working_dir);

    // Add session-specific todo tools
    registry.register(TodoWriteTool::new(todo_store.clone(), session_id.clone()));
    registry.register(TodoReadTool::new(todo_store, session_id));

    registry
}

/// Create a full registry including the SubAgent tool for task delegation.
///
/// The SubAgent tool gets a copy of the base registry (without itself, to
/// enforce depth-1 recursion) plus a provider for its own turn loops.
pub fn create_full_registry(
    working_dir: PathBuf,
    session_id: String,
    todo_store: TodoStore,
    provider: Arc<ProviderClient>,
) -> ToolRegistry {
    let base_registry = create_registry(working_dir.clone());
    let sub_agent_tool = SubAgentTool::new(provider, base_registry);

    let mut registry = create_registry(working_dir);
    registry.register(TodoWriteTool::new(todo_store.clone(), session_id.clone()));
    registry.register(TodoReadTool::new(todo_store, session_id));
    registry.register(sub_agent_tool);

    registry
}
