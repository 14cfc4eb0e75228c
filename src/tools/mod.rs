// src/tools/mod.rs
// Tool layer: registry, execution context, and the built-in handlers

pub mod context;
pub mod edits;
pub mod exec;
pub mod git;
pub mod index;
pub mod mcp;
pub mod registry;
pub mod tasks;
pub mod testing;
pub mod web;
pub mod workspace;

pub use context::{Services, ToolContext};
pub use registry::{ToolRegistry, ToolResult, handler};
pub use web::WebClient;

/// Register every built-in tool on a registry.
pub fn register_builtin_tools(registry: &ToolRegistry) {
    // Workspace files
    registry.register(
        "fs_read",
        "workspace",
        "Read a text file from the workspace",
        handler(workspace::fs_read),
    );
    registry.register(
        "fs_write",
        "workspace",
        "Write a text file in the workspace",
        handler(workspace::fs_write),
    );
    registry.register(
        "edit_patch",
        "workspace",
        "Apply a unified-diff patch to a workspace file",
        handler(workspace::edit_patch),
    );

    // Execution
    registry.register(
        "shell",
        "execution",
        "Run a shell command in the workspace",
        handler(exec::shell),
    );
    registry.register(
        "python_exec",
        "execution",
        "Run a python snippet",
        handler(exec::python_exec),
    );

    // Git
    registry.register("workspace_git_status", "git", "git status", handler(git::git_status));
    registry.register("workspace_git_stage", "git", "git add", handler(git::git_stage));
    registry.register("workspace_git_unstage", "git", "git reset", handler(git::git_unstage));
    registry.register("workspace_git_commit", "git", "git commit", handler(git::git_commit));
    registry.register("workspace_git_push", "git", "git push", handler(git::git_push));
    registry.register("workspace_git_pull", "git", "git pull", handler(git::git_pull));
    registry.register("workspace_git_merge", "git", "git merge", handler(git::git_merge));
    registry.register("workspace_git_rebase", "git", "git rebase", handler(git::git_rebase));
    registry.register("workspace_git_checkout", "git", "git checkout", handler(git::git_checkout));
    registry.register("workspace_git_branch", "git", "current or new branch", handler(git::git_branch));
    registry.register("workspace_git_branches", "git", "list branches", handler(git::git_branches));
    registry.register("workspace_git_stash", "git", "git stash", handler(git::git_stash));
    registry.register("workspace_git_conflicts", "git", "list conflicted files", handler(git::git_conflicts));
    registry.register("workspace_diff", "git", "working-tree diff", handler(git::diff));
    registry.register("workspace_diff_summary", "git", "diff --stat", handler(git::diff_summary));
    registry.register("workspace_diff_review", "git", "diff with stats for review", handler(git::diff_review));
    registry.register("workspace_release_notes", "git", "commit log since last tag", handler(git::release_notes));

    // Workspace navigation
    registry.register("workspace_list", "index", "list workspace files", handler(index::workspace_list));
    registry.register("workspace_search", "index", "regex search over files", handler(index::workspace_search));
    registry.register("workspace_symbol_search", "index", "find symbol definitions", handler(index::workspace_symbol_search));
    registry.register("workspace_symbol_references", "index", "find symbol references", handler(index::workspace_symbol_references));
    registry.register("workspace_goto_definition", "index", "jump to a definition", handler(index::workspace_goto_definition));
    registry.register("workspace_index_rebuild", "index", "re-walk the workspace", handler(index::workspace_index_rebuild));
    registry.register("project_summary", "index", "project overview", handler(index::project_summary));

    // Edit history
    registry.register("workspace_edit_history", "edits", "recorded file edits", handler(edits::edit_history));
    registry.register("workspace_edit_revert", "edits", "revert a recorded edit", handler(edits::edit_revert));

    // Tasks
    registry.register("workspace_task_create", "tasks", "create a task", handler(tasks::task_create));
    registry.register("workspace_task_get", "tasks", "fetch a task", handler(tasks::task_get));
    registry.register("workspace_task_update", "tasks", "update a task", handler(tasks::task_update));
    registry.register("workspace_task_set_status", "tasks", "set task status", handler(tasks::task_set_status));
    registry.register("workspace_task_delete", "tasks", "delete a task", handler(tasks::task_delete));
    registry.register("workspace_tasks_list", "tasks", "list tasks", handler(tasks::tasks_list));

    // Tests
    registry.register("workspace_test_run", "tests", "run the test command", handler(testing::test_run));
    registry.register("workspace_test_history", "tests", "recent test runs", handler(testing::test_history));
    registry.register("workspace_test_summary", "tests", "aggregate test results", handler(testing::test_summary));

    // Web
    registry.register("web_search", "web", "query the search endpoint", handler(web::web_search));
    registry.register("web_fetch", "web", "fetch a page (bounded)", handler(web::web_fetch));

    // MCP
    registry.register("workspace_mcp_servers", "mcp", "list MCP servers", handler(mcp::mcp_servers));
    registry.register("workspace_mcp_call", "mcp", "call an MCP server", handler(mcp::mcp_call));
    registry.register("workspace_sandbox_sessions", "mcp", "sandbox session bookkeeping", handler(mcp::sandbox_sessions));
}
