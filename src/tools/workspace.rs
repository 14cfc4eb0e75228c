// src/tools/workspace.rs
// Workspace file tools: fs_read, fs_write, edit_patch
//
// Every path is resolved relative to the workspace root and fails closed if
// it would escape it. Writes record before/after snapshots in the edit
// store so workspace_edit_revert can restore them.

use serde_json::Value;
use similar::TextDiff;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::context::ToolContext;
use crate::db::edits;
use crate::llm::ToolCall;

/// Hard ceiling on content returned to the model.
const MAX_READ_BYTES: usize = 256 * 1024;

const PATH_KEYS: &[&str] = &["path", "file", "file_path", "filename"];
const CONTENT_KEYS: &[&str] = &["content", "text", "data", "body"];
const PATCH_KEYS: &[&str] = &["patch", "diff", "changes"];

/// Resolve a user-supplied path inside the workspace root, lexically.
/// Absolute paths are accepted only when they already live under the root;
/// `..` components may not climb above it. The target does not need to
/// exist (writes create files).
pub fn resolve_workspace_path(root: &Path, candidate: &str) -> Result<PathBuf, String> {
    if candidate.trim().is_empty() {
        return Err("path is required".to_string());
    }

    let candidate_path = Path::new(candidate);
    let joined = if candidate_path.is_absolute() {
        candidate_path.to_path_buf()
    } else {
        root.join(candidate_path)
    };

    // Lexical normalization; no filesystem access so missing files resolve
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(format!("path escapes the workspace root: {candidate}"));
                }
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }

    let root_canonical = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    if !normalized.starts_with(&root_canonical) && !normalized.starts_with(root) {
        return Err(format!("path escapes the workspace root: {candidate}"));
    }

    // If the file exists, also guard against symlink escapes
    if normalized.exists() {
        let canonical = normalized
            .canonicalize()
            .map_err(|e| format!("cannot resolve path: {e}"))?;
        if !canonical.starts_with(&root_canonical) {
            return Err(format!("path escapes the workspace root: {candidate}"));
        }
        return Ok(canonical);
    }

    Ok(normalized)
}

fn required_path(call: &ToolCall, ctx: &ToolContext) -> Result<(PathBuf, String), String> {
    let raw = call
        .str_arg(PATH_KEYS)
        .ok_or_else(|| "missing required argument: path".to_string())?;
    let resolved = resolve_workspace_path(ctx.workspace_root(), &raw)?;
    Ok((resolved, raw))
}

fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Read a text file from the workspace.
pub async fn fs_read(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let (path, _) = required_path(&call, &ctx)?;
    let max_bytes = call
        .u64_arg(&["max_bytes", "limit"])
        .map(|n| n as usize)
        .unwrap_or(MAX_READ_BYTES)
        .min(MAX_READ_BYTES);

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;

    let truncated = bytes.len() > max_bytes;
    let slice = &bytes[..bytes.len().min(max_bytes)];
    let mut content = String::from_utf8_lossy(slice).into_owned();
    if truncated {
        content.push_str(&format!(
            "\n... [truncated, {} of {} bytes shown]",
            max_bytes,
            bytes.len()
        ));
    }
    Ok(content)
}

/// Write (create or replace) a text file, recording a snapshot.
pub async fn fs_write(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let (path, _) = required_path(&call, &ctx)?;
    let content = call
        .str_arg(CONTENT_KEYS)
        .ok_or_else(|| "missing required argument: content".to_string())?;

    let before = tokio::fs::read_to_string(&path).await.ok();

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("cannot create parent directory: {e}"))?;
    }
    tokio::fs::write(&path, &content)
        .await
        .map_err(|e| format!("cannot write {}: {e}", path.display()))?;

    let rel = relative_display(ctx.workspace_root(), &path);
    record_snapshot(&ctx, &rel, "write", before.as_deref(), Some(&content)).await;

    Ok(format!("wrote {} bytes to {rel}", content.len()))
}

/// Apply a unified-diff patch to a workspace file, recording a snapshot.
pub async fn edit_patch(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let (path, _) = required_path(&call, &ctx)?;
    let patch = call
        .str_arg(PATCH_KEYS)
        .ok_or_else(|| "missing required argument: patch".to_string())?;

    let before = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;

    let after = apply_unified_diff(&before, &patch)?;

    tokio::fs::write(&path, &after)
        .await
        .map_err(|e| format!("cannot write {}: {e}", path.display()))?;

    let rel = relative_display(ctx.workspace_root(), &path);
    record_snapshot(&ctx, &rel, "patch", Some(&before), Some(&after)).await;

    Ok(format!(
        "patched {rel} ({} -> {} bytes)",
        before.len(),
        after.len()
    ))
}

/// Persist a before/after snapshot; failures are logged, not fatal.
async fn record_snapshot(
    ctx: &ToolContext,
    rel_path: &str,
    operation: &str,
    before: Option<&str>,
    after: Option<&str>,
) {
    let diff = match (before, after) {
        (Some(b), Some(a)) => Some(
            TextDiff::from_lines(b, a)
                .unified_diff()
                .context_radius(3)
                .header(rel_path, rel_path)
                .to_string(),
        ),
        _ => None,
    };

    debug!(path = %rel_path, operation = %operation, "Recording edit snapshot");
    let session_id = ctx.session_id.clone();
    let path = rel_path.to_string();
    let operation = operation.to_string();
    let before = before.map(str::to_string);
    let after = after.map(str::to_string);
    ctx.pool()
        .try_interact("record edit snapshot", move |conn| {
            edits::record_edit_sync(
                conn,
                Some(&session_id),
                &path,
                &operation,
                before.as_deref(),
                after.as_deref(),
                diff.as_deref(),
            )
            .map_err(Into::into)
        })
        .await;
}

// ============================================================================
// Unified diff application
// ============================================================================

#[derive(Debug)]
struct Hunk {
    old_start: usize,
    lines: Vec<HunkLine>,
}

#[derive(Debug)]
enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

/// Apply a unified diff to `original`. Context lines are verified; a
/// mismatch fails the whole patch (no fuzzy matching).
pub fn apply_unified_diff(original: &str, patch: &str) -> Result<String, String> {
    let hunks = parse_hunks(patch)?;
    if hunks.is_empty() {
        return Err("patch contains no hunks".to_string());
    }

    let original_lines: Vec<&str> = original.lines().collect();
    let mut output: Vec<String> = Vec::new();
    let mut cursor = 0usize; // index into original_lines

    for hunk in &hunks {
        let start = hunk.old_start.saturating_sub(1);
        if start < cursor {
            return Err("hunks overlap or are out of order".to_string());
        }
        if start > original_lines.len() {
            return Err(format!(
                "hunk start {} beyond end of file ({} lines)",
                hunk.old_start,
                original_lines.len()
            ));
        }
        // Copy unchanged region before the hunk
        for line in &original_lines[cursor..start] {
            output.push((*line).to_string());
        }
        cursor = start;

        for hunk_line in &hunk.lines {
            match hunk_line {
                HunkLine::Context(expected) => {
                    let actual = original_lines.get(cursor).ok_or_else(|| {
                        format!("context line {} beyond end of file", cursor + 1)
                    })?;
                    if actual != expected {
                        return Err(format!(
                            "context mismatch at line {}: expected {expected:?}, found {actual:?}",
                            cursor + 1
                        ));
                    }
                    output.push((*actual).to_string());
                    cursor += 1;
                }
                HunkLine::Remove(expected) => {
                    let actual = original_lines.get(cursor).ok_or_else(|| {
                        format!("removed line {} beyond end of file", cursor + 1)
                    })?;
                    if actual != expected {
                        return Err(format!(
                            "removal mismatch at line {}: expected {expected:?}, found {actual:?}",
                            cursor + 1
                        ));
                    }
                    cursor += 1;
                }
                HunkLine::Add(line) => output.push(line.clone()),
            }
        }
    }

    for line in &original_lines[cursor..] {
        output.push((*line).to_string());
    }

    let mut result = output.join("\n");
    // Preserve the original's trailing-newline convention
    if original.ends_with('\n') || original.is_empty() {
        result.push('\n');
    }
    Ok(result)
}

fn parse_hunks(patch: &str) -> Result<Vec<Hunk>, String> {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in patch.lines() {
        if line.starts_with("--- ") || line.starts_with("+++ ") || line.starts_with("diff ") {
            continue;
        }
        if let Some(header) = line.strip_prefix("@@") {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            let old_start = parse_hunk_header(header)
                .ok_or_else(|| format!("malformed hunk header: {line}"))?;
            current = Some(Hunk {
                old_start,
                lines: Vec::new(),
            });
            continue;
        }
        let Some(ref mut hunk) = current else {
            continue; // preamble text before the first hunk
        };
        if let Some(rest) = line.strip_prefix('+') {
            hunk.lines.push(HunkLine::Add(rest.to_string()));
        } else if let Some(rest) = line.strip_prefix('-') {
            hunk.lines.push(HunkLine::Remove(rest.to_string()));
        } else if let Some(rest) = line.strip_prefix(' ') {
            hunk.lines.push(HunkLine::Context(rest.to_string()));
        } else if line == "\\ No newline at end of file" {
            continue;
        } else if line.is_empty() {
            hunk.lines.push(HunkLine::Context(String::new()));
        } else {
            return Err(format!("unexpected patch line: {line:?}"));
        }
    }
    if let Some(hunk) = current.take() {
        hunks.push(hunk);
    }
    Ok(hunks)
}

/// Parse `" -old_start[,count] +new_start[,count] @@"`, returning old_start.
fn parse_hunk_header(header: &str) -> Option<usize> {
    let header = header.trim_start();
    let old = header.strip_prefix('-')?;
    let end = old.find(|c: char| !c.is_ascii_digit())?;
    old[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::context::test_support::test_context;
    use serde_json::json;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall::new(Some("c".into()), name, &args, Value::Null)
    }

    // ------------------------------------------------------------------
    // Path confinement
    // ------------------------------------------------------------------

    #[test]
    fn test_resolve_relative_path() {
        let root = Path::new("/workspace");
        let resolved = resolve_workspace_path(root, "src/main.rs").expect("resolve");
        assert_eq!(resolved, PathBuf::from("/workspace/src/main.rs"));
    }

    #[test]
    fn test_resolve_rejects_parent_escape() {
        let root = Path::new("/workspace");
        assert!(resolve_workspace_path(root, "../etc/passwd").is_err());
        assert!(resolve_workspace_path(root, "a/../../etc/passwd").is_err());
    }

    #[test]
    fn test_resolve_rejects_foreign_absolute() {
        let root = Path::new("/workspace");
        assert!(resolve_workspace_path(root, "/etc/passwd").is_err());
    }

    #[test]
    fn test_resolve_accepts_absolute_inside_root() {
        let root = Path::new("/workspace");
        let resolved = resolve_workspace_path(root, "/workspace/a.txt").expect("resolve");
        assert_eq!(resolved, PathBuf::from("/workspace/a.txt"));
    }

    #[test]
    fn test_resolve_dotdot_within_root_ok() {
        let root = Path::new("/workspace");
        let resolved = resolve_workspace_path(root, "src/../README.md").expect("resolve");
        assert_eq!(resolved, PathBuf::from("/workspace/README.md"));
    }

    #[test]
    fn test_resolve_empty_path_rejected() {
        assert!(resolve_workspace_path(Path::new("/workspace"), " ").is_err());
    }

    #[test]
    fn test_resolve_symlink_escape_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().canonicalize().expect("canon");
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink("/etc", root.join("sneaky")).expect("symlink");
            assert!(resolve_workspace_path(&root, "sneaky/passwd").is_err());
        }
    }

    // ------------------------------------------------------------------
    // Read/write/patch handlers
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_fs_write_then_read() {
        let (ctx, _dir) = test_context().await;
        let result = fs_write(
            call("fs_write", json!({"path": "notes.txt", "content": "line one\n"})),
            ctx.clone(),
        )
        .await
        .expect("write");
        assert!(result.contains("notes.txt"));

        let content = fs_read(call("fs_read", json!({"path": "notes.txt"})), ctx)
            .await
            .expect("read");
        assert_eq!(content, "line one\n");
    }

    #[tokio::test]
    async fn test_fs_read_missing_file() {
        let (ctx, _dir) = test_context().await;
        let result = fs_read(call("fs_read", json!({"path": "ghost.txt"})), ctx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fs_write_records_snapshot() {
        let (ctx, _dir) = test_context().await;
        fs_write(
            call("fs_write", json!({"path": "a.txt", "content": "v1\n"})),
            ctx.clone(),
        )
        .await
        .expect("write");
        fs_write(
            call("fs_write", json!({"path": "a.txt", "content": "v2\n"})),
            ctx.clone(),
        )
        .await
        .expect("write");

        let edits = ctx
            .pool()
            .run(move |conn| edits::list_edits_sync(conn, Some("a.txt"), 10))
            .await
            .expect("list");
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[0].before_content.as_deref(), Some("v1\n"));
        assert_eq!(edits[0].after_content.as_deref(), Some("v2\n"));
        assert!(edits[0].diff.as_deref().unwrap_or("").contains("-v1"));
    }

    #[tokio::test]
    async fn test_edit_patch_applies() {
        let (ctx, _dir) = test_context().await;
        fs_write(
            call("fs_write", json!({"path": "code.txt", "content": "alpha\nbeta\ngamma\n"})),
            ctx.clone(),
        )
        .await
        .expect("write");

        let patch = "--- code.txt\n+++ code.txt\n@@ -1,3 +1,3 @@\n alpha\n-beta\n+BETA\n gamma\n";
        edit_patch(
            call("edit_patch", json!({"path": "code.txt", "patch": patch})),
            ctx.clone(),
        )
        .await
        .expect("patch");

        let content = fs_read(call("fs_read", json!({"path": "code.txt"})), ctx)
            .await
            .expect("read");
        assert_eq!(content, "alpha\nBETA\ngamma\n");
    }

    #[tokio::test]
    async fn test_write_escaping_path_denied() {
        let (ctx, _dir) = test_context().await;
        let result = fs_write(
            call("fs_write", json!({"path": "../../outside.txt", "content": "x"})),
            ctx,
        )
        .await;
        assert!(result.is_err());
    }

    // ------------------------------------------------------------------
    // Unified diff application
    // ------------------------------------------------------------------

    #[test]
    fn test_apply_simple_replacement() {
        let original = "one\ntwo\nthree\n";
        let patch = "@@ -1,3 +1,3 @@\n one\n-two\n+TWO\n three\n";
        assert_eq!(
            apply_unified_diff(original, patch).expect("apply"),
            "one\nTWO\nthree\n"
        );
    }

    #[test]
    fn test_apply_addition_and_removal() {
        let original = "a\nb\nc\n";
        let patch = "@@ -1,3 +1,3 @@\n a\n-b\n+b2\n+b3\n-c\n";
        // Removing c and adding two lines after b
        let result = apply_unified_diff(original, patch).expect("apply");
        assert_eq!(result, "a\nb2\nb3\n");
    }

    #[test]
    fn test_apply_multiple_hunks() {
        let original = "1\n2\n3\n4\n5\n6\n7\n8\n";
        let patch = "@@ -1,2 +1,2 @@\n 1\n-2\n+two\n@@ -7,2 +7,2 @@\n 7\n-8\n+eight\n";
        assert_eq!(
            apply_unified_diff(original, patch).expect("apply"),
            "1\ntwo\n3\n4\n5\n6\n7\neight\n"
        );
    }

    #[test]
    fn test_apply_context_mismatch_fails() {
        let original = "x\ny\n";
        let patch = "@@ -1,2 +1,2 @@\n wrong\n-y\n+z\n";
        assert!(apply_unified_diff(original, patch).is_err());
    }

    #[test]
    fn test_apply_empty_patch_fails() {
        assert!(apply_unified_diff("a\n", "not a patch").is_err());
    }

    #[test]
    fn test_apply_preserves_missing_trailing_newline() {
        let original = "a\nb";
        let patch = "@@ -1,2 +1,2 @@\n a\n-b\n+B\n";
        assert_eq!(apply_unified_diff(original, patch).expect("apply"), "a\nB");
    }

    #[test]
    fn test_parse_hunk_header() {
        assert_eq!(parse_hunk_header(" -12,5 +12,6 @@"), Some(12));
        assert_eq!(parse_hunk_header(" -3 +3 @@"), Some(3));
        assert_eq!(parse_hunk_header("garbage"), None);
    }
}
