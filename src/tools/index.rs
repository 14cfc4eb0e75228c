// src/tools/index.rs
// Workspace navigation tools: listing, text search, symbol lookup
//
// Deliberately simple internals: the ignore-aware walker plus regex scans.
// Gitignored files and anything outside the workspace root never appear.

use ignore::WalkBuilder;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::context::ToolContext;
use super::workspace::resolve_workspace_path;
use crate::llm::ToolCall;

const DEFAULT_LIST_LIMIT: usize = 200;
const DEFAULT_SEARCH_LIMIT: usize = 100;
/// Skip files larger than this during content scans.
const MAX_SCAN_BYTES: u64 = 1024 * 1024;

/// Definition-introducing keywords across the languages we meet in practice.
static SYMBOL_KEYWORDS: &str =
    "fn|struct|enum|trait|impl|type|const|static|class|def|function|interface|var|let";

static SYMBOL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^\s*(?:pub(?:\([a-z]+\))?\s+)?(?:async\s+)?(?:{SYMBOL_KEYWORDS})\s+([A-Za-z_][A-Za-z0-9_]*)"
    ))
    .unwrap_or_else(|e| panic!("invalid symbol pattern: {e}"))
});

fn walker(root: &Path) -> ignore::Walk {
    WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_global(false)
        .build()
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// List workspace files (ignore-aware), optionally under a subdirectory.
pub async fn workspace_list(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let root = ctx.workspace_root().to_path_buf();
    let base = match call.str_arg(&["path", "dir", "directory"]) {
        Some(sub) => resolve_workspace_path(&root, &sub)?,
        None => root.clone(),
    };
    let limit = call
        .u64_arg(&["limit", "max"])
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_LIST_LIMIT);

    let listing = tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in walker(&base).flatten() {
            if entry.file_type().is_some_and(|t| t.is_file()) {
                files.push(relative(&root, entry.path()));
            }
            if files.len() >= limit {
                break;
            }
        }
        files.sort();
        files
    })
    .await
    .map_err(|e| e.to_string())?;

    if listing.is_empty() {
        Ok("(no files)".to_string())
    } else {
        Ok(listing.join("\n"))
    }
}

/// Regex search over workspace file contents.
pub async fn workspace_search(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let pattern = call
        .str_arg(&["pattern", "query", "regex", "q"])
        .ok_or_else(|| "missing required argument: pattern".to_string())?;
    let regex = Regex::new(&pattern).map_err(|e| format!("invalid pattern: {e}"))?;
    let limit = call
        .u64_arg(&["limit", "max"])
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_SEARCH_LIMIT);
    let root = ctx.workspace_root().to_path_buf();

    let matches = tokio::task::spawn_blocking(move || scan_files(&root, &regex, limit))
        .await
        .map_err(|e| e.to_string())?;

    if matches.is_empty() {
        Ok(format!("no matches for pattern: {pattern}"))
    } else {
        Ok(matches.join("\n"))
    }
}

fn scan_files(root: &Path, regex: &Regex, limit: usize) -> Vec<String> {
    let mut matches = Vec::new();
    'files: for entry in walker(root).flatten() {
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        if entry.metadata().map(|m| m.len()).unwrap_or(0) > MAX_SCAN_BYTES {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue; // binary or unreadable
        };
        for (line_no, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(format!(
                    "{}:{}: {}",
                    relative(root, entry.path()),
                    line_no + 1,
                    line.trim()
                ));
                if matches.len() >= limit {
                    break 'files;
                }
            }
        }
    }
    matches
}

struct SymbolHit {
    path: String,
    line: usize,
    text: String,
}

fn scan_symbols(root: &Path, name: &str, limit: usize) -> Vec<SymbolHit> {
    let mut hits = Vec::new();
    'files: for entry in walker(root).flatten() {
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        if entry.metadata().map(|m| m.len()).unwrap_or(0) > MAX_SCAN_BYTES {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        for (line_no, line) in content.lines().enumerate() {
            if let Some(captures) = SYMBOL_LINE.captures(line) {
                let symbol = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                if symbol == name || (name.len() >= 3 && symbol.contains(name)) {
                    hits.push(SymbolHit {
                        path: relative(root, entry.path()),
                        line: line_no + 1,
                        text: line.trim().to_string(),
                    });
                    if hits.len() >= limit {
                        break 'files;
                    }
                }
            }
        }
    }
    hits
}

/// Find symbol definitions matching a name.
pub async fn workspace_symbol_search(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let name = call
        .str_arg(&["symbol", "name", "query"])
        .ok_or_else(|| "missing required argument: symbol".to_string())?;
    let root = ctx.workspace_root().to_path_buf();

    let hits = tokio::task::spawn_blocking(move || scan_symbols(&root, &name, 50))
        .await
        .map_err(|e| e.to_string())?;

    if hits.is_empty() {
        return Ok("no matching symbols".to_string());
    }
    Ok(hits
        .iter()
        .map(|h| format!("{}:{}: {}", h.path, h.line, h.text))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Jump to the first definition of a symbol.
pub async fn workspace_goto_definition(
    call: ToolCall,
    ctx: ToolContext,
) -> Result<String, String> {
    let name = call
        .str_arg(&["symbol", "name", "query"])
        .ok_or_else(|| "missing required argument: symbol".to_string())?;
    let root = ctx.workspace_root().to_path_buf();
    let lookup = name.clone();

    let hits = tokio::task::spawn_blocking(move || scan_symbols(&root, &lookup, 1))
        .await
        .map_err(|e| e.to_string())?;

    match hits.first() {
        Some(hit) => Ok(format!("{}:{}: {}", hit.path, hit.line, hit.text)),
        None => Err(format!("no definition found for '{name}'")),
    }
}

/// Word-boundary references to an identifier.
pub async fn workspace_symbol_references(
    call: ToolCall,
    ctx: ToolContext,
) -> Result<String, String> {
    let name = call
        .str_arg(&["symbol", "name", "query"])
        .ok_or_else(|| "missing required argument: symbol".to_string())?;
    let regex = Regex::new(&format!(r"\b{}\b", regex::escape(&name)))
        .map_err(|e| format!("invalid symbol: {e}"))?;
    let root = ctx.workspace_root().to_path_buf();

    let matches = tokio::task::spawn_blocking(move || scan_files(&root, &regex, 100))
        .await
        .map_err(|e| e.to_string())?;

    if matches.is_empty() {
        Ok(format!("no references to '{name}'"))
    } else {
        Ok(matches.join("\n"))
    }
}

/// Re-walk the workspace and report what an index rebuild covered.
pub async fn workspace_index_rebuild(
    _call: ToolCall,
    ctx: ToolContext,
) -> Result<String, String> {
    let root = ctx.workspace_root().to_path_buf();
    let (files, bytes) = tokio::task::spawn_blocking(move || {
        let mut files = 0u64;
        let mut bytes = 0u64;
        for entry in walker(&root).flatten() {
            if entry.file_type().is_some_and(|t| t.is_file()) {
                files += 1;
                bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        (files, bytes)
    })
    .await
    .map_err(|e| e.to_string())?;

    Ok(format!("reindexed {files} files ({bytes} bytes)"))
}

/// High-level overview: file counts by extension plus the README head.
pub async fn project_summary(_call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let root = ctx.workspace_root().to_path_buf();

    let summary = tokio::task::spawn_blocking(move || {
        let mut by_extension: BTreeMap<String, usize> = BTreeMap::new();
        let mut total = 0usize;
        for entry in walker(&root).flatten() {
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            total += 1;
            let ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("(none)")
                .to_string();
            *by_extension.entry(ext).or_insert(0) += 1;
        }

        let mut lines = vec![format!("{total} files")];
        let mut counts: Vec<(String, usize)> = by_extension.into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        for (ext, count) in counts.into_iter().take(10) {
            lines.push(format!("  .{ext}: {count}"));
        }

        for candidate in ["README.md", "README", "readme.md"] {
            let readme: PathBuf = root.join(candidate);
            if let Ok(content) = std::fs::read_to_string(&readme) {
                let head: String = content.lines().take(15).collect::<Vec<_>>().join("\n");
                lines.push(format!("\n{candidate}:\n{head}"));
                break;
            }
        }
        lines.join("\n")
    })
    .await
    .map_err(|e| e.to_string())?;

    Ok(summary)
}
