// src/tools/git.rs
// Git tools: thin wrappers that shell out to `git` with fixed arguments.
// Policy gates (push/pull/commit flags, commit-message checks) run before
// these handlers are ever invoked.

use super::context::ToolContext;
use crate::llm::ToolCall;
use crate::sandbox::{RunSpec, SandboxMode};

/// Run `git` with fixed arguments in the workspace root.
async fn run_git(ctx: &ToolContext, args: &[&str]) -> Result<String, String> {
    let spec = RunSpec {
        command: "git".to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
        sandbox: SandboxMode::Never,
        session_id: Some(ctx.session_id.clone()),
        ..Default::default()
    };
    let outcome = ctx
        .sandbox()
        .run_process(spec)
        .await
        .map_err(|e| e.to_string())?;

    if outcome.exit_code == 0 {
        let stdout = outcome.stdout.trim_end();
        if stdout.is_empty() {
            Ok("(no output)".to_string())
        } else {
            Ok(stdout.to_string())
        }
    } else {
        let stderr = outcome.stderr.trim_end();
        Err(format!(
            "git {} failed (exit {}): {}",
            args.first().copied().unwrap_or(""),
            outcome.exit_code,
            if stderr.is_empty() {
                outcome.stdout.trim_end()
            } else {
                stderr
            }
        ))
    }
}

pub async fn git_status(_call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    run_git(&ctx, &["status", "--porcelain=v1", "--branch"]).await
}

pub async fn git_stage(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    match call.str_arg(&["path", "paths", "file"]) {
        Some(path) => run_git(&ctx, &["add", "--", &path]).await,
        None => run_git(&ctx, &["add", "-A"]).await,
    }
}

pub async fn git_unstage(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    match call.str_arg(&["path", "paths", "file"]) {
        Some(path) => run_git(&ctx, &["reset", "HEAD", "--", &path]).await,
        None => run_git(&ctx, &["reset", "HEAD"]).await,
    }
}

pub async fn git_commit(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let message = call
        .str_arg(&["message", "msg", "commit_message"])
        .ok_or_else(|| "missing required argument: message".to_string())?;
    run_git(&ctx, &["commit", "-m", &message]).await
}

pub async fn git_push(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let remote = call.str_arg(&["remote"]).unwrap_or_else(|| "origin".into());
    match call.str_arg(&["branch", "ref"]) {
        Some(branch) => run_git(&ctx, &["push", &remote, &branch]).await,
        None => run_git(&ctx, &["push", &remote]).await,
    }
}

pub async fn git_pull(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let autostash = ctx.config().policy.git.autostash;
    let remote = call.str_arg(&["remote"]).unwrap_or_else(|| "origin".into());
    if autostash {
        run_git(&ctx, &["pull", "--autostash", &remote]).await
    } else {
        run_git(&ctx, &["pull", &remote]).await
    }
}

pub async fn git_merge(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let branch = call
        .str_arg(&["branch", "ref", "name"])
        .ok_or_else(|| "missing required argument: branch".to_string())?;
    run_git(&ctx, &["merge", "--no-edit", &branch]).await
}

pub async fn git_rebase(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let onto = call
        .str_arg(&["branch", "onto", "ref"])
        .ok_or_else(|| "missing required argument: branch".to_string())?;
    if ctx.config().policy.git.autostash {
        run_git(&ctx, &["rebase", "--autostash", &onto]).await
    } else {
        run_git(&ctx, &["rebase", &onto]).await
    }
}

pub async fn git_checkout(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let target = call
        .str_arg(&["branch", "ref", "name", "target"])
        .ok_or_else(|| "missing required argument: ref".to_string())?;
    let create = call.bool_arg(&["create", "new"]).unwrap_or(false);
    if create {
        run_git(&ctx, &["checkout", "-b", &target]).await
    } else {
        run_git(&ctx, &["checkout", &target]).await
    }
}

pub async fn git_branch(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    match call.str_arg(&["name", "branch"]) {
        Some(name) => run_git(&ctx, &["branch", &name]).await,
        None => run_git(&ctx, &["branch", "--show-current"]).await,
    }
}

pub async fn git_branches(_call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    run_git(&ctx, &["branch", "--list", "--all", "--verbose"]).await
}

pub async fn git_stash(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let action = call
        .str_arg(&["action", "subcommand"])
        .unwrap_or_else(|| "push".to_string());
    match action.as_str() {
        "push" | "pop" | "list" | "drop" | "apply" => run_git(&ctx, &["stash", &action]).await,
        other => Err(format!(
            "unsupported stash action '{other}' (expected push, pop, list, drop, apply)"
        )),
    }
}

pub async fn git_conflicts(_call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let files = run_git(&ctx, &["diff", "--name-only", "--diff-filter=U"]).await?;
    if files == "(no output)" {
        Ok("no conflicted files".to_string())
    } else {
        Ok(files)
    }
}

pub async fn diff(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    match call.str_arg(&["ref", "range", "base"]) {
        Some(range) => run_git(&ctx, &["diff", &range]).await,
        None => run_git(&ctx, &["diff"]).await,
    }
}

pub async fn diff_summary(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    match call.str_arg(&["ref", "range", "base"]) {
        Some(range) => run_git(&ctx, &["diff", "--stat", &range]).await,
        None => run_git(&ctx, &["diff", "--stat"]).await,
    }
}

/// Staged+unstaged diff with file stats, for review-style prompts.
pub async fn diff_review(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let range = call.str_arg(&["ref", "range", "base"]);
    let stat = match range.as_deref() {
        Some(r) => run_git(&ctx, &["diff", "--stat", r]).await?,
        None => run_git(&ctx, &["diff", "--stat", "HEAD"]).await?,
    };
    let patch = match range.as_deref() {
        Some(r) => run_git(&ctx, &["diff", "--unified=5", r]).await?,
        None => run_git(&ctx, &["diff", "--unified=5", "HEAD"]).await?,
    };
    Ok(format!("## Summary\n{stat}\n\n## Changes\n{patch}"))
}

/// Commit subjects since the last tag (or the last 20 commits).
pub async fn release_notes(call: ToolCall, ctx: ToolContext) -> Result<String, String> {
    let since = match call.str_arg(&["since", "from", "tag"]) {
        Some(tag) => Some(tag),
        None => run_git(&ctx, &["describe", "--tags", "--abbrev=0"])
            .await
            .ok()
            .filter(|t| t != "(no output)"),
    };
    match since {
        Some(tag) => {
            let range = format!("{tag}..HEAD");
            let log = run_git(&ctx, &["log", "--pretty=format:- %s (%h)", &range]).await?;
            Ok(format!("Changes since {tag}:\n{log}"))
        }
        None => {
            let log = run_git(&ctx, &["log", "--pretty=format:- %s (%h)", "-n", "20"]).await?;
            Ok(format!("Recent changes:\n{log}"))
        }
    }
}
