//! Git plumbing for the shared versioned workspace.
//!
//! The leader owns a repository at `<workspace>/bob`; each worker gets a
//! clone at `<workspace>/<name>` on its own `agent/<name>` branch. Merges
//! happen only in the leader's repository, so the leader is the sole writer
//! there and no cross-process git locking is needed.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::process::Command;

/// Contents of the `.gitignore` seeded into the leader repository. State and
/// log files are checkpoint data, not deliverables.
const GITIGNORE: &str = "state/\nlogs/\n";

/// Run a git invocation in `repo` and capture its output. Non-zero exit
/// becomes an error carrying stderr (or stdout when stderr is empty).
pub async fn run_git(repo: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .await
        .with_context(|| format!("failed to run git {args:?}"))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        bail!("git {} failed: {detail}", args.join(" "));
    }
    Ok(stdout)
}

/// Initialize the leader repository: `git init`, seed `.gitignore`, and make
/// the initial commit. Idempotent for an already-initialized repository.
pub async fn init_leader_repo(repo: &Path) -> Result<()> {
    tokio::fs::create_dir_all(repo)
        .await
        .with_context(|| format!("create leader repo dir {}", repo.display()))?;

    if repo.join(".git").exists() {
        return Ok(());
    }

    run_git(repo, &["init", "--initial-branch", "main"]).await?;
    tokio::fs::write(repo.join(".gitignore"), GITIGNORE)
        .await
        .context("write .gitignore")?;
    configure_identity(repo).await?;
    run_git(repo, &["add", "-A"]).await?;
    run_git(repo, &["commit", "-m", "Initial workspace", "--allow-empty"]).await?;
    Ok(())
}

/// Clone the leader repository for a worker and switch it to the worker's
/// own branch `agent/<name>`.
pub async fn clone_for_worker(leader_repo: &Path, worker_dir: &Path, name: &str) -> Result<()> {
    let parent = worker_dir
        .parent()
        .context("worker dir has no parent")?;
    tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create workspace dir {}", parent.display()))?;

    run_git(
        parent,
        &[
            "clone",
            &leader_repo.to_string_lossy(),
            &worker_dir.to_string_lossy(),
        ],
    )
    .await?;
    configure_identity(worker_dir).await?;
    run_git(worker_dir, &["checkout", "-b", &format!("agent/{name}")]).await?;
    Ok(())
}

/// Stage everything and commit. Best-effort variant used during cancellation:
/// a failure (nothing to commit, no repository) is reported but not fatal.
pub async fn commit_all(repo: &Path, message: &str) -> Result<String> {
    run_git(repo, &["add", "-A"]).await?;
    run_git(repo, &["commit", "-m", message, "--allow-empty"]).await
}

/// Merge a worker's branch into the leader repository. The worker clone is
/// first registered as a fetch remote so its branch is visible.
pub async fn merge_worker_branch(
    leader_repo: &Path,
    worker_dir: &Path,
    name: &str,
) -> Result<String> {
    let remote = format!("agent-{name}");
    let branch = format!("agent/{name}");

    // Re-adding an existing remote fails; point it at the clone instead.
    let added = run_git(
        leader_repo,
        &["remote", "add", &remote, &worker_dir.to_string_lossy()],
    )
    .await;
    if added.is_err() {
        run_git(
            leader_repo,
            &["remote", "set-url", &remote, &worker_dir.to_string_lossy()],
        )
        .await?;
    }

    run_git(leader_repo, &["fetch", &remote, &branch]).await?;
    run_git(
        leader_repo,
        &[
            "merge",
            &format!("{remote}/{branch}"),
            "-m",
            &format!("Merge {branch}"),
        ],
    )
    .await
}

/// Set a local committer identity so commits succeed in bare environments.
async fn configure_identity(repo: &Path) -> Result<()> {
    run_git(repo, &["config", "user.email", "agents@sealteam.local"]).await?;
    run_git(repo, &["config", "user.name", "sealteam"]).await?;
    Ok(())
}
