//! Iteration and session state persistence.
//!
//! Every agent writes one JSON file per completed (iteration, step) pair under
//! its own `state/` directory, and the supervisor maintains a single
//! `session.json` at the workspace root. Files are content-addressed by name
//! and never mutated in place, only overwritten whole (temp file + rename), so
//! no locking is needed anywhere in the store.
//!
//! The store is also the recovery substrate: `last_completed_step` scans the
//! state directory and names the resume point for a crashed agent.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AgentConfig;
use crate::error::StateError;

/// Delay before the single retry of a failed state write.
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Step / Complexity
// ---------------------------------------------------------------------------

/// A phase of the life loop's iteration state machine.
///
/// The derived `Ord` gives the step order used everywhere a "latest step"
/// comparison is needed: plan < execute < plan-execute < reflect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    Plan,
    Execute,
    PlanExecute,
    Reflect,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Plan => "plan",
            Step::Execute => "execute",
            Step::PlanExecute => "plan-execute",
            Step::Reflect => "reflect",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(Step::Plan),
            "execute" => Ok(Step::Execute),
            "plan-execute" => Ok(Step::PlanExecute),
            "reflect" => Ok(Step::Reflect),
            other => Err(format!("unknown step: {other}")),
        }
    }
}

/// Plan-assessed task complexity. Drives fast-path selection for the *next*
/// iteration: a `Simple` verdict collapses plan+execute into one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Complex,
}

// ---------------------------------------------------------------------------
// IterationState
// ---------------------------------------------------------------------------

/// Token usage for a single step or an accumulated total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokensUsed {
    pub input: u64,
    pub output: u64,
}

impl TokensUsed {
    pub fn total(&self) -> u64 {
        self.input + self.output
    }

    pub fn add(&mut self, other: TokensUsed) {
        self.input += other.input;
        self.output += other.output;
    }
}

/// One completed step of one iteration. Serialized to
/// `state/iteration-<i>-<step>.json`; written exactly once at step end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationState {
    pub iteration: u32,
    pub step: Step,
    pub timestamp: String,
    pub input: Value,
    pub output: Value,
    pub tokens_used: TokensUsed,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
}

// ---------------------------------------------------------------------------
// ReflectDecision
// ---------------------------------------------------------------------------

/// The verdict of a reflect step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Continue,
    Complete,
    Error,
}

/// Condensed record of what one iteration did, carried in the reflect output
/// and replayed by the compactor as a one-line summary for old iterations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationSummary {
    #[serde(default)]
    pub iteration: u32,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
}

/// Parsed output of a reflect step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectDecision {
    pub decision: Decision,
    #[serde(default)]
    pub summary: IterationSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Terminal and non-terminal session statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

/// Per-agent lifecycle status within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One agent's entry in the session file. Each writer owns distinct entries
/// (the supervisor owns the leader's; the spawn tool owns the entry it just
/// appended), so last-writer-wins at file granularity is safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSessionEntry {
    pub config: AgentConfig,
    pub pid: u32,
    pub status: AgentStatus,
    pub start_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

/// The single per-workspace session record (`session.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub goal: String,
    pub start_time: String,
    pub workspace: PathBuf,
    pub queue_url: String,
    pub status: SessionStatus,
    pub agents: Vec<AgentSessionEntry>,
}

impl SessionState {
    /// Names of agents currently marked running, excluding `sender`. Used by
    /// the shared fan-out to enumerate broadcast recipients.
    pub fn running_agents_except(&self, sender: &str) -> Vec<String> {
        self.agents
            .iter()
            .filter(|a| a.status == AgentStatus::Running && a.config.name != sender)
            .map(|a| a.config.name.clone())
            .collect()
    }

    /// Mutable access to an agent's entry, keyed by name.
    pub fn entry_mut(&mut self, name: &str) -> Option<&mut AgentSessionEntry> {
        self.agents.iter_mut().find(|a| a.config.name == name)
    }
}

// ---------------------------------------------------------------------------
// File operations
// ---------------------------------------------------------------------------

/// Path of the state file for (iteration, step) under an agent directory.
pub fn iteration_state_path(agent_dir: &Path, iteration: u32, step: Step) -> PathBuf {
    agent_dir
        .join("state")
        .join(format!("iteration-{iteration}-{step}.json"))
}

/// Path of the session file under a workspace.
pub fn session_state_path(workspace: &Path) -> PathBuf {
    workspace.join("session.json")
}

/// Atomically write the state file for (iteration, step).
///
/// The write goes to a temp file in the same directory and is renamed over
/// the target. A transient failure is retried once after ~100 ms before the
/// error surfaces.
pub async fn write_iteration_state(
    agent_dir: &Path,
    iteration: u32,
    step: Step,
    state: &IterationState,
) -> Result<(), StateError> {
    let path = iteration_state_path(agent_dir, iteration, step);
    write_json_with_retry(&path, state).await
}

/// Read the state file for (iteration, step), or `None` if absent.
pub async fn read_iteration_state(
    agent_dir: &Path,
    iteration: u32,
    step: Step,
) -> Result<Option<IterationState>, StateError> {
    let path = iteration_state_path(agent_dir, iteration, step);
    read_json_optional(&path).await
}

/// Scan an agent's state directory and return the maximum (iteration, step)
/// present, under the step order plan < execute < plan-execute < reflect.
///
/// Returns `None` when the directory is missing or holds no parsable state
/// files. Unrelated filenames are ignored.
pub fn last_completed_step(agent_dir: &Path) -> Option<(u32, Step)> {
    let dir = agent_dir.join("state");
    let entries = std::fs::read_dir(dir).ok()?;

    let mut best: Option<(u32, Step)> = None;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(parsed) = parse_state_filename(&name.to_string_lossy()) else {
            continue;
        };
        if best.map_or(true, |cur| parsed.cmp(&cur) == Ordering::Greater) {
            best = Some(parsed);
        }
    }
    best
}

/// Parse `iteration-<i>-<step>.json` into (iteration, step).
fn parse_state_filename(name: &str) -> Option<(u32, Step)> {
    let stem = name.strip_prefix("iteration-")?.strip_suffix(".json")?;
    let (iter_str, step_str) = stem.split_once('-')?;
    let iteration: u32 = iter_str.parse().ok()?;
    let step: Step = step_str.parse().ok()?;
    Some((iteration, step))
}

/// Write the session file with the same durability as iteration state.
pub async fn write_session_state(
    workspace: &Path,
    session: &SessionState,
) -> Result<(), StateError> {
    write_json_with_retry(&session_state_path(workspace), session).await
}

/// Read the session file, or `None` if it does not exist yet.
pub async fn read_session_state(workspace: &Path) -> Result<Option<SessionState>, StateError> {
    read_json_optional(&session_state_path(workspace)).await
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

async fn write_json_with_retry<T: Serialize>(path: &Path, value: &T) -> Result<(), StateError> {
    match write_json_atomic(path, value).await {
        Ok(()) => Ok(()),
        Err(first) => {
            tracing::warn!(path = %path.display(), error = %first, "state write failed, retrying");
            tokio::time::sleep(WRITE_RETRY_DELAY).await;
            write_json_atomic(path, value).await
        }
    }
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StateError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|source| StateError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

    let mut buf = serde_json::to_string_pretty(value).map_err(|e| StateError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    buf.push('\n');

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &buf)
        .await
        .map_err(|source| StateError::Io {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| StateError::Io {
            path: path.to_path_buf(),
            source,
        })
}

async fn read_json_optional<T: for<'de> Deserialize<'de>>(
    path: &Path,
) -> Result<Option<T>, StateError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let value = serde_json::from_str(&contents).map_err(|e| StateError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(Some(value))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_state(iteration: u32, step: Step) -> IterationState {
        IterationState {
            iteration,
            step,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            input: json!("do the thing"),
            output: json!({"result": "done"}),
            tokens_used: TokensUsed {
                input: 120,
                output: 45,
            },
            complexity: Some(Complexity::Complex),
        }
    }

    #[test]
    fn step_order_matches_lifecycle() {
        assert!(Step::Plan < Step::Execute);
        assert!(Step::Execute < Step::PlanExecute);
        assert!(Step::PlanExecute < Step::Reflect);
    }

    #[test]
    fn step_display_round_trips() {
        for step in [Step::Plan, Step::Execute, Step::PlanExecute, Step::Reflect] {
            let parsed: Step = step.to_string().parse().unwrap();
            assert_eq!(parsed, step);
        }
    }

    #[tokio::test]
    async fn iteration_state_round_trips() {
        let tmp = TempDir::new().unwrap();
        let agent_dir = tmp.path().join("alice");

        let state = test_state(3, Step::Execute);
        write_iteration_state(&agent_dir, 3, Step::Execute, &state)
            .await
            .unwrap();

        let loaded = read_iteration_state(&agent_dir, 3, Step::Execute)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.iteration, 3);
        assert_eq!(loaded.step, Step::Execute);
        assert_eq!(loaded.input, state.input);
        assert_eq!(loaded.output, state.output);
        assert_eq!(loaded.tokens_used, state.tokens_used);
    }

    #[tokio::test]
    async fn read_missing_state_returns_none() {
        let tmp = TempDir::new().unwrap();
        let result = read_iteration_state(tmp.path(), 1, Step::Plan).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn last_completed_step_finds_maximum() {
        let tmp = TempDir::new().unwrap();
        let agent_dir = tmp.path().join("alice");

        for (i, step) in [
            (1, Step::Plan),
            (1, Step::Execute),
            (1, Step::Reflect),
            (2, Step::Plan),
            (2, Step::Execute),
        ] {
            write_iteration_state(&agent_dir, i, step, &test_state(i, step))
                .await
                .unwrap();
        }

        assert_eq!(last_completed_step(&agent_dir), Some((2, Step::Execute)));
    }

    #[tokio::test]
    async fn last_completed_step_prefers_reflect_within_iteration() {
        let tmp = TempDir::new().unwrap();
        let agent_dir = tmp.path().join("alice");

        write_iteration_state(&agent_dir, 4, Step::PlanExecute, &test_state(4, Step::PlanExecute))
            .await
            .unwrap();
        write_iteration_state(&agent_dir, 4, Step::Reflect, &test_state(4, Step::Reflect))
            .await
            .unwrap();

        assert_eq!(last_completed_step(&agent_dir), Some((4, Step::Reflect)));
    }

    #[test]
    fn last_completed_step_missing_dir_is_none() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(last_completed_step(&tmp.path().join("ghost")), None);
    }

    #[test]
    fn state_filename_parsing_ignores_noise() {
        assert_eq!(parse_state_filename("iteration-7-plan.json"), Some((7, Step::Plan)));
        assert_eq!(
            parse_state_filename("iteration-12-plan-execute.json"),
            Some((12, Step::PlanExecute))
        );
        assert_eq!(parse_state_filename("iteration-x-plan.json"), None);
        assert_eq!(parse_state_filename("notes.txt"), None);
        assert_eq!(parse_state_filename("iteration-3-dream.json"), None);
    }

    #[test]
    fn reflect_decision_parses_minimal_json() {
        let parsed: ReflectDecision =
            serde_json::from_str(r#"{"decision": "complete"}"#).unwrap();
        assert_eq!(parsed.decision, Decision::Complete);
        assert!(parsed.next_message.is_none());
        assert!(parsed.cancelled.is_none());
    }

    #[test]
    fn reflect_decision_parses_full_json() {
        let raw = r#"{
            "decision": "continue",
            "summary": {
                "iteration": 2,
                "plan": "write the parser",
                "outcome": "parser written",
                "files_changed": ["src/parser.rs"],
                "decisions": ["used recursive descent"]
            },
            "next_message": "now write tests"
        }"#;
        let parsed: ReflectDecision = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.decision, Decision::Continue);
        assert_eq!(parsed.summary.iteration, 2);
        assert_eq!(parsed.summary.files_changed, vec!["src/parser.rs"]);
        assert_eq!(parsed.next_message.as_deref(), Some("now write tests"));
    }
}
