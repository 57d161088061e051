//! The supervisor process: spawns the leader, watches every agent process,
//! resurrects crashed agents from their checkpoints, and finalizes the
//! session.
//!
//! Single-threaded cooperative loop multiplexed over three activities: the
//! `main` queue (waiting for `all-complete`), child-process polling, and
//! session reconciliation. Workers the leader spawned are adopted through a
//! lightweight pid liveness watcher since their exit codes are not visible
//! here. Crash recovery is entirely disk-driven: a dead agent's resume token
//! is derived from its last completed state file.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};

use crate::agent::compactor::truncate_chars;
use crate::bus::{MessageBus, MessageKind, QueueMessage, MAIN_ADDR};
use crate::config::{
    AgentConfig, SupervisorConfig, AGENT_CONFIG_ENV, LEADER_BUDGET_MULTIPLIER,
    LEADER_MAX_TOOL_TURNS, LEADER_NAME, RESUME_FROM_ENV,
};
use crate::gitops;
use crate::state::{
    self, AgentSessionEntry, AgentStatus, Decision, ReflectDecision, SessionState, SessionStatus,
    Step,
};

/// Queue receive timeout; also paces child polling and reconciliation.
const RECEIVE_TIMEOUT_SECS: u64 = 5;
/// Grace period between SIGTERM and SIGKILL during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct Supervisor {
    config: SupervisorConfig,
    bus: MessageBus,
    /// Agents this process spawned, keyed by name. Exit codes visible.
    children: HashMap<String, Child>,
    /// Leader-spawned workers adopted by pid liveness, keyed by name.
    adopted: HashMap<String, u32>,
}

/// Run a supervisor session to completion.
pub async fn run(config: SupervisorConfig) -> Result<()> {
    let bus = MessageBus::connect(&config.queue_url)
        .await
        .with_context(|| format!("connect to queue at {}", config.queue_url))?;

    let mut supervisor = Supervisor {
        config,
        bus,
        children: HashMap::new(),
        adopted: HashMap::new(),
    };

    if let Some(resume_path) = supervisor.config.resume_from.clone() {
        supervisor.resume_session(&resume_path).await?;
    } else {
        supervisor.start_session().await?;
    }
    supervisor.monitor().await
}

impl Supervisor {
    // -- Startup ---------------------------------------------------------------

    async fn start_session(&mut self) -> Result<()> {
        let workspace = self.config.workspace.clone();
        tokio::fs::create_dir_all(workspace.join("logs"))
            .await
            .context("create logs directory")?;
        gitops::init_leader_repo(&workspace.join(LEADER_NAME))
            .await
            .context("initialize leader repository")?;

        // Queue keys are session-scoped; disk state is the source of truth.
        let flushed = self.bus.flush_all().await?;
        tracing::info!(flushed, "queue flushed");

        let session = SessionState {
            goal: self.config.goal.clone(),
            start_time: Utc::now().to_rfc3339(),
            workspace: workspace.clone(),
            queue_url: self.config.queue_url.clone(),
            status: SessionStatus::Running,
            agents: Vec::new(),
        };
        state::write_session_state(&workspace, &session).await?;

        let leader = self.leader_agent_config();
        let child = self.spawn_agent(&leader, None)?;
        let pid = child.id().context("leader pid unavailable")?;
        self.children.insert(leader.name.clone(), child);

        // The supervisor owns the leader's session entry.
        let mut session = state::read_session_state(&workspace)
            .await?
            .expect("session just written");
        session.agents.push(AgentSessionEntry {
            config: leader.clone(),
            pid,
            status: AgentStatus::Running,
            start_time: Utc::now().to_rfc3339(),
            end_time: None,
        });
        state::write_session_state(&workspace, &session).await?;

        let task = QueueMessage::new(
            MAIN_ADDR,
            LEADER_NAME,
            MessageKind::Task,
            self.config.goal.clone(),
        );
        self.bus.send(&task, Some(&workspace)).await?;

        tracing::info!(pid, goal = %self.config.goal, "leader spawned");
        Ok(())
    }

    fn leader_agent_config(&self) -> AgentConfig {
        AgentConfig {
            name: LEADER_NAME.to_string(),
            role: "leader".to_string(),
            purpose: format!(
                "Achieve the user goal by decomposing it, spawning and coordinating worker \
                 agents, merging their branches, and verifying the result. Goal: {}",
                self.config.goal
            ),
            allowed_tools: [
                "spawn",
                "send",
                "git",
                "file-read",
                "file-write",
                "bash",
                "web-search",
                "web-fetch",
                "create-tool",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            model: self.config.leader_model.clone(),
            token_budget: self.config.worker_budget * LEADER_BUDGET_MULTIPLIER,
            max_iterations: self.config.max_iterations,
            max_tool_turns: LEADER_MAX_TOOL_TURNS,
            workspace: self.config.workspace.clone(),
            queue_url: self.config.queue_url.clone(),
        }
    }

    /// Spawn an agent subprocess with the serialized config (and optionally a
    /// resume token) in its environment. stdout/stderr are inherited.
    fn spawn_agent(&self, agent: &AgentConfig, resume_token: Option<&str>) -> Result<Child> {
        let exe = std::env::current_exe().context("resolve current executable")?;
        let mut cmd = Command::new(exe);
        cmd.env(AGENT_CONFIG_ENV, serde_json::to_string(agent)?)
            .env("SEALTEAM_MAX_AGENTS", self.config.max_workers.to_string())
            .env("SEALTEAM_DEFAULT_BUDGET", self.config.worker_budget.to_string())
            .env(
                "SEALTEAM_DEFAULT_MAX_ITERATIONS",
                self.config.max_iterations.to_string(),
            )
            .env("SEALTEAM_TEAM_MODEL", &self.config.team_model)
            .env("SEALTEAM_LEADER_MODEL", &self.config.leader_model);
        if let Some(token) = resume_token {
            cmd.env(RESUME_FROM_ENV, token);
        }
        cmd.spawn().context("spawn agent process")
    }

    // -- Monitor loop ----------------------------------------------------------

    async fn monitor(&mut self) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt()).context("install SIGINT handler")?;
        let bus = self.bus.clone();

        loop {
            tokio::select! {
                received = bus.receive(MAIN_ADDR, RECEIVE_TIMEOUT_SECS) => {
                    match received? {
                        Some(msg) if msg.kind == MessageKind::AllComplete => {
                            tracing::info!(from = %msg.from, "all-complete received");
                            self.finish_session(SessionStatus::Completed).await?;
                            self.await_children().await;
                            self.print_summary().await;
                            return Ok(());
                        }
                        Some(msg) => {
                            tracing::info!(
                                from = %msg.from,
                                "supervisor message ({:?}): {}",
                                msg.kind,
                                truncate_chars(&msg.content, 200)
                            );
                        }
                        None => {}
                    }
                }
                _ = sigterm.recv() => return self.graceful_shutdown().await,
                _ = sigint.recv() => return self.graceful_shutdown().await,
            }

            self.poll_children().await?;
            self.reconcile().await?;

            if self.children.is_empty() && self.adopted.is_empty() {
                tracing::info!("no tracked agents remain; finishing");
                self.print_summary().await;
                return Ok(());
            }
        }
    }

    /// Reap exited supervisor-spawned children and react to their exits.
    async fn poll_children(&mut self) -> Result<()> {
        let mut exited = Vec::new();
        for (name, child) in self.children.iter_mut() {
            if let Some(status) = child.try_wait().context("poll child")? {
                exited.push((name.clone(), status));
            }
        }

        for (name, status) in exited {
            self.children.remove(&name);
            if status.success() {
                tracing::info!(agent = %name, "agent exited cleanly");
                self.mark_agent(&name, AgentStatus::Completed).await?;
                if name == LEADER_NAME {
                    // Fallback path: a clean leader exit completes the session
                    // even if the all-complete message was lost.
                    self.finish_session(SessionStatus::Completed).await?;
                }
            } else {
                self.handle_crash(&name, status.code()).await?;
            }
        }
        Ok(())
    }

    /// A tracked agent crashed: either it already reached a completing
    /// reflect (mark completed), or it is respawned from its last completed
    /// step.
    async fn handle_crash(&mut self, name: &str, code: Option<i32>) -> Result<()> {
        let agent_dir = self.config.workspace.join(name);
        tracing::warn!(agent = %name, ?code, "agent exited abnormally");

        let last = state::last_completed_step(&agent_dir);
        if let Some((iteration, Step::Reflect)) = last {
            if reflect_completed(&agent_dir, iteration).await {
                tracing::info!(agent = %name, "crash after completion; marking completed");
                self.mark_agent(name, AgentStatus::Completed).await?;
                return Ok(());
            }
        }

        let Some(entry_config) = self.session_agent_config(name).await? else {
            tracing::error!(agent = %name, "no session entry for crashed agent; marking failed");
            self.mark_agent(name, AgentStatus::Failed).await?;
            return Ok(());
        };

        let resume_token = last.map(|(i, step)| format!("{i}-{step}"));
        let child = self.spawn_agent(&entry_config, resume_token.as_deref())?;
        let pid = child.id().context("respawned agent pid unavailable")?;
        tracing::info!(agent = %name, pid, resume = ?resume_token, "agent respawned");

        self.children.insert(name.to_string(), child);
        self.update_agent_pid(name, pid).await?;
        Ok(())
    }

    /// Reconcile session entries with the tracked set: adopt leader-spawned
    /// workers that are alive, and settle entries whose pid has died.
    async fn reconcile(&mut self) -> Result<()> {
        let workspace = self.config.workspace.clone();
        let Some(mut session) = state::read_session_state(&workspace).await? else {
            return Ok(());
        };

        let mut changed = false;
        for entry in session.agents.iter_mut() {
            let name = entry.config.name.clone();
            if self.children.contains_key(&name) {
                continue;
            }
            if entry.status != AgentStatus::Running {
                self.adopted.remove(&name);
                continue;
            }

            let alive = pid_alive(entry.pid);
            if alive {
                if self.adopted.insert(name.clone(), entry.pid).is_none() {
                    tracing::info!(agent = %name, pid = entry.pid, "adopted leader-spawned worker");
                }
                continue;
            }

            // The pid is gone and nothing tracks it; completed iff its final
            // reflect says so, otherwise failed.
            self.adopted.remove(&name);
            let agent_dir = workspace.join(&name);
            let completed = match state::last_completed_step(&agent_dir) {
                Some((iteration, Step::Reflect)) => reflect_completed(&agent_dir, iteration).await,
                _ => false,
            };
            entry.status = if completed {
                AgentStatus::Completed
            } else {
                AgentStatus::Failed
            };
            entry.end_time = Some(Utc::now().to_rfc3339());
            changed = true;
            tracing::info!(agent = %name, status = ?entry.status, "settled dead agent");
        }

        if changed {
            state::write_session_state(&workspace, &session).await?;
        }
        Ok(())
    }

    // -- Shutdown --------------------------------------------------------------

    /// SIGINT/SIGTERM: terminate every agent, escalating to SIGKILL after the
    /// grace period, then mark the session failed and running agents
    /// cancelled.
    async fn graceful_shutdown(&mut self) -> Result<()> {
        tracing::info!("shutdown signal received; terminating agents");

        let mut pids: Vec<u32> = self
            .children
            .values()
            .filter_map(|child| child.id())
            .collect();
        if let Ok(Some(session)) = state::read_session_state(&self.config.workspace).await {
            for entry in &session.agents {
                if entry.status == AgentStatus::Running && !pids.contains(&entry.pid) {
                    pids.push(entry.pid);
                }
            }
        }

        for pid in &pids {
            let _ = kill(Pid::from_raw(*pid as i32), Signal::SIGTERM);
        }
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        for pid in &pids {
            if pid_alive(*pid) {
                let _ = kill(Pid::from_raw(*pid as i32), Signal::SIGKILL);
            }
        }
        for (_, mut child) in self.children.drain() {
            let _ = child.wait().await;
        }

        if let Ok(Some(mut session)) = state::read_session_state(&self.config.workspace).await {
            session.status = SessionStatus::Failed;
            for entry in session.agents.iter_mut() {
                if entry.status == AgentStatus::Running {
                    entry.status = AgentStatus::Cancelled;
                    entry.end_time = Some(Utc::now().to_rfc3339());
                }
            }
            let _ = state::write_session_state(&self.config.workspace, &session).await;
        }

        self.print_summary().await;
        bail!("session terminated by signal")
    }

    // -- Resume ----------------------------------------------------------------

    /// Recover an interrupted session from its workspace: skip settled
    /// agents, adopt live pids, respawn dead ones from their checkpoints.
    async fn resume_session(&mut self, workspace: &Path) -> Result<()> {
        let mut session = state::read_session_state(workspace)
            .await?
            .with_context(|| format!("no session.json under {}", workspace.display()))?;

        self.config.workspace = workspace.to_path_buf();
        self.config.goal = session.goal.clone();
        session.status = SessionStatus::Running;

        for entry in session.agents.iter_mut() {
            let name = entry.config.name.clone();
            match entry.status {
                AgentStatus::Completed | AgentStatus::Cancelled => continue,
                _ => {}
            }

            if pid_alive(entry.pid) {
                self.adopted.insert(name.clone(), entry.pid);
                entry.status = AgentStatus::Running;
                tracing::info!(agent = %name, pid = entry.pid, "resume: agent still alive");
                continue;
            }

            let agent_dir = workspace.join(&name);
            let resume_token =
                state::last_completed_step(&agent_dir).map(|(i, step)| format!("{i}-{step}"));
            let child = self.spawn_agent(&entry.config, resume_token.as_deref())?;
            let pid = child.id().context("resumed agent pid unavailable")?;
            tracing::info!(agent = %name, pid, resume = ?resume_token, "resume: agent respawned");

            self.children.insert(name, child);
            entry.pid = pid;
            entry.status = AgentStatus::Running;
            entry.end_time = None;
        }

        state::write_session_state(workspace, &session).await?;
        Ok(())
    }

    // -- Session bookkeeping ---------------------------------------------------

    async fn finish_session(&self, status: SessionStatus) -> Result<()> {
        let Some(mut session) = state::read_session_state(&self.config.workspace).await? else {
            return Ok(());
        };
        session.status = status;
        if let Some(leader) = session.entry_mut(LEADER_NAME) {
            if leader.status == AgentStatus::Running {
                leader.status = AgentStatus::Completed;
                leader.end_time = Some(Utc::now().to_rfc3339());
            }
        }
        state::write_session_state(&self.config.workspace, &session).await?;
        Ok(())
    }

    async fn mark_agent(&self, name: &str, status: AgentStatus) -> Result<()> {
        let Some(mut session) = state::read_session_state(&self.config.workspace).await? else {
            return Ok(());
        };
        if let Some(entry) = session.entry_mut(name) {
            entry.status = status;
            entry.end_time = Some(Utc::now().to_rfc3339());
        }
        state::write_session_state(&self.config.workspace, &session).await?;
        Ok(())
    }

    async fn update_agent_pid(&self, name: &str, pid: u32) -> Result<()> {
        let Some(mut session) = state::read_session_state(&self.config.workspace).await? else {
            return Ok(());
        };
        if let Some(entry) = session.entry_mut(name) {
            entry.pid = pid;
            entry.status = AgentStatus::Running;
            entry.end_time = None;
        }
        state::write_session_state(&self.config.workspace, &session).await?;
        Ok(())
    }

    async fn await_children(&mut self) {
        for (_, mut child) in self.children.drain() {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await;
        }
        self.adopted.clear();
    }

    /// Final session summary: one line per agent, terminal failures flagged.
    async fn print_summary(&self) {
        let Ok(Some(session)) = state::read_session_state(&self.config.workspace).await else {
            return;
        };
        println!("\nSession {:?} - {}", session.status, session.goal);
        for entry in &session.agents {
            let flag = match entry.status {
                AgentStatus::Failed | AgentStatus::Cancelled => " <-- attention",
                _ => "",
            };
            println!(
                "  {:<12} {:<12} {:?}{flag}",
                entry.config.name, entry.config.role, entry.status
            );
        }
    }

    async fn session_agent_config(&self, name: &str) -> Result<Option<AgentConfig>> {
        let session = state::read_session_state(&self.config.workspace).await?;
        Ok(session.and_then(|s| {
            s.agents
                .iter()
                .find(|a| a.config.name == name)
                .map(|a| a.config.clone())
        }))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Probe a pid with the null signal.
fn pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Whether an agent's reflect state for `iteration` carries a completing
/// decision.
async fn reflect_completed(agent_dir: &Path, iteration: u32) -> bool {
    match state::read_iteration_state(agent_dir, iteration, Step::Reflect).await {
        Ok(Some(reflect)) => serde_json::from_value::<ReflectDecision>(reflect.output)
            .map(|d| d.decision == Decision::Complete)
            .unwrap_or(false),
        _ => false,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{IterationState, TokensUsed};
    use serde_json::json;
    use tempfile::TempDir;

    async fn write_reflect(agent_dir: &Path, iteration: u32, decision: &str) {
        let reflect = IterationState {
            iteration,
            step: Step::Reflect,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            input: json!("reflect"),
            output: json!({"decision": decision, "summary": {
                "iteration": iteration, "plan": "p", "outcome": "o",
                "files_changed": [], "decisions": []
            }}),
            tokens_used: TokensUsed::default(),
            complexity: None,
        };
        state::write_iteration_state(agent_dir, iteration, Step::Reflect, &reflect)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reflect_completed_detects_complete_decision() {
        let tmp = TempDir::new().unwrap();
        let agent_dir = tmp.path().join("alice");

        write_reflect(&agent_dir, 3, "complete").await;
        assert!(reflect_completed(&agent_dir, 3).await);
    }

    #[tokio::test]
    async fn reflect_completed_rejects_continue_and_missing() {
        let tmp = TempDir::new().unwrap();
        let agent_dir = tmp.path().join("alice");

        write_reflect(&agent_dir, 2, "continue").await;
        assert!(!reflect_completed(&agent_dir, 2).await);
        assert!(!reflect_completed(&agent_dir, 9).await);
    }

    #[test]
    fn pid_liveness_probe() {
        assert!(pid_alive(std::process::id()));
        // The maximum representable pid cannot belong to a live process.
        assert!(!pid_alive(i32::MAX as u32));
    }

    #[test]
    fn resume_token_format_matches_state_filenames() {
        let token = format!("{}-{}", 4, Step::PlanExecute);
        assert_eq!(token, "4-plan-execute");
        let (i, step) = crate::agent::life_loop::parse_resume_token(&token).unwrap();
        assert_eq!((i, step), (4, Step::PlanExecute));
    }
}
