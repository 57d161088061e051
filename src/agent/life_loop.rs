//! The agent life loop: a plan/execute/reflect state machine with an
//! adaptive fast path, driven by queue messages and checkpointed to disk
//! after every step.
//!
//! Standard path: PLAN -> EXECUTE -> REFLECT (three inference calls).
//! Fast path, taken when the previous iteration judged its work simple:
//! PLAN_EXECUTE -> REFLECT (two calls).
//!
//! Every iteration starts with the same preamble: budget check, iteration
//! cap, a 5-second blocking receive (cancel handled immediately), idle-cycle
//! accounting, a dynamic-tool rescan, and a context-pressure check. Every
//! step writes exactly one state file before the loop moves on, so a crashed
//! agent resumes from its last completed step via the `RESUME_FROM` token.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Value};

use crate::bus::{MessageBus, MessageKind, QueueMessage, MAIN_ADDR};
use crate::config::{self, AgentConfig, LEADER_NAME};
use crate::gitops;
use crate::llm::{LlmClient, Usage};
use crate::logging::AgentLogger;
use crate::state::{
    self, Complexity, Decision, IterationState, IterationSummary, ReflectDecision, Step,
    TokensUsed,
};
use crate::tools::{ToolContext, ToolHost};

use super::compactor::{truncate_chars, Compactor, Pressure};
use super::prompts;
use super::subloop::{self, run_tool_loop};

/// Consecutive empty receives before the agent asks the leader for direction.
pub const MAX_IDLE_CYCLES: u32 = 30;
/// Blocking receive timeout at the top of each iteration.
const RECEIVE_TIMEOUT_SECS: u64 = 5;
/// Consecutive error reflections before one error message is escalated.
const SELF_RECOVERY_LIMIT: u32 = 3;

pub struct LifeLoop {
    config: AgentConfig,
    agent_dir: PathBuf,
    bus: MessageBus,
    llm: Arc<dyn LlmClient>,
    host: ToolHost,
    compactor: Compactor,
    logger: AgentLogger,
    /// In-memory iteration history, kept in (iteration, step) order.
    states: Vec<IterationState>,
    usage_total: TokensUsed,
    iteration: u32,
    last_complexity: Complexity,
    recovery_attempts: u32,
    idle_cycles: u32,
}

impl LifeLoop {
    /// Build a life loop for one agent. Applies the `RESUME_FROM` token from
    /// the environment when present.
    pub async fn new(
        config: AgentConfig,
        bus: MessageBus,
        llm: Arc<dyn LlmClient>,
    ) -> Result<Self> {
        let resume = config::resume_token_from_env();
        Self::with_resume(config, bus, llm, resume.as_deref()).await
    }

    /// Build a life loop with an explicit resume token (or none).
    pub async fn with_resume(
        config: AgentConfig,
        bus: MessageBus,
        llm: Arc<dyn LlmClient>,
        resume_token: Option<&str>,
    ) -> Result<Self> {
        let agent_dir = config.agent_dir();
        tokio::fs::create_dir_all(agent_dir.join("state"))
            .await
            .with_context(|| format!("create state dir under {}", agent_dir.display()))?;

        let logger = AgentLogger::new(&config.workspace, &config.name)?;
        let mut host = ToolHost::new(ToolContext {
            config: config.clone(),
            agent_dir: agent_dir.clone(),
            bus: bus.clone(),
        });
        if let Err(e) = host.scan_dynamic(&config.workspace).await {
            tracing::warn!(error = %e, "initial dynamic tool scan failed");
        }

        let compactor = Compactor::new(&config.model);
        let mut life_loop = Self {
            agent_dir,
            bus,
            llm,
            host,
            compactor,
            logger,
            states: Vec::new(),
            usage_total: TokensUsed::default(),
            iteration: 1,
            last_complexity: Complexity::Complex,
            recovery_attempts: 0,
            idle_cycles: 0,
            config,
        };

        if let Some(token) = resume_token {
            life_loop.resume_from(token).await?;
        }
        Ok(life_loop)
    }

    /// Restore in-memory history from disk and pick the resume point.
    ///
    /// A token ending in `reflect` means the iteration finished: resume at
    /// the next one, with the last complexity taken from that iteration's
    /// plan state. Any other step means the iteration was cut short: re-run
    /// it from plan, treating it as complex.
    async fn resume_from(&mut self, token: &str) -> Result<()> {
        let (last_iter, last_step) =
            parse_resume_token(token).with_context(|| format!("bad resume token '{token}'"))?;

        for i in 1..=last_iter {
            for step in [Step::Plan, Step::Execute, Step::PlanExecute, Step::Reflect] {
                if let Some(loaded) = state::read_iteration_state(&self.agent_dir, i, step).await?
                {
                    self.usage_total.add(loaded.tokens_used);
                    self.states.push(loaded);
                }
            }
        }

        if last_step == Step::Reflect {
            self.iteration = last_iter + 1;
            self.last_complexity = self
                .states
                .iter()
                .filter(|s| s.iteration == last_iter)
                .find_map(|s| s.complexity)
                .unwrap_or(Complexity::Complex);
        } else {
            // Partial iteration: drop its fragments and re-run it from plan.
            self.states.retain(|s| s.iteration < last_iter);
            self.iteration = last_iter;
            self.last_complexity = Complexity::Complex;
        }

        self.logger.log(&format!(
            "resumed from {token}; continuing at iteration {}",
            self.iteration
        ));
        Ok(())
    }

    /// Run iterations until completion, cancellation, budget exhaustion, or
    /// the iteration cap.
    pub async fn run(&mut self) -> Result<()> {
        self.logger.log(&format!(
            "agent '{}' ({}) starting at iteration {}",
            self.config.name, self.config.role, self.iteration
        ));

        loop {
            // -- Preamble -----------------------------------------------------
            if self.usage_total.total() >= self.config.token_budget {
                return self.budget_exhausted_exit().await;
            }
            if self.iteration > self.config.max_iterations {
                self.logger.log(&format!(
                    "iteration cap reached ({}); exiting",
                    self.config.max_iterations
                ));
                return Ok(());
            }

            let mut current_messages = Vec::new();
            match self
                .bus
                .receive(&self.config.name, RECEIVE_TIMEOUT_SECS)
                .await?
            {
                Some(msg) if msg.kind == MessageKind::Cancel => {
                    return self.handle_cancel(&msg).await;
                }
                Some(msg) => {
                    self.idle_cycles = 0;
                    self.logger
                        .log(&format!("received {} from {}", kind_str(msg.kind), msg.from));
                    current_messages.push(msg);
                }
                None => {
                    // The blocking receive came up empty; make sure a cancel
                    // is not buried behind nothing, and put back anything else.
                    if let Some(other) = self.bus.receive_non_blocking(&self.config.name).await? {
                        if other.kind == MessageKind::Cancel {
                            return self.handle_cancel(&other).await;
                        }
                        self.bus
                            .send(&other, Some(&self.config.workspace))
                            .await?;
                    }
                    self.idle_cycles += 1;
                    if self.idle_cycles >= MAX_IDLE_CYCLES {
                        let status = QueueMessage::new(
                            &self.config.name,
                            self.report_target(),
                            MessageKind::Status,
                            format!(
                                "Idle for {MAX_IDLE_CYCLES} receive cycles; requesting direction."
                            ),
                        );
                        self.bus.send(&status, Some(&self.config.workspace)).await?;
                        self.idle_cycles = 0;
                    }
                }
            }

            if let Err(e) = self.host.scan_dynamic(&self.config.workspace).await {
                tracing::warn!(error = %e, "dynamic tool rescan failed");
            }

            if self.compactor.check_compaction() == Pressure::Hard {
                self.states = self.compactor.compact(&self.states, self.iteration);
                self.logger.log("hard context pressure: compacted iteration history");
            }

            // -- Steps --------------------------------------------------------
            let decision = match self.run_steps(&current_messages).await {
                Ok(decision) => decision,
                Err(e) => {
                    // A fatal step error (e.g. non-retryable API failure) is
                    // absorbed at the iteration boundary as an error decision
                    // so self-recovery applies.
                    self.logger
                        .log(&format!("iteration {} failed: {e:#}", self.iteration));
                    let decision = ReflectDecision {
                        decision: Decision::Error,
                        summary: IterationSummary {
                            iteration: self.iteration,
                            plan: String::new(),
                            outcome: format!("iteration aborted: {e}"),
                            files_changed: Vec::new(),
                            decisions: Vec::new(),
                        },
                        next_message: None,
                        error_details: Some(format!("{e:#}")),
                        cancelled: None,
                    };
                    self.write_state(
                        Step::Reflect,
                        json!("(step failure)"),
                        serde_json::to_value(&decision)?,
                        TokensUsed::default(),
                        None,
                    )
                    .await?;
                    decision
                }
            };

            // -- Decide -------------------------------------------------------
            match decision.decision {
                Decision::Continue => {
                    self.recovery_attempts = 0;
                    if let Some(next) = &decision.next_message {
                        let note = QueueMessage::new(
                            &self.config.name,
                            &self.config.name,
                            MessageKind::Task,
                            next.clone(),
                        );
                        self.bus.send(&note, Some(&self.config.workspace)).await?;
                    }
                }
                Decision::Complete => return self.complete_exit(&decision).await,
                Decision::Error => {
                    self.recovery_attempts += 1;
                    let detail = decision
                        .error_details
                        .clone()
                        .unwrap_or_else(|| "unspecified error".to_string());
                    if self.recovery_attempts >= SELF_RECOVERY_LIMIT {
                        let escalation = QueueMessage::new(
                            &self.config.name,
                            self.report_target(),
                            MessageKind::Error,
                            format!(
                                "{SELF_RECOVERY_LIMIT} consecutive recovery attempts failed: {detail}"
                            ),
                        );
                        self.bus
                            .send(&escalation, Some(&self.config.workspace))
                            .await?;
                        self.recovery_attempts = 0;
                    } else {
                        let retry = QueueMessage::new(
                            &self.config.name,
                            &self.config.name,
                            MessageKind::Task,
                            format!("Retry after error: {detail}"),
                        );
                        self.bus.send(&retry, Some(&self.config.workspace)).await?;
                    }
                }
            }

            // Soft pressure is cheap to relieve between iterations; hard
            // pressure is handled in the preamble before the next call.
            if self.compactor.check_compaction() == Pressure::Soft {
                self.states = self.compactor.compact(&self.states, self.iteration);
            }

            self.iteration += 1;
        }
    }

    /// One iteration's worth of step calls, choosing the path from the
    /// previous iteration's complexity verdict.
    async fn run_steps(&mut self, current: &[QueueMessage]) -> Result<ReflectDecision> {
        let standard = self.iteration == 1 || self.last_complexity == Complexity::Complex;

        if standard {
            let (plan, complexity) = self.plan_step(current).await?;
            self.last_complexity = complexity;
            self.execute_step(&plan).await?;
        } else {
            self.last_complexity = self.plan_execute_step(current).await?;
        }

        self.reflect_step().await
    }

    // -- Step calls -----------------------------------------------------------

    async fn plan_step(&mut self, current: &[QueueMessage]) -> Result<(String, Complexity)> {
        let system = prompts::plan_system(&self.config, &self.config.allowed_tools);
        let mut messages = self
            .compactor
            .assemble(&self.states, current, self.iteration);
        subloop::ensure_user_bracketing(&mut messages);

        let response = self.llm.infer(&system, &messages, &[]).await?;
        self.note_usage(response.usage);

        let (plan, complexity) = parse_plan(&response.text());
        self.write_state(
            Step::Plan,
            render_input(current),
            json!({"plan": plan, "complexity": complexity}),
            tokens(response.usage),
            Some(complexity),
        )
        .await?;

        self.logger.log(&format!(
            "iteration {}: plan ({}): {}",
            self.iteration,
            complexity_str(complexity),
            truncate_chars(&plan, 120)
        ));
        Ok((plan, complexity))
    }

    async fn execute_step(&mut self, plan: &str) -> Result<String> {
        let system = prompts::execute_system(&self.config, plan);
        let messages = self.compactor.assemble(&self.states, &[], self.iteration);
        let tools = self.tool_values();

        let result = run_tool_loop(
            self.llm.as_ref(),
            &self.host,
            &system,
            messages,
            &tools,
            self.config.max_tool_turns,
        )
        .await?;
        self.note_usage(result.usage);

        self.write_state(
            Step::Execute,
            json!(plan),
            json!({"result": result.text}),
            tokens(result.usage),
            None,
        )
        .await?;

        self.logger.log(&format!(
            "iteration {}: executed in {} tool turns",
            self.iteration, result.turns
        ));
        Ok(result.text)
    }

    async fn plan_execute_step(&mut self, current: &[QueueMessage]) -> Result<Complexity> {
        let system = prompts::plan_execute_system(&self.config);
        let messages = self
            .compactor
            .assemble(&self.states, current, self.iteration);
        let tools = self.tool_values();

        let result = run_tool_loop(
            self.llm.as_ref(),
            &self.host,
            &system,
            messages,
            &tools,
            self.config.max_tool_turns,
        )
        .await?;
        self.note_usage(result.usage);

        let next_complexity = parse_next_complexity(&result.text);
        self.write_state(
            Step::PlanExecute,
            render_input(current),
            json!({"result": result.text, "complexity": next_complexity}),
            tokens(result.usage),
            Some(next_complexity),
        )
        .await?;

        self.logger.log(&format!(
            "iteration {}: fast path executed ({} turns, next {})",
            self.iteration,
            result.turns,
            complexity_str(next_complexity)
        ));
        Ok(next_complexity)
    }

    async fn reflect_step(&mut self) -> Result<ReflectDecision> {
        let spent = self.usage_total.total() as f64;
        let remaining_ratio = (1.0 - spent / self.config.token_budget as f64).max(0.0);
        let system = prompts::reflect_system(&self.config, remaining_ratio);

        let mut messages = self.compactor.assemble(&self.states, &[], self.iteration);
        subloop::ensure_user_bracketing(&mut messages);

        let response = self.llm.infer(&system, &messages, &[]).await?;
        self.note_usage(response.usage);

        let decision = parse_reflect(&response.text());
        self.write_state(
            Step::Reflect,
            json!("reflect"),
            serde_json::to_value(&decision)?,
            tokens(response.usage),
            None,
        )
        .await?;

        self.logger.log(&format!(
            "iteration {}: reflect -> {:?}",
            self.iteration, decision.decision
        ));
        Ok(decision)
    }

    // -- Terminal paths ---------------------------------------------------------

    /// Cancel: write a final reflect state, best-effort commit in-progress
    /// work, emit a completion message encoding the cancellation, and exit.
    async fn handle_cancel(&mut self, msg: &QueueMessage) -> Result<()> {
        let reason = if msg.content.is_empty() {
            "cancelled by request".to_string()
        } else {
            msg.content.clone()
        };
        self.logger.log(&format!("cancelled: {reason}"));

        let decision = ReflectDecision {
            decision: Decision::Complete,
            summary: IterationSummary {
                iteration: self.iteration,
                plan: "(cancelled)".to_string(),
                outcome: format!("cancelled: {reason}"),
                files_changed: Vec::new(),
                decisions: Vec::new(),
            },
            next_message: None,
            error_details: None,
            cancelled: Some(true),
        };
        self.write_state(
            Step::Reflect,
            json!("cancel"),
            serde_json::to_value(&decision)?,
            TokensUsed::default(),
            None,
        )
        .await?;

        if let Err(e) = gitops::commit_all(&self.agent_dir, "Checkpoint: cancelled").await {
            tracing::debug!(error = %e, "cancellation checkpoint commit skipped");
        }

        let out = QueueMessage::new(
            &self.config.name,
            self.report_target(),
            MessageKind::Complete,
            json!({"cancelled": true, "reason": reason}).to_string(),
        );
        self.bus.send(&out, Some(&self.config.workspace)).await?;
        Ok(())
    }

    async fn complete_exit(&mut self, decision: &ReflectDecision) -> Result<()> {
        let content = serde_json::to_string(&decision.summary)?;
        let (target, kind) = if self.config.is_leader() {
            (MAIN_ADDR, MessageKind::AllComplete)
        } else {
            (LEADER_NAME, MessageKind::Complete)
        };
        let out = QueueMessage::new(&self.config.name, target, kind, content);
        self.bus.send(&out, Some(&self.config.workspace)).await?;
        self.logger.log("purpose complete; exiting");
        Ok(())
    }

    async fn budget_exhausted_exit(&mut self) -> Result<()> {
        self.logger.log(&format!(
            "token budget exhausted ({} of {})",
            self.usage_total.total(),
            self.config.token_budget
        ));
        let content = format!(
            "Token budget exhausted after {} tokens across {} iterations.",
            self.usage_total.total(),
            self.iteration.saturating_sub(1)
        );
        let (target, kind) = if self.config.is_leader() {
            (MAIN_ADDR, MessageKind::AllComplete)
        } else {
            (LEADER_NAME, MessageKind::Status)
        };
        let out = QueueMessage::new(&self.config.name, target, kind, content);
        self.bus.send(&out, Some(&self.config.workspace)).await?;
        Ok(())
    }

    // -- Helpers ----------------------------------------------------------------

    /// Where this agent reports status/completion: workers to the leader,
    /// the leader to the supervisor.
    fn report_target(&self) -> &'static str {
        if self.config.is_leader() {
            MAIN_ADDR
        } else {
            LEADER_NAME
        }
    }

    fn tool_values(&self) -> Vec<Value> {
        let mut values: Vec<Value> = self
            .host
            .local_tool_defs(&self.config.allowed_tools)
            .iter()
            .filter_map(|def| serde_json::to_value(def).ok())
            .collect();
        values.extend(self.host.server_tool_specs(&self.config.allowed_tools));
        values
    }

    fn note_usage(&mut self, usage: Usage) {
        self.usage_total.add(tokens(usage));
        self.compactor.record_usage(usage.input_tokens);
    }

    async fn write_state(
        &mut self,
        step: Step,
        input: Value,
        output: Value,
        tokens_used: TokensUsed,
        complexity: Option<Complexity>,
    ) -> Result<()> {
        self.compactor.add_chars(output.to_string().len());
        let state = IterationState {
            iteration: self.iteration,
            step,
            timestamp: Utc::now().to_rfc3339(),
            input,
            output,
            tokens_used,
            complexity,
        };
        state::write_iteration_state(&self.agent_dir, self.iteration, step, &state).await?;
        self.states.push(state);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn tokens(usage: Usage) -> TokensUsed {
    TokensUsed {
        input: usage.input_tokens,
        output: usage.output_tokens,
    }
}

/// Parse `<iteration>-<step>` (e.g. `7-plan-execute`).
pub fn parse_resume_token(token: &str) -> Result<(u32, Step)> {
    let (iter_str, step_str) = token
        .split_once('-')
        .context("expected <iteration>-<step>")?;
    let iteration: u32 = iter_str.parse().context("iteration must be a number")?;
    let step: Step = step_str
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    Ok((iteration, step))
}

/// Extract the first parsable JSON object from model output, tolerating code
/// fences and surrounding prose.
fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    // Try the widest brace span first, then line-by-line from the end, which
    // covers the fast path's trailing JSON assessment line.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if start < end {
        if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
            if value.is_object() {
                return Some(value);
            }
        }
    }
    for line in trimmed.lines().rev() {
        let line = line.trim().trim_start_matches("```json").trim_matches('`').trim();
        if line.starts_with('{') {
            if let Ok(value) = serde_json::from_str::<Value>(line) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Parse a plan response. Unparsable output downgrades to the raw text with
/// complex treatment.
fn parse_plan(text: &str) -> (String, Complexity) {
    if let Some(value) = extract_json(text) {
        let plan = value
            .get("plan")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let complexity = value
            .get("complexity")
            .and_then(|v| serde_json::from_value::<Complexity>(v.clone()).ok());
        if let Some(plan) = plan {
            return (plan, complexity.unwrap_or(Complexity::Complex));
        }
    }
    (text.to_string(), Complexity::Complex)
}

/// Parse the fast path's next-iteration complexity, defaulting to simple.
fn parse_next_complexity(text: &str) -> Complexity {
    extract_json(text)
        .and_then(|value| {
            value
                .get("complexity")
                .and_then(|v| serde_json::from_value::<Complexity>(v.clone()).ok())
        })
        .unwrap_or(Complexity::Simple)
}

/// Parse a reflect response. Unparsable output yields a continue decision
/// with a self-directed retry note.
fn parse_reflect(text: &str) -> ReflectDecision {
    if let Some(value) = extract_json(text) {
        if let Ok(decision) = serde_json::from_value::<ReflectDecision>(value) {
            return decision;
        }
    }
    ReflectDecision {
        decision: Decision::Continue,
        summary: IterationSummary::default(),
        next_message: Some("Retry: reflection output was not valid JSON.".to_string()),
        error_details: None,
        cancelled: None,
    }
}

fn render_input(current: &[QueueMessage]) -> Value {
    if current.is_empty() {
        return json!("(no new messages)");
    }
    let rendered: Vec<String> = current
        .iter()
        .map(|m| format!("[from {} ({})]: {}", m.from, kind_str(m.kind), m.content))
        .collect();
    json!(rendered.join("\n"))
}

fn kind_str(kind: MessageKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_default()
}

fn complexity_str(complexity: Complexity) -> &'static str {
    match complexity {
        Complexity::Simple => "simple",
        Complexity::Complex => "complex",
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_token_parses_every_step() {
        assert_eq!(parse_resume_token("3-plan").unwrap(), (3, Step::Plan));
        assert_eq!(parse_resume_token("3-execute").unwrap(), (3, Step::Execute));
        assert_eq!(
            parse_resume_token("12-plan-execute").unwrap(),
            (12, Step::PlanExecute)
        );
        assert_eq!(parse_resume_token("1-reflect").unwrap(), (1, Step::Reflect));
        assert!(parse_resume_token("x-plan").is_err());
        assert!(parse_resume_token("3-dream").is_err());
    }

    #[test]
    fn plan_parse_handles_clean_json() {
        let (plan, complexity) =
            parse_plan(r#"{"plan": "write the parser", "complexity": "simple"}"#);
        assert_eq!(plan, "write the parser");
        assert_eq!(complexity, Complexity::Simple);
    }

    #[test]
    fn plan_parse_handles_fenced_json() {
        let text = "Here is my plan:\n```json\n{\"plan\": \"p\", \"complexity\": \"complex\"}\n```";
        let (plan, complexity) = parse_plan(text);
        assert_eq!(plan, "p");
        assert_eq!(complexity, Complexity::Complex);
    }

    #[test]
    fn plan_parse_downgrades_garbage_to_complex_raw() {
        let (plan, complexity) = parse_plan("I will just do the thing.");
        assert_eq!(plan, "I will just do the thing.");
        assert_eq!(complexity, Complexity::Complex);
    }

    #[test]
    fn next_complexity_defaults_to_simple() {
        assert_eq!(parse_next_complexity("all done"), Complexity::Simple);
        assert_eq!(
            parse_next_complexity("done\n{\"complexity\": \"complex\"}"),
            Complexity::Complex
        );
    }

    #[test]
    fn reflect_parse_falls_back_to_continue_with_retry_note() {
        let decision = parse_reflect("sorry, I forgot the format");
        assert_eq!(decision.decision, Decision::Continue);
        assert!(decision
            .next_message
            .as_deref()
            .unwrap()
            .contains("not valid JSON"));
    }

    #[test]
    fn reflect_parse_reads_full_decision() {
        let decision = parse_reflect(
            r#"{"decision": "error", "summary": {"iteration": 2, "plan": "p", "outcome": "o",
                "files_changed": [], "decisions": []}, "error_details": "disk full"}"#,
        );
        assert_eq!(decision.decision, Decision::Error);
        assert_eq!(decision.error_details.as_deref(), Some("disk full"));
    }

    #[test]
    fn extract_json_finds_trailing_line() {
        let text = "Narrative with {braces} in it.\nMore text.\n{\"complexity\": \"complex\"}";
        let value = extract_json(text).unwrap();
        assert_eq!(value["complexity"], "complex");
    }
}
