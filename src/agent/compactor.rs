//! Context compaction: bounded message assembly from unbounded history.
//!
//! The life loop accumulates one [`IterationState`] per completed step; the
//! compactor turns that history into a message list the model can hold:
//!
//! - iterations older than the full-detail window collapse to a one-line
//!   summary drawn from their reflect output;
//! - semi-old iterations keep full structure but long textual outputs are
//!   trimmed to a head and tail around an omission marker (the trim recurses
//!   into arrays and objects);
//! - recent iterations pass through untouched.
//!
//! Utilization is tracked from the chars/4 heuristic and refreshed with the
//! input-token count of the last API response; the soft/hard thresholds are
//! advisory pressure signals, not safety limits.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::bus::QueueMessage;
use crate::llm::Message;
use crate::state::{IterationState, ReflectDecision, Step};

/// Iterations within this window of the current one keep full detail.
pub const FULL_DETAIL_WINDOW: u32 = 5;
/// Iterations at least this far back get their tool output trimmed.
pub const TRIM_CUTOFF: u32 = 3;
/// Lines kept at each end when trimming.
pub const KEEP_LINES: usize = 200;
/// Outputs longer than this many lines are trimmed.
const TRIM_THRESHOLD_LINES: usize = 400;

/// Soft pressure ratio: compaction is worthwhile.
pub const SOFT_RATIO: f64 = 0.70;
/// Hard pressure ratio: compact before the next call.
pub const HARD_RATIO: f64 = 0.90;

/// Context-window sizes by model prefix; the default covers current models.
const DEFAULT_CONTEXT_WINDOW: usize = 200_000;

/// Compaction pressure reported to the life loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pressure {
    None,
    Soft,
    Hard,
}

/// Look up the context window for a model identifier.
pub fn context_window_for(model: &str) -> usize {
    // Fixed map; every current claude model carries a 200k window. Kept as a
    // match so smaller self-hosted models can be slotted in.
    match model {
        m if m.starts_with("claude-") => 200_000,
        _ => DEFAULT_CONTEXT_WINDOW,
    }
}

pub struct Compactor {
    context_limit: usize,
    /// input_tokens from the most recent API response; already the full
    /// conversation size, so it is set, not accumulated.
    last_input_tokens: u64,
    /// Fallback char counter for before the first response arrives.
    estimated_chars: usize,
}

impl Compactor {
    pub fn new(model: &str) -> Self {
        Self {
            context_limit: context_window_for(model),
            last_input_tokens: 0,
            estimated_chars: 0,
        }
    }

    /// Refresh utilization from an API response's input-token count.
    pub fn record_usage(&mut self, input_tokens: u64) {
        self.last_input_tokens = input_tokens;
    }

    /// Grow the chars/4 fallback estimate.
    pub fn add_chars(&mut self, chars: usize) {
        self.estimated_chars += chars;
    }

    /// Current utilization of the model's context window.
    pub fn utilization(&self) -> f64 {
        let estimate = if self.last_input_tokens > 0 {
            self.last_input_tokens as usize
        } else {
            self.estimated_chars / 4
        };
        estimate as f64 / self.context_limit as f64
    }

    /// Evaluate pressure against the soft/hard thresholds.
    pub fn check_compaction(&self) -> Pressure {
        let pct = self.utilization();
        if pct >= HARD_RATIO {
            Pressure::Hard
        } else if pct >= SOFT_RATIO {
            Pressure::Soft
        } else {
            Pressure::None
        }
    }

    /// Assemble the bounded message list for the next step call.
    ///
    /// Pure for fixed inputs: iteration states become summary pairs or full
    /// (user, assistant) step pairs, then the current queue messages are
    /// appended as a trailing user message.
    pub fn assemble(
        &self,
        states: &[IterationState],
        current_messages: &[QueueMessage],
        current_iter: u32,
    ) -> Vec<Message> {
        let mut messages = Vec::new();

        for (iter, steps) in group_by_iteration(states) {
            if iter + FULL_DETAIL_WINDOW <= current_iter {
                let summary = summarize_iteration(iter, &steps);
                messages.push(Message::user_text(summary));
                messages.push(Message::assistant_text("Acknowledged."));
                continue;
            }

            let trim = iter + TRIM_CUTOFF <= current_iter;
            for state in steps {
                messages.push(Message::user_text(render_step_input(state)));
                let output = if trim {
                    trim_value(&state.output, KEEP_LINES)
                } else {
                    state.output.clone()
                };
                messages.push(Message::assistant_text(render_value(&output)));
            }
        }

        if !current_messages.is_empty() {
            let mut text = String::from("New messages:\n");
            for msg in current_messages {
                text.push_str(&format!(
                    "[from {} ({})]: {}\n",
                    msg.from,
                    serde_json::to_value(msg.kind)
                        .ok()
                        .and_then(|v| v.as_str().map(|s| s.to_string()))
                        .unwrap_or_default(),
                    msg.content
                ));
            }
            messages.push(Message::user_text(text.trim_end().to_string()));
        }

        messages
    }

    /// Apply the trimming rules to the in-memory state list, producing a new
    /// list. Invoked by the life loop on hard pressure before the next call.
    pub fn compact(&self, states: &[IterationState], current_iter: u32) -> Vec<IterationState> {
        states
            .iter()
            .map(|state| {
                if state.iteration + TRIM_CUTOFF <= current_iter {
                    let mut trimmed = state.clone();
                    trimmed.output = trim_value(&state.output, KEEP_LINES);
                    trimmed.input = trim_value(&state.input, KEEP_LINES);
                    trimmed
                } else {
                    state.clone()
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Rendering helpers
// ---------------------------------------------------------------------------

fn group_by_iteration(states: &[IterationState]) -> BTreeMap<u32, Vec<&IterationState>> {
    let mut groups: BTreeMap<u32, Vec<&IterationState>> = BTreeMap::new();
    for state in states {
        groups.entry(state.iteration).or_default().push(state);
    }
    for steps in groups.values_mut() {
        steps.sort_by_key(|s| s.step);
    }
    groups
}

/// One-line summary of an old iteration, preferring the reflect output and
/// falling back to truncated plan/execute outputs.
fn summarize_iteration(iter: u32, steps: &[&IterationState]) -> String {
    let reflect = steps.iter().find(|s| s.step == Step::Reflect);
    if let Some(reflect) = reflect {
        if let Ok(decision) =
            serde_json::from_value::<ReflectDecision>(reflect.output.clone())
        {
            return format!(
                "[Iteration {iter} summary] Plan: {} | Outcome: {} | Files: {} | Decisions: {}",
                non_empty(&decision.summary.plan),
                non_empty(&decision.summary.outcome),
                join_or_none(&decision.summary.files_changed),
                join_or_none(&decision.summary.decisions),
            );
        }
    }

    // No usable reflect output: fall back to truncated step outputs.
    let plan = steps
        .iter()
        .find(|s| matches!(s.step, Step::Plan | Step::PlanExecute))
        .map(|s| truncate_chars(&render_value(&s.output), 200))
        .unwrap_or_else(|| "(none)".to_string());
    let outcome = steps
        .iter()
        .find(|s| matches!(s.step, Step::Execute | Step::PlanExecute))
        .map(|s| truncate_chars(&render_value(&s.output), 200))
        .unwrap_or_else(|| "(none)".to_string());
    format!("[Iteration {iter} summary] Plan: {plan} | Outcome: {outcome} | Files: (none) | Decisions: (none)")
}

fn render_step_input(state: &IterationState) -> String {
    format!("[Iteration {} {}] {}", state.iteration, state.step, render_value(&state.input))
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn non_empty(s: &str) -> &str {
    if s.is_empty() {
        "(none)"
    } else {
        s
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

/// Truncate to at most `max` characters, never splitting a multi-byte char.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let kept: String = s.chars().take(max).collect();
        format!("{kept}...")
    } else {
        s.to_string()
    }
}

/// Trim long text down to its head and tail; recurse into arrays and objects.
pub fn trim_value(value: &Value, keep_lines: usize) -> Value {
    match value {
        Value::String(text) => {
            let lines: Vec<&str> = text.lines().collect();
            if lines.len() <= TRIM_THRESHOLD_LINES {
                return value.clone();
            }
            let omitted = lines.len() - 2 * keep_lines;
            let mut out = lines[..keep_lines].join("\n");
            out.push_str(&format!("\n[{omitted} lines omitted]\n"));
            out.push_str(&lines[lines.len() - keep_lines..].join("\n"));
            Value::String(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| trim_value(v, keep_lines)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), trim_value(v, keep_lines)))
                .collect(),
        ),
        other => other.clone(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
