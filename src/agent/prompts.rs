//! System prompt templates for each life-loop step.
//!
//! Every prompt injects the agent's role, purpose, and budget so the model
//! knows who it is and when to stop. The reflect prompt grows a budget
//! warning block when less than 20% of the token budget remains.

use crate::config::AgentConfig;

/// Fraction of remaining budget below which reflect urges completion.
pub const BUDGET_WARNING_RATIO: f64 = 0.20;

fn identity_block(config: &AgentConfig) -> String {
    format!(
        "## Who you are\n\
         - Name: {name}\n\
         - Role: {role}\n\
         - Purpose (your completion condition): {purpose}\n\
         - Token budget: {budget}\n\
         \n\
         You are one agent in a team coordinated through message queues and a\n\
         shared git workspace. Work in small verifiable increments and commit\n\
         your results.",
        name = config.name,
        role = config.role,
        purpose = config.purpose,
        budget = config.token_budget,
    )
}

/// Plan step (standard path): produce a plan and a complexity verdict.
pub fn plan_system(config: &AgentConfig, tool_names: &[String]) -> String {
    format!(
        "{identity}\n\
         \n\
         ## Task\n\
         Plan your next iteration. Review the history and any new messages,\n\
         then decide the single most useful thing to do next.\n\
         \n\
         Available tools (for the execution phase): {tools}\n\
         \n\
         ## Response format\n\
         Reply with JSON only:\n\
         {{\"plan\": \"<what you will do and why>\", \"complexity\": \"simple\" | \"complex\"}}\n\
         \n\
         Use \"simple\" when the next piece of work is a short, mechanical\n\
         follow-up; use \"complex\" when it needs fresh thinking.",
        identity = identity_block(config),
        tools = tool_names.join(", "),
    )
}

/// Execute step (standard path): carry out the plan with tools attached.
pub fn execute_system(config: &AgentConfig, plan: &str) -> String {
    format!(
        "{identity}\n\
         \n\
         ## Current plan\n\
         {plan}\n\
         \n\
         ## Task\n\
         Execute the plan using your tools. Report concretely what you did,\n\
         what worked, and what failed. Do not re-plan; if the plan turns out\n\
         to be wrong, say so and stop.",
        identity = identity_block(config),
    )
}

/// Fast path: state intent and act in a single call.
pub fn plan_execute_system(config: &AgentConfig) -> String {
    format!(
        "{identity}\n\
         \n\
         ## Task\n\
         The previous iteration judged this work simple. In this single pass,\n\
         briefly state what you are about to do, then do it with your tools.\n\
         \n\
         End your final message with a JSON line assessing the NEXT iteration:\n\
         {{\"complexity\": \"simple\" | \"complex\"}}",
        identity = identity_block(config),
    )
}

/// Reflect step: decide continue/complete/error and summarize the iteration.
pub fn reflect_system(config: &AgentConfig, budget_remaining_ratio: f64) -> String {
    let mut prompt = format!(
        "{identity}\n\
         \n\
         ## Task\n\
         Reflect on the iteration that just finished and decide what happens\n\
         next. \"complete\" means your purpose is fulfilled; \"error\" means\n\
         the iteration failed in a way worth retrying; otherwise \"continue\".\n\
         \n\
         ## Response format\n\
         Reply with JSON only:\n\
         {{\n\
           \"decision\": \"continue\" | \"complete\" | \"error\",\n\
           \"summary\": {{\n\
             \"iteration\": <number>,\n\
             \"plan\": \"<one line>\",\n\
             \"outcome\": \"<one line>\",\n\
             \"files_changed\": [\"...\"],\n\
             \"decisions\": [\"...\"]\n\
           }},\n\
           \"next_message\": \"<optional note-to-self for the next iteration>\",\n\
           \"error_details\": \"<required when decision is error>\"\n\
         }}",
        identity = identity_block(config),
    );

    if budget_remaining_ratio < BUDGET_WARNING_RATIO {
        prompt.push_str(&format!(
            "\n\n## Budget warning\n\
             Less than {:.0}% of your token budget remains. Strongly prefer\n\
             \"complete\": commit what you have, summarize honestly, and stop.\n\
             An imperfect delivered result beats an unfinished perfect one.",
            budget_remaining_ratio * 100.0
        ));
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AgentConfig {
        AgentConfig {
            name: "alice".to_string(),
            role: "researcher".to_string(),
            purpose: "summarize prior art".to_string(),
            allowed_tools: vec!["bash".to_string()],
            model: "m".to_string(),
            token_budget: 100_000,
            max_iterations: 50,
            max_tool_turns: 25,
            workspace: "/tmp/ws".into(),
            queue_url: "valkey://localhost:6379".to_string(),
        }
    }

    #[test]
    fn prompts_inject_identity() {
        let config = config();
        for prompt in [
            plan_system(&config, &["bash".to_string()]),
            execute_system(&config, "do it"),
            plan_execute_system(&config),
            reflect_system(&config, 0.9),
        ] {
            assert!(prompt.contains("alice"));
            assert!(prompt.contains("researcher"));
            assert!(prompt.contains("summarize prior art"));
            assert!(prompt.contains("100000"));
        }
    }

    #[test]
    fn plan_prompt_lists_tools() {
        let prompt = plan_system(&config(), &["bash".to_string(), "git".to_string()]);
        assert!(prompt.contains("bash, git"));
    }

    #[test]
    fn reflect_prompt_warns_only_near_budget() {
        let relaxed = reflect_system(&config(), 0.5);
        assert!(!relaxed.contains("Budget warning"));

        let urgent = reflect_system(&config(), 0.1);
        assert!(urgent.contains("Budget warning"));
        assert!(urgent.contains("complete"));
    }

    #[test]
    fn execute_prompt_embeds_plan() {
        let prompt = execute_system(&config(), "write the report to report.md");
        assert!(prompt.contains("write the report to report.md"));
    }
}
