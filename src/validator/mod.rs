//! Validation pipeline for agent-authored dynamic tools.
//!
//! A tool moves from `pending` to `active` only if all three stages pass:
//!
//! 1. **Definition**: the source, run with `--definition`, prints a JSON
//!    descriptor with a non-empty name and description and an object
//!    `input_schema`.
//! 2. **Security scan** of the source text: no `eval(`, no `new Function(`,
//!    no `process.env` access beyond `ANTHROPIC_API_KEY`, and imports
//!    limited to relative paths inside the workspace or whitelisted runtime
//!    packages.
//! 3. **Tests**: the companion `<tool>.test.ts` exists and passes when run
//!    in isolation; exit code and a bounded output slice are captured.
//!
//! Any failure records the tool as `disabled` with the concatenated errors
//! and removes the source files. The registry is rewritten atomically and is
//! the single authority on activation.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::Utc;
use regex::{Regex, RegexSet};
use tokio::process::Command;

use crate::error::ValidatorError;
use crate::tools::dynamic::{
    self, probe_definition, tool_runtime, RegistryStatus, ToolRegistryEntry,
};

/// Wall-clock limit for the isolated test run.
const TEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Bound on the captured test-output slice.
const TEST_OUTPUT_SLICE: usize = 2000;

/// Import specifiers allowed without workspace residency.
const IMPORT_WHITELIST: &[&str] = &[
    "path",
    "url",
    "crypto",
    "buffer",
    "bun",
    "bun:test",
    "node:path",
    "node:url",
    "node:crypto",
    "node:buffer",
    "node:assert",
    "node:test",
];

/// The one environment variable dynamic tools may read.
const ENV_WHITELIST: &[&str] = &["ANTHROPIC_API_KEY"];

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcome of a validation run, returned to the authoring agent as the
/// `create-tool` result.
#[derive(Debug)]
pub struct ValidationReport {
    pub name: String,
    pub activated: bool,
    pub errors: Vec<String>,
    pub test_output: Option<String>,
}

impl ValidationReport {
    pub fn render(&self) -> String {
        if self.activated {
            format!(
                "Tool '{}' validated and activated. It is now available for use.",
                self.name
            )
        } else {
            let mut out = format!(
                "Tool '{}' failed validation and was disabled:\n- {}",
                self.name,
                self.errors.join("\n- ")
            );
            if let Some(test_output) = &self.test_output {
                out.push_str("\n\nTest output:\n");
                out.push_str(test_output);
            }
            out
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Write a tool's source and tests into `<workspace>/tools/` and run the
/// pipeline. On failure the written files are removed again.
pub async fn create_and_validate(
    workspace: &Path,
    name: &str,
    source: &str,
    test_source: &str,
) -> Result<ValidationReport, ValidatorError> {
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        || name.is_empty()
    {
        return Ok(ValidationReport {
            name: name.to_string(),
            activated: false,
            errors: vec![format!(
                "tool name '{name}' may only contain alphanumerics, '-' and '_'"
            )],
            test_output: None,
        });
    }

    let tools_dir = workspace.join("tools");
    std::fs::create_dir_all(&tools_dir)
        .map_err(|e| ValidatorError::Registry(format!("create tools dir: {e}")))?;

    let source_path = tools_dir.join(format!("{name}.ts"));
    let test_path = tools_dir.join(format!("{name}.test.ts"));
    std::fs::write(&source_path, source)
        .map_err(|e| ValidatorError::Registry(format!("write tool source: {e}")))?;
    std::fs::write(&test_path, test_source)
        .map_err(|e| ValidatorError::Registry(format!("write tool tests: {e}")))?;

    validate_tool(workspace, name).await
}

/// Run the full pipeline against existing source files and record the
/// verdict in the registry.
pub async fn validate_tool(
    workspace: &Path,
    name: &str,
) -> Result<ValidationReport, ValidatorError> {
    let source_rel = format!("tools/{name}.ts");
    let source_path = workspace.join(&source_rel);
    let test_path = workspace.join(format!("tools/{name}.test.ts"));

    if !source_path.exists() {
        return Err(ValidatorError::SourceMissing(source_path));
    }

    let mut errors = Vec::new();
    let mut test_output = None;

    // Stage 1: definition probe.
    if let Err(e) = probe_definition(&source_path).await {
        errors.push(format!("definition: {e}"));
    }

    // Stage 2: security scan of the source text.
    match std::fs::read_to_string(&source_path) {
        Ok(source) => errors.extend(scan_source(&source, workspace, &source_path)),
        Err(e) => errors.push(format!("security scan: cannot read source: {e}")),
    }

    // Stage 3: companion tests, run in isolation.
    if !test_path.exists() {
        errors.push(format!(
            "tests: companion test file {} does not exist",
            test_path.display()
        ));
    } else {
        match run_tests(&test_path).await {
            Ok((true, output)) => test_output = Some(output),
            Ok((false, output)) => {
                errors.push("tests: test run failed".to_string());
                test_output = Some(output);
            }
            Err(e) => errors.push(format!("tests: {e}")),
        }
    }

    let activated = errors.is_empty();
    let entry = ToolRegistryEntry {
        name: name.to_string(),
        path: source_rel,
        status: if activated {
            RegistryStatus::Active
        } else {
            RegistryStatus::Disabled
        },
        validated_at: Utc::now().to_rfc3339(),
        error: if activated {
            None
        } else {
            Some(errors.join("; "))
        },
    };

    let mut registry = dynamic::read_registry(workspace)?;
    registry.upsert(entry);
    dynamic::write_registry(workspace, &registry)?;

    if !activated {
        let _ = std::fs::remove_file(&source_path);
        let _ = std::fs::remove_file(&test_path);
    }

    Ok(ValidationReport {
        name: name.to_string(),
        activated,
        errors,
        test_output,
    })
}

// ---------------------------------------------------------------------------
// Security scan
// ---------------------------------------------------------------------------

fn banned_constructs() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([r"\beval\s*\(", r"\bnew\s+Function\s*\("]).expect("patterns compile")
    })
}

fn env_access_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"process\.env(?:\.([A-Za-z_][A-Za-z0-9_]*)|\[\s*['"]([^'"]+)['"]\s*\])?"#)
            .expect("pattern compiles")
    })
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?m)(?:^\s*import\s+(?:[\w\s{},*$]+\s+from\s+)?|\brequire\s*\(\s*|\bimport\s*\(\s*)["']([^"']+)["']"#,
        )
        .expect("pattern compiles")
    })
}

/// Scan a tool source for disallowed constructs. Returns one message per
/// violation; an empty list means the scan passed.
pub fn scan_source(source: &str, workspace: &Path, source_path: &Path) -> Vec<String> {
    let mut errors = Vec::new();

    let matches: Vec<_> = banned_constructs().matches(source).into_iter().collect();
    for idx in matches {
        let what = match idx {
            0 => "eval(",
            _ => "new Function(",
        };
        errors.push(format!("security: use of {what} is not allowed"));
    }

    for cap in env_access_re().captures_iter(source) {
        let var = cap
            .get(1)
            .or_else(|| cap.get(2))
            .map(|m| m.as_str().to_string());
        match var {
            Some(name) if ENV_WHITELIST.contains(&name.as_str()) => {}
            Some(name) => {
                errors.push(format!("security: access to process.env.{name} is not allowed"));
            }
            None => {
                errors.push("security: whole process.env access is not allowed".to_string());
            }
        }
    }

    let source_dir = source_path.parent().unwrap_or(workspace);
    for cap in import_re().captures_iter(source) {
        let spec = &cap[1];
        if spec.starts_with("./") || spec.starts_with("../") {
            let resolved = logically_resolve(source_dir, spec);
            if !resolved.starts_with(workspace) {
                errors.push(format!(
                    "security: import '{spec}' resolves outside the workspace"
                ));
            }
        } else if !IMPORT_WHITELIST.contains(&spec) {
            errors.push(format!("security: import of '{spec}' is not whitelisted"));
        }
    }

    errors
}

/// Resolve `rel` against `base` without touching the filesystem, collapsing
/// `.` and `..` components so escape attempts are visible.
fn logically_resolve(base: &Path, rel: &str) -> PathBuf {
    let mut resolved = base.to_path_buf();
    for component in Path::new(rel).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(part) => resolved.push(part),
            Component::RootDir | Component::Prefix(_) => {
                return PathBuf::from(rel);
            }
        }
    }
    resolved
}

// ---------------------------------------------------------------------------
// Test stage
// ---------------------------------------------------------------------------

/// Run the companion tests in isolation. Returns (passed, bounded output).
async fn run_tests(test_path: &Path) -> Result<(bool, String), ValidatorError> {
    let runtime = tool_runtime();
    let output = tokio::time::timeout(
        TEST_TIMEOUT,
        Command::new(&runtime)
            .arg("test")
            .arg(test_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| ValidatorError::Runtime(format!("test run timed out after {}s", TEST_TIMEOUT.as_secs())))?
    .map_err(|e| ValidatorError::Runtime(format!("spawn {runtime} test: {e}")))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    let slice: String = combined.chars().take(TEST_OUTPUT_SLICE).collect();

    Ok((output.status.success(), slice))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scan(source: &str) -> Vec<String> {
        let tmp = TempDir::new().unwrap();
        let workspace = tmp.path().to_path_buf();
        let source_path = workspace.join("tools/example.ts");
        scan_source(source, &workspace, &source_path)
    }

    #[test]
    fn clean_source_passes() {
        let source = r#"
            import { readFileSync } from "path";
            import helper from "./helper";
            export const definition = { name: "t", description: "d", input_schema: {} };
            export function handler(input: unknown): string { return "ok"; }
        "#;
        assert!(scan(source).is_empty());
    }

    #[test]
    fn eval_and_new_function_are_rejected() {
        let errors = scan(r#"const f = eval("1 + 1");"#);
        assert!(errors.iter().any(|e| e.contains("eval(")));

        let errors = scan(r#"const g = new Function("return 1");"#);
        assert!(errors.iter().any(|e| e.contains("new Function(")));
    }

    #[test]
    fn env_access_allows_only_api_key() {
        assert!(scan("const k = process.env.ANTHROPIC_API_KEY;").is_empty());
        assert!(scan(r#"const k = process.env["ANTHROPIC_API_KEY"];"#).is_empty());

        let errors = scan("const h = process.env.HOME;");
        assert!(errors.iter().any(|e| e.contains("process.env.HOME")));

        let errors = scan("const all = process.env;");
        assert!(errors.iter().any(|e| e.contains("whole process.env")));
    }

    #[test]
    fn imports_outside_workspace_are_rejected() {
        let errors = scan(r#"import secrets from "../../etc/secrets";"#);
        assert!(errors.iter().any(|e| e.contains("outside the workspace")));

        // Inside the workspace is fine.
        assert!(scan(r#"import util from "./util";"#).is_empty());
        assert!(scan(r#"import shared from "../shared/common";"#).is_empty());
    }

    #[test]
    fn non_whitelisted_packages_are_rejected() {
        let errors = scan(r#"import fs from "fs";"#);
        assert!(errors.iter().any(|e| e.contains("'fs' is not whitelisted")));

        let errors = scan(r#"const cp = require("child_process");"#);
        assert!(errors.iter().any(|e| e.contains("child_process")));

        assert!(scan(r#"import { join } from "node:path";"#).is_empty());
        assert!(scan(r#"import { test, expect } from "bun:test";"#).is_empty());
    }

    #[test]
    fn dynamic_import_is_scanned_too() {
        let errors = scan(r#"const m = await import("fs");"#);
        assert!(errors.iter().any(|e| e.contains("not whitelisted")));
    }

    #[test]
    fn logical_resolution_collapses_dotdot() {
        let base = Path::new("/ws/tools");
        assert_eq!(
            logically_resolve(base, "./helper"),
            PathBuf::from("/ws/tools/helper")
        );
        assert_eq!(
            logically_resolve(base, "../shared/x"),
            PathBuf::from("/ws/shared/x")
        );
        assert_eq!(
            logically_resolve(base, "../../outside"),
            PathBuf::from("/outside")
        );
    }

    #[tokio::test]
    async fn missing_source_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = validate_tool(tmp.path(), "ghost").await.unwrap_err();
        assert!(matches!(err, ValidatorError::SourceMissing(_)));
    }

    #[tokio::test]
    async fn failed_validation_disables_and_removes_sources() {
        let tmp = TempDir::new().unwrap();
        let workspace = tmp.path();

        // eval() guarantees a scan failure regardless of runtime availability.
        let report = create_and_validate(
            workspace,
            "bad-tool",
            r#"eval("boom"); export const definition = {};"#,
            r#"import { test } from "bun:test"; test("noop", () => {});"#,
        )
        .await
        .unwrap();

        assert!(!report.activated);
        assert!(report.errors.iter().any(|e| e.contains("eval(")));

        let registry = dynamic::read_registry(workspace).unwrap();
        let entry = registry.tools.iter().find(|e| e.name == "bad-tool").unwrap();
        assert_eq!(entry.status, RegistryStatus::Disabled);
        assert!(entry.error.as_deref().unwrap().contains("eval("));

        assert!(!workspace.join("tools/bad-tool.ts").exists());
        assert!(!workspace.join("tools/bad-tool.test.ts").exists());
    }

    #[tokio::test]
    async fn invalid_tool_name_is_reported_not_written() {
        let tmp = TempDir::new().unwrap();
        let report = create_and_validate(tmp.path(), "../sneaky", "x", "y")
            .await
            .unwrap();
        assert!(!report.activated);
        assert!(!tmp.path().join("tools").exists());
    }
}
