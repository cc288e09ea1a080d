//! Shell execution tool with timeout and safety guard.

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{optional_str, required_str, Schema, Tool};
use crate::utils::truncate_chars;

/// Maximum characters of command output returned to the model
const MAX_OUTPUT_CHARS: usize = 10_000;

/// Destructive command patterns that are never executed
static DENY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\brm\s+-[rf]{1,2}\b",
        r"\bdel\s+/[fq]\b",
        r"\brmdir\s+/s\b",
        r"\b(format|mkfs|diskpart)\b",
        r"\bdd\s+if=",
        r">\s*/dev/sd",
        r"\b(shutdown|reboot|poweroff)\b",
        r":\(\)\s*\{.*\};\s*:",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Run shell commands in the workspace
pub struct ExecTool {
    timeout: Duration,
    working_dir: PathBuf,
    restrict_to_workspace: bool,
}

impl ExecTool {
    pub fn new(working_dir: impl Into<PathBuf>, timeout: Duration, restrict_to_workspace: bool) -> Self {
        Self {
            timeout,
            working_dir: working_dir.into(),
            restrict_to_workspace,
        }
    }

    /// Reason the command is refused, if any
    fn guard_command(&self, command: &str) -> Option<&'static str> {
        let lower = command.to_lowercase();
        if DENY_PATTERNS.iter().any(|re| re.is_match(&lower)) {
            return Some("Error: Command blocked by safety guard (dangerous pattern detected)");
        }
        if self.restrict_to_workspace && (command.contains("../") || command.contains("..\\")) {
            return Some("Error: Command blocked by safety guard (path traversal detected)");
        }
        None
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output. Use with caution."
    }

    fn parameters(&self) -> Schema {
        Schema::object()
            .required_property("command", Schema::string().describe("The shell command to execute"))
            .property(
                "working_dir",
                Schema::string().describe("Optional working directory for the command"),
            )
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<String> {
        let command = required_str(&args, "command")?;
        if let Some(reason) = self.guard_command(command) {
            warn!("Blocked command: {}", command);
            return Ok(reason.to_string());
        }

        let cwd = match optional_str(&args, "working_dir") {
            Some(dir) if !self.restrict_to_workspace => crate::utils::expand_path(dir),
            _ => self.working_dir.clone(),
        };
        debug!("exec in {}: {}", cwd.display(), command);

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning shell in {}", cwd.display()))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Ok(format!(
                    "Error: Command timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut parts = Vec::new();
        if !stdout.is_empty() {
            parts.push(stdout.to_string());
        }
        if !stderr.trim().is_empty() {
            parts.push(format!("STDERR:\n{}", stderr));
        }
        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            parts.push(format!("\nExit code: {}", code));
        }

        let result = if parts.is_empty() {
            "(no output)".to_string()
        } else {
            parts.join("\n")
        };

        let total = result.chars().count();
        if total > MAX_OUTPUT_CHARS {
            return Ok(format!(
                "{}\n... (truncated, {} more chars)",
                truncate_chars(&result, MAX_OUTPUT_CHARS),
                total - MAX_OUTPUT_CHARS
            ));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_guard_blocks_destructive() {
        let tool = ExecTool::new("/tmp", Duration::from_secs(5), false);
        assert!(tool.guard_command("rm -rf /").is_some());
        assert!(tool.guard_command("sudo reboot").is_some());
        assert!(tool.guard_command("ls -la").is_none());
    }

    #[test]
    fn test_guard_traversal_only_when_restricted() {
        let open = ExecTool::new("/tmp", Duration::from_secs(5), false);
        let restricted = ExecTool::new("/tmp", Duration::from_secs(5), true);
        assert!(open.guard_command("cat ../secret").is_none());
        assert!(restricted.guard_command("cat ../secret").is_some());
    }

    #[tokio::test]
    async fn test_exec_collects_output_and_exit_code() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = ExecTool::new(dir.path(), Duration::from_secs(5), true);
        let out = tool
            .execute(args(json!({"command": "echo hello; echo oops >&2; exit 3"})))
            .await
            .unwrap();
        assert!(out.starts_with("hello\n"));
        assert!(out.contains("STDERR:\noops"));
        assert!(out.ends_with("Exit code: 3"));
    }

    #[tokio::test]
    async fn test_exec_timeout() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = ExecTool::new(dir.path(), Duration::from_millis(200), false);
        let out = tool.execute(args(json!({"command": "sleep 5"}))).await.unwrap();
        assert!(out.starts_with("Error: Command timed out"));
    }
}
