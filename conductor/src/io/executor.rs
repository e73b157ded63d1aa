//! Agent executor abstraction.
//!
//! The [`AgentExecutor`] trait separates the loop from the agent backend
//! (currently a `claude`-compatible CLI). Tests use scripted executors that
//! mutate the task record directly instead of spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::core::event::preview;
use crate::core::types::{AgentId, TokenUsage, Tool};
use crate::error::ConductorError;
use crate::io::config::ExecutorConfig;
use crate::io::process::run_command;

/// Characters of the prompt echoed by [`DryRunExecutor`].
const DRY_RUN_PREVIEW_CHARS: usize = 300;

/// One phase invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub agent: AgentId,
    /// Capability allow-list; the agent may use nothing else.
    pub tools: Vec<Tool>,
    pub model: String,
    /// Turn budget for this invocation.
    pub max_turns: u32,
    /// Extra system prompt; empty means none.
    pub role: String,
    pub prompt: String,
    pub workdir: PathBuf,
}

/// What the agent reported back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResponse {
    pub success: bool,
    pub output: String,
    pub num_turns: Option<u32>,
    pub usage: Option<TokenUsage>,
}

/// Abstraction over agent execution backends.
///
/// `Err` is reserved for failing to launch the agent at all. An agent that
/// ran and failed is reported as `Ok` with `success == false`.
pub trait AgentExecutor {
    fn execute(&self, request: &AgentRequest) -> Result<AgentResponse>;
}

/// Runs the agent CLI in print mode with JSON output.
#[derive(Debug, Clone)]
pub struct CliExecutor {
    command: String,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
}

impl CliExecutor {
    pub fn new(cfg: &ExecutorConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            timeout: cfg.timeout_secs.map(Duration::from_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }

    fn command_for(&self, request: &AgentRequest) -> Command {
        let tools: Vec<&str> = request.tools.iter().map(|t| t.as_str()).collect();
        let mut cmd = Command::new(&self.command);
        cmd.arg("--print")
            .arg("--output-format")
            .arg("json")
            .arg("--allowedTools")
            .arg(tools.join(","))
            .arg("--model")
            .arg(&request.model)
            .arg("--max-turns")
            .arg(request.max_turns.to_string());
        if !request.role.trim().is_empty() {
            cmd.arg("--append-system-prompt").arg(&request.role);
        }
        cmd.current_dir(&request.workdir);
        cmd
    }
}

impl AgentExecutor for CliExecutor {
    #[instrument(skip_all, fields(agent = %request.agent, model = %request.model, max_turns = request.max_turns))]
    fn execute(&self, request: &AgentRequest) -> Result<AgentResponse> {
        info!(command = %self.command, workdir = %request.workdir.display(), "starting agent");
        let output = run_command(
            self.command_for(request),
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .map_err(|err| ConductorError::Execution {
            agent: request.agent,
            message: format!("{err:#}"),
        })?;

        if output.timed_out {
            warn!(timeout_secs = ?self.timeout.map(|t| t.as_secs()), "agent timed out");
            return Ok(AgentResponse {
                success: false,
                output: format!("agent timed out\n{}", output.stderr_lossy()),
                num_turns: None,
                usage: None,
            });
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent exited unsuccessfully");
            let stderr = output.stderr_lossy();
            let text = if stderr.trim().is_empty() {
                output.stdout_lossy()
            } else {
                stderr
            };
            return Ok(AgentResponse {
                success: false,
                output: text,
                num_turns: None,
                usage: None,
            });
        }

        let response = parse_cli_output(&output.stdout_lossy());
        debug!(success = response.success, num_turns = ?response.num_turns, "agent finished");
        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct CliResult {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    num_turns: Option<u32>,
    #[serde(default)]
    usage: Option<CliUsage>,
}

#[derive(Debug, Deserialize)]
struct CliUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
}

impl From<CliUsage> for TokenUsage {
    fn from(usage: CliUsage) -> Self {
        TokenUsage {
            input: usage.input_tokens,
            output: usage.output_tokens,
            cache_read: usage.cache_read_input_tokens,
            cache_write: usage.cache_creation_input_tokens,
        }
    }
}

/// Interpret stdout from a successful exit.
///
/// Anything that is not the CLI's JSON result object is passed through as
/// raw text and counted as success.
pub fn parse_cli_output(stdout: &str) -> AgentResponse {
    match serde_json::from_str::<CliResult>(stdout.trim()) {
        Ok(parsed) => AgentResponse {
            success: !parsed.is_error,
            output: parsed.result.unwrap_or_default(),
            num_turns: parsed.num_turns,
            usage: parsed.usage.map(TokenUsage::from),
        },
        Err(err) => {
            debug!(err = %err, "agent output is not a JSON result, keeping raw text");
            AgentResponse {
                success: true,
                output: stdout.to_string(),
                num_turns: None,
                usage: None,
            }
        }
    }
}

/// Prints what would run and reports success without touching anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunExecutor;

impl AgentExecutor for DryRunExecutor {
    fn execute(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let tools: Vec<&str> = request.tools.iter().map(|t| t.as_str()).collect();
        println!(
            "[dry-run] {} ({}, max {} turns) tools: {}",
            request.agent,
            request.model,
            request.max_turns,
            tools.join(", ")
        );
        println!("{}", preview(&request.prompt, DRY_RUN_PREVIEW_CHARS));
        Ok(AgentResponse {
            success: true,
            output: "[dry-run] agent not executed".to_string(),
            num_turns: Some(0),
            usage: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(workdir: PathBuf) -> AgentRequest {
        AgentRequest {
            agent: AgentId::Verifier,
            tools: vec![Tool::Read, Tool::Grep],
            model: "sonnet".to_string(),
            max_turns: 7,
            role: "QA only".to_string(),
            prompt: "check it".to_string(),
            workdir,
        }
    }

    #[test]
    fn parses_json_result_with_usage() {
        let stdout = r#"{"type":"result","is_error":false,"result":"Using tool: Read\ndone",
            "num_turns":4,"usage":{"input_tokens":120,"output_tokens":30,
            "cache_read_input_tokens":50}}"#;
        let response = parse_cli_output(stdout);
        assert!(response.success);
        assert_eq!(response.output, "Using tool: Read\ndone");
        assert_eq!(response.num_turns, Some(4));
        assert_eq!(
            response.usage,
            Some(TokenUsage {
                input: 120,
                output: 30,
                cache_read: Some(50),
                cache_write: None,
            })
        );
    }

    #[test]
    fn json_error_flag_is_unsuccessful() {
        let response = parse_cli_output(r#"{"is_error":true,"result":"max turns reached"}"#);
        assert!(!response.success);
        assert_eq!(response.output, "max turns reached");
        assert_eq!(response.usage, None);
    }

    #[test]
    fn plain_text_falls_back_to_raw_output() {
        let response = parse_cli_output("Calling Edit\nall good\n");
        assert!(response.success);
        assert_eq!(response.output, "Calling Edit\nall good\n");
        assert_eq!(response.num_turns, None);
    }

    #[test]
    fn command_carries_capabilities_and_budget() {
        let exec = CliExecutor::new(&ExecutorConfig::default());
        let temp = tempfile::tempdir().expect("tempdir");
        let cmd = exec.command_for(&request(temp.path().to_path_buf()));
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(cmd.get_program(), "claude");
        let pos = |flag: &str| args.iter().position(|a| a == flag).expect(flag);
        assert_eq!(args[pos("--allowedTools") + 1], "Read,Grep");
        assert_eq!(args[pos("--model") + 1], "sonnet");
        assert_eq!(args[pos("--max-turns") + 1], "7");
        assert_eq!(args[pos("--append-system-prompt") + 1], "QA only");
    }

    #[test]
    fn launch_failure_is_an_execution_error() {
        let exec = CliExecutor::new(&ExecutorConfig {
            command: "/nonexistent/conductor-agent".to_string(),
            ..ExecutorConfig::default()
        });
        let temp = tempfile::tempdir().expect("tempdir");
        let err = exec
            .execute(&request(temp.path().to_path_buf()))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConductorError>(),
            Some(ConductorError::Execution {
                agent: AgentId::Verifier,
                ..
            })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_reports_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("agent.sh");
        std::fs::write(&script, "#!/bin/sh\ncat >/dev/null\necho 'rate limited' >&2\nexit 2\n")
            .expect("write script");
        let mut perms = std::fs::metadata(&script).expect("meta").permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&script, perms).expect("chmod");

        let exec = CliExecutor::new(&ExecutorConfig {
            command: script.display().to_string(),
            ..ExecutorConfig::default()
        });
        let response = exec
            .execute(&request(temp.path().to_path_buf()))
            .expect("launched");
        assert!(!response.success);
        assert_eq!(response.output.trim(), "rate limited");
    }

    #[test]
    fn dry_run_succeeds_without_side_effects() {
        let temp = tempfile::tempdir().expect("tempdir");
        let response = DryRunExecutor
            .execute(&request(temp.path().to_path_buf()))
            .expect("dry run");
        assert!(response.success);
        assert_eq!(std::fs::read_dir(temp.path()).expect("read dir").count(), 0);
    }
}
