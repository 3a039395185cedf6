//! Action executor backed by an external command.
//!
//! The command receives the [`ActionRequest`] as JSON on stdin and must print
//! an [`ActionOutcome`] as JSON on stdout. A non-zero exit, a timeout, or
//! unparseable output is an execution failure.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{info, instrument, warn};

use crate::core::action::{ActionExecutor, ActionOutcome, ActionRequest};
use crate::io::process::run_command_with_timeout;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandExecutor {
    pub fn new(program: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        if program.first().is_none_or(|p| p.trim().is_empty()) {
            bail!("command must be a non-empty array");
        }
        Ok(Self {
            program,
            timeout,
            output_limit_bytes,
        })
    }
}

impl ActionExecutor for CommandExecutor {
    #[instrument(skip_all, fields(action = %request.action, program = %self.program[0]))]
    fn run(&self, request: &ActionRequest) -> Result<ActionOutcome> {
        info!("starting action command");
        let mut cmd = Command::new(&self.program[0]);
        cmd.args(&self.program[1..]);
        let input = serde_json::to_vec(request).context("serialize action request")?;

        let output = run_command_with_timeout(
            cmd,
            Some(input.as_slice()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run {}", self.program.join(" ")))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "action command timed out");
            return Err(anyhow!("command timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "action command failed");
            return Err(anyhow!(
                "command failed with status {:?}: {}",
                output.status.code(),
                output.stderr_text()
            ));
        }
        if output.stdout_truncated > 0 {
            bail!("command output exceeded {} bytes", self.output_limit_bytes);
        }

        serde_json::from_slice(&output.stdout).context("parse action outcome from stdout")
    }
}
