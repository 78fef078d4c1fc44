//! Trade executor adapter.
//!
//! Execution itself lives in an external program (by default the Node
//! trading bot, `npm start`). This module only launches it with the sheet
//! to execute and relays what it prints.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::ExecutorConfig;
use crate::types::{TraderError, TraderResult};

/// Env var through which the executor learns which sheet to execute.
pub const SHEET_ENV: &str = "TRADE_CONFIRMATION_SHEET";

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub sheet: PathBuf,
    /// `None` when the process was killed by a signal.
    pub status_code: Option<i32>,
    /// Stdout followed by stderr.
    pub output: String,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct ExternalExecutor {
    config: ExecutorConfig,
}

impl ExternalExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Run the executor against `sheet` and wait for it to exit.
    ///
    /// A non-zero exit is reported in the outcome, not as an error.
    pub async fn run(&self, sheet: &Path) -> TraderResult<ExecutionOutcome> {
        if !sheet.exists() {
            return Err(TraderError::NotFound(sheet.to_path_buf()));
        }

        info!(
            program = %self.config.program,
            args = ?self.config.args,
            sheet = %sheet.display(),
            "Starting trade executor"
        );

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .current_dir(&self.config.working_dir)
            .env(SHEET_ENV, sheet)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (stdout, stderr) = tokio::join!(
            relay_lines(child.stdout.take(), "stdout"),
            relay_lines(child.stderr.take(), "stderr"),
        );
        let status = child.wait().await?;

        let outcome = ExecutionOutcome {
            sheet: sheet.to_path_buf(),
            status_code: status.code(),
            // Not interleaved: all of stdout, then all of stderr.
            output: stdout + &stderr,
        };

        if outcome.success() {
            info!(sheet = %sheet.display(), "Trade executor finished");
        } else {
            warn!(status = ?outcome.status_code, sheet = %sheet.display(), "Trade executor failed");
        }
        Ok(outcome)
    }
}

/// Log each line of `pipe` as it arrives and return everything read.
async fn relay_lines<R>(pipe: Option<R>, stream: &'static str) -> String
where
    R: AsyncRead + Unpin,
{
    let mut collected = String::new();
    let Some(pipe) = pipe else {
        return collected;
    };

    let mut lines = BufReader::new(pipe).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                info!(stream, "{line}");
                collected.push_str(&line);
                collected.push('\n');
            }
            Ok(None) => break,
            Err(e) => {
                warn!(stream, error = %e, "Failed reading executor output");
                break;
            }
        }
    }
    collected
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
