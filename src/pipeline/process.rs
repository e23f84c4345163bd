//! External tool invocation.
//!
//! The OCR and language-model tools are plain executables that write their
//! result as text on stdout. Every child is spawned with kill-on-drop, so a
//! timed-out or cancelled run never leaves the tool behind.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

use crate::config::ToolConfig;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error reading process output: {0}")]
    Io(#[from] std::io::Error),

    #[error("{program} did not finish within {after:?}")]
    TimedOut { program: String, after: Duration },
}

/// External tool abstraction (allows mocking the OCR and model tools)
pub trait ToolRunner: Send + Sync {
    fn run(
        &self,
        program: &str,
        args: &[String],
    ) -> impl Future<Output = Result<Vec<String>, ProcessError>> + Send;
}

/// Runs a tool to completion and returns its stdout as lines.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
    merge_stderr: bool,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upper bound on one run. Without it a hung tool blocks the pipeline
    /// until the caller cancels.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Append the child's stderr lines after its stdout lines.
    pub fn merging_stderr(mut self, merge: bool) -> Self {
        self.merge_stderr = merge;
        self
    }

    pub fn from_tool(tool: &ToolConfig) -> Self {
        let runner = Self::new().merging_stderr(tool.merge_stderr);
        match tool.timeout_secs {
            Some(secs) => runner.with_timeout(Duration::from_secs(secs)),
            None => runner,
        }
    }

    /// Run `program` with `args` and collect its output.
    ///
    /// Output is decoded lossily as UTF-8 and split on `\n`, dropping a
    /// trailing `\r`. A non-zero exit status is logged, not returned: the
    /// lines the tool did produce are still handed back.
    pub async fn run(&self, program: &str, args: &[String]) -> Result<Vec<String>, ProcessError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Launch {
                program: program.to_string(),
                source,
            })?;

        tracing::debug!(program, args = args.len(), pid = child.id(), "Tool started");

        // Dropping the output future on timeout drops the child, which kills it.
        let output = match self.timeout {
            Some(after) => tokio::time::timeout(after, child.wait_with_output())
                .await
                .map_err(|_| ProcessError::TimedOut {
                    program: program.to_string(),
                    after,
                })??,
            None => child.wait_with_output().await?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            tracing::warn!(
                program,
                status = %output.status,
                stderr_tail = tail(&stderr, 512),
                "Tool exited unsuccessfully"
            );
        } else if !self.merge_stderr && !stderr.trim().is_empty() {
            tracing::debug!(program, stderr = tail(&stderr, 512), "Tool wrote to stderr");
        }

        let mut lines: Vec<String> = stdout.lines().map(str::to_string).collect();
        if self.merge_stderr {
            lines.extend(stderr.lines().map(str::to_string));
        }

        tracing::debug!(program, lines = lines.len(), "Tool finished");
        Ok(lines)
    }
}

impl ToolRunner for ProcessRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
    ) -> impl Future<Output = Result<Vec<String>, ProcessError>> + Send {
        ProcessRunner::run(self, program, args)
    }
}

/// Last `max_chars` characters of `text`, for log fields.
fn tail(text: &str, max_chars: usize) -> &str {
    let text = text.trim_end();
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((start, _)) => &text[start..],
        None => text,
    }
}
