//! Script execution backends.
//!
//! [`ScriptRunner`] isolates how a compiled script actually runs; the
//! engine only requires line-streamed output and the decoded output record.
//! [`ProcessRunner`] is the production backend: a child process running the
//! caller's interpreter on a temp file, with the resolved node environment
//! merged over the parent's.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::Write;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::exec::compiler::CompiledScript;
use crate::exec::output::{ArmorError, OutputRecord, OUTPUT_SENTINEL};
use crate::exec::ExecError;

/// Which pipe an output line came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecStream {
    Stdout,
    Stderr,
}

impl ExecStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecStream::Stdout => "stdout",
            ExecStream::Stderr => "stderr",
        }
    }
}

/// One line of child output, tagged by stream.
#[derive(Clone, Debug)]
pub struct ExecLine {
    pub stream: ExecStream,
    pub line: String,
}

/// What a run produced. `output` is `None` when the script never reached
/// its final section.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub output: Option<OutputRecord>,
}

/// Runs compiled scripts, streaming output lines to `sink` when one is
/// given and to the tracing log otherwise.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(
        &self,
        script: &CompiledScript,
        sink: Option<flume::Sender<ExecLine>>,
    ) -> Result<RunOutcome, ExecError>;
}

/// Child-process runner.
#[derive(Clone, Debug)]
pub struct ProcessRunner {
    /// Interpreter argv the script path is appended to.
    interpreter: Vec<String>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            interpreter: vec!["python".to_string(), "-u".to_string()],
        }
    }
}

impl ProcessRunner {
    pub fn new(interpreter: Vec<String>) -> Self {
        Self { interpreter }
    }
}

fn decode_sentinel(payload: &str) -> Result<OutputRecord, ArmorError> {
    let json = STANDARD
        .decode(payload.trim())
        .map_err(|source| ArmorError::Base64 { source })?;
    serde_json::from_slice(&json).map_err(|source| ArmorError::Json { source })
}

/// Forward one pipe line by line. Sentinel lines on stdout are captured,
/// not forwarded.
async fn pump<R: AsyncRead + Unpin>(
    reader: R,
    stream: ExecStream,
    sink: Option<flume::Sender<ExecLine>>,
) -> std::io::Result<Option<OutputRecord>> {
    let mut lines = BufReader::new(reader).lines();
    let mut record = None;
    while let Some(line) = lines.next_line().await? {
        if stream == ExecStream::Stdout {
            if let Some(payload) = line.strip_prefix(OUTPUT_SENTINEL) {
                match decode_sentinel(payload) {
                    Ok(decoded) => record = Some(decoded),
                    Err(err) => warn!(error = %err, "undecodable output sentinel"),
                }
                continue;
            }
        }
        match &sink {
            Some(tx) => {
                let _ = tx.send_async(ExecLine { stream, line }).await;
            }
            None => info!(stream = stream.as_str(), "{line}"),
        }
    }
    Ok(record)
}

#[async_trait]
impl ScriptRunner for ProcessRunner {
    async fn run(
        &self,
        script: &CompiledScript,
        sink: Option<flume::Sender<ExecLine>>,
    ) -> Result<RunOutcome, ExecError> {
        let mut file = tempfile::Builder::new()
            .prefix("mgv_exec_")
            .suffix(".py")
            .tempfile()
            .map_err(ExecError::stage)?;
        file.write_all(script.source.as_bytes())
            .map_err(ExecError::stage)?;
        let path = file.into_temp_path();

        let (program, args) = self
            .interpreter
            .split_first()
            .ok_or_else(|| ExecError::Interpreter)?;
        let mut child = Command::new(program)
            .args(args)
            .arg(&*path)
            .envs(script.env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ExecError::spawn)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_task = async {
            match stdout {
                Some(pipe) => pump(pipe, ExecStream::Stdout, sink.clone()).await,
                None => Ok(None),
            }
        };
        let err_task = async {
            match stderr {
                Some(pipe) => pump(pipe, ExecStream::Stderr, sink.clone()).await,
                None => Ok(None),
            }
        };
        let (out_result, err_result) = tokio::join!(out_task, err_task);
        let record = out_result.map_err(ExecError::stream)?;
        err_result.map_err(ExecError::stream)?;

        // Exit status is informational; a failed section still leaves the
        // final section's record on stdout.
        let status = child.wait().await.map_err(ExecError::stream)?;
        if !status.success() {
            info!(code = ?status.code(), "script exited non-zero");
        }
        Ok(RunOutcome { output: record })
    }
}
