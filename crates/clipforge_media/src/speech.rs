//! Speech-to-text seam and its whisper CLI implementation.

use async_trait::async_trait;
use clipforge_engine::CancelToken;
use clipforge_protocol::OrchestratorError;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::transcoder::ProgressFn;

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn availability(&self) -> Result<(), String>;

    /// Transcribe an audio file into the normalized transcript shape:
    /// `{"text": ..., "language": ..., "segments": [{start, end, text}]}`.
    async fn transcribe(
        &self,
        audio: &Path,
        language: Option<&str>,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> Result<Value, OrchestratorError>;
}

/// Whisper CLI wrapper. The CLI writes a JSON transcript next to its output
/// directory; we normalize it into the transcript shape the rest of the
/// pipeline consumes.
pub struct WhisperCli {
    bin: PathBuf,
    model: String,
}

impl WhisperCli {
    pub fn new(bin: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            model: model.into(),
        }
    }
}

impl Default for WhisperCli {
    fn default() -> Self {
        Self::new("whisper", "large-v3")
    }
}

#[async_trait]
impl SpeechToText for WhisperCli {
    async fn availability(&self) -> Result<(), String> {
        let status = Command::new(&self.bin)
            .arg("--help")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|err| format!("{} not runnable: {err}", self.bin.display()))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("{} exited with {}", self.bin.display(), status))
        }
    }

    async fn transcribe(
        &self,
        audio: &Path,
        language: Option<&str>,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> Result<Value, OrchestratorError> {
        let output_dir = tempfile_dir(audio)?;
        let mut command = Command::new(&self.bin);
        command
            .arg(audio)
            .args(["--model", &self.model])
            .args(["--output_format", "json"])
            .arg("--output_dir")
            .arg(&output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(language) = language {
            command.args(["--language", language]);
        }

        debug!(audio = %audio.display(), model = %self.model, "spawning whisper");
        let mut child = command.spawn().map_err(|err| {
            OrchestratorError::HandlerFailure(format!(
                "failed to spawn {}: {err}",
                self.bin.display()
            ))
        })?;

        // The CLI reports no progress; poll the token while it runs and emit
        // a coarse heartbeat so the job stays healthy.
        let mut beats: u64 = 0;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status.map_err(|err| {
                    OrchestratorError::HandlerFailure(format!("whisper wait failed: {err}"))
                })?,
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    if cancel.is_cancelled() {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        return Err(OrchestratorError::Cancelled);
                    }
                    beats += 1;
                    progress((beats as f64).min(95.0));
                }
            }
        };
        if !status.success() {
            return Err(OrchestratorError::HandlerFailure(format!(
                "whisper exited with {status}"
            )));
        }

        let stem = audio
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        let transcript_path = output_dir.join(format!("{stem}.json"));
        let raw = std::fs::read_to_string(&transcript_path).map_err(|err| {
            OrchestratorError::HandlerFailure(format!(
                "whisper produced no transcript at {}: {err}",
                transcript_path.display()
            ))
        })?;
        let value: Value = serde_json::from_str(&raw).map_err(|err| {
            OrchestratorError::HandlerFailure(format!("whisper transcript is not JSON: {err}"))
        })?;
        progress(100.0);
        Ok(normalize_transcript(&value))
    }
}

fn tempfile_dir(audio: &Path) -> Result<PathBuf, OrchestratorError> {
    let dir = audio
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(".stt");
    std::fs::create_dir_all(&dir).map_err(|err| {
        OrchestratorError::HandlerFailure(format!("failed to create transcript dir: {err}"))
    })?;
    Ok(dir)
}

/// Reduce a whisper JSON document to the fields the pipeline relies on.
pub fn normalize_transcript(raw: &Value) -> Value {
    let segments: Vec<Value> = raw
        .get("segments")
        .and_then(Value::as_array)
        .map(|segments| {
            segments
                .iter()
                .filter_map(|segment| {
                    let start = segment.get("start").and_then(Value::as_f64)?;
                    let end = segment.get("end").and_then(Value::as_f64)?;
                    let text = segment
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .trim();
                    Some(json!({"start": start, "end": end, "text": text}))
                })
                .collect()
        })
        .unwrap_or_default();

    json!({
        "text": raw.get("text").and_then(Value::as_str).unwrap_or_default().trim(),
        "language": raw.get("language").and_then(Value::as_str),
        "segments": segments,
    })
}
