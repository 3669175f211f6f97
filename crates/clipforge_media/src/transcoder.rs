//! Media transcoder seam and its ffmpeg-backed implementation.
//!
//! Every invocation is a subprocess spawned with `kill_on_drop`, so a
//! dropped handler future reaps its tooling. Cancellation is polled between
//! progress reads; a fired token kills the child and surfaces `Cancelled`.

use async_trait::async_trait;
use clipforge_engine::CancelToken;
use clipforge_protocol::OrchestratorError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Progress callback in [0, 100].
pub type ProgressFn<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// What the probe learned about a source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: f64,
    pub width: i64,
    pub height: i64,
    pub fps: f64,
    pub audio_tracks: i64,
}

/// A detected scene change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneCut {
    pub time: f64,
    pub confidence: f64,
}

/// A span the silence scan flagged as quiet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietSpan {
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub width: i64,
    pub height: i64,
    pub crf: u32,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            crf: 28,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioOptions {
    pub sample_rate: u32,
    pub track: u32,
    pub normalize: bool,
}

impl Default for AudioOptions {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            track: 0,
            normalize: true,
        }
    }
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Ok when the tool is usable; the error becomes the health message.
    async fn availability(&self) -> Result<(), String>;
    async fn probe(&self, source: &Path) -> Result<MediaInfo, OrchestratorError>;
    async fn create_proxy(
        &self,
        source: &Path,
        dest: &Path,
        options: &ProxyOptions,
        duration: f64,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> Result<(), OrchestratorError>;
    async fn extract_audio(
        &self,
        source: &Path,
        dest: &Path,
        options: &AudioOptions,
        duration: f64,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> Result<(), OrchestratorError>;
    async fn extract_thumbnail(
        &self,
        source: &Path,
        dest: &Path,
        at_seconds: f64,
    ) -> Result<(), OrchestratorError>;
    async fn detect_scenes(
        &self,
        source: &Path,
        cancel: &CancelToken,
    ) -> Result<Vec<SceneCut>, OrchestratorError>;
    async fn detect_silence(
        &self,
        audio: &Path,
        cancel: &CancelToken,
    ) -> Result<Vec<QuietSpan>, OrchestratorError>;
    /// Cut a sub-clip, optionally reframed to a 9:16 vertical.
    async fn cut_clip(
        &self,
        source: &Path,
        dest: &Path,
        start: f64,
        end: f64,
        vertical: bool,
        cancel: &CancelToken,
    ) -> Result<(), OrchestratorError>;
}

/// Default transcoder shelling out to ffmpeg/ffprobe.
pub struct FfmpegTranscoder {
    ffmpeg_bin: PathBuf,
    ffprobe_bin: PathBuf,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, ffprobe_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
        }
    }

    /// Run ffmpeg, streaming `-progress` key/value output into the callback
    /// and polling the token between reads.
    async fn run_ffmpeg(
        &self,
        args: &[String],
        duration: Option<f64>,
        progress: Option<ProgressFn<'_>>,
        cancel: &CancelToken,
    ) -> Result<String, OrchestratorError> {
        let mut command = Command::new(&self.ffmpeg_bin);
        command
            .args(["-hide_banner", "-loglevel", "info", "-y", "-nostats"])
            .args(["-progress", "pipe:1"])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(args = ?args, "spawning ffmpeg");
        let mut child = command.spawn().map_err(|err| {
            OrchestratorError::HandlerFailure(format!(
                "failed to spawn {}: {err}",
                self.ffmpeg_bin.display()
            ))
        })?;

        let stdout = child.stdout.take();
        // Drain stderr concurrently; filter logs (scene scores, silence
        // marks) can exceed the pipe buffer and stall the child otherwise.
        let stderr_task = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buffer = String::new();
                let _ = pipe.read_to_string(&mut buffer).await;
                buffer
            })
        });

        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                if let (Some(callback), Some(total)) = (progress, duration) {
                                    if let Some(done) = parse_out_time_seconds(&line) {
                                        if total > 0.0 {
                                            callback((done / total * 100.0).clamp(0.0, 100.0));
                                        }
                                    }
                                }
                            }
                            Ok(None) => break,
                            Err(err) => {
                                warn!(%err, "ffmpeg progress stream error");
                                break;
                            }
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_millis(500)) => {
                        if cancel.is_cancelled() {
                            let _ = child.start_kill();
                            let _ = child.wait().await;
                            return Err(OrchestratorError::Cancelled);
                        }
                    }
                }
            }
        }

        let status = child.wait().await.map_err(|err| {
            OrchestratorError::HandlerFailure(format!("ffmpeg wait failed: {err}"))
        })?;
        let stderr_text = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        if !status.success() {
            return Err(OrchestratorError::HandlerFailure(format!(
                "ffmpeg exited with {}: {}",
                status,
                tail(&stderr_text, 500)
            )));
        }
        Ok(stderr_text)
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn availability(&self) -> Result<(), String> {
        let output = Command::new(&self.ffmpeg_bin)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|err| format!("{} not runnable: {err}", self.ffmpeg_bin.display()))?;
        if output.success() {
            Ok(())
        } else {
            Err(format!("{} exited with {}", self.ffmpeg_bin.display(), output))
        }
    }

    async fn probe(&self, source: &Path) -> Result<MediaInfo, OrchestratorError> {
        let output = Command::new(&self.ffprobe_bin)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(source)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| {
                OrchestratorError::HandlerFailure(format!(
                    "failed to spawn {}: {err}",
                    self.ffprobe_bin.display()
                ))
            })?;
        if !output.status.success() {
            return Err(OrchestratorError::HandlerFailure(format!(
                "ffprobe failed on {}: {}",
                source.display(),
                tail(&String::from_utf8_lossy(&output.stderr), 300)
            )));
        }
        let value: Value = serde_json::from_slice(&output.stdout).map_err(|err| {
            OrchestratorError::HandlerFailure(format!("ffprobe produced invalid JSON: {err}"))
        })?;
        parse_probe_output(&value)
    }

    async fn create_proxy(
        &self,
        source: &Path,
        dest: &Path,
        options: &ProxyOptions,
        duration: f64,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> Result<(), OrchestratorError> {
        let scale = format!(
            "scale={}:{}:force_original_aspect_ratio=decrease",
            options.width, options.height
        );
        let args = vec![
            "-i".to_string(),
            source.display().to_string(),
            "-vf".to_string(),
            scale,
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "fast".to_string(),
            "-crf".to_string(),
            options.crf.to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "128k".to_string(),
            dest.display().to_string(),
        ];
        self.run_ffmpeg(&args, Some(duration), Some(progress), cancel)
            .await
            .map(|_| ())
    }

    async fn extract_audio(
        &self,
        source: &Path,
        dest: &Path,
        options: &AudioOptions,
        duration: f64,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> Result<(), OrchestratorError> {
        let mut args = vec![
            "-i".to_string(),
            source.display().to_string(),
            "-map".to_string(),
            format!("0:a:{}", options.track),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            options.sample_rate.to_string(),
        ];
        if options.normalize {
            args.push("-af".to_string());
            args.push("loudnorm=I=-16:TP=-1.5:LRA=11".to_string());
        }
        args.push("-c:a".to_string());
        args.push("pcm_s16le".to_string());
        args.push(dest.display().to_string());
        self.run_ffmpeg(&args, Some(duration), Some(progress), cancel)
            .await
            .map(|_| ())
    }

    async fn extract_thumbnail(
        &self,
        source: &Path,
        dest: &Path,
        at_seconds: f64,
    ) -> Result<(), OrchestratorError> {
        let args = vec![
            "-ss".to_string(),
            format!("{at_seconds:.3}"),
            "-i".to_string(),
            source.display().to_string(),
            "-vframes".to_string(),
            "1".to_string(),
            "-vf".to_string(),
            "scale=640:360:force_original_aspect_ratio=decrease,\
             pad=640:360:(ow-iw)/2:(oh-ih)/2:black"
                .to_string(),
            dest.display().to_string(),
        ];
        self.run_ffmpeg(&args, None, None, &CancelToken::new())
            .await
            .map(|_| ())
    }

    async fn detect_scenes(
        &self,
        source: &Path,
        cancel: &CancelToken,
    ) -> Result<Vec<SceneCut>, OrchestratorError> {
        let args = vec![
            "-i".to_string(),
            source.display().to_string(),
            "-vf".to_string(),
            "select='gt(scene,0.4)',metadata=print".to_string(),
            "-an".to_string(),
            "-f".to_string(),
            "null".to_string(),
            "-".to_string(),
        ];
        let stderr = self.run_ffmpeg(&args, None, None, cancel).await?;
        Ok(parse_scene_metadata(&stderr))
    }

    async fn detect_silence(
        &self,
        audio: &Path,
        cancel: &CancelToken,
    ) -> Result<Vec<QuietSpan>, OrchestratorError> {
        let args = vec![
            "-i".to_string(),
            audio.display().to_string(),
            "-af".to_string(),
            "silencedetect=noise=-35dB:d=0.6".to_string(),
            "-f".to_string(),
            "null".to_string(),
            "-".to_string(),
        ];
        let stderr = self.run_ffmpeg(&args, None, None, cancel).await?;
        Ok(parse_silence_output(&stderr))
    }

    async fn cut_clip(
        &self,
        source: &Path,
        dest: &Path,
        start: f64,
        end: f64,
        vertical: bool,
        cancel: &CancelToken,
    ) -> Result<(), OrchestratorError> {
        let mut args = vec![
            "-ss".to_string(),
            format!("{start:.3}"),
            "-to".to_string(),
            format!("{end:.3}"),
            "-i".to_string(),
            source.display().to_string(),
        ];
        if vertical {
            args.push("-vf".to_string());
            args.push("crop=ih*9/16:ih,scale=1080:1920".to_string());
        }
        args.extend(
            [
                "-c:v", "libx264", "-preset", "medium", "-crf", "20", "-c:a", "aac",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(dest.display().to_string());
        self.run_ffmpeg(&args, Some(end - start), None, cancel)
            .await
            .map(|_| ())
    }
}

/// `out_time_ms=` from `-progress` output is in microseconds.
fn parse_out_time_seconds(line: &str) -> Option<f64> {
    let raw = line.strip_prefix("out_time_ms=")?.trim();
    raw.parse::<i64>().ok().map(|us| us as f64 / 1_000_000.0)
}

fn parse_probe_output(value: &Value) -> Result<MediaInfo, OrchestratorError> {
    let streams = value
        .get("streams")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            OrchestratorError::HandlerFailure("ffprobe output has no streams".to_string())
        })?;
    let video = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(Value::as_str) == Some("video"))
        .ok_or_else(|| {
            OrchestratorError::HandlerFailure("source has no video stream".to_string())
        })?;
    let audio_tracks = streams
        .iter()
        .filter(|s| s.get("codec_type").and_then(Value::as_str) == Some("audio"))
        .count() as i64;

    let duration = value
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(Value::as_str)
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let fps = video
        .get("r_frame_rate")
        .and_then(Value::as_str)
        .map(parse_frame_rate)
        .unwrap_or(0.0);

    Ok(MediaInfo {
        duration,
        width: video.get("width").and_then(Value::as_i64).unwrap_or(0),
        height: video.get("height").and_then(Value::as_i64).unwrap_or(0),
        fps,
        audio_tracks,
    })
}

/// ffprobe frame rates come as fractions ("60000/1001").
fn parse_frame_rate(raw: &str) -> f64 {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num = num.parse::<f64>().unwrap_or(0.0);
            let den = den.parse::<f64>().unwrap_or(1.0);
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => raw.parse::<f64>().unwrap_or(0.0),
    }
}

/// Parse `metadata=print` output: pts_time on the frame line, scene score on
/// the following metadata line.
fn parse_scene_metadata(stderr: &str) -> Vec<SceneCut> {
    let mut cuts = Vec::new();
    let mut pending_time: Option<f64> = None;
    for line in stderr.lines() {
        if let Some(idx) = line.find("pts_time:") {
            pending_time = line[idx + "pts_time:".len()..]
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<f64>().ok());
        } else if let Some(idx) = line.find("lavfi.scene_score=") {
            let confidence = line[idx + "lavfi.scene_score=".len()..]
                .trim()
                .parse::<f64>()
                .unwrap_or(0.0);
            if let Some(time) = pending_time.take() {
                cuts.push(SceneCut { time, confidence });
            }
        }
    }
    cuts
}

fn parse_silence_output(stderr: &str) -> Vec<QuietSpan> {
    let mut spans = Vec::new();
    let mut pending_start: Option<f64> = None;
    for line in stderr.lines() {
        if let Some(idx) = line.find("silence_start:") {
            pending_start = line[idx + "silence_start:".len()..]
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<f64>().ok());
        } else if let Some(idx) = line.find("silence_end:") {
            let end = line[idx + "silence_end:".len()..]
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<f64>().ok());
            if let (Some(start), Some(end)) = (pending_start.take(), end) {
                spans.push(QuietSpan { start, end });
            }
        }
    }
    spans
}

fn tail(text: &str, max: usize) -> &str {
    let len = text.len();
    if len <= max {
        return text;
    }
    let mut start = len - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
