//! Source fetcher seam for the ingest download variant.

use async_trait::async_trait;
use clipforge_engine::CancelToken;
use clipforge_protocol::OrchestratorError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::transcoder::ProgressFn;

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Download `url` into `dest_dir` and return the materialized file path.
    async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> Result<PathBuf, OrchestratorError>;
}

/// Default fetcher shelling out to yt-dlp.
pub struct YtDlpFetcher {
    bin: PathBuf,
}

impl YtDlpFetcher {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

#[async_trait]
impl SourceFetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> Result<PathBuf, OrchestratorError> {
        std::fs::create_dir_all(dest_dir).map_err(|err| {
            OrchestratorError::HandlerFailure(format!("failed to create source dir: {err}"))
        })?;
        let template = dest_dir.join("source.%(ext)s");

        debug!(url, "spawning yt-dlp");
        let mut child = Command::new(&self.bin)
            .args(["--no-playlist", "--newline", "-o"])
            .arg(&template)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                OrchestratorError::HandlerFailure(format!(
                    "failed to spawn {}: {err}",
                    self.bin.display()
                ))
            })?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if let Some(pct) = parse_download_progress(&line) {
                                progress(pct);
                            }
                        }
                        Ok(None) => break,
                        Err(_) => break,
                    },
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
            OrchestratorError::HandlerFailure(format!("yt-dlp wait failed: {err}"))
        })?;
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        if !status.success() {
            return Err(OrchestratorError::HandlerFailure(format!(
                "yt-dlp exited with {status} for {url}"
            )));
        }

        find_downloaded_file(dest_dir).ok_or_else(|| {
            OrchestratorError::HandlerFailure(format!(
                "yt-dlp finished but no source file found in {}",
                dest_dir.display()
            ))
        })
    }
}

/// Parse a `[download]  42.3% of ...` line.
fn parse_download_progress(line: &str) -> Option<f64> {
    let rest = line.trim().strip_prefix("[download]")?.trim_start();
    let pct = rest.split('%').next()?.trim();
    pct.parse::<f64>().ok().filter(|p| (0.0..=100.0).contains(p))
}

fn find_downloaded_file(dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().starts_with("source"))
                    .unwrap_or(false)
                && path.extension().map(|ext| ext != "part").unwrap_or(true)
        })
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_download_progress() {
        assert_eq!(
            parse_download_progress("[download]  42.3% of 1.20GiB at 5.1MiB/s"),
            Some(42.3)
        );
        assert_eq!(parse_download_progress("[download] 100% of 1.20GiB"), Some(100.0));
        assert_eq!(parse_download_progress("[info] extracting"), None);
        assert_eq!(parse_download_progress("[download] Destination: x.mp4"), None);
    }

    #[test]
    fn test_find_downloaded_file_skips_partials() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("source.mp4.part"), b"partial").unwrap();
        assert!(find_downloaded_file(dir.path()).is_none());

        std::fs::write(dir.path().join("source.mp4"), b"done").unwrap();
        let found = find_downloaded_file(dir.path()).unwrap();
        assert!(found.ends_with("source.mp4"));
    }
}
