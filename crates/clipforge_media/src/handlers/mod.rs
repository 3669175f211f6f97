//! Job handlers for the pipeline stages.

mod analyze;
mod export;
mod ingest;
mod variants;

pub use analyze::AnalyzeHandler;
pub use export::ExportHandler;
pub use ingest::IngestHandler;
pub use variants::VariantsHandler;

use clipforge_engine::{HandlerRegistry, RegistryBuilder};
use clipforge_protocol::JobKind;
use std::sync::Arc;

use crate::fetcher::SourceFetcher;
use crate::scoring::SegmentScorer;
use crate::speech::SpeechToText;
use crate::transcoder::Transcoder;

/// Wire every pipeline handler into a frozen registry. The Scrape kind is
/// intentionally left unregistered here; scraping is not part of this
/// service.
pub fn build_registry(
    transcoder: Arc<dyn Transcoder>,
    stt: Arc<dyn SpeechToText>,
    fetcher: Arc<dyn SourceFetcher>,
    scorer: Arc<dyn SegmentScorer>,
) -> HandlerRegistry {
    RegistryBuilder::new()
        .register(
            JobKind::Ingest,
            Arc::new(IngestHandler::new(Arc::clone(&transcoder), fetcher)),
        )
        .register(
            JobKind::Analyze,
            Arc::new(AnalyzeHandler::new(Arc::clone(&transcoder), stt, scorer)),
        )
        .register(JobKind::Export, Arc::new(ExportHandler::new(Arc::clone(&transcoder))))
        .register(JobKind::RenderVariants, Arc::new(VariantsHandler::new(transcoder)))
        .build()
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Counting fakes for the collaborator seams.

    use super::*;
    use crate::transcoder::{
        AudioOptions, MediaInfo, ProgressFn, ProxyOptions, QuietSpan, SceneCut,
    };
    use async_trait::async_trait;
    use clipforge_engine::CancelToken;
    use clipforge_protocol::OrchestratorError;
    use serde_json::{json, Value};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    pub struct FakeTranscoder {
        pub probes: AtomicUsize,
        pub proxies: AtomicUsize,
        pub audio_extractions: AtomicUsize,
        pub scene_scans: AtomicUsize,
        pub silence_scans: AtomicUsize,
        pub clips: AtomicUsize,
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn availability(&self) -> Result<(), String> {
            Ok(())
        }

        async fn probe(&self, _source: &Path) -> Result<MediaInfo, OrchestratorError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(MediaInfo {
                duration: 600.0,
                width: 1920,
                height: 1080,
                fps: 60.0,
                audio_tracks: 1,
            })
        }

        async fn create_proxy(
            &self,
            _source: &Path,
            dest: &Path,
            _options: &ProxyOptions,
            _duration: f64,
            progress: ProgressFn<'_>,
            _cancel: &CancelToken,
        ) -> Result<(), OrchestratorError> {
            self.proxies.fetch_add(1, Ordering::SeqCst);
            progress(100.0);
            write_placeholder(dest)
        }

        async fn extract_audio(
            &self,
            _source: &Path,
            dest: &Path,
            _options: &AudioOptions,
            _duration: f64,
            progress: ProgressFn<'_>,
            _cancel: &CancelToken,
        ) -> Result<(), OrchestratorError> {
            self.audio_extractions.fetch_add(1, Ordering::SeqCst);
            progress(100.0);
            write_placeholder(dest)
        }

        async fn extract_thumbnail(
            &self,
            _source: &Path,
            dest: &Path,
            _at_seconds: f64,
        ) -> Result<(), OrchestratorError> {
            write_placeholder(dest)
        }

        async fn detect_scenes(
            &self,
            _source: &Path,
            _cancel: &CancelToken,
        ) -> Result<Vec<SceneCut>, OrchestratorError> {
            self.scene_scans.fetch_add(1, Ordering::SeqCst);
            Ok(vec![SceneCut {
                time: 12.0,
                confidence: 0.8,
            }])
        }

        async fn detect_silence(
            &self,
            _audio: &Path,
            _cancel: &CancelToken,
        ) -> Result<Vec<QuietSpan>, OrchestratorError> {
            self.silence_scans.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn cut_clip(
            &self,
            _source: &Path,
            dest: &Path,
            _start: f64,
            _end: f64,
            _vertical: bool,
            _cancel: &CancelToken,
        ) -> Result<(), OrchestratorError> {
            self.clips.fetch_add(1, Ordering::SeqCst);
            write_placeholder(dest)
        }
    }

    fn write_placeholder(dest: &Path) -> Result<(), OrchestratorError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| OrchestratorError::HandlerFailure(err.to_string()))?;
        }
        std::fs::write(dest, b"media")
            .map_err(|err| OrchestratorError::HandlerFailure(err.to_string()))
    }

    #[derive(Default)]
    pub struct FakeSpeech {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechToText for FakeSpeech {
        async fn availability(&self) -> Result<(), String> {
            Ok(())
        }

        async fn transcribe(
            &self,
            _audio: &Path,
            _language: Option<&str>,
            progress: ProgressFn<'_>,
            _cancel: &CancelToken,
        ) -> Result<Value, OrchestratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            progress(100.0);
            let segments: Vec<Value> = (0..40)
                .map(|i| {
                    json!({
                        "start": i as f64 * 5.0,
                        "end": i as f64 * 5.0 + 5.0,
                        "text": "here's why this moment matters"
                    })
                })
                .collect();
            Ok(json!({"text": "fake transcript", "language": "en", "segments": segments}))
        }
    }

    #[derive(Default)]
    pub struct FakeFetcher {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceFetcher for FakeFetcher {
        async fn fetch(
            &self,
            _url: &str,
            dest_dir: &Path,
            progress: ProgressFn<'_>,
            _cancel: &CancelToken,
        ) -> Result<PathBuf, OrchestratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::create_dir_all(dest_dir)
                .map_err(|err| OrchestratorError::HandlerFailure(err.to_string()))?;
            let path = dest_dir.join("source.mp4");
            std::fs::write(&path, b"video")
                .map_err(|err| OrchestratorError::HandlerFailure(err.to_string()))?;
            progress(100.0);
            Ok(path)
        }
    }

    pub fn fakes() -> (Arc<FakeTranscoder>, Arc<FakeSpeech>, Arc<FakeFetcher>) {
        (
            Arc::new(FakeTranscoder::default()),
            Arc::new(FakeSpeech::default()),
            Arc::new(FakeFetcher::default()),
        )
    }
}
