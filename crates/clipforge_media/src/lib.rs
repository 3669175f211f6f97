//! Media collaborators and the pipeline handlers built on them.
//!
//! The traits here are the seams the core consumes: a transcoder (ffmpeg), a
//! speech-to-text engine (whisper CLI), a source fetcher (yt-dlp) and the
//! pluggable segment scoring policy. The handlers drive those seams through
//! the ingest -> analyze -> export stage graph.

pub mod fetcher;
pub mod handlers;
pub mod scoring;
pub mod speech;
pub mod transcoder;

pub use fetcher::{SourceFetcher, YtDlpFetcher};
pub use handlers::{AnalyzeHandler, ExportHandler, IngestHandler, VariantsHandler};
pub use scoring::{HeuristicScorer, SegmentScorer, TranscriptSegment};
pub use speech::{SpeechToText, WhisperCli};
pub use transcoder::{FfmpegTranscoder, MediaInfo, SceneCut, Transcoder};
