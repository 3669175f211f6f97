//! Per-kind payload records.
//!
//! Job payloads arrive as untyped JSON and are decoded into these records at
//! claim time. Unknown fields are preserved verbatim through the `extra` maps
//! so supervisor-written metadata (such as [`RETRY_COUNT_FIELD`]) survives a
//! decode/encode round trip.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload field the supervisor increments when it re-creates a failed job.
pub const RETRY_COUNT_FIELD: &str = "_retry_count";

fn default_true() -> bool {
    true
}

/// Which half of the ingest stage a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Fetch a remote source into the project directory.
    Download,
    /// Probe, proxy and audio-extract a materialized source.
    #[default]
    Prepare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestPayload {
    #[serde(default)]
    pub mode: IngestMode,
    /// Remote source location, required for the download variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default = "default_true")]
    pub create_proxy: bool,
    #[serde(default = "default_true")]
    pub extract_audio: bool,
    #[serde(default)]
    pub audio_track: u32,
    #[serde(default = "default_true")]
    pub normalize_audio: bool,
    /// Download variant: chain into the prepare variant on success.
    #[serde(default = "default_true")]
    pub auto_ingest: bool,
    /// Prepare variant: chain into Analyze on success.
    #[serde(default = "default_true")]
    pub auto_analyze: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for IngestPayload {
    fn default() -> Self {
        Self {
            mode: IngestMode::Prepare,
            source_url: None,
            create_proxy: true,
            extract_audio: true,
            audio_track: 0,
            normalize_audio: true,
            auto_ingest: true,
            auto_analyze: true,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzePayload {
    #[serde(default = "default_true")]
    pub transcribe: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default = "default_true")]
    pub detect_scenes: bool,
    #[serde(default = "default_true")]
    pub analyze_audio: bool,
    #[serde(default = "default_true")]
    pub detect_layout: bool,
    #[serde(default = "default_true")]
    pub score_segments: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AnalyzePayload {
    fn default() -> Self {
        Self {
            transcribe: true,
            language: None,
            detect_scenes: true,
            analyze_audio: true,
            detect_layout: true,
            score_segments: true,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportPayload {
    /// Segments to render; empty means every stored segment.
    #[serde(default)]
    pub segment_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantsPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<String>,
    #[serde(default = "default_variant_count")]
    pub variants: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_variant_count() -> u32 {
    3
}

impl Default for VariantsPayload {
    fn default() -> Self {
        Self {
            segment_id: None,
            variants: default_variant_count(),
            extra: Map::new(),
        }
    }
}

/// Copy a payload and bump its retry counter, preserving every other field.
pub fn with_incremented_retry(payload: &Value) -> Value {
    let mut next = payload.clone();
    let count = next
        .get(RETRY_COUNT_FIELD)
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if let Value::Object(map) = &mut next {
        map.insert(RETRY_COUNT_FIELD.to_string(), Value::from(count + 1));
    } else {
        let mut map = Map::new();
        map.insert(RETRY_COUNT_FIELD.to_string(), Value::from(count + 1));
        next = Value::Object(map);
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_defaults() {
        let payload: IngestPayload = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(payload.mode, IngestMode::Prepare);
        assert!(payload.create_proxy);
        assert!(payload.auto_analyze);
        assert_eq!(payload.audio_track, 0);
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let raw = serde_json::json!({
            "mode": "download",
            "source_url": "https://example.com/vod",
            "_retry_count": 2,
            "operator_note": "requeued by hand"
        });
        let decoded: IngestPayload = serde_json::from_value(raw).unwrap();
        assert_eq!(decoded.mode, IngestMode::Download);
        let encoded = serde_json::to_value(&decoded).unwrap();
        assert_eq!(encoded["_retry_count"], 2);
        assert_eq!(encoded["operator_note"], "requeued by hand");
    }

    #[test]
    fn test_with_incremented_retry() {
        let first = with_incremented_retry(&serde_json::json!({"transcribe": true}));
        assert_eq!(first[RETRY_COUNT_FIELD], 1);
        assert_eq!(first["transcribe"], true);
        let second = with_incremented_retry(&first);
        assert_eq!(second[RETRY_COUNT_FIELD], 2);
    }
}
