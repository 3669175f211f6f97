//! Candidate segment generation and scoring.
//!
//! The scorer is pluggable policy: the pipeline only needs *some* ranked set
//! of candidate sub-clips. The default heuristic slides windows over the
//! transcript and scores hooks, speech density, scene alignment and dead
//! air. Weights here are deliberately coarse; a product deployment swaps in
//! its own implementation.

use chrono::Utc;
use clipforge_protocol::Segment;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::transcoder::{QuietSpan, SceneCut};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Pull the transcript segments out of a normalized transcript blob.
pub fn transcript_segments(transcript: &Value) -> Vec<TranscriptSegment> {
    transcript
        .get("segments")
        .and_then(Value::as_array)
        .map(|segments| {
            segments
                .iter()
                .filter_map(|segment| {
                    Some(TranscriptSegment {
                        start: segment.get("start").and_then(Value::as_f64)?,
                        end: segment.get("end").and_then(Value::as_f64)?,
                        text: segment
                            .get("text")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub trait SegmentScorer: Send + Sync {
    fn build_segments(
        &self,
        project_id: &str,
        transcript: &[TranscriptSegment],
        duration: f64,
        quiet: &[QuietSpan],
        scenes: &[SceneCut],
    ) -> Vec<Segment>;
}

/// Opening phrases that tend to retain viewers.
const HOOK_PHRASES: &[(&str, f64)] = &[
    ("you won't believe", 10.0),
    ("wait for it", 10.0),
    ("watch this", 8.0),
    ("here's why", 8.0),
    ("the problem is", 6.0),
    ("the secret", 8.0),
    ("never", 4.0),
    ("insane", 6.0),
    ("crazy", 4.0),
    ("no way", 6.0),
];

/// Closing phrases that suggest a payoff landed.
const PAYOFF_PHRASES: &[&str] = &["turns out", "finally", "and that's why", "that's how", "so that"];

pub struct HeuristicScorer {
    window_sizes: Vec<f64>,
    min_duration: f64,
    max_segments: usize,
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self {
            window_sizes: vec![30.0, 45.0, 60.0, 90.0, 120.0],
            min_duration: 15.0,
            max_segments: 12,
        }
    }
}

impl HeuristicScorer {
    fn score_window(
        &self,
        window: &[&TranscriptSegment],
        quiet: &[QuietSpan],
        scenes: &[SceneCut],
    ) -> (f64, Value) {
        let start = window[0].start;
        let end = window[window.len() - 1].end;
        let duration = (end - start).max(1.0);
        let text: String = window
            .iter()
            .map(|segment| segment.text.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");

        // Hook strength: retention phrases inside the opening seconds.
        let opening: String = window
            .iter()
            .take_while(|segment| segment.start < start + 8.0)
            .map(|segment| segment.text.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        let mut hook = 0.0;
        for (phrase, points) in HOOK_PHRASES {
            if opening.contains(phrase) {
                hook += points;
            }
        }
        if opening.contains('?') {
            hook += 5.0;
        }
        let hook = hook.min(25.0);

        // Payoff: the clip resolves rather than trailing off.
        let closing = window[window.len() - 1].text.to_lowercase();
        let mut payoff: f64 = 0.0;
        for phrase in PAYOFF_PHRASES {
            if closing.contains(phrase) {
                payoff += 8.0;
            }
        }
        if closing.trim_end().ends_with('!') || closing.trim_end().ends_with('?') {
            payoff += 5.0;
        }
        let payoff = payoff.min(20.0);

        // Rhythm: speech density in words per second, best between 2 and 4.5.
        let words = text.split_whitespace().count() as f64;
        let density = words / duration;
        let rhythm = if (2.0..=4.5).contains(&density) {
            20.0
        } else if density > 0.5 {
            10.0
        } else {
            0.0
        };

        // Dead air inside the window drags the score down.
        let quiet_secs: f64 = quiet
            .iter()
            .map(|span| overlap(span.start, span.end, start, end))
            .sum();
        let quiet_penalty = (quiet_secs / duration * 30.0).min(15.0);

        // Scene alignment: a cut near the start makes a clean open, and some
        // visual variety inside keeps attention.
        let mut scene_bonus = 0.0;
        if scenes
            .iter()
            .any(|cut| (cut.time - start).abs() <= 3.0)
        {
            scene_bonus += 8.0;
        }
        let cuts_inside = scenes
            .iter()
            .filter(|cut| cut.time > start && cut.time < end)
            .count() as f64;
        scene_bonus += (cuts_inside * 2.0).min(7.0);

        let base = 25.0;
        let total = (base + hook + payoff + rhythm + scene_bonus - quiet_penalty)
            .clamp(0.0, 100.0);

        let breakdown = json!({
            "hook": hook,
            "payoff": payoff,
            "rhythm": rhythm,
            "scenes": scene_bonus,
            "quiet_penalty": quiet_penalty,
        });
        (total, breakdown)
    }
}

impl SegmentScorer for HeuristicScorer {
    fn build_segments(
        &self,
        project_id: &str,
        transcript: &[TranscriptSegment],
        duration: f64,
        quiet: &[QuietSpan],
        scenes: &[SceneCut],
    ) -> Vec<Segment> {
        if transcript.is_empty() || duration <= 0.0 {
            return Vec::new();
        }

        let mut candidates: Vec<Segment> = Vec::new();
        for &window_size in &self.window_sizes {
            let step = (window_size / 3.0).max(5.0);
            let mut cursor = 0.0;
            while cursor + window_size <= duration + step {
                let window_end = cursor + window_size;
                let inside: Vec<&TranscriptSegment> = transcript
                    .iter()
                    .filter(|segment| segment.start >= cursor && segment.end <= window_end)
                    .collect();
                cursor += step;
                if inside.is_empty() {
                    continue;
                }
                let start = inside[0].start;
                let end = inside[inside.len() - 1].end;
                if end - start < self.min_duration {
                    continue;
                }

                let (total, breakdown) = self.score_window(&inside, quiet, scenes);
                let text: String = inside
                    .iter()
                    .map(|segment| segment.text.trim())
                    .collect::<Vec<_>>()
                    .join(" ");
                candidates.push(Segment {
                    id: Uuid::new_v4().to_string(),
                    project_id: project_id.to_string(),
                    start_time: start,
                    end_time: end,
                    duration: end - start,
                    topic_label: None,
                    hook_text: inside.first().map(|segment| segment.text.trim().to_string()),
                    transcript: Some(text),
                    score_total: total,
                    score_breakdown: Some(breakdown),
                    created_at: Utc::now(),
                });
            }
        }

        // Highest score wins; drop candidates mostly covered by a kept one.
        candidates.sort_by(|a, b| {
            b.score_total
                .partial_cmp(&a.score_total)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut kept: Vec<Segment> = Vec::new();
        for candidate in candidates {
            let overlaps = kept.iter().any(|existing| {
                let shared = overlap(
                    existing.start_time,
                    existing.end_time,
                    candidate.start_time,
                    candidate.end_time,
                );
                shared / candidate.duration.min(existing.duration) > 0.6
            });
            if !overlaps {
                kept.push(candidate);
            }
            if kept.len() >= self.max_segments {
                break;
            }
        }
        kept
    }
}

fn overlap(a_start: f64, a_end: f64, b_start: f64, b_end: f64) -> f64 {
    (a_end.min(b_end) - a_start.max(b_start)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chatter(from: f64, to: f64, text: &str) -> Vec<TranscriptSegment> {
        // Fill [from, to) with 5-second utterances.
        let mut segments = Vec::new();
        let mut cursor = from;
        while cursor + 5.0 <= to {
            segments.push(TranscriptSegment {
                start: cursor,
                end: cursor + 5.0,
                text: text.to_string(),
            });
            cursor += 5.0;
        }
        segments
    }

    #[test]
    fn test_empty_transcript_yields_nothing() {
        let scorer = HeuristicScorer::default();
        assert!(scorer.build_segments("p", &[], 600.0, &[], &[]).is_empty());
    }

    #[test]
    fn test_segments_generated_and_bounded() {
        let scorer = HeuristicScorer::default();
        let transcript = chatter(0.0, 600.0, "we keep talking about the plan here");
        let segments = scorer.build_segments("p", &transcript, 600.0, &[], &[]);
        assert!(!segments.is_empty());
        assert!(segments.len() <= 12);
        for segment in &segments {
            assert!(segment.duration >= 15.0);
            assert!(segment.score_total >= 0.0 && segment.score_total <= 100.0);
            assert_eq!(segment.project_id, "p");
        }
    }

    #[test]
    fn test_kept_segments_do_not_stack() {
        let scorer = HeuristicScorer::default();
        let transcript = chatter(0.0, 300.0, "steady commentary with no surprises at all");
        let segments = scorer.build_segments("p", &transcript, 300.0, &[], &[]);
        for (i, a) in segments.iter().enumerate() {
            for b in segments.iter().skip(i + 1) {
                let shared = overlap(a.start_time, a.end_time, b.start_time, b.end_time);
                assert!(shared / a.duration.min(b.duration) <= 0.6);
            }
        }
    }

    #[test]
    fn test_hook_opening_outscores_bland_opening() {
        let scorer = HeuristicScorer::default();
        let mut hooked = chatter(0.0, 60.0, "steady commentary goes here");
        hooked[0].text = "you won't believe what happens, wait for it".to_string();
        let bland = chatter(0.0, 60.0, "steady commentary goes here");

        let hooked_score = scorer.build_segments("p", &hooked, 60.0, &[], &[])[0].score_total;
        let bland_score = scorer.build_segments("p", &bland, 60.0, &[], &[])[0].score_total;
        assert!(hooked_score > bland_score);
    }

    #[test]
    fn test_dead_air_penalizes() {
        let scorer = HeuristicScorer::default();
        let transcript = chatter(0.0, 60.0, "some words spoken here now");
        let quiet = vec![QuietSpan { start: 0.0, end: 30.0 }];

        let noisy_score = scorer.build_segments("p", &transcript, 60.0, &quiet, &[])[0].score_total;
        let clean_score = scorer.build_segments("p", &transcript, 60.0, &[], &[])[0].score_total;
        assert!(noisy_score < clean_score);
    }

    #[test]
    fn test_scene_cut_at_open_rewards() {
        let scorer = HeuristicScorer::default();
        let transcript = chatter(0.0, 60.0, "some words spoken here now");
        let scenes = vec![SceneCut { time: 0.5, confidence: 0.9 }];

        let with_cut = scorer.build_segments("p", &transcript, 60.0, &[], &scenes)[0].score_total;
        let without = scorer.build_segments("p", &transcript, 60.0, &[], &[])[0].score_total;
        assert!(with_cut > without);
    }

    #[test]
    fn test_transcript_segments_parsing() {
        let value = json!({
            "segments": [
                {"start": 0.0, "end": 2.0, "text": "hi"},
                {"start": "bad", "end": 4.0, "text": "dropped"}
            ]
        });
        let segments = transcript_segments(&value);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "hi");
    }
}
