//! Video detectors
//!
//! Temporal detectors over a window of sampled frames: freeze, scene
//! change, shake. Each one compares adjacent sampled frames, collects hits
//! into time segments, and reports a `VideoFinding`.

pub mod freeze;
pub mod scene_change;
pub mod shake;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame::Frame;

use super::Severity;

/// Working resolution for pairwise frame comparison (longest side).
pub(crate) const COMPARE_MAX_SIDE: u32 = 320;

/// Contiguous time span during which an issue is active.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VideoSegment {
    pub start_frame: u64,
    pub end_frame: u64,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub confidence: f32,
}

impl VideoSegment {
    pub fn new(start_frame: u64, end_frame: u64, start_time: f64, end_time: f64) -> Self {
        Self {
            start_frame,
            end_frame,
            start_time,
            end_time,
            duration: (end_time - start_time).max(0.0),
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Output of one video detector over a sampled window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFinding {
    pub detector: String,
    pub issue_type: String,
    pub is_abnormal: bool,
    pub score: f32,
    pub threshold: f32,
    pub confidence: f32,
    pub severity: Severity,
    pub segments: Vec<VideoSegment>,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub possible_causes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub evidence: serde_json::Map<String, serde_json::Value>,
    pub frames_analyzed: usize,
    pub process_time_ms: f32,
}

impl VideoFinding {
    pub fn empty(detector: &str, issue_type: &str, threshold: f32, frames: usize) -> Self {
        Self {
            detector: detector.to_string(),
            issue_type: issue_type.to_string(),
            is_abnormal: false,
            score: 0.0,
            threshold,
            confidence: 1.0,
            severity: Severity::Normal,
            segments: Vec::new(),
            explanation: String::new(),
            possible_causes: Vec::new(),
            suggestions: Vec::new(),
            evidence: serde_json::Map::new(),
            frames_analyzed: frames,
            process_time_ms: 0.0,
        }
    }
}

/// Severity from the score/threshold ratio.
pub(crate) fn ratio_severity(score: f32, threshold: f32) -> Severity {
    if threshold <= 0.0 || score <= threshold {
        return Severity::Normal;
    }
    let ratio = score / threshold;
    if ratio < 1.5 {
        Severity::Info
    } else if ratio < 2.0 {
        Severity::Warning
    } else {
        Severity::Error
    }
}

/// Timestamp of a sampled frame, falling back to index / fps.
pub(crate) fn frame_timestamp(frame: &Frame, index: usize, fps: f64) -> f64 {
    frame
        .timestamp
        .unwrap_or(if fps > 0.0 { index as f64 / fps } else { 0.0 })
}

/// Source frame index of a sampled frame, falling back to the sample index.
pub(crate) fn frame_index(frame: &Frame, index: usize) -> u64 {
    frame.index.unwrap_or(index as u64)
}

/// A video detector aggregates findings across a sampled frame window.
/// Frames carry their timestamps; `fps` is the source rate for fallbacks.
pub trait VideoDetector: Send + Sync {
    fn name(&self) -> &'static str;
    fn issue_type(&self) -> &'static str;
    fn detect(&self, frames: &[Frame], fps: f64) -> Result<VideoFinding>;
}

/// The built-in video detector set.
pub fn builtin_video_detectors() -> Vec<Box<dyn VideoDetector>> {
    vec![
        Box::new(freeze::FreezeDetector::default()),
        Box::new(scene_change::SceneChangeDetector::default()),
        Box::new(shake::ShakeDetector::default()),
    ]
}

/// Descriptor-style listing for the operation surface.
pub fn list_video_detectors() -> Vec<(&'static str, &'static str)> {
    builtin_video_detectors()
        .iter()
        .map(|d| (d.name(), d.issue_type()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_severity_bands() {
        assert_eq!(ratio_severity(0.5, 1.0), Severity::Normal);
        assert_eq!(ratio_severity(1.2, 1.0), Severity::Info);
        assert_eq!(ratio_severity(1.7, 1.0), Severity::Warning);
        assert_eq!(ratio_severity(3.0, 1.0), Severity::Error);
    }

    #[test]
    fn builtin_set_is_three() {
        let names: Vec<&str> = list_video_detectors().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["freeze", "scene_change", "shake"]);
    }
}
