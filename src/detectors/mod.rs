//! Detector contract
//!
//! ## Responsibilities
//!
//! - Shared vocabulary: severity, detection level, finding
//! - `DetectorDescriptor` (identity, level gating, priority, suppression
//!   edges) declared statically per detector
//! - `Detector` trait implemented by the eight image detectors
//!
//! Detectors are pure CPU functions over one frame plus a resolved
//! threshold vector; they never suspend and never abort the pipeline -
//! failures are converted to synthetic findings upstream.

pub mod blur;
pub mod brightness;
pub mod color;
pub mod contrast;
pub mod noise;
pub mod occlusion;
pub mod registry;
pub mod signal_loss;
pub mod stripe;
pub mod video;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame::Frame;
use crate::profiles::Thresholds;

/// Abnormality grade of one finding or verdict.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Normal,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Normal => "normal",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute budget tier. Gates which detectors run and which feature blends
/// they use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectionLevel {
    Fast,
    #[default]
    Standard,
    Deep,
}

impl DetectionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionLevel::Fast => "fast",
            DetectionLevel::Standard => "standard",
            DetectionLevel::Deep => "deep",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fast" => Some(Self::Fast),
            "standard" => Some(Self::Standard),
            "deep" => Some(Self::Deep),
            _ => None,
        }
    }
}

/// Static identity card of a detector.
#[derive(Debug, Clone, Serialize)]
pub struct DetectorDescriptor {
    /// Stable identifier used in requests, findings and suppression edges.
    pub name: &'static str,
    pub display_name: &'static str,
    /// Issue category this detector reports under.
    pub issue_type: &'static str,
    pub description: &'static str,
    /// Levels this detector participates in.
    pub levels: &'static [DetectionLevel],
    /// Lower wins when selecting the primary issue.
    pub priority: u32,
    /// Detector names silenced when this detector fires.
    pub suppresses: &'static [&'static str],
}

impl DetectorDescriptor {
    pub fn supports(&self, level: DetectionLevel) -> bool {
        self.levels.contains(&level)
    }
}

/// Output of one detector on one frame.
///
/// Emitted for normal frames too (`is_abnormal = false`), so callers can
/// report healthy scores. `score` stays in the detector's native scale;
/// `confidence` is the normalized [0, 1] companion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub detector: String,
    pub issue_type: String,
    pub is_abnormal: bool,
    pub score: f32,
    pub threshold: f32,
    pub confidence: f32,
    pub severity: Severity,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub possible_causes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    /// Diagnostic numbers for UI overlays; keys are detector-owned.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub evidence: serde_json::Map<String, serde_json::Value>,
    pub process_time_ms: f32,
    pub level: DetectionLevel,
}

impl Finding {
    /// Skeleton with empty narrative fields; detectors fill the rest.
    pub fn new(descriptor: &DetectorDescriptor, level: DetectionLevel) -> Self {
        Self {
            detector: descriptor.name.to_string(),
            issue_type: descriptor.issue_type.to_string(),
            is_abnormal: false,
            score: 0.0,
            threshold: 0.0,
            confidence: 0.0,
            severity: Severity::Normal,
            explanation: String::new(),
            possible_causes: Vec::new(),
            suggestions: Vec::new(),
            evidence: serde_json::Map::new(),
            process_time_ms: 0.0,
            level,
        }
    }

    /// Abnormality margin used for primary-issue tie breaks.
    pub fn score_ratio(&self) -> f32 {
        if self.threshold.abs() < f32::EPSILON {
            return 0.0;
        }
        self.score / self.threshold
    }
}

/// Distance-from-threshold squashed into [0, 1].
///
/// Zero at the decision boundary, saturating as the score moves away. The
/// denominator keeps the ratio scale-free across detectors.
pub fn squash_confidence(score: f32, threshold: f32) -> f32 {
    let denom = threshold.abs().max(1e-6);
    (2.0 * (score - threshold).abs() / denom).tanh().clamp(0.0, 1.0)
}

/// Convenience for inserting f32 evidence values.
pub fn ev(value: f32) -> serde_json::Value {
    serde_json::Number::from_f64(value as f64)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// A detector: pure function over a frame and a resolved configuration.
pub trait Detector: std::fmt::Debug + Send + Sync {
    fn descriptor(&self) -> &'static DetectorDescriptor;

    /// Run on one frame at the given level. Must not suspend.
    fn detect(&self, frame: &Frame, level: DetectionLevel) -> Result<Finding>;
}

/// Factory signature stored in the registry.
pub type DetectorFactory = fn(&Thresholds) -> Box<dyn Detector>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_by_badness() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert!(Severity::Info > Severity::Normal);
    }

    #[test]
    fn confidence_zero_at_boundary_and_saturates() {
        assert_eq!(squash_confidence(100.0, 100.0), 0.0);
        assert!(squash_confidence(10.0, 100.0) > 0.9);
        let near = squash_confidence(95.0, 100.0);
        let far = squash_confidence(50.0, 100.0);
        assert!(far > near);
    }

    #[test]
    fn level_parse_round_trips() {
        for level in [
            DetectionLevel::Fast,
            DetectionLevel::Standard,
            DetectionLevel::Deep,
        ] {
            assert_eq!(DetectionLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(DetectionLevel::parse("turbo"), None);
    }
}
