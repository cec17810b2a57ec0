//! Shake detector
//!
//! Global motion magnitude between adjacent sampled frames via sparse
//! block matching. A sliding window of W pair-flags marks shake when at
//! least K pairs in the window exceed the motion threshold; flagged runs
//! become segments.

use std::time::Instant;

use crate::detectors::ev;
use crate::error::Result;
use crate::frame::Frame;
use crate::imgproc::compare;

use super::{
    frame_index, frame_timestamp, ratio_severity, VideoDetector, VideoFinding, VideoSegment,
    COMPARE_MAX_SIDE,
};

#[derive(Debug, Clone)]
pub struct ShakeConfig {
    /// Mean block displacement (pixels at compare resolution) above which
    /// a pair counts as moving.
    pub motion_threshold: f32,
    /// Sliding window length in pairs.
    pub window: usize,
    /// Minimum moving pairs within the window to call shake.
    pub min_hits: usize,
    /// Shorter shake runs are dropped (seconds).
    pub min_shake_duration: f64,
    /// Block search radius in pixels.
    pub search_radius: usize,
}

impl Default for ShakeConfig {
    fn default() -> Self {
        Self {
            motion_threshold: 5.0,
            window: 5,
            min_hits: 3,
            min_shake_duration: 0.5,
            search_radius: 8,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShakeDetector {
    pub config: ShakeConfig,
}

impl ShakeDetector {
    pub fn new(config: ShakeConfig) -> Self {
        Self { config }
    }
}

impl VideoDetector for ShakeDetector {
    fn name(&self) -> &'static str {
        "shake"
    }

    fn issue_type(&self) -> &'static str {
        "shake"
    }

    fn detect(&self, frames: &[Frame], fps: f64) -> Result<VideoFinding> {
        let start = Instant::now();
        let mut finding = VideoFinding::empty(
            self.name(),
            self.issue_type(),
            self.config.motion_threshold,
            frames.len(),
        );
        if frames.len() < 2 {
            finding.explanation = "Not enough sampled frames for shake analysis".into();
            return Ok(finding);
        }

        let planes: Vec<_> = frames
            .iter()
            .map(|f| f.downsample_to(COMPARE_MAX_SIDE).gray())
            .collect();

        // Pair i covers frames[i] -> frames[i+1]
        let magnitudes: Vec<f32> = (1..frames.len())
            .map(|i| {
                compare::block_motion_magnitude(&planes[i - 1], &planes[i], self.config.search_radius)
            })
            .collect();
        let moving: Vec<bool> = magnitudes
            .iter()
            .map(|&m| m > self.config.motion_threshold)
            .collect();

        // Window vote: a pair is shake when some window containing it has
        // >= min_hits moving pairs.
        let w = self.config.window.max(1).min(moving.len());
        let mut shake = vec![false; moving.len()];
        for window_start in 0..=moving.len().saturating_sub(w) {
            let hits = moving[window_start..window_start + w]
                .iter()
                .filter(|&&m| m)
                .count();
            if hits >= self.config.min_hits.min(w) {
                for (offset, &m) in moving[window_start..window_start + w].iter().enumerate() {
                    if m {
                        shake[window_start + offset] = true;
                    }
                }
            }
        }

        // Merge flagged pairs into segments (pair i spans frame i..i+1)
        let mut segments: Vec<VideoSegment> = Vec::new();
        let mut run_start: Option<usize> = None;
        for (pair, &flagged) in shake.iter().enumerate() {
            if flagged {
                if run_start.is_none() {
                    run_start = Some(pair);
                }
                continue;
            }
            if let Some(s) = run_start.take() {
                let seg = VideoSegment::new(
                    frame_index(&frames[s], s),
                    frame_index(&frames[pair], pair),
                    frame_timestamp(&frames[s], s, fps),
                    frame_timestamp(&frames[pair], pair, fps),
                )
                .with_confidence(0.85);
                if seg.duration >= self.config.min_shake_duration {
                    segments.push(seg);
                }
            }
        }
        if let Some(s) = run_start.take() {
            let last = frames.len() - 1;
            let seg = VideoSegment::new(
                frame_index(&frames[s], s),
                frame_index(&frames[last], last),
                frame_timestamp(&frames[s], s, fps),
                frame_timestamp(&frames[last], last, fps),
            )
            .with_confidence(0.85);
            if seg.duration >= self.config.min_shake_duration {
                segments.push(seg);
            }
        }

        let flagged_mags: Vec<f32> = magnitudes
            .iter()
            .zip(&shake)
            .filter(|(_, &s)| s)
            .map(|(&m, _)| m)
            .collect();
        let score = if flagged_mags.is_empty() {
            0.0
        } else {
            flagged_mags.iter().sum::<f32>() / flagged_mags.len() as f32
        };
        let max_motion = magnitudes.iter().cloned().fold(0.0f32, f32::max);
        let avg_motion = if magnitudes.is_empty() {
            0.0
        } else {
            magnitudes.iter().sum::<f32>() / magnitudes.len() as f32
        };

        finding.is_abnormal = !segments.is_empty();
        finding.score = score;
        finding.confidence = if finding.is_abnormal { 0.85 } else { 1.0 };
        finding.severity = ratio_severity(score, finding.threshold);
        finding.evidence.insert("avg_motion".into(), ev(avg_motion));
        finding.evidence.insert("max_motion".into(), ev(max_motion));
        finding
            .evidence
            .insert("moving_pair_count".into(), ev(moving.iter().filter(|&&m| m).count() as f32));
        finding.segments = segments;

        finding.explanation = if finding.is_abnormal {
            let total: f64 = finding.segments.iter().map(|s| s.duration).sum();
            format!(
                "Shake detected: {} span(s), {:.2} s total, mean motion {:.1} px",
                finding.segments.len(),
                total,
                score
            )
        } else {
            format!("Picture is stable (mean motion {avg_motion:.1} px)")
        };
        if finding.is_abnormal {
            finding.possible_causes = vec![
                "Loose camera mount".into(),
                "Vibration at the mounting point".into(),
                "Wind load".into(),
            ];
            finding.suggestions = vec![
                "Tighten the camera mount".into(),
                "Move the camera away from vibration sources".into(),
                "Enable image stabilization".into(),
            ];
        }

        finding.process_time_ms = start.elapsed().as_secs_f32() * 1000.0;
        Ok(finding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CHANNELS_GRAY;

    fn textured_shifted(shift: usize, t: f64, idx: u64) -> Frame {
        let tex = |x: usize, y: usize| ((x * 13 + y * 29 + (x / 3) * (y / 5)) % 256) as u8;
        let data: Vec<u8> = (0..96usize)
            .flat_map(|y| (0..96usize).map(move |x| tex(x.saturating_sub(shift), y)))
            .collect();
        Frame::new(96, 96, CHANNELS_GRAY, data)
            .unwrap()
            .with_timestamp(t)
            .with_index(idx)
    }

    #[test]
    fn oscillating_frames_are_shake() {
        // Alternating +/- 6 px displacement every 0.5 s
        let frames: Vec<Frame> = (0..10u64)
            .map(|i| textured_shifted(if i % 2 == 0 { 0 } else { 6 }, i as f64 * 0.5, i))
            .collect();
        let finding = ShakeDetector::default().detect(&frames, 2.0).unwrap();
        assert!(finding.is_abnormal, "score = {}", finding.score);
        assert!(!finding.segments.is_empty());
        assert!(finding.score > 5.0);
    }

    #[test]
    fn static_frames_are_stable() {
        let frames: Vec<Frame> = (0..10u64)
            .map(|i| textured_shifted(0, i as f64 * 0.5, i))
            .collect();
        let finding = ShakeDetector::default().detect(&frames, 2.0).unwrap();
        assert!(!finding.is_abnormal);
        assert!(finding.segments.is_empty());
    }

    #[test]
    fn single_jolt_is_below_the_window_vote() {
        // One jolt (two moving pairs) in a static clip: K=3 not reached
        let frames: Vec<Frame> = (0..10u64)
            .map(|i| textured_shifted(if i == 5 { 6 } else { 0 }, i as f64 * 0.5, i))
            .collect();
        let finding = ShakeDetector::default().detect(&frames, 2.0).unwrap();
        assert!(!finding.is_abnormal);
    }
}
