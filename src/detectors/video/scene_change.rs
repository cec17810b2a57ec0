//! Scene-change detector
//!
//! Adjacent sampled frames are compared on a coarse 3-D HSV histogram
//! (Bhattacharyya distance) and on edge density. A jump on either measure
//! is a cut event at the later timestamp; events closer than the minimum
//! gap merge into the earlier one. The verdict is about frequency: a fixed
//! camera that cuts many times a minute has an unstable source.

use std::time::Instant;

use crate::detectors::ev;
use crate::error::Result;
use crate::frame::Frame;
use crate::imgproc::{self, compare};

use super::{
    frame_index, frame_timestamp, ratio_severity, VideoDetector, VideoFinding, VideoSegment,
    COMPARE_MAX_SIDE,
};

#[derive(Debug, Clone)]
pub struct SceneChangeConfig {
    /// Bhattacharyya distance above this is a histogram jump.
    pub histogram_threshold: f32,
    /// Absolute edge-density change above this is a structure jump.
    pub edge_threshold: f32,
    /// Events closer than this merge into the earlier event (seconds).
    pub min_gap: f64,
    /// Changes per minute above this make the stream abnormal.
    pub max_changes_per_minute: f32,
}

impl Default for SceneChangeConfig {
    fn default() -> Self {
        Self {
            histogram_threshold: 0.4,
            edge_threshold: 0.3,
            min_gap: 2.0,
            max_changes_per_minute: 5.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SceneChangeDetector {
    pub config: SceneChangeConfig,
}

impl SceneChangeDetector {
    pub fn new(config: SceneChangeConfig) -> Self {
        Self { config }
    }
}

impl VideoDetector for SceneChangeDetector {
    fn name(&self) -> &'static str {
        "scene_change"
    }

    fn issue_type(&self) -> &'static str {
        "scene_change"
    }

    fn detect(&self, frames: &[Frame], fps: f64) -> Result<VideoFinding> {
        let start = Instant::now();
        let mut finding = VideoFinding::empty(
            self.name(),
            self.issue_type(),
            self.config.max_changes_per_minute,
            frames.len(),
        );
        if frames.len() < 2 {
            finding.explanation = "Not enough sampled frames for scene analysis".into();
            return Ok(finding);
        }

        let previews: Vec<Frame> = frames
            .iter()
            .map(|f| f.downsample_to(COMPARE_MAX_SIDE))
            .collect();
        let histograms: Vec<Vec<f32>> =
            previews.iter().map(imgproc::hsv_histogram_3d).collect();
        let edge_densities: Vec<f32> = previews
            .iter()
            .map(|p| imgproc::edge_density(&p.gray(), 100.0))
            .collect();

        let first_ts = frame_timestamp(&frames[0], 0, fps);
        let last_ts = frame_timestamp(&frames[frames.len() - 1], frames.len() - 1, fps);
        let window_duration = (last_ts - first_ts).max(0.0);

        let mut events: Vec<VideoSegment> = Vec::new();
        let mut max_hist_diff = 0.0f32;
        for i in 1..frames.len() {
            let hist_diff = compare::bhattacharyya_distance(&histograms[i - 1], &histograms[i]);
            let edge_diff = (edge_densities[i] - edge_densities[i - 1]).abs();
            max_hist_diff = max_hist_diff.max(hist_diff);

            let is_change = hist_diff > self.config.histogram_threshold
                || edge_diff > self.config.edge_threshold;
            if !is_change {
                continue;
            }

            let ts = frame_timestamp(&frames[i], i, fps);
            if let Some(last) = events.last() {
                if ts - last.start_time < self.config.min_gap {
                    continue; // merged into the earlier event
                }
            }
            let confidence = (hist_diff / self.config.histogram_threshold).min(1.0);
            events.push(
                VideoSegment::new(frame_index(&frames[i], i), frame_index(&frames[i], i), ts, ts)
                    .with_confidence(confidence),
            );
        }

        let changes_per_minute = if window_duration > 0.0 {
            events.len() as f32 / window_duration as f32 * 60.0
        } else {
            0.0
        };

        finding.score = changes_per_minute;
        finding.is_abnormal = changes_per_minute > self.config.max_changes_per_minute;
        finding.confidence = 0.9;
        finding.severity = ratio_severity(changes_per_minute, finding.threshold);
        finding.evidence.insert("scene_change_count".into(), ev(events.len() as f32));
        finding
            .evidence
            .insert("changes_per_minute".into(), ev(changes_per_minute));
        finding.evidence.insert("max_histogram_diff".into(), ev(max_hist_diff));
        finding
            .evidence
            .insert("window_duration".into(), ev(window_duration as f32));
        finding.segments = events;

        finding.explanation = if finding.is_abnormal {
            format!(
                "Scene changes too frequent: {:.1}/min over {} event(s)",
                changes_per_minute,
                finding.segments.len()
            )
        } else if finding.segments.is_empty() {
            "No scene changes detected".into()
        } else {
            format!(
                "{} scene change(s), frequency normal ({:.1}/min)",
                finding.segments.len(),
                changes_per_minute
            )
        };
        if finding.is_abnormal {
            finding.possible_causes = vec![
                "Camera being moved or tampered with".into(),
                "Upstream source switching".into(),
                "Severe lighting swings".into(),
            ];
            finding.suggestions = vec![
                "Check whether the camera is fixed".into(),
                "Check the upstream video source".into(),
            ];
        }

        finding.process_time_ms = start.elapsed().as_secs_f32() * 1000.0;
        Ok(finding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CHANNELS_BGR;

    fn solid(b: u8, g: u8, r: u8, t: f64, idx: u64) -> Frame {
        Frame::new(48, 48, CHANNELS_BGR, [b, g, r].repeat(48 * 48))
            .unwrap()
            .with_timestamp(t)
            .with_index(idx)
    }

    #[test]
    fn alternating_scenes_fire() {
        // A hard cut every 3 s across a 21 s window: ~6.7 changes/min
        let mut frames = Vec::new();
        for i in 0..8u64 {
            let f = if i % 2 == 0 {
                solid(200, 40, 30, i as f64 * 3.0, i)
            } else {
                solid(30, 40, 200, i as f64 * 3.0, i)
            };
            frames.push(f);
        }
        let finding = SceneChangeDetector::default().detect(&frames, 1.0).unwrap();
        assert!(finding.is_abnormal, "score = {}", finding.score);
        assert!(!finding.segments.is_empty());
        // Events are instantaneous and strictly ordered
        for pair in finding.segments.windows(2) {
            assert!(pair[0].end_time <= pair[1].start_time);
        }
    }

    #[test]
    fn static_scene_is_quiet() {
        let frames: Vec<Frame> = (0..8u64)
            .map(|i| solid(90, 100, 110, i as f64 * 3.0, i))
            .collect();
        let finding = SceneChangeDetector::default().detect(&frames, 1.0).unwrap();
        assert!(!finding.is_abnormal);
        assert!(finding.segments.is_empty());
    }

    #[test]
    fn close_events_merge_into_the_earlier_one() {
        // Cuts at t=0->1 and t=1->2 with min_gap 2.0: second merges away
        let frames = vec![
            solid(200, 40, 30, 0.0, 0),
            solid(30, 200, 40, 1.0, 1),
            solid(30, 40, 200, 2.0, 2),
            solid(30, 40, 200, 10.0, 3),
        ];
        let finding = SceneChangeDetector::default().detect(&frames, 1.0).unwrap();
        assert_eq!(
            finding.evidence["scene_change_count"].as_f64().unwrap() as usize,
            1
        );
    }
}
