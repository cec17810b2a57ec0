//! Freeze detector
//!
//! A pair of adjacent sampled frames is frozen when SSIM is above the
//! similarity bar AND the mean absolute difference is below the motion
//! floor. Runs of frozen pairs become segments; segments shorter than the
//! minimum freeze duration are dropped. Black frames are excluded by
//! default - a dead feed is the signal-loss detector's business.

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
pub struct FreezeConfig {
    /// SSIM above this marks the pair as near-identical.
    pub ssim_threshold: f32,
    /// Mean absolute difference below this confirms no motion.
    pub mad_threshold: f32,
    /// Shorter freezes are play-out jitter, not faults.
    pub min_freeze_duration: f64,
    /// Skip frames darker than this mean luminance.
    pub ignore_black_frames: bool,
    pub black_threshold: f32,
}

impl Default for FreezeConfig {
    fn default() -> Self {
        Self {
            ssim_threshold: 0.98,
            mad_threshold: 2.0,
            min_freeze_duration: 1.0,
            ignore_black_frames: true,
            black_threshold: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FreezeDetector {
    pub config: FreezeConfig,
}

impl FreezeDetector {
    pub fn new(config: FreezeConfig) -> Self {
        Self { config }
    }
}

impl VideoDetector for FreezeDetector {
    fn name(&self) -> &'static str {
        "freeze"
    }

    fn issue_type(&self) -> &'static str {
        "freeze"
    }

    fn detect(&self, frames: &[Frame], fps: f64) -> Result<VideoFinding> {
        let start = Instant::now();
        let mut finding = VideoFinding::empty(
            self.name(),
            self.issue_type(),
            self.config.min_freeze_duration as f32,
            frames.len(),
        );
        if frames.len() < 2 {
            finding.explanation = "Not enough sampled frames for freeze analysis".into();
            return Ok(finding);
        }

        let planes: Vec<_> = frames
            .iter()
            .map(|f| f.downsample_to(COMPARE_MAX_SIDE).gray())
            .collect();

        let mut segments: Vec<VideoSegment> = Vec::new();
        let mut run_start: Option<usize> = None;
        let mut ssim_sum = 0.0f64;
        let mut pair_count = 0usize;

        let close_run = |run_start: &mut Option<usize>, end_pair: usize, segments: &mut Vec<VideoSegment>| {
            if let Some(first_pair) = run_start.take() {
                let seg = VideoSegment::new(
                    frame_index(&frames[first_pair], first_pair),
                    frame_index(&frames[end_pair], end_pair),
                    frame_timestamp(&frames[first_pair], first_pair, fps),
                    frame_timestamp(&frames[end_pair], end_pair, fps),
                )
                .with_confidence(0.95);
                if seg.duration >= self.config.min_freeze_duration {
                    segments.push(seg);
                }
            }
        };

        for i in 1..frames.len() {
            if self.config.ignore_black_frames
                && (imgproc::mean(&planes[i - 1]) < self.config.black_threshold
                    || imgproc::mean(&planes[i]) < self.config.black_threshold)
            {
                close_run(&mut run_start, i - 1, &mut segments);
                continue;
            }

            let ssim = compare::ssim(&planes[i - 1], &planes[i]);
            let mad = compare::mean_abs_diff(&planes[i - 1], &planes[i]);
            ssim_sum += ssim as f64;
            pair_count += 1;

            let frozen = ssim > self.config.ssim_threshold && mad < self.config.mad_threshold;
            if frozen {
                if run_start.is_none() {
                    run_start = Some(i - 1);
                }
            } else {
                close_run(&mut run_start, i - 1, &mut segments);
            }
        }
        close_run(&mut run_start, frames.len() - 1, &mut segments);

        let total_duration: f64 = segments.iter().map(|s| s.duration).sum();
        let max_duration = segments.iter().map(|s| s.duration).fold(0.0, f64::max);
        let avg_ssim = if pair_count > 0 {
            (ssim_sum / pair_count as f64) as f32
        } else {
            0.0
        };

        finding.is_abnormal = !segments.is_empty();
        finding.score = total_duration as f32;
        finding.confidence = if finding.is_abnormal { 0.95 } else { 1.0 };
        finding.severity = ratio_severity(total_duration as f32, finding.threshold);
        finding.evidence.insert("freeze_count".into(), ev(segments.len() as f32));
        finding
            .evidence
            .insert("total_freeze_duration".into(), ev(total_duration as f32));
        finding
            .evidence
            .insert("max_freeze_duration".into(), ev(max_duration as f32));
        finding.evidence.insert("avg_ssim".into(), ev(avg_ssim));
        finding.segments = segments;

        finding.explanation = if finding.is_abnormal {
            format!(
                "{} frozen span(s), {:.2} s total",
                finding.segments.len(),
                total_duration
            )
        } else {
            "No frame freezes detected".into()
        };
        if finding.is_abnormal {
            finding.possible_causes = vec![
                "Source device stall".into(),
                "Network transport interruption".into(),
                "Encoder latency spike".into(),
            ];
            finding.suggestions = vec![
                "Check the source device".into(),
                "Check transport link stability".into(),
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

    fn textured(seed: u32) -> Frame {
        let data: Vec<u8> = (0..64u32 * 64)
            .map(|i| (((i ^ seed).wrapping_mul(2654435761)) >> 8) as u8)
            .collect();
        Frame::new(64, 64, CHANNELS_GRAY, data).unwrap()
    }

    fn at(frame: Frame, t: f64, idx: u64) -> Frame {
        frame.with_timestamp(t).with_index(idx)
    }

    #[test]
    fn identical_run_becomes_one_segment() {
        // 1 s sampling; frames identical from t=2 to t=5
        let mut frames = Vec::new();
        for i in 0..=6u64 {
            let seed = if (2..=5).contains(&i) { 42 } else { i as u32 };
            frames.push(at(textured(seed), i as f64, i));
        }
        let finding = FreezeDetector::default().detect(&frames, 1.0).unwrap();
        assert!(finding.is_abnormal);
        assert_eq!(finding.segments.len(), 1);
        let seg = finding.segments[0];
        assert_eq!(seg.start_time, 2.0);
        assert_eq!(seg.end_time, 5.0);
        assert!((finding.score - 3.0).abs() < 1e-6);
    }

    #[test]
    fn distinct_frames_do_not_freeze() {
        let frames: Vec<Frame> = (0..6u64)
            .map(|i| at(textured(i as u32 * 7 + 1), i as f64, i))
            .collect();
        let finding = FreezeDetector::default().detect(&frames, 1.0).unwrap();
        assert!(!finding.is_abnormal);
        assert!(finding.segments.is_empty());
    }

    #[test]
    fn black_runs_are_not_freezes() {
        let black = Frame::new(64, 64, CHANNELS_GRAY, vec![0u8; 4096]).unwrap();
        let frames: Vec<Frame> = (0..5u64)
            .map(|i| at(black.clone(), i as f64, i))
            .collect();
        let finding = FreezeDetector::default().detect(&frames, 1.0).unwrap();
        assert!(!finding.is_abnormal);
    }

    #[test]
    fn sub_minimum_freeze_is_dropped() {
        // Identical only between t=1 and t=1.5 (0.5 s < 1 s minimum)
        let frames = vec![
            at(textured(1), 0.0, 0),
            at(textured(9), 1.0, 2),
            at(textured(9), 1.5, 3),
            at(textured(5), 2.5, 5),
        ];
        let finding = FreezeDetector::default().detect(&frames, 2.0).unwrap();
        assert!(!finding.is_abnormal);
    }
}
