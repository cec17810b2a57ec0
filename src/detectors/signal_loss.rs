//! Signal-loss detector
//!
//! Highest-priority detector: black screen, white screen, and saturated
//! solid-color fill (dead encoder, unplugged source). Achromatic uniform
//! frames that are merely bright stay with the brightness detector; the
//! solid-color branch requires real saturation.

use std::time::Instant;

use crate::error::Result;
use crate::frame::Frame;
use crate::imgproc;
use crate::profiles::Thresholds;

use super::{ev, DetectionLevel, Detector, DetectorDescriptor, Finding, Severity};

pub static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "signal_loss",
    display_name: "Signal loss",
    issue_type: "signal_loss",
    description: "Detects black/white screens and solid-color signal faults",
    levels: &[
        DetectionLevel::Fast,
        DetectionLevel::Standard,
        DetectionLevel::Deep,
    ],
    priority: 10,
    suppresses: &["brightness", "blur", "contrast", "noise", "occlusion"],
};

/// Luminance deviation under which the frame counts as uniform.
const UNIFORM_STD: f32 = 3.0;
/// Saturation floor for the solid-color branch.
const SOLID_SATURATION_MIN: f32 = 60.0;

pub fn factory(thresholds: &Thresholds) -> Box<dyn Detector> {
    Box::new(SignalLossDetector {
        black_threshold: thresholds.black_screen_threshold,
    })
}

#[derive(Debug)]
pub struct SignalLossDetector {
    black_threshold: f32,
}

impl Detector for SignalLossDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    fn detect(&self, frame: &Frame, level: DetectionLevel) -> Result<Finding> {
        let start = Instant::now();
        let mut finding = Finding::new(&DESCRIPTOR, level);

        let gray = frame.gray();
        let mean = imgproc::mean(&gray);
        let std = imgproc::stddev(&gray);
        let (min_v, max_v) = imgproc::min_max(&gray);
        let uniformity = 1.0 - (std / 64.0).min(1.0);
        let saturation = imgproc::mean_saturation(frame);

        let is_black = mean < self.black_threshold;
        let is_white = mean > 250.0 && std < UNIFORM_STD;
        let is_solid =
            !is_black && !is_white && std < UNIFORM_STD && saturation > SOLID_SATURATION_MIN;

        finding.evidence.insert("mean_brightness".into(), ev(mean));
        finding.evidence.insert("std_brightness".into(), ev(std));
        finding.evidence.insert("min_brightness".into(), ev(min_v));
        finding.evidence.insert("max_brightness".into(), ev(max_v));
        finding.evidence.insert("uniformity".into(), ev(uniformity));
        finding.evidence.insert("mean_saturation".into(), ev(saturation));
        if frame.is_color() {
            let chan_mean = |c: usize| {
                let (mut acc, mut n) = (0.0f64, 0usize);
                for v in frame.channel_iter(c) {
                    acc += v as f64;
                    n += 1;
                }
                (acc / n.max(1) as f64) as f32
            };
            finding.evidence.insert("b_channel_mean".into(), ev(chan_mean(0)));
            finding.evidence.insert("g_channel_mean".into(), ev(chan_mean(1)));
            finding.evidence.insert("r_channel_mean".into(), ev(chan_mean(2)));
        }

        if level == DetectionLevel::Deep {
            finding
                .evidence
                .insert("edge_ratio".into(), ev(imgproc::edge_density(&gray, 100.0)));
        }

        finding.is_abnormal = is_black || is_white || is_solid;
        if is_black {
            finding.issue_type = "black_screen".to_string();
            finding.score = mean;
            finding.threshold = self.black_threshold;
            finding.confidence =
                ((self.black_threshold - mean) / self.black_threshold.max(1e-6)).min(1.0);
            finding.severity = if mean < 3.0 {
                Severity::Error
            } else {
                Severity::Warning
            };
            finding.explanation = format!("Black screen (mean luminance {mean:.1})");
            finding.possible_causes = vec![
                "Camera power failure".into(),
                "Video cable disconnected".into(),
                "Encoder fault".into(),
            ];
            finding.suggestions = vec![
                "Check camera power".into(),
                "Check video cabling".into(),
                "Restart the camera".into(),
            ];
        } else if is_white {
            finding.issue_type = "white_screen".to_string();
            finding.score = 255.0 - mean;
            finding.threshold = 5.0;
            finding.confidence = ((mean - 250.0) / 5.0).min(1.0);
            finding.severity = Severity::Warning;
            finding.explanation = format!("White screen (mean luminance {mean:.1})");
            finding.possible_causes = vec![
                "Direct strong light".into(),
                "Exposure control failure".into(),
                "Sensor fault".into(),
            ];
            finding.suggestions = vec![
                "Check for strong light sources".into(),
                "Check exposure settings".into(),
            ];
        } else if is_solid {
            finding.issue_type = "solid_color".to_string();
            finding.score = std;
            finding.threshold = UNIFORM_STD;
            finding.confidence = ((UNIFORM_STD - std) / UNIFORM_STD).min(1.0);
            finding.severity = Severity::Warning;
            finding.explanation = "Solid color frame; likely a signal fault".to_string();
            finding.possible_causes = vec![
                "Source signal fault".into(),
                "Encode/decode failure".into(),
            ];
            finding.suggestions = vec![
                "Check the video source".into(),
                "Restart the affected device".into(),
            ];
        } else {
            finding.issue_type = "signal".to_string();
            finding.score = mean;
            finding.threshold = self.black_threshold;
            finding.confidence = (mean / 128.0).min(1.0);
            finding.explanation = "Signal is normal".to_string();
        }

        finding.process_time_ms = start.elapsed().as_secs_f32() * 1000.0;
        Ok(finding)
    }
}
