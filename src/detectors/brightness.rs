//! Brightness detector
//!
//! Mean luminance against a [min, max] window; reports `under_bright` or
//! `over_bright` sub-issues. Deep level adds histogram shape evidence.

use std::time::Instant;

use crate::error::Result;
use crate::frame::Frame;
use crate::imgproc;
use crate::profiles::Thresholds;

use super::{ev, DetectionLevel, Detector, DetectorDescriptor, Finding, Severity};

pub static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "brightness",
    display_name: "Image brightness",
    issue_type: "brightness",
    description: "Detects over- and under-exposure from mean luminance",
    levels: &[
        DetectionLevel::Fast,
        DetectionLevel::Standard,
        DetectionLevel::Deep,
    ],
    priority: 30,
    // An active exposure fault flattens the histogram, so the contrast
    // reading is redundant while brightness fires.
    suppresses: &["contrast"],
};

pub fn factory(thresholds: &Thresholds) -> Box<dyn Detector> {
    Box::new(BrightnessDetector {
        min: thresholds.brightness_min,
        max: thresholds.brightness_max,
    })
}

#[derive(Debug)]
pub struct BrightnessDetector {
    min: f32,
    max: f32,
}

impl BrightnessDetector {
    fn severity(&self, mean: f32, too_dark: bool, too_bright: bool) -> Severity {
        if too_dark {
            if mean < 5.0 {
                Severity::Error
            } else if mean < self.min * 0.5 {
                Severity::Warning
            } else {
                Severity::Info
            }
        } else if too_bright {
            if mean > 250.0 {
                Severity::Error
            } else if mean > self.max + (255.0 - self.max) * 0.5 {
                Severity::Warning
            } else {
                Severity::Info
            }
        } else {
            Severity::Normal
        }
    }
}

impl Detector for BrightnessDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    fn detect(&self, frame: &Frame, level: DetectionLevel) -> Result<Finding> {
        let start = Instant::now();
        let mut finding = Finding::new(&DESCRIPTOR, level);

        let gray = frame.gray();
        let mean = imgproc::mean(&gray);
        let std = imgproc::stddev(&gray);
        let p5 = imgproc::percentile(&gray, 5.0);
        let p95 = imgproc::percentile(&gray, 95.0);

        let too_dark = mean < self.min;
        let too_bright = mean > self.max;
        finding.is_abnormal = too_dark || too_bright;

        let (issue_type, threshold) = if too_dark {
            ("under_bright", self.min)
        } else if too_bright {
            ("over_bright", self.max)
        } else {
            ("brightness", self.min)
        };
        finding.issue_type = issue_type.to_string();
        finding.score = mean;
        finding.threshold = threshold;

        // Distance to the violated bound, normalized by the headroom on
        // that side; inside the window, distance to the nearer bound.
        finding.confidence = if too_dark {
            ((self.min - mean) / self.min.max(1e-6)).min(1.0)
        } else if too_bright {
            ((mean - self.max) / (255.0 - self.max).max(1e-6)).min(1.0)
        } else {
            let half_range = ((self.max - self.min) / 2.0).max(1e-6);
            ((mean - self.min).min(self.max - mean) / half_range).min(1.0)
        };
        finding.severity = self.severity(mean, too_dark, too_bright);

        finding.evidence.insert("mean_brightness".into(), ev(mean));
        finding.evidence.insert("std_brightness".into(), ev(std));
        finding.evidence.insert("percentile_5".into(), ev(p5));
        finding.evidence.insert("percentile_95".into(), ev(p95));

        if level == DetectionLevel::Deep {
            let hist = imgproc::histogram256(&gray);
            let dark_ratio: f32 = hist[..30].iter().sum();
            let bright_ratio: f32 = hist[225..].iter().sum();
            finding.evidence.insert("dark_pixel_ratio".into(), ev(dark_ratio));
            finding.evidence.insert("bright_pixel_ratio".into(), ev(bright_ratio));
            finding
                .evidence
                .insert("histogram_entropy".into(), ev(imgproc::histogram_entropy(&hist)));
        }

        finding.explanation = if too_dark {
            format!(
                "Mean luminance {mean:.1} below minimum {:.1}; image is too dark",
                self.min
            )
        } else if too_bright {
            format!(
                "Mean luminance {mean:.1} above maximum {:.1}; image is too bright",
                self.max
            )
        } else {
            format!("Mean luminance {mean:.1}; exposure is normal")
        };

        if too_dark {
            finding.possible_causes = vec![
                "Insufficient ambient light".into(),
                "Exposure set too low".into(),
                "Night mode not engaged".into(),
            ];
            finding.suggestions = vec![
                "Check scene lighting".into(),
                "Raise the exposure setting".into(),
            ];
            if finding.severity == Severity::Error {
                finding.possible_causes.push("Lens covered or signal lost".into());
                finding.suggestions.push("Check camera power and cabling".into());
            }
        } else if too_bright {
            finding.possible_causes = vec![
                "Strong light hitting the lens".into(),
                "Exposure set too high".into(),
                "Backlit scene".into(),
            ];
            finding.suggestions = vec![
                "Reangle the camera away from light sources".into(),
                "Lower the exposure setting".into(),
                "Enable BLC/WDR".into(),
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

    fn flat(v: u8) -> Frame {
        Frame::new(32, 32, CHANNELS_GRAY, vec![v; 1024]).unwrap()
    }

    fn detector() -> BrightnessDetector {
        BrightnessDetector {
            min: 20.0,
            max: 235.0,
        }
    }

    #[test]
    fn over_bright_fires_with_warning() {
        let finding = detector().detect(&flat(250), DetectionLevel::Standard).unwrap();
        assert!(finding.is_abnormal);
        assert_eq!(finding.issue_type, "over_bright");
        assert_eq!(finding.severity, Severity::Warning);
    }

    #[test]
    fn near_black_escalates_to_error() {
        let finding = detector().detect(&flat(2), DetectionLevel::Standard).unwrap();
        assert_eq!(finding.issue_type, "under_bright");
        assert_eq!(finding.severity, Severity::Error);
    }

    #[test]
    fn midtone_is_normal_with_confidence() {
        let finding = detector().detect(&flat(128), DetectionLevel::Standard).unwrap();
        assert!(!finding.is_abnormal);
        assert_eq!(finding.issue_type, "brightness");
        assert!(finding.confidence > 0.5);
    }

    #[test]
    fn deep_level_reports_histogram_shape() {
        let finding = detector().detect(&flat(240), DetectionLevel::Deep).unwrap();
        assert!(finding.evidence.contains_key("bright_pixel_ratio"));
        assert!(finding.evidence.contains_key("histogram_entropy"));
    }
}
