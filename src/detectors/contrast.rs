//! Contrast detector
//!
//! Luminance standard deviation plus dynamic range. Standard level adds a
//! local-contrast map mean, deep level the RMS and Michelson variants.

use std::time::Instant;

use crate::error::Result;
use crate::frame::Frame;
use crate::imgproc;
use crate::profiles::Thresholds;

use super::{
    ev, squash_confidence, DetectionLevel, Detector, DetectorDescriptor, Finding, Severity,
};

pub static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "contrast",
    display_name: "Image contrast",
    issue_type: "low_contrast",
    description: "Detects washed-out images from luminance spread",
    levels: &[
        DetectionLevel::Fast,
        DetectionLevel::Standard,
        DetectionLevel::Deep,
    ],
    priority: 60,
    suppresses: &[],
};

pub fn factory(thresholds: &Thresholds) -> Box<dyn Detector> {
    Box::new(ContrastDetector {
        min: thresholds.contrast_min,
    })
}

#[derive(Debug)]
pub struct ContrastDetector {
    min: f32,
}

impl ContrastDetector {
    fn severity(&self, contrast: f32) -> Severity {
        if contrast >= self.min {
            Severity::Normal
        } else if contrast >= self.min * 0.7 {
            Severity::Info
        } else if contrast >= self.min * 0.4 {
            Severity::Warning
        } else {
            Severity::Error
        }
    }
}

impl Detector for ContrastDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    fn detect(&self, frame: &Frame, level: DetectionLevel) -> Result<Finding> {
        let start = Instant::now();
        let mut finding = Finding::new(&DESCRIPTOR, level);

        let gray = frame.gray();
        let std_contrast = imgproc::stddev(&gray);
        let (min_val, max_val) = imgproc::min_max(&gray);
        let dynamic_range = max_val - min_val;

        finding.score = std_contrast;
        finding.threshold = self.min;
        finding.is_abnormal = std_contrast < self.min;
        finding.confidence = squash_confidence(std_contrast, self.min);
        finding.severity = self.severity(std_contrast);
        if !finding.is_abnormal {
            finding.issue_type = "contrast".to_string();
        }

        finding.evidence.insert("std_contrast".into(), ev(std_contrast));
        finding.evidence.insert("dynamic_range".into(), ev(dynamic_range));
        finding.evidence.insert("min_value".into(), ev(min_val));
        finding.evidence.insert("max_value".into(), ev(max_val));

        if level != DetectionLevel::Fast {
            let local = imgproc::local_stddev(&gray, 7);
            finding
                .evidence
                .insert("local_contrast".into(), ev(imgproc::mean(&local)));
        }

        if level == DetectionLevel::Deep {
            finding.evidence.insert("rms_contrast".into(), ev(std_contrast));
            let michelson = if max_val + min_val > 0.0 {
                (max_val - min_val) / (max_val + min_val)
            } else {
                0.0
            };
            finding.evidence.insert("michelson_contrast".into(), ev(michelson));
        }

        finding.explanation = if finding.is_abnormal {
            format!(
                "Contrast {std_contrast:.1} below threshold {:.1} (dynamic range {dynamic_range:.1}); image looks flat",
                self.min
            )
        } else {
            format!("Contrast {std_contrast:.1}; tonal separation is normal")
        };

        if finding.is_abnormal {
            finding.possible_causes = vec![
                "Poor lighting conditions".into(),
                "Fog, haze or dust".into(),
                "Dirty lens".into(),
            ];
            finding.suggestions = vec![
                "Clean the lens".into(),
                "Adjust the contrast setting".into(),
            ];
            if dynamic_range < 50.0 {
                finding
                    .possible_causes
                    .push("Scene itself lacks tonal variation".into());
            }
            if finding.severity >= Severity::Warning {
                finding.suggestions.push("Enable WDR".into());
            }
        }

        finding.process_time_ms = start.elapsed().as_secs_f32() * 1000.0;
        Ok(finding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CHANNELS_GRAY;

    #[test]
    fn narrow_band_image_fires_wide_ramp_passes() {
        let detector = ContrastDetector { min: 30.0 };

        let narrow: Vec<u8> = (0..64u32 * 64)
            .map(|i| 120 + (i % 8) as u8) // values 120..127
            .collect();
        let finding = detector
            .detect(
                &Frame::new(64, 64, CHANNELS_GRAY, narrow).unwrap(),
                DetectionLevel::Standard,
            )
            .unwrap();
        assert!(finding.is_abnormal);
        assert_eq!(finding.issue_type, "low_contrast");
        assert_eq!(finding.severity, Severity::Error);

        let ramp: Vec<u8> = (0..64u32 * 64).map(|i| ((i % 64) * 4) as u8).collect();
        let finding = detector
            .detect(
                &Frame::new(64, 64, CHANNELS_GRAY, ramp).unwrap(),
                DetectionLevel::Standard,
            )
            .unwrap();
        assert!(!finding.is_abnormal);
        assert_eq!(finding.issue_type, "contrast");
    }

    #[test]
    fn deep_level_reports_michelson() {
        let detector = ContrastDetector { min: 30.0 };
        let ramp: Vec<u8> = (0..64u32 * 64).map(|i| ((i % 64) * 4) as u8).collect();
        let finding = detector
            .detect(
                &Frame::new(64, 64, CHANNELS_GRAY, ramp).unwrap(),
                DetectionLevel::Deep,
            )
            .unwrap();
        assert!(finding.evidence.contains_key("michelson_contrast"));
        assert!(finding.evidence.contains_key("local_contrast"));
    }
}
