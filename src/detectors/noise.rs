//! Noise detector
//!
//! Noise level from the 3x3 median-filter residual combined with a
//! texture-compensated Laplacian MAD estimate; rich texture raises the
//! Laplacian response without being noise, so the estimate is scaled down
//! on busy scenes. Deep level classifies the noise into gaussian /
//! salt-pepper / snow sub-issues.

use std::time::Instant;

use crate::error::Result;
use crate::frame::{Frame, GrayPlane};
use crate::imgproc;
use crate::profiles::Thresholds;

use super::{
    ev, squash_confidence, DetectionLevel, Detector, DetectorDescriptor, Finding, Severity,
};

pub static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "noise",
    display_name: "Image noise",
    issue_type: "noise",
    description: "Detects gaussian, salt-pepper and snow noise",
    levels: &[
        DetectionLevel::Fast,
        DetectionLevel::Standard,
        DetectionLevel::Deep,
    ],
    priority: 55,
    suppresses: &[],
};

pub fn factory(thresholds: &Thresholds) -> Box<dyn Detector> {
    Box::new(NoiseDetector {
        threshold: thresholds.noise_threshold,
    })
}

#[derive(Debug)]
pub struct NoiseDetector {
    threshold: f32,
}

impl NoiseDetector {
    /// Laplacian MAD estimate scaled down on textured / high-contrast
    /// scenes so detail is not billed as noise.
    fn adjusted_laplacian_sigma(plane: &GrayPlane, finding: &mut Finding) -> f32 {
        let raw_sigma = imgproc::laplacian_noise_sigma(plane);
        let local = imgproc::local_stddev(plane, 2);
        let texture: Vec<f32> = local.data.iter().map(|s| s * s).collect();
        let texture_complexity = imgproc::median(&texture);
        let texture_factor = (50.0 / texture_complexity.max(1.0)).min(1.0);
        let mut sigma = raw_sigma * texture_factor;

        let contrast = imgproc::stddev(plane);
        if contrast > 40.0 {
            let contrast_factor = (40.0 / contrast).min(1.0);
            sigma *= 0.7 + 0.3 * contrast_factor;
        }

        finding.evidence.insert("noise_mad_laplacian".into(), ev(raw_sigma));
        finding
            .evidence
            .insert("texture_complexity".into(), ev(texture_complexity));
        finding.evidence.insert("adjusted_mad".into(), ev(sigma));
        sigma
    }

    fn salt_pepper_ratio(plane: &GrayPlane) -> f32 {
        let extremes = plane
            .data
            .iter()
            .filter(|&&v| v > 250.0 || v < 5.0)
            .count();
        extremes as f32 / plane.len().max(1) as f32
    }

    fn snow_ratio(frame: &Frame) -> f32 {
        if !frame.is_color() {
            return 0.0;
        }
        let mut hits = 0usize;
        let mut n = 0usize;
        for px in frame.pixels().chunks_exact(3) {
            let (_, s, v) = imgproc::bgr_to_hsv(px[0], px[1], px[2]);
            if v > 240.0 && s < 30.0 {
                hits += 1;
            }
            n += 1;
        }
        hits as f32 / n.max(1) as f32
    }

    fn severity(&self, level: f32) -> Severity {
        if level <= self.threshold {
            Severity::Normal
        } else if level <= self.threshold * 1.5 {
            Severity::Info
        } else if level <= self.threshold * 2.5 {
            Severity::Warning
        } else {
            Severity::Error
        }
    }
}

impl Detector for NoiseDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    fn detect(&self, frame: &Frame, level: DetectionLevel) -> Result<Finding> {
        let start = Instant::now();
        let mut finding = Finding::new(&DESCRIPTOR, level);
        let gray = frame.gray();

        let score = match level {
            DetectionLevel::Fast => Self::adjusted_laplacian_sigma(&gray, &mut finding),
            DetectionLevel::Standard | DetectionLevel::Deep => {
                let residual_std = imgproc::median_residual_stddev(&gray);
                finding
                    .evidence
                    .insert("noise_std_residual".into(), ev(residual_std));
                let mad = Self::adjusted_laplacian_sigma(&gray, &mut finding);
                let mut combined = residual_std * 0.6 + mad * 0.4;

                if level == DetectionLevel::Deep {
                    let salt_pepper = Self::salt_pepper_ratio(&gray);
                    let snow = Self::snow_ratio(frame);
                    finding.evidence.insert("salt_pepper_ratio".into(), ev(salt_pepper));
                    finding.evidence.insert("snow_noise_ratio".into(), ev(snow));
                    // Impulsive noise dominates the score when present
                    if salt_pepper > 0.01 {
                        combined = combined.max(salt_pepper * 1000.0);
                    }
                    if snow > 0.01 {
                        combined = combined.max(snow * 1000.0);
                    }
                }
                combined
            }
        };

        finding.score = score;
        finding.threshold = self.threshold;
        finding.is_abnormal = score > self.threshold;
        finding.confidence = squash_confidence(score, self.threshold);
        finding.severity = self.severity(score);

        let sub_issue = if !finding.is_abnormal {
            "noise"
        } else if finding
            .evidence
            .get("snow_noise_ratio")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            > 0.02
        {
            "snow_noise"
        } else if finding
            .evidence
            .get("salt_pepper_ratio")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            > 0.01
        {
            "salt_pepper_noise"
        } else {
            "noise"
        };
        finding.issue_type = sub_issue.to_string();

        finding.explanation = if finding.is_abnormal {
            format!(
                "Noise level {score:.1} above threshold {:.1} ({})",
                self.threshold,
                sub_issue.replace('_', " ")
            )
        } else {
            format!("Noise level {score:.1}; within normal range")
        };

        if finding.is_abnormal {
            finding.possible_causes = vec![
                "Gain set too high".into(),
                "Insufficient scene light".into(),
            ];
            finding.suggestions = vec![
                "Lower the camera gain".into(),
                "Improve scene lighting".into(),
            ];
            match sub_issue {
                "salt_pepper_noise" => {
                    finding.possible_causes.push("Sensor or ADC fault".into());
                    finding.suggestions.push("Check the sensor and signal path".into());
                }
                "snow_noise" => {
                    finding.possible_causes.push("Weak or interfering signal".into());
                    finding.suggestions.push("Check cabling and the video source".into());
                }
                _ => {
                    finding.suggestions.push("Enable denoising".into());
                }
            }
        }

        finding.process_time_ms = start.elapsed().as_secs_f32() * 1000.0;
        Ok(finding)
    }
}
