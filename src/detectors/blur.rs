//! Blur detector
//!
//! Sharpness score from the Laplacian variance of a noise-suppressed
//! luminance plane (3x3 median + 3x3 box prefilter, so sensor noise does
//! not masquerade as detail). Standard level blends in the Sobel gradient
//! mean; deep level adds multi-scale Laplacian, Brenner and Tenengrad
//! measures. Low score = blurred.

use std::time::Instant;

use crate::error::Result;
use crate::frame::{Frame, GrayPlane};
use crate::imgproc;
use crate::profiles::Thresholds;

use super::{
    ev, squash_confidence, DetectionLevel, Detector, DetectorDescriptor, Finding, Severity,
};

pub static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "blur",
    display_name: "Image blur",
    issue_type: "blur",
    description: "Detects defocus and motion blur from gradient energy",
    levels: &[
        DetectionLevel::Fast,
        DetectionLevel::Standard,
        DetectionLevel::Deep,
    ],
    priority: 50,
    suppresses: &["noise"],
};

pub fn factory(thresholds: &Thresholds) -> Box<dyn Detector> {
    Box::new(BlurDetector {
        threshold: thresholds.blur_threshold,
    })
}

#[derive(Debug)]
pub struct BlurDetector {
    threshold: f32,
}

impl BlurDetector {
    fn denoised(&self, frame: &Frame) -> GrayPlane {
        imgproc::box_blur3(&imgproc::median3x3(&frame.gray()))
    }

    fn fast_score(&self, plane: &GrayPlane, finding: &mut Finding) -> f32 {
        let lap_var = imgproc::laplacian_variance(plane);
        finding.evidence.insert("laplacian_variance".into(), ev(lap_var));
        lap_var
    }

    fn standard_score(&self, plane: &GrayPlane, finding: &mut Finding) -> f32 {
        let lap_var = imgproc::laplacian_variance(plane);
        let grad_mean = imgproc::gradient_mean(plane);
        let score = lap_var * 0.6 + grad_mean * 0.4;
        finding.evidence.insert("laplacian_variance".into(), ev(lap_var));
        finding.evidence.insert("gradient_mean".into(), ev(grad_mean));
        score
    }

    fn deep_score(&self, plane: &GrayPlane, finding: &mut Finding) -> f32 {
        let mut scale_scores = Vec::with_capacity(3);
        for factor in [1usize, 2, 4] {
            let scaled = imgproc::decimate(plane, factor);
            let lap_var = imgproc::laplacian_variance(&scaled);
            finding
                .evidence
                .insert(format!("laplacian_scale_1_{factor}"), ev(lap_var));
            scale_scores.push(lap_var);
        }
        let scale_mean = scale_scores.iter().sum::<f32>() / scale_scores.len() as f32;

        let brenner = imgproc::brenner_gradient(plane);
        let tenengrad = imgproc::tenengrad(plane);
        let edge_density = imgproc::edge_density(plane, 100.0);
        finding.evidence.insert("brenner_gradient".into(), ev(brenner));
        finding.evidence.insert("tenengrad".into(), ev(tenengrad));
        finding.evidence.insert("edge_density".into(), ev(edge_density));

        scale_mean * 0.4 + brenner * 0.2 + tenengrad * 0.2 + edge_density * 1000.0 * 0.2
    }

    fn severity(&self, score: f32) -> Severity {
        if score >= self.threshold {
            Severity::Normal
        } else if score >= self.threshold * 0.7 {
            Severity::Info
        } else if score >= self.threshold * 0.4 {
            Severity::Warning
        } else {
            Severity::Error
        }
    }
}

impl Detector for BlurDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    fn detect(&self, frame: &Frame, level: DetectionLevel) -> Result<Finding> {
        let start = Instant::now();
        let mut finding = Finding::new(&DESCRIPTOR, level);

        let plane = self.denoised(frame);
        let score = match level {
            DetectionLevel::Fast => self.fast_score(&plane, &mut finding),
            DetectionLevel::Standard => self.standard_score(&plane, &mut finding),
            DetectionLevel::Deep => self.deep_score(&plane, &mut finding),
        };

        finding.score = score;
        finding.threshold = self.threshold;
        finding.is_abnormal = score < self.threshold;
        finding.confidence = squash_confidence(score, self.threshold);
        finding.severity = self.severity(score);

        finding.explanation = if finding.is_abnormal {
            format!(
                "Sharpness score {score:.1} below threshold {:.1}; image is blurred",
                self.threshold
            )
        } else {
            format!("Sharpness score {score:.1}; image is sharp")
        };
        if finding.is_abnormal {
            finding.possible_causes = vec![
                "Dirty or smeared lens".into(),
                "Camera out of focus".into(),
            ];
            finding.suggestions = vec!["Inspect and clean the lens".into()];
            if finding.severity >= Severity::Warning {
                finding.possible_causes.push("Motion blur from a loose mount".into());
                finding
                    .suggestions
                    .extend(["Refocus the camera".into(), "Check the camera mount".into()]);
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

    fn checkerboard(w: u32, h: u32) -> Frame {
        let data: Vec<u8> = (0..h)
            .flat_map(|y| {
                (0..w).map(move |x| if (x / 2 + y / 2) % 2 == 0 { 20 } else { 230 })
            })
            .collect();
        Frame::new(w, h, CHANNELS_GRAY, data).unwrap()
    }

    fn flat(w: u32, h: u32, v: u8) -> Frame {
        Frame::new(w, h, CHANNELS_GRAY, vec![v; (w * h) as usize]).unwrap()
    }

    #[test]
    fn sharp_pattern_passes_flat_field_fails() {
        let detector = BlurDetector { threshold: 100.0 };
        let sharp = detector
            .detect(&checkerboard(96, 96), DetectionLevel::Standard)
            .unwrap();
        assert!(!sharp.is_abnormal, "score = {}", sharp.score);

        let blurred = detector.detect(&flat(96, 96, 120), DetectionLevel::Standard).unwrap();
        assert!(blurred.is_abnormal);
        assert_eq!(blurred.severity, Severity::Error);
        assert_eq!(blurred.issue_type, "blur");
    }

    #[test]
    fn deep_level_adds_feature_blend_evidence() {
        let detector = BlurDetector { threshold: 100.0 };
        let finding = detector
            .detect(&checkerboard(64, 64), DetectionLevel::Deep)
            .unwrap();
        assert!(finding.evidence.contains_key("brenner_gradient"));
        assert!(finding.evidence.contains_key("tenengrad"));
        assert!(finding.evidence.contains_key("laplacian_scale_1_4"));
    }
}
