//! Stripe detector
//!
//! Periodic interference (mains hum, signal coupling) shows as a dominant
//! frequency in the row/column projections. Scored by the energy share of
//! the strongest spectral bin on either axis; deep level estimates the
//! stripe period in pixels.

use std::time::Instant;

use crate::error::Result;
use crate::frame::Frame;
use crate::imgproc::spectral;
use crate::profiles::Thresholds;

use super::{
    ev, squash_confidence, DetectionLevel, Detector, DetectorDescriptor, Finding, Severity,
};

pub static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "stripe",
    display_name: "Stripe interference",
    issue_type: "stripe",
    description: "Detects horizontal/vertical stripe interference via FFT projections",
    levels: &[
        DetectionLevel::Fast,
        DetectionLevel::Standard,
        DetectionLevel::Deep,
    ],
    priority: 65,
    suppresses: &["noise"],
};

pub fn factory(thresholds: &Thresholds) -> Box<dyn Detector> {
    Box::new(StripeDetector {
        threshold: thresholds.stripe_threshold,
    })
}

#[derive(Debug)]
pub struct StripeDetector {
    threshold: f32,
}

impl StripeDetector {
    fn severity(&self, strength: f32) -> Severity {
        if strength <= self.threshold {
            Severity::Normal
        } else if strength <= self.threshold * 1.5 {
            Severity::Info
        } else if strength <= self.threshold * 2.5 {
            Severity::Warning
        } else {
            Severity::Error
        }
    }
}

impl Detector for StripeDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    fn detect(&self, frame: &Frame, level: DetectionLevel) -> Result<Finding> {
        let start = Instant::now();
        let mut finding = Finding::new(&DESCRIPTOR, level);

        let gray = frame.gray();
        // Horizontal stripes modulate the row profile; vertical ones the
        // column profile.
        let rows = spectral::projection_peak(&spectral::row_profile(&gray));
        let cols = spectral::projection_peak(&spectral::column_profile(&gray));

        let strength = rows.energy_ratio.max(cols.energy_ratio);
        let direction = if rows.energy_ratio > cols.energy_ratio * 1.5 {
            "horizontal"
        } else if cols.energy_ratio > rows.energy_ratio * 1.5 {
            "vertical"
        } else if strength > self.threshold {
            "both"
        } else {
            "none"
        };

        finding.score = strength;
        finding.threshold = self.threshold;
        finding.is_abnormal = strength > self.threshold;
        finding.confidence = squash_confidence(strength, self.threshold);
        finding.severity = self.severity(strength);
        if !finding.is_abnormal {
            finding.issue_type = "stripe".to_string();
        }

        finding
            .evidence
            .insert("horizontal_stripe_energy".into(), ev(rows.energy_ratio));
        finding
            .evidence
            .insert("vertical_stripe_energy".into(), ev(cols.energy_ratio));
        finding
            .evidence
            .insert("stripe_direction".into(), serde_json::Value::String(direction.into()));

        if level == DetectionLevel::Deep && finding.is_abnormal {
            let period = if rows.energy_ratio >= cols.energy_ratio {
                rows.period_px
            } else {
                cols.period_px
            };
            finding.evidence.insert("estimated_period_px".into(), ev(period));
        }

        finding.explanation = if finding.is_abnormal {
            format!("{direction} stripe interference, strength {strength:.3}")
        } else {
            "No significant stripe interference".to_string()
        };
        if finding.is_abnormal {
            finding.possible_causes = vec![
                "Mains interference (50/60 Hz)".into(),
                "Poor cable shielding".into(),
                "Bad grounding".into(),
            ];
            finding.suggestions = vec![
                "Check power supply stability".into(),
                "Check video cable shielding and grounding".into(),
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

    #[test]
    fn banded_frame_fires_with_direction() {
        let detector = StripeDetector { threshold: 0.3 };
        let data: Vec<u8> = (0..64u32)
            .flat_map(|y| {
                let v = if (y / 4) % 2 == 0 { 40 } else { 200 };
                std::iter::repeat(v).take(64)
            })
            .collect();
        let frame = Frame::new(64, 64, CHANNELS_GRAY, data).unwrap();
        let finding = detector.detect(&frame, DetectionLevel::Deep).unwrap();
        assert!(finding.is_abnormal);
        assert_eq!(finding.evidence["stripe_direction"], "horizontal");
        assert!(finding.evidence.contains_key("estimated_period_px"));
    }

    #[test]
    fn textured_frame_stays_quiet() {
        let detector = StripeDetector { threshold: 0.3 };
        let data: Vec<u8> = (0..64u32 * 64)
            .map(|i| ((i.wrapping_mul(2654435761)) >> 8) as u8)
            .collect();
        let frame = Frame::new(64, 64, CHANNELS_GRAY, data).unwrap();
        let finding = detector.detect(&frame, DetectionLevel::Standard).unwrap();
        assert!(!finding.is_abnormal, "score = {}", finding.score);
    }
}
