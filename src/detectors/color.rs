//! Color detector
//!
//! Channel-balance and saturation analysis on BGR frames: full-field
//! blue/green fill, grayscale fallback (night mode, dead color sensor) and
//! global color cast. Cast judgement is tightened when the per-block
//! deviation pattern is non-uniform, so a solid-color object in part of the
//! scene does not read as a white-balance fault.
//!
//! Grayscale input cannot carry color faults; it yields a normal finding.

use std::time::Instant;

use crate::error::Result;
use crate::frame::Frame;
use crate::imgproc;
use crate::profiles::Thresholds;

use super::{ev, DetectionLevel, Detector, DetectorDescriptor, Finding, Severity};

pub static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "color",
    display_name: "Image color",
    issue_type: "color_cast",
    description: "Detects color cast, grayscale fallback and blue/green fill",
    levels: &[
        DetectionLevel::Fast,
        DetectionLevel::Standard,
        DetectionLevel::Deep,
    ],
    priority: 20,
    suppresses: &[],
};

/// Hue-mask coverage above which the frame counts as a solid fill.
const SOLID_FILL_RATIO: f32 = 0.8;

pub fn factory(thresholds: &Thresholds) -> Box<dyn Detector> {
    Box::new(ColorDetector {
        saturation_min: thresholds.saturation_min,
        cast_threshold: thresholds.color_cast_threshold,
    })
}

#[derive(Debug)]
pub struct ColorDetector {
    saturation_min: f32,
    cast_threshold: f32,
}

impl ColorDetector {
    fn channel_mean(frame: &Frame, channel: usize) -> f32 {
        let mut acc = 0.0f64;
        let mut n = 0usize;
        for v in frame.channel_iter(channel) {
            acc += v as f64;
            n += 1;
        }
        if n == 0 {
            0.0
        } else {
            (acc / n as f64) as f32
        }
    }

    /// How evenly the channel deviation is spread across 64px blocks.
    /// 1.0 = uniform cast, 0.0 = deviation concentrated in a region.
    fn cast_uniformity(frame: &Frame) -> f32 {
        const BLOCK: usize = 64;
        let w = frame.width() as usize;
        let h = frame.height() as usize;
        let (bw, bh) = (w / BLOCK, h / BLOCK);
        if bw < 2 || bh < 2 {
            return 1.0;
        }

        let pixels = frame.pixels();
        let mut deviations = Vec::with_capacity(bw * bh);
        for by in 0..bh {
            for bx in 0..bw {
                let mut sums = [0.0f64; 3];
                let mut n = 0.0f64;
                for y in (by * BLOCK)..((by + 1) * BLOCK) {
                    for x in (bx * BLOCK)..((bx + 1) * BLOCK) {
                        let base = (y * w + x) * 3;
                        for c in 0..3 {
                            sums[c] += pixels[base + c] as f64;
                        }
                        n += 1.0;
                    }
                }
                let means = [sums[0] / n, sums[1] / n, sums[2] / n];
                let avg = (means[0] + means[1] + means[2]) / 3.0;
                let dev = means
                    .iter()
                    .map(|m| (m - avg).abs())
                    .fold(0.0f64, f64::max);
                deviations.push(dev as f32);
            }
        }

        let mean_dev = deviations.iter().sum::<f32>() / deviations.len() as f32;
        if mean_dev < 1.0 {
            return 1.0;
        }
        let var = deviations
            .iter()
            .map(|d| (d - mean_dev) * (d - mean_dev))
            .sum::<f32>()
            / deviations.len() as f32;
        let cv = var.sqrt() / mean_dev;
        if cv < 0.3 {
            1.0
        } else if cv > 0.6 {
            0.0
        } else {
            1.0 - (cv - 0.3) / 0.3
        }
    }
}

impl Detector for ColorDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    fn detect(&self, frame: &Frame, level: DetectionLevel) -> Result<Finding> {
        let start = Instant::now();
        let mut finding = Finding::new(&DESCRIPTOR, level);

        if !frame.is_color() {
            finding.issue_type = "color".to_string();
            finding.threshold = self.cast_threshold;
            finding.confidence = 1.0;
            finding.explanation = "Color analysis requires a color frame".to_string();
            finding.process_time_ms = start.elapsed().as_secs_f32() * 1000.0;
            return Ok(finding);
        }

        let saturation = imgproc::mean_saturation(frame);
        let b_mean = Self::channel_mean(frame, 0);
        let g_mean = Self::channel_mean(frame, 1);
        let r_mean = Self::channel_mean(frame, 2);
        let rgb_avg = (b_mean + g_mean + r_mean) / 3.0;
        let max_deviation = (b_mean - rgb_avg)
            .abs()
            .max((g_mean - rgb_avg).abs())
            .max((r_mean - rgb_avg).abs());

        let blue_ratio = imgproc::hue_range_ratio(frame, 100.0, 130.0, 100.0);
        let green_ratio = imgproc::hue_range_ratio(frame, 35.0, 85.0, 100.0);
        let uniformity = Self::cast_uniformity(frame);

        // A non-uniform deviation pattern needs a much larger excursion
        // before it counts as a cast.
        let cast_gate = if uniformity < 0.75 {
            self.cast_threshold * 1.8
        } else {
            self.cast_threshold
        };
        // A uniform frame carries no chroma information at all; black,
        // white and washed-out fields belong to signal-loss/brightness,
        // not to the night-mode (grayscale) branch.
        let luminance_std = imgproc::stddev(&frame.gray());
        let is_grayscale = saturation < self.saturation_min && luminance_std > 3.0;
        let is_blue = blue_ratio > SOLID_FILL_RATIO;
        let is_green = green_ratio > SOLID_FILL_RATIO;
        let is_cast = max_deviation > cast_gate;

        finding.evidence.insert("mean_saturation".into(), ev(saturation));
        finding.evidence.insert("b_channel_mean".into(), ev(b_mean));
        finding.evidence.insert("g_channel_mean".into(), ev(g_mean));
        finding.evidence.insert("r_channel_mean".into(), ev(r_mean));
        finding
            .evidence
            .insert("max_channel_deviation".into(), ev(max_deviation));
        finding.evidence.insert("blue_fill_ratio".into(), ev(blue_ratio));
        finding.evidence.insert("green_fill_ratio".into(), ev(green_ratio));
        finding.evidence.insert("cast_uniformity".into(), ev(uniformity));
        finding.evidence.insert("luminance_std".into(), ev(luminance_std));

        if level == DetectionLevel::Deep {
            let mut hue_hist = [0.0f32; 180];
            let mut n = 0usize;
            for px in frame.pixels().chunks_exact(3) {
                let (h, _, _) = imgproc::bgr_to_hsv(px[0], px[1], px[2]);
                hue_hist[(h as usize).min(179)] += 1.0;
                n += 1;
            }
            let total = n.max(1) as f32;
            let (dominant_hue, peak) = hue_hist
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, &v)| (i as f32, v / total))
                .unwrap_or((0.0, 0.0));
            finding.evidence.insert("dominant_hue".into(), ev(dominant_hue));
            finding.evidence.insert("hue_concentration".into(), ev(peak));
            let temp = if r_mean > b_mean * 1.2 {
                "warm"
            } else if b_mean > r_mean * 1.2 {
                "cool"
            } else {
                "neutral"
            };
            finding
                .evidence
                .insert("estimated_color_temp".into(), serde_json::Value::String(temp.into()));
        }

        // Priority: solid fill > grayscale > cast
        if is_blue || is_green {
            let (issue, ratio) = if is_blue {
                ("blue_screen", blue_ratio)
            } else {
                ("green_screen", green_ratio)
            };
            finding.issue_type = issue.to_string();
            finding.is_abnormal = true;
            finding.score = ratio;
            finding.threshold = SOLID_FILL_RATIO;
            finding.confidence = (ratio / SOLID_FILL_RATIO).min(1.0);
            finding.severity = Severity::Error;
            finding.explanation = format!(
                "Frame is filled with {} ({:.0}% coverage); encoder or signal fault",
                if is_blue { "blue" } else { "green" },
                ratio * 100.0
            );
            finding.possible_causes = vec![
                "Camera signal fault".into(),
                "Video encoder failure".into(),
                "Loose cable".into(),
            ];
            finding.suggestions = vec![
                "Check the video cabling".into(),
                "Restart the camera".into(),
                "Check the encoder".into(),
            ];
        } else if is_grayscale {
            finding.issue_type = "grayscale".to_string();
            finding.is_abnormal = true;
            finding.score = saturation;
            finding.threshold = self.saturation_min;
            finding.confidence =
                ((self.saturation_min - saturation) / self.saturation_min.max(1e-6)).min(1.0);
            finding.severity = if saturation < 3.0 {
                Severity::Error
            } else if saturation < self.saturation_min * 0.5 {
                Severity::Warning
            } else {
                Severity::Info
            };
            finding.explanation = format!(
                "Mean saturation {saturation:.1}; image is effectively monochrome"
            );
            finding.possible_causes = vec![
                "Camera in black-and-white mode".into(),
                "Night vision engaged".into(),
                "Color sensor fault".into(),
            ];
            finding.suggestions = vec![
                "Check the day/night mode setting".into(),
                "Check ambient light levels".into(),
            ];
        } else if is_cast {
            let cast_color = if r_mean >= g_mean && r_mean >= b_mean {
                "red"
            } else if g_mean >= r_mean && g_mean >= b_mean {
                "green"
            } else {
                "blue"
            };
            finding.issue_type = "color_cast".to_string();
            finding.is_abnormal = true;
            finding.score = max_deviation;
            finding.threshold = self.cast_threshold;
            finding.confidence = (max_deviation / (self.cast_threshold * 2.0)).min(1.0);
            finding.severity = if max_deviation > self.cast_threshold * 2.0 {
                Severity::Warning
            } else {
                Severity::Info
            };
            finding.explanation = format!(
                "Image leans {cast_color} (channel deviation {max_deviation:.1})"
            );
            finding.possible_causes = vec![
                "White balance mis-set".into(),
                "Color temperature of the light source".into(),
                "Sensor color drift with age".into(),
            ];
            finding.suggestions = vec![
                "Run auto white balance".into(),
                "Check the scene light source".into(),
            ];
        } else {
            finding.issue_type = "color".to_string();
            finding.score = max_deviation;
            finding.threshold = self.cast_threshold;
            finding.confidence = 1.0 - (max_deviation / self.cast_threshold.max(1e-6)).min(1.0);
            finding.explanation = "Color balance is normal".to_string();
        }

        finding.process_time_ms = start.elapsed().as_secs_f32() * 1000.0;
        Ok(finding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CHANNELS_BGR, CHANNELS_GRAY};

    fn detector() -> ColorDetector {
        ColorDetector {
            saturation_min: 10.0,
            cast_threshold: 30.0,
        }
    }

    fn solid_bgr(b: u8, g: u8, r: u8) -> Frame {
        Frame::new(32, 32, CHANNELS_BGR, [b, g, r].repeat(1024)).unwrap()
    }

    #[test]
    fn blue_fill_is_an_error() {
        let finding = detector()
            .detect(&solid_bgr(220, 40, 30), DetectionLevel::Standard)
            .unwrap();
        assert_eq!(finding.issue_type, "blue_screen");
        assert_eq!(finding.severity, Severity::Error);
        assert!(finding.confidence > 0.9);
    }

    #[test]
    fn textured_achromatic_frame_reads_as_grayscale() {
        // Night-mode footage: real texture, all channels equal
        let data: Vec<u8> = (0..32u32 * 32)
            .flat_map(|i| {
                let v = (40 + (i.wrapping_mul(2654435761) >> 8) % 160) as u8;
                [v, v, v]
            })
            .collect();
        let frame = Frame::new(32, 32, CHANNELS_BGR, data).unwrap();
        let finding = detector().detect(&frame, DetectionLevel::Standard).unwrap();
        assert_eq!(finding.issue_type, "grayscale");
        assert!(finding.is_abnormal);
    }

    #[test]
    fn uniform_gray_field_is_not_the_grayscale_issue() {
        // No texture, no chroma: exposure/signal detectors own this frame
        let finding = detector()
            .detect(&solid_bgr(128, 128, 128), DetectionLevel::Standard)
            .unwrap();
        assert!(!finding.is_abnormal);
        assert_eq!(finding.issue_type, "color");
    }

    #[test]
    fn warm_tint_reads_as_cast() {
        // Strong red lean, saturated enough to not be grayscale
        let finding = detector()
            .detect(&solid_bgr(90, 120, 220), DetectionLevel::Standard)
            .unwrap();
        assert_eq!(finding.issue_type, "color_cast");
        assert!(finding.explanation.contains("red"));
    }

    #[test]
    fn gray_input_yields_normal_finding() {
        let frame = Frame::new(16, 16, CHANNELS_GRAY, vec![100u8; 256]).unwrap();
        let finding = detector().detect(&frame, DetectionLevel::Standard).unwrap();
        assert!(!finding.is_abnormal);
        assert_eq!(finding.issue_type, "color");
    }

    #[test]
    fn deep_level_estimates_temperature() {
        let finding = detector()
            .detect(&solid_bgr(90, 120, 220), DetectionLevel::Deep)
            .unwrap();
        assert_eq!(finding.evidence["estimated_color_temp"], "warm");
    }
}
