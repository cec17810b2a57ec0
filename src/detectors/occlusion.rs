//! Occlusion detector
//!
//! Tile-wise texture analysis: an occluded lens produces dark, featureless
//! regions. Tiles with low internal deviation and a dark mean count as
//! occluded; the dark gate keeps saturated-bright frames in the brightness
//! detector's domain. Deep level partitions finer and counts connected
//! occluded regions.

use std::time::Instant;

use crate::error::Result;
use crate::frame::{Frame, GrayPlane};
use crate::imgproc;
use crate::profiles::Thresholds;

use super::{ev, DetectionLevel, Detector, DetectorDescriptor, Finding, Severity};

pub static DESCRIPTOR: DetectorDescriptor = DetectorDescriptor {
    name: "occlusion",
    display_name: "Lens occlusion",
    issue_type: "occlusion",
    description: "Detects covered or blocked camera views from low-texture area",
    levels: &[DetectionLevel::Standard, DetectionLevel::Deep],
    priority: 25,
    suppresses: &["blur", "contrast"],
};

/// Tile texture floor and dark-mean gate for "occluded" classification.
const TILE_STD_FLOOR: f32 = 5.0;
const TILE_DARK_MEAN: f32 = 120.0;

pub fn factory(thresholds: &Thresholds) -> Box<dyn Detector> {
    Box::new(OcclusionDetector {
        threshold: thresholds.occlusion_threshold,
    })
}

#[derive(Debug)]
pub struct OcclusionDetector {
    threshold: f32,
}

struct TileGrid {
    cols: usize,
    rows: usize,
    occluded: Vec<bool>,
}

impl OcclusionDetector {
    /// Tile statistics on a grid derived from the frame size.
    fn tile_grid(plane: &GrayPlane, grid: usize) -> TileGrid {
        let cols = grid.min(plane.width.max(1));
        let rows = grid.min(plane.height.max(1));
        let mut occluded = vec![false; cols * rows];
        for ty in 0..rows {
            for tx in 0..cols {
                let x0 = tx * plane.width / cols;
                let x1 = ((tx + 1) * plane.width / cols).max(x0 + 1);
                let y0 = ty * plane.height / rows;
                let y1 = ((ty + 1) * plane.height / rows).max(y0 + 1);
                let mut sum = 0.0f64;
                let mut sq = 0.0f64;
                let mut n = 0.0f64;
                for y in y0..y1.min(plane.height) {
                    for x in x0..x1.min(plane.width) {
                        let v = plane.at(x, y) as f64;
                        sum += v;
                        sq += v * v;
                        n += 1.0;
                    }
                }
                let mean = sum / n.max(1.0);
                let std = (sq / n.max(1.0) - mean * mean).max(0.0).sqrt();
                occluded[ty * cols + tx] =
                    (std as f32) < TILE_STD_FLOOR && (mean as f32) < TILE_DARK_MEAN;
            }
        }
        TileGrid {
            cols,
            rows,
            occluded,
        }
    }

    /// Connected occluded regions, 4-neighborhood flood fill.
    fn region_count(grid: &TileGrid) -> usize {
        let mut seen = vec![false; grid.occluded.len()];
        let mut regions = 0;
        let mut stack = Vec::new();
        for start in 0..grid.occluded.len() {
            if !grid.occluded[start] || seen[start] {
                continue;
            }
            regions += 1;
            stack.push(start);
            seen[start] = true;
            while let Some(idx) = stack.pop() {
                let (x, y) = (idx % grid.cols, idx / grid.cols);
                let mut push = |nx: usize, ny: usize| {
                    let n = ny * grid.cols + nx;
                    if grid.occluded[n] && !seen[n] {
                        seen[n] = true;
                        stack.push(n);
                    }
                };
                if x > 0 {
                    push(x - 1, y);
                }
                if x + 1 < grid.cols {
                    push(x + 1, y);
                }
                if y > 0 {
                    push(x, y - 1);
                }
                if y + 1 < grid.rows {
                    push(x, y + 1);
                }
            }
        }
        regions
    }

    fn severity(&self, score: f32) -> Severity {
        if score <= self.threshold {
            Severity::Normal
        } else if score <= 0.5 {
            Severity::Info
        } else if score <= 0.7 {
            Severity::Warning
        } else {
            Severity::Error
        }
    }
}

impl Detector for OcclusionDetector {
    fn descriptor(&self) -> &'static DetectorDescriptor {
        &DESCRIPTOR
    }

    fn detect(&self, frame: &Frame, level: DetectionLevel) -> Result<Finding> {
        let start = Instant::now();
        let mut finding = Finding::new(&DESCRIPTOR, level);
        let gray = frame.gray();

        let grid_size = if level == DetectionLevel::Deep { 24 } else { 16 };
        let grid = Self::tile_grid(&gray, grid_size);
        let occluded_fraction =
            grid.occluded.iter().filter(|&&o| o).count() as f32 / grid.occluded.len() as f32;
        let edge_density = imgproc::edge_density(&gray, 100.0);

        // Sparse edges corroborate a covered view but cannot carry the
        // verdict alone: the edge term tops out at the strictest threshold.
        let score = (occluded_fraction * 0.7 + (1.0 - (edge_density * 10.0).min(1.0)) * 0.2)
            .clamp(0.0, 1.0);

        finding.score = score;
        finding.threshold = self.threshold;
        finding.is_abnormal = score > self.threshold;
        finding.confidence = if finding.is_abnormal {
            ((score - self.threshold) / (1.0 - self.threshold).max(1e-6)).min(1.0)
        } else {
            ((self.threshold - score) / self.threshold.max(1e-6)).min(1.0)
        };
        finding.severity = self.severity(score);

        finding.evidence.insert("occlusion_score".into(), ev(score));
        finding
            .evidence
            .insert("occluded_tile_fraction".into(), ev(occluded_fraction));
        finding.evidence.insert("edge_density".into(), ev(edge_density));
        finding
            .evidence
            .insert("tile_grid".into(), ev((grid.cols * grid.rows) as f32));

        if level == DetectionLevel::Deep {
            finding
                .evidence
                .insert("occlusion_regions".into(), ev(Self::region_count(&grid) as f32));
        }

        finding.explanation = if finding.is_abnormal {
            let grade = if score > 0.7 {
                "severely"
            } else if score > 0.5 {
                "partially"
            } else {
                "slightly"
            };
            format!("View is {grade} occluded ({:.0}% of the frame)", score * 100.0)
        } else {
            "No significant occlusion".to_string()
        };
        if finding.is_abnormal {
            finding.possible_causes = vec![
                "Object blocking the lens".into(),
                "Heavy lens contamination".into(),
                "Camera repositioned".into(),
            ];
            finding.suggestions = vec![
                "Check for obstructions in front of the camera".into(),
                "Clean the lens".into(),
                "Verify the mounting position".into(),
            ];
            if finding.severity == Severity::Error {
                finding.possible_causes.push("Lens cap still on".into());
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

    fn detector() -> OcclusionDetector {
        OcclusionDetector { threshold: 0.3 }
    }

    #[test]
    fn dark_flat_frame_is_occluded() {
        let frame = Frame::new(128, 128, CHANNELS_GRAY, vec![15u8; 128 * 128]).unwrap();
        let finding = detector().detect(&frame, DetectionLevel::Standard).unwrap();
        assert!(finding.is_abnormal);
        assert_eq!(finding.severity, Severity::Error);
    }

    #[test]
    fn bright_flat_frame_is_left_to_brightness() {
        let frame = Frame::new(128, 128, CHANNELS_GRAY, vec![250u8; 128 * 128]).unwrap();
        let finding = detector().detect(&frame, DetectionLevel::Standard).unwrap();
        assert!(!finding.is_abnormal, "score = {}", finding.score);
    }

    #[test]
    fn half_covered_frame_fires_with_one_region() {
        // Left half dark and flat, right half textured
        let data: Vec<u8> = (0..128u32)
            .flat_map(|y| {
                (0..128u32).map(move |x| {
                    if x < 64 {
                        10
                    } else {
                        ((x * 37 + y * 11) % 256) as u8
                    }
                })
            })
            .collect();
        let frame = Frame::new(128, 128, CHANNELS_GRAY, data).unwrap();
        let finding = detector().detect(&frame, DetectionLevel::Deep).unwrap();
        assert!(finding.is_abnormal);
        assert_eq!(finding.evidence["occlusion_regions"].as_f64().unwrap() as i32, 1);
    }

    #[test]
    fn textured_frame_passes() {
        let data: Vec<u8> = (0..128u32 * 128)
            .map(|i| ((i.wrapping_mul(2654435761)) >> 8) as u8)
            .collect();
        let frame = Frame::new(128, 128, CHANNELS_GRAY, data).unwrap();
        let finding = detector().detect(&frame, DetectionLevel::Standard).unwrap();
        assert!(!finding.is_abnormal);
    }
}
