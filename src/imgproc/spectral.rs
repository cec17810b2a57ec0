//! Spectral analysis for periodic interference
//!
//! Stripe patterns show up as a dominant frequency in the 1-D projection of
//! the image along the orthogonal axis. Each projection is mean-removed,
//! transformed with `rustfft`, and scored by how much of the non-DC
//! spectral energy the single strongest bin holds.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::frame::GrayPlane;

/// Peak analysis of one projection.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionPeak {
    /// Share of non-DC spectral energy in the strongest bin, [0, 1].
    pub energy_ratio: f32,
    /// Period of the strongest bin in pixels (projection length / bin).
    pub period_px: f32,
}

/// Row-means profile (one value per row): horizontal stripes modulate it.
pub fn row_profile(plane: &GrayPlane) -> Vec<f32> {
    (0..plane.height)
        .map(|y| {
            (0..plane.width).map(|x| plane.at(x, y)).sum::<f32>() / plane.width.max(1) as f32
        })
        .collect()
}

/// Column-means profile (one value per column): vertical stripes modulate it.
pub fn column_profile(plane: &GrayPlane) -> Vec<f32> {
    (0..plane.width)
        .map(|x| {
            (0..plane.height).map(|y| plane.at(x, y)).sum::<f32>() / plane.height.max(1) as f32
        })
        .collect()
}

/// Dominant-frequency score of a 1-D profile.
///
/// Bins 0 and 1 are excluded: DC and the slow illumination ramp are not
/// stripes. Returns zero energy for profiles too short to analyze.
pub fn projection_peak(profile: &[f32]) -> ProjectionPeak {
    let n = profile.len();
    if n < 8 {
        return ProjectionPeak {
            energy_ratio: 0.0,
            period_px: 0.0,
        };
    }

    let mean = profile.iter().sum::<f32>() / n as f32;
    let mut buf: Vec<Complex<f32>> = profile
        .iter()
        .map(|&v| Complex::new(v - mean, 0.0))
        .collect();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buf);

    // One-sided spectrum, skipping DC and bin 1
    let half = n / 2;
    let mut total = 0.0f64;
    let mut peak = 0.0f64;
    let mut peak_bin = 0usize;
    for (k, c) in buf.iter().enumerate().take(half + 1).skip(2) {
        let mag = c.norm() as f64;
        total += mag;
        if mag > peak {
            peak = mag;
            peak_bin = k;
        }
    }

    if total <= f64::EPSILON {
        return ProjectionPeak {
            energy_ratio: 0.0,
            period_px: 0.0,
        };
    }
    ProjectionPeak {
        energy_ratio: (peak / total) as f32,
        period_px: n as f32 / peak_bin as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(w: usize, h: usize, f: impl Fn(usize, usize) -> f32) -> GrayPlane {
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                data.push(f(x, y));
            }
        }
        GrayPlane {
            width: w,
            height: h,
            data,
        }
    }

    #[test]
    fn horizontal_stripes_dominate_row_spectrum() {
        // 8-pixel-period horizontal bands
        let striped = plane(64, 64, |_, y| if (y / 4) % 2 == 0 { 40.0 } else { 200.0 });
        let rows = projection_peak(&row_profile(&striped));
        let cols = projection_peak(&column_profile(&striped));
        assert!(rows.energy_ratio > 0.5, "rows = {:?}", rows);
        assert!(cols.energy_ratio < 0.2, "cols = {:?}", cols);
        assert!((rows.period_px - 8.0).abs() < 1.5);
    }

    #[test]
    fn flat_image_has_no_dominant_frequency() {
        let flat = plane(64, 64, |_, _| 120.0);
        assert_eq!(projection_peak(&row_profile(&flat)).energy_ratio, 0.0);
    }

    #[test]
    fn short_profile_scores_zero() {
        assert_eq!(projection_peak(&[1.0, 2.0, 3.0]).energy_ratio, 0.0);
    }
}
