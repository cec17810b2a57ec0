//! Pairwise frame metrics
//!
//! Similarity and motion measures between two frames, used by the video
//! detectors (freeze, scene change, shake) and the scene-change sampler.

use crate::frame::GrayPlane;

/// Mean absolute pixel difference between two planes of equal geometry.
/// Mismatched geometry reports the maximum difference.
pub fn mean_abs_diff(a: &GrayPlane, b: &GrayPlane) -> f32 {
    if a.width != b.width || a.height != b.height || a.is_empty() {
        return 255.0;
    }
    let sum: f64 = a
        .data
        .iter()
        .zip(&b.data)
        .map(|(x, y)| (x - y).abs() as f64)
        .sum();
    (sum / a.len() as f64) as f32
}

/// Histogram correlation similarity in [0, 1] (1 = identical shape).
pub fn histogram_correlation(h1: &[f32], h2: &[f32]) -> f32 {
    let n = h1.len().min(h2.len());
    if n == 0 {
        return 0.0;
    }
    let m1: f32 = h1[..n].iter().sum::<f32>() / n as f32;
    let m2: f32 = h2[..n].iter().sum::<f32>() / n as f32;
    let mut num = 0.0f32;
    let mut d1 = 0.0f32;
    let mut d2 = 0.0f32;
    for i in 0..n {
        let a = h1[i] - m1;
        let b = h2[i] - m2;
        num += a * b;
        d1 += a * a;
        d2 += b * b;
    }
    if d1 <= 0.0 || d2 <= 0.0 {
        // Both flat -> identical shape; one flat -> uncorrelated
        return if d1 <= 0.0 && d2 <= 0.0 { 1.0 } else { 0.0 };
    }
    let corr = num / (d1 * d2).sqrt();
    (corr + 1.0) / 2.0
}

/// Bhattacharyya distance between two normalized histograms, [0, 1]
/// (0 = identical).
pub fn bhattacharyya_distance(h1: &[f32], h2: &[f32]) -> f32 {
    let n = h1.len().min(h2.len());
    if n == 0 {
        return 1.0;
    }
    let bc: f32 = (0..n).map(|i| (h1[i] * h2[i]).max(0.0).sqrt()).sum();
    (1.0 - bc.min(1.0)).max(0.0).sqrt()
}

/// Structural similarity over 8x8 windows, mean across windows.
/// Standard constants for 8-bit dynamic range.
pub fn ssim(a: &GrayPlane, b: &GrayPlane) -> f32 {
    const C1: f64 = 6.5025; // (0.01 * 255)^2
    const C2: f64 = 58.5225; // (0.03 * 255)^2
    const WIN: usize = 8;

    if a.width != b.width || a.height != b.height || a.width < WIN || a.height < WIN {
        return 0.0;
    }

    let mut total = 0.0f64;
    let mut windows = 0usize;
    let mut y = 0;
    while y + WIN <= a.height {
        let mut x = 0;
        while x + WIN <= a.width {
            let mut sum_a = 0.0f64;
            let mut sum_b = 0.0f64;
            let mut sum_aa = 0.0f64;
            let mut sum_bb = 0.0f64;
            let mut sum_ab = 0.0f64;
            for yy in y..y + WIN {
                for xx in x..x + WIN {
                    let va = a.at(xx, yy) as f64;
                    let vb = b.at(xx, yy) as f64;
                    sum_a += va;
                    sum_b += vb;
                    sum_aa += va * va;
                    sum_bb += vb * vb;
                    sum_ab += va * vb;
                }
            }
            let n = (WIN * WIN) as f64;
            let mu_a = sum_a / n;
            let mu_b = sum_b / n;
            let var_a = (sum_aa / n - mu_a * mu_a).max(0.0);
            let var_b = (sum_bb / n - mu_b * mu_b).max(0.0);
            let cov = sum_ab / n - mu_a * mu_b;
            let s = ((2.0 * mu_a * mu_b + C1) * (2.0 * cov + C2))
                / ((mu_a * mu_a + mu_b * mu_b + C1) * (var_a + var_b + C2));
            total += s;
            windows += 1;
            x += WIN;
        }
        y += WIN;
    }
    if windows == 0 {
        0.0
    } else {
        (total / windows as f64) as f32
    }
}

/// Global displacement estimate between two planes via sparse block
/// matching: a grid of blocks searched over +/- `radius` pixels, mean of
/// the per-block best displacements.
///
/// Cheap stand-in for pyramidal optical flow; good enough to measure
/// whole-frame shake magnitude.
pub fn block_motion_magnitude(prev: &GrayPlane, curr: &GrayPlane, radius: usize) -> f32 {
    const GRID: usize = 4;
    const BLOCK: usize = 16;

    if prev.width != curr.width
        || prev.height != curr.height
        || prev.width < BLOCK + 2 * radius + 2
        || prev.height < BLOCK + 2 * radius + 2
    {
        return 0.0;
    }

    let mut magnitudes = Vec::with_capacity(GRID * GRID);
    let span_x = prev.width - BLOCK - 2 * radius;
    let span_y = prev.height - BLOCK - 2 * radius;

    for gy in 0..GRID {
        for gx in 0..GRID {
            let bx = radius + gx * span_x / GRID + span_x / (2 * GRID);
            let by = radius + gy * span_y / GRID + span_y / (2 * GRID);

            let mut best = f64::MAX;
            let mut best_dx = 0i32;
            let mut best_dy = 0i32;
            for dy in -(radius as i32)..=(radius as i32) {
                for dx in -(radius as i32)..=(radius as i32) {
                    let mut sad = 0.0f64;
                    for yy in 0..BLOCK {
                        for xx in 0..BLOCK {
                            let p = prev.at(bx + xx, by + yy);
                            let c = curr.at(
                                (bx as i32 + dx) as usize + xx,
                                (by as i32 + dy) as usize + yy,
                            );
                            sad += (p - c).abs() as f64;
                        }
                    }
                    if sad < best {
                        best = sad;
                        best_dx = dx;
                        best_dy = dy;
                    }
                }
            }
            magnitudes.push(((best_dx * best_dx + best_dy * best_dy) as f32).sqrt());
        }
    }
    magnitudes.iter().sum::<f32>() / magnitudes.len() as f32
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
    fn identical_planes_are_perfectly_similar() {
        let a = plane(64, 64, |x, y| ((x * 3 + y * 7) % 256) as f32);
        assert_eq!(mean_abs_diff(&a, &a), 0.0);
        assert!(ssim(&a, &a) > 0.999);
    }

    #[test]
    fn disjoint_planes_diverge() {
        let a = plane(64, 64, |_, _| 0.0);
        let b = plane(64, 64, |_, _| 255.0);
        assert!(mean_abs_diff(&a, &b) > 250.0);
        assert!(ssim(&a, &b) < 0.1);
    }

    #[test]
    fn bhattacharyya_zero_for_same_histogram() {
        let h = vec![0.25f32; 4];
        assert!(bhattacharyya_distance(&h, &h) < 1e-3);
        let g = vec![1.0f32, 0.0, 0.0, 0.0];
        let k = vec![0.0f32, 0.0, 0.0, 1.0];
        assert!(bhattacharyya_distance(&g, &k) > 0.99);
    }

    #[test]
    fn block_motion_tracks_translation() {
        let shift = 4usize;
        let tex = |x: usize, y: usize| ((x * 13 + y * 29 + (x / 3) * (y / 5)) % 256) as f32;
        let a = plane(96, 96, tex);
        let b = plane(96, 96, |x, y| tex(x.saturating_sub(shift), y));
        let mag = block_motion_magnitude(&a, &b, 6);
        assert!(
            (mag - shift as f32).abs() < 2.0,
            "expected ~{shift}, got {mag}"
        );
        assert!(block_motion_magnitude(&a, &a, 6) < 0.5);
    }
}
