//! Image metric kernels
//!
//! ## Responsibilities
//!
//! - Single-frame quality metrics (sharpness, exposure, texture, noise)
//! - Color-space conversion (BGR -> HSV, OpenCV value ranges)
//! - Histograms and entropy
//!
//! Pairwise frame metrics live in `compare`, spectral analysis in
//! `spectral`. Everything here is pure CPU math over `GrayPlane`/`Frame`
//! buffers; detectors must never suspend, so nothing in this module is
//! async.

pub mod compare;
pub mod spectral;

use crate::frame::{Frame, GrayPlane};

/// Mean of a plane.
pub fn mean(plane: &GrayPlane) -> f32 {
    if plane.is_empty() {
        return 0.0;
    }
    plane.data.iter().sum::<f32>() / plane.len() as f32
}

/// Population standard deviation of a plane.
pub fn stddev(plane: &GrayPlane) -> f32 {
    if plane.is_empty() {
        return 0.0;
    }
    let m = mean(plane);
    let var = plane.data.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / plane.len() as f32;
    var.sqrt()
}

/// (min, max) of a plane.
pub fn min_max(plane: &GrayPlane) -> (f32, f32) {
    let mut lo = f32::MAX;
    let mut hi = f32::MIN;
    for &v in &plane.data {
        if v < lo {
            lo = v;
        }
        if v > hi {
            hi = v;
        }
    }
    if plane.is_empty() {
        (0.0, 0.0)
    } else {
        (lo, hi)
    }
}

/// Percentile (0-100) via sorted copy. Fine for per-frame use.
pub fn percentile(plane: &GrayPlane, p: f32) -> f32 {
    if plane.is_empty() {
        return 0.0;
    }
    let mut sorted = plane.data.clone();
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((p / 100.0) * (sorted.len() - 1) as f32).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Median of an arbitrary f32 slice (consumes a copy).
pub fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted[sorted.len() / 2]
}

/// 3x3 Laplacian response, interior pixels only.
fn laplacian(plane: &GrayPlane) -> Vec<f32> {
    let (w, h) = (plane.width, plane.height);
    if w < 3 || h < 3 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity((w - 2) * (h - 2));
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let v = plane.at(x, y - 1) + plane.at(x, y + 1) + plane.at(x - 1, y)
                + plane.at(x + 1, y)
                - 4.0 * plane.at(x, y);
            out.push(v);
        }
    }
    out
}

/// Variance of the Laplacian response. Higher = sharper.
pub fn laplacian_variance(plane: &GrayPlane) -> f32 {
    let lap = laplacian(plane);
    if lap.is_empty() {
        return 0.0;
    }
    let m = lap.iter().sum::<f32>() / lap.len() as f32;
    lap.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / lap.len() as f32
}

/// Noise sigma via the median absolute deviation of the Laplacian
/// (MAD / 0.6745).
pub fn laplacian_noise_sigma(plane: &GrayPlane) -> f32 {
    let lap = laplacian(plane);
    if lap.is_empty() {
        return 0.0;
    }
    let abs: Vec<f32> = lap.iter().map(|v| v.abs()).collect();
    median(&abs) / 0.6745
}

/// Sobel gradient magnitude image, interior pixels only.
fn sobel_magnitude(plane: &GrayPlane) -> Vec<f32> {
    let (w, h) = (plane.width, plane.height);
    if w < 3 || h < 3 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity((w - 2) * (h - 2));
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = plane.at(x + 1, y - 1) + 2.0 * plane.at(x + 1, y) + plane.at(x + 1, y + 1)
                - plane.at(x - 1, y - 1)
                - 2.0 * plane.at(x - 1, y)
                - plane.at(x - 1, y + 1);
            let gy = plane.at(x - 1, y + 1) + 2.0 * plane.at(x, y + 1) + plane.at(x + 1, y + 1)
                - plane.at(x - 1, y - 1)
                - 2.0 * plane.at(x, y - 1)
                - plane.at(x + 1, y - 1);
            out.push((gx * gx + gy * gy).sqrt());
        }
    }
    out
}

/// Mean Sobel gradient magnitude.
pub fn gradient_mean(plane: &GrayPlane) -> f32 {
    let mag = sobel_magnitude(plane);
    if mag.is_empty() {
        return 0.0;
    }
    mag.iter().sum::<f32>() / mag.len() as f32
}

/// Tenengrad focus measure: mean of squared gradient magnitude.
pub fn tenengrad(plane: &GrayPlane) -> f32 {
    let mag = sobel_magnitude(plane);
    if mag.is_empty() {
        return 0.0;
    }
    mag.iter().map(|v| v * v).sum::<f32>() / mag.len() as f32
}

/// Brenner gradient: mean squared horizontal 2-pixel difference.
pub fn brenner_gradient(plane: &GrayPlane) -> f32 {
    let (w, h) = (plane.width, plane.height);
    if w < 3 {
        return 0.0;
    }
    let mut acc = 0.0f64;
    let mut n = 0usize;
    for y in 0..h {
        for x in 0..w - 2 {
            let d = plane.at(x + 2, y) - plane.at(x, y);
            acc += (d * d) as f64;
            n += 1;
        }
    }
    if n == 0 {
        0.0
    } else {
        (acc / n as f64) as f32
    }
}

/// Fraction of pixels whose Sobel magnitude clears `threshold`.
/// Stand-in for a full hysteresis edge map.
pub fn edge_density(plane: &GrayPlane, threshold: f32) -> f32 {
    let mag = sobel_magnitude(plane);
    if mag.is_empty() {
        return 0.0;
    }
    mag.iter().filter(|&&v| v > threshold).count() as f32 / mag.len() as f32
}

/// Per-pixel local standard deviation under a square box window.
pub fn local_stddev(plane: &GrayPlane, radius: usize) -> GrayPlane {
    let (w, h) = (plane.width, plane.height);
    let mut out = vec![0.0f32; w * h];
    for y in 0..h {
        let y0 = y.saturating_sub(radius);
        let y1 = (y + radius + 1).min(h);
        for x in 0..w {
            let x0 = x.saturating_sub(radius);
            let x1 = (x + radius + 1).min(w);
            let mut sum = 0.0f32;
            let mut sq = 0.0f32;
            let mut n = 0.0f32;
            for yy in y0..y1 {
                for xx in x0..x1 {
                    let v = plane.at(xx, yy);
                    sum += v;
                    sq += v * v;
                    n += 1.0;
                }
            }
            let m = sum / n;
            out[y * w + x] = (sq / n - m * m).max(0.0).sqrt();
        }
    }
    GrayPlane {
        width: w,
        height: h,
        data: out,
    }
}

/// 3x3 median filter. Border pixels are copied through.
pub fn median3x3(plane: &GrayPlane) -> GrayPlane {
    let (w, h) = (plane.width, plane.height);
    let mut out = plane.data.clone();
    if w >= 3 && h >= 3 {
        let mut window = [0.0f32; 9];
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let mut k = 0;
                for dy in 0..3 {
                    for dx in 0..3 {
                        window[k] = plane.at(x + dx - 1, y + dy - 1);
                        k += 1;
                    }
                }
                window.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                out[y * w + x] = window[4];
            }
        }
    }
    GrayPlane {
        width: w,
        height: h,
        data: out,
    }
}

/// 3x3 box blur. Border pixels are copied through.
pub fn box_blur3(plane: &GrayPlane) -> GrayPlane {
    let (w, h) = (plane.width, plane.height);
    let mut out = plane.data.clone();
    if w >= 3 && h >= 3 {
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let mut acc = 0.0f32;
                for dy in 0..3 {
                    for dx in 0..3 {
                        acc += plane.at(x + dx - 1, y + dy - 1);
                    }
                }
                out[y * w + x] = acc / 9.0;
            }
        }
    }
    GrayPlane {
        width: w,
        height: h,
        data: out,
    }
}

/// Standard deviation of the residual after a 3x3 median filter.
/// Texture survives the median; impulsive noise does not.
pub fn median_residual_stddev(plane: &GrayPlane) -> f32 {
    let (w, h) = (plane.width, plane.height);
    if w < 3 || h < 3 {
        return 0.0;
    }
    let mut residuals = Vec::with_capacity((w - 2) * (h - 2));
    let mut window = [0.0f32; 9];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut k = 0;
            for dy in 0..3 {
                for dx in 0..3 {
                    window[k] = plane.at(x + dx - 1, y + dy - 1);
                    k += 1;
                }
            }
            window.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            residuals.push(plane.at(x, y) - window[4]);
        }
    }
    let m = residuals.iter().sum::<f32>() / residuals.len() as f32;
    (residuals.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / residuals.len() as f32).sqrt()
}

/// Integer-factor decimation by box averaging (multi-scale analysis).
pub fn decimate(plane: &GrayPlane, factor: usize) -> GrayPlane {
    if factor <= 1 {
        return plane.clone();
    }
    let nw = (plane.width / factor).max(1);
    let nh = (plane.height / factor).max(1);
    let mut out = vec![0.0f32; nw * nh];
    for oy in 0..nh {
        for ox in 0..nw {
            let mut acc = 0.0f32;
            let mut n = 0.0f32;
            for sy in (oy * factor)..((oy + 1) * factor).min(plane.height) {
                for sx in (ox * factor)..((ox + 1) * factor).min(plane.width) {
                    acc += plane.at(sx, sy);
                    n += 1.0;
                }
            }
            out[oy * nw + ox] = acc / n.max(1.0);
        }
    }
    GrayPlane {
        width: nw,
        height: nh,
        data: out,
    }
}

/// Normalized 256-bin histogram of a luminance plane.
pub fn histogram256(plane: &GrayPlane) -> [f32; 256] {
    let mut hist = [0.0f32; 256];
    for &v in &plane.data {
        let bin = (v.clamp(0.0, 255.0)) as usize;
        hist[bin.min(255)] += 1.0;
    }
    let total = plane.len().max(1) as f32;
    for h in hist.iter_mut() {
        *h /= total;
    }
    hist
}

/// Shannon entropy of a normalized histogram, bits.
pub fn histogram_entropy(hist: &[f32]) -> f32 {
    hist.iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.log2())
        .sum()
}

/// One BGR pixel to HSV with OpenCV ranges: H in [0, 180), S/V in [0, 255].
pub fn bgr_to_hsv(b: u8, g: u8, r: u8) -> (f32, f32, f32) {
    let (bf, gf, rf) = (b as f32 / 255.0, g as f32 / 255.0, r as f32 / 255.0);
    let max = bf.max(gf).max(rf);
    let min = bf.min(gf).min(rf);
    let delta = max - min;

    let h = if delta.abs() < f32::EPSILON {
        0.0
    } else if (max - rf).abs() < f32::EPSILON {
        60.0 * (((gf - bf) / delta) % 6.0)
    } else if (max - gf).abs() < f32::EPSILON {
        60.0 * ((bf - rf) / delta + 2.0)
    } else {
        60.0 * ((rf - gf) / delta + 4.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h } / 2.0;
    let s = if max <= 0.0 { 0.0 } else { delta / max } * 255.0;
    let v = max * 255.0;
    (h, s, v)
}

/// Mean HSV saturation of a BGR frame. Grayscale frames report 0.
pub fn mean_saturation(frame: &Frame) -> f32 {
    if !frame.is_color() {
        return 0.0;
    }
    let mut acc = 0.0f64;
    let mut n = 0usize;
    for px in frame.pixels().chunks_exact(3) {
        let (_, s, _) = bgr_to_hsv(px[0], px[1], px[2]);
        acc += s as f64;
        n += 1;
    }
    if n == 0 {
        0.0
    } else {
        (acc / n as f64) as f32
    }
}

/// Fraction of pixels whose hue falls inside [lo, hi) with saturation and
/// value both above `min_sv`. Used for blue/green screen masks.
pub fn hue_range_ratio(frame: &Frame, lo: f32, hi: f32, min_sv: f32) -> f32 {
    if !frame.is_color() {
        return 0.0;
    }
    let mut hits = 0usize;
    let mut n = 0usize;
    for px in frame.pixels().chunks_exact(3) {
        let (h, s, v) = bgr_to_hsv(px[0], px[1], px[2]);
        if h >= lo && h < hi && s >= min_sv && v >= min_sv {
            hits += 1;
        }
        n += 1;
    }
    if n == 0 {
        0.0
    } else {
        hits as f32 / n as f32
    }
}

/// Coarse 3-D HSV histogram (8 hue x 4 saturation x 4 value bins),
/// normalized to sum 1. Grayscale frames collapse into the zero-saturation
/// bins.
pub fn hsv_histogram_3d(frame: &Frame) -> Vec<f32> {
    const H_BINS: usize = 8;
    const S_BINS: usize = 4;
    const V_BINS: usize = 4;
    let mut hist = vec![0.0f32; H_BINS * S_BINS * V_BINS];
    let mut n = 0usize;
    if frame.is_color() {
        for px in frame.pixels().chunks_exact(3) {
            let (h, s, v) = bgr_to_hsv(px[0], px[1], px[2]);
            let hb = ((h / 180.0 * H_BINS as f32) as usize).min(H_BINS - 1);
            let sb = ((s / 256.0 * S_BINS as f32) as usize).min(S_BINS - 1);
            let vb = ((v / 256.0 * V_BINS as f32) as usize).min(V_BINS - 1);
            hist[(hb * S_BINS + sb) * V_BINS + vb] += 1.0;
            n += 1;
        }
    } else {
        for &p in frame.pixels() {
            let vb = ((p as usize * V_BINS) / 256).min(V_BINS - 1);
            hist[vb] += 1.0;
            n += 1;
        }
    }
    let total = n.max(1) as f32;
    for h in hist.iter_mut() {
        *h /= total;
    }
    hist
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, CHANNELS_BGR, CHANNELS_GRAY};

    fn gray_plane(w: usize, h: usize, f: impl Fn(usize, usize) -> f32) -> GrayPlane {
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
    fn flat_plane_has_zero_variance_metrics() {
        let plane = gray_plane(32, 32, |_, _| 100.0);
        assert_eq!(laplacian_variance(&plane), 0.0);
        assert_eq!(stddev(&plane), 0.0);
        assert_eq!(brenner_gradient(&plane), 0.0);
        assert_eq!(median_residual_stddev(&plane), 0.0);
    }

    #[test]
    fn checkerboard_is_sharper_than_gradient() {
        let checker = gray_plane(32, 32, |x, y| if (x + y) % 2 == 0 { 0.0 } else { 255.0 });
        let ramp = gray_plane(32, 32, |x, _| x as f32 * 8.0);
        assert!(laplacian_variance(&checker) > laplacian_variance(&ramp));
        assert!(tenengrad(&checker) > tenengrad(&ramp));
    }

    #[test]
    fn percentile_brackets_distribution() {
        let plane = gray_plane(16, 16, |x, y| (y * 16 + x) as f32);
        assert!(percentile(&plane, 5.0) < percentile(&plane, 95.0));
        assert_eq!(percentile(&plane, 100.0), 255.0);
    }

    #[test]
    fn hsv_roundtrip_known_colors() {
        // OpenCV convention: pure blue H=120, pure green H=60, pure red H=0
        let (h, s, v) = bgr_to_hsv(255, 0, 0);
        assert!((h - 120.0).abs() < 1.0 && s > 250.0 && v > 250.0);
        let (h, _, _) = bgr_to_hsv(0, 255, 0);
        assert!((h - 60.0).abs() < 1.0);
        let (h, s, _) = bgr_to_hsv(0, 0, 255);
        assert!(h < 1.0 && s > 250.0);
        let (_, s, _) = bgr_to_hsv(128, 128, 128);
        assert!(s < 1.0);
    }

    #[test]
    fn blue_frame_fills_blue_hue_band() {
        let frame = Frame::new(8, 8, CHANNELS_BGR, [200u8, 30, 30].repeat(64)).unwrap();
        let ratio = hue_range_ratio(&frame, 100.0, 130.0, 100.0);
        assert!(ratio > 0.9, "ratio = {ratio}");
    }

    #[test]
    fn entropy_zero_for_flat_image() {
        let frame = Frame::new(8, 8, CHANNELS_GRAY, vec![77u8; 64]).unwrap();
        let hist = histogram256(&frame.gray());
        assert!(histogram_entropy(&hist) < 1e-4);
    }

    #[test]
    fn noise_raises_median_residual() {
        let clean = gray_plane(32, 32, |x, _| (x as f32) * 4.0);
        let noisy = gray_plane(32, 32, |x, y| {
            let base = (x as f32) * 4.0;
            // Deterministic impulsive perturbation
            if (x * 31 + y * 17) % 7 == 0 {
                base + 60.0
            } else {
                base
            }
        });
        assert!(median_residual_stddev(&noisy) > median_residual_stddev(&clean) + 1.0);
    }
}
