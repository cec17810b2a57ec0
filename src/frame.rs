//! Frame - Immutable Decoded Raster
//!
//! ## Responsibilities
//!
//! - Hold one decoded frame (grayscale or BGR) behind a cheap `Arc` handle
//! - Hand detectors read-only pixel access
//! - Provide the luminance plane and the fast-level working copy
//!
//! Decoding itself lives behind the provider traits in `media`; nothing in
//! the core mutates pixel data after construction.

use std::sync::Arc;

use crate::error::{Error, Result};

/// Channel layouts the core understands.
pub const CHANNELS_GRAY: u8 = 1;
pub const CHANNELS_BGR: u8 = 3;

/// One decoded frame. Pixels are row-major, interleaved for BGR.
#[derive(Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    channels: u8,
    data: Arc<[u8]>,
    /// Presentation time within the source, seconds.
    pub timestamp: Option<f64>,
    /// Source frame index, when known.
    pub index: Option<u64>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("timestamp", &self.timestamp)
            .field("index", &self.index)
            .finish()
    }
}

impl Frame {
    /// Wrap a decoded pixel buffer. Fails when the buffer does not match
    /// the declared geometry.
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::Input("frame has zero dimension".into()));
        }
        if channels != CHANNELS_GRAY && channels != CHANNELS_BGR {
            return Err(Error::Input(format!(
                "unsupported channel count: {channels}"
            )));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(Error::Input(format!(
                "pixel buffer length {} does not match {}x{}x{}",
                data.len(),
                width,
                height,
                channels
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data: data.into(),
            timestamp: None,
            index: None,
        })
    }

    /// Attach a presentation timestamp (seconds within the source).
    pub fn with_timestamp(mut self, ts: f64) -> Self {
        self.timestamp = Some(ts);
        self
    }

    /// Attach the source frame index.
    pub fn with_index(mut self, index: u64) -> Self {
        self.index = Some(index);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn is_color(&self) -> bool {
        self.channels == CHANNELS_BGR
    }

    /// Raw pixel bytes (read-only).
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Byte size of the pixel buffer, used for buffer memory accounting.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Luminance plane as f32. BGR uses the BT.601 weights; grayscale is a
    /// straight widening copy.
    pub fn gray(&self) -> GrayPlane {
        let w = self.width as usize;
        let h = self.height as usize;
        let mut out = Vec::with_capacity(w * h);
        match self.channels {
            CHANNELS_GRAY => out.extend(self.data.iter().map(|&p| p as f32)),
            _ => {
                for px in self.data.chunks_exact(3) {
                    let (b, g, r) = (px[0] as f32, px[1] as f32, px[2] as f32);
                    out.push(0.114 * b + 0.587 * g + 0.299 * r);
                }
            }
        }
        GrayPlane {
            width: w,
            height: h,
            data: out,
        }
    }

    /// Per-channel accessor for BGR frames: channel 0 = B, 1 = G, 2 = R.
    pub fn channel_iter(&self, channel: usize) -> impl Iterator<Item = u8> + '_ {
        let step = self.channels as usize;
        self.data.iter().skip(channel).step_by(step).copied()
    }

    /// Box-filtered downsample so the longest side is at most `max_side`.
    /// Returns a clone of self when already small enough.
    pub fn downsample_to(&self, max_side: u32) -> Frame {
        let longest = self.width.max(self.height);
        if longest <= max_side || max_side == 0 {
            return self.clone();
        }
        let factor = longest.div_ceil(max_side) as usize;
        let nw = (self.width as usize / factor).max(1);
        let nh = (self.height as usize / factor).max(1);
        let ch = self.channels as usize;
        let mut out = vec![0u8; nw * nh * ch];
        let w = self.width as usize;
        for oy in 0..nh {
            for ox in 0..nw {
                for c in 0..ch {
                    let mut acc: u32 = 0;
                    let mut n: u32 = 0;
                    for sy in (oy * factor)..((oy + 1) * factor).min(self.height as usize) {
                        for sx in (ox * factor)..((ox + 1) * factor).min(w) {
                            acc += self.data[(sy * w + sx) * ch + c] as u32;
                            n += 1;
                        }
                    }
                    out[(oy * nw + ox) * ch + c] = (acc / n.max(1)) as u8;
                }
            }
        }
        Frame {
            width: nw as u32,
            height: nh as u32,
            channels: self.channels,
            data: out.into(),
            timestamp: self.timestamp,
            index: self.index,
        }
    }
}

/// Borrow-free luminance plane used by the metric kernels.
#[derive(Clone, Debug)]
pub struct GrayPlane {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl GrayPlane {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::new(4, 4, CHANNELS_GRAY, vec![0u8; 15]).is_err());
        assert!(Frame::new(4, 4, CHANNELS_GRAY, vec![0u8; 16]).is_ok());
        assert!(Frame::new(0, 4, CHANNELS_GRAY, vec![]).is_err());
        assert!(Frame::new(2, 2, 4, vec![0u8; 16]).is_err());
    }

    #[test]
    fn gray_plane_from_bgr_uses_luma_weights() {
        // Pure red pixel: luminance = 0.299 * 255
        let frame = Frame::new(1, 1, CHANNELS_BGR, vec![0, 0, 255]).unwrap();
        let gray = frame.gray();
        assert!((gray.data[0] - 0.299 * 255.0).abs() < 0.5);
    }

    #[test]
    fn downsample_caps_longest_side() {
        let frame = Frame::new(64, 32, CHANNELS_GRAY, vec![128u8; 64 * 32]).unwrap();
        let small = frame.downsample_to(16);
        assert!(small.width() <= 16 && small.height() <= 16);
        assert_eq!(small.pixels()[0], 128);
    }

    #[test]
    fn channel_iter_walks_interleaved_pixels() {
        let frame = Frame::new(2, 1, CHANNELS_BGR, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let blues: Vec<u8> = frame.channel_iter(0).collect();
        let reds: Vec<u8> = frame.channel_iter(2).collect();
        assert_eq!(blues, vec![1, 4]);
        assert_eq!(reds, vec![3, 6]);
    }
}
