//! Frame sampler
//!
//! Chooses which decoded frames reach the detectors. Deterministic for a
//! given source and configuration:
//!
//! - `Interval`: every ceil(fps x interval) frames
//! - `Scene`: forced samples at detected cuts plus a sparse interval
//!   baseline (4x the interval) so static footage still gets coverage
//! - `Hybrid`: union of the two, deduplicated
//!
//! Always capped at `max_frames`; a source shorter than one interval still
//! yields at least its first and last frames.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::imgproc::{self, compare};
use crate::media::VideoSource;

/// Decimated preview size for cut detection.
const PREVIEW_MAX_SIDE: u32 = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleStrategy {
    #[default]
    Interval,
    Scene,
    Hybrid,
}

impl SampleStrategy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "interval" => Some(Self::Interval),
            "scene" => Some(Self::Scene),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interval => "interval",
            Self::Scene => "scene",
            Self::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub strategy: SampleStrategy,
    /// Seconds between baseline samples, >= 0.1.
    pub interval: f64,
    /// Histogram distance marking a cut.
    pub scene_threshold: f32,
    pub max_frames: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            strategy: SampleStrategy::Interval,
            interval: 1.0,
            scene_threshold: 0.3,
            max_frames: 300,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval < 0.1 {
            return Err(Error::Config(format!(
                "sample_interval must be >= 0.1 s, got {}",
                self.interval
            )));
        }
        if self.max_frames == 0 {
            return Err(Error::Config("max_frames must be positive".into()));
        }
        Ok(())
    }
}

/// Outcome of a sampling run.
pub struct SampleRun {
    pub frames: Vec<Frame>,
    /// Total frames decoded (sampled or not).
    pub decoded: u64,
    /// Decoder error hit mid-stream, after at least one decoded frame.
    pub decode_error: Option<Error>,
    /// The soft deadline cut sampling short.
    pub deadline_hit: bool,
}

/// FrameSampler instance
pub struct FrameSampler {
    config: SamplerConfig,
}

impl FrameSampler {
    pub fn new(config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Walk the source and emit each selected frame through `sink`.
    /// Blocking (decoder I/O); run on a blocking worker.
    pub fn sample_into(
        &self,
        source: &mut dyn VideoSource,
        deadline: Option<Instant>,
        mut sink: impl FnMut(Frame) -> Result<()>,
    ) -> Result<SampleRun> {
        let meta = source.metadata();
        let fps = if meta.fps > 0.0 { meta.fps } else { 25.0 };
        let step = (fps * self.config.interval).ceil().max(1.0) as u64;
        let baseline_step = match self.config.strategy {
            SampleStrategy::Scene => step * 4,
            _ => step,
        };
        let use_scene = matches!(
            self.config.strategy,
            SampleStrategy::Scene | SampleStrategy::Hybrid
        );

        let mut run = SampleRun {
            frames: Vec::new(),
            decoded: 0,
            decode_error: None,
            deadline_hit: false,
        };
        let mut prev_hist: Option<[f32; 256]> = None;
        let mut last_frame: Option<Frame> = None;

        loop {
            if run.frames.len() >= self.config.max_frames {
                break;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    run.deadline_hit = true;
                    break;
                }
            }

            let frame = match source.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    if run.decoded == 0 {
                        return Err(e);
                    }
                    run.decode_error = Some(e);
                    break;
                }
            };

            let index = frame.index.unwrap_or(run.decoded);
            let timestamp = frame.timestamp.unwrap_or(index as f64 / fps);
            let frame = frame.with_index(index).with_timestamp(timestamp);
            run.decoded += 1;

            let mut take = index % baseline_step == 0;
            if use_scene {
                let hist = imgproc::histogram256(&frame.downsample_to(PREVIEW_MAX_SIDE).gray());
                if let Some(prev) = &prev_hist {
                    if compare::bhattacharyya_distance(prev, &hist) > self.config.scene_threshold {
                        take = true;
                    }
                } else {
                    take = true;
                }
                prev_hist = Some(hist);
            }

            last_frame = Some(frame.clone());
            if take {
                run.frames.push(frame.clone());
                sink(frame)?;
            }
        }

        // Short sources still produce first + last
        if run.frames.len() < 2 {
            if let Some(last) = last_frame {
                let already = run
                    .frames
                    .last()
                    .and_then(|f| f.index)
                    .zip(last.index)
                    .map(|(a, b)| a == b)
                    .unwrap_or(false);
                if !already && run.frames.len() < self.config.max_frames {
                    run.frames.push(last.clone());
                    sink(last)?;
                }
            }
        }

        Ok(run)
    }

    /// Collect sampled frames without a streaming consumer.
    pub fn sample(&self, source: &mut dyn VideoSource) -> Result<SampleRun> {
        self.sample_into(source, None, |_| Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, CHANNELS_GRAY};
    use crate::media::SyntheticVideoSource;

    fn flat_clip(n: u64, fps: f64, value: u8) -> SyntheticVideoSource {
        let frames: Vec<Frame> = (0..n)
            .map(|i| {
                Frame::new(32, 32, CHANNELS_GRAY, vec![value; 1024])
                    .unwrap()
                    .with_index(i)
                    .with_timestamp(i as f64 / fps)
            })
            .collect();
        SyntheticVideoSource::new(frames, fps)
    }

    fn sampler(strategy: SampleStrategy, interval: f64, max_frames: usize) -> FrameSampler {
        FrameSampler::new(SamplerConfig {
            strategy,
            interval,
            scene_threshold: 0.3,
            max_frames,
        })
        .unwrap()
    }

    #[test]
    fn interval_sampling_is_periodic_and_bounded() {
        let mut source = flat_clip(100, 10.0, 128);
        let run = sampler(SampleStrategy::Interval, 1.0, 300)
            .sample(&mut source)
            .unwrap();
        // step = 10 -> indices 0,10,...,90
        let indices: Vec<u64> = run.frames.iter().map(|f| f.index.unwrap()).collect();
        assert_eq!(indices, (0..10).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[test]
    fn max_frames_caps_every_strategy() {
        for strategy in [
            SampleStrategy::Interval,
            SampleStrategy::Scene,
            SampleStrategy::Hybrid,
        ] {
            let mut source = flat_clip(500, 25.0, 100);
            let run = sampler(strategy, 0.1, 7).sample(&mut source).unwrap();
            assert!(run.frames.len() <= 7, "{strategy:?}");
        }
    }

    #[test]
    fn short_source_samples_first_and_last() {
        // 5 frames at 25 fps with a 1 s interval: only index 0 matches the
        // step, the last frame is forced in
        let mut source = flat_clip(5, 25.0, 128);
        let run = sampler(SampleStrategy::Interval, 1.0, 300)
            .sample(&mut source)
            .unwrap();
        let indices: Vec<u64> = run.frames.iter().map(|f| f.index.unwrap()).collect();
        assert_eq!(indices, vec![0, 4]);
    }

    #[test]
    fn hybrid_adds_cut_samples_to_the_baseline() {
        let fps = 10.0;
        let mut frames = Vec::new();
        for i in 0..40u64 {
            let value = if i >= 25 { 220 } else { 30 }; // hard cut at 25
            frames.push(
                Frame::new(32, 32, CHANNELS_GRAY, vec![value; 1024])
                    .unwrap()
                    .with_index(i)
                    .with_timestamp(i as f64 / fps),
            );
        }
        let mut source = SyntheticVideoSource::new(frames, fps);
        let run = sampler(SampleStrategy::Hybrid, 1.0, 300)
            .sample(&mut source)
            .unwrap();
        let indices: Vec<u64> = run.frames.iter().map(|f| f.index.unwrap()).collect();
        assert!(indices.contains(&25), "cut frame missing: {indices:?}");
        assert!(indices.contains(&0) && indices.contains(&10));
    }

    #[test]
    fn determinism_same_inputs_same_samples() {
        let collect = || {
            let mut source = flat_clip(100, 10.0, 90);
            sampler(SampleStrategy::Hybrid, 0.5, 50)
                .sample(&mut source)
                .unwrap()
                .frames
                .iter()
                .map(|f| f.index.unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(collect(), collect());
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(FrameSampler::new(SamplerConfig {
            interval: 0.01,
            ..Default::default()
        })
        .is_err());
        assert!(FrameSampler::new(SamplerConfig {
            max_frames: 0,
            ..Default::default()
        })
        .is_err());
    }
}
