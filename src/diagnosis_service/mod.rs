//! DiagnosisService - In-Process Operation Surface
//!
//! ## Responsibilities
//!
//! - Resolve profile/level/override parameters into pipeline options
//! - Diagnose single images (bytes or path), batches, and videos
//! - Expose detector listings and threshold introspection
//!
//! This is the seam an HTTP layer or CLI would call; the core itself stays
//! transport-free.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::detectors::registry::DetectorRegistry;
use crate::detectors::video::list_video_detectors;
use crate::detectors::{DetectionLevel, DetectorDescriptor};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::media::{self, VideoSource};
use crate::pipeline::{ImagePipeline, ImageVerdict, PipelineOptions};
use crate::profiles::{ProfileStore, Thresholds};
use crate::video_pipeline::sampler::{SampleStrategy, SamplerConfig};
use crate::video_pipeline::{VideoPipeline, VideoPipelineOptions, VideoVerdict};

/// Opens finite video sources by path. Wired in from outside the core;
/// the default refuses and reports that no decoder is present.
pub trait VideoSourceFactory: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>>;
}

/// Placeholder factory for deployments without a video decoder.
pub struct NoVideoDecoder;

impl VideoSourceFactory for NoVideoDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>> {
        Err(Error::UnsupportedFormat(format!(
            "no video decoder wired for {}",
            path.display()
        )))
    }
}

/// Common per-request parameters.
#[derive(Debug, Clone)]
pub struct DiagnoseParams {
    pub profile: String,
    pub level: DetectionLevel,
    pub detectors: Option<Vec<String>>,
    pub custom_thresholds: Option<HashMap<String, f32>>,
}

impl Default for DiagnoseParams {
    fn default() -> Self {
        Self {
            profile: "normal".into(),
            level: DetectionLevel::Standard,
            detectors: None,
            custom_thresholds: None,
        }
    }
}

/// Video-specific parameters on top of `DiagnoseParams`.
#[derive(Debug, Clone)]
pub struct VideoParams {
    pub base: DiagnoseParams,
    pub strategy: SampleStrategy,
    pub sample_interval: f64,
    pub max_frames: usize,
    pub include_frame_verdicts: bool,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            base: DiagnoseParams::default(),
            strategy: SampleStrategy::Interval,
            sample_interval: 1.0,
            max_frames: 300,
            include_frame_verdicts: false,
        }
    }
}

/// One input's outcome within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<ImageVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Tallies over a batch run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: u64,
    pub normal: u64,
    pub abnormal: u64,
    pub errors: u64,
}

impl BatchSummary {
    /// Process exit code for CLI callers: 0 clean, 3 nothing found,
    /// 4 everything failed, 5 partial failure.
    pub fn exit_code(&self) -> i32 {
        if self.total == 0 {
            3
        } else if self.errors == self.total {
            4
        } else if self.errors > 0 {
            5
        } else {
            0
        }
    }
}

/// Batch result: per-input verdicts plus the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
    pub summary: BatchSummary,
}

/// Execution-wide defaults owned by the service.
#[derive(Debug, Clone)]
pub struct DiagnosisConfig {
    pub parallel_detection: bool,
    pub max_workers: usize,
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            parallel_detection: true,
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
                .min(8),
        }
    }
}

/// DiagnosisService instance
pub struct DiagnosisService {
    registry: Arc<DetectorRegistry>,
    profiles: Arc<ProfileStore>,
    image_pipeline: Arc<ImagePipeline>,
    video_pipeline: Arc<VideoPipeline>,
    video_opener: Arc<dyn VideoSourceFactory>,
    config: DiagnosisConfig,
}

impl DiagnosisService {
    pub fn new(
        registry: Arc<DetectorRegistry>,
        profiles: Arc<ProfileStore>,
        image_pipeline: Arc<ImagePipeline>,
        video_pipeline: Arc<VideoPipeline>,
        video_opener: Arc<dyn VideoSourceFactory>,
        config: DiagnosisConfig,
    ) -> Self {
        Self {
            registry,
            profiles,
            image_pipeline,
            video_pipeline,
            video_opener,
            config,
        }
    }

    /// Resolve request parameters into pipeline options.
    pub async fn pipeline_options(&self, params: &DiagnoseParams) -> Result<PipelineOptions> {
        let thresholds = self
            .profiles
            .resolve(&params.profile, params.custom_thresholds.as_ref())
            .await?;
        let mut options = PipelineOptions::new(params.level, params.profile.clone(), thresholds)
            .with_detectors(params.detectors.clone());
        options.parallel = self.config.parallel_detection;
        options.max_workers = self.config.max_workers;
        Ok(options)
    }

    /// Diagnose an already-decoded frame.
    pub async fn diagnose_frame(
        &self,
        frame: &Frame,
        params: &DiagnoseParams,
    ) -> Result<ImageVerdict> {
        let options = self.pipeline_options(params).await?;
        self.image_pipeline.diagnose(frame, &options).await
    }

    /// Diagnose an encoded image payload.
    pub async fn diagnose_image_bytes(
        &self,
        bytes: &[u8],
        params: &DiagnoseParams,
    ) -> Result<ImageVerdict> {
        let frame = media::decode_image_bytes(bytes)?;
        self.diagnose_frame(&frame, params).await
    }

    /// Diagnose an image fetched over HTTP(S).
    pub async fn diagnose_image_url(
        &self,
        url: &str,
        params: &DiagnoseParams,
    ) -> Result<ImageVerdict> {
        let response = reqwest::get(url)
            .await
            .map_err(|e| Error::SourceUnavailable(format!("fetch {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::SourceUnavailable(format!(
                "fetch {url}: HTTP {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::SourceUnavailable(format!("fetch {url}: {e}")))?;
        let mut verdict = self.diagnose_image_bytes(&bytes, params).await?;
        verdict.image_path = url.to_string();
        Ok(verdict)
    }

    /// Diagnose an image file.
    pub async fn diagnose_image_path(
        &self,
        path: &Path,
        params: &DiagnoseParams,
    ) -> Result<ImageVerdict> {
        let frame = media::decode_image_path(path)?;
        let mut verdict = self.diagnose_frame(&frame, params).await?;
        verdict.image_path = path.display().to_string();
        verdict.image_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(verdict)
    }

    /// Diagnose a list of image files; per-item failures are tallied, not
    /// surfaced.
    pub async fn diagnose_batch(
        &self,
        inputs: &[PathBuf],
        params: &DiagnoseParams,
    ) -> Result<BatchReport> {
        // Parameter errors (unknown profile/detector) surface before any
        // per-item work.
        self.pipeline_options(params).await?;

        let mut items = Vec::with_capacity(inputs.len());
        let mut summary = BatchSummary {
            total: inputs.len() as u64,
            ..Default::default()
        };
        for path in inputs {
            match self.diagnose_image_path(path, params).await {
                Ok(verdict) => {
                    if verdict.is_abnormal {
                        summary.abnormal += 1;
                    } else {
                        summary.normal += 1;
                    }
                    items.push(BatchItem {
                        path: path.clone(),
                        verdict: Some(verdict),
                        error: None,
                    });
                }
                Err(e) => {
                    summary.errors += 1;
                    tracing::warn!(path = %path.display(), error = %e, "Batch item failed");
                    items.push(BatchItem {
                        path: path.clone(),
                        verdict: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(BatchReport { items, summary })
    }

    /// Diagnose a video through the wired source factory.
    pub async fn diagnose_video_path(
        &self,
        path: &Path,
        params: &VideoParams,
    ) -> Result<VideoVerdict> {
        let source = self.video_opener.open(path)?;
        let mut verdict = self.diagnose_video_source(source, params).await?;
        verdict.video_path = path.display().to_string();
        verdict.video_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(verdict)
    }

    /// Diagnose an already-open video source.
    pub async fn diagnose_video_source(
        &self,
        source: Box<dyn VideoSource>,
        params: &VideoParams,
    ) -> Result<VideoVerdict> {
        let pipeline_options = self.pipeline_options(&params.base).await?;
        let sampler = SamplerConfig {
            strategy: params.strategy,
            interval: params.sample_interval,
            max_frames: params.max_frames,
            ..Default::default()
        };
        let mut options = VideoPipelineOptions::new(pipeline_options, sampler);
        options.include_frame_verdicts = params.include_frame_verdicts;
        self.video_pipeline.diagnose(source, &options).await
    }

    /// Image detector descriptors, priority order.
    pub fn list_detectors(&self) -> Vec<&'static DetectorDescriptor> {
        self.registry.list()
    }

    /// Video detector (name, issue type) pairs.
    pub fn list_video_detectors(&self) -> Vec<(&'static str, &'static str)> {
        list_video_detectors()
    }

    /// Effective thresholds for a profile plus overrides.
    pub async fn resolve_thresholds(
        &self,
        profile: &str,
        custom: Option<&HashMap<String, f32>>,
    ) -> Result<Thresholds> {
        self.profiles.resolve(profile, custom).await
    }

    pub fn registry(&self) -> &Arc<DetectorRegistry> {
        &self.registry
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }
}
