//! Application state
//!
//! Holds all shared components and state. Construction order is explicit:
//! registry -> profiles -> pipelines -> scheduler -> stream service.

use std::path::PathBuf;
use std::sync::Arc;

use crate::detectors::registry::DetectorRegistry;
use crate::diagnosis_service::{DiagnosisConfig, DiagnosisService, VideoSourceFactory};
use crate::error::Result;
use crate::media::StreamConnector;
use crate::pipeline::ImagePipeline;
use crate::profiles::ProfileStore;
use crate::scheduler::store::TaskStore;
use crate::scheduler::{Clock, SchedulerService, SystemClock};
use crate::stream_service::StreamService;
use crate::video_pipeline::VideoPipeline;

/// Process configuration, environment-driven with defaults.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root for tasks/, executions/ and profiles.yaml.
    pub storage_root: PathBuf,
    pub parallel_detection: bool,
    pub max_workers: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let storage_root = std::env::var("VQDIAG_STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let defaults = DiagnosisConfig::default();
        let parallel_detection = std::env::var("VQDIAG_PARALLEL_DETECTION")
            .map(|v| v != "0" && v != "false")
            .unwrap_or(defaults.parallel_detection);
        let max_workers = std::env::var("VQDIAG_MAX_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(defaults.max_workers);
        Self {
            storage_root,
            parallel_detection,
            max_workers,
        }
    }
}

/// Shared component graph.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<DetectorRegistry>,
    pub profiles: Arc<ProfileStore>,
    pub image_pipeline: Arc<ImagePipeline>,
    pub video_pipeline: Arc<VideoPipeline>,
    pub diagnosis: Arc<DiagnosisService>,
    pub scheduler: Arc<SchedulerService>,
    pub streams: Arc<StreamService>,
}

impl AppState {
    /// Build every component in dependency order. The stream connector and
    /// video opener come from outside: they own the codecs.
    pub async fn build(
        config: AppConfig,
        connector: Arc<dyn StreamConnector>,
        video_opener: Arc<dyn VideoSourceFactory>,
    ) -> Result<Self> {
        Self::build_with_clock(config, connector, video_opener, Arc::new(SystemClock)).await
    }

    pub async fn build_with_clock(
        config: AppConfig,
        connector: Arc<dyn StreamConnector>,
        video_opener: Arc<dyn VideoSourceFactory>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let registry = Arc::new(DetectorRegistry::with_builtin());
        tracing::info!(detectors = registry.len(), "Detector registry initialized");

        let profiles_path = config.storage_root.join("profiles.yaml");
        let profiles = Arc::new(ProfileStore::load(&profiles_path).await?);
        tracing::info!(path = %profiles_path.display(), "Profile store initialized");

        let image_pipeline = Arc::new(ImagePipeline::new(registry.clone()));
        let video_pipeline = Arc::new(VideoPipeline::new(image_pipeline.clone()));

        let diagnosis = Arc::new(DiagnosisService::new(
            registry.clone(),
            profiles.clone(),
            image_pipeline.clone(),
            video_pipeline.clone(),
            video_opener,
            DiagnosisConfig {
                parallel_detection: config.parallel_detection,
                max_workers: config.max_workers,
            },
        ));

        let task_store = Arc::new(TaskStore::new(config.storage_root.join("scheduler")));
        let scheduler = Arc::new(SchedulerService::new(task_store, diagnosis.clone(), clock));

        let streams = Arc::new(StreamService::new(
            connector,
            image_pipeline.clone(),
            profiles.clone(),
        ));

        Ok(Self {
            config,
            registry,
            profiles,
            image_pipeline,
            video_pipeline,
            diagnosis,
            scheduler,
            streams,
        })
    }
}
