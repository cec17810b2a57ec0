//! StreamService - Live Stream Worker Management
//!
//! ## Responsibilities
//!
//! - Start/stop long-running workers for RTSP/RTMP sources
//! - Hand out status snapshots and recent results
//! - Serialize stream identity (one active worker per URL)
//!
//! Transient stream I/O never reaches callers; it shows up in worker
//! status and counters.

pub mod types;
pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::media::{StreamConnector, StreamKind};
use crate::pipeline::{ImagePipeline, PipelineOptions};
use crate::profiles::ProfileStore;

use types::{StreamConfig, StreamDescriptor, StreamDetection};
use worker::StreamWorker;

/// StreamService instance
pub struct StreamService {
    connector: Arc<dyn StreamConnector>,
    image_pipeline: Arc<ImagePipeline>,
    profiles: Arc<ProfileStore>,
    workers: RwLock<HashMap<String, Arc<StreamWorker>>>,
}

impl StreamService {
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        image_pipeline: Arc<ImagePipeline>,
        profiles: Arc<ProfileStore>,
    ) -> Self {
        Self {
            connector,
            image_pipeline,
            profiles,
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Start a worker for a live source. One active worker per URL;
    /// duplicates are a conflict.
    pub async fn start_stream(
        &self,
        url: &str,
        kind: StreamKind,
        config: StreamConfig,
    ) -> Result<StreamDescriptor> {
        config.validate()?;
        let thresholds = self
            .profiles
            .resolve(&config.profile, config.custom_thresholds.as_ref())
            .await?;

        let mut workers = self.workers.write().await;
        if workers
            .values()
            .any(|w| w.url == url && !w.is_terminal())
        {
            return Err(Error::Conflict(format!("stream already started: {url}")));
        }

        let stream_id = Uuid::new_v4().to_string();
        let pipeline_options =
            PipelineOptions::new(config.level, config.profile.clone(), thresholds);
        let worker = StreamWorker::spawn(
            stream_id.clone(),
            url.to_string(),
            kind,
            config,
            pipeline_options,
            self.connector.clone(),
            self.image_pipeline.clone(),
        );
        let descriptor = worker.status();
        workers.insert(stream_id.clone(), worker);
        tracing::info!(stream_id = %stream_id, url = %url, kind = kind.as_str(), "Stream started");
        Ok(descriptor)
    }

    /// Stop a worker and forget it. Unknown ids are NotFound.
    pub async fn stop_stream(&self, stream_id: &str) -> Result<StreamDescriptor> {
        let worker = {
            let mut workers = self.workers.write().await;
            workers
                .remove(stream_id)
                .ok_or_else(|| Error::NotFound(format!("stream: {stream_id}")))?
        };
        worker.stop().await;
        tracing::info!(stream_id = %stream_id, "Stream stopped");
        Ok(worker.status())
    }

    pub async fn get_status(&self, stream_id: &str) -> Result<StreamDescriptor> {
        let workers = self.workers.read().await;
        workers
            .get(stream_id)
            .map(|w| w.status())
            .ok_or_else(|| Error::NotFound(format!("stream: {stream_id}")))
    }

    /// Recent results, oldest first, capped at `limit`.
    pub async fn get_results(
        &self,
        stream_id: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StreamDetection>> {
        let workers = self.workers.read().await;
        workers
            .get(stream_id)
            .map(|w| w.results(limit, since))
            .ok_or_else(|| Error::NotFound(format!("stream: {stream_id}")))
    }

    pub async fn list_streams(&self) -> Vec<StreamDescriptor> {
        let workers = self.workers.read().await;
        let mut list: Vec<StreamDescriptor> = workers.values().map(|w| w.status()).collect();
        list.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        list
    }

    /// Stop every worker (process shutdown).
    pub async fn stop_all(&self) {
        let workers: Vec<Arc<StreamWorker>> = {
            let mut guard = self.workers.write().await;
            guard.drain().map(|(_, w)| w).collect()
        };
        for worker in workers {
            worker.stop().await;
        }
    }
}
