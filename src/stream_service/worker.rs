//! Stream worker
//!
//! One long-lived worker per live source. A single blocking reader owns
//! the connection: connect, read, sample into the frame ring, reconnect
//! with jittered exponential backoff on loss. A separate detection task
//! snapshots the ring every `detection_interval` and appends the verdict
//! to the results ring. All shared state sits behind one per-stream mutex;
//! readers take snapshots.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Notify;

use crate::detectors::video::builtin_video_detectors;
use crate::frame::Frame;
use crate::media::{StreamConnector, StreamKind};
use crate::pipeline::{ImagePipeline, PipelineOptions};

use super::types::{
    StreamConfig, StreamCounters, StreamDescriptor, StreamDetection, StreamStatus,
};

/// EMA weight for the fps estimate.
const FPS_EMA_ALPHA: f64 = 0.2;
/// Poll granularity for stop-aware sleeps in the blocking reader.
const READER_SLEEP_STEP: Duration = Duration::from_millis(100);

struct WorkerState {
    status: StreamStatus,
    counters: StreamCounters,
    fps: f64,
    last_detection_time: Option<DateTime<Utc>>,
    frame_ring: VecDeque<Frame>,
    results: VecDeque<StreamDetection>,
}

/// StreamWorker instance
pub struct StreamWorker {
    pub stream_id: String,
    pub url: String,
    pub kind: StreamKind,
    config: StreamConfig,
    state: Arc<Mutex<WorkerState>>,
    stop_flag: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    started_at: DateTime<Utc>,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
    detector: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StreamWorker {
    /// Spawn the reader and detection loops for one source.
    pub fn spawn(
        stream_id: String,
        url: String,
        kind: StreamKind,
        config: StreamConfig,
        pipeline_options: PipelineOptions,
        connector: Arc<dyn StreamConnector>,
        image_pipeline: Arc<ImagePipeline>,
    ) -> Arc<Self> {
        let state = Arc::new(Mutex::new(WorkerState {
            status: StreamStatus::Starting,
            counters: StreamCounters::default(),
            fps: 0.0,
            last_detection_time: None,
            frame_ring: VecDeque::with_capacity(config.frame_ring_size),
            results: VecDeque::with_capacity(config.results_ring_size),
        }));

        let worker = Arc::new(Self {
            stream_id,
            url,
            kind,
            config: config.clone(),
            state: state.clone(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
            started_at: Utc::now(),
            reader: Mutex::new(None),
            detector: Mutex::new(None),
        });

        let reader_handle = {
            let worker = worker.clone();
            let connector = connector.clone();
            tokio::task::spawn_blocking(move || worker.reader_loop(connector.as_ref()))
        };
        let detector_handle = {
            let worker = worker.clone();
            tokio::spawn(async move {
                worker.detection_loop(image_pipeline, pipeline_options).await;
            })
        };
        *worker.reader.lock().unwrap() = Some(reader_handle);
        *worker.detector.lock().unwrap() = Some(detector_handle);
        worker
    }

    // ========================================
    // Reader side (blocking)
    // ========================================

    fn reader_loop(&self, connector: &dyn StreamConnector) {
        let origin = Instant::now();
        let mut consecutive_errors: u32 = 0;
        let mut ever_connected = false;

        'outer: while !self.stop_flag.load(Ordering::Relaxed) {
            let mut source = match connector.connect(&self.url, self.kind) {
                Ok(source) => source,
                Err(e) => {
                    consecutive_errors += 1;
                    {
                        let mut state = self.state.lock().unwrap();
                        state.counters.connection_errors += 1;
                        if consecutive_errors >= self.config.max_consecutive_errors {
                            state.status = StreamStatus::Error;
                        } else if ever_connected {
                            state.status = StreamStatus::Degraded;
                        }
                    }
                    tracing::warn!(
                        stream_id = %self.stream_id,
                        url = %self.url,
                        error = %e,
                        consecutive = consecutive_errors,
                        "Stream connect failed"
                    );
                    if consecutive_errors >= self.config.max_consecutive_errors {
                        tracing::error!(
                            stream_id = %self.stream_id,
                            "Retry budget exhausted, stream is terminal"
                        );
                        return;
                    }
                    self.backoff_sleep(consecutive_errors);
                    continue;
                }
            };

            consecutive_errors = 0;
            {
                let mut state = self.state.lock().unwrap();
                if ever_connected {
                    state.counters.reconnect_count += 1;
                }
                state.status = StreamStatus::Running;
            }
            if ever_connected {
                tracing::info!(stream_id = %self.stream_id, "Stream reconnected");
            } else {
                tracing::info!(stream_id = %self.stream_id, url = %self.url, "Stream connected");
            }
            ever_connected = true;

            let mut last_sample: Option<Instant> = None;
            let mut last_frame_at: Option<Instant> = None;
            loop {
                if self.stop_flag.load(Ordering::Relaxed) {
                    break 'outer;
                }
                let frame = match source.read_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        let mut state = self.state.lock().unwrap();
                        state.counters.connection_errors += 1;
                        state.status = StreamStatus::Degraded;
                        drop(state);
                        tracing::warn!(
                            stream_id = %self.stream_id,
                            error = %e,
                            "Stream read failed, reconnecting"
                        );
                        self.backoff_sleep(1);
                        continue 'outer;
                    }
                };

                let now = Instant::now();
                let mut state = self.state.lock().unwrap();
                state.counters.frames_received += 1;
                if let Some(prev) = last_frame_at {
                    let dt = now.duration_since(prev).as_secs_f64();
                    if dt > 0.0 {
                        let inst = 1.0 / dt;
                        state.fps = if state.fps == 0.0 {
                            inst
                        } else {
                            state.fps * (1.0 - FPS_EMA_ALPHA) + inst * FPS_EMA_ALPHA
                        };
                    }
                }
                last_frame_at = Some(now);

                let due = last_sample
                    .map(|t| now.duration_since(t).as_secs_f64() >= self.config.sample_interval)
                    .unwrap_or(true);
                if due {
                    let frame = frame
                        .with_timestamp(origin.elapsed().as_secs_f64())
                        .with_index(state.counters.frames_received - 1);
                    if state.frame_ring.len() >= self.config.frame_ring_size {
                        state.frame_ring.pop_front();
                    }
                    state.frame_ring.push_back(frame);
                    last_sample = Some(now);
                }
            }
        }

        let mut state = self.state.lock().unwrap();
        if state.status != StreamStatus::Error {
            state.status = StreamStatus::Stopped;
        }
        state.frame_ring.clear();
        tracing::info!(stream_id = %self.stream_id, "Stream reader stopped");
    }

    /// Exponential backoff with +/-25% jitter, stop-aware.
    fn backoff_sleep(&self, attempt: u32) {
        let base = self.config.reconnect_backoff_base.max(0.1);
        let cap = self.config.reconnect_backoff_cap.max(base);
        let exp = base * 2f64.powi(attempt.saturating_sub(1).min(16) as i32);
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        let delay = (exp.min(cap) * jitter).min(cap * 1.25);

        let deadline = Instant::now() + Duration::from_secs_f64(delay);
        while Instant::now() < deadline {
            if self.stop_flag.load(Ordering::Relaxed) {
                return;
            }
            std::thread::sleep(READER_SLEEP_STEP.min(deadline - Instant::now()));
        }
    }

    // ========================================
    // Detection side (async)
    // ========================================

    async fn detection_loop(
        self: Arc<Self>,
        image_pipeline: Arc<ImagePipeline>,
        pipeline_options: PipelineOptions,
    ) {
        let interval = Duration::from_secs_f64(self.config.detection_interval);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.stop_notify.notified() => break,
            }
            if self.stop_flag.load(Ordering::Relaxed) {
                break;
            }
            {
                let state = self.state.lock().unwrap();
                if state.status.is_terminal() {
                    break;
                }
            }

            // Snapshot the most recent K frames under the lock, detect
            // outside it.
            let (snapshot, fps) = {
                let state = self.state.lock().unwrap();
                let k = self.config.detection_window.max(1);
                let skip = state.frame_ring.len().saturating_sub(k);
                (
                    state.frame_ring.iter().skip(skip).cloned().collect::<Vec<Frame>>(),
                    state.fps,
                )
            };
            if snapshot.is_empty() {
                continue;
            }

            let latest = snapshot.last().expect("non-empty snapshot").clone();
            let image_verdict = match image_pipeline.diagnose(&latest, &pipeline_options).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    tracing::error!(
                        stream_id = %self.stream_id,
                        error = %e,
                        "Detection round failed"
                    );
                    continue;
                }
            };

            let video_findings = if snapshot.len() > 1 {
                let frames = snapshot.clone();
                let fps = if fps > 0.0 { fps } else { 25.0 };
                tokio::task::spawn_blocking(move || {
                    builtin_video_detectors()
                        .iter()
                        .filter_map(|d| match d.detect(&frames, fps) {
                            Ok(finding) => Some(finding),
                            Err(e) => {
                                tracing::warn!(detector = d.name(), error = %e, "Video detector failed");
                                None
                            }
                        })
                        .collect::<Vec<_>>()
                })
                .await
                .unwrap_or_default()
            } else {
                Vec::new()
            };

            let video_abnormal = video_findings.iter().any(|f| f.is_abnormal);
            let severity = video_findings
                .iter()
                .filter(|f| f.is_abnormal)
                .map(|f| f.severity)
                .fold(image_verdict.severity, |acc, s| acc.max(s));
            let detection = StreamDetection {
                stream_id: self.stream_id.clone(),
                timestamp: Utc::now(),
                is_abnormal: image_verdict.is_abnormal || video_abnormal,
                primary_issue: image_verdict.primary_issue.clone().or_else(|| {
                    video_findings
                        .iter()
                        .find(|f| f.is_abnormal)
                        .map(|f| f.issue_type.clone())
                }),
                severity,
                image: image_verdict,
                video_findings,
                fps,
            };

            let mut state = self.state.lock().unwrap();
            state.counters.frames_detected += snapshot.len() as u64;
            state.last_detection_time = Some(detection.timestamp);
            if state.results.len() >= self.config.results_ring_size {
                state.results.pop_front();
            }
            state.results.push_back(detection);
        }
        tracing::debug!(stream_id = %self.stream_id, "Detection loop stopped");
    }

    // ========================================
    // Public surface (safe for concurrent callers)
    // ========================================

    /// Status snapshot.
    pub fn status(&self) -> StreamDescriptor {
        let state = self.state.lock().unwrap();
        StreamDescriptor {
            stream_id: self.stream_id.clone(),
            url: self.url.clone(),
            kind: self.kind,
            sample_interval: self.config.sample_interval,
            detection_interval: self.config.detection_interval,
            status: state.status,
            counters: state.counters,
            fps: state.fps,
            last_detection_time: state.last_detection_time,
            started_at: self.started_at,
        }
    }

    /// Most recent results, newest last. Ordered by detection completion
    /// time, not frame timestamp.
    pub fn results(&self, limit: usize, since: Option<DateTime<Utc>>) -> Vec<StreamDetection> {
        let state = self.state.lock().unwrap();
        let filtered: Vec<StreamDetection> = state
            .results
            .iter()
            .filter(|r| since.map(|s| r.timestamp >= s).unwrap_or(true))
            .cloned()
            .collect();
        let skip = filtered.len().saturating_sub(limit);
        filtered.into_iter().skip(skip).collect()
    }

    /// Request stop and drain for up to `grace_seconds`.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.status.is_terminal() {
                return;
            }
            state.status = StreamStatus::Stopping;
        }
        self.stop_flag.store(true, Ordering::Relaxed);
        self.stop_notify.notify_waiters();

        let reader = self.reader.lock().unwrap().take();
        if let Some(handle) = reader {
            let grace = Duration::from_secs_f64(self.config.grace_seconds.max(0.1));
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!(
                    stream_id = %self.stream_id,
                    "Reader did not drain within grace period"
                );
            }
        }
        let detector = self.detector.lock().unwrap().take();
        if let Some(handle) = detector {
            handle.abort();
        }
        let mut state = self.state.lock().unwrap();
        if state.status != StreamStatus::Error {
            state.status = StreamStatus::Stopped;
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.lock().unwrap().status.is_terminal()
    }
}
