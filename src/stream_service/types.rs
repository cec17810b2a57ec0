//! Stream service data types

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detectors::video::VideoFinding;
use crate::detectors::{DetectionLevel, Severity};
use crate::error::{Error, Result};
use crate::media::StreamKind;
use crate::pipeline::ImageVerdict;

/// Lifecycle state of one stream worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    /// Created, first connect not finished yet.
    Starting,
    Running,
    /// Connection lost, reconnecting with backoff.
    Degraded,
    Stopping,
    Stopped,
    /// Terminal: consecutive connect failures exhausted the retry budget.
    Error,
}

impl StreamStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamStatus::Stopped | StreamStatus::Error)
    }
}

/// Per-worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Seconds between frames fed to the sampling ring.
    pub sample_interval: f64,
    /// Seconds between detection rounds.
    pub detection_interval: f64,
    /// Sampling ring capacity (W).
    pub frame_ring_size: usize,
    /// Results ring capacity (R).
    pub results_ring_size: usize,
    /// Frames snapshotted per detection round (K); K > 1 engages the
    /// video detectors.
    pub detection_window: usize,
    pub profile: String,
    pub level: DetectionLevel,
    pub custom_thresholds: Option<HashMap<String, f32>>,
    pub max_consecutive_errors: u32,
    /// Exponential backoff base and cap, seconds.
    pub reconnect_backoff_base: f64,
    pub reconnect_backoff_cap: f64,
    /// Stop drains for up to this long before giving up on the reader.
    pub grace_seconds: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_interval: 1.0,
            detection_interval: 5.0,
            frame_ring_size: 32,
            results_ring_size: 256,
            detection_window: 8,
            profile: "normal".into(),
            level: DetectionLevel::Standard,
            custom_thresholds: None,
            max_consecutive_errors: 10,
            reconnect_backoff_base: 1.0,
            reconnect_backoff_cap: 30.0,
            grace_seconds: 5.0,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_interval < 0.1 {
            return Err(Error::Config(format!(
                "sample_interval must be >= 0.1 s, got {}",
                self.sample_interval
            )));
        }
        if self.detection_interval < 1.0 {
            return Err(Error::Config(format!(
                "detection_interval must be >= 1 s, got {}",
                self.detection_interval
            )));
        }
        if self.detection_window == 0 || self.frame_ring_size == 0 || self.results_ring_size == 0 {
            return Err(Error::Config("ring sizes must be positive".into()));
        }
        Ok(())
    }
}

/// Monotonic counters exposed in status snapshots.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StreamCounters {
    pub frames_received: u64,
    pub frames_detected: u64,
    pub connection_errors: u64,
    pub reconnect_count: u64,
}

/// Status snapshot of one stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub stream_id: String,
    pub url: String,
    pub kind: StreamKind,
    pub sample_interval: f64,
    pub detection_interval: f64,
    pub status: StreamStatus,
    pub counters: StreamCounters,
    /// Exponential moving average of decoded frames per second.
    pub fps: f64,
    pub last_detection_time: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
}

/// One detection round result kept in the results ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDetection {
    pub stream_id: String,
    /// Detection completion time; the ring is ordered by it.
    pub timestamp: DateTime<Utc>,
    pub is_abnormal: bool,
    pub primary_issue: Option<String>,
    pub severity: Severity,
    pub image: ImageVerdict,
    /// Present when the detection window held more than one frame.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video_findings: Vec<VideoFinding>,
    pub fps: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(StreamConfig::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_intervals_are_rejected() {
        let mut config = StreamConfig {
            sample_interval: 0.01,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.sample_interval = 1.0;
        config.detection_interval = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(StreamStatus::Stopped.is_terminal());
        assert!(StreamStatus::Error.is_terminal());
        assert!(!StreamStatus::Degraded.is_terminal());
    }
}
