//! Scheduler data types

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detectors::DetectionLevel;
use crate::video_pipeline::sampler::SampleStrategy;

/// What a task runs over its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Image pipeline over every matching file.
    BatchImage,
    /// Image pipeline over a random fraction of matching files.
    SampleImage,
    /// Video pipeline over every matching file.
    Video,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::BatchImage => "batch_image",
            TaskType::SampleImage => "sample_image",
            TaskType::Video => "video",
        }
    }
}

/// Detection parameters of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub input_path: PathBuf,
    /// Glob-style file pattern (`*` and `?`).
    pub pattern: String,
    pub recursive: bool,
    pub profile: String,
    pub level: DetectionLevel,
    /// Fraction of inputs picked by sample_image tasks, (0, 1].
    pub sample_rate: f64,
    /// Video tasks only.
    pub sample_strategy: SampleStrategy,
    pub sample_interval: f64,
    pub max_frames: usize,
    pub custom_thresholds: Option<HashMap<String, f32>>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("."),
            pattern: "*.jpg".into(),
            recursive: false,
            profile: "normal".into(),
            level: DetectionLevel::Standard,
            sample_rate: 0.1,
            sample_strategy: SampleStrategy::Interval,
            sample_interval: 1.0,
            max_frames: 300,
            custom_thresholds: None,
        }
    }
}

/// Where and how long results are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: Option<PathBuf>,
    pub formats: Vec<String>,
    pub keep_days: Option<u32>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: None,
            formats: vec!["json".into()],
            keep_days: None,
        }
    }
}

/// Persistent cron-driven job definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub task_type: TaskType,
    pub cron: String,
    pub enabled: bool,
    pub config: TaskConfig,
    #[serde(default)]
    pub output: OutputConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    pub fn new(
        name: impl Into<String>,
        task_type: TaskType,
        cron: impl Into<String>,
        config: TaskConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            task_type,
            cron: cron.into(),
            enabled: true,
            config,
            output: OutputConfig::default(),
            created_at: now,
            updated_at: now,
            last_run_at: None,
            next_run_at: None,
        }
    }
}

/// Terminal/running status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    /// All items processed, no errors.
    Success,
    /// Some items errored.
    Partial,
    /// Setup failed or nothing was processed.
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

/// Record of one task run. Append-only once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub execution_id: String,
    pub task_id: String,
    pub task_name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub total_items: u64,
    #[serde(default)]
    pub normal_count: u64,
    #[serde(default)]
    pub abnormal_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub report_path: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl TaskExecution {
    pub fn start(task: &ScheduledTask, now: DateTime<Utc>) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            task_id: task.task_id.clone(),
            task_name: task.name.clone(),
            status: ExecutionStatus::Running,
            started_at: now,
            finished_at: None,
            duration_seconds: 0.0,
            total_items: 0,
            normal_count: 0,
            abnormal_count: 0,
            error_count: 0,
            report_path: None,
            error_message: None,
        }
    }

    /// Close the record; the status is derived from the tallies unless a
    /// setup error is given.
    pub fn finish(&mut self, now: DateTime<Utc>, setup_error: Option<String>) {
        self.finished_at = Some(now);
        self.duration_seconds = (now - self.started_at).num_milliseconds() as f64 / 1000.0;
        self.status = match (&setup_error, self.error_count, self.total_items) {
            (Some(_), _, _) => ExecutionStatus::Failed,
            (None, 0, _) => ExecutionStatus::Success,
            (None, errors, total) if errors >= total => ExecutionStatus::Failed,
            _ => ExecutionStatus::Partial,
        };
        if let Some(message) = setup_error {
            self.error_message = Some(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> ScheduledTask {
        ScheduledTask::new(
            "nightly",
            TaskType::BatchImage,
            "0 2 * * *",
            TaskConfig::default(),
            Utc::now(),
        )
    }

    #[test]
    fn finish_derives_status_from_tallies() {
        let now = Utc::now();
        let mut ok = TaskExecution::start(&task(), now);
        ok.total_items = 5;
        ok.normal_count = 5;
        ok.finish(now, None);
        assert_eq!(ok.status, ExecutionStatus::Success);

        let mut partial = TaskExecution::start(&task(), now);
        partial.total_items = 5;
        partial.error_count = 2;
        partial.finish(now, None);
        assert_eq!(partial.status, ExecutionStatus::Partial);

        let mut failed = TaskExecution::start(&task(), now);
        failed.total_items = 3;
        failed.error_count = 3;
        failed.finish(now, None);
        assert_eq!(failed.status, ExecutionStatus::Failed);

        let mut setup = TaskExecution::start(&task(), now);
        setup.finish(now, Some("input path missing".into()));
        assert_eq!(setup.status, ExecutionStatus::Failed);
        assert!(setup.error_message.is_some());
    }

    #[test]
    fn serde_round_trip_is_stable() {
        let task = task();
        let json = serde_json::to_string(&task).unwrap();
        let back: ScheduledTask = serde_json::from_str(&json).unwrap();
        let json2 = serde_json::to_string(&back).unwrap();
        assert_eq!(json, json2);
    }
}
