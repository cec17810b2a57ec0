//! Job executors
//!
//! One function per task type: enumerate the inputs, drive the matching
//! pipeline, tally the outcome into the execution record. Item failures
//! are tallied, never propagated; only setup problems (unreadable input
//! root, bad parameters) fail the run.

use std::path::{Path, PathBuf};

use rand::Rng;

use crate::diagnosis_service::{DiagnoseParams, DiagnosisService, VideoParams};
use crate::error::{Error, Result};

use super::types::{ScheduledTask, TaskExecution, TaskType};

/// Shell-style wildcard match (`*`, `?`), case-sensitive.
pub(crate) fn matches_pattern(name: &str, pattern: &str) -> bool {
    fn inner(name: &[u8], pattern: &[u8]) -> bool {
        match (pattern.first(), name.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(name, &pattern[1..])
                    || (!name.is_empty() && inner(&name[1..], pattern))
            }
            (Some(b'?'), Some(_)) => inner(&name[1..], &pattern[1..]),
            (Some(&p), Some(&n)) if p == n => inner(&name[1..], &pattern[1..]),
            _ => false,
        }
    }
    inner(name.as_bytes(), pattern.as_bytes())
}

/// Enumerate files under `root` matching `pattern`, sorted for
/// deterministic processing order.
pub(crate) fn collect_inputs(root: &Path, pattern: &str, recursive: bool) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(Error::Input(format!("input path missing: {}", root.display())));
    }
    let mut results = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                if recursive {
                    stack.push(path);
                }
                continue;
            }
            let name = entry.file_name();
            if matches_pattern(&name.to_string_lossy(), pattern) {
                results.push(path);
            }
        }
    }
    results.sort();
    Ok(results)
}

fn image_params(task: &ScheduledTask) -> DiagnoseParams {
    DiagnoseParams {
        profile: task.config.profile.clone(),
        level: task.config.level,
        detectors: None,
        custom_thresholds: task.config.custom_thresholds.clone(),
    }
}

/// Persist a raw JSON result dump next to the other reports, when the
/// task asks for one.
async fn write_result_dump(
    task: &ScheduledTask,
    execution: &TaskExecution,
    payload: &impl serde::Serialize,
) -> Option<String> {
    let dir = task.output.directory.as_ref()?;
    if !task.output.formats.iter().any(|f| f == "json") {
        return None;
    }
    let path = dir.join(format!("{}.json", execution.execution_id));
    let bytes = match serde_json::to_vec_pretty(payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Result dump serialization failed");
            return None;
        }
    };
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        tracing::warn!(dir = %dir.display(), error = %e, "Result dump directory failed");
        return None;
    }
    match tokio::fs::write(&path, bytes).await {
        Ok(()) => Some(path.display().to_string()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Result dump write failed");
            None
        }
    }
}

/// Execute one task run, mutating the execution tallies.
/// Returns the setup error message when the run could not start.
pub(crate) async fn run_task(
    task: &ScheduledTask,
    execution: &mut TaskExecution,
    diagnosis: &DiagnosisService,
) -> Option<String> {
    let inputs = {
        let root = task.config.input_path.clone();
        let pattern = task.config.pattern.clone();
        let recursive = task.config.recursive;
        match tokio::task::spawn_blocking(move || collect_inputs(&root, &pattern, recursive)).await
        {
            Ok(Ok(inputs)) => inputs,
            Ok(Err(e)) => return Some(e.to_string()),
            Err(e) => return Some(format!("input enumeration panicked: {e}")),
        }
    };

    let inputs = match task.task_type {
        TaskType::SampleImage => {
            let rate = task.config.sample_rate.clamp(0.0, 1.0);
            let mut rng = rand::thread_rng();
            inputs
                .into_iter()
                .filter(|_| rng.gen_bool(rate))
                .collect::<Vec<_>>()
        }
        _ => inputs,
    };

    match task.task_type {
        TaskType::BatchImage | TaskType::SampleImage => {
            let report = match diagnosis.diagnose_batch(&inputs, &image_params(task)).await {
                Ok(report) => report,
                Err(e) => return Some(e.to_string()),
            };
            execution.total_items = report.summary.total;
            execution.normal_count = report.summary.normal;
            execution.abnormal_count = report.summary.abnormal;
            execution.error_count = report.summary.errors;
            execution.report_path = write_result_dump(task, execution, &report).await;
            None
        }
        TaskType::Video => {
            let params = VideoParams {
                base: image_params(task),
                strategy: task.config.sample_strategy,
                sample_interval: task.config.sample_interval,
                max_frames: task.config.max_frames,
                include_frame_verdicts: false,
            };
            let mut verdicts = Vec::new();
            execution.total_items = inputs.len() as u64;
            for path in &inputs {
                match diagnosis.diagnose_video_path(path, &params).await {
                    Ok(verdict) => {
                        if verdict.is_abnormal {
                            execution.abnormal_count += 1;
                        } else {
                            execution.normal_count += 1;
                        }
                        verdicts.push(verdict);
                    }
                    Err(e) => {
                        execution.error_count += 1;
                        tracing::warn!(path = %path.display(), error = %e, "Video item failed");
                    }
                }
            }
            execution.report_path = write_result_dump(task, execution, &verdicts).await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matching() {
        assert!(matches_pattern("cam01.jpg", "*.jpg"));
        assert!(matches_pattern("cam01.jpg", "cam??.jpg"));
        assert!(matches_pattern("clip.mp4", "*"));
        assert!(!matches_pattern("cam01.jpeg", "*.jpg"));
        assert!(!matches_pattern("cam1.jpg", "cam??.jpg"));
        assert!(matches_pattern("a", "*a*"));
    }

    #[test]
    fn collect_inputs_filters_and_recurses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("b.png"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.jpg"), b"x").unwrap();

        let flat = collect_inputs(dir.path(), "*.jpg", false).unwrap();
        assert_eq!(flat.len(), 1);
        let deep = collect_inputs(dir.path(), "*.jpg", true).unwrap();
        assert_eq!(deep.len(), 2);
    }

    #[test]
    fn missing_root_is_an_input_error() {
        assert!(matches!(
            collect_inputs(Path::new("/definitely/not/here"), "*", false),
            Err(Error::Input(_))
        ));
    }
}
