//! Task store
//!
//! JSON records under a directory tree:
//!
//! ```text
//! {root}/tasks/{task_id}.json
//! {root}/executions/{task_id}/{execution_id}.json
//! ```
//!
//! Writes are atomic (write-then-rename). Execution history is append-only
//! once terminal; deleting a task keeps its history.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{Error, Result};

use super::types::{ScheduledTask, TaskExecution};

/// TaskStore instance
pub struct TaskStore {
    root: PathBuf,
}

impl TaskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_path(&self, task_id: &str) -> PathBuf {
        self.root.join("tasks").join(format!("{task_id}.json"))
    }

    fn execution_dir(&self, task_id: &str) -> PathBuf {
        self.root.join("executions").join(task_id)
    }

    fn execution_path(&self, task_id: &str, execution_id: &str) -> PathBuf {
        self.execution_dir(task_id).join(format!("{execution_id}.json"))
    }

    async fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::Internal(format!("rootless path: {}", path.display())))?;
        tokio::fs::create_dir_all(parent).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    // ========================================
    // Tasks
    // ========================================

    pub async fn save_task(&self, task: &ScheduledTask) -> Result<()> {
        let payload = serde_json::to_vec_pretty(task)?;
        Self::write_atomic(&self.task_path(&task.task_id), &payload).await
    }

    pub async fn load_task(&self, task_id: &str) -> Result<ScheduledTask> {
        let path = self.task_path(task_id);
        if !path.exists() {
            return Err(Error::NotFound(format!("task: {task_id}")));
        }
        let raw = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub async fn load_all_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let dir = self.root.join("tasks");
        let mut tasks = Vec::new();
        if !dir.exists() {
            return Ok(tasks);
        }
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(raw) => match serde_json::from_slice::<ScheduledTask>(&raw) {
                    Ok(task) => tasks.push(task),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable task record");
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable task file");
                }
            }
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.task_id.cmp(&b.task_id)));
        Ok(tasks)
    }

    /// Remove the definition; history under executions/ stays.
    pub async fn delete_task(&self, task_id: &str) -> Result<()> {
        let path = self.task_path(task_id);
        if !path.exists() {
            return Err(Error::NotFound(format!("task: {task_id}")));
        }
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    // ========================================
    // Executions
    // ========================================

    /// Persist an execution record. Overwriting a record that already
    /// reached a terminal state is refused; history is append-only.
    pub async fn save_execution(&self, execution: &TaskExecution) -> Result<()> {
        let path = self.execution_path(&execution.task_id, &execution.execution_id);
        if path.exists() {
            let raw = tokio::fs::read(&path).await?;
            let existing: TaskExecution = serde_json::from_slice(&raw)?;
            if existing.status.is_terminal() {
                return Err(Error::Conflict(format!(
                    "execution {} is terminal, history is append-only",
                    execution.execution_id
                )));
            }
        }
        let payload = serde_json::to_vec_pretty(execution)?;
        Self::write_atomic(&path, &payload).await
    }

    pub async fn load_execution(&self, task_id: &str, execution_id: &str) -> Result<TaskExecution> {
        let path = self.execution_path(task_id, execution_id);
        if !path.exists() {
            return Err(Error::NotFound(format!("execution: {execution_id}")));
        }
        let raw = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Executions, newest first. `task_id = None` spans all tasks.
    pub async fn list_executions(
        &self,
        task_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TaskExecution>> {
        let mut dirs = Vec::new();
        match task_id {
            Some(id) => dirs.push(self.execution_dir(id)),
            None => {
                let base = self.root.join("executions");
                if base.exists() {
                    let mut entries = tokio::fs::read_dir(&base).await?;
                    while let Some(entry) = entries.next_entry().await? {
                        if entry.file_type().await?.is_dir() {
                            dirs.push(entry.path());
                        }
                    }
                }
            }
        }

        let mut executions = Vec::new();
        for dir in dirs {
            if !dir.exists() {
                continue;
            }
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Ok(raw) = tokio::fs::read(&path).await {
                    if let Ok(execution) = serde_json::from_slice::<TaskExecution>(&raw) {
                        executions.push(execution);
                    }
                }
            }
        }
        executions.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then(b.execution_id.cmp(&a.execution_id))
        });
        executions.truncate(limit);
        Ok(executions)
    }

    /// Trim one task's history to `keep_latest` records, and drop records
    /// older than `keep_days` when set.
    pub async fn prune_executions(
        &self,
        task_id: &str,
        keep_latest: usize,
        keep_days: Option<u32>,
    ) -> Result<()> {
        let all = self.list_executions(Some(task_id), usize::MAX).await?;
        let cutoff = keep_days.map(|days| Utc::now() - chrono::Duration::days(days as i64));
        for (position, execution) in all.iter().enumerate() {
            let expired = cutoff.map(|c| execution.started_at < c).unwrap_or(false);
            if position >= keep_latest || expired {
                let path = self.execution_path(task_id, &execution.execution_id);
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %e, "Prune failed");
                }
            }
        }
        Ok(())
    }
}
