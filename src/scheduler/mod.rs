//! SchedulerService - Cron-Driven Task Execution
//!
//! ## Responsibilities
//!
//! - Persist task definitions and compute `next_run_at` from their cron
//! - Tick at most once a minute and dispatch due tasks to a bounded pool
//! - Serialize runs of the same task (one queued, a third is TaskBusy)
//! - Keep the append-only execution history with retention
//!
//! Time enters only through the injected `Clock`, so tests drive the
//! scheduler with a manual clock; cron math itself is pure.

pub mod cron;
pub mod jobs;
pub mod store;
pub mod types;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock, Semaphore};

use crate::diagnosis_service::DiagnosisService;
use crate::error::{Error, Result};

use cron::CronExpr;
use store::TaskStore;
use types::{ScheduledTask, TaskExecution};

/// History kept per task regardless of age.
const EXECUTION_RETENTION: usize = 1000;

/// Wall-clock source. Injected so the tick loop and execution stamps are
/// testable; production uses `SystemClock`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Per-task serialization gate: one runner, one waiter.
struct TaskGate {
    lock: Mutex<()>,
    occupancy: AtomicUsize,
}

/// SchedulerService instance
pub struct SchedulerService {
    store: Arc<TaskStore>,
    diagnosis: Arc<DiagnosisService>,
    clock: Arc<dyn Clock>,
    pool: Arc<Semaphore>,
    gates: Mutex<HashMap<String, Arc<TaskGate>>>,
    running: Arc<RwLock<bool>>,
    tick_interval: Duration,
    tick_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SchedulerService {
    pub fn new(
        store: Arc<TaskStore>,
        diagnosis: Arc<DiagnosisService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .max(2);
        Self {
            store,
            diagnosis,
            clock,
            pool: Arc::new(Semaphore::new(workers)),
            gates: Mutex::new(HashMap::new()),
            running: Arc::new(RwLock::new(false)),
            tick_interval: Duration::from_secs(30),
            tick_handle: Mutex::new(None),
        }
    }

    /// Start the background tick loop (cadence well under a minute).
    pub async fn start(self: &Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Scheduler already running");
                return;
            }
            *running = true;
        }

        // Seed next_run_at for enabled tasks that lack one
        if let Ok(tasks) = self.store.load_all_tasks().await {
            let now = self.clock.now();
            for mut task in tasks {
                if task.enabled && task.next_run_at.is_none() {
                    if let Ok(cron) = CronExpr::parse(&task.cron) {
                        task.next_run_at = cron.next_after(now);
                        let _ = self.store.save_task(&task).await;
                    }
                }
            }
        }

        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.tick_interval);
            loop {
                interval.tick().await;
                {
                    let running = scheduler.running.read().await;
                    if !*running {
                        break;
                    }
                }
                if let Err(e) = scheduler.tick_once().await {
                    tracing::error!(error = %e, "Scheduler tick failed");
                }
            }
            tracing::info!("Scheduler tick loop stopped");
        });
        *self.tick_handle.lock().await = Some(handle);
        tracing::info!("Scheduler started");
    }

    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            *running = false;
        }
        if let Some(handle) = self.tick_handle.lock().await.take() {
            handle.abort();
        }
        tracing::info!("Scheduler stopped");
    }

    /// Evaluate due tasks and run them to completion. Public so tests (and
    /// a manual trigger surface) can drive the scheduler deterministically.
    pub async fn tick_once(self: &Arc<Self>) -> Result<usize> {
        let now = self.clock.now();
        let tasks = self.store.load_all_tasks().await?;
        let due: Vec<ScheduledTask> = tasks
            .into_iter()
            .filter(|t| t.enabled && t.next_run_at.map(|n| n <= now).unwrap_or(false))
            .collect();
        if due.is_empty() {
            return Ok(0);
        }

        let mut handles = Vec::with_capacity(due.len());
        for task in due {
            let scheduler = self.clone();
            handles.push(tokio::spawn(async move {
                match scheduler.execute(&task.task_id).await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(
                            task_id = %task.task_id,
                            task = %task.name,
                            error = %e,
                            "Scheduled run not executed"
                        );
                        false
                    }
                }
            }));
        }
        let mut executed = 0;
        for handle in handles {
            if handle.await.unwrap_or(false) {
                executed += 1;
            }
        }
        Ok(executed)
    }

    // ========================================
    // Task CRUD
    // ========================================

    /// Create and persist a task; `next_run_at` comes from its cron.
    pub async fn create_task(&self, mut task: ScheduledTask) -> Result<ScheduledTask> {
        let cron = CronExpr::parse(&task.cron)?;
        if task.enabled {
            task.next_run_at = cron.next_after(self.clock.now());
        }
        self.store.save_task(&task).await?;
        tracing::info!(task_id = %task.task_id, name = %task.name, cron = %task.cron, "Task created");
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<ScheduledTask> {
        self.store.load_task(task_id).await
    }

    pub async fn list_tasks(&self) -> Result<Vec<ScheduledTask>> {
        self.store.load_all_tasks().await
    }

    /// Replace a task definition; the schedule is re-derived.
    pub async fn update_task(&self, mut task: ScheduledTask) -> Result<ScheduledTask> {
        // Must exist
        self.store.load_task(&task.task_id).await?;
        let cron = CronExpr::parse(&task.cron)?;
        task.updated_at = self.clock.now();
        task.next_run_at = if task.enabled {
            cron.next_after(task.updated_at)
        } else {
            None
        };
        self.store.save_task(&task).await?;
        Ok(task)
    }

    /// Delete the definition; execution history stays.
    pub async fn delete_task(&self, task_id: &str) -> Result<()> {
        self.store.delete_task(task_id).await?;
        self.gates.lock().await.remove(task_id);
        tracing::info!(task_id = %task_id, "Task deleted");
        Ok(())
    }

    pub async fn enable_task(&self, task_id: &str) -> Result<ScheduledTask> {
        let mut task = self.store.load_task(task_id).await?;
        let cron = CronExpr::parse(&task.cron)?;
        task.enabled = true;
        task.updated_at = self.clock.now();
        task.next_run_at = cron.next_after(task.updated_at);
        self.store.save_task(&task).await?;
        Ok(task)
    }

    pub async fn disable_task(&self, task_id: &str) -> Result<ScheduledTask> {
        let mut task = self.store.load_task(task_id).await?;
        task.enabled = false;
        task.updated_at = self.clock.now();
        task.next_run_at = None;
        self.store.save_task(&task).await?;
        Ok(task)
    }

    /// Manual trigger: identical to a scheduled run, same serialization.
    pub async fn run_task_now(self: &Arc<Self>, task_id: &str) -> Result<TaskExecution> {
        self.execute(task_id).await
    }

    pub async fn list_executions(
        &self,
        task_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TaskExecution>> {
        self.store.list_executions(task_id, limit).await
    }

    // ========================================
    // Execution
    // ========================================

    async fn gate_for(&self, task_id: &str) -> Arc<TaskGate> {
        let mut gates = self.gates.lock().await;
        gates
            .entry(task_id.to_string())
            .or_insert_with(|| {
                Arc::new(TaskGate {
                    lock: Mutex::new(()),
                    occupancy: AtomicUsize::new(0),
                })
            })
            .clone()
    }

    async fn execute(self: &Arc<Self>, task_id: &str) -> Result<TaskExecution> {
        let gate = self.gate_for(task_id).await;
        // One runner plus one waiter; a third concurrent request bounces.
        if gate.occupancy.fetch_add(1, Ordering::SeqCst) >= 2 {
            gate.occupancy.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Conflict(format!("task busy: {task_id}")));
        }
        let result = self.execute_gated(&gate, task_id).await;
        gate.occupancy.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn execute_gated(
        self: &Arc<Self>,
        gate: &TaskGate,
        task_id: &str,
    ) -> Result<TaskExecution> {
        let _serial = gate.lock.lock().await;
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| Error::Internal("scheduler pool closed".into()))?;

        // Reload inside the gate: the definition may have changed while
        // queued, or be gone.
        let task = self.store.load_task(task_id).await?;
        let started = self.clock.now();
        let mut execution = TaskExecution::start(&task, started);
        self.store.save_execution(&execution).await?;
        tracing::info!(
            task_id = %task.task_id,
            execution_id = %execution.execution_id,
            task_type = task.task_type.as_str(),
            "Execution started"
        );

        let setup_error = jobs::run_task(&task, &mut execution, &self.diagnosis).await;
        execution.finish(self.clock.now(), setup_error);
        self.store.save_execution(&execution).await?;
        tracing::info!(
            task_id = %task.task_id,
            execution_id = %execution.execution_id,
            status = ?execution.status,
            total = execution.total_items,
            abnormal = execution.abnormal_count,
            errors = execution.error_count,
            "Execution finished"
        );

        if let Err(e) = self
            .store
            .prune_executions(&task.task_id, EXECUTION_RETENTION, task.output.keep_days)
            .await
        {
            tracing::warn!(task_id = %task.task_id, error = %e, "History prune failed");
        }

        // Reschedule
        let mut task = match self.store.load_task(task_id).await {
            Ok(task) => task,
            // Deleted mid-run: the execution record still stands
            Err(Error::NotFound(_)) => return Ok(execution),
            Err(e) => return Err(e),
        };
        task.last_run_at = Some(started);
        if task.enabled {
            let cron = CronExpr::parse(&task.cron)?;
            task.next_run_at = cron.next_after(self.clock.now());
        }
        self.store.save_task(&task).await?;

        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::registry::DetectorRegistry;
    use crate::diagnosis_service::{DiagnosisConfig, NoVideoDecoder};
    use crate::pipeline::ImagePipeline;
    use crate::profiles::ProfileStore;
    use crate::scheduler::types::{ExecutionStatus, TaskConfig, TaskType};
    use crate::video_pipeline::VideoPipeline;
    use chrono::TimeZone;
    use std::sync::Mutex as StdMutex;

    struct ManualClock {
        now: StdMutex<DateTime<Utc>>,
    }

    impl ManualClock {
        fn at(t: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self {
                now: StdMutex::new(t),
            })
        }

        fn set(&self, t: DateTime<Utc>) {
            *self.now.lock().unwrap() = t;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    fn diagnosis() -> Arc<DiagnosisService> {
        let registry = Arc::new(DetectorRegistry::with_builtin());
        let image_pipeline = Arc::new(ImagePipeline::new(registry.clone()));
        Arc::new(DiagnosisService::new(
            registry,
            Arc::new(ProfileStore::new()),
            image_pipeline.clone(),
            Arc::new(VideoPipeline::new(image_pipeline)),
            Arc::new(NoVideoDecoder),
            DiagnosisConfig::default(),
        ))
    }

    fn scheduler_at(
        t: DateTime<Utc>,
    ) -> (tempfile::TempDir, Arc<ManualClock>, Arc<SchedulerService>) {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::at(t);
        let scheduler = Arc::new(SchedulerService::new(
            Arc::new(TaskStore::new(dir.path().join("scheduler"))),
            diagnosis(),
            clock.clone(),
        ));
        (dir, clock, scheduler)
    }

    fn batch_task(input: &std::path::Path) -> ScheduledTask {
        ScheduledTask::new(
            "five-minutely",
            TaskType::BatchImage,
            "*/5 * * * *",
            TaskConfig {
                input_path: input.to_path_buf(),
                pattern: "*.png".into(),
                ..Default::default()
            },
            Utc.with_ymd_and_hms(2026, 4, 1, 12, 2, 30).unwrap(),
        )
    }

    #[tokio::test]
    async fn cron_fires_once_per_slot_with_a_manual_clock() {
        let t0 = Utc.with_ymd_and_hms(2026, 4, 1, 12, 2, 30).unwrap();
        let (dir, clock, scheduler) = scheduler_at(t0);
        let input = dir.path().join("inputs");
        std::fs::create_dir_all(&input).unwrap();

        let task = scheduler.create_task(batch_task(&input)).await.unwrap();
        assert_eq!(
            task.next_run_at.unwrap(),
            Utc.with_ymd_and_hms(2026, 4, 1, 12, 5, 0).unwrap()
        );

        // Before the slot: nothing fires
        assert_eq!(scheduler.tick_once().await.unwrap(), 0);

        // Just past the slot: exactly one execution
        clock.set(Utc.with_ymd_and_hms(2026, 4, 1, 12, 5, 1).unwrap());
        assert_eq!(scheduler.tick_once().await.unwrap(), 1);
        assert_eq!(scheduler.tick_once().await.unwrap(), 0); // same instant: rescheduled
        let history = scheduler.list_executions(Some(&task.task_id), 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Success);

        let rescheduled = scheduler.get_task(&task.task_id).await.unwrap();
        assert_eq!(
            rescheduled.next_run_at.unwrap(),
            Utc.with_ymd_and_hms(2026, 4, 1, 12, 10, 0).unwrap()
        );

        // Five minutes later: one more
        clock.set(Utc.with_ymd_and_hms(2026, 4, 1, 12, 10, 1).unwrap());
        assert_eq!(scheduler.tick_once().await.unwrap(), 1);
        let history = scheduler.list_executions(Some(&task.task_id), 10).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn restart_reproduces_next_run_from_the_store() {
        let t0 = Utc.with_ymd_and_hms(2026, 4, 1, 12, 2, 30).unwrap();
        let (dir, _clock, scheduler) = scheduler_at(t0);
        let input = dir.path().join("inputs");
        std::fs::create_dir_all(&input).unwrap();
        let task = scheduler.create_task(batch_task(&input)).await.unwrap();
        let expected = task.next_run_at;

        // A second scheduler over the same store sees the same schedule
        let clock2 = ManualClock::at(t0);
        let scheduler2 = Arc::new(SchedulerService::new(
            Arc::new(TaskStore::new(dir.path().join("scheduler"))),
            diagnosis(),
            clock2,
        ));
        let reloaded = scheduler2.get_task(&task.task_id).await.unwrap();
        assert_eq!(reloaded.next_run_at, expected);
    }

    #[tokio::test]
    async fn disabled_tasks_do_not_fire() {
        let t0 = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
        let (dir, clock, scheduler) = scheduler_at(t0);
        let input = dir.path().join("inputs");
        std::fs::create_dir_all(&input).unwrap();
        let task = scheduler.create_task(batch_task(&input)).await.unwrap();
        scheduler.disable_task(&task.task_id).await.unwrap();

        clock.set(Utc.with_ymd_and_hms(2026, 4, 1, 13, 0, 1).unwrap());
        assert_eq!(scheduler.tick_once().await.unwrap(), 0);

        let enabled = scheduler.enable_task(&task.task_id).await.unwrap();
        assert!(enabled.next_run_at.is_some());
    }

    #[tokio::test]
    async fn invalid_cron_is_rejected_at_creation() {
        let t0 = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
        let (dir, _clock, scheduler) = scheduler_at(t0);
        let mut task = batch_task(dir.path());
        task.cron = "every day at noon".into();
        assert!(matches!(
            scheduler.create_task(task).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn manual_run_records_an_execution_and_task_busy_applies() {
        let t0 = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
        let (dir, _clock, scheduler) = scheduler_at(t0);
        let input = dir.path().join("inputs");
        std::fs::create_dir_all(&input).unwrap();
        let task = scheduler.create_task(batch_task(&input)).await.unwrap();

        let execution = scheduler.run_task_now(&task.task_id).await.unwrap();
        assert!(execution.status.is_terminal());

        // Saturate the gate: two synthetic occupants, then a third bounces
        let gate = scheduler.gate_for(&task.task_id).await;
        gate.occupancy.store(2, Ordering::SeqCst);
        let err = scheduler.run_task_now(&task.task_id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        gate.occupancy.store(0, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn delete_preserves_history() {
        let t0 = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
        let (dir, _clock, scheduler) = scheduler_at(t0);
        let input = dir.path().join("inputs");
        std::fs::create_dir_all(&input).unwrap();
        let task = scheduler.create_task(batch_task(&input)).await.unwrap();
        scheduler.run_task_now(&task.task_id).await.unwrap();
        scheduler.delete_task(&task.task_id).await.unwrap();

        assert!(matches!(
            scheduler.get_task(&task.task_id).await,
            Err(Error::NotFound(_))
        ));
        let history = scheduler.list_executions(Some(&task.task_id), 10).await.unwrap();
        assert_eq!(history.len(), 1);
    }
}
