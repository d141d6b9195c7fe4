// Task Scheduler
//
// Keeps a registry of recurring maintenance tasks and runs the ones that are
// due, never more than `max_concurrent_tasks` at once and never two runs of
// the same task. Each run races its body against a timeout derived from the
// task's max execution duration. Successful runs re-arm the task one interval
// after they started; failed runs back off exponentially up to a cap.
//
// The scheduler never drives itself: a host (see `driver`) calls `tick()` on
// a fixed cadence.

pub mod driver;
pub mod history;
pub mod jobs;
pub mod registry;
pub mod task;

pub use driver::DriverHandle;
pub use history::ExecutionResult;
pub use jobs::{JobError, JobReport, MaintenanceJob, MemoryMaintenanceJob, MemoryPass};
pub use registry::ServiceRegistry;
pub use task::{Task, TaskId, TaskPriority, TaskSpec, TaskStatus, TaskType};

use crate::clock::{system_clock, SharedClock};
use crate::config::SchedulerConfig;
use crate::error::{HippocampusError, Result};
use crate::events::{EventBus, Notification};
use chrono::{DateTime, Utc};
use history::ExecutionHistory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler invariant violated: {0}")]
    InvariantViolation(String),
}

/// Point-in-time scheduler statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_tasks: usize,
    pub enabled_tasks: usize,
    pub running_tasks: usize,
    /// Successful runs among the last `stats_window` results
    pub recent_successes: usize,
    pub recent_failures: usize,
    /// Mean duration of the last `stats_window` results
    pub average_execution_ms: f64,
    /// running / max_concurrent_tasks
    pub load: f64,
}

struct TaskEntry {
    task: Task,
    job: Arc<dyn MaintenanceJob>,
}

struct RunState {
    cancelled: bool,
    /// Started by `trigger_now` rather than `tick`
    manual: bool,
}

struct SchedulerState {
    tasks: HashMap<TaskId, TaskEntry>,
    running: HashMap<TaskId, RunState>,
    history: ExecutionHistory,
}

/// Everything `execute` needs, captured when a run starts
struct Launch {
    task_id: TaskId,
    task_type: TaskType,
    interval: Duration,
    timeout: Duration,
    started_at: DateTime<Utc>,
    job: Arc<dyn MaintenanceJob>,
}

struct Inner {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    services: ServiceRegistry,
    events: EventBus,
    clock: SharedClock,
}

/// Bounded-concurrency recurring task scheduler
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

/// Delay before the next run after `failures` consecutive failures
pub fn backoff_delay(interval: Duration, failures: u32, cap: u32) -> Duration {
    let multiplier = 2u32.checked_pow(failures).unwrap_or(u32::MAX).min(cap.max(1));
    interval.checked_mul(multiplier).unwrap_or(Duration::MAX)
}

fn add_duration(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| at.checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl SchedulerState {
    /// Mark a task running and capture its launch parameters
    fn begin(
        &mut self,
        id: TaskId,
        now: DateTime<Utc>,
        timeout_multiplier: f64,
        manual: bool,
    ) -> Option<Launch> {
        if self.running.contains_key(&id) {
            return None;
        }
        let entry = self.tasks.get_mut(&id)?;
        entry.task.status = TaskStatus::Running;
        entry.task.last_run = Some(now);
        self.running.insert(
            id,
            RunState {
                cancelled: false,
                manual,
            },
        );

        Some(Launch {
            task_id: id,
            task_type: entry.task.task_type.clone(),
            interval: entry.task.interval,
            timeout: Duration::try_from_secs_f64(
                entry.task.max_execution_duration.as_secs_f64() * timeout_multiplier,
            )
            .unwrap_or(Duration::MAX),
            started_at: now,
            job: entry.job.clone(),
        })
    }
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig, services: ServiceRegistry) -> Self {
        let history = ExecutionHistory::new(config.history_limit);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(SchedulerState {
                    tasks: HashMap::new(),
                    running: HashMap::new(),
                    history,
                }),
                services,
                events: EventBus::default(),
                clock: system_clock(),
            }),
        }
    }

    /// Replace the event bus; only valid before the scheduler is shared
    pub fn with_events(self, events: EventBus) -> Self {
        self.rebuild(|inner| inner.events = events)
    }

    /// Replace the clock; only valid before the scheduler is shared
    pub fn with_clock(self, clock: SharedClock) -> Self {
        self.rebuild(|inner| inner.clock = clock)
    }

    fn rebuild(self, apply: impl FnOnce(&mut Inner)) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                apply(&mut inner);
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => {
                warn!("Scheduler already shared; builder call ignored");
                Self { inner }
            }
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.inner.services
    }

    /// Register a recurring task and return its id
    pub async fn register_task(&self, spec: TaskSpec) -> Result<TaskId> {
        if spec.interval.is_zero() {
            return Err(HippocampusError::InvalidTask(format!(
                "{}: interval must be positive",
                spec.task_type
            )));
        }
        if spec.max_execution_duration.is_zero() {
            return Err(HippocampusError::InvalidTask(format!(
                "{}: max execution duration must be positive",
                spec.task_type
            )));
        }

        let job = match spec.job {
            Some(job) => job,
            None => self.inner.services.resolve(&spec.task_type).ok_or_else(|| {
                HippocampusError::InvalidTask(format!(
                    "{}: custom tasks need an explicit job body",
                    spec.task_type
                ))
            })?,
        };

        let id = TaskId::new();
        let task = Task {
            id,
            task_type: spec.task_type,
            priority: spec.priority,
            interval: spec.interval,
            max_execution_duration: spec.max_execution_duration,
            enabled: spec.enabled,
            last_run: None,
            next_due: spec.next_due.unwrap_or_else(|| self.inner.clock.now()),
            execution_count: 0,
            failure_count: 0,
            average_execution_ms: 0.0,
            status: TaskStatus::Pending,
            metadata: spec.metadata,
        };

        info!(
            "Registered task {} ({}, {:?}, every {:?})",
            id, task.task_type, task.priority, task.interval
        );
        self.inner
            .state
            .lock()
            .await
            .tasks
            .insert(id, TaskEntry { task, job });
        Ok(id)
    }

    /// Remove a task; an in-flight run is flagged cancelled and its result discarded
    pub async fn remove_task(&self, id: TaskId) -> bool {
        let mut state = self.inner.state.lock().await;
        let Some(mut entry) = state.tasks.remove(&id) else {
            return false;
        };

        if let Some(run) = state.running.get_mut(&id) {
            run.cancelled = true;
            entry.task.status = TaskStatus::Cancelled;
        }
        info!("Removed task {} ({}, status {:?})", id, entry.task.task_type, entry.task.status);
        true
    }

    pub async fn set_enabled(&self, id: TaskId, enabled: bool) -> bool {
        let mut state = self.inner.state.lock().await;
        match state.tasks.get_mut(&id) {
            Some(entry) => {
                entry.task.enabled = enabled;
                debug!("Task {} enabled={}", id, enabled);
                true
            }
            None => false,
        }
    }

    /// Force the next due time of a task
    pub async fn reschedule(&self, id: TaskId, next_due: DateTime<Utc>) -> bool {
        let mut state = self.inner.state.lock().await;
        match state.tasks.get_mut(&id) {
            Some(entry) => {
                entry.task.next_due = next_due;
                true
            }
            None => false,
        }
    }

    pub async fn task(&self, id: TaskId) -> Option<Task> {
        let state = self.inner.state.lock().await;
        state.tasks.get(&id).map(|entry| entry.task.clone())
    }

    /// All tasks in launch order (priority, then due time)
    pub async fn tasks(&self) -> Vec<Task> {
        let state = self.inner.state.lock().await;
        let mut tasks: Vec<Task> = state.tasks.values().map(|e| e.task.clone()).collect();
        tasks.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.next_due.cmp(&b.next_due))
                .then_with(|| a.id.cmp(&b.id))
        });
        tasks
    }

    /// Run a task now, ignoring its due time, and wait for the result
    ///
    /// Returns `None` for unknown tasks, tasks already running and runs whose
    /// task was removed before they finished.
    pub async fn trigger_now(&self, id: TaskId) -> Option<ExecutionResult> {
        let now = self.inner.clock.now();
        let launch = {
            let mut state = self.inner.state.lock().await;
            state.begin(id, now, self.inner.config.timeout_multiplier, true)?
        };
        debug!("Triggered task {} manually", id);
        self.execute(launch).await
    }

    /// Launch every due task that fits in the free concurrency slots
    ///
    /// Handles are returned without being awaited; dropping them does not
    /// cancel the runs.
    pub async fn tick(
        &self,
    ) -> std::result::Result<Vec<JoinHandle<Option<ExecutionResult>>>, SchedulerError> {
        let now = self.inner.clock.now();
        let max = self.inner.config.max_concurrent_tasks;

        let launches = {
            let mut state = self.inner.state.lock().await;

            let scheduled = state.running.values().filter(|run| !run.manual).count();
            if scheduled > max {
                return Err(SchedulerError::InvariantViolation(format!(
                    "{} scheduled runs in flight, limit is {}",
                    scheduled, max
                )));
            }
            let free = max.saturating_sub(state.running.len());
            if free == 0 {
                return Ok(Vec::new());
            }

            let mut eligible: Vec<(TaskPriority, DateTime<Utc>, TaskId)> = state
                .tasks
                .values()
                .map(|entry| &entry.task)
                .filter(|task| {
                    task.enabled && task.next_due <= now && !state.running.contains_key(&task.id)
                })
                .map(|task| (task.priority, task.next_due, task.id))
                .collect();
            eligible.sort();
            eligible.truncate(free);

            eligible
                .into_iter()
                .filter_map(|(_, _, id)| {
                    state.begin(id, now, self.inner.config.timeout_multiplier, false)
                })
                .collect::<Vec<_>>()
        };

        if !launches.is_empty() {
            debug!("Tick launching {} task(s)", launches.len());
        }

        Ok(launches
            .into_iter()
            .map(|launch| {
                let scheduler = self.clone();
                tokio::spawn(async move { scheduler.execute(launch).await })
            })
            .collect())
    }

    /// Most recent results first
    pub async fn history(&self, limit: usize) -> Vec<ExecutionResult> {
        self.inner.state.lock().await.history.recent(limit)
    }

    pub async fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock().await;
        let window = state.history.recent(self.inner.config.stats_window);
        let recent_successes = window.iter().filter(|r| r.success).count();
        let average_execution_ms = if window.is_empty() {
            0.0
        } else {
            window.iter().map(|r| r.duration_ms as f64).sum::<f64>() / window.len() as f64
        };
        let max = self.inner.config.max_concurrent_tasks.max(1);

        SchedulerStats {
            total_tasks: state.tasks.len(),
            enabled_tasks: state.tasks.values().filter(|e| e.task.enabled).count(),
            running_tasks: state.running.len(),
            recent_successes,
            recent_failures: window.len() - recent_successes,
            average_execution_ms,
            load: state.running.len() as f64 / max as f64,
        }
    }

    /// Run the body under its timeout, then record the outcome
    async fn execute(&self, launch: Launch) -> Option<ExecutionResult> {
        let started = Instant::now();
        let job = launch.job.clone();
        // Own task so a panicking body cannot take the scheduler with it
        let mut body = tokio::spawn(async move { job.run().await });

        let outcome = match tokio::time::timeout(launch.timeout, &mut body).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) if join_error.is_panic() => {
                Err(JobError::Panicked(panic_message(join_error.into_panic())))
            }
            Ok(Err(join_error)) => Err(JobError::ExecutionError(join_error.to_string())),
            Err(_) => {
                body.abort();
                Err(JobError::Timeout(launch.timeout))
            }
        };

        self.finish(launch, outcome, started.elapsed()).await
    }

    async fn finish(
        &self,
        launch: Launch,
        outcome: std::result::Result<JobReport, JobError>,
        elapsed: Duration,
    ) -> Option<ExecutionResult> {
        let ended_at = self.inner.clock.now();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        let result = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;

            let cancelled = state
                .running
                .remove(&launch.task_id)
                .map_or(true, |run| run.cancelled);
            let entry = match state.tasks.get_mut(&launch.task_id) {
                Some(entry) if !cancelled => entry,
                _ => {
                    debug!(
                        "Discarding result of task {} removed while running",
                        launch.task_id
                    );
                    return None;
                }
            };
            let task = &mut entry.task;

            let delay = match &outcome {
                Ok(_) => {
                    task.execution_count += 1;
                    let n = task.execution_count as f64;
                    task.average_execution_ms =
                        (task.average_execution_ms * (n - 1.0) + elapsed_ms) / n;
                    task.status = TaskStatus::Completed;
                    launch.interval
                }
                Err(_) => {
                    task.failure_count = task.failure_count.saturating_add(1);
                    task.status = TaskStatus::Failed;
                    backoff_delay(
                        launch.interval,
                        task.failure_count,
                        self.inner.config.backoff_cap,
                    )
                }
            };

            let mut next_due = add_duration(launch.started_at, delay);
            if next_due <= ended_at {
                next_due = add_duration(ended_at, delay);
            }
            task.next_due = next_due;

            let result = ExecutionResult {
                task_id: launch.task_id,
                task_type: launch.task_type.clone(),
                started_at: launch.started_at,
                ended_at,
                duration_ms: elapsed.as_millis().min(u64::MAX as u128) as u64,
                success: outcome.is_ok(),
                metrics: outcome.as_ref().map(JobReport::metrics).unwrap_or_default(),
                error: outcome.as_ref().err().map(ToString::to_string),
            };
            state.history.push(result.clone());
            result
        };

        match &result.error {
            None => debug!(
                "Task {} ({}) completed in {}ms",
                result.task_id, result.task_type, result.duration_ms
            ),
            Some(error) => warn!(
                "Task {} ({}) failed after {}ms: {}",
                result.task_id, result.task_type, result.duration_ms, error
            ),
        }

        self.inner.events.publish(Notification::TaskExecuted {
            task_id: result.task_id,
            task_type: result.task_type.clone(),
            success: result.success,
            duration_ms: result.duration_ms,
            error: result.error.clone(),
            timestamp: ended_at,
        });
        Some(result)
    }
}
