//! Background driver loops
//!
//! One loop per concern, each on its own tokio task with its own cadence:
//!
//! - the tick loop calls [`TaskScheduler::tick`] every `tick_interval` and
//!   backs off for `error_cooldown` when a tick errors or panics, then resumes
//! - the notification logger drains an event-bus subscription into `tracing`
//!
//! All loops share one [`CancellationToken`]; [`DriverHandle::stop`] cancels
//! it and waits for every loop to exit.

use super::TaskScheduler;
use crate::error::{HippocampusError, Result};
use crate::events::Notification;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Handle for the spawned driver loops
pub struct DriverHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl DriverHandle {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Token observed by every loop spawned through this handle
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn the scheduler tick loop
    pub fn spawn_ticker(&mut self, scheduler: TaskScheduler) {
        let tick_interval = scheduler.config().tick_interval;
        let cooldown = scheduler.config().error_cooldown;
        let shutdown = self.shutdown.clone();
        self.tasks.push(tokio::spawn(run_tick_loop(
            scheduler,
            tick_interval,
            cooldown,
            shutdown,
        )));
    }

    /// Spawn a loop that logs every notification it receives
    pub fn spawn_notification_logger(&mut self, rx: broadcast::Receiver<Notification>) {
        let shutdown = self.shutdown.clone();
        self.tasks
            .push(tokio::spawn(run_notification_logger(rx, shutdown)));
    }

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Cancel all loops and wait for them to exit
    pub async fn stop(mut self) -> Result<()> {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            task.await
                .map_err(|e| HippocampusError::Other(format!("Failed to stop driver loop: {}", e)))?;
        }
        tracing::info!("Driver loops stopped");
        Ok(())
    }
}

/// Call `tick()` on a fixed cadence until cancelled
pub async fn run_tick_loop(
    scheduler: TaskScheduler,
    tick_interval: Duration,
    error_cooldown: Duration,
    shutdown: CancellationToken,
) {
    let mut timer = interval(tick_interval.max(Duration::from_millis(1)));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!("Starting scheduler tick loop every {:?}", tick_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Scheduler tick loop received shutdown signal");
                break;
            }

            _ = timer.tick() => {
                // Own task so a panicking tick is a defect like any other
                let ticking = scheduler.clone();
                let failure = match tokio::spawn(async move { ticking.tick().await }).await {
                    Ok(Ok(launched)) => {
                        if !launched.is_empty() {
                            tracing::debug!("Launched {} task(s)", launched.len());
                        }
                        None
                    }
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(e) => Some(format!("tick aborted: {}", e)),
                };

                if let Some(reason) = failure {
                    tracing::error!(
                        "Scheduler tick failed: {}; pausing for {:?}",
                        reason,
                        error_cooldown
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(error_cooldown) => {}
                    }
                }
            }
        }
    }
}

/// Log notifications at debug level until cancelled or the bus closes
pub async fn run_notification_logger(
    mut rx: broadcast::Receiver<Notification>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            received = rx.recv() => match received {
                Ok(notification) => log_notification(&notification),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Notification logger lagged, skipped {} notification(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

fn log_notification(notification: &Notification) {
    match notification {
        Notification::TaskExecuted {
            task_id,
            task_type,
            success,
            duration_ms,
            error,
            ..
        } => tracing::debug!(
            event = notification.name(),
            %task_id,
            %task_type,
            success,
            duration_ms,
            error = error.as_deref().unwrap_or("")
        ),
        Notification::MemoryStored { memory_id, kind, .. } => {
            tracing::debug!(event = notification.name(), %memory_id, %kind)
        }
        Notification::MemoryConsolidated {
            source_id,
            semantic_id,
            reinforced,
            ..
        } => tracing::debug!(event = notification.name(), %source_id, %semantic_id, reinforced),
        Notification::MemoryPruned { memory_id, reason, .. } => {
            tracing::debug!(event = notification.name(), %memory_id, reason = reason.as_str())
        }
        Notification::ConnectionCreated {
            source_id,
            target_id,
            connection_type,
            weight,
            ..
        } => tracing::debug!(
            event = notification.name(),
            %source_id,
            %target_id,
            connection_type = ?connection_type,
            weight
        ),
    }
}
