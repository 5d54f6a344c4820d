//! Background task scheduler.
//!
//! Provides interval, cron, and delayed task execution for standalone
//! services: build a [`Scheduler`], [`Scheduler::register`] tasks, then
//! [`Scheduler::start`] to spawn them and get back a [`SchedulerHandle`] for
//! status checks and shutdown.

mod types;

pub use types::{extract_tasks, ScheduleConfig, ScheduledResult, ScheduledTask, ScheduledTaskDef};

use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Handle to the scheduler runtime.
///
/// Cloneable; share it with shutdown machinery or expose it from an admin
/// endpoint to check whether the scheduler has been cancelled.
#[derive(Clone)]
pub struct SchedulerHandle {
    cancel: CancellationToken,
}

impl SchedulerHandle {
    /// Create a new scheduler handle from a cancellation token.
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Cancel the scheduler and all running tasks.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check if the scheduler has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Get the underlying cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

// ── ScheduledJobRegistry ──────────────────────────────────────────────────

/// Information about a registered scheduled job.
#[derive(Clone, Debug)]
pub struct ScheduledJobInfo {
    /// The name of the scheduled task.
    pub name: String,
    /// Human-readable schedule description (e.g., "every 30s", "cron: 0 */5 * * * *").
    pub schedule: String,
}

/// Registry of scheduled jobs, queryable at runtime (e.g. for an admin
/// `/jobs` endpoint listing what's currently scheduled).
#[derive(Clone)]
pub struct ScheduledJobRegistry {
    inner: Arc<Mutex<Vec<ScheduledJobInfo>>>,
}

impl ScheduledJobRegistry {
    /// Create a new empty job registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a job in the registry.
    pub fn register(&self, info: ScheduledJobInfo) {
        self.inner.lock().unwrap().push(info);
    }

    /// List all registered jobs.
    pub fn list_jobs(&self) -> Vec<ScheduledJobInfo> {
        self.inner.lock().unwrap().clone()
    }
}

impl Default for ScheduledJobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Collects scheduled tasks and starts them together against one shared
/// cancellation token.
///
/// ```ignore
/// let mut scheduler = Scheduler::new();
/// scheduler.register(Box::new(retry_sweep_task));
/// scheduler.register(Box::new(key_rotation_task));
/// let handle = scheduler.start();
/// // later, on shutdown:
/// handle.cancel();
/// ```
#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<Box<dyn ScheduledTask>>,
    job_registry: ScheduledJobRegistry,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            job_registry: ScheduledJobRegistry::new(),
        }
    }

    /// Queue a task to be started when [`Scheduler::start`] is called.
    pub fn register(&mut self, task: Box<dyn ScheduledTask>) {
        self.tasks.push(task);
    }

    /// Access the job registry, e.g. to expose `/jobs` before the scheduler
    /// has started.
    pub fn job_registry(&self) -> ScheduledJobRegistry {
        self.job_registry.clone()
    }

    /// Spawn every registered task and return a handle that cancels all of
    /// them together.
    pub fn start(self) -> SchedulerHandle {
        let token = CancellationToken::new();
        let handle = SchedulerHandle::new(token.clone());

        for task in &self.tasks {
            self.job_registry.register(ScheduledJobInfo {
                name: task.name().to_string(),
                schedule: format_schedule(task.schedule()),
            });
        }

        tracing::info!(count = self.tasks.len(), "starting scheduled tasks");
        for task in self.tasks {
            task.start(token.clone());
        }

        handle
    }
}

/// Format a schedule config as a human-readable string.
fn format_schedule(config: &ScheduleConfig) -> String {
    match config {
        ScheduleConfig::Interval(d) => format!("every {}s", d.as_secs()),
        ScheduleConfig::IntervalWithDelay {
            interval,
            initial_delay,
        } => format!(
            "every {}s (delay {}s)",
            interval.as_secs(),
            initial_delay.as_secs()
        ),
        ScheduleConfig::Cron(expr) => format!("cron: {}", expr),
    }
}
