use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// How often a scheduled task runs.
#[derive(Clone, Debug)]
pub enum ScheduleConfig {
    /// Fire immediately, then every `Duration`.
    Interval(Duration),
    /// Wait `initial_delay` before the first tick, then fire every `interval`.
    IntervalWithDelay {
        interval: Duration,
        initial_delay: Duration,
    },
    /// Standard six-field cron expression (seconds precision).
    Cron(String),
}

/// A scheduled task definition carrying its own state.
///
/// `state` is cloned for every execution, so cheaply-cloneable shared state
/// (e.g. `Arc<...>`) is the expected shape.
pub struct ScheduledTaskDef<T> {
    pub name: String,
    pub schedule: ScheduleConfig,
    pub state: T,
    pub task: Box<dyn Fn(T) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>,
}

/// Object-safe handle to a scheduled task, used once its concrete state type
/// has been erased behind `Box<dyn Any + Send>`.
pub trait ScheduledTask: Send {
    fn name(&self) -> &str;
    fn schedule(&self) -> &ScheduleConfig;
    /// Spawn the task's execution loop on the current runtime. Returns
    /// immediately; the loop runs until `token` is cancelled.
    fn start(self: Box<Self>, token: CancellationToken);
}

impl<T: Clone + Send + Sync + 'static> ScheduledTask for ScheduledTaskDef<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self) -> &ScheduleConfig {
        &self.schedule
    }

    fn start(self: Box<Self>, token: CancellationToken) {
        let ScheduledTaskDef {
            name,
            schedule,
            state,
            task,
        } = *self;

        match schedule {
            ScheduleConfig::Interval(period) => {
                tokio::spawn(run_interval(name, state, task, period, None, token));
            }
            ScheduleConfig::IntervalWithDelay {
                interval,
                initial_delay,
            } => {
                tokio::spawn(run_interval(
                    name,
                    state,
                    task,
                    interval,
                    Some(initial_delay),
                    token,
                ));
            }
            ScheduleConfig::Cron(expr) => {
                tokio::spawn(run_cron(name, state, task, expr, token));
            }
        }
    }
}

type TaskFn<T> = Box<dyn Fn(T) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

async fn run_interval<T: Clone + Send + Sync + 'static>(
    name: String,
    state: T,
    task: TaskFn<T>,
    period: Duration,
    initial_delay: Option<Duration>,
    token: CancellationToken,
) {
    if let Some(delay) = initial_delay {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = token.cancelled() => return,
        }
    }

    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                task(state.clone()).await;
            }
            _ = token.cancelled() => {
                warn!(task = %name, "scheduled task cancelled");
                return;
            }
        }
    }
}

async fn run_cron<T: Clone + Send + Sync + 'static>(
    name: String,
    state: T,
    task: TaskFn<T>,
    expr: String,
    token: CancellationToken,
) {
    let schedule = match cron::Schedule::from_str(&expr) {
        Ok(s) => s,
        Err(e) => {
            error!(task = %name, cron = %expr, error = %e, "invalid cron expression, task will never run");
            return;
        }
    };

    loop {
        let now = Utc::now();
        let Some(next) = schedule.after(&now).next() else {
            error!(task = %name, "cron schedule has no future occurrences");
            return;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                task(state.clone()).await;
            }
            _ = token.cancelled() => {
                warn!(task = %name, "scheduled cron task cancelled");
                return;
            }
        }
    }
}

/// Recover `Box<dyn ScheduledTask>` instances from type-erased registrations,
/// silently dropping anything that wasn't actually a boxed `ScheduledTask`.
pub fn extract_tasks(boxed: Vec<Box<dyn Any + Send>>) -> Vec<Box<dyn ScheduledTask>> {
    boxed
        .into_iter()
        .filter_map(|b| b.downcast::<Box<dyn ScheduledTask>>().ok())
        .map(|b| *b)
        .collect()
}

/// Lets scheduled task closures return either `()` or a `Result`, logging
/// failures instead of requiring every task body to handle its own errors.
pub trait ScheduledResult {
    fn log_if_err(&self, task_name: &str);
}

impl ScheduledResult for () {
    fn log_if_err(&self, _task_name: &str) {}
}

impl<E: Display> ScheduledResult for Result<(), E> {
    fn log_if_err(&self, task_name: &str) {
        if let Err(e) = self {
            error!(task = %task_name, error = %e, "scheduled task failed");
        }
    }
}
