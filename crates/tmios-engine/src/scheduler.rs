/*!
 * Interval scheduling.
 *
 * Device models only describe their periodic tasks. The
 * [`IntervalScheduler`] runs them: one tokio task per device interval, ticking
 * at the declared period, skipping ticks missed while a run was still going,
 * and bounding each run with the configured timeout.
 */
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

use tmios_core::config::SchedulerConfig;
use tmios_core::error::Error as CoreError;
use tmios_core::logging::component_span;
use tmios_core::types::Id;
use tmios_core::utils::{millis_to_bound, with_timeout};
use tmios_devices::model::IntervalTask;
use tmios_devices::Device;

use crate::error::{Error, Result};

/// Runs the interval tasks of scheduled devices
#[derive(Debug)]
pub struct IntervalScheduler {
    config: SchedulerConfig,
    tasks: Mutex<HashMap<Id, Vec<JoinHandle<()>>>>,
}

impl IntervalScheduler {
    /// Create a scheduler
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn tasks(&self) -> Result<MutexGuard<'_, HashMap<Id, Vec<JoinHandle<()>>>>> {
        self.tasks
            .lock()
            .map_err(|_| Error::scheduler("task table lock poisoned"))
    }

    /// Start every interval task of `device`, keyed by its point of
    /// measurement
    ///
    /// Returns the number of tasks started. Must be called from within a
    /// tokio runtime.
    pub fn schedule_device(&self, device: Arc<dyn Device>) -> Result<usize> {
        let id = device.pom().id.clone();
        let model = device.meta().model().to_string();

        if !self.config.enabled {
            debug!(model = %model, pom = %id, "Interval scheduling disabled");
            return Ok(0);
        }

        let min_period = Duration::from_secs(self.config.min_period_secs);
        if let Some(task) = device.meta().intervals().iter().find(|t| t.period() < min_period) {
            return Err(Error::Scheduler(format!(
                "interval '{}' of model '{}' runs every {:?}, below the {:?} minimum",
                task.name(),
                model,
                task.period(),
                min_period
            )));
        }

        let mut tasks = self.tasks()?;
        if tasks.contains_key(&id) {
            return Err(Error::Scheduler(format!("device '{}' is already scheduled", id)));
        }

        let bound = millis_to_bound(self.config.task_timeout_ms);
        let handles: Vec<_> = device
            .meta()
            .intervals()
            .iter()
            .map(|task| {
                let span = component_span(&model, Some(id.as_str()));
                tokio::spawn(run_interval(device.clone(), task.clone(), bound).instrument(span))
            })
            .collect();

        let started = handles.len();
        tasks.insert(id.clone(), handles);
        info!(model = %model, pom = %id, intervals = started, "Scheduled device");
        Ok(started)
    }

    /// Stop every interval task of the device at `id`
    ///
    /// Returns whether the device was scheduled.
    pub fn stop_device(&self, id: &Id) -> Result<bool> {
        let Some(handles) = self.tasks()?.remove(id) else {
            return Ok(false);
        };
        for handle in handles {
            handle.abort();
        }
        debug!(pom = %id, "Stopped device intervals");
        Ok(true)
    }

    /// Whether the device at `id` is scheduled
    pub fn is_scheduled(&self, id: &Id) -> Result<bool> {
        Ok(self.tasks()?.contains_key(id))
    }

    /// Number of scheduled devices
    pub fn scheduled_devices(&self) -> Result<usize> {
        Ok(self.tasks()?.len())
    }

    /// Stop every task
    pub fn shutdown(&self) -> Result<()> {
        let mut tasks = self.tasks()?;
        let count = tasks.len();
        for (_, handles) in tasks.drain() {
            for handle in handles {
                handle.abort();
            }
        }
        info!(devices = count, "Interval scheduler shut down");
        Ok(())
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for handle in tasks.values().flatten() {
                handle.abort();
            }
        }
    }
}

async fn run_interval(device: Arc<dyn Device>, task: IntervalTask, bound: Option<Duration>) {
    let mut ticker = time::interval_at(Instant::now() + task.period(), task.period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let run = async {
            task.run(device.clone())
                .await
                .map_err(|e| CoreError::runtime(format!("{:#}", e)))
        };
        let outcome = match bound {
            Some(bound) => with_timeout(bound, run).await,
            None => run.await,
        };

        match outcome {
            Ok(()) => debug!(
                model = device.meta().model(),
                pom = %device.pom().id,
                interval = task.name(),
                "Interval task ran"
            ),
            Err(e) => warn!(
                model = device.meta().model(),
                pom = %device.pom().id,
                interval = task.name(),
                error = %e,
                "Interval task failed"
            ),
        }
    }
}
