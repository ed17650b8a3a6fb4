//! # Scheduler
//!
//! Runs the three periodic tasks as independent tokio tasks.
//!
//! | Task | Default period | First run |
//! |------|----------------|-----------|
//! | fast poll | 500 ms | immediately |
//! | autosave | 60 s | after one period |
//! | event sync | 30 s | after one period |
//!
//! A failed tick is logged and the loop carries on. Ticks that fall behind
//! are skipped rather than bunched up. Every loop stops at its next
//! suspension point once the shutdown flag is raised; a tick in progress
//! is allowed to finish.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::telemetry::qos::RollingCounters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    FastPoll,
    Autosave,
    EventSync,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::FastPoll => "fast-poll",
            TaskKind::Autosave => "autosave",
            TaskKind::EventSync => "event-sync",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one periodic task
///
/// `Succeeded` and `Failed` hold until the next tick starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Succeeded,
    Failed(String),
    Stopped,
}

/// Periods of the scheduled tasks
#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub fast_poll: Duration,
    pub autosave: Duration,
    pub event_sync: Duration,
    pub event_sync_enabled: bool,
}

impl ScheduleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fast_poll: Duration::from_millis(config.schedule.fast_poll_interval_ms),
            autosave: Duration::from_millis(config.schedule.autosave_interval_ms),
            event_sync: Duration::from_millis(config.schedule.event_sync_interval_ms),
            event_sync_enabled: config.detection.enabled,
        }
    }
}

/// One unit of periodic work
#[async_trait]
trait PeriodicTask: Send {
    async fn run_once(&mut self) -> Result<()>;
}

/// Owns the rolling counters; the only writer of them
struct FastPoll {
    pipeline: Arc<Pipeline>,
    counters: RollingCounters,
}

#[async_trait]
impl PeriodicTask for FastPoll {
    async fn run_once(&mut self) -> Result<()> {
        let read = self.pipeline.fast_poll_tick(&mut self.counters).await?;
        trace!(source = ?read.source(), "Fast poll complete");
        Ok(())
    }
}

struct Autosave {
    pipeline: Arc<Pipeline>,
}

#[async_trait]
impl PeriodicTask for Autosave {
    async fn run_once(&mut self) -> Result<()> {
        self.pipeline.autosave_tick().await?;
        Ok(())
    }
}

struct EventSync {
    pipeline: Arc<Pipeline>,
}

#[async_trait]
impl PeriodicTask for EventSync {
    async fn run_once(&mut self) -> Result<()> {
        let outcome = self.pipeline.event_sync_tick().await?;
        debug!("Event sync outcome: {:?}", outcome);
        Ok(())
    }
}

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    settings: ScheduleSettings,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, settings: ScheduleSettings) -> Self {
        Self { pipeline, settings }
    }

    /// Spawn every enabled loop onto the current runtime
    ///
    /// # Arguments
    ///
    /// * `shutdown` - Loops exit once this flips to `true` or its sender is
    ///   dropped
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> SchedulerHandle {
        let mut handle = SchedulerHandle::default();

        handle.start(
            TaskKind::FastPoll,
            self.settings.fast_poll,
            false,
            FastPoll {
                pipeline: Arc::clone(&self.pipeline),
                counters: RollingCounters::new(),
            },
            shutdown.clone(),
        );

        handle.start(
            TaskKind::Autosave,
            self.settings.autosave,
            true,
            Autosave {
                pipeline: Arc::clone(&self.pipeline),
            },
            shutdown.clone(),
        );

        if self.settings.event_sync_enabled {
            handle.start(
                TaskKind::EventSync,
                self.settings.event_sync,
                true,
                EventSync {
                    pipeline: Arc::clone(&self.pipeline),
                },
                shutdown,
            );
        } else {
            info!("Event sync disabled");
        }

        handle
    }
}

/// Join handles and state feeds of the running loops
#[derive(Default)]
pub struct SchedulerHandle {
    tasks: Vec<(TaskKind, JoinHandle<()>)>,
    states: HashMap<TaskKind, watch::Receiver<TaskState>>,
}

impl SchedulerHandle {
    fn start<T>(&mut self, kind: TaskKind, period: Duration, delay_first: bool, task: T, shutdown: watch::Receiver<bool>)
    where
        T: PeriodicTask + 'static,
    {
        let (state_tx, state_rx) = watch::channel(TaskState::Idle);
        info!("Starting {} task every {} ms", kind, period.as_millis());

        let join = tokio::spawn(run_loop(kind, period, delay_first, task, shutdown, state_tx));
        self.tasks.push((kind, join));
        self.states.insert(kind, state_rx);
    }

    /// Current state of a task; `None` if it was never started
    pub fn state(&self, kind: TaskKind) -> Option<TaskState> {
        self.states.get(&kind).map(|rx| rx.borrow().clone())
    }

    pub fn subscribe(&self, kind: TaskKind) -> Option<watch::Receiver<TaskState>> {
        self.states.get(&kind).cloned()
    }

    pub fn running(&self) -> Vec<TaskKind> {
        self.tasks.iter().map(|(kind, _)| *kind).collect()
    }

    /// Wait for every loop to exit
    pub async fn join(self) {
        for (kind, join) in self.tasks {
            if let Err(e) = join.await {
                warn!("{} task ended abnormally: {}", kind, e);
            }
        }
    }
}

/// Resolves once shutdown is requested or the flag's sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn run_loop<T: PeriodicTask>(
    kind: TaskKind,
    period: Duration,
    delay_first: bool,
    mut task: T,
    mut shutdown: watch::Receiver<bool>,
    state: watch::Sender<TaskState>,
) {
    let start = if delay_first { Instant::now() + period } else { Instant::now() };
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_requested(&mut shutdown) => break,

            _ = ticker.tick() => {
                state.send_replace(TaskState::Running);
                match task.run_once().await {
                    Ok(()) => {
                        state.send_replace(TaskState::Succeeded);
                    }
                    Err(e) => {
                        warn!("{} tick failed: {}", kind, e);
                        state.send_replace(TaskState::Failed(e.to_string()));
                    }
                }
            }
        }
    }

    state.send_replace(TaskState::Stopped);
    info!("{} task stopped", kind);
}
