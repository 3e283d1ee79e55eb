//! Background task registry with cooperative shutdown.
//!
//! Every spawned task is tracked under a key so shutdown can wait for the
//! lot within a grace period, then abort whatever is still running. Tasks
//! observe shutdown through a [`CancelSignal`] cloned from the scheduler.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::types::RagError;

/// Clonable handle a task polls (or awaits) to learn shutdown was requested.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested. Usable inside `select!`.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        // A closed channel means the scheduler is gone; treat as cancelled.
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

pub struct TaskScheduler {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    grace: Duration,
}

impl TaskScheduler {
    pub fn new(grace: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            tasks: Mutex::new(HashMap::new()),
            shutdown,
            grace,
        }
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.shutdown.subscribe(),
        }
    }

    /// Number of tasks that have been spawned and not yet observed finished.
    pub fn active_tasks(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, handle| !handle.is_finished());
        tasks.len()
    }

    /// Spawns `work` under `key`. The task's error, if any, is logged; a key
    /// collision replaces a finished task but leaves a running one alone and
    /// skips the spawn.
    pub fn fire_and_forget<F>(&self, key: impl Into<String>, work: F)
    where
        F: Future<Output = Result<(), RagError>> + Send + 'static,
    {
        let key = key.into();
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, handle| !handle.is_finished());
        if tasks.contains_key(&key) {
            debug!(%key, "task already running, skipping spawn");
            return;
        }

        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = work.await {
                warn!(key = %task_key, error = %err, "background task failed");
            }
        });
        tasks.insert(key, handle);
    }

    /// Spawns a periodic task under `key`. The first tick fires immediately;
    /// a failing tick is logged and the loop continues. The loop exits when
    /// shutdown is requested.
    pub fn spawn_poller<F, Fut>(&self, key: impl Into<String>, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), RagError>> + Send,
    {
        let cancel = self.cancel_signal();
        let key = key.into();
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(key = %task_key, "poller stopping");
                        return;
                    }
                    _ = interval.tick() => {
                        if let Err(err) = tick().await {
                            warn!(key = %task_key, error = %err, "poll tick failed");
                        }
                    }
                }
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|_, existing| !existing.is_finished());
        if let Some(previous) = tasks.insert(key, handle) {
            previous.abort();
        }
    }

    /// Signals shutdown and waits up to the grace period for tracked tasks,
    /// aborting any that outlive it. Returns the number aborted.
    pub async fn shutdown(&self) -> usize {
        let _ = self.shutdown.send(true);
        let handles: Vec<(String, JoinHandle<()>)> = self.tasks.lock().drain().collect();

        let deadline = Instant::now() + self.grace;
        let mut aborted = 0usize;
        for (key, mut handle) in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(%key, "task exceeded shutdown grace, aborting");
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        aborted
    }
}
