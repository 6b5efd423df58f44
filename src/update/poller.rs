//! Periodic background update checks.
//!
//! A [`Poller`] owns one tokio task that waits `initial_delay`, checks,
//! then checks again every `interval`. Every wait races a shutdown signal,
//! so [`Poller::stop`] takes effect immediately instead of at the next tick.
//!
//! The callback only sees successful checks that found an update. Failures
//! are logged and kept in [`Poller::last_error`] until the next success.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::update::release::{Channel, ReleaseSource, UpdateChecker, UpdateInfo};

/// Receives every update a background check reports as available.
pub type UpdateCallback = Arc<dyn Fn(UpdateInfo) + Send + Sync>;

#[derive(Debug, Default)]
struct PollerState {
    running: bool,
    /// Bumped on every start so a task from an earlier run never fires.
    generation: u64,
    channel: Channel,
    last_info: Option<UpdateInfo>,
    last_error: Option<String>,
    last_check: Option<DateTime<Utc>>,
    shutdown: Option<watch::Sender<bool>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Background update checker with explicit start/stop control.
///
/// Independent instances are fully isolated; the process-wide instance
/// lives in [`crate::update::global_poller`].
pub struct Poller<S> {
    checker: Arc<UpdateChecker<S>>,
    interval: Duration,
    initial_delay: Duration,
    state: Arc<Mutex<PollerState>>,
    /// Held while a callback runs; `stop` waits on it.
    callback_gate: Arc<Mutex<()>>,
}

impl<S: ReleaseSource + 'static> Poller<S> {
    pub fn new(checker: UpdateChecker<S>, interval: Duration, initial_delay: Duration) -> Self {
        Self {
            checker: Arc::new(checker),
            interval,
            initial_delay,
            state: Arc::new(Mutex::new(PollerState::default())),
            callback_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn checker(&self) -> &UpdateChecker<S> {
        &self.checker
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start polling. Returns `false` if already running or polling is
    /// disabled (zero interval).
    ///
    /// Must be called from within a tokio runtime. The callback must not
    /// call [`stop`](Self::stop) on the same poller.
    pub fn start(&self, callback: UpdateCallback) -> bool {
        if self.interval.is_zero() {
            info!("Update polling disabled");
            return false;
        }

        let (tx, rx) = watch::channel(false);
        let generation = {
            let mut state = lock(&self.state);
            if state.running {
                debug!("Poller already running");
                return false;
            }
            state.running = true;
            state.generation += 1;
            state.shutdown = Some(tx);
            state.generation
        };

        info!(
            interval_secs = self.interval.as_secs(),
            initial_delay_secs = self.initial_delay.as_secs(),
            "Starting update poller"
        );

        let task = PollTask {
            checker: Arc::clone(&self.checker),
            state: Arc::clone(&self.state),
            callback_gate: Arc::clone(&self.callback_gate),
            callback,
            generation,
            interval: self.interval,
            initial_delay: self.initial_delay,
        };
        tokio::spawn(task.run(rx));
        true
    }

    /// Stop polling. Safe to call when not running.
    ///
    /// Once this returns, the callback will not be invoked again.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.state);
            if !state.running {
                return;
            }
            state.running = false;
            if let Some(tx) = state.shutdown.take() {
                let _ = tx.send(true);
            }
        }
        // Wait out a callback that passed its running check before we flipped the flag.
        drop(lock(&self.callback_gate));
        info!("Stopped update poller");
    }

    /// Channel used by the next check.
    pub fn set_channel(&self, channel: Channel) {
        lock(&self.state).channel = channel;
    }

    pub fn channel(&self) -> Channel {
        lock(&self.state).channel
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    /// Result of the most recent successful check.
    pub fn last_info(&self) -> Option<UpdateInfo> {
        lock(&self.state).last_info.clone()
    }

    /// Error of the most recent check, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.state).last_error.clone()
    }

    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        lock(&self.state).last_check
    }

    /// Run one check right away on the current channel and record its outcome.
    pub async fn check_now(&self) -> Result<UpdateInfo> {
        let channel = self.channel();
        let outcome = self.checker.check_for_updates_on(channel).await;
        record_outcome(&mut lock(&self.state), &outcome);
        outcome
    }
}

fn record_outcome(state: &mut PollerState, outcome: &Result<UpdateInfo>) {
    state.last_check = Some(Utc::now());
    match outcome {
        Ok(info) => {
            state.last_info = Some(info.clone());
            state.last_error = None;
        }
        Err(e) => {
            warn!(error = %format!("{e:#}"), "Update check failed");
            state.last_error = Some(format!("{e:#}"));
        }
    }
}

struct PollTask<S> {
    checker: Arc<UpdateChecker<S>>,
    state: Arc<Mutex<PollerState>>,
    callback_gate: Arc<Mutex<()>>,
    callback: UpdateCallback,
    generation: u64,
    interval: Duration,
    initial_delay: Duration,
}

impl<S: ReleaseSource> PollTask<S> {
    fn is_current(&self, state: &PollerState) -> bool {
        state.running && state.generation == self.generation
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if !sleep_or_shutdown(self.initial_delay, &mut shutdown).await {
            return;
        }

        loop {
            let channel = {
                let state = lock(&self.state);
                if !self.is_current(&state) {
                    return;
                }
                state.channel
            };

            debug!(%channel, "Running scheduled update check");
            let outcome = self.checker.check_for_updates_on(channel).await;

            let available = {
                let mut state = lock(&self.state);
                if !self.is_current(&state) {
                    return;
                }
                record_outcome(&mut state, &outcome);
                outcome.ok().filter(|info| info.available)
            };

            if let Some(info) = available {
                let _gate = lock(&self.callback_gate);
                if self.is_current(&lock(&self.state)) {
                    (self.callback)(info);
                } else {
                    return;
                }
            }

            if !sleep_or_shutdown(self.interval, &mut shutdown).await {
                return;
            }
        }
    }
}

/// Sleep for `duration`; `false` if shutdown was signalled first.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        () = tokio::time::sleep(duration) => true,
        _ = shutdown.changed() => false,
    }
}
