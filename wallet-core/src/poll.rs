//! Cancellable fixed-interval polling.
//!
//! A [`PollTimer`] owns at most one running schedule. Starting a new schedule
//! stops the previous one first, and every schedule is stamped with a
//! generation number taken from a counter that only grows. Stopping bumps the
//! counter, so a response that was in flight when the schedule was cancelled
//! can be recognised as stale with [`PollTimer::is_current`] and dropped.
//!
//! Cancellation is cooperative: an action that is already awaiting a request
//! runs to completion, and the loop exits before the next tick.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// `tokio::time::interval` rejects a zero period.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Identifies one schedule started on a [`PollTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollHandle {
    generation: u64,
}

impl PollHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Returned by a poll action to keep or end its schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollControl {
    Continue,
    Stop,
}

struct ActivePoll {
    handle: PollHandle,
    cancel: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

struct Shared {
    name: &'static str,
    generation: AtomicU64,
    active: Mutex<Option<ActivePoll>>,
}

impl Shared {
    fn release(&self, handle: PollHandle) {
        let mut slot = self.active.lock();
        if slot.as_ref().map(|active| active.handle) == Some(handle) {
            *slot = None;
        }
    }
}

pub struct PollTimer {
    shared: Arc<Shared>,
}

impl PollTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                generation: AtomicU64::new(0),
                active: Mutex::new(None),
            }),
        }
    }

    /// Run `action` every `interval`, first one interval from now.
    ///
    /// Any schedule already running on this timer is stopped first. Ticks
    /// never overlap: the next tick is only awaited once the action's future
    /// has resolved, and ticks missed meanwhile are delayed rather than
    /// replayed. Intervals shorter than [`MIN_INTERVAL`] are raised to it.
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&self, interval: Duration, mut action: F) -> PollHandle
    where
        F: FnMut(PollHandle) -> Fut + Send + 'static,
        Fut: Future<Output = PollControl> + Send + 'static,
    {
        let interval = interval.max(MIN_INTERVAL);
        let mut slot = self.shared.active.lock();
        if let Some(prior) = slot.take() {
            log::debug!(
                "{}: replacing schedule #{}",
                self.shared.name,
                prior.handle.generation
            );
            let _ = prior.cancel.send(true);
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = PollHandle { generation };
        let (cancel, mut cancelled) = watch::channel(false);
        let shared = Arc::clone(&self.shared);

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.changed() => break,
                    _ = ticker.tick() => {}
                }
                if shared.generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                if action(handle).await == PollControl::Stop {
                    break;
                }
            }
            shared.release(handle);
            log::trace!("{}: schedule #{} finished", shared.name, generation);
        });

        *slot = Some(ActivePoll {
            handle,
            cancel,
            _task: task,
        });
        log::debug!(
            "{}: schedule #{} started every {:?}",
            self.shared.name,
            generation,
            interval
        );
        handle
    }

    /// Cancel the schedule identified by `handle`.
    ///
    /// Stopping a handle that already finished, was replaced, or was stopped
    /// before is a no-op. Returns whether a running schedule was cancelled.
    pub fn stop(&self, handle: PollHandle) -> bool {
        let mut slot = self.shared.active.lock();
        match slot.as_ref() {
            Some(active) if active.handle == handle => {
                self.shared.generation.fetch_add(1, Ordering::SeqCst);
                if let Some(active) = slot.take() {
                    let _ = active.cancel.send(true);
                }
                log::debug!("{}: schedule #{} stopped", self.shared.name, handle.generation);
                true
            }
            _ => false,
        }
    }

    /// Cancel whatever schedule is running, if any.
    pub fn stop_active(&self) -> bool {
        let active = self.active_handle();
        match active {
            Some(handle) => self.stop(handle),
            None => false,
        }
    }

    pub fn active_handle(&self) -> Option<PollHandle> {
        self.shared.active.lock().as_ref().map(|active| active.handle)
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.lock().is_some()
    }

    /// Whether a result produced under `handle` may still be applied.
    pub fn is_current(&self, handle: PollHandle) -> bool {
        self.shared.generation.load(Ordering::SeqCst) == handle.generation
    }

    pub fn current_generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.stop_active();
    }
}

impl std::fmt::Debug for PollTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollTimer")
            .field("name", &self.shared.name)
            .field("generation", &self.current_generation())
            .field("active", &self.active_handle())
            .finish()
    }
}
