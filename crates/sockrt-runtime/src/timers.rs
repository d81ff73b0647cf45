//! Timers scheduled on the reactor
//!
//! `Timers` holds named one-shot or repeating callbacks. `start` and `stop`
//! act on every registered timer at once, which lets the runtime suspend all
//! timer-driven background work (payload expiry, descriptor GC) together.

use crate::event_loop::EventLoop;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::debug;

/// Callback invoked on the reactor thread when a timer fires
pub type TimerCallback = Arc<dyn Fn() + Send + Sync + 'static>;

// ----------------------------------------------------------------------------
// Timer
// ----------------------------------------------------------------------------

/// A timer definition
#[derive(Clone)]
pub struct Timer {
    /// Delay before the first invocation
    pub timeout: Duration,
    /// Delay between repeated invocations
    pub interval: Duration,
    pub repeated: bool,
    pub invoke: TimerCallback,
}

impl Timer {
    /// Fire once after `timeout`
    pub fn once<F>(timeout: Duration, invoke: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            timeout,
            interval: timeout,
            repeated: false,
            invoke: Arc::new(invoke),
        }
    }

    /// Fire every `interval`, starting after one interval
    pub fn repeating<F>(interval: Duration, invoke: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            timeout: interval,
            interval,
            repeated: true,
            invoke: Arc::new(invoke),
        }
    }
}

struct TimerEntry {
    name: String,
    timer: Timer,
    started: bool,
    generation: u64,
    task: Option<AbortHandle>,
}

// ----------------------------------------------------------------------------
// Timers
// ----------------------------------------------------------------------------

/// Registry of timers bound to one event loop
#[derive(Clone)]
pub struct Timers {
    event_loop: EventLoop,
    entries: Arc<Mutex<Vec<TimerEntry>>>,
}

impl Timers {
    pub fn new(event_loop: EventLoop) -> Self {
        Self {
            event_loop,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a timer; a timer with the same name is replaced
    pub fn add<N: Into<String>>(&self, name: N, timer: Timer) {
        let name = name.into();
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.iter_mut().find(|e| e.name == name) {
            if let Some(task) = existing.task.take() {
                task.abort();
            }
            existing.timer = timer;
            existing.started = false;
            existing.generation += 1;
            return;
        }

        entries.push(TimerEntry {
            name,
            timer,
            started: false,
            generation: 0,
            task: None,
        });
    }

    /// Start every timer, restarting those already running
    pub fn start(&self) {
        let mut entries = self.entries.lock();
        for entry in entries.iter_mut() {
            if let Some(task) = entry.task.take() {
                task.abort();
            }
            entry.started = true;
            entry.generation += 1;
            self.schedule(entry.name.clone(), entry.generation, entry.timer.clone());
        }
    }

    /// Stop every timer
    pub fn stop(&self) {
        let mut entries = self.entries.lock();
        for entry in entries.iter_mut() {
            if let Some(task) = entry.task.take() {
                task.abort();
            }
            entry.started = false;
            entry.generation += 1;
        }
        debug!("Stopped {} timers", entries.len());
    }

    pub fn is_started(&self, name: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|entry| entry.name == name && entry.started)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn schedule(&self, name: String, generation: u64, timer: Timer) {
        let entries = Arc::clone(&self.entries);
        self.event_loop.dispatch(move || {
            let mut guard = entries.lock();
            let Some(entry) = guard.iter_mut().find(|e| e.name == name) else {
                return;
            };

            // a stop or restart landed before this callback ran
            if !entry.started || entry.generation != generation {
                return;
            }

            let task = tokio::spawn(async move {
                tokio::time::sleep(timer.timeout).await;
                (timer.invoke)();

                if timer.repeated {
                    let period = if timer.interval.is_zero() {
                        timer.timeout
                    } else {
                        timer.interval
                    };
                    let mut ticker = tokio::time::interval_at(
                        tokio::time::Instant::now() + period,
                        period,
                    );
                    loop {
                        ticker.tick().await;
                        (timer.invoke)();
                    }
                }
            });

            entry.task = Some(task.abort_handle());
        });
    }
}
