//! Reactor thread and dispatch queue
//!
//! The `EventLoop` owns a single-threaded tokio runtime running on a dedicated
//! thread. Any thread may `dispatch` a callback or `spawn` a future onto it;
//! the queue preserves FIFO order per submitting thread. Panics raised by
//! dispatched work are logged and never cross the dispatch boundary.

use futures::FutureExt;
use parking_lot::Mutex;
use sockrt_core::{LoopConfig, RuntimeError, RuntimeResult};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// Work queued onto the reactor thread
pub type LoopCallback = Box<dyn FnOnce() + Send + 'static>;

enum LoopCommand {
    Dispatch(LoopCallback),
    Stop,
}

// ----------------------------------------------------------------------------
// Event Loop
// ----------------------------------------------------------------------------

/// Handle to the reactor thread; clones share the same loop
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<LoopInner>,
}

struct LoopInner {
    config: LoopConfig,
    queue: Mutex<Option<LoopQueue>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: Mutex<Option<ThreadId>>,
    running: AtomicBool,
    stats: LoopStats,
}

struct LoopQueue {
    sender: mpsc::UnboundedSender<LoopCommand>,
    receiver: Option<mpsc::UnboundedReceiver<LoopCommand>>,
}

/// Counters describing loop activity
#[derive(Debug, Default)]
pub struct LoopStats {
    pub dispatched: AtomicU64,
    pub executed: AtomicU64,
    pub panicked: AtomicU64,
}

impl EventLoop {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            inner: Arc::new(LoopInner {
                config,
                queue: Mutex::new(None),
                thread: Mutex::new(None),
                thread_id: Mutex::new(None),
                running: AtomicBool::new(false),
                stats: LoopStats::default(),
            }),
        }
    }

    /// Create the dispatch queue; calling it again is a no-op
    pub fn init(&self) {
        let mut queue = self.inner.queue.lock();
        if queue.is_none() {
            let (sender, receiver) = mpsc::unbounded_channel();
            *queue = Some(LoopQueue {
                sender,
                receiver: Some(receiver),
            });
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// True when called from the reactor thread
    pub fn is_loop_thread(&self) -> bool {
        *self.inner.thread_id.lock() == Some(std::thread::current().id())
    }

    pub fn thread_id(&self) -> Option<ThreadId> {
        *self.inner.thread_id.lock()
    }

    pub fn stats(&self) -> &LoopStats {
        &self.inner.stats
    }

    /// Spawn the reactor thread if it is not already running
    ///
    /// Returns once the reactor is ready to accept work. A reactor that cannot
    /// be created is reported as `RuntimeError::LoopInit`.
    pub fn start(&self) -> RuntimeResult<()> {
        self.init();

        let mut thread = self.inner.thread.lock();
        if self.is_running() {
            return Ok(());
        }

        let receiver = self
            .inner
            .queue
            .lock()
            .as_mut()
            .and_then(|queue| queue.receiver.take())
            .ok_or_else(|| RuntimeError::loop_init("dispatch queue already consumed"))?;

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<RuntimeResult<()>>();
        let inner = Arc::clone(&self.inner);

        let handle = std::thread::Builder::new()
            .name(self.inner.config.thread_name.clone())
            .spawn(move || run_reactor(inner, receiver, ready_tx))
            .map_err(|e| RuntimeError::loop_init(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *thread = Some(handle);
                info!("Event loop started");
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(RuntimeError::loop_init("reactor thread exited during startup"))
            }
        }
    }

    /// Request shutdown and join the reactor thread
    pub fn stop(&self) {
        let sender = self
            .inner
            .queue
            .lock()
            .take()
            .map(|queue| queue.sender);

        if let Some(sender) = sender {
            let _ = sender.send(LoopCommand::Stop);
        }

        if self.is_loop_thread() {
            // joining ourselves would deadlock; the loop exits after this callback
            return;
        }

        if let Some(handle) = self.inner.thread.lock().take() {
            if handle.join().is_err() {
                error!("Event loop thread panicked during shutdown");
            }
            info!("Event loop stopped");
        }
    }

    /// Queue `callback` for the reactor thread, starting the loop if needed
    ///
    /// Returns once the callback is enqueued, not once it has run.
    pub fn dispatch<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.init();

        let sent = self
            .inner
            .queue
            .lock()
            .as_ref()
            .map(|queue| queue.sender.send(LoopCommand::Dispatch(Box::new(callback))).is_ok())
            .unwrap_or(false);

        if !sent {
            error!("Failed to enqueue callback onto event loop");
            return;
        }

        self.inner.stats.dispatched.fetch_add(1, Ordering::Relaxed);

        if !self.is_running() {
            if let Err(e) = self.start() {
                error!("Failed to start event loop: {}", e);
            }
        }
    }

    /// Run `future` to completion on the reactor thread
    ///
    /// The returned receiver yields the output; it errors if the future
    /// panicked or the loop stopped first.
    pub fn spawn<F, T>(&self, future: F) -> oneshot::Receiver<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.dispatch(move || {
            tokio::spawn(async move {
                match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(output) => {
                        let _ = tx.send(output);
                    }
                    Err(panic) => error!("Loop task panicked: {}", panic_message(&panic)),
                }
            });
        });
        rx
    }

    /// Block the caller for `ms` milliseconds, never less than the poll timeout
    pub fn sleep(&self, ms: u64) {
        if ms == 0 {
            return;
        }
        let timeout = self.inner.config.poll_timeout_ms;
        std::thread::sleep(Duration::from_millis(ms.max(timeout)));
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new(LoopConfig::default())
    }
}

// ----------------------------------------------------------------------------
// Reactor Thread
// ----------------------------------------------------------------------------

fn run_reactor(
    inner: Arc<LoopInner>,
    mut receiver: mpsc::UnboundedReceiver<LoopCommand>,
    ready: std::sync::mpsc::Sender<RuntimeResult<()>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(RuntimeError::loop_init(e.to_string())));
            return;
        }
    };

    *inner.thread_id.lock() = Some(std::thread::current().id());
    inner.running.store(true, Ordering::Release);
    let _ = ready.send(Ok(()));

    runtime.block_on(async {
        while let Some(command) = receiver.recv().await {
            match command {
                LoopCommand::Dispatch(callback) => {
                    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(callback)) {
                        inner.stats.panicked.fetch_add(1, Ordering::Relaxed);
                        error!("Dispatched callback panicked: {}", panic_message(&panic));
                    }
                    inner.stats.executed.fetch_add(1, Ordering::Relaxed);
                    // let spawned tasks make progress between queued callbacks
                    tokio::task::yield_now().await;
                }
                LoopCommand::Stop => {
                    debug!("Event loop received stop");
                    break;
                }
            }
        }
    });

    drop(runtime);
    inner.running.store(false, Ordering::Release);
    *inner.thread_id.lock() = None;
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn create_test_loop() -> EventLoop {
        EventLoop::new(LoopConfig {
            poll_timeout_ms: 4,
            thread_name: "sockrt-loop-test".to_string(),
        })
    }

    #[test]
    fn test_dispatch_starts_loop_and_runs_on_loop_thread() {
        let event_loop = create_test_loop();
        assert!(!event_loop.is_running());

        let (tx, rx) = std::sync::mpsc::channel();
        let handle = event_loop.clone();
        event_loop.dispatch(move || {
            tx.send((std::thread::current().id(), handle.is_loop_thread())).unwrap();
        });

        let (thread_id, on_loop) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(on_loop);
        assert_ne!(thread_id, std::thread::current().id());
        assert!(event_loop.is_running());
        event_loop.stop();
        assert!(!event_loop.is_running());
    }

    #[test]
    fn test_dispatch_preserves_fifo_order() {
        let event_loop = create_test_loop();
        let (tx, rx) = std::sync::mpsc::channel();
        for i in 0..32 {
            let tx = tx.clone();
            event_loop.dispatch(move || tx.send(i).unwrap());
        }

        let received: Vec<i32> = (0..32)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(received, (0..32).collect::<Vec<_>>());
        event_loop.stop();
    }

    #[test]
    fn test_panicking_callback_does_not_kill_loop() {
        let event_loop = create_test_loop();
        event_loop.start().unwrap();
        event_loop.dispatch(|| panic!("boom"));

        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = std::sync::mpsc::channel();
        let c = Arc::clone(&counter);
        event_loop.dispatch(move || {
            c.fetch_add(1, Ordering::SeqCst);
            tx.send(()).unwrap();
        });

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(event_loop.stats().panicked.load(Ordering::SeqCst), 1);
        event_loop.stop();
    }

    #[test]
    fn test_start_is_idempotent_and_restartable() {
        let event_loop = create_test_loop();
        event_loop.start().unwrap();
        let first = event_loop.thread_id();
        event_loop.start().unwrap();
        assert_eq!(event_loop.thread_id(), first);
        event_loop.stop();

        event_loop.start().unwrap();
        assert!(event_loop.is_running());
        event_loop.stop();
    }

    #[tokio::test]
    async fn test_spawn_returns_future_output() {
        let event_loop = create_test_loop();
        let rx = event_loop.spawn(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            21 * 2
        });
        assert_eq!(rx.await.unwrap(), 42);
        event_loop.stop();
    }
}
