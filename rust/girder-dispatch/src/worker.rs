//! Single worker thread with a start / wait-for-work / handle-one / exit
//! lifecycle.
//!
//! The mutex and condvar are shared with whoever produces the work (see the
//! message manager), so producer notifications and handler wakeups stay
//! coordinated. One shared state can drive any number of workers; each
//! worker still has its own running flag and join handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

/// Lifecycle hooks for a worker thread.
///
/// `message_available` and `take_message` run with the shared state lock
/// held; `on_message` runs outside it and must not panic.
pub trait Worker: Send + 'static {
    type State: Send + 'static;
    type Message: Send + 'static;

    fn on_start(&mut self) {}
    fn message_available(&mut self, state: &mut Self::State) -> bool;
    /// Only called after `message_available` returned true under the same
    /// lock acquisition.
    fn take_message(&mut self, state: &mut Self::State) -> Self::Message;
    fn on_message(&mut self, message: Self::Message);
    fn on_exit(&mut self) {}
}

/// State and condvar shared between producers and the workers draining them.
pub struct WorkerShared<S> {
    state: Mutex<S>,
    work_available: Condvar,
}

impl<S> WorkerShared<S> {
    pub fn new(state: S) -> Self {
        Self {
            state: Mutex::new(state),
            work_available: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wait<'a>(&self, guard: MutexGuard<'a, S>) -> MutexGuard<'a, S> {
        self.work_available
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake every thread blocked on the shared condvar — workers waiting for
    /// messages and producers waiting for queue space alike.
    pub fn notify_work(&self) {
        self.work_available.notify_all();
    }
}

/// Owns a worker thread; dropping it stops and joins the worker.
pub struct WorkerHandle<S> {
    shared: Arc<WorkerShared<S>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Start a worker on its own named thread.
pub fn spawn<W: Worker>(
    thread_name: &str,
    shared: Arc<WorkerShared<W::State>>,
    mut worker: W,
) -> std::io::Result<WorkerHandle<W::State>> {
    let running = Arc::new(AtomicBool::new(true));
    let thread = {
        let shared = Arc::clone(&shared);
        let running = Arc::clone(&running);
        std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                worker.on_start();
                loop {
                    let message = {
                        let mut state = shared.lock();
                        // A notification may have fired while we were busy
                        // outside the lock; check before waiting.
                        while !worker.message_available(&mut state)
                            && running.load(Ordering::Acquire)
                        {
                            state = shared.wait(state);
                        }
                        if !running.load(Ordering::Acquire) {
                            break;
                        }
                        worker.take_message(&mut state)
                    };
                    worker.on_message(message);
                }
                worker.on_exit();
            })?
    };
    Ok(WorkerHandle {
        shared,
        running,
        thread: Some(thread),
    })
}

impl<S> Drop for WorkerHandle<S> {
    fn drop(&mut self) {
        {
            // Flip running under the state lock so a worker between its
            // predicate check and its wait cannot miss the wakeup.
            let _state = self.shared.lock();
            self.running.store(false, Ordering::Release);
        }
        self.shared.notify_work();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("worker thread panicked before join");
            debug_assert!(false, "worker thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct Collector {
        started: Arc<AtomicBool>,
        exited: Arc<AtomicBool>,
        handled: Arc<AtomicUsize>,
    }

    impl Worker for Collector {
        type State = VecDeque<u32>;
        type Message = u32;

        fn on_start(&mut self) {
            self.started.store(true, Ordering::SeqCst);
        }

        fn message_available(&mut self, state: &mut VecDeque<u32>) -> bool {
            !state.is_empty()
        }

        fn take_message(&mut self, state: &mut VecDeque<u32>) -> u32 {
            state.pop_front().expect("message available")
        }

        fn on_message(&mut self, _message: u32) {
            self.handled.fetch_add(1, Ordering::SeqCst);
        }

        fn on_exit(&mut self) {
            self.exited.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn worker_drains_pushed_messages() {
        let shared = Arc::new(WorkerShared::new(VecDeque::new()));
        let started = Arc::new(AtomicBool::new(false));
        let exited = Arc::new(AtomicBool::new(false));
        let handled = Arc::new(AtomicUsize::new(0));

        let handle = spawn(
            "collector",
            Arc::clone(&shared),
            Collector {
                started: Arc::clone(&started),
                exited: Arc::clone(&exited),
                handled: Arc::clone(&handled),
            },
        )
        .expect("spawn worker");

        for i in 0..10 {
            shared.lock().push_back(i);
            shared.notify_work();
        }

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while handled.load(Ordering::SeqCst) < 10 {
            assert!(std::time::Instant::now() < deadline, "worker stalled");
            std::thread::yield_now();
        }

        drop(handle);
        assert!(started.load(Ordering::SeqCst));
        assert!(exited.load(Ordering::SeqCst), "on_exit runs after shutdown");
    }

    #[test]
    fn drop_wakes_an_idle_worker() {
        let shared = Arc::new(WorkerShared::new(VecDeque::new()));
        let exited = Arc::new(AtomicBool::new(false));
        let handle = spawn(
            "idle",
            Arc::clone(&shared),
            Collector {
                started: Arc::new(AtomicBool::new(false)),
                exited: Arc::clone(&exited),
                handled: Arc::new(AtomicUsize::new(0)),
            },
        )
        .expect("spawn worker");

        // The worker is blocked waiting for work; drop must not hang.
        drop(handle);
        assert!(exited.load(Ordering::SeqCst));
    }
}
