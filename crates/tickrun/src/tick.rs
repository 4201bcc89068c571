//! # Tick Thread
//!
//! A reference main loop for hosts that do not already have one: tick the
//! queue worker at a fixed cadence and hand the worker to a per-tick
//! callback, which is where an embedder dispatches its events. Game
//! engines with their own loop skip this and call
//! [`tickhost::queue::MainQueueWorker::tick`] from theirs.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use tickhost::queue::MainQueueWorker;

/// Twenty ticks per second.
pub const TICK_PERIOD: Duration = Duration::from_millis(50);

pub struct TickThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TickThread {
    pub fn spawn<F>(mut worker: MainQueueWorker, period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut(&mut MainQueueWorker) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("bridge-tick".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::SeqCst) {
                    let start = Instant::now();
                    worker.tick();
                    on_tick(&mut worker);
                    let elapsed = start.elapsed();
                    if let Some(rest) = period.checked_sub(elapsed) {
                        std::thread::sleep(rest);
                    } else {
                        tracing::warn!(?elapsed, "tick overran its period");
                    }
                }
            })
            .expect("spawning the tick thread");
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop after the current tick and wait for the thread to exit.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TickThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
