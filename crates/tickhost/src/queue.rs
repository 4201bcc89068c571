//! # Main Thread Queue
//!
//! All game-state mutation happens on the tick thread. Session tasks and
//! event handlers hand closures to a [`MainQueue`] from any thread; the
//! tick loop owns the matching [`MainQueueWorker`] and drains it once per
//! tick, and again while parked inside a cancellable event wait so calls
//! made by the event handler still make progress.
//!
//! Tasks can also be deferred by a number of ticks, which backs the `wait`
//! protocol message.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::mpsc;

pub type Task = Box<dyn FnOnce() + Send>;

enum Item {
    Now(Task),
    After(u64, Task),
}

/// Cheap cloneable handle for submitting work to the tick thread.
#[derive(Clone)]
pub struct MainQueue {
    tx: mpsc::UnboundedSender<Item>,
    depth: Arc<AtomicUsize>,
}

impl MainQueue {
    /// Run a task at the next drain. Silently dropped after the worker is
    /// gone, which only happens during shutdown.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        self.depth.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(Item::Now(Box::new(task))).is_err() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Run a task after the given number of whole ticks. Zero means the
    /// next drain.
    pub fn submit_after(&self, ticks: u64, task: impl FnOnce() + Send + 'static) {
        self.depth.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(Item::After(ticks, Box::new(task))).is_err() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Tasks accepted but not yet run, immediate and deferred together.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

struct Delayed {
    due: u64,
    seq: u64,
    task: Task,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    // Reversed so the BinaryHeap pops the earliest due tick first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.due.cmp(&self.due).then(other.seq.cmp(&self.seq))
    }
}

/// The consuming end, owned by the tick loop.
pub struct MainQueueWorker {
    rx: mpsc::UnboundedReceiver<Item>,
    depth: Arc<AtomicUsize>,
    delayed: BinaryHeap<Delayed>,
    seq: u64,
    clock: TickClock,
}

pub fn main_queue() -> (MainQueue, MainQueueWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    let queue = MainQueue {
        tx,
        depth: Arc::clone(&depth),
    };
    let worker = MainQueueWorker {
        rx,
        depth,
        delayed: BinaryHeap::new(),
        seq: 0,
        clock: TickClock::new(),
    };
    (queue, worker)
}

impl MainQueueWorker {
    /// Run everything currently queued, in submission order. Deferred tasks
    /// are filed for a later tick; a deferral of zero runs right here.
    /// Returns how many tasks ran.
    pub fn drain(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(item) = self.rx.try_recv() {
            match item {
                Item::Now(task) | Item::After(0, task) => {
                    self.depth.fetch_sub(1, Ordering::Relaxed);
                    task();
                    ran += 1;
                }
                Item::After(ticks, task) => {
                    self.seq += 1;
                    self.delayed.push(Delayed {
                        due: self.clock.current_tick() + ticks,
                        seq: self.seq,
                        task,
                    });
                }
            }
        }
        ran
    }

    /// One full tick: advance the clock, run deferred tasks that came due,
    /// drain the queue, and record the tick duration.
    pub fn tick(&mut self) {
        let start = Instant::now();
        let now = self.clock.advance();

        while self
            .delayed
            .peek()
            .is_some_and(|delayed| delayed.due <= now)
        {
            if let Some(delayed) = self.delayed.pop() {
                self.depth.fetch_sub(1, Ordering::Relaxed);
                (delayed.task)();
            }
        }

        self.drain();
        self.clock.record(start.elapsed());
    }

    pub fn clock(&self) -> TickClock {
        self.clock.clone()
    }
}

struct ClockInner {
    tick: AtomicU64,
    last_tick_micros: AtomicU64,
}

/// Shared view of tick progress, readable from any thread.
#[derive(Clone)]
pub struct TickClock {
    inner: Arc<ClockInner>,
}

impl TickClock {
    fn new() -> Self {
        Self {
            inner: Arc::new(ClockInner {
                tick: AtomicU64::new(0),
                last_tick_micros: AtomicU64::new(0),
            }),
        }
    }

    fn advance(&self) -> u64 {
        self.inner.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record(&self, elapsed: Duration) {
        self.inner
            .last_tick_micros
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn current_tick(&self) -> u64 {
        self.inner.tick.load(Ordering::Relaxed)
    }

    pub fn last_tick_duration(&self) -> Duration {
        Duration::from_micros(self.inner.last_tick_micros.load(Ordering::Relaxed))
    }
}
