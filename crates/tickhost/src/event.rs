//! # Event Dispatch
//!
//! Pushes game events to subscribed scripts and gives their handlers a
//! bounded window to cancel or rewrite the event before the host commits
//! it. The tick thread blocks inside [`dispatch`], but keeps draining the
//! main queue in short slices so calls issued by the very handler it is
//! waiting on still execute. A handler that misses the deadline loses its
//! vote: the event proceeds unmodified and a warning is logged.
//!
//! High-volume events with many subjects (say, every block in an
//! explosion) go through [`dispatch_batch`]: one message carrying all
//! items, one collective deadline, per-item cancellation.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use tickwire::Message;
use tickwire::WireValue;
use tokio::sync::mpsc;

use crate::codec::Serializer;
use crate::queue::MainQueueWorker;
use crate::registry::ObjectRegistry;
use crate::value::HostValue;

/// How often the waiting tick thread wakes up to drain the main queue.
const DRAIN_SLICE: Duration = Duration::from_millis(5);

/// A rewrite a handler applied instead of (or alongside) cancelling.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOverride {
    /// Replace the outgoing chat text.
    Chat(String),
    /// Replace the damage amount.
    Damage(f64),
}

/// One in-flight delivery to one script, resolved by `event_done`,
/// `event_cancel`, or `event_result`.
pub struct PendingEvent {
    id: i64,
    cancelled: AtomicBool,
    result: Mutex<Option<(WireValue, Option<String>)>>,
    latch: Latch,
}

impl PendingEvent {
    fn new(id: i64) -> Self {
        Self {
            id,
            cancelled: AtomicBool::new(false),
            result: Mutex::new(None),
            latch: Latch::new(1),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn is_resolved(&self) -> bool {
        self.latch.is_open()
    }

    fn take_override(&self) -> Option<EventOverride> {
        let (result, result_type) = self.result.lock().unwrap_or_else(|e| e.into_inner()).take()?;
        match result_type.as_deref() {
            Some("chat") => result.as_str().map(|s| EventOverride::Chat(s.to_string())),
            Some("damage") => result.as_f64().map(EventOverride::Damage),
            // Untyped results are inferred from shape.
            _ => match result {
                WireValue::Str(s) => Some(EventOverride::Chat(s)),
                WireValue::Int(_) | WireValue::Float(_) => {
                    result.as_f64().map(EventOverride::Damage)
                }
                _ => None,
            },
        }
    }
}

/// Tracks every unresolved delivery for one session. The session's I/O task
/// resolves entries directly, never through the main queue, so a parked
/// tick thread can always be released.
pub struct EventWaiter {
    pending: DashMap<i64, Arc<PendingEvent>>,
    next: AtomicI64,
}

impl EventWaiter {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            next: AtomicI64::new(1),
        }
    }

    fn begin(&self) -> Arc<PendingEvent> {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::new(PendingEvent::new(id));
        self.pending.insert(id, Arc::clone(&pending));
        pending
    }

    pub fn resolve_done(&self, id: i64) {
        if let Some((_, pending)) = self.pending.remove(&id) {
            pending.latch.count_down();
        }
    }

    pub fn resolve_cancel(&self, id: i64) {
        if let Some((_, pending)) = self.pending.remove(&id) {
            pending.cancelled.store(true, Ordering::Release);
            pending.latch.count_down();
        }
    }

    pub fn resolve_result(&self, id: i64, result: WireValue, result_type: Option<String>) {
        if let Some((_, pending)) = self.pending.remove(&id) {
            *pending.result.lock().unwrap_or_else(|e| e.into_inner()) =
                Some((result, result_type));
            pending.latch.count_down();
        }
    }

    /// Forget an entry whose deadline passed. A late resolution for it
    /// becomes a no-op.
    fn forget(&self, id: i64) {
        self.pending.remove(&id);
    }

    pub fn unresolved(&self) -> usize {
        self.pending.len()
    }
}

impl Default for EventWaiter {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscribed session, as event dispatch sees it.
pub struct EventTarget {
    pub sender: mpsc::UnboundedSender<Message>,
    pub waiter: Arc<EventWaiter>,
    pub registry: Arc<ObjectRegistry>,
    /// Monitor-priority subscribers observe only; their cancellations and
    /// overrides are discarded.
    pub can_cancel: bool,
}

/// Conventional payload slots most game events share, serialized under
/// fixed keys so scripts can rely on them across event types. Anything
/// event-specific rides in `extra`.
#[derive(Default)]
pub struct Projection {
    pub player: Option<HostValue>,
    pub block: Option<HostValue>,
    pub entity: Option<HostValue>,
    pub damager: Option<HostValue>,
    pub location: Option<HostValue>,
    pub world: Option<HostValue>,
    pub item: Option<HostValue>,
    pub inventory: Option<HostValue>,
    pub chunk: Option<HostValue>,
    pub extra: BTreeMap<String, HostValue>,
}

impl Projection {
    pub fn serialize(&self, serializer: &Serializer) -> BTreeMap<String, WireValue> {
        let slots = [
            ("player", &self.player),
            ("block", &self.block),
            ("entity", &self.entity),
            ("damager", &self.damager),
            ("location", &self.location),
            ("world", &self.world),
            ("item", &self.item),
            ("inventory", &self.inventory),
            ("chunk", &self.chunk),
        ];
        let mut fields = BTreeMap::new();
        for (key, value) in slots {
            if let Some(value) = value {
                fields.insert(key.to_string(), serializer.serialize(value));
            }
        }
        for (key, value) in &self.extra {
            fields.insert(key.clone(), serializer.serialize(value));
        }
        fields
    }
}

/// A game event the host is about to commit.
pub trait HostEvent {
    fn name(&self) -> &str;

    /// Payload projection. Objects placed here get registered against each
    /// receiving session's registry via the passed serializer.
    fn fields(&self, serializer: &Serializer) -> BTreeMap<String, WireValue>;

    /// Whether handlers may veto this event at all.
    fn cancellable(&self) -> bool {
        true
    }

    fn set_cancelled(&mut self);

    fn apply_override(&mut self, _value: &EventOverride) {}
}

/// A game event with many independent subjects, cancellable per subject.
pub trait HostEventBatch {
    fn name(&self) -> &str;

    fn len(&self) -> usize;

    fn item_fields(&self, serializer: &Serializer, index: usize) -> BTreeMap<String, WireValue>;
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct EventOutcome {
    pub cancelled: bool,
    pub timed_out: bool,
    pub overrides: Vec<EventOverride>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchOutcome {
    /// Per-item cancellation flags, indexed like the batch.
    pub cancelled: Vec<bool>,
    pub timed_out: bool,
}

/// Deliver one event to every target. Cancellable events wait for every
/// handler to resolve, up to `wait`, then apply cancellation and overrides
/// to the event before returning. Non-cancellable events are sent without
/// an id and return immediately.
pub fn dispatch(
    event: &mut dyn HostEvent,
    targets: &[EventTarget],
    worker: &mut MainQueueWorker,
    wait: Duration,
) -> EventOutcome {
    let mut outcome = EventOutcome::default();
    if targets.is_empty() {
        return outcome;
    }

    if !event.cancellable() {
        for target in targets {
            let serializer = Serializer::new(&target.registry);
            let payload = event.fields(&serializer);
            let _ = target.sender.send(Message::Event {
                event: event.name().to_string(),
                payload: WireValue::Map(payload),
            });
        }
        return outcome;
    }

    let mut in_flight: Vec<(&EventTarget, Arc<PendingEvent>)> =
        Vec::with_capacity(targets.len());
    for target in targets {
        let pending = target.waiter.begin();
        let serializer = Serializer::new(&target.registry);
        let mut payload = event.fields(&serializer);
        payload.insert("id".to_string(), WireValue::Int(pending.id()));
        let message = Message::Event {
            event: event.name().to_string(),
            payload: WireValue::Map(payload),
        };
        if target.sender.send(message).is_ok() {
            in_flight.push((target, pending));
        } else {
            // Session is tearing down; do not wait on it.
            target.waiter.forget(pending.id());
        }
    }

    outcome.timed_out = !wait_all(&in_flight, worker, wait);
    if outcome.timed_out {
        tracing::warn!(
            event = event.name(),
            "handler missed the event deadline; proceeding uncancelled"
        );
    }

    for (target, pending) in &in_flight {
        if !pending.is_resolved() {
            target.waiter.forget(pending.id());
            continue;
        }
        if !target.can_cancel {
            continue;
        }
        if pending.is_cancelled() {
            outcome.cancelled = true;
        }
        if let Some(value) = pending.take_override() {
            outcome.overrides.push(value);
        }
    }

    if outcome.cancelled {
        event.set_cancelled();
    }
    for value in &outcome.overrides {
        event.apply_override(value);
    }
    outcome
}

/// Deliver a multi-subject event as one `event_batch` per target and wait
/// collectively, up to `wait`. Items whose handler neither cancelled nor
/// resolved in time proceed.
pub fn dispatch_batch(
    batch: &dyn HostEventBatch,
    targets: &[EventTarget],
    worker: &mut MainQueueWorker,
    wait: Duration,
) -> BatchOutcome {
    let mut outcome = BatchOutcome {
        cancelled: vec![false; batch.len()],
        timed_out: false,
    };
    if targets.is_empty() || batch.len() == 0 {
        return outcome;
    }

    // in_flight holds one (target, pending) per target per item.
    let mut in_flight: Vec<(&EventTarget, Arc<PendingEvent>)> = Vec::new();
    let mut item_of = Vec::new();
    for target in targets {
        let serializer = Serializer::new(&target.registry);
        let mut payloads = Vec::with_capacity(batch.len());
        let mut pendings = Vec::with_capacity(batch.len());
        for index in 0..batch.len() {
            let pending = target.waiter.begin();
            let mut fields = batch.item_fields(&serializer, index);
            fields.insert("id".to_string(), WireValue::Int(pending.id()));
            payloads.push(WireValue::Map(fields));
            pendings.push((pending, index));
        }
        let message = Message::EventBatch {
            event: batch.name().to_string(),
            payloads,
        };
        if target.sender.send(message).is_ok() {
            for (pending, index) in pendings {
                in_flight.push((target, pending));
                item_of.push(index);
            }
        } else {
            for (pending, _) in pendings {
                target.waiter.forget(pending.id());
            }
        }
    }

    outcome.timed_out = !wait_all(&in_flight, worker, wait);
    if outcome.timed_out {
        tracing::warn!(
            event = batch.name(),
            "handler missed the batch deadline; unresolved items proceed"
        );
    }

    for ((target, pending), index) in in_flight.iter().zip(&item_of) {
        if !pending.is_resolved() {
            target.waiter.forget(pending.id());
            continue;
        }
        if pending.is_cancelled() && target.can_cancel {
            outcome.cancelled[*index] = true;
        }
    }
    outcome
}

/// Park until every pending entry resolves, draining the main queue between
/// naps. Returns false on deadline.
fn wait_all(
    in_flight: &[(&EventTarget, Arc<PendingEvent>)],
    worker: &mut MainQueueWorker,
    wait: Duration,
) -> bool {
    let deadline = Instant::now() + wait;
    loop {
        worker.drain();
        let Some((_, unresolved)) = in_flight
            .iter()
            .find(|(_, pending)| !pending.is_resolved())
        else {
            return true;
        };
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        unresolved.latch.wait_for(DRAIN_SLICE.min(deadline - now));
    }
}

/// Single-use countdown latch over a mutex and condvar.
struct Latch {
    count: Mutex<usize>,
    cv: Condvar,
}

impl Latch {
    fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            cv: Condvar::new(),
        }
    }

    fn count_down(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        if *count > 0 {
            *count -= 1;
            if *count == 0 {
                self.cv.notify_all();
            }
        }
    }

    fn is_open(&self) -> bool {
        *self.count.lock().unwrap_or_else(|e| e.into_inner()) == 0
    }

    /// Wait until open or the timeout passes. Returns whether it opened.
    fn wait_for(&self, timeout: Duration) -> bool {
        let count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        let (count, _) = self
            .cv
            .wait_timeout_while(count, timeout, |count| *count > 0)
            .unwrap_or_else(|e| e.into_inner());
        *count == 0
    }
}
