//! # Metrics Facade
//!
//! A read-only singleton scripts can poll for tick progress and queue
//! pressure. Embedders register it under `"metrics"` in their facade
//! directory.

use std::any::Any;
use std::collections::BTreeMap;

use tickhost::object;
use tickhost::queue::MainQueue;
use tickhost::queue::TickClock;
use tickhost::CapabilityTable;
use tickhost::HostObject;
use tickhost::HostValue;
use tickhost::ParamKind;

pub struct MetricsFacade {
    clock: TickClock,
    queue: MainQueue,
    caps: CapabilityTable,
}

impl MetricsFacade {
    pub fn new(clock: TickClock, queue: MainQueue) -> Self {
        let mut caps = CapabilityTable::new();
        caps.method("tick", Vec::<ParamKind>::new(), |target, _| {
            let metrics = object::downcast::<MetricsFacade>(target)?;
            Ok(HostValue::Int(metrics.clock.current_tick() as i64))
        });
        caps.method("last_tick_ms", Vec::<ParamKind>::new(), |target, _| {
            let metrics = object::downcast::<MetricsFacade>(target)?;
            Ok(HostValue::Float(
                metrics.clock.last_tick_duration().as_secs_f64() * 1000.0,
            ))
        });
        caps.method("queue_depth", Vec::<ParamKind>::new(), |target, _| {
            let metrics = object::downcast::<MetricsFacade>(target)?;
            Ok(HostValue::Int(metrics.queue.depth() as i64))
        });
        Self { clock, queue, caps }
    }
}

impl HostObject for MetricsFacade {
    fn type_name(&self) -> &str {
        "Metrics"
    }

    fn capabilities(&self) -> &CapabilityTable {
        &self.caps
    }

    fn fields(&self) -> BTreeMap<String, HostValue> {
        BTreeMap::from([
            (
                "tick".to_string(),
                HostValue::Int(self.clock.current_tick() as i64),
            ),
            (
                "queue_depth".to_string(),
                HostValue::Int(self.queue.depth() as i64),
            ),
        ])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
